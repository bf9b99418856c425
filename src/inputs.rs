// src/inputs.rs

//! Loading of the collaborator-supplied inputs: the sharing table, the
//! repository availability record and the conversation store.

use crate::error::{ExtractionError, InputError};
use crate::model::{ChangeKind, ChangeRef, Sharing, Turn};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::warn;

/// One row of the sharing table, before validation
#[derive(Debug, Clone, Deserialize)]
pub struct SharingRow {
    pub id: String,
    pub repository: String,
    pub kind: ChangeKind,
    #[serde(default)]
    pub sha: Option<String>,
    #[serde(default)]
    pub pr_number: Option<u64>,
    #[serde(default)]
    pub base_sha: Option<String>,
    #[serde(default)]
    pub issue_number: Option<u64>,
    /// For issues: whether a commit or a pull request closed it
    #[serde(default)]
    pub closer_kind: Option<ChangeKind>,
    #[serde(default)]
    pub conversation_id: Option<String>,
}

impl TryFrom<SharingRow> for Sharing {
    type Error = InputError;

    fn try_from(row: SharingRow) -> Result<Self, Self::Error> {
        let invalid = |message: &str| InputError::InvalidSharing {
            id: row.id.clone(),
            message: message.to_string(),
        };
        let sha = row
            .sha
            .clone()
            .filter(|sha| !sha.trim().is_empty())
            .ok_or_else(|| invalid("missing sha"))?;

        let direct = |kind: ChangeKind| match kind {
            ChangeKind::Commit => Ok(ChangeRef::Commit { sha: sha.clone() }),
            ChangeKind::PullRequest => Ok(ChangeRef::PullRequest {
                number: row.pr_number,
                merge_sha: sha.clone(),
                base_sha: row.base_sha.clone(),
            }),
            ChangeKind::Issue => Err(invalid("issue closed by another issue")),
        };

        let change = match row.kind {
            ChangeKind::Issue => {
                let closer = row
                    .closer_kind
                    .ok_or_else(|| invalid("issue without closer_kind"))?;
                ChangeRef::Issue {
                    number: row.issue_number,
                    closed_by: Box::new(direct(closer)?),
                }
            }
            kind => direct(kind)?,
        };

        Ok(Sharing {
            id: row.id,
            repository: row.repository,
            change,
            conversation_id: row.conversation_id,
        })
    }
}

/// Sharings read from a table, plus the number of rows that were rejected
#[derive(Debug, Default)]
pub struct SharingTable {
    pub sharings: Vec<Sharing>,
    pub rejected: usize,
}

/// Reads a JSON Lines sharing table. Rows that fail to parse or validate
/// are logged and skipped.
pub fn load_sharings(path: &Path) -> Result<SharingTable, InputError> {
    let text = std::fs::read_to_string(path).map_err(|e| InputError::io(path, e))?;
    Ok(parse_sharings(&text, path))
}

pub fn parse_sharings(text: &str, origin: &Path) -> SharingTable {
    let mut table = SharingTable::default();
    for (idx, line) in text.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let row: SharingRow = match serde_json::from_str(line) {
            Ok(row) => row,
            Err(e) => {
                warn!(file = %origin.display(), line = idx + 1, error = %e, "skipping malformed sharing row");
                table.rejected += 1;
                continue;
            }
        };
        match Sharing::try_from(row) {
            Ok(sharing) => table.sharings.push(sharing),
            Err(e) => {
                warn!(file = %origin.display(), line = idx + 1, error = %e, "skipping invalid sharing row");
                table.rejected += 1;
            }
        }
    }
    table
}

/// One record of the clone step's status output. The clone step names a
/// repository by its bare directory (`project`); other producers give the
/// full `owner/name` (`repository`).
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AvailabilityRow {
    #[serde(default)]
    pub repository: Option<String>,
    #[serde(default)]
    pub project: Option<String>,
    #[serde(default)]
    pub repository_path: Option<PathBuf>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default)]
    pub tip: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RepoStatus {
    Cloned { path: PathBuf, tip: Option<String> },
    Unavailable { reason: String },
}

/// Where each repository's clone lives, if anywhere
#[derive(Debug, Clone, Default)]
pub struct Availability {
    /// Keyed by `owner/name`
    repos: HashMap<String, RepoStatus>,
    /// Keyed by the bare repository name
    by_project: HashMap<String, RepoStatus>,
}

impl Availability {
    pub fn load(path: &Path, root: Option<&Path>) -> Result<Self, InputError> {
        let text = std::fs::read_to_string(path).map_err(|e| InputError::io(path, e))?;
        let rows: Vec<AvailabilityRow> =
            serde_json::from_str(&text).map_err(|source| InputError::Json {
                path: path.to_path_buf(),
                source,
            })?;
        Ok(Self::from_rows(rows, root))
    }

    pub fn from_rows(rows: Vec<AvailabilityRow>, root: Option<&Path>) -> Self {
        let mut availability = Availability::default();
        for row in rows {
            let status = match (row.repository_path, row.status.as_deref()) {
                (Some(path), None | Some("cloned") | Some("ok")) => {
                    let path = match root {
                        Some(root) if path.is_relative() => root.join(path),
                        _ => path,
                    };
                    RepoStatus::Cloned { path, tip: row.tip }
                }
                (_, status) => RepoStatus::Unavailable {
                    reason: row
                        .reason
                        .or_else(|| status.map(str::to_string))
                        .unwrap_or_else(|| "not cloned".to_string()),
                },
            };
            match (row.repository, row.project) {
                (Some(repository), _) => {
                    availability.repos.insert(repository, status);
                }
                (None, Some(project)) => {
                    availability.by_project.insert(project, status);
                }
                (None, None) => warn!("skipping availability record without a repository name"),
            }
        }
        availability
    }

    /// Looks up `owner/name` first, then its last path segment
    pub fn status(&self, repository: &str) -> Option<&RepoStatus> {
        self.repos.get(repository).or_else(|| {
            let project = repository.rsplit('/').next().unwrap_or(repository);
            self.by_project.get(project)
        })
    }

    /// Clone path and designated tip of a repository
    pub fn locate(&self, repository: &str) -> Result<(&Path, Option<&str>), ExtractionError> {
        match self.status(repository) {
            Some(RepoStatus::Cloned { path, tip }) => Ok((path.as_path(), tip.as_deref())),
            Some(RepoStatus::Unavailable { reason }) => Err(ExtractionError::RepositoryUnavailable {
                repository: repository.to_string(),
                reason: reason.clone(),
            }),
            None => Err(ExtractionError::RepositoryUnavailable {
                repository: repository.to_string(),
                reason: "not in availability record".to_string(),
            }),
        }
    }
}

/// Conversation transcripts keyed by conversation id
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(transparent)]
pub struct ConversationStore {
    conversations: HashMap<String, Vec<Turn>>,
}

impl ConversationStore {
    pub fn load(path: &Path) -> Result<Self, InputError> {
        let text = std::fs::read_to_string(path).map_err(|e| InputError::io(path, e))?;
        serde_json::from_str(&text).map_err(|source| InputError::Json {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn get(&self, conversation_id: &str) -> Option<&[Turn]> {
        self.conversations.get(conversation_id).map(Vec::as_slice)
    }

    pub fn insert(&mut self, conversation_id: impl Into<String>, turns: Vec<Turn>) {
        self.conversations.insert(conversation_id.into(), turns);
    }

    pub fn len(&self) -> usize {
        self.conversations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.conversations.is_empty()
    }
}
