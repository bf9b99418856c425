// src/extract.rs

use crate::error::ExtractionError;
use crate::model::{ChangeRef, Changeset, Sharing};
use crate::repo::RepoHandle;
use tracing::debug;

/// Git's default unified diff context; changesets never carry less
const MIN_CONTEXT_LINES: u32 = 3;

#[derive(Debug, Clone, Copy)]
pub struct ExtractOptions {
    pub context_lines: u32,
}

impl Default for ExtractOptions {
    fn default() -> Self {
        ExtractOptions {
            context_lines: MIN_CONTEXT_LINES,
        }
    }
}

/// Resolves the diff attributable to a sharing
pub fn extract(sharing: &Sharing, repo: &RepoHandle, opts: &ExtractOptions) -> Result<Changeset, ExtractionError> {
    extract_ref(&sharing.change, repo, opts)
}

pub fn extract_ref(change: &ChangeRef, repo: &RepoHandle, opts: &ExtractOptions) -> Result<Changeset, ExtractionError> {
    let context_lines = opts.context_lines.max(MIN_CONTEXT_LINES);

    let (commit, base) = match change {
        ChangeRef::Commit { sha } => {
            let commit = repo.find_commit(sha)?;
            // first parent for merges, empty tree for root commits
            let base = match commit.parent_count() {
                0 => None,
                _ => Some(commit.parent(0)?),
            };
            (commit, base)
        }
        ChangeRef::PullRequest {
            number,
            merge_sha,
            base_sha,
        } => {
            let merge = repo.find_commit(merge_sha)?;
            let base = match base_sha {
                Some(base_sha) => Some(repo.find_commit(base_sha)?),
                None if merge.parent_count() == 0 => None,
                None => {
                    if merge.parent_count() == 1 {
                        debug!(
                            repository = repo.name(),
                            pr = ?number,
                            merge = %merge.id(),
                            "single-parent merge commit; assuming squash merge"
                        );
                    }
                    Some(merge.parent(0)?)
                }
            };
            (merge, base)
        }
        ChangeRef::Issue { closed_by, .. } => return extract_ref(closed_by, repo, opts),
    };

    let files = repo.diff_commits(base.as_ref(), &commit, context_lines, true)?;
    let changeset = Changeset {
        commit: commit.id().to_string(),
        base: base.map(|b| b.id().to_string()),
        files,
    };
    if changeset.changed_line_count() == 0 {
        return Err(ExtractionError::EmptyDiff {
            commit: changeset.commit,
        });
    }
    Ok(changeset)
}
