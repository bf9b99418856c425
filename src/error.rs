// src/error.rs

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Errors raised while turning a sharing into a changeset.
#[derive(Debug, Error)]
pub enum ExtractionError {
    #[error("repository {repository} is unavailable: {reason}")]
    RepositoryUnavailable { repository: String, reason: String },

    #[error("reference {reference} not found in history")]
    ReferenceNotFound { reference: String },

    #[error("commit {commit} has no changed lines")]
    EmptyDiff { commit: String },

    #[error("git error: {0}")]
    Git(#[from] git2::Error),
}

/// Errors raised while tracing lines forward to the tip.
///
/// Lineage gaps are not errors: they end up as `unknown` verdicts.
#[derive(Debug, Error)]
pub enum LineageError {
    #[error("git error: {0}")]
    Git(#[from] git2::Error),

    #[error("wall-clock budget exceeded after {steps} steps")]
    BudgetExceeded { steps: usize },
}

#[derive(Debug, Error)]
pub enum CheckpointError {
    #[error("checkpoint store {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to serialize checkpoint entry: {0}")]
    Serialize(#[from] serde_json::Error),
}

impl CheckpointError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

#[derive(Debug, Error)]
pub enum InputError {
    #[error("cannot read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed JSON in {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("malformed TOML in {path}: {source}")]
    Toml {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("invalid sharing {id}: {message}")]
    InvalidSharing { id: String, message: String },
}

impl InputError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// Errors that abort a whole run.
#[derive(Debug, Error)]
pub enum RunError {
    #[error(transparent)]
    Checkpoint(#[from] CheckpointError),

    #[error(transparent)]
    Input(#[from] InputError),

    #[error("repositories root {path} is not accessible")]
    RepositoriesRoot { path: PathBuf },

    #[error("cannot start worker pool: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),
}

/// Kind of a terminal per-sharing failure, as written into checkpoint entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    RepositoryUnavailable,
    ReferenceNotFound,
    EmptyDiff,
    ConversationUnavailable,
    BudgetExceeded,
    GitError,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_serde_name(self, f)
    }
}

/// Writes the serialized name of a unit enum variant, so displayed and
/// checkpointed names come from the same `rename_all`
pub(crate) fn write_serde_name<T: Serialize>(value: &T, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match serde_json::to_value(value) {
        Ok(serde_json::Value::String(name)) => f.write_str(&name),
        _ => Err(fmt::Error),
    }
}

/// A recoverable failure that terminates processing of one sharing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Failure {
    pub kind: FailureKind,
    pub message: String,
}

impl Failure {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl From<ExtractionError> for Failure {
    fn from(err: ExtractionError) -> Self {
        let kind = match &err {
            ExtractionError::RepositoryUnavailable { .. } => FailureKind::RepositoryUnavailable,
            ExtractionError::ReferenceNotFound { .. } => FailureKind::ReferenceNotFound,
            ExtractionError::EmptyDiff { .. } => FailureKind::EmptyDiff,
            ExtractionError::Git(_) => FailureKind::GitError,
        };
        Failure::new(kind, err.to_string())
    }
}

impl From<LineageError> for Failure {
    fn from(err: LineageError) -> Self {
        let kind = match &err {
            LineageError::Git(_) => FailureKind::GitError,
            LineageError::BudgetExceeded { .. } => FailureKind::BudgetExceeded,
        };
        Failure::new(kind, err.to_string())
    }
}
