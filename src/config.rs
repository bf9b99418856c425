// src/config.rs

use crate::error::InputError;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

/// Run configuration, loaded once at startup and passed by reference.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Unchanged lines kept on each side of a run of changed lines
    pub context_lines: usize,
    /// Cutoff for reporting a group line as matching a line of the winning unit
    pub line_match_cutoff: f64,
    /// Similarity records kept per line group
    pub top_k: usize,
    /// Also checkpoint every group/unit score, not just the top records
    pub keep_all_scores: bool,
    /// Only consulted by reports; the engine never classifies
    pub inspired_threshold: f64,
    /// Upper bound on commits walked from introduction to tip
    pub max_commits: usize,
    /// Tip ref used when the availability record names none
    pub tip: String,
    pub workers: Option<usize>,
    /// fsync after every checkpoint append
    pub sync_writes: bool,
    pub sharing_budget_secs: Option<u64>,
    /// Base for relative clone paths in the availability record
    pub repositories_root: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            context_lines: 3,
            line_match_cutoff: 0.75,
            top_k: 3,
            keep_all_scores: false,
            inspired_threshold: 0.5,
            max_commits: 10_000,
            tip: "HEAD".to_string(),
            workers: None,
            sync_writes: true,
            sharing_budget_secs: None,
            repositories_root: None,
        }
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self, InputError> {
        let text = std::fs::read_to_string(path).map_err(|e| InputError::io(path, e))?;
        Self::from_toml(&text).map_err(|source| InputError::Toml {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn from_toml(text: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(text)
    }

    /// Deadline for one sharing started now, if a budget is configured
    pub fn deadline(&self) -> Option<Instant> {
        self.sharing_budget_secs
            .map(|secs| Instant::now() + Duration::from_secs(secs))
    }
}
