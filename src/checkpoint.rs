// src/checkpoint.rs

//! Append-only JSON Lines checkpoint and the resumable batch controller.
//!
//! Each processed sharing produces exactly one line, written whole and
//! flushed before the next sharing is considered done. On restart the ids
//! already present are skipped, so an interrupted run resumes where it
//! stopped and a completed run is a no-op.

use crate::error::{CheckpointError, Failure, FailureKind, RunError};
use indicatif::{ParallelProgressIterator, ProgressBar};
use rayon::prelude::*;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointEntry<T> {
    pub id: String,
    #[serde(flatten)]
    pub outcome: Outcome<T>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Outcome<T> {
    Completed { result: T },
    Failed { kind: FailureKind, message: String },
}

impl<T> CheckpointEntry<T> {
    pub fn completed(id: impl Into<String>, result: T) -> Self {
        CheckpointEntry {
            id: id.into(),
            outcome: Outcome::Completed { result },
        }
    }

    pub fn failed(id: impl Into<String>, failure: Failure) -> Self {
        CheckpointEntry {
            id: id.into(),
            outcome: Outcome::Failed {
                kind: failure.kind,
                message: failure.message,
            },
        }
    }

    pub fn result(&self) -> Option<&T> {
        match &self.outcome {
            Outcome::Completed { result } => Some(result),
            Outcome::Failed { .. } => None,
        }
    }

    pub fn failure_kind(&self) -> Option<FailureKind> {
        match &self.outcome {
            Outcome::Completed { .. } => None,
            Outcome::Failed { kind, .. } => Some(*kind),
        }
    }
}

/// A checkpoint line that could not be parsed; its sharing is reprocessed
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CorruptEntry {
    pub line: usize,
    /// Sharing id, when enough of the line survived to read it
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub text: String,
    pub error: String,
}

/// Entries recovered from an existing checkpoint
#[derive(Debug)]
pub struct Loaded<T> {
    pub entries: Vec<CheckpointEntry<T>>,
    pub corrupt: Vec<CorruptEntry>,
}

impl<T> Loaded<T> {
    pub fn ids(&self) -> HashSet<&str> {
        self.entries.iter().map(|e| e.id.as_str()).collect()
    }
}

pub struct CheckpointStore {
    path: PathBuf,
    file: Mutex<File>,
    sync_writes: bool,
}

impl CheckpointStore {
    /// Opens (creating if needed) the store and reads back what it holds.
    ///
    /// A torn final line is terminated so later appends start on a fresh
    /// line. Unparseable lines are reported in a `.corrupt.jsonl` sidecar,
    /// unless a later valid entry for the same id shows they were already
    /// reprocessed.
    pub fn open<T: DeserializeOwned>(path: &Path, sync_writes: bool) -> Result<(Self, Loaded<T>), CheckpointError> {
        let mut file = OpenOptions::new()
            .read(true)
            .append(true)
            .create(true)
            .open(path)
            .map_err(|e| CheckpointError::io(path, e))?;

        let mut bytes = Vec::new();
        file.seek(SeekFrom::Start(0))
            .and_then(|_| file.read_to_end(&mut bytes))
            .map_err(|e| CheckpointError::io(path, e))?;
        if !bytes.is_empty() && !bytes.ends_with(b"\n") {
            warn!(path = %path.display(), "checkpoint ends with a partial line");
            file.write_all(b"\n").map_err(|e| CheckpointError::io(path, e))?;
        }

        let loaded = parse_entries(&bytes);
        if !loaded.corrupt.is_empty() {
            warn!(
                path = %path.display(),
                corrupt = loaded.corrupt.len(),
                "skipping corrupt checkpoint lines; their sharings will be reprocessed"
            );
            write_sidecar(path, &loaded.corrupt)?;
        }

        let store = CheckpointStore {
            path: path.to_path_buf(),
            file: Mutex::new(file),
            sync_writes,
        };
        Ok((store, loaded))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Appends one entry as a single line and flushes it to disk
    pub fn append<T: Serialize>(&self, entry: &CheckpointEntry<T>) -> Result<(), CheckpointError> {
        let mut line = serde_json::to_vec(entry)?;
        line.push(b'\n');

        let mut file = self
            .file
            .lock()
            .map_err(|_| CheckpointError::io(&self.path, std::io::Error::other("checkpoint lock poisoned")))?;
        file.write_all(&line)
            .and_then(|_| file.flush())
            .map_err(|e| CheckpointError::io(&self.path, e))?;
        if self.sync_writes {
            file.sync_data().map_err(|e| CheckpointError::io(&self.path, e))?;
        }
        Ok(())
    }
}

fn parse_entries<T: DeserializeOwned>(bytes: &[u8]) -> Loaded<T> {
    let mut entries = Vec::new();
    let mut corrupt = Vec::new();
    let mut seen = HashSet::new();
    for (idx, raw) in bytes.split(|b| *b == b'\n').enumerate() {
        if raw.iter().all(u8::is_ascii_whitespace) {
            continue;
        }
        let parsed = std::str::from_utf8(raw)
            .map_err(|e| e.to_string())
            .and_then(|line| serde_json::from_str::<CheckpointEntry<T>>(line).map_err(|e| e.to_string()));
        match parsed {
            Ok(entry) => {
                if seen.insert(entry.id.clone()) {
                    entries.push(entry);
                } else {
                    debug!(id = %entry.id, "duplicate checkpoint entry; keeping the first");
                }
            }
            Err(error) => {
                let text = String::from_utf8_lossy(raw).into_owned();
                corrupt.push(CorruptEntry {
                    line: idx + 1,
                    id: line_id(&text),
                    text,
                    error,
                });
            }
        }
    }

    let before = corrupt.len();
    corrupt.retain(|c| c.id.as_deref().map_or(true, |id| !seen.contains(id)));
    if corrupt.len() < before {
        debug!(superseded = before - corrupt.len(), "corrupt checkpoint lines already reprocessed");
    }
    Loaded { entries, corrupt }
}

/// Best-effort id of an unparseable line. Entries are written id first, so
/// a torn line usually still starts with it.
fn line_id(text: &str) -> Option<String> {
    if let Ok(value) = serde_json::from_str::<serde_json::Value>(text) {
        return value.get("id")?.as_str().map(str::to_string);
    }
    let rest = text.trim_start().strip_prefix(r#"{"id":"#)?;
    serde_json::Deserializer::from_str(rest)
        .into_iter::<String>()
        .next()?
        .ok()
}

fn sidecar_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(".corrupt.jsonl");
    PathBuf::from(name)
}

fn write_sidecar(path: &Path, corrupt: &[CorruptEntry]) -> Result<(), CheckpointError> {
    let sidecar = sidecar_path(path);
    let mut out = Vec::new();
    for entry in corrupt {
        serde_json::to_writer(&mut out, entry)?;
        out.push(b'\n');
    }
    std::fs::write(&sidecar, out).map_err(|e| CheckpointError::io(&sidecar, e))
}

/// Everything a batch ended up with, resumed entries first
#[derive(Debug)]
pub struct BatchOutcome<T> {
    pub entries: Vec<CheckpointEntry<T>>,
    pub resumed: usize,
    pub processed: usize,
    pub corrupt: usize,
}

/// Items of a batch need a stable identity to be checkpointed
pub trait Keyed {
    fn key(&self) -> &str;
}

impl Keyed for crate::model::Sharing {
    fn key(&self) -> &str {
        &self.id
    }
}

/// Processes every item not already in the checkpoint on a pool of
/// `workers` threads, appending one entry per item as it finishes.
///
/// `init` builds state for each rayon job split (such as opened
/// repositories) and `work` turns one item into a result or a recoverable
/// failure. Only checkpoint I/O aborts the batch.
pub fn run_batch<I, T, S, F, W>(
    items: &[I],
    store: &CheckpointStore,
    loaded: Loaded<T>,
    workers: Option<usize>,
    init: F,
    work: W,
) -> Result<BatchOutcome<T>, RunError>
where
    I: Keyed + Sync,
    T: Serialize + Send,
    F: Fn() -> S + Sync + Send,
    W: Fn(&mut S, &I) -> Result<T, Failure> + Sync + Send,
{
    let done = loaded.ids();
    let mut queued = HashSet::new();
    let pending: Vec<&I> = items
        .iter()
        .filter(|item| !done.contains(item.key()))
        .filter(|item| {
            let fresh = queued.insert(item.key());
            if !fresh {
                warn!(id = item.key(), "duplicate sharing id in input; processing once");
            }
            fresh
        })
        .collect();
    drop(queued);
    drop(done);

    let resumed = loaded.entries.len();
    info!(
        checkpoint = %store.path().display(),
        resumed,
        pending = pending.len(),
        "starting batch"
    );

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(workers.unwrap_or(0))
        .build()?;

    let bar = ProgressBar::new(pending.len() as u64);
    bar.set_message("Processing sharings");

    let fresh: Vec<CheckpointEntry<T>> = pool.install(|| {
        pending
            .par_iter()
            .progress_with(bar.clone())
            .map_init(&init, |state, item| -> Result<CheckpointEntry<T>, CheckpointError> {
                let entry = match work(state, *item) {
                    Ok(result) => CheckpointEntry::completed(item.key(), result),
                    Err(failure) => {
                        warn!(id = item.key(), kind = %failure.kind, "{}", failure.message);
                        CheckpointEntry::failed(item.key(), failure)
                    }
                };
                store.append(&entry)?;
                Ok(entry)
            })
            .collect::<Result<Vec<_>, CheckpointError>>()
    })?;
    bar.finish_with_message("Batch complete");

    let processed = fresh.len();
    let mut entries = loaded.entries;
    entries.extend(fresh);
    Ok(BatchOutcome {
        entries,
        resumed,
        processed,
        corrupt: loaded.corrupt.len(),
    })
}
