// src/lineage.rs

//! Forward line lineage: follows each line added by a changeset through the
//! commits between its introduction and the tip, like `git blame --reverse`.
//!
//! At every step the line's position is remapped through that step's diff.
//! A line whose position falls in a removed range is looked for among the
//! lines added by the same step (a move); if no identical line was added,
//! the step killed it. The walk itself only sees [`History`], so the
//! tracking logic is testable without a repository.

use crate::error::LineageError;
use crate::model::*;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::time::Instant;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepCommit {
    pub id: String,
    pub time: i64,
}

/// Commits from the introducing commit (first) to the tip (last)
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ForwardPath {
    Found(Vec<StepCommit>),
    /// The tip does not contain the introducing commit
    Unreachable,
    /// More commits than the configured bound
    TooLong,
}

/// History primitives the resolver needs
pub trait History {
    fn forward_path(&self, from: &str, limit: usize) -> Result<ForwardPath, LineageError>;

    /// Zero-context diff between two consecutive commits of a forward path
    fn step_diff(&self, from: &str, to: &str) -> Result<Vec<FileDiff>, LineageError>;

    fn file_lines(&self, commit: &str, path: &str) -> Result<Option<Vec<String>>, LineageError>;
}

#[derive(Debug, Clone, Copy)]
pub struct Limits {
    pub max_commits: usize,
    pub deadline: Option<Instant>,
}

impl Default for Limits {
    fn default() -> Self {
        Limits {
            max_commits: 10_000,
            deadline: None,
        }
    }
}

/// Verdicts for every added line of a changeset
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    /// Commits between introduction and tip; `None` when the tip is unreachable
    pub commits_to_tip: Option<u32>,
    pub verdicts: Vec<LineVerdict>,
}

/// Collapses whitespace runs and trims, so reindented lines still match
pub fn normalize_line(line: &str) -> String {
    line.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// One tracked line identity per added line of the changeset
pub fn line_identities(changeset: &Changeset) -> Vec<LineIdentity> {
    changeset
        .added_lines()
        .filter_map(|(path, line)| {
            Some(LineIdentity {
                path: path.to_string(),
                line: line.new_lineno?,
                content: line.text.clone(),
                commit: changeset.commit.clone(),
            })
        })
        .collect()
}

pub fn resolve<H: History>(
    history: &H,
    changeset: &Changeset,
    limits: &Limits,
) -> Result<Resolution, LineageError> {
    let identities = line_identities(changeset);

    let path = match history.forward_path(&changeset.commit, limits.max_commits)? {
        ForwardPath::Found(path) => path,
        ForwardPath::Unreachable | ForwardPath::TooLong => {
            return Ok(Resolution {
                commits_to_tip: None,
                verdicts: all_unknown(identities, UnknownReason::HistoryTraversalExhausted),
            })
        }
    };
    let commits_to_tip = Some(path.len().saturating_sub(1) as u32);
    if identities.is_empty() {
        return Ok(Resolution {
            commits_to_tip,
            verdicts: Vec::new(),
        });
    }

    let mut verdicts: Vec<Option<Verdict>> = vec![None; identities.len()];
    let mut live: Vec<Tracked> = identities
        .iter()
        .enumerate()
        .map(|(idx, identity)| Tracked {
            idx,
            path: identity.path.clone(),
            line: identity.line,
            key: normalize_line(&identity.content),
        })
        .collect();

    let intro = &path[0];
    for (step, pair) in path.windows(2).enumerate() {
        if live.is_empty() {
            break;
        }
        if limits.deadline.is_some_and(|deadline| Instant::now() >= deadline) {
            return Err(LineageError::BudgetExceeded { steps: step });
        }

        let next = &pair[1];
        let diff = history.step_diff(&pair[0].id, &next.id)?;
        let moves = advance(&live, &diff);

        let mut still_live = Vec::with_capacity(live.len());
        for (tracked, movement) in live.into_iter().zip(moves) {
            match movement {
                Movement::Kept { path, line } => still_live.push(Tracked {
                    path,
                    line,
                    ..tracked
                }),
                Movement::Removed => {
                    verdicts[tracked.idx] = Some(Verdict::Died {
                        killed_by: next.id.clone(),
                        killed_at: next.time,
                        commits: (step + 1) as u32,
                        seconds: next.time - intro.time,
                    })
                }
                Movement::Lost => {
                    verdicts[tracked.idx] = Some(Verdict::Unknown {
                        reason: UnknownReason::RenameTrackingUnavailable,
                    })
                }
            }
        }
        live = still_live;
    }

    // Confirm survivors against the tip tree
    let tip = &path[path.len() - 1];
    let mut by_path: BTreeMap<String, Vec<Tracked>> = BTreeMap::new();
    for tracked in live {
        by_path.entry(tracked.path.clone()).or_default().push(tracked);
    }
    for (file, tracked_lines) in by_path {
        let content = history.file_lines(&tip.id, &file)?;
        let normalized: Vec<String> = content
            .unwrap_or_default()
            .iter()
            .map(|line| normalize_line(line))
            .collect();
        for tracked in tracked_lines {
            verdicts[tracked.idx] = Some(confirm_at_tip(&tracked, &file, &normalized));
        }
    }

    let verdicts = identities
        .into_iter()
        .zip(verdicts)
        .map(|(identity, verdict)| LineVerdict {
            identity,
            verdict: verdict.unwrap_or(Verdict::Unknown {
                reason: UnknownReason::RenameTrackingUnavailable,
            }),
        })
        .collect();

    Ok(Resolution {
        commits_to_tip,
        verdicts,
    })
}

fn all_unknown(identities: Vec<LineIdentity>, reason: UnknownReason) -> Vec<LineVerdict> {
    identities
        .into_iter()
        .map(|identity| LineVerdict {
            identity,
            verdict: Verdict::Unknown { reason },
        })
        .collect()
}

/// A tracked line whose position drifted is still accepted if its content is
/// elsewhere in the same file; the nearest occurrence wins.
fn confirm_at_tip(tracked: &Tracked, file: &str, normalized: &[String]) -> Verdict {
    let at = tracked.line as usize;
    if at >= 1 && normalized.get(at - 1) == Some(&tracked.key) {
        return Verdict::Survived {
            path: file.to_string(),
            line: tracked.line,
        };
    }
    let nearest = normalized
        .iter()
        .enumerate()
        .filter(|(_, line)| **line == tracked.key)
        .min_by_key(|(idx, _)| (*idx as i64 + 1 - at as i64).abs());
    match nearest {
        Some((idx, _)) => Verdict::Survived {
            path: file.to_string(),
            line: idx as u32 + 1,
        },
        None => Verdict::Unknown {
            reason: UnknownReason::RenameTrackingUnavailable,
        },
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Tracked {
    pub idx: usize,
    pub path: String,
    pub line: u32,
    /// Normalized content
    pub key: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Movement {
    Kept { path: String, line: u32 },
    Removed,
    /// The step's diff cannot say where the line went
    Lost,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LineMapping {
    Mapped(u32),
    Removed,
    Lost,
}

/// Maps an old-side line number through a file's hunks
fn map_line(hunks: &[Hunk], line: u32) -> LineMapping {
    let mut shift: i64 = 0;
    for hunk in hunks {
        if hunk.old_lines == 0 {
            // pure insertion after `old_start`
            if line <= hunk.old_start {
                break;
            }
            shift += hunk.new_lines as i64;
            continue;
        }
        if line < hunk.old_start {
            break;
        }
        if line >= hunk.old_start + hunk.old_lines {
            shift += hunk.new_lines as i64 - hunk.old_lines as i64;
            continue;
        }
        return hunk
            .lines
            .iter()
            .find(|l| l.old_lineno == Some(line))
            .map_or(LineMapping::Lost, |l| match (l.op, l.new_lineno) {
                (LineOp::Remove, _) => LineMapping::Removed,
                (_, Some(new)) => LineMapping::Mapped(new),
                (_, None) => LineMapping::Lost,
            });
    }
    match u32::try_from(line as i64 + shift) {
        Ok(mapped) if mapped >= 1 => LineMapping::Mapped(mapped),
        _ => LineMapping::Lost,
    }
}

struct AddedLine<'a> {
    path: &'a str,
    line: u32,
}

/// Moves every live line through one step's diff
pub(crate) fn advance(live: &[Tracked], diff: &[FileDiff]) -> Vec<Movement> {
    let by_old_path: HashMap<&str, &FileDiff> = diff
        .iter()
        .filter_map(|file| file.old_path.as_deref().map(|path| (path, file)))
        .collect();

    // lines added anywhere in this step, by normalized content
    let mut added: Vec<AddedLine<'_>> = Vec::new();
    let mut added_by_key: HashMap<String, Vec<usize>> = HashMap::new();
    for file in diff.iter().filter(|f| !f.binary) {
        let Some(path) = file.new_path.as_deref() else {
            continue;
        };
        for line in file.hunks.iter().flat_map(|h| h.lines.iter()) {
            if let (LineOp::Add, Some(new)) = (line.op, line.new_lineno) {
                added_by_key
                    .entry(normalize_line(&line.text))
                    .or_default()
                    .push(added.len());
                added.push(AddedLine { path, line: new });
            }
        }
    }
    let mut claimed: HashSet<usize> = HashSet::new();

    live.iter()
        .map(|tracked| {
            let Some(file) = by_old_path.get(tracked.path.as_str()) else {
                return Movement::Kept {
                    path: tracked.path.clone(),
                    line: tracked.line,
                };
            };
            if file.binary {
                return Movement::Lost;
            }
            let mapping = match file.new_path {
                Some(_) => map_line(&file.hunks, tracked.line),
                None => LineMapping::Removed,
            };
            match mapping {
                LineMapping::Mapped(line) => Movement::Kept {
                    path: file.path().to_string(),
                    line,
                },
                LineMapping::Lost => Movement::Lost,
                LineMapping::Removed => {
                    let home = file.new_path.as_deref();
                    let candidate = added_by_key.get(&tracked.key).and_then(|candidates| {
                        candidates
                            .iter()
                            .copied()
                            .filter(|idx| !claimed.contains(idx))
                            // blank lines only move within their own file
                            .filter(|idx| !tracked.key.is_empty() || Some(added[*idx].path) == home)
                            .min_by_key(|idx| {
                                let other_file = Some(added[*idx].path) != home;
                                let distance = (added[*idx].line as i64 - tracked.line as i64).abs();
                                (other_file, distance)
                            })
                    });
                    match candidate {
                        Some(idx) => {
                            claimed.insert(idx);
                            Movement::Kept {
                                path: added[idx].path.to_string(),
                                line: added[idx].line,
                            }
                        }
                        None => Movement::Removed,
                    }
                }
            }
        })
        .collect()
}
