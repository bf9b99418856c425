// src/pipeline.rs

use crate::checkpoint::{run_batch, BatchOutcome, CheckpointEntry, CheckpointStore, Outcome};
use crate::config::Config;
use crate::error::{ExtractionError, Failure, FailureKind, InputError, RunError};
use crate::extract::{extract, ExtractOptions};
use crate::inputs::{Availability, ConversationStore};
use crate::lineage::{self, Limits};
use crate::model::*;
use crate::repo::RepoHandle;
use crate::segment::{segment_changeset, segment_conversation};
use crate::similarity::{score_changeset, ScoreOptions, SimilaritySummary};
use crate::survival::{aggregate, median, roll_up, RepositorySurvival, SurvivalCounts, SurvivalStats};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::io::Write;
use std::path::Path;
use tracing::{debug, info};

/// Repositories opened for one rayon job. `map_init` builds a cache per
/// split of the input, so a worker may open the same clone more than once
/// over a batch, but never once per sharing.
pub struct RepoCache<'a> {
    availability: &'a Availability,
    default_tip: &'a str,
    open: HashMap<String, Result<RepoHandle, Failure>>,
}

impl<'a> RepoCache<'a> {
    pub fn new(availability: &'a Availability, default_tip: &'a str) -> Self {
        RepoCache {
            availability,
            default_tip,
            open: HashMap::new(),
        }
    }

    pub fn get(&mut self, repository: &str) -> Result<&RepoHandle, Failure> {
        let availability = self.availability;
        let default_tip = self.default_tip;
        self.open
            .entry(repository.to_string())
            .or_insert_with(|| {
                let (path, tip) = availability.locate(repository)?;
                let handle = RepoHandle::open(repository, path, tip.unwrap_or(default_tip))?;
                debug!(repository, tip = %handle.tip(), "opened repository");
                Ok(handle)
            })
            .as_ref()
            .map_err(Clone::clone)
    }
}

/// Survival of the lines added by one sharing's changeset
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SurvivalResult {
    pub repository: String,
    pub commit: String,
    pub base: Option<String>,
    pub author_time: i64,
    pub commit_time: i64,
    pub parents: usize,
    pub merged_into_tip: bool,
    pub commits_to_tip: Option<u32>,
    pub stats: SurvivalStats,
    pub lines: Vec<LineVerdict>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimilarityResult {
    pub repository: String,
    pub commit: String,
    pub conversation_id: String,
    pub summary: SimilaritySummary,
}

pub fn survive(cache: &mut RepoCache<'_>, sharing: &Sharing, config: &Config) -> Result<SurvivalResult, Failure> {
    let limits = Limits {
        max_commits: config.max_commits,
        deadline: config.deadline(),
    };
    let repo = cache.get(&sharing.repository)?;
    let changeset = extract(sharing, repo, &extract_options(config))?;

    let commit = repo.find_commit(&changeset.commit)?;
    let meta = repo.commit_meta(&commit);
    let merged_into_tip = commit.id() == repo.tip()
        || repo
            .repository()
            .graph_descendant_of(repo.tip(), commit.id())
            .map_err(ExtractionError::Git)?;

    let resolution = lineage::resolve(repo, &changeset, &limits)?;
    let stats = aggregate(&resolution.verdicts);
    debug!(
        id = %sharing.id,
        survived = stats.counts.survived,
        died = stats.counts.died,
        unknown = stats.counts.unknown,
        "resolved line survival"
    );

    Ok(SurvivalResult {
        repository: sharing.repository.clone(),
        commit: changeset.commit,
        base: changeset.base,
        author_time: meta.author_time,
        commit_time: meta.commit_time,
        parents: meta.parents,
        merged_into_tip,
        commits_to_tip: resolution.commits_to_tip,
        stats,
        lines: resolution.verdicts,
    })
}

pub fn compare(
    cache: &mut RepoCache<'_>,
    sharing: &Sharing,
    conversations: &ConversationStore,
    config: &Config,
) -> Result<SimilarityResult, Failure> {
    let opts = ScoreOptions {
        top_k: config.top_k,
        line_match_cutoff: config.line_match_cutoff,
        deadline: config.deadline(),
        keep_all: config.keep_all_scores,
    };
    let repo = cache.get(&sharing.repository)?;

    let (conversation_id, turns) = sharing
        .conversation_id
        .as_deref()
        .and_then(|id| Some((id, conversations.get(id)?)))
        .ok_or_else(|| {
            Failure::new(
                FailureKind::ConversationUnavailable,
                format!(
                    "conversation {} not in store",
                    sharing.conversation_id.as_deref().unwrap_or("<none>")
                ),
            )
        })?;

    let changeset = extract(sharing, repo, &extract_options(config))?;
    let groups = segment_changeset(&changeset, config.context_lines);
    let units = segment_conversation(turns);
    let summary = score_changeset(&groups, &units, &opts).map_err(|_| {
        Failure::new(
            FailureKind::BudgetExceeded,
            format!("wall-clock budget exceeded while scoring {}", changeset.commit),
        )
    })?;

    Ok(SimilarityResult {
        repository: sharing.repository.clone(),
        commit: changeset.commit,
        conversation_id: conversation_id.to_string(),
        summary,
    })
}

fn extract_options(config: &Config) -> ExtractOptions {
    ExtractOptions {
        context_lines: config.context_lines as u32,
    }
}

/// Fails the run up front when the configured clone root cannot be read
pub fn check_repositories_root(config: &Config) -> Result<(), RunError> {
    match &config.repositories_root {
        Some(root) if std::fs::read_dir(root).is_err() => Err(RunError::RepositoriesRoot { path: root.clone() }),
        _ => Ok(()),
    }
}

pub fn run_survival(
    sharings: &[Sharing],
    availability: &Availability,
    config: &Config,
    checkpoint: &Path,
) -> Result<BatchOutcome<SurvivalResult>, RunError> {
    check_repositories_root(config)?;
    let (store, loaded) = CheckpointStore::open(checkpoint, config.sync_writes)?;
    run_batch(
        sharings,
        &store,
        loaded,
        config.workers,
        || RepoCache::new(availability, &config.tip),
        |cache, sharing| survive(cache, sharing, config),
    )
}

pub fn run_similarity(
    sharings: &[Sharing],
    availability: &Availability,
    conversations: &ConversationStore,
    config: &Config,
    checkpoint: &Path,
) -> Result<BatchOutcome<SimilarityResult>, RunError> {
    check_repositories_root(config)?;
    let (store, loaded) = CheckpointStore::open(checkpoint, config.sync_writes)?;
    run_batch(
        sharings,
        &store,
        loaded,
        config.workers,
        || RepoCache::new(availability, &config.tip),
        |cache, sharing| compare(cache, sharing, conversations, config),
    )
}

/// One output row per sharing, flattened for downstream tables
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SurvivalRow<'a> {
    pub id: &'a str,
    pub repository: &'a str,
    pub status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<FailureKind>,
    #[serde(flatten)]
    pub counts: SurvivalCounts,
    pub commit: Option<&'a str>,
    pub merged_into_tip: Option<bool>,
    pub commits_to_tip: Option<u32>,
    pub min_died_timestamp: Option<i64>,
    pub min_died_at: Option<DateTime<Utc>>,
    pub time_to_death_commits: Vec<u32>,
    pub time_to_death_seconds: Vec<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SimilarityRow<'a> {
    pub id: &'a str,
    pub repository: &'a str,
    pub status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<FailureKind>,
    pub best_score: Option<f64>,
    pub best_unit: Option<UnitRef>,
    pub groups: usize,
    pub group_best: Vec<f64>,
}

fn status<T>(entry: &CheckpointEntry<T>) -> &'static str {
    match entry.outcome {
        Outcome::Completed { .. } => "completed",
        Outcome::Failed { .. } => "failed",
    }
}

/// Entries in input order; sharings missing from the outcome are skipped
fn in_input_order<'a, T: 'a>(
    sharings: &'a [Sharing],
    outcome: &'a BatchOutcome<T>,
) -> impl Iterator<Item = (&'a Sharing, &'a CheckpointEntry<T>)> + 'a {
    let by_id: HashMap<&str, &CheckpointEntry<T>> = outcome.entries.iter().map(|e| (e.id.as_str(), e)).collect();
    let mut seen = std::collections::HashSet::new();
    sharings
        .iter()
        .filter(move |s| seen.insert(s.id.as_str()))
        .filter_map(move |s| Some((s, *by_id.get(s.id.as_str())?)))
}

pub fn survival_rows<'a>(sharings: &'a [Sharing], outcome: &'a BatchOutcome<SurvivalResult>) -> Vec<SurvivalRow<'a>> {
    in_input_order(sharings, outcome)
        .map(|(sharing, entry)| {
            let result = entry.result();
            SurvivalRow {
                id: &sharing.id,
                repository: &sharing.repository,
                status: status(entry),
                failure: entry.failure_kind(),
                counts: result.map(|r| r.stats.counts).unwrap_or_default(),
                commit: result.map(|r| r.commit.as_str()),
                merged_into_tip: result.map(|r| r.merged_into_tip),
                commits_to_tip: result.and_then(|r| r.commits_to_tip),
                min_died_timestamp: result.and_then(|r| r.stats.min_died_timestamp),
                min_died_at: result
                    .and_then(|r| r.stats.min_died_timestamp)
                    .and_then(|ts| DateTime::from_timestamp(ts, 0)),
                time_to_death_commits: result
                    .map(|r| r.stats.deaths.iter().map(|d| d.commits).collect())
                    .unwrap_or_default(),
                time_to_death_seconds: result
                    .map(|r| r.stats.deaths.iter().map(|d| d.seconds).collect())
                    .unwrap_or_default(),
            }
        })
        .collect()
}

pub fn similarity_rows<'a>(
    sharings: &'a [Sharing],
    outcome: &'a BatchOutcome<SimilarityResult>,
) -> Vec<SimilarityRow<'a>> {
    in_input_order(sharings, outcome)
        .map(|(sharing, entry)| {
            let summary = entry.result().map(|r| &r.summary);
            SimilarityRow {
                id: &sharing.id,
                repository: &sharing.repository,
                status: status(entry),
                failure: entry.failure_kind(),
                best_score: summary.map(|s| s.best_score),
                best_unit: summary.and_then(|s| s.best_unit),
                groups: summary.map_or(0, |s| s.groups.len()),
                group_best: summary
                    .map(|s| s.groups.iter().map(|g| g.best().map_or(0.0, |r| r.score)).collect())
                    .unwrap_or_default(),
            }
        })
        .collect()
}

/// Writes rows as JSON Lines, replacing any previous output
pub fn write_rows<R: Serialize>(path: &Path, rows: &[R]) -> Result<(), InputError> {
    let mut out = Vec::new();
    for row in rows {
        serde_json::to_writer(&mut out, row).map_err(|source| InputError::Json {
            path: path.to_path_buf(),
            source,
        })?;
        out.push(b'\n');
    }
    std::fs::File::create(path)
        .and_then(|mut file| file.write_all(&out))
        .map_err(|e| InputError::io(path, e))?;
    info!(path = %path.display(), rows = rows.len(), "wrote summaries");
    Ok(())
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SurvivalReport {
    pub lines: SurvivalCounts,
    pub unknown_by_reason: BTreeMap<UnknownReason, usize>,
    pub repositories: BTreeMap<String, RepositorySurvival>,
    pub median_commits_to_death: Option<i64>,
    pub median_seconds_to_death: Option<i64>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SimilarityReport {
    pub scored: usize,
    pub groups: usize,
    pub threshold: f64,
    /// Line groups whose best score reaches the threshold
    pub at_or_above: usize,
}

/// What a finished run tells the operator
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunReport {
    pub input: usize,
    pub rejected_rows: usize,
    pub processed: usize,
    pub resumed: usize,
    pub corrupt_entries: usize,
    pub failures: BTreeMap<FailureKind, usize>,
    pub survival: Option<SurvivalReport>,
    pub similarity: Option<SimilarityReport>,
}

impl RunReport {
    fn from_outcome<T>(input: usize, outcome: &BatchOutcome<T>) -> Self {
        let mut failures = BTreeMap::new();
        for kind in outcome.entries.iter().filter_map(|e| e.failure_kind()) {
            *failures.entry(kind).or_insert(0) += 1;
        }
        RunReport {
            input,
            processed: outcome.processed,
            resumed: outcome.resumed,
            corrupt_entries: outcome.corrupt,
            failures,
            ..RunReport::default()
        }
    }

    pub fn for_survival(input: usize, outcome: &BatchOutcome<SurvivalResult>) -> Self {
        let results: Vec<&SurvivalResult> = outcome.entries.iter().filter_map(|e| e.result()).collect();
        let mut lines = SurvivalCounts::default();
        let mut unknown_by_reason = BTreeMap::new();
        for result in &results {
            lines += result.stats.counts;
            for (reason, n) in &result.stats.unknown_by_reason {
                *unknown_by_reason.entry(*reason).or_insert(0) += n;
            }
        }
        let repositories = roll_up(results.iter().map(|r| (r.repository.as_str(), &r.stats)));
        let mut commits: Vec<i64> = results
            .iter()
            .flat_map(|r| r.stats.deaths.iter().map(|d| d.commits as i64))
            .collect();
        let mut seconds: Vec<i64> = results
            .iter()
            .flat_map(|r| r.stats.deaths.iter().map(|d| d.seconds))
            .collect();

        RunReport {
            survival: Some(SurvivalReport {
                lines,
                unknown_by_reason,
                repositories,
                median_commits_to_death: median(&mut commits),
                median_seconds_to_death: median(&mut seconds),
            }),
            ..Self::from_outcome(input, outcome)
        }
    }

    pub fn for_similarity(input: usize, outcome: &BatchOutcome<SimilarityResult>, threshold: f64) -> Self {
        let summaries: Vec<&SimilaritySummary> = outcome.entries.iter().filter_map(|e| e.result()).map(|r| &r.summary).collect();
        let groups = summaries.iter().map(|s| s.groups.len()).sum();
        let at_or_above = summaries
            .iter()
            .flat_map(|s| &s.groups)
            .filter(|g| g.best().is_some_and(|r| r.score >= threshold))
            .count();
        RunReport {
            similarity: Some(SimilarityReport {
                scored: summaries.len(),
                groups,
                threshold,
                at_or_above,
            }),
            ..Self::from_outcome(input, outcome)
        }
    }

    pub fn with_rejected_rows(mut self, rejected: usize) -> Self {
        self.rejected_rows = rejected;
        self
    }
}

impl fmt::Display for RunReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "Sharings: {} in input, {} processed now, {} resumed from checkpoint.",
            self.input, self.processed, self.resumed
        )?;
        if self.rejected_rows > 0 {
            writeln!(f, "Rejected input rows: {}", self.rejected_rows)?;
        }
        if self.corrupt_entries > 0 {
            writeln!(f, "Corrupt checkpoint entries (reprocessed): {}", self.corrupt_entries)?;
        }
        if let Some(survival) = &self.survival {
            writeln!(
                f,
                "Lines: {} survived, {} died, {} unknown.",
                survival.lines.survived, survival.lines.died, survival.lines.unknown
            )?;
            for (reason, count) in &survival.unknown_by_reason {
                writeln!(f, "  unknown, {reason}: {count}")?;
            }
            if let (Some(commits), Some(seconds)) = (survival.median_commits_to_death, survival.median_seconds_to_death) {
                writeln!(f, "Median time to death: {} commits, {:.1} days.", commits, seconds as f64 / 86_400.0)?;
            }
            for (repository, repo) in &survival.repositories {
                writeln!(
                    f,
                    "  {repository}: {} changesets, {} survived, {} died, {} unknown",
                    repo.changesets, repo.counts.survived, repo.counts.died, repo.counts.unknown
                )?;
            }
        }
        if let Some(similarity) = &self.similarity {
            writeln!(
                f,
                "Scored: {} changesets, {} line groups, {} at or above {:.2}.",
                similarity.scored, similarity.groups, similarity.at_or_above, similarity.threshold
            )?;
        }
        if self.failures.is_empty() {
            write!(f, "No failures.")
        } else {
            write!(f, "Failures:")?;
            for (kind, count) in &self.failures {
                write!(f, "\n  {kind}: {count}")?;
            }
            Ok(())
        }
    }
}
