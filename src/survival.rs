// src/survival.rs

use crate::model::{LineVerdict, UnknownReason, Verdict};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::ops::AddAssign;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SurvivalCounts {
    pub survived: usize,
    pub died: usize,
    pub unknown: usize,
}

impl SurvivalCounts {
    pub fn total(&self) -> usize {
        self.survived + self.died + self.unknown
    }
}

impl AddAssign for SurvivalCounts {
    fn add_assign(&mut self, other: Self) {
        self.survived += other.survived;
        self.died += other.died;
        self.unknown += other.unknown;
    }
}

/// Elapsed commits and wall-clock seconds between introduction and removal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeToDeath {
    pub commits: u32,
    pub seconds: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SurvivalStats {
    pub counts: SurvivalCounts,
    /// One sample per died line, in verdict order
    pub deaths: Vec<TimeToDeath>,
    /// Timestamp of the earliest killing commit
    pub min_died_timestamp: Option<i64>,
    /// Breakdown of `counts.unknown`
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub unknown_by_reason: BTreeMap<UnknownReason, usize>,
}

/// Reduces per-line verdicts to per-changeset statistics
pub fn aggregate(verdicts: &[LineVerdict]) -> SurvivalStats {
    let mut stats = SurvivalStats::default();
    for line in verdicts {
        match &line.verdict {
            Verdict::Survived { .. } => stats.counts.survived += 1,
            Verdict::Died {
                killed_at,
                commits,
                seconds,
                ..
            } => {
                stats.counts.died += 1;
                stats.deaths.push(TimeToDeath {
                    commits: *commits,
                    seconds: *seconds,
                });
                stats.min_died_timestamp = Some(match stats.min_died_timestamp {
                    Some(min) => min.min(*killed_at),
                    None => *killed_at,
                });
            }
            Verdict::Unknown { reason } => {
                stats.counts.unknown += 1;
                *stats.unknown_by_reason.entry(*reason).or_default() += 1;
            }
        }
    }
    stats
}

/// Per-repository roll-up of changeset statistics
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RepositorySurvival {
    pub changesets: usize,
    pub counts: SurvivalCounts,
    pub unknown_by_reason: BTreeMap<UnknownReason, usize>,
    pub deaths: Vec<TimeToDeath>,
}

pub fn roll_up<'a>(
    per_changeset: impl IntoIterator<Item = (&'a str, &'a SurvivalStats)>,
) -> BTreeMap<String, RepositorySurvival> {
    let mut repos: BTreeMap<String, RepositorySurvival> = BTreeMap::new();
    for (repository, stats) in per_changeset {
        let entry = repos.entry(repository.to_string()).or_default();
        entry.changesets += 1;
        entry.counts += stats.counts;
        for (reason, n) in &stats.unknown_by_reason {
            *entry.unknown_by_reason.entry(*reason).or_default() += n;
        }
        entry.deaths.extend_from_slice(&stats.deaths);
    }
    repos
}

/// Median of a sample, for reports
pub fn median(values: &mut [i64]) -> Option<i64> {
    if values.is_empty() {
        return None;
    }
    values.sort_unstable();
    let mid = values.len() / 2;
    Some(if values.len() % 2 == 0 {
        (values[mid - 1] + values[mid]) / 2
    } else {
        values[mid]
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::LineIdentity;

    fn verdict(verdict: Verdict) -> LineVerdict {
        LineVerdict {
            identity: LineIdentity {
                path: "a.py".into(),
                line: 1,
                content: "x".into(),
                commit: "c1".into(),
            },
            verdict,
        }
    }

    #[test]
    fn no_lines_means_all_zero() {
        let stats = aggregate(&[]);
        assert_eq!(stats.counts, SurvivalCounts::default());
        assert!(stats.deaths.is_empty());
        assert!(stats.min_died_timestamp.is_none());
        assert!(stats.unknown_by_reason.is_empty());
    }

    #[test]
    fn counts_each_verdict_and_samples_deaths() {
        let verdicts = vec![
            verdict(Verdict::Survived {
                path: "a.py".into(),
                line: 1,
            }),
            verdict(Verdict::Died {
                killed_by: "c5".into(),
                killed_at: 500,
                commits: 4,
                seconds: 400,
            }),
            verdict(Verdict::Died {
                killed_by: "c3".into(),
                killed_at: 300,
                commits: 2,
                seconds: 200,
            }),
            verdict(Verdict::Unknown {
                reason: UnknownReason::RenameTrackingUnavailable,
            }),
            verdict(Verdict::Unknown {
                reason: UnknownReason::HistoryTraversalExhausted,
            }),
            verdict(Verdict::Unknown {
                reason: UnknownReason::RenameTrackingUnavailable,
            }),
        ];
        let stats = aggregate(&verdicts);
        assert_eq!(
            stats.counts,
            SurvivalCounts {
                survived: 1,
                died: 2,
                unknown: 3
            }
        );
        assert_eq!(stats.unknown_by_reason[&UnknownReason::RenameTrackingUnavailable], 2);
        assert_eq!(stats.unknown_by_reason[&UnknownReason::HistoryTraversalExhausted], 1);
        assert_eq!(stats.deaths[0], TimeToDeath { commits: 4, seconds: 400 });
        assert_eq!(stats.min_died_timestamp, Some(300));
        assert_eq!(stats, aggregate(&verdicts));
    }

    #[test]
    fn roll_up_groups_by_repository() {
        let a = SurvivalStats {
            counts: SurvivalCounts {
                survived: 2,
                died: 1,
                unknown: 1,
            },
            deaths: vec![TimeToDeath { commits: 1, seconds: 10 }],
            min_died_timestamp: Some(10),
            unknown_by_reason: BTreeMap::from([(UnknownReason::HistoryTraversalExhausted, 1)]),
        };
        let b = SurvivalStats::default();
        let repos = roll_up([("octo/cat", &a), ("octo/cat", &b), ("octo/dog", &b)]);
        assert_eq!(repos["octo/cat"].changesets, 2);
        assert_eq!(repos["octo/cat"].counts.total(), 4);
        assert_eq!(repos["octo/cat"].unknown_by_reason[&UnknownReason::HistoryTraversalExhausted], 1);
        assert_eq!(repos["octo/dog"].counts.total(), 0);
    }

    #[test]
    fn median_of_even_and_odd_samples() {
        assert_eq!(median(&mut []), None);
        assert_eq!(median(&mut [5, 1, 3]), Some(3));
        assert_eq!(median(&mut [4, 1, 3, 2]), Some(2));
    }
}
