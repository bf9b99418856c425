// src/similarity.rs

//! Token-level similarity between changeset line groups and conversation
//! units.
//!
//! Text is normalized by dropping whole-line comments and whitespace, then
//! split into identifier/number tokens and single punctuation tokens. The
//! score of a group against a unit is the share of the group's tokens that
//! appear, in order, in the unit: the longest common subsequence divided by
//! the group's token count. Adding content to a unit can only keep or raise
//! the score, and a unit containing the group verbatim scores 1.0.

use crate::model::*;
use serde::{Deserialize, Serialize};
use similar::{capture_diff_slices, Algorithm, DiffOp, TextDiff};
use std::collections::HashMap;
use std::time::Instant;

#[derive(Debug, Clone, Copy)]
pub struct ScoreOptions {
    pub top_k: usize,
    pub line_match_cutoff: f64,
    pub deadline: Option<Instant>,
    /// Score every pair and keep all records, with pruning turned off
    pub keep_all: bool,
}

impl Default for ScoreOptions {
    fn default() -> Self {
        ScoreOptions {
            top_k: 3,
            line_match_cutoff: 0.75,
            deadline: None,
            keep_all: false,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct KindScores {
    pub prompt: Option<f64>,
    pub answer: Option<f64>,
    pub code_block: Option<f64>,
}

impl KindScores {
    fn slot(&mut self, kind: UnitKind) -> &mut Option<f64> {
        match kind {
            UnitKind::Prompt => &mut self.prompt,
            UnitKind::Answer => &mut self.answer,
            UnitKind::CodeBlock => &mut self.code_block,
        }
    }

    pub fn get(&self, kind: UnitKind) -> Option<f64> {
        match kind {
            UnitKind::Prompt => self.prompt,
            UnitKind::Answer => self.answer,
            UnitKind::CodeBlock => self.code_block,
        }
    }
}

/// Best matches of one line group
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupScore {
    pub group: usize,
    pub path: String,
    pub hunk: usize,
    pub side: Side,
    /// Highest-scoring records, best first
    pub top: Vec<SimilarityRecord>,
    pub best_per_kind: KindScores,
    /// Changed lines that closely match a line of the winning unit
    pub matched_lines: Vec<u32>,
}

impl GroupScore {
    pub fn best(&self) -> Option<&SimilarityRecord> {
        self.top.first()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimilaritySummary {
    pub best_score: f64,
    pub best_unit: Option<UnitRef>,
    pub groups: Vec<GroupScore>,
    pub units: usize,
    /// Exact scores computed
    pub scored: usize,
    /// Pairs skipped because their upper bound could not change the result
    pub skipped: usize,
    /// Every computed record, group-major, when `keep_all` was requested
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub records: Vec<SimilarityRecord>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeadlineExceeded;

/// Whole-line comments are dropped before tokenizing
fn is_comment(line: &str) -> bool {
    let t = line.trim_start();
    t.starts_with("//")
        || t.starts_with("/*")
        || t.starts_with("*/")
        || t == "*"
        || t.starts_with("* ")
        || t == "#"
        || t.starts_with("# ")
        || t.starts_with("<!--")
}

/// Normalized tokens of a text
pub fn tokens(text: &str) -> Vec<&str> {
    let mut out = Vec::new();
    for line in text.lines().filter(|line| !is_comment(line)) {
        let mut word_start: Option<usize> = None;
        for (idx, ch) in line.char_indices() {
            let is_word = ch.is_alphanumeric() || ch == '_';
            match (is_word, word_start) {
                (true, None) => word_start = Some(idx),
                (true, Some(_)) => {}
                (false, start) => {
                    if let Some(start) = start {
                        out.push(&line[start..idx]);
                        word_start = None;
                    }
                    if !ch.is_whitespace() {
                        out.push(&line[idx..idx + ch.len_utf8()]);
                    }
                }
            }
        }
        if let Some(start) = word_start {
            out.push(&line[start..]);
        }
    }
    out
}

/// Longest common subsequence length of two token sequences
fn lcs_len(a: &[&str], b: &[&str]) -> usize {
    capture_diff_slices(Algorithm::Myers, a, b)
        .iter()
        .map(|op| match op {
            DiffOp::Equal { len, .. } => *len,
            _ => 0,
        })
        .sum()
}

fn counts<'a>(tokens: &[&'a str]) -> HashMap<&'a str, usize> {
    let mut map = HashMap::new();
    for token in tokens {
        *map.entry(*token).or_insert(0) += 1;
    }
    map
}

/// Multiset overlap, an upper bound on the LCS
fn overlap(a: &HashMap<&str, usize>, b: &HashMap<&str, usize>) -> usize {
    a.iter()
        .map(|(token, n)| (*n).min(b.get(token).copied().unwrap_or(0)))
        .sum()
}

fn ratio(matched: usize, total: usize) -> f64 {
    if total == 0 {
        0.0
    } else {
        matched as f64 / total as f64
    }
}

/// Score of a text against a unit text in `[0, 1]`; an empty group scores 0
pub fn score_text(group: &str, unit: &str) -> f64 {
    let a = tokens(group);
    let b = tokens(unit);
    ratio(lcs_len(&a, &b), a.len())
}

pub fn score(group: &LineGroup, unit: &ConversationUnit) -> f64 {
    score_text(&group.text(), &unit.text)
}

/// Character-level close-match ratio, as used for per-line matching
fn line_ratio(a: &str, b: &str) -> f64 {
    if a == b {
        return 1.0;
    }
    TextDiff::from_chars(a, b).ratio() as f64
}

fn matched_lines(group: &LineGroup, unit: &ConversationUnit, cutoff: f64) -> Vec<u32> {
    let unit_lines: Vec<&str> = unit
        .text
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .collect();
    group
        .lines
        .iter()
        .filter(|line| line.changed)
        .filter(|line| {
            let text = line.text.trim();
            !text.is_empty()
                && unit_lines
                    .iter()
                    .any(|candidate| line_ratio(text, candidate) >= cutoff)
        })
        .map(|line| line.lineno)
        .collect()
}

struct Prepared<'a> {
    tokens: Vec<&'a str>,
    counts: HashMap<&'a str, usize>,
}

impl<'a> Prepared<'a> {
    fn new(text: &'a str) -> Self {
        let tokens = tokens(text);
        let counts = counts(&tokens);
        Prepared { tokens, counts }
    }
}

/// Scores every group against every unit and keeps the best per group
pub fn score_changeset(
    groups: &[LineGroup],
    units: &[ConversationUnit],
    opts: &ScoreOptions,
) -> Result<SimilaritySummary, DeadlineExceeded> {
    let top_k = opts.top_k.max(1);
    let prepared_units: Vec<Prepared<'_>> = units.iter().map(|u| Prepared::new(&u.text)).collect();

    let mut summary = SimilaritySummary {
        best_score: 0.0,
        best_unit: None,
        groups: Vec::with_capacity(groups.len()),
        units: units.len(),
        scored: 0,
        skipped: 0,
        records: Vec::new(),
    };

    for group in groups {
        if opts.deadline.is_some_and(|deadline| Instant::now() >= deadline) {
            return Err(DeadlineExceeded);
        }
        let text = group.text();
        let prepared = Prepared::new(&text);
        let mut top: Vec<SimilarityRecord> = Vec::new();
        let mut best_per_kind = KindScores::default();

        for (unit, unit_prepared) in units.iter().zip(&prepared_units) {
            let bound = ratio(overlap(&prepared.counts, &unit_prepared.counts), prepared.tokens.len());
            let kth = if top.len() >= top_k {
                top.last().map(|r| r.score)
            } else {
                None
            };
            let kind_best = best_per_kind.get(unit.kind);
            let cannot_enter_top = kth.is_some_and(|kth| bound <= kth);
            let cannot_beat_kind = kind_best.is_some_and(|best| bound <= best);
            if !opts.keep_all && cannot_enter_top && cannot_beat_kind {
                summary.skipped += 1;
                continue;
            }

            let score = ratio(lcs_len(&prepared.tokens, &unit_prepared.tokens), prepared.tokens.len());
            summary.scored += 1;

            let slot = best_per_kind.slot(unit.kind);
            if slot.map_or(true, |best| score > best) {
                *slot = Some(score);
            }
            let record = SimilarityRecord {
                group: group.index,
                unit: UnitRef::from(unit),
                score,
            };
            if opts.keep_all {
                summary.records.push(record);
            }
            insert_top(&mut top, record, top_k);
        }

        let matched = match top.first() {
            Some(best) if best.score > 0.0 => units
                .iter()
                .find(|u| u.index == best.unit.index)
                .map(|unit| matched_lines(group, unit, opts.line_match_cutoff))
                .unwrap_or_default(),
            _ => Vec::new(),
        };
        if let Some(best) = top.first() {
            if best.score > summary.best_score || summary.best_unit.is_none() {
                summary.best_score = best.score;
                summary.best_unit = Some(best.unit);
            }
        }

        summary.groups.push(GroupScore {
            group: group.index,
            path: group.path.clone(),
            hunk: group.hunk,
            side: group.side,
            top,
            best_per_kind,
            matched_lines: matched,
        });
    }
    Ok(summary)
}

/// Keeps `top` sorted by descending score; ties keep the earlier unit
fn insert_top(top: &mut Vec<SimilarityRecord>, record: SimilarityRecord, k: usize) {
    let pos = top
        .iter()
        .position(|r| record.score > r.score)
        .unwrap_or(top.len());
    if pos < k {
        top.insert(pos, record);
        top.truncate(k);
    }
}
