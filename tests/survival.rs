// tests/survival.rs

mod common;

use anyhow::Result;
use common::{commit_sharing, lines, Fixture};
use git_lineage::checkpoint::CheckpointEntry;
use git_lineage::config::Config;
use git_lineage::error::FailureKind;
use git_lineage::extract::{extract_ref, ExtractOptions};
use git_lineage::inputs::{Availability, AvailabilityRow};
use git_lineage::lineage::{resolve, Limits};
use git_lineage::model::{ChangeRef, UnknownReason, Verdict};
use git_lineage::pipeline::{run_survival, survive, RepoCache, SurvivalResult};
use git_lineage::repo::RepoHandle;
use std::collections::{HashMap, HashSet};
use std::path::Path;

fn verdict_of<'a>(verdicts: &'a [git_lineage::model::LineVerdict], content: &str) -> &'a Verdict {
    &verdicts
        .iter()
        .find(|v| v.identity.content == content)
        .unwrap_or_else(|| panic!("no verdict for {content:?}"))
        .verdict
}

fn config() -> Config {
    Config {
        workers: Some(2),
        sync_writes: false,
        ..Config::default()
    }
}

/// calc.py gains `x = x + 1` in C1; C2..C4 touch another file; C5 removes it
fn linear_history() -> Result<(Fixture, Vec<git2::Oid>)> {
    let mut fixture = Fixture::new()?;
    let mut commits = Vec::new();
    commits.push(fixture.commit(
        &[("calc.py", Some(lines(&["def f(x):", "    x = x + 1", "    return x"]).as_str()))],
        "C1",
    )?);
    commits.push(fixture.commit(&[("notes.txt", Some("a\n"))], "C2")?);
    commits.push(fixture.commit(&[("notes.txt", Some("a\nb\n"))], "C3")?);
    commits.push(fixture.commit(&[("notes.txt", Some("a\nb\nc\n"))], "C4")?);
    commits.push(fixture.commit(
        &[("calc.py", Some(lines(&["def f(x):", "    return x"]).as_str()))],
        "C5",
    )?);
    Ok((fixture, commits))
}

#[test]
fn line_removed_four_commits_later_died() -> Result<()> {
    let (fixture, commits) = linear_history()?;
    let repo = RepoHandle::open("octo/calc", fixture.path(), "HEAD")?;
    let changeset = extract_ref(
        &ChangeRef::Commit {
            sha: commits[0].to_string(),
        },
        &repo,
        &ExtractOptions::default(),
    )?;
    let resolution = resolve(&repo, &changeset, &Limits::default())?;
    assert_eq!(resolution.commits_to_tip, Some(4));

    match verdict_of(&resolution.verdicts, "    x = x + 1") {
        Verdict::Died {
            killed_by,
            commits: n,
            seconds,
            ..
        } => {
            assert_eq!(killed_by, &commits[4].to_string());
            assert_eq!(*n, 4);
            assert_eq!(*seconds, 400);
        }
        other => panic!("expected died, got {other:?}"),
    }
    assert_eq!(
        verdict_of(&resolution.verdicts, "    return x"),
        &Verdict::Survived {
            path: "calc.py".into(),
            line: 2
        }
    );

    // replaying on the same repository state gives the same verdicts
    let again = resolve(&repo, &changeset, &Limits::default())?;
    assert_eq!(again, resolution);
    Ok(())
}

#[test]
fn line_introduced_at_tip_survives() -> Result<()> {
    let mut fixture = Fixture::new()?;
    fixture.commit(&[("a.txt", Some("1\n"))], "one")?;
    let tip = fixture.commit(&[("a.txt", Some("1\n2\n3\n"))], "tip")?;
    let availability = fixture.availability("octo/tip");
    let config = config();
    let mut cache = RepoCache::new(&availability, "HEAD");

    let result = survive(&mut cache, &commit_sharing("s1", "octo/tip", tip), &config)
        .map_err(|f| anyhow::anyhow!(f.message))?;
    assert_eq!(result.commits_to_tip, Some(0));
    assert!(result.merged_into_tip);
    assert_eq!(result.stats.counts.survived, 2);
    assert_eq!(result.stats.counts.total(), 2);
    Ok(())
}

#[test]
fn renamed_file_is_followed() -> Result<()> {
    let mut fixture = Fixture::new()?;
    let content = lines(&["alpha = 1", "beta = 2", "gamma = 3"]);
    let intro = fixture.commit(&[("a.py", Some(content.as_str()))], "add")?;
    fixture.commit(&[("a.py", None), ("b.py", Some(content.as_str()))], "rename")?;
    fixture.commit(
        &[("b.py", Some(lines(&["import os", "alpha = 1", "beta = 2", "gamma = 3"]).as_str()))],
        "prepend",
    )?;
    let availability = fixture.availability("octo/rename");
    let mut cache = RepoCache::new(&availability, "HEAD");

    let result = survive(&mut cache, &commit_sharing("s1", "octo/rename", intro), &config())
        .map_err(|f| anyhow::anyhow!(f.message))?;
    assert_eq!(result.stats.counts.survived, 3);
    assert_eq!(
        verdict_of(&result.lines, "beta = 2"),
        &Verdict::Survived {
            path: "b.py".into(),
            line: 3
        }
    );
    Ok(())
}

#[test]
fn unmerged_side_branch_is_unknown() -> Result<()> {
    let mut fixture = Fixture::new()?;
    let base = fixture.commit(&[("calc.py", Some(lines(&["a = 1", "b = 2"]).as_str()))], "base")?;
    let side_files = fixture.files_with(&[("calc.py", Some(lines(&["a = 1", "side = 1", "b = 2"]).as_str()))]);
    let side = fixture.snapshot(&side_files, &[base], "side", None)?;
    fixture.commit(&[("notes.txt", Some("main\n"))], "main moves on")?;
    let availability = fixture.availability("octo/side");
    let mut cache = RepoCache::new(&availability, "HEAD");

    let result = survive(&mut cache, &commit_sharing("s1", "octo/side", side), &config())
        .map_err(|f| anyhow::anyhow!(f.message))?;
    assert!(!result.merged_into_tip);
    assert_eq!(result.commits_to_tip, None);
    assert_eq!(result.stats.counts.unknown, 1);
    assert_eq!(result.stats.counts.total(), 1);
    assert_eq!(
        verdict_of(&result.lines, "side = 1"),
        &Verdict::Unknown {
            reason: UnknownReason::HistoryTraversalExhausted
        }
    );
    assert_eq!(result.stats.unknown_by_reason[&UnknownReason::HistoryTraversalExhausted], 1);
    Ok(())
}

#[test]
fn merged_side_branch_is_followed_through_the_merge() -> Result<()> {
    let mut fixture = Fixture::new()?;
    let base = fixture.commit(&[("calc.py", Some(lines(&["a = 1", "b = 2"]).as_str()))], "base")?;
    let side_content = lines(&["a = 1", "side = 1", "side = 2", "b = 2"]);
    let side_files = fixture.files_with(&[("calc.py", Some(side_content.as_str()))]);
    let side = fixture.snapshot(&side_files, &[base], "side", None)?;
    fixture.commit(&[("notes.txt", Some("main\n"))], "main moves on")?;
    let merged = fixture.files_with(&[("calc.py", Some(side_content.as_str()))]);
    fixture.merge(side, merged, "merge side")?;
    fixture.commit(&[("notes.txt", Some("main\nmore\n"))], "after merge")?;
    let killer = fixture.commit(
        &[("calc.py", Some(lines(&["a = 1", "side = 2", "b = 2"]).as_str()))],
        "drop side = 1",
    )?;
    let availability = fixture.availability("octo/side");
    let mut cache = RepoCache::new(&availability, "HEAD");

    let result = survive(&mut cache, &commit_sharing("s1", "octo/side", side), &config())
        .map_err(|f| anyhow::anyhow!(f.message))?;
    assert!(result.merged_into_tip);
    // side -> merge -> after merge -> killer
    assert_eq!(result.commits_to_tip, Some(3));
    match verdict_of(&result.lines, "side = 1") {
        Verdict::Died {
            killed_by, commits, ..
        } => {
            assert_eq!(killed_by, &killer.to_string());
            assert_eq!(*commits, 3);
        }
        other => panic!("expected died, got {other:?}"),
    }
    assert_eq!(
        verdict_of(&result.lines, "side = 2"),
        &Verdict::Survived {
            path: "calc.py".into(),
            line: 2
        }
    );
    assert_eq!(result.stats.counts.unknown, 0);
    Ok(())
}

#[test]
fn unavailable_repository_yields_one_failure_entry_per_sharing() -> Result<()> {
    let availability = Availability::from_rows(
        vec![AvailabilityRow {
            repository: Some("octo/gone".into()),
            status: Some("failed".into()),
            reason: Some("repository not found".into()),
            ..Default::default()
        }],
        None,
    );
    let sharings = vec![
        commit_sharing("s1", "octo/gone", git2::Oid::zero()),
        commit_sharing("s2", "octo/gone", git2::Oid::zero()),
    ];
    let dir = tempfile::tempdir()?;
    let checkpoint = dir.path().join("survival.jsonl");

    let outcome = run_survival(&sharings, &availability, &config(), &checkpoint)?;
    assert_eq!(outcome.entries.len(), 2);
    assert!(outcome
        .entries
        .iter()
        .all(|e| e.failure_kind() == Some(FailureKind::RepositoryUnavailable)));
    assert!(outcome.entries.iter().all(|e| e.result().is_none()));
    assert_eq!(read_checkpoint(&checkpoint)?.len(), 2);
    Ok(())
}

fn read_checkpoint(path: &Path) -> Result<Vec<CheckpointEntry<SurvivalResult>>> {
    std::fs::read_to_string(path)?
        .lines()
        .map(|line| serde_json::from_str(line).map_err(anyhow::Error::from))
        .collect()
}

#[test]
fn interrupted_run_resumes_to_the_same_entries() -> Result<()> {
    let (fixture, commits) = linear_history()?;
    let availability = fixture.availability("octo/calc");
    let sharings: Vec<_> = commits
        .iter()
        .enumerate()
        .map(|(i, oid)| commit_sharing(&format!("s{i}"), "octo/calc", *oid))
        .collect();
    let dir = tempfile::tempdir()?;

    let uninterrupted = dir.path().join("full.jsonl");
    run_survival(&sharings, &availability, &config(), &uninterrupted)?;

    // a run that stopped after two sharings, then resumed over the full input
    let resumed = dir.path().join("resumed.jsonl");
    run_survival(&sharings[..2], &availability, &config(), &resumed)?;
    let outcome = run_survival(&sharings, &availability, &config(), &resumed)?;
    assert_eq!(outcome.resumed, 2);
    assert_eq!(outcome.processed, sharings.len() - 2);

    let entries = read_checkpoint(&resumed)?;
    assert_eq!(entries.len(), sharings.len());
    let ids: HashSet<_> = entries.iter().map(|e| e.id.clone()).collect();
    assert_eq!(ids.len(), sharings.len());

    let expected: HashMap<_, _> = read_checkpoint(&uninterrupted)?
        .into_iter()
        .map(|e| (e.id.clone(), e))
        .collect();
    for entry in &entries {
        assert_eq!(Some(entry), expected.get(&entry.id));
    }

    // nothing left to do on a third run
    let outcome = run_survival(&sharings, &availability, &config(), &resumed)?;
    assert_eq!(outcome.processed, 0);
    assert_eq!(read_checkpoint(&resumed)?.len(), sharings.len());
    Ok(())
}
