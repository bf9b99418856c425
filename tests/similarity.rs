// tests/similarity.rs

mod common;

use anyhow::Result;
use common::{commit_sharing, lines, Fixture};
use git_lineage::config::Config;
use git_lineage::error::FailureKind;
use git_lineage::inputs::ConversationStore;
use git_lineage::model::{CodeSnippet, Side, Turn, UnitKind};
use git_lineage::pipeline::{run_similarity, similarity_rows, RunReport};

fn conversations() -> ConversationStore {
    let mut store = ConversationStore::default();
    store.insert(
        "conv-s1",
        vec![Turn {
            prompt: "How do I make f increment its argument?".into(),
            answer: "Add one before returning.".into(),
            code: vec![CodeSnippet {
                language: Some("python".into()),
                content: "def f(x):\n    x = x + 1\n    return x".into(),
            }],
        }],
    );
    store
}

#[test]
fn changeset_is_scored_against_its_conversation() -> Result<()> {
    let mut fixture = Fixture::new()?;
    fixture.commit(&[("calc.py", Some(lines(&["def f(x):", "    return x"]).as_str()))], "c1")?;
    let c2 = fixture.commit(
        &[("calc.py", Some(lines(&["def f(x):", "    x = x + 1", "    return x"]).as_str()))],
        "c2",
    )?;
    let availability = fixture.availability("octo/calc");
    let sharings = vec![
        commit_sharing("s1", "octo/calc", c2),
        // no transcript stored for this one
        commit_sharing("s2", "octo/calc", c2),
    ];
    let config = Config {
        sync_writes: false,
        ..Config::default()
    };
    let dir = tempfile::tempdir()?;
    let checkpoint = dir.path().join("similarity.jsonl");

    let outcome = run_similarity(&sharings, &availability, &conversations(), &config, &checkpoint)?;
    assert_eq!(outcome.entries.len(), 2);

    let scored = outcome
        .entries
        .iter()
        .find(|e| e.id == "s1")
        .and_then(|e| e.result())
        .ok_or_else(|| anyhow::anyhow!("s1 was not scored"))?;
    let summary = &scored.summary;
    assert_eq!(summary.best_score, 1.0);
    assert_eq!(summary.best_unit.map(|u| u.kind), Some(UnitKind::CodeBlock));
    // a single added line gives a post-image group only
    assert_eq!(summary.groups.len(), 1);
    assert_eq!(summary.groups[0].side, Side::Post);
    assert_eq!(summary.groups[0].matched_lines, vec![2]);

    let missing = outcome.entries.iter().find(|e| e.id == "s2").and_then(|e| e.failure_kind());
    assert_eq!(missing, Some(FailureKind::ConversationUnavailable));

    let rows = similarity_rows(&sharings, &outcome);
    assert_eq!(rows[0].best_score, Some(1.0));
    assert_eq!(rows[1].status, "failed");

    let report = RunReport::for_similarity(sharings.len(), &outcome, 0.9);
    let similarity = report.similarity.as_ref().unwrap();
    assert_eq!(similarity.scored, 1);
    assert_eq!(similarity.at_or_above, 1);
    assert_eq!(report.failures[&FailureKind::ConversationUnavailable], 1);
    Ok(())
}
