// src/segment.rs

use crate::model::*;

/// Splits every hunk into runs of changed lines and emits one group per
/// side of each run, padded with up to `context` unchanged lines.
pub fn segment_changeset(changeset: &Changeset, context: usize) -> Vec<LineGroup> {
    let mut groups = Vec::new();
    let mut hunk_index = 0;
    for file in &changeset.files {
        if file.binary {
            hunk_index += file.hunks.len();
            continue;
        }
        for hunk in &file.hunks {
            for (start, end) in changed_runs(&hunk.lines) {
                for side in [Side::Pre, Side::Post] {
                    if let Some(lines) = side_lines(&hunk.lines, start, end, context, side) {
                        let path = match side {
                            Side::Pre => file.old_path.as_deref().unwrap_or(file.path()),
                            Side::Post => file.path(),
                        };
                        groups.push(LineGroup {
                            index: groups.len(),
                            path: path.to_string(),
                            hunk: hunk_index,
                            side,
                            lines,
                        });
                    }
                }
            }
            hunk_index += 1;
        }
    }
    groups
}

/// Half-open ranges of consecutive non-context lines
fn changed_runs(lines: &[DiffLine]) -> Vec<(usize, usize)> {
    let mut runs = Vec::new();
    let mut start = None;
    for (idx, line) in lines.iter().enumerate() {
        match (line.op, start) {
            (LineOp::Context, Some(s)) => {
                runs.push((s, idx));
                start = None;
            }
            (LineOp::Context, None) => {}
            (_, None) => start = Some(idx),
            (_, Some(_)) => {}
        }
    }
    if let Some(s) = start {
        runs.push((s, lines.len()));
    }
    runs
}

fn side_lines(lines: &[DiffLine], start: usize, end: usize, context: usize, side: Side) -> Option<Vec<GroupLine>> {
    let wanted = match side {
        Side::Pre => LineOp::Remove,
        Side::Post => LineOp::Add,
    };
    let lineno = |line: &DiffLine| match side {
        Side::Pre => line.old_lineno,
        Side::Post => line.new_lineno,
    };

    let changed: Vec<&DiffLine> = lines[start..end].iter().filter(|l| l.op == wanted).collect();
    if changed.is_empty() {
        return None;
    }

    let before_start = start.saturating_sub(context);
    let mut before: Vec<&DiffLine> = lines[before_start..start]
        .iter()
        .rev()
        .take_while(|l| l.op == LineOp::Context)
        .collect();
    before.reverse();
    let after_end = (end + context).min(lines.len());
    let after = lines[end..after_end]
        .iter()
        .take_while(|l| l.op == LineOp::Context);

    let to_group = |line: &DiffLine, changed: bool| {
        lineno(line).map(|lineno| GroupLine {
            lineno,
            text: line.text.clone(),
            changed,
        })
    };
    Some(
        before
            .into_iter()
            .filter_map(|l| to_group(l, false))
            .chain(changed.into_iter().filter_map(|l| to_group(l, true)))
            .chain(after.filter_map(|l| to_group(l, false)))
            .collect(),
    )
}

/// Splits a transcript into prompts, answers and code blocks, in order.
///
/// Code blocks come from the transcript's code listing when it has one,
/// otherwise from fenced blocks inside the answer.
pub fn segment_conversation(turns: &[Turn]) -> Vec<ConversationUnit> {
    let mut units = Vec::new();
    let push = |units: &mut Vec<ConversationUnit>, kind, turn, text: String| {
        if !text.trim().is_empty() {
            units.push(ConversationUnit {
                kind,
                index: units.len(),
                turn,
                text,
            });
        }
    };

    for (turn_idx, turn) in turns.iter().enumerate() {
        push(&mut units, UnitKind::Prompt, turn_idx, turn.prompt.clone());
        push(&mut units, UnitKind::Answer, turn_idx, turn.answer.clone());

        let blocks = if turn.code.is_empty() {
            fenced_blocks(&turn.answer)
        } else {
            turn.code.iter().map(|snippet| snippet.content.clone()).collect()
        };
        for block in blocks {
            push(&mut units, UnitKind::CodeBlock, turn_idx, block);
        }
    }
    units
}

/// Contents of ``` or ~~~ fenced blocks; an unterminated fence runs to the end
pub fn fenced_blocks(text: &str) -> Vec<String> {
    let mut blocks = Vec::new();
    let mut current: Option<(&str, Vec<&str>)> = None;
    for line in text.lines() {
        let trimmed = line.trim_start();
        match current.as_mut() {
            None => {
                if let Some(fence) = fence_of(trimmed) {
                    current = Some((fence, Vec::new()));
                }
            }
            Some((fence, body)) => {
                if trimmed.starts_with(*fence) && trimmed.trim_start_matches(*fence).trim().is_empty() {
                    blocks.push(body.join("\n"));
                    current = None;
                } else {
                    body.push(line);
                }
            }
        }
    }
    if let Some((_, body)) = current {
        blocks.push(body.join("\n"));
    }
    blocks
}

fn fence_of(line: &str) -> Option<&'static str> {
    if line.starts_with("```") {
        Some("```")
    } else if line.starts_with("~~~") {
        Some("~~~")
    } else {
        None
    }
}
