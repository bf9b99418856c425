// src/repo.rs

use crate::error::ExtractionError;
use crate::lineage::{ForwardPath, History, StepCommit};
use crate::model::*;
use git2::{Commit, Diff, DiffFindOptions, DiffOptions, Oid, Patch, Repository, Tree};
use std::path::Path;

/// Read-only handle on a cloned repository, pinned to a designated tip
pub struct RepoHandle {
    repo: Repository,
    name: String,
    tip: Oid,
}

/// Commit metadata reported alongside survival results
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitMeta {
    pub id: String,
    pub author_time: i64,
    pub commit_time: i64,
    pub parents: usize,
}

impl RepoHandle {
    pub fn open(name: &str, path: &Path, tip_ref: &str) -> Result<Self, ExtractionError> {
        let unavailable = |reason: String| ExtractionError::RepositoryUnavailable {
            repository: name.to_string(),
            reason,
        };
        let repo = Repository::open(path)
            .map_err(|e| unavailable(format!("cannot open {}: {}", path.display(), e.message())))?;
        let tip = repo
            .revparse_single(tip_ref)
            .and_then(|obj| obj.peel_to_commit())
            .map_err(|e| unavailable(format!("tip {tip_ref} does not resolve: {}", e.message())))?
            .id();
        Ok(RepoHandle {
            repo,
            name: name.to_string(),
            tip,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn tip(&self) -> Oid {
        self.tip
    }

    pub fn repository(&self) -> &Repository {
        &self.repo
    }

    /// Looks up a commit by (possibly abbreviated) id
    pub fn find_commit(&self, reference: &str) -> Result<Commit<'_>, ExtractionError> {
        let not_found = || ExtractionError::ReferenceNotFound {
            reference: reference.to_string(),
        };
        let object = self.repo.revparse_single(reference).map_err(|e| match e.code() {
            git2::ErrorCode::NotFound | git2::ErrorCode::Ambiguous | git2::ErrorCode::InvalidSpec => {
                not_found()
            }
            _ => ExtractionError::Git(e),
        })?;
        object.peel_to_commit().map_err(|_| not_found())
    }

    pub fn commit_meta(&self, commit: &Commit<'_>) -> CommitMeta {
        CommitMeta {
            id: commit.id().to_string(),
            author_time: commit.author().when().seconds(),
            commit_time: commit.time().seconds(),
            parents: commit.parent_count(),
        }
    }

    /// Diff between two commits' trees; a missing `old` side means the empty tree
    pub fn diff_commits(
        &self,
        old: Option<&Commit<'_>>,
        new: &Commit<'_>,
        context_lines: u32,
        find_copies: bool,
    ) -> Result<Vec<FileDiff>, git2::Error> {
        let old_tree = old.map(|c| c.tree()).transpose()?;
        let new_tree = new.tree()?;
        self.diff_trees(old_tree.as_ref(), &new_tree, context_lines, find_copies)
    }

    fn diff_trees(
        &self,
        old_tree: Option<&Tree<'_>>,
        new_tree: &Tree<'_>,
        context_lines: u32,
        find_copies: bool,
    ) -> Result<Vec<FileDiff>, git2::Error> {
        let mut diff_opts = DiffOptions::new();
        diff_opts.include_untracked(false);
        diff_opts.ignore_filemode(true);
        diff_opts.context_lines(context_lines);

        let mut diff = self
            .repo
            .diff_tree_to_tree(old_tree, Some(new_tree), Some(&mut diff_opts))?;

        let mut find_opts = DiffFindOptions::new();
        find_opts.renames(true);
        if find_copies {
            find_opts.copies(true);
            find_opts.copies_from_unmodified(true);
        }
        diff.find_similar(Some(&mut find_opts))?;

        collect_file_diffs(&diff)
    }

    /// Lines of `path` as of `commit`, or `None` if absent or binary
    pub fn file_lines_at(&self, commit: Oid, path: &str) -> Result<Option<Vec<String>>, git2::Error> {
        let tree = self.repo.find_commit(commit)?.tree()?;
        let entry = match tree.get_path(Path::new(path)) {
            Ok(entry) => entry,
            Err(e) if e.code() == git2::ErrorCode::NotFound => return Ok(None),
            Err(e) => return Err(e),
        };
        let blob = match entry.to_object(&self.repo)?.into_blob() {
            Ok(blob) => blob,
            Err(_) => return Ok(None),
        };
        if blob.is_binary() {
            return Ok(None);
        }
        Ok(Some(
            String::from_utf8_lossy(blob.content())
                .lines()
                .map(String::from)
                .collect(),
        ))
    }
}

impl History for RepoHandle {
    /// Walks from the tip towards `from`, preferring first parents but only
    /// stepping onto parents that still lead back to `from`.
    fn forward_path(&self, from: &str, limit: usize) -> Result<ForwardPath, crate::error::LineageError> {
        let from = match self.repo.revparse_single(from).and_then(|o| o.peel_to_commit()) {
            Ok(commit) => commit.id(),
            Err(_) => return Ok(ForwardPath::Unreachable),
        };
        if from != self.tip && !self.repo.graph_descendant_of(self.tip, from)? {
            return Ok(ForwardPath::Unreachable);
        }

        let mut chain = Vec::new();
        let mut current = self.repo.find_commit(self.tip)?;
        loop {
            chain.push(StepCommit {
                id: current.id().to_string(),
                time: current.time().seconds(),
            });
            if current.id() == from {
                break;
            }
            if chain.len() > limit {
                return Ok(ForwardPath::TooLong);
            }
            // `current` descends from `from`, so a lone parent must lead back to it
            let mut next = None;
            if current.parent_count() == 1 {
                next = Some(current.parent(0)?);
            } else {
                for parent in current.parents() {
                    if parent.id() == from || self.repo.graph_descendant_of(parent.id(), from)? {
                        next = Some(parent);
                        break;
                    }
                }
            }
            match next {
                Some(parent) => current = parent,
                None => return Ok(ForwardPath::Unreachable),
            }
        }
        chain.reverse();
        Ok(ForwardPath::Found(chain))
    }

    fn step_diff(&self, from: &str, to: &str) -> Result<Vec<FileDiff>, crate::error::LineageError> {
        let old = self.repo.find_commit(Oid::from_str(from)?)?;
        let new = self.repo.find_commit(Oid::from_str(to)?)?;
        Ok(self.diff_commits(Some(&old), &new, 0, false)?)
    }

    fn file_lines(&self, commit: &str, path: &str) -> Result<Option<Vec<String>>, crate::error::LineageError> {
        Ok(self.file_lines_at(Oid::from_str(commit)?, path)?)
    }
}

/// Converts a git2 diff into per-file hunks with exact line text
pub fn collect_file_diffs(diff: &Diff<'_>) -> Result<Vec<FileDiff>, git2::Error> {
    let mut files = Vec::new();
    for idx in 0..diff.deltas().len() {
        let Some(delta) = diff.get_delta(idx) else {
            continue;
        };
        let status = FileStatus::from(delta.status());
        let path_of = |file: git2::DiffFile<'_>| {
            file.path()
                .map(|p| p.to_string_lossy().into_owned())
        };
        let old_path = if status == FileStatus::Added {
            None
        } else {
            path_of(delta.old_file())
        };
        let new_path = if status == FileStatus::Deleted {
            None
        } else {
            path_of(delta.new_file())
        };

        let mut hunks = Vec::new();
        let mut binary = delta.flags().is_binary();
        // unchanged content (a pure rename) yields no patch and no hunks
        if let Some(patch) = Patch::from_diff(diff, idx)? {
            binary |= patch.delta().flags().is_binary();
            for h in 0..patch.num_hunks() {
                let (hunk, line_count) = patch.hunk(h)?;
                let mut lines = Vec::with_capacity(line_count);
                for l in 0..line_count {
                    let line = patch.line_in_hunk(h, l)?;
                    let op = match line.origin() {
                        '+' => LineOp::Add,
                        '-' => LineOp::Remove,
                        ' ' => LineOp::Context,
                        // "\ No newline at end of file" markers
                        _ => continue,
                    };
                    let text = String::from_utf8_lossy(line.content());
                    let text = text.strip_suffix('\n').unwrap_or(&text);
                    lines.push(DiffLine {
                        op,
                        text: text.to_string(),
                        old_lineno: line.old_lineno(),
                        new_lineno: line.new_lineno(),
                    });
                }
                hunks.push(Hunk {
                    old_start: hunk.old_start(),
                    old_lines: hunk.old_lines(),
                    new_start: hunk.new_start(),
                    new_lines: hunk.new_lines(),
                    lines,
                });
            }
        }

        files.push(FileDiff {
            old_path,
            new_path,
            status,
            binary,
            hunks,
        });
    }
    Ok(files)
}
