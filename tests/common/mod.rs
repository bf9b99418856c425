// tests/common/mod.rs

#![allow(dead_code)]

use anyhow::Result;
use git2::{IndexEntry, IndexTime, Oid, Repository, Signature, Time};
use git_lineage::inputs::{Availability, AvailabilityRow};
use git_lineage::model::{ChangeRef, Sharing};
use std::collections::BTreeMap;
use std::path::Path;
use tempfile::TempDir;

/// A throwaway repository whose commits are described as full file snapshots
pub struct Fixture {
    pub dir: TempDir,
    pub repo: Repository,
    files: BTreeMap<String, String>,
    head: Option<Oid>,
    clock: i64,
}

impl Fixture {
    pub fn new() -> Result<Self> {
        let dir = tempfile::tempdir()?;
        let repo = Repository::init(dir.path())?;
        Ok(Fixture {
            dir,
            repo,
            files: BTreeMap::new(),
            head: None,
            clock: 1_700_000_000,
        })
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn head(&self) -> Option<Oid> {
        self.head
    }

    /// Applies `changes` (`None` deletes) on top of HEAD and commits them
    pub fn commit(&mut self, changes: &[(&str, Option<&str>)], message: &str) -> Result<Oid> {
        for (path, content) in changes {
            match content {
                Some(content) => self.files.insert(path.to_string(), content.to_string()),
                None => self.files.remove(*path),
            };
        }
        let parents: Vec<Oid> = self.head.into_iter().collect();
        let files = self.files.clone();
        let oid = self.snapshot(&files, &parents, message, Some("HEAD"))?;
        self.head = Some(oid);
        Ok(oid)
    }

    /// Commits `files` as a complete tree with explicit parents, without
    /// touching the fixture's own file state
    pub fn snapshot(
        &mut self,
        files: &BTreeMap<String, String>,
        parents: &[Oid],
        message: &str,
        update_ref: Option<&str>,
    ) -> Result<Oid> {
        let mut index = git2::Index::new()?;
        for (path, content) in files {
            let blob = self.repo.blob(content.as_bytes())?;
            index.add(&IndexEntry {
                ctime: IndexTime::new(0, 0),
                mtime: IndexTime::new(0, 0),
                dev: 0,
                ino: 0,
                mode: 0o100644,
                uid: 0,
                gid: 0,
                file_size: content.len() as u32,
                id: blob,
                flags: (path.len() as u16) & 0xfff,
                flags_extended: 0,
                path: path.as_bytes().to_vec(),
            })?;
        }
        let tree_id = index.write_tree_to(&self.repo)?;
        let tree = self.repo.find_tree(tree_id)?;

        self.clock += 100;
        let sig = Signature::new("Test", "test@example.com", &Time::new(self.clock, 0))?;
        let parent_commits = parents
            .iter()
            .map(|oid| self.repo.find_commit(*oid))
            .collect::<Result<Vec<_>, _>>()?;
        let parent_refs: Vec<&git2::Commit<'_>> = parent_commits.iter().collect();
        Ok(self
            .repo
            .commit(update_ref, &sig, &sig, message, &tree, &parent_refs)?)
    }

    /// Current file state with `changes` applied, for side-branch snapshots
    pub fn files_with(&self, changes: &[(&str, Option<&str>)]) -> BTreeMap<String, String> {
        let mut files = self.files.clone();
        for (path, content) in changes {
            match content {
                Some(content) => files.insert(path.to_string(), content.to_string()),
                None => files.remove(*path),
            };
        }
        files
    }

    /// Records a merge on HEAD and makes `files` the fixture's state
    pub fn merge(&mut self, other: Oid, files: BTreeMap<String, String>, message: &str) -> Result<Oid> {
        let head = self.head.ok_or_else(|| anyhow::anyhow!("merge needs a HEAD"))?;
        let oid = self.snapshot(&files, &[head, other], message, Some("HEAD"))?;
        self.files = files;
        self.head = Some(oid);
        Ok(oid)
    }

    /// Availability in the clone step's shape, keyed by the bare name
    pub fn availability(&self, repository: &str) -> Availability {
        let project = repository.rsplit('/').next().unwrap_or(repository);
        Availability::from_rows(
            vec![AvailabilityRow {
                project: Some(project.to_string()),
                repository_path: Some(self.path().to_path_buf()),
                ..Default::default()
            }],
            None,
        )
    }
}

pub fn commit_sharing(id: &str, repository: &str, sha: Oid) -> Sharing {
    Sharing {
        id: id.to_string(),
        repository: repository.to_string(),
        change: ChangeRef::Commit { sha: sha.to_string() },
        conversation_id: Some(format!("conv-{id}")),
    }
}

pub fn lines(text: &[&str]) -> String {
    let mut out = text.join("\n");
    out.push('\n');
    out
}
