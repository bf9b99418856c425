// src/model.rs

use serde::{Deserialize, Serialize};

/// Stable identifier of a sharing, as found in the sharing table
pub type SharingId = String;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    Commit,
    PullRequest,
    Issue,
}

/// Where the change attributable to a sharing lives in history
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ChangeRef {
    Commit {
        sha: String,
    },
    PullRequest {
        number: Option<u64>,
        merge_sha: String,
        /// Pre-merge base; the merge commit's first parent when absent
        base_sha: Option<String>,
    },
    /// Issues are resolved through the commit or pull request that closed them
    Issue {
        number: Option<u64>,
        closed_by: Box<ChangeRef>,
    },
}

impl ChangeRef {
    pub fn kind(&self) -> ChangeKind {
        match self {
            ChangeRef::Commit { .. } => ChangeKind::Commit,
            ChangeRef::PullRequest { .. } => ChangeKind::PullRequest,
            ChangeRef::Issue { .. } => ChangeKind::Issue,
        }
    }
}

/// One link between a conversation and a code change
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sharing {
    pub id: SharingId,
    /// `owner/name`
    pub repository: String,
    pub change: ChangeRef,
    pub conversation_id: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LineOp {
    Context,
    Add,
    Remove,
}

/// A single line of a hunk, without its trailing newline
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiffLine {
    pub op: LineOp,
    pub text: String,
    pub old_lineno: Option<u32>,
    pub new_lineno: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Hunk {
    pub old_start: u32,
    pub old_lines: u32,
    pub new_start: u32,
    pub new_lines: u32,
    pub lines: Vec<DiffLine>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileStatus {
    Added,
    Deleted,
    Modified,
    Renamed,
    Copied,
    Other,
}

impl From<git2::Delta> for FileStatus {
    fn from(delta: git2::Delta) -> Self {
        match delta {
            git2::Delta::Added | git2::Delta::Untracked => FileStatus::Added,
            git2::Delta::Deleted => FileStatus::Deleted,
            git2::Delta::Modified => FileStatus::Modified,
            git2::Delta::Renamed => FileStatus::Renamed,
            git2::Delta::Copied => FileStatus::Copied,
            _ => FileStatus::Other,
        }
    }
}

/// Changes to one file. `old_path` is `None` for added files,
/// `new_path` is `None` for deleted ones.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileDiff {
    pub old_path: Option<String>,
    pub new_path: Option<String>,
    pub status: FileStatus,
    pub binary: bool,
    pub hunks: Vec<Hunk>,
}

impl FileDiff {
    /// The most recent path of the file
    pub fn path(&self) -> &str {
        self.new_path
            .as_deref()
            .or(self.old_path.as_deref())
            .unwrap_or_default()
    }
}

/// The diff attributable to one sharing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Changeset {
    /// Commit holding the post-image, i.e. the introducing commit
    pub commit: String,
    /// Commit holding the pre-image; `None` for root commits
    pub base: Option<String>,
    pub files: Vec<FileDiff>,
}

impl Changeset {
    /// Added lines with the post-image path they were added to
    pub fn added_lines(&self) -> impl Iterator<Item = (&str, &DiffLine)> + '_ {
        self.files.iter().flat_map(|file| {
            let path = file.path();
            file.hunks
                .iter()
                .flat_map(|hunk| hunk.lines.iter())
                .filter(|line| line.op == LineOp::Add)
                .map(move |line| (path, line))
        })
    }

    pub fn changed_line_count(&self) -> usize {
        self.files
            .iter()
            .flat_map(|file| file.hunks.iter())
            .flat_map(|hunk| hunk.lines.iter())
            .filter(|line| line.op != LineOp::Context)
            .count()
    }
}

/// A changed line tracked by content and introducing commit, not by position
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineIdentity {
    /// Path at introduction time
    pub path: String,
    /// Line number in the introducing commit
    pub line: u32,
    pub content: String,
    pub commit: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnknownReason {
    HistoryTraversalExhausted,
    RenameTrackingUnavailable,
}

impl std::fmt::Display for UnknownReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        crate::error::write_serde_name(self, f)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "verdict", rename_all = "snake_case")]
pub enum Verdict {
    /// Still present at the tip, at the given location
    Survived { path: String, line: u32 },
    Died {
        killed_by: String,
        killed_at: i64,
        /// Commits between introduction and the killing commit
        commits: u32,
        /// Wall-clock seconds between introduction and the killing commit
        seconds: i64,
    },
    Unknown { reason: UnknownReason },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineVerdict {
    pub identity: LineIdentity,
    #[serde(flatten)]
    pub verdict: Verdict,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnitKind {
    Prompt,
    Answer,
    CodeBlock,
}

/// One comparable piece of a conversation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationUnit {
    pub kind: UnitKind,
    /// Sequence index within the conversation
    pub index: usize,
    /// Prompt/answer turn the unit belongs to
    pub turn: usize,
    pub text: String,
}

/// Code snippet as listed in a conversation transcript
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodeSnippet {
    #[serde(rename = "Type", default)]
    pub language: Option<String>,
    #[serde(rename = "Content", default)]
    pub content: String,
}

/// One prompt with its answer, as stored in the conversation store
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    #[serde(rename = "Prompt", default)]
    pub prompt: String,
    #[serde(rename = "Answer", default)]
    pub answer: String,
    #[serde(rename = "ListOfCode", default)]
    pub code: Vec<CodeSnippet>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Side {
    Pre,
    Post,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupLine {
    /// Line number on the group's side
    pub lineno: u32,
    pub text: String,
    pub changed: bool,
}

/// A contiguous run of changed lines on one side of a hunk, with context
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineGroup {
    pub index: usize,
    pub path: String,
    /// Hunk index within the changeset
    pub hunk: usize,
    pub side: Side,
    pub lines: Vec<GroupLine>,
}

impl LineGroup {
    pub fn text(&self) -> String {
        self.lines
            .iter()
            .map(|line| line.text.as_str())
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitRef {
    pub kind: UnitKind,
    pub index: usize,
    pub turn: usize,
}

impl From<&ConversationUnit> for UnitRef {
    fn from(unit: &ConversationUnit) -> Self {
        UnitRef {
            kind: unit.kind,
            index: unit.index,
            turn: unit.turn,
        }
    }
}

/// Score of one line group against one conversation unit
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SimilarityRecord {
    pub group: usize,
    pub unit: UnitRef,
    pub score: f64,
}
