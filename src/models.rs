use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CommitRecord {
    pub id: String,
    pub author: String,
    pub committed_at: DateTime<Utc>,
}

/// Added or removed line count for one file. Binary files have no line
/// delta, which is not the same thing as a delta of zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineCount {
    Lines(u64),
    NotApplicable,
}

impl LineCount {
    pub fn lines(self) -> Option<u64> {
        match self {
            LineCount::Lines(n) => Some(n),
            LineCount::NotApplicable => None,
        }
    }

    pub fn is_not_applicable(self) -> bool {
        matches!(self, LineCount::NotApplicable)
    }
}

impl From<Option<u64>> for LineCount {
    fn from(value: Option<u64>) -> Self {
        value.map_or(LineCount::NotApplicable, LineCount::Lines)
    }
}

impl fmt::Display for LineCount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LineCount::Lines(n) => write!(f, "{}", n),
            LineCount::NotApplicable => f.write_str("-"),
        }
    }
}

impl Serialize for LineCount {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.lines().serialize(serializer)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileChangeRecord {
    pub commit_id: String,
    /// Path exactly as reported, including any `old => new` rename notation.
    pub path: String,
    pub insertions: LineCount,
    pub deletions: LineCount,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Record {
    Commit(CommitRecord),
    FileChange(FileChangeRecord),
}

/// One commit together with its file statistics, the unit every extraction
/// strategy produces.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitEntry {
    pub commit: CommitRecord,
    pub changes: Vec<FileChangeRecord>,
}

impl CommitEntry {
    pub fn new(commit: CommitRecord) -> Self {
        CommitEntry { commit, changes: Vec::new() }
    }

    /// Flatten back into the record order the parser emits.
    pub fn into_records(self) -> impl Iterator<Item = Record> {
        std::iter::once(Record::Commit(self.commit))
            .chain(self.changes.into_iter().map(Record::FileChange))
    }
}

/// Half-open extraction window `[since, to)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeWindow {
    pub since: DateTime<Utc>,
    pub to: DateTime<Utc>,
}

impl TimeWindow {
    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        at >= self.since && at < self.to
    }
}
