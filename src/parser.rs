//! Streaming parser for `git log --numstat --summary` output rendered with
//! the `|%H|%cd|%an` header format.
//!
//! The grammar is flat: a header line opens a commit block, statistics lines
//! that follow belong to it, and blank or summary lines carry nothing. The
//! only state carried between lines is the id of the most recent header.

use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use crate::error::{ExtractError, ParseError, ParseErrorKind, SourceError};
use crate::models::{CommitEntry, CommitRecord, FileChangeRecord, LineCount, Record};

pub const HEADER_MARKER: char = '|';
pub const FIELD_SEPARATOR: char = '\t';
pub const BINARY_MARKER: &str = "-";

/// First words of the `--summary` lines git prints after the statistics.
const SUMMARY_KEYWORDS: &[&str] = &["create", "delete", "rename", "copy", "mode"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineKind {
    Blank,
    Header,
    Statistics,
    Summary,
    Unrecognized,
}

/// Classify an already trimmed line. First match wins.
pub fn classify(line: &str) -> LineKind {
    if line.is_empty() {
        return LineKind::Blank;
    }
    if line.starts_with(HEADER_MARKER) {
        return LineKind::Header;
    }

    let first = line.split_whitespace().next().unwrap_or_default();
    if first == BINARY_MARKER || first.bytes().all(|b| b.is_ascii_digit()) {
        LineKind::Statistics
    } else if SUMMARY_KEYWORDS.contains(&first) {
        LineKind::Summary
    } else {
        LineKind::Unrecognized
    }
}

/// The parser's carried state: the commit the next statistics line belongs to.
#[derive(Debug, Default, Clone)]
pub struct Cursor {
    current: Option<String>,
}

impl Cursor {
    pub fn current(&self) -> Option<&str> {
        self.current.as_deref()
    }

    /// Consume one raw line, returning the record it produces, if any.
    pub fn step(&mut self, line: &str) -> Result<Option<Record>, ParseErrorKind> {
        let line = line.trim();

        match classify(line) {
            LineKind::Blank | LineKind::Summary => Ok(None),
            LineKind::Header => {
                let commit = parse_header(&line[HEADER_MARKER.len_utf8()..])?;
                self.current = Some(commit.id.clone());
                Ok(Some(Record::Commit(commit)))
            }
            LineKind::Statistics => {
                let commit_id = self
                    .current
                    .clone()
                    .ok_or(ParseErrorKind::OrphanStatistics)?;
                let change = parse_statistics(line, commit_id)?;
                Ok(Some(Record::FileChange(change)))
            }
            LineKind::Unrecognized => Err(ParseErrorKind::Unrecognized),
        }
    }
}

fn parse_header(rest: &str) -> Result<CommitRecord, ParseErrorKind> {
    let mut fields = rest.splitn(3, HEADER_MARKER);
    let (Some(id), Some(date), Some(author)) = (fields.next(), fields.next(), fields.next()) else {
        return Err(ParseErrorKind::MalformedHeader("expected id, date and author"));
    };

    let id = id.trim();
    if id.is_empty() {
        return Err(ParseErrorKind::MalformedHeader("empty commit id"));
    }

    let committed_at = parse_timestamp(date.trim())
        .ok_or(ParseErrorKind::MalformedHeader("unparsable commit date"))?;

    Ok(CommitRecord {
        id: id.to_string(),
        author: author.trim().to_string(),
        committed_at,
    })
}

fn parse_statistics(line: &str, commit_id: String) -> Result<FileChangeRecord, ParseErrorKind> {
    let (insertions, deletions, path) = split_statistics(line).ok_or_else(|| {
        ParseErrorKind::MalformedStatistics("expected insertions, deletions and path".to_string())
    })?;

    if path.is_empty() {
        return Err(ParseErrorKind::MalformedStatistics("missing path".to_string()));
    }

    Ok(FileChangeRecord {
        commit_id,
        path: path.to_string(),
        insertions: parse_count(insertions)?,
        deletions: parse_count(deletions)?,
    })
}

/// git separates numstat fields with tabs. Hand-written or copy-pasted logs
/// often carry spaces instead, so fall back to whitespace runs for the two
/// count fields when no tab is present.
fn split_statistics(line: &str) -> Option<(&str, &str, &str)> {
    if line.contains(FIELD_SEPARATOR) {
        let mut fields = line.splitn(3, FIELD_SEPARATOR);
        let insertions = fields.next()?.trim();
        let deletions = fields.next()?.trim();
        let path = fields.next()?.trim();
        return Some((insertions, deletions, path));
    }

    let (insertions, rest) = line.split_once(char::is_whitespace)?;
    let (deletions, path) = rest.trim_start().split_once(char::is_whitespace)?;
    Some((insertions, deletions, path.trim()))
}

fn parse_count(field: &str) -> Result<LineCount, ParseErrorKind> {
    if field == BINARY_MARKER {
        return Ok(LineCount::NotApplicable);
    }
    field
        .parse::<u64>()
        .map(LineCount::Lines)
        .map_err(|_| ParseErrorKind::MalformedStatistics(format!("invalid count '{}'", field)))
}

/// Accepts a calendar date (taken as midnight UTC), RFC 3339, or git's
/// `--date=iso` rendering.
pub fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    if let Ok(date) = NaiveDate::parse_from_str(value, "%Y-%m-%d") {
        return Some(Utc.from_utc_datetime(&date.and_hms_opt(0, 0, 0)?));
    }
    DateTime::parse_from_rfc3339(value)
        .or_else(|_| DateTime::parse_from_str(value, "%Y-%m-%d %H:%M:%S %z"))
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

/// Lazy record stream over a sequence of log lines.
///
/// Single pass: once the input is exhausted or an error has been yielded the
/// parser returns `None` forever. Parse again by building a new parser over
/// a fresh input.
pub struct LogParser<I> {
    lines: I,
    cursor: Cursor,
    line_number: usize,
    done: bool,
}

impl<I> LogParser<I> {
    pub fn new(lines: I) -> Self {
        LogParser {
            lines,
            cursor: Cursor::default(),
            line_number: 0,
            done: false,
        }
    }

    /// Fold the record stream into one entry per commit.
    pub fn entries(self) -> Entries<Self> {
        Entries { records: self, pending: None }
    }
}

impl<I, S> Iterator for LogParser<I>
where
    I: Iterator<Item = Result<S, SourceError>>,
    S: AsRef<str>,
{
    type Item = Result<Record, ExtractError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }

        loop {
            let line = match self.lines.next()? {
                Ok(line) => line,
                Err(e) => {
                    self.done = true;
                    return Some(Err(e.into()));
                }
            };
            self.line_number += 1;
            let line = line.as_ref();

            match self.cursor.step(line) {
                Ok(Some(record)) => {
                    if let Record::Commit(commit) = &record {
                        tracing::debug!(commit = %commit.id, line = self.line_number, "commit header");
                    }
                    return Some(Ok(record));
                }
                Ok(None) => continue,
                Err(kind) => {
                    self.done = true;
                    return Some(Err(ParseError {
                        line_number: self.line_number,
                        line: line.to_string(),
                        cursor: self.cursor.current().map(str::to_string),
                        kind,
                    }
                    .into()));
                }
            }
        }
    }
}

/// Groups a record stream into [`CommitEntry`] values, holding back one
/// commit until its next header (or the end of input) shows it is complete.
pub struct Entries<R> {
    records: R,
    pending: Option<CommitEntry>,
}

impl<R> Iterator for Entries<R>
where
    R: Iterator<Item = Result<Record, ExtractError>>,
{
    type Item = Result<CommitEntry, ExtractError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            match self.records.next() {
                Some(Ok(Record::Commit(commit))) => {
                    if let Some(done) = self.pending.replace(CommitEntry::new(commit)) {
                        return Some(Ok(done));
                    }
                }
                Some(Ok(Record::FileChange(change))) => {
                    // The parser rejects statistics before the first header.
                    debug_assert!(self.pending.is_some());
                    if let Some(entry) = self.pending.as_mut() {
                        entry.changes.push(change);
                    }
                }
                Some(Err(e)) => {
                    self.pending = None;
                    return Some(Err(e));
                }
                None => return self.pending.take().map(Ok),
            }
        }
    }
}
