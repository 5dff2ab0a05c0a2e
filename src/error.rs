use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Any failure that ends an extraction run.
#[derive(Error, Debug)]
pub enum ExtractError {
    #[error("Parse error: {0}")]
    Parse(#[from] ParseError),

    #[error("Source error: {0}")]
    Source(#[from] SourceError),

    #[error("Sink error: {0}")]
    Sink(#[from] SinkError),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseErrorKind {
    #[error("unrecognized line")]
    Unrecognized,

    #[error("malformed commit header: {0}")]
    MalformedHeader(&'static str),

    #[error("malformed statistics line: {0}")]
    MalformedStatistics(String),

    #[error("statistics line before any commit header")]
    OrphanStatistics,
}

/// A line the grammar could not place. Carries the parser state at the time
/// so the failing run can be diagnosed from the message alone.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error(
    "line {line_number}: {kind} (current commit: {}): {line:?}",
    .cursor.as_deref().unwrap_or("<none>")
)]
pub struct ParseError {
    pub line_number: usize,
    pub line: String,
    pub cursor: Option<String>,
    pub kind: ParseErrorKind,
}

#[derive(Error, Debug)]
pub enum SourceError {
    #[error("failed to run '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },

    #[error("git log exited with {status}: {stderr}")]
    Failed { status: String, stderr: String },

    #[error("failed to read log stream: {0}")]
    Read(#[from] io::Error),

    #[error("extraction interrupted")]
    Interrupted,

    #[error("libgit2: {0}")]
    Git2(#[from] git2::Error),
}

#[derive(Error, Debug)]
pub enum SinkError {
    #[error("duplicate key in {table}: {key}")]
    Duplicate { table: &'static str, key: String },

    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("failed to write record: {0}")]
    Io(#[from] io::Error),

    #[error("failed to encode record: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("invalid config file {}: {source}", .path.display())]
    Invalid {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid timestamp '{0}' (expected YYYY-MM-DD or RFC 3339)")]
    InvalidTimestamp(String),

    #[error("empty time window: since {since} is not before to {to}")]
    EmptyWindow { since: String, to: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_error_message_carries_state() {
        let err = ParseError {
            line_number: 4,
            line: "??? what".to_string(),
            cursor: Some("abc123".to_string()),
            kind: ParseErrorKind::Unrecognized,
        };

        let msg = err.to_string();
        assert!(msg.contains("line 4"));
        assert!(msg.contains("abc123"));
        assert!(msg.contains("??? what"));
    }

    #[test]
    fn test_parse_error_without_cursor() {
        let err = ParseError {
            line_number: 1,
            line: "3\t1\tsrc/main.go".to_string(),
            cursor: None,
            kind: ParseErrorKind::OrphanStatistics,
        };

        assert!(err.to_string().contains("<none>"));
    }
}
