use rusqlite::{params, Connection, ErrorCode, Transaction};
use std::path::Path;
use crate::error::SinkError;
use crate::models::{CommitRecord, FileChangeRecord, Record};
use crate::sink::RecordSink;

const CURRENT_VERSION: i32 = 1;

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS commits (
        id TEXT PRIMARY KEY,
        author TEXT,
        committer_date INTEGER
    );

    CREATE TABLE IF NOT EXISTS file_changes (
        id TEXT NOT NULL,
        path TEXT NOT NULL,
        insertions INTEGER,
        deletions INTEGER,
        PRIMARY KEY (id, path)
    );

    CREATE INDEX IF NOT EXISTS idx_commits_date ON commits(committer_date);
";

pub struct Database {
    conn: Connection,
}

impl Database {
    pub fn open(path: &Path) -> Result<Self, SinkError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)?;
        tracing::debug!("Opened database at {}", path.display());
        Self::with_connection(conn)
    }

    fn with_connection(conn: Connection) -> Result<Self, SinkError> {
        let db = Database { conn };
        db.init_schema()?;
        Ok(db)
    }

    fn init_schema(&self) -> Result<(), SinkError> {
        let version: i32 = self.conn.query_row("PRAGMA user_version", [], |row| row.get(0))?;

        if version < CURRENT_VERSION {
            self.create_schema()?;
        }

        Ok(())
    }

    fn create_schema(&self) -> Result<(), SinkError> {
        self.conn.execute_batch(SCHEMA)?;
        self.conn.execute_batch(&format!("PRAGMA user_version = {};", CURRENT_VERSION))?;
        Ok(())
    }

    /// Drop both tables and start from an empty schema.
    pub fn reset(&self) -> Result<(), SinkError> {
        self.conn.execute_batch(
            "DROP TABLE IF EXISTS file_changes;
             DROP TABLE IF EXISTS commits;",
        )?;
        self.create_schema()?;
        tracing::info!("Database reset");
        Ok(())
    }

    /// Start a run. Nothing is visible until [`RecordWriter::commit`];
    /// dropping the writer rolls the run back.
    pub fn begin(&mut self) -> Result<RecordWriter<'_>, SinkError> {
        Ok(RecordWriter {
            tx: self.conn.transaction()?,
        })
    }

    pub fn count_commits(&self) -> Result<i64, SinkError> {
        Ok(self.conn.query_row("SELECT COUNT(*) FROM commits", [], |row| row.get(0))?)
    }

    pub fn count_file_changes(&self) -> Result<i64, SinkError> {
        Ok(self.conn.query_row("SELECT COUNT(*) FROM file_changes", [], |row| row.get(0))?)
    }
}

/// Transactional writer for one extraction run.
pub struct RecordWriter<'a> {
    tx: Transaction<'a>,
}

impl RecordWriter<'_> {
    pub fn insert_commit(&self, commit: &CommitRecord) -> Result<(), SinkError> {
        self.tx
            .prepare_cached("INSERT INTO commits (id, author, committer_date) VALUES (?, ?, ?)")?
            .execute(params![commit.id, commit.author, commit.committed_at.timestamp()])
            .map_err(|e| duplicate_or(e, "commits", &commit.id))?;
        Ok(())
    }

    pub fn insert_file_change(&self, change: &FileChangeRecord) -> Result<(), SinkError> {
        self.tx
            .prepare_cached(
                "INSERT INTO file_changes (id, path, insertions, deletions) VALUES (?, ?, ?, ?)",
            )?
            .execute(params![
                change.commit_id,
                change.path,
                change.insertions.lines(),
                change.deletions.lines()
            ])
            .map_err(|e| {
                duplicate_or(e, "file_changes", &format!("{} {}", change.commit_id, change.path))
            })?;
        Ok(())
    }

    pub fn commit(self) -> Result<(), SinkError> {
        self.tx.commit()?;
        Ok(())
    }
}

impl RecordSink for RecordWriter<'_> {
    fn accept(&mut self, record: &Record) -> Result<(), SinkError> {
        match record {
            Record::Commit(commit) => self.insert_commit(commit),
            Record::FileChange(change) => self.insert_file_change(change),
        }
    }
}

fn duplicate_or(err: rusqlite::Error, table: &'static str, key: &str) -> SinkError {
    match err.sqlite_error_code() {
        Some(ErrorCode::ConstraintViolation) => SinkError::Duplicate {
            table,
            key: key.to_string(),
        },
        _ => SinkError::Database(err),
    }
}
