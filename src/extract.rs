use std::path::{Path, PathBuf};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::{Duration, Instant};
use crate::error::ExtractError;
use crate::git::{GitLogCommand, LogLines};
use crate::libgit::LibGit2Extractor;
use crate::models::{CommitEntry, Record, TimeWindow};
use crate::parser::LogParser;
use crate::sink::RecordSink;

pub type EntryStream<'a> = Box<dyn Iterator<Item = Result<CommitEntry, ExtractError>> + 'a>;

/// Anything that can list the commits of a repository inside a time window,
/// newest first, each with its file statistics.
pub trait HistoryExtractor {
    fn name(&self) -> &'static str;

    fn entries(&self, window: TimeWindow) -> Result<EntryStream<'_>, ExtractError>;
}

#[derive(clap::ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum Strategy {
    /// Parse the text output of `git log --numstat --summary`
    GitLog,
    /// Walk history and diff trees through libgit2
    Libgit2,
}

impl Strategy {
    pub const ALL: [Strategy; 2] = [Strategy::GitLog, Strategy::Libgit2];

    pub fn build(
        self,
        git: &str,
        repo: &Path,
        running: Arc<AtomicBool>,
    ) -> Result<Box<dyn HistoryExtractor>, ExtractError> {
        Ok(match self {
            Strategy::GitLog => Box::new(GitLogExtractor::new(git, repo, running)),
            Strategy::Libgit2 => Box::new(LibGit2Extractor::open(repo, running)?),
        })
    }
}

/// Runs `git log` and feeds its output through the line parser.
pub struct GitLogExtractor {
    git: String,
    repo: PathBuf,
    running: Arc<AtomicBool>,
}

impl GitLogExtractor {
    pub fn new(git: &str, repo: &Path, running: Arc<AtomicBool>) -> Self {
        GitLogExtractor {
            git: git.to_string(),
            repo: repo.to_path_buf(),
            running,
        }
    }

    pub fn records(&self, window: TimeWindow) -> Result<LogParser<LogLines>, ExtractError> {
        let lines = GitLogCommand::new(self.git.as_str(), self.repo.as_path(), window)
            .spawn(self.running.clone())?;
        Ok(LogParser::new(lines))
    }
}

impl HistoryExtractor for GitLogExtractor {
    fn name(&self) -> &'static str {
        "git-log"
    }

    fn entries(&self, window: TimeWindow) -> Result<EntryStream<'_>, ExtractError> {
        Ok(Box::new(self.records(window)?.entries()))
    }
}

/// Flatten an entry stream back into the record order a sink expects.
pub fn records_of<'a>(entries: EntryStream<'a>) -> impl Iterator<Item = Result<Record, ExtractError>> + 'a {
    entries.flat_map(|entry| match entry {
        Ok(entry) => entry.into_records().map(Ok).collect::<Vec<_>>(),
        Err(e) => vec![Err(e)],
    })
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub commits: usize,
    pub file_changes: usize,
    pub binary_changes: usize,
    pub elapsed: Duration,
}

impl RunSummary {
    fn count(&mut self, record: &Record) {
        match record {
            Record::Commit(_) => self.commits += 1,
            Record::FileChange(change) => {
                self.file_changes += 1;
                if change.insertions.is_not_applicable() || change.deletions.is_not_applicable() {
                    self.binary_changes += 1;
                }
            }
        }
    }
}

/// Move every record from `records` into `sink`, stopping at the first
/// failure from either side.
pub fn pump<I>(records: I, sink: &mut dyn RecordSink) -> Result<RunSummary, ExtractError>
where
    I: Iterator<Item = Result<Record, ExtractError>>,
{
    let started = Instant::now();
    let mut summary = RunSummary::default();

    for record in records {
        let record = record?;
        summary.count(&record);
        sink.accept(&record)?;
    }

    summary.elapsed = started.elapsed();
    tracing::info!(
        commits = summary.commits,
        file_changes = summary.file_changes,
        elapsed_ms = summary.elapsed.as_millis() as u64,
        "extraction finished"
    );
    Ok(summary)
}

/// Per-strategy result of a comparison run.
#[derive(Debug, Clone)]
pub struct Comparison {
    pub strategy: &'static str,
    pub summary: RunSummary,
    pub commit_ids: Vec<String>,
}

/// Run an extractor to completion without persisting anything.
pub fn measure(extractor: &dyn HistoryExtractor, window: TimeWindow) -> Result<Comparison, ExtractError> {
    let started = Instant::now();
    let mut summary = RunSummary::default();
    let mut commit_ids = Vec::new();

    for entry in extractor.entries(window)? {
        let entry = entry?;
        commit_ids.push(entry.commit.id.clone());
        for record in entry.into_records() {
            summary.count(&record);
        }
    }

    summary.elapsed = started.elapsed();
    tracing::info!(strategy = extractor.name(), commits = summary.commits, "measured");
    Ok(Comparison {
        strategy: extractor.name(),
        summary,
        commit_ids,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ParseErrorKind, SinkError, SourceError};
    use crate::models::FileChangeRecord;
    use crate::test_support::parse_str;
    use crate::test_support::{git_available, window, ScratchRepo};

    struct FailingSink;

    impl RecordSink for FailingSink {
        fn accept(&mut self, _record: &Record) -> Result<(), SinkError> {
            Err(SinkError::Duplicate {
                table: "commits",
                key: "abc123".to_string(),
            })
        }
    }

    fn running() -> Arc<AtomicBool> {
        Arc::new(AtomicBool::new(true))
    }

    fn scratch_history() -> ScratchRepo {
        let repo = ScratchRepo::new();
        repo.commit("Jane Doe", "2019-05-01T09:00:00Z", &[("src/old.rs", "fn main() {}\n"), ("README", "hi\n")]);
        repo.commit("John Roe", "2019-05-02T09:00:00Z", &[("README", "hi\nthere\n"), ("logo.png", "PNG\0\0\x01")]);
        repo.rename("Jane Doe", "2019-05-03T09:00:00Z", "src/old.rs", "src/moved.rs");
        repo
    }

    #[test]
    fn test_pump_counts_and_forwards() {
        let text = "|abc123|2019-05-01|Jane Doe\n3\t1\tsrc/main.go\n-\t-\tassets/logo.png\n\n|def456|2019-05-02|Jane Doe\n";
        let mut sink: Vec<Record> = Vec::new();

        let summary = pump(parse_str(text), &mut sink).unwrap();

        assert_eq!(summary.commits, 2);
        assert_eq!(summary.file_changes, 2);
        assert_eq!(summary.binary_changes, 1);
        assert_eq!(sink.len(), 4);
    }

    #[test]
    fn test_pump_stops_on_parse_error() {
        let mut sink: Vec<Record> = Vec::new();

        let err = pump(parse_str("|a|2019-05-01|A\n1\t1\tx\ngarbage\n2\t2\ty\n"), &mut sink).unwrap_err();

        assert!(matches!(err, ExtractError::Parse(ref e) if e.kind == ParseErrorKind::Unrecognized));
        assert_eq!(sink.len(), 2);
    }

    #[test]
    fn test_pump_propagates_sink_rejection() {
        let err = pump(parse_str("|abc123|2019-05-01|A\n"), &mut FailingSink).unwrap_err();

        assert!(matches!(err, ExtractError::Sink(SinkError::Duplicate { .. })));
    }

    #[test]
    fn test_records_of_preserves_order() {
        let entries: EntryStream<'_> = Box::new(parse_str("|a|2019-05-01|A\n1\t0\tx\n|b|2019-05-02|B\n").entries());
        let records: Vec<Record> = records_of(entries).collect::<Result<_, _>>().unwrap();

        assert!(matches!(&records[0], Record::Commit(c) if c.id == "a"));
        assert!(matches!(&records[1], Record::FileChange(f) if f.commit_id == "a"));
        assert!(matches!(&records[2], Record::Commit(c) if c.id == "b"));
    }

    #[test]
    fn test_strategies_agree() {
        if !git_available() {
            return;
        }
        let repo = scratch_history();
        let window = window("2019-01-01", "2020-01-01");

        let mut results = Vec::new();
        for strategy in Strategy::ALL {
            let extractor = strategy.build("git", repo.path(), running()).unwrap();
            let entries: Vec<CommitEntry> = extractor.entries(window).unwrap().collect::<Result<_, _>>().unwrap();
            results.push(entries);
        }

        let shape = |entries: &[CommitEntry]| -> Vec<(String, String, Vec<FileChangeRecord>)> {
            entries
                .iter()
                .map(|e| {
                    let mut changes = e.changes.clone();
                    changes.sort_by(|a, b| a.path.cmp(&b.path));
                    (e.commit.id.clone(), e.commit.author.clone(), changes)
                })
                .collect()
        };

        assert_eq!(results[0].len(), 3);
        assert_eq!(shape(&results[0]), shape(&results[1]));

        let rename = &results[0][0].changes[0];
        assert_eq!(rename.path, "src/{old.rs => moved.rs}");
    }

    #[test]
    fn test_measure_reports_commit_ids() {
        let repo = scratch_history();
        let extractor = Strategy::Libgit2.build("git", repo.path(), running()).unwrap();

        let comparison = measure(extractor.as_ref(), window("2019-05-02", "2020-01-01")).unwrap();

        assert_eq!(comparison.strategy, "libgit2");
        assert_eq!(comparison.commit_ids.len(), 2);
        assert_eq!(comparison.summary.binary_changes, 1);
    }

    #[test]
    fn test_built_extractor_honours_interrupt() {
        let repo = scratch_history();
        let extractor = Strategy::Libgit2
            .build("git", repo.path(), Arc::new(AtomicBool::new(false)))
            .unwrap();

        let mut entries = extractor.entries(window("2019-01-01", "2020-01-01")).unwrap();

        assert!(matches!(entries.next(), Some(Err(ExtractError::Source(SourceError::Interrupted)))));
        assert!(entries.next().is_none());
    }
}
