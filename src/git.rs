use std::io::{BufRead, BufReader, Read};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdout, Command, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use chrono::Duration;
use crate::error::SourceError;
use crate::models::TimeWindow;

/// `|<hash>|<committer date>|<author name>`, matched by the parser's header rule.
pub const LOG_FORMAT: &str = "--pretty=format:|%H|%cd|%an";

/// Describes one `git log` invocation over a time window.
#[derive(Debug, Clone)]
pub struct GitLogCommand {
    git: String,
    repo: PathBuf,
    window: TimeWindow,
}

impl GitLogCommand {
    pub fn new(git: impl Into<String>, repo: impl Into<PathBuf>, window: TimeWindow) -> Self {
        GitLogCommand {
            git: git.into(),
            repo: repo.into(),
            window,
        }
    }

    /// git treats `--until` as inclusive, so stop one second short of `to`.
    pub fn args(&self) -> Vec<String> {
        let until = self.window.to - Duration::seconds(1);
        vec![
            "-c".to_string(),
            "core.quotepath=off".to_string(),
            "-C".to_string(),
            self.repo.to_string_lossy().to_string(),
            "log".to_string(),
            "--no-color".to_string(),
            "-M".to_string(),
            format!("--since={}", self.window.since.to_rfc3339()),
            format!("--until={}", until.to_rfc3339()),
            "--date=short".to_string(),
            LOG_FORMAT.to_string(),
            "--numstat".to_string(),
            "--summary".to_string(),
        ]
    }

    /// Start git and stream its stdout line by line. Clearing `running`
    /// stops the stream and kills the child.
    pub fn spawn(&self, running: Arc<AtomicBool>) -> Result<LogLines, SourceError> {
        let args = self.args();
        tracing::debug!(git = %self.git, ?args, "spawning git log");

        let mut child = Command::new(&self.git)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|source| SourceError::Spawn {
                program: self.git.clone(),
                source,
            })?;

        let stdout = child.stdout.take().ok_or_else(|| {
            SourceError::Read(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "git stdout was not captured",
            ))
        })?;

        Ok(LogLines {
            child,
            reader: BufReader::new(stdout),
            running,
            buf: Vec::new(),
            finished: false,
        })
    }
}

/// Line stream from a running `git log`. Reaps the child at end of stream,
/// reporting a non-zero exit as a source failure.
pub struct LogLines {
    child: Child,
    reader: BufReader<ChildStdout>,
    running: Arc<AtomicBool>,
    buf: Vec<u8>,
    finished: bool,
}

impl LogLines {
    fn finish(&mut self) -> Option<SourceError> {
        self.finished = true;

        let mut stderr = String::new();
        if let Some(mut pipe) = self.child.stderr.take() {
            let _ = pipe.read_to_string(&mut stderr);
        }

        match self.child.wait() {
            Ok(status) if status.success() => None,
            Ok(status) => Some(SourceError::Failed {
                status: status.to_string(),
                stderr: stderr.trim().to_string(),
            }),
            Err(e) => Some(SourceError::Read(e)),
        }
    }

    fn abort(&mut self) {
        self.finished = true;
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

impl Iterator for LogLines {
    type Item = Result<String, SourceError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }

        if !self.running.load(Ordering::SeqCst) {
            tracing::warn!("interrupted, stopping git log");
            self.abort();
            return Some(Err(SourceError::Interrupted));
        }

        self.buf.clear();
        match self.reader.read_until(b'\n', &mut self.buf) {
            Ok(0) => self.finish().map(Err),
            Ok(_) => {
                while matches!(self.buf.last(), Some(b'\n' | b'\r')) {
                    self.buf.pop();
                }
                Some(Ok(String::from_utf8_lossy(&self.buf).into_owned()))
            }
            Err(e) => {
                self.abort();
                Some(Err(SourceError::Read(e)))
            }
        }
    }
}

impl Drop for LogLines {
    fn drop(&mut self) {
        if !self.finished {
            self.abort();
        }
    }
}

/// Line stream over an already rendered log (a file or stdin).
pub fn read_lines<R: BufRead>(reader: R) -> impl Iterator<Item = Result<String, SourceError>> {
    reader.lines().map(|line| line.map_err(SourceError::from))
}

/// Resolve the work tree root, failing early when `path` is not a repository.
pub fn repo_root(git: &str, path: &Path) -> Result<PathBuf, SourceError> {
    let root = run_git_command(git, path, &["rev-parse", "--show-toplevel"])?;
    Ok(PathBuf::from(root.trim()))
}

fn run_git_command(git: &str, cwd: &Path, args: &[&str]) -> Result<String, SourceError> {
    let output = Command::new(git)
        .current_dir(cwd)
        .args(args)
        .output()
        .map_err(|source| SourceError::Spawn {
            program: git.to_string(),
            source,
        })?;

    if !output.status.success() {
        return Err(SourceError::Failed {
            status: output.status.to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }

    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}
