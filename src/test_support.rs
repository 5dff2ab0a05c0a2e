//! Scratch repositories and fixtures shared by the unit tests.

use std::fs;
use std::path::Path;
use std::process::Command;
use git2::{Commit, Repository, Signature, Time};
use tempfile::TempDir;
use crate::error::SourceError;
use crate::models::TimeWindow;
use crate::parser::{parse_timestamp, LogParser};

/// Parse an in-memory log.
pub fn parse_str(text: &str) -> LogParser<impl Iterator<Item = Result<&str, SourceError>> + '_> {
    LogParser::new(text.lines().map(Ok::<&str, SourceError>))
}

pub fn window(since: &str, to: &str) -> TimeWindow {
    TimeWindow {
        since: parse_timestamp(since).unwrap(),
        to: parse_timestamp(to).unwrap(),
    }
}

pub fn git_available() -> bool {
    Command::new("git")
        .arg("--version")
        .output()
        .map(|output| output.status.success())
        .unwrap_or(false)
}

pub struct ScratchRepo {
    dir: TempDir,
    repo: Repository,
}

impl ScratchRepo {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let repo = Repository::init(dir.path()).unwrap();
        ScratchRepo { dir, repo }
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Write `files` into the work tree and commit them on HEAD.
    pub fn commit(&self, author: &str, at: &str, files: &[(&str, &str)]) -> String {
        let mut index = self.repo.index().unwrap();
        for (path, content) in files {
            let full = self.dir.path().join(path);
            if let Some(parent) = full.parent() {
                fs::create_dir_all(parent).unwrap();
            }
            fs::write(&full, content).unwrap();
            index.add_path(Path::new(path)).unwrap();
        }
        index.write().unwrap();
        self.commit_index(author, at)
    }

    /// Move `from` to `to` unchanged and commit.
    pub fn rename(&self, author: &str, at: &str, from: &str, to: &str) -> String {
        let target = self.dir.path().join(to);
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::rename(self.dir.path().join(from), &target).unwrap();

        let mut index = self.repo.index().unwrap();
        index.remove_path(Path::new(from)).unwrap();
        index.add_path(Path::new(to)).unwrap();
        index.write().unwrap();
        self.commit_index(author, at)
    }

    fn commit_index(&self, author: &str, at: &str) -> String {
        let when = parse_timestamp(at).unwrap();
        let signature = Signature::new(author, "dev@example.com", &Time::new(when.timestamp(), 0)).unwrap();

        let mut index = self.repo.index().unwrap();
        let tree = self.repo.find_tree(index.write_tree().unwrap()).unwrap();
        let parent = self.repo.head().ok().and_then(|head| head.peel_to_commit().ok());
        let parents: Vec<&Commit> = parent.iter().collect();

        self.repo
            .commit(Some("HEAD"), &signature, &signature, "test commit", &tree, &parents)
            .unwrap()
            .to_string()
    }
}
