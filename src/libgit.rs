use chrono::{DateTime, TimeZone, Utc};
use git2::{Commit, Diff, DiffDelta, DiffFindOptions, DiffOptions, Oid, Patch, Repository, Sort};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use crate::error::{ExtractError, SourceError};
use crate::extract::{EntryStream, HistoryExtractor};
use crate::models::{CommitEntry, CommitRecord, FileChangeRecord, LineCount, TimeWindow};

/// Walks history through libgit2 instead of parsing `git log` output.
///
/// Produces the same shape of data as the log parser: committer date,
/// author name, and per-file numstat counts against the first parent with
/// rename detection. Merge commits carry no file changes, matching what
/// `git log --numstat` prints without `-m`.
pub struct LibGit2Extractor {
    repo: Repository,
    running: Arc<AtomicBool>,
}

impl LibGit2Extractor {
    /// Clearing `running` ends the walk with [`SourceError::Interrupted`].
    pub fn open(path: &Path, running: Arc<AtomicBool>) -> Result<Self, SourceError> {
        let repo = Repository::discover(path)?;
        tracing::info!("Opened repository at: {}", repo.path().display());
        Ok(LibGit2Extractor { repo, running })
    }

    /// The entry for `oid`, or `None` when it falls outside `window`.
    fn visit(
        &self,
        oid: Result<Oid, git2::Error>,
        window: TimeWindow,
    ) -> Result<Option<CommitEntry>, git2::Error> {
        let commit = self.repo.find_commit(oid?)?;
        if !window.contains(commit_time(&commit)?) {
            return Ok(None);
        }
        self.entry_for(&commit).map(Some)
    }

    fn entry_for(&self, commit: &Commit) -> Result<CommitEntry, git2::Error> {
        let id = commit.id().to_string();
        let record = CommitRecord {
            id: id.clone(),
            author: commit.author().name().unwrap_or("Unknown").to_string(),
            committed_at: commit_time(commit)?,
        };
        let mut entry = CommitEntry::new(record);

        if commit.parent_count() > 1 {
            return Ok(entry);
        }

        let tree = commit.tree()?;
        let parent_tree = match commit.parent_count() {
            0 => None,
            _ => Some(commit.parent(0)?.tree()?),
        };

        let mut diff_opts = DiffOptions::new();
        let mut diff = self
            .repo
            .diff_tree_to_tree(parent_tree.as_ref(), Some(&tree), Some(&mut diff_opts))?;

        let mut find_opts = DiffFindOptions::new();
        find_opts.renames(true);
        diff.find_similar(Some(&mut find_opts))?;

        entry.changes = file_changes(&diff, &id)?;
        Ok(entry)
    }
}

impl HistoryExtractor for LibGit2Extractor {
    fn name(&self) -> &'static str {
        "libgit2"
    }

    fn entries(&self, window: TimeWindow) -> Result<EntryStream<'_>, ExtractError> {
        let mut revwalk = self.repo.revwalk().map_err(SourceError::from)?;
        revwalk.push_head().map_err(SourceError::from)?;
        revwalk.set_sorting(Sort::TIME).map_err(SourceError::from)?;

        let running = self.running.clone();
        let mut stopped = false;
        let entries = std::iter::from_fn(move || {
            if stopped {
                return None;
            }
            loop {
                if !running.load(Ordering::SeqCst) {
                    tracing::warn!("interrupted, stopping revwalk");
                    stopped = true;
                    return Some(Err(ExtractError::Source(SourceError::Interrupted)));
                }

                match self.visit(revwalk.next()?, window) {
                    Ok(Some(entry)) => return Some(Ok(entry)),
                    Ok(None) => continue,
                    Err(e) => {
                        stopped = true;
                        return Some(Err(ExtractError::Source(e.into())));
                    }
                }
            }
        });

        Ok(Box::new(entries))
    }
}

fn commit_time(commit: &Commit) -> Result<DateTime<Utc>, git2::Error> {
    let seconds = commit.time().seconds();
    Utc.timestamp_opt(seconds, 0)
        .single()
        .ok_or_else(|| git2::Error::from_str(&format!("commit time out of range: {}", seconds)))
}

fn file_changes(diff: &Diff, commit_id: &str) -> Result<Vec<FileChangeRecord>, git2::Error> {
    let mut changes = Vec::with_capacity(diff.deltas().len());

    for (idx, delta) in diff.deltas().enumerate() {
        let Some(path) = display_path(&delta) else {
            continue;
        };

        // Loading the patch is what flags binary content on the delta.
        let (insertions, deletions) = match Patch::from_diff(diff, idx)? {
            Some(patch) if !patch.delta().flags().is_binary() => {
                let (_, added, removed) = patch.line_stats()?;
                (to_count(added), to_count(removed))
            }
            None if !is_binary(diff, idx) => (LineCount::Lines(0), LineCount::Lines(0)),
            _ => (LineCount::NotApplicable, LineCount::NotApplicable),
        };

        changes.push(FileChangeRecord {
            commit_id: commit_id.to_string(),
            path,
            insertions,
            deletions,
        });
    }

    Ok(changes)
}

fn is_binary(diff: &Diff, idx: usize) -> bool {
    diff.get_delta(idx).map_or(true, |delta| delta.flags().is_binary())
}

fn to_count(lines: usize) -> LineCount {
    LineCount::Lines(lines as u64)
}

fn display_path(delta: &DiffDelta) -> Option<String> {
    let new = delta.new_file().path().map(|p| p.to_string_lossy().into_owned());
    let old = delta.old_file().path().map(|p| p.to_string_lossy().into_owned());

    match (old, new) {
        (Some(old), Some(new)) if old != new => Some(rename_path(&old, &new)),
        (_, Some(new)) => Some(new),
        (old, None) => old,
    }
}

/// Render a rename the way `git log --numstat` does, folding the common
/// leading and trailing directories: `src/{old.rs => new.rs}`.
pub fn rename_path(old: &str, new: &str) -> String {
    let (a, b) = (old.as_bytes(), new.as_bytes());

    let mut prefix = 0;
    for (i, (x, y)) in a.iter().zip(b).enumerate() {
        if x != y {
            break;
        }
        if *x == b'/' {
            prefix = i + 1;
        }
    }

    // Index len stands for the string terminator, equal on both sides. With
    // a common prefix the walk may step back onto its closing slash.
    let floor = prefix.saturating_sub(1);
    let mut suffix = 0;
    let (mut i, mut j) = (a.len(), b.len());
    while i >= floor && j >= floor {
        let x = a.get(i).copied().unwrap_or(0);
        let y = b.get(j).copied().unwrap_or(0);
        if x != y {
            break;
        }
        if x == b'/' {
            suffix = a.len() - i;
        }
        if i == 0 || j == 0 {
            break;
        }
        i -= 1;
        j -= 1;
    }

    if prefix + suffix == 0 {
        return format!("{} => {}", old, new);
    }

    let old_mid = a.len().saturating_sub(prefix + suffix);
    let new_mid = b.len().saturating_sub(prefix + suffix);
    format!(
        "{}{{{} => {}}}{}",
        &old[..prefix],
        &old[prefix..prefix + old_mid],
        &new[prefix..prefix + new_mid],
        &old[a.len() - suffix..]
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{window, ScratchRepo};

    fn collect(repo: &ScratchRepo, since: &str, to: &str) -> Vec<CommitEntry> {
        let extractor = LibGit2Extractor::open(repo.path(), Arc::new(AtomicBool::new(true))).unwrap();
        extractor
            .entries(window(since, to))
            .unwrap()
            .collect::<Result<_, _>>()
            .unwrap()
    }

    #[test]
    fn test_rename_path_folds_common_parts() {
        assert_eq!(rename_path("src/old.rs", "src/moved.rs"), "src/{old.rs => moved.rs}");
        assert_eq!(rename_path("a/x.rs", "b/x.rs"), "{a => b}/x.rs");
        assert_eq!(rename_path("old.txt", "new.txt"), "old.txt => new.txt");
        assert_eq!(rename_path("src/a/lib.rs", "src/b/lib.rs"), "src/{a => b}/lib.rs");
        assert_eq!(rename_path("lib.rs", "src/lib.rs"), "lib.rs => src/lib.rs");
    }

    #[test]
    fn test_counts_lines_and_binary() {
        let repo = ScratchRepo::new();
        repo.commit("Jane Doe", "2019-05-01T10:00:00Z", &[("src/main.go", "a\nb\nc\n")]);
        let second = repo.commit(
            "Jane Doe",
            "2019-05-02T10:00:00Z",
            &[("src/main.go", "a\nc\nd\ne\nf\n"), ("assets/logo.png", "PNG\0\0\x01")],
        );

        let entries = collect(&repo, "2019-05-02", "2019-05-03");
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].commit.id, second);
        assert_eq!(entries[0].commit.author, "Jane Doe");

        let main = entries[0].changes.iter().find(|c| c.path == "src/main.go").unwrap();
        assert_eq!(main.insertions, LineCount::Lines(3));
        assert_eq!(main.deletions, LineCount::Lines(1));

        let logo = entries[0].changes.iter().find(|c| c.path == "assets/logo.png").unwrap();
        assert_eq!(logo.insertions, LineCount::NotApplicable);
        assert_eq!(logo.deletions, LineCount::NotApplicable);
    }

    #[test]
    fn test_window_bounds() {
        let repo = ScratchRepo::new();
        repo.commit("A", "2019-04-30T23:59:59Z", &[("a.txt", "a\n")]);
        let inside = repo.commit("B", "2019-05-01T00:00:00Z", &[("b.txt", "b\n")]);
        repo.commit("C", "2019-06-01T00:00:00Z", &[("c.txt", "c\n")]);

        let entries = collect(&repo, "2019-05-01", "2019-06-01");
        let ids: Vec<&str> = entries.iter().map(|e| e.commit.id.as_str()).collect();
        assert_eq!(ids, vec![inside.as_str()]);
    }

    #[test]
    fn test_root_commit_reports_additions() {
        let repo = ScratchRepo::new();
        repo.commit("A", "2019-05-01T00:00:00Z", &[("a.txt", "1\n2\n")]);

        let entries = collect(&repo, "2019-01-01", "2020-01-01");
        assert_eq!(entries[0].changes.len(), 1);
        assert_eq!(entries[0].changes[0].insertions, LineCount::Lines(2));
        assert_eq!(entries[0].changes[0].deletions, LineCount::Lines(0));
    }

    #[test]
    fn test_cleared_flag_interrupts() {
        let repo = ScratchRepo::new();
        repo.commit("A", "2019-05-01T00:00:00Z", &[("a.txt", "a\n")]);
        repo.commit("B", "2019-05-02T00:00:00Z", &[("b.txt", "b\n")]);

        let flag = Arc::new(AtomicBool::new(true));
        let extractor = LibGit2Extractor::open(repo.path(), flag.clone()).unwrap();
        let mut entries = extractor.entries(window("2019-01-01", "2020-01-01")).unwrap();

        assert!(matches!(entries.next(), Some(Ok(_))));
        flag.store(false, Ordering::SeqCst);
        assert!(matches!(entries.next(), Some(Err(ExtractError::Source(SourceError::Interrupted)))));
        assert!(entries.next().is_none());
    }
}
