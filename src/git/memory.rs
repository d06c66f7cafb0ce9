use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::Local;

use crate::error::{Result, StoreError};
use crate::git::{CommitSummary, PushOutcome, RepoStatus, SyncMode, SyncOutcome, VersionControl};

const BRANCH: &str = "main";

/// In-memory stand-in for a git checkout.
///
/// Histories are linear: the local branch and the remote branch share a
/// common prefix and may each have commits of their own. A commit records a
/// snapshot of the working tree, which is what `status` diffs against.
/// Failures can be scripted to exercise the store's recovery paths.
pub struct MemoryVcs {
    work_tree: PathBuf,
    state: Mutex<MemoryState>,
}

#[derive(Clone)]
struct MemoryCommit {
    id: String,
    subject: String,
    /// Work tree paths added, changed or removed by this commit
    paths: Vec<String>,
}

#[derive(Default)]
struct MemoryState {
    local: Vec<MemoryCommit>,
    remote: Vec<MemoryCommit>,
    snapshot: BTreeMap<String, Vec<u8>>,
    next_id: u64,
    reject_pushes: usize,
    fail_pushes: usize,
    fail_commits: usize,
}

impl MemoryState {
    fn new_commit(&mut self, subject: &str, paths: Vec<String>) -> MemoryCommit {
        self.next_id += 1;
        MemoryCommit {
            id: format!("{:040x}", self.next_id),
            subject: subject.to_string(),
            paths,
        }
    }

    fn common_len(&self) -> usize {
        self.local.iter()
            .zip(self.remote.iter())
            .take_while(|(l, r)| l.id == r.id)
            .count()
    }

    fn head(&self) -> Option<String> {
        self.local.last().map(|c| c.id.clone())
    }
}

impl MemoryVcs {
    /// Everything already in `work_tree` counts as committed.
    pub fn new(work_tree: &Path) -> Self {
        let snapshot = scan(work_tree).unwrap_or_default();
        MemoryVcs {
            work_tree: work_tree.to_path_buf(),
            state: Mutex::new(MemoryState {
                snapshot,
                ..Default::default()
            }),
        }
    }

    /// Simulates another instance pushing a commit.
    pub fn advance_remote(&self, subject: &str) {
        let mut state = self.state();
        let commit = state.new_commit(subject, vec![]);
        state.remote.push(commit);
    }

    /// The next `count` pushes are refused as non fast-forward.
    pub fn reject_next_pushes(&self, count: usize) {
        self.state().reject_pushes = count;
    }

    /// The next `count` pushes fail like an unreachable remote.
    pub fn fail_next_pushes(&self, count: usize) {
        self.state().fail_pushes = count;
    }

    pub fn fail_next_commits(&self, count: usize) {
        self.state().fail_commits = count;
    }

    pub fn remote_len(&self) -> usize {
        self.state().remote.len()
    }

    pub fn local_len(&self) -> usize {
        self.state().local.len()
    }

    fn state(&self) -> MutexGuard<'_, MemoryState> {
        // A panicking test thread must not wedge the other ones
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl VersionControl for MemoryVcs {
    async fn status(&self) -> Result<RepoStatus> {
        let current = scan(&self.work_tree).map_err(|e| StoreError::io(&self.work_tree, e))?;
        let state = self.state();

        let mut changes = vec![];
        for (path, content) in current.iter() {
            match state.snapshot.get(path) {
                None => changes.push(format!("?? {}", path)),
                Some(old) if old != content => changes.push(format!(" M {}", path)),
                _ => {}
            }
        }
        for path in state.snapshot.keys() {
            if !current.contains_key(path) {
                changes.push(format!(" D {}", path));
            }
        }

        let common = state.common_len();
        Ok(RepoStatus {
            branch: Some(BRANCH.to_string()),
            upstream: Some(format!("origin/{}", BRANCH)),
            ahead: (state.local.len() - common) as u32,
            behind: (state.remote.len() - common) as u32,
            clean: changes.is_empty(),
            changes,
        })
    }

    async fn sync_from_remote(&self, mode: SyncMode) -> Result<SyncOutcome> {
        let mut state = self.state();
        let common = state.common_len();
        let before = state.head();

        if common == state.local.len() {
            state.local = state.remote.clone();
        } else if common < state.remote.len() {
            if mode == SyncMode::FastForward {
                return Err(StoreError::GitConflict {
                    command: "merge --ff-only".to_string(),
                    detail: "local and remote branches have diverged".to_string(),
                });
            }
            let unpushed: Vec<MemoryCommit> = state.local[common..].to_vec();
            let mut rebased = state.remote.clone();
            for commit in unpushed {
                let replayed = state.new_commit(&commit.subject, commit.paths);
                rebased.push(replayed);
            }
            state.local = rebased;
        }

        let head = state.head();
        Ok(SyncOutcome {
            advanced: head != before,
            head,
        })
    }

    async fn commit(&self, message: &str) -> Result<Option<String>> {
        let current = scan(&self.work_tree).map_err(|e| StoreError::io(&self.work_tree, e))?;
        let mut state = self.state();

        if state.fail_commits > 0 {
            state.fail_commits -= 1;
            return Err(StoreError::GitOperationFailed {
                command: "git commit".to_string(),
                status: Some(1),
                stderr: "simulated commit failure".to_string(),
            });
        }

        if current == state.snapshot {
            return Ok(None);
        }

        let paths: Vec<String> = current.keys()
            .chain(state.snapshot.keys())
            .filter(|path| current.get(*path) != state.snapshot.get(*path))
            .cloned()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        let subject = message.lines().next().unwrap_or("").to_string();
        let commit = state.new_commit(&subject, paths);
        let id = commit.id.clone();
        state.local.push(commit);
        state.snapshot = current;
        Ok(Some(id))
    }

    async fn push(&self) -> Result<PushOutcome> {
        let mut state = self.state();

        if state.fail_pushes > 0 {
            state.fail_pushes -= 1;
            return Err(StoreError::GitOperationFailed {
                command: "git push".to_string(),
                status: Some(128),
                stderr: "simulated network failure".to_string(),
            });
        }
        if state.reject_pushes > 0 {
            state.reject_pushes -= 1;
            return Ok(PushOutcome::Rejected("! [rejected] main -> main (fetch first)".to_string()));
        }

        if state.common_len() < state.remote.len() {
            return Ok(PushOutcome::Rejected("! [rejected] main -> main (non-fast-forward)".to_string()));
        }
        state.remote = state.local.clone();
        Ok(PushOutcome::Pushed)
    }

    async fn recent_commits(&self, limit: usize) -> Result<Vec<CommitSummary>> {
        let state = self.state();
        let now = Local::now().fixed_offset();
        Ok(state.local.iter()
            .rev()
            .take(limit)
            .map(|c| CommitSummary {
                id: c.id.clone(),
                short_id: c.id[c.id.len() - 7..].to_string(),
                subject: c.subject.clone(),
                author: "memory".to_string(),
                date: now,
            })
            .collect())
    }

    async fn unpushed_paths(&self) -> Result<Vec<String>> {
        let state = self.state();
        let paths: BTreeSet<String> = state.local[state.common_len()..].iter()
            .flat_map(|c| c.paths.iter().cloned())
            .collect();
        Ok(paths.into_iter().collect())
    }
}

fn scan(root: &Path) -> io::Result<BTreeMap<String, Vec<u8>>> {
    let mut files = BTreeMap::new();
    if root.exists() {
        scan_dir(root, root, &mut files)?;
    }
    Ok(files)
}

fn scan_dir(root: &Path, dir: &Path, files: &mut BTreeMap<String, Vec<u8>>) -> io::Result<()> {
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let file_type = entry.file_type()?;
        let path = entry.path();
        if entry.file_name() == ".git" {
            continue;
        }
        if file_type.is_dir() {
            scan_dir(root, &path, files)?;
        } else if file_type.is_file() {
            let relative = path.strip_prefix(root)
                .map(|p| p.to_string_lossy().replace('\\', "/"))
                .unwrap_or_default();
            files.insert(relative, fs::read(&path)?);
        }
    }
    Ok(())
}
