use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, FixedOffset};
use serde::Serialize;
use spdlog::{debug, info, warn};

use crate::error::{Result, StoreError};
use crate::lock::{RepoLock, RepoLockGuard};

pub mod cli;
pub mod memory;

pub use cli::GitCli;
pub use memory::MemoryVcs;

#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct RepoStatus {
    pub branch: Option<String>,
    pub upstream: Option<String>,
    pub ahead: u32,
    pub behind: u32,
    /// Porcelain lines of changed or untracked paths, e.g. `?? content/ko/post/x.md`
    pub changes: Vec<String>,
    pub clean: bool,
}

impl RepoStatus {
    /// Whether `path` (relative to the working tree) shows up as changed.
    pub fn is_changed(&self, path: &str) -> bool {
        self.changes.iter().any(|line| {
            let changed = line.get(3..).unwrap_or(line.as_str());
            changed == path || changed.ends_with(&format!(" -> {}", path)) || path.starts_with(changed) && changed.ends_with('/')
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CommitSummary {
    pub id: String,
    pub short_id: String,
    pub subject: String,
    pub author: String,
    pub date: DateTime<FixedOffset>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SyncOutcome {
    /// True when new commits were pulled into the local branch
    pub advanced: bool,
    pub head: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CommitOutcome {
    /// None when the working tree had nothing to commit
    pub commit: Option<String>,
    pub pushed: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncMode {
    /// Only fast-forward; a diverged history is a `GitConflict`
    FastForward,
    /// Replay unpushed local commits on top of the remote branch
    Rebase,
}

#[derive(Debug, Clone, PartialEq)]
pub enum PushOutcome {
    Pushed,
    /// The remote refused a non fast-forward update
    Rejected(String),
}

/// Version control primitives run against one working tree.
///
/// Implementations do no locking of their own; [`GitBackend`] only calls
/// them through a [`GitSession`], i.e. while the repository lock is held.
#[async_trait]
pub trait VersionControl: Send + Sync {
    async fn status(&self) -> Result<RepoStatus>;

    async fn sync_from_remote(&self, mode: SyncMode) -> Result<SyncOutcome>;

    /// Stages every change of the working tree and commits it.
    async fn commit(&self, message: &str) -> Result<Option<String>>;

    async fn push(&self) -> Result<PushOutcome>;

    async fn recent_commits(&self, limit: usize) -> Result<Vec<CommitSummary>>;

    /// Paths touched by local commits the remote branch does not have yet.
    async fn unpushed_paths(&self) -> Result<Vec<String>>;
}

/// Serializes every version control call behind the repository lock.
pub struct GitBackend<V> {
    vcs: V,
    lock: RepoLock,
    lock_timeout: Duration,
}

impl<V: VersionControl> GitBackend<V> {
    pub fn new(vcs: V, lock: RepoLock, lock_timeout: Duration) -> Self {
        GitBackend {
            vcs,
            lock,
            lock_timeout,
        }
    }

    pub fn vcs(&self) -> &V {
        &self.vcs
    }

    pub fn lock(&self) -> &RepoLock {
        &self.lock
    }

    /// Takes the repository lock for a sequence of calls. The lock is
    /// released when the session is dropped.
    pub async fn session(&self) -> Result<GitSession<'_, V>> {
        let guard = self.lock.acquire(self.lock_timeout).await?;
        Ok(GitSession {
            vcs: &self.vcs,
            _guard: guard,
        })
    }

    pub async fn status(&self) -> Result<RepoStatus> {
        self.session().await?.status().await
    }

    pub async fn sync_from_remote(&self) -> Result<SyncOutcome> {
        self.session().await?.sync_from_remote().await
    }

    pub async fn commit_and_push(&self, message: &str) -> Result<CommitOutcome> {
        self.session().await?.commit_and_push(message).await
    }

    pub async fn recent_commits(&self, limit: usize) -> Result<Vec<CommitSummary>> {
        self.session().await?.recent_commits(limit).await
    }
}

pub struct GitSession<'a, V> {
    vcs: &'a V,
    _guard: RepoLockGuard,
}

impl<V: VersionControl> GitSession<'_, V> {
    pub async fn status(&self) -> Result<RepoStatus> {
        self.vcs.status().await
    }

    pub async fn sync_from_remote(&self) -> Result<SyncOutcome> {
        let outcome = self.vcs.sync_from_remote(SyncMode::FastForward).await?;
        if outcome.advanced {
            info!("Pulled new commits, head is now {}", outcome.head.as_deref().unwrap_or("-"));
        }
        Ok(outcome)
    }

    pub async fn commit(&self, message: &str) -> Result<Option<String>> {
        let commit = self.vcs.commit(message).await?;
        match commit {
            Some(ref id) => debug!("Committed {}: {}", id, first_line(message)),
            None => debug!("Nothing to commit for: {}", first_line(message)),
        }
        Ok(commit)
    }

    /// Pushes, resyncing and retrying exactly once when the remote moved.
    /// A second refusal is a `GitConflict`; the local commit stays.
    pub async fn push(&self) -> Result<()> {
        let detail = match self.vcs.push().await? {
            PushOutcome::Pushed => return Ok(()),
            PushOutcome::Rejected(detail) => detail,
        };

        warn!("Push rejected, resyncing with remote before retrying: {}", detail.trim());
        if let Err(e) = self.vcs.sync_from_remote(SyncMode::Rebase).await {
            return Err(match e {
                StoreError::GitConflict { .. } => e,
                other => StoreError::GitConflict {
                    command: "resync before push retry".to_string(),
                    detail: other.to_string(),
                },
            });
        }

        match self.vcs.push().await {
            Ok(PushOutcome::Pushed) => {
                info!("Push succeeded after resync");
                Ok(())
            }
            Ok(PushOutcome::Rejected(detail)) => Err(StoreError::GitConflict {
                command: "push retry".to_string(),
                detail,
            }),
            Err(e) => Err(StoreError::GitConflict {
                command: "push retry".to_string(),
                detail: e.to_string(),
            }),
        }
    }

    pub async fn commit_and_push(&self, message: &str) -> Result<CommitOutcome> {
        let commit = self.commit(message).await?;
        self.push().await?;
        Ok(CommitOutcome { commit, pushed: true })
    }

    pub async fn recent_commits(&self, limit: usize) -> Result<Vec<CommitSummary>> {
        self.vcs.recent_commits(limit).await
    }

    pub async fn unpushed_paths(&self) -> Result<Vec<String>> {
        self.vcs.unpushed_paths().await
    }
}

fn first_line(message: &str) -> &str {
    message.lines().next().unwrap_or("")
}
