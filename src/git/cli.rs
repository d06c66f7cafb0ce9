use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::process::{Output, Stdio};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Local};
use lazy_static::lazy_static;
use regex::Regex;
use spdlog::{debug, info, warn};
use tokio::process::Command;

use crate::error::{Result, StoreError};
use crate::git::{CommitSummary, PushOutcome, RepoStatus, SyncMode, SyncOutcome, VersionControl};

pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(60);

const FIELD_SEP: char = '\u{1f}';

lazy_static! {
    static ref BRANCH_REGEX: Regex = Regex::new(
        r"^## (?:No commits yet on |Initial commit on )?(?P<branch>[^.\s]+(?:\.[^.\s]+)*?)(?:\.\.\.(?P<upstream>\S+))?(?: \[(?P<track>[^\]]+)\])?$"
    ).unwrap();
    static ref AHEAD_REGEX: Regex = Regex::new(r"ahead (\d+)").unwrap();
    static ref BEHIND_REGEX: Regex = Regex::new(r"behind (\d+)").unwrap();
}

/// Runs the `git` executable inside the working tree.
#[derive(Debug, Clone)]
pub struct GitCli {
    work_tree: PathBuf,
    binary: String,
    remote: String,
    branch: String,
    author_name: String,
    author_email: String,
    timeout: Duration,
}

impl GitCli {
    pub fn new(work_tree: &Path) -> Self {
        GitCli {
            work_tree: work_tree.to_path_buf(),
            binary: "git".to_string(),
            remote: "origin".to_string(),
            branch: "main".to_string(),
            author_name: "Blog API".to_string(),
            author_email: "blog-api@localhost".to_string(),
            timeout: DEFAULT_COMMAND_TIMEOUT,
        }
    }

    pub fn binary(mut self, binary: &str) -> Self {
        self.binary = binary.to_string();
        self
    }

    pub fn remote(mut self, remote: &str, branch: &str) -> Self {
        self.remote = remote.to_string();
        self.branch = branch.to_string();
        self
    }

    pub fn author(mut self, name: &str, email: &str) -> Self {
        self.author_name = name.to_string();
        self.author_email = email.to_string();
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn work_tree(&self) -> &Path {
        &self.work_tree
    }

    fn remote_ref(&self) -> String {
        format!("{}/{}", self.remote, self.branch)
    }

    /// Clones `url` into the working tree path when no checkout exists yet.
    /// Returns true when a clone happened.
    pub async fn ensure_checkout(&self, url: &str) -> Result<bool> {
        if self.work_tree.join(".git").exists() {
            return Ok(false);
        }

        let parent = self.work_tree.parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or(Path::new("."));
        std::fs::create_dir_all(parent).map_err(|e| StoreError::io(parent, e))?;

        // Cloning runs inside the parent, so only the last component is the target
        let target = self.work_tree.file_name()
            .map(|f| f.to_string_lossy().to_string())
            .ok_or_else(|| StoreError::Validation(format!("cannot clone into {}", self.work_tree.display())))?;
        let args = ["clone", "--quiet", "--branch", self.branch.as_str(), url, target.as_str()];
        let output = self.spawn(parent, &args, self.timeout * 2).await?;
        check(&self.describe(&args), output)?;
        info!("Cloned {} into {}", url, self.work_tree.display());
        Ok(true)
    }

    async fn spawn(&self, dir: &Path, args: &[&str], timeout: Duration) -> Result<Output> {
        let command = self.describe(args);
        debug!("Running {}", command);

        let child = Command::new(&self.binary)
            .args(args)
            .current_dir(dir)
            .env("GIT_TERMINAL_PROMPT", "0")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| StoreError::GitOperationFailed {
                command: command.clone(),
                status: None,
                stderr: format!("cannot start {}: {}", self.binary, e),
            })?;

        // Dropping the future on timeout kills the child
        match tokio::time::timeout(timeout, child.wait_with_output()).await {
            Ok(Ok(output)) => Ok(output),
            Ok(Err(e)) => Err(StoreError::GitOperationFailed {
                command,
                status: None,
                stderr: e.to_string(),
            }),
            Err(_) => {
                warn!("{} timed out after {}s", command, timeout.as_secs());
                Err(StoreError::GitOperationFailed {
                    command,
                    status: None,
                    stderr: format!("timed out after {}s", timeout.as_secs()),
                })
            }
        }
    }

    /// Runs git and returns its output whatever the exit code.
    async fn run(&self, args: &[&str]) -> Result<Output> {
        self.spawn(&self.work_tree, args, self.timeout).await
    }

    /// Runs git and turns a non-zero exit into `GitOperationFailed`.
    async fn run_checked(&self, args: &[&str]) -> Result<String> {
        let output = self.run(args).await?;
        check(&self.describe(args), output)
    }

    fn describe(&self, args: &[&str]) -> String {
        format!("{} {}", self.binary, args.join(" "))
    }

    async fn head(&self) -> Result<Option<String>> {
        self.rev_parse("HEAD").await
    }

    async fn rev_parse(&self, rev: &str) -> Result<Option<String>> {
        let output = self.run(&["rev-parse", "--verify", "--quiet", rev]).await?;
        if output.status.success() {
            Ok(Some(String::from_utf8_lossy(&output.stdout).trim().to_string()))
        } else {
            Ok(None)
        }
    }

    async fn is_ancestor(&self, ancestor: &str, descendant: &str) -> Result<bool> {
        let args = ["merge-base", "--is-ancestor", ancestor, descendant];
        let output = self.run(&args).await?;
        match output.status.code() {
            Some(0) => Ok(true),
            Some(1) => Ok(false),
            _ => Err(failure(&self.describe(&args), &output)),
        }
    }

    async fn rebase_onto(&self, upstream: &str) -> Result<()> {
        let name = format!("user.name={}", self.author_name);
        let email = format!("user.email={}", self.author_email);
        let args = ["-c", name.as_str(), "-c", email.as_str(), "rebase", "--quiet", upstream];

        let output = self.run(&args).await?;
        if output.status.success() {
            return Ok(());
        }

        let detail = String::from_utf8_lossy(&output.stderr).trim().to_string();
        if let Err(e) = self.run_checked(&["rebase", "--abort"]).await {
            warn!("Could not abort rebase: {}", e);
        }
        Err(StoreError::GitConflict {
            command: self.describe(&args),
            detail,
        })
    }
}

#[async_trait]
impl VersionControl for GitCli {
    async fn status(&self) -> Result<RepoStatus> {
        let stdout = self.run_checked(&["status", "--porcelain=v1", "--branch", "--untracked-files=all"]).await?;
        Ok(parse_status(&stdout))
    }

    async fn sync_from_remote(&self, mode: SyncMode) -> Result<SyncOutcome> {
        let before = self.head().await?;
        self.run_checked(&["fetch", "--quiet", self.remote.as_str(), self.branch.as_str()]).await?;

        let remote_ref = self.remote_ref();
        let Some(remote_head) = self.rev_parse(&format!("refs/remotes/{}", remote_ref)).await? else {
            // Nothing was ever pushed to the remote branch
            return Ok(SyncOutcome { advanced: false, head: before });
        };

        let fast_forward = match before {
            None => true,
            Some(ref local) => self.is_ancestor(local, &remote_head).await?,
        };

        if fast_forward {
            self.run_checked(&["merge", "--ff-only", "--quiet", remote_ref.as_str()]).await?;
        } else if !self.is_ancestor(&remote_head, "HEAD").await? {
            match mode {
                SyncMode::FastForward => {
                    return Err(StoreError::GitConflict {
                        command: format!("{} merge --ff-only {}", self.binary, remote_ref),
                        detail: format!("local {} and {} have diverged", self.branch, remote_ref),
                    });
                }
                SyncMode::Rebase => self.rebase_onto(&remote_ref).await?,
            }
        }

        let head = self.head().await?;
        Ok(SyncOutcome {
            advanced: head != before,
            head,
        })
    }

    async fn commit(&self, message: &str) -> Result<Option<String>> {
        self.run_checked(&["add", "--all"]).await?;

        let staged = self.run(&["diff", "--cached", "--quiet"]).await?;
        match staged.status.code() {
            Some(0) => return Ok(None),
            Some(1) => {}
            _ => return Err(failure(&self.describe(&["diff", "--cached", "--quiet"]), &staged)),
        }

        let name = format!("user.name={}", self.author_name);
        let email = format!("user.email={}", self.author_email);
        let args = ["-c", name.as_str(), "-c", email.as_str(), "commit", "--quiet", "-m", message];
        if let Err(e) = self.run_checked(&args).await {
            // Leave the index as it was so a rolled back file is not committed later
            if let Err(reset) = self.run_checked(&["reset", "--quiet"]).await {
                warn!("Could not unstage after failed commit: {}", reset);
            }
            return Err(e);
        }

        self.head().await
    }

    async fn push(&self) -> Result<PushOutcome> {
        let refspec = format!("HEAD:refs/heads/{}", self.branch);
        let args = ["push", "--porcelain", self.remote.as_str(), refspec.as_str()];
        let output = self.run(&args).await?;
        if output.status.success() {
            return Ok(PushOutcome::Pushed);
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        if is_rejection(&stdout) || is_rejection(&stderr) {
            Ok(PushOutcome::Rejected(format!("{}{}", stdout, stderr).trim().to_string()))
        } else {
            Err(failure(&self.describe(&args), &output))
        }
    }

    async fn recent_commits(&self, limit: usize) -> Result<Vec<CommitSummary>> {
        if self.head().await?.is_none() {
            return Ok(vec![]);
        }

        let format = format!("--format=%H{0}%h{0}%s{0}%an{0}%cI", FIELD_SEP);
        let count = format!("--max-count={}", limit);
        let stdout = self.run_checked(&["log", count.as_str(), format.as_str()]).await?;
        Ok(stdout.lines().filter_map(parse_commit_line).collect())
    }

    async fn unpushed_paths(&self) -> Result<Vec<String>> {
        if self.head().await?.is_none() {
            return Ok(vec![]);
        }

        // Without a remote branch every local commit is unpushed
        let remote_ref = format!("refs/remotes/{}", self.remote_ref());
        let range = match self.rev_parse(&remote_ref).await? {
            Some(_) => format!("{}..HEAD", remote_ref),
            None => "HEAD".to_string(),
        };
        let stdout = self.run_checked(&["log", "--name-only", "--no-renames", "--format=", range.as_str()]).await?;
        Ok(parse_name_list(&stdout))
    }
}

fn check(command: &str, output: Output) -> Result<String> {
    if output.status.success() {
        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    } else {
        Err(failure(command, &output))
    }
}

fn failure(command: &str, output: &Output) -> StoreError {
    let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
    let stderr = if stderr.is_empty() {
        String::from_utf8_lossy(&output.stdout).trim().to_string()
    } else {
        stderr
    };
    StoreError::GitOperationFailed {
        command: command.to_string(),
        status: output.status.code(),
        stderr,
    }
}

fn is_rejection(text: &str) -> bool {
    text.contains("[rejected]") || text.contains("non-fast-forward") || text.contains("fetch first")
}

fn parse_commit_line(line: &str) -> Option<CommitSummary> {
    let mut fields = line.split(FIELD_SEP);
    let id = fields.next()?.to_string();
    let short_id = fields.next()?.to_string();
    let subject = fields.next()?.to_string();
    let author = fields.next()?.to_string();
    let date = fields.next()
        .and_then(|d| DateTime::parse_from_rfc3339(d.trim()).ok())
        .unwrap_or_else(|| Local::now().fixed_offset());
    Some(CommitSummary {
        id,
        short_id,
        subject,
        author,
        date,
    })
}

fn parse_name_list(stdout: &str) -> Vec<String> {
    let paths: BTreeSet<String> = stdout.lines()
        .map(|l| l.trim())
        .filter(|l| !l.is_empty())
        .map(|l| l.to_string())
        .collect();
    paths.into_iter().collect()
}

pub(crate) fn parse_status(stdout: &str) -> RepoStatus {
    let mut status = RepoStatus::default();

    for line in stdout.lines() {
        if line.starts_with("## ") {
            if line.starts_with("## HEAD (no branch)") {
                continue;
            }
            if let Some(caps) = BRANCH_REGEX.captures(line) {
                status.branch = caps.name("branch").map(|m| m.as_str().to_string());
                status.upstream = caps.name("upstream").map(|m| m.as_str().to_string());
                if let Some(track) = caps.name("track") {
                    let track = track.as_str();
                    status.ahead = capture_count(&AHEAD_REGEX, track);
                    status.behind = capture_count(&BEHIND_REGEX, track);
                }
            }
        } else if !line.is_empty() {
            status.changes.push(line.to_string());
        }
    }

    status.clean = status.changes.is_empty();
    status
}

fn capture_count(regex: &Regex, text: &str) -> u32 {
    regex.captures(text)
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse().ok())
        .unwrap_or(0)
}
