//! Atomic post transactions over the working tree and its git history.
//!
//! Every mutation runs under one repository lock session:
//! `Idle -> Locking -> Mutating -> Committing -> Pushing -> Done`.
//!
//! When the commit fails the file change is undone, so the tree is back to
//! where it was. When the push fails after a commit, the file and the local
//! commit stay; the next push carries it, or `sync` reports the divergence.

use std::fmt::{self, Display, Formatter};
use std::path::PathBuf;

use chrono::{DateTime, FixedOffset, Local, SubsecRound, Utc};
use serde::Serialize;
use spdlog::{debug, error, info, warn};
use toml::Table;

use crate::config::Config;
use crate::error::{Result, StoreError};
use crate::git::{CommitSummary, GitBackend, GitCli, GitSession, RepoStatus, SyncOutcome, VersionControl};
use crate::lock::RepoLock;
use crate::post::{validate_title, Language, Metadata, NewPost, Post, PostPatch, RESERVED_KEYS};
use crate::repository::{ListFilter, PostPage, PostRepository, SearchHit, TranslationStatus};
use crate::text_utils::{slug_from_title, validate_file_name};

const COMMITTER: &str = "Blog API";

/// What new posts get when the caller leaves a field out.
#[derive(Debug, Clone)]
pub struct PostDefaults {
    pub categories: Vec<String>,
    pub front_matter: Table,
    pub timezone: FixedOffset,
}

impl PostDefaults {
    pub fn from_config(config: &Config) -> Result<Self> {
        let timezone = config.content.timezone().map_err(|e| StoreError::Validation(e.to_string()))?;
        Ok(PostDefaults {
            categories: config.content.default_categories.clone(),
            front_matter: config.content.front_matter.clone(),
            timezone,
        })
    }
}

/// Result of a successful mutation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Receipt {
    pub filename: String,
    pub language: Language,
    pub path: PathBuf,
    /// None when the change produced no diff
    pub commit: Option<String>,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum TxState {
    Locking,
    Mutating,
    Committing,
    Pushing,
    Done,
    Idle,
}

impl Display for TxState {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let name = match self {
            TxState::Locking => "locking",
            TxState::Mutating => "mutating",
            TxState::Committing => "committing",
            TxState::Pushing => "pushing",
            TxState::Done => "done",
            TxState::Idle => "idle",
        };
        write!(f, "{}", name)
    }
}

fn trace(op: &str, target: &str, state: TxState) {
    debug!("[{}] {} -> {}", op, target, state);
}

pub struct ContentStore<V = GitCli> {
    repository: PostRepository,
    git: GitBackend<V>,
    defaults: PostDefaults,
}

impl ContentStore<GitCli> {
    /// Builds the store described by `config`, cloning the repository first
    /// when the working tree is missing and a URL is configured.
    pub async fn open(config: &Config) -> Result<Self> {
        let repo = &config.repository;
        let cli = GitCli::new(&repo.path)
            .binary(&config.git.binary)
            .remote(&repo.remote, &repo.branch)
            .author(&config.git.author_name(), &config.git.author_email)
            .timeout(config.git.command_timeout());
        let git = GitBackend::new(cli, RepoLock::new(config.lock.path()), config.lock.timeout());

        if let Some(ref url) = repo.url {
            let _session = git.session().await?;
            git.vcs().ensure_checkout(url).await?;
        } else if !repo.path.is_dir() {
            return Err(StoreError::Validation(format!(
                "repository {} does not exist and no url is configured", repo.path.display())));
        }

        let defaults = PostDefaults::from_config(config)?;
        let repository = PostRepository::new(&repo.path, &repo.content_dir, defaults.timezone);
        info!("Content store ready at {}", repo.path.display());
        Ok(ContentStore::new(repository, git, defaults))
    }
}

impl<V: VersionControl> ContentStore<V> {
    pub fn new(repository: PostRepository, git: GitBackend<V>, defaults: PostDefaults) -> Self {
        ContentStore {
            repository,
            git,
            defaults,
        }
    }

    pub fn repository(&self) -> &PostRepository {
        &self.repository
    }

    pub fn git(&self) -> &GitBackend<V> {
        &self.git
    }

    pub async fn create(&self, new_post: NewPost) -> Result<Receipt> {
        const OP: &str = "create";
        validate_title(&new_post.title)?;
        check_extra(&new_post.extra)?;
        if let Some(ref filename) = new_post.filename {
            validate_file_name(filename)?;
        }
        let language = new_post.language;

        trace(OP, &new_post.title, TxState::Locking);
        let session = self.git.session().await?;

        trace(OP, &new_post.title, TxState::Mutating);
        self.repository.remove_stale_temp_files()?;
        let date = new_post.date.unwrap_or_else(|| Utc::now().with_timezone(&self.defaults.timezone)).trunc_subsecs(0);
        let filename = match new_post.filename {
            Some(filename) => {
                if self.repository.exists(&filename, language)? {
                    return Err(StoreError::Conflict {
                        filename,
                        reason: format!("a post with this name already exists in {}", language),
                    });
                }
                filename
            }
            None => {
                self.check_leftovers(&session, &new_post.title, date, language).await?;
                self.repository.next_filename(&new_post.title, date.date_naive(), language)?
            }
        };

        let mut metadata = Metadata::new(date);
        metadata.draft = new_post.draft;
        metadata.tags = new_post.tags;
        metadata.categories = new_post.categories.unwrap_or_else(|| self.defaults.categories.clone());
        for (key, value) in self.defaults.front_matter.iter().chain(new_post.extra.iter()) {
            metadata.set_extra(key, value.clone());
        }

        let post = Post {
            filename,
            language,
            title: new_post.title,
            body: new_post.body,
            metadata,
        };
        post.validate()?;

        let path = self.repository.write(&post)?;
        let message = commit_message("Add post", &post.filename);
        let commit = self.finish(OP, &session, &post.filename, language, None, &message).await?;

        info!("Created {}/{}", language, post.filename);
        Ok(Receipt {
            filename: post.filename,
            language,
            path,
            commit,
            message,
        })
    }

    pub async fn update(&self, filename: &str, language: Option<Language>, patch: PostPatch) -> Result<Receipt> {
        const OP: &str = "update";
        validate_file_name(filename)?;
        check_extra(&patch.extra)?;
        if let Some(ref title) = patch.title {
            validate_title(title)?;
        }

        trace(OP, filename, TxState::Locking);
        let session = self.git.session().await?;

        trace(OP, filename, TxState::Mutating);
        self.repository.remove_stale_temp_files()?;
        let mut post = self.repository.get(filename, language)?;
        let language = post.language;
        let previous = self.repository.read_raw(filename, language)?;

        post.apply(patch);
        post.metadata.date = post.metadata.date.trunc_subsecs(0);
        post.validate()?;

        let path = self.repository.write(&post)?;
        let message = commit_message("Update post", filename);
        let commit = self.finish(OP, &session, filename, language, previous, &message).await?;

        info!("Updated {}/{}", language, filename);
        Ok(Receipt {
            filename: filename.to_string(),
            language,
            path,
            commit,
            message,
        })
    }

    pub async fn delete(&self, filename: &str, language: Option<Language>) -> Result<Receipt> {
        const OP: &str = "delete";
        validate_file_name(filename)?;

        trace(OP, filename, TxState::Locking);
        let session = self.git.session().await?;

        trace(OP, filename, TxState::Mutating);
        self.repository.remove_stale_temp_files()?;
        let language = self.repository.locate(filename, language)?;
        let previous = self.repository.read_raw(filename, language)?;
        let path = self.repository.delete(filename, language)?;

        let message = commit_message("Delete post", filename);
        let commit = self.finish(OP, &session, filename, language, previous, &message).await?;

        info!("Deleted {}/{}", language, filename);
        Ok(Receipt {
            filename: filename.to_string(),
            language,
            path,
            commit,
            message,
        })
    }

    /// Fast-forwards the working tree to the remote branch.
    pub async fn sync(&self) -> Result<SyncOutcome> {
        const OP: &str = "sync";
        let target = self.repository.root().display().to_string();

        trace(OP, &target, TxState::Locking);
        let session = self.git.session().await?;
        let outcome = session.sync_from_remote().await;
        trace(OP, &target, if outcome.is_ok() { TxState::Done } else { TxState::Idle });
        outcome
    }

    pub fn list(&self, filter: &ListFilter) -> Result<PostPage> {
        self.repository.list(filter)
    }

    pub fn get(&self, filename: &str, language: Option<Language>) -> Result<Post> {
        self.repository.get(filename, language)
    }

    pub fn search(&self, query: &str, language: Option<Language>) -> Result<Vec<SearchHit>> {
        self.repository.search(query, language)
    }

    pub fn translation_status(&self, source: Language, target: Language) -> Result<TranslationStatus> {
        self.repository.translation_status(source, target)
    }

    pub async fn status(&self) -> Result<RepoStatus> {
        self.git.status().await
    }

    pub async fn recent_commits(&self, limit: usize) -> Result<Vec<CommitSummary>> {
        self.git.recent_commits(limit).await
    }

    /// A generated name for `title` on `date` that is uncommitted, or only
    /// in commits the remote does not have yet, was left behind by an
    /// earlier transaction whose commit or push failed.
    async fn check_leftovers(&self, session: &GitSession<'_, V>, title: &str, date: DateTime<FixedOffset>, language: Language) -> Result<()> {
        let candidates = self.repository.same_slug_files(date.date_naive(), &slug_from_title(title), language)?;
        if candidates.is_empty() {
            return Ok(());
        }

        let status = session.status().await?;
        if let Some(filename) = candidates.iter().find(|f| status.is_changed(&self.repository.relative_path(f, language))) {
            return Err(StoreError::Conflict {
                filename: filename.clone(),
                reason: "uncommitted file with the same date and slug, left by an earlier failed write".to_string(),
            });
        }

        let unpushed = session.unpushed_paths().await?;
        match candidates.into_iter().find(|f| unpushed.contains(&self.repository.relative_path(f, language))) {
            Some(filename) => Err(StoreError::Conflict {
                filename,
                reason: "committed locally but not pushed yet; sync or retry the push instead of creating it again".to_string(),
            }),
            None => Ok(()),
        }
    }

    /// Commits and pushes the change to `filename`. A failed commit puts the
    /// file back to `previous`.
    async fn finish(&self, op: &str, session: &GitSession<'_, V>, filename: &str, language: Language,
                    previous: Option<Vec<u8>>, message: &str) -> Result<Option<String>> {
        trace(op, filename, TxState::Committing);
        let commit = match session.commit(message).await {
            Ok(commit) => commit,
            Err(e) => {
                warn!("[{}] Commit of {} failed, rolling back: {}", op, filename, e);
                if let Err(rollback) = self.repository.restore(filename, language, previous.as_deref()) {
                    error!("[{}] Rollback of {} failed: {}", op, filename, rollback);
                }
                trace(op, filename, TxState::Idle);
                return Err(e);
            }
        };

        trace(op, filename, TxState::Pushing);
        if let Err(e) = session.push().await {
            warn!("[{}] Push of {} failed, local commit kept: {}", op, filename, e);
            trace(op, filename, TxState::Idle);
            return Err(e);
        }

        trace(op, filename, TxState::Done);
        Ok(commit)
    }
}

fn check_extra(extra: &Table) -> Result<()> {
    match extra.keys().find(|k| RESERVED_KEYS.contains(&k.as_str())) {
        Some(key) => Err(StoreError::Validation(format!("{} has a dedicated field and cannot be set as extra front matter", key))),
        None => Ok(()),
    }
}

fn commit_message(action: &str, filename: &str) -> String {
    format!("{}: {}\n\nCommitted by {} at {}", action, filename, COMMITTER, Local::now().format("%Y-%m-%d %H:%M:%S"))
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::path::Path;
    use std::sync::Arc;
    use std::time::Duration;

    use tempfile::TempDir;
    use toml::Value;

    use crate::git::MemoryVcs;
    use crate::repository::DEFAULT_CONTENT_DIR;

    use super::*;

    fn date() -> DateTime<FixedOffset> {
        DateTime::parse_from_rfc3339("2024-02-28T10:00:00+09:00").unwrap()
    }

    fn defaults() -> PostDefaults {
        let mut front_matter = Table::new();
        front_matter.insert("ShowToc".to_string(), Value::Boolean(true));
        front_matter.insert("TocOpen".to_string(), Value::Boolean(true));
        PostDefaults {
            categories: vec!["Development".to_string()],
            front_matter,
            timezone: FixedOffset::east_opt(9 * 3600).unwrap(),
        }
    }

    fn store(temp: &TempDir) -> ContentStore<MemoryVcs> {
        let root = temp.path().join("repo");
        fs::create_dir_all(&root).unwrap();
        let repository = PostRepository::new(&root, Path::new(DEFAULT_CONTENT_DIR), defaults().timezone);
        let git = GitBackend::new(MemoryVcs::new(&root), RepoLock::new(temp.path().join("git.lock")), Duration::from_secs(5));
        ContentStore::new(repository, git, defaults())
    }

    fn hello_world() -> NewPost {
        NewPost {
            date: Some(date()),
            ..NewPost::new("Hello World", "Body", Language::Ko)
        }
    }

    #[tokio::test]
    async fn test_create_hello_world() {
        let temp = TempDir::new().unwrap();
        let store = store(&temp);

        let receipt = store.create(hello_world()).await.unwrap();
        assert_eq!(receipt.filename, "2024-02-28-001-hello-world.md");
        assert_eq!(receipt.language, Language::Ko);
        assert!(receipt.commit.is_some());
        assert!(receipt.message.starts_with("Add post: 2024-02-28-001-hello-world.md\n\nCommitted by Blog API at "));
        assert_eq!(receipt.path.strip_prefix(store.repository().root()).unwrap(), Path::new("content/ko/post/2024-02-28-001-hello-world.md"));

        let post = store.get(&receipt.filename, None).unwrap();
        assert_eq!(post.title, "Hello World");
        assert_eq!(post.body, "Body");
        assert!(!post.metadata.draft);
        assert_eq!(post.metadata.categories, ["Development"]);
        assert_eq!(post.metadata.extra.get("ShowToc"), Some(&Value::Boolean(true)));

        let content = fs::read_to_string(&receipt.path).unwrap();
        assert_eq!(content, "+++\ntitle = \"Hello World\"\ndate = 2024-02-28T10:00:00+09:00\ndraft = false\ntags = []\ncategories = [\"Development\"]\nShowToc = true\nTocOpen = true\n+++\n\nBody");

        let commits = store.recent_commits(1).await.unwrap();
        assert_eq!(commits[0].subject, "Add post: 2024-02-28-001-hello-world.md");
        assert_eq!(store.git().vcs().remote_len(), 1);
        assert!(store.status().await.unwrap().clean);
    }

    #[tokio::test]
    async fn test_create_defaults_date_to_now() {
        let temp = TempDir::new().unwrap();
        let store = store(&temp);

        let receipt = store.create(NewPost::new("Today", "", Language::En)).await.unwrap();
        let post = store.get(&receipt.filename, Some(Language::En)).unwrap();
        assert_eq!(post.metadata.date.offset(), &defaults().timezone);
        assert_eq!(post.metadata.date.timestamp_subsec_nanos(), 0);
        assert!(receipt.filename.starts_with(&post.metadata.date.format("%Y-%m-%d-001-today").to_string()));
    }

    #[tokio::test]
    async fn test_create_validation() {
        let temp = TempDir::new().unwrap();
        let store = store(&temp);

        let res = store.create(NewPost::new("  ", "Body", Language::Ko)).await;
        assert!(matches!(res, Err(StoreError::Validation(_))));

        let mut reserved = hello_world();
        reserved.extra.insert("date".to_string(), Value::Boolean(true));
        assert!(matches!(store.create(reserved).await, Err(StoreError::Validation(_))));

        let mut bad_name = hello_world();
        bad_name.filename = Some("../escape.md".to_string());
        assert!(matches!(store.create(bad_name).await, Err(StoreError::Validation(_))));

        assert_eq!(store.git().vcs().local_len(), 0);
    }

    #[tokio::test]
    async fn test_same_day_sequence() {
        let temp = TempDir::new().unwrap();
        let store = store(&temp);

        let first = store.create(hello_world()).await.unwrap();
        let second = store.create(hello_world()).await.unwrap();
        let other = store.create(NewPost { date: Some(date()), ..NewPost::new("Other", "", Language::Ko) }).await.unwrap();
        assert_eq!(first.filename, "2024-02-28-001-hello-world.md");
        assert_eq!(second.filename, "2024-02-28-002-hello-world.md");
        assert_eq!(other.filename, "2024-02-28-003-other.md");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_creates_get_distinct_names() {
        let temp = TempDir::new().unwrap();
        let store = Arc::new(store(&temp));

        let mut tasks = vec![];
        for i in 0..8 {
            let store = store.clone();
            tasks.push(tokio::spawn(async move {
                let new_post = NewPost {
                    date: Some(date()),
                    ..NewPost::new(&format!("Post {}", i), "", Language::Ko)
                };
                store.create(new_post).await.unwrap().filename
            }));
        }

        let mut sequences = vec![];
        for task in tasks {
            let filename = task.await.unwrap();
            sequences.push(filename[11..14].to_string());
        }
        sequences.sort();
        let expected: Vec<String> = (1..=8).map(|i| format!("{:03}", i)).collect();
        assert_eq!(sequences, expected);
        assert_eq!(store.git().vcs().remote_len(), 8);
        assert!(store.status().await.unwrap().clean);
    }

    #[tokio::test]
    async fn test_supplied_filename_conflict() {
        let temp = TempDir::new().unwrap();
        let store = store(&temp);

        let mut new_post = hello_world();
        new_post.filename = Some("about.md".to_string());
        store.create(new_post.clone()).await.unwrap();

        let res = store.create(new_post).await;
        assert!(matches!(res, Err(StoreError::Conflict { ref filename, .. }) if filename == "about.md"));
        assert_eq!(store.git().vcs().local_len(), 1);
    }

    #[tokio::test]
    async fn test_leftover_file_conflict() {
        let temp = TempDir::new().unwrap();
        let store = store(&temp);
        let dir = store.repository().language_dir(Language::Ko);
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("2024-02-28-001-hello-world.md"), "+++\ntitle = \"x\"\ndate = 2024-02-28\n+++\n").unwrap();

        let res = store.create(hello_world()).await;
        assert!(matches!(res, Err(StoreError::Conflict { ref filename, .. }) if filename == "2024-02-28-001-hello-world.md"));

        // Other titles are not blocked by the leftover
        let other = store.create(NewPost { date: Some(date()), ..NewPost::new("Other", "", Language::Ko) }).await.unwrap();
        assert_eq!(other.filename, "2024-02-28-002-other.md");
    }

    #[tokio::test]
    async fn test_update() {
        let temp = TempDir::new().unwrap();
        let store = store(&temp);
        let receipt = store.create(hello_world()).await.unwrap();

        let mut extra = Table::new();
        extra.insert("cover".to_string(), Value::String("hello.png".to_string()));
        let updated = store.update(&receipt.filename, None, PostPatch {
            body: Some("New body".to_string()),
            draft: Some(true),
            extra,
            ..Default::default()
        }).await.unwrap();
        assert_eq!(updated.filename, receipt.filename);
        assert!(updated.message.starts_with("Update post: 2024-02-28-001-hello-world.md\n"));

        let post = store.get(&receipt.filename, Some(Language::Ko)).unwrap();
        assert_eq!(post.title, "Hello World");
        assert_eq!(post.body, "New body");
        assert!(post.metadata.draft);
        assert_eq!(post.metadata.key_order().last().map(|k| k.as_str()), Some("cover"));
        assert_eq!(store.recent_commits(5).await.unwrap().len(), 2);

        let missing = store.update("2024-01-01-001-missing.md", None, PostPatch::default()).await;
        assert!(matches!(missing, Err(StoreError::NotFound { .. })));
    }

    #[tokio::test]
    async fn test_update_keeps_unknown_keys() {
        let temp = TempDir::new().unwrap();
        let store = store(&temp);
        let dir = store.repository().language_dir(Language::En);
        fs::create_dir_all(&dir).unwrap();
        let content = "+++\nweight = 3\ntitle = \"Old\"\ndate = 2024-01-01T00:00:00+09:00\n[cover]\nimage = \"a.png\"\n+++\n\nBody\n";
        fs::write(dir.join("old.md"), content).unwrap();
        store.git().commit_and_push("Seed").await.unwrap();

        store.update("old.md", Some(Language::En), PostPatch {
            title: Some("New".to_string()),
            ..Default::default()
        }).await.unwrap();

        let written = fs::read_to_string(dir.join("old.md")).unwrap();
        assert!(written.starts_with("+++\nweight = 3\ntitle = \"New\"\ndate = 2024-01-01T00:00:00+09:00\n"));
        assert!(written.contains("[cover]\nimage = \"a.png\"\n"));
        assert!(written.ends_with("+++\n\nBody\n"));
    }

    #[tokio::test]
    async fn test_delete_twice() {
        let temp = TempDir::new().unwrap();
        let store = store(&temp);
        let receipt = store.create(hello_world()).await.unwrap();

        let deleted = store.delete(&receipt.filename, Some(Language::Ko)).await.unwrap();
        assert!(deleted.message.starts_with("Delete post: 2024-02-28-001-hello-world.md\n"));
        assert!(!receipt.path.exists());
        assert!(matches!(store.get(&receipt.filename, None), Err(StoreError::NotFound { .. })));

        let res = store.delete(&receipt.filename, Some(Language::Ko)).await;
        assert!(matches!(res, Err(StoreError::NotFound { .. })));
        assert_eq!(store.recent_commits(5).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_search_after_create() {
        let temp = TempDir::new().unwrap();
        let store = store(&temp);
        store.create(NewPost { date: Some(date()), ..NewPost::new("Learning Rust", "Ownership and borrowing", Language::En) }).await.unwrap();
        store.create(hello_world()).await.unwrap();

        let hits = store.search("BORROW", None).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].post.language, Language::En);

        let page = store.list(&ListFilter::default()).unwrap();
        assert_eq!(page.total, 2);
    }

    #[tokio::test]
    async fn test_commit_failure_rolls_back() {
        let temp = TempDir::new().unwrap();
        let store = store(&temp);

        store.git().vcs().fail_next_commits(1);
        let res = store.create(hello_world()).await;
        assert!(matches!(res, Err(StoreError::GitOperationFailed { .. })));
        assert!(store.list(&ListFilter::default()).unwrap().posts.is_empty());
        assert!(store.status().await.unwrap().clean);

        let receipt = store.create(hello_world()).await.unwrap();
        assert_eq!(receipt.filename, "2024-02-28-001-hello-world.md");
        let before = fs::read(&receipt.path).unwrap();

        store.git().vcs().fail_next_commits(1);
        let res = store.update(&receipt.filename, None, PostPatch { body: Some("changed".to_string()), ..Default::default() }).await;
        assert!(res.is_err());
        assert_eq!(fs::read(&receipt.path).unwrap(), before);

        store.git().vcs().fail_next_commits(1);
        assert!(store.delete(&receipt.filename, None).await.is_err());
        assert_eq!(fs::read(&receipt.path).unwrap(), before);
        assert!(store.status().await.unwrap().clean);
    }

    #[tokio::test]
    async fn test_push_failure_keeps_commit() {
        let temp = TempDir::new().unwrap();
        let store = store(&temp);

        store.git().vcs().fail_next_pushes(1);
        let res = store.create(hello_world()).await;
        assert!(matches!(res, Err(ref e) if e.is_retryable()));

        let status = store.status().await.unwrap();
        assert!(status.clean);
        assert_eq!(status.ahead, 1);
        assert!(store.get("2024-02-28-001-hello-world.md", None).is_ok());

        // Retrying the same create finds the unpushed post instead of writing it twice
        let res = store.create(hello_world()).await;
        assert!(matches!(res, Err(StoreError::Conflict { ref filename, .. }) if filename == "2024-02-28-001-hello-world.md"));
        assert_eq!(store.list(&ListFilter::default()).unwrap().total, 1);
        assert_eq!(store.git().vcs().local_len(), 1);

        // The next transaction pushes both commits
        let other = NewPost { date: Some(date()), ..NewPost::new("Other", "", Language::Ko) };
        let receipt = store.create(other).await.unwrap();
        assert_eq!(receipt.filename, "2024-02-28-002-other.md");
        assert_eq!(store.git().vcs().remote_len(), 2);

        // Once pushed, the same title gets the next sequence again
        let receipt = store.create(hello_world()).await.unwrap();
        assert_eq!(receipt.filename, "2024-02-28-003-hello-world.md");
    }

    #[tokio::test]
    async fn test_retry_after_rejected_push_is_conflict() {
        let temp = TempDir::new().unwrap();
        let store = store(&temp);

        store.git().vcs().reject_next_pushes(2);
        assert!(matches!(store.create(hello_world()).await, Err(StoreError::GitConflict { .. })));

        let res = store.create(hello_world()).await;
        assert!(matches!(res, Err(StoreError::Conflict { ref filename, .. }) if filename == "2024-02-28-001-hello-world.md"));
        assert_eq!(store.git().vcs().local_len(), 1);
    }

    #[tokio::test]
    async fn test_update_push_failure_keeps_commit() {
        let temp = TempDir::new().unwrap();
        let store = store(&temp);
        let receipt = store.create(hello_world()).await.unwrap();
        let patch = || PostPatch { body: Some("Offline edit".to_string()), ..Default::default() };

        store.git().vcs().fail_next_pushes(1);
        let res = store.update(&receipt.filename, None, patch()).await;
        assert!(matches!(res, Err(StoreError::GitOperationFailed { .. })));

        assert_eq!(store.get(&receipt.filename, None).unwrap().body, "Offline edit");
        let status = store.status().await.unwrap();
        assert!(status.clean);
        assert_eq!(status.ahead, 1);
        let subject = &store.recent_commits(1).await.unwrap()[0].subject;
        assert_eq!(subject, "Update post: 2024-02-28-001-hello-world.md");

        // Nothing new upstream: sync leaves the local commit alone
        assert!(!store.sync().await.unwrap().advanced);
        assert_eq!(store.status().await.unwrap().ahead, 1);

        // Someone else pushed meanwhile: fast-forward is impossible
        store.git().vcs().advance_remote("Add post: elsewhere.md");
        assert!(matches!(store.sync().await, Err(StoreError::GitConflict { .. })));
        assert_eq!(store.get(&receipt.filename, None).unwrap().body, "Offline edit");

        // Retrying the update has no diff left, its push rebases and carries the commit
        let retry = store.update(&receipt.filename, None, patch()).await.unwrap();
        assert!(retry.commit.is_none());
        assert_eq!(store.git().vcs().remote_len(), 3);
        assert_eq!(store.status().await.unwrap().ahead, 0);
        assert_eq!(store.get(&receipt.filename, None).unwrap().body, "Offline edit");
    }

    #[tokio::test]
    async fn test_stale_temp_files_are_not_committed() {
        let temp = TempDir::new().unwrap();
        let store = store(&temp);
        let dir = store.repository().language_dir(Language::En);
        fs::create_dir_all(&dir).unwrap();
        let stale = dir.join(".2024-02-27-001-crashed.md.1234.tmp");
        fs::write(&stale, "half written").unwrap();

        store.create(hello_world()).await.unwrap();
        assert!(!stale.exists());
        assert!(store.status().await.unwrap().clean);
        assert_eq!(store.git().vcs().remote_len(), 1);
    }

    #[tokio::test]
    async fn test_push_rejected_twice_is_git_conflict() {
        let temp = TempDir::new().unwrap();
        let store = store(&temp);

        store.git().vcs().reject_next_pushes(2);
        let res = store.create(hello_world()).await;
        assert!(matches!(res, Err(StoreError::GitConflict { .. })));
        assert_eq!(store.git().vcs().local_len(), 1);
    }

    #[tokio::test]
    async fn test_sync() {
        let temp = TempDir::new().unwrap();
        let store = store(&temp);

        assert!(!store.sync().await.unwrap().advanced);
        store.git().vcs().advance_remote("Add post: elsewhere.md");
        assert!(store.sync().await.unwrap().advanced);
    }

    #[tokio::test]
    async fn test_lock_timeout_while_held() {
        let temp = TempDir::new().unwrap();
        let root = temp.path().join("repo");
        fs::create_dir_all(&root).unwrap();
        let repository = PostRepository::new(&root, Path::new(DEFAULT_CONTENT_DIR), defaults().timezone);
        let git = GitBackend::new(MemoryVcs::new(&root), RepoLock::new(temp.path().join("git.lock")), Duration::from_millis(200));
        let store = ContentStore::new(repository, git, defaults());

        let other = RepoLock::new(temp.path().join("git.lock"));
        let guard = other.acquire(Duration::from_secs(1)).await.unwrap();

        let res = store.create(hello_world()).await;
        assert!(matches!(res, Err(StoreError::LockTimeout { .. })));
        assert!(store.list(&ListFilter::default()).unwrap().posts.is_empty());

        drop(guard);
        assert!(store.create(hello_world()).await.is_ok());
    }

    #[tokio::test]
    async fn test_transactions_serve_in_request_order() {
        let temp = TempDir::new().unwrap();
        let store = Arc::new(store(&temp));

        let session = store.git().session().await.unwrap();
        let mut tasks = vec![];
        for i in 0..4 {
            let store = store.clone();
            tasks.push(tokio::spawn(async move {
                let new_post = NewPost {
                    date: Some(date()),
                    ..NewPost::new(&format!("Queued {}", i), "", Language::Ko)
                };
                store.create(new_post).await.unwrap().filename
            }));
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        drop(session);

        let mut names = vec![];
        for task in tasks {
            names.push(task.await.unwrap());
        }
        assert_eq!(names, [
            "2024-02-28-001-queued-0.md",
            "2024-02-28-002-queued-1.md",
            "2024-02-28-003-queued-2.md",
            "2024-02-28-004-queued-3.md",
        ]);
    }

    #[tokio::test]
    async fn test_translation_status() {
        let temp = TempDir::new().unwrap();
        let store = store(&temp);
        let ko = store.create(hello_world()).await.unwrap();
        store.create(NewPost { filename: Some(ko.filename.clone()), ..NewPost::new("Hello World", "", Language::En) }).await.unwrap();
        store.create(NewPost { date: Some(date()), ..NewPost::new("Only Korean", "", Language::Ko) }).await.unwrap();

        let status = store.translation_status(Language::Ko, Language::En).unwrap();
        assert_eq!(status.needs_translation, ["2024-02-28-002-only-korean"]);
        assert!(status.target_only.is_empty());
        assert!(!status.synced);
    }
}
