use std::io;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::post::Language;

pub type Result<T> = std::result::Result<T, StoreError>;

/// Errors surfaced by the lock, the git backend, the post repository and the
/// content store.
///
/// Every variant carries enough detail to tell "retry is safe" apart from
/// "somebody has to look at the repository", see [`StoreError::is_retryable`].
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("post {filename} not found{}", language.map(|l| format!(" in language {}", l)).unwrap_or_default())]
    NotFound {
        filename: String,
        language: Option<Language>,
    },

    #[error("conflict on {filename}: {reason}")]
    Conflict { filename: String, reason: String },

    #[error("could not acquire lock {} within {}s", path.display(), waited.as_secs_f32())]
    LockTimeout { path: PathBuf, waited: Duration },

    #[error("`{command}` failed ({}): {stderr}", status.map(|s| format!("exit code {}", s)).unwrap_or_else(|| "timed out".to_string()))]
    GitOperationFailed {
        command: String,
        status: Option<i32>,
        stderr: String,
    },

    #[error("remote diverged during `{command}`, manual resolution required: {detail}")]
    GitConflict { command: String, detail: String },

    #[error("invalid post: {0}")]
    Validation(String),

    #[error("malformed post file {}: {reason}", path.display())]
    InvalidPost { path: PathBuf, reason: String },

    #[error("i/o error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl StoreError {
    pub fn not_found(filename: &str, language: Option<Language>) -> Self {
        StoreError::NotFound {
            filename: filename.to_string(),
            language,
        }
    }

    pub fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        StoreError::Io {
            path: path.into(),
            source,
        }
    }

    /// Lock timeouts and failed git commands leave the repository intact, so
    /// the same call can simply be issued again.
    pub fn is_retryable(&self) -> bool {
        matches!(self, StoreError::LockTimeout { .. } | StoreError::GitOperationFailed { .. })
    }

    /// Short machine readable name, used by the HTTP layer.
    pub fn kind(&self) -> &'static str {
        match self {
            StoreError::NotFound { .. } => "not_found",
            StoreError::Conflict { .. } => "conflict",
            StoreError::LockTimeout { .. } => "lock_timeout",
            StoreError::GitOperationFailed { .. } => "git_operation_failed",
            StoreError::GitConflict { .. } => "git_conflict",
            StoreError::Validation(_) => "validation",
            StoreError::InvalidPost { .. } => "invalid_post",
            StoreError::Io { .. } => "io",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable() {
        let timeout = StoreError::LockTimeout {
            path: PathBuf::from("/tmp/blog-git.lock"),
            waited: Duration::from_secs(1),
        };
        assert!(timeout.is_retryable());

        let git = StoreError::GitOperationFailed {
            command: "git push origin HEAD:main".to_string(),
            status: Some(128),
            stderr: "could not read from remote".to_string(),
        };
        assert!(git.is_retryable());
        assert_eq!(git.to_string(), "`git push origin HEAD:main` failed (exit code 128): could not read from remote");

        let conflict = StoreError::GitConflict {
            command: "git push origin HEAD:main".to_string(),
            detail: "rejected".to_string(),
        };
        assert!(!conflict.is_retryable());
        assert!(!StoreError::not_found("a.md", None).is_retryable());
    }

    #[test]
    fn test_not_found_message() {
        let err = StoreError::not_found("2024-02-28-001-hello-world.md", Some(Language::Ko));
        assert_eq!(err.to_string(), "post 2024-02-28-001-hello-world.md not found in language ko");
        assert_eq!(err.kind(), "not_found");

        let err = StoreError::not_found("x.md", None);
        assert_eq!(err.to_string(), "post x.md not found");
    }

    #[test]
    fn test_timeout_message() {
        let err = StoreError::GitOperationFailed {
            command: "git fetch origin main".to_string(),
            status: None,
            stderr: String::new(),
        };
        assert!(err.to_string().contains("timed out"));
    }
}
