use std::path::PathBuf;
use thiserror::Error;

/// Errors produced while backing up an account
#[derive(Error, Debug)]
pub enum BackupError {
    /// Missing or invalid settings, detected before any work starts
    #[error("configuration error: {message}")]
    Config { message: String },

    /// Account lookup or repository listing failed
    #[error("GitHub API error: {message}")]
    RemoteApi {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Unexpected stat/remove failure under the destination directory
    #[error("filesystem error at {}: {source}", .path.display())]
    Filesystem {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// `git clone` or `git pull` failed for one repository
    #[error("failed to back up {repo}: {cause}")]
    Sync { repo: String, cause: String },
}

impl BackupError {
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    pub fn remote(message: impl Into<String>) -> Self {
        Self::RemoteApi {
            message: message.into(),
            source: None,
        }
    }

    pub fn remote_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::RemoteApi {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    pub fn filesystem(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Filesystem {
            path: path.into(),
            source,
        }
    }

    pub fn sync(repo: impl Into<String>, cause: impl std::fmt::Display) -> Self {
        Self::Sync {
            repo: repo.into(),
            cause: cause.to_string(),
        }
    }

    /// Whether this error should end the whole run rather than one repository
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Config { .. } | Self::RemoteApi { .. })
    }
}

pub type BackupResult<T> = Result<T, BackupError>;
