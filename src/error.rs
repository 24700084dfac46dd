//! Error types for every layer of the crate.
//!
//! All failures are variants of one `thiserror` enum. Callers that only care
//! about the broad category (to pick a status code, or decide on a retry)
//! ask for [`VcsError::kind`].

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::model::types::{CommitId, InvalidNameError, RepoName, RepoPath};

/// the main error type
#[derive(Debug, Error)]
pub enum VcsError {
    /// no engine registered under this name
    #[error("engine not found: {0}")]
    EngineNotFound(String),

    /// the repository does not exist in this engine
    #[error("repository not found: {0}")]
    RepoNotFound(RepoName),

    /// the commit does not belong to the repository
    #[error("commit not found: repo={repo}, id={id}")]
    CommitNotFound { repo: RepoName, id: CommitId },

    /// the path is not part of the commit's tree
    #[error("path not found: repo={repo}, commit={commit}, path={path}")]
    PathNotFound {
        repo: RepoName,
        commit: CommitId,
        path: RepoPath,
    },

    /// a repository with this name already exists
    #[error("repository already exists: {0}")]
    RepoAlreadyExists(RepoName),

    /// an engine with this name was registered twice
    #[error("engine already registered: {0}")]
    EngineAlreadyRegistered(String),

    /// the process-wide registry was installed twice
    #[error("registry already installed")]
    RegistryAlreadyInstalled,

    /// the process-wide registry was read before it was installed
    #[error("registry not installed")]
    RegistryNotInstalled,

    /// the pushed commit does not extend the current head
    #[error(
        "non-fast-forward push to {repo}: head is {}, parent is {}",
        display_opt(.head),
        display_opt(.parent)
    )]
    NonFastForward {
        repo: RepoName,
        head: Option<CommitId>,
        parent: Option<CommitId>,
    },

    /// the target of a sync has commits the source does not
    #[error("cannot sync {origin} into {target}: histories have diverged")]
    Diverged { origin: RepoName, target: RepoName },

    /// malformed name, path or id
    #[error("invalid name: {0}")]
    InvalidName(#[from] InvalidNameError),

    /// the parent of a pushed commit is not in the repository
    #[error("unknown parent commit {parent} in {repo}")]
    UnknownParent { repo: RepoName, parent: CommitId },

    /// the history cursor is not an ancestor of head
    #[error("invalid cursor {cursor} for {repo}: not reachable from head")]
    InvalidCursor { repo: RepoName, cursor: CommitId },

    /// malformed commit content
    #[error("invalid commit: {0}")]
    InvalidCommit(String),

    /// a bundle that cannot be applied as-is
    #[error("invalid bundle: {0}")]
    InvalidBundle(String),

    /// unusable configuration
    #[error("configuration error: {0}")]
    Config(String),

    /// error from the underlying git library
    #[error("git error: {0}")]
    Git(#[from] git2::Error),

    /// error from SQLite
    #[error("sqlite error: {0}")]
    Sqlite(rusqlite::Error),

    /// SQLite reported lock contention, safe to retry
    #[error("storage busy: {0}")]
    Busy(String),

    /// JSON serialization or deserialization failed
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// I/O error (filesystem level)
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// data integrity check failed
    #[error("corrupted data at {location}: {reason}")]
    CorruptedData { location: PathBuf, reason: String },

    /// internal error that shouldn't happen
    #[error("internal error: {0}")]
    Internal(String),
}

fn display_opt(id: &Option<CommitId>) -> String {
    match id {
        Some(id) => id.to_string(),
        None => "none".to_string(),
    }
}

/// broad failure category shared by every engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    NotFound,
    Conflict,
    InvalidInput,
    StorageFailure,
}

impl VcsError {
    /// classify this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            VcsError::EngineNotFound(_)
            | VcsError::RepoNotFound(_)
            | VcsError::CommitNotFound { .. }
            | VcsError::PathNotFound { .. }
            | VcsError::RegistryNotInstalled => ErrorKind::NotFound,

            VcsError::RepoAlreadyExists(_)
            | VcsError::EngineAlreadyRegistered(_)
            | VcsError::RegistryAlreadyInstalled
            | VcsError::NonFastForward { .. }
            | VcsError::Diverged { .. } => ErrorKind::Conflict,

            VcsError::InvalidName(_)
            | VcsError::UnknownParent { .. }
            | VcsError::InvalidCursor { .. }
            | VcsError::InvalidCommit(_)
            | VcsError::InvalidBundle(_) => ErrorKind::InvalidInput,

            VcsError::Config(_)
            | VcsError::Git(_)
            | VcsError::Sqlite(_)
            | VcsError::Busy(_)
            | VcsError::Serialization(_)
            | VcsError::Io(_)
            | VcsError::CorruptedData { .. }
            | VcsError::Internal(_) => ErrorKind::StorageFailure,
        }
    }

    /// check if this error indicates the resource doesn't exist
    pub fn is_not_found(&self) -> bool {
        self.kind() == ErrorKind::NotFound
    }

    /// check if this error is a conflict
    pub fn is_conflict(&self) -> bool {
        self.kind() == ErrorKind::Conflict
    }

    /// check if this error is recoverable by retry
    pub fn is_retriable(&self) -> bool {
        matches!(self, VcsError::Busy(_))
    }

    pub(crate) fn corrupted(location: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        VcsError::CorruptedData {
            location: location.into(),
            reason: reason.into(),
        }
    }
}

impl From<rusqlite::Error> for VcsError {
    fn from(err: rusqlite::Error) -> Self {
        use rusqlite::ErrorCode;

        match err.sqlite_error_code() {
            Some(ErrorCode::DatabaseBusy) | Some(ErrorCode::DatabaseLocked) => {
                VcsError::Busy(err.to_string())
            }
            _ => VcsError::Sqlite(err),
        }
    }
}

impl From<toml::de::Error> for VcsError {
    fn from(err: toml::de::Error) -> Self {
        VcsError::Config(err.to_string())
    }
}

/// result type alias
pub type VcsResult<T> = Result<T, VcsError>;
