//! Storage engines.
//!
//! An engine only knows how to persist and fetch repositories, commits,
//! blobs and index entries. Everything with meaning (fast-forward checks,
//! ancestry, pull ranges, bundles) lives in [`crate::store`] and is shared
//! by every engine, which is what keeps their behaviour identical.

use serde::Serialize;

use crate::error::VcsResult;
use crate::index::IndexEntry;
use crate::model::{BlobId, CommitId, RepoName, RepoPath, StoredCommit};

pub mod graph_db;
pub mod objects;
pub mod sqlite_fs;

pub use graph_db::GraphDbEngine;
pub use sqlite_fs::SqliteFsEngine;

/// A commit ready to be persisted, with the blobs it introduces.
#[derive(Debug)]
pub struct CommitWrite<'a> {
    pub commit: &'a StoredCommit,
    /// payload of every blob a change of this commit points at
    pub blobs: Vec<(BlobId, &'a [u8])>,
    /// head the repository must still have for the write to apply
    pub expected_head: Option<CommitId>,
}

/// what a repository deletion freed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Reclaimed {
    pub commits: usize,
    pub blobs: usize,
}

/// Primitive storage operations every engine provides.
///
/// Implementations must be safe to share between threads. `write_commit`
/// has to be atomic: blobs are durable before the commit record is visible,
/// and the commit record, its index entries and the new head become visible
/// together, or not at all.
pub trait StorageEngine: Send + Sync {
    /// registry name of the engine
    fn kind(&self) -> &'static str;

    /// create an empty repository (`RepoAlreadyExists` if present)
    fn create_repo(&self, name: &RepoName) -> VcsResult<()>;

    fn repo_exists(&self, name: &RepoName) -> VcsResult<bool>;

    /// all repository names, sorted
    fn list_repos(&self) -> VcsResult<Vec<RepoName>>;

    /// drop a repository, its commits and index, and every blob no other
    /// repository of this engine still references
    fn delete_repo(&self, name: &RepoName) -> VcsResult<Reclaimed>;

    /// current head (`RepoNotFound` if absent)
    fn head(&self, name: &RepoName) -> VcsResult<Option<CommitId>>;

    /// fetch one commit of the repository, `None` if it belongs elsewhere
    fn load_commit(&self, name: &RepoName, id: &CommitId) -> VcsResult<Option<StoredCommit>>;

    /// fetch blob bytes, `None` if the engine has no such blob
    fn read_blob(&self, id: &BlobId) -> VcsResult<Option<Vec<u8>>>;

    /// index entries for `path`, newest first
    fn file_history(&self, name: &RepoName, path: &RepoPath) -> VcsResult<Vec<IndexEntry>>;

    /// number of commits stored for the repository
    fn commit_count(&self, name: &RepoName) -> VcsResult<u64>;

    /// persist a commit and move head from `expected_head` to it
    ///
    /// fails with `NonFastForward` when head has moved and with
    /// `RepoNotFound` when the repository is gone; head is untouched then
    fn write_commit(&self, name: &RepoName, write: CommitWrite<'_>) -> VcsResult<()>;
}
