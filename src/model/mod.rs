//! Engine-independent data model: ids, names, trees, commits and bundles.

pub mod bundle;
pub mod commit;
pub mod tree;
pub mod types;

pub use bundle::{BlobPayload, Bundle};
pub use commit::{
    format_timestamp, parse_timestamp, CommitDetail, CommitRecord, CommitSummary, FileHistoryEntry,
    NewCommit, PushOutcome, StoredCommit,
};
pub use tree::{diff_trees, unified_diff, Tree};
pub use types::{BlobId, Change, ChangeStatus, CommitId, InvalidNameError, RepoName, RepoPath};
