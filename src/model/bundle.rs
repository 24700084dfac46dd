//! Self-contained repository snapshots exchanged between engines.

use serde::{Deserialize, Serialize};

use crate::model::commit::CommitDetail;
use crate::model::types::{BlobId, CommitId, RepoName};

/// A range of commits plus every blob their trees reference.
///
/// Commits are ordered ancestor-first, so they can be applied to another
/// repository front to back. `base` is the commit the range starts after
/// (`None` when the bundle begins at the root).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bundle {
    pub repo: RepoName,
    pub engine: String,
    pub base: Option<CommitId>,
    pub head: Option<CommitId>,
    pub commits: Vec<CommitDetail>,
    pub blobs: Vec<BlobPayload>,
}

impl Bundle {
    pub fn is_empty(&self) -> bool {
        self.commits.is_empty()
    }
}

/// one blob and its bytes, hex encoded on the wire
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlobPayload {
    pub id: BlobId,
    #[serde(with = "hex::serde")]
    pub content: Vec<u8>,
}
