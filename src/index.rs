//! Path-scoped file history index.
//!
//! For every path, the index keeps the commits that changed it in push
//! order, so a history query touches only the entries for that path. The
//! `sqlite_fs` engine keeps the same entries as rows; `graph_db` rebuilds a
//! [`PathIndex`] per repository while replaying its commit log.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::model::{BlobId, Change, CommitId, RepoPath};

/// one commit that changed one path
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexEntry {
    pub commit: CommitId,
    pub depth: u64,
    pub change: Change,
}

/// path -> entries, oldest first
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PathIndex {
    paths: BTreeMap<RepoPath, Vec<IndexEntry>>,
}

impl PathIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// append the entries for a newly stored commit
    ///
    /// commits must be recorded in parent-before-child order, which a
    /// fast-forward-only history guarantees
    pub fn record(&mut self, commit: CommitId, depth: u64, changes: &[Change]) {
        for change in changes {
            self.paths
                .entry(change.path.clone())
                .or_default()
                .push(IndexEntry {
                    commit,
                    depth,
                    change: change.clone(),
                });
        }
    }

    /// entries for `path`, newest first
    pub fn history(&self, path: &RepoPath) -> Vec<IndexEntry> {
        self.paths
            .get(path)
            .map(|entries| entries.iter().rev().cloned().collect())
            .unwrap_or_default()
    }

    /// every blob an entry points at
    pub fn blobs(&self) -> impl Iterator<Item = BlobId> + '_ {
        self.paths
            .values()
            .flatten()
            .filter_map(|entry| entry.change.current)
    }
}
