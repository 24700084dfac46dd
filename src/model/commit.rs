//! Commit records, canonical hashing and the commit views handed to callers.
//!
//! Commits are value objects: a [`CommitRecord`] never changes once created
//! and its [`CommitId`] is the hash of its canonical serialization, so two
//! records are the same commit exactly when their ids are equal.

use std::collections::BTreeMap;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{VcsError, VcsResult};
use crate::model::tree::Tree;
use crate::model::types::{content_hash, BlobId, Change, CommitId, RepoPath};

/// Immutable content of a commit.
///
/// The canonical form is compact JSON with the fields in declaration order,
/// the tree sorted by path and the timestamp in RFC 3339 UTC. Every engine
/// hashes this same byte string, so ids are portable between engines.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitRecord {
    pub parent: Option<CommitId>,
    pub tree: Tree,
    pub message: String,
    pub author: String,
    #[serde(with = "canonical_time")]
    pub timestamp: DateTime<Utc>,
}

impl CommitRecord {
    /// the exact bytes the commit id is computed over
    pub fn canonical_bytes(&self) -> VcsResult<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// deterministic id of this record
    pub fn id(&self) -> VcsResult<CommitId> {
        let bytes = self.canonical_bytes()?;
        Ok(CommitId::new(content_hash(&bytes)?))
    }

    /// parse a record back from its canonical bytes
    pub fn from_canonical(bytes: &[u8]) -> VcsResult<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

/// format a timestamp the canonical way: UTC, `Z` suffix, only the
/// fractional digits that are needed
pub fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::AutoSi, true)
}

/// parse an RFC 3339 timestamp into UTC
pub fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, chrono::ParseError> {
    DateTime::parse_from_rfc3339(raw).map(|ts| ts.with_timezone(&Utc))
}

pub(crate) mod canonical_time {
    use chrono::{DateTime, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(ts: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&super::format_timestamp(ts))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<DateTime<Utc>, D::Error> {
        let raw = String::deserialize(deserializer)?;
        super::parse_timestamp(&raw).map_err(serde::de::Error::custom)
    }
}

/// A commit to be pushed, built with a fluent interface.
///
/// ```
/// use vcsdb::model::{NewCommit, RepoPath};
///
/// let commit = NewCommit::new("alice", "first commit")
///     .file(RepoPath::new("a.txt").unwrap(), "hello");
/// ```
#[derive(Debug, Clone)]
pub struct NewCommit {
    parent: Option<CommitId>,
    files: BTreeMap<RepoPath, Vec<u8>>,
    message: String,
    author: String,
    timestamp: DateTime<Utc>,
}

impl NewCommit {
    /// start a root commit stamped with the current time
    pub fn new(author: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            parent: None,
            files: BTreeMap::new(),
            message: message.into(),
            author: author.into(),
            timestamp: Utc::now(),
        }
    }

    /// set the parent commit
    pub fn parent(mut self, parent: CommitId) -> Self {
        self.parent = Some(parent);
        self
    }

    /// set or clear the parent commit
    pub fn parent_id(mut self, parent: Option<CommitId>) -> Self {
        self.parent = parent;
        self
    }

    /// add (or replace) one file of the tree
    pub fn file(mut self, path: RepoPath, content: impl Into<Vec<u8>>) -> Self {
        self.files.insert(path, content.into());
        self
    }

    /// replace the whole tree
    pub fn files(mut self, files: BTreeMap<RepoPath, Vec<u8>>) -> Self {
        self.files = files;
        self
    }

    /// set the commit timestamp
    pub fn timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// hash every file and produce the record plus the blob payloads
    pub(crate) fn prepare(self) -> VcsResult<PreparedCommit> {
        if self.author.trim().is_empty() {
            return Err(VcsError::InvalidCommit("author must not be blank".to_string()));
        }

        let mut tree = Tree::new();
        let mut contents = BTreeMap::new();
        for (path, content) in self.files {
            let blob = BlobId::for_content(&content)?;
            tree.insert(path, blob);
            contents.insert(blob, content);
        }

        Ok(PreparedCommit {
            record: CommitRecord {
                parent: self.parent,
                tree,
                message: self.message,
                author: self.author,
                timestamp: self.timestamp,
            },
            contents,
        })
    }
}

/// a hashed commit ready to be written
pub(crate) struct PreparedCommit {
    pub record: CommitRecord,
    /// payload of every blob in the tree, keyed by id
    pub contents: BTreeMap<BlobId, Vec<u8>>,
}

/// A commit as an engine stores it: the record plus derived graph data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredCommit {
    pub id: CommitId,
    pub record: CommitRecord,
    /// distance from the root commit (root = 0)
    pub depth: u64,
    /// changes relative to the parent, sorted by path
    pub changes: Vec<Change>,
}

impl StoredCommit {
    pub fn parent(&self) -> Option<CommitId> {
        self.record.parent
    }

    pub fn summary(&self) -> CommitSummary {
        CommitSummary {
            id: self.id,
            parent: self.record.parent,
            message: self.record.message.clone(),
            author: self.record.author.clone(),
            timestamp: self.record.timestamp,
            change_count: self.changes.len(),
        }
    }

    pub fn detail(&self) -> CommitDetail {
        CommitDetail {
            id: self.id,
            parent: self.record.parent,
            message: self.record.message.clone(),
            author: self.record.author.clone(),
            timestamp: self.record.timestamp,
            depth: self.depth,
            tree: self.record.tree.clone(),
            changes: self.changes.clone(),
        }
    }
}

/// one line of commit history
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitSummary {
    pub id: CommitId,
    pub parent: Option<CommitId>,
    pub message: String,
    pub author: String,
    #[serde(with = "canonical_time")]
    pub timestamp: DateTime<Utc>,
    pub change_count: usize,
}

/// everything known about a commit
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitDetail {
    pub id: CommitId,
    pub parent: Option<CommitId>,
    pub message: String,
    pub author: String,
    #[serde(with = "canonical_time")]
    pub timestamp: DateTime<Utc>,
    pub depth: u64,
    pub tree: Tree,
    pub changes: Vec<Change>,
}

impl CommitDetail {
    /// the hashed part of the commit
    pub fn record(&self) -> CommitRecord {
        CommitRecord {
            parent: self.parent,
            tree: self.tree.clone(),
            message: self.message.clone(),
            author: self.author.clone(),
            timestamp: self.timestamp,
        }
    }
}

/// result of a push
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushOutcome {
    pub id: CommitId,
    /// false when the commit was already the head (idempotent re-push)
    pub created: bool,
    pub change_count: usize,
}

/// one commit in the history of a path
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileHistoryEntry {
    pub commit: CommitSummary,
    pub change: Change,
}
