//! core type-safe identifiers and validated names for the commit graph.

use std::fmt;
use std::str::FromStr;

use git2::{ObjectType, Oid};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

/// hash bytes exactly the way git hashes a blob object (`blob <len>\0<bytes>`)
pub(crate) fn content_hash(bytes: &[u8]) -> Result<Oid, git2::Error> {
    Oid::hash_object(ObjectType::Blob, bytes)
}

/// parse a full 40-character hex object id
fn parse_oid(hex: &str) -> Result<Oid, InvalidNameError> {
    // Oid::from_str happily accepts abbreviated ids, we never do
    if hex.len() != 40 || !hex.bytes().all(|b| b.is_ascii_hexdigit()) {
        return Err(InvalidNameError::InvalidId(hex.to_string()));
    }
    Oid::from_str(hex).map_err(|_| InvalidNameError::InvalidId(hex.to_string()))
}

/// hex string form for ids, shared by both id newtypes
macro_rules! hex_id {
    ($name:ident) => {
        impl $name {
            pub(crate) fn new(oid: Oid) -> Self {
                Self(oid)
            }

            /// raw Oid (for internal use only)
            pub(crate) fn raw(&self) -> Oid {
                self.0
            }

            /// parse from a full 40-character hex string
            pub fn from_hex(hex: &str) -> Result<Self, InvalidNameError> {
                parse_oid(hex).map(Self)
            }

            /// short form of the id
            pub fn short(&self) -> String {
                self.0.to_string()[..7].to_string()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl FromStr for $name {
            type Err = InvalidNameError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Self::from_hex(s)
            }
        }

        impl Serialize for $name {
            fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serializer.serialize_str(&self.0.to_string())
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                let raw = String::deserialize(deserializer)?;
                Self::from_hex(&raw).map_err(serde::de::Error::custom)
            }
        }
    };
}

/// Content hash identifying a commit.
///
/// This makes sure we don't accidentally pass a blob ID where a commit ID
/// is expected. The inner Oid is only accessible within the crate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CommitId(pub(crate) Oid);

hex_id!(CommitId);

/// Content hash identifying a blob (file payload).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BlobId(pub(crate) Oid);

hex_id!(BlobId);

impl BlobId {
    /// the id any engine will store `content` under
    pub fn for_content(content: &[u8]) -> Result<Self, git2::Error> {
        content_hash(content).map(Self::new)
    }
}

/// A validated repository name.
///
/// Repository names end up as file names and SQL keys, so they are kept
/// to a conservative alphabet:
/// - 1-64 characters
/// - ASCII alphanumeric, underscores, hyphens only
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RepoName(String);

impl RepoName {
    const MAX_LEN: usize = 64;

    /// create a new RepoName, validating the input
    pub fn new(name: impl Into<String>) -> Result<Self, InvalidNameError> {
        let name = name.into();
        Self::validate(&name)?;
        Ok(Self(name))
    }

    fn validate(name: &str) -> Result<(), InvalidNameError> {
        if name.is_empty() {
            return Err(InvalidNameError::Empty);
        }

        if name.len() > Self::MAX_LEN {
            return Err(InvalidNameError::TooLong(name.len()));
        }

        for (i, c) in name.chars().enumerate() {
            if !c.is_ascii_alphanumeric() && c != '_' && c != '-' {
                return Err(InvalidNameError::InvalidCharacter { char: c, position: i });
            }
        }

        Ok(())
    }

    /// get the string representation
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RepoName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for RepoName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for RepoName {
    type Error = InvalidNameError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<RepoName> for String {
    fn from(name: RepoName) -> Self {
        name.0
    }
}

impl FromStr for RepoName {
    type Err = InvalidNameError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

/// A validated file path inside a tree.
///
/// Paths are relative and `/`-separated: `docs/readme.md`. Ordering is plain
/// string ordering, which is what makes tree hashing independent of the
/// order files were added in.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RepoPath(String);

impl RepoPath {
    const MAX_LEN: usize = 1024;

    /// create a new RepoPath, validating the input
    pub fn new(path: impl Into<String>) -> Result<Self, InvalidNameError> {
        let path = path.into();
        Self::validate(&path)?;
        Ok(Self(path))
    }

    fn validate(path: &str) -> Result<(), InvalidNameError> {
        if path.is_empty() {
            return Err(InvalidNameError::Empty);
        }

        if path.len() > Self::MAX_LEN {
            return Err(InvalidNameError::TooLong(path.len()));
        }

        for (i, c) in path.chars().enumerate() {
            if c.is_control() || c == '\\' {
                return Err(InvalidNameError::InvalidCharacter { char: c, position: i });
            }
        }

        for segment in path.split('/') {
            if segment.is_empty() || segment == "." || segment == ".." {
                return Err(InvalidNameError::InvalidPath(path.to_string()));
            }
        }

        Ok(())
    }

    /// get the string representation
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RepoPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for RepoPath {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for RepoPath {
    type Error = InvalidNameError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<RepoPath> for String {
    fn from(path: RepoPath) -> Self {
        path.0
    }
}

impl FromStr for RepoPath {
    type Err = InvalidNameError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

/// error type for invalid names, paths and ids
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InvalidNameError {
    #[error("name cannot be empty")]
    Empty,
    #[error("name too long: {0} characters")]
    TooLong(usize),
    #[error("invalid character {char:?} at position {position}")]
    InvalidCharacter { char: char, position: usize },
    #[error("invalid path: '{0}'")]
    InvalidPath(String),
    #[error("invalid object id: '{0}'")]
    InvalidId(String),
}

/// how a commit changed one path relative to its parent
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeStatus {
    Added,
    Modified,
    Deleted,
}

impl ChangeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Added => "added",
            Self::Modified => "modified",
            Self::Deleted => "deleted",
        }
    }
}

impl fmt::Display for ChangeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChangeStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "added" => Ok(Self::Added),
            "modified" => Ok(Self::Modified),
            "deleted" => Ok(Self::Deleted),
            other => Err(format!("unknown change status '{}'", other)),
        }
    }
}

/// represents the change a commit made to a single path
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Change {
    pub path: RepoPath,
    pub status: ChangeStatus,
    /// blob at this path in the parent, if any
    pub previous: Option<BlobId>,
    /// blob at this path in the commit, if any
    pub current: Option<BlobId>,
    /// unified diff, only for modified text files
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub diff: Option<String>,
}
