//! File trees and the per-path diff between a commit and its parent.
//!
//! A tree is the full file state of a commit: a path-sorted map from path to
//! blob id. Diffing two trees yields the changes the file history index is
//! built from; [`unified_diff`] renders the line-level diff of one modified
//! file.

use std::collections::BTreeMap;
use std::path::Path;

use git2::Patch;

use crate::model::types::{BlobId, Change, ChangeStatus, RepoPath};

/// full file state of a commit, sorted by path
pub type Tree = BTreeMap<RepoPath, BlobId>;

/// compute the changes that turn `parent` into `tree`
///
/// a root commit (no parent) adds every path it contains. The result is
/// sorted by path.
pub fn diff_trees(parent: Option<&Tree>, tree: &Tree) -> Vec<Change> {
    let empty = Tree::new();
    let parent = parent.unwrap_or(&empty);
    let mut changes = Vec::new();

    for (path, blob) in tree {
        match parent.get(path) {
            None => changes.push(Change {
                path: path.clone(),
                status: ChangeStatus::Added,
                previous: None,
                current: Some(*blob),
                diff: None,
            }),
            Some(previous) if previous != blob => changes.push(Change {
                path: path.clone(),
                status: ChangeStatus::Modified,
                previous: Some(*previous),
                current: Some(*blob),
                diff: None,
            }),
            Some(_) => {}
        }
    }

    for (path, previous) in parent {
        if !tree.contains_key(path) {
            changes.push(Change {
                path: path.clone(),
                status: ChangeStatus::Deleted,
                previous: Some(*previous),
                current: None,
                diff: None,
            });
        }
    }

    changes.sort_by(|a, b| a.path.cmp(&b.path));
    changes
}

/// unified diff of one file between two versions
///
/// `None` unless both versions are UTF-8 text.
pub fn unified_diff(path: &RepoPath, old: &[u8], new: &[u8]) -> Result<Option<String>, git2::Error> {
    if std::str::from_utf8(old).is_err() || std::str::from_utf8(new).is_err() {
        return Ok(None);
    }

    let at = Path::new(path.as_str());
    let mut patch = Patch::from_buffers(old, Some(at), new, Some(at), None)?;
    if patch.delta().flags().is_binary() {
        return Ok(None);
    }
    let buf = patch.to_buf()?;
    Ok(buf.as_str().map(str::to_string))
}
