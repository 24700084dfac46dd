//! Commit graph logic shared by every engine.
//!
//! Histories are linear: each commit has at most one parent and a push must
//! extend the current head. Merges are not supported.

mod ancestry;

pub use ancestry::{history, is_ancestor, range, History};

use crate::engine::StorageEngine;
use crate::error::{VcsError, VcsResult};
use crate::model::{CommitId, RepoName, StoredCommit};

/// check that a commit with `parent` may become the new head
///
/// returns the parent commit (`None` for a root commit on an empty
/// repository). An unknown parent is invalid input; a known parent that
/// isn't the head is a conflict.
pub fn fast_forward_base(
    engine: &dyn StorageEngine,
    repo: &RepoName,
    head: Option<CommitId>,
    parent: Option<CommitId>,
) -> VcsResult<Option<StoredCommit>> {
    let base = match parent {
        Some(parent) => Some(engine.load_commit(repo, &parent)?.ok_or_else(|| {
            VcsError::UnknownParent {
                repo: repo.clone(),
                parent,
            }
        })?),
        None => None,
    };

    if parent != head {
        return Err(VcsError::NonFastForward {
            repo: repo.clone(),
            head,
            parent,
        });
    }
    Ok(base)
}
