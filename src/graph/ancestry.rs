//! Parent-link traversal over any engine.

use std::path::PathBuf;

use crate::engine::StorageEngine;
use crate::error::{VcsError, VcsResult};
use crate::model::{CommitId, RepoName, StoredCommit};

/// Iterator over a commit and its ancestors, newest first.
///
/// A parent link pointing at a commit the engine does not have is reported
/// as corruption and ends the walk.
pub struct History<'a> {
    engine: &'a dyn StorageEngine,
    repo: &'a RepoName,
    next: Option<CommitId>,
}

/// walk back from `from` (nothing if `None`)
pub fn history<'a>(
    engine: &'a dyn StorageEngine,
    repo: &'a RepoName,
    from: Option<CommitId>,
) -> History<'a> {
    History {
        engine,
        repo,
        next: from,
    }
}

impl Iterator for History<'_> {
    type Item = VcsResult<StoredCommit>;

    fn next(&mut self) -> Option<Self::Item> {
        let id = self.next.take()?;
        match self.engine.load_commit(self.repo, &id) {
            Ok(Some(commit)) => {
                self.next = commit.parent();
                Some(Ok(commit))
            }
            Ok(None) => Some(Err(VcsError::corrupted(
                PathBuf::from(self.repo.as_str()),
                format!("dangling commit reference {}", id),
            ))),
            Err(e) => Some(Err(e)),
        }
    }
}

/// whether `ancestor` is `descendant` or one of its ancestors
///
/// the walk stops as soon as it reaches the depth of `ancestor`, so it never
/// visits more than `depth(descendant) - depth(ancestor)` commits
pub fn is_ancestor(
    engine: &dyn StorageEngine,
    repo: &RepoName,
    ancestor: &CommitId,
    descendant: &CommitId,
) -> VcsResult<bool> {
    let Some(target) = engine.load_commit(repo, ancestor)? else {
        return Ok(false);
    };

    for commit in history(engine, repo, Some(*descendant)) {
        let commit = commit?;
        if commit.depth <= target.depth {
            return Ok(commit.id == target.id);
        }
    }
    Ok(false)
}

/// commits after `since` up to and including `head`, ancestor first
///
/// `since` must be `None` or an ancestor-or-self of `head`; anything else is
/// an `InvalidCursor`
pub fn range(
    engine: &dyn StorageEngine,
    repo: &RepoName,
    head: Option<CommitId>,
    since: Option<CommitId>,
) -> VcsResult<Vec<StoredCommit>> {
    let invalid = |cursor: CommitId| VcsError::InvalidCursor {
        repo: repo.clone(),
        cursor,
    };

    let stop = match since {
        Some(cursor) => Some(
            engine
                .load_commit(repo, &cursor)?
                .ok_or_else(|| invalid(cursor))?,
        ),
        None => None,
    };

    let mut commits = Vec::new();
    for commit in history(engine, repo, head) {
        let commit = commit?;
        if let Some(stop) = &stop {
            if commit.id == stop.id {
                commits.reverse();
                return Ok(commits);
            }
            if commit.depth <= stop.depth {
                return Err(invalid(stop.id));
            }
        }
        commits.push(commit);
    }

    match stop {
        Some(stop) => Err(invalid(stop.id)),
        None => {
            commits.reverse();
            Ok(commits)
        }
    }
}
