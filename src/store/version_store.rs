//! The repository contract, implemented once on top of any engine.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use log::{debug, info, warn};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::config::RetryPolicy;
use crate::engine::{CommitWrite, Reclaimed, StorageEngine};
use crate::error::{VcsError, VcsResult};
use crate::graph;
use crate::model::{
    diff_trees, unified_diff, BlobId, BlobPayload, Bundle, Change, CommitDetail, CommitId,
    CommitRecord, CommitSummary, FileHistoryEntry, NewCommit, PushOutcome, RepoName, RepoPath,
    StoredCommit,
};
use crate::store::locks::RepoLocks;
use crate::store::retry::with_retries;

/// Version-control operations over one storage engine.
///
/// Thread-safe: clone it to share across threads (uses Arc internally).
/// Writes to one repository are serialized; everything else runs
/// concurrently and relies on the engine's atomic commit write.
#[derive(Clone)]
pub struct VersionStore {
    inner: Arc<VersionStoreInner>,
}

struct VersionStoreInner {
    engine: Arc<dyn StorageEngine>,
    locks: RepoLocks,
    retry: RetryPolicy,
}

/// overview of one repository
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepoSummary {
    pub name: RepoName,
    pub engine: String,
    pub head: Option<CommitId>,
    pub commit_count: u64,
    /// files in the head tree
    pub file_count: usize,
    pub last_commit: Option<CommitSummary>,
}

/// result of replaying a bundle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RestoreReport {
    /// commits written (commits already present are skipped)
    pub applied: usize,
    pub head: Option<CommitId>,
}

/// result of syncing one repository into another
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncReport {
    /// whether the target had to be created
    pub created: bool,
    pub transferred: usize,
    pub head: Option<CommitId>,
}

impl VersionStore {
    pub fn new(engine: Arc<dyn StorageEngine>, retry: RetryPolicy) -> Self {
        Self {
            inner: Arc::new(VersionStoreInner {
                engine,
                locks: RepoLocks::new(),
                retry,
            }),
        }
    }

    /// name of the underlying engine
    pub fn engine_name(&self) -> &'static str {
        self.inner.engine.kind()
    }

    fn engine(&self) -> &dyn StorageEngine {
        self.inner.engine.as_ref()
    }

    fn run<T>(&self, op: &str, f: impl FnMut() -> VcsResult<T>) -> VcsResult<T> {
        with_retries(&self.inner.retry, op, f)
    }

    /// write lock of an existing repository
    fn lock_for(&self, name: &RepoName) -> VcsResult<Arc<Mutex<()>>> {
        if !self.repo_exists(name)? {
            return Err(VcsError::RepoNotFound(name.clone()));
        }
        Ok(self.inner.locks.get(name))
    }

    // ==================== Repositories ====================

    /// Create an empty repository.
    pub fn create_repo(&self, name: &RepoName) -> VcsResult<()> {
        self.run("create_repo", || self.engine().create_repo(name))?;
        info!("{}: created repository {}", self.engine_name(), name);
        Ok(())
    }

    /// All repository names, sorted.
    pub fn list_repos(&self) -> VcsResult<Vec<RepoName>> {
        self.run("list_repos", || self.engine().list_repos())
    }

    pub fn repo_exists(&self, name: &RepoName) -> VcsResult<bool> {
        self.run("repo_exists", || self.engine().repo_exists(name))
    }

    /// Delete a repository with its commits, index and unshared blobs.
    pub fn delete_repo(&self, name: &RepoName) -> VcsResult<Reclaimed> {
        let lock = self.lock_for(name)?;
        let guard = lock.lock();

        let reclaimed = self.run("delete_repo", || self.engine().delete_repo(name))?;
        self.inner.locks.remove(name);
        drop(guard);
        info!(
            "{}: deleted repository {} ({} commits, {} blobs)",
            self.engine_name(),
            name,
            reclaimed.commits,
            reclaimed.blobs
        );
        Ok(reclaimed)
    }

    pub fn head(&self, name: &RepoName) -> VcsResult<Option<CommitId>> {
        self.run("head", || self.engine().head(name))
    }

    pub fn summary(&self, name: &RepoName) -> VcsResult<RepoSummary> {
        self.run("summary", || {
            let engine = self.engine();
            let head = engine.head(name)?;
            let last = match head {
                Some(id) => Some(self.load(name, &id)?),
                None => None,
            };

            Ok(RepoSummary {
                name: name.clone(),
                engine: self.engine_name().to_string(),
                head,
                commit_count: engine.commit_count(name)?,
                file_count: last.as_ref().map_or(0, |c| c.record.tree.len()),
                last_commit: last.map(|c| c.summary()),
            })
        })
    }

    /// Summaries of every repository, sorted by name.
    pub fn list_summaries(&self) -> VcsResult<Vec<RepoSummary>> {
        self.list_repos()?
            .iter()
            .map(|name| self.summary(name))
            .collect()
    }

    // ==================== Commits ====================

    /// Commit summaries newest first, starting at head or just below the
    /// `before` cursor.
    pub fn commits(
        &self,
        name: &RepoName,
        limit: Option<usize>,
        before: Option<CommitId>,
    ) -> VcsResult<Vec<CommitSummary>> {
        self.run("commits", || {
            let engine = self.engine();
            let head = engine.head(name)?;

            let start = match before {
                None => head,
                Some(cursor) => {
                    let reachable = match head {
                        Some(head) => graph::is_ancestor(engine, name, &cursor, &head)?,
                        None => false,
                    };
                    if !reachable {
                        return Err(VcsError::InvalidCursor {
                            repo: name.clone(),
                            cursor,
                        });
                    }
                    self.load(name, &cursor)?.parent()
                }
            };

            graph::history(engine, name, start)
                .take(limit.unwrap_or(usize::MAX))
                .map(|commit| commit.map(|c| c.summary()))
                .collect()
        })
    }

    /// Full detail of one commit.
    pub fn commit(&self, name: &RepoName, id: &CommitId) -> VcsResult<CommitDetail> {
        self.run("commit", || self.load(name, id).map(|c| c.detail()))
    }

    /// Whether the commit belongs to the repository.
    pub fn commit_exists(&self, name: &RepoName, id: &CommitId) -> VcsResult<bool> {
        self.run("commit_exists", || {
            Ok(self.engine().load_commit(name, id)?.is_some())
        })
    }

    fn load(&self, name: &RepoName, id: &CommitId) -> VcsResult<StoredCommit> {
        self.engine()
            .load_commit(name, id)?
            .ok_or_else(|| VcsError::CommitNotFound {
                repo: name.clone(),
                id: *id,
            })
    }

    /// Push a commit on top of the current head.
    ///
    /// The commit's parent must be the head (or absent on an empty
    /// repository). Pushing the commit that already is the head is a no-op.
    pub fn push(&self, name: &RepoName, commit: NewCommit) -> VcsResult<PushOutcome> {
        let prepared = commit.prepare()?;
        let contents: BTreeMap<BlobId, &[u8]> = prepared
            .contents
            .iter()
            .map(|(id, bytes)| (*id, bytes.as_slice()))
            .collect();

        let lock = self.lock_for(name)?;
        let _guard = lock.lock();
        self.run("push", || self.apply_locked(name, &prepared.record, &contents))
    }

    /// write one commit; the caller holds the repository lock
    fn apply_locked(
        &self,
        name: &RepoName,
        record: &CommitRecord,
        contents: &BTreeMap<BlobId, &[u8]>,
    ) -> VcsResult<PushOutcome> {
        let engine = self.engine();
        let head = engine.head(name)?;
        let id = record.id()?;

        if head == Some(id) {
            let existing = self.load(name, &id)?;
            debug!("{}: {} already at {}", self.engine_name(), name, id.short());
            return Ok(PushOutcome {
                id,
                created: false,
                change_count: existing.changes.len(),
            });
        }

        let base = graph::fast_forward_base(engine, name, head, record.parent)?;
        let mut changes = diff_trees(base.as_ref().map(|b| &b.record.tree), &record.tree);
        self.attach_diffs(name, &mut changes, contents)?;

        let mut blobs = Vec::new();
        let mut seen = BTreeSet::new();
        for blob in changes.iter().filter_map(|change| change.current) {
            if !seen.insert(blob) {
                continue;
            }
            let content = contents
                .get(&blob)
                .ok_or_else(|| VcsError::InvalidBundle(format!("missing content for blob {}", blob)))?;
            blobs.push((blob, *content));
        }

        let stored = StoredCommit {
            id,
            record: record.clone(),
            depth: base.as_ref().map_or(0, |b| b.depth + 1),
            changes,
        };

        engine.write_commit(
            name,
            CommitWrite {
                commit: &stored,
                blobs,
                expected_head: head,
            },
        )?;

        info!(
            "{}: pushed {} to {} ({} changes)",
            self.engine_name(),
            id.short(),
            name,
            stored.changes.len()
        );
        Ok(PushOutcome {
            id,
            created: true,
            change_count: stored.changes.len(),
        })
    }

    /// fill in the unified diff of every modified path
    fn attach_diffs(
        &self,
        name: &RepoName,
        changes: &mut [Change],
        contents: &BTreeMap<BlobId, &[u8]>,
    ) -> VcsResult<()> {
        for change in changes.iter_mut() {
            let (Some(previous), Some(current)) = (change.previous, change.current) else {
                continue;
            };
            let old = self.engine().read_blob(&previous)?.ok_or_else(|| {
                VcsError::corrupted(
                    PathBuf::from(name.as_str()),
                    format!("blob {} of parent version of {} is missing", previous, change.path),
                )
            })?;
            let new = contents.get(&current).ok_or_else(|| {
                VcsError::InvalidBundle(format!("missing content for blob {}", current))
            })?;
            change.diff = unified_diff(&change.path, &old, new)?;
        }
        Ok(())
    }

    // ==================== Transfer ====================

    /// Commits after `since` up to head, ancestor first, with every blob
    /// they introduce.
    pub fn pull(&self, name: &RepoName, since: Option<CommitId>) -> VcsResult<Bundle> {
        self.run("pull", || {
            let engine = self.engine();
            let head = engine.head(name)?;
            let commits = graph::range(engine, name, head, since)?;

            let mut seen = BTreeSet::new();
            let mut blobs = Vec::new();
            for change in commits.iter().flat_map(|c| &c.changes) {
                let Some(blob) = change.current else { continue };
                if !seen.insert(blob) {
                    continue;
                }
                let content = engine.read_blob(&blob)?.ok_or_else(|| {
                    VcsError::corrupted(
                        PathBuf::from(name.as_str()),
                        format!("blob {} referenced by {} is missing", blob, change.path),
                    )
                })?;
                blobs.push(BlobPayload { id: blob, content });
            }

            debug!(
                "{}: pulled {} commits, {} blobs from {}",
                self.engine_name(),
                commits.len(),
                blobs.len(),
                name
            );
            Ok(Bundle {
                repo: name.clone(),
                engine: self.engine_name().to_string(),
                base: since,
                head,
                commits: commits.iter().map(|c| c.detail()).collect(),
                blobs,
            })
        })
    }

    /// Everything reachable from head, as a bundle.
    pub fn clone_bundle(&self, name: &RepoName) -> VcsResult<Bundle> {
        self.pull(name, None)
    }

    /// Replay a bundle onto a repository whose head is the bundle's base.
    ///
    /// Commits the repository already has (a restore that was interrupted,
    /// or run twice) are skipped. Every commit id is recomputed and every
    /// blob rehashed before anything is written.
    pub fn restore(&self, name: &RepoName, bundle: &Bundle) -> VcsResult<RestoreReport> {
        let contents = verify_bundle(bundle)?;

        let lock = self.lock_for(name)?;
        let _guard = lock.lock();

        self.run("restore", || {
            let head = self.engine().head(name)?;
            let start = if head == bundle.base {
                0
            } else if let Some(pos) = bundle.commits.iter().position(|c| Some(c.id) == head) {
                pos + 1
            } else {
                return Err(VcsError::NonFastForward {
                    repo: name.clone(),
                    head,
                    parent: bundle.base,
                });
            };

            for detail in &bundle.commits[start..] {
                self.apply_locked(name, &detail.record(), &contents)?;
            }

            let applied = bundle.commits.len() - start;
            if applied > 0 {
                info!(
                    "{}: restored {} commits into {}",
                    self.engine_name(),
                    applied,
                    name
                );
            }
            Ok(RestoreReport {
                applied,
                head: self.engine().head(name)?,
            })
        })
    }

    /// Create `target` as a copy of `source`.
    ///
    /// a half-built target is removed again if the copy fails
    pub fn clone_repo(&self, source: &RepoName, target: &RepoName) -> VcsResult<RestoreReport> {
        let bundle = self.clone_bundle(source)?;
        self.create_repo(target)?;

        match self.restore(target, &bundle) {
            Ok(report) => Ok(report),
            Err(e) => {
                if let Err(cleanup) = self.delete_repo(target) {
                    warn!("failed to remove partial clone {}: {}", target, cleanup);
                }
                Err(e)
            }
        }
    }

    /// Fast-forward `target` with the commits of `source` it lacks,
    /// creating it first if needed.
    pub fn sync(&self, source: &RepoName, target: &RepoName) -> VcsResult<SyncReport> {
        // a missing source must not leave an empty target behind
        self.head(source)?;

        let created = if self.repo_exists(target)? {
            false
        } else {
            match self.create_repo(target) {
                Ok(()) => true,
                // created concurrently, sync into it all the same
                Err(VcsError::RepoAlreadyExists(_)) => false,
                Err(e) => return Err(e),
            }
        };

        let target_head = self.head(target)?;
        let source_head = self.head(source)?;

        if let Some(target_head) = target_head {
            let contained = match source_head {
                Some(source_head) => {
                    graph::is_ancestor(self.engine(), source, &target_head, &source_head)?
                }
                None => false,
            };
            if !contained {
                return Err(VcsError::Diverged {
                    origin: source.clone(),
                    target: target.clone(),
                });
            }
        }

        let bundle = self.pull(source, target_head)?;
        let report = self.restore(target, &bundle)?;
        Ok(SyncReport {
            created,
            transferred: report.applied,
            head: report.head,
        })
    }

    // ==================== Files ====================

    /// Commits that changed `path`, newest first.
    pub fn file_history(&self, name: &RepoName, path: &RepoPath) -> VcsResult<Vec<FileHistoryEntry>> {
        self.run("file_history", || {
            let entries = self.engine().file_history(name, path)?;
            entries
                .into_iter()
                .map(|entry| {
                    let commit = self.engine().load_commit(name, &entry.commit)?.ok_or_else(|| {
                        VcsError::corrupted(
                            PathBuf::from(name.as_str()),
                            format!("index names unknown commit {}", entry.commit),
                        )
                    })?;
                    Ok(FileHistoryEntry {
                        commit: commit.summary(),
                        change: entry.change,
                    })
                })
                .collect()
        })
    }

    /// Bytes of `path` as of `commit`.
    pub fn file_content(&self, name: &RepoName, commit: &CommitId, path: &RepoPath) -> VcsResult<Vec<u8>> {
        self.run("file_content", || {
            let stored = self.load(name, commit)?;
            let blob = stored
                .record
                .tree
                .get(path)
                .ok_or_else(|| VcsError::PathNotFound {
                    repo: name.clone(),
                    commit: *commit,
                    path: path.clone(),
                })?;

            self.engine().read_blob(blob)?.ok_or_else(|| {
                VcsError::corrupted(
                    PathBuf::from(name.as_str()),
                    format!("blob {} for {} is missing", blob, path),
                )
            })
        })
    }
}

/// check every blob hash and commit id of a bundle, and that its commits
/// form one chain starting at `base`
fn verify_bundle(bundle: &Bundle) -> VcsResult<BTreeMap<BlobId, &[u8]>> {
    let mut contents = BTreeMap::new();
    for payload in &bundle.blobs {
        let actual = BlobId::for_content(&payload.content)?;
        if actual != payload.id {
            return Err(VcsError::InvalidBundle(format!(
                "blob {} hashes to {}",
                payload.id, actual
            )));
        }
        contents.insert(payload.id, payload.content.as_slice());
    }

    let mut expected_parent = bundle.base;
    for detail in &bundle.commits {
        let actual = detail.record().id()?;
        if actual != detail.id {
            return Err(VcsError::InvalidBundle(format!(
                "commit {} hashes to {}",
                detail.id, actual
            )));
        }
        if detail.parent != expected_parent {
            return Err(VcsError::InvalidBundle(format!(
                "commit {} does not follow {}",
                detail.id,
                expected_parent.map_or_else(|| "the root".to_string(), |p| p.to_string())
            )));
        }
        expected_parent = Some(detail.id);
    }

    if expected_parent != bundle.head {
        return Err(VcsError::InvalidBundle("bundle head is not its last commit".to_string()));
    }
    Ok(contents)
}

impl fmt::Debug for VersionStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VersionStore")
            .field("engine", &self.engine_name())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::SqliteFsEngine;
    use crate::model::ChangeStatus;
    use tempfile::TempDir;

    fn setup() -> (TempDir, VersionStore) {
        let dir = TempDir::new().unwrap();
        let engine = SqliteFsEngine::open(dir.path(), &Default::default()).unwrap();
        (dir, VersionStore::new(Arc::new(engine), RetryPolicy::default()))
    }

    fn name(raw: &str) -> RepoName {
        RepoName::new(raw).unwrap()
    }

    fn path(raw: &str) -> RepoPath {
        RepoPath::new(raw).unwrap()
    }

    fn push(store: &VersionStore, repo: &RepoName, parent: Option<CommitId>, files: &[(&str, &str)]) -> CommitId {
        let mut commit = NewCommit::new("alice", "change").parent_id(parent);
        for (p, content) in files {
            commit = commit.file(path(p), content.as_bytes());
        }
        store.push(repo, commit).unwrap().id
    }

    #[test]
    fn test_push_reports_changes_and_is_idempotent() {
        let (_dir, store) = setup();
        let demo = name("demo");
        store.create_repo(&demo).unwrap();

        let commit = NewCommit::new("alice", "first").file(path("a.txt"), "hello");
        let first = store.push(&demo, commit.clone()).unwrap();
        assert!(first.created);
        assert_eq!(first.change_count, 1);

        let again = store.push(&demo, commit).unwrap();
        assert_eq!(again.id, first.id);
        assert!(!again.created);
        assert_eq!(store.commits(&demo, None, None).unwrap().len(), 1);
    }

    #[test]
    fn test_push_to_missing_repo() {
        let (_dir, store) = setup();
        let result = store.push(&name("ghost"), NewCommit::new("alice", "x"));
        assert!(matches!(result, Err(VcsError::RepoNotFound(_))));
        assert!(matches!(store.delete_repo(&name("ghost")), Err(VcsError::RepoNotFound(_))));
        assert_eq!(store.inner.locks.len(), 0);
    }

    #[test]
    fn test_delete_drops_the_repo_lock() {
        let (_dir, store) = setup();
        let demo = name("demo");
        store.create_repo(&demo).unwrap();
        push(&store, &demo, None, &[("a.txt", "1")]);
        assert_eq!(store.inner.locks.len(), 1);

        store.delete_repo(&demo).unwrap();
        assert_eq!(store.inner.locks.len(), 0);
    }

    #[test]
    fn test_sync_from_missing_source_creates_nothing() {
        let (_dir, store) = setup();
        let result = store.sync(&name("ghost"), &name("target"));

        assert!(matches!(result, Err(VcsError::RepoNotFound(_))));
        assert!(!store.repo_exists(&name("target")).unwrap());
        assert!(store.list_repos().unwrap().is_empty());
    }

    #[test]
    fn test_commits_pagination() {
        let (_dir, store) = setup();
        let demo = name("demo");
        store.create_repo(&demo).unwrap();

        let c1 = push(&store, &demo, None, &[("a.txt", "1")]);
        let c2 = push(&store, &demo, Some(c1), &[("a.txt", "2")]);
        let c3 = push(&store, &demo, Some(c2), &[("a.txt", "3")]);

        let ids = |list: Vec<CommitSummary>| list.into_iter().map(|c| c.id).collect::<Vec<_>>();
        assert_eq!(ids(store.commits(&demo, None, None).unwrap()), vec![c3, c2, c1]);
        assert_eq!(ids(store.commits(&demo, Some(2), None).unwrap()), vec![c3, c2]);
        assert_eq!(ids(store.commits(&demo, None, Some(c2)).unwrap()), vec![c1]);
        assert!(store.commits(&demo, None, Some(c1)).unwrap().is_empty());

        let stranger = NewCommit::new("bob", "x").prepare().unwrap().record.id().unwrap();
        assert!(matches!(
            store.commits(&demo, None, Some(stranger)),
            Err(VcsError::InvalidCursor { .. })
        ));
    }

    #[test]
    fn test_commit_lookup() {
        let (_dir, store) = setup();
        let demo = name("demo");
        store.create_repo(&demo).unwrap();
        store.create_repo(&name("other")).unwrap();
        let c1 = push(&store, &demo, None, &[("a.txt", "1")]);

        let detail = store.commit(&demo, &c1).unwrap();
        assert_eq!(detail.id, c1);
        assert_eq!(detail.changes[0].status, ChangeStatus::Added);

        assert!(store.commit_exists(&demo, &c1).unwrap());
        assert!(!store.commit_exists(&name("other"), &c1).unwrap());
        assert!(matches!(
            store.commit(&name("other"), &c1),
            Err(VcsError::CommitNotFound { .. })
        ));
        assert!(matches!(
            store.commit_exists(&name("ghost"), &c1),
            Err(VcsError::RepoNotFound(_))
        ));
    }

    #[test]
    fn test_modified_text_files_carry_a_diff() {
        let (_dir, store) = setup();
        let demo = name("demo");
        store.create_repo(&demo).unwrap();

        let c1 = push(&store, &demo, None, &[("a.txt", "hello\n"), ("b.bin", "\u{0}")]);
        let c2 = store
            .push(
                &demo,
                NewCommit::new("alice", "edit")
                    .parent(c1)
                    .file(path("a.txt"), "world\n")
                    .file(path("b.bin"), vec![0xff, 0x00]),
            )
            .unwrap()
            .id;

        let first = store.commit(&demo, &c1).unwrap();
        assert!(first.changes.iter().all(|c| c.diff.is_none()));

        let detail = store.commit(&demo, &c2).unwrap();
        let text = detail.changes.iter().find(|c| c.path == path("a.txt")).unwrap();
        let diff = text.diff.as_deref().unwrap();
        assert!(diff.contains("-hello"));
        assert!(diff.contains("+world"));
        let binary = detail.changes.iter().find(|c| c.path == path("b.bin")).unwrap();
        assert_eq!(binary.diff, None);

        let history = store.file_history(&demo, &path("a.txt")).unwrap();
        assert_eq!(history[0].change.diff, text.diff);
        assert_eq!(history[1].change.diff, None);
    }

    #[test]
    fn test_file_content_and_summary() {
        let (_dir, store) = setup();
        let demo = name("demo");
        store.create_repo(&demo).unwrap();

        let empty = store.summary(&demo).unwrap();
        assert_eq!(empty.head, None);
        assert_eq!(empty.commit_count, 0);
        assert_eq!(empty.last_commit, None);

        let c1 = push(&store, &demo, None, &[("a.txt", "hello"), ("b.txt", "b")]);
        assert_eq!(store.file_content(&demo, &c1, &path("a.txt")).unwrap(), b"hello");
        assert!(matches!(
            store.file_content(&demo, &c1, &path("nope.txt")),
            Err(VcsError::PathNotFound { .. })
        ));

        let summary = store.summary(&demo).unwrap();
        assert_eq!(summary.engine, "sqlite_fs");
        assert_eq!(summary.head, Some(c1));
        assert_eq!(summary.commit_count, 1);
        assert_eq!(summary.file_count, 2);
        assert_eq!(summary.last_commit.map(|c| c.id), Some(c1));
        assert_eq!(store.list_summaries().unwrap().len(), 1);
    }

    #[test]
    fn test_restore_rejects_tampered_bundles() {
        let (_dir, store) = setup();
        let demo = name("demo");
        store.create_repo(&demo).unwrap();
        push(&store, &demo, None, &[("a.txt", "hello")]);
        let bundle = store.clone_bundle(&demo).unwrap();
        store.create_repo(&name("copy")).unwrap();

        let mut bad_blob = bundle.clone();
        bad_blob.blobs[0].content = b"evil".to_vec();
        assert!(matches!(
            store.restore(&name("copy"), &bad_blob),
            Err(VcsError::InvalidBundle(_))
        ));

        let mut bad_commit = bundle.clone();
        bad_commit.commits[0].message = "rewritten".to_string();
        assert!(matches!(
            store.restore(&name("copy"), &bad_commit),
            Err(VcsError::InvalidBundle(_))
        ));

        let mut missing_blob = bundle.clone();
        missing_blob.blobs.clear();
        assert!(matches!(
            store.restore(&name("copy"), &missing_blob),
            Err(VcsError::InvalidBundle(_))
        ));
        assert_eq!(store.head(&name("copy")).unwrap(), None);
    }

    #[test]
    fn test_restore_skips_commits_already_present() {
        let (_dir, store) = setup();
        let demo = name("demo");
        store.create_repo(&demo).unwrap();
        let c1 = push(&store, &demo, None, &[("a.txt", "1")]);
        let c2 = push(&store, &demo, Some(c1), &[("a.txt", "2")]);
        let bundle = store.clone_bundle(&demo).unwrap();

        let copy = name("copy");
        store.create_repo(&copy).unwrap();
        push(&store, &copy, None, &[("a.txt", "unrelated")]);
        assert!(matches!(
            store.restore(&copy, &bundle),
            Err(VcsError::NonFastForward { .. })
        ));

        let copy2 = name("copy2");
        assert_eq!(store.clone_repo(&demo, &copy2).unwrap().applied, 2);
        let again = store.restore(&copy2, &bundle).unwrap();
        assert_eq!(again, RestoreReport { applied: 0, head: Some(c2) });
    }

    #[test]
    fn test_clone_repo_into_existing_target() {
        let (_dir, store) = setup();
        let demo = name("demo");
        store.create_repo(&demo).unwrap();
        store.create_repo(&name("taken")).unwrap();

        assert!(matches!(
            store.clone_repo(&demo, &name("taken")),
            Err(VcsError::RepoAlreadyExists(_))
        ));
        assert!(store.repo_exists(&name("taken")).unwrap());
    }

    #[test]
    fn test_sync() {
        let (_dir, store) = setup();
        let (source, target) = (name("source"), name("target"));
        store.create_repo(&source).unwrap();
        let c1 = push(&store, &source, None, &[("a.txt", "1")]);

        let first = store.sync(&source, &target).unwrap();
        assert_eq!(first, SyncReport { created: true, transferred: 1, head: Some(c1) });

        let c2 = push(&store, &source, Some(c1), &[("a.txt", "2")]);
        let second = store.sync(&source, &target).unwrap();
        assert_eq!(second, SyncReport { created: false, transferred: 1, head: Some(c2) });

        let up_to_date = store.sync(&source, &target).unwrap();
        assert_eq!(up_to_date.transferred, 0);

        // target moves on its own
        push(&store, &target, Some(c2), &[("a.txt", "target only")]);
        assert!(matches!(
            store.sync(&source, &target),
            Err(VcsError::Diverged { .. })
        ));
    }
}
