//! `sqlite_fs` engine: relational rows in SQLite, blob bytes on disk.
//!
//! Layout under the engine root:
//!
//! ```text
//! vcs.db           repositories, commits, trees, change rows, blob ref counts
//! objects/ab/cd..  blob payloads (see [`ObjectStore`])
//! ```
//!
//! The `changes` table doubles as the file history index: it is keyed by
//! `(repo, path, depth)` so a history query is one index range scan.
//! Blobs are shared by every repository; `repo_blobs` records which
//! repositories use a blob and `blobs.ref_count` counts them.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;

use chrono::Utc;
use log::{debug, info};
use parking_lot::{Mutex, RwLock};
use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};

use crate::config::{SqliteConfig, StoreConfig};
use crate::engine::objects::ObjectStore;
use crate::engine::{CommitWrite, Reclaimed, StorageEngine};
use crate::error::{VcsError, VcsResult};
use crate::index::IndexEntry;
use crate::model::{
    format_timestamp, parse_timestamp, BlobId, Change, CommitId, CommitRecord, RepoName, RepoPath,
    StoredCommit, Tree,
};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS repos (
    name       TEXT PRIMARY KEY,
    head       TEXT,
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS commits (
    repo      TEXT NOT NULL REFERENCES repos(name),
    id        TEXT NOT NULL,
    parent    TEXT,
    depth     INTEGER NOT NULL,
    message   TEXT NOT NULL,
    author    TEXT NOT NULL,
    timestamp TEXT NOT NULL,
    PRIMARY KEY (repo, id)
);

CREATE TABLE IF NOT EXISTS tree_entries (
    repo      TEXT NOT NULL,
    commit_id TEXT NOT NULL,
    path      TEXT NOT NULL,
    blob      TEXT NOT NULL,
    PRIMARY KEY (repo, commit_id, path),
    FOREIGN KEY (repo, commit_id) REFERENCES commits(repo, id)
);

CREATE TABLE IF NOT EXISTS changes (
    repo          TEXT NOT NULL,
    commit_id     TEXT NOT NULL,
    path          TEXT NOT NULL,
    depth         INTEGER NOT NULL,
    status        TEXT NOT NULL,
    previous_blob TEXT,
    current_blob  TEXT,
    diff          TEXT,
    PRIMARY KEY (repo, commit_id, path),
    FOREIGN KEY (repo, commit_id) REFERENCES commits(repo, id)
);

CREATE INDEX IF NOT EXISTS changes_by_path ON changes (repo, path, depth);

CREATE TABLE IF NOT EXISTS blobs (
    id        TEXT PRIMARY KEY,
    size      INTEGER NOT NULL,
    ref_count INTEGER NOT NULL DEFAULT 0
);

CREATE TABLE IF NOT EXISTS repo_blobs (
    repo TEXT NOT NULL REFERENCES repos(name),
    blob TEXT NOT NULL REFERENCES blobs(id),
    PRIMARY KEY (repo, blob)
);
";

pub struct SqliteFsEngine {
    conn: Mutex<Connection>,
    objects: ObjectStore,
    db_path: PathBuf,
    /// pushes share it, deletion takes it exclusively
    reclaim: RwLock<()>,
}

impl SqliteFsEngine {
    pub const NAME: &'static str = "sqlite_fs";

    /// open (creating if needed) the engine under `root`
    pub fn open(root: impl AsRef<Path>, config: &SqliteConfig) -> VcsResult<Self> {
        let root = root.as_ref();
        std::fs::create_dir_all(root)?;

        let db_path = root.join("vcs.db");
        let conn = Connection::open(&db_path)?;
        conn.busy_timeout(config.busy_timeout())?;
        conn.execute_batch("PRAGMA journal_mode = WAL; PRAGMA foreign_keys = ON;")?;
        conn.execute_batch(SCHEMA)?;

        let objects = ObjectStore::open(root.join("objects"))?;
        debug!("opened sqlite_fs engine at {}", root.display());

        Ok(Self {
            conn: Mutex::new(conn),
            objects,
            db_path,
            reclaim: RwLock::new(()),
        })
    }

    /// registry factory
    pub fn factory(config: &StoreConfig) -> VcsResult<Arc<dyn StorageEngine>> {
        let engine = Self::open(config.engine_root(Self::NAME), &config.sqlite)?;
        Ok(Arc::new(engine))
    }

    fn decode<T: FromStr>(&self, raw: &str, what: &str) -> VcsResult<T> {
        raw.parse()
            .map_err(|_| VcsError::corrupted(&self.db_path, format!("bad {}: '{}'", what, raw)))
    }

    fn decode_opt<T: FromStr>(&self, raw: Option<String>, what: &str) -> VcsResult<Option<T>> {
        raw.map(|raw| self.decode(&raw, what)).transpose()
    }

    /// head of `name`, or `RepoNotFound`
    fn repo_head(&self, conn: &Connection, name: &RepoName) -> VcsResult<Option<CommitId>> {
        let head: Option<Option<String>> = conn
            .query_row(
                "SELECT head FROM repos WHERE name = ?1",
                params![name.as_str()],
                |row| row.get(0),
            )
            .optional()?;

        match head {
            Some(head) => self.decode_opt(head, "head"),
            None => Err(VcsError::RepoNotFound(name.clone())),
        }
    }

    fn load_tree(&self, conn: &Connection, name: &RepoName, id: &str) -> VcsResult<Tree> {
        let mut stmt = conn
            .prepare_cached("SELECT path, blob FROM tree_entries WHERE repo = ?1 AND commit_id = ?2")?;
        let rows = stmt
            .query_map(params![name.as_str(), id], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        let mut tree = Tree::new();
        for (path, blob) in rows {
            tree.insert(self.decode(&path, "path")?, self.decode(&blob, "blob id")?);
        }
        Ok(tree)
    }

    fn load_changes(&self, conn: &Connection, name: &RepoName, id: &str) -> VcsResult<Vec<Change>> {
        let mut stmt = conn.prepare_cached(
            "SELECT path, status, previous_blob, current_blob, diff FROM changes
             WHERE repo = ?1 AND commit_id = ?2 ORDER BY path",
        )?;
        let rows = stmt
            .query_map(params![name.as_str(), id], ChangeRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;

        rows.into_iter().map(|row| row.decode(self)).collect()
    }
}

/// raw columns of a `changes` row
struct ChangeRow {
    path: String,
    status: String,
    previous: Option<String>,
    current: Option<String>,
    diff: Option<String>,
}

impl ChangeRow {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            path: row.get(0)?,
            status: row.get(1)?,
            previous: row.get(2)?,
            current: row.get(3)?,
            diff: row.get(4)?,
        })
    }

    fn decode(self, engine: &SqliteFsEngine) -> VcsResult<Change> {
        Ok(Change {
            path: engine.decode(&self.path, "path")?,
            status: engine.decode(&self.status, "change status")?,
            previous: engine.decode_opt(self.previous, "blob id")?,
            current: engine.decode_opt(self.current, "blob id")?,
            diff: self.diff,
        })
    }
}

impl StorageEngine for SqliteFsEngine {
    fn kind(&self) -> &'static str {
        Self::NAME
    }

    fn create_repo(&self, name: &RepoName) -> VcsResult<()> {
        let conn = self.conn.lock();
        let inserted = conn.execute(
            "INSERT OR IGNORE INTO repos (name, head, created_at) VALUES (?1, NULL, ?2)",
            params![name.as_str(), format_timestamp(&Utc::now())],
        )?;

        if inserted == 0 {
            return Err(VcsError::RepoAlreadyExists(name.clone()));
        }
        info!("sqlite_fs: created repository {}", name);
        Ok(())
    }

    fn repo_exists(&self, name: &RepoName) -> VcsResult<bool> {
        let conn = self.conn.lock();
        let found: Option<i64> = conn
            .query_row(
                "SELECT 1 FROM repos WHERE name = ?1",
                params![name.as_str()],
                |row| row.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }

    fn list_repos(&self) -> VcsResult<Vec<RepoName>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare("SELECT name FROM repos ORDER BY name")?;
        let names = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;

        names
            .iter()
            .map(|name| self.decode(name, "repository name"))
            .collect()
    }

    fn delete_repo(&self, name: &RepoName) -> VcsResult<Reclaimed> {
        let _exclusive = self.reclaim.write();
        let mut conn = self.conn.lock();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        self.repo_head(&tx, name)?;
        let repo = name.as_str();

        tx.execute("DELETE FROM changes WHERE repo = ?1", params![repo])?;
        tx.execute("DELETE FROM tree_entries WHERE repo = ?1", params![repo])?;
        let commits = tx.execute("DELETE FROM commits WHERE repo = ?1", params![repo])?;

        tx.execute(
            "UPDATE blobs SET ref_count = ref_count - 1
             WHERE id IN (SELECT blob FROM repo_blobs WHERE repo = ?1)",
            params![repo],
        )?;
        tx.execute("DELETE FROM repo_blobs WHERE repo = ?1", params![repo])?;
        tx.execute("DELETE FROM repos WHERE name = ?1", params![repo])?;

        let orphaned = {
            let mut stmt = tx.prepare("SELECT id FROM blobs WHERE ref_count <= 0")?;
            let ids = stmt
                .query_map([], |row| row.get::<_, String>(0))?
                .collect::<Result<Vec<_>, _>>()?;
            ids
        };
        tx.execute("DELETE FROM blobs WHERE ref_count <= 0", [])?;
        tx.commit()?;

        // rows are gone, so no reader can reach these files any more
        let mut blobs = 0;
        for raw in &orphaned {
            let id: BlobId = self.decode(raw, "blob id")?;
            if self.objects.remove(&id)? {
                blobs += 1;
            }
        }

        info!(
            "sqlite_fs: deleted repository {} ({} commits, {} blobs reclaimed)",
            name, commits, blobs
        );
        Ok(Reclaimed { commits, blobs })
    }

    fn head(&self, name: &RepoName) -> VcsResult<Option<CommitId>> {
        let conn = self.conn.lock();
        self.repo_head(&conn, name)
    }

    fn load_commit(&self, name: &RepoName, id: &CommitId) -> VcsResult<Option<StoredCommit>> {
        let conn = self.conn.lock();
        let raw_id = id.to_string();

        let row = conn
            .query_row(
                "SELECT parent, depth, message, author, timestamp FROM commits
                 WHERE repo = ?1 AND id = ?2",
                params![name.as_str(), raw_id],
                |row| {
                    Ok((
                        row.get::<_, Option<String>>(0)?,
                        row.get::<_, i64>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, String>(4)?,
                    ))
                },
            )
            .optional()?;

        let Some((parent, depth, message, author, timestamp)) = row else {
            self.repo_head(&conn, name)?;
            return Ok(None);
        };

        let record = CommitRecord {
            parent: self.decode_opt(parent, "parent id")?,
            tree: self.load_tree(&conn, name, &raw_id)?,
            message,
            author,
            timestamp: parse_timestamp(&timestamp)
                .map_err(|e| VcsError::corrupted(&self.db_path, format!("bad timestamp: {}", e)))?,
        };

        if record.id()? != *id {
            return Err(VcsError::corrupted(
                &self.db_path,
                format!("commit {} does not hash to its id", id),
            ));
        }

        Ok(Some(StoredCommit {
            id: *id,
            record,
            depth: u64::try_from(depth)
                .map_err(|_| VcsError::corrupted(&self.db_path, "negative depth"))?,
            changes: self.load_changes(&conn, name, &raw_id)?,
        }))
    }

    fn read_blob(&self, id: &BlobId) -> VcsResult<Option<Vec<u8>>> {
        self.objects.read(id)
    }

    fn file_history(&self, name: &RepoName, path: &RepoPath) -> VcsResult<Vec<IndexEntry>> {
        let conn = self.conn.lock();
        self.repo_head(&conn, name)?;

        let mut stmt = conn.prepare_cached(
            "SELECT commit_id, depth, path, status, previous_blob, current_blob, diff FROM changes
             WHERE repo = ?1 AND path = ?2 ORDER BY depth DESC",
        )?;
        let rows = stmt
            .query_map(params![name.as_str(), path.as_str()], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, i64>(1)?,
                    ChangeRow {
                        path: row.get(2)?,
                        status: row.get(3)?,
                        previous: row.get(4)?,
                        current: row.get(5)?,
                        diff: row.get(6)?,
                    },
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        rows.into_iter()
            .map(|(commit, depth, change)| {
                Ok(IndexEntry {
                    commit: self.decode(&commit, "commit id")?,
                    depth: u64::try_from(depth)
                        .map_err(|_| VcsError::corrupted(&self.db_path, "negative depth"))?,
                    change: change.decode(self)?,
                })
            })
            .collect()
    }

    fn commit_count(&self, name: &RepoName) -> VcsResult<u64> {
        let conn = self.conn.lock();
        self.repo_head(&conn, name)?;

        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM commits WHERE repo = ?1",
            params![name.as_str()],
            |row| row.get(0),
        )?;
        Ok(count.max(0) as u64)
    }

    fn write_commit(&self, name: &RepoName, write: CommitWrite<'_>) -> VcsResult<()> {
        let _shared = self.reclaim.read();
        let mut conn = self.conn.lock();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let head = self.repo_head(&tx, name)?;
        if head != write.expected_head {
            return Err(VcsError::NonFastForward {
                repo: name.clone(),
                head,
                parent: write.expected_head,
            });
        }

        // blob files are durable before any row can point at them
        for (id, content) in &write.blobs {
            self.objects.write(id, content)?;
        }

        let commit = write.commit;
        let repo = name.as_str();
        let id = commit.id.to_string();
        let depth = i64::try_from(commit.depth)
            .map_err(|_| VcsError::Internal(format!("depth {} out of range", commit.depth)))?;

        tx.execute(
            "INSERT INTO commits (repo, id, parent, depth, message, author, timestamp)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                repo,
                id,
                commit.record.parent.map(|p| p.to_string()),
                depth,
                commit.record.message,
                commit.record.author,
                format_timestamp(&commit.record.timestamp),
            ],
        )?;

        {
            let mut entry = tx.prepare_cached(
                "INSERT INTO tree_entries (repo, commit_id, path, blob) VALUES (?1, ?2, ?3, ?4)",
            )?;
            for (path, blob) in &commit.record.tree {
                entry.execute(params![repo, id, path.as_str(), blob.to_string()])?;
            }

            let mut change_row = tx.prepare_cached(
                "INSERT INTO changes (repo, commit_id, path, depth, status, previous_blob, current_blob, diff)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            )?;
            for change in &commit.changes {
                change_row.execute(params![
                    repo,
                    id,
                    change.path.as_str(),
                    depth,
                    change.status.as_str(),
                    change.previous.map(|b| b.to_string()),
                    change.current.map(|b| b.to_string()),
                    change.diff.as_deref(),
                ])?;
            }

            let mut blob_row = tx.prepare_cached(
                "INSERT INTO blobs (id, size, ref_count) VALUES (?1, ?2, 0)
                 ON CONFLICT(id) DO NOTHING",
            )?;
            let mut link = tx.prepare_cached("INSERT OR IGNORE INTO repo_blobs (repo, blob) VALUES (?1, ?2)")?;
            let mut bump = tx.prepare_cached("UPDATE blobs SET ref_count = ref_count + 1 WHERE id = ?1")?;

            let mut seen = BTreeSet::new();
            for (blob, content) in &write.blobs {
                if !seen.insert(*blob) {
                    continue;
                }
                let blob = blob.to_string();
                blob_row.execute(params![blob, content.len() as i64])?;
                if link.execute(params![repo, blob])? > 0 {
                    bump.execute(params![blob])?;
                }
            }
        }

        tx.execute("UPDATE repos SET head = ?1 WHERE name = ?2", params![id, repo])?;
        tx.commit()?;

        debug!(
            "sqlite_fs: {} head {} -> {}",
            name,
            write.expected_head.map_or_else(|| "none".to_string(), |h| h.short()),
            commit.id.short()
        );
        Ok(())
    }
}
