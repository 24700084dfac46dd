//! `graph_db` engine: a git object database plus a header and an
//! append-only commit log per repository.
//!
//! Layout under the engine root:
//!
//! ```text
//! objects.git/        bare git repository, used only as an object database
//! graphs/<name>.json  repository header: name and creation time
//! graphs/<name>.log   one JSON line per commit: id, parent, depth, changes
//! ```
//!
//! Blob payloads and canonical commit records are stored as git blobs, so
//! every object sits in the ODB under exactly its [`BlobId`] / [`CommitId`].
//! The object database is shared by all repositories of the engine.
//! Deleting a repository sweeps the objects no remaining graph can reach.
//!
//! A push appends one line to the log and fsyncs it, so its cost does not
//! grow with history. Opening the engine replays every log to rebuild head,
//! nodes and path index in memory. A torn final line left by a crash is cut
//! off during replay; any other unreadable line is corruption.

use std::collections::{BTreeMap, BTreeSet};
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use git2::{Oid, Repository};
use log::{debug, info, warn};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;

use crate::config::StoreConfig;
use crate::engine::objects::sync_dir;
use crate::engine::{CommitWrite, Reclaimed, StorageEngine};
use crate::error::{VcsError, VcsResult};
use crate::index::{IndexEntry, PathIndex};
use crate::model::commit::canonical_time;
use crate::model::{BlobId, Change, CommitId, CommitRecord, RepoName, RepoPath, StoredCommit};

/// `<name>.json`, written once at creation
#[derive(Debug, Clone, Serialize, Deserialize)]
struct GraphHeader {
    name: RepoName,
    #[serde(with = "canonical_time")]
    created_at: DateTime<Utc>,
}

/// one line of `<name>.log`
#[derive(Debug, Serialize, Deserialize)]
struct LogEntry {
    id: CommitId,
    parent: Option<CommitId>,
    depth: u64,
    changes: Vec<Change>,
}

/// in-memory graph of one repository, rebuilt from its log
#[derive(Debug, Clone)]
struct RepoGraph {
    header: GraphHeader,
    head: Option<CommitId>,
    nodes: BTreeMap<CommitId, GraphNode>,
    index: PathIndex,
}

#[derive(Debug, Clone)]
struct GraphNode {
    parent: Option<CommitId>,
    depth: u64,
    changes: Vec<Change>,
}

impl RepoGraph {
    fn new(header: GraphHeader) -> Self {
        Self {
            header,
            head: None,
            nodes: BTreeMap::new(),
            index: PathIndex::new(),
        }
    }

    /// whether `entry` extends the current head
    fn check(&self, entry: &LogEntry) -> Result<(), String> {
        if entry.parent != self.head {
            return Err(format!(
                "commit {} names parent {:?} but head is {:?}",
                entry.id, entry.parent, self.head
            ));
        }
        let depth = self
            .head
            .and_then(|head| self.nodes.get(&head))
            .map_or(0, |node| node.depth + 1);
        if entry.depth != depth {
            return Err(format!("commit {} has depth {}, expected {}", entry.id, entry.depth, depth));
        }
        if self.nodes.contains_key(&entry.id) {
            return Err(format!("commit {} appears twice", entry.id));
        }
        Ok(())
    }

    /// move head to a checked entry
    fn apply(&mut self, entry: LogEntry) {
        self.index.record(entry.id, entry.depth, &entry.changes);
        self.nodes.insert(
            entry.id,
            GraphNode {
                parent: entry.parent,
                depth: entry.depth,
                changes: entry.changes,
            },
        );
        self.head = Some(entry.id);
    }

    /// every object id this graph keeps alive: commit records and blobs
    fn reachable(&self) -> impl Iterator<Item = Oid> + '_ {
        self.nodes
            .keys()
            .map(|id| id.raw())
            .chain(self.index.blobs().map(|blob| blob.raw()))
    }
}

pub struct GraphDbEngine {
    odb: Mutex<Repository>,
    graphs_dir: PathBuf,
    graphs: RwLock<BTreeMap<RepoName, Arc<RepoGraph>>>,
    /// pushes and commit reads share it, deletion takes it exclusively
    reclaim: RwLock<()>,
}

impl GraphDbEngine {
    pub const NAME: &'static str = "graph_db";

    /// open (creating if needed) the engine under `root`
    pub fn open(root: impl AsRef<Path>) -> VcsResult<Self> {
        let root = root.as_ref();
        fs::create_dir_all(root)?;
        let odb_path = root.join("objects.git");
        let odb = if odb_path.exists() {
            Repository::open_bare(&odb_path)?
        } else {
            Repository::init_bare(&odb_path)?
        };

        let graphs_dir = root.join("graphs");
        fs::create_dir_all(&graphs_dir)?;
        let graphs = Self::load_graphs(&graphs_dir)?;
        debug!(
            "opened graph_db engine at {} ({} repositories)",
            root.display(),
            graphs.len()
        );

        Ok(Self {
            odb: Mutex::new(odb),
            graphs_dir,
            graphs: RwLock::new(graphs),
            reclaim: RwLock::new(()),
        })
    }

    /// registry factory
    pub fn factory(config: &StoreConfig) -> VcsResult<Arc<dyn StorageEngine>> {
        let engine = Self::open(config.engine_root(Self::NAME))?;
        Ok(Arc::new(engine))
    }

    fn load_graphs(dir: &Path) -> VcsResult<BTreeMap<RepoName, Arc<RepoGraph>>> {
        let mut graphs = BTreeMap::new();
        for entry in fs::read_dir(dir)? {
            let path = entry?.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some("json") {
                continue;
            }

            let raw = fs::read(&path)?;
            let header: GraphHeader = serde_json::from_slice(&raw)
                .map_err(|e| VcsError::corrupted(&path, e.to_string()))?;

            if path.file_stem().and_then(|stem| stem.to_str()) != Some(header.name.as_str()) {
                return Err(VcsError::corrupted(&path, "file name does not match repository"));
            }
            let graph = Self::replay(&path.with_extension("log"), header)?;
            graphs.insert(graph.header.name.clone(), Arc::new(graph));
        }
        Ok(graphs)
    }

    /// rebuild a graph from its commit log
    fn replay(log_path: &Path, header: GraphHeader) -> VcsResult<RepoGraph> {
        let mut graph = RepoGraph::new(header);
        let raw = match fs::read(log_path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(VcsError::corrupted(log_path, "commit log missing"));
            }
            Err(e) => return Err(e.into()),
        };

        let complete = match raw.iter().rposition(|&b| b == b'\n') {
            Some(last) => last + 1,
            None => 0,
        };
        if complete < raw.len() {
            warn!(
                "graph_db: dropping {} bytes of torn log tail in {}",
                raw.len() - complete,
                log_path.display()
            );
            let file = OpenOptions::new().write(true).open(log_path)?;
            file.set_len(complete as u64)?;
            file.sync_all()?;
        }

        for (number, line) in raw[..complete].split(|&b| b == b'\n').enumerate() {
            if line.is_empty() {
                continue;
            }
            let entry: LogEntry = serde_json::from_slice(line).map_err(|e| {
                VcsError::corrupted(log_path, format!("line {}: {}", number + 1, e))
            })?;
            graph
                .check(&entry)
                .map_err(|reason| VcsError::corrupted(log_path, format!("line {}: {}", number + 1, reason)))?;
            graph.apply(entry);
        }
        Ok(graph)
    }

    fn header_path(&self, name: &RepoName) -> PathBuf {
        self.graphs_dir.join(format!("{}.json", name))
    }

    fn log_path(&self, name: &RepoName) -> PathBuf {
        self.graphs_dir.join(format!("{}.log", name))
    }

    /// write the header atomically, after an empty log is in place
    fn persist_new(&self, header: &GraphHeader) -> VcsResult<()> {
        File::create(self.log_path(&header.name))?.sync_all()?;

        let mut tmp = NamedTempFile::new_in(&self.graphs_dir)?;
        serde_json::to_writer(&mut tmp, header)?;
        tmp.flush()?;
        tmp.as_file().sync_all()?;
        tmp.persist(self.header_path(&header.name)).map_err(|e| e.error)?;
        sync_dir(&self.graphs_dir)?;
        Ok(())
    }

    /// append one entry to the log; a failed append leaves the log as it was
    fn append_log(&self, name: &RepoName, entry: &LogEntry) -> VcsResult<()> {
        let mut line = serde_json::to_vec(entry)?;
        line.push(b'\n');

        let mut log = OpenOptions::new().append(true).open(self.log_path(name))?;
        let before = log.metadata()?.len();
        let written = log.write_all(&line).and_then(|()| log.sync_data());
        if let Err(e) = written {
            if let Err(undo) = log.set_len(before) {
                warn!("graph_db: could not roll back log of {}: {}", name, undo);
            }
            return Err(e.into());
        }
        Ok(())
    }

    fn graph(&self, name: &RepoName) -> VcsResult<Arc<RepoGraph>> {
        self.graphs
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| VcsError::RepoNotFound(name.clone()))
    }

    /// objects are only ever written loose, never packed
    fn loose_path(repo: &Repository, oid: Oid) -> PathBuf {
        let hex = oid.to_string();
        repo.path().join("objects").join(&hex[..2]).join(&hex[2..])
    }

    /// write `content` to the ODB, make it durable, and check it landed
    /// under `expected`
    fn store_object(repo: &Repository, expected: Oid, content: &[u8]) -> VcsResult<()> {
        let loose = Self::loose_path(repo, expected);
        if loose.is_file() {
            return Ok(());
        }

        let oid = repo.blob(content)?;
        if oid != expected {
            return Err(VcsError::InvalidBundle(format!(
                "object {} does not match its content (hashes to {})",
                expected, oid
            )));
        }

        File::open(&loose)?.sync_all()?;
        if let Some(fan_out) = loose.parent() {
            sync_dir(fan_out)?;
        }
        Ok(())
    }

    fn read_object(repo: &Repository, oid: Oid) -> VcsResult<Option<Vec<u8>>> {
        if !Self::loose_path(repo, oid).is_file() {
            return Ok(None);
        }
        let blob = repo.find_blob(oid)?;
        Ok(Some(blob.content().to_vec()))
    }
}

impl StorageEngine for GraphDbEngine {
    fn kind(&self) -> &'static str {
        Self::NAME
    }

    fn create_repo(&self, name: &RepoName) -> VcsResult<()> {
        let mut graphs = self.graphs.write();
        if graphs.contains_key(name) {
            return Err(VcsError::RepoAlreadyExists(name.clone()));
        }

        let header = GraphHeader {
            name: name.clone(),
            created_at: Utc::now(),
        };
        self.persist_new(&header)?;
        graphs.insert(name.clone(), Arc::new(RepoGraph::new(header)));

        info!("graph_db: created repository {}", name);
        Ok(())
    }

    fn repo_exists(&self, name: &RepoName) -> VcsResult<bool> {
        Ok(self.graphs.read().contains_key(name))
    }

    fn list_repos(&self) -> VcsResult<Vec<RepoName>> {
        Ok(self.graphs.read().keys().cloned().collect())
    }

    fn delete_repo(&self, name: &RepoName) -> VcsResult<Reclaimed> {
        let _exclusive = self.reclaim.write();

        let (removed, live) = {
            let mut graphs = self.graphs.write();
            let removed = graphs
                .remove(name)
                .ok_or_else(|| VcsError::RepoNotFound(name.clone()))?;

            if let Err(e) = fs::remove_file(self.header_path(name)) {
                graphs.insert(name.clone(), removed);
                return Err(e.into());
            }
            // without its header the log is never replayed
            if let Err(e) = fs::remove_file(self.log_path(name)) {
                warn!("graph_db: could not remove log of {}: {}", name, e);
            }

            let live: BTreeSet<Oid> = graphs.values().flat_map(|g| g.reachable()).collect();
            (removed, live)
        };
        sync_dir(&self.graphs_dir)?;

        let odb = self.odb.lock();
        let sweep = |oid: Oid| -> VcsResult<bool> {
            if live.contains(&oid) {
                return Ok(false);
            }
            match fs::remove_file(Self::loose_path(&odb, oid)) {
                Ok(()) => Ok(true),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
                Err(e) => Err(e.into()),
            }
        };

        for id in removed.nodes.keys() {
            sweep(id.raw())?;
        }
        let blobs: BTreeSet<BlobId> = removed.index.blobs().collect();
        let mut reclaimed_blobs = 0;
        for blob in blobs {
            if sweep(blob.raw())? {
                reclaimed_blobs += 1;
            }
        }

        let reclaimed = Reclaimed {
            commits: removed.nodes.len(),
            blobs: reclaimed_blobs,
        };
        info!(
            "graph_db: deleted repository {} ({} commits, {} blobs reclaimed)",
            name, reclaimed.commits, reclaimed.blobs
        );
        Ok(reclaimed)
    }

    fn head(&self, name: &RepoName) -> VcsResult<Option<CommitId>> {
        Ok(self.graph(name)?.head)
    }

    fn load_commit(&self, name: &RepoName, id: &CommitId) -> VcsResult<Option<StoredCommit>> {
        let _shared = self.reclaim.read();
        let graph = self.graph(name)?;
        let Some(node) = graph.nodes.get(id) else {
            return Ok(None);
        };

        let odb = self.odb.lock();
        let bytes = Self::read_object(&odb, id.raw())?.ok_or_else(|| {
            VcsError::corrupted(Self::loose_path(&odb, id.raw()), "commit record missing")
        })?;
        let record = CommitRecord::from_canonical(&bytes)?;

        if record.parent != node.parent {
            return Err(VcsError::corrupted(
                self.log_path(name),
                format!("parent of {} disagrees with its record", id),
            ));
        }

        Ok(Some(StoredCommit {
            id: *id,
            record,
            depth: node.depth,
            changes: node.changes.clone(),
        }))
    }

    fn read_blob(&self, id: &BlobId) -> VcsResult<Option<Vec<u8>>> {
        let _shared = self.reclaim.read();
        let odb = self.odb.lock();
        Self::read_object(&odb, id.raw())
    }

    fn file_history(&self, name: &RepoName, path: &RepoPath) -> VcsResult<Vec<IndexEntry>> {
        Ok(self.graph(name)?.index.history(path))
    }

    fn commit_count(&self, name: &RepoName) -> VcsResult<u64> {
        Ok(self.graph(name)?.nodes.len() as u64)
    }

    fn write_commit(&self, name: &RepoName, write: CommitWrite<'_>) -> VcsResult<()> {
        let _shared = self.reclaim.read();
        let commit = write.commit;

        let head = self.graph(name)?.head;
        if head != write.expected_head {
            return Err(VcsError::NonFastForward {
                repo: name.clone(),
                head,
                parent: write.expected_head,
            });
        }

        // objects first: a graph never names an object that isn't durable
        {
            let odb = self.odb.lock();
            for (id, content) in &write.blobs {
                Self::store_object(&odb, id.raw(), content)?;
            }
            let record = commit.record.canonical_bytes()?;
            Self::store_object(&odb, commit.id.raw(), &record)?;
        }

        let mut graphs = self.graphs.write();
        let current = graphs
            .get_mut(name)
            .ok_or_else(|| VcsError::RepoNotFound(name.clone()))?;
        if current.head != write.expected_head {
            return Err(VcsError::NonFastForward {
                repo: name.clone(),
                head: current.head,
                parent: write.expected_head,
            });
        }

        let entry = LogEntry {
            id: commit.id,
            parent: commit.record.parent,
            depth: commit.depth,
            changes: commit.changes.clone(),
        };
        current.check(&entry).map_err(VcsError::InvalidCommit)?;
        self.append_log(name, &entry)?;
        // copies only while a reader still holds the previous snapshot
        Arc::make_mut(current).apply(entry);

        debug!(
            "graph_db: {} head {} -> {}",
            name,
            write.expected_head.map_or_else(|| "none".to_string(), |h| h.short()),
            commit.id.short()
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::testing::{exercise, fixture, name};
    use tempfile::TempDir;

    #[test]
    fn test_engine_primitives() {
        let dir = TempDir::new().unwrap();
        let engine = GraphDbEngine::open(dir.path()).unwrap();
        exercise(&engine);
    }

    #[test]
    fn test_state_survives_reopen() {
        let dir = TempDir::new().unwrap();
        let demo = name("demo");
        let c1 = fixture(None, &[("a.txt", "hello")], "c1");

        {
            let engine = GraphDbEngine::open(dir.path()).unwrap();
            engine.create_repo(&demo).unwrap();
            engine.write_commit(&demo, c1.write(None)).unwrap();
        }

        let engine = GraphDbEngine::open(dir.path()).unwrap();
        assert_eq!(engine.list_repos().unwrap(), vec![demo.clone()]);
        assert_eq!(engine.head(&demo).unwrap(), Some(c1.commit.id));
        assert_eq!(engine.load_commit(&demo, &c1.commit.id).unwrap(), Some(c1.commit.clone()));
        assert_eq!(
            engine
                .file_history(&demo, &RepoPath::new("a.txt").unwrap())
                .unwrap()
                .len(),
            1
        );
    }

    #[test]
    fn test_objects_are_stored_under_their_ids() {
        let dir = TempDir::new().unwrap();
        let engine = GraphDbEngine::open(dir.path()).unwrap();
        let demo = name("demo");
        let c1 = fixture(None, &[("a.txt", "hello\n")], "c1");
        engine.create_repo(&demo).unwrap();
        engine.write_commit(&demo, c1.write(None)).unwrap();

        let odb = engine.odb.lock();
        let blob = odb
            .find_blob(Oid::from_str("ce013625030ba8dba906f756967f9e9ca394464a").unwrap())
            .unwrap();
        assert_eq!(blob.content(), b"hello\n");

        let record = odb.find_blob(c1.commit.id.raw()).unwrap();
        assert_eq!(record.content(), c1.commit.record.canonical_bytes().unwrap().as_slice());
    }

    #[test]
    fn test_sweep_keeps_commits_shared_with_a_clone() {
        let dir = TempDir::new().unwrap();
        let engine = GraphDbEngine::open(dir.path()).unwrap();
        let (source, copy) = (name("source"), name("copy"));
        let c1 = fixture(None, &[("a.txt", "hello")], "c1");

        for repo in [&source, &copy] {
            engine.create_repo(repo).unwrap();
            engine.write_commit(repo, c1.write(None)).unwrap();
        }

        let reclaimed = engine.delete_repo(&source).unwrap();
        assert_eq!(reclaimed, Reclaimed { commits: 1, blobs: 0 });
        assert_eq!(engine.load_commit(&copy, &c1.commit.id).unwrap(), Some(c1.commit.clone()));

        engine.delete_repo(&copy).unwrap();
        assert_eq!(engine.read_blob(&BlobId::for_content(b"hello").unwrap()).unwrap(), None);
    }

    /// push `count` commits that each rewrite `a.txt`
    fn chain(engine: &GraphDbEngine, repo: &RepoName, count: usize) -> Vec<StoredCommit> {
        let mut commits: Vec<StoredCommit> = Vec::new();
        for n in 0..count {
            let content = format!("version {}", n);
            let next = fixture(commits.last(), &[("a.txt", content.as_str())], &format!("c{}", n));
            engine
                .write_commit(repo, next.write(commits.last().map(|c| c.id)))
                .unwrap();
            commits.push(next.commit);
        }
        commits
    }

    fn log_lines(dir: &TempDir, repo: &str) -> usize {
        let raw = fs::read_to_string(dir.path().join("graphs").join(format!("{}.log", repo))).unwrap();
        raw.lines().count()
    }

    #[test]
    fn test_push_appends_to_log_and_leaves_header_alone() {
        let dir = TempDir::new().unwrap();
        let engine = GraphDbEngine::open(dir.path()).unwrap();
        let demo = name("demo");
        engine.create_repo(&demo).unwrap();
        let header = dir.path().join("graphs").join("demo.json");
        let created = fs::read(&header).unwrap();
        assert_eq!(log_lines(&dir, "demo"), 0);

        chain(&engine, &demo, 3);
        assert_eq!(log_lines(&dir, "demo"), 3);
        assert_eq!(fs::read(&header).unwrap(), created);
    }

    #[test]
    fn test_long_history_replays_on_open() {
        let dir = TempDir::new().unwrap();
        let demo = name("demo");
        let commits = {
            let engine = GraphDbEngine::open(dir.path()).unwrap();
            engine.create_repo(&demo).unwrap();
            chain(&engine, &demo, 40)
        };

        let engine = GraphDbEngine::open(dir.path()).unwrap();
        let last = commits.last().unwrap();
        assert_eq!(engine.head(&demo).unwrap(), Some(last.id));
        assert_eq!(engine.commit_count(&demo).unwrap(), 40);
        assert_eq!(engine.load_commit(&demo, &last.id).unwrap().as_ref(), Some(last));
        let history = engine.file_history(&demo, &RepoPath::new("a.txt").unwrap()).unwrap();
        assert_eq!(history.len(), 40);
        assert_eq!(history[0].depth, 39);
    }

    #[test]
    fn test_torn_log_tail_is_dropped_on_open() {
        let dir = TempDir::new().unwrap();
        let demo = name("demo");
        let commits = {
            let engine = GraphDbEngine::open(dir.path()).unwrap();
            engine.create_repo(&demo).unwrap();
            chain(&engine, &demo, 2)
        };
        let log = dir.path().join("graphs").join("demo.log");
        let mut file = OpenOptions::new().append(true).open(&log).unwrap();
        file.write_all(br#"{"id":"4b825dc6"#).unwrap();
        drop(file);

        let engine = GraphDbEngine::open(dir.path()).unwrap();
        assert_eq!(engine.head(&demo).unwrap(), Some(commits[1].id));
        assert!(fs::read(&log).unwrap().ends_with(b"\n"));

        let next = fixture(Some(&commits[1]), &[("a.txt", "after")], "c2");
        engine.write_commit(&demo, next.write(Some(commits[1].id))).unwrap();
        drop(engine);

        let engine = GraphDbEngine::open(dir.path()).unwrap();
        assert_eq!(engine.head(&demo).unwrap(), Some(next.commit.id));
        assert_eq!(log_lines(&dir, "demo"), 3);
    }

    #[test]
    fn test_broken_log_line_is_reported() {
        let dir = TempDir::new().unwrap();
        let demo = name("demo");
        {
            let engine = GraphDbEngine::open(dir.path()).unwrap();
            engine.create_repo(&demo).unwrap();
            chain(&engine, &demo, 2);
        }
        let log = dir.path().join("graphs").join("demo.log");
        let raw = fs::read_to_string(&log).unwrap();
        let lines: Vec<_> = raw.lines().collect();
        // second commit replayed before the first: parent no longer matches head
        fs::write(&log, format!("{}\n{}\n", lines[1], lines[0])).unwrap();

        assert!(matches!(
            GraphDbEngine::open(dir.path()),
            Err(VcsError::CorruptedData { .. })
        ));
    }

    #[test]
    fn test_corrupted_graph_header_is_reported() {
        let dir = TempDir::new().unwrap();
        {
            let engine = GraphDbEngine::open(dir.path()).unwrap();
            engine.create_repo(&name("demo")).unwrap();
        }
        fs::write(dir.path().join("graphs").join("demo.json"), b"{ not json").unwrap();

        assert!(matches!(
            GraphDbEngine::open(dir.path()),
            Err(VcsError::CorruptedData { .. })
        ));
    }
}
