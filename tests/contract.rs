//! The repository contract, run against every built-in engine.
//!
//! Each test builds a fresh registry in a temp directory and repeats the
//! same checks for every engine it contains.

use std::sync::{Arc, Barrier};
use std::thread;

use tempfile::TempDir;

use vcsdb::config::StoreConfig;
use vcsdb::engine::Reclaimed;
use vcsdb::model::{ChangeStatus, CommitId, NewCommit, RepoName, RepoPath};
use vcsdb::registry::Registry;
use vcsdb::{ErrorKind, VcsError, VersionStore};

fn registry() -> (TempDir, Registry) {
    let dir = TempDir::new().unwrap();
    let registry = Registry::with_defaults(StoreConfig::new(dir.path())).unwrap();
    (dir, registry)
}

/// run `check` once per registered engine
fn each_engine(check: impl Fn(&VersionStore)) {
    let (_dir, registry) = registry();
    assert_eq!(registry.list(), vec!["graph_db", "sqlite_fs"]);
    for engine in registry.list() {
        eprintln!("engine: {}", engine);
        check(registry.get(engine).unwrap());
    }
}

fn name(raw: &str) -> RepoName {
    RepoName::new(raw).unwrap()
}

fn path(raw: &str) -> RepoPath {
    RepoPath::new(raw).unwrap()
}

fn commit(parent: Option<CommitId>, message: &str, files: &[(&str, &str)]) -> NewCommit {
    let mut commit = NewCommit::new("alice", message).parent_id(parent);
    for (p, content) in files {
        commit = commit.file(path(p), content.as_bytes());
    }
    commit
}

#[test]
fn test_demo_scenario() {
    each_engine(|store| {
        let demo = name("demo");
        store.create_repo(&demo).unwrap();
        assert_eq!(store.head(&demo).unwrap(), None);

        let c1 = store
            .push(&demo, commit(None, "first", &[("a.txt", "hello")]))
            .unwrap();
        assert!(c1.created);
        let c2 = store
            .push(&demo, commit(Some(c1.id), "second", &[("a.txt", "world")]))
            .unwrap();
        assert_eq!(store.head(&demo).unwrap(), Some(c2.id));

        let history = store.file_history(&demo, &path("a.txt")).unwrap();
        let ids: Vec<_> = history.iter().map(|e| e.commit.id).collect();
        assert_eq!(ids, vec![c2.id, c1.id]);
        assert_eq!(history[0].change.status, ChangeStatus::Modified);
        assert_eq!(history[1].change.status, ChangeStatus::Added);

        // C3 built on C1 after C2 landed
        let stale = store.push(&demo, commit(Some(c1.id), "third", &[("a.txt", "again")]));
        let err = stale.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Conflict);
        assert!(matches!(err, VcsError::NonFastForward { .. }));
        assert_eq!(store.head(&demo).unwrap(), Some(c2.id));

        let pulled = store.pull(&demo, Some(c1.id)).unwrap();
        let ids: Vec<_> = pulled.commits.iter().map(|c| c.id).collect();
        assert_eq!(ids, vec![c2.id]);
        assert_eq!(pulled.blobs.len(), 1);
        assert_eq!(pulled.blobs[0].content, b"world");

        let cloned = store.clone_bundle(&demo).unwrap();
        assert_eq!(cloned.commits.len(), 2);
        let mut contents: Vec<_> = cloned.blobs.iter().map(|b| b.content.clone()).collect();
        contents.sort();
        assert_eq!(contents, vec![b"hello".to_vec(), b"world".to_vec()]);

        assert_eq!(store.file_content(&demo, &c1.id, &path("a.txt")).unwrap(), b"hello");
        assert_eq!(store.file_content(&demo, &c2.id, &path("a.txt")).unwrap(), b"world");
    });
}

#[test]
fn test_commit_ids_agree_across_engines() {
    let (_dir, registry) = registry();
    let ts = vcsdb::model::parse_timestamp("2024-05-01T12:00:00Z").unwrap();

    let mut ids = Vec::new();
    for engine in registry.list() {
        let store = registry.get(engine).unwrap();
        store.create_repo(&name("same")).unwrap();
        let outcome = store
            .push(
                &name("same"),
                commit(None, "first", &[("a.txt", "hello")]).timestamp(ts),
            )
            .unwrap();
        ids.push(outcome.id);
    }

    assert_eq!(ids.len(), 2);
    assert_eq!(ids[0], ids[1]);
}

#[test]
fn test_unknown_parent_is_invalid_input() {
    each_engine(|store| {
        let demo = name("demo");
        store.create_repo(&demo).unwrap();
        store.push(&demo, commit(None, "first", &[("a.txt", "1")])).unwrap();

        let elsewhere = name("elsewhere");
        store.create_repo(&elsewhere).unwrap();
        let foreign = store
            .push(&elsewhere, commit(None, "foreign", &[("b.txt", "2")]))
            .unwrap();

        let err = store
            .push(&demo, commit(Some(foreign.id), "orphan", &[("a.txt", "3")]))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidInput);
    });
}

#[test]
fn test_root_push_onto_non_empty_repo_conflicts() {
    each_engine(|store| {
        let demo = name("demo");
        store.create_repo(&demo).unwrap();
        store.push(&demo, commit(None, "first", &[("a.txt", "1")])).unwrap();

        let err = store
            .push(&demo, commit(None, "another root", &[("a.txt", "2")]))
            .unwrap_err();
        assert!(err.is_conflict());
    });
}

#[test]
fn test_concurrent_pushes_on_same_head() {
    each_engine(|store| {
        let demo = name("demo");
        store.create_repo(&demo).unwrap();
        let base = store.push(&demo, commit(None, "base", &[("a.txt", "0")])).unwrap().id;

        let barrier = Arc::new(Barrier::new(2));
        let handles: Vec<_> = ["left", "right"]
            .into_iter()
            .map(|side| {
                let store = store.clone();
                let demo = demo.clone();
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    store.push(&demo, commit(Some(base), side, &[("a.txt", side)]))
                })
            })
            .collect();
        let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

        let winners: Vec<_> = results.iter().filter_map(|r| r.as_ref().ok()).collect();
        assert_eq!(winners.len(), 1);
        let loser = results.iter().find_map(|r| r.as_ref().err()).unwrap();
        assert!(loser.is_conflict());

        assert_eq!(store.head(&demo).unwrap(), Some(winners[0].id));
        assert_eq!(store.commits(&demo, None, None).unwrap().len(), 2);
    });
}

#[test]
fn test_clone_then_restore_reproduces_head() {
    each_engine(|store| {
        let demo = name("demo");
        store.create_repo(&demo).unwrap();
        let c1 = store
            .push(&demo, commit(None, "first", &[("a.txt", "1"), ("b.txt", "b")]))
            .unwrap()
            .id;
        let c2 = store
            .push(&demo, commit(Some(c1), "second", &[("a.txt", "2")]))
            .unwrap()
            .id;

        let bundle = store.clone_bundle(&demo).unwrap();
        let copy = name("copy");
        store.create_repo(&copy).unwrap();
        let report = store.restore(&copy, &bundle).unwrap();

        assert_eq!(report.applied, 2);
        assert_eq!(report.head, Some(c2));
        assert_eq!(store.head(&copy).unwrap(), store.head(&demo).unwrap());
        assert_eq!(
            store.commit(&copy, &c2).unwrap(),
            store.commit(&demo, &c2).unwrap()
        );
        // b.txt was deleted in c2
        assert_eq!(store.file_history(&copy, &path("b.txt")).unwrap().len(), 2);
    });
}

#[test]
fn test_pull_from_head_is_empty() {
    each_engine(|store| {
        let demo = name("demo");
        store.create_repo(&demo).unwrap();

        let empty = store.pull(&demo, None).unwrap();
        assert!(empty.is_empty());

        let head = store.push(&demo, commit(None, "first", &[("a.txt", "1")])).unwrap().id;
        let bundle = store.pull(&demo, Some(head)).unwrap();
        assert!(bundle.is_empty());
        assert!(bundle.blobs.is_empty());
        assert_eq!(bundle.head, Some(head));
    });
}

#[test]
fn test_delete_reclaims_only_unshared_data() {
    each_engine(|store| {
        let (a, b) = (name("a"), name("b"));
        store.create_repo(&a).unwrap();
        store.create_repo(&b).unwrap();

        store
            .push(&a, commit(None, "in a", &[("shared.txt", "shared"), ("own.txt", "only a")]))
            .unwrap();
        let kept = store
            .push(&b, commit(None, "in b", &[("shared.txt", "shared")]))
            .unwrap()
            .id;

        let reclaimed = store.delete_repo(&a).unwrap();
        assert_eq!(reclaimed, Reclaimed { commits: 1, blobs: 1 });

        assert!(!store.repo_exists(&a).unwrap());
        assert!(store.head(&a).unwrap_err().is_not_found());
        assert_eq!(store.list_repos().unwrap(), vec![b.clone()]);
        assert_eq!(store.file_content(&b, &kept, &path("shared.txt")).unwrap(), b"shared");

        // the name is free again
        store.create_repo(&a).unwrap();
        assert_eq!(store.head(&a).unwrap(), None);
    });
}

#[test]
fn test_sync_and_clone_repo() {
    each_engine(|store| {
        let source = name("source");
        store.create_repo(&source).unwrap();
        let c1 = store.push(&source, commit(None, "one", &[("a.txt", "1")])).unwrap().id;

        let copy = store.clone_repo(&source, &name("copy")).unwrap();
        assert_eq!(copy.head, Some(c1));

        let c2 = store.push(&source, commit(Some(c1), "two", &[("a.txt", "2")])).unwrap().id;
        let synced = store.sync(&source, &name("copy")).unwrap();
        assert!(!synced.created);
        assert_eq!(synced.transferred, 1);
        assert_eq!(store.head(&name("copy")).unwrap(), Some(c2));
    });
}

#[test]
fn test_modified_text_carries_unified_diff() {
    each_engine(|store| {
        let demo = name("demo");
        store.create_repo(&demo).unwrap();
        let c1 = store
            .push(&demo, commit(None, "first", &[("a.txt", "one\ntwo\n"), ("b.txt", "keep")]))
            .unwrap()
            .id;
        let c2 = store
            .push(
                &demo,
                commit(Some(c1), "second", &[("a.txt", "one\n2\n"), ("b.txt", "keep"), ("c.txt", "new")]),
            )
            .unwrap()
            .id;

        let detail = store.commit(&demo, &c2).unwrap();
        let modified = detail.changes.iter().find(|c| c.path == path("a.txt")).unwrap();
        let diff = modified.diff.as_deref().unwrap();
        assert!(diff.contains("-two"));
        assert!(diff.contains("+2"));
        let added = detail.changes.iter().find(|c| c.path == path("c.txt")).unwrap();
        assert_eq!(added.diff, None);

        let history = store.file_history(&demo, &path("a.txt")).unwrap();
        assert_eq!(history[0].change.diff.as_deref(), Some(diff));
        assert_eq!(history[1].change.diff, None);
    });
}

#[test]
fn test_failed_sync_leaves_repos_untouched() {
    each_engine(|store| {
        store.create_repo(&name("existing")).unwrap();
        let before = store.list_repos().unwrap();

        let err = store.sync(&name("ghost"), &name("target")).unwrap_err();
        assert!(err.is_not_found());
        assert!(!store.repo_exists(&name("target")).unwrap());
        assert_eq!(store.list_repos().unwrap(), before);
    });
}

#[test]
fn test_missing_things_are_not_found() {
    each_engine(|store| {
        let ghost = name("ghost");
        assert!(store.head(&ghost).unwrap_err().is_not_found());
        assert!(store.delete_repo(&ghost).unwrap_err().is_not_found());
        assert!(store.pull(&ghost, None).unwrap_err().is_not_found());

        let demo = name("demo");
        store.create_repo(&demo).unwrap();
        assert_eq!(store.create_repo(&demo).unwrap_err().kind(), ErrorKind::Conflict);

        let head = store.push(&demo, commit(None, "first", &[("a.txt", "1")])).unwrap().id;
        assert!(store
            .file_content(&demo, &head, &path("missing.txt"))
            .unwrap_err()
            .is_not_found());
        assert!(store.file_history(&demo, &path("missing.txt")).unwrap().is_empty());
    });
}

#[test]
fn test_data_survives_reopen() {
    let dir = TempDir::new().unwrap();
    let demo = name("demo");
    let mut heads = Vec::new();

    {
        let registry = Registry::with_defaults(StoreConfig::new(dir.path())).unwrap();
        for engine in registry.list() {
            let store = registry.get(engine).unwrap();
            store.create_repo(&demo).unwrap();
            let head = store.push(&demo, commit(None, "kept", &[("a.txt", "durable")])).unwrap().id;
            heads.push((engine.to_string(), head));
        }
    }

    let registry = Registry::with_defaults(StoreConfig::new(dir.path())).unwrap();
    for (engine, head) in heads {
        let store = registry.get(&engine).unwrap();
        assert_eq!(store.head(&demo).unwrap(), Some(head));
        assert_eq!(store.file_content(&demo, &head, &path("a.txt")).unwrap(), b"durable");
    }
}
