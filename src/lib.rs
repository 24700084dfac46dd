//! vcsdb - a pluggable version-control backend
//!
//! Repositories are append-only commit graphs with content-addressed
//! commits and blobs, fast-forward-only pushes and a per-path history
//! index. The same operations run over interchangeable storage engines:
//!
//! - `sqlite_fs`: SQLite rows plus a content-addressed blob directory
//! - `graph_db`: a git object database plus a per-repository commit log
//!
//! # Example
//!
//! ```no_run
//! use vcsdb::config::StoreConfig;
//! use vcsdb::model::{NewCommit, RepoName, RepoPath};
//! use vcsdb::registry::Registry;
//!
//! let registry = Registry::with_defaults(StoreConfig::new("./repositories")).unwrap();
//! let store = registry.get("sqlite_fs").unwrap();
//!
//! let demo = RepoName::new("demo").unwrap();
//! store.create_repo(&demo).unwrap();
//!
//! let commit = NewCommit::new("alice", "first commit")
//!     .file(RepoPath::new("a.txt").unwrap(), "hello");
//! let pushed = store.push(&demo, commit).unwrap();
//! println!("head is now {}", pushed.id);
//! ```

pub mod config;
pub mod engine;
pub mod error;
pub mod graph;
pub mod index;
pub mod model;
pub mod registry;
pub mod store;

pub use config::StoreConfig;
pub use error::{ErrorKind, VcsError, VcsResult};
pub use registry::Registry;
pub use store::VersionStore;
