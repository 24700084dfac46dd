//! The version store: the repository contract on top of an engine, with
//! per-repository write locks and bounded retries.

mod locks;
mod retry;
mod version_store;

pub use version_store::{RepoSummary, RestoreReport, SyncReport, VersionStore};
