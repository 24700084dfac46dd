//! Per-repository write serialization.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::model::RepoName;

/// Lock table with one mutex per repository, created on first use.
///
/// Writers to the same repository queue up here; writers to different
/// repositories never wait on each other.
#[derive(Default)]
pub(crate) struct RepoLocks {
    table: Mutex<HashMap<RepoName, Arc<Mutex<()>>>>,
}

impl RepoLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// the mutex guarding writes to `repo`
    pub fn get(&self, repo: &RepoName) -> Arc<Mutex<()>> {
        self.table.lock().entry(repo.clone()).or_default().clone()
    }

    /// forget a deleted repository; a later `get` hands out a fresh mutex
    pub fn remove(&self, repo: &RepoName) {
        self.table.lock().remove(repo);
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.table.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_same_repo_shares_a_lock() {
        let locks = RepoLocks::new();
        let demo = RepoName::new("demo").unwrap();

        let a = locks.get(&demo);
        let b = locks.get(&demo);
        assert!(Arc::ptr_eq(&a, &b));

        let _held = a.lock();
        assert!(b.try_lock().is_none());

        let other = locks.get(&RepoName::new("other").unwrap());
        assert!(other.try_lock().is_some());
    }

    #[test]
    fn test_remove_forgets_the_entry() {
        let locks = RepoLocks::new();
        let demo = RepoName::new("demo").unwrap();

        let before = locks.get(&demo);
        locks.remove(&demo);
        assert_eq!(locks.len(), 0);

        let after = locks.get(&demo);
        assert!(!Arc::ptr_eq(&before, &after));
        assert_eq!(locks.len(), 1);
    }
}
