//! In-process backend: a mutex-guarded map of path to (bytes, revision).
//!
//! Revisions are a store-wide commit counter (`r1`, `r2`, …), so every
//! successful commit yields a revision never seen before.

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use roster_core::StorePath;

use crate::backend::{CommitResult, Revision, VersionedBackend, Versioned};
use crate::error::BackendError;

#[derive(Debug, Default)]
struct MemoryState {
    files: BTreeMap<StorePath, (Vec<u8>, Revision)>,
    next_revision: u64,
    commits: u64,
    conflicts: u64,
}

/// Thread-safe in-memory [`VersionedBackend`].
#[derive(Debug, Default)]
pub struct MemoryBackend {
    state: Mutex<MemoryState>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current bytes at `path`, bypassing revision tracking.
    pub fn contents(&self, path: &StorePath) -> Option<Vec<u8>> {
        self.lock().files.get(path).map(|(bytes, _)| bytes.clone())
    }

    /// Number of successful commits so far.
    pub fn commit_count(&self) -> u64 {
        self.lock().commits
    }

    /// Number of commits refused with `Conflict` so far.
    pub fn conflict_count(&self) -> u64 {
        self.lock().conflicts
    }

    pub fn paths(&self) -> Vec<StorePath> {
        self.lock().files.keys().cloned().collect()
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl VersionedBackend for MemoryBackend {
    fn pull_latest(&self, path: &StorePath, _timeout: Duration) -> Result<Versioned, BackendError> {
        Ok(match self.lock().files.get(path) {
            Some((bytes, revision)) => Versioned::present(bytes.clone(), revision.clone()),
            None => Versioned::absent(),
        })
    }

    fn commit(
        &self,
        path: &StorePath,
        content: Option<&[u8]>,
        base: Option<&Revision>,
        _timeout: Duration,
    ) -> Result<CommitResult, BackendError> {
        let mut state = self.lock();
        let current = state.files.get(path).map(|(_, rev)| rev.clone());
        if current.as_ref() != base {
            state.conflicts += 1;
            return Ok(CommitResult::Conflict(current));
        }
        state.commits += 1;
        match content {
            Some(bytes) => {
                state.next_revision += 1;
                let revision = Revision::new(format!("r{}", state.next_revision));
                state
                    .files
                    .insert(path.clone(), (bytes.to_vec(), revision.clone()));
                Ok(CommitResult::Success(Some(revision)))
            }
            None => {
                state.files.remove(path);
                Ok(CommitResult::Success(None))
            }
        }
    }

    fn list(&self, dir: &StorePath, _timeout: Duration) -> Result<Vec<StorePath>, BackendError> {
        Ok(self
            .lock()
            .files
            .keys()
            .filter(|p| dir.is_parent_of(p))
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const T: Duration = Duration::from_secs(1);

    #[test]
    fn commit_against_stale_base_conflicts_without_writing() {
        let backend = MemoryBackend::new();
        let path = StorePath::from("archive.log");
        let first = backend.commit(&path, Some(b"v1"), None, T).unwrap();
        let CommitResult::Success(Some(rev1)) = first else {
            panic!("expected success, got {first:?}");
        };

        // A second creator still believes the path is absent.
        let stale = backend.commit(&path, Some(b"other"), None, T).unwrap();
        assert_eq!(stale, CommitResult::Conflict(Some(rev1.clone())));
        assert_eq!(backend.contents(&path), Some(b"v1".to_vec()));

        let second = backend.commit(&path, Some(b"v2"), Some(&rev1), T).unwrap();
        assert!(matches!(second, CommitResult::Success(Some(ref r)) if r != &rev1));
        assert_eq!(backend.conflict_count(), 1);
        assert_eq!(backend.commit_count(), 2);
    }

    #[test]
    fn deletion_makes_path_absent() {
        let backend = MemoryBackend::new();
        let path = StorePath::from("entities/a.doc");
        let CommitResult::Success(rev) = backend.commit(&path, Some(b"x"), None, T).unwrap() else {
            panic!("create failed");
        };
        let result = backend.commit(&path, None, rev.as_ref(), T).unwrap();
        assert_eq!(result, CommitResult::Success(None));
        assert_eq!(backend.pull_latest(&path, T).unwrap(), Versioned::absent());
    }

    #[test]
    fn list_returns_direct_children_only() {
        let backend = MemoryBackend::new();
        for p in ["entities/a.doc", "entities/b.doc", "metadata/x.scalar", "config.doc"] {
            backend.commit(&StorePath::from(p), Some(b"-"), None, T).unwrap();
        }
        let listed = backend.list(&StorePath::entity_dir(), T).unwrap();
        assert_eq!(
            listed,
            vec![StorePath::from("entities/a.doc"), StorePath::from("entities/b.doc")]
        );
    }
}
