//! Directory backend: one file per store path under a root directory.
//!
//! ## Revisions
//!
//! A revision is the SHA-256 hex digest of the file's bytes. Identical bytes
//! share a revision, which is harmless: a commit based on equal content
//! cannot lose anything.
//!
//! ## `commit` protocol
//!
//! 1. Take the exclusive advisory lock `<root>/.roster.lock`, polling until
//!    the call timeout elapses (then `Unavailable`).
//! 2. Re-hash the current file and compare with the base revision.
//! 3. Mismatch → `Conflict` with the current revision; nothing is written.
//! 4. Write `<file>.tmp`, then rename over the target (atomic on POSIX), or
//!    remove the file for a deletion.
//! 5. Release the lock (on drop).
//!
//! Reads take no lock: a rename never exposes a half-written file.

use std::fs::{File, OpenOptions};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use fs2::FileExt;
use sha2::{Digest, Sha256};

use roster_core::StorePath;

use crate::backend::{CommitResult, Revision, VersionedBackend, Versioned};
use crate::error::{io_err, BackendError};

/// Name of the lock file at the store root.
pub const LOCK_FILE: &str = ".roster.lock";

const LOCK_POLL: Duration = Duration::from_millis(10);

/// [`VersionedBackend`] over a local (or shared) directory.
#[derive(Debug, Clone)]
pub struct DirBackend {
    root: PathBuf,
}

impl DirBackend {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Filesystem location of a store path.
    pub fn fs_path(&self, path: &StorePath) -> PathBuf {
        path.as_str()
            .split('/')
            .filter(|part| !part.is_empty())
            .fold(self.root.clone(), |acc, part| acc.join(part))
    }

    fn read_current(&self, file: &Path) -> Result<Versioned, BackendError> {
        match std::fs::read(file) {
            Ok(bytes) => {
                let revision = content_revision(&bytes);
                Ok(Versioned::present(bytes, revision))
            }
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(Versioned::absent()),
            Err(err) => Err(io_err(file, err)),
        }
    }
}

/// SHA-256 hex revision of `bytes`.
pub fn content_revision(bytes: &[u8]) -> Revision {
    let mut h = Sha256::new();
    h.update(bytes);
    Revision::new(hex::encode(h.finalize()))
}

impl VersionedBackend for DirBackend {
    fn pull_latest(&self, path: &StorePath, _timeout: Duration) -> Result<Versioned, BackendError> {
        self.read_current(&self.fs_path(path))
    }

    fn commit(
        &self,
        path: &StorePath,
        content: Option<&[u8]>,
        base: Option<&Revision>,
        timeout: Duration,
    ) -> Result<CommitResult, BackendError> {
        let _lock = StoreLock::acquire(&self.root, timeout)?;

        let file = self.fs_path(path);
        let current = self.read_current(&file)?.revision;
        if current.as_ref() != base {
            tracing::debug!(path = %path, "revision moved; refusing commit");
            return Ok(CommitResult::Conflict(current));
        }

        match content {
            Some(bytes) => {
                atomic_write(&file, bytes)?;
                Ok(CommitResult::Success(Some(content_revision(bytes))))
            }
            None => {
                match std::fs::remove_file(&file) {
                    Ok(()) => {}
                    Err(err) if err.kind() == ErrorKind::NotFound => {}
                    Err(err) => return Err(io_err(&file, err)),
                }
                Ok(CommitResult::Success(None))
            }
        }
    }

    fn list(&self, dir: &StorePath, _timeout: Duration) -> Result<Vec<StorePath>, BackendError> {
        let fs_dir = self.fs_path(dir);
        let entries = match std::fs::read_dir(&fs_dir) {
            Ok(entries) => entries,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(vec![]),
            Err(err) => return Err(io_err(&fs_dir, err)),
        };
        let mut paths: Vec<StorePath> = entries
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().map(|t| t.is_file()).unwrap_or(false))
            .map(|e| e.file_name().to_string_lossy().into_owned())
            .filter(|name| !name.ends_with(".tmp"))
            .map(|name| StorePath::new(format!("{}{name}", dir.as_str())))
            .collect();
        paths.sort();
        Ok(paths)
    }
}

/// Write via `<file>.tmp` + rename; on rename failure the original is left intact.
fn atomic_write(file: &Path, bytes: &[u8]) -> Result<(), BackendError> {
    if let Some(parent) = file.parent() {
        std::fs::create_dir_all(parent).map_err(|e| io_err(parent, e))?;
    }
    let mut tmp_name = file.as_os_str().to_owned();
    tmp_name.push(".tmp");
    let tmp = PathBuf::from(tmp_name);

    std::fs::write(&tmp, bytes).map_err(|e| io_err(&tmp, e))?;
    if let Err(e) = std::fs::rename(&tmp, file) {
        let _ = std::fs::remove_file(&tmp);
        return Err(io_err(file, e));
    }
    Ok(())
}

/// Exclusive store-wide lock, released on drop.
struct StoreLock {
    _file: File,
}

impl StoreLock {
    fn acquire(root: &Path, timeout: Duration) -> Result<Self, BackendError> {
        std::fs::create_dir_all(root).map_err(|e| io_err(root, e))?;
        let lock_path = root.join(LOCK_FILE);
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(&lock_path)
            .map_err(|e| io_err(&lock_path, e))?;

        let start = Instant::now();
        loop {
            match file.try_lock_exclusive() {
                Ok(()) => return Ok(StoreLock { _file: file }),
                Err(_) if start.elapsed() >= timeout => {
                    return Err(BackendError::Unavailable {
                        reason: format!(
                            "store lock {} busy for {}ms",
                            lock_path.display(),
                            timeout.as_millis()
                        ),
                    });
                }
                Err(_) => std::thread::sleep(LOCK_POLL),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const T: Duration = Duration::from_secs(1);

    #[test]
    fn absent_file_reads_as_absent() {
        let root = TempDir::new().unwrap();
        let backend = DirBackend::new(root.path());
        let read = backend.pull_latest(&StorePath::registry(), T).unwrap();
        assert_eq!(read, Versioned::absent());
    }

    #[test]
    fn create_then_update_with_matching_base() {
        let root = TempDir::new().unwrap();
        let backend = DirBackend::new(root.path());
        let path = StorePath::from("entities/a1.doc");

        let created = backend.commit(&path, Some(b"one"), None, T).unwrap();
        assert_eq!(created, CommitResult::Success(Some(content_revision(b"one"))));
        assert!(root.path().join("entities").join("a1.doc").exists());

        let base = content_revision(b"one");
        let updated = backend.commit(&path, Some(b"two"), Some(&base), T).unwrap();
        assert_eq!(updated, CommitResult::Success(Some(content_revision(b"two"))));
        assert_eq!(
            backend.pull_latest(&path, T).unwrap().content,
            Some(b"two".to_vec())
        );
    }

    #[test]
    fn stale_base_conflicts_and_leaves_file_untouched() {
        let root = TempDir::new().unwrap();
        let backend = DirBackend::new(root.path());
        let path = StorePath::config();
        backend.commit(&path, Some(b"current"), None, T).unwrap();

        let stale = content_revision(b"older");
        let result = backend.commit(&path, Some(b"mine"), Some(&stale), T).unwrap();
        assert_eq!(result, CommitResult::Conflict(Some(content_revision(b"current"))));
        assert_eq!(
            std::fs::read(root.path().join("config.doc")).unwrap(),
            b"current".to_vec()
        );
    }

    #[test]
    fn tmp_file_cleaned_up_after_commit() {
        let root = TempDir::new().unwrap();
        let backend = DirBackend::new(root.path());
        backend.commit(&StorePath::archive(), Some(b"[]"), None, T).unwrap();
        assert!(!root.path().join("archive.log.tmp").exists());
    }

    #[test]
    fn held_lock_turns_into_unavailable_after_timeout() {
        let root = TempDir::new().unwrap();
        let backend = DirBackend::new(root.path());
        let _held = StoreLock::acquire(root.path(), T).unwrap();

        let err = backend
            .commit(&StorePath::config(), Some(b"x"), None, Duration::from_millis(30))
            .unwrap_err();
        assert!(matches!(err, BackendError::Unavailable { .. }), "got: {err}");
    }

    #[test]
    fn list_skips_tmp_files_and_subdirectories() {
        let root = TempDir::new().unwrap();
        let dir = root.path().join("entities");
        std::fs::create_dir_all(dir.join("nested")).unwrap();
        std::fs::write(dir.join("b.doc"), "-").unwrap();
        std::fs::write(dir.join("a.doc"), "-").unwrap();
        std::fs::write(dir.join("c.doc.tmp"), "-").unwrap();

        let backend = DirBackend::new(root.path());
        let listed = backend.list(&StorePath::entity_dir(), T).unwrap();
        assert_eq!(
            listed,
            vec![StorePath::from("entities/a.doc"), StorePath::from("entities/b.doc")]
        );
    }

    #[test]
    #[cfg(unix)]
    fn rename_failure_leaves_original_and_cleans_tmp() {
        let root = TempDir::new().unwrap();
        let file = root.path().join("target");
        // A directory at the target makes the rename fail.
        std::fs::create_dir_all(file.join("occupied")).unwrap();

        let err = atomic_write(&file, b"new").unwrap_err();
        assert!(matches!(err, BackendError::Io { .. }));
        assert!(file.join("occupied").exists(), "original must be intact");
        assert!(!root.path().join("target.tmp").exists(), ".tmp should be cleaned up");
    }
}
