//! Versioned storage backend contract.
//!
//! A backend stores opaque bytes per [`StorePath`] and offers a single
//! compare-and-swap primitive: [`VersionedBackend::commit`] succeeds only if
//! the caller's base revision is still current. A `Conflict` answer must
//! never have applied the caller's content.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use roster_core::StorePath;

use crate::error::BackendError;

/// Opaque handle of one stored state of a path. Only ever compared for identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Revision(String);

impl Revision {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Revision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Content of a path as read, with the revision it was read at.
///
/// Absent paths have neither content nor revision.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Versioned {
    pub content: Option<Vec<u8>>,
    pub revision: Option<Revision>,
}

impl Versioned {
    pub fn absent() -> Self {
        Self::default()
    }

    pub fn present(content: Vec<u8>, revision: Revision) -> Self {
        Self {
            content: Some(content),
            revision: Some(revision),
        }
    }
}

/// Outcome of a compare-and-swap commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommitResult {
    /// The content is now durably the latest at the path (`None` after a deletion).
    Success(Option<Revision>),
    /// The path moved past the base revision; nothing was written.
    Conflict(Option<Revision>),
}

/// Storage with per-path optimistic concurrency.
///
/// Every call carries a timeout; implementations that can block must give up
/// with [`BackendError::Unavailable`] once it elapses.
pub trait VersionedBackend {
    /// Latest content and revision at `path`.
    fn pull_latest(&self, path: &StorePath, timeout: Duration) -> Result<Versioned, BackendError>;

    /// Replace (`Some`) or delete (`None`) the content at `path` if `base` is still current.
    fn commit(
        &self,
        path: &StorePath,
        content: Option<&[u8]>,
        base: Option<&Revision>,
        timeout: Duration,
    ) -> Result<CommitResult, BackendError>;

    /// Files directly under the directory path `dir`, sorted.
    fn list(&self, dir: &StorePath, timeout: Duration) -> Result<Vec<StorePath>, BackendError>;
}

impl<B: VersionedBackend + ?Sized> VersionedBackend for &B {
    fn pull_latest(&self, path: &StorePath, timeout: Duration) -> Result<Versioned, BackendError> {
        (**self).pull_latest(path, timeout)
    }

    fn commit(
        &self,
        path: &StorePath,
        content: Option<&[u8]>,
        base: Option<&Revision>,
        timeout: Duration,
    ) -> Result<CommitResult, BackendError> {
        (**self).commit(path, content, base, timeout)
    }

    fn list(&self, dir: &StorePath, timeout: Duration) -> Result<Vec<StorePath>, BackendError> {
        (**self).list(dir, timeout)
    }
}

impl<B: VersionedBackend + ?Sized> VersionedBackend for Arc<B> {
    fn pull_latest(&self, path: &StorePath, timeout: Duration) -> Result<Versioned, BackendError> {
        (**self).pull_latest(path, timeout)
    }

    fn commit(
        &self,
        path: &StorePath,
        content: Option<&[u8]>,
        base: Option<&Revision>,
        timeout: Duration,
    ) -> Result<CommitResult, BackendError> {
        (**self).commit(path, content, base, timeout)
    }

    fn list(&self, dir: &StorePath, timeout: Duration) -> Result<Vec<StorePath>, BackendError> {
        (**self).list(dir, timeout)
    }
}
