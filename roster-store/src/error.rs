//! Error types for roster-store.

use std::path::PathBuf;

use thiserror::Error;

use roster_core::{EntityId, RegistryError, StorePath};

use crate::backend::Revision;

/// Failures reported by a versioned storage backend.
///
/// Every variant is transient from the updater's point of view and is
/// retried under its own budget, separate from conflict retries.
#[derive(Debug, Error)]
pub enum BackendError {
    /// Network failure, busy lock or exceeded call timeout.
    #[error("backend unavailable: {reason}")]
    Unavailable { reason: String },

    /// Credentials rejected by the backend.
    #[error("backend authentication failed: {reason}")]
    Auth { reason: String },

    /// An I/O error, with annotated path for context.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Convenience constructor for [`BackendError::Io`].
pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> BackendError {
    BackendError::Io {
        path: path.into(),
        source,
    }
}

/// Raised by a transform; never retried.
#[derive(Debug, Error)]
pub enum TransformError {
    #[error("entity {id} not found")]
    EntityNotFound { id: EntityId },

    #[error("entity {id} is archived and cannot be re-added")]
    EntityArchived { id: EntityId },

    #[error("invalid input: {0}")]
    Invalid(String),

    #[error(transparent)]
    Registry(#[from] RegistryError),
}

/// The last conflict observed before retries ran out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConflictReport {
    pub path: StorePath,
    /// Revision current in the store when the conflict was reported.
    pub current_revision: Option<Revision>,
    /// Remote content at that revision, when it could be read.
    pub remote_content: Option<String>,
}

/// Errors surfaced by the transactional updater and the high-level operations.
#[derive(Debug, Error)]
pub enum UpdateError {
    /// Conflict retries exhausted; the caller may re-invoke later.
    #[error("gave up after {retries} conflict retries (last conflict at {})", .last_conflict.path)]
    ExhaustedRetries {
        retries: u32,
        last_conflict: Box<ConflictReport>,
    },

    /// The backend stayed unreachable through the unavailable-retry budget.
    #[error("storage backend unavailable after {attempts} attempt(s): {source}")]
    BackendUnavailable {
        attempts: u32,
        #[source]
        source: BackendError,
    },

    /// The transform failed; caller bug or invalid input.
    #[error("transform failed: {0}")]
    TransformRaised(#[source] TransformError),

    /// Non-idempotent operation aimed at a missing entity.
    #[error("entity {id} not found")]
    EntityNotFound { id: EntityId },

    /// Re-adding an archived id.
    #[error("entity {id} is archived and cannot be re-added")]
    EntityArchived { id: EntityId },

    /// Stored content that cannot be decoded.
    #[error("registry error: {0}")]
    Registry(#[from] RegistryError),
}

impl From<TransformError> for UpdateError {
    fn from(err: TransformError) -> Self {
        match err {
            TransformError::EntityNotFound { id } => UpdateError::EntityNotFound { id },
            TransformError::EntityArchived { id } => UpdateError::EntityArchived { id },
            other => UpdateError::TransformRaised(other),
        }
    }
}

impl UpdateError {
    /// True for failures worth re-invoking later (contention or infrastructure).
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            UpdateError::ExhaustedRetries { .. } | UpdateError::BackendUnavailable { .. }
        )
    }
}

/// Errors loading or saving store settings.
#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("YAML serialization error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// Includes file path and line context from serde_yaml.
    #[error("failed to parse settings at {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("cannot determine home directory; set $HOME or equivalent")]
    HomeNotFound,
}

/// Failure of a persisted layout conversion on a directory store.
#[derive(Debug, Error)]
pub enum RelayoutError {
    #[error(transparent)]
    Update(#[from] UpdateError),

    /// The data moved but the new layout was not recorded.
    #[error("converted data but failed to save settings: {0}")]
    Settings(#[from] SettingsError),
}
