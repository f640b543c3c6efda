//! roster store: versioned backends, the transactional updater and the registry facade.
//!
//! Public API surface:
//! - [`backend`]: [`VersionedBackend`] contract, [`Revision`], [`CommitResult`]
//! - [`memory`] / [`dir`]: in-process and on-disk backends
//! - [`updater`]: read / transform / commit state machine with conflict merge
//! - [`ops`]: high-level registry operations
//! - [`store`]: [`RegistryStore`], binding a backend to its settings
//! - [`settings`]: `<root>/roster.yaml`
//! - [`error`]: [`UpdateError`], [`BackendError`], [`SettingsError`]

pub mod backend;
pub mod backoff;
pub mod dir;
pub mod error;
pub mod memory;
pub mod ops;
pub mod settings;
pub mod store;
pub mod updater;

pub use backend::{CommitResult, Revision, Versioned, VersionedBackend};
pub use backoff::BackoffPolicy;
pub use dir::DirBackend;
pub use error::{
    BackendError, ConflictReport, RelayoutError, SettingsError, TransformError, UpdateError,
};
pub use memory::MemoryBackend;
pub use settings::StoreSettings;
pub use store::RegistryStore;
pub use updater::{transform_fn, Applied, MergeRule, Phase, Snapshot, Transform, Updater};
