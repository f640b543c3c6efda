//! roster core library: document model, storage layout, merge resolver, errors.
//!
//! Public API surface:
//! - [`types`]: newtypes and the registry document model
//! - [`path`]: logical store paths and document kinds
//! - [`document`]: typed documents and their YAML encoding
//! - [`layout`]: Monolithic vs Distributed mapping of fields to paths
//! - [`merge`]: per-field conflict resolution
//! - [`error`]: [`RegistryError`]

pub mod document;
pub mod error;
pub mod layout;
pub mod merge;
pub mod path;
pub mod types;

pub use document::{ConfigDocument, Document};
pub use error::RegistryError;
pub use layout::{Changes, DocMap, FieldRef, Logical, StorageLayout};
pub use path::{DocKind, StorePath};
pub use types::{
    ArchivedEntity, Entity, EntityId, FieldName, Fields, RegistryDocument, Value, CURRENT_VERSION,
    METRICS_FIELD,
};
