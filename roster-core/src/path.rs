//! Logical store paths.
//!
//! # Path shapes
//!
//! ```text
//! registry.doc              (Monolithic: the whole RegistryDocument)
//! config.doc                (Distributed: schema version + config map)
//! archive.log               (Distributed: append-only tombstones)
//! entities/<id>.doc         (Distributed: one file per entity)
//! metadata/<field>.scalar   (Distributed: one file per metadata scalar)
//! ```
//!
//! Paths are `/`-separated and relative to the store root. A path ending in
//! `/` names a directory; backends expand it to the files directly beneath.
//! The shapes of the two layouts are disjoint, so a path alone determines the
//! kind of document it holds.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::RegistryError;
use crate::types::{EntityId, FieldName};

pub const REGISTRY_FILE: &str = "registry.doc";
pub const CONFIG_FILE: &str = "config.doc";
pub const ARCHIVE_FILE: &str = "archive.log";
pub const ENTITY_DIR: &str = "entities/";
pub const METADATA_DIR: &str = "metadata/";
pub const ENTITY_EXT: &str = ".doc";
pub const SCALAR_EXT: &str = ".scalar";

/// A `/`-separated path relative to the store root.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct StorePath(String);

impl StorePath {
    pub fn new(path: impl Into<String>) -> Self {
        Self(path.into())
    }

    pub fn registry() -> Self {
        Self::new(REGISTRY_FILE)
    }

    pub fn config() -> Self {
        Self::new(CONFIG_FILE)
    }

    pub fn archive() -> Self {
        Self::new(ARCHIVE_FILE)
    }

    pub fn entity_dir() -> Self {
        Self::new(ENTITY_DIR)
    }

    pub fn metadata_dir() -> Self {
        Self::new(METADATA_DIR)
    }

    /// `entities/<id>.doc`
    pub fn entity(id: &EntityId) -> Self {
        Self(format!("{ENTITY_DIR}{}{ENTITY_EXT}", id.0))
    }

    /// `metadata/<field>.scalar`
    pub fn scalar(field: &FieldName) -> Self {
        Self(format!("{METADATA_DIR}{}{SCALAR_EXT}", field.0))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_dir(&self) -> bool {
        self.0.ends_with('/')
    }

    /// True when `self` is a directory path and `other` is a file directly beneath it.
    pub fn is_parent_of(&self, other: &StorePath) -> bool {
        self.is_dir()
            && other
                .0
                .strip_prefix(&self.0)
                .is_some_and(|rest| !rest.is_empty() && !rest.contains('/'))
    }

    /// Entity id encoded in an `entities/<id>.doc` path.
    pub fn entity_id(&self) -> Option<EntityId> {
        self.0
            .strip_prefix(ENTITY_DIR)?
            .strip_suffix(ENTITY_EXT)
            .filter(|stem| !stem.is_empty() && !stem.contains('/'))
            .map(EntityId::from)
    }

    /// Field name encoded in a `metadata/<field>.scalar` path.
    pub fn field_name(&self) -> Option<FieldName> {
        self.0
            .strip_prefix(METADATA_DIR)?
            .strip_suffix(SCALAR_EXT)
            .filter(|stem| !stem.is_empty() && !stem.contains('/'))
            .map(FieldName::from)
    }
}

impl fmt::Display for StorePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<&str> for StorePath {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// The kind of document stored at a path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocKind {
    Registry,
    Config,
    Archive,
    Entity,
    Scalar,
}

impl DocKind {
    pub fn for_path(path: &StorePath) -> Result<Self, RegistryError> {
        match path.as_str() {
            REGISTRY_FILE => Ok(Self::Registry),
            CONFIG_FILE => Ok(Self::Config),
            ARCHIVE_FILE => Ok(Self::Archive),
            _ if path.entity_id().is_some() => Ok(Self::Entity),
            _ if path.field_name().is_some() => Ok(Self::Scalar),
            other => Err(RegistryError::UnknownPath {
                path: other.to_owned(),
            }),
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Registry => "registry",
            Self::Config => "config",
            Self::Archive => "archive",
            Self::Entity => "entity",
            Self::Scalar => "scalar",
        }
    }
}

impl fmt::Display for DocKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("registry.doc", DocKind::Registry)]
    #[case("config.doc", DocKind::Config)]
    #[case("archive.log", DocKind::Archive)]
    #[case("entities/a1.doc", DocKind::Entity)]
    #[case("metadata/last_spawn_time.scalar", DocKind::Scalar)]
    fn kind_follows_path_shape(#[case] path: &str, #[case] kind: DocKind) {
        assert_eq!(DocKind::for_path(&StorePath::from(path)).unwrap(), kind);
    }

    #[rstest]
    #[case("entities/")]
    #[case("entities/.doc")]
    #[case("entities/a/b.doc")]
    #[case("metadata/x.doc")]
    #[case("notes.txt")]
    fn unknown_shapes_are_rejected(#[case] path: &str) {
        assert!(matches!(
            DocKind::for_path(&StorePath::from(path)),
            Err(RegistryError::UnknownPath { .. })
        ));
    }

    #[test]
    fn directory_contains_only_direct_children() {
        let dir = StorePath::entity_dir();
        assert!(dir.is_parent_of(&StorePath::entity(&EntityId::from("a1"))));
        assert!(!dir.is_parent_of(&StorePath::from("entities/x/y.doc")));
        assert!(!dir.is_parent_of(&StorePath::from("metadata/a.scalar")));
        assert!(!StorePath::archive().is_parent_of(&StorePath::archive()));
    }

    #[test]
    fn ids_roundtrip_through_paths() {
        let id = EntityId::from("agent-7");
        assert_eq!(StorePath::entity(&id).entity_id(), Some(id));
        let field = FieldName::from("last_spawn_time");
        assert_eq!(StorePath::scalar(&field).field_name(), Some(field));
    }
}
