//! Typed documents and their on-disk encoding.
//!
//! Every document is YAML. The kind of a document is never stored inside it;
//! it is derived from the path it lives at (see [`DocKind::for_path`]).

use serde::{Deserialize, Serialize};

use crate::error::RegistryError;
use crate::path::{DocKind, StorePath};
use crate::types::{ArchivedEntity, Entity, Fields, RegistryDocument, Value, CURRENT_VERSION};

/// Contents of `config.doc` under the Distributed layout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigDocument {
    pub version: String,
    #[serde(default)]
    pub values: Fields,
}

impl Default for ConfigDocument {
    fn default() -> Self {
        Self {
            version: CURRENT_VERSION.to_owned(),
            values: Fields::new(),
        }
    }
}

/// One independently committable document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Document {
    Registry(RegistryDocument),
    Config(ConfigDocument),
    Archive(Vec<ArchivedEntity>),
    Entity(Entity),
    Scalar(Value),
}

impl Document {
    pub fn kind(&self) -> DocKind {
        match self {
            Self::Registry(_) => DocKind::Registry,
            Self::Config(_) => DocKind::Config,
            Self::Archive(_) => DocKind::Archive,
            Self::Entity(_) => DocKind::Entity,
            Self::Scalar(_) => DocKind::Scalar,
        }
    }

    /// Serialize to YAML bytes.
    pub fn encode(&self) -> Result<Vec<u8>, RegistryError> {
        let yaml = match self {
            Self::Registry(doc) => serde_yaml::to_string(doc)?,
            Self::Config(doc) => serde_yaml::to_string(doc)?,
            Self::Archive(entries) => serde_yaml::to_string(entries)?,
            Self::Entity(entity) => serde_yaml::to_string(entity)?,
            Self::Scalar(value) => serde_yaml::to_string(value)?,
        };
        Ok(yaml.into_bytes())
    }

    /// Parse the bytes stored at `path`.
    ///
    /// Returns `RegistryError::UnknownPath` for paths of no known shape and
    /// `RegistryError::Parse` (with path + line context) for malformed YAML.
    pub fn decode(path: &StorePath, bytes: &[u8]) -> Result<Self, RegistryError> {
        let kind = DocKind::for_path(path)?;
        let parse_err = |source| RegistryError::Parse {
            path: path.to_string(),
            source,
        };
        let doc = match kind {
            DocKind::Registry => Self::Registry(serde_yaml::from_slice(bytes).map_err(parse_err)?),
            DocKind::Config => Self::Config(serde_yaml::from_slice(bytes).map_err(parse_err)?),
            DocKind::Archive => Self::Archive(serde_yaml::from_slice(bytes).map_err(parse_err)?),
            DocKind::Entity => Self::Entity(serde_yaml::from_slice(bytes).map_err(parse_err)?),
            DocKind::Scalar => Self::Scalar(serde_yaml::from_slice(bytes).map_err(parse_err)?),
        };
        if let Self::Entity(entity) = &doc {
            if path.entity_id().as_ref() != Some(&entity.id) {
                return Err(RegistryError::KindMismatch {
                    path: path.to_string(),
                    expected: "entity whose id matches its file name",
                    found: "entity with a different id",
                });
            }
        }
        Ok(doc)
    }

    /// Check that this document may be stored at `path`.
    pub fn check_path(&self, path: &StorePath) -> Result<(), RegistryError> {
        let expected = DocKind::for_path(path)?;
        if expected != self.kind() {
            return Err(RegistryError::KindMismatch {
                path: path.to_string(),
                expected: expected.name(),
                found: self.kind().name(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::EntityId;
    use chrono::{TimeZone, Utc};
    use serde_json::json;

    #[test]
    fn entity_document_decodes_at_its_own_path() {
        let entity = Entity::new("a1", Utc.timestamp_opt(0, 0).unwrap())
            .with_field("metrics", json!({"runs": 2}));
        let bytes = Document::Entity(entity.clone()).encode().expect("encode");
        let path = StorePath::entity(&EntityId::from("a1"));
        assert_eq!(Document::decode(&path, &bytes).expect("decode"), Document::Entity(entity));
    }

    #[test]
    fn entity_under_foreign_file_name_is_rejected() {
        let entity = Entity::new("a1", Utc.timestamp_opt(0, 0).unwrap());
        let bytes = Document::Entity(entity).encode().expect("encode");
        let path = StorePath::entity(&EntityId::from("b2"));
        assert!(matches!(
            Document::decode(&path, &bytes),
            Err(RegistryError::KindMismatch { .. })
        ));
    }

    #[test]
    fn scalar_is_a_bare_yaml_value() {
        let bytes = Document::Scalar(json!("2026-10-17T00:00:00Z")).encode().expect("encode");
        let text = String::from_utf8(bytes.clone()).expect("utf8");
        assert!(text.contains("2026-10-17T00:00:00Z"));
        let path = StorePath::from("metadata/last_spawn_time.scalar");
        assert_eq!(
            Document::decode(&path, &bytes).expect("decode"),
            Document::Scalar(json!("2026-10-17T00:00:00Z"))
        );
    }

    #[test]
    fn corrupt_yaml_reports_path() {
        let err = Document::decode(&StorePath::registry(), b"entities: [unclosed").unwrap_err();
        assert!(matches!(err, RegistryError::Parse { .. }));
        assert!(err.to_string().contains("registry.doc"));
    }

    #[test]
    fn check_path_rejects_wrong_kind() {
        let doc = Document::Scalar(json!(1));
        assert!(doc.check_path(&StorePath::archive()).is_err());
        assert!(doc.check_path(&StorePath::from("metadata/n.scalar")).is_ok());
    }
}
