//! Domain types for the roster registry.
//!
//! Free-form values (entity fields, config, metadata scalars) are
//! `serde_json::Value`; persisted documents are serialized with serde_yaml.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::RegistryError;

/// Free-form JSON-like value.
pub type Value = serde_json::Value;

/// String-keyed map of free-form values.
pub type Fields = serde_json::Map<String, Value>;

/// Schema version written into new documents.
pub const CURRENT_VERSION: &str = "1";

/// Key of the nested metrics map inside [`Entity::fields`].
pub const METRICS_FIELD: &str = "metrics";

// ---------------------------------------------------------------------------
// Newtypes
// ---------------------------------------------------------------------------

/// Opaque, immutable identifier of an entity.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EntityId(pub String);

impl EntityId {
    /// Reject ids that cannot be used as a single file name.
    pub fn validate(&self) -> Result<(), RegistryError> {
        validate_name("entity id", &self.0)
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<String> for EntityId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for EntityId {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

/// Name of a scalar metadata field, e.g. `last_spawn_time`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct FieldName(pub String);

impl FieldName {
    pub fn validate(&self) -> Result<(), RegistryError> {
        validate_name("metadata field", &self.0)
    }
}

impl fmt::Display for FieldName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<String> for FieldName {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for FieldName {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

fn validate_name(what: &'static str, value: &str) -> Result<(), RegistryError> {
    let reason = if value.is_empty() {
        Some("must not be empty")
    } else if value.starts_with('.') {
        Some("must not start with '.'")
    } else if value.contains(['/', '\\']) {
        Some("must not contain path separators")
    } else if value.chars().any(char::is_control) {
        Some("must not contain control characters")
    } else {
        None
    };
    match reason {
        Some(reason) => Err(RegistryError::InvalidName {
            what,
            value: value.to_owned(),
            reason,
        }),
        None => Ok(()),
    }
}

// ---------------------------------------------------------------------------
// Records
// ---------------------------------------------------------------------------

/// One managed record (e.g. an agent).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entity {
    pub id: EntityId,
    pub created_at: DateTime<Utc>,
    /// Set by in-place updates; absent until the first one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub fields: Fields,
}

impl Entity {
    pub fn new(id: impl Into<EntityId>, created_at: DateTime<Utc>) -> Self {
        Self {
            id: id.into(),
            created_at,
            updated_at: None,
            fields: Fields::new(),
        }
    }

    pub fn with_field(mut self, key: impl Into<String>, value: Value) -> Self {
        self.fields.insert(key.into(), value);
        self
    }

    /// Nested `metrics` map, if present and an object.
    pub fn metrics(&self) -> Option<&Fields> {
        self.fields.get(METRICS_FIELD).and_then(Value::as_object)
    }

    pub fn last_modified(&self) -> DateTime<Utc> {
        self.updated_at.unwrap_or(self.created_at)
    }

    /// Ordering key for most-recent-wins: last modification, then creation.
    pub fn recency(&self) -> (DateTime<Utc>, DateTime<Utc>) {
        (self.last_modified(), self.created_at)
    }
}

/// Tombstone recorded when an entity is removed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchivedEntity {
    pub entity: Entity,
    pub reason: String,
    pub removed_at: DateTime<Utc>,
}

impl ArchivedEntity {
    pub fn id(&self) -> &EntityId {
        &self.entity.id
    }

    /// SHA-256 hex digest of `(id, removed_at, reason)`; identical removals share a key.
    pub fn dedup_key(&self) -> String {
        let mut h = Sha256::new();
        h.update(self.entity.id.0.as_bytes());
        h.update([0]);
        h.update(self.removed_at.to_rfc3339().as_bytes());
        h.update([0]);
        h.update(self.reason.as_bytes());
        hex::encode(h.finalize())
    }
}

/// The logical registry aggregate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryDocument {
    pub version: String,
    #[serde(default)]
    pub entities: Vec<Entity>,
    #[serde(default)]
    pub archive: Vec<ArchivedEntity>,
    #[serde(default)]
    pub config: Fields,
    #[serde(default)]
    pub metadata: BTreeMap<String, Value>,
}

impl Default for RegistryDocument {
    fn default() -> Self {
        Self {
            version: CURRENT_VERSION.to_owned(),
            entities: Vec::new(),
            archive: Vec::new(),
            config: Fields::new(),
            metadata: BTreeMap::new(),
        }
    }
}

impl RegistryDocument {
    pub fn entity(&self, id: &EntityId) -> Option<&Entity> {
        self.entities.iter().find(|e| &e.id == id)
    }

    pub fn entity_mut(&mut self, id: &EntityId) -> Option<&mut Entity> {
        self.entities.iter_mut().find(|e| &e.id == id)
    }

    pub fn is_archived(&self, id: &EntityId) -> bool {
        self.archive.iter().any(|a| a.id() == id)
    }

    /// Ids carrying at least one tombstone.
    pub fn tombstones(&self) -> BTreeSet<EntityId> {
        self.archive.iter().map(|a| a.id().clone()).collect()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
