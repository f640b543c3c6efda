//! Storage layout strategy: how the logical registry maps onto store paths.
//!
//! `Monolithic` keeps everything in `registry.doc`; every writer competes for
//! that one path. `Distributed` gives every entity, every metadata scalar,
//! the config and the archive their own path, so writes to unrelated fields
//! never share an optimistic-concurrency slot.
//!
//! Callers speak in [`FieldRef`]s; only this module knows file names.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::document::{ConfigDocument, Document};
use crate::error::RegistryError;
use crate::path::StorePath;
use crate::types::{ArchivedEntity, Entity, EntityId, FieldName, Fields, RegistryDocument, Value};

/// Documents as read from the store, keyed by path.
pub type DocMap = BTreeMap<StorePath, Document>;

/// Intended new state per path; `None` deletes the path.
pub type Changes = BTreeMap<StorePath, Option<Document>>;

/// A logical field of the registry, independent of layout.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum FieldRef {
    Entity(EntityId),
    Entities,
    Archive,
    Config,
    Metadata(FieldName),
    AllMetadata,
}

impl FieldRef {
    /// Every field of the registry.
    pub fn all() -> BTreeSet<FieldRef> {
        [Self::Entities, Self::Archive, Self::Config, Self::AllMetadata]
            .into_iter()
            .collect()
    }
}

impl fmt::Display for FieldRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Entity(id) => write!(f, "entities.{id}"),
            Self::Entities => f.write_str("entities"),
            Self::Archive => f.write_str("archive"),
            Self::Config => f.write_str("config"),
            Self::Metadata(name) => write!(f, "metadata.{name}"),
            Self::AllMetadata => f.write_str("metadata"),
        }
    }
}

/// Value of one logical field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Logical {
    Entity(Option<Entity>),
    Entities(Vec<Entity>),
    Archive(Vec<ArchivedEntity>),
    Config(Fields),
    Scalar(Option<Value>),
    Metadata(BTreeMap<String, Value>),
}

impl Logical {
    /// Read `field` out of `doc`.
    pub fn project(doc: &RegistryDocument, field: &FieldRef) -> Self {
        match field {
            FieldRef::Entity(id) => Self::Entity(doc.entity(id).cloned()),
            FieldRef::Entities => Self::Entities(doc.entities.clone()),
            FieldRef::Archive => Self::Archive(doc.archive.clone()),
            FieldRef::Config => Self::Config(doc.config.clone()),
            FieldRef::Metadata(name) => Self::Scalar(doc.metadata.get(&name.0).cloned()),
            FieldRef::AllMetadata => Self::Metadata(doc.metadata.clone()),
        }
    }

    /// Overwrite `field` in `doc` with this value.
    pub fn store(self, doc: &mut RegistryDocument, field: &FieldRef) -> Result<(), RegistryError> {
        match (field, self) {
            (FieldRef::Entity(id), Self::Entity(value)) => {
                if value.as_ref().is_some_and(|e| &e.id != id) {
                    return Err(RegistryError::FieldMismatch {
                        field: field.to_string(),
                    });
                }
                match (doc.entities.iter().position(|e| &e.id == id), value) {
                    (Some(pos), Some(entity)) => doc.entities[pos] = entity,
                    (Some(pos), None) => {
                        doc.entities.remove(pos);
                    }
                    (None, Some(entity)) => doc.entities.push(entity),
                    (None, None) => {}
                }
            }
            (FieldRef::Entities, Self::Entities(entities)) => doc.entities = entities,
            (FieldRef::Archive, Self::Archive(archive)) => doc.archive = archive,
            (FieldRef::Config, Self::Config(config)) => doc.config = config,
            (FieldRef::Metadata(name), Self::Scalar(value)) => match value {
                Some(value) => {
                    doc.metadata.insert(name.0.clone(), value);
                }
                None => {
                    doc.metadata.remove(&name.0);
                }
            },
            (FieldRef::AllMetadata, Self::Metadata(metadata)) => doc.metadata = metadata,
            (field, _) => {
                return Err(RegistryError::FieldMismatch {
                    field: field.to_string(),
                })
            }
        }
        Ok(())
    }
}

/// Physical representation of the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum StorageLayout {
    Monolithic,
    #[default]
    Distributed,
}

impl fmt::Display for StorageLayout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StorageLayout::Monolithic => write!(f, "monolithic"),
            StorageLayout::Distributed => write!(f, "distributed"),
        }
    }
}

impl StorageLayout {
    /// Paths holding `fields`. Directory paths (trailing `/`) stand for every file beneath.
    pub fn resolve_paths<'a>(
        &self,
        fields: impl IntoIterator<Item = &'a FieldRef>,
    ) -> BTreeSet<StorePath> {
        let mut paths = BTreeSet::new();
        for field in fields {
            match self {
                StorageLayout::Monolithic => {
                    paths.insert(StorePath::registry());
                }
                StorageLayout::Distributed => {
                    paths.insert(match field {
                        FieldRef::Entity(id) => StorePath::entity(id),
                        FieldRef::Entities => StorePath::entity_dir(),
                        FieldRef::Archive => StorePath::archive(),
                        FieldRef::Config => StorePath::config(),
                        FieldRef::Metadata(name) => StorePath::scalar(name),
                        FieldRef::AllMetadata => StorePath::metadata_dir(),
                    });
                }
            }
        }
        paths
    }

    /// True when `path` has a shape this layout writes.
    pub fn owns(&self, path: &StorePath) -> bool {
        match self {
            StorageLayout::Monolithic => path == &StorePath::registry(),
            StorageLayout::Distributed => {
                path == &StorePath::config()
                    || path == &StorePath::archive()
                    || path.entity_id().is_some()
                    || path.field_name().is_some()
            }
        }
    }

    /// Build the (possibly partial) logical document from the documents read.
    ///
    /// Paths this layout does not own are ignored. Under `Distributed`,
    /// entities are ordered by `(created_at, id)` and entities carrying a
    /// tombstone in the loaded archive are hidden.
    pub fn assemble(&self, docs: &DocMap) -> Result<RegistryDocument, RegistryError> {
        match self {
            StorageLayout::Monolithic => match docs.get(&StorePath::registry()) {
                Some(Document::Registry(doc)) => Ok(doc.clone()),
                Some(other) => Err(mismatch(&StorePath::registry(), "registry", other)),
                None => Ok(RegistryDocument::default()),
            },
            StorageLayout::Distributed => {
                let mut doc = RegistryDocument::default();
                for (path, document) in docs.iter().filter(|(p, _)| self.owns(p)) {
                    match (document, path.field_name()) {
                        (Document::Config(config), _) => {
                            doc.version = config.version.clone();
                            doc.config = config.values.clone();
                        }
                        (Document::Archive(archive), _) => doc.archive = archive.clone(),
                        (Document::Entity(entity), _) => doc.entities.push(entity.clone()),
                        (Document::Scalar(value), Some(name)) => {
                            doc.metadata.insert(name.0, value.clone());
                        }
                        (other, _) => return Err(mismatch(path, "distributed part", other)),
                    }
                }
                let tombstones = doc.tombstones();
                doc.entities.retain(|e| !tombstones.contains(&e.id));
                doc.entities
                    .sort_by(|a, b| (a.created_at, &a.id).cmp(&(b.created_at, &b.id)));
                Ok(doc)
            }
        }
    }

    /// Split a logical document into the documents this layout stores.
    pub fn decompose(&self, doc: &RegistryDocument) -> DocMap {
        let mut parts = DocMap::new();
        match self {
            StorageLayout::Monolithic => {
                parts.insert(StorePath::registry(), Document::Registry(doc.clone()));
            }
            StorageLayout::Distributed => {
                parts.insert(
                    StorePath::config(),
                    Document::Config(ConfigDocument {
                        version: doc.version.clone(),
                        values: doc.config.clone(),
                    }),
                );
                parts.insert(StorePath::archive(), Document::Archive(doc.archive.clone()));
                for entity in &doc.entities {
                    parts.insert(StorePath::entity(&entity.id), Document::Entity(entity.clone()));
                }
                for (name, value) in &doc.metadata {
                    parts.insert(
                        StorePath::scalar(&FieldName::from(name.as_str())),
                        Document::Scalar(value.clone()),
                    );
                }
            }
        }
        parts
    }

    /// Per-path changes turning `before` into `after`.
    ///
    /// `present` lists the paths that exist in the store; a present path
    /// inside `scope` with no counterpart in `after` is deleted. Any change
    /// outside `scope` is rejected with `RegistryError::OutOfScope`.
    pub fn diff(
        &self,
        present: &BTreeSet<StorePath>,
        before: &RegistryDocument,
        after: &RegistryDocument,
        scope: &BTreeSet<StorePath>,
    ) -> Result<Changes, RegistryError> {
        for entity in &after.entities {
            entity.id.validate()?;
        }
        for name in after.metadata.keys() {
            FieldName::from(name.as_str()).validate()?;
        }

        let old = self.decompose(before);
        let new = self.decompose(after);
        let mut changes = Changes::new();
        for (path, doc) in &new {
            if old.get(path) != Some(doc) {
                changes.insert(path.clone(), Some(doc.clone()));
            }
        }
        for path in old.keys() {
            if !new.contains_key(path) {
                changes.insert(path.clone(), None);
            }
        }
        // Files hidden from the logical view (e.g. tombstoned entities) are
        // cleaned up when they fall inside the scope.
        for path in present {
            if !new.contains_key(path) && self.owns(path) && in_scope(path, scope) {
                changes.entry(path.clone()).or_insert(None);
            }
        }
        if let Some(path) = changes.keys().find(|p| !in_scope(p, scope)) {
            return Err(RegistryError::OutOfScope {
                path: path.to_string(),
            });
        }
        changes.retain(|path, doc| doc.is_some() || present.contains(path));
        Ok(changes)
    }

    /// Read one logical field from the documents read.
    pub fn read_logical(&self, docs: &DocMap, field: &FieldRef) -> Result<Logical, RegistryError> {
        Ok(Logical::project(&self.assemble(docs)?, field))
    }

    /// Changes that set `field` to `value`, touching only the paths that hold `field`.
    pub fn write_logical(
        &self,
        docs: &DocMap,
        field: &FieldRef,
        value: Logical,
    ) -> Result<Changes, RegistryError> {
        let before = self.assemble(docs)?;
        let mut after = before.clone();
        value.store(&mut after, field)?;
        let present = docs.keys().cloned().collect();
        self.diff(&present, &before, &after, &self.resolve_paths([field]))
    }
}

/// True when `path` is one of `scope` or a file directly under a directory in `scope`.
pub fn in_scope(path: &StorePath, scope: &BTreeSet<StorePath>) -> bool {
    scope.contains(path) || scope.iter().any(|dir| dir.is_parent_of(path))
}

fn mismatch(path: &StorePath, expected: &'static str, found: &Document) -> RegistryError {
    RegistryError::KindMismatch {
        path: path.to_string(),
        expected,
        found: found.kind().name(),
    }
}
