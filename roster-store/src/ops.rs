//! High-level registry operations.
//!
//! Each operation edits the logical [`RegistryDocument`] and declares the
//! fields it touches; [`Planned`] turns it into a [`Transform`] for a given
//! layout, restricted to the paths that hold those fields.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};

use roster_core::{
    ArchivedEntity, Changes, Entity, EntityId, FieldName, FieldRef, Fields, RegistryDocument,
    StorageLayout, StorePath, Value, METRICS_FIELD,
};

use crate::error::TransformError;
use crate::updater::{MergeRule, Snapshot, Transform};

/// An edit of the logical document.
pub trait Operation {
    /// Fields read and written.
    fn fields(&self) -> BTreeSet<FieldRef>;

    fn merge_rule(&self) -> MergeRule;

    /// Apply the edit to the (partial) document assembled from those fields.
    fn apply(&self, doc: &mut RegistryDocument) -> Result<(), TransformError>;
}

/// An [`Operation`] bound to a storage layout.
pub struct Planned<'a, O: ?Sized> {
    layout: StorageLayout,
    op: &'a O,
}

impl<'a, O: Operation + ?Sized> Planned<'a, O> {
    pub fn new(layout: StorageLayout, op: &'a O) -> Self {
        Self { layout, op }
    }

    /// Paths to read and commit.
    pub fn targets(&self) -> BTreeSet<StorePath> {
        self.layout.resolve_paths(&self.op.fields())
    }
}

impl<O: Operation + ?Sized> Transform for Planned<'_, O> {
    fn apply(&self, snapshot: &Snapshot) -> Result<Changes, TransformError> {
        let before = self.layout.assemble(snapshot.documents())?;
        let mut after = before.clone();
        self.op.apply(&mut after)?;
        Ok(self
            .layout
            .diff(&snapshot.present(), &before, &after, snapshot.scope())?)
    }

    fn merge_rule(&self) -> MergeRule {
        self.op.merge_rule()
    }
}

// ---------------------------------------------------------------------------
// AddEntity
// ---------------------------------------------------------------------------

/// Insert an entity, or replace a stored one with the same id if this one is more recent.
#[derive(Debug, Clone)]
pub struct AddEntity {
    pub entity: Entity,
}

impl Operation for AddEntity {
    fn fields(&self) -> BTreeSet<FieldRef> {
        [FieldRef::Entity(self.entity.id.clone()), FieldRef::Archive]
            .into_iter()
            .collect()
    }

    fn merge_rule(&self) -> MergeRule {
        MergeRule::Resolve
    }

    fn apply(&self, doc: &mut RegistryDocument) -> Result<(), TransformError> {
        let id = &self.entity.id;
        id.validate()?;
        if doc.is_archived(id) {
            return Err(TransformError::EntityArchived { id: id.clone() });
        }
        match doc.entity_mut(id) {
            Some(existing) if *existing == self.entity => {}
            Some(existing) => {
                if self.entity.recency() > existing.recency() {
                    *existing = self.entity.clone();
                }
            }
            None => doc.entities.push(self.entity.clone()),
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// RemoveEntities
// ---------------------------------------------------------------------------

/// Move entities to the archive. Ids not present are skipped.
#[derive(Debug, Clone)]
pub struct RemoveEntities {
    pub ids: Vec<EntityId>,
    pub reason: String,
    pub at: DateTime<Utc>,
}

impl Operation for RemoveEntities {
    fn fields(&self) -> BTreeSet<FieldRef> {
        self.ids
            .iter()
            .cloned()
            .map(FieldRef::Entity)
            .chain([FieldRef::Archive])
            .collect()
    }

    fn merge_rule(&self) -> MergeRule {
        MergeRule::Reapply
    }

    fn apply(&self, doc: &mut RegistryDocument) -> Result<(), TransformError> {
        for id in &self.ids {
            let Some(pos) = doc.entities.iter().position(|e| &e.id == id) else {
                continue;
            };
            let entity = doc.entities.remove(pos);
            doc.archive.push(ArchivedEntity {
                entity,
                reason: self.reason.clone(),
                removed_at: self.at,
            });
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// UpdateMetric
// ---------------------------------------------------------------------------

/// Merge a patch into an entity's `metrics` map.
#[derive(Debug, Clone)]
pub struct UpdateMetric {
    pub id: EntityId,
    pub patch: Fields,
    /// Submission time; becomes the entity's `updated_at`.
    pub at: DateTime<Utc>,
}

impl Operation for UpdateMetric {
    fn fields(&self) -> BTreeSet<FieldRef> {
        [FieldRef::Entity(self.id.clone()), FieldRef::Archive]
            .into_iter()
            .collect()
    }

    fn merge_rule(&self) -> MergeRule {
        MergeRule::Resolve
    }

    fn apply(&self, doc: &mut RegistryDocument) -> Result<(), TransformError> {
        let entity = doc
            .entity_mut(&self.id)
            .ok_or_else(|| TransformError::EntityNotFound {
                id: self.id.clone(),
            })?;
        // A patch older than the stored record is stale.
        if entity.last_modified() > self.at {
            return Ok(());
        }

        let mut metrics = entity.metrics().cloned().unwrap_or_default();
        let mut changed = false;
        for (key, value) in &self.patch {
            if metrics.get(key) != Some(value) {
                metrics.insert(key.clone(), value.clone());
                changed = true;
            }
        }
        if changed {
            entity
                .fields
                .insert(METRICS_FIELD.to_owned(), Value::Object(metrics));
            entity.updated_at = Some(self.at);
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// UpdateScalarMetadata
// ---------------------------------------------------------------------------

/// Replace one metadata scalar. Under `Distributed` this touches a single file.
#[derive(Debug, Clone)]
pub struct UpdateScalarMetadata {
    pub field: FieldName,
    pub value: Value,
}

impl Operation for UpdateScalarMetadata {
    fn fields(&self) -> BTreeSet<FieldRef> {
        [FieldRef::Metadata(self.field.clone())].into_iter().collect()
    }

    fn merge_rule(&self) -> MergeRule {
        MergeRule::Resolve
    }

    fn apply(&self, doc: &mut RegistryDocument) -> Result<(), TransformError> {
        self.field.validate()?;
        if self.value.is_array() || self.value.is_object() {
            return Err(TransformError::Invalid(format!(
                "metadata field {} must be a scalar",
                self.field
            )));
        }
        doc.metadata.insert(self.field.0.clone(), self.value.clone());
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Custom
// ---------------------------------------------------------------------------

/// Arbitrary edit over the whole document; re-run on conflict.
pub struct CustomEdit<F>(pub F);

impl<F> Operation for CustomEdit<F>
where
    F: Fn(&mut RegistryDocument) -> Result<(), TransformError>,
{
    fn fields(&self) -> BTreeSet<FieldRef> {
        FieldRef::all()
    }

    fn merge_rule(&self) -> MergeRule {
        MergeRule::Reapply
    }

    fn apply(&self, doc: &mut RegistryDocument) -> Result<(), TransformError> {
        (self.0)(doc)
    }
}

// ---------------------------------------------------------------------------
// Layout conversion
// ---------------------------------------------------------------------------

/// Rewrite the whole registry from one layout into another.
#[derive(Debug, Clone, Copy)]
pub struct ConvertLayout {
    pub from: StorageLayout,
    pub to: StorageLayout,
}

impl ConvertLayout {
    pub fn targets(&self) -> BTreeSet<StorePath> {
        let all = FieldRef::all();
        let mut targets = self.from.resolve_paths(&all);
        targets.extend(self.to.resolve_paths(&all));
        targets
    }
}

impl Transform for ConvertLayout {
    fn apply(&self, snapshot: &Snapshot) -> Result<Changes, TransformError> {
        let doc = self.from.assemble(snapshot.documents())?;
        let parts = self.to.decompose(&doc);

        let mut changes = Changes::new();
        for path in snapshot.present() {
            if !parts.contains_key(&path) && (self.from.owns(&path) || self.to.owns(&path)) {
                changes.insert(path, None);
            }
        }
        for (path, part) in parts {
            changes.insert(path, Some(part));
        }
        Ok(changes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    fn id(s: &str) -> EntityId {
        EntityId::from(s)
    }

    #[test]
    fn add_inserts_new_entity() {
        let mut doc = RegistryDocument::default();
        AddEntity {
            entity: Entity::new("a1", at(0)),
        }
        .apply(&mut doc)
        .unwrap();
        assert_eq!(doc.entities.len(), 1);
    }

    #[test]
    fn add_twice_keeps_one() {
        let mut doc = RegistryDocument::default();
        let op = AddEntity {
            entity: Entity::new("a1", at(0)),
        };
        op.apply(&mut doc).unwrap();
        op.apply(&mut doc).unwrap();
        assert_eq!(doc.entities.len(), 1);
    }

    #[test]
    fn add_keeps_more_recent_stored_entity() {
        let mut doc = RegistryDocument::default();
        doc.entities.push(Entity::new("a1", at(10)).with_field("role", json!("new")));
        AddEntity {
            entity: Entity::new("a1", at(5)).with_field("role", json!("old")),
        }
        .apply(&mut doc)
        .unwrap();
        assert_eq!(doc.entities[0].fields["role"], json!("new"));
    }

    #[test]
    fn add_replaces_older_stored_entity() {
        let mut doc = RegistryDocument::default();
        doc.entities.push(Entity::new("a1", at(5)));
        AddEntity {
            entity: Entity::new("a1", at(10)),
        }
        .apply(&mut doc)
        .unwrap();
        assert_eq!(doc.entities[0].created_at, at(10));
    }

    #[test]
    fn add_rejects_archived_id() {
        let mut doc = RegistryDocument::default();
        doc.archive.push(ArchivedEntity {
            entity: Entity::new("a1", at(0)),
            reason: "done".into(),
            removed_at: at(1),
        });
        let err = AddEntity {
            entity: Entity::new("a1", at(2)),
        }
        .apply(&mut doc)
        .unwrap_err();
        assert!(matches!(err, TransformError::EntityArchived { .. }));
    }

    #[test]
    fn add_rejects_invalid_id() {
        let mut doc = RegistryDocument::default();
        let err = AddEntity {
            entity: Entity::new("a/b", at(0)),
        }
        .apply(&mut doc)
        .unwrap_err();
        assert!(matches!(err, TransformError::Registry(_)));
    }

    #[test]
    fn remove_archives_and_skips_missing() {
        let mut doc = RegistryDocument::default();
        doc.entities.push(Entity::new("a1", at(0)));
        RemoveEntities {
            ids: vec![id("a1"), id("ghost")],
            reason: "retired".into(),
            at: at(9),
        }
        .apply(&mut doc)
        .unwrap();
        assert!(doc.entities.is_empty());
        assert_eq!(doc.archive.len(), 1);
        assert_eq!(doc.archive[0].reason, "retired");
        assert_eq!(doc.archive[0].removed_at, at(9));
    }

    #[test]
    fn remove_twice_does_not_duplicate_tombstone() {
        let mut doc = RegistryDocument::default();
        doc.entities.push(Entity::new("a1", at(0)));
        let op = RemoveEntities {
            ids: vec![id("a1")],
            reason: "retired".into(),
            at: at(9),
        };
        op.apply(&mut doc).unwrap();
        op.apply(&mut doc).unwrap();
        assert_eq!(doc.archive.len(), 1);
    }

    #[test]
    fn update_metric_merges_patch() {
        let mut doc = RegistryDocument::default();
        doc.entities
            .push(Entity::new("a1", at(0)).with_field("metrics", json!({"runs": 1, "ok": 1})));
        let mut patch = Fields::new();
        patch.insert("runs".into(), json!(2));
        UpdateMetric {
            id: id("a1"),
            patch,
            at: at(5),
        }
        .apply(&mut doc)
        .unwrap();
        let entity = &doc.entities[0];
        assert_eq!(entity.fields["metrics"], json!({"runs": 2, "ok": 1}));
        assert_eq!(entity.updated_at, Some(at(5)));
    }

    #[test]
    fn update_metric_missing_entity_fails() {
        let mut doc = RegistryDocument::default();
        let err = UpdateMetric {
            id: id("a1"),
            patch: Fields::new(),
            at: at(5),
        }
        .apply(&mut doc)
        .unwrap_err();
        assert!(matches!(err, TransformError::EntityNotFound { .. }));
    }

    #[test]
    fn stale_metric_patch_is_ignored() {
        let mut entity = Entity::new("a1", at(0));
        entity.updated_at = Some(at(10));
        let mut doc = RegistryDocument::default();
        doc.entities.push(entity.clone());
        let mut patch = Fields::new();
        patch.insert("runs".into(), json!(7));
        UpdateMetric {
            id: id("a1"),
            patch,
            at: at(4),
        }
        .apply(&mut doc)
        .unwrap();
        assert_eq!(doc.entities[0], entity);
    }

    #[test]
    fn scalar_metadata_rejects_objects() {
        let mut doc = RegistryDocument::default();
        let err = UpdateScalarMetadata {
            field: FieldName::from("last_spawn_time"),
            value: json!({"nested": true}),
        }
        .apply(&mut doc)
        .unwrap_err();
        assert!(matches!(err, TransformError::Invalid(_)));
    }

    #[test]
    fn scalar_metadata_touches_one_distributed_path() {
        let op = UpdateScalarMetadata {
            field: FieldName::from("last_spawn_time"),
            value: json!("2024-01-01T00:00:00Z"),
        };
        let planned = Planned::new(StorageLayout::Distributed, &op);
        assert_eq!(
            planned.targets(),
            [StorePath::new("metadata/last_spawn_time.scalar")]
                .into_iter()
                .collect()
        );
    }

    #[test]
    fn monolithic_ops_target_the_registry_file() {
        let op = AddEntity {
            entity: Entity::new("a1", at(0)),
        };
        let planned = Planned::new(StorageLayout::Monolithic, &op);
        assert_eq!(
            planned.targets(),
            [StorePath::registry()].into_iter().collect()
        );
    }
}
