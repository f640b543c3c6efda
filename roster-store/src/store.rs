//! `RegistryStore`: the registry facade over a versioned backend.
//!
//! Binds a backend to its [`StoreSettings`] (layout, retry budgets, backoff,
//! timeouts) and exposes the high-level operations.

use std::collections::BTreeSet;
use std::path::Path;

use chrono::{SecondsFormat, Utc};

use roster_core::{
    Entity, EntityId, FieldName, FieldRef, Fields, Logical, RegistryDocument, StorageLayout,
    StorePath, Value,
};

use crate::backend::VersionedBackend;
use crate::dir::DirBackend;
use crate::error::{RelayoutError, SettingsError, TransformError, UpdateError};
use crate::ops::{
    AddEntity, ConvertLayout, CustomEdit, Operation, Planned, RemoveEntities, UpdateMetric,
    UpdateScalarMetadata,
};
use crate::settings::{self, StoreSettings};
use crate::updater::{Applied, Snapshot, Transform, Updater};

#[derive(Debug, Clone)]
pub struct RegistryStore<B> {
    updater: Updater<B>,
    settings: StoreSettings,
}

impl RegistryStore<DirBackend> {
    /// Open the directory store at `root` with its persisted settings.
    pub fn open_at(root: &Path) -> Result<Self, SettingsError> {
        let settings = settings::load_at(root)?;
        Ok(Self::new(DirBackend::new(root), settings))
    }

    /// Create (or re-initialise) the directory store at `root` with `settings`.
    pub fn init_at(root: &Path, settings: StoreSettings) -> Result<Self, SettingsError> {
        settings::save_at(root, &settings)?;
        Ok(Self::new(DirBackend::new(root), settings))
    }

    /// [`convert_layout`](Self::convert_layout), then record the new layout in `roster.yaml`.
    pub fn relayout(&mut self, target: StorageLayout) -> Result<Applied, RelayoutError> {
        let applied = self.convert_layout(target)?;
        settings::save_at(self.backend().root(), &self.settings)?;
        Ok(applied)
    }
}

impl<B: VersionedBackend> RegistryStore<B> {
    pub fn new(backend: B, settings: StoreSettings) -> Self {
        Self {
            updater: Updater::from_settings(backend, &settings),
            settings,
        }
    }

    pub fn settings(&self) -> &StoreSettings {
        &self.settings
    }

    pub fn layout(&self) -> StorageLayout {
        self.settings.layout
    }

    pub fn backend(&self) -> &B {
        self.updater.backend()
    }

    /// Run a raw transform over `targets` with this store's retry budget.
    pub fn execute<T: Transform + ?Sized>(
        &self,
        transform: &T,
        targets: &BTreeSet<StorePath>,
    ) -> Result<Applied, UpdateError> {
        self.updater.execute(
            transform,
            targets,
            self.settings.max_retries,
            &self.settings.conflict_backoff.policy(),
        )
    }

    /// Run an operation under the current layout.
    pub fn run<O: Operation + ?Sized>(&self, op: &O) -> Result<Applied, UpdateError> {
        let planned = Planned::new(self.layout(), op);
        self.execute(&planned, &planned.targets())
    }

    pub fn add_entity(&self, entity: Entity) -> Result<Applied, UpdateError> {
        tracing::debug!(id = %entity.id, "add entity");
        self.run(&AddEntity { entity })
    }

    /// Archive `ids` with `reason`; ids not present are skipped.
    pub fn remove_entities(
        &self,
        ids: impl IntoIterator<Item = EntityId>,
        reason: &str,
    ) -> Result<Applied, UpdateError> {
        self.run(&RemoveEntities {
            ids: ids.into_iter().collect(),
            reason: reason.to_owned(),
            at: Utc::now(),
        })
    }

    pub fn update_metric(&self, id: &EntityId, patch: Fields) -> Result<Applied, UpdateError> {
        self.run(&UpdateMetric {
            id: id.clone(),
            patch,
            at: Utc::now(),
        })
    }

    pub fn update_scalar_metadata(
        &self,
        field: &FieldName,
        value: Value,
    ) -> Result<Applied, UpdateError> {
        self.run(&UpdateScalarMetadata {
            field: field.clone(),
            value,
        })
    }

    /// Set `field` to the current UTC time (RFC 3339).
    pub fn touch_metadata(&self, field: &FieldName) -> Result<Applied, UpdateError> {
        let now = Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true);
        self.update_scalar_metadata(field, Value::String(now))
    }

    /// Edit the whole logical document; re-run from a fresh read on conflict.
    pub fn apply_custom_transform<F>(&self, edit: F) -> Result<Applied, UpdateError>
    where
        F: Fn(&mut RegistryDocument) -> Result<(), TransformError>,
    {
        self.run(&CustomEdit(edit))
    }

    /// The whole logical document.
    pub fn load(&self) -> Result<RegistryDocument, UpdateError> {
        let snapshot = self.snapshot(&FieldRef::all())?;
        Ok(self.layout().assemble(snapshot.documents())?)
    }

    /// Read the paths holding `fields`.
    pub fn snapshot(&self, fields: &BTreeSet<FieldRef>) -> Result<Snapshot, UpdateError> {
        self.updater.read(&self.layout().resolve_paths(fields))
    }

    /// Current value of one logical field.
    pub fn read_field(&self, field: &FieldRef) -> Result<Logical, UpdateError> {
        let fields = [field.clone()].into_iter().collect();
        let snapshot = self.snapshot(&fields)?;
        Ok(self.layout().read_logical(snapshot.documents(), field)?)
    }

    /// Rewrite the registry under `target` and switch this store to it.
    ///
    /// Only the in-memory settings change; see [`RegistryStore::relayout`]
    /// for directory stores.
    pub fn convert_layout(&mut self, target: StorageLayout) -> Result<Applied, UpdateError> {
        if target == self.layout() {
            return Ok(Applied::default());
        }
        let convert = ConvertLayout {
            from: self.layout(),
            to: target,
        };
        let applied = self.execute(&convert, &convert.targets())?;
        tracing::info!(from = %convert.from, to = %convert.to, "converted layout");
        self.settings.layout = target;
        Ok(applied)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backoff::BackoffPolicy;
    use crate::memory::MemoryBackend;
    use serde_json::json;

    fn store(layout: StorageLayout) -> RegistryStore<MemoryBackend> {
        let settings = StoreSettings {
            layout,
            ..StoreSettings::default()
        };
        RegistryStore::new(MemoryBackend::new(), settings)
    }

    #[test]
    fn touch_metadata_writes_rfc3339_string() {
        let store = store(StorageLayout::Distributed);
        let field = FieldName::from("last_spawn_time");
        store.touch_metadata(&field).unwrap();
        let Logical::Scalar(Some(Value::String(stamp))) =
            store.read_field(&FieldRef::Metadata(field)).unwrap()
        else {
            panic!("expected a string scalar");
        };
        assert!(chrono::DateTime::parse_from_rfc3339(&stamp).is_ok());
    }

    #[test]
    fn convert_to_same_layout_is_noop() {
        let mut store = store(StorageLayout::Monolithic);
        let applied = store.convert_layout(StorageLayout::Monolithic).unwrap();
        assert!(applied.is_noop());
        assert_eq!(store.backend().commit_count(), 0);
    }

    #[test]
    fn custom_transform_edits_config() {
        let store = store(StorageLayout::Monolithic);
        store
            .apply_custom_transform(|doc| {
                doc.config.insert("max_agents".into(), json!(4));
                Ok(())
            })
            .unwrap();
        assert_eq!(store.load().unwrap().config["max_agents"], json!(4));
    }

    #[test]
    fn custom_transform_error_is_not_retried() {
        let store = store(StorageLayout::Monolithic);
        let err = store
            .apply_custom_transform(|_| Err(TransformError::Invalid("nope".into())))
            .unwrap_err();
        assert!(matches!(err, UpdateError::TransformRaised(_)));
        assert_eq!(store.backend().commit_count(), 0);
    }

    #[test]
    fn settings_backoff_is_used() {
        let settings = StoreSettings::default();
        assert_eq!(
            settings.conflict_backoff.policy(),
            BackoffPolicy::new(
                std::time::Duration::from_millis(50),
                std::time::Duration::from_millis(2_000),
                0.5
            )
        );
    }
}
