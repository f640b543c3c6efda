//! Merge resolver: reconcile a writer's intended document with a remote one
//! that moved on since the writer's read.
//!
//! All functions are pure. Each takes the `base` the writer read, the
//! `remote` now current in the store, and the writer's `intended` content.
//!
//! # Strategies
//!
//! - **Collections by id** (`entities`): union by id; when both sides hold
//!   the id, the later `(updated_at, created_at)` wins, ties go to remote.
//!   A record deleted on either side since `base` stays deleted.
//! - **Scalars and maps** (`metadata`, `config`): per key, the writer wins
//!   where it changed the key relative to `base`; otherwise remote stands.
//! - **Append-only** (`archive`): remote entries in their order, then the
//!   writer's entries not already present, de-duplicated by
//!   [`ArchivedEntity::dedup_key`].
//!
//! Any id tombstoned in the merged archive is dropped from `entities`.

use std::collections::{BTreeMap, BTreeSet, HashSet};

use crate::document::{ConfigDocument, Document};
use crate::error::RegistryError;
use crate::path::DocKind;
use crate::types::{ArchivedEntity, Entity, EntityId, Fields, RegistryDocument, Value};

/// Merge the three versions of the document stored at one path.
///
/// `None` stands for "path absent". Returns `None` when the merged result is
/// that the path should not exist.
pub fn merge_documents(
    path: &str,
    base: Option<&Document>,
    remote: Option<&Document>,
    intended: Option<&Document>,
) -> Result<Option<Document>, RegistryError> {
    let kind = intended
        .or(remote)
        .or(base)
        .map(Document::kind)
        .ok_or_else(|| RegistryError::UnknownPath {
            path: path.to_owned(),
        })?;
    for doc in [base, remote, intended].into_iter().flatten() {
        if doc.kind() != kind {
            return Err(RegistryError::KindMismatch {
                path: path.to_owned(),
                expected: kind.name(),
                found: doc.kind().name(),
            });
        }
    }

    let merged = match (kind, intended) {
        (DocKind::Entity, _) => {
            merge_entity(as_entity(base), as_entity(remote), as_entity(intended)).map(Document::Entity)
        }
        (DocKind::Scalar, _) => {
            merge_scalar(as_scalar(base), as_scalar(remote), as_scalar(intended)).map(Document::Scalar)
        }
        // Registry, config and archive documents are never deleted.
        (_, None) => remote.cloned(),
        (_, Some(Document::Registry(mine))) => Some(Document::Registry(merge_registry(
            as_registry(base),
            as_registry(remote),
            mine,
        ))),
        (_, Some(Document::Config(mine))) => Some(Document::Config(merge_config(
            as_config(base),
            as_config(remote),
            mine,
        ))),
        (_, Some(Document::Archive(mine))) => Some(Document::Archive(merge_archive(
            as_archive(remote).unwrap_or_default(),
            mine,
        ))),
        (_, Some(other)) => Some(other.clone()),
    };
    Ok(merged)
}

/// Most-recent-wins between two variants of the same record; ties go to `remote`.
pub fn most_recent<'a>(remote: &'a Entity, intended: &'a Entity) -> &'a Entity {
    if intended.recency() > remote.recency() {
        intended
    } else {
        remote
    }
}

/// Per-record merge of one entity id.
pub fn merge_entity(
    base: Option<&Entity>,
    remote: Option<&Entity>,
    intended: Option<&Entity>,
) -> Option<Entity> {
    match (remote, intended) {
        (Some(r), Some(i)) => Some(most_recent(r, i).clone()),
        // Removal is terminal: whichever side deleted a record the base held wins.
        (Some(_), None) | (None, Some(_)) if base.is_some() => None,
        (Some(r), None) => Some(r.clone()),
        (None, Some(i)) => Some(i.clone()),
        (None, None) => None,
    }
}

/// Union-by-id merge of entity collections, excluding `tombstones`.
///
/// Order: remote's records in remote order, then the writer's additions in
/// the writer's order.
pub fn merge_entities(
    base: &[Entity],
    remote: &[Entity],
    intended: &[Entity],
    tombstones: &BTreeSet<EntityId>,
) -> Vec<Entity> {
    let index = |list: &[Entity]| -> BTreeMap<EntityId, Entity> {
        list.iter().map(|e| (e.id.clone(), e.clone())).collect()
    };
    let (base, remote_map, intended_map) = (index(base), index(remote), index(intended));

    let order = remote
        .iter()
        .map(|e| &e.id)
        .chain(intended.iter().map(|e| &e.id).filter(|id| !remote_map.contains_key(*id)));

    order
        .filter(|id| !tombstones.contains(*id))
        .filter_map(|id| merge_entity(base.get(id), remote_map.get(id), intended_map.get(id)))
        .collect()
}

/// Writer-wins-if-changed merge of a single value.
pub fn merge_scalar(
    base: Option<&Value>,
    remote: Option<&Value>,
    intended: Option<&Value>,
) -> Option<Value> {
    if intended != base {
        intended.cloned()
    } else {
        remote.cloned()
    }
}

/// Per-key [`merge_scalar`] over a string-keyed map.
pub fn merge_fields(base: &Fields, remote: &Fields, intended: &Fields) -> Fields {
    merge_keyed(base, remote, intended)
}

/// Per-key [`merge_scalar`] over any string-keyed map of values.
fn merge_keyed<'a, I, M>(base: I, remote: I, intended: I) -> M
where
    I: IntoIterator<Item = (&'a String, &'a Value)>,
    M: FromIterator<(String, Value)>,
{
    let base: BTreeMap<&String, &Value> = base.into_iter().collect();
    let remote: BTreeMap<&String, &Value> = remote.into_iter().collect();
    let intended: BTreeMap<&String, &Value> = intended.into_iter().collect();
    let keys: BTreeSet<&String> = base
        .keys()
        .chain(remote.keys())
        .chain(intended.keys())
        .copied()
        .collect();
    keys.into_iter()
        .filter_map(|key| {
            merge_scalar(
                base.get(key).copied(),
                remote.get(key).copied(),
                intended.get(key).copied(),
            )
            .map(|v| (key.clone(), v))
        })
        .collect()
}

/// Append-only union; never drops or reorders remote entries.
pub fn merge_archive(remote: &[ArchivedEntity], intended: &[ArchivedEntity]) -> Vec<ArchivedEntity> {
    let mut seen: HashSet<String> = HashSet::new();
    let mut merged = Vec::with_capacity(remote.len() + intended.len());
    for entry in remote.iter().chain(intended) {
        if seen.insert(entry.dedup_key()) {
            merged.push(entry.clone());
        }
    }
    merged
}

/// Field-by-field merge of the whole registry (Monolithic layout).
pub fn merge_registry(
    base: Option<&RegistryDocument>,
    remote: Option<&RegistryDocument>,
    intended: &RegistryDocument,
) -> RegistryDocument {
    let empty = RegistryDocument::default();
    let base = base.unwrap_or(&empty);
    let remote = remote.unwrap_or(&empty);

    let archive = merge_archive(&remote.archive, &intended.archive);
    let tombstones: BTreeSet<EntityId> = archive.iter().map(|a| a.id().clone()).collect();
    RegistryDocument {
        version: intended.version.clone(),
        entities: merge_entities(&base.entities, &remote.entities, &intended.entities, &tombstones),
        archive,
        config: merge_fields(&base.config, &remote.config, &intended.config),
        metadata: merge_keyed(&base.metadata, &remote.metadata, &intended.metadata),
    }
}

fn merge_config(
    base: Option<&ConfigDocument>,
    remote: Option<&ConfigDocument>,
    intended: &ConfigDocument,
) -> ConfigDocument {
    let empty = ConfigDocument::default();
    let base = base.unwrap_or(&empty);
    let remote = remote.unwrap_or(&empty);
    ConfigDocument {
        version: intended.version.clone(),
        values: merge_fields(&base.values, &remote.values, &intended.values),
    }
}

fn as_entity(doc: Option<&Document>) -> Option<&Entity> {
    match doc {
        Some(Document::Entity(e)) => Some(e),
        _ => None,
    }
}

fn as_scalar(doc: Option<&Document>) -> Option<&Value> {
    match doc {
        Some(Document::Scalar(v)) => Some(v),
        _ => None,
    }
}

fn as_registry(doc: Option<&Document>) -> Option<&RegistryDocument> {
    match doc {
        Some(Document::Registry(r)) => Some(r),
        _ => None,
    }
}

fn as_config(doc: Option<&Document>) -> Option<&ConfigDocument> {
    match doc {
        Some(Document::Config(c)) => Some(c),
        _ => None,
    }
}

fn as_archive(doc: Option<&Document>) -> Option<&[ArchivedEntity]> {
    match doc {
        Some(Document::Archive(a)) => Some(a),
        _ => None,
    }
}
