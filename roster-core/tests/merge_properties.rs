//! Merge resolver properties over whole documents: convergence of racing
//! writers, append-only archive and tombstone precedence.

use chrono::{DateTime, TimeZone, Utc};
use roster_core::merge::{merge_archive, merge_documents, merge_entity};
use roster_core::{
    ArchivedEntity, Document, Entity, RegistryDocument, StorageLayout, StorePath,
};
use rstest::rstest;
use serde_json::json;

fn at(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(secs, 0).unwrap()
}

fn registry(entities: Vec<Entity>) -> RegistryDocument {
    RegistryDocument {
        entities,
        ..RegistryDocument::default()
    }
}

fn tombstone(id: &str, reason: &str, removed: i64) -> ArchivedEntity {
    ArchivedEntity {
        entity: Entity::new(id, at(0)),
        reason: reason.into(),
        removed_at: at(removed),
    }
}

// ---------------------------------------------------------------------------
// 1. Most-recent-wins
// ---------------------------------------------------------------------------

#[rstest]
#[case(0, 1, 1)]
#[case(1, 0, 1)]
#[case(3, 3, 3)]
fn later_created_entity_wins_either_way(
    #[case] remote: i64,
    #[case] intended: i64,
    #[case] expected: i64,
) {
    let merged = merge_entity(
        None,
        Some(&Entity::new("a1", at(remote))),
        Some(&Entity::new("a1", at(intended))),
    )
    .expect("entity kept");
    assert_eq!(merged.created_at, at(expected));
}

#[test]
fn full_tie_keeps_the_committed_variant() {
    let remote = Entity::new("a1", at(3)).with_field("by", json!("remote"));
    let intended = Entity::new("a1", at(3)).with_field("by", json!("writer"));
    let merged = merge_entity(None, Some(&remote), Some(&intended)).expect("entity kept");
    assert_eq!(merged.fields["by"], json!("remote"));
}

#[test]
fn update_beats_older_creation() {
    let mut updated = Entity::new("a1", at(0));
    updated.updated_at = Some(at(10));
    let recreated = Entity::new("a1", at(5));
    let merged = merge_entity(None, Some(&recreated), Some(&updated)).expect("entity kept");
    assert_eq!(merged.updated_at, Some(at(10)));
}

// ---------------------------------------------------------------------------
// 2. Registry convergence
// ---------------------------------------------------------------------------

#[test]
fn racing_registry_writers_converge_on_union() {
    let base = registry(vec![Entity::new("a0", at(0))]);
    let remote = registry(vec![Entity::new("a0", at(0)), Entity::new("a1", at(1))]);
    let intended = registry(vec![Entity::new("a0", at(0)), Entity::new("a2", at(2))]);

    let merged = merge_documents(
        "registry.doc",
        Some(&Document::Registry(base)),
        Some(&Document::Registry(remote)),
        Some(&Document::Registry(intended)),
    )
    .expect("merge")
    .expect("document kept");

    let Document::Registry(doc) = merged else {
        panic!("expected a registry document");
    };
    let ids: Vec<_> = doc.entities.iter().map(|e| e.id.0.as_str()).collect();
    assert_eq!(ids, vec!["a0", "a1", "a2"]);
}

#[test]
fn tombstone_from_either_side_hides_entity() {
    let base = registry(vec![Entity::new("a1", at(0))]);
    let mut remote = registry(Vec::new());
    remote.archive.push(tombstone("a1", "retired", 5));
    let mut intended = base.clone();
    intended.entities[0].updated_at = Some(at(9));

    let merged = merge_documents(
        "registry.doc",
        Some(&Document::Registry(base)),
        Some(&Document::Registry(remote)),
        Some(&Document::Registry(intended)),
    )
    .expect("merge")
    .expect("document kept");

    let Document::Registry(doc) = merged else {
        panic!("expected a registry document");
    };
    assert!(doc.entities.is_empty());
    assert_eq!(doc.archive.len(), 1);
}

#[test]
fn concurrent_scalar_keys_are_merged_per_key() {
    let mut base = RegistryDocument::default();
    base.metadata.insert("last_spawn_time".into(), json!("t0"));
    base.metadata.insert("last_evaluation_time".into(), json!("e0"));
    let mut remote = base.clone();
    remote.metadata.insert("last_evaluation_time".into(), json!("e1"));
    let mut intended = base.clone();
    intended.metadata.insert("last_spawn_time".into(), json!("t1"));

    let Some(Document::Registry(doc)) = merge_documents(
        "registry.doc",
        Some(&Document::Registry(base)),
        Some(&Document::Registry(remote)),
        Some(&Document::Registry(intended)),
    )
    .expect("merge") else {
        panic!("expected registry");
    };
    assert_eq!(doc.metadata["last_spawn_time"], json!("t1"));
    assert_eq!(doc.metadata["last_evaluation_time"], json!("e1"));
}

// ---------------------------------------------------------------------------
// 3. Archive
// ---------------------------------------------------------------------------

#[test]
fn archive_merge_never_shrinks_remote() {
    let remote = vec![tombstone("a1", "retired", 1), tombstone("a2", "retired", 2)];
    let intended = vec![tombstone("a3", "crashed", 3)];
    let merged = merge_archive(&remote, &intended);
    assert_eq!(merged.len(), 3);
    assert_eq!(&merged[..2], &remote[..]);
}

#[test]
fn archive_merge_drops_identical_tombstones() {
    let remote = vec![tombstone("a1", "retired", 1)];
    let intended = vec![tombstone("a1", "retired", 1)];
    assert_eq!(merge_archive(&remote, &intended).len(), 1);
}

#[test]
fn archive_merge_keeps_distinct_removals_of_same_id() {
    let remote = vec![tombstone("a1", "retired", 1)];
    let intended = vec![tombstone("a1", "crashed", 2)];
    assert_eq!(merge_archive(&remote, &intended).len(), 2);
}

// ---------------------------------------------------------------------------
// 4. Layout round trip through the codec
// ---------------------------------------------------------------------------

#[rstest]
#[case(StorageLayout::Monolithic)]
#[case(StorageLayout::Distributed)]
fn stored_parts_reassemble_to_the_same_document(#[case] layout: StorageLayout) {
    let mut doc = registry(vec![
        Entity::new("a1", at(0)).with_field("metrics", json!({"runs": 2})),
        Entity::new("a2", at(1)),
    ]);
    doc.archive.push(tombstone("a0", "retired", 0));
    doc.config.insert("max_agents".into(), json!(4));
    doc.metadata.insert("last_spawn_time".into(), json!("2024-01-01T00:00:00Z"));

    let decoded = layout
        .decompose(&doc)
        .into_iter()
        .map(|(path, part)| {
            let bytes = part.encode().expect("encode");
            let back = Document::decode(&path, &bytes).expect("decode");
            (path, back)
        })
        .collect();
    assert_eq!(layout.assemble(&decoded).expect("assemble"), doc);
}

#[test]
fn entity_file_named_for_another_id_is_rejected() {
    let bytes = Document::Entity(Entity::new("a2", at(0)))
        .encode()
        .expect("encode");
    let err = Document::decode(&StorePath::new("entities/a1.doc"), &bytes).unwrap_err();
    assert!(err.to_string().contains("entities/a1.doc"), "got: {err}");
}
