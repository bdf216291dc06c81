//! Unit tests for the in-memory reference store

use super::*;

fn store_with_people() -> (MemoryStore, MemoryNode, MemoryNode, MemoryNode) {
    let store = MemoryStore::new();
    let ada = store.create_node().unwrap();
    let alan = store.create_node().unwrap();
    let grace = store.create_node().unwrap();
    ada.set_property("name", "Ada".into()).unwrap();
    alan.set_property("name", "Alan".into()).unwrap();
    grace.set_property("name", "Grace".into()).unwrap();
    (store, ada, alan, grace)
}

#[test]
fn test_property_crud_on_node() {
    let store = MemoryStore::new();
    let node = store.create_node().unwrap();

    assert!(!node.has_property("key").unwrap());
    assert!(node.property_keys().unwrap().is_empty());

    node.set_property("key", "value".into()).unwrap();
    assert!(node.has_property("key").unwrap());
    assert_eq!(node.property("key").unwrap(), Some("value".into()));
    assert_eq!(node.property_keys().unwrap(), vec!["key".to_string()]);
    assert_eq!(node.property_values().unwrap(), vec![PropertyValue::from("value")]);

    assert_eq!(node.remove_property("key").unwrap(), Some("value".into()));
    assert_eq!(node.remove_property("key").unwrap(), None);
    assert!(!node.has_property("key").unwrap());
}

#[test]
fn test_handles_compare_by_database_and_id() {
    let store = MemoryStore::new();
    let node = store.create_node().unwrap();
    let again = store.node_by_id(node.id()).unwrap();
    assert_eq!(node, again);

    let other = MemoryStore::new();
    let foreign = other.create_node().unwrap();
    assert_eq!(foreign.id(), node.id());
    assert_ne!(foreign, node, "same id in another database is another entity");
}

#[test]
fn test_missing_entity_is_not_found() {
    let store = MemoryStore::new();
    let err = store.node_by_id(42).unwrap_err();
    assert_eq!(
        err,
        StoreError::NotFound {
            kind: EntityKind::Node,
            id: 42
        }
    );
}

#[test]
fn test_failover_retires_old_handles() {
    let store = MemoryStore::new();
    let node = store.create_node().unwrap();
    node.set_property("name", "before".into()).unwrap();

    let next = store.failover();
    assert!(!store.is_live());
    assert!(next.is_live());
    assert_ne!(store.instance_id(), next.instance_id());

    let err = node.property("name").unwrap_err();
    assert!(matches!(err, StoreError::Retired { .. }), "got {err:?}");

    let fresh = next.node_by_id(node.id()).unwrap();
    assert_eq!(fresh, node, "same entity across instances");
    assert_eq!(fresh.property("name").unwrap(), Some("before".into()));
}

#[test]
fn test_replica_is_independent_copy() -> anyhow::Result<()> {
    let (store, ada, _, _) = store_with_people();
    let replica = store.replicate()?;
    assert_eq!(replica.database_id(), store.database_id());

    let ada_replica = replica.node_by_id(ada.id())?;
    ada_replica.set_property("name", "Ada Lovelace".into())?;

    assert_eq!(ada.property("name")?, Some("Ada".into()));
    assert_eq!(ada_replica.property("name")?, Some("Ada Lovelace".into()));
    Ok(())
}

#[test]
fn test_relationships_and_endpoints() {
    let (store, ada, alan, _) = store_with_people();
    let knows = store.create_relationship(&ada, &alan, "KNOWS").unwrap();

    assert_eq!(store.start_node(&knows).unwrap(), ada);
    assert_eq!(store.end_node(&knows).unwrap(), alan);
    assert_eq!(store.relationship_type(&knows).unwrap(), "KNOWS");
    assert_eq!(
        store.relationships(&ada, Direction::Outgoing).unwrap(),
        vec![knows.clone()]
    );
    assert!(store
        .relationships(&ada, Direction::Incoming)
        .unwrap()
        .is_empty());
    assert_eq!(
        store.relationships(&alan, Direction::Both).unwrap(),
        vec![knows]
    );
}

#[test]
fn test_node_with_relationships_cannot_be_deleted() {
    let (store, ada, alan, _) = store_with_people();
    let knows = store.create_relationship(&ada, &alan, "KNOWS").unwrap();

    assert!(matches!(ada.delete(), Err(StoreError::Constraint(_))));
    knows.delete().unwrap();
    ada.delete().unwrap();
    assert!(matches!(
        ada.property("name"),
        Err(StoreError::NotFound { .. })
    ));
}

#[test]
fn test_index_get_and_query_in_id_order() {
    let (store, ada, alan, grace) = store_with_people();
    let index = store.node_index("people").unwrap();
    for node in [&grace, &ada, &alan] {
        let name = node.property("name").unwrap().unwrap();
        index.add(node, "name", &name).unwrap();
    }

    let mut hits = index.get("name", &"Ada".into()).unwrap();
    assert_eq!(hits.size(), 1);
    assert_eq!(hits.next(), Some(ada.clone()));
    assert_eq!(hits.current_score(), 1.0);
    hits.close();

    let hits: Vec<_> = index.query("name:*").unwrap().collect();
    assert_eq!(hits, vec![ada.clone(), alan.clone(), grace]);

    let mut hits = index.query_key("name", "A*").unwrap();
    assert_eq!(hits.size(), 2);
    assert_eq!(hits.next(), Some(ada));
    assert!((hits.current_score() - 1.0 / 3.0).abs() < f32::EPSILON);
    hits.close();
}

#[test]
fn test_index_remove_variants() {
    let (store, ada, _, _) = store_with_people();
    let index = store.node_index("people").unwrap();
    index.add(&ada, "name", &"Ada".into()).unwrap();
    index.add(&ada, "born", &1815.into()).unwrap();

    index.remove(&ada, "name", &"Ada".into()).unwrap();
    assert_eq!(index.get("name", &"Ada".into()).unwrap().size(), 0);
    assert_eq!(index.get("born", &1815.into()).unwrap().size(), 1);

    index.remove_key(&ada, "born").unwrap();
    assert_eq!(index.get("born", &1815.into()).unwrap().size(), 0);

    index.add(&ada, "name", &"Ada".into()).unwrap();
    index.remove_entity(&ada).unwrap();
    assert_eq!(index.query("*:*").unwrap().size(), 0);
}

#[test]
fn test_deleting_entity_drops_it_from_indexes() {
    let (store, ada, _, _) = store_with_people();
    let index = store.node_index("people").unwrap();
    index.add(&ada, "name", &"Ada".into()).unwrap();

    ada.delete().unwrap();
    assert_eq!(index.get("name", &"Ada".into()).unwrap().size(), 0);
}

#[test]
fn test_deleted_index_is_gone() {
    let store = MemoryStore::new();
    let index = store.node_index("people").unwrap();
    assert!(store.index_exists(EntityKind::Node, "people").unwrap());
    assert!(!store
        .index_exists(EntityKind::Relationship, "people")
        .unwrap());

    index.delete().unwrap();
    assert!(!store.index_exists(EntityKind::Node, "people").unwrap());
    assert!(matches!(
        index.query("*:*"),
        Err(StoreError::IndexNotFound { .. })
    ));
}

#[test]
fn test_auto_index_is_read_only_view() {
    let store = MemoryStore::with_auto_index_keys(["name"]);
    let ada = store.create_node().unwrap();
    ada.set_property("name", "Ada".into()).unwrap();
    ada.set_property("secret", "hidden".into()).unwrap();

    let auto = store.node_auto_index().unwrap();
    assert_eq!(auto.access(), IndexAccess::ReadOnly);
    assert_eq!(auto.get("name", &"Ada".into()).unwrap().size(), 1);
    assert_eq!(auto.get("secret", &"hidden".into()).unwrap().size(), 0);

    assert!(matches!(
        auto.add(&ada, "name", &"Ada".into()),
        Err(StoreError::ReadOnly { .. })
    ));
    assert!(matches!(auto.delete(), Err(StoreError::ReadOnly { .. })));
}

#[test]
fn test_relationship_index_endpoint_constraints() {
    let (store, ada, alan, grace) = store_with_people();
    let ada_alan = store.create_relationship(&ada, &alan, "KNOWS").unwrap();
    let ada_grace = store.create_relationship(&ada, &grace, "KNOWS").unwrap();
    let index = store.relationship_index("knows").unwrap();
    index.add(&ada_alan, "since", &1936.into()).unwrap();
    index.add(&ada_grace, "since", &1936.into()).unwrap();

    let all: Vec<_> = index
        .get_between("since", Some(&1936.into()), Some(&ada), None)
        .unwrap()
        .collect();
    assert_eq!(all, vec![ada_alan.clone(), ada_grace]);

    let to_alan: Vec<_> = index
        .query_between(None, None, Some(&alan))
        .unwrap()
        .collect();
    assert_eq!(to_alan, vec![ada_alan]);
}

#[test]
fn test_single_reports_absence_and_ambiguity() {
    let (store, ada, alan, _) = store_with_people();
    let index = store.node_index("people").unwrap();
    index.add(&ada, "kind", &"person".into()).unwrap();
    index.add(&alan, "kind", &"person".into()).unwrap();

    assert_eq!(index.get("kind", &"robot".into()).unwrap().single(), Ok(None));
    assert_eq!(
        index.get("kind", &"person".into()).unwrap().single(),
        Err(StoreError::MultipleResults { count: 2 })
    );
    assert_eq!(store.open_cursors(), 0, "single closes the cursor");
}

#[test]
fn test_close_releases_cursor_once() {
    let (store, ada, _, _) = store_with_people();
    let index = store.node_index("people").unwrap();
    index.add(&ada, "name", &"Ada".into()).unwrap();

    let mut hits = index.query("name:*").unwrap();
    assert_eq!(store.open_cursors(), 1);
    hits.close();
    hits.close();
    assert_eq!(store.open_cursors(), 0);
    assert!(!hits.has_next());
}

#[test]
fn test_malformed_queries_are_rejected() {
    let store = MemoryStore::new();
    let index = store.node_index("people").unwrap();
    for query in ["", "name", ":x", "name:", "name:a*b", "name:**"] {
        assert!(
            matches!(index.query(query), Err(StoreError::InvalidQuery { .. })),
            "query {query:?} should be rejected"
        );
    }
}

#[test]
fn test_snapshot_round_trip_keeps_ids_and_indexes() {
    let (store, ada, alan, _) = store_with_people();
    store.create_relationship(&ada, &alan, "KNOWS").unwrap();
    store
        .node_index("people")
        .unwrap()
        .add(&ada, "name", &"Ada".into())
        .unwrap();

    let bytes = store.snapshot().unwrap();
    let restored = MemoryStore::from_snapshot(&bytes).unwrap();

    assert_eq!(restored.node_count().unwrap(), 3);
    assert_eq!(restored.relationship_count().unwrap(), 1);
    let hits: Vec<_> = restored
        .node_index("people")
        .unwrap()
        .get("name", &"Ada".into())
        .unwrap()
        .collect();
    assert_eq!(hits, vec![ada]);
}
