//! Integration tests for wrappers across store role changes
//!
//! These tests drive a `GraphContext` through the situations it exists for:
//! - failover to a new instance over the same data
//! - promotion of an independently replicated copy
//! - restore from an on-disk snapshot
//! - replacement while other threads keep reading
//!
//! Run with: cargo test --test integration_tests

use anyhow::Result;
use stablegraph_store::{MemoryStore, MemoryStoreConfig, StoreError};
use stablegraph_wrap::{
    ContextConfig, Direction, GraphContext, PropertyValue, Resolution, WrapError, WrappedNode,
};
use std::collections::HashMap;
use tempfile::tempdir;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing_subscriber::filter::LevelFilter::DEBUG)
        .try_init();
}

/// Small social graph: three people, two KNOWS edges, a `people` index.
fn seed(ctx: &GraphContext<MemoryStore>) -> Result<Vec<WrappedNode<MemoryStore>>> {
    let people = ctx.node_index("people")?;
    let mut nodes = Vec::new();
    for name in ["Ada", "Alan", "Grace"] {
        let node = ctx.create_node()?;
        node.set_property("name", name)?;
        people.add(&node, "name", name)?;
        nodes.push(node);
    }
    nodes[0].create_relationship_to(&nodes[1], "KNOWS")?;
    nodes[2].create_relationship_to(&nodes[1], "KNOWS")?;
    Ok(nodes)
}

// ============================================================================
// Role changes
// ============================================================================

#[test]
fn test_wrappers_survive_failover() -> Result<()> {
    init_tracing();
    let primary = MemoryStore::new();
    let ctx = GraphContext::new(primary.clone(), ContextConfig::default());
    let nodes = seed(&ctx)?;
    let people = ctx.node_index("people")?;

    ctx.replace_store(primary.failover())?;
    assert!(!primary.is_live());

    // entity wrappers resolve against the new instance
    assert_eq!(nodes[0].property("name")?, Some("Ada".into()));
    let knows = nodes[0].relationships(Direction::Outgoing)?;
    assert_eq!(knows.len(), 1);
    assert_eq!(knows[0].end_node()?, nodes[1]);

    // index wrappers hold their backing index; it went down with the old instance
    assert!(matches!(
        people.get("name", "Ada"),
        Err(WrapError::Store(StoreError::Retired { .. }))
    ));
    let people = ctx.node_index("people")?;
    let hits: Vec<_> = people.query_key("name", "A*")?.collect();
    assert_eq!(hits, nodes[..2].to_vec());
    Ok(())
}

#[test]
fn test_promoted_replica_sees_only_its_own_writes() -> Result<()> {
    init_tracing();
    let primary = MemoryStore::new();
    let ctx = GraphContext::new(primary.clone(), ContextConfig::default());
    let nodes = seed(&ctx)?;

    let replica = primary.replicate()?;
    nodes[0].set_property("name", "Augusta Ada")?;
    assert_eq!(replica.database_id(), primary.database_id());

    let before = nodes[0].clone();
    ctx.replace_store(replica)?;

    assert_eq!(nodes[0].property("name")?, Some("Ada".into()));
    assert_eq!(before, nodes[0]);
    assert_eq!(ctx.node_by_id(nodes[0].id())?, before);
    Ok(())
}

#[test]
fn test_direct_context_requires_fresh_wrappers_after_failover() -> Result<()> {
    init_tracing();
    let primary = MemoryStore::new();
    let ctx = GraphContext::with_resolution(primary.clone(), Resolution::Direct);
    let nodes = seed(&ctx)?;

    ctx.replace_store(primary.failover())?;

    let err = nodes[0].property("name").unwrap_err();
    assert!(matches!(err, WrapError::Store(StoreError::Retired { .. })));

    let fresh = ctx.node_by_id(nodes[0].id())?;
    assert_eq!(fresh, nodes[0]);
    assert_eq!(fresh.property("name")?, Some("Ada".into()));
    Ok(())
}

#[test]
fn test_restore_from_snapshot_file() -> Result<()> {
    init_tracing();
    let dir = tempdir()?;
    let path = dir.path().join("graph.bin");

    let primary = MemoryStore::new();
    let ctx = GraphContext::new(primary.clone(), ContextConfig::default());
    let nodes = seed(&ctx)?;
    std::fs::write(&path, primary.snapshot()?)?;

    let restored = MemoryStore::from_snapshot(&std::fs::read(&path)?)?;
    ctx.replace_store(restored)?;
    primary.retire();

    let names: Vec<PropertyValue> = nodes
        .iter()
        .map(|node| node.property_or("name", ""))
        .collect::<Result<_, _>>()?;
    assert_eq!(names, vec!["Ada".into(), "Alan".into(), "Grace".into()]);

    let people = ctx.node_index("people")?;
    assert_eq!(people.get("name", "Grace")?.single()?, Some(nodes[2].clone()));
    Ok(())
}

#[test]
fn test_auto_index_follows_property_changes_across_failover() -> Result<()> {
    init_tracing();
    let primary = MemoryStore::with_config(MemoryStoreConfig {
        auto_index_node_keys: vec!["name".to_string()],
        auto_index_relationship_keys: vec!["since".to_string()],
    });
    let ctx = GraphContext::new(primary.clone(), ContextConfig::default());
    let nodes = seed(&ctx)?;
    let rel = nodes[0].relationships(Direction::Outgoing)?.remove(0);
    rel.set_property("since", 1936)?;

    ctx.replace_store(primary.failover())?;
    nodes[1].set_property("name", "Turing")?;

    let auto = ctx.node_auto_index()?;
    assert!(auto.is_read_only());
    assert_eq!(auto.get("name", "Alan")?.size(), 0);
    assert_eq!(auto.get("name", "Turing")?.single()?, Some(nodes[1].clone()));

    let rel_auto = ctx.relationship_auto_index()?;
    let found: Vec<_> = rel_auto
        .get_between("since", Some(&1936.into()), Some(&nodes[0]), None)?
        .collect();
    assert_eq!(found, vec![rel]);
    Ok(())
}

// ============================================================================
// Concurrency
// ============================================================================

#[test]
fn test_readers_keep_working_during_replacement() -> Result<()> {
    init_tracing();
    let primary = MemoryStore::new();
    let ctx = GraphContext::new(primary.clone(), ContextConfig::default());
    let nodes = seed(&ctx)?;
    let expected: HashMap<_, _> = nodes
        .iter()
        .map(|node| Ok((node.id(), node.property("name")?)))
        .collect::<Result<_>>()?;

    std::thread::scope(|scope| -> Result<()> {
        let readers: Vec<_> = (0..4)
            .map(|_| {
                let nodes = nodes.clone();
                let expected = &expected;
                scope.spawn(move || -> Result<()> {
                    for _ in 0..2000 {
                        for node in &nodes {
                            let name = node.property("name")?;
                            assert_eq!(&name, &expected[&node.id()]);
                        }
                    }
                    Ok(())
                })
            })
            .collect();

        let mut current = primary.clone();
        for _ in 0..500 {
            let next = current.failover();
            ctx.replace_store(next.clone())?;
            current = next;
        }

        for reader in readers {
            reader
                .join()
                .map_err(|_| anyhow::anyhow!("reader thread panicked"))??;
        }
        Ok(())
    })?;

    assert_eq!(nodes[2].property("name")?, Some("Grace".into()));
    assert_eq!(ctx.store()?.node_count()?, 3);
    Ok(())
}

#[test]
fn test_cursors_released_on_every_exit_path() -> Result<()> {
    init_tracing();
    let primary = MemoryStore::new();
    let ctx = GraphContext::new(primary.clone(), ContextConfig::default());
    seed(&ctx)?;
    let people = ctx.node_index("people")?;

    let first = people.query("name:*")?.next();
    assert!(first.is_some());
    assert_eq!(primary.open_cursors(), 0);

    let found = people
        .query_key("name", "G*")?
        .find(|node| node.property("name").ok() == Some(Some("Grace".into())));
    assert!(found.is_some());
    assert_eq!(primary.open_cursors(), 0);

    assert!(people.query_key("name", "*")?.single().is_err());
    assert_eq!(primary.open_cursors(), 0);
    Ok(())
}

#[test]
fn test_shutdown_ends_the_context() -> Result<()> {
    init_tracing();
    let ctx = GraphContext::new(
        MemoryStore::new(),
        ContextConfig::from_json(r#"{"name": "reporting"}"#)?,
    );
    let nodes = seed(&ctx)?;
    assert_eq!(ctx.config().name.as_deref(), Some("reporting"));

    ctx.shutdown();
    assert_eq!(nodes[0].property("name"), Err(WrapError::ContextShutDown));
    assert_eq!(ctx.store().unwrap_err(), WrapError::ContextShutDown);
    Ok(())
}
