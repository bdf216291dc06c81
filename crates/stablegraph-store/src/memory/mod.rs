//! In-memory reference store.
//!
//! A [`MemoryStore`] value is one *instance* of a logical database. The graph
//! itself lives in shared [`GraphData`]; instances are cheap views over it:
//!
//! ```text
//!   MemoryStore (instance#1, retired) ──┐
//!                                       ├──► Arc<RwLock<GraphData>>  (db#7)
//!   MemoryStore (instance#2, live)  ────┘
//!
//!   MemoryStore (instance#3, live) ─────► Arc<RwLock<GraphData>>  (db#7, replica copy)
//! ```
//!
//! Every handle remembers the instance that produced it. Once that instance is
//! retired (see [`MemoryStore::failover`]) the handle fails with
//! [`StoreError::Retired`], even though the entity still exists under the same
//! id in the new instance. That is the staleness hazard the wrapping layer is
//! built to absorb.

mod index;

pub use index::{MemoryHits, MemoryIndex};

use crate::{
    BackingEntity, DatabaseId, Direction, EntityId, EntityKind, GraphStore, InstanceId,
    PropertyContainer, PropertyValue, StoreError, StoreResult,
};
use ahash::AHashMap;
use index::IndexSource;
use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use roaring::RoaringTreemap;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

/// Name under which the node auto index is exposed.
pub const NODE_AUTO_INDEX: &str = "node_auto_index";
/// Name under which the relationship auto index is exposed.
pub const RELATIONSHIP_AUTO_INDEX: &str = "relationship_auto_index";

// ============================================================================
// Configuration
// ============================================================================

/// Configuration for a new in-memory database.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MemoryStoreConfig {
    /// Node property keys answered by the node auto index
    #[serde(default)]
    pub auto_index_node_keys: Vec<String>,
    /// Relationship property keys answered by the relationship auto index
    #[serde(default)]
    pub auto_index_relationship_keys: Vec<String>,
}

// ============================================================================
// Graph data
// ============================================================================

type Properties = BTreeMap<String, PropertyValue>;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct NodeRecord {
    properties: Properties,
    outgoing: BTreeSet<EntityId>,
    incoming: BTreeSet<EntityId>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct RelationshipRecord {
    rel_type: String,
    start: EntityId,
    end: EntityId,
    properties: Properties,
}

/// Postings of one manual index: key → term → entity ids.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct Postings {
    entries: BTreeMap<String, BTreeMap<String, RoaringTreemap>>,
}

impl Postings {
    fn insert(&mut self, key: &str, terms: &[String], id: EntityId) {
        let by_term = self.entries.entry(key.to_string()).or_default();
        for term in terms {
            by_term.entry(term.clone()).or_default().insert(id);
        }
    }

    fn remove_terms(&mut self, key: &str, terms: &[String], id: EntityId) {
        if let Some(by_term) = self.entries.get_mut(key) {
            for term in terms {
                if let Some(ids) = by_term.get_mut(term) {
                    ids.remove(id);
                }
            }
        }
        self.prune();
    }

    fn remove_key(&mut self, key: &str, id: EntityId) {
        if let Some(by_term) = self.entries.get_mut(key) {
            for ids in by_term.values_mut() {
                ids.remove(id);
            }
        }
        self.prune();
    }

    fn remove_entity(&mut self, id: EntityId) {
        for by_term in self.entries.values_mut() {
            for ids in by_term.values_mut() {
                ids.remove(id);
            }
        }
        self.prune();
    }

    fn prune(&mut self) {
        for by_term in self.entries.values_mut() {
            by_term.retain(|_, ids| !ids.is_empty());
        }
        self.entries.retain(|_, by_term| !by_term.is_empty());
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct GraphData {
    database: DatabaseId,
    next_node_id: EntityId,
    next_relationship_id: EntityId,
    nodes: AHashMap<EntityId, NodeRecord>,
    relationships: AHashMap<EntityId, RelationshipRecord>,
    indexes: BTreeMap<(EntityKind, String), Postings>,
    auto_index_node_keys: BTreeSet<String>,
    auto_index_relationship_keys: BTreeSet<String>,
}

impl GraphData {
    fn new(config: MemoryStoreConfig) -> Self {
        Self {
            database: DatabaseId::fresh(),
            next_node_id: 0,
            next_relationship_id: 0,
            nodes: AHashMap::new(),
            relationships: AHashMap::new(),
            indexes: BTreeMap::new(),
            auto_index_node_keys: config.auto_index_node_keys.into_iter().collect(),
            auto_index_relationship_keys: config.auto_index_relationship_keys.into_iter().collect(),
        }
    }

    fn ensure_entity(&self, kind: EntityKind, id: EntityId) -> StoreResult<()> {
        let exists = match kind {
            EntityKind::Node => self.nodes.contains_key(&id),
            EntityKind::Relationship => self.relationships.contains_key(&id),
        };
        if exists {
            Ok(())
        } else {
            Err(StoreError::NotFound { kind, id })
        }
    }

    fn properties(&self, kind: EntityKind, id: EntityId) -> StoreResult<&Properties> {
        let props = match kind {
            EntityKind::Node => self.nodes.get(&id).map(|n| &n.properties),
            EntityKind::Relationship => self.relationships.get(&id).map(|r| &r.properties),
        };
        props.ok_or(StoreError::NotFound { kind, id })
    }

    fn properties_mut(&mut self, kind: EntityKind, id: EntityId) -> StoreResult<&mut Properties> {
        let props = match kind {
            EntityKind::Node => self.nodes.get_mut(&id).map(|n| &mut n.properties),
            EntityKind::Relationship => self.relationships.get_mut(&id).map(|r| &mut r.properties),
        };
        props.ok_or(StoreError::NotFound { kind, id })
    }

    fn relationship(&self, id: EntityId) -> StoreResult<&RelationshipRecord> {
        self.relationships.get(&id).ok_or(StoreError::NotFound {
            kind: EntityKind::Relationship,
            id,
        })
    }

    fn postings_mut(&mut self, kind: EntityKind, name: &str) -> StoreResult<&mut Postings> {
        self.indexes
            .get_mut(&(kind, name.to_string()))
            .ok_or_else(|| StoreError::IndexNotFound {
                kind,
                name: name.to_string(),
            })
    }

    fn unindex(&mut self, kind: EntityKind, id: EntityId) {
        for ((index_kind, _), postings) in self.indexes.iter_mut() {
            if *index_kind == kind {
                postings.remove_entity(id);
            }
        }
    }

    fn delete_node(&mut self, id: EntityId) -> StoreResult<()> {
        let record = self.nodes.get(&id).ok_or(StoreError::NotFound {
            kind: EntityKind::Node,
            id,
        })?;
        if !record.outgoing.is_empty() || !record.incoming.is_empty() {
            return Err(StoreError::Constraint(format!(
                "node {id} still has {} relationship(s)",
                record.outgoing.len() + record.incoming.len()
            )));
        }
        self.nodes.remove(&id);
        self.unindex(EntityKind::Node, id);
        Ok(())
    }

    fn delete_relationship(&mut self, id: EntityId) -> StoreResult<()> {
        let record = self.relationships.remove(&id).ok_or(StoreError::NotFound {
            kind: EntityKind::Relationship,
            id,
        })?;
        if let Some(start) = self.nodes.get_mut(&record.start) {
            start.outgoing.remove(&id);
        }
        if let Some(end) = self.nodes.get_mut(&record.end) {
            end.incoming.remove(&id);
        }
        self.unindex(EntityKind::Relationship, id);
        Ok(())
    }
}

// ============================================================================
// Instances and handles
// ============================================================================

#[derive(Debug)]
struct Instance {
    id: InstanceId,
    live: AtomicBool,
    open_cursors: AtomicUsize,
    data: Arc<RwLock<GraphData>>,
}

impl Instance {
    fn new(data: Arc<RwLock<GraphData>>) -> Arc<Self> {
        Arc::new(Self {
            id: InstanceId::fresh(),
            live: AtomicBool::new(true),
            open_cursors: AtomicUsize::new(0),
            data,
        })
    }

    fn ensure_live(&self) -> StoreResult<()> {
        if self.live.load(Ordering::Acquire) {
            Ok(())
        } else {
            Err(StoreError::Retired { instance: self.id })
        }
    }

    fn read(&self) -> StoreResult<RwLockReadGuard<'_, GraphData>> {
        self.ensure_live()?;
        Ok(self.data.read())
    }

    fn write(&self) -> StoreResult<RwLockWriteGuard<'_, GraphData>> {
        self.ensure_live()?;
        Ok(self.data.write())
    }
}

/// Shared state of a node or relationship handle.
#[doc(hidden)]
#[derive(Clone)]
pub struct EntityHandle {
    id: EntityId,
    database: DatabaseId,
    instance: Arc<Instance>,
}

impl EntityHandle {
    fn has_property(&self, kind: EntityKind, key: &str) -> StoreResult<bool> {
        let data = self.instance.read()?;
        Ok(data.properties(kind, self.id)?.contains_key(key))
    }

    fn property(&self, kind: EntityKind, key: &str) -> StoreResult<Option<PropertyValue>> {
        let data = self.instance.read()?;
        Ok(data.properties(kind, self.id)?.get(key).cloned())
    }

    fn set_property(&self, kind: EntityKind, key: &str, value: PropertyValue) -> StoreResult<()> {
        let mut data = self.instance.write()?;
        data.properties_mut(kind, self.id)?
            .insert(key.to_string(), value);
        Ok(())
    }

    fn remove_property(&self, kind: EntityKind, key: &str) -> StoreResult<Option<PropertyValue>> {
        let mut data = self.instance.write()?;
        Ok(data.properties_mut(kind, self.id)?.remove(key))
    }

    fn property_keys(&self, kind: EntityKind) -> StoreResult<Vec<String>> {
        let data = self.instance.read()?;
        Ok(data.properties(kind, self.id)?.keys().cloned().collect())
    }

    fn property_values(&self, kind: EntityKind) -> StoreResult<Vec<PropertyValue>> {
        let data = self.instance.read()?;
        Ok(data.properties(kind, self.id)?.values().cloned().collect())
    }
}

mod sealed {
    pub trait Sealed {}
}

/// Entity handles produced by a [`MemoryStore`].
pub trait MemoryEntity: BackingEntity + sealed::Sealed {
    #[doc(hidden)]
    fn from_handle(handle: EntityHandle) -> Self;

    #[doc(hidden)]
    fn handle(&self) -> &EntityHandle;
}

macro_rules! memory_entity {
    ($name:ident, $kind:expr) => {
        #[derive(Clone)]
        pub struct $name(EntityHandle);

        impl $name {
            pub fn database_id(&self) -> DatabaseId {
                self.0.database
            }

            /// Instance this handle was obtained from.
            pub fn instance_id(&self) -> InstanceId {
                self.0.instance.id
            }
        }

        impl PartialEq for $name {
            fn eq(&self, other: &Self) -> bool {
                self.0.id == other.0.id && self.0.database == other.0.database
            }
        }

        impl Eq for $name {}

        impl Hash for $name {
            fn hash<H: Hasher>(&self, state: &mut H) {
                self.0.database.hash(state);
                self.0.id.hash(state);
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.debug_struct(stringify!($name))
                    .field("id", &self.0.id)
                    .field("database", &self.0.database)
                    .field("instance", &self.0.instance.id)
                    .finish()
            }
        }

        impl PropertyContainer for $name {
            fn has_property(&self, key: &str) -> StoreResult<bool> {
                self.0.has_property($kind, key)
            }

            fn property(&self, key: &str) -> StoreResult<Option<PropertyValue>> {
                self.0.property($kind, key)
            }

            fn set_property(&self, key: &str, value: PropertyValue) -> StoreResult<()> {
                self.0.set_property($kind, key, value)
            }

            fn remove_property(&self, key: &str) -> StoreResult<Option<PropertyValue>> {
                self.0.remove_property($kind, key)
            }

            fn property_keys(&self) -> StoreResult<Vec<String>> {
                self.0.property_keys($kind)
            }

            fn property_values(&self) -> StoreResult<Vec<PropertyValue>> {
                self.0.property_values($kind)
            }
        }

        impl sealed::Sealed for $name {}

        impl MemoryEntity for $name {
            fn from_handle(handle: EntityHandle) -> Self {
                Self(handle)
            }

            fn handle(&self) -> &EntityHandle {
                &self.0
            }
        }
    };
}

memory_entity!(MemoryNode, EntityKind::Node);
memory_entity!(MemoryRelationship, EntityKind::Relationship);

impl BackingEntity for MemoryNode {
    const KIND: EntityKind = EntityKind::Node;

    fn id(&self) -> EntityId {
        self.0.id
    }

    fn delete(&self) -> StoreResult<()> {
        self.0.instance.write()?.delete_node(self.0.id)
    }
}

impl BackingEntity for MemoryRelationship {
    const KIND: EntityKind = EntityKind::Relationship;

    fn id(&self) -> EntityId {
        self.0.id
    }

    fn delete(&self) -> StoreResult<()> {
        self.0.instance.write()?.delete_relationship(self.0.id)
    }
}

// ============================================================================
// Store
// ============================================================================

/// One instance of an in-memory graph database.
///
/// Cloning shares the instance; use [`MemoryStore::failover`] or
/// [`MemoryStore::replicate`] to obtain a different one.
#[derive(Debug, Clone)]
pub struct MemoryStore {
    instance: Arc<Instance>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::with_config(MemoryStoreConfig::default())
    }

    pub fn with_config(config: MemoryStoreConfig) -> Self {
        let data = GraphData::new(config);
        tracing::debug!(database = %data.database, "created in-memory database");
        Self {
            instance: Instance::new(Arc::new(RwLock::new(data))),
        }
    }

    /// Shorthand for a database with auto-indexed node keys.
    pub fn with_auto_index_keys<I, K>(node_keys: I) -> Self
    where
        I: IntoIterator<Item = K>,
        K: Into<String>,
    {
        Self::with_config(MemoryStoreConfig {
            auto_index_node_keys: node_keys.into_iter().map(Into::into).collect(),
            auto_index_relationship_keys: Vec::new(),
        })
    }

    pub fn database_id(&self) -> DatabaseId {
        self.instance.data.read().database
    }

    pub fn is_live(&self) -> bool {
        self.instance.live.load(Ordering::Acquire)
    }

    /// Take this instance out of service. Handles it produced stop working.
    pub fn retire(&self) {
        if self.instance.live.swap(false, Ordering::AcqRel) {
            tracing::info!(instance = %self.instance.id, "store instance retired");
        }
    }

    /// Role change: retire this instance and hand the same data to a new one.
    pub fn failover(&self) -> MemoryStore {
        self.retire();
        let next = Self {
            instance: Instance::new(Arc::clone(&self.instance.data)),
        };
        tracing::info!(
            from = %self.instance.id,
            to = %next.instance.id,
            "store failed over"
        );
        next
    }

    /// An independent copy of the database as a new live instance.
    ///
    /// The copy keeps the database id, so handles from either side compare
    /// equal for the same entity id.
    pub fn replicate(&self) -> StoreResult<MemoryStore> {
        let bytes = self.snapshot()?;
        Self::from_snapshot(&bytes)
    }

    pub fn snapshot(&self) -> StoreResult<Vec<u8>> {
        let data = self.instance.read()?;
        bincode::serialize(&*data).map_err(|e| StoreError::Snapshot(e.to_string()))
    }

    pub fn from_snapshot(bytes: &[u8]) -> StoreResult<MemoryStore> {
        let data: GraphData =
            bincode::deserialize(bytes).map_err(|e| StoreError::Snapshot(e.to_string()))?;
        tracing::debug!(
            database = %data.database,
            nodes = data.nodes.len(),
            relationships = data.relationships.len(),
            "restored in-memory database from snapshot"
        );
        Ok(Self {
            instance: Instance::new(Arc::new(RwLock::new(data))),
        })
    }

    /// Cursors handed out by this instance and not yet closed.
    pub fn open_cursors(&self) -> usize {
        self.instance.open_cursors.load(Ordering::Acquire)
    }

    pub fn node_count(&self) -> StoreResult<usize> {
        Ok(self.instance.read()?.nodes.len())
    }

    pub fn relationship_count(&self) -> StoreResult<usize> {
        Ok(self.instance.read()?.relationships.len())
    }

    fn handle(&self, database: DatabaseId, id: EntityId) -> EntityHandle {
        EntityHandle {
            id,
            database,
            instance: Arc::clone(&self.instance),
        }
    }

    /// A handle may come from another instance of the same database, but that
    /// instance must still be live.
    fn check_handle(&self, data: &GraphData, handle: &EntityHandle) -> StoreResult<()> {
        handle.instance.ensure_live()?;
        if handle.database != data.database {
            return Err(StoreError::Constraint(format!(
                "handle from {} used with {}",
                handle.database, data.database
            )));
        }
        Ok(())
    }

    fn manual_index<E: MemoryEntity>(&self, name: &str) -> StoreResult<MemoryIndex<E>> {
        if name.is_empty() {
            return Err(StoreError::Constraint("index name must not be empty".into()));
        }
        let mut data = self.instance.write()?;
        data.indexes
            .entry((E::KIND, name.to_string()))
            .or_insert_with(|| {
                tracing::debug!(kind = %E::KIND, index = name, "created index");
                Postings::default()
            });
        Ok(MemoryIndex::new(
            name,
            IndexSource::Manual,
            Arc::clone(&self.instance),
        ))
    }

    fn auto_index<E: MemoryEntity>(&self, name: &str) -> StoreResult<MemoryIndex<E>> {
        self.instance.ensure_live()?;
        Ok(MemoryIndex::new(
            name,
            IndexSource::Auto,
            Arc::clone(&self.instance),
        ))
    }
}

impl GraphStore for MemoryStore {
    type Node = MemoryNode;
    type Relationship = MemoryRelationship;
    type NodeIndex = MemoryIndex<MemoryNode>;
    type RelationshipIndex = MemoryIndex<MemoryRelationship>;

    fn instance_id(&self) -> InstanceId {
        self.instance.id
    }

    fn node_by_id(&self, id: EntityId) -> StoreResult<MemoryNode> {
        let data = self.instance.read()?;
        data.ensure_entity(EntityKind::Node, id)?;
        Ok(MemoryNode(self.handle(data.database, id)))
    }

    fn relationship_by_id(&self, id: EntityId) -> StoreResult<MemoryRelationship> {
        let data = self.instance.read()?;
        data.ensure_entity(EntityKind::Relationship, id)?;
        Ok(MemoryRelationship(self.handle(data.database, id)))
    }

    fn create_node(&self) -> StoreResult<MemoryNode> {
        let mut data = self.instance.write()?;
        let id = data.next_node_id;
        data.next_node_id += 1;
        data.nodes.insert(id, NodeRecord::default());
        Ok(MemoryNode(self.handle(data.database, id)))
    }

    fn create_relationship(
        &self,
        from: &MemoryNode,
        to: &MemoryNode,
        rel_type: &str,
    ) -> StoreResult<MemoryRelationship> {
        if rel_type.is_empty() {
            return Err(StoreError::Constraint(
                "relationship type must not be empty".into(),
            ));
        }
        let mut data = self.instance.write()?;
        self.check_handle(&data, &from.0)?;
        self.check_handle(&data, &to.0)?;
        data.ensure_entity(EntityKind::Node, from.0.id)?;
        data.ensure_entity(EntityKind::Node, to.0.id)?;

        let id = data.next_relationship_id;
        data.next_relationship_id += 1;
        data.relationships.insert(
            id,
            RelationshipRecord {
                rel_type: rel_type.to_string(),
                start: from.0.id,
                end: to.0.id,
                properties: Properties::new(),
            },
        );
        if let Some(start) = data.nodes.get_mut(&from.0.id) {
            start.outgoing.insert(id);
        }
        if let Some(end) = data.nodes.get_mut(&to.0.id) {
            end.incoming.insert(id);
        }
        Ok(MemoryRelationship(self.handle(data.database, id)))
    }

    fn relationships(
        &self,
        node: &MemoryNode,
        direction: Direction,
    ) -> StoreResult<Vec<MemoryRelationship>> {
        let data = self.instance.read()?;
        self.check_handle(&data, &node.0)?;
        let record = data.nodes.get(&node.0.id).ok_or(StoreError::NotFound {
            kind: EntityKind::Node,
            id: node.0.id,
        })?;
        let ids: BTreeSet<EntityId> = match direction {
            Direction::Outgoing => record.outgoing.clone(),
            Direction::Incoming => record.incoming.clone(),
            Direction::Both => record.outgoing.union(&record.incoming).copied().collect(),
        };
        Ok(ids
            .into_iter()
            .map(|id| MemoryRelationship(self.handle(data.database, id)))
            .collect())
    }

    fn start_node(&self, relationship: &MemoryRelationship) -> StoreResult<MemoryNode> {
        let data = self.instance.read()?;
        self.check_handle(&data, &relationship.0)?;
        let start = data.relationship(relationship.0.id)?.start;
        Ok(MemoryNode(self.handle(data.database, start)))
    }

    fn end_node(&self, relationship: &MemoryRelationship) -> StoreResult<MemoryNode> {
        let data = self.instance.read()?;
        self.check_handle(&data, &relationship.0)?;
        let end = data.relationship(relationship.0.id)?.end;
        Ok(MemoryNode(self.handle(data.database, end)))
    }

    fn relationship_type(&self, relationship: &MemoryRelationship) -> StoreResult<String> {
        let data = self.instance.read()?;
        self.check_handle(&data, &relationship.0)?;
        Ok(data.relationship(relationship.0.id)?.rel_type.clone())
    }

    fn node_index(&self, name: &str) -> StoreResult<MemoryIndex<MemoryNode>> {
        self.manual_index(name)
    }

    fn relationship_index(&self, name: &str) -> StoreResult<MemoryIndex<MemoryRelationship>> {
        self.manual_index(name)
    }

    fn node_auto_index(&self) -> StoreResult<MemoryIndex<MemoryNode>> {
        self.auto_index(NODE_AUTO_INDEX)
    }

    fn relationship_auto_index(&self) -> StoreResult<MemoryIndex<MemoryRelationship>> {
        self.auto_index(RELATIONSHIP_AUTO_INDEX)
    }

    fn index_exists(&self, kind: EntityKind, name: &str) -> StoreResult<bool> {
        let data = self.instance.read()?;
        Ok(data.indexes.contains_key(&(kind, name.to_string())))
    }

    fn index_names(&self, kind: EntityKind) -> StoreResult<Vec<String>> {
        let data = self.instance.read()?;
        Ok(data
            .indexes
            .keys()
            .filter(|(k, _)| *k == kind)
            .map(|(_, name)| name.clone())
            .collect())
    }
}
