//! Backing graph-store contract.
//!
//! This crate describes the capabilities the wrapping layer needs from a graph
//! store, as plain Rust traits:
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │ GraphStore                                                   │
//! │   node_by_id / relationship_by_id / create_* / relationships │
//! │   node_index / relationship_index / *_auto_index             │
//! │                                                              │
//! │   Node, Relationship : BackingEntity (PropertyContainer)     │
//! │   NodeIndex          : BackingIndex<Node>                    │
//! │   RelationshipIndex  : BackingRelationshipIndex<Rel, Node>   │
//! │                        └── Hits : IndexHits (cursor)         │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! Entity handles returned by a store belong to one store *instance*. A store
//! deployment may replace its instance (failover, role change) at any time,
//! after which handles from the old instance may stop working even though the
//! entity ids they carry are still valid.
//!
//! [`MemoryStore`] is an in-memory implementation of the contract that models
//! exactly that: instances can be failed over, replicated and retired.

pub mod error;
pub mod memory;
pub mod value;

#[cfg(test)]
mod tests;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::hash::Hash;
use std::num::NonZeroU64;
use std::sync::atomic::{AtomicU64, Ordering};

pub use error::{StoreError, StoreResult};
pub use memory::{
    MemoryHits, MemoryIndex, MemoryNode, MemoryRelationship, MemoryStore, MemoryStoreConfig,
};
pub use value::PropertyValue;

// ============================================================================
// Identity primitives
// ============================================================================

/// Stable numeric identifier of a node or relationship.
pub type EntityId = u64;

/// The two kinds of property-bearing entities.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EntityKind {
    Node,
    Relationship,
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntityKind::Node => f.write_str("node"),
            EntityKind::Relationship => f.write_str("relationship"),
        }
    }
}

/// Which relationships of a node to enumerate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    Outgoing,
    Incoming,
    Both,
}

/// Mutation capability of an index handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IndexAccess {
    /// A view that only answers `get`/`query` (e.g. an auto index).
    ReadOnly,
    ReadWrite,
}

impl IndexAccess {
    pub fn is_writable(self) -> bool {
        matches!(self, IndexAccess::ReadWrite)
    }
}

static NEXT_DATABASE_ID: AtomicU64 = AtomicU64::new(1);
static NEXT_INSTANCE_ID: AtomicU64 = AtomicU64::new(1);

/// Identity of a logical database. Survives failover and replication.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DatabaseId(u64);

impl DatabaseId {
    pub fn fresh() -> Self {
        Self(NEXT_DATABASE_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn raw(self) -> u64 {
        self.0
    }
}

impl fmt::Display for DatabaseId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "db#{}", self.0)
    }
}

/// Identity of one live incarnation of a store. Process-local, never serialized.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InstanceId(NonZeroU64);

impl InstanceId {
    pub fn fresh() -> Self {
        let raw = NEXT_INSTANCE_ID.fetch_add(1, Ordering::Relaxed);
        Self(NonZeroU64::new(raw).expect("NEXT_INSTANCE_ID starts at 1"))
    }

    pub fn raw(self) -> u64 {
        self.0.get()
    }
}

impl fmt::Display for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "instance#{}", self.0)
    }
}

// ============================================================================
// Entities
// ============================================================================

/// Property access on a node or relationship handle.
pub trait PropertyContainer {
    fn has_property(&self, key: &str) -> StoreResult<bool>;

    /// `Ok(None)` when the entity exists but has no such property.
    fn property(&self, key: &str) -> StoreResult<Option<PropertyValue>>;

    fn set_property(&self, key: &str, value: PropertyValue) -> StoreResult<()>;

    /// Returns the removed value, if there was one.
    fn remove_property(&self, key: &str) -> StoreResult<Option<PropertyValue>>;

    fn property_keys(&self) -> StoreResult<Vec<String>>;

    fn property_values(&self) -> StoreResult<Vec<PropertyValue>>;
}

/// A backing node or relationship handle.
///
/// Equality and hashing are structural: the stable id plus the owning
/// database, never the instance that produced the handle.
pub trait BackingEntity:
    PropertyContainer + Clone + Eq + Hash + fmt::Debug + Send + Sync + 'static
{
    const KIND: EntityKind;

    fn id(&self) -> EntityId;

    fn delete(&self) -> StoreResult<()>;
}

// ============================================================================
// Indexes and cursors
// ============================================================================

/// A single-pass cursor over index results.
///
/// `close` releases the cursor's resources; callers are expected to call it
/// exactly once (implementations tolerate repeated calls).
pub trait IndexHits: Iterator {
    fn has_next(&self) -> bool;

    /// The only remaining hit, `Ok(None)` if there is none, and
    /// [`StoreError::MultipleResults`] if there are several. Closes the cursor.
    fn single(&mut self) -> StoreResult<Option<Self::Item>>;

    /// Total number of hits, independent of how many were consumed.
    fn size(&self) -> usize;

    /// Score of the hit most recently returned by `next`.
    fn current_score(&self) -> f32;

    fn close(&mut self);
}

/// A named index over entities of kind `E`.
pub trait BackingIndex<E: BackingEntity>: Send + Sync {
    type Hits: IndexHits<Item = E>;

    fn name(&self) -> &str;

    fn entity_kind(&self) -> EntityKind {
        E::KIND
    }

    fn access(&self) -> IndexAccess;

    fn get(&self, key: &str, value: &PropertyValue) -> StoreResult<Self::Hits>;

    fn query_key(&self, key: &str, query: &str) -> StoreResult<Self::Hits>;

    fn query(&self, query: &str) -> StoreResult<Self::Hits>;

    fn add(&self, entity: &E, key: &str, value: &PropertyValue) -> StoreResult<()>;

    fn remove(&self, entity: &E, key: &str, value: &PropertyValue) -> StoreResult<()>;

    fn remove_key(&self, entity: &E, key: &str) -> StoreResult<()>;

    fn remove_entity(&self, entity: &E) -> StoreResult<()>;

    fn delete(&self) -> StoreResult<()>;
}

/// Relationship indexes can additionally constrain hits by their end points.
/// `None` means unconstrained.
pub trait BackingRelationshipIndex<R: BackingEntity, N: BackingEntity>: BackingIndex<R> {
    fn get_between(
        &self,
        key: &str,
        value: Option<&PropertyValue>,
        start: Option<&N>,
        end: Option<&N>,
    ) -> StoreResult<Self::Hits>;

    fn query_key_between(
        &self,
        key: &str,
        query: Option<&str>,
        start: Option<&N>,
        end: Option<&N>,
    ) -> StoreResult<Self::Hits>;

    fn query_between(
        &self,
        query: Option<&str>,
        start: Option<&N>,
        end: Option<&N>,
    ) -> StoreResult<Self::Hits>;
}

// ============================================================================
// Store
// ============================================================================

/// One incarnation of a graph store.
pub trait GraphStore: Send + Sync + 'static {
    type Node: BackingEntity;
    type Relationship: BackingEntity;
    type NodeIndex: BackingIndex<Self::Node>;
    type RelationshipIndex: BackingRelationshipIndex<Self::Relationship, Self::Node>;

    fn instance_id(&self) -> InstanceId;

    fn node_by_id(&self, id: EntityId) -> StoreResult<Self::Node>;

    fn relationship_by_id(&self, id: EntityId) -> StoreResult<Self::Relationship>;

    fn create_node(&self) -> StoreResult<Self::Node>;

    fn create_relationship(
        &self,
        from: &Self::Node,
        to: &Self::Node,
        rel_type: &str,
    ) -> StoreResult<Self::Relationship>;

    fn relationships(
        &self,
        node: &Self::Node,
        direction: Direction,
    ) -> StoreResult<Vec<Self::Relationship>>;

    fn start_node(&self, relationship: &Self::Relationship) -> StoreResult<Self::Node>;

    fn end_node(&self, relationship: &Self::Relationship) -> StoreResult<Self::Node>;

    fn relationship_type(&self, relationship: &Self::Relationship) -> StoreResult<String>;

    /// Get or create a read-write node index.
    fn node_index(&self, name: &str) -> StoreResult<Self::NodeIndex>;

    /// Get or create a read-write relationship index.
    fn relationship_index(&self, name: &str) -> StoreResult<Self::RelationshipIndex>;

    /// Read-only view maintained by the store itself.
    fn node_auto_index(&self) -> StoreResult<Self::NodeIndex>;

    /// Read-only view maintained by the store itself.
    fn relationship_auto_index(&self) -> StoreResult<Self::RelationshipIndex>;

    fn index_exists(&self, kind: EntityKind, name: &str) -> StoreResult<bool>;

    fn index_names(&self, kind: EntityKind) -> StoreResult<Vec<String>>;
}
