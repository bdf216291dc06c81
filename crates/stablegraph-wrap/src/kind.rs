//! The closed set of wrappable entity kinds.

use stablegraph_store::{BackingEntity, EntityId, EntityKind, GraphStore, StoreResult};

mod sealed {
    pub trait Sealed {}
}

/// Type-level tag selecting nodes or relationships of a store `S`.
pub trait Kind<S: GraphStore>: sealed::Sealed + Send + Sync + 'static {
    const KIND: EntityKind;

    type Backing: BackingEntity;

    /// Look the entity up in `store` by its stable id.
    fn lookup(store: &S, id: EntityId) -> StoreResult<Self::Backing>;
}

/// Tag for nodes.
#[derive(Debug)]
pub enum NodeKind {}

/// Tag for relationships.
#[derive(Debug)]
pub enum RelationshipKind {}

impl sealed::Sealed for NodeKind {}
impl sealed::Sealed for RelationshipKind {}

impl<S: GraphStore> Kind<S> for NodeKind {
    const KIND: EntityKind = EntityKind::Node;

    type Backing = S::Node;

    fn lookup(store: &S, id: EntityId) -> StoreResult<S::Node> {
        store.node_by_id(id)
    }
}

impl<S: GraphStore> Kind<S> for RelationshipKind {
    const KIND: EntityKind = EntityKind::Relationship;

    type Backing = S::Relationship;

    fn lookup(store: &S, id: EntityId) -> StoreResult<S::Relationship> {
        store.relationship_by_id(id)
    }
}
