//! Entity wrappers.
//!
//! A [`Wrapped`] value stands in for a node or relationship. Its identity is
//! its [`EntityRef`]: `(context, id, kind)`. Every operation resolves the
//! backing entity through the context, unwraps wrapper arguments, delegates,
//! and wraps whatever entities come back.

use crate::branding::{assert_token, ContextToken, ContextTokenMismatch};
use crate::context::{GraphContext, WrapOrigin};
use crate::error::{Result, WrapError};
use crate::kind::{Kind, NodeKind, RelationshipKind};
use stablegraph_store::{
    BackingEntity, Direction, EntityId, EntityKind, GraphStore, PropertyContainer, PropertyValue,
    StoreError,
};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::marker::PhantomData;

/// Logical identity of a wrapped entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntityRef {
    context: ContextToken,
    id: EntityId,
    kind: EntityKind,
}

impl EntityRef {
    pub fn new(context: ContextToken, id: EntityId, kind: EntityKind) -> Self {
        Self { context, id, kind }
    }

    pub fn context(&self) -> ContextToken {
        self.context
    }

    pub fn id(&self) -> EntityId {
        self.id
    }

    pub fn kind(&self) -> EntityKind {
        self.kind
    }

    pub fn assert_in(&self, context: ContextToken) -> Result<(), ContextTokenMismatch> {
        assert_token(context, self.context)
    }
}

// Only id and kind: the hash must not depend on anything resolution can change.
impl Hash for EntityRef {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
        self.kind.hash(state);
    }
}

impl fmt::Display for EntityRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} @{}", self.kind, self.id, self.context)
    }
}

pub(crate) enum Binding<B> {
    /// Backing handle captured at wrap time.
    Held(B),
    /// Nothing but the id; resolved on every access.
    Lookup,
}

impl<B: Clone> Clone for Binding<B> {
    fn clone(&self) -> Self {
        match self {
            Binding::Held(backing) => Binding::Held(backing.clone()),
            Binding::Lookup => Binding::Lookup,
        }
    }
}

/// A node or relationship wrapper.
pub struct Wrapped<S: GraphStore, K: Kind<S>> {
    context: GraphContext<S>,
    entity: EntityRef,
    binding: Binding<K::Backing>,
    _kind: PhantomData<fn() -> K>,
}

pub type WrappedNode<S> = Wrapped<S, NodeKind>;
pub type WrappedRelationship<S> = Wrapped<S, RelationshipKind>;

/// An entity argument that is either a wrapper or already a backing value.
pub enum EntityArg<'a, S: GraphStore, K: Kind<S>> {
    Wrapped(&'a Wrapped<S, K>),
    Backing(K::Backing),
}

impl<'a, S: GraphStore, K: Kind<S>> From<&'a Wrapped<S, K>> for EntityArg<'a, S, K> {
    fn from(entity: &'a Wrapped<S, K>) -> Self {
        EntityArg::Wrapped(entity)
    }
}

impl<S: GraphStore, K: Kind<S>> Wrapped<S, K> {
    pub(crate) fn from_parts(
        context: GraphContext<S>,
        entity: EntityRef,
        binding: Binding<K::Backing>,
    ) -> Self {
        Self {
            context,
            entity,
            binding,
            _kind: PhantomData,
        }
    }

    pub fn id(&self) -> EntityId {
        self.entity.id
    }

    pub fn kind(&self) -> EntityKind {
        K::KIND
    }

    pub fn entity_ref(&self) -> EntityRef {
        self.entity
    }

    pub fn context(&self) -> &GraphContext<S> {
        &self.context
    }

    /// Whether this wrapper re-resolves its entity on every access.
    pub fn is_lookup(&self) -> bool {
        matches!(self.binding, Binding::Lookup)
    }

    pub(crate) fn resolve(&self) -> Result<K::Backing> {
        self.with_backing(|_, backing| Ok(backing))
    }

    /// The backing entity as seen by `store`.
    pub(crate) fn resolve_against(&self, store: &S) -> Result<K::Backing> {
        match &self.binding {
            Binding::Held(backing) => Ok(backing.clone()),
            Binding::Lookup => {
                tracing::trace!(
                    entity = %self.entity,
                    instance = %store.instance_id(),
                    "resolving entity by id"
                );
                Ok(K::lookup(store, self.entity.id)?)
            }
        }
    }

    /// Resolve against the current store and run `op` there.
    ///
    /// A lookup wrapper whose call hits an instance retired under it runs
    /// again against the replacement once one is in the slot. Every other
    /// error, `NotFound` included, is returned as is.
    fn with_backing<R>(&self, op: impl Fn(&S, K::Backing) -> Result<R>) -> Result<R> {
        let mut store = self.context.store()?;
        loop {
            let result = self
                .resolve_against(&store)
                .and_then(|backing| op(&*store, backing));
            match result {
                Err(WrapError::Store(StoreError::Retired { instance })) if self.is_lookup() => {
                    let Some(current) = self.context.await_replacement(store.instance_id())? else {
                        return Err(WrapError::Store(StoreError::Retired { instance }));
                    };
                    tracing::debug!(
                        entity = %self.entity,
                        retired = %instance,
                        current = %current.instance_id(),
                        "store replaced during call, resolving again"
                    );
                    store = current;
                }
                other => return other,
            }
        }
    }

    // ========================================================================
    // Properties
    // ========================================================================

    pub fn has_property(&self, key: &str) -> Result<bool> {
        self.with_backing(|_, backing| Ok(backing.has_property(key)?))
    }

    pub fn property(&self, key: &str) -> Result<Option<PropertyValue>> {
        self.with_backing(|_, backing| Ok(backing.property(key)?))
    }

    pub fn property_or(&self, key: &str, default: impl Into<PropertyValue>) -> Result<PropertyValue> {
        Ok(self.property(key)?.unwrap_or_else(|| default.into()))
    }

    pub fn set_property(&self, key: &str, value: impl Into<PropertyValue>) -> Result<()> {
        let value = value.into();
        self.with_backing(|_, backing| Ok(backing.set_property(key, value.clone())?))
    }

    pub fn remove_property(&self, key: &str) -> Result<Option<PropertyValue>> {
        self.with_backing(|_, backing| Ok(backing.remove_property(key)?))
    }

    pub fn property_keys(&self) -> Result<Vec<String>> {
        self.with_backing(|_, backing| Ok(backing.property_keys()?))
    }

    pub fn property_values(&self) -> Result<Vec<PropertyValue>> {
        self.with_backing(|_, backing| Ok(backing.property_values()?))
    }

    pub fn delete(&self) -> Result<()> {
        self.with_backing(|_, backing| Ok(backing.delete()?))?;
        tracing::debug!(entity = %self.entity, "deleted entity");
        Ok(())
    }
}

impl<S: GraphStore> Wrapped<S, NodeKind> {
    pub fn create_relationship_to(
        &self,
        other: &WrappedNode<S>,
        rel_type: &str,
    ) -> Result<WrappedRelationship<S>> {
        let relationship = self.with_backing(|store, from| {
            let to = self.context.unwrap_in(other, store)?;
            Ok(store.create_relationship(&from, &to, rel_type)?)
        })?;
        Ok(self.context.wrap(relationship, WrapOrigin::Created))
    }

    pub fn relationships(&self, direction: Direction) -> Result<Vec<WrappedRelationship<S>>> {
        let relationships =
            self.with_backing(|store, node| Ok(store.relationships(&node, direction)?))?;
        Ok(relationships
            .into_iter()
            .map(|relationship| {
                self.context
                    .wrap::<RelationshipKind>(relationship, WrapOrigin::Loaded)
            })
            .collect())
    }
}

impl<S: GraphStore> Wrapped<S, RelationshipKind> {
    pub fn start_node(&self) -> Result<WrappedNode<S>> {
        let node = self.with_backing(|store, relationship| Ok(store.start_node(&relationship)?))?;
        Ok(self.context.wrap(node, WrapOrigin::Loaded))
    }

    pub fn end_node(&self) -> Result<WrappedNode<S>> {
        let node = self.with_backing(|store, relationship| Ok(store.end_node(&relationship)?))?;
        Ok(self.context.wrap(node, WrapOrigin::Loaded))
    }

    /// Start and end node, in that order.
    pub fn nodes(&self) -> Result<[WrappedNode<S>; 2]> {
        let (start, end) = self.with_backing(|store, relationship| {
            Ok((store.start_node(&relationship)?, store.end_node(&relationship)?))
        })?;
        Ok([
            self.context.wrap(start, WrapOrigin::Loaded),
            self.context.wrap(end, WrapOrigin::Loaded),
        ])
    }

    /// The end point of this relationship that is not `node`.
    pub fn other_node(&self, node: &WrappedNode<S>) -> Result<WrappedNode<S>> {
        let other = self.with_backing(|store, relationship| {
            let node = self.context.unwrap_in(node, store)?;
            let start = store.start_node(&relationship)?;
            let end = store.end_node(&relationship)?;
            if node == start {
                Ok(end)
            } else if node == end {
                Ok(start)
            } else {
                Err(WrapError::NotConnected {
                    node: node.id(),
                    relationship: self.entity.id,
                })
            }
        })?;
        Ok(self.context.wrap(other, WrapOrigin::Loaded))
    }

    pub fn relationship_type(&self) -> Result<String> {
        self.with_backing(|store, relationship| Ok(store.relationship_type(&relationship)?))
    }
}

impl<S: GraphStore, K: Kind<S>> Clone for Wrapped<S, K> {
    fn clone(&self) -> Self {
        Self {
            context: self.context.clone(),
            entity: self.entity,
            binding: self.binding.clone(),
            _kind: PhantomData,
        }
    }
}

impl<S: GraphStore, K: Kind<S>> PartialEq for Wrapped<S, K> {
    fn eq(&self, other: &Self) -> bool {
        self.entity == other.entity
    }
}

impl<S: GraphStore, K: Kind<S>> Eq for Wrapped<S, K> {}

impl<S: GraphStore, K: Kind<S>> Hash for Wrapped<S, K> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.entity.hash(state);
    }
}

impl<S: GraphStore, K: Kind<S>> fmt::Debug for Wrapped<S, K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Wrapped")
            .field("kind", &K::KIND)
            .field("id", &self.entity.id)
            .field("context", &self.entity.context)
            .field(
                "binding",
                &match self.binding {
                    Binding::Held(_) => "held",
                    Binding::Lookup => "lookup",
                },
            )
            .finish()
    }
}

impl<S: GraphStore, K: Kind<S>> fmt::Display for Wrapped<S, K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.entity, f)
    }
}
