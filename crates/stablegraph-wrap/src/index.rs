//! Index wrappers.
//!
//! A [`WrappedIndex`] delegates to a backing index, unwrapping entity
//! arguments on the way in and wrapping cursors on the way out. Whether the
//! index accepts mutations is decided by its [`IndexAccess`] flag alone.

use crate::context::{GraphContext, WrapOrigin};
use crate::entity::{EntityArg, Wrapped, WrappedNode};
use crate::error::{Result, WrapError};
use crate::hits::{WrapFn, WrappedHits};
use crate::kind::{Kind, NodeKind, RelationshipKind};
use stablegraph_store::{
    BackingIndex, BackingRelationshipIndex, EntityKind, GraphStore, IndexAccess, PropertyValue,
};
use std::fmt;
use std::sync::Arc;

/// Cursor returned by queries on a [`WrappedIndex`].
pub type Hits<S, K, I> =
    WrappedHits<<I as BackingIndex<<K as Kind<S>>::Backing>>::Hits, Wrapped<S, K>>;

pub type NodeIndex<S> = WrappedIndex<S, NodeKind, <S as GraphStore>::NodeIndex>;
pub type RelationshipIndex<S> =
    WrappedIndex<S, RelationshipKind, <S as GraphStore>::RelationshipIndex>;

pub struct WrappedIndex<S: GraphStore, K: Kind<S>, I> {
    context: GraphContext<S>,
    index: I,
    wrap: WrapFn<K::Backing, Wrapped<S, K>>,
}

impl<S: GraphStore, K: Kind<S>, I: BackingIndex<K::Backing>> WrappedIndex<S, K, I> {
    /// Wrap `index`; hits are wrapped by `context`.
    pub fn new(context: GraphContext<S>, index: I) -> Self {
        let wrapping = context.clone();
        let wrap: WrapFn<K::Backing, Wrapped<S, K>> =
            Arc::new(move |backing| wrapping.wrap::<K>(backing, WrapOrigin::Loaded));
        Self::with_wrap_fn(context, index, wrap)
    }

    /// Wrap `index` with a caller-supplied wrap function for its hits.
    pub fn with_wrap_fn(
        context: GraphContext<S>,
        index: I,
        wrap: WrapFn<K::Backing, Wrapped<S, K>>,
    ) -> Self {
        tracing::debug!(
            context = %context.token(),
            index = index.name(),
            kind = %K::KIND,
            access = ?index.access(),
            "wrapped index"
        );
        Self {
            context,
            index,
            wrap,
        }
    }

    pub fn name(&self) -> &str {
        self.index.name()
    }

    pub fn entity_kind(&self) -> EntityKind {
        self.index.entity_kind()
    }

    pub fn access(&self) -> IndexAccess {
        self.index.access()
    }

    pub fn is_read_only(&self) -> bool {
        !self.access().is_writable()
    }

    pub fn context(&self) -> &GraphContext<S> {
        &self.context
    }

    fn ensure_writable(&self, operation: &str) -> Result<()> {
        self.context.ensure_open()?;
        if self.is_read_only() {
            tracing::warn!(index = self.name(), operation, "mutation rejected by read-only index");
            return Err(WrapError::UnsupportedOperation {
                operation: operation.to_string(),
                index: self.name().to_string(),
            });
        }
        Ok(())
    }

    fn hits(&self, hits: I::Hits) -> Hits<S, K, I> {
        WrappedHits::new(hits, Arc::clone(&self.wrap))
    }

    // ========================================================================
    // Mutation
    // ========================================================================

    pub fn add<'a>(
        &self,
        entity: impl Into<EntityArg<'a, S, K>>,
        key: &str,
        value: impl Into<PropertyValue>,
    ) -> Result<()> {
        self.ensure_writable("add")?;
        let entity = self.context.unwrap_arg(entity.into())?;
        Ok(self.index.add(&entity, key, &value.into())?)
    }

    pub fn remove<'a>(
        &self,
        entity: impl Into<EntityArg<'a, S, K>>,
        key: &str,
        value: impl Into<PropertyValue>,
    ) -> Result<()> {
        self.ensure_writable("remove")?;
        let entity = self.context.unwrap_arg(entity.into())?;
        Ok(self.index.remove(&entity, key, &value.into())?)
    }

    pub fn remove_key<'a>(&self, entity: impl Into<EntityArg<'a, S, K>>, key: &str) -> Result<()> {
        self.ensure_writable("remove_key")?;
        let entity = self.context.unwrap_arg(entity.into())?;
        Ok(self.index.remove_key(&entity, key)?)
    }

    pub fn remove_entity<'a>(&self, entity: impl Into<EntityArg<'a, S, K>>) -> Result<()> {
        self.ensure_writable("remove_entity")?;
        let entity = self.context.unwrap_arg(entity.into())?;
        Ok(self.index.remove_entity(&entity)?)
    }

    /// Drop the whole index.
    pub fn delete(&self) -> Result<()> {
        self.ensure_writable("delete")?;
        Ok(self.index.delete()?)
    }

    // ========================================================================
    // Queries
    // ========================================================================

    pub fn get(&self, key: &str, value: impl Into<PropertyValue>) -> Result<Hits<S, K, I>> {
        self.context.ensure_open()?;
        let hits = self.index.get(key, &value.into())?;
        Ok(self.hits(hits))
    }

    pub fn query_key(&self, key: &str, query: &str) -> Result<Hits<S, K, I>> {
        self.context.ensure_open()?;
        let hits = self.index.query_key(key, query)?;
        Ok(self.hits(hits))
    }

    pub fn query(&self, query: &str) -> Result<Hits<S, K, I>> {
        self.context.ensure_open()?;
        let hits = self.index.query(query)?;
        Ok(self.hits(hits))
    }
}

/// End-point constrained lookups. `None` leaves a constraint open.
impl<S: GraphStore> WrappedIndex<S, RelationshipKind, S::RelationshipIndex> {
    pub fn get_between(
        &self,
        key: &str,
        value: Option<&PropertyValue>,
        start: Option<&WrappedNode<S>>,
        end: Option<&WrappedNode<S>>,
    ) -> Result<Hits<S, RelationshipKind, S::RelationshipIndex>> {
        self.context.ensure_open()?;
        let start = self.context.unwrap_optional(start)?;
        let end = self.context.unwrap_optional(end)?;
        let hits = self
            .index
            .get_between(key, value, start.as_ref(), end.as_ref())?;
        Ok(self.hits(hits))
    }

    pub fn query_key_between(
        &self,
        key: &str,
        query: Option<&str>,
        start: Option<&WrappedNode<S>>,
        end: Option<&WrappedNode<S>>,
    ) -> Result<Hits<S, RelationshipKind, S::RelationshipIndex>> {
        self.context.ensure_open()?;
        let start = self.context.unwrap_optional(start)?;
        let end = self.context.unwrap_optional(end)?;
        let hits = self
            .index
            .query_key_between(key, query, start.as_ref(), end.as_ref())?;
        Ok(self.hits(hits))
    }

    pub fn query_between(
        &self,
        query: Option<&str>,
        start: Option<&WrappedNode<S>>,
        end: Option<&WrappedNode<S>>,
    ) -> Result<Hits<S, RelationshipKind, S::RelationshipIndex>> {
        self.context.ensure_open()?;
        let start = self.context.unwrap_optional(start)?;
        let end = self.context.unwrap_optional(end)?;
        let hits = self
            .index
            .query_between(query, start.as_ref(), end.as_ref())?;
        Ok(self.hits(hits))
    }
}

impl<S: GraphStore, K: Kind<S>, I: BackingIndex<K::Backing>> fmt::Debug for WrappedIndex<S, K, I> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WrappedIndex")
            .field("name", &self.index.name())
            .field("kind", &K::KIND)
            .field("access", &self.index.access())
            .field("context", &self.context.token())
            .finish()
    }
}
