//! The graph context: owner of the backing-store slot and the single place
//! where entities are wrapped and unwrapped.

use crate::branding::{assert_token, ContextToken};
use crate::config::{ContextConfig, Resolution};
use crate::entity::{Binding, EntityArg, EntityRef, Wrapped, WrappedNode, WrappedRelationship};
use crate::error::{Result, WrapError};
use crate::index::{NodeIndex, RelationshipIndex, WrappedIndex};
use crate::kind::{Kind, NodeKind, RelationshipKind};
use parking_lot::{Condvar, Mutex, RwLock};
use stablegraph_store::{BackingEntity, EntityId, EntityKind, GraphStore, InstanceId};
use std::fmt;
use std::time::Instant;
use std::sync::Arc;

/// Why a backing entity is crossing into wrapper space.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WrapOrigin {
    /// Just created through this context
    Created,
    /// Returned by a lookup, traversal or index query
    Loaded,
}

struct ContextInner<S> {
    token: ContextToken,
    config: ContextConfig,
    /// `None` once the context has been shut down.
    store: RwLock<Option<Arc<S>>>,
    /// Bumped after every change to the slot; `replaced` is signalled with it.
    generation: Mutex<u64>,
    replaced: Condvar,
}

/// Root handle over a backing store.
///
/// Cloning is cheap and yields the *same* context: clones share the token,
/// the store slot and the shut-down state.
pub struct GraphContext<S: GraphStore> {
    inner: Arc<ContextInner<S>>,
}

impl<S: GraphStore> Clone for GraphContext<S> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<S: GraphStore> PartialEq for GraphContext<S> {
    fn eq(&self, other: &Self) -> bool {
        self.inner.token == other.inner.token
    }
}

impl<S: GraphStore> Eq for GraphContext<S> {}

impl<S: GraphStore> fmt::Debug for GraphContext<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GraphContext")
            .field("token", &self.inner.token)
            .field("name", &self.inner.config.name)
            .field("resolution", &self.inner.config.resolution)
            .field("shut_down", &self.is_shut_down())
            .finish()
    }
}

impl<S: GraphStore> GraphContext<S> {
    pub fn new(store: S, config: ContextConfig) -> Self {
        let token = ContextToken::new();
        tracing::debug!(
            context = %token,
            name = config.name.as_deref().unwrap_or("-"),
            resolution = ?config.resolution,
            instance = %store.instance_id(),
            "opened graph context"
        );
        Self {
            inner: Arc::new(ContextInner {
                token,
                config,
                store: RwLock::new(Some(Arc::new(store))),
                generation: Mutex::new(0),
                replaced: Condvar::new(),
            }),
        }
    }

    pub fn with_resolution(store: S, resolution: Resolution) -> Self {
        Self::new(store, ContextConfig::with_resolution(resolution))
    }

    pub fn token(&self) -> ContextToken {
        self.inner.token
    }

    pub fn config(&self) -> &ContextConfig {
        &self.inner.config
    }

    pub fn resolution(&self) -> Resolution {
        self.inner.config.resolution
    }

    pub fn is_shut_down(&self) -> bool {
        self.inner.store.read().is_none()
    }

    pub(crate) fn ensure_open(&self) -> Result<()> {
        if self.is_shut_down() {
            return Err(self.shut_down_error());
        }
        Ok(())
    }

    fn shut_down_error(&self) -> WrapError {
        tracing::warn!(context = %self.inner.token, "operation on a shut-down graph context");
        WrapError::ContextShutDown
    }

    /// The store instance currently in the slot.
    ///
    /// Callers should not hold on to the returned handle across operations:
    /// the slot may be replaced at any time.
    pub fn store(&self) -> Result<Arc<S>> {
        let store = self.inner.store.read().clone();
        store.ok_or_else(|| self.shut_down_error())
    }

    /// Swap in a new store instance (role change) and return the previous one.
    pub fn replace_store(&self, store: S) -> Result<Arc<S>> {
        let next = Arc::new(store);
        let to = next.instance_id();
        let previous = {
            let mut slot = self.inner.store.write();
            match slot.as_mut() {
                Some(current) => std::mem::replace(current, next),
                None => return Err(self.shut_down_error()),
            }
        };
        tracing::info!(
            context = %self.inner.token,
            from = %previous.instance_id(),
            %to,
            "replaced backing store"
        );
        self.slot_changed();
        Ok(previous)
    }

    fn slot_changed(&self) {
        *self.inner.generation.lock() += 1;
        self.inner.replaced.notify_all();
    }

    /// Wait, at most for the configured grace period, until the slot holds an
    /// instance other than `retired`. `None` if it still does not.
    pub(crate) fn await_replacement(&self, retired: InstanceId) -> Result<Option<Arc<S>>> {
        let deadline = Instant::now() + self.inner.config.replacement_grace();
        let mut generation = self.inner.generation.lock();
        let mut timed_out = false;
        loop {
            let current = self.store()?;
            if current.instance_id() != retired {
                return Ok(Some(current));
            }
            if timed_out {
                tracing::warn!(
                    context = %self.inner.token,
                    instance = %retired,
                    "store instance retired without a replacement"
                );
                return Ok(None);
            }
            timed_out = self
                .inner
                .replaced
                .wait_until(&mut generation, deadline)
                .timed_out();
        }
    }

    /// Tear the context down and release its store. Every wrapper it
    /// produced becomes unusable.
    pub fn shutdown(&self) {
        let released = self.inner.store.write().take();
        if let Some(store) = released {
            tracing::info!(
                context = %self.inner.token,
                instance = %store.instance_id(),
                "graph context shut down"
            );
            self.slot_changed();
        }
    }

    // ========================================================================
    // Wrapping
    // ========================================================================

    /// Turn a backing entity into a wrapper according to the resolution policy.
    pub fn wrap<K: Kind<S>>(&self, backing: K::Backing, origin: WrapOrigin) -> Wrapped<S, K> {
        let entity = EntityRef::new(self.inner.token, backing.id(), K::KIND);
        tracing::trace!(%entity, ?origin, resolution = ?self.resolution(), "wrapping entity");
        let binding = match self.resolution() {
            Resolution::Direct => Binding::Held(backing),
            Resolution::Lookup => Binding::Lookup,
        };
        Wrapped::from_parts(self.clone(), entity, binding)
    }

    pub fn wrap_node(&self, node: S::Node) -> WrappedNode<S> {
        self.wrap::<NodeKind>(node, WrapOrigin::Loaded)
    }

    pub fn wrap_relationship(&self, relationship: S::Relationship) -> WrappedRelationship<S> {
        self.wrap::<RelationshipKind>(relationship, WrapOrigin::Loaded)
    }

    /// The backing entity behind `entity`, resolved now.
    ///
    /// Fails with [`WrapError::IdentityMismatch`] if `entity` was produced by
    /// another context.
    pub fn unwrap<K: Kind<S>>(&self, entity: &Wrapped<S, K>) -> Result<K::Backing> {
        assert_token(self.inner.token, entity.entity_ref().context())?;
        entity.resolve()
    }

    /// Like [`unwrap`](Self::unwrap), resolving against `store`.
    pub(crate) fn unwrap_in<K: Kind<S>>(
        &self,
        entity: &Wrapped<S, K>,
        store: &S,
    ) -> Result<K::Backing> {
        assert_token(self.inner.token, entity.entity_ref().context())?;
        entity.resolve_against(store)
    }

    /// Unwrap an argument that may already be a backing value.
    pub fn unwrap_arg<K: Kind<S>>(&self, arg: EntityArg<'_, S, K>) -> Result<K::Backing> {
        match arg {
            EntityArg::Wrapped(entity) => self.unwrap(entity),
            EntityArg::Backing(backing) => Ok(backing),
        }
    }

    /// `None` means "unconstrained" and passes through unchanged.
    pub fn unwrap_optional<K: Kind<S>>(
        &self,
        entity: Option<&Wrapped<S, K>>,
    ) -> Result<Option<K::Backing>> {
        entity.map(|e| self.unwrap(e)).transpose()
    }

    // ========================================================================
    // Entities
    // ========================================================================

    pub fn node_by_id(&self, id: EntityId) -> Result<WrappedNode<S>> {
        let node = self.store()?.node_by_id(id)?;
        Ok(self.wrap(node, WrapOrigin::Loaded))
    }

    pub fn relationship_by_id(&self, id: EntityId) -> Result<WrappedRelationship<S>> {
        let relationship = self.store()?.relationship_by_id(id)?;
        Ok(self.wrap(relationship, WrapOrigin::Loaded))
    }

    pub fn create_node(&self) -> Result<WrappedNode<S>> {
        let node = self.store()?.create_node()?;
        Ok(self.wrap(node, WrapOrigin::Created))
    }

    pub fn create_relationship(
        &self,
        from: &WrappedNode<S>,
        to: &WrappedNode<S>,
        rel_type: &str,
    ) -> Result<WrappedRelationship<S>> {
        assert_token(self.inner.token, from.entity_ref().context())?;
        from.create_relationship_to(to, rel_type)
    }

    // ========================================================================
    // Indexes
    // ========================================================================

    pub fn node_index(&self, name: &str) -> Result<NodeIndex<S>> {
        let index = self.store()?.node_index(name)?;
        Ok(WrappedIndex::new(self.clone(), index))
    }

    pub fn relationship_index(&self, name: &str) -> Result<RelationshipIndex<S>> {
        let index = self.store()?.relationship_index(name)?;
        Ok(WrappedIndex::new(self.clone(), index))
    }

    pub fn node_auto_index(&self) -> Result<NodeIndex<S>> {
        let index = self.store()?.node_auto_index()?;
        Ok(WrappedIndex::new(self.clone(), index))
    }

    pub fn relationship_auto_index(&self) -> Result<RelationshipIndex<S>> {
        let index = self.store()?.relationship_auto_index()?;
        Ok(WrappedIndex::new(self.clone(), index))
    }

    pub fn index_exists(&self, kind: EntityKind, name: &str) -> Result<bool> {
        Ok(self.store()?.index_exists(kind, name)?)
    }

    pub fn index_names(&self, kind: EntityKind) -> Result<Vec<String>> {
        Ok(self.store()?.index_names(kind)?)
    }
}
