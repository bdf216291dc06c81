//! Identity-stable wrappers over a replaceable graph store.
//!
//! A [`GraphContext`] owns the slot holding the current backing store and is
//! the only place where backing entities are wrapped or unwrapped. Wrappers
//! ([`WrappedNode`], [`WrappedRelationship`], [`WrappedIndex`],
//! [`WrappedHits`]) forward every call to the backing layer.
//!
//! With [`Resolution::Lookup`] (the default) a wrapper keeps only its
//! [`EntityRef`] and resolves the backing entity again on every call, so it
//! keeps working after the store instance is replaced:
//!
//! ```ignore
//! let ctx = GraphContext::new(MemoryStore::new(), ContextConfig::default());
//! let alice = ctx.create_node()?;
//! alice.set_property("name", "alice")?;
//!
//! ctx.replace_store(promoted_replica)?;
//! assert_eq!(alice.property("name")?, Some("alice".into()));
//! ```

pub mod branding;
pub mod config;
pub mod context;
pub mod entity;
pub mod error;
pub mod hits;
pub mod index;
pub mod kind;


pub use branding::{ContextToken, ContextTokenMismatch};
pub use config::{ContextConfig, Resolution};
pub use context::{GraphContext, WrapOrigin};
pub use entity::{EntityArg, EntityRef, Wrapped, WrappedNode, WrappedRelationship};
pub use error::{Result, WrapError};
pub use hits::{WrapFn, WrappedHits};
pub use index::{Hits, NodeIndex, RelationshipIndex, WrappedIndex};
pub use kind::{Kind, NodeKind, RelationshipKind};

pub use stablegraph_store::{Direction, EntityId, EntityKind, IndexAccess, PropertyValue};
