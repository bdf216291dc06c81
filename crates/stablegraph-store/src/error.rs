use crate::{EntityId, EntityKind, InstanceId};

/// Errors reported by a backing store.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum StoreError {
    #[error("{kind} {id} not found")]
    NotFound { kind: EntityKind, id: EntityId },
    #[error("store {instance} has been retired")]
    Retired { instance: InstanceId },
    #[error("index `{index}` is read-only")]
    ReadOnly { index: String },
    #[error("{kind} index `{name}` does not exist")]
    IndexNotFound { kind: EntityKind, name: String },
    #[error("invalid query `{query}`: {reason}")]
    InvalidQuery { query: String, reason: String },
    #[error("expected at most one hit, found {count}")]
    MultipleResults { count: usize },
    #[error("constraint violation: {0}")]
    Constraint(String),
    #[error("snapshot error: {0}")]
    Snapshot(String),
}

pub type StoreResult<T> = Result<T, StoreError>;
