use crate::branding::ContextTokenMismatch;
use stablegraph_store::{EntityId, EntityKind, StoreError};

/// Errors surfaced by the wrapping layer.
///
/// Store failures other than a missing entity or a read-only index pass
/// through unchanged as [`WrapError::Store`].
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum WrapError {
    #[error("{kind} {id} not found")]
    NotFound { kind: EntityKind, id: EntityId },
    #[error("`{operation}` is not supported by read-only index `{index}`")]
    UnsupportedOperation { operation: String, index: String },
    #[error("identity mismatch: {0}")]
    IdentityMismatch(#[from] ContextTokenMismatch),
    #[error("node {node} is not an end point of relationship {relationship}")]
    NotConnected {
        node: EntityId,
        relationship: EntityId,
    },
    #[error("graph context has been shut down")]
    ContextShutDown,
    #[error(transparent)]
    Store(StoreError),
}

impl From<StoreError> for WrapError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound { kind, id } => WrapError::NotFound { kind, id },
            StoreError::ReadOnly { index } => WrapError::UnsupportedOperation {
                operation: "mutate".to_string(),
                index,
            },
            other => WrapError::Store(other),
        }
    }
}

pub type Result<T, E = WrapError> = std::result::Result<T, E>;
