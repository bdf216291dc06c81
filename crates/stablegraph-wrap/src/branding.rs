//! Runtime “branding” of wrappers with the context that produced them.
//!
//! Mixing entities from two contexts is never valid, but Rust cannot express
//! “this wrapper belongs to *that* context” in the type system. Instead each
//! [`GraphContext`](crate::GraphContext) gets a fresh `ContextToken`, every
//! wrapper carries the token of its context, and the context checks token
//! equality whenever a wrapper crosses back into it.
//!
//! Tokens are process-local and never serialized.

use std::num::NonZeroU64;
use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_CONTEXT_TOKEN: AtomicU64 = AtomicU64::new(1);

/// A process-local token identifying one `GraphContext`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContextToken(NonZeroU64);

impl ContextToken {
    pub fn new() -> Self {
        let raw = NEXT_CONTEXT_TOKEN.fetch_add(1, Ordering::Relaxed);
        Self(NonZeroU64::new(raw).expect("NEXT_CONTEXT_TOKEN starts at 1"))
    }

    pub fn raw(self) -> u64 {
        self.0.get()
    }
}

impl Default for ContextToken {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ContextToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ctx#{}", self.raw())
    }
}

/// A wrapper was handed to a context other than the one that produced it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContextTokenMismatch {
    /// The context performing the call
    pub expected: ContextToken,
    /// The context the wrapper belongs to
    pub actual: ContextToken,
}

impl std::fmt::Display for ContextTokenMismatch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "context token mismatch (expected {}, got {})",
            self.expected, self.actual
        )
    }
}

impl std::error::Error for ContextTokenMismatch {}

/// Check that a value branded with `actual` may be used by context `expected`.
pub fn assert_token(expected: ContextToken, actual: ContextToken) -> Result<(), ContextTokenMismatch> {
    if expected != actual {
        return Err(ContextTokenMismatch { expected, actual });
    }
    Ok(())
}
