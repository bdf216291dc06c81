//! Lazily wrapping result cursors.

use stablegraph_store::IndexHits;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use crate::error::Result;

/// Turns a backing value into its wrapper.
pub type WrapFn<B, T> = Arc<dyn Fn(B) -> T + Send + Sync>;

/// A backing cursor whose elements are wrapped as they are produced.
///
/// The backing cursor is closed exactly once: by [`close`](Self::close),
/// by [`single`](Self::single), or on drop.
pub struct WrappedHits<H: IndexHits, T> {
    hits: H,
    wrap: WrapFn<H::Item, T>,
    closed: bool,
}

impl<H: IndexHits, T> WrappedHits<H, T> {
    pub fn new(hits: H, wrap: WrapFn<H::Item, T>) -> Self {
        Self {
            hits,
            wrap,
            closed: false,
        }
    }

    pub fn has_next(&self) -> bool {
        !self.closed && self.hits.has_next()
    }

    /// The only element, or `None` if there is none. Closes the cursor.
    pub fn single(&mut self) -> Result<Option<T>> {
        let result = self.hits.single();
        // the backing cursor closes itself in `single`, success or not
        self.closed = true;
        Ok(result?.map(|item| (self.wrap)(item)))
    }

    /// Total number of hits, consumed or not.
    pub fn size(&self) -> usize {
        self.hits.size()
    }

    pub fn current_score(&self) -> f32 {
        self.hits.current_score()
    }

    pub fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            self.hits.close();
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }
}

impl<H: IndexHits, T> Iterator for WrappedHits<H, T> {
    type Item = T;

    fn next(&mut self) -> Option<T> {
        if self.closed {
            return None;
        }
        self.hits.next().map(|item| (self.wrap)(item))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        if self.closed {
            (0, Some(0))
        } else {
            self.hits.size_hint()
        }
    }
}

impl<H: IndexHits, T> Drop for WrappedHits<H, T> {
    fn drop(&mut self) {
        self.close();
    }
}

impl<H: IndexHits + fmt::Debug, T> fmt::Debug for WrappedHits<H, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&self.hits, f)
    }
}

impl<H: IndexHits + fmt::Display, T> fmt::Display for WrappedHits<H, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.hits, f)
    }
}

impl<H: IndexHits + PartialEq, T> PartialEq for WrappedHits<H, T> {
    fn eq(&self, other: &Self) -> bool {
        self.hits == other.hits
    }
}

impl<H: IndexHits + Hash, T> Hash for WrappedHits<H, T> {
    fn hash<S: Hasher>(&self, state: &mut S) {
        self.hits.hash(state);
    }
}
