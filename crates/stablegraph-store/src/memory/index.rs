//! Manual and automatic indexes over the in-memory graph.
//!
//! Query text understood by [`MemoryIndex`]:
//!
//! - `query_key(key, pattern)` with `pattern` one of `value`, `prefix*`, `*`
//! - `query("key:pattern")`, where `key` may itself be `*`
//!
//! Exact matches score `1.0`; prefix matches score the fraction of the term
//! covered by the prefix. Hits are returned in ascending id order.

use super::{GraphData, Instance, MemoryEntity, MemoryNode, MemoryRelationship};
use crate::{
    BackingEntity, BackingIndex, BackingRelationshipIndex, EntityId, EntityKind, IndexAccess,
    IndexHits, PropertyValue, StoreError, StoreResult,
};
use std::collections::{BTreeMap, VecDeque};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::marker::PhantomData;
use std::sync::atomic::Ordering;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum IndexSource {
    /// Explicit postings maintained through `add`/`remove`.
    Manual,
    /// Read-only view derived from auto-indexed property keys.
    Auto,
}

// ============================================================================
// Query patterns
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
enum Pattern {
    Any,
    Exact(String),
    Prefix(String),
}

impl Pattern {
    fn parse(text: &str) -> StoreResult<Self> {
        let invalid = |reason: &str| StoreError::InvalidQuery {
            query: text.to_string(),
            reason: reason.to_string(),
        };
        let text = text.trim();
        if text.is_empty() {
            return Err(invalid("empty pattern"));
        }
        if text == "*" {
            return Ok(Pattern::Any);
        }
        match text.strip_suffix('*') {
            Some(prefix) if prefix.contains('*') => Err(invalid("`*` is only allowed at the end")),
            Some(prefix) => Ok(Pattern::Prefix(prefix.to_string())),
            None if text.contains('*') => Err(invalid("`*` is only allowed at the end")),
            None => Ok(Pattern::Exact(text.to_string())),
        }
    }

    fn score(&self, term: &str) -> Option<f32> {
        match self {
            Pattern::Any => Some(1.0),
            Pattern::Exact(value) => (term == value).then_some(1.0),
            Pattern::Prefix(prefix) => term
                .starts_with(prefix.as_str())
                .then(|| prefix.len() as f32 / term.len().max(1) as f32),
        }
    }
}

/// Split `key:pattern`. A key of `*` matches every key.
fn parse_query(text: &str) -> StoreResult<(Option<String>, Pattern)> {
    let (key, pattern) = text
        .split_once(':')
        .ok_or_else(|| StoreError::InvalidQuery {
            query: text.to_string(),
            reason: "expected `key:pattern`".to_string(),
        })?;
    let key = key.trim();
    if key.is_empty() {
        return Err(StoreError::InvalidQuery {
            query: text.to_string(),
            reason: "empty key".to_string(),
        });
    }
    let key = (key != "*").then(|| key.to_string());
    Ok((key, Pattern::parse(pattern)?))
}

type Matches = BTreeMap<EntityId, f32>;

fn record(matches: &mut Matches, id: EntityId, score: f32) {
    let entry = matches.entry(id).or_insert(score);
    if score > *entry {
        *entry = score;
    }
}

impl GraphData {
    fn index_matches(
        &self,
        kind: EntityKind,
        name: &str,
        source: IndexSource,
        key: Option<&str>,
        pattern: &Pattern,
    ) -> StoreResult<Matches> {
        let mut matches = Matches::new();
        match source {
            IndexSource::Manual => {
                let postings = self
                    .indexes
                    .get(&(kind, name.to_string()))
                    .ok_or_else(|| StoreError::IndexNotFound {
                        kind,
                        name: name.to_string(),
                    })?;
                for (_, by_term) in postings
                    .entries
                    .iter()
                    .filter(|(k, _)| key.map_or(true, |key| key == k.as_str()))
                {
                    for (term, ids) in by_term {
                        if let Some(score) = pattern.score(term) {
                            for id in ids.iter() {
                                record(&mut matches, id, score);
                            }
                        }
                    }
                }
            }
            IndexSource::Auto => {
                let auto_keys = match kind {
                    EntityKind::Node => &self.auto_index_node_keys,
                    EntityKind::Relationship => &self.auto_index_relationship_keys,
                };
                let entities: Vec<(EntityId, &super::Properties)> = match kind {
                    EntityKind::Node => self
                        .nodes
                        .iter()
                        .map(|(id, n)| (*id, &n.properties))
                        .collect(),
                    EntityKind::Relationship => self
                        .relationships
                        .iter()
                        .map(|(id, r)| (*id, &r.properties))
                        .collect(),
                };
                for (id, props) in entities {
                    for (k, value) in props {
                        if !auto_keys.contains(k) || key.map_or(false, |key| key != k.as_str()) {
                            continue;
                        }
                        for term in value.index_terms() {
                            if let Some(score) = pattern.score(&term) {
                                record(&mut matches, id, score);
                            }
                        }
                    }
                }
            }
        }
        Ok(matches)
    }

    fn exact_matches(
        &self,
        kind: EntityKind,
        name: &str,
        source: IndexSource,
        key: &str,
        value: &PropertyValue,
    ) -> StoreResult<Matches> {
        let mut matches = Matches::new();
        for term in value.index_terms() {
            let found =
                self.index_matches(kind, name, source, Some(key), &Pattern::Exact(term))?;
            for (id, score) in found {
                record(&mut matches, id, score);
            }
        }
        Ok(matches)
    }

    fn filter_between(
        &self,
        matches: Matches,
        start: Option<EntityId>,
        end: Option<EntityId>,
    ) -> Matches {
        matches
            .into_iter()
            .filter(|(id, _)| match self.relationships.get(id) {
                Some(rel) => {
                    start.map_or(true, |s| rel.start == s) && end.map_or(true, |e| rel.end == e)
                }
                None => false,
            })
            .collect()
    }
}

// ============================================================================
// Index handle
// ============================================================================

/// Handle to a manual index or an auto-index view.
pub struct MemoryIndex<E> {
    name: String,
    source: IndexSource,
    instance: Arc<Instance>,
    _entity: PhantomData<fn() -> E>,
}

impl<E> Clone for MemoryIndex<E> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            source: self.source,
            instance: Arc::clone(&self.instance),
            _entity: PhantomData,
        }
    }
}

impl<E> fmt::Debug for MemoryIndex<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryIndex")
            .field("name", &self.name)
            .field("source", &self.source)
            .field("instance", &self.instance.id)
            .finish()
    }
}

impl<E: MemoryEntity> MemoryIndex<E> {
    pub(super) fn new(name: &str, source: IndexSource, instance: Arc<Instance>) -> Self {
        Self {
            name: name.to_string(),
            source,
            instance,
            _entity: PhantomData,
        }
    }

    fn ensure_writable(&self) -> StoreResult<()> {
        match self.source {
            IndexSource::Manual => Ok(()),
            IndexSource::Auto => Err(StoreError::ReadOnly {
                index: self.name.clone(),
            }),
        }
    }

    fn check_entity(&self, data: &GraphData, entity: &E) -> StoreResult<()> {
        let handle = entity.handle();
        handle.instance.ensure_live()?;
        if handle.database != data.database {
            return Err(StoreError::Constraint(format!(
                "{} {} belongs to {}, index `{}` to {}",
                E::KIND,
                handle.id,
                handle.database,
                self.name,
                data.database
            )));
        }
        data.ensure_entity(E::KIND, handle.id)
    }

    fn hits(&self, data: &GraphData, matches: Matches) -> MemoryHits<E> {
        let hits = matches
            .into_iter()
            .map(|(id, score)| {
                let handle = super::EntityHandle {
                    id,
                    database: data.database,
                    instance: Arc::clone(&self.instance),
                };
                (E::from_handle(handle), score)
            })
            .collect();
        MemoryHits::new(&self.name, hits, Arc::clone(&self.instance))
    }

    fn mutate(&self, entity: &E, f: impl FnOnce(&mut super::Postings, EntityId)) -> StoreResult<()> {
        self.ensure_writable()?;
        let mut data = self.instance.write()?;
        self.check_entity(&data, entity)?;
        let postings = data.postings_mut(E::KIND, &self.name)?;
        f(postings, entity.id());
        Ok(())
    }
}

impl<E: MemoryEntity> BackingIndex<E> for MemoryIndex<E> {
    type Hits = MemoryHits<E>;

    fn name(&self) -> &str {
        &self.name
    }

    fn access(&self) -> IndexAccess {
        match self.source {
            IndexSource::Manual => IndexAccess::ReadWrite,
            IndexSource::Auto => IndexAccess::ReadOnly,
        }
    }

    fn get(&self, key: &str, value: &PropertyValue) -> StoreResult<MemoryHits<E>> {
        let data = self.instance.read()?;
        let matches = data.exact_matches(E::KIND, &self.name, self.source, key, value)?;
        Ok(self.hits(&data, matches))
    }

    fn query_key(&self, key: &str, query: &str) -> StoreResult<MemoryHits<E>> {
        let pattern = Pattern::parse(query)?;
        let data = self.instance.read()?;
        let matches = data.index_matches(E::KIND, &self.name, self.source, Some(key), &pattern)?;
        Ok(self.hits(&data, matches))
    }

    fn query(&self, query: &str) -> StoreResult<MemoryHits<E>> {
        let (key, pattern) = parse_query(query)?;
        let data = self.instance.read()?;
        let matches =
            data.index_matches(E::KIND, &self.name, self.source, key.as_deref(), &pattern)?;
        Ok(self.hits(&data, matches))
    }

    fn add(&self, entity: &E, key: &str, value: &PropertyValue) -> StoreResult<()> {
        let terms = value.index_terms();
        self.mutate(entity, |postings, id| postings.insert(key, &terms, id))
    }

    fn remove(&self, entity: &E, key: &str, value: &PropertyValue) -> StoreResult<()> {
        let terms = value.index_terms();
        self.mutate(entity, |postings, id| postings.remove_terms(key, &terms, id))
    }

    fn remove_key(&self, entity: &E, key: &str) -> StoreResult<()> {
        self.mutate(entity, |postings, id| postings.remove_key(key, id))
    }

    fn remove_entity(&self, entity: &E) -> StoreResult<()> {
        self.mutate(entity, |postings, id| postings.remove_entity(id))
    }

    fn delete(&self) -> StoreResult<()> {
        self.ensure_writable()?;
        let mut data = self.instance.write()?;
        data.indexes
            .remove(&(E::KIND, self.name.clone()))
            .ok_or_else(|| StoreError::IndexNotFound {
                kind: E::KIND,
                name: self.name.clone(),
            })?;
        tracing::debug!(kind = %E::KIND, index = %self.name, "deleted index");
        Ok(())
    }
}

impl BackingRelationshipIndex<MemoryRelationship, MemoryNode> for MemoryIndex<MemoryRelationship> {
    fn get_between(
        &self,
        key: &str,
        value: Option<&PropertyValue>,
        start: Option<&MemoryNode>,
        end: Option<&MemoryNode>,
    ) -> StoreResult<MemoryHits<MemoryRelationship>> {
        let data = self.instance.read()?;
        let kind = EntityKind::Relationship;
        let matches = match value {
            Some(value) => data.exact_matches(kind, &self.name, self.source, key, value)?,
            None => data.index_matches(kind, &self.name, self.source, Some(key), &Pattern::Any)?,
        };
        let matches = data.filter_between(matches, start.map(|n| n.id()), end.map(|n| n.id()));
        Ok(self.hits(&data, matches))
    }

    fn query_key_between(
        &self,
        key: &str,
        query: Option<&str>,
        start: Option<&MemoryNode>,
        end: Option<&MemoryNode>,
    ) -> StoreResult<MemoryHits<MemoryRelationship>> {
        let pattern = query.map(Pattern::parse).transpose()?.unwrap_or(Pattern::Any);
        let data = self.instance.read()?;
        let matches = data.index_matches(
            EntityKind::Relationship,
            &self.name,
            self.source,
            Some(key),
            &pattern,
        )?;
        let matches = data.filter_between(matches, start.map(|n| n.id()), end.map(|n| n.id()));
        Ok(self.hits(&data, matches))
    }

    fn query_between(
        &self,
        query: Option<&str>,
        start: Option<&MemoryNode>,
        end: Option<&MemoryNode>,
    ) -> StoreResult<MemoryHits<MemoryRelationship>> {
        let (key, pattern) = match query {
            Some(query) => parse_query(query)?,
            None => (None, Pattern::Any),
        };
        let data = self.instance.read()?;
        let matches = data.index_matches(
            EntityKind::Relationship,
            &self.name,
            self.source,
            key.as_deref(),
            &pattern,
        )?;
        let matches = data.filter_between(matches, start.map(|n| n.id()), end.map(|n| n.id()));
        Ok(self.hits(&data, matches))
    }
}

// ============================================================================
// Cursor
// ============================================================================

/// Materialized hits of one index lookup.
///
/// Counts as an open cursor of its instance until [`IndexHits::close`] runs.
pub struct MemoryHits<E> {
    index: String,
    pending: VecDeque<(E, f32)>,
    total: usize,
    score: f32,
    closed: bool,
    instance: Arc<Instance>,
}

impl<E> MemoryHits<E> {
    fn new(index: &str, hits: Vec<(E, f32)>, instance: Arc<Instance>) -> Self {
        instance.open_cursors.fetch_add(1, Ordering::AcqRel);
        Self {
            index: index.to_string(),
            total: hits.len(),
            pending: hits.into(),
            score: 0.0,
            closed: false,
            instance,
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }
}

impl<E> Iterator for MemoryHits<E> {
    type Item = E;

    fn next(&mut self) -> Option<E> {
        if self.closed {
            return None;
        }
        let (entity, score) = self.pending.pop_front()?;
        self.score = score;
        Some(entity)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = if self.closed { 0 } else { self.pending.len() };
        (remaining, Some(remaining))
    }
}

impl<E> IndexHits for MemoryHits<E> {
    fn has_next(&self) -> bool {
        !self.closed && !self.pending.is_empty()
    }

    fn single(&mut self) -> StoreResult<Option<E>> {
        let result = match self.pending.len() {
            0 => Ok(None),
            1 => Ok(self.next()),
            count => Err(StoreError::MultipleResults { count }),
        };
        self.close();
        result
    }

    fn size(&self) -> usize {
        self.total
    }

    fn current_score(&self) -> f32 {
        self.score
    }

    fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.pending.clear();
        self.instance.open_cursors.fetch_sub(1, Ordering::AcqRel);
        tracing::trace!(index = %self.index, size = self.total, "closed hits");
    }
}

impl<E: PartialEq> PartialEq for MemoryHits<E> {
    fn eq(&self, other: &Self) -> bool {
        self.index == other.index
            && self.total == other.total
            && self.closed == other.closed
            && self.pending == other.pending
    }
}

// Scores are left out: equal cursors hold equal entities, whatever the scores.
impl<E: Hash> Hash for MemoryHits<E> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.index.hash(state);
        self.total.hash(state);
        self.closed.hash(state);
        for (entity, _) in &self.pending {
            entity.hash(state);
        }
    }
}

impl<E> fmt::Debug for MemoryHits<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryHits")
            .field("index", &self.index)
            .field("size", &self.total)
            .field("remaining", &self.pending.len())
            .field("closed", &self.closed)
            .finish()
    }
}

impl<E> fmt::Display for MemoryHits<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "hits(index={}, size={})", self.index, self.total)
    }
}
