//! Cross-graph resolution: match canonical candidates against the entities
//! already persisted for a graph.
//!
//! Resolution is strictly read-only. It loads one bounded snapshot of the
//! graph's entities per document, then decides `NEW` or `EXISTING(id)` per
//! candidate; all writes happen later in the orchestrator. A failed snapshot
//! read degrades to an empty view flagged for metrics (everything resolves
//! `NEW`) instead of aborting the document.

use std::collections::HashMap;

use tracing::{debug, warn};

use graphloom_core::{EntityId, GraphStore};

use crate::canonical::CanonicalCandidate;
use crate::similarity::{candidate_key, lcs_ratio, normalize_name, same_type};

/// Outcome of resolving one canonical candidate against the graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    /// No persisted counterpart; the orchestrator will create a new entity.
    New,
    /// The candidate is the persisted entity with this id; the orchestrator
    /// will union provenance into it.
    Existing(EntityId),
}

/// One graph's persisted entities, preprocessed for matching: an exact-key
/// index plus per-entity normalized names for the similarity scan.
pub struct ExistingEntities {
    entries: Vec<ExistingEntry>,
    exact: HashMap<String, EntityId>,
    degraded: bool,
}

struct ExistingEntry {
    id: EntityId,
    normalized_name: String,
    entity_type: String,
}

impl ExistingEntities {
    /// An empty view; every candidate resolves `NEW` against it.
    pub fn empty() -> Self {
        Self {
            entries: Vec::new(),
            exact: HashMap::new(),
            degraded: false,
        }
    }

    /// An empty view standing in for a failed snapshot read. Matches like
    /// [`ExistingEntities::empty`], but the flag lets the orchestrator count
    /// the degradation.
    pub fn degraded() -> Self {
        Self {
            degraded: true,
            ..Self::empty()
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// True when this view replaced a failed snapshot read.
    pub fn is_degraded(&self) -> bool {
        self.degraded
    }
}

/// Read-only matcher against one graph's persisted entities.
pub struct GraphResolver<'a> {
    store: &'a dyn GraphStore,
    graph_merge_threshold: f64,
    max_existing_entities: usize,
}

impl<'a> GraphResolver<'a> {
    pub fn new(
        store: &'a dyn GraphStore,
        graph_merge_threshold: f64,
        max_existing_entities: usize,
    ) -> Self {
        Self {
            store,
            graph_merge_threshold,
            max_existing_entities,
        }
    }

    /// Load the matching view for `graph_id`, bounded by the configured max
    /// entity count. A store read failure is a logged degradation: the
    /// returned view is empty, flagged degraded, and ingestion proceeds with
    /// all-`NEW` resolutions.
    pub fn load_existing(&self, graph_id: &str) -> ExistingEntities {
        let entities = match self.store.list_entities(graph_id, None, self.max_existing_entities) {
            Ok(entities) => entities,
            Err(err) => {
                warn!(
                    "Failed to load existing entities for graph '{}', resolving all candidates as new: {:#}",
                    graph_id, err
                );
                return ExistingEntities::degraded();
            }
        };

        let mut entries = Vec::with_capacity(entities.len());
        let mut exact = HashMap::with_capacity(entities.len());
        for entity in &entities {
            let normalized = normalize_name(&entity.name);
            // First loaded entity wins a duplicated key; the store-side dedup
            // invariant makes duplicates an anomaly, not a normal case.
            exact
                .entry(candidate_key(&normalized, &entity.entity_type))
                .or_insert(entity.id);
            entries.push(ExistingEntry {
                id: entity.id,
                normalized_name: normalized,
                entity_type: entity.entity_type.clone(),
            });
        }

        debug!(
            "Loaded {} existing entities for graph '{}'",
            entries.len(),
            graph_id
        );
        ExistingEntities {
            entries,
            exact,
            degraded: false,
        }
    }

    /// Resolve one candidate: exact normalized-key match first, then the best
    /// same-type similarity at or above the cross-graph threshold (ties keep
    /// the first-loaded entity), else `NEW`.
    pub fn resolve(
        &self,
        candidate: &CanonicalCandidate,
        existing: &ExistingEntities,
    ) -> Resolution {
        if let Some(&id) = existing.exact.get(&candidate.key()) {
            return Resolution::Existing(id);
        }

        let mut best: Option<(EntityId, f64)> = None;
        for entry in &existing.entries {
            if !same_type(&entry.entity_type, &candidate.entity_type) {
                continue;
            }
            let score = lcs_ratio(&candidate.normalized_name, &entry.normalized_name);
            if score >= self.graph_merge_threshold {
                // Strictly-greater keeps the first-loaded entity on ties.
                if best.map_or(true, |(_, best_score)| score > best_score) {
                    best = Some((entry.id, score));
                }
            }
        }

        match best {
            Some((id, _)) => Resolution::Existing(id),
            None => Resolution::New,
        }
    }
}
