//! Operator-invoked manual merge of two persisted entities.
//!
//! Stronger than anything the automatic resolver does: the operator asserts
//! that two entities are the same real-world thing, and the engine collapses
//! them, provenance, relations and all. The mutation itself runs through the
//! store's atomic merge primitive, so a failure part-way leaves the graph
//! exactly as it was.

use std::collections::HashMap;

use thiserror::Error;
use tracing::{debug, info, info_span, warn};

use graphloom_core::{Entity, EntityId, EntityMergePlan, GraphStore, Relation, RelationId};

/// Why a manual merge was refused.
#[derive(Debug, Error)]
pub enum MergeError {
    /// The request cannot be satisfied as stated: unknown ids or entities
    /// from different graphs.
    #[error("invalid merge: {0}")]
    Validation(String),

    /// The request conflicts with the graph's current state: source and
    /// target are the same entity, or the target changed between read and
    /// apply. The graph is untouched either way.
    #[error("merge conflict: {0}")]
    Conflict(String),

    /// The store failed; the transaction was aborted.
    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

/// Operator request to collapse `source_id` into `target_id`.
#[derive(Debug, Clone)]
pub struct MergeRequest {
    pub source_id: EntityId,
    pub target_id: EntityId,
    /// Display name for the merged entity; defaults to the target's name.
    pub merged_name: Option<String>,
    /// Description for the merged entity; defaults to non-empty-wins between
    /// target and source (the target's unless it is empty).
    pub merged_description: Option<String>,
}

/// Executes manual merges against a graph store.
pub struct MergeOperator<'a> {
    store: &'a dyn GraphStore,
    dedup_relations: bool,
}

impl<'a> MergeOperator<'a> {
    pub fn new(store: &'a dyn GraphStore) -> Self {
        Self {
            store,
            dedup_relations: false,
        }
    }

    /// Enable the post-merge cleanup that collapses duplicate relation
    /// triples left behind by rewiring. Off by default: rewiring alone never
    /// drops information.
    pub fn with_relation_dedup(mut self, enabled: bool) -> Self {
        self.dedup_relations = enabled;
        self
    }

    /// Merge the source entity into the target and return the merged record.
    ///
    /// Provenance sets are unioned and frequencies summed; every relation
    /// incident to the source is rewired onto the target; the source is
    /// deleted. All of that applies atomically or not at all.
    pub fn merge(&self, request: &MergeRequest) -> Result<Entity, MergeError> {
        let span = info_span!(
            "graphloom.merge_entities",
            source_id = request.source_id,
            target_id = request.target_id,
        );
        let _guard = span.enter();

        if request.source_id == request.target_id {
            return Err(MergeError::Conflict(format!(
                "cannot merge entity {} into itself",
                request.source_id
            )));
        }
        let source = self
            .store
            .get_entity(request.source_id)?
            .ok_or_else(|| {
                MergeError::Validation(format!("source entity {} not found", request.source_id))
            })?;
        let target = self
            .store
            .get_entity(request.target_id)?
            .ok_or_else(|| {
                MergeError::Validation(format!("target entity {} not found", request.target_id))
            })?;
        if source.graph_id != target.graph_id {
            return Err(MergeError::Validation(format!(
                "entities {} and {} belong to different graphs ('{}' vs '{}')",
                source.id, target.id, source.graph_id, target.graph_id
            )));
        }

        // ── Build the merged target ────────────────────────────────────
        let mut merged = target.clone();
        merged.chunk_ids.extend(source.chunk_ids.iter().copied());
        merged.document_ids.extend(source.document_ids.iter().copied());
        merged.frequency += source.frequency;
        if let Some(name) = &request.merged_name {
            merged.name = name.clone();
        }
        merged.description = match &request.merged_description {
            Some(description) => description.clone(),
            None if target.description.is_empty() => source.description.clone(),
            None => target.description.clone(),
        };
        // merged.version still holds the version we read; the store rejects
        // the plan if the target moved since.

        let plan = EntityMergePlan {
            source_id: source.id,
            target: merged,
        };
        let merged = match self.store.merge_entities(&plan) {
            Ok(merged) => merged,
            Err(err) => {
                let target_moved = self
                    .store
                    .get_entity(request.target_id)
                    .ok()
                    .flatten()
                    .is_some_and(|t| t.version != plan.target.version);
                if target_moved {
                    return Err(MergeError::Conflict(format!(
                        "target entity {} changed during merge",
                        request.target_id
                    )));
                }
                return Err(MergeError::Store(err));
            }
        };

        info!(
            "Merged entity {} ('{}') into {} ('{}')",
            source.id, source.name, merged.id, merged.name
        );

        if self.dedup_relations {
            self.dedup_incident_relations(merged.id);
        }

        Ok(merged)
    }

    /// Collapse duplicate `(source, target, type)` triples incident to the
    /// merged entity, keeping the highest confidence per triple. Runs after
    /// the merge has committed, so failures are logged rather than returned.
    fn dedup_incident_relations(&self, id: EntityId) {
        let relations = match self.store.relations_for_entity(id) {
            Ok(relations) => relations,
            Err(err) => {
                warn!("Post-merge relation dedup skipped for entity {}: {:#}", id, err);
                return;
            }
        };

        let mut keep: HashMap<(EntityId, EntityId, String), Relation> = HashMap::new();
        let mut doomed: Vec<RelationId> = Vec::new();
        for relation in relations {
            let key = (
                relation.source_entity_id,
                relation.target_entity_id,
                relation.relation_type.clone(),
            );
            match keep.get_mut(&key) {
                Some(kept) => {
                    if relation.confidence > kept.confidence {
                        doomed.push(kept.id);
                        *kept = relation;
                    } else {
                        doomed.push(relation.id);
                    }
                }
                None => {
                    keep.insert(key, relation);
                }
            }
        }

        let removed = doomed.len();
        for relation_id in doomed {
            if let Err(err) = self.store.delete_relation(relation_id) {
                warn!("Failed to delete duplicate relation {}: {:#}", relation_id, err);
            }
        }
        if removed > 0 {
            debug!("Post-merge dedup removed {} duplicate relations around entity {}", removed, id);
        }
    }
}
