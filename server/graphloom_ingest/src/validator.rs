//! Relation validation: hallucination filtering and triple dedup.
//!
//! The extraction service is free to claim any relation it likes; this stage
//! is what keeps the graph honest. A relation survives only if both endpoint
//! names are canonical entities visible in the chunk the relation came from,
//! and its type is in the configured relation taxonomy. Endpoint membership
//! is tested on normalized names, so spelling variants merged during
//! canonicalization still ground their relations.

use std::collections::{HashMap, HashSet};

use tracing::debug;

use graphloom_core::ChunkId;

use crate::canonical::CanonicalCandidate;
use crate::similarity::normalize_name;
use crate::CandidateRelation;

/// A relation that passed validation, with endpoints pre-normalized for the
/// id-mapping step that follows entity application.
#[derive(Debug, Clone)]
pub struct ValidatedRelation {
    pub head: String,
    pub head_normalized: String,
    pub tail: String,
    pub tail_normalized: String,
    /// Canonical taxonomy spelling, not the raw extracted label, so the
    /// store-level triple key converges across documents.
    pub relation_type: String,
    pub description: String,
    pub confidence: f32,
    pub chunk_id: ChunkId,
}

/// Validation result for one document's relation candidates.
pub struct ValidationOutcome {
    pub relations: Vec<ValidatedRelation>,
    /// Candidates dropped as hallucinated (ungrounded endpoint or unknown
    /// type). Dedup collapses are not counted here.
    pub filtered: usize,
}

/// Validates relation candidates against the relation-type taxonomy.
pub struct RelationValidator<'a> {
    relation_types: &'a [String],
}

impl<'a> RelationValidator<'a> {
    pub fn new(relation_types: &'a [String]) -> Self {
        Self { relation_types }
    }

    /// Filter one document's relation candidates against the canonical
    /// entities, then collapse duplicate `(head, tail, type)` triples keeping
    /// the higher confidence (ties keep the first-seen).
    pub fn validate(
        &self,
        candidates: Vec<CandidateRelation>,
        canonical: &[CanonicalCandidate],
    ) -> ValidationOutcome {
        // Normalized entity names visible per chunk.
        let mut visible: HashMap<ChunkId, HashSet<&str>> = HashMap::new();
        for entity in canonical {
            for &chunk_id in &entity.chunk_ids {
                visible
                    .entry(chunk_id)
                    .or_default()
                    .insert(entity.normalized_name.as_str());
            }
        }

        // Lowercased taxonomy label -> configured canonical spelling.
        let taxonomy: HashMap<String, &str> = self
            .relation_types
            .iter()
            .map(|t| (t.trim().to_lowercase(), t.as_str()))
            .collect();

        let mut kept: Vec<ValidatedRelation> = Vec::new();
        let mut index: HashMap<(String, String, String), usize> = HashMap::new();
        let mut filtered = 0usize;

        for relation in candidates {
            let Some(&relation_type) = taxonomy.get(&relation.relation_type.trim().to_lowercase())
            else {
                filtered += 1;
                debug!(
                    "Filtered relation with unknown type '{}': {} -> {}",
                    relation.relation_type, relation.head, relation.tail
                );
                continue;
            };

            let head_normalized = normalize_name(&relation.head);
            let tail_normalized = normalize_name(&relation.tail);
            let grounded = visible.get(&relation.chunk_id).is_some_and(|names| {
                names.contains(head_normalized.as_str())
                    && names.contains(tail_normalized.as_str())
            });
            if !grounded {
                filtered += 1;
                debug!(
                    "Filtered ungrounded relation in chunk {}: {} -[{}]-> {}",
                    relation.chunk_id, relation.head, relation.relation_type, relation.tail
                );
                continue;
            }

            let triple = (
                head_normalized.clone(),
                tail_normalized.clone(),
                relation_type.to_string(),
            );
            let validated = ValidatedRelation {
                head: relation.head,
                head_normalized,
                tail: relation.tail,
                tail_normalized,
                relation_type: relation_type.to_string(),
                description: relation.description,
                confidence: relation.confidence,
                chunk_id: relation.chunk_id,
            };
            match index.get(&triple) {
                Some(&i) => {
                    if validated.confidence > kept[i].confidence {
                        kept[i] = validated;
                    }
                }
                None => {
                    index.insert(triple, kept.len());
                    kept.push(validated);
                }
            }
        }

        ValidationOutcome {
            relations: kept,
            filtered,
        }
    }
}
