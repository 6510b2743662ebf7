//! # Graphloom Ingest
//!
//! Incremental entity resolution and graph-merge pipeline for the Graphloom
//! knowledge-graph engine.
//!
//! This crate provides:
//! - **Chunking** — deterministic document splitting — [`chunker`]
//! - **Extraction client** — HTTP client for the external candidate-extraction
//!   service — [`extractor::HttpExtractionClient`]
//! - **Local canonicalization** — in-document candidate dedup by normalized
//!   key and string similarity — [`canonical`]
//! - **Graph resolution** — matching candidates against persisted entities —
//!   [`resolver::GraphResolver`]
//! - **Relation validation** — hallucination filtering and triple dedup —
//!   [`validator`]
//! - **Merge orchestration** — the per-document pipeline and batch runner —
//!   [`pipeline::IngestionPipeline`]
//! - **Manual merge** — operator-invoked collapse of two persisted entities —
//!   [`merge`]
//! - **Background batch worker** — cancellable batch ingestion —
//!   [`worker::IngestWorker`]
//!
//! # Test Infrastructure
//!
//! All tests are mock-based and CI-safe: scripted [`ExtractionClient`]
//! implementations stand in for the external service, and the in-memory
//! stores from `graphloom_core` stand in for persistence. No network or
//! external process is required.

pub mod canonical;
pub mod chunker;
pub mod extractor;
pub mod merge;
pub mod pipeline;
pub mod resolver;
pub mod similarity;
pub mod validator;
pub mod worker;

use graphloom_core::ChunkId;

/// A candidate entity as returned by the extraction service for one chunk.
///
/// Validated once at the client boundary: by the time one of these exists,
/// `name` and `entity_type` are non-empty.
#[derive(Debug, Clone, PartialEq)]
pub struct ExtractedEntity {
    /// Entity text as extracted from the source.
    pub name: String,
    /// Entity type label (e.g., "material", "organization").
    pub entity_type: String,
    /// Short free-text description, may be empty.
    pub description: String,
}

/// A candidate relation as returned by the extraction service for one chunk.
#[derive(Debug, Clone, PartialEq)]
pub struct ExtractedRelation {
    /// Head (source) entity name.
    pub head: String,
    /// Relation type label (e.g., "causes").
    pub relation_type: String,
    /// Tail (target) entity name.
    pub tail: String,
    /// Short free-text description, may be empty.
    pub description: String,
    /// Extraction confidence in [0, 1]; 0.5 when the service omits it.
    pub confidence: f32,
}

/// Client trait for the external candidate-extraction service.
///
/// Implementations must degrade gracefully: a syntactically malformed
/// response is an empty candidate list, not an error. `Err` is reserved for
/// transport and service failures, which the pipeline treats as zero
/// candidates for the affected chunk.
pub trait ExtractionClient: Send + Sync {
    /// Extract entity candidates from one chunk of text, guided by the
    /// entity-type taxonomy.
    fn extract_entities(
        &self,
        text: &str,
        entity_types: &[String],
    ) -> anyhow::Result<Vec<ExtractedEntity>>;

    /// Extract relation candidates from one chunk of text, given the entity
    /// names visible in that chunk.
    fn extract_relations(
        &self,
        text: &str,
        entity_names: &[String],
    ) -> anyhow::Result<Vec<ExtractedRelation>>;
}

/// An extracted entity bound to its source chunk; the unit the Local
/// Canonicalizer consumes. Fresh candidates always start at `frequency = 1`.
#[derive(Debug, Clone)]
pub struct CandidateEntity {
    pub name: String,
    pub entity_type: String,
    pub description: String,
    pub chunk_id: ChunkId,
    pub frequency: u32,
}

impl CandidateEntity {
    /// Bind an extractor result to the chunk it came from.
    pub fn from_extracted(entity: ExtractedEntity, chunk_id: ChunkId) -> Self {
        Self {
            name: entity.name,
            entity_type: entity.entity_type,
            description: entity.description,
            chunk_id,
            frequency: 1,
        }
    }
}

/// An extracted relation bound to its source chunk.
#[derive(Debug, Clone)]
pub struct CandidateRelation {
    pub head: String,
    pub relation_type: String,
    pub tail: String,
    pub description: String,
    pub confidence: f32,
    pub chunk_id: ChunkId,
}

impl CandidateRelation {
    /// Bind an extractor result to the chunk it came from.
    pub fn from_extracted(relation: ExtractedRelation, chunk_id: ChunkId) -> Self {
        Self {
            head: relation.head,
            relation_type: relation.relation_type,
            tail: relation.tail,
            description: relation.description,
            confidence: relation.confidence,
            chunk_id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_candidate_entity_from_extracted() {
        let candidate = CandidateEntity::from_extracted(
            ExtractedEntity {
                name: "Steel-500".to_string(),
                entity_type: "material".to_string(),
                description: "alloy".to_string(),
            },
            7,
        );
        assert_eq!(candidate.name, "Steel-500");
        assert_eq!(candidate.chunk_id, 7);
        assert_eq!(candidate.frequency, 1);
    }

    #[test]
    fn test_candidate_relation_from_extracted() {
        let candidate = CandidateRelation::from_extracted(
            ExtractedRelation {
                head: "Boiler".to_string(),
                relation_type: "causes".to_string(),
                tail: "Overheating".to_string(),
                description: String::new(),
                confidence: 0.8,
            },
            3,
        );
        assert_eq!(candidate.head, "Boiler");
        assert_eq!(candidate.tail, "Overheating");
        assert_eq!(candidate.chunk_id, 3);
    }
}
