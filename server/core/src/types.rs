//! Core data model for the Graphloom knowledge-graph engine.
//!
//! Entities and relations are the persisted graph records; documents and
//! chunks are the provenance units owned by the relational store. Everything
//! here is plain data — behavior lives in the store implementations and the
//! ingestion pipeline.

use std::collections::BTreeSet;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

/// Unique identifier for an entity. Assigned by the graph store at persistence.
pub type EntityId = u64;

/// Unique identifier for a relation.
pub type RelationId = u64;

/// Unique identifier for a source document (owned by the relational store).
pub type DocumentId = u64;

/// Unique identifier for a chunk record.
pub type ChunkId = u64;

/// Current unix timestamp in seconds.
pub fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

// ---------------------------------------------------------------------------
// Document lifecycle
// ---------------------------------------------------------------------------

/// Processing status of a document: `Pending -> Processing -> {Completed, Failed}`.
///
/// `Completed` and `Failed` are terminal. The status is written back to the
/// relational store as soon as processing starts so concurrent readers
/// observe progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl DocumentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentStatus::Pending => "pending",
            DocumentStatus::Processing => "processing",
            DocumentStatus::Completed => "completed",
            DocumentStatus::Failed => "failed",
        }
    }

    /// Whether this status admits no further transitions.
    pub fn is_terminal(&self) -> bool {
        matches!(self, DocumentStatus::Completed | DocumentStatus::Failed)
    }
}

/// A source document owned by the relational store.
///
/// The engine only reads `id`/`graph_id`/`content` and writes back `status`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub id: DocumentId,
    pub graph_id: String,
    pub content: String,
    pub status: DocumentStatus,
    /// Unix seconds.
    pub created_at: u64,
    /// Unix seconds.
    pub updated_at: u64,
}

/// Fields for creating a document record; the store assigns id, timestamps
/// and the initial `Pending` status.
#[derive(Debug, Clone)]
pub struct NewDocument {
    pub graph_id: String,
    pub content: String,
}

/// A persisted chunk record: one split segment of a document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    pub id: ChunkId,
    pub document_id: DocumentId,
    /// Position of this chunk within the document's split, starting at 0.
    pub index: usize,
    pub text: String,
}

// ---------------------------------------------------------------------------
// Entities
// ---------------------------------------------------------------------------

/// A named thing of a given type within one graph.
///
/// Within one `graph_id` no two persisted entities may share the same
/// normalized `(name, type)` key; the resolution pipeline maintains that
/// invariant (stores do not enforce it).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    pub id: EntityId,
    /// Canonical display name.
    pub name: String,
    /// Type string from the entity taxonomy. Entities may outlive a taxonomy
    /// change, so stored types are not revalidated against the current list.
    pub entity_type: String,
    /// Free text, may be empty.
    pub description: String,
    pub graph_id: String,
    /// Provenance: chunks that mentioned this entity.
    pub chunk_ids: BTreeSet<ChunkId>,
    /// Provenance: documents that mentioned this entity.
    pub document_ids: BTreeSet<DocumentId>,
    /// Count of corroborating observations, always >= 1.
    pub frequency: u32,
    /// Optimistic-concurrency counter. Starts at 1; the store increments it
    /// on every successful conditional update.
    pub version: u64,
    /// Unix seconds.
    pub created_at: u64,
    /// Unix seconds.
    pub updated_at: u64,
}

/// Fields for creating an entity; the store assigns id, `version = 1` and
/// timestamps.
#[derive(Debug, Clone)]
pub struct NewEntity {
    pub name: String,
    pub entity_type: String,
    pub description: String,
    pub graph_id: String,
    pub chunk_ids: BTreeSet<ChunkId>,
    pub document_ids: BTreeSet<DocumentId>,
    pub frequency: u32,
}

// ---------------------------------------------------------------------------
// Relations
// ---------------------------------------------------------------------------

/// A directed, typed edge between two entities, scoped to one graph.
///
/// Never persisted with a dangling endpoint: both entities must exist in the
/// same graph when the relation is written, and relations are deleted when
/// either endpoint entity is deleted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Relation {
    pub id: RelationId,
    pub source_entity_id: EntityId,
    pub target_entity_id: EntityId,
    /// Type string from the relation taxonomy.
    pub relation_type: String,
    pub description: String,
    /// Extraction confidence in [0, 1].
    pub confidence: f32,
    pub graph_id: String,
}

impl Relation {
    /// Whether the given entity is either endpoint of this relation.
    pub fn touches(&self, id: EntityId) -> bool {
        self.source_entity_id == id || self.target_entity_id == id
    }
}

/// Fields for upserting a relation; the store assigns the id (or reuses the
/// id of an existing `(graph, source, target, type)` triple).
#[derive(Debug, Clone)]
pub struct NewRelation {
    pub source_entity_id: EntityId,
    pub target_entity_id: EntityId,
    pub relation_type: String,
    pub description: String,
    pub confidence: f32,
    pub graph_id: String,
}
