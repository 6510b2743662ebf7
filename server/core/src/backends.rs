//! Store abstraction traits for pluggable persistence backends.
//!
//! The engine talks to two external stores: a relational store for documents
//! and chunk provenance records, and a property-graph store for entities and
//! relations. Both are trait objects so hosts can plug in their own backends
//! while tests and embedded deployments use the in-memory implementations
//! from [`crate::memory`].

use anyhow::Result;

use crate::types::{
    Chunk, Document, DocumentId, DocumentStatus, Entity, EntityId, NewDocument, NewEntity,
    NewRelation, Relation, RelationId,
};

// ---------------------------------------------------------------------------
// Document store
// ---------------------------------------------------------------------------

/// Relational-store operations used by the ingestion pipeline.
pub trait DocumentStore: Send + Sync {
    /// Create a document record in `Pending` status.
    fn create_document(&self, draft: NewDocument) -> Result<Document>;

    /// Point-read a document by id.
    fn get_document(&self, id: DocumentId) -> Result<Option<Document>>;

    /// Write back a document's processing status.
    fn set_document_status(&self, id: DocumentId, status: DocumentStatus) -> Result<()>;

    /// Persist the chunk records for a document, in split order.
    ///
    /// Re-persisting an unchanged split must return the existing records with
    /// their original ids (re-ingestion converges); a changed split replaces
    /// the document's chunk set.
    fn create_chunks(&self, document_id: DocumentId, texts: &[String]) -> Result<Vec<Chunk>>;

    /// List a document's chunk records in index order.
    fn list_chunks(&self, document_id: DocumentId) -> Result<Vec<Chunk>>;
}

// ---------------------------------------------------------------------------
// Graph store
// ---------------------------------------------------------------------------

/// Precomputed state for an atomic two-entity merge.
///
/// `target` carries the fully merged field values (name, description,
/// provenance union, summed frequency). `target.version` must be the version
/// the caller read; the store rejects the merge if the target moved since.
#[derive(Debug, Clone)]
pub struct EntityMergePlan {
    /// Entity to be absorbed and deleted.
    pub source_id: EntityId,
    /// Surviving entity with merged fields already applied.
    pub target: Entity,
}

/// Property-graph-store operations used by the engine.
///
/// Reads are plain; entity updates are conditional on a version counter so
/// concurrent read-modify-write cycles cannot silently lose updates; the
/// manual merge is a single multi-statement transaction.
pub trait GraphStore: Send + Sync {
    /// Query entities of one graph, optionally filtered by type, up to
    /// `limit` records in stable (creation) order.
    fn list_entities(
        &self,
        graph_id: &str,
        entity_type: Option<&str>,
        limit: usize,
    ) -> Result<Vec<Entity>>;

    /// Point-read an entity by id.
    fn get_entity(&self, id: EntityId) -> Result<Option<Entity>>;

    /// Create an entity record. The store assigns the id, sets `version = 1`
    /// and stamps both timestamps.
    fn create_entity(&self, draft: NewEntity) -> Result<Entity>;

    /// Conditional update: applies only while the stored version still equals
    /// `expected_version`, bumping version and `updated_at` on success.
    ///
    /// Returns `Ok(false)` on a version conflict so the caller can re-read
    /// and retry; `Err` is reserved for store failures.
    fn update_entity(&self, entity: &Entity, expected_version: u64) -> Result<bool>;

    /// Delete an entity and every relation incident to it.
    fn delete_entity(&self, id: EntityId) -> Result<()>;

    /// Create or refresh a relation keyed by `(graph, source, target, type)`.
    ///
    /// An existing triple keeps its id; an incoming duplicate with strictly
    /// higher confidence replaces the stored confidence and description.
    /// Both endpoints must exist in the same graph.
    fn upsert_relation(&self, draft: NewRelation) -> Result<Relation>;

    /// List relations with the given entity as either endpoint.
    fn relations_for_entity(&self, id: EntityId) -> Result<Vec<Relation>>;

    /// List all relations of one graph.
    fn list_relations(&self, graph_id: &str) -> Result<Vec<Relation>>;

    /// Delete a single relation.
    fn delete_relation(&self, id: RelationId) -> Result<()>;

    /// Atomically apply a manual entity merge: rewire every relation incident
    /// to the source onto the target, delete the source, write the merged
    /// target. Either every step applies or none does.
    fn merge_entities(&self, plan: &EntityMergePlan) -> Result<Entity>;
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

/// Bundles the two store backends behind trait objects.
///
/// Owned by the host and shared with the ingestion pipeline by reference
/// (or `Arc` for background workers).
pub struct StoreRegistry {
    documents: Box<dyn DocumentStore>,
    graph: Box<dyn GraphStore>,
}

impl StoreRegistry {
    pub fn new(documents: Box<dyn DocumentStore>, graph: Box<dyn GraphStore>) -> Self {
        Self { documents, graph }
    }

    /// Access the document store.
    pub fn documents(&self) -> &dyn DocumentStore {
        self.documents.as_ref()
    }

    /// Access the graph store.
    pub fn graph(&self) -> &dyn GraphStore {
        self.graph.as_ref()
    }
}
