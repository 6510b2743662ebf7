//! Per-document merge orchestration and batch ingestion.
//!
//! One document flows through six steps, strictly in order:
//! 1. Chunking — split and persist chunk records
//! 2. Candidate extraction — external service, bounded worker pool per chunk
//! 3. Canonicalization and graph resolution
//! 4. Relation validation
//! 5. Entity application — conditional updates for `EXISTING`, creates for `NEW`
//! 6. Relation application — triple-keyed upserts
//!
//! Documents within a batch are strictly sequential; nothing else shares the
//! graph-mutation path. Extraction and resolver-read failures degrade (empty
//! candidates, all-`NEW` resolutions); persistence failures mark the document
//! `FAILED` without touching the rest of the batch.

use std::collections::{BTreeSet, HashMap};
use std::time::Instant;

use anyhow::{anyhow, Context, Result};
use tokio::sync::watch;
use tracing::{debug, info, info_span, warn};

use graphloom_config::GraphloomConfig;
use graphloom_core::{
    Chunk, Document, DocumentId, DocumentStatus, EntityId, NewEntity, NewRelation, StoreRegistry,
};

use crate::canonical::{canonicalize, CanonicalCandidate};
use crate::chunker::{split_document, ChunkStrategy};
use crate::resolver::{GraphResolver, Resolution};
use crate::validator::RelationValidator;
use crate::{CandidateEntity, CandidateRelation, ExtractionClient};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Tuning snapshot for one pipeline instance.
///
/// Built once from the loaded config and passed in explicitly; the pipeline
/// never reads ambient state. Reloading taxonomies or thresholds means
/// building a new snapshot and constructing a new pipeline from it.
#[derive(Debug, Clone)]
pub struct IngestionConfig {
    pub chunk_strategy: ChunkStrategy,
    /// Worker-pool bound for per-chunk extraction calls.
    pub max_concurrent_extractions: usize,
    /// Intra-document similarity threshold (canonicalization).
    pub local_merge_threshold: f64,
    /// Cross-graph similarity threshold (resolution).
    pub graph_merge_threshold: f64,
    /// Bound on the per-document existing-entity snapshot.
    pub max_existing_entities: usize,
    /// Conditional-update attempts per entity before the document fails.
    pub update_retry_limit: usize,
    /// Entity-type taxonomy forwarded to the extraction service.
    pub entity_types: Vec<String>,
    /// Relation-type taxonomy enforced by validation.
    pub relation_types: Vec<String>,
}

impl Default for IngestionConfig {
    fn default() -> Self {
        Self {
            chunk_strategy: ChunkStrategy::Paragraph,
            max_concurrent_extractions: 4,
            local_merge_threshold: 0.92,
            graph_merge_threshold: 0.90,
            max_existing_entities: 10_000,
            update_retry_limit: 5,
            entity_types: vec![
                "person".to_string(),
                "organization".to_string(),
                "location".to_string(),
                "material".to_string(),
                "equipment".to_string(),
                "concept".to_string(),
            ],
            relation_types: vec![
                "causes".to_string(),
                "part_of".to_string(),
                "located_in".to_string(),
                "produces".to_string(),
                "supplies".to_string(),
                "uses".to_string(),
            ],
        }
    }
}

impl IngestionConfig {
    /// Build a snapshot from the loaded config file.
    pub fn from_config(config: &GraphloomConfig) -> Result<Self> {
        Ok(Self {
            chunk_strategy: config.ingestion.chunk_strategy.parse()?,
            max_concurrent_extractions: config.ingestion.max_concurrent_extractions.max(1),
            local_merge_threshold: config.resolution.local_merge_threshold,
            graph_merge_threshold: config.resolution.graph_merge_threshold,
            max_existing_entities: config.resolution.max_existing_entities,
            update_retry_limit: config.resolution.update_retry_limit.max(1),
            entity_types: config.taxonomy.entity_types.clone(),
            relation_types: config.taxonomy.relation_types.clone(),
        })
    }
}

// ---------------------------------------------------------------------------
// Metrics and reports
// ---------------------------------------------------------------------------

/// Per-document pipeline metrics. All `_us` fields are microseconds.
#[derive(Debug, Clone, Default)]
pub struct IngestionMetrics {
    /// Chunks produced by the split.
    pub chunks_total: usize,
    /// Chunks whose entity-extraction call failed (degraded to empty).
    pub chunks_extraction_failed: usize,
    /// Raw entity candidates across all chunks.
    pub entity_candidates: usize,
    /// Raw relation candidates across all chunks.
    pub relation_candidates: usize,
    /// Canonical entities after in-document dedup.
    pub canonical_entities: usize,
    /// Existing-entity snapshot reads that failed, degrading resolution to
    /// all-`NEW`.
    pub resolution_degraded: usize,
    /// Entities created as `NEW`.
    pub entities_created: usize,
    /// Entities updated as `EXISTING`.
    pub entities_updated: usize,
    /// Relations upserted.
    pub relations_written: usize,
    /// Relation candidates dropped by validation.
    pub relations_filtered: usize,
    /// Validated relations skipped for an unresolved endpoint.
    pub relations_skipped: usize,
    /// Conditional-update attempts lost to version conflicts.
    pub version_retries: usize,
    pub chunking_us: u64,
    pub extraction_us: u64,
    pub resolution_us: u64,
    pub persistence_us: u64,
    pub total_us: u64,
}

/// Outcome of one document's ingestion.
#[derive(Debug, Clone)]
pub struct DocumentReport {
    pub document_id: DocumentId,
    pub status: DocumentStatus,
    /// Failure cause when `status` is `Failed`.
    pub error: Option<String>,
    pub metrics: IngestionMetrics,
}

/// Outcome of a batch run.
#[derive(Debug, Clone, Default)]
pub struct BatchResult {
    /// One report per attempted document, in batch order.
    pub reports: Vec<DocumentReport>,
    /// Documents not attempted because the batch was cancelled.
    pub skipped: Vec<DocumentId>,
    pub cancelled: bool,
}

impl BatchResult {
    pub fn completed_count(&self) -> usize {
        self.reports
            .iter()
            .filter(|r| r.status == DocumentStatus::Completed)
            .count()
    }

    pub fn failed_count(&self) -> usize {
        self.reports
            .iter()
            .filter(|r| r.status == DocumentStatus::Failed)
            .count()
    }
}

// ---------------------------------------------------------------------------
// Pipeline
// ---------------------------------------------------------------------------

/// Drives documents through the six ingestion steps against a store registry
/// and an extraction client.
pub struct IngestionPipeline<'a> {
    registry: &'a StoreRegistry,
    extractor: &'a dyn ExtractionClient,
    config: IngestionConfig,
}

impl<'a> IngestionPipeline<'a> {
    pub fn new(
        registry: &'a StoreRegistry,
        extractor: &'a dyn ExtractionClient,
        config: IngestionConfig,
    ) -> Self {
        Self {
            registry,
            extractor,
            config,
        }
    }

    /// Ingest a batch of documents strictly sequentially.
    ///
    /// The cancel channel is sampled between documents: flipping it to `true`
    /// stops the batch before the next document starts, never mid-document.
    /// Unattempted ids are reported as skipped.
    pub fn ingest_batch(
        &self,
        document_ids: &[DocumentId],
        cancel: Option<&watch::Receiver<bool>>,
    ) -> BatchResult {
        let span = info_span!(
            "graphloom.ingest_batch",
            documents = document_ids.len(),
            completed = tracing::field::Empty,
            failed = tracing::field::Empty,
            cancelled = tracing::field::Empty,
        );
        let _guard = span.enter();

        let mut result = BatchResult::default();
        for (position, &document_id) in document_ids.iter().enumerate() {
            if cancel.is_some_and(|rx| *rx.borrow()) {
                result.cancelled = true;
                result.skipped = document_ids[position..].to_vec();
                info!(
                    "Batch cancelled with {} documents remaining",
                    result.skipped.len()
                );
                break;
            }
            result.reports.push(self.ingest_document(document_id));
        }

        span.record("completed", result.completed_count());
        span.record("failed", result.failed_count());
        span.record("cancelled", result.cancelled);
        info!(
            "Batch finished: {} completed, {} failed, {} skipped",
            result.completed_count(),
            result.failed_count(),
            result.skipped.len()
        );
        result
    }

    /// Ingest a single document end to end.
    ///
    /// Never panics and never returns `Err`: every outcome, including store
    /// failures, is folded into the report so batch callers can keep going.
    pub fn ingest_document(&self, document_id: DocumentId) -> DocumentReport {
        let span = info_span!(
            "graphloom.ingest_document",
            document_id,
            graph_id = tracing::field::Empty,
            status = tracing::field::Empty,
            duration_us = tracing::field::Empty,
        );
        let _guard = span.enter();

        let start = Instant::now();
        let mut metrics = IngestionMetrics::default();

        let failed = |metrics: IngestionMetrics, error: String| DocumentReport {
            document_id,
            status: DocumentStatus::Failed,
            error: Some(error),
            metrics,
        };

        let document = match self.registry.documents().get_document(document_id) {
            Ok(Some(document)) => document,
            Ok(None) => {
                warn!("Document {} not found, nothing to ingest", document_id);
                span.record("status", "failed");
                return failed(metrics, "document not found".to_string());
            }
            Err(err) => {
                warn!("Failed to read document {}: {:#}", document_id, err);
                span.record("status", "failed");
                // The record may still exist and must not stay `PENDING`.
                self.mark_failed(document_id);
                return failed(metrics, format!("failed to read document: {:#}", err));
            }
        };
        span.record("graph_id", document.graph_id.as_str());

        // Status goes to PROCESSING before any work so concurrent readers
        // observe progress; the write itself is part of the fallible path.
        let outcome = self
            .registry
            .documents()
            .set_document_status(document_id, DocumentStatus::Processing)
            .context("failed to mark document processing")
            .and_then(|_| self.run_document(&document, &mut metrics));

        metrics.total_us = start.elapsed().as_micros() as u64;
        span.record("duration_us", metrics.total_us);

        let outcome = outcome.and_then(|_| {
            self.registry
                .documents()
                .set_document_status(document_id, DocumentStatus::Completed)
                .context("failed to mark document completed")
        });

        match outcome {
            Ok(()) => {
                span.record("status", "completed");
                info!(
                    "Document {} completed: {} chunks, {} entities created, {} updated, {} relations in {}us",
                    document_id,
                    metrics.chunks_total,
                    metrics.entities_created,
                    metrics.entities_updated,
                    metrics.relations_written,
                    metrics.total_us
                );
                DocumentReport {
                    document_id,
                    status: DocumentStatus::Completed,
                    error: None,
                    metrics,
                }
            }
            Err(err) => {
                let error = format!("{:#}", err);
                warn!("Document {} ingestion failed: {}", document_id, error);
                span.record("status", "failed");
                self.mark_failed(document_id);
                failed(metrics, error)
            }
        }
    }

    /// Best-effort FAILED status write; the primary error is already on its
    /// way to the report.
    fn mark_failed(&self, document_id: DocumentId) {
        if let Err(err) = self
            .registry
            .documents()
            .set_document_status(document_id, DocumentStatus::Failed)
        {
            warn!("Failed to mark document {} failed: {:#}", document_id, err);
        }
    }

    fn run_document(&self, document: &Document, metrics: &mut IngestionMetrics) -> Result<()> {
        // ── Step 1: Chunking ───────────────────────────────────────────
        let chunk_start = Instant::now();
        let texts = split_document(&document.content, self.config.chunk_strategy);
        let chunks = self
            .registry
            .documents()
            .create_chunks(document.id, &texts)
            .context("failed to persist chunk records")?;
        metrics.chunks_total = chunks.len();
        metrics.chunking_us = chunk_start.elapsed().as_micros() as u64;
        debug!(
            "Chunking: {} chunks from {} chars",
            chunks.len(),
            document.content.len()
        );

        if chunks.is_empty() {
            return Ok(());
        }

        // ── Step 2: Candidate extraction (bounded worker pool) ─────────
        let extraction_start = Instant::now();
        let (entity_candidates, relation_candidates) = self.extract_candidates(&chunks, metrics);
        metrics.extraction_us = extraction_start.elapsed().as_micros() as u64;
        debug!(
            "Extraction: {} entity and {} relation candidates from {} chunks in {}us",
            metrics.entity_candidates,
            metrics.relation_candidates,
            chunks.len(),
            metrics.extraction_us
        );

        // ── Step 3: Canonicalization and graph resolution ──────────────
        let resolution_start = Instant::now();
        let canonical = canonicalize(entity_candidates, self.config.local_merge_threshold);
        metrics.canonical_entities = canonical.len();

        let resolver = GraphResolver::new(
            self.registry.graph(),
            self.config.graph_merge_threshold,
            self.config.max_existing_entities,
        );
        let existing = resolver.load_existing(&document.graph_id);
        if existing.is_degraded() {
            metrics.resolution_degraded += 1;
        }
        let resolutions: Vec<Resolution> = canonical
            .iter()
            .map(|candidate| resolver.resolve(candidate, &existing))
            .collect();
        metrics.resolution_us = resolution_start.elapsed().as_micros() as u64;

        // ── Step 4: Relation validation ────────────────────────────────
        let validator = RelationValidator::new(&self.config.relation_types);
        let validated = validator.validate(relation_candidates, &canonical);
        metrics.relations_filtered = validated.filtered;

        // ── Step 5: Entity application ─────────────────────────────────
        let persistence_start = Instant::now();
        let mut name_to_id: HashMap<String, EntityId> = HashMap::new();
        for (candidate, resolution) in canonical.iter().zip(&resolutions) {
            let id = match resolution {
                Resolution::Existing(id) => {
                    self.apply_existing(*id, candidate, document, metrics)?
                }
                Resolution::New => {
                    let entity = self
                        .registry
                        .graph()
                        .create_entity(NewEntity {
                            name: candidate.name.clone(),
                            entity_type: candidate.entity_type.clone(),
                            description: candidate.description.clone(),
                            graph_id: document.graph_id.clone(),
                            chunk_ids: candidate.chunk_ids.clone(),
                            document_ids: BTreeSet::from([document.id]),
                            frequency: candidate.frequency,
                        })
                        .context("failed to create entity")?;
                    metrics.entities_created += 1;
                    entity.id
                }
            };
            // First-seen wins when distinct types share a normalized name.
            name_to_id.entry(candidate.normalized_name.clone()).or_insert(id);
        }

        // ── Step 6: Relation application ───────────────────────────────
        for relation in &validated.relations {
            let (Some(&source), Some(&target)) = (
                name_to_id.get(&relation.head_normalized),
                name_to_id.get(&relation.tail_normalized),
            ) else {
                metrics.relations_skipped += 1;
                debug!(
                    "Skipping relation with unresolved endpoint: {} -[{}]-> {}",
                    relation.head, relation.relation_type, relation.tail
                );
                continue;
            };
            self.registry
                .graph()
                .upsert_relation(NewRelation {
                    source_entity_id: source,
                    target_entity_id: target,
                    relation_type: relation.relation_type.clone(),
                    description: relation.description.clone(),
                    confidence: relation.confidence,
                    graph_id: document.graph_id.clone(),
                })
                .context("failed to upsert relation")?;
            metrics.relations_written += 1;
        }
        metrics.persistence_us = persistence_start.elapsed().as_micros() as u64;

        Ok(())
    }

    /// Union provenance into a persisted entity under optimistic concurrency.
    ///
    /// Only the provenance sets, the frequency and (via the store) the update
    /// timestamp move; stored name, type and description stay as they are.
    fn apply_existing(
        &self,
        id: EntityId,
        candidate: &CanonicalCandidate,
        document: &Document,
        metrics: &mut IngestionMetrics,
    ) -> Result<EntityId> {
        for attempt in 1..=self.config.update_retry_limit {
            let mut entity = self
                .registry
                .graph()
                .get_entity(id)
                .context("failed to read entity for update")?
                .ok_or_else(|| anyhow!("entity {} disappeared during ingestion", id))?;
            let expected = entity.version;

            entity.chunk_ids.extend(candidate.chunk_ids.iter().copied());
            entity.document_ids.insert(document.id);
            entity.frequency += candidate.frequency;

            if self
                .registry
                .graph()
                .update_entity(&entity, expected)
                .context("failed to update entity")?
            {
                metrics.entities_updated += 1;
                return Ok(id);
            }
            metrics.version_retries += 1;
            debug!("Version conflict updating entity {} (attempt {})", id, attempt);
        }
        Err(anyhow!(
            "entity {} update exhausted {} attempts on version conflicts",
            id,
            self.config.update_retry_limit
        ))
    }

    /// Run entity then relation extraction for every chunk under a bounded
    /// worker pool. Per-chunk failures degrade to empty candidate lists and
    /// are counted, never fatal.
    fn extract_candidates(
        &self,
        chunks: &[Chunk],
        metrics: &mut IngestionMetrics,
    ) -> (Vec<CandidateEntity>, Vec<CandidateRelation>) {
        let workers = self.config.max_concurrent_extractions.min(chunks.len()).max(1);
        let extractor = self.extractor;
        let entity_types = self.config.entity_types.as_slice();

        let (task_tx, task_rx) = crossbeam_channel::unbounded::<(usize, &Chunk)>();
        for pair in chunks.iter().enumerate() {
            let _ = task_tx.send(pair);
        }
        // Workers drain until the queue is empty, then see the disconnect.
        drop(task_tx);

        let (result_tx, result_rx) = crossbeam_channel::unbounded::<ChunkExtraction>();
        std::thread::scope(|scope| {
            for _ in 0..workers {
                let task_rx = task_rx.clone();
                let result_tx = result_tx.clone();
                scope.spawn(move || {
                    while let Ok((position, chunk)) = task_rx.recv() {
                        let outcome = extract_chunk(extractor, entity_types, position, chunk);
                        let _ = result_tx.send(outcome);
                    }
                });
            }
        });
        drop(result_tx);

        // Worker completion order is arbitrary; downstream stages depend on
        // first-seen document order, so restore chunk order here.
        let mut outcomes: Vec<ChunkExtraction> = result_rx.iter().collect();
        outcomes.sort_by_key(|outcome| outcome.position);

        let mut entity_candidates = Vec::new();
        let mut relation_candidates = Vec::new();
        for outcome in outcomes {
            if outcome.failed {
                metrics.chunks_extraction_failed += 1;
            }
            entity_candidates.extend(outcome.entities);
            relation_candidates.extend(outcome.relations);
        }
        metrics.entity_candidates = entity_candidates.len();
        metrics.relation_candidates = relation_candidates.len();
        (entity_candidates, relation_candidates)
    }
}

// ---------------------------------------------------------------------------
// Internal types
// ---------------------------------------------------------------------------

/// One chunk's extraction outcome, tagged with its position for re-ordering.
struct ChunkExtraction {
    position: usize,
    entities: Vec<CandidateEntity>,
    relations: Vec<CandidateRelation>,
    failed: bool,
}

// ---------------------------------------------------------------------------
// Helper functions
// ---------------------------------------------------------------------------

/// Extract one chunk: entities first, then relations with the extracted
/// entity names visible. A failed entity call fails the chunk; a failed
/// relation call keeps the entity candidates.
fn extract_chunk(
    extractor: &dyn ExtractionClient,
    entity_types: &[String],
    position: usize,
    chunk: &Chunk,
) -> ChunkExtraction {
    let extracted = match extractor.extract_entities(&chunk.text, entity_types) {
        Ok(entities) => entities,
        Err(err) => {
            warn!("Entity extraction failed for chunk {}: {:#}", chunk.id, err);
            return ChunkExtraction {
                position,
                entities: Vec::new(),
                relations: Vec::new(),
                failed: true,
            };
        }
    };
    let entities: Vec<CandidateEntity> = extracted
        .into_iter()
        .map(|entity| CandidateEntity::from_extracted(entity, chunk.id))
        .collect();

    // Relating needs at least two mentions; skip the call otherwise.
    let relations = if entities.len() >= 2 {
        let names: Vec<String> = entities.iter().map(|e| e.name.clone()).collect();
        match extractor.extract_relations(&chunk.text, &names) {
            Ok(relations) => relations
                .into_iter()
                .map(|relation| CandidateRelation::from_extracted(relation, chunk.id))
                .collect(),
            Err(err) => {
                warn!("Relation extraction failed for chunk {}: {:#}", chunk.id, err);
                Vec::new()
            }
        }
    } else {
        Vec::new()
    };

    ChunkExtraction {
        position,
        entities,
        relations,
        failed: false,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
