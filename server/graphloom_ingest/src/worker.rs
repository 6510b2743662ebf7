//! Background batch ingestion worker.
//!
//! Runs one document batch on the tokio blocking pool and reports back a
//! [`BatchResult`]. Cancellation is cooperative through a
//! `tokio::sync::watch` channel: send `true` and the batch stops before its
//! next document, never mid-document.

use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::info;

use graphloom_core::{DocumentId, StoreRegistry};

use crate::pipeline::{BatchResult, IngestionConfig, IngestionPipeline};
use crate::ExtractionClient;

/// One-shot background batch task.
pub struct IngestWorker {
    /// Tuning snapshot for the batch's pipeline.
    pub config: IngestionConfig,
}

impl IngestWorker {
    pub fn new(config: IngestionConfig) -> Self {
        Self { config }
    }

    /// Spawn the batch on the blocking thread pool.
    ///
    /// Returns a `watch::Sender<bool>` for cancellation and the join handle
    /// yielding the final [`BatchResult`]. Stores and the extraction client
    /// are shared via `Arc` so the background task can own them.
    pub fn spawn(
        self,
        registry: Arc<StoreRegistry>,
        extractor: Arc<dyn ExtractionClient>,
        document_ids: Vec<DocumentId>,
    ) -> (watch::Sender<bool>, JoinHandle<BatchResult>) {
        let (cancel_tx, cancel_rx) = watch::channel(false);

        let handle = tokio::task::spawn_blocking(move || {
            info!(
                "Ingest worker: starting batch of {} documents",
                document_ids.len()
            );
            let pipeline = IngestionPipeline::new(&registry, extractor.as_ref(), self.config);
            let result = pipeline.ingest_batch(&document_ids, Some(&cancel_rx));
            info!(
                completed = result.completed_count(),
                failed = result.failed_count(),
                skipped = result.skipped.len(),
                cancelled = result.cancelled,
                "Ingest worker: batch finished"
            );
            result
        });

        (cancel_tx, handle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;
    use std::sync::Mutex;

    use graphloom_core::{memory_registry, DocumentStatus, NewDocument};

    use crate::chunker::ChunkStrategy;
    use crate::{ExtractedEntity, ExtractedRelation};

    struct EmptyExtractor;

    impl ExtractionClient for EmptyExtractor {
        fn extract_entities(
            &self,
            _text: &str,
            _entity_types: &[String],
        ) -> anyhow::Result<Vec<ExtractedEntity>> {
            Ok(Vec::new())
        }

        fn extract_relations(
            &self,
            _text: &str,
            _entity_names: &[String],
        ) -> anyhow::Result<Vec<ExtractedRelation>> {
            Ok(Vec::new())
        }
    }

    /// Blocks the first entity-extraction call until released, and reports
    /// when that call has started.
    struct GatedExtractor {
        started: mpsc::Sender<()>,
        release: Mutex<Option<mpsc::Receiver<()>>>,
    }

    impl ExtractionClient for GatedExtractor {
        fn extract_entities(
            &self,
            _text: &str,
            _entity_types: &[String],
        ) -> anyhow::Result<Vec<ExtractedEntity>> {
            let _ = self.started.send(());
            if let Some(gate) = self.release.lock().unwrap().take() {
                let _ = gate.recv();
            }
            Ok(Vec::new())
        }

        fn extract_relations(
            &self,
            _text: &str,
            _entity_names: &[String],
        ) -> anyhow::Result<Vec<ExtractedRelation>> {
            Ok(Vec::new())
        }
    }

    fn worker_config() -> IngestionConfig {
        IngestionConfig {
            chunk_strategy: ChunkStrategy::FullDocument,
            ..IngestionConfig::default()
        }
    }

    fn seed_document(registry: &StoreRegistry, content: &str) -> DocumentId {
        registry
            .documents()
            .create_document(NewDocument {
                graph_id: "g1".to_string(),
                content: content.to_string(),
            })
            .unwrap()
            .id
    }

    #[tokio::test]
    async fn test_worker_runs_batch_to_completion() {
        let registry = Arc::new(memory_registry());
        let first = seed_document(&registry, "one");
        let second = seed_document(&registry, "two");

        let worker = IngestWorker::new(worker_config());
        let (_cancel_tx, handle) = worker.spawn(
            Arc::clone(&registry),
            Arc::new(EmptyExtractor),
            vec![first, second],
        );

        let result = handle.await.unwrap();
        assert!(!result.cancelled);
        assert_eq!(result.completed_count(), 2);
        assert!(result.skipped.is_empty());

        let stored = registry.documents().get_document(second).unwrap().unwrap();
        assert_eq!(stored.status, DocumentStatus::Completed);
    }

    #[tokio::test]
    async fn test_worker_cancellation_stops_between_documents() {
        let registry = Arc::new(memory_registry());
        let first = seed_document(&registry, "one");
        let second = seed_document(&registry, "two");

        let (started_tx, started_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel();
        let extractor = GatedExtractor {
            started: started_tx,
            release: Mutex::new(Some(release_rx)),
        };

        let worker = IngestWorker::new(worker_config());
        let (cancel_tx, handle) = worker.spawn(
            Arc::clone(&registry),
            Arc::new(extractor),
            vec![first, second],
        );

        // First document is mid-extraction; cancel, then let it finish.
        started_rx.recv().unwrap();
        cancel_tx.send(true).unwrap();
        release_tx.send(()).unwrap();

        let result = handle.await.unwrap();
        assert!(result.cancelled);
        assert_eq!(result.reports.len(), 1);
        assert_eq!(result.reports[0].document_id, first);
        assert_eq!(result.reports[0].status, DocumentStatus::Completed);
        assert_eq!(result.skipped, vec![second]);

        // The in-flight document was finished, the skipped one never started.
        let stored = registry.documents().get_document(first).unwrap().unwrap();
        assert_eq!(stored.status, DocumentStatus::Completed);
        let untouched = registry.documents().get_document(second).unwrap().unwrap();
        assert_eq!(untouched.status, DocumentStatus::Pending);
    }
}
