//! In-memory reference implementations of the store traits.
//!
//! These back the test suites and embedded single-process deployments.
//! Production hosts plug real backends (SQL, property-graph servers) in
//! behind the same traits. All state sits behind a single mutex per store;
//! the merge transaction validates every precondition before mutating so a
//! failed merge leaves no partial state.

use std::collections::HashMap;
use std::sync::Mutex;

use anyhow::{bail, Result};

use crate::backends::{DocumentStore, EntityMergePlan, GraphStore, StoreRegistry};
use crate::types::{
    now_secs, Chunk, ChunkId, Document, DocumentId, DocumentStatus, Entity, EntityId, NewDocument,
    NewEntity, NewRelation, Relation, RelationId,
};

/// Build a [`StoreRegistry`] backed entirely by in-memory stores.
pub fn memory_registry() -> StoreRegistry {
    StoreRegistry::new(
        Box::new(MemoryDocumentStore::new()),
        Box::new(MemoryGraphStore::new()),
    )
}

// ---------------------------------------------------------------------------
// Document store
// ---------------------------------------------------------------------------

struct DocumentInner {
    documents: HashMap<DocumentId, Document>,
    chunks: HashMap<DocumentId, Vec<Chunk>>,
    next_document_id: DocumentId,
    next_chunk_id: ChunkId,
}

/// Mutex-protected in-memory document/chunk store.
pub struct MemoryDocumentStore {
    inner: Mutex<DocumentInner>,
}

impl MemoryDocumentStore {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(DocumentInner {
                documents: HashMap::new(),
                chunks: HashMap::new(),
                next_document_id: 1,
                next_chunk_id: 1,
            }),
        }
    }
}

impl Default for MemoryDocumentStore {
    fn default() -> Self {
        Self::new()
    }
}

impl DocumentStore for MemoryDocumentStore {
    fn create_document(&self, draft: NewDocument) -> Result<Document> {
        let mut inner = self.inner.lock().unwrap();
        let id = inner.next_document_id;
        inner.next_document_id += 1;
        let now = now_secs();
        let document = Document {
            id,
            graph_id: draft.graph_id,
            content: draft.content,
            status: DocumentStatus::Pending,
            created_at: now,
            updated_at: now,
        };
        inner.documents.insert(id, document.clone());
        Ok(document)
    }

    fn get_document(&self, id: DocumentId) -> Result<Option<Document>> {
        Ok(self.inner.lock().unwrap().documents.get(&id).cloned())
    }

    fn set_document_status(&self, id: DocumentId, status: DocumentStatus) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        match inner.documents.get_mut(&id) {
            Some(document) => {
                document.status = status;
                document.updated_at = now_secs();
                Ok(())
            }
            None => bail!("document {} not found", id),
        }
    }

    fn create_chunks(&self, document_id: DocumentId, texts: &[String]) -> Result<Vec<Chunk>> {
        let mut inner = self.inner.lock().unwrap();
        if !inner.documents.contains_key(&document_id) {
            bail!("document {} not found", document_id);
        }
        // Unchanged split: hand back the existing records so re-ingestion of
        // the same content reuses stable chunk ids.
        if let Some(existing) = inner.chunks.get(&document_id) {
            if existing.len() == texts.len()
                && existing.iter().zip(texts.iter()).all(|(c, t)| &c.text == t)
            {
                return Ok(existing.clone());
            }
        }
        let mut stored = Vec::with_capacity(texts.len());
        for (index, text) in texts.iter().enumerate() {
            let id = inner.next_chunk_id;
            inner.next_chunk_id += 1;
            stored.push(Chunk {
                id,
                document_id,
                index,
                text: text.clone(),
            });
        }
        inner.chunks.insert(document_id, stored.clone());
        Ok(stored)
    }

    fn list_chunks(&self, document_id: DocumentId) -> Result<Vec<Chunk>> {
        Ok(self
            .inner
            .lock()
            .unwrap()
            .chunks
            .get(&document_id)
            .cloned()
            .unwrap_or_default())
    }
}

// ---------------------------------------------------------------------------
// Graph store
// ---------------------------------------------------------------------------

struct GraphInner {
    entities: HashMap<EntityId, Entity>,
    relations: HashMap<RelationId, Relation>,
    next_entity_id: EntityId,
    next_relation_id: RelationId,
}

/// Mutex-protected in-memory entity/relation store.
pub struct MemoryGraphStore {
    inner: Mutex<GraphInner>,
}

impl MemoryGraphStore {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(GraphInner {
                entities: HashMap::new(),
                relations: HashMap::new(),
                next_entity_id: 1,
                next_relation_id: 1,
            }),
        }
    }
}

impl Default for MemoryGraphStore {
    fn default() -> Self {
        Self::new()
    }
}

impl GraphStore for MemoryGraphStore {
    fn list_entities(
        &self,
        graph_id: &str,
        entity_type: Option<&str>,
        limit: usize,
    ) -> Result<Vec<Entity>> {
        let inner = self.inner.lock().unwrap();
        let mut out: Vec<Entity> = inner
            .entities
            .values()
            .filter(|e| e.graph_id == graph_id)
            .filter(|e| entity_type.map_or(true, |t| e.entity_type == t))
            .cloned()
            .collect();
        // Ids are allocated in creation order, so this is the stable order
        // the resolver's tie-breaking relies on.
        out.sort_by_key(|e| e.id);
        out.truncate(limit);
        Ok(out)
    }

    fn get_entity(&self, id: EntityId) -> Result<Option<Entity>> {
        Ok(self.inner.lock().unwrap().entities.get(&id).cloned())
    }

    fn create_entity(&self, draft: NewEntity) -> Result<Entity> {
        let mut inner = self.inner.lock().unwrap();
        let id = inner.next_entity_id;
        inner.next_entity_id += 1;
        let now = now_secs();
        let entity = Entity {
            id,
            name: draft.name,
            entity_type: draft.entity_type,
            description: draft.description,
            graph_id: draft.graph_id,
            chunk_ids: draft.chunk_ids,
            document_ids: draft.document_ids,
            frequency: draft.frequency.max(1),
            version: 1,
            created_at: now,
            updated_at: now,
        };
        inner.entities.insert(id, entity.clone());
        Ok(entity)
    }

    fn update_entity(&self, entity: &Entity, expected_version: u64) -> Result<bool> {
        let mut inner = self.inner.lock().unwrap();
        match inner.entities.get_mut(&entity.id) {
            Some(stored) => {
                if stored.version != expected_version {
                    return Ok(false);
                }
                let mut updated = entity.clone();
                updated.version = stored.version + 1;
                updated.created_at = stored.created_at;
                updated.updated_at = now_secs();
                *stored = updated;
                Ok(true)
            }
            None => bail!("entity {} not found", entity.id),
        }
    }

    fn delete_entity(&self, id: EntityId) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        if inner.entities.remove(&id).is_none() {
            bail!("entity {} not found", id);
        }
        inner.relations.retain(|_, r| !r.touches(id));
        Ok(())
    }

    fn upsert_relation(&self, draft: NewRelation) -> Result<Relation> {
        let mut inner = self.inner.lock().unwrap();
        let source = match inner.entities.get(&draft.source_entity_id) {
            Some(e) => e,
            None => bail!("relation source entity {} not found", draft.source_entity_id),
        };
        let target = match inner.entities.get(&draft.target_entity_id) {
            Some(e) => e,
            None => bail!("relation target entity {} not found", draft.target_entity_id),
        };
        if source.graph_id != draft.graph_id || target.graph_id != draft.graph_id {
            bail!("relation endpoints must belong to graph '{}'", draft.graph_id);
        }
        let confidence = draft.confidence.clamp(0.0, 1.0);
        if let Some(existing) = inner.relations.values_mut().find(|r| {
            r.graph_id == draft.graph_id
                && r.source_entity_id == draft.source_entity_id
                && r.target_entity_id == draft.target_entity_id
                && r.relation_type == draft.relation_type
        }) {
            if confidence > existing.confidence {
                existing.confidence = confidence;
                existing.description = draft.description;
            }
            return Ok(existing.clone());
        }
        let id = inner.next_relation_id;
        inner.next_relation_id += 1;
        let relation = Relation {
            id,
            source_entity_id: draft.source_entity_id,
            target_entity_id: draft.target_entity_id,
            relation_type: draft.relation_type,
            description: draft.description,
            confidence,
            graph_id: draft.graph_id,
        };
        inner.relations.insert(id, relation.clone());
        Ok(relation)
    }

    fn relations_for_entity(&self, id: EntityId) -> Result<Vec<Relation>> {
        let inner = self.inner.lock().unwrap();
        let mut out: Vec<Relation> = inner
            .relations
            .values()
            .filter(|r| r.touches(id))
            .cloned()
            .collect();
        out.sort_by_key(|r| r.id);
        Ok(out)
    }

    fn list_relations(&self, graph_id: &str) -> Result<Vec<Relation>> {
        let inner = self.inner.lock().unwrap();
        let mut out: Vec<Relation> = inner
            .relations
            .values()
            .filter(|r| r.graph_id == graph_id)
            .cloned()
            .collect();
        out.sort_by_key(|r| r.id);
        Ok(out)
    }

    fn delete_relation(&self, id: RelationId) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        if inner.relations.remove(&id).is_none() {
            bail!("relation {} not found", id);
        }
        Ok(())
    }

    fn merge_entities(&self, plan: &EntityMergePlan) -> Result<Entity> {
        let mut inner = self.inner.lock().unwrap();
        // Validate everything up front; the mutation below must not be able
        // to fail part-way through.
        if plan.source_id == plan.target.id {
            bail!("cannot merge entity {} into itself", plan.source_id);
        }
        let source = match inner.entities.get(&plan.source_id) {
            Some(e) => e.clone(),
            None => bail!("merge source entity {} not found", plan.source_id),
        };
        let stored_target = match inner.entities.get(&plan.target.id) {
            Some(e) => e.clone(),
            None => bail!("merge target entity {} not found", plan.target.id),
        };
        if source.graph_id != stored_target.graph_id {
            bail!(
                "merge endpoints belong to different graphs ('{}' vs '{}')",
                source.graph_id,
                stored_target.graph_id
            );
        }
        if stored_target.version != plan.target.version {
            bail!(
                "target entity {} changed during merge (version {} != {})",
                plan.target.id,
                stored_target.version,
                plan.target.version
            );
        }

        for relation in inner.relations.values_mut() {
            if relation.source_entity_id == plan.source_id {
                relation.source_entity_id = plan.target.id;
            }
            if relation.target_entity_id == plan.source_id {
                relation.target_entity_id = plan.target.id;
            }
        }
        inner.entities.remove(&plan.source_id);
        let mut merged = plan.target.clone();
        merged.version = stored_target.version + 1;
        merged.created_at = stored_target.created_at;
        merged.updated_at = now_secs();
        inner.entities.insert(merged.id, merged.clone());
        Ok(merged)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;

    fn draft_entity(graph: &str, name: &str, entity_type: &str) -> NewEntity {
        NewEntity {
            name: name.to_string(),
            entity_type: entity_type.to_string(),
            description: String::new(),
            graph_id: graph.to_string(),
            chunk_ids: BTreeSet::new(),
            document_ids: BTreeSet::new(),
            frequency: 1,
        }
    }

    fn draft_relation(graph: &str, source: EntityId, target: EntityId, kind: &str) -> NewRelation {
        NewRelation {
            source_entity_id: source,
            target_entity_id: target,
            relation_type: kind.to_string(),
            description: String::new(),
            confidence: 0.5,
            graph_id: graph.to_string(),
        }
    }

    // ---- document store ----

    #[test]
    fn test_document_lifecycle() {
        let store = MemoryDocumentStore::new();
        let doc = store
            .create_document(NewDocument {
                graph_id: "g".to_string(),
                content: "hello".to_string(),
            })
            .unwrap();
        assert_eq!(doc.status, DocumentStatus::Pending);

        store
            .set_document_status(doc.id, DocumentStatus::Processing)
            .unwrap();
        let read = store.get_document(doc.id).unwrap().unwrap();
        assert_eq!(read.status, DocumentStatus::Processing);
        assert_eq!(read.content, "hello");

        assert!(store.get_document(999).unwrap().is_none());
        assert!(store
            .set_document_status(999, DocumentStatus::Failed)
            .is_err());
    }

    #[test]
    fn test_create_chunks_assigns_ordered_ids() {
        let store = MemoryDocumentStore::new();
        let doc = store
            .create_document(NewDocument {
                graph_id: "g".to_string(),
                content: "a b".to_string(),
            })
            .unwrap();
        let chunks = store
            .create_chunks(doc.id, &["a".to_string(), "b".to_string()])
            .unwrap();
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].index, 0);
        assert_eq!(chunks[1].index, 1);
        assert!(chunks[0].id < chunks[1].id);
        assert_eq!(store.list_chunks(doc.id).unwrap(), chunks);
    }

    #[test]
    fn test_create_chunks_reuses_ids_for_unchanged_split() {
        let store = MemoryDocumentStore::new();
        let doc = store
            .create_document(NewDocument {
                graph_id: "g".to_string(),
                content: "a b".to_string(),
            })
            .unwrap();
        let first = store
            .create_chunks(doc.id, &["a".to_string(), "b".to_string()])
            .unwrap();
        let second = store
            .create_chunks(doc.id, &["a".to_string(), "b".to_string()])
            .unwrap();
        assert_eq!(first, second);

        // A changed split replaces the records with fresh ids.
        let replaced = store.create_chunks(doc.id, &["c".to_string()]).unwrap();
        assert_eq!(replaced.len(), 1);
        assert!(replaced[0].id > first[1].id);
        assert_eq!(store.list_chunks(doc.id).unwrap(), replaced);
    }

    #[test]
    fn test_create_chunks_unknown_document() {
        let store = MemoryDocumentStore::new();
        assert!(store.create_chunks(42, &["a".to_string()]).is_err());
    }

    // ---- graph store: entities ----

    #[test]
    fn test_create_entity_assigns_version_and_floor_frequency() {
        let store = MemoryGraphStore::new();
        let mut draft = draft_entity("g", "Boiler", "Equipment");
        draft.frequency = 0;
        let entity = store.create_entity(draft).unwrap();
        assert_eq!(entity.version, 1);
        assert_eq!(entity.frequency, 1);
        assert_eq!(store.get_entity(entity.id).unwrap().unwrap(), entity);
    }

    #[test]
    fn test_list_entities_filters_and_limits() {
        let store = MemoryGraphStore::new();
        let a = store.create_entity(draft_entity("g1", "A", "Org")).unwrap();
        let b = store
            .create_entity(draft_entity("g1", "B", "Material"))
            .unwrap();
        store.create_entity(draft_entity("g2", "C", "Org")).unwrap();

        let all = store.list_entities("g1", None, 100).unwrap();
        assert_eq!(
            all.iter().map(|e| e.id).collect::<Vec<_>>(),
            vec![a.id, b.id]
        );

        let orgs = store.list_entities("g1", Some("Org"), 100).unwrap();
        assert_eq!(orgs.len(), 1);
        assert_eq!(orgs[0].id, a.id);

        let limited = store.list_entities("g1", None, 1).unwrap();
        assert_eq!(limited.len(), 1);
        assert_eq!(limited[0].id, a.id);
    }

    #[test]
    fn test_update_entity_conditional_on_version() {
        let store = MemoryGraphStore::new();
        let created = store
            .create_entity(draft_entity("g", "Boiler", "Equipment"))
            .unwrap();

        let mut update = created.clone();
        update.frequency = 5;
        assert!(store.update_entity(&update, 1).unwrap());
        let stored = store.get_entity(created.id).unwrap().unwrap();
        assert_eq!(stored.frequency, 5);
        assert_eq!(stored.version, 2);

        // Stale expected version is rejected without mutating.
        update.frequency = 9;
        assert!(!store.update_entity(&update, 1).unwrap());
        assert_eq!(store.get_entity(created.id).unwrap().unwrap().frequency, 5);

        let missing = Entity {
            id: 999,
            ..created
        };
        assert!(store.update_entity(&missing, 1).is_err());
    }

    #[test]
    fn test_delete_entity_cascades_relations() {
        let store = MemoryGraphStore::new();
        let a = store.create_entity(draft_entity("g", "A", "Org")).unwrap();
        let b = store.create_entity(draft_entity("g", "B", "Org")).unwrap();
        let c = store.create_entity(draft_entity("g", "C", "Org")).unwrap();
        store
            .upsert_relation(draft_relation("g", a.id, b.id, "supplies"))
            .unwrap();
        store
            .upsert_relation(draft_relation("g", b.id, c.id, "supplies"))
            .unwrap();

        store.delete_entity(b.id).unwrap();
        assert!(store.get_entity(b.id).unwrap().is_none());
        assert!(store.list_relations("g").unwrap().is_empty());
        assert!(store.delete_entity(b.id).is_err());
    }

    // ---- graph store: relations ----

    #[test]
    fn test_upsert_relation_dedups_by_triple() {
        let store = MemoryGraphStore::new();
        let a = store.create_entity(draft_entity("g", "A", "Org")).unwrap();
        let b = store.create_entity(draft_entity("g", "B", "Org")).unwrap();

        let mut draft = draft_relation("g", a.id, b.id, "supplies");
        draft.confidence = 0.6;
        draft.description = "first".to_string();
        let first = store.upsert_relation(draft.clone()).unwrap();

        // Lower confidence duplicate leaves the stored record alone.
        draft.confidence = 0.4;
        draft.description = "worse".to_string();
        let kept = store.upsert_relation(draft.clone()).unwrap();
        assert_eq!(kept.id, first.id);
        assert!((kept.confidence - 0.6).abs() < f32::EPSILON);
        assert_eq!(kept.description, "first");

        // Higher confidence duplicate refreshes confidence and description.
        draft.confidence = 0.9;
        draft.description = "better".to_string();
        let refreshed = store.upsert_relation(draft).unwrap();
        assert_eq!(refreshed.id, first.id);
        assert!((refreshed.confidence - 0.9).abs() < f32::EPSILON);
        assert_eq!(refreshed.description, "better");

        assert_eq!(store.list_relations("g").unwrap().len(), 1);
    }

    #[test]
    fn test_upsert_relation_rejects_dangling_endpoints() {
        let store = MemoryGraphStore::new();
        let a = store.create_entity(draft_entity("g", "A", "Org")).unwrap();
        assert!(store
            .upsert_relation(draft_relation("g", a.id, 999, "supplies"))
            .is_err());
        assert!(store
            .upsert_relation(draft_relation("g", 999, a.id, "supplies"))
            .is_err());
    }

    #[test]
    fn test_upsert_relation_clamps_confidence() {
        let store = MemoryGraphStore::new();
        let a = store.create_entity(draft_entity("g", "A", "Org")).unwrap();
        let b = store.create_entity(draft_entity("g", "B", "Org")).unwrap();
        let mut draft = draft_relation("g", a.id, b.id, "supplies");
        draft.confidence = 3.5;
        let relation = store.upsert_relation(draft).unwrap();
        assert!((relation.confidence - 1.0).abs() < f32::EPSILON);
    }

    #[test]
    fn test_relations_for_entity_covers_both_directions() {
        let store = MemoryGraphStore::new();
        let a = store.create_entity(draft_entity("g", "A", "Org")).unwrap();
        let b = store.create_entity(draft_entity("g", "B", "Org")).unwrap();
        let c = store.create_entity(draft_entity("g", "C", "Org")).unwrap();
        store
            .upsert_relation(draft_relation("g", a.id, b.id, "supplies"))
            .unwrap();
        store
            .upsert_relation(draft_relation("g", c.id, a.id, "audits"))
            .unwrap();
        store
            .upsert_relation(draft_relation("g", b.id, c.id, "supplies"))
            .unwrap();

        let touching_a = store.relations_for_entity(a.id).unwrap();
        assert_eq!(touching_a.len(), 2);
        assert!(touching_a.iter().all(|r| r.touches(a.id)));
    }

    // ---- graph store: merge ----

    #[test]
    fn test_merge_entities_rewires_and_deletes_source() {
        let store = MemoryGraphStore::new();
        let a = store.create_entity(draft_entity("g", "A", "Org")).unwrap();
        let b = store.create_entity(draft_entity("g", "B", "Org")).unwrap();
        let c = store.create_entity(draft_entity("g", "C", "Org")).unwrap();
        store
            .upsert_relation(draft_relation("g", a.id, c.id, "supplies"))
            .unwrap();
        store
            .upsert_relation(draft_relation("g", c.id, a.id, "audits"))
            .unwrap();

        let mut target = b.clone();
        target.frequency = a.frequency + b.frequency;
        let merged = store
            .merge_entities(&EntityMergePlan {
                source_id: a.id,
                target,
            })
            .unwrap();
        assert_eq!(merged.id, b.id);
        assert_eq!(merged.version, b.version + 1);
        assert!(store.get_entity(a.id).unwrap().is_none());

        let relations = store.list_relations("g").unwrap();
        assert_eq!(relations.len(), 2);
        assert!(relations.iter().all(|r| !r.touches(a.id)));
        assert!(relations.iter().all(|r| r.touches(b.id)));
    }

    #[test]
    fn test_merge_entities_keeps_source_target_relation_as_self_loop() {
        let store = MemoryGraphStore::new();
        let a = store.create_entity(draft_entity("g", "A", "Org")).unwrap();
        let b = store.create_entity(draft_entity("g", "B", "Org")).unwrap();
        store
            .upsert_relation(draft_relation("g", a.id, b.id, "supplies"))
            .unwrap();

        store
            .merge_entities(&EntityMergePlan {
                source_id: a.id,
                target: b.clone(),
            })
            .unwrap();
        let relations = store.list_relations("g").unwrap();
        assert_eq!(relations.len(), 1);
        assert_eq!(relations[0].source_entity_id, b.id);
        assert_eq!(relations[0].target_entity_id, b.id);
    }

    #[test]
    fn test_merge_entities_rejects_stale_target_version() {
        let store = MemoryGraphStore::new();
        let a = store.create_entity(draft_entity("g", "A", "Org")).unwrap();
        let b = store.create_entity(draft_entity("g", "B", "Org")).unwrap();

        // Bump the target behind the plan's back.
        let mut bumped = b.clone();
        bumped.frequency = 7;
        assert!(store.update_entity(&bumped, 1).unwrap());

        let err = store
            .merge_entities(&EntityMergePlan {
                source_id: a.id,
                target: b.clone(),
            })
            .unwrap_err();
        assert!(err.to_string().contains("changed during merge"));
        // Nothing was mutated.
        assert!(store.get_entity(a.id).unwrap().is_some());
        assert_eq!(store.get_entity(b.id).unwrap().unwrap().frequency, 7);
    }

    #[test]
    fn test_merge_entities_validates_before_mutating() {
        let store = MemoryGraphStore::new();
        let a = store.create_entity(draft_entity("g1", "A", "Org")).unwrap();
        let b = store.create_entity(draft_entity("g2", "B", "Org")).unwrap();

        // Cross-graph merge is rejected.
        let err = store
            .merge_entities(&EntityMergePlan {
                source_id: a.id,
                target: b.clone(),
            })
            .unwrap_err();
        assert!(err.to_string().contains("different graphs"));
        assert!(store.get_entity(a.id).unwrap().is_some());

        // Missing source is rejected.
        assert!(store
            .merge_entities(&EntityMergePlan {
                source_id: 999,
                target: b.clone(),
            })
            .is_err());

        // Self merge is rejected.
        let plan = EntityMergePlan {
            source_id: b.id,
            target: b.clone(),
        };
        assert!(store.merge_entities(&plan).is_err());
    }
}
