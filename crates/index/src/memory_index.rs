use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError};

use crate::{GraphEntity, GraphRelation, GraphRow, GraphStats, GraphStore, IndexError};

type RelationKey = (String, String, String);

#[derive(Debug, Clone, Default)]
struct GraphState {
    entities: BTreeMap<String, GraphEntity>,
    relations: BTreeMap<RelationKey, GraphRelation>,
    /// chunk id -> canonical names it mentions
    mentions: BTreeMap<String, BTreeSet<String>>,
    schema_ready: bool,
    batches: usize,
}

impl GraphState {
    fn apply(&mut self, rows: &[GraphRow]) {
        for row in rows {
            for entity in &row.entities {
                self.entities
                    .entry(entity.canonical_name.clone())
                    .or_insert_with(|| GraphEntity {
                        canonical_name: entity.canonical_name.clone(),
                        name: entity.name.clone(),
                        types: entity.types.clone(),
                        aliases: entity.aliases.clone(),
                    });
            }
        }

        for row in rows {
            let mentioned = self.mentions.entry(row.chunk_id.clone()).or_default();
            for entity in &row.entities {
                mentioned.insert(entity.canonical_name.clone());
            }
        }

        for row in rows {
            for triple in &row.triples {
                if !self.entities.contains_key(&triple.subject_canonical)
                    || !self.entities.contains_key(&triple.object_canonical)
                {
                    continue;
                }

                let key = (
                    triple.subject_canonical.clone(),
                    triple.predicate.clone(),
                    triple.object_canonical.clone(),
                );
                let relation = self.relations.entry(key).or_insert_with(|| GraphRelation {
                    subject_canonical: triple.subject_canonical.clone(),
                    predicate: triple.predicate.clone(),
                    object_canonical: triple.object_canonical.clone(),
                    support_count: 0,
                    source_chunks: Vec::new(),
                });
                relation.support_count += 1;
                if !relation.source_chunks.contains(&row.chunk_id) {
                    relation.source_chunks.push(row.chunk_id.clone());
                }
            }
        }

        self.batches += 1;
    }
}

/// In-process graph with the same merge protocol as [`crate::Neo4jStore`].
/// Used for tests and for runs that should not touch a database.
#[derive(Debug, Default)]
pub struct MemoryGraphStore {
    state: Mutex<GraphState>,
    fail_next: AtomicBool,
}

impl MemoryGraphStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `upsert_batch` fail without applying anything.
    pub fn fail_next_batch(&self) {
        self.fail_next.store(true, Ordering::SeqCst);
    }

    pub fn entity(&self, canonical_name: &str) -> Option<GraphEntity> {
        self.read(|s| s.entities.get(canonical_name).cloned())
    }

    pub fn entities(&self) -> Vec<GraphEntity> {
        self.read(|s| s.entities.values().cloned().collect())
    }

    pub fn relation(&self, subject: &str, predicate: &str, object: &str) -> Option<GraphRelation> {
        let key = (subject.to_string(), predicate.to_string(), object.to_string());
        self.read(|s| s.relations.get(&key).cloned())
    }

    pub fn relations(&self) -> Vec<GraphRelation> {
        self.read(|s| s.relations.values().cloned().collect())
    }

    /// Canonical names linked to the chunk, sorted.
    pub fn mentions(&self, chunk_id: &str) -> Vec<String> {
        self.read(|s| {
            s.mentions
                .get(chunk_id)
                .map(|m| m.iter().cloned().collect())
                .unwrap_or_default()
        })
    }

    pub fn has_chunk(&self, chunk_id: &str) -> bool {
        self.read(|s| s.mentions.contains_key(chunk_id))
    }

    /// Number of batches committed so far.
    pub fn batch_count(&self) -> usize {
        self.read(|s| s.batches)
    }

    pub fn schema_ready(&self) -> bool {
        self.read(|s| s.schema_ready)
    }

    fn read<T>(&self, f: impl FnOnce(&GraphState) -> T) -> T {
        f(&self.state.lock().unwrap_or_else(PoisonError::into_inner))
    }
}

#[async_trait]
impl GraphStore for MemoryGraphStore {
    async fn ensure_schema(&self) -> Result<(), IndexError> {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .schema_ready = true;
        Ok(())
    }

    async fn upsert_batch(&self, rows: &[GraphRow]) -> Result<(), IndexError> {
        if self.fail_next.swap(false, Ordering::SeqCst) {
            return Err(IndexError::Rejected("injected failure".to_string()));
        }

        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .apply(rows);
        Ok(())
    }

    async fn stats(&self) -> Result<GraphStats, IndexError> {
        Ok(self.read(|s| GraphStats {
            entity_count: s.entities.len(),
            relation_count: s.relations.len(),
        }))
    }
}
