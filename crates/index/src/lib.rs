pub mod memory_index;
pub mod neo4j_index;

pub use memory_index::MemoryGraphStore;
pub use neo4j_index::Neo4jStore;

use async_trait::async_trait;
use extract::{ExtractedEntity, ExtractedTriple, ExtractionRecord};
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum IndexError {
    #[error("{context}: {source}")]
    Neo4j {
        context: &'static str,
        #[source]
        source: neo4rs::Error,
    },

    /// The store refused the batch; nothing from it was committed.
    #[error("batch rejected: {0}")]
    Rejected(String),
}

/// One chunk's contribution to a merge batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GraphRow {
    pub chunk_id: String,
    pub entities: Vec<ExtractedEntity>,
    pub triples: Vec<ExtractedTriple>,
}

impl GraphRow {
    /// A row for the record, or `None` when it has nothing to merge.
    pub fn from_record(record: ExtractionRecord) -> Option<Self> {
        if record.is_empty() {
            return None;
        }
        Some(Self {
            chunk_id: record.chunk_id,
            entities: record.entities,
            triples: record.triples,
        })
    }
}

/// A persisted entity. Everything but the key is set on creation only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GraphEntity {
    pub canonical_name: String,
    pub name: String,
    pub types: Vec<String>,
    pub aliases: Vec<String>,
}

/// A persisted relation with provenance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GraphRelation {
    pub subject_canonical: String,
    pub predicate: String,
    pub object_canonical: String,
    pub support_count: u64,
    /// Contributing chunk ids, without duplicates, in first-seen order.
    pub source_chunks: Vec<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct GraphStats {
    pub entity_count: usize,
    pub relation_count: usize,
}

/// The shared graph the pipeline merges into.
///
/// `upsert_batch` applies a whole batch or nothing:
/// 1. every entity of the batch is merged by canonical name, metadata on
///    create only;
/// 2. each chunk gets an idempotent `MENTIONS` link to its entities;
/// 3. triples whose subject or object entity does not exist are dropped;
/// 4. the relation `(subject, predicate, object)` has its `support_count`
///    incremented and the chunk id added to `source_chunks` if missing.
#[async_trait]
pub trait GraphStore: Send + Sync {
    /// Create the uniqueness constraint and lookup indexes. Idempotent.
    async fn ensure_schema(&self) -> Result<(), IndexError>;

    async fn upsert_batch(&self, rows: &[GraphRow]) -> Result<(), IndexError>;

    async fn stats(&self) -> Result<GraphStats, IndexError>;
}
