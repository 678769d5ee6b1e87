use extract::ExtractError;
use index::IndexError;
use ingest::IngestError;
use thiserror::Error;

use crate::cache::CacheError;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("invalid configuration: {0}")]
    Config(String),

    #[error(transparent)]
    Ingest(#[from] IngestError),

    /// A bundle could not be extracted. Nothing from it was cached.
    #[error("extraction failed for bundle starting at {first_chunk_id}: {source}")]
    Extraction {
        first_chunk_id: String,
        #[source]
        source: ExtractError,
    },

    #[error("graph store error: {0}")]
    Graph(#[from] IndexError),

    #[error(transparent)]
    Cache(#[from] CacheError),
}
