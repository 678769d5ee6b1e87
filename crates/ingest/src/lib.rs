pub mod chunk;
pub mod error;
pub mod reader;

pub use chunk::ContentChunk;
pub use error::IngestError;
pub use reader::{CategoryFilter, CorpusReader, LoadOptions, LoadStats};

use std::path::Path;

/// Load the corpus at `path` with the given filtering options.
pub async fn load_corpus(
    path: &Path,
    options: &LoadOptions,
) -> Result<Vec<ContentChunk>, IngestError> {
    CorpusReader::load(path, options).await
}
