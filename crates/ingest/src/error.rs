use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum IngestError {
    /// The corpus file does not exist. Treated as a configuration error.
    #[error("corpus not found at {0}")]
    CorpusNotFound(PathBuf),

    #[error("failed to read corpus {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}
