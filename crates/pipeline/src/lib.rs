pub mod cache;
pub mod cli;
pub mod config;
pub mod error;
pub mod metrics;
pub mod orchestrator;

pub use cache::{CacheError, ExtractionCache};
pub use cli::Cli;
pub use config::{BackendConfig, BatchConfig, GraphConfig, PipelineConfig};
pub use error::PipelineError;
pub use metrics::RunReport;
pub use orchestrator::{Pipeline, RunFailure};
