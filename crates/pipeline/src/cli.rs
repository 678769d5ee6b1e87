use clap::{Parser, ValueEnum};
use extract::RateLimitPolicy;
use std::path::PathBuf;

use crate::config::{BackendConfig, BatchConfig, GraphConfig, PipelineConfig};
use crate::error::PipelineError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum BackendKind {
    Ollama,
    #[value(name = "openrouter")]
    OpenRouter,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum GraphKind {
    Neo4j,
    Memory,
}

/// Build a knowledge graph from a Q&A corpus.
#[derive(Debug, Parser)]
#[command(name = "build_kg", version, about)]
pub struct Cli {
    /// JSONL corpus to read
    #[arg(long, env = "KG_CORPUS", default_value = "kb.jsonl")]
    pub corpus: PathBuf,

    /// Directory holding one extraction record per chunk
    #[arg(long, env = "KG_CACHE_DIR", default_value = "kg_cache")]
    pub cache_dir: PathBuf,

    #[arg(long, env = "KG_BACKEND", value_enum, default_value_t = BackendKind::Ollama)]
    pub backend: BackendKind,

    #[arg(long, env = "KG_GRAPH", value_enum, default_value_t = GraphKind::Neo4j)]
    pub graph: GraphKind,

    /// Chunks sent per backend call
    #[arg(long, env = "KG_BUNDLE_SIZE", default_value_t = 6)]
    pub bundle_size: usize,

    /// Queued rows that trigger a graph write
    #[arg(long, env = "KG_BATCH_UPSERT", default_value_t = 50)]
    pub batch_upsert: usize,

    /// Triples per item requested from the model
    #[arg(long, env = "KG_MAX_TRIPLES", default_value_t = 8)]
    pub max_triples: usize,

    /// Only consider the first N selected chunks
    #[arg(long, env = "KG_DRY_LIMIT")]
    pub dry_limit: Option<usize>,

    /// Category to process; `all` processes everything with `qa` first
    #[arg(long, env = "KG_PROCESS_KIND", default_value = "qa")]
    pub process_kind: String,

    /// Pause after each successful remote call, in seconds
    #[arg(long, env = "KG_RATE_LIMIT_S", default_value_t = 3.5)]
    pub rate_limit_secs: f64,

    /// Longest wait accepted on a 429 before giving up, in seconds
    #[arg(long, env = "KG_MAX_WAIT_ON_429", default_value_t = 90.0)]
    pub max_wait_secs: f64,

    #[arg(long, env = "OLLAMA_HOST", default_value = "http://localhost:11434")]
    pub ollama_host: String,

    #[arg(long, env = "OLLAMA_KG_MODEL", default_value = "qwen2.5:7b-instruct-q4_K_M")]
    pub ollama_model: String,

    #[arg(long, env = "OLLAMA_NUM_CTX", default_value_t = 4096)]
    pub ollama_num_ctx: u32,

    #[arg(long, env = "OPENROUTER_MODEL", default_value = "deepseek/deepseek-chat-v3.1:free")]
    pub openrouter_model: String,

    #[arg(long, env = "NEO4J_URI", default_value = "bolt://localhost:7687")]
    pub neo4j_uri: String,

    #[arg(long, env = "NEO4J_USER", default_value = "neo4j")]
    pub neo4j_user: String,

    #[arg(
        long,
        env = "NEO4J_PASSWORD",
        default_value = "neo4j_password",
        hide_env_values = true
    )]
    pub neo4j_password: String,

    /// Delete every cached extraction before the run
    #[arg(long)]
    pub clear_cache: bool,

    /// Re-upsert cached records instead of extracting
    #[arg(long, conflicts_with = "clear_cache")]
    pub replay_cache: bool,
}

fn secs_to_ms(flag: &str, secs: f64) -> Result<u64, PipelineError> {
    if !secs.is_finite() || secs < 0.0 {
        return Err(PipelineError::Config(format!(
            "{flag} must be a non-negative number of seconds"
        )));
    }
    Ok((secs * 1000.0).round() as u64)
}

impl Cli {
    /// Convert to the runtime configuration. The API key is passed in
    /// separately so it never appears in `--help` output.
    pub fn into_config(
        self,
        openrouter_api_key: Option<String>,
    ) -> Result<PipelineConfig, PipelineError> {
        let backend = match self.backend {
            BackendKind::Ollama => BackendConfig::Ollama {
                host: self.ollama_host,
                model: self.ollama_model,
                num_ctx: self.ollama_num_ctx,
            },
            BackendKind::OpenRouter => BackendConfig::OpenRouter {
                api_key: openrouter_api_key,
                model: self.openrouter_model,
                rate_limit: RateLimitPolicy {
                    min_interval_ms: secs_to_ms("--rate-limit-secs", self.rate_limit_secs)?,
                    max_wait_ms: secs_to_ms("--max-wait-secs", self.max_wait_secs)?,
                    ..RateLimitPolicy::default()
                },
            },
        };

        let graph = match self.graph {
            GraphKind::Neo4j => GraphConfig::Neo4j {
                uri: self.neo4j_uri,
                user: self.neo4j_user,
                password: self.neo4j_password,
            },
            GraphKind::Memory => GraphConfig::Memory,
        };

        Ok(PipelineConfig {
            corpus: self.corpus,
            cache_dir: self.cache_dir,
            backend,
            graph,
            batching: BatchConfig {
                bundle_size: self.bundle_size,
                batch_upsert: self.batch_upsert,
                max_triples: self.max_triples,
            },
            process_kind: self.process_kind,
            dry_limit: self.dry_limit,
        })
    }
}
