use extract::{ExtractionBackend, OllamaBackend, OpenRouterBackend, RateLimitPolicy};
use index::{GraphStore, MemoryGraphStore, Neo4jStore};
use ingest::{CategoryFilter, LoadOptions};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::cache::ExtractionCache;
use crate::error::PipelineError;

/// Category that `process_kind = "all"` moves to the front of the run.
pub const PRIORITY_KIND: &str = "qa";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub corpus: PathBuf,
    pub cache_dir: PathBuf,
    pub backend: BackendConfig,
    pub graph: GraphConfig,
    pub batching: BatchConfig,
    /// Category to process, or `all` for every record with `qa` first.
    pub process_kind: String,
    /// Cap on the number of chunks considered, for trial runs.
    pub dry_limit: Option<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum BackendConfig {
    Ollama {
        host: String,
        model: String,
        num_ctx: u32,
    },
    OpenRouter {
        #[serde(skip_serializing, default)]
        api_key: Option<String>,
        model: String,
        rate_limit: RateLimitPolicy,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum GraphConfig {
    Neo4j {
        uri: String,
        user: String,
        #[serde(skip_serializing, default)]
        password: String,
    },
    /// In-process graph, discarded at exit.
    Memory,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct BatchConfig {
    /// Chunks per backend call.
    pub bundle_size: usize,
    /// Queued rows that trigger a graph flush.
    pub batch_upsert: usize,
    /// Triples per item requested in the prompt.
    pub max_triples: usize,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self::Ollama {
            host: "http://localhost:11434".to_string(),
            model: "qwen2.5:7b-instruct-q4_K_M".to_string(),
            num_ctx: 4096,
        }
    }
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self::Neo4j {
            uri: "bolt://localhost:7687".to_string(),
            user: "neo4j".to_string(),
            password: "neo4j_password".to_string(),
        }
    }
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            bundle_size: 6,
            batch_upsert: 50,
            max_triples: 8,
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            corpus: PathBuf::from("kb.jsonl"),
            cache_dir: PathBuf::from("kg_cache"),
            backend: BackendConfig::default(),
            graph: GraphConfig::default(),
            batching: BatchConfig::default(),
            process_kind: PRIORITY_KIND.to_string(),
            dry_limit: None,
        }
    }
}

impl PipelineConfig {
    /// Reject settings that would make the run meaningless or doomed.
    pub fn validate(&self) -> Result<(), PipelineError> {
        let batching = &self.batching;
        if batching.bundle_size == 0 {
            return Err(PipelineError::Config("bundle size must be at least 1".to_string()));
        }
        if batching.batch_upsert == 0 {
            return Err(PipelineError::Config(
                "batch upsert threshold must be at least 1".to_string(),
            ));
        }
        if batching.max_triples == 0 {
            return Err(PipelineError::Config(
                "max triples per item must be at least 1".to_string(),
            ));
        }
        if self.process_kind.trim().is_empty() {
            return Err(PipelineError::Config("process kind must not be empty".to_string()));
        }

        if let BackendConfig::OpenRouter { api_key, .. } = &self.backend {
            if api_key.as_deref().is_none_or(|k| k.trim().is_empty()) {
                return Err(PipelineError::Config(
                    "OPENROUTER_API_KEY is required for the openrouter backend".to_string(),
                ));
            }
        }

        Ok(())
    }

    pub fn load_options(&self) -> LoadOptions {
        let kind = self.process_kind.trim();
        let filter = if kind.eq_ignore_ascii_case("all") {
            CategoryFilter::Prioritize(PRIORITY_KIND.to_string())
        } else {
            CategoryFilter::Only(kind.to_string())
        };

        LoadOptions {
            filter,
            limit: self.dry_limit,
        }
    }

    /// The cache for this run. An in-memory graph is discarded at exit, so
    /// its run gets a scratch cache instead of `cache_dir`; otherwise a later
    /// persistent run would skip chunks whose rows never reached it.
    pub async fn open_cache(&self) -> Result<ExtractionCache, PipelineError> {
        let cache = match self.graph {
            GraphConfig::Memory => ExtractionCache::scratch()?,
            GraphConfig::Neo4j { .. } => ExtractionCache::open(&self.cache_dir).await?,
        };
        Ok(cache)
    }

    pub fn build_backend(&self) -> Result<Box<dyn ExtractionBackend>, PipelineError> {
        let backend: Box<dyn ExtractionBackend> = match &self.backend {
            BackendConfig::Ollama {
                host,
                model,
                num_ctx,
            } => Box::new(
                OllamaBackend::new(host.clone(), model.clone(), *num_ctx).map_err(config_error)?,
            ),
            BackendConfig::OpenRouter {
                api_key,
                model,
                rate_limit,
            } => Box::new(
                OpenRouterBackend::new(api_key.clone(), model.clone(), rate_limit.clone())
                    .map_err(config_error)?,
            ),
        };
        Ok(backend)
    }

    pub async fn connect_graph(&self) -> Result<Box<dyn GraphStore>, PipelineError> {
        let store: Box<dyn GraphStore> = match &self.graph {
            GraphConfig::Neo4j { uri, user, password } => {
                Box::new(Neo4jStore::connect(uri, user, password).await?)
            }
            GraphConfig::Memory => Box::new(MemoryGraphStore::new()),
        };
        Ok(store)
    }
}

fn config_error(err: extract::ExtractError) -> PipelineError {
    PipelineError::Config(err.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn openrouter(api_key: Option<&str>) -> PipelineConfig {
        PipelineConfig {
            backend: BackendConfig::OpenRouter {
                api_key: api_key.map(str::to_string),
                model: "deepseek/deepseek-chat-v3.1:free".to_string(),
                rate_limit: RateLimitPolicy::default(),
            },
            ..PipelineConfig::default()
        }
    }

    #[test]
    fn test_defaults_are_valid() {
        let config = PipelineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.batching.bundle_size, 6);
        assert_eq!(config.batching.batch_upsert, 50);
        assert_eq!(config.batching.max_triples, 8);
    }

    #[test]
    fn test_zero_sizes_are_rejected() {
        for batching in [
            BatchConfig {
                bundle_size: 0,
                ..BatchConfig::default()
            },
            BatchConfig {
                batch_upsert: 0,
                ..BatchConfig::default()
            },
            BatchConfig {
                max_triples: 0,
                ..BatchConfig::default()
            },
        ] {
            let config = PipelineConfig {
                batching,
                ..PipelineConfig::default()
            };
            assert!(matches!(config.validate(), Err(PipelineError::Config(_))));
        }
    }

    #[test]
    fn test_openrouter_requires_key() {
        assert!(openrouter(None).validate().is_err());
        assert!(openrouter(Some("  ")).validate().is_err());
        assert!(openrouter(Some("sk-test")).validate().is_ok());
    }

    #[test]
    fn test_missing_key_fails_backend_construction() {
        assert!(matches!(
            openrouter(None).build_backend(),
            Err(PipelineError::Config(_))
        ));
        assert!(openrouter(Some("sk-test")).build_backend().is_ok());
    }

    #[test]
    fn test_process_kind_selects_filter() {
        let config = PipelineConfig {
            dry_limit: Some(10),
            ..PipelineConfig::default()
        };
        let options = config.load_options();
        assert_eq!(options.filter, CategoryFilter::Only("qa".to_string()));
        assert_eq!(options.limit, Some(10));

        let config = PipelineConfig {
            process_kind: "all".to_string(),
            ..PipelineConfig::default()
        };
        assert_eq!(
            config.load_options().filter,
            CategoryFilter::Prioritize("qa".to_string())
        );
    }

    #[test]
    fn test_secrets_are_not_serialized() {
        let json = serde_json::to_string(&openrouter(Some("sk-secret"))).unwrap();
        assert!(!json.contains("sk-secret"));
        assert!(!json.contains("neo4j_password"));
    }

    #[tokio::test]
    async fn test_persistent_graph_uses_cache_dir() {
        let tmp = tempfile::tempdir().unwrap();
        let config = PipelineConfig {
            cache_dir: tmp.path().join("kg_cache"),
            ..PipelineConfig::default()
        };

        let cache = config.open_cache().await.unwrap();

        assert!(!cache.is_scratch());
        assert_eq!(cache.dir(), tmp.path().join("kg_cache"));
    }

    #[tokio::test]
    async fn test_memory_run_leaves_cache_dir_untouched() {
        let tmp = tempfile::tempdir().unwrap();
        let cache_dir = tmp.path().join("kg_cache");
        let chunks = vec![ingest::ContentChunk::from_qa(
            "A".to_string(),
            "What does ferritin measure?",
            "Iron stores.",
            "https://example.org/a".to_string(),
            "qa".to_string(),
        )];
        let reply = r#"[{"id": "A", "entities": [{"name": "Ferritin"}]}]"#;

        let memory_run = PipelineConfig {
            cache_dir: cache_dir.clone(),
            graph: GraphConfig::Memory,
            ..PipelineConfig::default()
        };
        let backend = extract::MockBackend::new();
        backend.push_reply(reply);
        let extractor = extract::BatchExtractor::new(Box::new(backend), 8);
        let cache = memory_run.open_cache().await.unwrap();
        let graph = MemoryGraphStore::new();
        crate::Pipeline::new(&extractor, &graph, &cache, 6, 50)
            .run(&chunks)
            .await
            .unwrap();
        assert!(cache.exists("A").await);

        let real_run = PipelineConfig {
            cache_dir,
            ..PipelineConfig::default()
        };
        let backend = extract::MockBackend::new();
        backend.push_reply(reply);
        let extractor = extract::BatchExtractor::new(Box::new(backend.clone()), 8);
        let cache = real_run.open_cache().await.unwrap();
        let graph = MemoryGraphStore::new();
        let report = crate::Pipeline::new(&extractor, &graph, &cache, 6, 50)
            .run(&chunks)
            .await
            .unwrap();

        assert_eq!(backend.call_count(), 1);
        assert_eq!(report.upserted_rows, 1);
        assert!(graph.entity("ferritin").is_some());
    }
}
