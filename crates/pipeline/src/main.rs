use anyhow::{Context, Result};
use clap::Parser;
use extract::BatchExtractor;
use pipeline::{Cli, ExtractionCache, Pipeline, PipelineConfig, RunReport};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let clear_cache = cli.clear_cache;
    let replay = cli.replay_cache;
    let api_key = std::env::var("OPENROUTER_API_KEY").ok();

    let config = cli.into_config(api_key)?;
    config.validate()?;
    info!(config = %serde_json::to_string(&config)?, "Configuration");

    run(&config, clear_cache, replay).await
}

async fn run(config: &PipelineConfig, clear_cache: bool, replay: bool) -> Result<()> {
    let backend = config.build_backend().context("Failed to set up extraction backend")?;
    let extractor = BatchExtractor::new(backend, config.batching.max_triples);

    let chunks = ingest::load_corpus(&config.corpus, &config.load_options())
        .await
        .context("Failed to load corpus")?;

    let cache = config
        .open_cache()
        .await
        .context("Failed to open extraction cache")?;
    if cache.is_scratch() {
        warn!(
            dir = %cache.dir().display(),
            "In-memory graph: using a scratch cache that is deleted at exit"
        );
    }
    if clear_cache {
        let removed = cache.clear().await.context("Failed to clear extraction cache")?;
        warn!(removed, dir = %cache.dir().display(), "Cleared extraction cache");
    }

    let graph = config
        .connect_graph()
        .await
        .context("Failed to connect to graph store")?;
    graph.ensure_schema().await.context("Failed to prepare graph schema")?;

    let stop = Arc::new(AtomicBool::new(false));
    let signal_flag = Arc::clone(&stop);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received; stopping after the current bundle");
            signal_flag.store(true, Ordering::SeqCst);
        }
    });

    let pipeline = Pipeline::new(
        &extractor,
        graph.as_ref(),
        &cache,
        config.batching.bundle_size,
        config.batching.batch_upsert,
    )
    .with_stop_flag(stop);

    let outcome = if replay {
        pipeline.replay_cache(&chunks).await
    } else {
        pipeline.run(&chunks).await
    };

    match outcome {
        Ok(report) => {
            print_summary(&report, &cache);
            if let Ok(stats) = graph.stats().await {
                info!(
                    entities = stats.entity_count,
                    relations = stats.relation_count,
                    "Graph totals"
                );
            }
            Ok(())
        }
        Err(failure) => {
            print_summary(&failure.report, &cache);
            Err(anyhow::Error::new(failure.source).context("Knowledge graph build stopped"))
        }
    }
}

fn print_summary(report: &RunReport, cache: &ExtractionCache) {
    let suffix = if report.interrupted { " (interrupted)" } else { "" };
    println!("[done] {report} Cache: {}{suffix}", cache.dir().display());
}
