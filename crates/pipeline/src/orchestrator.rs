use extract::{BatchExtractor, BundleItem};
use index::{GraphRow, GraphStore};
use ingest::ContentChunk;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use thiserror::Error;
use tracing::{error, info, warn};

use crate::cache::ExtractionCache;
use crate::error::PipelineError;
use crate::metrics::{Progress, RunReport};

/// A run that stopped on an error, with the counters reached so far.
#[derive(Debug, Error)]
#[error("run stopped after {}/{} chunks", .report.processed, .report.total)]
pub struct RunFailure {
    pub report: RunReport,
    #[source]
    pub source: PipelineError,
}

/// Drives chunks through extraction, the cache and the graph, one bundle at
/// a time.
///
/// A chunk is written to the cache right after its bundle is extracted, and
/// its row is queued for the graph. Rows are flushed once `batch_upsert` of
/// them are queued and at the end of the run. Chunks already in the cache are
/// never sent to the backend again.
pub struct Pipeline<'a> {
    extractor: &'a BatchExtractor,
    graph: &'a dyn GraphStore,
    cache: &'a ExtractionCache,
    bundle_size: usize,
    batch_upsert: usize,
    stop: Option<Arc<AtomicBool>>,
}

impl<'a> Pipeline<'a> {
    pub fn new(
        extractor: &'a BatchExtractor,
        graph: &'a dyn GraphStore,
        cache: &'a ExtractionCache,
        bundle_size: usize,
        batch_upsert: usize,
    ) -> Self {
        Self {
            extractor,
            graph,
            cache,
            bundle_size: bundle_size.max(1),
            batch_upsert: batch_upsert.max(1),
            stop: None,
        }
    }

    /// Check `flag` between bundles and stop cleanly once it is set.
    pub fn with_stop_flag(mut self, flag: Arc<AtomicBool>) -> Self {
        self.stop = Some(flag);
        self
    }

    fn stop_requested(&self) -> bool {
        self.stop.as_ref().is_some_and(|flag| flag.load(Ordering::SeqCst))
    }

    pub async fn run(&self, chunks: &[ContentChunk]) -> Result<RunReport, RunFailure> {
        let mut pending = Vec::new();
        for chunk in chunks {
            if !self.cache.exists(&chunk.id).await {
                pending.push(chunk);
            }
        }

        let mut report = RunReport::new(chunks.len(), chunks.len() - pending.len());
        info!(
            total = report.total,
            already_cached = report.already_cached,
            pending = pending.len(),
            est_tokens = pending.iter().map(|c| c.estimated_tokens()).sum::<usize>(),
            backend = %self.extractor.backend().describe(),
            "Starting extraction"
        );

        let mut queue: Vec<GraphRow> = Vec::new();
        let mut progress = Progress::start(pending.len());

        for bundle in pending.chunks(self.bundle_size) {
            if self.stop_requested() {
                warn!(
                    processed = report.processed,
                    "Stop requested; leaving remaining chunks for the next run"
                );
                report.interrupted = true;
                break;
            }

            let items: Vec<BundleItem> = bundle
                .iter()
                .map(|chunk| BundleItem {
                    id: chunk.id.clone(),
                    text: chunk.text.clone(),
                })
                .collect();
            let first_chunk_id = items[0].id.clone();

            let records = match self.extractor.extract_records(&items).await {
                Ok(records) => records,
                Err(source) => {
                    error!(
                        first_chunk_id = %first_chunk_id,
                        error = %source,
                        "Bundle extraction failed"
                    );
                    let err = PipelineError::Extraction { first_chunk_id, source };
                    return Err(self.halt(&mut queue, report, err).await);
                }
            };
            report.bundles += 1;

            for record in records {
                if let Err(err) = self.cache.write(&record.chunk_id, &record).await {
                    return Err(self.halt(&mut queue, report, err.into()).await);
                }
                report.extracted += 1;
                report.processed += 1;

                if let Some(row) = GraphRow::from_record(record) {
                    queue.push(row);
                }
            }
            progress.advance(
                bundle.len(),
                &first_chunk_id,
                queue.len(),
                report.upserted_rows,
            );

            if queue.len() >= self.batch_upsert {
                if let Err(err) = self.flush(&mut queue, &mut report).await {
                    return Err(RunFailure { report, source: err });
                }
            }
        }

        if let Err(err) = self.flush(&mut queue, &mut report).await {
            return Err(RunFailure { report, source: err });
        }

        info!(
            processed = report.processed,
            total = report.total,
            upserted_rows = report.upserted_rows,
            bundles = report.bundles,
            elapsed_secs = progress.elapsed().as_secs(),
            "Extraction finished"
        );
        Ok(report)
    }

    /// Upsert every non-empty cached record for `chunks` without calling the
    /// backend. Relations that are already in the graph get their
    /// `support_count` incremented again.
    pub async fn replay_cache(&self, chunks: &[ContentChunk]) -> Result<RunReport, RunFailure> {
        let mut report = RunReport {
            total: chunks.len(),
            ..RunReport::default()
        };
        let mut queue: Vec<GraphRow> = Vec::new();

        for chunk in chunks {
            if !self.cache.exists(&chunk.id).await {
                continue;
            }
            let record = match self.cache.read(&chunk.id).await {
                Ok(record) => record,
                Err(err) => return Err(self.halt(&mut queue, report, err.into()).await),
            };
            report.already_cached += 1;
            report.processed += 1;

            if let Some(row) = GraphRow::from_record(record) {
                queue.push(row);
            }
            if queue.len() >= self.batch_upsert {
                if self.stop_requested() {
                    report.interrupted = true;
                    break;
                }
                if let Err(err) = self.flush(&mut queue, &mut report).await {
                    return Err(RunFailure { report, source: err });
                }
            }
        }

        if let Err(err) = self.flush(&mut queue, &mut report).await {
            return Err(RunFailure { report, source: err });
        }

        info!(
            replayed = report.processed,
            upserted_rows = report.upserted_rows,
            "Cache replay finished"
        );
        Ok(report)
    }

    async fn flush(
        &self,
        queue: &mut Vec<GraphRow>,
        report: &mut RunReport,
    ) -> Result<(), PipelineError> {
        if queue.is_empty() {
            return Ok(());
        }

        self.graph.upsert_batch(queue).await?;
        report.upserted_rows += queue.len();
        info!(rows = queue.len(), upserted_rows = report.upserted_rows, "Upserted batch");
        queue.clear();
        Ok(())
    }

    /// Queued rows are already cached and would otherwise never reach the
    /// graph, so they are flushed before stopping.
    async fn halt(
        &self,
        queue: &mut Vec<GraphRow>,
        mut report: RunReport,
        source: PipelineError,
    ) -> RunFailure {
        if let Err(flush_err) = self.flush(queue, &mut report).await {
            error!(
                rows = queue.len(),
                error = %flush_err,
                "Could not flush queued rows before stopping"
            );
        }
        RunFailure { report, source }
    }
}
