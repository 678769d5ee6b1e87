use serde::Serialize;
use std::fmt;
use std::time::{Duration, Instant};
use tracing::info;

/// Counters for one pipeline run. Returned on success and carried by
/// [`crate::RunFailure`] so the summary can always be printed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunReport {
    /// Chunks selected for this run.
    pub total: usize,
    /// Chunks that already had a cache entry when the run started.
    pub already_cached: usize,
    /// Chunks with a cache entry at the end of the run.
    pub processed: usize,
    /// Chunks extracted and cached during this run.
    pub extracted: usize,
    /// Rows committed to the graph during this run.
    pub upserted_rows: usize,
    /// Backend calls that succeeded.
    pub bundles: usize,
    /// The run stopped early on request.
    pub interrupted: bool,
}

impl RunReport {
    pub fn new(total: usize, already_cached: usize) -> Self {
        Self {
            total,
            already_cached,
            processed: already_cached,
            ..Self::default()
        }
    }
}

impl fmt::Display for RunReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Processed {}/{}. Upserted rows: {}.",
            self.processed, self.total, self.upserted_rows
        )
    }
}

/// Progress logging for the pending part of a run.
pub struct Progress {
    start: Instant,
    pending: usize,
    done: usize,
}

impl Progress {
    pub fn start(pending: usize) -> Self {
        Self {
            start: Instant::now(),
            pending,
            done: 0,
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    /// Remaining time, extrapolated from the average so far.
    pub fn eta(&self) -> Option<Duration> {
        if self.done == 0 || self.done >= self.pending {
            return None;
        }
        let per_chunk = self.elapsed().as_secs_f64() / self.done as f64;
        Some(Duration::from_secs_f64(per_chunk * (self.pending - self.done) as f64))
    }

    pub fn percent(&self) -> f64 {
        if self.pending == 0 {
            return 100.0;
        }
        self.done as f64 * 100.0 / self.pending as f64
    }

    /// Record a finished bundle. `queued` is the number of rows waiting for
    /// the next graph flush, `upserted` the rows committed so far.
    pub fn advance(
        &mut self,
        chunks: usize,
        first_chunk_id: &str,
        queued: usize,
        upserted: usize,
    ) {
        self.done = (self.done + chunks).min(self.pending);
        info!(
            done = self.done,
            pending = self.pending,
            queued,
            upserted,
            first_chunk_id,
            pct = %format!("{:.1}", self.percent()),
            eta_secs = ?self.eta().map(|d| d.as_secs()),
            "Bundle extracted"
        );
    }
}
