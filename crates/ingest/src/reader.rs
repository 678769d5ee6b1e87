use serde::Deserialize;
use std::collections::HashSet;
use std::path::Path;
use tokio::fs;
use tracing::{info, warn};

use crate::chunk::ContentChunk;
use crate::error::IngestError;

/// Which categories of the corpus to process, and in what order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum CategoryFilter {
    /// Every record, in file order.
    #[default]
    All,
    /// Only records of this category.
    Only(String),
    /// Every record, with this category moved to the front (stable).
    Prioritize(String),
}

#[derive(Debug, Clone, Default)]
pub struct LoadOptions {
    pub filter: CategoryFilter,
    /// Cap on the number of chunks returned, applied after filtering.
    pub limit: Option<usize>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoadStats {
    pub lines: usize,
    pub loaded: usize,
    pub skipped_invalid: usize,
    pub skipped_duplicate: usize,
}

/// One line of the JSONL corpus. Unknown fields are ignored.
#[derive(Deserialize)]
struct CorpusRecord {
    id: String,
    question: String,
    answer: String,
    url: String,
    kind: String,
}

pub struct CorpusReader;

impl CorpusReader {
    /// Read a JSONL corpus and return its chunks, filtered and capped.
    pub async fn load(
        path: &Path,
        options: &LoadOptions,
    ) -> Result<Vec<ContentChunk>, IngestError> {
        let content = match fs::read_to_string(path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(IngestError::CorpusNotFound(path.to_path_buf()));
            }
            Err(source) => {
                return Err(IngestError::Io {
                    path: path.to_path_buf(),
                    source,
                });
            }
        };

        let (chunks, stats) = Self::parse_lines(&content);
        info!(
            path = %path.display(),
            lines = stats.lines,
            loaded = stats.loaded,
            skipped_invalid = stats.skipped_invalid,
            skipped_duplicate = stats.skipped_duplicate,
            "Corpus loaded"
        );

        Ok(select(chunks, options))
    }

    /// Parse JSONL content. Blank lines are ignored; malformed or incomplete
    /// records and repeated ids are skipped.
    pub fn parse_lines(content: &str) -> (Vec<ContentChunk>, LoadStats) {
        let mut stats = LoadStats::default();
        let mut seen = HashSet::new();
        let mut chunks = Vec::new();

        for (line_no, line) in content.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            stats.lines += 1;

            let record: CorpusRecord = match serde_json::from_str(line) {
                Ok(record) => record,
                Err(e) => {
                    warn!(line = line_no + 1, error = %e, "Skipping corpus record");
                    stats.skipped_invalid += 1;
                    continue;
                }
            };

            if !seen.insert(record.id.clone()) {
                warn!(line = line_no + 1, id = %record.id, "Skipping duplicate chunk id");
                stats.skipped_duplicate += 1;
                continue;
            }

            chunks.push(ContentChunk::from_qa(
                record.id,
                &record.question,
                &record.answer,
                record.url,
                record.kind,
            ));
        }

        stats.loaded = chunks.len();
        (chunks, stats)
    }
}

/// Apply the category filter and the size cap.
pub fn select(mut chunks: Vec<ContentChunk>, options: &LoadOptions) -> Vec<ContentChunk> {
    match &options.filter {
        CategoryFilter::All => {}
        CategoryFilter::Only(category) => chunks.retain(|c| &c.category == category),
        CategoryFilter::Prioritize(category) => {
            chunks.sort_by_key(|c| if &c.category == category { 0 } else { 1 });
        }
    }

    if let Some(limit) = options.limit {
        chunks.truncate(limit);
    }

    chunks
}
