pub mod error;
pub mod llm;
pub mod mock;
pub mod normalizer;
pub mod parser;
pub mod prompt;
pub mod retry;
pub mod schema;

pub use error::ExtractError;
pub use llm::{ExtractionBackend, OllamaBackend, OpenRouterBackend};
pub use mock::MockBackend;
pub use normalizer::{canonical_name, normalize_extraction};
pub use parser::parse_lenient;
pub use retry::{RateLimitPolicy, RateLimitedClient, RawResponse};
pub use schema::{BundleItem, ExtractedEntity, ExtractedTriple, ExtractionRecord};

use serde_json::Value;
use std::collections::HashMap;
use tracing::{debug, warn};

/// Sends bundles of chunks to a backend, one call per bundle.
pub struct BatchExtractor {
    backend: Box<dyn ExtractionBackend>,
    max_triples: usize,
}

impl BatchExtractor {
    pub fn new(backend: Box<dyn ExtractionBackend>, max_triples: usize) -> Self {
        Self {
            backend,
            max_triples,
        }
    }

    pub fn backend(&self) -> &dyn ExtractionBackend {
        self.backend.as_ref()
    }

    /// Extract a bundle and return the raw item for every requested id.
    /// Ids the model left out map to `Value::Null`, i.e. an empty extraction.
    pub async fn extract_bundle(
        &self,
        items: &[BundleItem],
    ) -> Result<HashMap<String, Value>, ExtractError> {
        if items.is_empty() {
            return Ok(HashMap::new());
        }

        let prompt = prompt::build_bundle_prompt(items, self.max_triples);
        let response = self.backend.complete(prompt::SYSTEM_PROMPT, &prompt).await?;

        let parsed = parse_lenient(&response);
        if parsed.is_empty() {
            warn!(
                first_id = %items[0].id,
                items = items.len(),
                "No parseable items in backend output; bundle recorded as empty"
            );
        }

        Ok(match_items(items, parsed))
    }

    /// Extract and normalize a bundle. Records come back in bundle order.
    pub async fn extract_records(
        &self,
        items: &[BundleItem],
    ) -> Result<Vec<ExtractionRecord>, ExtractError> {
        let mut raw = self.extract_bundle(items).await?;

        Ok(items
            .iter()
            .map(|item| {
                let value = raw.remove(&item.id).unwrap_or(Value::Null);
                normalize_extraction(&item.id, &value)
            })
            .collect())
    }
}

/// Pair parsed response items with the requested ids. The first item seen
/// for an id wins; items for ids that were not requested are ignored.
pub fn match_items(items: &[BundleItem], parsed: Vec<Value>) -> HashMap<String, Value> {
    let mut by_id: HashMap<String, Value> = HashMap::new();
    for value in parsed {
        match parser::item_id(&value) {
            Some(id) => {
                by_id.entry(id).or_insert(value);
            }
            None => debug!("Dropping response item without id"),
        }
    }

    items
        .iter()
        .map(|item| {
            let value = by_id.remove(&item.id).unwrap_or_else(|| {
                debug!(id = %item.id, "Response is missing requested id");
                Value::Null
            });
            (item.id.clone(), value)
        })
        .collect()
}
