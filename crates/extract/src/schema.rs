use serde::{Deserialize, Serialize};

/// An entity after validation. `canonical_name` is the cross-corpus identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractedEntity {
    pub name: String,
    pub canonical_name: String,
    pub types: Vec<String>,
    pub aliases: Vec<String>,
}

/// A subject-predicate-object triple after validation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractedTriple {
    pub subject: String,
    pub subject_canonical: String,
    pub predicate: String,
    pub object: String,
    pub object_canonical: String,
}

/// The validated extraction for one chunk. This is what gets cached.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractionRecord {
    pub chunk_id: String,
    pub entities: Vec<ExtractedEntity>,
    pub triples: Vec<ExtractedTriple>,
}

impl ExtractionRecord {
    pub fn empty(chunk_id: impl Into<String>) -> Self {
        Self {
            chunk_id: chunk_id.into(),
            entities: Vec::new(),
            triples: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty() && self.triples.is_empty()
    }
}

/// One item of a bundle as sent to the backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BundleItem {
    pub id: String,
    pub text: String,
}
