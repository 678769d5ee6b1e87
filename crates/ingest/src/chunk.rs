use serde::{Deserialize, Serialize};

/// A unit of source text (one question/answer pair) with a stable identifier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentChunk {
    pub id: String,
    pub text: String,
    pub category: String,
    pub url: String,
}

impl ContentChunk {
    /// Build a chunk from a question/answer record. The text is the question
    /// and answer, each trimmed, separated by a blank line.
    pub fn from_qa(
        id: String,
        question: &str,
        answer: &str,
        url: String,
        category: String,
    ) -> Self {
        Self {
            id,
            text: format!("{}\n\n{}", question.trim(), answer.trim()),
            category,
            url,
        }
    }

    /// Estimate token count (rough: 1.3 tokens per word)
    pub fn estimated_tokens(&self) -> usize {
        let word_count = self.text.split_whitespace().count();
        (word_count as f64 * 1.3) as usize
    }
}
