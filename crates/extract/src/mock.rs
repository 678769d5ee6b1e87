//! Scripted backend for tests and offline runs.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use crate::error::ExtractError;
use crate::llm::ExtractionBackend;

#[derive(Debug)]
enum Scripted {
    Reply(String),
    Fail(ExtractError),
}

/// Replays queued responses in order. Once the queue is empty every call
/// returns `"[]"`. Clones share the queue and the counters.
#[derive(Debug, Clone, Default)]
pub struct MockBackend {
    script: Arc<Mutex<VecDeque<Scripted>>>,
    prompts: Arc<Mutex<Vec<String>>>,
    calls: Arc<AtomicUsize>,
}

impl MockBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a raw completion.
    pub fn push_reply(&self, reply: impl Into<String>) -> &Self {
        self.queue(Scripted::Reply(reply.into()))
    }

    /// Queue a failed call, surfaced as a non-retryable backend error.
    pub fn push_failure(&self, message: impl Into<String>) -> &Self {
        self.push_error(ExtractError::Backend {
            status: 500,
            body: message.into(),
        })
    }

    /// Queue a failed call with a specific error.
    pub fn push_error(&self, error: ExtractError) -> &Self {
        self.queue(Scripted::Fail(error))
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// User prompts received so far.
    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    fn queue(&self, entry: Scripted) -> &Self {
        self.script
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(entry);
        self
    }
}

#[async_trait]
impl ExtractionBackend for MockBackend {
    fn describe(&self) -> String {
        "mock".to_string()
    }

    async fn complete(&self, _system: &str, user: &str) -> Result<String, ExtractError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.prompts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(user.to_string());

        let next = self
            .script
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front();

        match next {
            Some(Scripted::Reply(reply)) => Ok(reply),
            Some(Scripted::Fail(error)) => Err(error),
            None => Ok("[]".to_string()),
        }
    }
}
