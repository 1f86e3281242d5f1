//! Scripted collaborators for testing
//!
//! `MockCompletion` replays canned responses in order and records every
//! prompt it receives, which lets tests assert on prompt contents as well as
//! on pipeline behavior. Failures can be scripted per call.

use crate::client::{CompletionClient, EmbeddingClient, LlmError};
use std::sync::Mutex;

/// One scripted reply
enum Scripted {
    Response(String),
    Failure(String),
}

/// Completion client that replays scripted responses
pub struct MockCompletion {
    script: Mutex<Vec<Scripted>>,
    prompts: Mutex<Vec<String>>,
}

impl MockCompletion {
    /// Create an empty mock; calls beyond the script return the last response
    /// or fail when no response was ever scripted
    pub fn new() -> Self {
        Self {
            script: Mutex::new(Vec::new()),
            prompts: Mutex::new(Vec::new()),
        }
    }

    /// Append a canned response
    pub fn with_response(self, response: impl Into<String>) -> Self {
        self.script
            .lock()
            .unwrap()
            .push(Scripted::Response(response.into()));
        self
    }

    /// Append a scripted failure
    pub fn with_failure(self, message: impl Into<String>) -> Self {
        self.script
            .lock()
            .unwrap()
            .push(Scripted::Failure(message.into()));
        self
    }

    /// Prompts received so far, in call order
    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }

    /// Number of calls made
    pub fn call_count(&self) -> usize {
        self.prompts.lock().unwrap().len()
    }
}

impl Default for MockCompletion {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl CompletionClient for MockCompletion {
    fn name(&self) -> &'static str {
        "mock"
    }

    async fn complete(&self, prompt: &str) -> Result<String, LlmError> {
        self.prompts.lock().unwrap().push(prompt.to_string());

        let mut script = self.script.lock().unwrap();
        let item = if script.len() > 1 {
            script.remove(0)
        } else if let Some(last) = script.first() {
            // Keep replaying the final scripted item
            match last {
                Scripted::Response(r) => Scripted::Response(r.clone()),
                Scripted::Failure(m) => Scripted::Failure(m.clone()),
            }
        } else {
            return Err(LlmError::EmptyResponse);
        };

        match item {
            Scripted::Response(r) => Ok(r),
            Scripted::Failure(m) => Err(LlmError::RequestError(m)),
        }
    }
}

/// Embedding client that returns fixed-dimension constant vectors
pub struct MockEmbedding {
    dimension: usize,
}

impl MockEmbedding {
    /// Create a mock producing vectors of the given dimension
    ///
    /// Panics when `dimension` is zero; `embed` indexes modulo the dimension.
    pub fn new(dimension: usize) -> Self {
        assert!(dimension > 0, "embedding dimension must be nonzero");
        Self { dimension }
    }
}

#[async_trait::async_trait]
impl EmbeddingClient for MockEmbedding {
    fn name(&self) -> &'static str {
        "mock"
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, LlmError> {
        // Deterministic per-text vectors so tests get stable nearest neighbors
        Ok(texts
            .iter()
            .map(|text| {
                let mut v = vec![0.0f32; self.dimension];
                for (i, b) in text.bytes().enumerate() {
                    v[i % self.dimension] += b as f32;
                }
                v
            })
            .collect())
    }
}
