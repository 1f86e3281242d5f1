//! Completion and embedding collaborator traits

/// Errors a collaborator call can surface
///
/// Callers inside the pipeline catch these and degrade to an empty result;
/// only the batch driver is allowed to surface aggregate failures.
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("Request failed: {0}")]
    RequestError(String),

    #[error("Empty response from model")]
    EmptyResponse,

    #[error("Request timed out after {0}s")]
    Timeout(u64),

    #[error("Configuration error: {0}")]
    ConfigError(String),
}

/// Prompt-in, text-out completion service
#[async_trait::async_trait]
pub trait CompletionClient: Send + Sync {
    /// Backend name, for logs
    fn name(&self) -> &'static str;

    /// Run one completion
    async fn complete(&self, prompt: &str) -> Result<String, LlmError>;
}

/// Batched text-embedding service
///
/// Only needed to build query vectors for ad hoc text; retrieval keyed by an
/// existing exemplar id bypasses it entirely.
#[async_trait::async_trait]
pub trait EmbeddingClient: Send + Sync {
    /// Backend name, for logs
    fn name(&self) -> &'static str;

    /// Embed a batch of texts, one vector per input in order
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, LlmError>;
}
