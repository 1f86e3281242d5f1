//! SQLSage LLM
//!
//! Collaborator handles for the completion and embedding services. The
//! pipeline only ever sees the traits; concrete backends are injected at
//! construction so tests can substitute scripted fakes.

pub mod client;
pub mod mock;

#[cfg(feature = "openai")]
pub mod openai;

pub use client::{CompletionClient, EmbeddingClient, LlmError};
pub use mock::{MockCompletion, MockEmbedding};

#[cfg(feature = "openai")]
pub use openai::OpenAiClient;
