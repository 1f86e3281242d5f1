//! OpenAI-compatible backend for completions and embeddings
//!
//! Works against api.openai.com or any gateway speaking the same protocol
//! (set `llm.api_base` in sqlsage.toml). Credentials come from the
//! environment (`OPENAI_API_KEY`).

use crate::client::{CompletionClient, EmbeddingClient, LlmError};
use async_openai::{
    config::OpenAIConfig,
    types::{
        ChatCompletionRequestMessage, ChatCompletionRequestUserMessageArgs,
        CreateChatCompletionRequestArgs, CreateEmbeddingRequestArgs,
    },
    Client,
};
use sqlsage_core::LlmConfig;
use std::time::Duration;

/// OpenAI-compatible client for both collaborator roles
pub struct OpenAiClient {
    client: Client<OpenAIConfig>,
    model: String,
    embedding_model: String,
    temperature: f32,
    timeout: Duration,
}

impl OpenAiClient {
    /// Build a client from the LLM section of the config
    pub fn new(config: &LlmConfig) -> Self {
        let mut openai_config = OpenAIConfig::new();
        if let Some(base) = &config.api_base {
            openai_config = openai_config.with_api_base(base.clone());
        }
        Self {
            client: Client::with_config(openai_config),
            model: config.model.clone(),
            embedding_model: config.embedding_model.clone(),
            temperature: config.temperature,
            timeout: Duration::from_secs(config.timeout_secs),
        }
    }
}

#[async_trait::async_trait]
impl CompletionClient for OpenAiClient {
    fn name(&self) -> &'static str {
        "openai"
    }

    async fn complete(&self, prompt: &str) -> Result<String, LlmError> {
        let message = ChatCompletionRequestUserMessageArgs::default()
            .content(prompt)
            .build()
            .map_err(|e| LlmError::RequestError(e.to_string()))?;

        let request = CreateChatCompletionRequestArgs::default()
            .model(&self.model)
            .messages(vec![ChatCompletionRequestMessage::User(message)])
            .temperature(self.temperature)
            .build()
            .map_err(|e| LlmError::RequestError(e.to_string()))?;

        let response = tokio::time::timeout(self.timeout, self.client.chat().create(request))
            .await
            .map_err(|_| LlmError::Timeout(self.timeout.as_secs()))?
            .map_err(|e| LlmError::RequestError(e.to_string()))?;

        let content = response
            .choices
            .first()
            .and_then(|choice| choice.message.content.clone())
            .ok_or(LlmError::EmptyResponse)?;

        tracing::debug!(model = %self.model, chars = content.len(), "completion received");
        Ok(content)
    }
}

#[async_trait::async_trait]
impl EmbeddingClient for OpenAiClient {
    fn name(&self) -> &'static str {
        "openai"
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, LlmError> {
        let request = CreateEmbeddingRequestArgs::default()
            .model(&self.embedding_model)
            .input(texts.to_vec())
            .build()
            .map_err(|e| LlmError::RequestError(e.to_string()))?;

        let response = tokio::time::timeout(self.timeout, self.client.embeddings().create(request))
            .await
            .map_err(|_| LlmError::Timeout(self.timeout.as_secs()))?
            .map_err(|e| LlmError::RequestError(e.to_string()))?;

        if response.data.len() != texts.len() {
            return Err(LlmError::RequestError(format!(
                "expected {} embeddings, got {}",
                texts.len(),
                response.data.len()
            )));
        }

        Ok(response.data.into_iter().map(|d| d.embedding).collect())
    }
}
