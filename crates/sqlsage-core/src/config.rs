//! Configuration schema (sqlsage.toml)

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Retry-loop and retrieval knobs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Maximum retries after the first attempt
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Exemplars injected into the generation prompt
    #[serde(default = "default_top_k")]
    pub top_k: usize,

    /// Re-run schema linking on every retry instead of only regenerating
    #[serde(default = "default_true")]
    pub relink_on_retry: bool,
}

fn default_max_retries() -> u32 {
    3
}

fn default_top_k() -> usize {
    3
}

fn default_true() -> bool {
    true
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            top_k: default_top_k(),
            relink_on_retry: true,
        }
    }
}

/// LLM collaborator settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LlmConfig {
    /// Completion model name
    #[serde(default = "default_model")]
    pub model: String,

    /// Embedding model name
    #[serde(default = "default_embedding_model")]
    pub embedding_model: String,

    /// Override the API base URL (for OpenAI-compatible gateways)
    #[serde(default)]
    pub api_base: Option<String>,

    /// Sampling temperature; 0.0 keeps generation deterministic
    #[serde(default)]
    pub temperature: f32,

    /// Per-call timeout in seconds
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_embedding_model() -> String {
    "text-embedding-3-small".to_string()
}

fn default_timeout_secs() -> u64 {
    120
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            model: default_model(),
            embedding_model: default_embedding_model(),
            api_base: None,
            temperature: 0.0,
            timeout_secs: default_timeout_secs(),
        }
    }
}

/// Locations of the data files the pipeline loads once per process
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataConfig {
    /// Catalog JSON (table/column metadata)
    #[serde(default = "default_catalog_path")]
    pub catalog: PathBuf,

    /// Validated exemplar corpus JSON
    #[serde(default = "default_exemplars_path")]
    pub exemplars: PathBuf,

    /// Precomputed embedding store JSON
    #[serde(default = "default_embeddings_path")]
    pub embeddings: PathBuf,

    /// Optional free-text block injected verbatim into every prompt
    #[serde(default)]
    pub common_knowledge: Option<PathBuf>,
}

fn default_catalog_path() -> PathBuf {
    PathBuf::from("data/schema.json")
}

fn default_exemplars_path() -> PathBuf {
    PathBuf::from("data/true.json")
}

fn default_embeddings_path() -> PathBuf {
    PathBuf::from("data/embeddings.json")
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            catalog: default_catalog_path(),
            exemplars: default_exemplars_path(),
            embeddings: default_embeddings_path(),
            common_knowledge: None,
        }
    }
}

/// Live-engine probe settings for dynamic validation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProbeConfig {
    /// Connection string for the engine used by EXPLAIN submission
    pub dsn: String,

    /// Per-call timeout in seconds
    #[serde(default = "default_probe_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_probe_timeout_secs() -> u64 {
    30
}

/// Main configuration structure
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Config {
    /// Retry-loop knobs
    #[serde(default)]
    pub pipeline: PipelineConfig,

    /// LLM collaborator settings
    #[serde(default)]
    pub llm: LlmConfig,

    /// Data file locations
    #[serde(default)]
    pub data: DataConfig,

    /// Dynamic-validation probe; structural checks only when absent
    #[serde(default)]
    pub probe: Option<ProbeConfig>,
}

impl Config {
    /// Load config from a TOML file
    pub fn from_file(path: &std::path::Path) -> Result<Self, ConfigError> {
        let contents =
            std::fs::read_to_string(path).map_err(|e| ConfigError::IoError(e.to_string()))?;
        Self::from_toml(&contents)
    }

    /// Load config from a TOML string
    pub fn from_toml(toml: &str) -> Result<Self, ConfigError> {
        toml::from_str(toml).map_err(|e| ConfigError::ParseError(e.to_string()))
    }

    /// Save config to a TOML file
    pub fn save_to_file(&self, path: &std::path::Path) -> Result<(), ConfigError> {
        let toml =
            toml::to_string_pretty(self).map_err(|e| ConfigError::SerializeError(e.to_string()))?;
        std::fs::write(path, toml).map_err(|e| ConfigError::IoError(e.to_string()))?;
        Ok(())
    }
}

/// Config error types
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    IoError(String),

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Serialize error: {0}")]
    SerializeError(String),
}
