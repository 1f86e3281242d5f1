//! SQLSage Core
//!
//! Domain model shared by every pipeline stage: warehouse table metadata,
//! schema links, exemplars, pipeline state, and configuration.

pub mod config;
pub mod state;
pub mod types;

pub use config::{Config, ConfigError, DataConfig, LlmConfig, PipelineConfig, ProbeConfig};
pub use state::{AttemptError, PipelineOutcome, PipelineState, ValidationErrorKind, ValidationResult};
pub use types::{ColumnDef, Exemplar, LinkTag, SchemaLink, TableSchema};
