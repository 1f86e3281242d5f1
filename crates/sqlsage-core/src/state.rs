//! Pipeline state and validation results
//!
//! `PipelineState` is threaded through the controller as an explicit value;
//! each stage consumes a state and returns an updated one. Nothing here is
//! shared or mutated behind the controller's back.

use crate::types::SchemaLink;
use serde::{Deserialize, Serialize};

/// Classification of a validation failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationErrorKind {
    /// No failure
    None,

    /// Catalog-level issue: unknown table, unknown column, missing clause
    StructuralError,

    /// Statement rejected by the engine's plan facility
    SyntaxError,

    /// Engine unreachable
    ConnectionError,
}

impl ValidationErrorKind {
    /// Stable string identifier
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::StructuralError => "structural_error",
            Self::SyntaxError => "syntax_error",
            Self::ConnectionError => "connection_error",
        }
    }
}

impl std::fmt::Display for ValidationErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Outcome of validating one generated statement
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationResult {
    /// Whether the statement passed every enabled check
    pub is_valid: bool,

    /// Human-readable explanation; empty on success
    pub message: String,

    /// Failure classification
    pub error_kind: ValidationErrorKind,
}

impl ValidationResult {
    /// A passing result
    pub fn valid() -> Self {
        Self {
            is_valid: true,
            message: String::new(),
            error_kind: ValidationErrorKind::None,
        }
    }

    /// A failing result
    pub fn invalid(error_kind: ValidationErrorKind, message: impl Into<String>) -> Self {
        Self {
            is_valid: false,
            message: message.into(),
            error_kind,
        }
    }

    /// The short-circuit result for an empty statement
    pub fn empty_sql() -> Self {
        Self::invalid(ValidationErrorKind::StructuralError, "SQL is empty")
    }
}

/// One failed attempt, kept for generation-time feedback
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttemptError {
    /// The SQL that failed validation
    pub sql: String,

    /// Validator message
    pub message: String,

    /// Zero-based attempt index at the time of failure
    pub attempt: u32,
}

/// State threaded through one question→SQL transaction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineState {
    /// Question identifier, carried through to the output
    pub id: String,

    /// Natural-language question
    pub question: String,

    /// Business knowledge attached to the question
    pub knowledge: String,

    /// Tables in scope for this question
    pub table_list: Vec<String>,

    /// Schema links from the most recent linking pass
    pub schema_links: Vec<SchemaLink>,

    /// Schema description used as generation context (narrowed or full)
    pub schema_excerpt: String,

    /// SQL from the most recent generation pass
    pub generated_sql: String,

    /// Completed retry loops; starts at 0
    pub retry_count: u32,

    /// Retry budget, constant per run
    pub max_retries: u32,

    /// Whether the most recent validation passed
    pub is_valid: bool,

    /// Every invalid attempt that triggered a retry, in order
    pub error_history: Vec<AttemptError>,
}

impl PipelineState {
    /// Initial state for a question
    pub fn new(
        id: impl Into<String>,
        question: impl Into<String>,
        knowledge: impl Into<String>,
        table_list: Vec<String>,
        max_retries: u32,
    ) -> Self {
        Self {
            id: id.into(),
            question: question.into(),
            knowledge: knowledge.into(),
            table_list,
            schema_links: Vec::new(),
            schema_excerpt: String::new(),
            generated_sql: String::new(),
            retry_count: 0,
            max_retries,
            is_valid: false,
            error_history: Vec::new(),
        }
    }

    /// Replace linking context (links are recomputed on every loop iteration)
    pub fn with_links(mut self, links: Vec<SchemaLink>, excerpt: String) -> Self {
        self.schema_links = links;
        self.schema_excerpt = excerpt;
        self
    }

    /// Replace the generated statement
    pub fn with_sql(mut self, sql: String) -> Self {
        self.generated_sql = sql;
        self
    }

    /// Record a failed attempt and consume one retry
    pub fn after_invalid(mut self, message: impl Into<String>) -> Self {
        self.error_history.push(AttemptError {
            sql: self.generated_sql.clone(),
            message: message.into(),
            attempt: self.retry_count,
        });
        self.retry_count += 1;
        self
    }

    /// Whether the retry budget is spent
    pub fn retries_exhausted(&self) -> bool {
        self.retry_count >= self.max_retries
    }
}

/// Terminal output of one pipeline run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineOutcome {
    /// Question identifier
    #[serde(rename = "sql_id")]
    pub id: String,

    /// Best-effort SQL (possibly invalid after retry exhaustion)
    pub sql: String,

    /// Whether the final statement passed validation
    pub is_valid: bool,
}

impl From<&PipelineState> for PipelineOutcome {
    fn from(state: &PipelineState) -> Self {
        Self {
            id: state.id.clone(),
            sql: state.generated_sql.clone(),
            is_valid: state.is_valid,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn after_invalid_appends_history_and_bumps_retry() {
        let state = PipelineState::new("sql_1", "q", "", vec![], 3)
            .with_sql("SELECT 1".to_string())
            .after_invalid("missing FROM");

        assert_eq!(state.retry_count, 1);
        assert_eq!(state.error_history.len(), 1);
        assert_eq!(state.error_history[0].attempt, 0);
        assert_eq!(state.error_history[0].sql, "SELECT 1");
    }

    #[test]
    fn retries_exhausted_at_budget() {
        let mut state = PipelineState::new("sql_1", "q", "", vec![], 2);
        assert!(!state.retries_exhausted());
        state = state.after_invalid("e1").after_invalid("e2");
        assert!(state.retries_exhausted());
    }

    #[test]
    fn empty_sql_result() {
        let result = ValidationResult::empty_sql();
        assert!(!result.is_valid);
        assert_eq!(result.message, "SQL is empty");
        assert_eq!(result.error_kind, ValidationErrorKind::StructuralError);
    }

    #[test]
    fn outcome_from_state() {
        let state = PipelineState::new("sql_9", "q", "", vec![], 3)
            .with_sql("SELECT 1 FROM t".to_string());
        let outcome = PipelineOutcome::from(&state);
        assert_eq!(outcome.id, "sql_9");
        assert!(!outcome.is_valid);
    }
}
