//! Structural and dynamic SQL validation
//!
//! The structural check is a pattern scan against the catalog, deliberately
//! tolerant of dialect syntax a full parser would choke on. The dynamic
//! check submits the statement to a live engine's plan facility through the
//! [`ExplainProbe`] collaborator.

use regex::Regex;
use sqlsage_catalog::SchemaCatalog;
use sqlsage_core::{ValidationErrorKind, ValidationResult};
use std::sync::{Arc, OnceLock};

/// Errors the dynamic probe can surface
#[derive(Debug, thiserror::Error)]
pub enum ProbeError {
    /// The engine rejected the statement
    #[error("Statement rejected: {0}")]
    Rejected(String),

    /// The engine could not be reached
    #[error("Engine unreachable: {0}")]
    Unreachable(String),
}

/// Live-engine collaborator for dynamic validation
///
/// Implementations wrap the statement in the engine's non-executing
/// plan/explain command and submit it; `Ok(())` means the engine accepts the
/// statement.
#[async_trait::async_trait]
pub trait ExplainProbe: Send + Sync {
    /// Probe name, for logs
    fn name(&self) -> &'static str;

    /// Submit the statement for planning without executing it
    async fn explain(&self, sql: &str) -> Result<(), ProbeError>;
}

/// Validation seam the pipeline controller depends on
#[async_trait::async_trait]
pub trait SqlValidate: Send + Sync {
    /// Check one statement
    async fn validate(&self, sql: &str) -> ValidationResult;
}

fn table_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)\b(?:FROM|JOIN)\s+`?([a-zA-Z_][a-zA-Z0-9_]*)`?").unwrap())
}

fn column_ref_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"\b([a-zA-Z_][a-zA-Z0-9_]*)\.([a-zA-Z_][a-zA-Z0-9_]*)\b").unwrap()
    })
}

fn select_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)\bSELECT\b").unwrap())
}

fn from_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)\bFROM\b").unwrap())
}

fn line_comment_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?m)--.*$").unwrap())
}

fn block_comment_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?s)/\*.*?\*/").unwrap())
}

/// Remove `--` and `/* */` comments before scanning
fn strip_comments(sql: &str) -> String {
    let no_block = block_comment_re().replace_all(sql, " ");
    line_comment_re().replace_all(&no_block, "").into_owned()
}

/// Table identifiers following FROM/JOIN, deduplicated in first-seen order
fn referenced_tables(sql: &str) -> Vec<String> {
    let mut seen = Vec::new();
    for captures in table_re().captures_iter(sql) {
        let table = captures[1].to_string();
        if !seen.iter().any(|t: &String| t.eq_ignore_ascii_case(&table)) {
            seen.push(table);
        }
    }
    seen
}

/// Dotted `table.column` tokens, deduplicated in first-seen order
fn referenced_columns(sql: &str) -> Vec<(String, String)> {
    let mut seen: Vec<(String, String)> = Vec::new();
    for captures in column_ref_re().captures_iter(sql) {
        let pair = (captures[1].to_string(), captures[2].to_string());
        if !seen.contains(&pair) {
            seen.push(pair);
        }
    }
    seen
}

/// SQL validator: structural check against the catalog, plus an optional
/// dynamic check through a live-engine probe
pub struct Validator {
    catalog: Arc<SchemaCatalog>,
    probe: Option<Arc<dyn ExplainProbe>>,
}

impl Validator {
    /// Structural-only validator
    pub fn new(catalog: Arc<SchemaCatalog>) -> Self {
        Self {
            catalog,
            probe: None,
        }
    }

    /// Add a live-engine probe for dynamic validation
    pub fn with_probe(mut self, probe: Arc<dyn ExplainProbe>) -> Self {
        self.probe = Some(probe);
        self
    }

    /// Run the structural check only
    ///
    /// Every issue found accumulates into one message; the scan never stops
    /// at the first problem.
    pub fn structural_check(&self, sql: &str) -> ValidationResult {
        if sql.trim().is_empty() {
            return ValidationResult::empty_sql();
        }

        let cleaned = strip_comments(sql);
        let mut issues = Vec::new();

        if !select_re().is_match(&cleaned) {
            issues.push("statement is missing the SELECT keyword".to_string());
        }
        if !from_re().is_match(&cleaned) {
            issues.push("statement is missing the FROM keyword".to_string());
        }

        let unknown_tables: Vec<String> = referenced_tables(&cleaned)
            .into_iter()
            .filter(|t| !self.catalog.has_table(t))
            .collect();
        if !unknown_tables.is_empty() {
            issues.push(format!("unknown tables: {}", unknown_tables.join(", ")));
        }

        for (table, column) in referenced_columns(&cleaned) {
            // Only tables the catalog knows can falsify a column; everything
            // else may be an alias and is left to the dynamic check.
            if self.catalog.has_table(&table) && self.catalog.resolve(&table, &column).is_none() {
                issues.push(format!("table {} has no column {}", table, column));
            }
        }

        if issues.is_empty() {
            ValidationResult::valid()
        } else {
            ValidationResult::invalid(ValidationErrorKind::StructuralError, issues.join("; "))
        }
    }

    /// Run the dynamic check, classifying probe failures
    async fn dynamic_check(&self, sql: &str) -> ValidationResult {
        let Some(probe) = &self.probe else {
            return ValidationResult::valid();
        };
        match probe.explain(sql).await {
            Ok(()) => ValidationResult::valid(),
            Err(ProbeError::Rejected(message)) => {
                ValidationResult::invalid(ValidationErrorKind::SyntaxError, message)
            }
            Err(ProbeError::Unreachable(message)) => {
                tracing::warn!(probe = probe.name(), error = %message, "engine unreachable");
                ValidationResult::invalid(ValidationErrorKind::ConnectionError, message)
            }
        }
    }
}

#[async_trait::async_trait]
impl SqlValidate for Validator {
    async fn validate(&self, sql: &str) -> ValidationResult {
        if sql.trim().is_empty() {
            return ValidationResult::empty_sql();
        }

        let structural = self.structural_check(sql);
        if !structural.is_valid {
            return structural;
        }

        self.dynamic_check(sql).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlsage_core::{ColumnDef, TableSchema};

    fn catalog() -> Arc<SchemaCatalog> {
        Arc::new(
            SchemaCatalog::new(vec![TableSchema::new(
                "dws_login_di",
                "logins",
                vec![
                    ColumnDef::new("dtstatdate", "string", ""),
                    ColumnDef::new("suserid", "string", ""),
                ],
            )])
            .unwrap(),
        )
    }

    struct RejectingProbe;

    #[async_trait::async_trait]
    impl ExplainProbe for RejectingProbe {
        fn name(&self) -> &'static str {
            "rejecting"
        }

        async fn explain(&self, _sql: &str) -> Result<(), ProbeError> {
            Err(ProbeError::Rejected("syntax error near 'FORM'".to_string()))
        }
    }

    struct DownProbe;

    #[async_trait::async_trait]
    impl ExplainProbe for DownProbe {
        fn name(&self) -> &'static str {
            "down"
        }

        async fn explain(&self, _sql: &str) -> Result<(), ProbeError> {
            Err(ProbeError::Unreachable("connection refused".to_string()))
        }
    }

    #[tokio::test]
    async fn empty_sql_short_circuits() {
        let validator = Validator::new(catalog());
        let result = validator.validate("   ").await;
        assert!(!result.is_valid);
        assert_eq!(result.message, "SQL is empty");
    }

    #[tokio::test]
    async fn missing_from_is_structural() {
        let validator = Validator::new(catalog());
        let result = validator.validate("SELECT 1").await;
        assert!(!result.is_valid);
        assert_eq!(result.error_kind, ValidationErrorKind::StructuralError);
        assert!(result.message.contains("FROM"));
    }

    #[tokio::test]
    async fn unknown_table_named_in_message() {
        let validator = Validator::new(catalog());
        let result = validator
            .validate("SELECT 1 FROM dws_missing_di JOIN dws_login_di ON 1 = 1")
            .await;
        assert!(!result.is_valid);
        assert!(result.message.contains("dws_missing_di"));
        assert!(!result.message.contains("unknown tables: dws_login_di"));
    }

    #[tokio::test]
    async fn unknown_column_on_known_table_rejected() {
        let validator = Validator::new(catalog());
        let result = validator
            .validate("SELECT dws_login_di.bogus FROM dws_login_di")
            .await;
        assert!(!result.is_valid);
        assert!(result.message.contains("has no column bogus"));
    }

    #[tokio::test]
    async fn alias_prefixes_are_not_column_errors() {
        let validator = Validator::new(catalog());
        let result = validator
            .validate("SELECT t.suserid FROM dws_login_di t WHERE t.dtstatdate = '20250101'")
            .await;
        assert!(result.is_valid);
    }

    #[tokio::test]
    async fn issues_accumulate_into_one_message() {
        let validator = Validator::new(catalog());
        let result = validator
            .validate("SELECT dws_login_di.bogus FROM nowhere")
            .await;
        assert!(result.message.contains("unknown tables: nowhere"));
        assert!(result.message.contains("has no column bogus"));
    }

    #[tokio::test]
    async fn comments_are_ignored_by_the_scan() {
        let validator = Validator::new(catalog());
        let sql = "-- FROM fake_table\nSELECT suserid /* JOIN other */ FROM dws_login_di";
        assert!(validator.validate(sql).await.is_valid);
    }

    #[tokio::test]
    async fn probe_rejection_classified_as_syntax_error() {
        let validator = Validator::new(catalog()).with_probe(Arc::new(RejectingProbe));
        let result = validator.validate("SELECT suserid FROM dws_login_di").await;
        assert_eq!(result.error_kind, ValidationErrorKind::SyntaxError);
    }

    #[tokio::test]
    async fn probe_outage_classified_as_connection_error() {
        let validator = Validator::new(catalog()).with_probe(Arc::new(DownProbe));
        let result = validator.validate("SELECT suserid FROM dws_login_di").await;
        assert_eq!(result.error_kind, ValidationErrorKind::ConnectionError);
    }
}
