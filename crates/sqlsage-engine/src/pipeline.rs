//! Bounded-retry pipeline controller
//!
//! Drives one question through link → generate → validate, feeding validator
//! messages back into generation. A budget of `max_retries` allows
//! `max_retries + 1` generation attempts in total; the terminal failure is
//! not appended to the error history.

use crate::generator::SqlGenerator;
use crate::linker::SchemaLinkExtractor;
use sqlsage_core::{PipelineOutcome, PipelineState};
use sqlsage_sql::SqlValidate;
use std::sync::Arc;

/// Orchestrates one question→SQL transaction over the three stages
pub struct PipelineController {
    linker: SchemaLinkExtractor,
    generator: SqlGenerator,
    validator: Arc<dyn SqlValidate>,
    relink_on_retry: bool,
}

impl PipelineController {
    /// Wire a controller from its three stages
    pub fn new(
        linker: SchemaLinkExtractor,
        generator: SqlGenerator,
        validator: Arc<dyn SqlValidate>,
    ) -> Self {
        Self {
            linker,
            generator,
            validator,
            relink_on_retry: true,
        }
    }

    /// Reuse the first linking pass across retries instead of relinking
    pub fn with_relink_on_retry(mut self, relink: bool) -> Self {
        self.relink_on_retry = relink;
        self
    }

    /// Run one question to a terminal state
    ///
    /// Always returns a state: on success `is_valid` is true and
    /// `generated_sql` holds the accepted statement; on retry exhaustion the
    /// last candidate is kept as a best effort with `is_valid` false.
    pub async fn run(
        &self,
        id: &str,
        question: &str,
        knowledge: &str,
        table_list: Vec<String>,
        max_retries: u32,
    ) -> PipelineState {
        let mut state = PipelineState::new(id, question, knowledge, table_list, max_retries);

        loop {
            let attempt = state.retry_count + 1;
            tracing::info!(id = %state.id, attempt, "pipeline attempt");

            if state.retry_count == 0 || self.relink_on_retry {
                let linked = self
                    .linker
                    .extract(&state.question, &state.knowledge, &state.table_list)
                    .await;
                state = state.with_links(linked.links, linked.schema_excerpt);
            }

            let sql = self.generator.generate(&state).await;
            state = state.with_sql(sql);

            let result = self.validator.validate(&state.generated_sql).await;
            if result.is_valid {
                state.is_valid = true;
                tracing::info!(id = %state.id, attempt, "validation passed");
                break;
            }

            tracing::warn!(
                id = %state.id,
                attempt,
                kind = %result.error_kind,
                message = %result.message,
                "validation failed"
            );

            if state.retries_exhausted() {
                tracing::error!(id = %state.id, retries = state.retry_count, "retry budget exhausted");
                break;
            }
            state = state.after_invalid(result.message);
        }

        state
    }

    /// Run one question and reduce the terminal state to its outcome
    pub async fn run_to_outcome(
        &self,
        id: &str,
        question: &str,
        knowledge: &str,
        table_list: Vec<String>,
        max_retries: u32,
    ) -> PipelineOutcome {
        let state = self
            .run(id, question, knowledge, table_list, max_retries)
            .await;
        PipelineOutcome::from(&state)
    }
}
