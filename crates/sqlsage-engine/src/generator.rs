//! Retrieval-augmented SQL generation
//!
//! One completion call per attempt. The prompt carries the narrowed schema
//! excerpt, grouped schema links, retrieved exemplars, and on retries a
//! numbered recap of every failed attempt with its validator message.

use sqlsage_core::{Exemplar, LinkTag, PipelineState, SchemaLink};
use sqlsage_llm::{CompletionClient, EmbeddingClient};
use sqlsage_retrieval::{prepare_query_text, CaseRetriever};
use sqlsage_sql::extract_sql;
use std::sync::Arc;

const EXEMPLAR_FIELD_LIMIT: usize = 150;

/// Prompt assembly and SQL extraction around one completion collaborator
pub struct SqlGenerator {
    llm: Arc<dyn CompletionClient>,
    retriever: Option<Arc<CaseRetriever>>,
    embedder: Option<Arc<dyn EmbeddingClient>>,
    common_knowledge: String,
    top_k: usize,
}

impl SqlGenerator {
    /// Create a generator without exemplar retrieval
    pub fn new(llm: Arc<dyn CompletionClient>) -> Self {
        Self {
            llm,
            retriever: None,
            embedder: None,
            common_knowledge: String::new(),
            top_k: 3,
        }
    }

    /// Attach a retriever supplying few-shot exemplars
    pub fn with_retriever(mut self, retriever: Arc<CaseRetriever>, top_k: usize) -> Self {
        self.retriever = Some(retriever);
        self.top_k = top_k;
        self
    }

    /// Attach an embedding collaborator for ad-hoc questions
    ///
    /// Questions whose id has a stored vector skip this; everything else gets
    /// embedded on the fly so the index is still used instead of the text
    /// fallback.
    pub fn with_embedder(mut self, embedder: Arc<dyn EmbeddingClient>) -> Self {
        self.embedder = Some(embedder);
        self
    }

    /// Inject a free-text block carried verbatim into every prompt
    pub fn with_common_knowledge(mut self, knowledge: impl Into<String>) -> Self {
        self.common_knowledge = knowledge.into();
        self
    }

    /// Run one generation pass over the current state
    ///
    /// Collaborator failures degrade to an empty string, which the validator
    /// rejects with its empty-SQL message; the retry loop then carries that
    /// failure forward like any other invalid attempt.
    pub async fn generate(&self, state: &PipelineState) -> String {
        let exemplars = self.retrieve_exemplars(state).await;
        let prompt = self.build_prompt(state, &exemplars);

        match self.llm.complete(&prompt).await {
            Ok(response) => {
                let sql = extract_sql(&response);
                tracing::debug!(id = %state.id, sql_len = sql.len(), "generated SQL");
                sql
            }
            Err(e) => {
                tracing::warn!(id = %state.id, error = %e, "generation call failed");
                String::new()
            }
        }
    }

    async fn retrieve_exemplars(&self, state: &PipelineState) -> Vec<&Exemplar> {
        let Some(retriever) = &self.retriever else {
            return Vec::new();
        };
        if retriever.has_index() {
            match retriever.retrieve_for_id(&state.id, self.top_k) {
                Ok(found) => return found,
                Err(e) => {
                    tracing::debug!(id = %state.id, error = %e, "no stored vector, embedding the question");
                }
            }
        }
        // Embedding only pays off when there is an index to query
        let vector = if retriever.has_index() {
            self.embed_query(state).await
        } else {
            None
        };
        retriever.retrieve_similar(
            &state.question,
            &state.table_list,
            self.top_k,
            vector.as_deref(),
        )
    }

    /// Embed the query text for ad-hoc questions with no stored vector
    ///
    /// Absent embedder or a failed call both yield `None`, which sends
    /// retrieval down the text-similarity fallback.
    async fn embed_query(&self, state: &PipelineState) -> Option<Vec<f32>> {
        let embedder = self.embedder.as_ref()?;
        let text = prepare_query_text(&state.question, &state.knowledge, &state.table_list);
        match embedder.embed(&[text]).await {
            Ok(mut vectors) if !vectors.is_empty() => Some(vectors.remove(0)),
            Ok(_) => None,
            Err(e) => {
                tracing::warn!(id = %state.id, error = %e, "query embedding failed, using text fallback");
                None
            }
        }
    }

    fn build_prompt(&self, state: &PipelineState, exemplars: &[&Exemplar]) -> String {
        let mut sections = Vec::new();

        sections.push(
            "You are a senior data engineer. Write one SQL statement that answers \
the question below. Output only the SQL, inside a ```sql fenced block, with no \
explanation before or after."
                .to_string(),
        );

        if !self.common_knowledge.is_empty() {
            sections.push(format!("System knowledge:\n{}", self.common_knowledge));
        }

        if !state.knowledge.is_empty() {
            sections.push(format!(
                "Business knowledge (constants, formulas, and case logic here are \
authoritative; use them verbatim):\n{}",
                state.knowledge
            ));
        }

        sections.push(format!("Table schemas:\n{}", state.schema_excerpt));

        if !state.schema_links.is_empty() {
            sections.push(format!(
                "Schema analysis of the question:\n{}",
                format_links(&state.schema_links)
            ));
        }

        if !exemplars.is_empty() {
            sections.push(format!(
                "Solved examples on the same schemas:\n{}",
                format_exemplars(exemplars)
            ));
        }

        if !state.error_history.is_empty() {
            sections.push(format!(
                "Previous attempts failed validation. Fix every listed problem:\n{}",
                format_failures(state)
            ));
        }

        sections.push(format!("Question:\n{}", state.question));
        sections.push("SQL:".to_string());

        sections.join("\n\n")
    }
}

/// Render links grouped by what they constrain
///
/// Join equalities, column references, and constant predicates read
/// differently to the model, so each group gets its own heading.
fn format_links(links: &[SchemaLink]) -> String {
    let mut joins = Vec::new();
    let mut references = Vec::new();
    let mut constants = Vec::new();

    for link in links {
        let line = format!("{}: {}", link.tag.as_str(), link.content);
        if link.tag == LinkTag::Link || link.content.contains('=') {
            joins.push(line);
        } else if link.content.contains('.') {
            references.push(line);
        } else {
            constants.push(line);
        }
    }

    let mut blocks = Vec::new();
    if !joins.is_empty() {
        blocks.push(format!("Conditions and joins:\n{}", joins.join("\n")));
    }
    if !references.is_empty() {
        blocks.push(format!("Referenced columns:\n{}", references.join("\n")));
    }
    if !constants.is_empty() {
        blocks.push(format!("Other findings:\n{}", constants.join("\n")));
    }
    blocks.join("\n")
}

fn format_exemplars(exemplars: &[&Exemplar]) -> String {
    exemplars
        .iter()
        .enumerate()
        .map(|(i, exemplar)| {
            let mut block = format!(
                "Example {}:\nQuestion: {}",
                i + 1,
                truncate(&exemplar.question, EXEMPLAR_FIELD_LIMIT)
            );
            if !exemplar.knowledge.is_empty() {
                block.push_str(&format!(
                    "\nKnowledge: {}",
                    truncate(&exemplar.knowledge, EXEMPLAR_FIELD_LIMIT)
                ));
            }
            block.push_str(&format!("\nSQL:\n```sql\n{}\n```", exemplar.sql));
            block
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

fn format_failures(state: &PipelineState) -> String {
    state
        .error_history
        .iter()
        .enumerate()
        .map(|(i, error)| {
            format!(
                "Attempt {}:\n```sql\n{}\n```\nValidator said: {}",
                i + 1,
                error.sql,
                error.message
            )
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

fn truncate(text: &str, limit: usize) -> String {
    if text.chars().count() <= limit {
        text.to_string()
    } else {
        let cut: String = text.chars().take(limit).collect();
        format!("{cut}...")
    }
}
