//! Exemplar corpus, embedding store, and the retriever that combines them
//!
//! The embedding store may hold vectors for the whole dataset (validated and
//! unvalidated questions alike); only exemplars present in the validated
//! corpus are ever returned, applied as an allow-list over the ranked
//! candidates.

use crate::index::{CaseIndex, RetrievalError};
use serde::{Deserialize, Serialize};
use sqlsage_core::Exemplar;
use std::collections::HashMap;
use std::path::Path;

/// One stored embedding
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingRecord {
    /// Exemplar id
    pub sql_id: String,

    /// Raw (not yet normalized) vector
    pub vector: Vec<f32>,
}

/// Precomputed embedding store wire format
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingStore {
    /// Embedding model that produced the vectors
    pub model: String,

    /// Expected vector dimension
    pub dimension: usize,

    /// Number of embeddings
    pub count: usize,

    /// The embeddings themselves
    pub embeddings: Vec<EmbeddingRecord>,
}

impl EmbeddingStore {
    /// Parse a store from JSON, checking every vector against `dimension`
    pub fn from_json(json: &str) -> Result<Self, RetrievalError> {
        let store: EmbeddingStore =
            serde_json::from_str(json).map_err(|e| RetrievalError::ParseError(e.to_string()))?;
        for record in &store.embeddings {
            if record.vector.len() != store.dimension {
                return Err(RetrievalError::DimensionMismatch {
                    id: record.sql_id.clone(),
                    expected: store.dimension,
                    actual: record.vector.len(),
                });
            }
        }
        Ok(store)
    }

    /// Load a store from a JSON file
    pub fn from_file(path: &Path) -> Result<Self, RetrievalError> {
        let contents =
            std::fs::read_to_string(path).map_err(|e| RetrievalError::IoError(e.to_string()))?;
        let store = Self::from_json(&contents)?;
        tracing::info!(
            model = %store.model,
            dimension = store.dimension,
            count = store.embeddings.len(),
            "loaded embedding store"
        );
        Ok(store)
    }

    /// Build a [`CaseIndex`] from the stored vectors
    pub fn build_index(&self) -> Result<CaseIndex, RetrievalError> {
        CaseIndex::new(
            self.embeddings
                .iter()
                .map(|r| (r.sql_id.clone(), r.vector.clone()))
                .collect(),
        )
    }
}

/// Validated question/SQL pairs, keyed by id
#[derive(Debug, Clone)]
pub struct ExemplarCorpus {
    exemplars: Vec<Exemplar>,
    by_id: HashMap<String, usize>,
}

impl ExemplarCorpus {
    /// Build a corpus from exemplars; later duplicates replace earlier ones
    pub fn new(exemplars: Vec<Exemplar>) -> Self {
        let by_id = exemplars
            .iter()
            .enumerate()
            .map(|(i, e)| (e.id.clone(), i))
            .collect();
        Self { exemplars, by_id }
    }

    /// Parse a corpus from its JSON wire form
    pub fn from_json(json: &str) -> Result<Self, RetrievalError> {
        let exemplars: Vec<Exemplar> =
            serde_json::from_str(json).map_err(|e| RetrievalError::ParseError(e.to_string()))?;
        Ok(Self::new(exemplars))
    }

    /// Load a corpus from a JSON file
    pub fn from_file(path: &Path) -> Result<Self, RetrievalError> {
        let contents =
            std::fs::read_to_string(path).map_err(|e| RetrievalError::IoError(e.to_string()))?;
        let corpus = Self::from_json(&contents)?;
        tracing::info!(exemplars = corpus.len(), path = %path.display(), "loaded exemplar corpus");
        Ok(corpus)
    }

    /// Number of exemplars
    pub fn len(&self) -> usize {
        self.exemplars.len()
    }

    /// Whether the corpus is empty
    pub fn is_empty(&self) -> bool {
        self.exemplars.is_empty()
    }

    /// Look up an exemplar by id
    pub fn get(&self, id: &str) -> Option<&Exemplar> {
        self.by_id.get(id).map(|&i| &self.exemplars[i])
    }

    /// Whether an id belongs to the validated corpus
    pub fn contains(&self, id: &str) -> bool {
        self.by_id.contains_key(id)
    }

    /// All exemplars in load order
    pub fn iter(&self) -> impl Iterator<Item = &Exemplar> {
        self.exemplars.iter()
    }
}

/// Concatenate the fields used to embed a question
///
/// Must match the text layout used when the stored vectors were produced.
pub fn prepare_query_text(question: &str, knowledge: &str, table_list: &[String]) -> String {
    let mut parts = vec![question.to_string()];
    if !knowledge.is_empty() {
        parts.push(knowledge.to_string());
    }
    if !table_list.is_empty() {
        parts.push(table_list.join(", "));
    }
    parts.join(" ")
}

/// Few-shot exemplar retriever
///
/// Prefers vector retrieval when an index is available; falls back to text
/// similarity otherwise.
#[derive(Debug, Clone)]
pub struct CaseRetriever {
    corpus: ExemplarCorpus,
    index: Option<CaseIndex>,
}

impl CaseRetriever {
    /// Create a retriever over a corpus, optionally backed by an index
    pub fn new(corpus: ExemplarCorpus, index: Option<CaseIndex>) -> Self {
        Self { corpus, index }
    }

    /// The validated corpus
    pub fn corpus(&self) -> &ExemplarCorpus {
        &self.corpus
    }

    /// Whether vector retrieval is available
    pub fn has_index(&self) -> bool {
        self.index.is_some()
    }

    /// Nearest validated exemplars for a stored id, excluding the query itself
    pub fn retrieve_for_id(
        &self,
        sql_id: &str,
        top_k: usize,
    ) -> Result<Vec<&Exemplar>, RetrievalError> {
        let index = self
            .index
            .as_ref()
            .ok_or_else(|| RetrievalError::VectorNotFound(sql_id.to_string()))?;
        let scored =
            index.query_by_id_filtered(sql_id, top_k, true, |id| self.corpus.contains(id))?;
        Ok(scored.iter().filter_map(|s| self.corpus.get(&s.id)).collect())
    }

    /// Nearest validated exemplars for a raw query vector
    pub fn retrieve_for_vector(
        &self,
        vector: &[f32],
        top_k: usize,
        table_filter: Option<&[String]>,
    ) -> Result<Vec<&Exemplar>, RetrievalError> {
        let index = self
            .index
            .as_ref()
            .ok_or_else(|| RetrievalError::VectorNotFound("<query>".to_string()))?;
        let scored = index.query_by_vector_filtered(vector, top_k, |id| {
            let Some(exemplar) = self.corpus.get(id) else {
                return false;
            };
            match table_filter {
                Some(tables) if !tables.is_empty() => exemplar
                    .table_list
                    .iter()
                    .any(|t| tables.iter().any(|f| f == t)),
                _ => true,
            }
        })?;
        Ok(scored.iter().filter_map(|s| self.corpus.get(&s.id)).collect())
    }

    /// Text-similarity fallback when no embedding store is present
    ///
    /// Score = 0.7 x character-bigram similarity of the questions
    ///       + 0.3 x Jaccard overlap of the table lists.
    pub fn retrieve_for_text(
        &self,
        question: &str,
        table_list: &[String],
        top_k: usize,
    ) -> Vec<&Exemplar> {
        let query_bigrams = bigrams(question);
        let mut scored: Vec<(usize, f64)> = self
            .corpus
            .iter()
            .enumerate()
            .map(|(i, exemplar)| {
                let question_sim = bigram_similarity(&query_bigrams, &bigrams(&exemplar.question));
                let table_sim = jaccard(table_list, &exemplar.table_list);
                (i, 0.7 * question_sim + 0.3 * table_sim)
            })
            .collect();
        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        scored
            .into_iter()
            .take(top_k)
            .map(|(i, _)| &self.corpus.exemplars[i])
            .collect()
    }

    /// Vector retrieval when possible, text similarity otherwise
    pub fn retrieve_similar(
        &self,
        question: &str,
        table_list: &[String],
        top_k: usize,
        query_vector: Option<&[f32]>,
    ) -> Vec<&Exemplar> {
        if let (Some(vector), true) = (query_vector, self.has_index()) {
            match self.retrieve_for_vector(vector, top_k, Some(table_list)) {
                Ok(found) if !found.is_empty() => return found,
                Ok(_) => {}
                Err(e) => tracing::warn!(error = %e, "vector retrieval failed, using text fallback"),
            }
        }
        self.retrieve_for_text(question, table_list, top_k)
    }
}

fn bigrams(text: &str) -> Vec<(char, char)> {
    let chars: Vec<char> = text.chars().collect();
    chars.windows(2).map(|w| (w[0], w[1])).collect()
}

/// Dice coefficient over character bigrams
fn bigram_similarity(a: &[(char, char)], b: &[(char, char)]) -> f64 {
    if a.is_empty() && b.is_empty() {
        return 1.0;
    }
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    let mut counts: HashMap<(char, char), usize> = HashMap::new();
    for &bg in a {
        *counts.entry(bg).or_insert(0) += 1;
    }
    let mut matches = 0usize;
    for bg in b {
        if let Some(count) = counts.get_mut(bg) {
            if *count > 0 {
                *count -= 1;
                matches += 1;
            }
        }
    }
    (2.0 * matches as f64) / ((a.len() + b.len()) as f64)
}

fn jaccard(a: &[String], b: &[String]) -> f64 {
    if a.is_empty() && b.is_empty() {
        return 0.0;
    }
    let intersection = a.iter().filter(|x| b.contains(x)).count();
    let union = a.len() + b.len() - intersection;
    if union == 0 {
        0.0
    } else {
        intersection as f64 / union as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn exemplar(id: &str, question: &str, tables: &[&str]) -> Exemplar {
        Exemplar {
            id: id.to_string(),
            question: question.to_string(),
            knowledge: String::new(),
            table_list: tables.iter().map(|s| s.to_string()).collect(),
            sql: format!("SELECT 1 FROM {}", tables.first().unwrap_or(&"t")),
        }
    }

    fn retriever_with_index() -> CaseRetriever {
        // Corpus holds the validated cases; the index also carries a vector
        // for "q_false" which must never be returned.
        let corpus = ExemplarCorpus::new(vec![
            exemplar("sql_1", "daily active users", &["dws_login_di"]),
            exemplar("sql_2", "monthly revenue", &["dws_pay_di"]),
        ]);
        let index = CaseIndex::new(vec![
            ("sql_1".to_string(), vec![1.0, 0.0]),
            ("sql_2".to_string(), vec![0.0, 1.0]),
            ("q_false".to_string(), vec![0.9, 0.1]),
        ])
        .unwrap();
        CaseRetriever::new(corpus, Some(index))
    }

    #[test]
    fn embedding_store_checks_dimension() {
        let json = r#"{
            "model": "test",
            "dimension": 2,
            "count": 1,
            "embeddings": [{"sql_id": "a", "vector": [1.0, 2.0, 3.0]}]
        }"#;
        let err = EmbeddingStore::from_json(json).unwrap_err();
        assert!(matches!(err, RetrievalError::DimensionMismatch { .. }));
    }

    #[test]
    fn retrieve_for_id_excludes_self_and_unvalidated() {
        let retriever = retriever_with_index();
        let found = retriever.retrieve_for_id("q_false", 2).unwrap();
        let ids: Vec<&str> = found.iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, vec!["sql_1", "sql_2"]);

        let found = retriever.retrieve_for_id("sql_1", 2).unwrap();
        assert!(found.iter().all(|e| e.id != "sql_1"));
    }

    #[test]
    fn retrieve_for_vector_applies_table_filter() {
        let retriever = retriever_with_index();
        let filter = vec!["dws_pay_di".to_string()];
        let found = retriever
            .retrieve_for_vector(&[1.0, 0.0], 2, Some(&filter))
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, "sql_2");
    }

    #[test]
    fn text_fallback_prefers_similar_questions() {
        let corpus = ExemplarCorpus::new(vec![
            exemplar("sql_1", "count daily active users in january", &["dws_login_di"]),
            exemplar("sql_2", "total payment amount by region", &["dws_pay_di"]),
        ]);
        let retriever = CaseRetriever::new(corpus, None);
        let found =
            retriever.retrieve_for_text("daily active users in february", &["dws_login_di".to_string()], 1);
        assert_eq!(found[0].id, "sql_1");
    }

    #[test]
    fn query_text_concatenation() {
        let text = prepare_query_text(
            "count users",
            "active means itimes >= 1",
            &["dws_login_di".to_string()],
        );
        assert_eq!(text, "count users active means itimes >= 1 dws_login_di");
    }

    #[test]
    fn retrieve_similar_falls_back_without_vector() {
        let retriever = retriever_with_index();
        let found = retriever.retrieve_similar("monthly revenue", &[], 1, None);
        assert_eq!(found[0].id, "sql_2");
    }
}
