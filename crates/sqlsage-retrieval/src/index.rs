//! Exact maximum-inner-product index over unit-normalized vectors
//!
//! Every vector is L2-normalized at construction, so inner product equals
//! cosine similarity. The scan is exhaustive; ranking fidelity matters more
//! than speed at corpus sizes of a few thousand exemplars.

use std::collections::HashMap;

/// Retrieval error types
#[derive(Debug, thiserror::Error)]
pub enum RetrievalError {
    #[error("No vector stored for id: {0}")]
    VectorNotFound(String),

    #[error("Vector for '{id}' has dimension {actual}, expected {expected}")]
    DimensionMismatch {
        id: String,
        expected: usize,
        actual: usize,
    },

    #[error("Duplicate vector id: {0}")]
    DuplicateId(String),

    #[error("IO error: {0}")]
    IoError(String),

    #[error("Parse error: {0}")]
    ParseError(String),
}

/// A retrieved id with its cosine similarity to the query
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredId {
    /// Stored id
    pub id: String,

    /// Cosine similarity in [-1, 1]
    pub score: f32,
}

/// Exact nearest-neighbor index over `(id, vector)` pairs
#[derive(Debug, Clone)]
pub struct CaseIndex {
    ids: Vec<String>,
    vectors: Vec<Vec<f32>>,
    by_id: HashMap<String, usize>,
    dimension: usize,
}

impl CaseIndex {
    /// Build an index, normalizing every vector to unit L2 norm
    ///
    /// All vectors must share one dimension; duplicate ids are rejected.
    pub fn new(entries: Vec<(String, Vec<f32>)>) -> Result<Self, RetrievalError> {
        let dimension = entries.first().map(|(_, v)| v.len()).unwrap_or(0);

        let mut ids = Vec::with_capacity(entries.len());
        let mut vectors = Vec::with_capacity(entries.len());
        let mut by_id = HashMap::with_capacity(entries.len());

        for (id, mut vector) in entries {
            if vector.len() != dimension {
                return Err(RetrievalError::DimensionMismatch {
                    id,
                    expected: dimension,
                    actual: vector.len(),
                });
            }
            if by_id.insert(id.clone(), ids.len()).is_some() {
                return Err(RetrievalError::DuplicateId(id));
            }
            normalize(&mut vector);
            ids.push(id);
            vectors.push(vector);
        }

        Ok(Self {
            ids,
            vectors,
            by_id,
            dimension,
        })
    }

    /// Vector dimension
    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// Number of stored vectors
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    /// Whether the index is empty
    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Whether an id is stored
    pub fn contains(&self, id: &str) -> bool {
        self.by_id.contains_key(id)
    }

    /// Retrieve the `top_k` nearest ids for a stored id
    ///
    /// With `exclude_self` the query's own id never appears in the results.
    pub fn query_by_id(
        &self,
        id: &str,
        top_k: usize,
        exclude_self: bool,
    ) -> Result<Vec<ScoredId>, RetrievalError> {
        self.query_by_id_filtered(id, top_k, exclude_self, |_| true)
    }

    /// Like [`query_by_id`](Self::query_by_id), with a caller-supplied
    /// allow-list applied as a post-filter on the ranked candidate stream
    pub fn query_by_id_filtered<F>(
        &self,
        id: &str,
        top_k: usize,
        exclude_self: bool,
        allow: F,
    ) -> Result<Vec<ScoredId>, RetrievalError>
    where
        F: Fn(&str) -> bool,
    {
        let &idx = self
            .by_id
            .get(id)
            .ok_or_else(|| RetrievalError::VectorNotFound(id.to_string()))?;
        let query = self.vectors[idx].clone();
        let skip = exclude_self.then_some(idx);
        Ok(self.scan(&query, top_k, skip, allow))
    }

    /// Retrieve the `top_k` nearest ids for a raw vector
    ///
    /// The vector is normalized before scoring; its dimension must match the
    /// index.
    pub fn query_by_vector(
        &self,
        vector: &[f32],
        top_k: usize,
    ) -> Result<Vec<ScoredId>, RetrievalError> {
        self.query_by_vector_filtered(vector, top_k, |_| true)
    }

    /// Like [`query_by_vector`](Self::query_by_vector), with an allow-list
    /// post-filter
    pub fn query_by_vector_filtered<F>(
        &self,
        vector: &[f32],
        top_k: usize,
        allow: F,
    ) -> Result<Vec<ScoredId>, RetrievalError>
    where
        F: Fn(&str) -> bool,
    {
        if vector.len() != self.dimension {
            return Err(RetrievalError::DimensionMismatch {
                id: "<query>".to_string(),
                expected: self.dimension,
                actual: vector.len(),
            });
        }
        let mut query = vector.to_vec();
        normalize(&mut query);
        Ok(self.scan(&query, top_k, None, allow))
    }

    /// Rank every stored vector against the query, then filter and truncate
    ///
    /// Stable sort on descending score keeps insertion order among ties.
    fn scan<F>(&self, query: &[f32], top_k: usize, skip: Option<usize>, allow: F) -> Vec<ScoredId>
    where
        F: Fn(&str) -> bool,
    {
        let mut ranked: Vec<(usize, f32)> = self
            .vectors
            .iter()
            .enumerate()
            .map(|(i, v)| (i, dot(query, v)))
            .collect();
        ranked.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));

        ranked
            .into_iter()
            .filter(|&(i, _)| Some(i) != skip)
            .filter(|&(i, _)| allow(&self.ids[i]))
            .take(top_k)
            .map(|(i, score)| ScoredId {
                id: self.ids[i].clone(),
                score,
            })
            .collect()
    }
}

fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

/// Normalize to unit L2 norm; zero vectors are left unchanged
fn normalize(vector: &mut [f32]) {
    let norm = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for x in vector.iter_mut() {
            *x /= norm;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_index() -> CaseIndex {
        CaseIndex::new(vec![
            ("a".to_string(), vec![1.0, 0.0]),
            ("b".to_string(), vec![0.0, 1.0]),
            ("c".to_string(), vec![2.0, 0.0]),
        ])
        .unwrap()
    }

    #[test]
    fn self_identity_without_exclusion() {
        let index = sample_index();
        let results = index.query_by_id("a", 1, false).unwrap();
        assert_eq!(results[0].id, "a");
        assert!((results[0].score - 1.0).abs() < 1e-6);
    }

    #[test]
    fn self_exclusion_never_returns_query_id() {
        let index = sample_index();
        let results = index.query_by_id("a", 3, true).unwrap();
        assert!(results.iter().all(|r| r.id != "a"));
    }

    #[test]
    fn ties_preserve_insertion_order() {
        // "a" and "c" normalize to the same unit vector
        let index = sample_index();
        let results = index.query_by_vector(&[1.0, 0.0], 2).unwrap();
        assert_eq!(results[0].id, "a");
        assert_eq!(results[1].id, "c");
    }

    #[test]
    fn unknown_id_is_an_error() {
        let index = sample_index();
        let err = index.query_by_id("zzz", 3, true).unwrap_err();
        assert!(matches!(err, RetrievalError::VectorNotFound(id) if id == "zzz"));
    }

    #[test]
    fn allow_list_is_a_post_filter() {
        let index = sample_index();
        let results = index
            .query_by_id_filtered("a", 3, true, |id| id == "b")
            .unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].id, "b");
    }

    #[test]
    fn mismatched_dimensions_rejected() {
        let err = CaseIndex::new(vec![
            ("a".to_string(), vec![1.0, 0.0]),
            ("b".to_string(), vec![1.0]),
        ])
        .unwrap_err();
        assert!(matches!(err, RetrievalError::DimensionMismatch { .. }));
    }

    #[test]
    fn query_vector_dimension_checked() {
        let index = sample_index();
        assert!(index.query_by_vector(&[1.0], 1).is_err());
    }
}
