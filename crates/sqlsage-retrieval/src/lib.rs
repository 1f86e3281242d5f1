//! SQLSage Retrieval
//!
//! Nearest-neighbor exemplar retrieval for few-shot prompting: an exact
//! maximum-inner-product index over precomputed embeddings, the validated
//! exemplar corpus, and a text-similarity fallback for corpora without
//! embeddings.

pub mod corpus;
pub mod index;

pub use corpus::{prepare_query_text, CaseRetriever, EmbeddingStore, ExemplarCorpus};
pub use index::{CaseIndex, RetrievalError, ScoredId};
