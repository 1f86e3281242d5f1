//! SQLSage SQL
//!
//! Taming model output into SQL text, and checking that text against the
//! catalog: the multi-strategy extractor for raw LLM responses and the
//! structural/dynamic validator.

pub mod extract;
pub mod validate;

pub use extract::extract_sql;
pub use validate::{ExplainProbe, ProbeError, SqlValidate, Validator};
