//! SQLSage Engine
//!
//! The question→SQL pipeline: schema linking, retrieval-augmented SQL
//! generation, and the bounded-retry controller that ties them to the
//! validator.

pub mod generator;
pub mod linker;
pub mod pipeline;

pub use generator::SqlGenerator;
pub use linker::{parse_links, LinkOutput, SchemaLinkExtractor};
pub use pipeline::PipelineController;
