//! SQLSage Catalog
//!
//! Read-only index over warehouse table metadata, built once per process and
//! shared by every pipeline stage.

pub mod catalog;

pub use catalog::{CatalogError, ResolvedColumn, SchemaCatalog};
