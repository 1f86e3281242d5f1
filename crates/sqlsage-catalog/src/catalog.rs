//! Static table/column index with case-insensitive resolution

use sqlsage_core::TableSchema;
use std::collections::HashMap;
use std::path::Path;

/// Catalog error types
#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    #[error("Unknown table: {0}")]
    UnknownTable(String),

    #[error("Duplicate table in catalog: {0}")]
    DuplicateTable(String),

    #[error("IO error: {0}")]
    IoError(String),

    #[error("Parse error: {0}")]
    ParseError(String),
}

/// A `table.column` token resolved to its canonical catalog spelling
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedColumn {
    /// Canonical table name
    pub table: String,

    /// Canonical column name
    pub column: String,
}

/// Read-only index of table/column metadata
///
/// Built once from the catalog file; never mutated afterwards, so any number
/// of pipeline instances can read it concurrently behind an `Arc`.
#[derive(Debug, Clone)]
pub struct SchemaCatalog {
    tables: Vec<TableSchema>,

    /// Lowercased table name -> index into `tables`
    by_lower: HashMap<String, usize>,
}

impl SchemaCatalog {
    /// Build a catalog from table schemas, rejecting duplicate names
    pub fn new(tables: Vec<TableSchema>) -> Result<Self, CatalogError> {
        let mut by_lower = HashMap::with_capacity(tables.len());
        for (idx, table) in tables.iter().enumerate() {
            let key = table.name.to_lowercase();
            if by_lower.insert(key, idx).is_some() {
                return Err(CatalogError::DuplicateTable(table.name.clone()));
            }
        }
        Ok(Self { tables, by_lower })
    }

    /// Parse a catalog from its JSON wire form (array of table objects)
    pub fn from_json(json: &str) -> Result<Self, CatalogError> {
        let tables: Vec<TableSchema> =
            serde_json::from_str(json).map_err(|e| CatalogError::ParseError(e.to_string()))?;
        Self::new(tables)
    }

    /// Load a catalog from a JSON file
    pub fn from_file(path: &Path) -> Result<Self, CatalogError> {
        let contents =
            std::fs::read_to_string(path).map_err(|e| CatalogError::IoError(e.to_string()))?;
        let catalog = Self::from_json(&contents)?;
        tracing::info!(tables = catalog.len(), path = %path.display(), "loaded schema catalog");
        Ok(catalog)
    }

    /// Number of tables
    pub fn len(&self) -> usize {
        self.tables.len()
    }

    /// Whether the catalog is empty
    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    /// Canonical table names in load order
    pub fn table_names(&self) -> Vec<&str> {
        self.tables.iter().map(|t| t.name.as_str()).collect()
    }

    /// Look up a table case-insensitively
    pub fn table(&self, name: &str) -> Option<&TableSchema> {
        self.by_lower
            .get(&name.to_lowercase())
            .map(|&idx| &self.tables[idx])
    }

    /// Whether a table exists, case-insensitively
    pub fn has_table(&self, name: &str) -> bool {
        self.by_lower.contains_key(&name.to_lowercase())
    }

    /// Ordered column names for a table
    pub fn columns(&self, table: &str) -> Result<Vec<&str>, CatalogError> {
        self.table(table)
            .map(|t| t.column_names())
            .ok_or_else(|| CatalogError::UnknownTable(table.to_string()))
    }

    /// Resolve a `table.column` pair to its canonical spelling
    ///
    /// Returns `None` when either the table or the column is absent.
    pub fn resolve(&self, table: &str, column: &str) -> Option<ResolvedColumn> {
        let table = self.table(table)?;
        let column = table.find_column(column)?;
        Some(ResolvedColumn {
            table: table.name.clone(),
            column: column.name.clone(),
        })
    }

    /// Human-readable excerpt for the given tables
    ///
    /// Lists each table's description and every column as
    /// `name (type): description`. Tables absent from the catalog are skipped
    /// with a warning rather than failing the whole excerpt.
    pub fn describe<S: AsRef<str>>(&self, tables: &[S]) -> String {
        let mut lines = Vec::new();
        for name in tables {
            let Some(table) = self.table(name.as_ref()) else {
                tracing::warn!(table = name.as_ref(), "table not in catalog, skipping excerpt");
                continue;
            };
            lines.push(format!("Table: {} ({})", table.name, table.description));
            for col in &table.columns {
                lines.push(format!("  - {} ({}): {}", col.name, col.col_type, col.description));
            }
        }
        lines.join("\n")
    }

    /// Excerpt narrowed to specific columns per table
    ///
    /// `refs` pairs canonical table names with canonical column names; output
    /// follows catalog load order for tables and declaration order for
    /// columns. Tables with no columns listed are skipped, leaving the caller
    /// to fall back to the full excerpt.
    pub fn describe_columns(&self, refs: &HashMap<String, Vec<String>>) -> String {
        let mut lines = Vec::new();
        for table in &self.tables {
            let Some(wanted) = refs.get(&table.name) else {
                continue;
            };
            if wanted.is_empty() {
                continue;
            }
            lines.push(format!("Table: {}", table.name));
            lines.push(format!("Description: {}", table.description));
            for col in &table.columns {
                if wanted.iter().any(|w| w == &col.name) {
                    lines.push(format!("  - {} ({}): {}", col.name, col.col_type, col.description));
                }
            }
        }
        lines.join("\n")
    }
}
