//! Warehouse metadata, schema links, and exemplar types

use serde::{Deserialize, Serialize};

/// A column in a warehouse table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnDef {
    /// Column name
    #[serde(rename = "col")]
    pub name: String,

    /// Warehouse type as declared in the catalog file (e.g. "string", "bigint")
    #[serde(rename = "type")]
    pub col_type: String,

    /// Free-text description shown in prompts
    #[serde(default)]
    pub description: String,
}

impl ColumnDef {
    /// Create a new column definition
    pub fn new(
        name: impl Into<String>,
        col_type: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            col_type: col_type.into(),
            description: description.into(),
        }
    }
}

/// Metadata for one warehouse table
///
/// Immutable after load; owned exclusively by the schema catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableSchema {
    /// Table name (unique key within the catalog)
    #[serde(rename = "table_name")]
    pub name: String,

    /// Free-text description shown in prompts
    #[serde(rename = "table_description", default)]
    pub description: String,

    /// Ordered list of columns
    pub columns: Vec<ColumnDef>,
}

impl TableSchema {
    /// Create a new table schema
    pub fn new(name: impl Into<String>, description: impl Into<String>, columns: Vec<ColumnDef>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            columns,
        }
    }

    /// Column names in declaration order
    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }

    /// Find a column by name, case-insensitively
    pub fn find_column(&self, name: &str) -> Option<&ColumnDef> {
        self.columns.iter().find(|c| c.name.eq_ignore_ascii_case(name))
    }
}

/// The five link categories an LLM may emit during schema linking
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LinkTag {
    /// Date-range or equality predicate on a date column
    Time,

    /// WHERE-clause predicate, possibly a full SQL expression
    Filt,

    /// SELECT-clause column or computed expression, may carry an `AS` alias
    Selc,

    /// Join equality `table1.col1 = table2.col2`
    Link,

    /// GROUP BY column
    Grup,
}

impl LinkTag {
    /// Canonical uppercase label
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Time => "TIME",
            Self::Filt => "FILT",
            Self::Selc => "SELC",
            Self::Link => "LINK",
            Self::Grup => "GRUP",
        }
    }

    /// Parse a tag label as emitted by a model
    ///
    /// Accepts the longhand spellings some models prefer (FILTER, JOIN,
    /// COLUMN) and maps them onto the canonical tag. Unknown labels yield
    /// `None` and the line is discarded by the extractor.
    pub fn from_label(label: &str) -> Option<Self> {
        match label.to_ascii_uppercase().as_str() {
            "TIME" => Some(Self::Time),
            "FILT" | "FILTER" => Some(Self::Filt),
            "SELC" | "COLUMN" => Some(Self::Selc),
            "LINK" | "JOIN" => Some(Self::Link),
            "GRUP" => Some(Self::Grup),
            _ => None,
        }
    }

    /// Every label `from_label` accepts, used to build the line matcher
    pub fn accepted_labels() -> &'static [&'static str] {
        &["TIME", "FILT", "SELC", "LINK", "GRUP", "FILTER", "JOIN", "COLUMN"]
    }
}

impl std::fmt::Display for LinkTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One normalized, catalog-validated link statement
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaLink {
    /// Link category
    pub tag: LinkTag,

    /// Verbatim expression; may embed SQL fragments which are preserved
    /// unmodified
    pub content: String,
}

impl SchemaLink {
    /// Create a new schema link
    pub fn new(tag: LinkTag, content: impl Into<String>) -> Self {
        Self {
            tag,
            content: content.into(),
        }
    }
}

impl std::fmt::Display for SchemaLink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.tag, self.content)
    }
}

/// A previously validated question/SQL pair used for few-shot prompting
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Exemplar {
    /// Stable identifier, shared with the embedding store
    #[serde(rename = "sql_id")]
    pub id: String,

    /// Natural-language question
    pub question: String,

    /// Business knowledge attached to the question
    #[serde(default)]
    pub knowledge: String,

    /// Tables the reference SQL touches
    #[serde(default)]
    pub table_list: Vec<String>,

    /// Reference SQL
    pub sql: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_schema_lookup_is_case_insensitive() {
        let table = TableSchema::new(
            "dws_login_di",
            "daily logins",
            vec![
                ColumnDef::new("dtstatdate", "string", "partition date"),
                ColumnDef::new("suserid", "string", "user id"),
            ],
        );

        assert!(table.find_column("SUSERID").is_some());
        assert!(table.find_column("missing").is_none());
        assert_eq!(table.column_names(), vec!["dtstatdate", "suserid"]);
    }

    #[test]
    fn link_tag_labels() {
        assert_eq!(LinkTag::from_label("time"), Some(LinkTag::Time));
        assert_eq!(LinkTag::from_label("FILTER"), Some(LinkTag::Filt));
        assert_eq!(LinkTag::from_label("JOIN"), Some(LinkTag::Link));
        assert_eq!(LinkTag::from_label("COLUMN"), Some(LinkTag::Selc));
        assert_eq!(LinkTag::from_label("NOPE"), None);
    }

    #[test]
    fn schema_link_display() {
        let link = SchemaLink::new(LinkTag::Filt, "t1.sgamecode = 'initiatived'");
        assert_eq!(link.to_string(), "FILT: t1.sgamecode = 'initiatived'");
    }

    #[test]
    fn exemplar_deserializes_from_corpus_shape() {
        let json = r#"{
            "sql_id": "sql_1",
            "question": "daily active users",
            "knowledge": "",
            "table_list": ["dws_login_di"],
            "sql": "SELECT COUNT(1) FROM dws_login_di"
        }"#;

        let exemplar: Exemplar = serde_json::from_str(json).unwrap();
        assert_eq!(exemplar.id, "sql_1");
        assert_eq!(exemplar.table_list, vec!["dws_login_di"]);
    }
}
