//! Schema linking: from model free text to catalog-validated references
//!
//! One completion call maps the question onto tagged link statements; the
//! response is parsed line by line, every dotted `table.column` token is
//! resolved against the catalog, and the schema excerpt handed to generation
//! is narrowed to what the links actually reference.

use regex::Regex;
use sqlsage_catalog::SchemaCatalog;
use sqlsage_core::{LinkTag, SchemaLink};
use sqlsage_llm::CompletionClient;
use std::collections::HashMap;
use std::sync::{Arc, OnceLock};

fn tag_line_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        let labels = LinkTag::accepted_labels().join("|");
        // Tolerates leading list markers and bold markers, and both
        // half-width and full-width colons.
        Regex::new(&format!(
            r"(?im)^[\*\-\s]*\**\s*({labels})\s*\**\s*[:：]\s*(.*)$"
        ))
        .unwrap()
    })
}

fn dotted_token_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"\b([a-zA-Z_][a-zA-Z0-9_]*)\.([a-zA-Z_][a-zA-Z0-9_]*)\b").unwrap()
    })
}

fn trailing_artifact_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#""?\}\s*$"#).unwrap())
}

/// Parse tagged link lines out of a raw model response
///
/// Lines that do not open with a known tag are discarded, which drops any
/// reasoning preamble the model emits. Tags are normalized to their
/// canonical uppercase form and trailing `"}` artifacts from malformed
/// structured output are stripped. The function is pure and total; running
/// it twice yields the identical list.
pub fn parse_links(response: &str) -> Vec<SchemaLink> {
    let mut links = Vec::new();
    for captures in tag_line_re().captures_iter(response) {
        let Some(tag) = LinkTag::from_label(&captures[1]) else {
            continue;
        };
        let content = trailing_artifact_re()
            .replace(captures[2].trim(), "")
            .trim()
            .to_string();
        if content.is_empty() {
            continue;
        }
        links.push(SchemaLink::new(tag, content));
    }
    links
}

/// Result of one linking pass
#[derive(Debug, Clone, PartialEq)]
pub struct LinkOutput {
    /// Normalized tag lines, in response order
    pub links: Vec<SchemaLink>,

    /// Schema description for generation: narrowed to referenced columns, or
    /// the full excerpt when nothing resolved
    pub schema_excerpt: String,
}

/// Maps a question onto schema links through one completion call
pub struct SchemaLinkExtractor {
    catalog: Arc<SchemaCatalog>,
    llm: Arc<dyn CompletionClient>,
    common_knowledge: String,
}

impl SchemaLinkExtractor {
    /// Create an extractor over a catalog and a completion collaborator
    pub fn new(catalog: Arc<SchemaCatalog>, llm: Arc<dyn CompletionClient>) -> Self {
        Self {
            catalog,
            llm,
            common_knowledge: String::new(),
        }
    }

    /// Inject a free-text block carried verbatim into every prompt
    pub fn with_common_knowledge(mut self, knowledge: impl Into<String>) -> Self {
        self.common_knowledge = knowledge.into();
        self
    }

    /// Run one linking pass
    ///
    /// Collaborator failures are not retried here; they degrade to an empty
    /// link list with the full catalog excerpt so generation still has
    /// context.
    pub async fn extract(&self, question: &str, knowledge: &str, table_list: &[String]) -> LinkOutput {
        let full_excerpt = self.catalog.describe(table_list);
        let prompt = self.build_prompt(question, knowledge, table_list, &full_excerpt);

        let response = match self.llm.complete(&prompt).await {
            Ok(text) => text,
            Err(e) => {
                tracing::warn!(error = %e, "schema linking call failed, proceeding without links");
                return LinkOutput {
                    links: Vec::new(),
                    schema_excerpt: full_excerpt,
                };
            }
        };

        let links = self.filter_links(parse_links(&response));
        tracing::debug!(links = links.len(), "parsed schema links");

        let refs = self.resolve_references(&links);
        let schema_excerpt = if refs.is_empty() {
            full_excerpt
        } else {
            let narrowed = self.catalog.describe_columns(&refs);
            if narrowed.is_empty() {
                full_excerpt
            } else {
                narrowed
            }
        };

        LinkOutput {
            links,
            schema_excerpt,
        }
    }

    /// Keep only links whose dotted tokens all resolve against the catalog
    ///
    /// Dot-free contents (bare values, "none") pass through. A join link such
    /// as `a.x = b.y` carries two tokens and is dropped when either side
    /// fails to resolve; a dropped link never reaches the generation prompt.
    fn filter_links(&self, links: Vec<SchemaLink>) -> Vec<SchemaLink> {
        links
            .into_iter()
            .filter(|link| {
                let valid = dotted_token_re()
                    .captures_iter(&link.content)
                    .all(|captures| self.catalog.resolve(&captures[1], &captures[2]).is_some());
                if !valid {
                    tracing::warn!(link = %link, "schema link failed validation, dropped");
                }
                valid
            })
            .collect()
    }

    /// Resolve every dotted token in the links against the catalog
    ///
    /// Returns canonical table names mapped to the canonical columns actually
    /// referenced, ordered as the catalog declares them. Callers pass filtered
    /// links, so every token is expected to resolve.
    fn resolve_references(&self, links: &[SchemaLink]) -> HashMap<String, Vec<String>> {
        let mut referenced: HashMap<String, Vec<String>> = HashMap::new();
        for link in links {
            for captures in dotted_token_re().captures_iter(&link.content) {
                let Some(resolved) = self.catalog.resolve(&captures[1], &captures[2]) else {
                    continue;
                };
                let columns = referenced.entry(resolved.table).or_default();
                if !columns.contains(&resolved.column) {
                    columns.push(resolved.column);
                }
            }
        }

        // Order columns as the catalog declares them, for stable prompts
        for (table, columns) in referenced.iter_mut() {
            if let Ok(declared) = self.catalog.columns(table) {
                columns.sort_by_key(|c| declared.iter().position(|d| *d == c.as_str()));
            }
        }
        referenced
    }

    fn build_prompt(
        &self,
        question: &str,
        knowledge: &str,
        table_list: &[String],
        schema_excerpt: &str,
    ) -> String {
        format!(
            "You are a database architect fluent in SQL. Map the natural-language \
question below onto the database schema (schema linking).\n\
\n\
Core rules:\n\
1. Knowledge is code: when the business knowledge contains SQL fragments \
(substr, case when, instr, ...), keep them verbatim in your output. Do not simplify them.\n\
2. Capture operations on columns (SUM, COUNT, arithmetic), not just column names.\n\
3. Keep filter conditions distinct from displayed columns.\n\
\n\
System knowledge:\n{common}\n\
\n\
Business knowledge (follow it strictly; constants, formulas, and case logic \
must be extracted verbatim):\n{knowledge}\n\
\n\
Available tables: {tables}\n\
\n\
Table schemas:\n{schemas}\n\
\n\
Output one line per finding, using exactly these tags:\n\
1. TIME: time restrictions. Format: table.date_column BETWEEN 'start' AND 'end', \
or table.date_column = 'date'. Convert relative phrases to concrete dates.\n\
2. FILT: WHERE-clause predicates. Format: table.column operator 'value', or a \
verbatim SQL expression copied from the knowledge.\n\
3. SELC: SELECT-clause columns or computed expressions, optionally with AS aliases. \
Examples: SUM(t1.ionlinetime), CASE WHEN tier >= 24 THEN 'mythic' ELSE 'other' END AS tier_name.\n\
4. LINK: join equalities. Format: table1.column1 = table2.column2.\n\
5. GRUP: GROUP BY columns (the non-aggregated SELC columns).\n\
\n\
Example output:\n\
TIME: dws_user_retention.dtstatdate = '20250608'\n\
FILT: dws_user_retention.sgamecode = 'initiatived'\n\
FILT: INSTR(SUBSTR(REVERSE(RPAD(dws_user_retention.iactivity,128,'0')),1,31),'1') = 0\n\
SELC: dws_user_retention.gplayerid\n\
LINK: dim_user_reg.userid = dws_pay_detail.userid\n\
GRUP: dim_user_reg.reg_date\n\
\n\
Question:\n{question}\n\
\n\
Output:\n",
            common = self.common_knowledge,
            knowledge = knowledge,
            tables = table_list.join(", "),
            schemas = schema_excerpt,
            question = question,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use sqlsage_core::{ColumnDef, TableSchema};
    use sqlsage_llm::MockCompletion;

    fn catalog() -> Arc<SchemaCatalog> {
        Arc::new(
            SchemaCatalog::new(vec![
                TableSchema::new(
                    "t1",
                    "first table",
                    vec![
                        ColumnDef::new("a", "string", "col a"),
                        ColumnDef::new("b", "string", "col b"),
                    ],
                ),
                TableSchema::new(
                    "t2",
                    "second table",
                    vec![ColumnDef::new("c", "string", "col c")],
                ),
            ])
            .unwrap(),
        )
    }

    #[test]
    fn parses_decorated_tag_lines() {
        let response = "Let me analyze the question first.\n\
            Some reasoning here.\n\
            **TIME**: t1.a = '20250101'\n\
            - FILT: t1.b = 'x'\n\
            SELC： t1.a\n\
            random line without a tag\n";
        let links = parse_links(response);
        assert_eq!(links.len(), 3);
        assert_eq!(links[0].to_string(), "TIME: t1.a = '20250101'");
        assert_eq!(links[1].to_string(), "FILT: t1.b = 'x'");
        assert_eq!(links[2].to_string(), "SELC: t1.a");
    }

    #[test]
    fn alias_tags_normalize_to_canonical() {
        let links = parse_links("FILTER: t1.a = 1\nJOIN: t1.a = t2.c\nCOLUMN: t1.b");
        assert_eq!(links[0].tag, LinkTag::Filt);
        assert_eq!(links[1].tag, LinkTag::Link);
        assert_eq!(links[2].tag, LinkTag::Selc);
    }

    #[test]
    fn trailing_artifacts_stripped() {
        let links = parse_links("SELC: t1.a\"}\n");
        assert_eq!(links[0].content, "t1.a");
    }

    #[test]
    fn parsing_is_idempotent() {
        let response = "* TIME: t1.a = '20250101'\n**FILT**: t1.b IN ('x', 'y')";
        let first: Vec<String> = parse_links(response).iter().map(|l| l.to_string()).collect();
        let rendered = first.join("\n");
        let second: Vec<String> = parse_links(&rendered).iter().map(|l| l.to_string()).collect();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn narrows_excerpt_to_resolved_references() {
        let llm = Arc::new(
            MockCompletion::new().with_response("SELC: t1.a\nFILT: t1.missing = 1\nSELC: t9.a"),
        );
        let extractor = SchemaLinkExtractor::new(catalog(), llm);
        let output = extractor
            .extract("q", "", &["t1".to_string(), "t2".to_string()])
            .await;

        assert!(output.schema_excerpt.contains("Table: t1"));
        assert!(output.schema_excerpt.contains("- a (string)"));
        // Unresolved column and unknown table fall out of the excerpt
        assert!(!output.schema_excerpt.contains("- b (string)"));
        assert!(!output.schema_excerpt.contains("t9"));
    }

    #[tokio::test]
    async fn unresolvable_links_are_dropped() {
        // t1 has columns a and b; t1.x and t9.a must not survive extraction
        let llm = Arc::new(MockCompletion::new().with_response(
            "SELC: t1.a\nSELC: t1.x\nSELC: t9.a",
        ));
        let extractor = SchemaLinkExtractor::new(catalog(), llm);
        let output = extractor.extract("q", "", &["t1".to_string()]).await;

        let contents: Vec<&str> = output.links.iter().map(|l| l.content.as_str()).collect();
        assert_eq!(contents, vec!["t1.a"]);
    }

    #[tokio::test]
    async fn join_links_require_both_sides_to_resolve() {
        let llm = Arc::new(MockCompletion::new().with_response(
            "LINK: t1.a = t2.c\nLINK: t1.a = t2.missing\nLINK: t1.nope = t2.c",
        ));
        let extractor = SchemaLinkExtractor::new(catalog(), llm);
        let output = extractor
            .extract("q", "", &["t1".to_string(), "t2".to_string()])
            .await;

        let contents: Vec<&str> = output.links.iter().map(|l| l.content.as_str()).collect();
        assert_eq!(contents, vec!["t1.a = t2.c"]);
    }

    #[tokio::test]
    async fn dot_free_links_pass_through_validation() {
        let llm = Arc::new(MockCompletion::new().with_response("GRUP: none\nFILT: 'active'"));
        let extractor = SchemaLinkExtractor::new(catalog(), llm);
        let output = extractor.extract("q", "", &["t1".to_string()]).await;

        assert_eq!(output.links.len(), 2);
        assert_eq!(output.links[0].content, "none");
    }

    #[tokio::test]
    async fn falls_back_to_full_excerpt_when_nothing_resolves() {
        let llm = Arc::new(MockCompletion::new().with_response("no tags at all"));
        let extractor = SchemaLinkExtractor::new(catalog(), llm);
        let output = extractor.extract("q", "", &["t1".to_string()]).await;

        assert!(output.links.is_empty());
        assert!(output.schema_excerpt.contains("first table"));
        assert!(output.schema_excerpt.contains("- b (string): col b"));
    }

    #[tokio::test]
    async fn llm_failure_degrades_to_empty_links() {
        let llm = Arc::new(MockCompletion::new().with_failure("transient"));
        let extractor = SchemaLinkExtractor::new(catalog(), llm);
        let output = extractor.extract("q", "", &["t1".to_string()]).await;

        assert!(output.links.is_empty());
        assert!(output.schema_excerpt.contains("Table: t1"));
    }

    #[tokio::test]
    async fn knowledge_injected_verbatim_into_prompt() {
        let llm = Arc::new(MockCompletion::new().with_response("SELC: t1.a"));
        let extractor = SchemaLinkExtractor::new(catalog(), Arc::clone(&llm) as Arc<dyn CompletionClient>);
        let knowledge = "sgamecode in (\"initiatived\",\"jordass\") -- business scope";
        extractor.extract("q", knowledge, &["t1".to_string()]).await;

        let prompts = llm.prompts();
        assert!(prompts[0].contains(knowledge));
    }
}
