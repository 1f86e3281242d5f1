use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use sqlsage_catalog::SchemaCatalog;
use sqlsage_core::{Config, PipelineOutcome, PipelineState};
use sqlsage_engine::{PipelineController, SchemaLinkExtractor, SqlGenerator};
use sqlsage_llm::CompletionClient;
use sqlsage_retrieval::{prepare_query_text, CaseRetriever, EmbeddingStore, ExemplarCorpus};
use sqlsage_sql::{SqlValidate, Validator};

/// SQLSage - Natural-language questions to validated warehouse SQL
#[derive(Parser)]
#[command(name = "sqlsage")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to config file (default: sqlsage.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Answer one question
    Run {
        /// Natural-language question
        question: String,

        /// Tables in scope (comma-separated)
        #[arg(short, long, value_delimiter = ',')]
        tables: Vec<String>,

        /// Business knowledge attached to the question
        #[arg(short, long, default_value = "")]
        knowledge: String,

        /// Identifier carried into logs and exemplar retrieval
        #[arg(long, default_value = "adhoc")]
        id: String,
    },

    /// Process a dataset file, resuming past completed ids
    Batch {
        /// Dataset JSON: [{sql_id, question, table_list, knowledge, ...}]
        #[arg(short, long)]
        dataset: PathBuf,

        /// Output file, also used to detect already-processed ids
        #[arg(short, long, default_value = "results.json")]
        output: PathBuf,

        /// Append one terminal state per question to this JSON-lines log
        #[arg(long)]
        run_log: Option<PathBuf>,
    },

    /// Embed dataset questions into an embedding store file
    ///
    /// Without an LLM backend compiled in, writes the prepared query texts
    /// instead so they can be embedded elsewhere.
    PrepareEmbeddings {
        /// Dataset JSON to embed
        #[arg(short, long)]
        dataset: PathBuf,

        /// Output embedding store
        #[arg(short, long, default_value = "data/embeddings.json")]
        output: PathBuf,
    },

    /// Show the nearest validated exemplars for a stored id
    Retrieve {
        /// Exemplar or dataset id to query
        id: String,

        /// Number of neighbors
        #[arg(short = 'k', long, default_value_t = 3)]
        top_k: usize,
    },
}

/// One dataset row, as produced by the annotation pipeline
#[derive(Debug, Clone, Serialize, Deserialize)]
struct DatasetItem {
    sql_id: String,
    question: String,
    #[serde(default)]
    knowledge: String,
    #[serde(default)]
    table_list: Vec<String>,
    #[serde(default)]
    complexity: Option<String>,
}

/// One line of the run log: when the question finished plus its full state
#[derive(Debug, Serialize)]
struct RunLogEntry<'a> {
    finished_at: chrono::DateTime<chrono::Utc>,
    #[serde(flatten)]
    state: &'a PipelineState,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let config = if let Some(config_path) = &cli.config {
        Config::from_file(config_path)?
    } else if Path::new("sqlsage.toml").exists() {
        Config::from_file(Path::new("sqlsage.toml"))?
    } else {
        if cli.verbose {
            eprintln!("{}", "No config file found, using defaults".yellow());
        }
        Config::default()
    };

    match cli.command {
        Commands::Run {
            question,
            tables,
            knowledge,
            id,
        } => run_command(&config, &id, &question, &knowledge, tables, cli.verbose).await,
        Commands::Batch {
            dataset,
            output,
            run_log,
        } => batch_command(&config, &dataset, &output, run_log.as_deref(), cli.verbose).await,
        Commands::PrepareEmbeddings { dataset, output } => {
            prepare_embeddings_command(&config, &dataset, &output, cli.verbose).await
        }
        Commands::Retrieve { id, top_k } => retrieve_command(&config, &id, top_k),
    }
}

/// Data files loaded once per process
struct LoadedData {
    catalog: Arc<SchemaCatalog>,
    retriever: Option<Arc<CaseRetriever>>,
    common_knowledge: String,
}

fn load_data(config: &Config, verbose: bool) -> Result<LoadedData> {
    let catalog = Arc::new(
        SchemaCatalog::from_file(&config.data.catalog)
            .with_context(|| format!("loading catalog from {}", config.data.catalog.display()))?,
    );
    if verbose {
        eprintln!("{} {} tables", "Catalog:".cyan(), catalog.len());
    }

    let retriever = if config.data.exemplars.exists() {
        let corpus = ExemplarCorpus::from_file(&config.data.exemplars).with_context(|| {
            format!("loading exemplars from {}", config.data.exemplars.display())
        })?;
        let index = if config.data.embeddings.exists() {
            let store = EmbeddingStore::from_file(&config.data.embeddings)?;
            Some(store.build_index()?)
        } else {
            if verbose {
                eprintln!(
                    "{}",
                    "No embedding store; retrieval falls back to text similarity".yellow()
                );
            }
            None
        };
        Some(Arc::new(CaseRetriever::new(corpus, index)))
    } else {
        if verbose {
            eprintln!("{}", "No exemplar corpus; generating without examples".yellow());
        }
        None
    };

    let common_knowledge = match &config.data.common_knowledge {
        Some(path) => std::fs::read_to_string(path)
            .with_context(|| format!("loading common knowledge from {}", path.display()))?,
        None => String::new(),
    };

    Ok(LoadedData {
        catalog,
        retriever,
        common_knowledge,
    })
}

#[cfg(feature = "openai")]
fn completion_client(config: &Config) -> Result<Arc<dyn CompletionClient>> {
    Ok(Arc::new(sqlsage_llm::OpenAiClient::new(&config.llm)))
}

#[cfg(not(feature = "openai"))]
fn completion_client(_config: &Config) -> Result<Arc<dyn CompletionClient>> {
    anyhow::bail!("no LLM backend compiled in; rebuild with --features openai")
}

fn build_controller(config: &Config, data: &LoadedData) -> Result<PipelineController> {
    let llm = completion_client(config)?;

    let linker = SchemaLinkExtractor::new(Arc::clone(&data.catalog), Arc::clone(&llm))
        .with_common_knowledge(data.common_knowledge.clone());

    let mut generator =
        SqlGenerator::new(Arc::clone(&llm)).with_common_knowledge(data.common_knowledge.clone());
    if let Some(retriever) = &data.retriever {
        generator = generator.with_retriever(Arc::clone(retriever), config.pipeline.top_k);
        #[cfg(feature = "openai")]
        {
            // Lets ad-hoc questions use the vector index instead of the
            // text-similarity fallback
            generator =
                generator.with_embedder(Arc::new(sqlsage_llm::OpenAiClient::new(&config.llm)));
        }
    }

    if config.probe.is_some() {
        // A probe DSN is configured but no engine driver is compiled in; the
        // structural check still runs.
        tracing::warn!("probe configured but dynamic validation is unavailable in this build");
    }
    let validator: Arc<dyn SqlValidate> = Arc::new(Validator::new(Arc::clone(&data.catalog)));

    Ok(PipelineController::new(linker, generator, validator)
        .with_relink_on_retry(config.pipeline.relink_on_retry))
}

async fn run_command(
    config: &Config,
    id: &str,
    question: &str,
    knowledge: &str,
    tables: Vec<String>,
    verbose: bool,
) -> Result<()> {
    let data = load_data(config, verbose)?;
    let controller = build_controller(config, &data)?;

    let state = controller
        .run(id, question, knowledge, tables, config.pipeline.max_retries)
        .await;

    if state.is_valid {
        eprintln!("{}", "✓ validated".green());
    } else {
        eprintln!(
            "{} {}",
            "✗ not validated after".red(),
            format!("{} attempts", state.retry_count + 1).red()
        );
        for error in &state.error_history {
            eprintln!("  attempt {}: {}", error.attempt + 1, error.message);
        }
    }
    println!("{}", state.generated_sql);
    Ok(())
}

async fn batch_command(
    config: &Config,
    dataset_path: &Path,
    output_path: &Path,
    run_log: Option<&Path>,
    verbose: bool,
) -> Result<()> {
    let data = load_data(config, verbose)?;
    let controller = build_controller(config, &data)?;

    let dataset = load_dataset(dataset_path)?;
    let mut results = load_results(output_path)?;
    let done: HashSet<String> = results.iter().map(|r| r.id.clone()).collect();

    let pending: Vec<&DatasetItem> = dataset
        .iter()
        .filter(|item| !done.contains(&item.sql_id))
        .collect();
    eprintln!(
        "{} {} questions ({} already done)",
        "Processing".cyan(),
        pending.len(),
        done.len()
    );

    let mut valid_count = 0usize;
    for (i, item) in pending.iter().enumerate() {
        if verbose {
            eprintln!(
                "  [{}/{}] {} {}",
                i + 1,
                pending.len(),
                item.sql_id.cyan(),
                truncate_for_display(&item.question)
            );
        }

        let state = controller
            .run(
                &item.sql_id,
                &item.question,
                &item.knowledge,
                item.table_list.clone(),
                config.pipeline.max_retries,
            )
            .await;

        if state.is_valid {
            valid_count += 1;
            if verbose {
                eprintln!("    {}", "✓ OK".green());
            }
        } else if verbose {
            eprintln!("    {} after {} attempts", "✗ failed".red(), state.retry_count + 1);
        }

        if let Some(log_path) = run_log {
            append_run_log(log_path, &state)?;
        }

        // Persist after every question so an interrupted run resumes cleanly
        results.push(PipelineOutcome::from(&state));
        save_results(output_path, &results)?;
    }

    eprintln!(
        "{} {}/{} validated, results in {}",
        "Done:".green(),
        valid_count,
        pending.len(),
        output_path.display()
    );
    Ok(())
}

async fn prepare_embeddings_command(
    config: &Config,
    dataset_path: &Path,
    output_path: &Path,
    verbose: bool,
) -> Result<()> {
    let dataset = load_dataset(dataset_path)?;
    let texts: Vec<String> = dataset
        .iter()
        .map(|item| prepare_query_text(&item.question, &item.knowledge, &item.table_list))
        .collect();
    if verbose {
        eprintln!("{} {} questions", "Preparing".cyan(), texts.len());
    }

    if let Some(parent) = output_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    write_embeddings(config, &dataset, texts, output_path).await
}

#[cfg(feature = "openai")]
async fn write_embeddings(
    config: &Config,
    dataset: &[DatasetItem],
    texts: Vec<String>,
    output_path: &Path,
) -> Result<()> {
    use sqlsage_llm::EmbeddingClient;
    use sqlsage_retrieval::corpus::EmbeddingRecord;

    // The API caps batch sizes; 64 stays well under every gateway's limit
    const BATCH: usize = 64;

    let client = sqlsage_llm::OpenAiClient::new(&config.llm);
    let mut vectors = Vec::with_capacity(texts.len());
    for chunk in texts.chunks(BATCH) {
        vectors.extend(client.embed(chunk).await?);
    }

    let dimension = vectors.first().map(|v| v.len()).unwrap_or(0);
    let embeddings: Vec<EmbeddingRecord> = dataset
        .iter()
        .zip(vectors)
        .map(|(item, vector)| EmbeddingRecord {
            sql_id: item.sql_id.clone(),
            vector,
        })
        .collect();

    let store = EmbeddingStore {
        model: config.llm.embedding_model.clone(),
        dimension,
        count: embeddings.len(),
        embeddings,
    };
    std::fs::write(output_path, serde_json::to_string(&store)?)?;
    eprintln!(
        "{} {} vectors ({}d, {}) in {}",
        "Wrote".green(),
        store.count,
        store.dimension,
        store.model,
        output_path.display()
    );
    Ok(())
}

#[cfg(not(feature = "openai"))]
async fn write_embeddings(
    _config: &Config,
    dataset: &[DatasetItem],
    texts: Vec<String>,
    output_path: &Path,
) -> Result<()> {
    #[derive(Serialize)]
    struct PreparedText<'a> {
        sql_id: &'a str,
        text: String,
    }

    let records: Vec<PreparedText<'_>> = dataset
        .iter()
        .zip(texts)
        .map(|(item, text)| PreparedText {
            sql_id: &item.sql_id,
            text,
        })
        .collect();
    std::fs::write(output_path, serde_json::to_string_pretty(&records)?)?;
    eprintln!(
        "{} {} query texts in {} (no embedding backend compiled in; embed them \
externally or rebuild with --features openai)",
        "Wrote".yellow(),
        records.len(),
        output_path.display()
    );
    Ok(())
}

fn retrieve_command(config: &Config, id: &str, top_k: usize) -> Result<()> {
    let data = load_data(config, false)?;
    let retriever = data
        .retriever
        .as_ref()
        .context("no exemplar corpus configured")?;

    let found = if retriever.has_index() {
        retriever
            .retrieve_for_id(id, top_k)
            .with_context(|| format!("no stored vector for {id}"))?
    } else {
        let item = retriever
            .corpus()
            .get(id)
            .with_context(|| format!("unknown id {id}"))?;
        let question = item.question.clone();
        let tables = item.table_list.clone();
        retriever.retrieve_for_text(&question, &tables, top_k + 1)
            .into_iter()
            .filter(|e| e.id != id)
            .take(top_k)
            .collect()
    };

    for (i, exemplar) in found.iter().enumerate() {
        println!("{}. {} {}", i + 1, exemplar.id.cyan(), exemplar.question);
        println!("{}", exemplar.sql);
        if i + 1 < found.len() {
            println!();
        }
    }
    Ok(())
}

fn load_dataset(path: &Path) -> Result<Vec<DatasetItem>> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("reading dataset {}", path.display()))?;
    serde_json::from_str(&contents).with_context(|| format!("parsing dataset {}", path.display()))
}

fn load_results(path: &Path) -> Result<Vec<PipelineOutcome>> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let contents = std::fs::read_to_string(path)?;
    if contents.trim().is_empty() {
        return Ok(Vec::new());
    }
    serde_json::from_str(&contents).with_context(|| format!("parsing results {}", path.display()))
}

fn save_results(path: &Path, results: &[PipelineOutcome]) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, serde_json::to_string_pretty(results)?)?;
    Ok(())
}

fn append_run_log(path: &Path, state: &PipelineState) -> Result<()> {
    use std::io::Write;

    let entry = RunLogEntry {
        finished_at: chrono::Utc::now(),
        state,
    };
    let mut file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)?;
    writeln!(file, "{}", serde_json::to_string(&entry)?)?;
    Ok(())
}

fn truncate_for_display(text: &str) -> String {
    const LIMIT: usize = 60;
    if text.chars().count() <= LIMIT {
        text.to_string()
    } else {
        let cut: String = text.chars().take(LIMIT).collect();
        format!("{cut}...")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn dataset_item_defaults_optional_fields() {
        let item: DatasetItem =
            serde_json::from_str(r#"{"sql_id": "sql_1", "question": "q"}"#).unwrap();
        assert_eq!(item.sql_id, "sql_1");
        assert!(item.knowledge.is_empty());
        assert!(item.table_list.is_empty());
        assert!(item.complexity.is_none());
    }

    #[test]
    fn results_roundtrip_preserves_ids() {
        let dir = std::env::temp_dir().join("sqlsage-cli-test");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("results.json");

        let state = PipelineState::new("sql_42", "q", "", vec![], 3)
            .with_sql("SELECT 1 FROM t".to_string());
        save_results(&path, &[PipelineOutcome::from(&state)]).unwrap();

        let loaded = load_results(&path).unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].id, "sql_42");
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn missing_results_file_is_empty() {
        let loaded = load_results(Path::new("/nonexistent/results.json")).unwrap();
        assert!(loaded.is_empty());
    }

    #[test]
    fn display_truncation_keeps_short_text() {
        assert_eq!(truncate_for_display("short"), "short");
        assert!(truncate_for_display(&"x".repeat(100)).ends_with("..."));
    }
}
