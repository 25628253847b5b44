//! semindex CLI - semantic search over a document directory

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use colored::*;
use indicatif::{ProgressBar, ProgressStyle};
use semindex::tool::function_declaration;
use semindex::{
    format_results, format_results_json, Config, EmbeddingModel, IndexState, IndexStatus,
    ProviderKind, SearchRequest, SearchResponse, SemanticSearchTool,
};
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;

const DEFAULT_DESCRIPTION: &str = "Search indexed documents by meaning";

#[derive(Parser, Debug)]
#[command(name = "semindex")]
#[command(author, version, about = "Semantic search over a directory of documents", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// JSON configuration file
    #[arg(long, global = true, env = "SEMINDEX_CONFIG")]
    config: Option<PathBuf>,

    /// Component name; selects the on-disk collection
    #[arg(long, global = true, default_value = "semantic_search", env = "SEMINDEX_NAME")]
    name: String,

    /// Embedding provider (local, cloud)
    #[arg(long, global = true, env = "SEMINDEX_PROVIDER")]
    provider: Option<String>,

    /// Local embedding model to use
    #[arg(long, global = true, env = "SEMINDEX_MODEL")]
    model: Option<String>,

    /// Enable verbose logging
    #[arg(short = 'v', long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Build the search index and wait for it to finish
    Index {
        /// Directory to index [default: config file's, else "."]
        path: Option<PathBuf>,

        /// Seconds to wait for indexing
        #[arg(long, default_value = "3600")]
        wait: u64,
    },

    /// Search the index
    Search {
        /// Search query
        query: String,

        /// Directory to search in [default: config file's, else "."]
        #[arg(short = 'd', long)]
        dir: Option<PathBuf>,

        /// Maximum number of results
        #[arg(short = 'm', long, env = "SEMINDEX_MAX_COUNT")]
        max_count: Option<usize>,

        /// Minimum similarity score
        #[arg(short = 't', long)]
        threshold: Option<f64>,

        /// Show content of results
        #[arg(short = 'c', long, env = "SEMINDEX_CONTENT")]
        content: bool,

        /// Output as JSON
        #[arg(long, env = "SEMINDEX_JSON")]
        json: bool,

        /// Seconds to wait for indexing before searching
        #[arg(long, default_value = "600")]
        wait: u64,
    },

    /// Index a directory and show the resulting status
    Status {
        /// Directory to index [default: config file's, else "."]
        path: Option<PathBuf>,

        /// Output as JSON
        #[arg(long)]
        json: bool,

        /// Seconds to wait for indexing
        #[arg(long, default_value = "600")]
        wait: u64,
    },

    /// Print the function-calling declaration
    Schema {
        /// Tool description shown to the model
        #[arg(long, default_value = DEFAULT_DESCRIPTION)]
        description: String,
    },

    /// List available local embedding models
    Models,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("warn")
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    match &cli.command {
        Commands::Index { path, wait } => cmd_index(&cli, path.clone(), *wait),
        Commands::Search {
            query,
            dir,
            max_count,
            threshold,
            content,
            json,
            wait,
        } => {
            let request = SearchRequest {
                query: query.clone(),
                limit: *max_count,
                similarity_threshold: *threshold,
            };
            cmd_search(&cli, dir.clone(), &request, *content, *json, *wait)
        }
        Commands::Status { path, json, wait } => cmd_status(&cli, path.clone(), *json, *wait),
        Commands::Schema { description } => cmd_schema(&cli, description),
        Commands::Models => cmd_models(),
    }
}

/// Configuration file, then command-line overrides
///
/// `dir` replaces the file's `scan_directory` only when given.
fn build_config(cli: &Cli, dir: Option<PathBuf>) -> Result<Config> {
    let mut config = match &cli.config {
        Some(path) => Config::load(path)
            .with_context(|| format!("Failed to load configuration from {:?}", path))?,
        None => Config::default(),
    };

    if let Some(dir) = dir {
        config.scan_directory = dir.canonicalize().unwrap_or(dir);
    }
    if let Some(provider) = &cli.provider {
        config.embedding_provider = provider.parse::<ProviderKind>()?;
    }
    if let Some(model) = &cli.model {
        config.local_model = model.parse::<EmbeddingModel>()?;
    }

    Ok(config.validated()?)
}

/// Start a component and show a spinner until its run finishes
fn start_and_wait(
    cli: &Cli,
    dir: Option<PathBuf>,
    wait: u64,
) -> Result<(SemanticSearchTool, IndexStatus)> {
    let config = build_config(cli, dir)?;
    let tool = SemanticSearchTool::new(&cli.name, DEFAULT_DESCRIPTION, config)?;

    let pb = ProgressBar::new_spinner();
    pb.set_style(ProgressStyle::default_spinner().template("{spinner:.green} {msg}")?);
    pb.enable_steady_tick(Duration::from_millis(100));

    let deadline = Instant::now() + Duration::from_secs(wait);
    let status = loop {
        let status = tool.wait_until_idle(Duration::from_millis(250));
        if !status.in_progress() || Instant::now() >= deadline {
            break status;
        }
        pb.set_message(format!(
            "Indexing {:?}... ({:?})",
            tool.config().scan_directory,
            status.state
        ));
    };
    pb.finish_and_clear();

    Ok((tool, status))
}

fn cmd_index(cli: &Cli, path: Option<PathBuf>, wait: u64) -> Result<()> {
    let (tool, status) = start_and_wait(cli, path, wait)?;
    println!("{} {:?}", "Indexed".cyan().bold(), tool.config().scan_directory);

    if status.in_progress() {
        bail!("Indexing did not finish within {} seconds", wait);
    }
    if let Some(error) = &status.last_error {
        bail!("Indexing stopped early: {}", error);
    }

    println!(
        "\n{} Indexed {} files, {} chunks",
        "✓".green(),
        status.files_processed,
        status.chunks_indexed
    );

    Ok(())
}

fn cmd_search(
    cli: &Cli,
    dir: Option<PathBuf>,
    request: &SearchRequest,
    content: bool,
    json: bool,
    wait: u64,
) -> Result<()> {
    let (tool, status) = start_and_wait(cli, dir, wait)?;
    if let Some(error) = &status.last_error {
        eprintln!("{} {}", "Warning:".yellow().bold(), error);
    }

    match tool.search(request) {
        SearchResponse::Success(found) => {
            if json {
                println!("{}", format_results_json(&found.results)?);
            } else if found.results.is_empty() {
                println!("No results found for: {}", request.query.yellow());
            } else {
                println!(
                    "\n{} results for \"{}\":\n",
                    found.results_count.to_string().green().bold(),
                    request.query.cyan()
                );
                print!("{}", format_results(&found.results, content));
            }
        }
        SearchResponse::IndexingInProgress(pending) => {
            println!("{}", pending.message.yellow());
            if json {
                println!("{}", serde_json::to_string_pretty(&pending.debug_info)?);
            }
        }
        SearchResponse::Error(failure) => bail!("Search failed: {}", failure.error),
    }

    Ok(())
}

fn cmd_status(cli: &Cli, path: Option<PathBuf>, json: bool, wait: u64) -> Result<()> {
    let (tool, status) = start_and_wait(cli, path, wait)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&status)?);
        return Ok(());
    }

    let state = match status.state {
        IndexState::Complete if status.last_error.is_none() => "complete".green(),
        IndexState::Complete => "complete (with errors)".yellow(),
        IndexState::Indexing => "indexing".yellow(),
        IndexState::NotStarted => "not started".red(),
    };

    println!("{}", "Index Status".cyan().bold());
    println!("  Directory: {:?}", tool.config().scan_directory);
    println!("  State:     {}", state);
    println!("  Files:     {}", status.files_processed.to_string().green());
    println!("  Chunks:    {}", status.chunks_indexed.to_string().green());
    println!("  Provider:  {}", tool.config().embedding_provider.to_string().yellow());
    if let Some(finished) = status.finished_at {
        println!("  Finished:  {}", finished.to_rfc3339());
    }
    if let Some(error) = &status.last_error {
        println!("  Error:     {}", error.red());
    }

    Ok(())
}

fn cmd_schema(cli: &Cli, description: &str) -> Result<()> {
    let config = build_config(cli, None)?;
    let declaration = function_declaration(&cli.name, description, &config);
    println!("{}", serde_json::to_string_pretty(&declaration)?);
    Ok(())
}

fn cmd_models() -> Result<()> {
    println!("{}", "Available Embedding Models".cyan().bold());
    println!();
    for model in EmbeddingModel::ALL {
        let default = if model == EmbeddingModel::default() {
            " (default)"
        } else {
            ""
        };
        println!("  {}{}", model.short_name().green().bold(), default);
        println!("    {} ({} dims)", model.model_name(), model.dimension());
        println!();
    }
    println!(
        "Cloud provider: {} (text-embedding-004, text-embedding-005, gemini-embedding-001)",
        "--provider cloud".yellow()
    );
    println!("Usage: {} --model bge", "semindex index".yellow());

    Ok(())
}
