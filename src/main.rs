//! # Catalog QA CLI (`cqa`)
//!
//! The `cqa` binary manages a library of PDF product catalogs and answers
//! product questions against it.
//!
//! ## Usage
//!
//! ```bash
//! cqa --config ./config/cqa.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `cqa init` | Create the storage directory and an empty library |
//! | `cqa add <pdf>` | Ingest a catalog (render, extract, persist) |
//! | `cqa remove <name>` | Delete a catalog and its backing file |
//! | `cqa list` | Show the library overview |
//! | `cqa show <name>` | Show one catalog's metadata in detail |
//! | `cqa rank "<query>"` | Show catalog relevance ranking for a query |
//! | `cqa ask "<question>"` | Answer a product question |
//! | `cqa chat` | Interactive question loop |
//!
//! The Gemini provider reads its key from the `GEMINI_API_KEY` environment
//! variable. Set `RUST_LOG` (e.g. `RUST_LOG=catalog_qa=debug`) to see
//! per-stage diagnostics on stderr.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::io::{BufRead, Write};
use std::path::PathBuf;
use std::sync::Arc;

use catalog_qa::config::{self, Config};
use catalog_qa::extract::ContentExtractor;
use catalog_qa::llm;
use catalog_qa::models::ChatMessage;
use catalog_qa::orchestrate::Orchestrator;
use catalog_qa::rank::RelevanceRanker;
use catalog_qa::raster::PdfiumRasterizer;
use catalog_qa::store::CatalogStore;

/// Catalog QA CLI: multi-catalog product question answering over PDF
/// catalogs.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file; when the file is absent, built-in defaults are used. See
/// `config/cqa.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "cqa",
    about = "Catalog QA: product question answering over PDF catalogs",
    version,
    long_about = "Catalog QA ingests PDF product catalogs, extracts their content through a \
    multimodal model, and answers product questions by ranking catalogs for relevance and \
    searching the best match with a multi-stage retry ladder."
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/cqa.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

/// Top-level CLI commands.
#[derive(Subcommand)]
enum Commands {
    /// Create the storage directory and an empty catalog library.
    ///
    /// Idempotent; running it against an existing library is safe.
    Init,

    /// Ingest a PDF catalog into the library.
    ///
    /// Renders every page, extracts structured metadata and a consolidated
    /// knowledge base through the configured model, and persists the record.
    /// Re-adding a filename overwrites the existing catalog.
    Add {
        /// Path to the PDF file. The file name becomes the catalog's key.
        pdf: PathBuf,
    },

    /// Remove a catalog and its backing file from the library.
    Remove {
        /// Catalog name (the original file name, e.g. `spring.pdf`).
        name: String,
    },

    /// Show an overview of all catalogs in the library.
    List,

    /// Show one catalog's metadata in detail.
    Show {
        /// Catalog name (the original file name).
        name: String,
    },

    /// Rank all catalogs by relevance to a query, without answering it.
    Rank {
        /// The product query to rank against.
        query: String,
    },

    /// Answer a product question using the most relevant catalog.
    ///
    /// Ranks catalogs, queries the best one through the retry ladder, and
    /// falls back to the next-ranked catalogs when the answer looks weak.
    Ask {
        /// The product question.
        question: String,
    },

    /// Interactive question loop. Type `exit` or `quit` to leave.
    Chat,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = config::load_or_default(&cli.config)?;

    match cli.command {
        Commands::Init => run_init(&config),
        Commands::Add { pdf } => run_add(&config, &pdf).await,
        Commands::Remove { name } => run_remove(&config, &name),
        Commands::List => run_list(&config),
        Commands::Show { name } => run_show(&config, &name),
        Commands::Rank { query } => run_rank(&config, &query).await,
        Commands::Ask { question } => run_ask(&config, &question).await,
        Commands::Chat => run_chat(&config).await,
    }
}

fn run_init(config: &Config) -> Result<()> {
    let store = CatalogStore::open(&config.storage.dir)?;
    println!(
        "catalog library ready at {} ({} catalogs)",
        config.storage.dir.display(),
        store.len()
    );
    println!("ok");
    Ok(())
}

async fn run_add(config: &Config, pdf: &PathBuf) -> Result<()> {
    let filename = pdf
        .file_name()
        .and_then(|n| n.to_str())
        .context("PDF path has no usable file name")?
        .to_string();

    let pdf_bytes = std::fs::read(pdf)
        .with_context(|| format!("Failed to read PDF file: {}", pdf.display()))?;

    let client = llm::create_client(&config.llm)?;
    let extractor = ContentExtractor::new(client.as_ref(), config.extraction.batch_size);
    let mut store = CatalogStore::open(&config.storage.dir)?;

    println!("add {}", filename);
    let metadata = store
        .add(
            &filename,
            pdf_bytes,
            config.extraction.dpi,
            Arc::new(PdfiumRasterizer),
            &extractor,
        )
        .await
        .with_context(|| format!("Failed to ingest catalog {}", filename))?;

    println!("  pages: {}", metadata.page_count);
    println!("  summary: {}", metadata.summary);
    println!("  categories: {}", metadata.categories.join(", "));
    println!("  keywords: {}", metadata.keywords.join(", "));
    println!(
        "  knowledge base: {} characters",
        metadata.detailed_content.len()
    );
    println!("ok");
    Ok(())
}

fn run_remove(config: &Config, name: &str) -> Result<()> {
    let mut store = CatalogStore::open(&config.storage.dir)?;
    if store.remove(name)? {
        println!("removed {}", name);
        println!("ok");
    } else {
        println!("no catalog named {}", name);
    }
    Ok(())
}

fn run_list(config: &Config) -> Result<()> {
    let store = CatalogStore::open(&config.storage.dir)?;
    println!("{}", store.overview());
    Ok(())
}

fn run_show(config: &Config, name: &str) -> Result<()> {
    let store = CatalogStore::open(&config.storage.dir)?;
    let Some(c) = store.get(name) else {
        println!("no catalog named {}", name);
        return Ok(());
    };

    println!("{}", c.filename);
    println!("  file: {}", c.file_path.display());
    println!("  pages: {}", c.page_count);
    println!("  processed: {}", c.is_processed);
    if let Some(date) = c.processing_date {
        println!("  processed at: {}", date.to_rfc3339());
    }
    println!("  summary: {}", c.summary);
    println!("  categories: {}", c.categories.join(", "));
    println!("  product types: {}", c.product_types.join(", "));
    println!("  keywords: {}", c.keywords.join(", "));
    println!("  brands: {}", c.brand_names.join(", "));
    println!("  products: {}", c.product_names.join(", "));
    println!(
        "  knowledge base: {} characters",
        c.detailed_content.len()
    );
    Ok(())
}

async fn run_rank(config: &Config, query: &str) -> Result<()> {
    let store = CatalogStore::open(&config.storage.dir)?;
    if store.is_empty() {
        println!("No catalogs available.");
        return Ok(());
    }

    let client = llm::create_client(&config.llm)?;
    let ranked = RelevanceRanker::new(client.as_ref())
        .rank(query, &store, store.len())
        .await;

    println!("Catalog ranking for: {}", query);
    for (i, result) in ranked.iter().enumerate() {
        println!(
            "{}. {} ({:.1}/10)",
            i + 1,
            result.catalog_name,
            result.relevance_score
        );
        println!("   {}", result.reason);
    }
    Ok(())
}

async fn run_ask(config: &Config, question: &str) -> Result<()> {
    let store = CatalogStore::open(&config.storage.dir)?;
    let client = llm::create_client(&config.llm)?;

    let answer = Orchestrator::new(client.as_ref(), config.search.top_k)
        .process(question, &store)
        .await;

    println!("{}", answer.text);
    Ok(())
}

/// Interactive loop. History is explicit request/response state owned here,
/// not by the core components.
async fn run_chat(config: &Config) -> Result<()> {
    let store = CatalogStore::open(&config.storage.dir)?;
    let client = llm::create_client(&config.llm)?;
    let orchestrator = Orchestrator::new(client.as_ref(), config.search.top_k);

    let mut history: Vec<ChatMessage> = Vec::new();
    let stdin = std::io::stdin();

    println!(
        "Catalog QA chat: {} catalog(s) loaded. Type 'exit' to leave.",
        store.len()
    );

    loop {
        print!("> ");
        std::io::stdout().flush()?;

        let mut line = String::new();
        if stdin.lock().read_line(&mut line)? == 0 {
            break;
        }
        let question = line.trim();
        if question.is_empty() {
            continue;
        }
        if question == "exit" || question == "quit" {
            break;
        }

        history.push(ChatMessage::user(question));
        let answer = orchestrator.process(question, &store).await;
        println!("\n{}\n", answer.text);
        history.push(ChatMessage::assistant(answer.text));
    }

    println!("bye ({} message(s) this session)", history.len());
    Ok(())
}
