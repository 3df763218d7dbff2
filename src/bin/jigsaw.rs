//! Jigsaw CLI: incremental knowledge graph publishing.
//!
//! Usage:
//!   jigsaw run        [--config path] [--data-dir path]
//!   jigsaw refresh | aggregate | recover
//!   jigsaw doc <subcommand>

use clap::{Parser, Subcommand};
use jigsaw::config::{default_data_dir, Config};
use jigsaw::storage::Embedder;
use jigsaw::{
    ArtifactStore, CommandCompletionClient, DocumentId, FsDocumentSource, GenerationSwap,
    LifecycleStore, NewDocument, PartitionAggregator, PromptExtractor, PublishController,
    SqliteLifecycleStore, SubgraphExtractor, SubgraphRefresh,
};
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser)]
#[command(
    name = "jigsaw",
    version,
    about = "Incremental global knowledge graph builder"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
    /// Path to the YAML config file
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Override the data directory
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Refresh subgraphs, aggregate partitions and publish; prints SUCCESS or FAILED
    Run,
    /// Phase 1 only: extract New and Modified documents
    Refresh,
    /// Phase 2 only: rebuild the staging generation
    Aggregate,
    /// Resolve an interrupted generation swap
    Recover,
    /// Manage document lifecycle records
    Doc {
        #[command(subcommand)]
        action: DocAction,
    },
}

#[derive(Subcommand)]
enum DocAction {
    /// Register a document as New
    Add {
        /// Path of the raw text, relative to the documents root
        filepath: String,
        /// Partition (base entry) the document feeds
        #[arg(long)]
        partition: Option<String>,
        /// Display name; defaults to the file name
        #[arg(long)]
        name: Option<String>,
    },
    /// Flag a Persistent document as Modified
    Modify { id: DocumentId },
    /// Retire a document
    Delete { id: DocumentId },
    /// List all documents
    List,
}

/// Everything a run needs, wired from config
struct Services {
    config: Config,
    lifecycle: Arc<SqliteLifecycleStore>,
}

fn load_config(cli: &Cli) -> Result<Config, String> {
    let path = cli
        .config
        .clone()
        .unwrap_or_else(|| default_data_dir().join("config.yaml"));
    let mut config = Config::load(&path).map_err(|e| e.to_string())?;
    if let Some(dir) = &cli.data_dir {
        config.data_dir = dir.clone();
    }
    Ok(config)
}

fn open_services(cli: &Cli) -> Result<Services, String> {
    let config = load_config(cli)?;
    let layout = config.layout();
    let lifecycle = SqliteLifecycleStore::open(&layout.lifecycle_db)
        .map_err(|e| format!("Failed to open lifecycle database: {}", e))?;
    Ok(Services {
        config,
        lifecycle: Arc::new(lifecycle),
    })
}

fn build_refresh(services: &Services) -> Result<SubgraphRefresh, String> {
    let config = &services.config;
    let client = CommandCompletionClient::from_command_line(&config.extraction.command)
        .ok_or("no extraction.command configured")?
        .with_timeout(config.extraction_timeout());
    let extractor = PromptExtractor::new(Arc::new(client)).with_chunking(
        config.extraction.chunk_token_size,
        config.extraction.chunk_overlap_tokens,
    );
    let mut refresh = SubgraphRefresh::new(
        services.lifecycle.clone(),
        Arc::new(FsDocumentSource::new(&config.documents_root)),
        SubgraphExtractor::new(Arc::new(extractor)),
        ArtifactStore::new(config.layout().json_dir),
    );
    if let Some(scenario) = &config.scenario {
        refresh = refresh.with_scenario(scenario.clone());
    }
    Ok(refresh)
}

#[cfg(feature = "embeddings")]
fn build_embedder(config: &Config) -> Result<Option<Arc<dyn Embedder>>, String> {
    if !config.embedding.enabled {
        return Ok(None);
    }
    let embedder = jigsaw::storage::FastEmbedEmbedder::default_model().map_err(|e| e.to_string())?;
    Ok(Some(Arc::new(embedder)))
}

#[cfg(not(feature = "embeddings"))]
fn build_embedder(config: &Config) -> Result<Option<Arc<dyn Embedder>>, String> {
    if config.embedding.enabled {
        tracing::warn!("embedding.enabled is set but jigsaw was built without the `embeddings` feature");
    }
    Ok(None)
}

fn build_aggregator(services: &Services) -> Result<PartitionAggregator, String> {
    let layout = services.config.layout();
    let mut aggregator = PartitionAggregator::new(services.lifecycle.clone(), ArtifactStore::new(layout.json_dir))
        .with_published_root(layout.published_root);
    if let Some(embedder) = build_embedder(&services.config)? {
        aggregator = aggregator.with_embedder(embedder);
    }
    Ok(aggregator)
}

fn build_swap(config: &Config) -> GenerationSwap {
    let layout = config.layout();
    GenerationSwap::new(layout.staging_root, layout.published_root, layout.retired_root)
}

async fn cmd_run(services: &Services) -> i32 {
    let (refresh, aggregator) = match (build_refresh(services), build_aggregator(services)) {
        (Ok(r), Ok(a)) => (r, a),
        (Err(e), _) | (_, Err(e)) => {
            eprintln!("Error: {}", e);
            return 1;
        }
    };
    let controller = PublishController::new(
        refresh,
        aggregator,
        build_swap(&services.config),
        services.config.retry.policy(),
    );
    let outcome = controller.run().await;
    println!("{}", outcome);
    match outcome {
        jigsaw::RunOutcome::Success => 0,
        jigsaw::RunOutcome::Failed => 1,
    }
}

async fn cmd_refresh(services: &Services) -> i32 {
    let refresh = match build_refresh(services) {
        Ok(r) => r,
        Err(e) => {
            eprintln!("Error: {}", e);
            return 1;
        }
    };
    match refresh.run().await {
        Ok(report) => {
            println!(
                "Refreshed {} document(s), {} failed ({} prompt / {} completion tokens)",
                report.refreshed.len(),
                report.failed.len(),
                report.usage.prompt_tokens,
                report.usage.completion_tokens
            );
            for failure in &report.failed {
                println!("  #{} {}: {}", failure.document, failure.filename, failure.error);
            }
            if report.all_succeeded() {
                0
            } else {
                1
            }
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            1
        }
    }
}

fn cmd_aggregate(services: &Services) -> i32 {
    let aggregator = match build_aggregator(services) {
        Ok(a) => a,
        Err(e) => {
            eprintln!("Error: {}", e);
            return 1;
        }
    };
    let staging = services.config.layout().staging_root;
    match aggregator.run(&staging) {
        Ok(report) => {
            for merged in &report.merged {
                println!(
                    "{}: {} document(s), {} entities, {} relationships",
                    merged.partition, merged.documents, merged.entities, merged.relationships
                );
            }
            for failed in &report.failed {
                println!("{}: FAILED ({})", failed.partition, failed.error);
            }
            println!("Staging generation at {}", staging.display());
            0
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            1
        }
    }
}

fn cmd_recover(config: &Config) -> i32 {
    match build_swap(config).recover() {
        Ok(action) => {
            println!("{:?}", action);
            0
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            1
        }
    }
}

fn cmd_doc_add(store: &dyn LifecycleStore, filepath: &str, partition: Option<String>, name: Option<String>) -> i32 {
    let filename = name.unwrap_or_else(|| {
        std::path::Path::new(filepath)
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| filepath.to_string())
    });
    let mut document = NewDocument::new(filename, filepath);
    if let Some(partition) = partition {
        document = document.with_partition(partition);
    }
    match store.register(&document) {
        Ok(record) => {
            println!("Registered document #{} ({})", record.id, record.filename);
            0
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            1
        }
    }
}

fn cmd_doc_list(store: &dyn LifecycleStore) -> i32 {
    match store.list() {
        Ok(records) => {
            if records.is_empty() {
                println!("No documents.");
                return 0;
            }
            for r in records {
                println!(
                    "#{}\t{}\t{}\t{}\t{}",
                    r.id,
                    r.status,
                    r.partition().unwrap_or("-"),
                    r.filename,
                    r.fingerprint.as_deref().unwrap_or("-")
                );
            }
            0
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            1
        }
    }
}

fn cmd_doc_mark(result: Result<jigsaw::DocumentRecord, jigsaw::LifecycleError>) -> i32 {
    match result {
        Ok(record) => {
            println!("Document #{} is now {}", record.id, record.status);
            0
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            1
        }
    }
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let services = match open_services(&cli) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    };
    let store = services.lifecycle.as_ref();

    let code = match cli.command {
        Commands::Run => cmd_run(&services).await,
        Commands::Refresh => cmd_refresh(&services).await,
        Commands::Aggregate => cmd_aggregate(&services),
        Commands::Recover => cmd_recover(&services.config),
        Commands::Doc { action } => match action {
            DocAction::Add { filepath, partition, name } => cmd_doc_add(store, &filepath, partition, name),
            DocAction::Modify { id } => cmd_doc_mark(store.mark_modified(id)),
            DocAction::Delete { id } => cmd_doc_mark(store.mark_deleted(id)),
            DocAction::List => cmd_doc_list(store),
        },
    };
    std::process::exit(code);
}
