use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use tome_retriever::{
    OpenAiCompatChat, PathSpec, QueryRequest, RetrievalEngine, SearchRequest, ServiceConfig,
};

/// A CLI tool to manage and query persisted document indices.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the service configuration file
    #[arg(short, long, default_value = "tome.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Build and persist the index for a set of document paths
    Create {
        /// Document paths, relative to the configured document root
        paths: Vec<String>,
        /// Rebuild and overwrite an existing persisted index
        #[arg(long)]
        force: bool,
    },
    /// List persisted indices
    List {
        /// Emit machine-readable JSON
        #[arg(long)]
        json: bool,
    },
    /// Ask a question against a set of document paths
    Query {
        question: String,
        /// Document paths, relative to the configured document root
        paths: Vec<String>,
        #[arg(short = 'k', long, default_value_t = 3)]
        top_k: usize,
    },
    /// Retrieve the most similar chunks for a query
    Search {
        query: String,
        /// Document paths, relative to the configured document root
        paths: Vec<String>,
        #[arg(short = 'k', long, default_value_t = 5)]
        top_k: usize,
    },
    /// Drop memory-tier cache entries (all of them, or one path set's)
    ClearCache {
        /// Document paths of the entry to drop; omit to drop everything
        paths: Vec<String>,
    },
    /// Show service statistics
    Stats,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .with_target(false)
        .init();

    if let Err(e) = run().await {
        eprintln!("Error: {e:#}");
        process::exit(1);
    }
}

async fn run() -> anyhow::Result<()> {
    let args = Args::parse();
    let config = ServiceConfig::from_toml_file(&args.config)?;
    let engine = build_engine(config).await?;

    match args.command {
        Commands::Create { paths, force } => {
            let response = engine
                .create_persisted(&PathSpec::Many(paths), force)
                .await?;
            println!("Status: {:?}", response.status);
            println!("Path:   {}", response.path.display());
            if let Some(metadata) = response.metadata {
                println!(
                    "Built:  {} documents, {} chunks, model {}",
                    metadata.document_count, metadata.chunk_count, metadata.embedding_model
                );
            }
        }
        Commands::List { json } => {
            let entries = engine.list_persisted().await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&entries)?);
            } else {
                println!("Found {} persisted indices:", entries.len());
                for entry in entries {
                    println!(
                        "  {} | {} documents | {} chunks | model {}",
                        entry.name,
                        entry.metadata.document_count,
                        entry.metadata.chunk_count,
                        entry.metadata.embedding_model
                    );
                }
            }
        }
        Commands::Query {
            question,
            paths,
            top_k,
        } => {
            let response = engine
                .query(QueryRequest {
                    question,
                    paths: PathSpec::Many(paths),
                    top_k: Some(top_k),
                })
                .await?;
            println!("{}", response.answer);
            if !response.sources.is_empty() {
                println!("\nSources:");
                for source in response.sources {
                    println!("  - {}", source.source);
                }
            }
        }
        Commands::Search {
            query,
            paths,
            top_k,
        } => {
            let response = engine
                .search(SearchRequest {
                    query,
                    paths: PathSpec::Many(paths),
                    top_k: Some(top_k),
                })
                .await?;
            println!("Found {} results:", response.total);
            for result in response.results {
                println!(
                    "  #{} [{:.3}] {} | {}",
                    result.rank,
                    result.score.value(),
                    result.source,
                    result.content.lines().next().unwrap_or("")
                );
            }
        }
        Commands::ClearCache { paths } => {
            let spec = if paths.is_empty() {
                None
            } else {
                Some(PathSpec::Many(paths))
            };
            let removed = engine.clear_cache(spec.as_ref()).await?;
            println!("Removed {removed} cached entries (persisted indices untouched)");
        }
        Commands::Stats => {
            let stats = engine.stats().await;
            println!("Embedding model:      {}", stats.embedding_model);
            println!(
                "Chat model:           {}",
                stats.chat_model.as_deref().unwrap_or("<not configured>")
            );
            println!("Chunk size / overlap: {} / {}", stats.chunk_size, stats.chunk_overlap);
            println!("Cached indices:       {}", stats.cached_indices);
            println!("Persisted indices:    {}", stats.persisted_indices);
            println!("Active conversations: {}", stats.active_conversations);
        }
    }

    Ok(())
}

async fn build_engine(config: ServiceConfig) -> anyhow::Result<RetrievalEngine> {
    let embedder = Arc::new(
        tome_embed::FastEmbedProvider::create(tome_embed::EmbedConfig::default()).await?,
    );
    let mut engine = RetrievalEngine::new(config.clone(), embedder).await?;

    // Query needs answer synthesis; store management does not, so a missing
    // API key only degrades the chat surface.
    match OpenAiCompatChat::new(&config.chat) {
        Ok(chat) => engine = engine.with_chat_provider(Arc::new(chat)),
        Err(e) => tracing::warn!("chat provider unavailable: {e}"),
    }

    Ok(engine)
}
