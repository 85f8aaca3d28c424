//! OpenRAG server - citation-grounded question answering over HTTP.

use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing::info;

use openrag::agent::{OpenRouterClient, RagAgent};
use openrag::cache::SemanticCache;
use openrag::config::Config;
use openrag::embedding::{CachedEmbedder, EmbeddingProvider, FastembedProvider};
use openrag::retrieval::{InMemoryRetriever, PgVectorRetriever, Retriever};
use openrag::server::{router, AppState};

#[derive(Parser)]
#[command(name = "openrag-server", about = "OpenRAG HTTP server", version)]
struct Args {
    /// Bind address (overrides config)
    #[arg(long)]
    bind: Option<String>,

    /// Port (overrides config)
    #[arg(long, short)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,openrag=debug".into()),
        )
        .init();

    let args = Args::parse();
    let config = Config::load().context("failed to load configuration")?;

    let bind = args.bind.unwrap_or_else(|| config.server.bind.clone());
    let port = args.port.unwrap_or(config.server.port);

    // Embeddings: local fastembed model behind a memoization cache.
    let fastembed = Arc::new(FastembedProvider::new(&config.embedding)?);
    let embedder: Arc<dyn EmbeddingProvider> =
        Arc::new(CachedEmbedder::new(fastembed, &config.embedding));

    // Retrieval backend: pgvector when a database URL is configured,
    // otherwise a passages file loaded into the in-memory store.
    let retriever: Arc<dyn Retriever> = if config.retrieval.database_url.is_some() {
        Arc::new(PgVectorRetriever::connect(&config.retrieval, embedder.clone()).await?)
    } else if let Some(ref path) = config.retrieval.passages_file {
        Arc::new(InMemoryRetriever::from_file(path, embedder.clone()).await?)
    } else {
        anyhow::bail!(
            "no retrieval backend configured: set OPENRAG__RETRIEVAL__DATABASE_URL \
             or OPENRAG__RETRIEVAL__PASSAGES_FILE"
        );
    };

    let llm = Arc::new(OpenRouterClient::new(config.llm.clone())?);
    let agent = RagAgent::new(llm, retriever, config.agent.clone())?;
    let cache = SemanticCache::new(embedder, &config.cache);
    info!(
        "Semantic cache initialised threshold={} max_entries={} ttl={:?}",
        config.cache.similarity_threshold, config.cache.max_entries, config.cache.ttl
    );

    let state = AppState {
        cache: Arc::new(cache),
        agent: Arc::new(agent),
    };

    let addr = format!("{}:{}", bind, port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;
    info!("openrag-server v{} listening on {}", openrag::VERSION, addr);

    axum::serve(listener, router(state)).await?;
    Ok(())
}
