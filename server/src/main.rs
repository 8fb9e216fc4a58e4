use anyhow::{Context, Result};
use axum::Router;
use clap::Parser;
use hybrid_core::fusion::rrf_k_from_config;
use hybrid_core::persist::IndexPaths;
use hybrid_core::pipeline::{HybridSearcher, PipelineConfig};
use hybrid_core::{analyzer_by_name, Bm25Params};
use server::collaborators::{HttpQueryCleaner, HttpResultFilter, HttpSemanticSearch};
use server::{build_app, open_index, spawn_artifact_watcher, AppState};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser)]
#[command(name = "server", about = "Hybrid BM25 + semantic search server")]
struct Args {
    /// Index directory written by `indexer build`
    #[arg(long, env = "INDEX_DIR", default_value = "./index")]
    artifact: PathBuf,
    /// Analyzer to tokenize queries with; must match the one that built the index
    #[arg(long, env = "ANALYZER", default_value = "script")]
    analyzer: String,
    /// Host to bind
    #[arg(long, env = "HOST", default_value = "0.0.0.0")]
    host: String,
    /// Port to bind
    #[arg(long, env = "PORT", default_value_t = 8080)]
    port: u16,
    #[arg(long, env = "BM25_K1", default_value_t = hybrid_core::bm25::DEFAULT_K1)]
    k1: f64,
    #[arg(long, env = "BM25_B", default_value_t = hybrid_core::bm25::DEFAULT_B)]
    b: f64,
    /// Reciprocal rank fusion constant
    #[arg(long, env = "RRF_K", default_value_t = 60, allow_negative_numbers = true)]
    rrf_k: i64,
    /// Results requested from each ranking signal
    #[arg(long, env = "CANDIDATES", default_value_t = 300)]
    candidates: usize,
    /// Results returned when a request does not ask for a count
    #[arg(long, env = "TOP_K", default_value_t = 100)]
    top_k: usize,
    /// Semantic search endpoint (POST {query, top_k})
    #[arg(long, env = "SEMANTIC_URL")]
    semantic_url: Option<String>,
    #[arg(long, env = "SEMANTIC_TIMEOUT_MS", default_value_t = 5_000)]
    semantic_timeout_ms: u64,
    /// Query cleaning endpoint (POST {query})
    #[arg(long, env = "CLEANER_URL")]
    cleaner_url: Option<String>,
    #[arg(long, env = "CLEANER_TIMEOUT_MS", default_value_t = 10_000)]
    cleaner_timeout_ms: u64,
    /// Result filtering endpoint (POST {query, results})
    #[arg(long, env = "FILTER_URL")]
    filter_url: Option<String>,
    #[arg(long, env = "FILTER_TIMEOUT_MS", default_value_t = 30_000)]
    filter_timeout_ms: u64,
    /// Poll the artifact for a newer build every N seconds; 0 disables
    #[arg(long, env = "RELOAD_INTERVAL_SECS", default_value_t = 0)]
    reload_interval_secs: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    fmt().with_env_filter(EnvFilter::from_default_env()).init();
    let args = Args::parse();

    let config = PipelineConfig {
        bm25: Bm25Params::new(args.k1, args.b)?,
        rrf_k: rrf_k_from_config(args.rrf_k)?,
        candidates: args.candidates,
        top_k: args.top_k,
        clean_timeout: Duration::from_millis(args.cleaner_timeout_ms),
        semantic_timeout: Duration::from_millis(args.semantic_timeout_ms),
        filter_timeout: Duration::from_millis(args.filter_timeout_ms),
    };

    let analyzer = analyzer_by_name(&args.analyzer)?;
    let index = open_index(&args.artifact, analyzer.clone())
        .with_context(|| format!("cannot serve without an index in {}", args.artifact.display()))?;

    let mut searcher = HybridSearcher::new(index.clone(), config)?;
    match &args.semantic_url {
        Some(url) => searcher = searcher.with_semantic(Arc::new(HttpSemanticSearch::new(url)?)),
        None => tracing::warn!("no semantic search endpoint configured; ranking is lexical only"),
    }
    if let Some(url) = &args.cleaner_url {
        searcher = searcher.with_cleaner(Arc::new(HttpQueryCleaner::new(url)?));
    }
    if let Some(url) = &args.filter_url {
        searcher = searcher.with_filter(Arc::new(HttpResultFilter::new(url)?));
    }

    let artifact = IndexPaths::new(&args.artifact).artifact();
    if args.reload_interval_secs > 0 {
        spawn_artifact_watcher(
            index,
            artifact.clone(),
            analyzer.clone(),
            Duration::from_secs(args.reload_interval_secs),
        );
    }

    let state = AppState::new(Arc::new(searcher), analyzer, artifact);
    let app: Router = build_app(state);

    let addr: SocketAddr = format!("{}:{}", args.host, args.port).parse()?;
    let listener = TcpListener::bind(addr).await?;
    tracing::info!(%addr, "server listening");
    axum::serve(listener, app).await?;
    Ok(())
}
