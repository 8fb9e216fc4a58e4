use anyhow::Result;
use axum::{
    extract::{Query, State},
    http::{HeaderMap, StatusCode},
    routing::{get, post},
    Json, Router,
};
use hybrid_core::pipeline::{Degradation, HybridHit, HybridSearcher, Timings};
use hybrid_core::persist::IndexPaths;
use hybrid_core::{IndexHandle, MorphAnalyzer, ServingIndex};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

pub mod collaborators;

#[derive(Deserialize)]
pub struct SearchParams {
    pub q: String,
    #[serde(default)]
    pub k: Option<usize>,
}

#[derive(Deserialize)]
pub struct SearchBody {
    pub query: String,
    #[serde(default)]
    pub count: Option<usize>,
}

#[derive(Serialize)]
pub struct SearchResponse {
    pub query: String,
    pub clean_query: String,
    pub took_ms: u128,
    pub took_s: f64,
    pub total_hits: usize,
    pub results: Vec<HybridHit>,
    pub degraded: bool,
    pub degradations: Vec<Degradation>,
    pub index_generation: u64,
    pub timings: Timings,
}

#[derive(Serialize)]
pub struct IndexStats {
    pub generation: u64,
    pub documents: usize,
    pub terms: usize,
    pub avg_doc_len: f64,
    pub analyzer: String,
    pub checksum: Option<String>,
    pub source: Option<String>,
    pub loaded_at: u64,
}

impl IndexStats {
    fn of(serving: &ServingIndex) -> Self {
        Self {
            generation: serving.generation,
            documents: serving.index.document_count(),
            terms: serving.index.term_count(),
            avg_doc_len: serving.index.average_document_length(),
            analyzer: serving.pipeline.analyzer_name().to_string(),
            checksum: serving.checksum.map(|c| format!("{c:08x}")),
            source: serving.source.as_ref().map(|p| p.display().to_string()),
            loaded_at: serving.loaded_at.duration_since(UNIX_EPOCH).map(|d| d.as_secs()).unwrap_or(0),
        }
    }
}

#[derive(Clone)]
pub struct AppState {
    pub searcher: Arc<HybridSearcher>,
    pub analyzer: Arc<dyn MorphAnalyzer>,
    /// Artifact file reloaded by `/admin/reload` and the watcher.
    pub artifact: PathBuf,
    pub admin_token: Option<String>,
}

impl AppState {
    /// The admin token comes from `ADMIN_TOKEN`; without it admin routes refuse every call.
    pub fn new(searcher: Arc<HybridSearcher>, analyzer: Arc<dyn MorphAnalyzer>, artifact: PathBuf) -> Self {
        Self { searcher, analyzer, artifact, admin_token: std::env::var("ADMIN_TOKEN").ok() }
    }

    pub fn with_admin_token(mut self, token: Option<String>) -> Self {
        self.admin_token = token;
        self
    }
}

/// Open the artifact inside an index directory. Startup fails here rather
/// than serving without an index.
pub fn open_index(index_dir: &Path, analyzer: Arc<dyn MorphAnalyzer>) -> Result<Arc<IndexHandle>> {
    let artifact = IndexPaths::new(index_dir).artifact();
    let handle = IndexHandle::open(&artifact, analyzer)?;
    Ok(Arc::new(handle))
}

pub fn build_app(state: AppState) -> Router {
    // CORS: read CORS_ALLOW_ORIGIN (comma-separated) or allow Any by default
    let cors = match std::env::var("CORS_ALLOW_ORIGIN") {
        Ok(val) => {
            let origins: Vec<_> = val
                .split(',')
                .filter_map(|s| s.trim().parse().ok())
                .collect();
            if origins.is_empty() {
                CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any)
            } else {
                CorsLayer::new().allow_origin(AllowOrigin::list(origins)).allow_methods(Any).allow_headers(Any)
            }
        }
        Err(_) => CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any),
    };

    Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/search", get(search_get).post(search_post))
        .route("/index/stats", get(index_stats))
        .route("/admin/reload", post(admin_reload))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
}

async fn search_get(
    State(state): State<AppState>,
    Query(params): Query<SearchParams>,
) -> Result<Json<SearchResponse>, (StatusCode, String)> {
    run_search(&state, &params.q, params.k).await
}

async fn search_post(
    State(state): State<AppState>,
    Json(body): Json<SearchBody>,
) -> Result<Json<SearchResponse>, (StatusCode, String)> {
    run_search(&state, &body.query, body.count).await
}

/// Dropping this future (client gone) drops every collaborator call in flight.
async fn run_search(state: &AppState, query: &str, k: Option<usize>) -> Result<Json<SearchResponse>, (StatusCode, String)> {
    if k == Some(0) {
        return Err((StatusCode::BAD_REQUEST, "k must be at least 1".into()));
    }
    let start = std::time::Instant::now();
    let outcome = state
        .searcher
        .search(query, k)
        .await
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;

    let elapsed = start.elapsed();
    Ok(Json(SearchResponse {
        query: outcome.original_query,
        clean_query: outcome.clean_query,
        took_ms: elapsed.as_millis(),
        took_s: elapsed.as_secs_f64(),
        total_hits: outcome.hits.len(),
        results: outcome.hits,
        degraded: !outcome.degradations.is_empty(),
        degradations: outcome.degradations,
        index_generation: outcome.index_generation,
        timings: outcome.timings,
    }))
}

async fn index_stats(State(state): State<AppState>) -> Json<IndexStats> {
    Json(IndexStats::of(&state.searcher.index().snapshot()))
}

async fn admin_reload(State(state): State<AppState>, headers: HeaderMap) -> Result<Json<IndexStats>, (StatusCode, String)> {
    authorize(&state, &headers)?;
    let handle = state.searcher.index().clone();
    let serving = reload(handle.clone(), state.artifact.clone(), state.analyzer.clone())
        .await
        .map_err(|e| {
            let msg = format!("reload failed, still serving generation {}: {e:#}", handle.generation());
            warn!("{msg}");
            (StatusCode::INTERNAL_SERVER_ERROR, msg)
        })?;
    Ok(Json(IndexStats::of(&serving)))
}

fn authorize(state: &AppState, headers: &HeaderMap) -> Result<(), (StatusCode, String)> {
    let required = match &state.admin_token {
        Some(t) => t,
        None => return Err((StatusCode::UNAUTHORIZED, "ADMIN_TOKEN not set".into())),
    };
    let provided = headers.get("X-ADMIN-TOKEN").and_then(|v| v.to_str().ok()).unwrap_or("");
    if provided == required {
        Ok(())
    } else {
        Err((StatusCode::UNAUTHORIZED, "invalid admin token".into()))
    }
}

/// Decoding a large artifact is blocking work; keep it off the request threads.
async fn reload(handle: Arc<IndexHandle>, artifact: PathBuf, analyzer: Arc<dyn MorphAnalyzer>) -> Result<Arc<ServingIndex>> {
    let serving = tokio::task::spawn_blocking(move || handle.reload_from(&artifact, analyzer)).await??;
    Ok(serving)
}

fn modified(path: &Path) -> Option<SystemTime> {
    std::fs::metadata(path).and_then(|m| m.modified()).ok()
}

/// Poll the artifact's modification time and hot-swap when a new one is
/// published. A failed reload leaves the current index serving and is not
/// retried until the file changes again.
pub fn spawn_artifact_watcher(
    handle: Arc<IndexHandle>,
    artifact: PathBuf,
    analyzer: Arc<dyn MorphAnalyzer>,
    every: Duration,
) -> JoinHandle<()> {
    let mut last = modified(&artifact);
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.tick().await;
        info!(path = %artifact.display(), every_ms = every.as_millis() as u64, "watching index artifact");
        loop {
            ticker.tick().await;
            let current = modified(&artifact);
            if current.is_none() || current == last {
                continue;
            }
            last = current;
            match reload(handle.clone(), artifact.clone(), analyzer.clone()).await {
                Ok(serving) => info!(generation = serving.generation, "picked up new index artifact"),
                Err(e) => warn!(error = %format!("{e:#}"), generation = handle.generation(), "artifact reload failed; keeping current index"),
            }
        }
    })
}
