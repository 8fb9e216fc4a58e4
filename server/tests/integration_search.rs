use anyhow::Result;
use async_trait::async_trait;
use axum::body::{Body, Bytes};
use axum::http::{Request, StatusCode};
use axum::Router;
use hybrid_core::persist::{save_artifact, AnalysisSettings, IndexPaths};
use hybrid_core::pipeline::{HybridSearcher, PipelineConfig, SemanticSearch};
use hybrid_core::{
    IndexBuilder, MorphAnalyzer, RankedHit, RankedList, ScriptAnalyzer, SourceDocument, TextPipeline, TokenFilter,
};
use http_body_util::BodyExt;
use serde_json::Value;
use server::{build_app, open_index, spawn_artifact_watcher, AppState};
use std::fs::File;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tempfile::tempdir;
use tower::ServiceExt;

fn analyzer() -> Arc<dyn MorphAnalyzer> {
    Arc::new(ScriptAnalyzer::new())
}

fn write_index(dir: &Path, docs: &[(&str, &str)]) {
    let pipeline = TextPipeline::new(analyzer(), TokenFilter::default());
    let settings = AnalysisSettings::from_pipeline(&pipeline);
    let corpus = docs.iter().map(|(id, text)| SourceDocument::new(*id, *text)).collect();
    let (index, _) = IndexBuilder::new(pipeline).with_workers(1).build(corpus).unwrap();
    save_artifact(&IndexPaths::new(dir).artifact(), &index, &settings).unwrap();
}

fn build_tiny_index(dir: &Path) {
    write_index(dir, &[("doc0", "Rust is great. rust systems programming."), ("doc1", "Learning rust.")]);
}

struct FixedSemantic(Vec<&'static str>);

#[async_trait]
impl SemanticSearch for FixedSemantic {
    async fn semantic_search(&self, _query: &str, _top_k: usize) -> Result<RankedList> {
        Ok(self
            .0
            .iter()
            .enumerate()
            .map(|(i, id)| RankedHit { doc_id: id.to_string(), rank: i + 1, score: 0.9 })
            .collect())
    }
}

fn app_for(dir: &Path, semantic: Option<FixedSemantic>, token: Option<&str>) -> Router {
    let index = open_index(dir, analyzer()).unwrap();
    let mut searcher = HybridSearcher::new(index, PipelineConfig::default()).unwrap();
    if let Some(s) = semantic {
        searcher = searcher.with_semantic(Arc::new(s));
    }
    let state = AppState::new(Arc::new(searcher), analyzer(), IndexPaths::new(dir).artifact())
        .with_admin_token(token.map(str::to_string));
    build_app(state)
}

async fn send(app: Router, req: Request<Body>) -> (StatusCode, Bytes) {
    let resp = app.oneshot(req).await.unwrap();
    let status = resp.status();
    let body = resp.into_body().collect().await.unwrap().to_bytes();
    (status, body)
}

async fn call(app: Router, uri: &str) -> (StatusCode, Bytes) {
    send(app, Request::get(uri).body(Body::empty()).unwrap()).await
}

fn result_ids(json: &Value) -> Vec<String> {
    json["results"]
        .as_array()
        .unwrap()
        .iter()
        .map(|r| r["doc_id"].as_str().unwrap().to_string())
        .collect()
}

#[tokio::test]
async fn search_returns_ranked_results() {
    let dir = tempdir().unwrap();
    build_tiny_index(dir.path());
    let app = app_for(dir.path(), None, None);

    let (status, body) = call(app, "/search?q=rust&k=2").await;
    assert_eq!(status, StatusCode::OK);
    let json: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(result_ids(&json), ["doc0", "doc1"]);
    assert_eq!(json["results"][0]["lexical_rank"], 1);
    assert!(json["results"][0]["semantic_rank"].is_null());
    // no semantic collaborator configured
    assert_eq!(json["degraded"], true);
    assert_eq!(json["degradations"][0]["stage"], "semantic_search");
    assert_eq!(json["index_generation"], 1);
}

#[tokio::test]
async fn post_search_fuses_the_semantic_ranking() {
    let dir = tempdir().unwrap();
    build_tiny_index(dir.path());
    let app = app_for(dir.path(), Some(FixedSemantic(vec!["doc1"])), None);

    let req = Request::post("/search")
        .header("content-type", "application/json")
        .body(Body::from(r#"{"query": "rust", "count": 5}"#))
        .unwrap();
    let (status, body) = send(app, req).await;
    assert_eq!(status, StatusCode::OK);
    let json: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(result_ids(&json), ["doc1", "doc0"]);
    assert_eq!(json["degraded"], false);
    assert_eq!(json["query"], "rust");
    assert_eq!(json["results"][0]["semantic_rank"], 1);
    assert_eq!(json["total_hits"], 2);
}

#[tokio::test]
async fn empty_and_unmatched_queries_succeed_with_no_results() {
    let dir = tempdir().unwrap();
    build_tiny_index(dir.path());
    let app = app_for(dir.path(), Some(FixedSemantic(Vec::new())), None);

    for uri in ["/search?q=", "/search?q=zzzz"] {
        let (status, body) = call(app.clone(), uri).await;
        assert_eq!(status, StatusCode::OK, "{uri}");
        let json: Value = serde_json::from_slice(&body).unwrap();
        assert!(json["results"].as_array().unwrap().is_empty());
    }
    let (status, _) = call(app, "/search?q=rust&k=0").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn stats_and_health() {
    let dir = tempdir().unwrap();
    build_tiny_index(dir.path());
    let app = app_for(dir.path(), None, None);

    let (status, body) = call(app.clone(), "/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(&body[..], b"ok");

    let (status, body) = call(app, "/index/stats").await;
    assert_eq!(status, StatusCode::OK);
    let json: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["documents"], 2);
    assert_eq!(json["analyzer"], "script");
    assert_eq!(json["generation"], 1);
    assert_eq!(json["checksum"].as_str().unwrap().len(), 8);
}

#[tokio::test]
async fn admin_reload_requires_the_token_and_swaps_the_index() {
    let dir = tempdir().unwrap();
    build_tiny_index(dir.path());
    let app = app_for(dir.path(), None, Some("secret"));

    let (status, _) = send(app.clone(), Request::post("/admin/reload").body(Body::empty()).unwrap()).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    write_index(dir.path(), &[("a", "rust"), ("b", "rust"), ("c", "golang")]);
    let req = Request::post("/admin/reload").header("X-ADMIN-TOKEN", "secret").body(Body::empty()).unwrap();
    let (status, body) = send(app.clone(), req).await;
    assert_eq!(status, StatusCode::OK);
    let json: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["documents"], 3);
    assert_eq!(json["generation"], 2);

    let (_, body) = call(app.clone(), "/search?q=golang").await;
    let json: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(result_ids(&json), ["c"]);

    // a broken artifact is refused and the previous index keeps serving
    std::fs::write(IndexPaths::new(dir.path()).artifact(), b"broken").unwrap();
    let req = Request::post("/admin/reload").header("X-ADMIN-TOKEN", "secret").body(Body::empty()).unwrap();
    let (status, _) = send(app.clone(), req).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    let (_, body) = call(app, "/index/stats").await;
    let json: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["documents"], 3);
}

#[test]
fn startup_fails_without_an_artifact() {
    let dir = tempdir().unwrap();
    assert!(open_index(dir.path(), analyzer()).is_err());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn watcher_picks_up_a_republished_artifact() {
    let dir = tempdir().unwrap();
    build_tiny_index(dir.path());
    let index = open_index(dir.path(), analyzer()).unwrap();
    let artifact = IndexPaths::new(dir.path()).artifact();
    let watcher = spawn_artifact_watcher(index.clone(), artifact.clone(), analyzer(), Duration::from_millis(20));

    write_index(dir.path(), &[("x", "rust"), ("y", "rust"), ("z", "rust")]);
    File::options()
        .write(true)
        .open(&artifact)
        .unwrap()
        .set_modified(SystemTime::now() + Duration::from_secs(10))
        .unwrap();

    let mut swapped = false;
    for _ in 0..250 {
        if index.snapshot().index.document_count() == 3 {
            swapped = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    watcher.abort();
    assert!(swapped);
    assert!(index.generation() > 1);
}
