//! HTTP clients for the remote stages of the query pipeline.
//!
//! Timeouts are applied by the pipeline around each call, so these clients
//! only bound connection setup.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use hybrid_core::pipeline::{QueryCleaner, ResultFilter, SemanticSearch};
use hybrid_core::{FusedHit, FusedResult, RankedHit, RankedList};
use reqwest::Client;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::time::Duration;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(3);

fn client() -> Result<Client> {
    Client::builder()
        .connect_timeout(CONNECT_TIMEOUT)
        .build()
        .context("failed to build http client")
}

async fn post_json<B: Serialize + ?Sized, R: DeserializeOwned>(client: &Client, endpoint: &str, body: &B) -> Result<R> {
    let response = client
        .post(endpoint)
        .json(body)
        .send()
        .await
        .with_context(|| format!("request to {endpoint} failed"))?;
    if !response.status().is_success() {
        let status = response.status();
        let text = response.text().await.unwrap_or_default();
        bail!("{endpoint} answered {status}: {text}");
    }
    response.json::<R>().await.with_context(|| format!("malformed response from {endpoint}"))
}

#[derive(Serialize)]
struct SemanticRequest<'a> {
    query: &'a str,
    top_k: usize,
}

#[derive(Deserialize)]
struct SemanticResponse {
    results: Vec<ScoredId>,
}

#[derive(Serialize, Deserialize)]
struct ScoredId {
    id: String,
    #[serde(default)]
    score: f64,
}

/// Vector search service. Results arrive best first; ranks follow that order.
pub struct HttpSemanticSearch {
    client: Client,
    endpoint: String,
}

impl HttpSemanticSearch {
    pub fn new(endpoint: impl Into<String>) -> Result<Self> {
        Ok(Self::with_client(client()?, endpoint))
    }

    pub fn with_client(client: Client, endpoint: impl Into<String>) -> Self {
        Self { client, endpoint: endpoint.into() }
    }
}

#[async_trait]
impl SemanticSearch for HttpSemanticSearch {
    async fn semantic_search(&self, query_text: &str, top_k: usize) -> Result<RankedList> {
        let response: SemanticResponse =
            post_json(&self.client, &self.endpoint, &SemanticRequest { query: query_text, top_k }).await?;
        Ok(response
            .results
            .into_iter()
            .take(top_k)
            .enumerate()
            .map(|(i, hit)| RankedHit { doc_id: hit.id, rank: i + 1, score: hit.score })
            .collect())
    }
}

#[derive(Serialize)]
struct CleanRequest<'a> {
    query: &'a str,
}

#[derive(Deserialize)]
struct CleanResponse {
    query: String,
}

pub struct HttpQueryCleaner {
    client: Client,
    endpoint: String,
}

impl HttpQueryCleaner {
    pub fn new(endpoint: impl Into<String>) -> Result<Self> {
        Ok(Self::with_client(client()?, endpoint))
    }

    pub fn with_client(client: Client, endpoint: impl Into<String>) -> Self {
        Self { client, endpoint: endpoint.into() }
    }
}

#[async_trait]
impl QueryCleaner for HttpQueryCleaner {
    async fn clean(&self, raw_query: &str) -> Result<String> {
        let response: CleanResponse = post_json(&self.client, &self.endpoint, &CleanRequest { query: raw_query }).await?;
        Ok(response.query)
    }
}

#[derive(Serialize)]
struct FilterRequest<'a> {
    query: &'a str,
    results: Vec<ScoredId>,
}

#[derive(Deserialize)]
struct FilterResponse {
    results: Vec<ScoredId>,
}

/// Re-ranking service, typically an LLM judging relevance. It receives the
/// fused ranking and returns the ids to keep, best first.
pub struct HttpResultFilter {
    client: Client,
    endpoint: String,
}

impl HttpResultFilter {
    pub fn new(endpoint: impl Into<String>) -> Result<Self> {
        Ok(Self::with_client(client()?, endpoint))
    }

    pub fn with_client(client: Client, endpoint: impl Into<String>) -> Self {
        Self { client, endpoint: endpoint.into() }
    }
}

#[async_trait]
impl ResultFilter for HttpResultFilter {
    async fn filter_and_rank(&self, fused: FusedResult, context: &str) -> Result<FusedResult> {
        let request = FilterRequest {
            query: context,
            results: fused.into_iter().map(|h| ScoredId { id: h.doc_id, score: h.score }).collect(),
        };
        let response: FilterResponse = post_json(&self.client, &self.endpoint, &request).await?;
        Ok(response.results.into_iter().map(|h| FusedHit { doc_id: h.id, score: h.score }).collect())
    }
}
