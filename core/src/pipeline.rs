//! Per-query hybrid retrieval.
//!
//! ```text
//! raw query -> [clean] -> tokenize -> BM25 ----\
//!                      \-> semantic search ----+-> RRF -> [filter] -> hits
//! ```
//!
//! Bracketed stages are optional remote collaborators. Every remote call is
//! bounded by its own timeout and any failure degrades the request instead of
//! failing it: the raw query stands in for a cleaned one, an empty list stands
//! in for semantic results, the unfiltered fusion stands in for a filtered
//! one. Each degradation is logged and reported in [`SearchOutcome`].
//!
//! All collaborator calls are futures owned by [`HybridSearcher::search`];
//! nothing is spawned. Dropping the search future (for example when the HTTP
//! client disconnects) drops and thereby cancels every call in flight.

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, instrument, warn};

use crate::bm25::{Bm25Params, Bm25Scorer, RankedHit, RankedList};
use crate::error::{ConfigError, FusionError};
use crate::fusion::{reciprocal_rank_fusion, FusedHit, FusedResult, RRF_K};
use crate::handle::IndexHandle;

/// Vector similarity search over the same document ids as the lexical index.
#[async_trait]
pub trait SemanticSearch: Send + Sync {
    async fn semantic_search(&self, query_text: &str, top_k: usize) -> Result<RankedList>;
}

/// Rewrites a raw user query into a cleaner search query.
#[async_trait]
pub trait QueryCleaner: Send + Sync {
    async fn clean(&self, raw_query: &str) -> Result<String>;
}

/// Post-processes the fused ranking, e.g. an LLM dropping irrelevant hits.
#[async_trait]
pub trait ResultFilter: Send + Sync {
    async fn filter_and_rank(&self, fused: FusedResult, context: &str) -> Result<FusedResult>;
}

#[derive(Debug, Clone, PartialEq)]
pub struct PipelineConfig {
    pub bm25: Bm25Params,
    pub rrf_k: u32,
    /// Depth requested from each ranking signal.
    pub candidates: usize,
    /// Length of the fused result.
    pub top_k: usize,
    pub clean_timeout: Duration,
    pub semantic_timeout: Duration,
    pub filter_timeout: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            bm25: Bm25Params::default(),
            rrf_k: RRF_K,
            candidates: 300,
            top_k: 100,
            clean_timeout: Duration::from_secs(10),
            semantic_timeout: Duration::from_secs(5),
            filter_timeout: Duration::from_secs(30),
        }
    }
}

impl PipelineConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.rrf_k == 0 {
            return Err(ConfigError::InvalidRrfK(0));
        }
        if self.candidates == 0 {
            return Err(ConfigError::InvalidLimit { name: "candidates", value: 0 });
        }
        if self.top_k == 0 {
            return Err(ConfigError::InvalidLimit { name: "top_k", value: 0 });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    QueryCleaning,
    SemanticSearch,
    ResultFiltering,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Stage::QueryCleaning => "query_cleaning",
            Stage::SemanticSearch => "semantic_search",
            Stage::ResultFiltering => "result_filtering",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Degradation {
    pub stage: Stage,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HybridHit {
    pub doc_id: String,
    pub score: f64,
    pub lexical_rank: Option<usize>,
    pub lexical_score: Option<f64>,
    pub semantic_rank: Option<usize>,
    pub semantic_score: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Timings {
    pub clean_ms: u64,
    pub retrieval_ms: u64,
    pub filter_ms: u64,
    pub total_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchOutcome {
    pub original_query: String,
    pub clean_query: String,
    pub query_tokens: Vec<String>,
    pub hits: Vec<HybridHit>,
    pub lexical_hits: usize,
    pub semantic_hits: usize,
    pub index_generation: u64,
    pub degradations: Vec<Degradation>,
    pub timings: Timings,
}

impl SearchOutcome {
    pub fn is_degraded(&self) -> bool {
        !self.degradations.is_empty()
    }
}

enum CallError {
    Failed(anyhow::Error),
    TimedOut(Duration),
}

impl fmt::Display for CallError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CallError::Failed(e) => write!(f, "{e:#}"),
            CallError::TimedOut(d) => write!(f, "timed out after {} ms", d.as_millis()),
        }
    }
}

async fn bounded<T>(limit: Duration, call: impl Future<Output = Result<T>>) -> Result<T, CallError> {
    match tokio::time::timeout(limit, call).await {
        Ok(Ok(v)) => Ok(v),
        Ok(Err(e)) => Err(CallError::Failed(e)),
        Err(_) => Err(CallError::TimedOut(limit)),
    }
}

fn degrade(degradations: &mut Vec<Degradation>, stage: Stage, reason: String) {
    warn!(%stage, %reason, "search degraded");
    degradations.push(Degradation { stage, reason });
}

pub struct HybridSearcher {
    index: Arc<IndexHandle>,
    semantic: Option<Arc<dyn SemanticSearch>>,
    cleaner: Option<Arc<dyn QueryCleaner>>,
    filter: Option<Arc<dyn ResultFilter>>,
    config: PipelineConfig,
}

impl HybridSearcher {
    pub fn new(index: Arc<IndexHandle>, config: PipelineConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self { index, semantic: None, cleaner: None, filter: None, config })
    }

    pub fn with_semantic(mut self, semantic: Arc<dyn SemanticSearch>) -> Self {
        self.semantic = Some(semantic);
        self
    }

    pub fn with_cleaner(mut self, cleaner: Arc<dyn QueryCleaner>) -> Self {
        self.cleaner = Some(cleaner);
        self
    }

    pub fn with_filter(mut self, filter: Arc<dyn ResultFilter>) -> Self {
        self.filter = Some(filter);
        self
    }

    pub fn index(&self) -> &Arc<IndexHandle> {
        &self.index
    }

    /// Run the full pipeline. `top_k` overrides the configured result length.
    /// An empty result is a valid outcome; only invalid fusion input fails.
    #[instrument(skip(self), fields(generation = tracing::field::Empty))]
    pub async fn search(&self, raw_query: &str, top_k: Option<usize>) -> Result<SearchOutcome, FusionError> {
        let started = Instant::now();
        let top_k = top_k.unwrap_or(self.config.top_k);
        let mut degradations = Vec::new();

        let clean_query = match &self.cleaner {
            None => raw_query.to_string(),
            Some(cleaner) => match bounded(self.config.clean_timeout, cleaner.clean(raw_query)).await {
                Ok(cleaned) if !cleaned.trim().is_empty() => cleaned.trim().to_string(),
                Ok(_) => {
                    degrade(&mut degradations, Stage::QueryCleaning, "cleaner returned an empty query".into());
                    raw_query.to_string()
                }
                Err(e) => {
                    degrade(&mut degradations, Stage::QueryCleaning, e.to_string());
                    raw_query.to_string()
                }
            },
        };
        let clean_ms = started.elapsed().as_millis() as u64;

        let retrieval_started = Instant::now();
        let serving = self.index.snapshot();
        tracing::Span::current().record("generation", serving.generation);
        let query_tokens = serving.pipeline.tokenize(&clean_query);
        debug!(?query_tokens, "query tokenized");

        let candidates = self.config.candidates;
        // semantic first: its request is issued before lexical scoring runs
        let semantic_call = async {
            match &self.semantic {
                None => Err("semantic search is not configured".to_string()),
                Some(s) => bounded(self.config.semantic_timeout, s.semantic_search(&clean_query, candidates))
                    .await
                    .map_err(|e| e.to_string()),
            }
        };
        let lexical_call = async {
            Bm25Scorer::new(self.config.bm25).score(&query_tokens, &serving.index, candidates)
        };
        let (semantic, lexical) = tokio::join!(semantic_call, lexical_call);

        let semantic = match semantic {
            Ok(list) if list.iter().any(|h| h.rank == 0) => {
                degrade(&mut degradations, Stage::SemanticSearch, "collaborator returned rank 0".into());
                Vec::new()
            }
            Ok(list) => list,
            Err(reason) => {
                degrade(&mut degradations, Stage::SemanticSearch, reason);
                Vec::new()
            }
        };

        let lists = [lexical, semantic];
        let fused = reciprocal_rank_fusion(&lists, self.config.rrf_k, top_k)?;
        let [lexical, semantic] = lists;
        let retrieval_ms = retrieval_started.elapsed().as_millis() as u64;

        let filter_started = Instant::now();
        let fused = match &self.filter {
            Some(filter) if !fused.is_empty() => {
                match bounded(self.config.filter_timeout, filter.filter_and_rank(fused.clone(), &clean_query)).await {
                    Ok(filtered) => restrict_to(&fused, filtered),
                    Err(e) => {
                        degrade(&mut degradations, Stage::ResultFiltering, e.to_string());
                        fused
                    }
                }
            }
            _ => fused,
        };
        let filter_ms = filter_started.elapsed().as_millis() as u64;

        let lexical_by_id = best_ranks(&lexical);
        let semantic_by_id = best_ranks(&semantic);
        let hits = fused
            .into_iter()
            .map(|FusedHit { doc_id, score }| {
                let lex = lexical_by_id.get(doc_id.as_str()).copied();
                let sem = semantic_by_id.get(doc_id.as_str()).copied();
                HybridHit {
                    doc_id,
                    score,
                    lexical_rank: lex.map(|(r, _)| r),
                    lexical_score: lex.map(|(_, s)| s),
                    semantic_rank: sem.map(|(r, _)| r),
                    semantic_score: sem.map(|(_, s)| s),
                }
            })
            .collect();

        Ok(SearchOutcome {
            original_query: raw_query.to_string(),
            clean_query,
            query_tokens,
            hits,
            lexical_hits: lexical.len(),
            semantic_hits: semantic.len(),
            index_generation: serving.generation,
            degradations,
            timings: Timings {
                clean_ms,
                retrieval_ms,
                filter_ms,
                total_ms: started.elapsed().as_millis() as u64,
            },
        })
    }
}

/// Best (lowest) rank and its score per document, matching what fusion counts
/// when a collaborator repeats an id.
fn best_ranks(list: &[RankedHit]) -> HashMap<&str, (usize, f64)> {
    let mut best: HashMap<&str, (usize, f64)> = HashMap::with_capacity(list.len());
    for hit in list {
        best.entry(hit.doc_id.as_str())
            .and_modify(|e| {
                if hit.rank < e.0 {
                    *e = (hit.rank, hit.score);
                }
            })
            .or_insert((hit.rank, hit.score));
    }
    best
}

/// Keep the filter's order but only ids that were in its input, once each,
/// carrying the fused scores.
fn restrict_to(input: &FusedResult, filtered: FusedResult) -> FusedResult {
    let scores: HashMap<&str, f64> = input.iter().map(|h| (h.doc_id.as_str(), h.score)).collect();
    let mut seen = HashSet::new();
    filtered
        .into_iter()
        .filter_map(|h| {
            let score = *scores.get(h.doc_id.as_str())?;
            seen.insert(h.doc_id.clone()).then_some(FusedHit { doc_id: h.doc_id, score })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hit(id: &str, score: f64) -> FusedHit {
        FusedHit { doc_id: id.into(), score }
    }

    #[test]
    fn restrict_drops_unknown_and_repeated_ids() {
        let input = vec![hit("a", 0.3), hit("b", 0.2), hit("c", 0.1)];
        let filtered = vec![hit("c", 9.0), hit("zzz", 1.0), hit("a", 1.0), hit("c", 1.0)];
        assert_eq!(restrict_to(&input, filtered), vec![hit("c", 0.1), hit("a", 0.3)]);
    }

    #[test]
    fn config_rejects_zero_limits() {
        let cfg = PipelineConfig { top_k: 0, ..PipelineConfig::default() };
        assert_eq!(cfg.validate(), Err(ConfigError::InvalidLimit { name: "top_k", value: 0 }));
        let cfg = PipelineConfig { rrf_k: 0, ..PipelineConfig::default() };
        assert_eq!(cfg.validate(), Err(ConfigError::InvalidRrfK(0)));
    }
}
