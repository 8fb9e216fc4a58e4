//! Okapi BM25 over [`LexicalIndex`].
//!
//! Candidates come from the postings of the query terms only; documents that
//! share no term with the query are never visited. Ranking is deterministic:
//! score descending, then document id ascending.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};

use crate::error::ConfigError;
use crate::index::{DocOrd, LexicalIndex};

pub const DEFAULT_K1: f64 = 1.5;
pub const DEFAULT_B: f64 = 0.75;

/// BM25 parameters, validated on construction.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bm25Params {
    k1: f64,
    b: f64,
}

impl Default for Bm25Params {
    fn default() -> Self {
        Self { k1: DEFAULT_K1, b: DEFAULT_B }
    }
}

impl Bm25Params {
    pub fn new(k1: f64, b: f64) -> Result<Self, ConfigError> {
        if !k1.is_finite() || k1 < 0.0 {
            return Err(ConfigError::InvalidK1(k1));
        }
        if !(0.0..=1.0).contains(&b) {
            return Err(ConfigError::InvalidB(b));
        }
        Ok(Self { k1, b })
    }

    pub fn k1(&self) -> f64 {
        self.k1
    }

    pub fn b(&self) -> f64 {
        self.b
    }
}

/// One entry of a ranked list. Ranks start at 1.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedHit {
    pub doc_id: String,
    pub rank: usize,
    pub score: f64,
}

pub type RankedList = Vec<RankedHit>;

/// `ln(1 + (N - df + 0.5) / (df + 0.5))`, never negative.
pub fn idf(num_docs: usize, df: u32) -> f64 {
    let n = num_docs as f64;
    let df = f64::from(df);
    (1.0 + (n - df + 0.5) / (df + 0.5)).ln()
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Bm25Scorer {
    params: Bm25Params,
}

impl Bm25Scorer {
    pub fn new(params: Bm25Params) -> Self {
        Self { params }
    }

    /// Score every document sharing at least one term with the query and
    /// return the best `top_k`. Repeated query terms count once; unknown terms
    /// contribute nothing.
    pub fn score(&self, query_tokens: &[String], index: &LexicalIndex, top_k: usize) -> RankedList {
        if top_k == 0 || query_tokens.is_empty() || index.is_empty() {
            return Vec::new();
        }

        let Bm25Params { k1, b } = self.params;
        let n = index.document_count();
        let avgdl = index.average_document_length();

        let mut seen: HashSet<&str> = HashSet::new();
        let mut scores: HashMap<DocOrd, f64> = HashMap::new();
        for term in query_tokens {
            if !seen.insert(term.as_str()) {
                continue;
            }
            let Some(plist) = index.postings(term) else { continue };
            let idf = idf(n, plist.len() as u32);
            for p in plist {
                let tf = f64::from(p.tf);
                let dl = f64::from(index.doc_length(p.doc));
                let norm = 1.0 - b + b * dl / avgdl;
                *scores.entry(p.doc).or_insert(0.0) += idf * (tf * (k1 + 1.0)) / (tf + k1 * norm);
            }
        }

        let mut scored: Vec<(DocOrd, f64)> = scores.into_iter().collect();
        // ordinal order is document-id order
        let by_rank = |a: &(DocOrd, f64), b: &(DocOrd, f64)| -> Ordering {
            b.1.total_cmp(&a.1).then_with(|| a.0.cmp(&b.0))
        };
        if scored.len() > top_k {
            scored.select_nth_unstable_by(top_k - 1, by_rank);
            scored.truncate(top_k);
        }
        scored.sort_unstable_by(by_rank);

        scored
            .into_iter()
            .enumerate()
            .map(|(i, (ord, score))| RankedHit {
                doc_id: index.doc_id(ord).to_string(),
                rank: i + 1,
                score,
            })
            .collect()
    }
}
