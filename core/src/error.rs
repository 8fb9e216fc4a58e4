use std::path::PathBuf;

use thiserror::Error;

/// Invalid tuning or filter configuration. Raised at startup or build time.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    #[error("bm25 k1 must be a finite, non-negative number (got {0})")]
    InvalidK1(f64),
    #[error("bm25 b must be within [0, 1] (got {0})")]
    InvalidB(f64),
    #[error("rrf k must be a positive integer (got {0})")]
    InvalidRrfK(i64),
    #[error("{name} must be at least 1 (got {value})")]
    InvalidLimit { name: &'static str, value: usize },
    #[error("unknown token category `{0}` in allow-list")]
    UnknownCategory(String),
    #[error("token category allow-list is empty")]
    EmptyAllowList,
}

/// A serialized index that cannot be served.
#[derive(Error, Debug)]
pub enum ArtifactError {
    #[error("index artifact not found at {0}")]
    Missing(PathBuf),
    #[error("failed to read or write index artifact: {0}")]
    Io(#[from] std::io::Error),
    #[error("not an index artifact (bad magic bytes)")]
    BadMagic,
    #[error("unsupported index artifact format version {found} (this build reads version {expected}); rebuild the index")]
    UnsupportedVersion { found: u32, expected: u32 },
    #[error("index artifact is truncated: header declares {declared} payload bytes, found {actual}")]
    Truncated { declared: u64, actual: u64 },
    #[error("index artifact checksum mismatch (expected {expected:08x}, computed {computed:08x})")]
    ChecksumMismatch { expected: u32, computed: u32 },
    #[error("failed to decode index artifact payload: {0}")]
    Decode(#[from] bincode::Error),
    #[error("index artifact was built with analyzer `{built_with}` but `{available}` is configured")]
    AnalyzerMismatch { built_with: String, available: String },
    #[error("index artifact is inconsistent: {0}")]
    Inconsistent(String),
}

/// Rejected fusion input.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum FusionError {
    #[error("rrf k must be positive (got {0})")]
    NonPositiveK(u32),
    #[error("ranked list {list} holds document `{doc_id}` at rank 0; ranks start at 1")]
    InvalidRank { list: usize, doc_id: String },
}
