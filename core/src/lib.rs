//! Hybrid retrieval core: lexical BM25 over a Korean-aware token pipeline,
//! fused with an external semantic ranking by reciprocal rank fusion.
//!
//! Offline, [`build::IndexBuilder`] turns a corpus into a [`LexicalIndex`] and
//! [`persist::save_artifact`] publishes it. Online, [`handle::IndexHandle`]
//! holds the loaded index and [`pipeline::HybridSearcher`] answers queries.

pub mod analyzer;
pub mod bm25;
pub mod build;
pub mod error;
pub mod fusion;
pub mod handle;
pub mod index;
pub mod normalize;
pub mod persist;
pub mod pipeline;
pub mod tokenizer;

pub use analyzer::{analyzer_by_name, Category, MorphAnalyzer, Morpheme, ScriptAnalyzer};
pub use bm25::{Bm25Params, Bm25Scorer, RankedHit, RankedList};
pub use build::{BuildReport, DocumentSource, IndexBuilder, SourceDocument};
pub use error::{ArtifactError, ConfigError, FusionError};
pub use fusion::{reciprocal_rank_fusion, FusedHit, FusedResult, RRF_K};
pub use handle::{IndexHandle, ServingIndex};
pub use index::{DocOrd, LexicalIndex, Posting, TermId};
pub use tokenizer::{TextPipeline, TokenFilter};
