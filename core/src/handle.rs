use parking_lot::RwLock;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::SystemTime;
use tracing::info;

use crate::analyzer::MorphAnalyzer;
use crate::error::ArtifactError;
use crate::index::LexicalIndex;
use crate::persist::load_artifact;
use crate::tokenizer::TextPipeline;

/// One complete, immutable index together with the pipeline that must be used
/// to tokenize queries against it.
#[derive(Debug)]
pub struct ServingIndex {
    pub index: LexicalIndex,
    pub pipeline: TextPipeline,
    pub generation: u64,
    pub checksum: Option<u32>,
    pub source: Option<PathBuf>,
    pub loaded_at: SystemTime,
}

/// Versioned, swappable reference to the live index.
///
/// Readers take a snapshot (an `Arc` clone under a short read lock) and keep
/// using it for the whole request, so a concurrent swap never changes the
/// index underneath them. A replacement is fully built before the write lock
/// is taken; the lock only covers the pointer exchange.
#[derive(Debug)]
pub struct IndexHandle {
    current: RwLock<Arc<ServingIndex>>,
    generations: AtomicU64,
}

impl IndexHandle {
    pub fn new(index: LexicalIndex, pipeline: TextPipeline) -> Self {
        Self::from_serving(ServingIndex {
            index,
            pipeline,
            generation: 1,
            checksum: None,
            source: None,
            loaded_at: SystemTime::now(),
        })
    }

    fn from_serving(serving: ServingIndex) -> Self {
        let generation = serving.generation;
        Self {
            current: RwLock::new(Arc::new(serving)),
            generations: AtomicU64::new(generation),
        }
    }

    /// Load the artifact at `path`; fails rather than starting without an index.
    pub fn open(path: &Path, analyzer: Arc<dyn MorphAnalyzer>) -> Result<Self, ArtifactError> {
        let serving = Self::load(path, analyzer, 1)?;
        Ok(Self::from_serving(serving))
    }

    fn load(path: &Path, analyzer: Arc<dyn MorphAnalyzer>, generation: u64) -> Result<ServingIndex, ArtifactError> {
        let artifact = load_artifact(path)?;
        let pipeline = artifact.settings.pipeline(analyzer)?;
        info!(
            path = %path.display(),
            generation,
            docs = artifact.index.document_count(),
            terms = artifact.index.term_count(),
            checksum = format!("{:08x}", artifact.checksum),
            "index artifact loaded"
        );
        Ok(ServingIndex {
            index: artifact.index,
            pipeline,
            generation,
            checksum: Some(artifact.checksum),
            source: Some(path.to_path_buf()),
            loaded_at: SystemTime::now(),
        })
    }

    pub fn snapshot(&self) -> Arc<ServingIndex> {
        self.current.read().clone()
    }

    pub fn generation(&self) -> u64 {
        self.snapshot().generation
    }

    /// Replace the live index. Returns the previous one, or `None` when a
    /// newer generation went live first.
    pub fn publish(&self, index: LexicalIndex, pipeline: TextPipeline) -> Option<Arc<ServingIndex>> {
        let generation = self.generations.fetch_add(1, Ordering::SeqCst) + 1;
        self.swap(Arc::new(ServingIndex {
            index,
            pipeline,
            generation,
            checksum: None,
            source: None,
            loaded_at: SystemTime::now(),
        }))
    }

    /// Load and validate a new artifact out of band, then swap it in. On error
    /// the current index stays live. Returns the index this call loaded, even
    /// if an overlapping reload with a later generation kept it from going live.
    pub fn reload_from(&self, path: &Path, analyzer: Arc<dyn MorphAnalyzer>) -> Result<Arc<ServingIndex>, ArtifactError> {
        let generation = self.generations.fetch_add(1, Ordering::SeqCst) + 1;
        let serving = Arc::new(Self::load(path, analyzer, generation)?);
        self.swap(serving.clone());
        Ok(serving)
    }

    /// Generations only move forward: a load that finishes after a later one
    /// is dropped.
    fn swap(&self, next: Arc<ServingIndex>) -> Option<Arc<ServingIndex>> {
        let mut current = self.current.write();
        if next.generation < current.generation {
            info!(stale = next.generation, live = current.generation, "newer index already live; dropping load");
            return None;
        }
        let to = next.generation;
        let previous = std::mem::replace(&mut *current, next);
        drop(current);
        info!(from = previous.generation, to, "index swapped");
        Some(previous)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyzer::ScriptAnalyzer;
    use crate::tokenizer::TokenFilter;

    fn pipeline() -> TextPipeline {
        TextPipeline::new(Arc::new(ScriptAnalyzer), TokenFilter::default())
    }

    fn serving(generation: u64) -> Arc<ServingIndex> {
        Arc::new(ServingIndex {
            index: LexicalIndex::empty(),
            pipeline: pipeline(),
            generation,
            checksum: None,
            source: None,
            loaded_at: SystemTime::now(),
        })
    }

    #[test]
    fn a_late_finishing_older_load_never_replaces_a_newer_one() {
        let handle = IndexHandle::new(LexicalIndex::empty(), pipeline());
        // generation 3 finishes first, generation 2 finishes after it
        let replaced = handle.swap(serving(3)).map(|p| p.generation);
        assert_eq!(replaced, Some(1));
        assert!(handle.swap(serving(2)).is_none());
        assert_eq!(handle.generation(), 3);
    }
}
