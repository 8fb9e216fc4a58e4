//! Offline index construction.
//!
//! Documents are tokenized in parallel; each rayon job folds its share into a
//! private [`Partial`] and the partials are merged pairwise. Merging only
//! concatenates, and the final assembly sorts documents and terms, so the
//! resulting index does not depend on how work was scheduled.

use anyhow::{Context, Result};
use rayon::prelude::*;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, instrument, warn};

use crate::index::{DocOrd, LexicalIndex, Posting};
use crate::tokenizer::TextPipeline;

const PROGRESS_EVERY: usize = 10_000;

/// A document as exported by the document store. `text` is `None` when the
/// store holds no readable text; such documents are skipped, not rejected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceDocument {
    pub id: String,
    pub text: Option<String>,
}

impl SourceDocument {
    pub fn new(id: impl Into<String>, text: impl Into<String>) -> Self {
        Self { id: id.into(), text: Some(text.into()) }
    }
}

/// The document store as seen by the build path.
pub trait DocumentSource {
    /// Fails only when the corpus cannot be reached at all.
    fn fetch_all_documents(&self) -> Result<Vec<SourceDocument>>;
}

impl DocumentSource for Vec<SourceDocument> {
    fn fetch_all_documents(&self) -> Result<Vec<SourceDocument>> {
        Ok(self.clone())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct BuildReport {
    pub indexed: usize,
    /// Ids excluded from the index (no text, filtered to nothing, or duplicate), sorted.
    pub skipped: Vec<String>,
    pub terms: usize,
    pub elapsed: Duration,
}

#[derive(Default)]
struct Partial {
    docs: Vec<(Arc<str>, u32)>,
    postings: HashMap<String, Vec<(Arc<str>, u32)>>,
    skipped: Vec<String>,
}

impl Partial {
    fn absorb(mut self, doc: SourceDocument, pipeline: &TextPipeline) -> Self {
        let tokens = doc.text.as_deref().map(|t| pipeline.tokenize(t)).unwrap_or_default();
        if tokens.is_empty() {
            self.skipped.push(doc.id);
            return self;
        }

        let id: Arc<str> = Arc::from(doc.id);
        let length = tokens.len() as u32;
        let mut tf: HashMap<String, u32> = HashMap::new();
        for token in tokens {
            *tf.entry(token).or_insert(0) += 1;
        }
        for (term, count) in tf {
            self.postings.entry(term).or_default().push((id.clone(), count));
        }
        self.docs.push((id, length));
        self
    }

    fn merge(mut self, mut other: Partial) -> Partial {
        if other.postings.len() > self.postings.len() {
            std::mem::swap(&mut self, &mut other);
        }
        self.docs.append(&mut other.docs);
        self.skipped.append(&mut other.skipped);
        for (term, mut plist) in other.postings {
            self.postings.entry(term).or_default().append(&mut plist);
        }
        self
    }

    fn finish(self) -> Result<(LexicalIndex, Vec<String>)> {
        let mut docs = self.docs;
        docs.sort_unstable_by(|a, b| a.0.cmp(&b.0));
        let ords: HashMap<Arc<str>, DocOrd> = docs
            .iter()
            .enumerate()
            .map(|(ord, (id, _))| (id.clone(), ord as DocOrd))
            .collect();

        let mut terms: Vec<(String, Vec<(Arc<str>, u32)>)> = self.postings.into_iter().collect();
        terms.sort_unstable_by(|a, b| a.0.cmp(&b.0));

        let mut term_table = Vec::with_capacity(terms.len());
        let mut postings_table = Vec::with_capacity(terms.len());
        for (term, plist) in terms {
            let mut out: Vec<Posting> = plist
                .into_iter()
                .map(|(id, tf)| Posting { doc: ords[&id], tf })
                .collect();
            out.sort_unstable_by_key(|p| p.doc);
            term_table.push(term);
            postings_table.push(out);
        }

        let doc_ids = docs.iter().map(|(id, _)| id.to_string()).collect();
        let doc_lengths = docs.iter().map(|(_, len)| *len).collect();
        let index = LexicalIndex::from_parts(doc_ids, doc_lengths, term_table, postings_table)
            .context("assembled index failed validation")?;
        Ok((index, self.skipped))
    }
}

pub struct IndexBuilder {
    pipeline: TextPipeline,
    workers: usize,
}

impl IndexBuilder {
    pub fn new(pipeline: TextPipeline) -> Self {
        Self { pipeline, workers: 0 }
    }

    /// Worker threads for the tokenization phase; 0 uses every core.
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    pub fn build_from<S: DocumentSource + ?Sized>(&self, source: &S) -> Result<(LexicalIndex, BuildReport)> {
        let corpus = source.fetch_all_documents().context("document source is unreachable")?;
        self.build(corpus)
    }

    #[instrument(skip_all, fields(documents = corpus.len(), workers = self.workers))]
    pub fn build(&self, corpus: Vec<SourceDocument>) -> Result<(LexicalIndex, BuildReport)> {
        let started = Instant::now();
        let total = corpus.len();

        // first occurrence in corpus order wins
        let mut seen: HashSet<String> = HashSet::with_capacity(total);
        let mut unique = Vec::with_capacity(total);
        let mut duplicates = Vec::new();
        for doc in corpus {
            if seen.insert(doc.id.clone()) {
                unique.push(doc);
            } else {
                duplicates.push(doc.id);
            }
        }
        drop(seen);
        if !duplicates.is_empty() {
            warn!(count = duplicates.len(), "duplicate document ids skipped");
        }

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.workers)
            .thread_name(|i| format!("index-build-{i}"))
            .build()
            .context("failed to start index build workers")?;

        let processed = AtomicUsize::new(0);
        let pipeline = &self.pipeline;
        let partial = pool.install(|| {
            unique
                .into_par_iter()
                .fold(Partial::default, |acc, doc| {
                    let done = processed.fetch_add(1, Ordering::Relaxed) + 1;
                    if done % PROGRESS_EVERY == 0 {
                        let rate = done as f64 / started.elapsed().as_secs_f64().max(f64::EPSILON);
                        info!(done, total, docs_per_sec = rate as u64, "tokenizing corpus");
                    }
                    acc.absorb(doc, pipeline)
                })
                .reduce(Partial::default, Partial::merge)
        });

        let (index, mut skipped) = partial.finish()?;
        skipped.extend(duplicates);
        skipped.sort_unstable();

        let report = BuildReport {
            indexed: index.document_count(),
            skipped,
            terms: index.term_count(),
            elapsed: started.elapsed(),
        };
        if !report.skipped.is_empty() {
            warn!(skipped = report.skipped.len(), "documents excluded from the index");
        }
        info!(
            indexed = report.indexed,
            terms = report.terms,
            avgdl = index.average_document_length(),
            elapsed_ms = report.elapsed.as_millis() as u64,
            "lexical index built"
        );
        Ok((index, report))
    }
}
