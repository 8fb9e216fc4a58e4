#![allow(dead_code)]

use hybrid_core::{Category, IndexBuilder, LexicalIndex, MorphAnalyzer, Morpheme, SourceDocument, TextPipeline, TokenFilter};
use std::sync::Arc;

/// Splits on whitespace. `word/category` pins a category, bare words are
/// common nouns. Deterministic, so tests can reason about exact statistics.
pub struct WhitespaceAnalyzer;

impl MorphAnalyzer for WhitespaceAnalyzer {
    fn name(&self) -> &str {
        "whitespace"
    }

    fn analyze(&self, text: &str) -> Vec<Morpheme> {
        text.split_whitespace()
            .map(|word| match word.split_once('/') {
                Some((surface, cat)) => {
                    Morpheme::new(surface, cat.parse::<Category>().unwrap_or(Category::Other))
                }
                None => Morpheme::new(word, Category::CommonNoun),
            })
            .collect()
    }
}

pub fn pipeline() -> TextPipeline {
    TextPipeline::new(Arc::new(WhitespaceAnalyzer), TokenFilter::default())
}

pub fn corpus(docs: &[(&str, &str)]) -> Vec<SourceDocument> {
    docs.iter().map(|(id, text)| SourceDocument::new(*id, *text)).collect()
}

pub fn build(docs: &[(&str, &str)]) -> LexicalIndex {
    let (index, _) = IndexBuilder::new(pipeline()).with_workers(2).build(corpus(docs)).unwrap();
    index
}

pub fn tokens(words: &[&str]) -> Vec<String> {
    words.iter().map(|w| w.to_string()).collect()
}
