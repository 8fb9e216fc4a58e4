use lazy_static::lazy_static;
use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;
use unicode_segmentation::UnicodeSegmentation;

use crate::analyzer::{Category, MorphAnalyzer, Morpheme};
use crate::error::ConfigError;
use crate::normalize::normalize;

/// Categories indexed when no allow-list is configured.
pub const DEFAULT_ALLOWED: [Category; 8] = [
    Category::CommonNoun,
    Category::ProperNoun,
    Category::DependentNoun,
    Category::Verb,
    Category::Adjective,
    Category::ForeignWord,
    Category::Number,
    Category::Adverb,
];

lazy_static! {
    static ref STOPWORDS: HashSet<&'static str> = {
        let words: &[&str] = &[
            // particles
            "은","는","이","가","을","를","의","에","에서","에게","으로","로","와","과","도","만",
            "까지","부터","처럼","보다","하고","이랑","랑",
            // copulas and generic auxiliaries
            "이다","아니다","하다","되다","있다","없다","않다","같다","보다","주다","싶다",
            "하는","되는","있는","없는","한","할","된","될","했다","했던",
            // generic nouns and connectives
            "것","수","등","및","때","중","더","좀","잘","또","그","저","이것","그것",
            "그리고","그러나","하지만","또는","혹은","즉",
            // common english function words
            "a","an","and","are","as","at","be","by","for","in","is","it","of","on","or","the","to","with"
        ];
        words.iter().copied().collect()
    };
}

fn is_stopword(token: &str) -> bool { STOPWORDS.contains(token) }

/// Category allow-listing, stopword removal and short-token elision, applied
/// in that order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenFilter {
    allowed: BTreeSet<Category>,
}

impl Default for TokenFilter {
    fn default() -> Self {
        Self { allowed: DEFAULT_ALLOWED.iter().copied().collect() }
    }
}

impl TokenFilter {
    pub fn new<I: IntoIterator<Item = Category>>(allowed: I) -> Result<Self, ConfigError> {
        let allowed: BTreeSet<Category> = allowed.into_iter().collect();
        if allowed.is_empty() {
            return Err(ConfigError::EmptyAllowList);
        }
        Ok(Self { allowed })
    }

    /// Parse an allow-list of category names such as `common-noun,verb`.
    pub fn from_names<S: AsRef<str>>(names: &[S]) -> Result<Self, ConfigError> {
        let parsed = names
            .iter()
            .map(|n| n.as_ref().parse::<Category>())
            .collect::<Result<Vec<_>, _>>()?;
        Self::new(parsed)
    }

    pub fn allowed(&self) -> impl Iterator<Item = Category> + '_ {
        self.allowed.iter().copied()
    }

    pub fn filter(&self, analyzed: &[Morpheme]) -> Vec<String> {
        analyzed
            .iter()
            .filter(|m| self.allowed.contains(&m.category))
            .filter(|m| !is_stopword(&m.surface))
            .filter(|m| {
                matches!(m.category, Category::ForeignWord | Category::Number)
                    || m.surface.graphemes(true).count() > 1
            })
            .map(|m| m.surface.clone())
            .collect()
    }
}

/// Normalize -> analyze -> filter. The same pipeline must be used for the
/// corpus at build time and for queries at serve time.
#[derive(Clone)]
pub struct TextPipeline {
    analyzer: Arc<dyn MorphAnalyzer>,
    filter: TokenFilter,
}

impl TextPipeline {
    pub fn new(analyzer: Arc<dyn MorphAnalyzer>, filter: TokenFilter) -> Self {
        Self { analyzer, filter }
    }

    pub fn analyzer_name(&self) -> &str {
        self.analyzer.name()
    }

    pub fn filter(&self) -> &TokenFilter {
        &self.filter
    }

    /// Token sequence for one document or query, in analysis order.
    pub fn tokenize(&self, text: &str) -> Vec<String> {
        let normalized = normalize(text);
        if normalized.is_empty() {
            return Vec::new();
        }
        let analyzed = self.analyzer.analyze(&normalized);
        self.filter.filter(&analyzed)
    }
}

impl std::fmt::Debug for TextPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TextPipeline")
            .field("analyzer", &self.analyzer.name())
            .field("filter", &self.filter)
            .finish()
    }
}
