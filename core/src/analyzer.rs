//! Morphological analysis capability.
//!
//! The index and the query path both see text only through [`MorphAnalyzer`],
//! so the concrete analyzer is chosen once at startup and injected. The
//! analyzer's [`name`](MorphAnalyzer::name) is recorded in every artifact; an
//! index must be queried with the analyzer that built it.
//!
//! Analyzers are expected to be deterministic. A non-deterministic analyzer
//! makes index builds non-reproducible: two builds over the same corpus can
//! disagree on term statistics and therefore on scores.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use unicode_segmentation::UnicodeSegmentation;

use crate::error::ConfigError;

/// Closed vocabulary of grammatical categories an analyzer may emit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Category {
    CommonNoun,
    ProperNoun,
    DependentNoun,
    Verb,
    Adjective,
    ForeignWord,
    Number,
    Adverb,
    Particle,
    Other,
}

impl Category {
    pub const ALL: [Category; 10] = [
        Category::CommonNoun,
        Category::ProperNoun,
        Category::DependentNoun,
        Category::Verb,
        Category::Adjective,
        Category::ForeignWord,
        Category::Number,
        Category::Adverb,
        Category::Particle,
        Category::Other,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Category::CommonNoun => "common-noun",
            Category::ProperNoun => "proper-noun",
            Category::DependentNoun => "dependent-noun",
            Category::Verb => "verb",
            Category::Adjective => "adjective",
            Category::ForeignWord => "foreign-word",
            Category::Number => "number",
            Category::Adverb => "adverb",
            Category::Particle => "particle",
            Category::Other => "other",
        }
    }

    /// Map a Sejong part-of-speech tag (as used by Korean dictionaries such as
    /// ko-dic) onto the category vocabulary. Compound tags like `VV+EP` are
    /// classified by their head.
    pub fn from_sejong_tag(tag: &str) -> Category {
        let head = tag.split('+').next().unwrap_or("");
        match head {
            "NNG" => Category::CommonNoun,
            "NNP" => Category::ProperNoun,
            "NNB" | "NNBC" => Category::DependentNoun,
            "VV" => Category::Verb,
            "VA" => Category::Adjective,
            "SL" => Category::ForeignWord,
            "SN" => Category::Number,
            "MAG" | "MAJ" => Category::Adverb,
            t if t.starts_with('J') => Category::Particle,
            _ => Category::Other,
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Category {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim();
        Category::ALL
            .iter()
            .copied()
            .find(|c| c.as_str().eq_ignore_ascii_case(wanted))
            .ok_or_else(|| ConfigError::UnknownCategory(wanted.to_string()))
    }
}

/// One analyzed unit: surface form plus its grammatical category.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Morpheme {
    pub surface: String,
    pub category: Category,
}

impl Morpheme {
    pub fn new(surface: impl Into<String>, category: Category) -> Self {
        Self { surface: surface.into(), category }
    }
}

/// Pluggable language analyzer. Implementations must be shareable across
/// build workers and request tasks.
pub trait MorphAnalyzer: Send + Sync {
    /// Stable identifier stored in built artifacts.
    fn name(&self) -> &str;

    fn analyze(&self, text: &str) -> Vec<Morpheme>;
}

lazy_static! {
    static ref WORD: Regex = Regex::new(
        r"(?P<hangul>\p{Hangul}+)|(?P<latin>\p{Latin}[\p{Latin}\p{M}]*(?:'\p{Latin}[\p{Latin}\p{M}]*)?)|(?P<num>\p{N}+)|(?P<other>[\p{L}\p{N}][\p{L}\p{M}\p{N}]*)"
    )
    .expect("valid regex");
}

/// Trailing particles split off Hangul words, longest first.
const PARTICLES: &[&str] = &[
    "에서는", "으로는", "에게서", "에서", "에게", "으로", "까지", "부터", "처럼", "보다", "하고",
    "이랑", "은", "는", "이", "가", "을", "를", "의", "에", "와", "과", "도", "만", "로", "랑",
];

/// Dictionary-free analyzer driven by Unicode script classes.
///
/// Hangul words become common nouns with any trailing particle split off,
/// Latin words become foreign words, digit runs become numbers. It is
/// deterministic and has no external data, which makes it the default and a
/// sensible analyzer for tests.
#[derive(Debug, Default, Clone, Copy)]
pub struct ScriptAnalyzer;

impl ScriptAnalyzer {
    pub fn new() -> Self {
        Self
    }

    fn split_particle(word: &str) -> (&str, Option<&str>) {
        for particle in PARTICLES {
            if let Some(stem) = word.strip_suffix(particle) {
                // never strip a word down to a single syllable
                if stem.graphemes(true).count() >= 2 {
                    return (stem, Some(particle));
                }
            }
        }
        (word, None)
    }
}

impl MorphAnalyzer for ScriptAnalyzer {
    fn name(&self) -> &str {
        "script"
    }

    fn analyze(&self, text: &str) -> Vec<Morpheme> {
        let mut out = Vec::new();
        for caps in WORD.captures_iter(text) {
            if let Some(m) = caps.name("hangul") {
                let (stem, particle) = Self::split_particle(m.as_str());
                out.push(Morpheme::new(stem, Category::CommonNoun));
                if let Some(p) = particle {
                    out.push(Morpheme::new(p, Category::Particle));
                }
            } else if let Some(m) = caps.name("latin") {
                out.push(Morpheme::new(m.as_str(), Category::ForeignWord));
            } else if let Some(m) = caps.name("num") {
                out.push(Morpheme::new(m.as_str(), Category::Number));
            } else if let Some(m) = caps.name("other") {
                out.push(Morpheme::new(m.as_str(), Category::Other));
            }
        }
        out
    }
}

/// Analyzer names this build can instantiate.
pub fn available_analyzers() -> &'static [&'static str] {
    if cfg!(feature = "ko-dic") {
        &["script", "ko-dic"]
    } else {
        &["script"]
    }
}

/// Instantiate an analyzer by the name recorded in artifacts.
pub fn analyzer_by_name(name: &str) -> anyhow::Result<Arc<dyn MorphAnalyzer>> {
    match name {
        "script" => Ok(Arc::new(ScriptAnalyzer::new())),
        #[cfg(feature = "ko-dic")]
        "ko-dic" => Ok(Arc::new(KoDicAnalyzer::new()?)),
        other => anyhow::bail!(
            "unknown analyzer {other:?}; available: {}",
            available_analyzers().join(", ")
        ),
    }
}

#[cfg(feature = "ko-dic")]
pub use kodic::KoDicAnalyzer;

#[cfg(feature = "ko-dic")]
mod kodic {
    use anyhow::{anyhow, Result};
    use lindera::dictionary::load_dictionary;
    use lindera::mode::Mode;
    use lindera::segmenter::Segmenter;
    use lindera::tokenizer::Tokenizer;

    use super::{Category, MorphAnalyzer, Morpheme};

    /// Korean analyzer backed by the embedded ko-dic dictionary.
    pub struct KoDicAnalyzer {
        tokenizer: Tokenizer,
    }

    impl KoDicAnalyzer {
        pub fn new() -> Result<Self> {
            let dictionary = load_dictionary("embedded://ko-dic")
                .map_err(|e| anyhow!("failed to load ko-dic dictionary: {e}"))?;
            let segmenter = Segmenter::new(Mode::Normal, dictionary, None);
            Ok(Self { tokenizer: Tokenizer::new(segmenter) })
        }
    }

    impl MorphAnalyzer for KoDicAnalyzer {
        fn name(&self) -> &str {
            "ko-dic"
        }

        fn analyze(&self, text: &str) -> Vec<Morpheme> {
            let mut tokens = match self.tokenizer.tokenize(text) {
                Ok(tokens) => tokens,
                Err(e) => {
                    tracing::warn!(error = %e, "ko-dic analysis failed; treating text as empty");
                    return Vec::new();
                }
            };
            tokens
                .iter_mut()
                .map(|token| {
                    let surface = token.surface.as_ref().to_string();
                    let tag = token.details().first().map(|s| s.to_string()).unwrap_or_default();
                    Morpheme::new(surface, Category::from_sejong_tag(&tag))
                })
                .collect()
        }
    }
}
