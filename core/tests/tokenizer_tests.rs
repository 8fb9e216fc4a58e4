use hybrid_core::analyzer::{Category, Morpheme};
use hybrid_core::normalize::normalize;
use hybrid_core::{ScriptAnalyzer, TextPipeline, TokenFilter};
use std::sync::Arc;
use unicode_segmentation::UnicodeSegmentation;

fn script_pipeline() -> TextPipeline {
    TextPipeline::new(Arc::new(ScriptAnalyzer), TokenFilter::default())
}

#[test]
fn it_normalizes_before_analysis() {
    let words = script_pipeline().tokenize("😀😀 서울   경기 OTT 이용자!!! ★");
    assert_eq!(words, vec!["서울", "경기", "ott", "이용자"]);
}

#[test]
fn it_filters_stopwords_and_particles() {
    let words = script_pipeline().tokenize("운동을 좋아하는 사람 그리고 것");
    assert!(words.contains(&"운동".to_string()));
    assert!(words.contains(&"사람".to_string()));
    assert!(!words.contains(&"을".to_string()));
    assert!(!words.contains(&"그리고".to_string()));
    assert!(!words.contains(&"것".to_string()));
}

#[test]
fn it_keeps_repeated_tokens_in_order() {
    let words = script_pipeline().tokenize("운동 여행 운동");
    assert_eq!(words, vec!["운동", "여행", "운동"]);
}

#[test]
fn it_drops_disallowed_categories() {
    let filter = TokenFilter::new([Category::CommonNoun]).unwrap();
    let out = filter.filter(&[
        Morpheme::new("사람", Category::CommonNoun),
        Morpheme::new("빨리", Category::Adverb),
        Morpheme::new("abc", Category::ForeignWord),
    ]);
    assert_eq!(out, vec!["사람"]);
}

#[test]
fn short_tokens_only_survive_as_foreign_words_or_numbers() {
    let filter = TokenFilter::default();
    let mut analyzed = Vec::new();
    for cat in Category::ALL {
        for surface in ["a", "7", "집", "é", "사람", "ab"] {
            analyzed.push(Morpheme::new(surface, cat));
        }
    }
    for m in &analyzed {
        for token in filter.filter(std::slice::from_ref(m)) {
            if token.graphemes(true).count() == 1 {
                assert!(
                    matches!(m.category, Category::ForeignWord | Category::Number),
                    "{token} kept as {}",
                    m.category
                );
            }
        }
    }
}

#[test]
fn normalize_is_total() {
    for raw in ["", "   ", "🙂", "\u{200d}\u{fe0f}", "---", "a\u{0301}"] {
        let _ = normalize(raw);
    }
    assert_eq!(normalize("🙂🙂🙂"), "");
}

#[test]
fn allow_list_names_are_validated() {
    assert!(TokenFilter::from_names(&["common-noun", "verb"]).is_ok());
    assert!(TokenFilter::from_names(&["common-noun", "nounish"]).is_err());
}
