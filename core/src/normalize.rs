use lazy_static::lazy_static;
use regex::Regex;
use unicode_normalization::UnicodeNormalization;

lazy_static! {
    // combining marks stay (Devanagari vowel signs, Thai tone marks); emoji
    // variation selectors and the keycap mark do not
    static ref NOISE: Regex =
        Regex::new(r"[^\p{L}\p{M}\p{N}\s.,!?'\-/()]|[\x{FE00}-\x{FE0F}\x{20E3}\x{E0100}-\x{E01EF}]")
            .expect("valid regex");
}

fn is_separator_punct(c: char) -> bool {
    matches!(c, '.' | ',' | '!' | '?' | '\'' | '-' | '/' | '(' | ')')
}

/// Strip decorative characters (emoji, symbols, box drawing, ...) and collapse
/// repeated separators. Keeps letters and combining marks of every script,
/// digits and the basic punctuation that separates words. Total: worst case yields "".
pub fn normalize(raw: &str) -> String {
    let folded = raw.nfkc().collect::<String>().to_lowercase();
    let stripped = NOISE.replace_all(&folded, " ");

    let mut out = String::with_capacity(stripped.len());
    let mut prev: Option<char> = None;
    for c in stripped.chars() {
        let c = if c.is_whitespace() { ' ' } else { c };
        if let Some(p) = prev {
            // "!!!!" -> "!", "   " -> " "
            if p == c && (c == ' ' || is_separator_punct(c)) {
                continue;
            }
        }
        if c == ' ' && out.is_empty() {
            continue;
        }
        out.push(c);
        prev = Some(c);
    }
    let trimmed_len = out.trim_end().len();
    out.truncate(trimmed_len);
    out
}
