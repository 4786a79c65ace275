//! Lexical scoring used by the document store.
//!
//! Trigram similarity follows the pg_trgm definition: every word is
//! lowercased, padded with two leading blanks and one trailing blank, and cut
//! into three-character windows; similarity is the Jaccard index of the two
//! trigram sets. Native-script scoring counts token occurrences in the raw
//! document and squashes the count with `raw / (raw + k)`.

use std::collections::HashSet;

/// A three-character window.
pub type Trigram = [char; 3];

/// Code point blocks treated as CJK: CJK punctuation, hiragana, katakana,
/// katakana extensions, unified ideographs and hangul syllables.
const CJK_RANGES: [(u32, u32); 6] = [
    (0x3000, 0x303F),
    (0x3040, 0x309F),
    (0x30A0, 0x30FF),
    (0x31F0, 0x31FF),
    (0x4E00, 0x9FFF),
    (0xAC00, 0xD7AF),
];

/// Whether `c` falls in one of the CJK blocks.
pub fn is_cjk(c: char) -> bool {
    let cp = c as u32;
    CJK_RANGES.iter().any(|(lo, hi)| cp >= *lo && cp <= *hi)
}

/// pg_trgm-style trigram set of `text`.
pub fn trigrams(text: &str) -> HashSet<Trigram> {
    let mut set = HashSet::new();
    for word in text
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
    {
        let mut padded: Vec<char> = vec![' ', ' '];
        padded.extend(word.chars().flat_map(char::to_lowercase));
        padded.push(' ');
        for w in padded.windows(3) {
            set.insert([w[0], w[1], w[2]]);
        }
    }
    set
}

/// Jaccard similarity of two trigram sets; `0.0` when either is empty.
pub fn trigram_similarity(a: &HashSet<Trigram>, b: &HashSet<Trigram>) -> f32 {
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    let shared = a.intersection(b).count();
    let union = a.len() + b.len() - shared;
    shared as f32 / union as f32
}

/// Lowercased tokens made of letters and numbers, deduplicated in order.
pub fn query_tokens(text: &str) -> Vec<String> {
    let mut tokens: Vec<String> = Vec::new();
    for raw in text
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
    {
        let token = raw.to_lowercase();
        if !tokens.contains(&token) {
            tokens.push(token);
        }
    }
    tokens
}

/// Occurrences of `token` in `haystack` (both already lowercased).
///
/// In prefix mode an occurrence only counts at the start of a word, unless
/// the token starts with a CJK character, where word boundaries do not exist.
pub fn native_occurrences(haystack: &str, token: &str, prefix: bool) -> usize {
    if token.is_empty() {
        return 0;
    }
    let anywhere = !prefix || token.chars().next().is_some_and(is_cjk);
    haystack
        .match_indices(token)
        .filter(|(idx, _)| {
            anywhere
                || haystack[..*idx]
                    .chars()
                    .next_back()
                    .map_or(true, |prev| !prev.is_alphanumeric())
        })
        .count()
}

/// Summed occurrence count of every token, or `None` if any token is absent.
pub fn native_raw_score(raw_document: &str, tokens: &[String], prefix: bool) -> Option<usize> {
    if tokens.is_empty() {
        return None;
    }
    let haystack = raw_document.to_lowercase();
    let mut total = 0;
    for token in tokens {
        let n = native_occurrences(&haystack, token, prefix);
        if n == 0 {
            return None;
        }
        total += n;
    }
    Some(total)
}

/// Maps a raw occurrence count into `[0, 1)`; `k <= 0` behaves as `k = 1`.
pub fn normalize_native_score(raw: f32, k: f32) -> f32 {
    let k = if k > 0.0 { k } else { 1.0 };
    if raw <= 0.0 {
        return 0.0;
    }
    raw / (raw + k)
}

/// FTS5 MATCH expression requiring every token, each quoted as a literal.
pub fn fts_match_expression(normalized_query: &str) -> Option<String> {
    let terms: Vec<String> = normalized_query
        .split_whitespace()
        .map(|t| format!("\"{}\"", t.replace('"', "\"\"")))
        .collect();
    if terms.is_empty() {
        None
    } else {
        Some(terms.join(" "))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_trigrams_match_pg_trgm_padding() {
        let set = trigrams("cat");
        let expected: HashSet<Trigram> = [
            [' ', ' ', 'c'],
            [' ', 'c', 'a'],
            ['c', 'a', 't'],
            ['a', 't', ' '],
        ]
        .into_iter()
        .collect();
        assert_eq!(set, expected);
    }

    #[test]
    fn test_trigram_similarity() {
        let a = trigrams("tokyo tower");
        assert!((trigram_similarity(&a, &a) - 1.0).abs() < 1e-6);
        let typo = trigrams("tokio");
        let s = trigram_similarity(&trigrams("tokyo"), &typo);
        assert!(s > 0.1 && s < 1.0, "got {s}");
        assert_eq!(trigram_similarity(&a, &HashSet::new()), 0.0);
    }

    #[test]
    fn test_query_tokens() {
        assert_eq!(query_tokens("Tokyo, tokyo TOWER!"), vec!["tokyo", "tower"]);
        assert_eq!(query_tokens("東京 タワー"), vec!["東京", "タワー"]);
        assert!(query_tokens(" -- ").is_empty());
    }

    #[test]
    fn test_native_occurrences_prefix_mode() {
        let doc = "tokyo tower and kyoto";
        assert_eq!(native_occurrences(doc, "kyo", false), 2);
        assert_eq!(native_occurrences(doc, "kyo", true), 1);
        assert_eq!(native_occurrences("東京タワー東京", "京", true), 2);
    }

    #[test]
    fn test_native_raw_score_and_semantics() {
        let tokens = vec!["東京".to_string(), "タワー".to_string()];
        assert_eq!(native_raw_score("東京タワーは東京にある", &tokens, false), Some(3));
        assert_eq!(native_raw_score("東京駅", &tokens, false), None);
        assert_eq!(native_raw_score("anything", &[], false), None);
    }

    #[test]
    fn test_native_score_normalization() {
        assert!((normalize_native_score(1.0, 1.0) - 0.5).abs() < 1e-6);
        assert!((normalize_native_score(3.0, 0.0) - 0.75).abs() < 1e-6);
        assert_eq!(normalize_native_score(0.0, 1.0), 0.0);
    }

    #[test]
    fn test_cjk_detection() {
        assert!(is_cjk('東'));
        assert!(is_cjk('た'));
        assert!(is_cjk('タ'));
        assert!(is_cjk('한'));
        assert!(!is_cjk('a'));
        assert!(!is_cjk('é'));
    }

    #[test]
    fn test_fts_expression_quotes_tokens() {
        assert_eq!(
            fts_match_expression("tokyo tower").as_deref(),
            Some("\"tokyo\" \"tower\"")
        );
        assert_eq!(fts_match_expression("   "), None);
    }
}
