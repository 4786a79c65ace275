//! Query text checks that decide which backends a query reaches.

use searchkit_store::lexical::is_cjk;

/// Trim and collapse every whitespace run to a single space.
pub fn normalize_whitespace(query: &str) -> String {
    query.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Whether the query contains any Unicode letter or number.
pub fn has_letter_or_number(query: &str) -> bool {
    query.chars().any(char::is_alphanumeric)
}

/// Whether the query contains ASCII letters or digits (romanised input).
pub fn contains_ascii_alnum(query: &str) -> bool {
    query.bytes().any(|b| b.is_ascii_alphanumeric())
}

/// Whether the query contains CJK punctuation, kana, ideographs or hangul.
pub fn contains_cjk(query: &str) -> bool {
    query.chars().any(is_cjk)
}

/// The whitespace-normalised query, or `None` when it has nothing searchable.
pub fn searchable(query: &str) -> Option<String> {
    let q = normalize_whitespace(query);
    (!q.is_empty() && has_letter_or_number(&q)).then_some(q)
}
