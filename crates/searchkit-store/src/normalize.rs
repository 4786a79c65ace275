/// Turns host text into the form stored in the `document` column and used
/// for keyword and trigram matching.
///
/// Hosts with transliteration needs (romanising kana, folding diacritics)
/// provide their own implementation; the store applies the same normaliser to
/// documents and queries.
pub trait TextNormalizer: Send + Sync + std::fmt::Debug {
    /// Normalise `text`. An empty result means "nothing searchable".
    fn normalize(&self, text: &str) -> String;
}

/// Lowercases and collapses every run of non-alphanumeric characters into a
/// single space.
#[derive(Debug, Default, Clone, Copy)]
pub struct BasicNormalizer;

impl TextNormalizer for BasicNormalizer {
    fn normalize(&self, text: &str) -> String {
        let mut out = String::with_capacity(text.len());
        let mut pending_space = false;
        for c in text.chars() {
            if c.is_alphanumeric() {
                if pending_space && !out.is_empty() {
                    out.push(' ');
                }
                pending_space = false;
                out.extend(c.to_lowercase());
            } else {
                pending_space = true;
            }
        }
        out
    }
}
