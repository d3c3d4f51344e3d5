//! Title normalization used to accept a source's best match and to tell
//! papers apart when identities collide.

use unicode_normalization::UnicodeNormalization;
use unicode_normalization::char::is_combining_mark;

/// Lowercase, strip diacritics and punctuation, collapse whitespace.
///
/// `"Attention Is All You Need!"` and `"attention is all   you need"` both
/// normalize to `"attention is all you need"`.
pub fn normalize_title(title: &str) -> String {
    let stripped: String = title
        .nfkd()
        .filter(|c| !is_combining_mark(*c))
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect::<String>()
        .to_lowercase();
    stripped.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Whether two titles name the same paper after normalization.
pub fn titles_match(a: &str, b: &str) -> bool {
    let a = normalize_title(a);
    !a.is_empty() && a == normalize_title(b)
}
