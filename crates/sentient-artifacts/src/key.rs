//! Cache keys derived from (subject, descriptor) pairs.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

const EMPTY_COMPONENT: &str = "unnamed";

/// Longest component in bytes, digest suffix included. Keeps
/// `{key}_{millis}.png` and its temp name under the 255-byte file name limit.
const MAX_COMPONENT_BYTES: usize = 64;

/// Hex characters of the SHA-256 digest appended to a truncated component.
const DIGEST_HEX_LEN: usize = 8;

/// Deterministic, filesystem-safe key for a (city, weather description) pair.
///
/// Both parts are normalised the same way, so `"Paris "` / `"clear SKY"` and
/// `"paris"` / `"Clear sky"` produce the same key. The parts are joined with
/// `__`, which never occurs inside a normalised part.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CacheKey(String);

impl CacheKey {
    pub fn new(subject: &str, descriptor: &str) -> Self {
        Self(format!(
            "{}__{}",
            safe_component(subject),
            safe_component(descriptor)
        ))
    }

    /// Wrap a key read back from storage.
    pub fn from_stored(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(&self.0)
    }
}

/// Lower-case, whitespace runs to `_`, drop anything that is not alphanumeric,
/// `_`, `-` or `.`, collapse repeated `_`, and trim `.`/`_` at both ends.
///
/// Non-ASCII letters are kept (lower-cased) so distinct non-Latin city names
/// never collapse onto the same key.
fn safe_component(raw: &str) -> String {
    let joined = raw
        .split_whitespace()
        .collect::<Vec<_>>()
        .join("_")
        .to_lowercase();

    let mut out = String::with_capacity(joined.len());
    for c in joined.chars() {
        let keep = c.is_alphanumeric() || matches!(c, '_' | '-' | '.');
        if !keep || (c == '_' && out.ends_with('_')) {
            continue;
        }
        out.push(c);
    }

    let trimmed = out.trim_matches(|c| c == '.' || c == '_');
    if trimmed.is_empty() {
        EMPTY_COMPONENT.to_string()
    } else {
        bounded(trimmed)
    }
}

/// Cut an over-long component on a char boundary and tag it with a digest of
/// the full text, so distinct long names keep distinct keys.
fn bounded(component: &str) -> String {
    if component.len() <= MAX_COMPONENT_BYTES {
        return component.to_string();
    }

    let mut end = MAX_COMPONENT_BYTES - DIGEST_HEX_LEN - 1;
    while !component.is_char_boundary(end) {
        end -= 1;
    }
    let head = component[..end].trim_end_matches(|c| c == '.' || c == '_');

    let digest = Sha256::digest(component.as_bytes());
    let tag: String = digest
        .iter()
        .take(DIGEST_HEX_LEN / 2)
        .map(|b| format!("{:02x}", b))
        .collect();

    format!("{}-{}", head, tag)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_format() {
        assert_eq!(CacheKey::new("Paris", "Clear sky").as_str(), "paris__clear_sky");
    }

    #[test]
    fn test_key_normalisation_equivalence() {
        let expected = CacheKey::new("New York", "Partly cloudy");
        assert_eq!(CacheKey::new("  new york ", "partly   CLOUDY\t"), expected);
        assert_eq!(CacheKey::new("NEW YORK", "Partly cloudy "), expected);
    }

    #[test]
    fn test_key_is_deterministic() {
        let a = CacheKey::new("Reykjavík", "Slight snow fall");
        let b = CacheKey::new("Reykjavík", "Slight snow fall");
        assert_eq!(a, b);
        assert_eq!(a.to_string(), b.to_string());
    }

    #[test]
    fn test_key_is_filesystem_safe() {
        let key = CacheKey::new("../../etc/passwd", "Rain: /heavy\\ <intensity>");
        assert!(!key.as_str().contains('/'));
        assert!(!key.as_str().contains('\\'));
        assert!(!key.as_str().contains(':'));
        assert!(!key.as_str().starts_with('.'));
        assert_eq!(key.as_str(), "etcpasswd__rain_heavy_intensity");
    }

    #[test]
    fn test_distinct_non_latin_subjects_stay_distinct() {
        let tokyo = CacheKey::new("東京", "Clear sky");
        let beijing = CacheKey::new("北京", "Clear sky");
        assert_ne!(tokyo, beijing);
    }

    #[test]
    fn test_empty_components() {
        assert_eq!(CacheKey::new("", "  ").as_str(), "unnamed__unnamed");
        assert_eq!(CacheKey::new("???", "Fog").as_str(), "unnamed__fog");
    }

    #[test]
    fn test_different_descriptions_differ() {
        assert_ne!(CacheKey::new("Paris", "Clear sky"), CacheKey::new("Paris", "Overcast"));
    }

    #[test]
    fn test_parts_cannot_shift_between_subject_and_descriptor() {
        assert_ne!(
            CacheKey::new("X Depositing rime", "Fog"),
            CacheKey::new("X", "Depositing rime fog")
        );
    }

    #[test]
    fn test_long_components_are_bounded() {
        let key = CacheKey::new(&"Ciudad ".repeat(40), "Clear sky");
        let (subject, descriptor) = key.as_str().split_once("__").unwrap();
        assert!(subject.len() <= MAX_COMPONENT_BYTES);
        assert!(subject.starts_with("ciudad_ciudad"));
        assert_eq!(descriptor, "clear_sky");
        assert_eq!(key, CacheKey::new(&"Ciudad ".repeat(40), "Clear sky"));
    }

    #[test]
    fn test_truncated_components_keep_distinct_keys() {
        let a = CacheKey::new(&format!("{}a", "Ciudad ".repeat(40)), "Fog");
        let b = CacheKey::new(&format!("{}b", "Ciudad ".repeat(40)), "Fog");
        assert_ne!(a, b);
    }

    #[test]
    fn test_multibyte_components_cut_on_char_boundary() {
        let key = CacheKey::new(&"東京".repeat(60), "Clear sky");
        let (subject, _) = key.as_str().split_once("__").unwrap();
        assert!(subject.len() <= MAX_COMPONENT_BYTES);
        assert!(subject.starts_with("東京"));
    }
}
