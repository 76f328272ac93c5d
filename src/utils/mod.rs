//! src/utils/mod.rs
//! Shared utility functions used across the engine

use std::path::Path;

/// Convert a Path to an owned String, replacing invalid UTF-8 with U+FFFD.
pub fn path_to_string(path: &Path) -> String {
    path.to_string_lossy().to_string()
}

/// Truncate a string to at most `max_len` bytes without splitting a
/// multi-byte character. Returns the original slice when it already fits.
pub fn truncate_at_boundary(s: &str, max_len: usize) -> &str {
    if s.len() <= max_len {
        return s;
    }
    let mut end = max_len;
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

/// Rough token-cost estimate: ceil(len / 4).
pub fn estimate_tokens(text: &str) -> i64 {
    (text.len() as i64 + 3) / 4
}

/// Current timestamp as the stored pair: (ISO-8601 UTC string, epoch millis).
pub fn now_pair() -> (String, i64) {
    let now = chrono::Utc::now();
    (now.to_rfc3339(), now.timestamp_millis())
}

/// Format an epoch-millis value as an ISO-8601 UTC string.
/// Out-of-range values fall back to the Unix epoch.
pub fn epoch_to_iso(epoch_ms: i64) -> String {
    chrono::DateTime::from_timestamp_millis(epoch_ms)
        .unwrap_or_else(|| chrono::DateTime::from_timestamp_millis(0).unwrap_or_default())
        .to_rfc3339()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_at_boundary_short() {
        assert_eq!(truncate_at_boundary("hello", 10), "hello");
    }

    #[test]
    fn test_truncate_at_boundary_exact() {
        assert_eq!(truncate_at_boundary("hello", 5), "hello");
    }

    #[test]
    fn test_truncate_at_boundary_ascii() {
        assert_eq!(truncate_at_boundary("hello world", 5), "hello");
    }

    #[test]
    fn test_truncate_at_boundary_multibyte() {
        // "héllo" - é is 2 bytes starting at index 1
        let s = "h\u{e9}llo";
        let t = truncate_at_boundary(s, 2);
        assert_eq!(t, "h");
    }

    #[test]
    fn test_estimate_tokens() {
        assert_eq!(estimate_tokens(""), 0);
        assert_eq!(estimate_tokens("abc"), 1);
        assert_eq!(estimate_tokens("abcd"), 1);
        assert_eq!(estimate_tokens("abcde"), 2);
    }

    #[test]
    fn test_now_pair_consistent() {
        let (iso, epoch) = now_pair();
        let parsed = chrono::DateTime::parse_from_rfc3339(&iso).unwrap();
        assert!((parsed.timestamp_millis() - epoch).abs() < 1000);
    }

    #[test]
    fn test_epoch_to_iso_roundtrip() {
        let iso = epoch_to_iso(1_700_000_000_000);
        let parsed = chrono::DateTime::parse_from_rfc3339(&iso).unwrap();
        assert_eq!(parsed.timestamp_millis(), 1_700_000_000_000);
    }
}
