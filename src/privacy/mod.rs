//! Privacy controls for events, snippets and diagnostics
//!
//! Events never carry the raw prompt. The only prompt-derived data that can
//! leave the process is:
//! - truncated SHA-256 hashes of the canonical prompt prefix, and
//! - a redacted snippet, which requires two independent opt-ins.

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use std::sync::LazyLock;

/// Characters per hashed prefix block
pub const PREFIX_BLOCK_SIZE: usize = 64;
/// Maximum number of hashed prefix blocks per event
pub const MAX_PREFIX_BLOCKS: usize = 3;
/// Characters kept from the prompt before redaction
pub const SNIPPET_CHARS: usize = 120;

/// Keys removed from diagnostic payloads before they are logged or sent
const BLOCKED_KEYS: [&str; 5] = ["api_key", "authorization", "headers", "prompt", "raw_prompt"];

static SECRET: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(api[_-]?key|authorization|bearer|secret)").expect("secret pattern is valid")
});

static EMAIL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}\b")
        .expect("email pattern is valid")
});

static PHONE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(?:\+?1[\s.-]?)?(?:\(?\d{3}\)?[\s.-]?){2}\d{4}\b")
        .expect("phone pattern is valid")
});

static LONG_NUMBER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b\d{9,}\b").expect("long number pattern is valid"));

/// What prompt-derived data an event may carry
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PrivacyMode {
    /// Only hashes of the canonical prompt prefix
    #[default]
    HashOnly,
}

impl PrivacyMode {
    /// Parse a configured value. Unrecognized values fall back to `HashOnly`,
    /// currently the only mode.
    pub fn parse_lenient(value: &str) -> Self {
        if value.trim().eq_ignore_ascii_case("hash_only") {
            return PrivacyMode::HashOnly;
        }
        PrivacyMode::default()
    }
}

/// Whether a redacted prompt snippet may be attached
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RedactionMode {
    /// No snippet, ever
    #[default]
    Strict,
    /// Attach a redacted snippet when snippets are also enabled
    RedactedSnippets,
}

impl RedactionMode {
    /// Parse a configured value. Anything but `redacted_snippets` is strict.
    pub fn parse_lenient(value: &str) -> Self {
        match value.trim().to_lowercase().as_str() {
            "redacted_snippets" => RedactionMode::RedactedSnippets,
            _ => RedactionMode::Strict,
        }
    }
}

/// Hex SHA-256 of a string
pub fn hash_text(value: &str) -> String {
    hex::encode(Sha256::digest(value.as_bytes()))
}

/// Hash the first blocks of a canonical prompt.
///
/// Each block of [`PREFIX_BLOCK_SIZE`] characters becomes the first 16 hex
/// characters of its SHA-256 digest; at most [`MAX_PREFIX_BLOCKS`] are produced.
pub fn hash_prefix_blocks(canonical_prompt: &str) -> Vec<String> {
    let chars: Vec<char> = canonical_prompt.chars().collect();
    chars
        .chunks(PREFIX_BLOCK_SIZE)
        .take(MAX_PREFIX_BLOCKS)
        .map(|chunk| {
            let block: String = chunk.iter().collect();
            hash_text(&block)[..16].to_string()
        })
        .collect()
}

/// Produce a redacted snippet of the prompt, or `None` unless both
/// `mode == RedactedSnippets` and `snippets_enabled` hold.
pub fn redact_snippet(prompt: &str, mode: RedactionMode, snippets_enabled: bool) -> Option<String> {
    if mode != RedactionMode::RedactedSnippets || !snippets_enabled {
        return None;
    }

    let preview: String = prompt.chars().take(SNIPPET_CHARS).collect();
    let redacted = SECRET.replace_all(&preview, "[REDACTED]");
    let redacted = EMAIL.replace_all(&redacted, "[REDACTED_EMAIL]");
    let redacted = PHONE.replace_all(&redacted, "[REDACTED_PHONE]");
    Some(LONG_NUMBER.replace_all(&redacted, "[REDACTED_NUMBER]").into_owned())
}

/// Remove known-sensitive keys from a diagnostic payload
pub fn scrub_sensitive(payload: &Map<String, Value>) -> Map<String, Value> {
    payload
        .iter()
        .filter(|(key, _)| !BLOCKED_KEYS.contains(&key.to_lowercase().as_str()))
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect()
}

/// Log-safe rendering of a secret or endpoint
pub fn scrub(value: Option<&str>) -> String {
    match value {
        None | Some("") => String::new(),
        Some(v) if v.chars().count() <= 4 => "****".to_string(),
        Some(v) => {
            let head: String = v.chars().take(3).collect();
            let tail = v.chars().last().map(String::from).unwrap_or_default();
            format!("{head}...{tail}")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_prefix_hashing_is_deterministic() {
        let value = "a".repeat(190);
        let first = hash_prefix_blocks(&value);
        assert_eq!(first, hash_prefix_blocks(&value));
        assert_eq!(first.len(), 3);
        assert!(first.iter().all(|h| h.len() == 16));
        // First two blocks are identical content
        assert_eq!(first[0], first[1]);
        assert_ne!(first[1], first[2]);
    }

    #[test]
    fn test_prefix_hashing_limits() {
        assert!(hash_prefix_blocks("").is_empty());
        assert_eq!(hash_prefix_blocks("short").len(), 1);
        assert_eq!(hash_prefix_blocks(&"x".repeat(10_000)).len(), MAX_PREFIX_BLOCKS);
        assert_eq!(hash_prefix_blocks("abc")[0], hash_text("abc")[..16]);
    }

    #[test]
    fn test_snippet_requires_both_opt_ins() {
        assert_eq!(redact_snippet("hello", RedactionMode::Strict, true), None);
        assert_eq!(redact_snippet("hello", RedactionMode::RedactedSnippets, false), None);
        assert_eq!(
            redact_snippet("hello", RedactionMode::RedactedSnippets, true),
            Some("hello".to_string())
        );
    }

    #[test]
    fn test_snippet_redacts_sensitive_values() {
        let prompt = "Bearer token for jane.doe@example.com, call 555-123-4567, acct 123456789012";
        let snippet = redact_snippet(prompt, RedactionMode::RedactedSnippets, true).unwrap();
        assert!(!snippet.contains("Bearer"));
        assert!(!snippet.contains("jane.doe@example.com"));
        assert!(!snippet.contains("555-123-4567"));
        assert!(!snippet.contains("123456789012"));
        assert!(snippet.contains("[REDACTED]"));
        assert!(snippet.contains("[REDACTED_EMAIL]"));
        assert!(snippet.contains("[REDACTED_PHONE]"));
        assert!(snippet.contains("[REDACTED_NUMBER]"));
    }

    #[test]
    fn test_snippet_is_truncated() {
        let prompt = "word ".repeat(100);
        let snippet = redact_snippet(&prompt, RedactionMode::RedactedSnippets, true).unwrap();
        assert_eq!(snippet.chars().count(), SNIPPET_CHARS);
    }

    #[test]
    fn test_scrub_sensitive_removes_blocked_keys() {
        let payload = json!({
            "API_KEY": "k",
            "Authorization": "Bearer x",
            "headers": {},
            "prompt": "p",
            "raw_prompt": "p",
            "model": "gpt-4o"
        });
        let scrubbed = scrub_sensitive(payload.as_object().unwrap());
        assert_eq!(scrubbed.len(), 1);
        assert_eq!(scrubbed["model"], "gpt-4o");
    }

    #[test]
    fn test_scrub() {
        assert_eq!(scrub(None), "");
        assert_eq!(scrub(Some("abcd")), "****");
        assert_eq!(scrub(Some("https://collector.example/v1")), "htt...1");
    }

    #[test]
    fn test_mode_parsing_falls_back() {
        assert_eq!(PrivacyMode::parse_lenient("full_text"), PrivacyMode::HashOnly);
        assert_eq!(
            RedactionMode::parse_lenient(" Redacted_Snippets "),
            RedactionMode::RedactedSnippets
        );
        assert_eq!(RedactionMode::parse_lenient("other"), RedactionMode::Strict);
    }
}
