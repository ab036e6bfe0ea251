//! Detection of prompt constructs that defeat provider prefix caching

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;

/// Kind of cache-unfriendly pattern found in a prompt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BreakerCategory {
    /// Wall-clock timestamps (ISO-8601 style)
    Timestamp,
    /// RFC4122 UUIDs
    Uuid,
    /// Nonce, request id or session id key/value pairs
    RandomId,
    /// Long hexadecimal blobs (hashes, tokens)
    HexBlob,
}

impl BreakerCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            BreakerCategory::Timestamp => "timestamp",
            BreakerCategory::Uuid => "uuid",
            BreakerCategory::RandomId => "random_id",
            BreakerCategory::HexBlob => "hex_blob",
        }
    }

    /// Fixed detection confidence for this category
    pub fn confidence(&self) -> f64 {
        match self {
            BreakerCategory::Timestamp => 0.92,
            BreakerCategory::Uuid => 0.99,
            BreakerCategory::RandomId => 0.86,
            BreakerCategory::HexBlob => 0.72,
        }
    }

    /// Remediation hint shown to users
    pub fn hint(&self) -> &'static str {
        match self {
            BreakerCategory::Timestamp => "Move timestamps to suffix or metadata fields.",
            BreakerCategory::Uuid => "Avoid UUIDs in reusable prompt prefix sections.",
            BreakerCategory::RandomId => "Remove nonce/request IDs from static instruction prefix.",
            BreakerCategory::HexBlob => "Trim long random blobs from cached prefix region.",
        }
    }
}

impl std::fmt::Display for BreakerCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A detected cache breaker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Breaker {
    /// Breaker kind. Older payloads called this field `type`.
    #[serde(alias = "type")]
    pub category: BreakerCategory,
    pub confidence: f64,
    pub hint: String,
}

impl From<BreakerCategory> for Breaker {
    fn from(category: BreakerCategory) -> Self {
        Self {
            category,
            confidence: category.confidence(),
            hint: category.hint().to_string(),
        }
    }
}

static PATTERNS: LazyLock<Vec<(BreakerCategory, Regex)>> = LazyLock::new(|| {
    [
        (
            BreakerCategory::Timestamp,
            r"\b\d{4}-\d{2}-\d{2}[T ]\d{2}:\d{2}:\d{2}",
        ),
        (
            BreakerCategory::Uuid,
            r"\b[0-9a-fA-F]{8}-[0-9a-fA-F]{4}-[1-5][0-9a-fA-F]{3}-[89abAB][0-9a-fA-F]{3}-[0-9a-fA-F]{12}\b",
        ),
        (
            BreakerCategory::RandomId,
            r"(?i)\b(?:nonce|request[_-]?id|session[_-]?id)[:=]\s*[A-Za-z0-9_-]{8,}\b",
        ),
        (BreakerCategory::HexBlob, r"(?i)\b[0-9a-f]{24,}\b"),
    ]
    .into_iter()
    .map(|(category, pattern)| {
        (
            category,
            Regex::new(pattern).expect("cache breaker pattern is valid"),
        )
    })
    .collect()
});

/// Scan a raw prompt for cache breakers.
///
/// Must run on the raw text: canonicalization removes exactly the signals
/// flagged here. Each category is reported at most once, in a fixed order.
pub fn detect_cache_breakers(prompt: &str) -> Vec<Breaker> {
    PATTERNS
        .iter()
        .filter(|(_, pattern)| pattern.is_match(prompt))
        .map(|(category, _)| Breaker::from(*category))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn categories(prompt: &str) -> Vec<BreakerCategory> {
        detect_cache_breakers(prompt)
            .into_iter()
            .map(|b| b.category)
            .collect()
    }

    #[test]
    fn test_clean_prompt_has_no_breakers() {
        assert!(detect_cache_breakers("You are a helpful assistant.").is_empty());
    }

    #[test]
    fn test_detects_each_category() {
        assert_eq!(categories("now: 2025-03-04 10:11:12"), vec![BreakerCategory::Timestamp]);
        assert_eq!(
            categories("trace 123e4567-e89b-12d3-a456-426614174000"),
            vec![BreakerCategory::Uuid]
        );
        assert_eq!(categories("nonce=abcdefgh"), vec![BreakerCategory::RandomId]);
        assert_eq!(
            categories("digest 0123456789abcdef0123456789abcdef"),
            vec![BreakerCategory::HexBlob]
        );
    }

    #[test]
    fn test_multiple_categories_reported_once_in_order() {
        let prompt = "at 2025-01-01T00:00:00 and 2025-01-02T00:00:00 request-id=ZZZZ99998888";
        let found = detect_cache_breakers(prompt);
        assert_eq!(found.len(), 2);
        assert_eq!(found[0].category, BreakerCategory::Timestamp);
        assert_eq!(found[0].confidence, 0.92);
        assert_eq!(found[1].category, BreakerCategory::RandomId);
        assert_eq!(found[1].hint, "Remove nonce/request IDs from static instruction prefix.");
    }

    #[test]
    fn test_serializes_category_as_snake_case() {
        let json = serde_json::to_value(Breaker::from(BreakerCategory::HexBlob)).unwrap();
        assert_eq!(json["category"], "hex_blob");
        assert_eq!(json["confidence"], 0.72);
    }

    #[test]
    fn test_accepts_legacy_type_field() {
        let breaker: Breaker = serde_json::from_str(
            r#"{"type": "uuid", "confidence": 0.99, "hint": "Avoid UUIDs."}"#,
        )
        .unwrap();
        assert_eq!(breaker.category, BreakerCategory::Uuid);
    }
}
