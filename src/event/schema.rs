//! Validation boundary for serialized events
//!
//! Events leave the process as JSON. Anything crossing that boundary is
//! checked against the strict `v1` shape: unknown fields (a raw prompt, for
//! example) are rejected, as are internally inconsistent numbers.

use super::{Event, SCHEMA_VERSION};
use serde_json::Value;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SchemaError {
    #[error("Event does not match schema: {0}")]
    Shape(#[from] serde_json::Error),

    #[error("Unsupported schema version: {0}")]
    UnsupportedVersion(String),

    #[error("Invalid event id: {0}")]
    InvalidEventId(String),

    #[error("Token total {total} does not equal prompt {prompt} + completion {completion}")]
    TokenTotalMismatch {
        prompt: u64,
        completion: u64,
        total: u64,
    },

    #[error("Prefix similarity out of range: {0}")]
    SimilarityOutOfRange(f64),

    #[error("Savings range is inverted: low {low} > high {high}")]
    InvertedSavingsRange { low: f64, high: f64 },
}

/// Validate a JSON event against the `v1` schema
pub fn validate_event(value: &Value) -> Result<(), SchemaError> {
    let event: Event = serde_json::from_value(value.clone())?;
    check_invariants(&event)
}

/// Serialize an event to JSON bytes, validating it on the way out
pub fn serialize_event(event: &Event) -> Result<Vec<u8>, SchemaError> {
    let value = serde_json::to_value(event)?;
    validate_event(&value)?;
    Ok(serde_json::to_vec(&value)?)
}

fn check_invariants(event: &Event) -> Result<(), SchemaError> {
    if event.schema_version != SCHEMA_VERSION {
        return Err(SchemaError::UnsupportedVersion(event.schema_version.clone()));
    }

    if uuid::Uuid::parse_str(&event.event_id).is_err() {
        return Err(SchemaError::InvalidEventId(event.event_id.clone()));
    }

    let counts = event.token_counts;
    if counts.prompt.checked_add(counts.completion) != Some(counts.total) {
        return Err(SchemaError::TokenTotalMismatch {
            prompt: counts.prompt,
            completion: counts.completion,
            total: counts.total,
        });
    }

    if !(0.0..=1.0).contains(&event.prefix_similarity) {
        return Err(SchemaError::SimilarityOutOfRange(event.prefix_similarity));
    }

    for range in [
        (event.cache_savings.low_usd, event.cache_savings.high_usd),
        (
            event.recommendation.potential_savings_range_usd.low,
            event.recommendation.potential_savings_range_usd.high,
        ),
    ] {
        let (low, high) = range;
        if low > high {
            return Err(SchemaError::InvertedSavingsRange { low, high });
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::TrackerRegistry;
    use crate::config::ObserverConfig;
    use crate::event::{EventBuilder, EventContext};
    use crate::pricing::PricingCatalog;
    use serde_json::json;
    use std::sync::Arc;

    fn event_json() -> Value {
        let builder = EventBuilder::new(
            ObserverConfig::default(),
            Arc::new(TrackerRegistry::new()),
            PricingCatalog::bundled(),
        );
        let event = builder.build(&EventContext::new("openai", "gpt-4o-mini", "hello").with_tokens(1, 1));
        serde_json::to_value(event).unwrap()
    }

    #[test]
    fn test_built_event_validates() {
        validate_event(&event_json()).unwrap();
    }

    #[test]
    fn test_rejects_raw_prompt_field() {
        let mut value = event_json();
        value["raw_prompt"] = json!("hello");
        assert!(matches!(validate_event(&value), Err(SchemaError::Shape(_))));
    }

    #[test]
    fn test_rejects_unknown_nested_field() {
        let mut value = event_json();
        value["privacy"]["prompt"] = json!("hello");
        assert!(validate_event(&value).is_err());
    }

    #[test]
    fn test_rejects_wrong_version() {
        let mut value = event_json();
        value["schema_version"] = json!("v2");
        assert!(matches!(
            validate_event(&value),
            Err(SchemaError::UnsupportedVersion(_))
        ));
    }

    #[test]
    fn test_rejects_bad_totals() {
        let mut value = event_json();
        value["token_counts"]["total"] = json!(5);
        assert!(matches!(
            validate_event(&value),
            Err(SchemaError::TokenTotalMismatch { total: 5, .. })
        ));
    }

    #[test]
    fn test_rejects_negative_tokens() {
        let mut value = event_json();
        value["token_counts"]["prompt"] = json!(-1);
        assert!(matches!(validate_event(&value), Err(SchemaError::Shape(_))));
    }

    #[test]
    fn test_rejects_similarity_out_of_range() {
        let mut value = event_json();
        value["prefix_similarity"] = json!(1.5);
        assert!(matches!(
            validate_event(&value),
            Err(SchemaError::SimilarityOutOfRange(_))
        ));
    }

    #[test]
    fn test_legacy_breaker_type_key_is_accepted() {
        let mut value = event_json();
        value["cache_breakers"] = json!([
            {"type": "uuid", "confidence": 0.99, "hint": "Avoid UUIDs."}
        ]);
        validate_event(&value).unwrap();
    }

    #[test]
    fn test_serialize_event_round_trips() {
        let value = event_json();
        let event: Event = serde_json::from_value(value).unwrap();
        let bytes = serialize_event(&event).unwrap();
        let parsed: Event = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(parsed.event_id, event.event_id);
        assert_eq!(parsed.token_counts, event.token_counts);
        assert_eq!(parsed.pricing, event.pricing);
    }
}
