//! Heuristic prompt-cache savings range

use crate::cache::round_to;
use serde::{Deserialize, Serialize};

/// Lower bound multiplier applied to the point estimate
const LOW_MULTIPLIER: f64 = 0.6;
/// Upper bound multiplier applied to the point estimate
const HIGH_MULTIPLIER: f64 = 1.2;
const CONFIDENCE_FLOOR: f64 = 0.2;
const CONFIDENCE_SLOPE: f64 = 0.7;

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SavingsEstimate {
    pub estimated_usd: f64,
    pub low_usd: f64,
    pub high_usd: f64,
    pub confidence: f64,
}

/// Estimate what prompt caching could save on this call.
///
/// Returns an all-zero estimate when the cost is unknown or the prompt is
/// less similar to its predecessor than `min_similarity`.
pub fn estimate_cache_savings(
    cost_usd: Option<f64>,
    similarity: f64,
    savings_factor: f64,
    min_similarity: f64,
) -> SavingsEstimate {
    let cost = match cost_usd {
        Some(cost) if similarity >= min_similarity => cost,
        _ => return SavingsEstimate::default(),
    };

    let similarity = similarity.clamp(0.0, 1.0);
    let factor = savings_factor.clamp(0.0, 1.0);
    let estimated = round_to(cost * similarity * factor, 10);

    SavingsEstimate {
        estimated_usd: estimated,
        low_usd: round_to(estimated * LOW_MULTIPLIER, 10),
        high_usd: round_to(estimated * HIGH_MULTIPLIER, 10),
        confidence: round_to(
            (CONFIDENCE_FLOOR + similarity * CONFIDENCE_SLOPE).min(1.0),
            4,
        ),
    }
}
