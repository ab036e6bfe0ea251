//! Prompt-cache analysis
//!
//! Providers reuse a cached prompt prefix only when the leading bytes of the
//! new prompt match what they saw before. This module holds the pieces that
//! estimate how likely that is for an observed call:
//!
//! 1. **Canonicalization**: strip volatile substrings (timestamps, UUIDs, nonces)
//!    so two prompts that differ only in noise compare as equal
//! 2. **Cache breakers**: flag the raw constructs that defeat prefix caching
//! 3. **Prefix tracking**: remember the last canonical prompt per model and score
//!    how much of the new prompt's prefix matches it

mod breakers;
mod canonical;
mod tracker;

pub use breakers::{detect_cache_breakers, Breaker, BreakerCategory};
pub use canonical::canonicalize_prompt;
pub use tracker::{prefix_similarity_score, PrefixTracker, TrackerRegistry};

/// Default number of models remembered per prefix tracker
pub const DEFAULT_HISTORY_SIZE: usize = 512;

/// Round to a fixed number of decimal places.
///
/// Scores and USD amounts are rounded before they leave the crate so that
/// events stay stable across platforms.
pub(crate) fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (value * factor).round() / factor
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_to() {
        assert_eq!(round_to(0.123456, 4), 0.1235);
        assert_eq!(round_to(1.0, 10), 1.0);
        assert_eq!(round_to(0.0, 4), 0.0);
    }
}
