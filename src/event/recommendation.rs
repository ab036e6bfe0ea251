//! Actionable summary attached to each event

use crate::cache::Breaker;
use crate::pricing::SavingsEstimate;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// Breakers listed in a recommendation
const MAX_TOP_BREAKERS: usize = 3;

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SavingsRange {
    pub low: f64,
    pub high: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Recommendation {
    /// Most confident breakers first
    pub top_cache_breakers: Vec<Breaker>,
    pub potential_savings_range_usd: SavingsRange,
    pub confidence: f64,
    pub suggested_actions: Vec<String>,
}

impl Recommendation {
    pub fn from_analysis(breakers: &[Breaker], savings: &SavingsEstimate) -> Self {
        let mut top = breakers.to_vec();
        // Stable sort keeps detection order among equal confidences
        top.sort_by(|a, b| {
            b.confidence
                .partial_cmp(&a.confidence)
                .unwrap_or(Ordering::Equal)
        });
        top.truncate(MAX_TOP_BREAKERS);

        let suggested_actions = top
            .iter()
            .filter(|b| !b.hint.is_empty())
            .map(|b| b.hint.clone())
            .collect();

        Self {
            top_cache_breakers: top,
            potential_savings_range_usd: SavingsRange {
                low: savings.low_usd,
                high: savings.high_usd,
            },
            confidence: savings.confidence,
            suggested_actions,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::BreakerCategory;

    #[test]
    fn test_top_breakers_sorted_and_limited() {
        let breakers: Vec<Breaker> = [
            BreakerCategory::Timestamp,
            BreakerCategory::Uuid,
            BreakerCategory::RandomId,
            BreakerCategory::HexBlob,
        ]
        .into_iter()
        .map(Breaker::from)
        .collect();

        let rec = Recommendation::from_analysis(&breakers, &SavingsEstimate::default());

        let categories: Vec<_> = rec.top_cache_breakers.iter().map(|b| b.category).collect();
        assert_eq!(
            categories,
            vec![
                BreakerCategory::Uuid,
                BreakerCategory::Timestamp,
                BreakerCategory::RandomId
            ]
        );
        assert_eq!(rec.suggested_actions.len(), 3);
        assert_eq!(rec.suggested_actions[0], BreakerCategory::Uuid.hint());
    }

    #[test]
    fn test_empty_hints_are_not_suggested() {
        let mut breaker = Breaker::from(BreakerCategory::HexBlob);
        breaker.hint.clear();

        let rec = Recommendation::from_analysis(&[breaker], &SavingsEstimate::default());
        assert_eq!(rec.top_cache_breakers.len(), 1);
        assert!(rec.suggested_actions.is_empty());
    }

    #[test]
    fn test_savings_range_is_copied() {
        let savings = SavingsEstimate {
            estimated_usd: 0.24,
            low_usd: 0.144,
            high_usd: 0.288,
            confidence: 0.76,
        };
        let rec = Recommendation::from_analysis(&[], &savings);
        assert_eq!(
            rec.potential_savings_range_usd,
            SavingsRange {
                low: 0.144,
                high: 0.288
            }
        );
        assert_eq!(rec.confidence, 0.76);
        assert!(rec.top_cache_breakers.is_empty());
    }
}
