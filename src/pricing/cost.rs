//! Cost estimation from token counts

use super::PricingCatalog;
use crate::cache::round_to;
use serde::{Deserialize, Serialize};

/// Why a cost could not be computed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CostLabel {
    /// The model has no entry in the pricing catalog
    UnknownModel,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CostEstimate {
    /// Estimated cost in USD, `None` when the model is unpriced
    pub usd: Option<f64>,
    pub label: Option<CostLabel>,
    pub pricing_version: String,
    pub pricing_source: String,
}

/// Estimate the USD cost of a call. Unknown models are labelled, never an error.
pub fn estimate_cost_usd(
    catalog: &PricingCatalog,
    model: &str,
    prompt_tokens: u64,
    completion_tokens: u64,
) -> CostEstimate {
    let (usd, label) = match catalog.get(model) {
        Some(pricing) => {
            let input_cost = (prompt_tokens as f64 / 1_000_000.0) * pricing.input_per_million;
            let output_cost =
                (completion_tokens as f64 / 1_000_000.0) * pricing.output_per_million;
            (Some(round_to(input_cost + output_cost, 10)), None)
        }
        None => (None, Some(CostLabel::UnknownModel)),
    };

    CostEstimate {
        usd,
        label,
        pricing_version: catalog.version.clone(),
        pricing_source: catalog.source.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn catalog() -> PricingCatalog {
        PricingCatalog::from_json_str(
            r#"{"version": "t1", "models": {"m": {"input_per_million": 2.0, "output_per_million": 8.0}}}"#,
            "test",
        )
        .unwrap()
    }

    #[test]
    fn test_known_model_cost() {
        let estimate = estimate_cost_usd(&catalog(), "m", 1_000_000, 500_000);
        assert_eq!(estimate.usd, Some(6.0));
        assert_eq!(estimate.label, None);
        assert_eq!(estimate.pricing_version, "t1");
        assert_eq!(estimate.pricing_source, "test");
    }

    #[test]
    fn test_small_counts_are_rounded() {
        let estimate = estimate_cost_usd(&catalog(), "m", 3, 1);
        let usd = estimate.usd.unwrap();
        assert!((usd - 0.000014).abs() < 1e-12);
    }

    #[test]
    fn test_unknown_model_is_labelled() {
        let estimate = estimate_cost_usd(&catalog(), "nope", 10, 10);
        assert_eq!(estimate.usd, None);
        assert_eq!(estimate.label, Some(CostLabel::UnknownModel));
        assert_eq!(
            serde_json::to_value(estimate.label).unwrap(),
            serde_json::json!("unknown_model")
        );
    }

    #[test]
    fn test_empty_catalog_degrades_to_unknown() {
        let estimate = estimate_cost_usd(&PricingCatalog::empty("none"), "gpt-4o", 10, 10);
        assert_eq!(estimate.label, Some(CostLabel::UnknownModel));
        assert_eq!(estimate.pricing_version, "pricing-unknown");
    }
}
