//! Model pricing catalog, cost and cache-savings estimation
//!
//! The catalog maps a model id to its per-million-token input and output
//! price. It is loaded once and never mutated afterwards; a missing or
//! malformed catalog degrades every model to "unknown" instead of failing.

mod cost;
mod savings;

pub use cost::{estimate_cost_usd, CostEstimate, CostLabel};
pub use savings::{estimate_cache_savings, SavingsEstimate};

use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, OnceLock};
use thiserror::Error;
use tracing::warn;

const BUNDLED_CATALOG: &str = include_str!("../../data/pricing_v1.json");
const BUNDLED_SOURCE: &str = "bundled:pricing_v1.json";

#[derive(Error, Debug)]
pub enum PricingError {
    #[error("Failed to read pricing catalog: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse pricing catalog: {0}")]
    ParseError(#[from] serde_json::Error),
}

/// Price of one model in USD per million tokens
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ModelPricing {
    pub input_per_million: f64,
    pub output_per_million: f64,
}

/// Versioned, read-only pricing table
#[derive(Debug, Clone, Serialize)]
pub struct PricingCatalog {
    pub version: String,
    pub updated_at: String,
    /// Where the catalog was loaded from
    pub source: String,
    pub models: HashMap<String, ModelPricing>,
}

impl PricingCatalog {
    /// Catalog with no models; every lookup yields an unknown model
    pub fn empty(source: impl Into<String>) -> Self {
        Self {
            version: "pricing-unknown".to_string(),
            updated_at: "unknown".to_string(),
            source: source.into(),
            models: HashMap::new(),
        }
    }

    /// The catalog shipped with the crate, parsed on first access
    pub fn bundled() -> Arc<PricingCatalog> {
        static BUNDLED: OnceLock<Arc<PricingCatalog>> = OnceLock::new();
        BUNDLED
            .get_or_init(|| {
                let catalog = Self::from_json_str(BUNDLED_CATALOG, BUNDLED_SOURCE)
                    .unwrap_or_else(|e| {
                        warn!(error = %e, "Bundled pricing catalog is invalid");
                        Self::empty(BUNDLED_SOURCE)
                    });
                Arc::new(catalog)
            })
            .clone()
    }

    /// Load a catalog file
    pub fn load_from(path: &Path) -> Result<Self, PricingError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_json_str(&content, path.display().to_string())
    }

    /// Load a catalog file, falling back to an empty catalog on any error
    pub fn load_or_empty(path: &Path) -> Self {
        Self::load_from(path).unwrap_or_else(|e| {
            warn!(path = %path.display(), error = %e, "Pricing catalog unavailable, all models unpriced");
            Self::empty(path.display().to_string())
        })
    }

    /// Parse catalog JSON. Entries without numeric prices are skipped.
    pub fn from_json_str(json: &str, source: impl Into<String>) -> Result<Self, PricingError> {
        let data: Value = serde_json::from_str(json)?;

        let mut models = HashMap::new();
        if let Some(raw_models) = data.get("models").and_then(Value::as_object) {
            for (model, item) in raw_models {
                let input = item.get("input_per_million").and_then(Value::as_f64);
                let output = item.get("output_per_million").and_then(Value::as_f64);
                if let (Some(input_per_million), Some(output_per_million)) = (input, output) {
                    models.insert(
                        model.clone(),
                        ModelPricing {
                            input_per_million,
                            output_per_million,
                        },
                    );
                }
            }
        }

        let text_field = |key: &str, default: &str| match data.get(key) {
            Some(Value::String(s)) => s.clone(),
            Some(Value::Null) | None => default.to_string(),
            Some(other) => other.to_string(),
        };

        Ok(Self {
            version: text_field("version", "pricing-unknown"),
            updated_at: text_field("updated_at", "unknown"),
            source: source.into(),
            models,
        })
    }

    pub fn get(&self, model: &str) -> Option<&ModelPricing> {
        self.models.get(model)
    }

    pub fn len(&self) -> usize {
        self.models.len()
    }

    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_bundled_catalog_loads_once() {
        let first = PricingCatalog::bundled();
        let second = PricingCatalog::bundled();
        assert!(Arc::ptr_eq(&first, &second));
        assert!(first.get("gpt-4o-mini").is_some());
        assert_eq!(first.source, BUNDLED_SOURCE);
        assert_ne!(first.version, "pricing-unknown");
    }

    #[test]
    fn test_malformed_entries_are_skipped() {
        let json = r#"{
            "version": "test-1",
            "models": {
                "good": {"input_per_million": 1, "output_per_million": 2.5},
                "missing": {"input_per_million": 1},
                "wrong": {"input_per_million": "1", "output_per_million": 2},
                "not-an-object": 3
            }
        }"#;
        let catalog = PricingCatalog::from_json_str(json, "test").unwrap();
        assert_eq!(catalog.len(), 1);
        assert_eq!(
            catalog.get("good"),
            Some(&ModelPricing {
                input_per_million: 1.0,
                output_per_million: 2.5
            })
        );
        assert_eq!(catalog.updated_at, "unknown");
    }

    #[test]
    fn test_missing_models_section_is_empty() {
        let catalog = PricingCatalog::from_json_str("{}", "test").unwrap();
        assert!(catalog.is_empty());
        assert_eq!(catalog.version, "pricing-unknown");
    }

    #[test]
    fn test_load_from_file_and_fallback() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"version": "file-v2", "models": {{"m": {{"input_per_million": 1, "output_per_million": 1}}}}}}"#
        )
        .unwrap();
        let catalog = PricingCatalog::load_from(file.path()).unwrap();
        assert_eq!(catalog.version, "file-v2");
        assert_eq!(catalog.len(), 1);

        let missing = PricingCatalog::load_or_empty(Path::new("/definitely/not/here.json"));
        assert!(missing.is_empty());
    }
}
