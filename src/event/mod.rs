//! Structured usage events
//!
//! One [`Event`] is produced per observed provider call. Building it runs the
//! whole analysis pipeline: canonicalization, prefix similarity, cache-breaker
//! detection, cost and savings estimation, and the privacy filter.
//!
//! Events never carry the raw prompt.

mod recommendation;
pub mod schema;

pub use recommendation::{Recommendation, SavingsRange};
pub use schema::{serialize_event, validate_event, SchemaError};

use crate::cache::{canonicalize_prompt, detect_cache_breakers, Breaker, TrackerRegistry};
use crate::config::ObserverConfig;
use crate::pricing::{
    estimate_cache_savings, estimate_cost_usd, CostLabel, PricingCatalog, SavingsEstimate,
};
use crate::privacy::{hash_prefix_blocks, redact_snippet, PrivacyMode, RedactionMode};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

/// Version tag carried by every event
pub const SCHEMA_VERSION: &str = "v1";

/// Normalized description of one provider call
#[derive(Debug, Clone, PartialEq)]
pub struct EventContext {
    pub provider: String,
    pub model: String,
    /// Raw prompt text, consumed by the pipeline and never stored
    pub prompt: String,
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub latency_ms: u64,
    /// Zero-based index of the first message carrying a cache-control marker
    pub cache_control_position: Option<usize>,
}

impl EventContext {
    pub fn new(provider: impl Into<String>, model: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            model: model.into(),
            prompt: prompt.into(),
            prompt_tokens: 0,
            completion_tokens: 0,
            latency_ms: 0,
            cache_control_position: None,
        }
    }

    pub fn with_tokens(mut self, prompt_tokens: u64, completion_tokens: u64) -> Self {
        self.prompt_tokens = prompt_tokens;
        self.completion_tokens = completion_tokens;
        self
    }

    pub fn with_latency_ms(mut self, latency_ms: u64) -> Self {
        self.latency_ms = latency_ms;
        self
    }

    pub fn with_cache_control_position(mut self, position: Option<usize>) -> Self {
        self.cache_control_position = position;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TokenCounts {
    pub prompt: u64,
    pub completion: u64,
    pub total: u64,
}

impl TokenCounts {
    pub fn new(prompt: u64, completion: u64) -> Self {
        Self {
            prompt,
            completion,
            total: prompt.saturating_add(completion),
        }
    }
}

/// Which pricing catalog produced the cost
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PricingProvenance {
    pub version: String,
    pub source: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CacheBoundary {
    pub present: bool,
    pub position: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PrivacyInfo {
    pub mode: PrivacyMode,
    pub redaction_mode: RedactionMode,
    pub snippet: Option<String>,
}

/// One observed provider call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Event {
    pub schema_version: String,
    pub event_id: String,
    pub timestamp_ms: i64,
    pub provider: String,
    pub model: String,
    pub token_counts: TokenCounts,
    pub latency_ms: u64,
    pub cost_estimate_usd: Option<f64>,
    pub cost_label: Option<CostLabel>,
    pub pricing: PricingProvenance,
    pub prefix_hash_blocks: Vec<String>,
    pub prefix_similarity: f64,
    pub cache_savings_estimate_usd: f64,
    pub cache_savings: SavingsEstimate,
    pub cache_breakers: Vec<Breaker>,
    pub cache_boundary: CacheBoundary,
    pub privacy: PrivacyInfo,
    pub recommendation: Recommendation,
}

/// Runs the analysis pipeline for each observed call
pub struct EventBuilder {
    config: ObserverConfig,
    registry: Arc<TrackerRegistry>,
    catalog: Arc<PricingCatalog>,
}

impl EventBuilder {
    pub fn new(
        config: ObserverConfig,
        registry: Arc<TrackerRegistry>,
        catalog: Arc<PricingCatalog>,
    ) -> Self {
        Self {
            config,
            registry,
            catalog,
        }
    }

    pub fn config(&self) -> &ObserverConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<TrackerRegistry> {
        &self.registry
    }

    pub fn catalog(&self) -> &Arc<PricingCatalog> {
        &self.catalog
    }

    /// Build the event for one call.
    ///
    /// Updates the prefix tracker for `context.model` as a side effect.
    pub fn build(&self, context: &EventContext) -> Event {
        let canonical = canonicalize_prompt(&context.prompt);
        let similarity = self
            .registry
            .tracker(self.config.history_size)
            .similarity(&context.model, &canonical);
        let breakers = detect_cache_breakers(&context.prompt);

        let cost = estimate_cost_usd(
            &self.catalog,
            &context.model,
            context.prompt_tokens,
            context.completion_tokens,
        );
        let savings = estimate_cache_savings(
            cost.usd,
            similarity,
            self.config.savings_factor,
            self.config.savings_min_similarity,
        );

        let snippet = redact_snippet(
            &context.prompt,
            self.config.redaction_mode,
            self.config.snippets_enabled,
        );

        let recommendation = Recommendation::from_analysis(&breakers, &savings);

        debug!(
            provider = %context.provider,
            model = %context.model,
            similarity,
            breakers = breakers.len(),
            "Built event"
        );

        Event {
            schema_version: SCHEMA_VERSION.to_string(),
            event_id: Uuid::new_v4().to_string(),
            timestamp_ms: chrono::Utc::now().timestamp_millis(),
            provider: context.provider.clone(),
            model: context.model.clone(),
            token_counts: TokenCounts::new(context.prompt_tokens, context.completion_tokens),
            latency_ms: context.latency_ms,
            cost_estimate_usd: cost.usd,
            cost_label: cost.label,
            pricing: PricingProvenance {
                version: cost.pricing_version,
                source: cost.pricing_source,
            },
            prefix_hash_blocks: hash_prefix_blocks(&canonical),
            prefix_similarity: similarity,
            cache_savings_estimate_usd: savings.estimated_usd,
            cache_savings: savings,
            cache_breakers: breakers,
            cache_boundary: CacheBoundary {
                present: context.cache_control_position.is_some(),
                position: context.cache_control_position,
            },
            privacy: PrivacyInfo {
                mode: self.config.privacy_mode,
                redaction_mode: self.config.redaction_mode,
                snippet,
            },
            recommendation,
        }
    }
}
