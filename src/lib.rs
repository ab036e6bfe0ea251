//! llm-observer - Usage, cost and prompt-cache telemetry for LLM provider calls
//!
//! This library turns observed provider calls into privacy-safe structured
//! events and optionally ships them to a remote collector, without ever
//! blocking or failing the instrumented call.
//!
//! ## Key Features
//!
//! - **Prompt Cache Analysis**: Canonicalize prompts, score prefix similarity per model,
//!   and flag constructs that defeat provider prefix caching
//! - **Cost Estimation**: Versioned pricing catalog with estimated cache savings ranges
//! - **Privacy**: Events carry prefix hashes only; snippets need two explicit opt-ins
//! - **Telemetry**: Bounded, sampled, retrying background delivery with bounded shutdown
//! - **Usage Sessions**: Local aggregation of observed events into reports

pub mod adapters;
pub mod cache;
pub mod config;
pub mod event;
pub mod metrics;
pub mod observer;
pub mod pricing;
pub mod privacy;
pub mod telemetry;

pub use cache::{Breaker, BreakerCategory, PrefixTracker, TrackerRegistry};
pub use config::{ConfigBuilder, ConfigError, ObserverConfig};
pub use event::{Event, EventBuilder, EventContext, SchemaError};
pub use metrics::{UsageReport, UsageSession};
pub use observer::{ListenerId, Observer, ProviderCall};
pub use pricing::{CostEstimate, CostLabel, PricingCatalog, SavingsEstimate};
pub use privacy::{PrivacyMode, RedactionMode};
pub use telemetry::{
    DeliveryError, HttpTransport, RetryPolicy, TelemetryClient, TelemetryCounters,
    TelemetryState, Transport,
};
