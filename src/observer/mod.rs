//! Entry point for instrumenting provider calls
//!
//! An [`Observer`] wires the event pipeline, local listeners and telemetry
//! together. Nothing in here can fail the instrumented call: analysis
//! failures are logged at debug level and the provider's result is returned
//! untouched.

mod listeners;

pub use listeners::{ListenerId, ListenerRegistry};

use crate::adapters::context_from_payloads;
use crate::cache::TrackerRegistry;
use crate::config::ObserverConfig;
use crate::event::{Event, EventBuilder, EventContext};
use crate::pricing::PricingCatalog;
use crate::privacy::scrub_sensitive;
use crate::telemetry::{TelemetryClient, TelemetryCounters};
use serde_json::Value;
use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

/// Provider request being observed
#[derive(Debug, Clone)]
pub struct ProviderCall {
    pub provider: String,
    /// Request body as sent to the provider
    pub request: Value,
}

impl ProviderCall {
    pub fn new(provider: impl Into<String>, request: Value) -> Self {
        Self {
            provider: provider.into(),
            request,
        }
    }
}

pub struct Observer {
    builder: EventBuilder,
    listeners: Arc<ListenerRegistry>,
    telemetry: TelemetryClient,
}

impl Observer {
    /// Build an observer from configuration.
    ///
    /// Uses the catalog at `config.pricing_path` when set, the bundled one
    /// otherwise. Telemetry starts only outside local-only mode.
    pub fn new(config: ObserverConfig) -> Self {
        let config = config.normalized();
        let catalog = match &config.pricing_path {
            Some(path) => Arc::new(PricingCatalog::load_or_empty(path)),
            None => PricingCatalog::bundled(),
        };
        let telemetry = TelemetryClient::new(&config);
        Self::with_parts(config, Arc::new(TrackerRegistry::new()), catalog, telemetry)
    }

    /// Observer configured from the environment only
    pub fn from_env() -> Self {
        Self::new(ObserverConfig::from_env())
    }

    pub fn with_parts(
        config: ObserverConfig,
        registry: Arc<TrackerRegistry>,
        catalog: Arc<PricingCatalog>,
        telemetry: TelemetryClient,
    ) -> Self {
        Self {
            builder: EventBuilder::new(config, registry, catalog),
            listeners: Arc::new(ListenerRegistry::new()),
            telemetry,
        }
    }

    pub fn config(&self) -> &ObserverConfig {
        self.builder.config()
    }

    pub fn listeners(&self) -> &Arc<ListenerRegistry> {
        &self.listeners
    }

    pub fn register_listener<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        self.listeners.register(listener)
    }

    pub fn unregister_listener(&self, id: ListenerId) -> bool {
        self.listeners.unregister(id)
    }

    /// Build the event for one call, notify listeners and queue it for telemetry.
    ///
    /// Returns `None` if event construction failed.
    pub fn record(&self, context: &EventContext) -> Option<Event> {
        let event = build_fail_open(context, || self.builder.build(context))?;

        self.listeners.notify(&event);
        self.telemetry.emit(event.clone());
        Some(event)
    }

    /// Run a provider call and record it.
    ///
    /// `response_payload` turns a successful response into its JSON body for
    /// token extraction. Failed calls are not recorded. The call's result is
    /// returned as is, whatever happens during analysis.
    pub async fn observe<F, T, E, U>(
        &self,
        call: ProviderCall,
        future: F,
        response_payload: U,
    ) -> Result<T, E>
    where
        F: Future<Output = Result<T, E>>,
        U: FnOnce(&T) -> Value,
    {
        let started = Instant::now();
        let result = future.await;
        let latency_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

        if let Ok(response) = &result {
            let context = panic::catch_unwind(AssertUnwindSafe(|| {
                let payload = response_payload(response);
                context_from_payloads(&call.provider, &call.request, &payload, latency_ms)
            }));
            match context {
                Ok(context) => {
                    self.record(&context);
                }
                Err(_) => {
                    let fields: Vec<String> = call
                        .request
                        .as_object()
                        .map(|request| scrub_sensitive(request).keys().cloned().collect())
                        .unwrap_or_default();
                    debug!(provider = %call.provider, ?fields, "Payload extraction failed");
                }
            }
        }

        result
    }

    /// Stop telemetry, draining queued events when `drain` is set
    pub async fn shutdown(&self, timeout: Duration, drain: bool) {
        self.telemetry.stop(timeout, drain).await;
    }

    /// Forget all prompt history
    pub fn reset_history(&self) {
        self.builder.registry().reset();
    }

    pub fn telemetry_enabled(&self) -> bool {
        self.telemetry.is_enabled()
    }

    pub fn telemetry_counters(&self) -> TelemetryCounters {
        self.telemetry.counters()
    }
}

/// Run one event construction, turning a panic into `None`
fn build_fail_open<F>(context: &EventContext, build: F) -> Option<Event>
where
    F: FnOnce() -> Event,
{
    match panic::catch_unwind(AssertUnwindSafe(build)) {
        Ok(event) => Some(event),
        Err(_) => {
            debug!(provider = %context.provider, model = %context.model, "Event construction failed");
            None
        }
    }
}
