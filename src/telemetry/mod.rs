//! Background delivery of events to a remote collector
//!
//! The client owns a bounded queue serviced by one worker task. Callers only
//! ever `try_send` onto the queue: a full queue drops the event instead of
//! waiting. The worker delivers each event with a bounded retry policy.
//! Shutdown is bounded by the caller's timeout plus a short grace period.
//!
//! Delivery is best-effort and at-most-once.

mod retry;
mod transport;

pub use retry::RetryPolicy;
pub use transport::{DeliveryError, HttpTransport, Transport};

use crate::config::ObserverConfig;
use crate::event::Event;
use crate::privacy::scrub;
use rand::Rng;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Lifecycle of a [`TelemetryClient`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TelemetryState {
    /// Local-only: no worker, emit is a no-op
    Idle,
    Running,
    /// Stop requested, worker finishing queued work
    Draining,
    Stopped,
}

impl TelemetryState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => TelemetryState::Running,
            2 => TelemetryState::Draining,
            3 => TelemetryState::Stopped,
            _ => TelemetryState::Idle,
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            TelemetryState::Idle => 0,
            TelemetryState::Running => 1,
            TelemetryState::Draining => 2,
            TelemetryState::Stopped => 3,
        }
    }
}

/// Snapshot of delivery counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TelemetryCounters {
    pub sent: u64,
    /// Rejected because the queue was full
    pub dropped: u64,
    /// Retries exhausted
    pub failures: u64,
    pub abandoned_on_shutdown: u64,
    /// Skipped by sampling, never queued
    pub sampled_out: u64,
}

impl TelemetryCounters {
    /// Events that reached a final outcome after being accepted
    pub fn accounted(&self) -> u64 {
        self.sent + self.dropped + self.failures + self.abandoned_on_shutdown
    }
}

#[derive(Debug, Default)]
struct Counters {
    sent: AtomicU64,
    dropped: AtomicU64,
    failures: AtomicU64,
    abandoned: AtomicU64,
    sampled_out: AtomicU64,
    /// Events sitting in the channel
    queued: AtomicU64,
    /// Set while the worker holds an event it has not yet accounted for
    in_flight: AtomicBool,
}

impl Counters {
    fn snapshot(&self) -> TelemetryCounters {
        TelemetryCounters {
            sent: self.sent.load(Ordering::SeqCst),
            dropped: self.dropped.load(Ordering::SeqCst),
            failures: self.failures.load(Ordering::SeqCst),
            abandoned_on_shutdown: self.abandoned.load(Ordering::SeqCst),
            sampled_out: self.sampled_out.load(Ordering::SeqCst),
        }
    }
}

/// Bounded, sampled, retrying telemetry sender
pub struct TelemetryClient {
    sender: RwLock<Option<mpsc::Sender<Event>>>,
    stop_now: watch::Sender<bool>,
    worker: Mutex<Option<JoinHandle<()>>>,
    counters: Arc<Counters>,
    state: Arc<AtomicU8>,
    sampling_rate: f64,
    grace: Duration,
}

impl TelemetryClient {
    /// Create a client from configuration.
    ///
    /// In local-only mode, or when no tokio runtime is available, the client
    /// stays idle and every emit is a no-op.
    pub fn new(config: &ObserverConfig) -> Self {
        if config.local_only() {
            return Self::idle(config);
        }

        let (endpoint, api_key) = match (&config.endpoint, &config.api_key) {
            (Some(endpoint), Some(api_key)) => (endpoint.clone(), api_key.clone()),
            _ => return Self::idle(config),
        };

        match HttpTransport::new(endpoint, api_key, config.timeout()) {
            Ok(transport) => Self::with_transport(config, Arc::new(transport)),
            Err(e) => {
                warn!(endpoint = %scrub(config.endpoint.as_deref()), error = %e, "Telemetry transport unavailable, running local-only");
                Self::idle(config)
            }
        }
    }

    /// Create a running client delivering through `transport`.
    ///
    /// Ignores the enabled flag and credentials in `config`; queue, sampling,
    /// timeout and retry settings still apply.
    pub fn with_transport(config: &ObserverConfig, transport: Arc<dyn Transport>) -> Self {
        Self::with_transport_and_policy(config, transport, RetryPolicy::from_budget(config.retry_budget))
    }

    pub fn with_transport_and_policy(
        config: &ObserverConfig,
        transport: Arc<dyn Transport>,
        policy: RetryPolicy,
    ) -> Self {
        let runtime = match tokio::runtime::Handle::try_current() {
            Ok(handle) => handle,
            Err(_) => {
                warn!("No tokio runtime available, telemetry running local-only");
                return Self::idle(config);
            }
        };

        let (sender, receiver) = mpsc::channel(config.queue_size.max(1));
        let (stop_now, stop_rx) = watch::channel(false);
        let counters = Arc::new(Counters::default());
        let state = Arc::new(AtomicU8::new(TelemetryState::Running.as_u8()));

        let worker = Worker {
            receiver,
            stop_rx,
            transport,
            policy,
            counters: Arc::clone(&counters),
        };
        let handle = runtime.spawn(worker.run());

        info!(
            queue_size = config.queue_size,
            sampling_rate = config.sampling_rate,
            retry_budget = config.retry_budget,
            "Telemetry worker started"
        );

        Self {
            sender: RwLock::new(Some(sender)),
            stop_now,
            worker: Mutex::new(Some(handle)),
            counters,
            state,
            sampling_rate: config.sampling_rate,
            grace: grace_period(config.timeout_seconds),
        }
    }

    fn idle(config: &ObserverConfig) -> Self {
        let (stop_now, _) = watch::channel(false);
        Self {
            sender: RwLock::new(None),
            stop_now,
            worker: Mutex::new(None),
            counters: Arc::new(Counters::default()),
            state: Arc::new(AtomicU8::new(TelemetryState::Idle.as_u8())),
            sampling_rate: config.sampling_rate,
            grace: grace_period(config.timeout_seconds),
        }
    }

    pub fn state(&self) -> TelemetryState {
        TelemetryState::from_u8(self.state.load(Ordering::SeqCst))
    }

    /// True when events can leave the process
    pub fn is_enabled(&self) -> bool {
        self.state() == TelemetryState::Running
    }

    pub fn counters(&self) -> TelemetryCounters {
        self.counters.snapshot()
    }

    /// Queue an event for delivery. Never blocks.
    pub fn emit(&self, event: Event) {
        if self.state() == TelemetryState::Idle {
            return;
        }

        if self.sampling_rate < 1.0 && rand::thread_rng().gen::<f64>() >= self.sampling_rate {
            self.counters.sampled_out.fetch_add(1, Ordering::SeqCst);
            return;
        }

        let guard = self.sender.read().unwrap_or_else(|p| p.into_inner());
        let Some(sender) = guard.as_ref() else {
            // Stopping or stopped
            return;
        };

        self.counters.queued.fetch_add(1, Ordering::SeqCst);
        if let Err(e) = sender.try_send(event) {
            self.counters.queued.fetch_sub(1, Ordering::SeqCst);
            self.counters.dropped.fetch_add(1, Ordering::SeqCst);
            if matches!(e, mpsc::error::TrySendError::Closed(_)) {
                debug!("Telemetry worker gone, event dropped");
            }
        }
    }

    /// Stop the worker.
    ///
    /// With `drain`, queued events are delivered until `timeout` elapses.
    /// Whatever is still queued afterwards is discarded and counted as
    /// abandoned. Returns within `timeout` plus a short grace period; calling
    /// it again is a no-op.
    pub async fn stop(&self, timeout: Duration, drain: bool) {
        let handle = self
            .worker
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .take();
        let Some(mut handle) = handle else {
            if self.state() != TelemetryState::Idle {
                self.set_state(TelemetryState::Stopped);
            }
            return;
        };

        self.set_state(TelemetryState::Draining);
        let deadline = Instant::now() + timeout;

        // Closing the channel lets a draining worker exit once it is empty
        self.sender.write().unwrap_or_else(|p| p.into_inner()).take();
        if !drain {
            let _ = self.stop_now.send(true);
        }

        let joined = tokio::time::timeout_at(deadline, &mut handle).await.is_ok();
        if !joined {
            let _ = self.stop_now.send(true);
            if tokio::time::timeout(self.grace, &mut handle).await.is_err() {
                debug!("Telemetry worker still busy after grace period, aborting");
                handle.abort();
                let _ = handle.await;
            }
        }

        let mut abandoned = self.counters.queued.swap(0, Ordering::SeqCst);
        if self.counters.in_flight.swap(false, Ordering::SeqCst) {
            abandoned += 1;
        }
        if abandoned > 0 {
            self.counters.abandoned.fetch_add(abandoned, Ordering::SeqCst);
        }

        self.set_state(TelemetryState::Stopped);
        let counters = self.counters();
        info!(
            sent = counters.sent,
            dropped = counters.dropped,
            failures = counters.failures,
            abandoned = counters.abandoned_on_shutdown,
            "Telemetry stopped"
        );
    }

    fn set_state(&self, state: TelemetryState) {
        self.state.store(state.as_u8(), Ordering::SeqCst);
    }
}

/// Final join allowance after the caller's timeout
fn grace_period(timeout_seconds: f64) -> Duration {
    let seconds = (timeout_seconds + 0.05).clamp(0.01, 0.2);
    Duration::from_secs_f64(if seconds.is_finite() { seconds } else { 0.2 })
}

struct Worker {
    receiver: mpsc::Receiver<Event>,
    stop_rx: watch::Receiver<bool>,
    transport: Arc<dyn Transport>,
    policy: RetryPolicy,
    counters: Arc<Counters>,
}

impl Worker {
    async fn run(mut self) {
        loop {
            let event = tokio::select! {
                biased;
                _ = stop_requested(&mut self.stop_rx) => break,
                received = self.receiver.recv() => match received {
                    Some(event) => event,
                    None => break,
                },
            };

            self.counters.in_flight.store(true, Ordering::SeqCst);
            self.counters.queued.fetch_sub(1, Ordering::SeqCst);

            let delivered = self.deliver_with_retry(&event).await;

            if self.counters.in_flight.swap(false, Ordering::SeqCst) {
                let counter = if delivered {
                    &self.counters.sent
                } else {
                    &self.counters.failures
                };
                counter.fetch_add(1, Ordering::SeqCst);
            }
        }
    }

    async fn deliver_with_retry(&self, event: &Event) -> bool {
        for attempt in 0..self.policy.attempts {
            match self.transport.deliver(event).await {
                Ok(()) => return true,
                Err(e) => {
                    debug!(attempt = attempt + 1, attempts = self.policy.attempts, error = %e, "Telemetry delivery attempt failed");
                    if !e.is_retryable() {
                        return false;
                    }
                    if self.policy.should_retry(attempt) {
                        tokio::time::sleep(self.policy.delay_for_attempt(attempt)).await;
                    }
                }
            }
        }
        false
    }
}

/// Resolves once an immediate stop is requested
async fn stop_requested(stop_rx: &mut watch::Receiver<bool>) {
    if stop_rx.wait_for(|now| *now).await.is_err() {
        // Client dropped without stopping; keep draining until the channel closes
        std::future::pending::<()>().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::TrackerRegistry;
    use crate::config::ConfigBuilder;
    use crate::event::{serialize_event, EventBuilder, EventContext};
    use crate::pricing::PricingCatalog;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize;

    /// Transport with a fixed outcome and optional per-attempt delay
    struct MockTransport {
        succeed: bool,
        delay: Duration,
        attempts: AtomicUsize,
    }

    impl MockTransport {
        fn new(succeed: bool, delay: Duration) -> Arc<Self> {
            Arc::new(Self {
                succeed,
                delay,
                attempts: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl Transport for MockTransport {
        async fn deliver(&self, _event: &Event) -> Result<(), DeliveryError> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            if self.succeed {
                Ok(())
            } else {
                Err(DeliveryError::Status(500))
            }
        }
    }

    /// Transport that serializes like the HTTP one but never touches the network
    #[derive(Default)]
    struct SerializingTransport {
        attempts: AtomicUsize,
    }

    #[async_trait]
    impl Transport for SerializingTransport {
        async fn deliver(&self, event: &Event) -> Result<(), DeliveryError> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            serialize_event(event)?;
            Ok(())
        }
    }

    fn event() -> Event {
        EventBuilder::new(
            ObserverConfig::default(),
            Arc::new(TrackerRegistry::new()),
            PricingCatalog::bundled(),
        )
        .build(&EventContext::new("openai", "gpt-4o-mini", "hello").with_tokens(3, 4))
    }

    fn fast_policy(budget: u32) -> RetryPolicy {
        RetryPolicy::from_budget(budget).with_base_delay(Duration::from_millis(1))
    }

    #[tokio::test]
    async fn test_local_only_is_idle_noop() {
        let client = TelemetryClient::new(&ObserverConfig::default());
        assert_eq!(client.state(), TelemetryState::Idle);
        assert!(!client.is_enabled());

        client.emit(event());
        client.stop(Duration::from_millis(10), true).await;

        assert_eq!(client.counters(), TelemetryCounters::default());
        assert_eq!(client.state(), TelemetryState::Idle);
    }

    #[tokio::test]
    async fn test_successful_delivery_counts_sent() {
        let config = ConfigBuilder::new().queue_size(16).build();
        let transport = MockTransport::new(true, Duration::ZERO);
        let client = TelemetryClient::with_transport_and_policy(&config, transport.clone(), fast_policy(3));
        assert_eq!(client.state(), TelemetryState::Running);

        for _ in 0..5 {
            client.emit(event());
        }
        client.stop(Duration::from_secs(2), true).await;

        let counters = client.counters();
        assert_eq!(counters.sent, 5);
        assert_eq!(counters.failures, 0);
        assert_eq!(counters.accounted(), 5);
        assert_eq!(transport.attempts.load(Ordering::SeqCst), 5);
        assert_eq!(client.state(), TelemetryState::Stopped);
    }

    #[tokio::test]
    async fn test_failed_delivery_exhausts_retry_budget() {
        let config = ConfigBuilder::new().build();
        let transport = MockTransport::new(false, Duration::ZERO);
        let client = TelemetryClient::with_transport_and_policy(&config, transport.clone(), fast_policy(2));

        client.emit(event());
        client.stop(Duration::from_secs(2), true).await;

        let counters = client.counters();
        assert_eq!(counters.failures, 1);
        assert_eq!(counters.sent, 0);
        assert_eq!(transport.attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_schema_rejection_is_not_retried() {
        let config = ConfigBuilder::new().build();
        let transport = Arc::new(SerializingTransport::default());
        let client = TelemetryClient::with_transport_and_policy(&config, transport.clone(), fast_policy(3));

        let mut invalid = event();
        invalid.token_counts.total += 1;
        client.emit(invalid);
        client.emit(event());
        client.stop(Duration::from_secs(2), true).await;

        let counters = client.counters();
        assert_eq!(counters.failures, 1);
        assert_eq!(counters.sent, 1);
        assert_eq!(transport.attempts.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_overflow_drops_without_blocking() {
        let config = ConfigBuilder::new().queue_size(2).build();
        let transport = MockTransport::new(true, Duration::from_millis(200));
        let client = TelemetryClient::with_transport_and_policy(&config, transport, fast_policy(0));

        let started = std::time::Instant::now();
        for _ in 0..50 {
            client.emit(event());
        }
        assert!(started.elapsed() < Duration::from_millis(100));
        assert!(client.counters().dropped > 0);

        client.stop(Duration::from_millis(50), false).await;
        let counters = client.counters();
        assert_eq!(counters.accounted(), 50);
    }

    #[tokio::test]
    async fn test_stop_is_bounded_and_accounts_for_everything() {
        let config = ConfigBuilder::new()
            .queue_size(8)
            .timeout_seconds(0.1)
            .build();
        let transport = MockTransport::new(true, Duration::from_secs(5));
        let client = TelemetryClient::with_transport_and_policy(&config, transport, fast_policy(0));

        for _ in 0..6 {
            client.emit(event());
        }

        let started = std::time::Instant::now();
        client.stop(Duration::from_millis(100), true).await;
        // timeout + grace + slack
        assert!(started.elapsed() < Duration::from_millis(500));

        let counters = client.counters();
        assert_eq!(counters.sent, 0);
        assert_eq!(counters.abandoned_on_shutdown, 6);
        assert_eq!(counters.accounted(), 6);
    }

    #[tokio::test]
    async fn test_stop_is_idempotent() {
        let config = ConfigBuilder::new().build();
        let client = TelemetryClient::with_transport_and_policy(
            &config,
            MockTransport::new(true, Duration::ZERO),
            fast_policy(0),
        );

        client.emit(event());
        client.stop(Duration::from_secs(1), true).await;
        let first = client.counters();
        client.stop(Duration::from_secs(1), true).await;

        assert_eq!(client.counters(), first);
        assert_eq!(client.state(), TelemetryState::Stopped);
    }

    #[tokio::test]
    async fn test_emit_after_stop_is_ignored() {
        let config = ConfigBuilder::new().build();
        let client = TelemetryClient::with_transport_and_policy(
            &config,
            MockTransport::new(true, Duration::ZERO),
            fast_policy(0),
        );
        client.stop(Duration::from_millis(100), true).await;

        client.emit(event());
        assert_eq!(client.counters().accounted(), 0);
    }

    #[tokio::test]
    async fn test_zero_sampling_skips_everything() {
        let config = ConfigBuilder::new().sampling_rate(0.0).build();
        let client = TelemetryClient::with_transport_and_policy(
            &config,
            MockTransport::new(true, Duration::ZERO),
            fast_policy(0),
        );

        for _ in 0..10 {
            client.emit(event());
        }
        client.stop(Duration::from_millis(100), true).await;

        let counters = client.counters();
        assert_eq!(counters.sampled_out, 10);
        assert_eq!(counters.accounted(), 0);
    }

    #[test]
    fn test_no_runtime_stays_idle() {
        let config = ConfigBuilder::new().build();
        let client = TelemetryClient::with_transport(&config, MockTransport::new(true, Duration::ZERO));
        assert_eq!(client.state(), TelemetryState::Idle);
    }

    #[test]
    fn test_grace_period_is_clamped() {
        assert_eq!(grace_period(2.0), Duration::from_secs_f64(0.2));
        let mid = grace_period(0.1);
        assert!(mid > Duration::from_millis(149) && mid < Duration::from_millis(151));
        assert_eq!(grace_period(-5.0), Duration::from_secs_f64(0.01));
    }
}
