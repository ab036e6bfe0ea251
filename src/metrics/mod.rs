//! Local usage aggregation over observed events

use crate::cache::round_to;
use crate::event::Event;
use crate::observer::{ListenerId, ListenerRegistry};
use serde::Serialize;
use serde_json::Value;
use std::collections::{BTreeSet, HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

/// Events kept in memory by default
pub const DEFAULT_RETENTION: usize = 2000;
const USD_DECIMALS: i32 = 8;
const TOP_BREAKERS_LIMIT: usize = 5;
const UNKNOWN: &str = "unknown";

/// Running totals for one slice of traffic
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Aggregate {
    pub events: u64,
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub cost_usd: f64,
    pub savings_estimated_usd: f64,
    pub savings_low_usd: f64,
    pub savings_high_usd: f64,
}

impl Aggregate {
    fn add(&mut self, event: &Event) {
        self.events += 1;
        self.prompt_tokens += event.token_counts.prompt;
        self.completion_tokens += event.token_counts.completion;
        self.cost_usd += event.cost_estimate_usd.unwrap_or(0.0);
        self.savings_estimated_usd += event.cache_savings.estimated_usd;
        self.savings_low_usd += event.cache_savings.low_usd;
        self.savings_high_usd += event.cache_savings.high_usd;
    }

    fn rounded(&self) -> Self {
        Self {
            cost_usd: round_to(self.cost_usd, USD_DECIMALS),
            savings_estimated_usd: round_to(self.savings_estimated_usd, USD_DECIMALS),
            savings_low_usd: round_to(self.savings_low_usd, USD_DECIMALS),
            savings_high_usd: round_to(self.savings_high_usd, USD_DECIMALS),
            ..self.clone()
        }
    }
}

/// Aggregated usage state
#[derive(Debug, Clone)]
pub struct UsageMetrics {
    retention: usize,
    events: VecDeque<Event>,
    total: Aggregate,
    providers: HashMap<String, Aggregate>,
    models: HashMap<String, Aggregate>,
    breaker_counts: HashMap<String, u64>,
    similarity_sum: f64,
    boundary_present: u64,
    unknown_model: u64,
    priced: u64,
    pricing_versions: BTreeSet<String>,
}

fn key_or_unknown(value: &str) -> String {
    if value.is_empty() {
        UNKNOWN.to_string()
    } else {
        value.to_string()
    }
}

impl UsageMetrics {
    pub fn new(retention: usize) -> Self {
        Self {
            retention: retention.max(1),
            events: VecDeque::new(),
            total: Aggregate::default(),
            providers: HashMap::new(),
            models: HashMap::new(),
            breaker_counts: HashMap::new(),
            similarity_sum: 0.0,
            boundary_present: 0,
            unknown_model: 0,
            priced: 0,
            pricing_versions: BTreeSet::new(),
        }
    }

    pub fn record(&mut self, event: &Event) {
        if self.events.len() == self.retention {
            self.events.pop_front();
        }
        self.events.push_back(event.clone());

        self.total.add(event);
        self.providers
            .entry(key_or_unknown(&event.provider))
            .or_default()
            .add(event);
        self.models
            .entry(key_or_unknown(&event.model))
            .or_default()
            .add(event);

        if event.cost_estimate_usd.is_some() {
            self.priced += 1;
        } else {
            self.unknown_model += 1;
        }

        self.similarity_sum += event.prefix_similarity;
        if event.cache_boundary.present {
            self.boundary_present += 1;
        }

        for breaker in &event.cache_breakers {
            *self
                .breaker_counts
                .entry(breaker.category.as_str().to_string())
                .or_default() += 1;
        }

        if !event.pricing.version.is_empty() {
            self.pricing_versions.insert(event.pricing.version.clone());
        }
    }

    pub fn event_count(&self) -> u64 {
        self.total.events
    }

    pub fn retained(&self) -> impl Iterator<Item = &Event> {
        self.events.iter()
    }

    pub fn report(&self) -> UsageReport {
        let count = self.total.events;
        let rate = |n: f64| if count == 0 { 0.0 } else { round_to(n / count as f64, 4) };

        let mut top_breakers: Vec<BreakerCount> = self
            .breaker_counts
            .iter()
            .map(|(category, count)| BreakerCount {
                category: category.clone(),
                count: *count,
            })
            .collect();
        top_breakers.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.category.cmp(&b.category)));
        top_breakers.truncate(TOP_BREAKERS_LIMIT);

        UsageReport {
            event_count: count,
            retained_event_count: self.events.len(),
            retention_limit: self.retention,
            totals: self.total.rounded(),
            providers: breakdown(&self.providers),
            models: breakdown(&self.models),
            cache: CacheReport {
                average_prefix_similarity: rate(self.similarity_sum),
                boundary_present_rate: rate(self.boundary_present as f64),
                top_cache_breakers: top_breakers,
            },
            costing: CostingReport {
                unknown_model_count: self.unknown_model,
                priced_event_count: self.priced,
                pricing_versions_seen: self.pricing_versions.iter().cloned().collect(),
            },
        }
    }
}

/// Most expensive first, then by name
fn breakdown(values: &HashMap<String, Aggregate>) -> Vec<NamedAggregate> {
    let mut entries: Vec<NamedAggregate> = values
        .iter()
        .map(|(name, aggregate)| NamedAggregate {
            name: name.clone(),
            stats: aggregate.rounded(),
        })
        .collect();
    entries.sort_by(|a, b| {
        b.stats
            .cost_usd
            .total_cmp(&a.stats.cost_usd)
            .then_with(|| a.name.cmp(&b.name))
    });
    entries
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NamedAggregate {
    pub name: String,
    #[serde(flatten)]
    pub stats: Aggregate,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BreakerCount {
    pub category: String,
    pub count: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CacheReport {
    pub average_prefix_similarity: f64,
    pub boundary_present_rate: f64,
    pub top_cache_breakers: Vec<BreakerCount>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CostingReport {
    pub unknown_model_count: u64,
    pub priced_event_count: u64,
    pub pricing_versions_seen: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UsageReport {
    pub event_count: u64,
    pub retained_event_count: usize,
    pub retention_limit: usize,
    pub totals: Aggregate,
    pub providers: Vec<NamedAggregate>,
    pub models: Vec<NamedAggregate>,
    pub cache: CacheReport,
    pub costing: CostingReport,
}

impl std::fmt::Display for UsageReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "=== Usage Report ===")?;
        writeln!(
            f,
            "Events: {} (retained {})",
            self.event_count, self.retained_event_count
        )?;
        writeln!(f, "Prompt tokens: {}", self.totals.prompt_tokens)?;
        writeln!(f, "Completion tokens: {}", self.totals.completion_tokens)?;
        writeln!(f, "Estimated cost: ${:.8}", self.totals.cost_usd)?;
        writeln!(
            f,
            "Estimated cache savings: ${:.8}",
            self.totals.savings_estimated_usd
        )?;
        writeln!(
            f,
            "Savings range: ${:.8} to ${:.8}",
            self.totals.savings_low_usd, self.totals.savings_high_usd
        )?;

        writeln!(f)?;
        writeln!(f, "=== Cache ===")?;
        writeln!(
            f,
            "Average prefix similarity: {}",
            self.cache.average_prefix_similarity
        )?;
        writeln!(
            f,
            "Cache boundary present rate: {}",
            self.cache.boundary_present_rate
        )?;
        for breaker in &self.cache.top_cache_breakers {
            writeln!(f, "  {}: {}", breaker.category, breaker.count)?;
        }

        writeln!(f)?;
        writeln!(f, "=== Costing ===")?;
        writeln!(f, "Priced events: {}", self.costing.priced_event_count)?;
        writeln!(
            f,
            "Unknown model events: {}",
            self.costing.unknown_model_count
        )?;

        for (title, entries) in [("Providers", &self.providers), ("Models", &self.models)] {
            if entries.is_empty() {
                continue;
            }
            writeln!(f)?;
            writeln!(f, "=== {title} ===")?;
            for entry in entries {
                writeln!(
                    f,
                    "{}: events={}, cost=${:.8}, savings=${:.8}",
                    entry.name,
                    entry.stats.events,
                    entry.stats.cost_usd,
                    entry.stats.savings_estimated_usd
                )?;
            }
        }
        Ok(())
    }
}

/// Thread-safe usage session fed by an observer's listeners
pub struct UsageSession {
    inner: Arc<Mutex<UsageMetrics>>,
    listeners: Arc<ListenerRegistry>,
    listener_id: Mutex<Option<ListenerId>>,
}

impl UsageSession {
    /// Start aggregating events delivered to `listeners`
    pub fn start(listeners: &Arc<ListenerRegistry>) -> Self {
        Self::with_retention(listeners, DEFAULT_RETENTION)
    }

    pub fn with_retention(listeners: &Arc<ListenerRegistry>, retention: usize) -> Self {
        let inner = Arc::new(Mutex::new(UsageMetrics::new(retention)));
        let sink = Arc::clone(&inner);
        let id = listeners.register(move |event| {
            sink.lock()
                .unwrap_or_else(|p| p.into_inner())
                .record(event);
        });

        Self {
            inner,
            listeners: Arc::clone(listeners),
            listener_id: Mutex::new(Some(id)),
        }
    }

    /// Record a serialized event. Breakers may use the legacy `type` key.
    pub fn record_json(&self, value: &Value) -> Result<(), serde_json::Error> {
        let event: Event = serde_json::from_value(value.clone())?;
        self.inner
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .record(&event);
        Ok(())
    }

    pub fn report(&self) -> UsageReport {
        self.inner
            .lock()
            .map(|m| m.report())
            .unwrap_or_else(|p| p.into_inner().report())
    }

    /// Write the JSON report to `path`, replacing it atomically
    pub fn save_json(&self, path: &Path) -> std::io::Result<PathBuf> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = serde_json::to_string_pretty(&self.report())?;

        let mut temp = path.as_os_str().to_owned();
        temp.push(".tmp");
        let temp = PathBuf::from(temp);
        std::fs::write(&temp, content + "\n")?;
        std::fs::rename(&temp, path)?;
        Ok(path.to_path_buf())
    }

    /// Stop receiving events. Idempotent.
    pub fn close(&self) {
        let id = self
            .listener_id
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .take();
        if let Some(id) = id {
            self.listeners.unregister(id);
        }
    }
}

impl Drop for UsageSession {
    fn drop(&mut self) {
        self.close();
    }
}
