//! Per-model prefix history and similarity scoring

use super::round_to;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

/// Fraction of matching leading characters between two canonical prompts.
///
/// Returns 0.0 when either side is empty, otherwise the common prefix length
/// divided by the shorter length, rounded to 4 decimals.
pub fn prefix_similarity_score(previous: &str, current: &str) -> f64 {
    if previous.is_empty() || current.is_empty() {
        return 0.0;
    }
    let shortest = previous.chars().count().min(current.chars().count());
    let common = previous
        .chars()
        .zip(current.chars())
        .take_while(|(a, b)| a == b)
        .count();
    round_to(common as f64 / shortest as f64, 4)
}

/// Last canonical prompt seen for a model
#[derive(Debug, Clone)]
struct PrefixEntry {
    canonical: String,
    /// Logical clock value of the last touch
    last_touched: u64,
}

#[derive(Debug, Default)]
struct TrackerState {
    entries: HashMap<String, PrefixEntry>,
    clock: u64,
}

/// Remembers the most recent canonical prompt for up to `capacity` models.
///
/// The compare-then-store step runs under one lock, so concurrent calls for
/// the same model never lose an update or see a torn score.
#[derive(Debug)]
pub struct PrefixTracker {
    state: Mutex<TrackerState>,
    capacity: usize,
}

impl PrefixTracker {
    pub fn new(capacity: usize) -> Self {
        Self {
            state: Mutex::new(TrackerState::default()),
            capacity: capacity.max(1),
        }
    }

    fn lock(&self) -> MutexGuard<'_, TrackerState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Score `canonical` against the previous prompt for `model`, then store it
    /// as the model's current prompt.
    pub fn similarity(&self, model: &str, canonical: &str) -> f64 {
        let previous = {
            let mut state = self.lock();
            state.clock += 1;
            let now = state.clock;

            let previous = state.entries.insert(
                model.to_string(),
                PrefixEntry {
                    canonical: canonical.to_string(),
                    last_touched: now,
                },
            );

            if state.entries.len() > self.capacity {
                Self::evict_lru(&mut state.entries);
            }

            previous.map(|entry| entry.canonical).unwrap_or_default()
        };

        prefix_similarity_score(&previous, canonical)
    }

    /// Evict the least recently touched model
    fn evict_lru(entries: &mut HashMap<String, PrefixEntry>) {
        let oldest = entries
            .iter()
            .min_by_key(|(_, entry)| entry.last_touched)
            .map(|(model, _)| model.clone());

        if let Some(model) = oldest {
            entries.remove(&model);
        }
    }

    /// Number of models currently tracked
    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Whether a prompt is currently remembered for `model`
    pub fn contains(&self, model: &str) -> bool {
        self.lock().entries.contains_key(model)
    }

    /// Forget every tracked model
    pub fn clear(&self) {
        let mut state = self.lock();
        state.entries.clear();
        state.clock = 0;
    }
}

/// Prefix trackers keyed by their configured capacity.
///
/// Trackers are created lazily on first use. [`TrackerRegistry::reset`]
/// discards all of them, which isolates tests and session lifecycles.
#[derive(Debug, Default)]
pub struct TrackerRegistry {
    trackers: Mutex<HashMap<usize, Arc<PrefixTracker>>>,
}

impl TrackerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<usize, Arc<PrefixTracker>>> {
        self.trackers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Get or create the tracker for a history size
    pub fn tracker(&self, history_size: usize) -> Arc<PrefixTracker> {
        let capacity = history_size.max(1);
        self.lock()
            .entry(capacity)
            .or_insert_with(|| Arc::new(PrefixTracker::new(capacity)))
            .clone()
    }

    /// Drop every tracker
    pub fn reset(&self) {
        self.lock().clear();
    }

    /// Number of trackers created since the last reset
    pub fn tracker_count(&self) -> usize {
        self.lock().len()
    }
}
