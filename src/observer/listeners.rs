//! Local subscribers to built events

use crate::event::Event;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use tracing::debug;

/// Handle returned by [`ListenerRegistry::register`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

type Listener = Arc<dyn Fn(&Event) + Send + Sync>;

/// Synchronous fan-out of events to local consumers.
///
/// A panicking listener is logged and skipped; the others still run.
#[derive(Default)]
pub struct ListenerRegistry {
    listeners: RwLock<Vec<(ListenerId, Listener)>>,
    next_id: AtomicU64,
}

impl ListenerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::SeqCst));
        self.listeners
            .write()
            .unwrap_or_else(|p| p.into_inner())
            .push((id, Arc::new(listener)));
        id
    }

    /// Remove a listener. Returns false if it was not registered.
    pub fn unregister(&self, id: ListenerId) -> bool {
        let mut listeners = self.listeners.write().unwrap_or_else(|p| p.into_inner());
        let before = listeners.len();
        listeners.retain(|(existing, _)| *existing != id);
        listeners.len() != before
    }

    pub fn len(&self) -> usize {
        self.listeners.read().unwrap_or_else(|p| p.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Call every listener with `event`, in registration order
    pub fn notify(&self, event: &Event) {
        // Snapshot so listeners may (un)register while being notified
        let snapshot: Vec<(ListenerId, Listener)> = self
            .listeners
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .clone();

        for (id, listener) in snapshot {
            if panic::catch_unwind(AssertUnwindSafe(|| listener(event))).is_err() {
                debug!(listener = id.0, "Event listener panicked");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::TrackerRegistry;
    use crate::config::ObserverConfig;
    use crate::event::{EventBuilder, EventContext};
    use crate::pricing::PricingCatalog;
    use std::sync::atomic::AtomicUsize;

    fn event() -> Event {
        EventBuilder::new(
            ObserverConfig::default(),
            Arc::new(TrackerRegistry::new()),
            PricingCatalog::bundled(),
        )
        .build(&EventContext::new("openai", "gpt-4o", "hi"))
    }

    #[test]
    fn test_register_and_unregister() {
        let registry = ListenerRegistry::new();
        let calls = Arc::new(AtomicUsize::new(0));

        let counter = Arc::clone(&calls);
        let id = registry.register(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        registry.notify(&event());
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        assert!(registry.unregister(id));
        assert!(!registry.unregister(id));
        registry.notify(&event());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(registry.is_empty());
    }

    #[test]
    fn test_panicking_listener_is_isolated() {
        let registry = ListenerRegistry::new();
        let calls = Arc::new(AtomicUsize::new(0));

        registry.register(|_| panic!("listener failure"));
        let counter = Arc::clone(&calls);
        registry.register(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        registry.notify(&event());
        registry.notify(&event());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(registry.len(), 2);
    }
}
