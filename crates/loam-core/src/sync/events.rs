//! "Synced" listeners.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use super::SyncSummary;

type Callback = Arc<dyn Fn(&SyncSummary) + Send + Sync>;

#[derive(Default)]
struct Listeners {
    next_id: u64,
    entries: Vec<(u64, Callback)>,
}

fn lock(listeners: &Mutex<Listeners>) -> MutexGuard<'_, Listeners> {
    listeners.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Ordered set of callbacks fired after each successful pass.
///
/// Emission iterates a snapshot and never holds the lock while a callback
/// runs, so callbacks may subscribe or unsubscribe (themselves included).
#[derive(Default, Clone)]
pub struct ListenerRegistry {
    inner: Arc<Mutex<Listeners>>,
}

impl std::fmt::Debug for ListenerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ListenerRegistry")
            .field("listeners", &self.len())
            .finish()
    }
}

impl ListenerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&SyncSummary) + Send + Sync + 'static,
    {
        let mut listeners = lock(&self.inner);
        listeners.next_id += 1;
        let id = listeners.next_id;
        listeners.entries.push((id, Arc::new(callback)));
        Subscription {
            id,
            registry: Arc::downgrade(&self.inner),
        }
    }

    pub fn len(&self) -> usize {
        lock(&self.inner).entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Call every listener; a panicking listener is logged and skipped
    pub fn emit(&self, summary: &SyncSummary) {
        let snapshot: Vec<(u64, Callback)> = lock(&self.inner).entries.clone();

        for (id, callback) in snapshot {
            // Skip listeners removed by an earlier callback in this emission
            let still_registered = lock(&self.inner)
                .entries
                .iter()
                .any(|(entry_id, _)| *entry_id == id);
            if !still_registered {
                continue;
            }

            if catch_unwind(AssertUnwindSafe(|| callback(summary))).is_err() {
                tracing::error!(listener = id, "Sync listener panicked");
            }
        }
    }

    fn remove(inner: &Mutex<Listeners>, id: u64) {
        lock(inner).entries.retain(|(entry_id, _)| *entry_id != id);
    }
}

/// Handle returned by [`ListenerRegistry::subscribe`]; dropping it unsubscribes.
#[must_use = "dropping a Subscription unsubscribes the listener immediately"]
#[derive(Debug)]
pub struct Subscription {
    id: u64,
    registry: Weak<Mutex<Listeners>>,
}

impl Subscription {
    pub fn unsubscribe(self) {
        drop(self);
    }

    /// Keep the listener registered for the registry's whole lifetime
    pub fn detach(mut self) {
        self.registry = Weak::new();
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(inner) = self.registry.upgrade() {
            ListenerRegistry::remove(&inner, self.id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn summary() -> SyncSummary {
        SyncSummary {
            uploaded: 1,
            downloaded: 2,
            deleted: 3,
        }
    }

    #[test]
    fn listeners_fire_in_registration_order() {
        let registry = ListenerRegistry::new();
        let calls = Arc::new(Mutex::new(Vec::new()));

        let first = {
            let calls = Arc::clone(&calls);
            registry.subscribe(move |_| calls.lock().unwrap().push("first"))
        };
        let second = {
            let calls = Arc::clone(&calls);
            registry.subscribe(move |s| {
                assert_eq!(s.downloaded, 2);
                calls.lock().unwrap().push("second");
            })
        };

        registry.emit(&summary());
        assert_eq!(*calls.lock().unwrap(), vec!["first", "second"]);

        drop(first);
        second.unsubscribe();
        assert!(registry.is_empty());
    }

    #[test]
    fn panicking_listener_does_not_stop_others() {
        let registry = ListenerRegistry::new();
        let hits = Arc::new(AtomicUsize::new(0));

        let _boom = registry.subscribe(|_| panic!("listener failure"));
        let _counter = {
            let hits = Arc::clone(&hits);
            registry.subscribe(move |_| {
                hits.fetch_add(1, Ordering::SeqCst);
            })
        };

        registry.emit(&summary());
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn listener_can_remove_itself_during_emission() {
        let registry = ListenerRegistry::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let slot: Arc<Mutex<Option<Subscription>>> = Arc::new(Mutex::new(None));

        let subscription = {
            let slot = Arc::clone(&slot);
            let hits = Arc::clone(&hits);
            registry.subscribe(move |_| {
                hits.fetch_add(1, Ordering::SeqCst);
                let own = slot.lock().unwrap().take();
                drop(own);
            })
        };
        *slot.lock().unwrap() = Some(subscription);

        let tail_hits = Arc::new(AtomicUsize::new(0));
        let _tail = {
            let tail_hits = Arc::clone(&tail_hits);
            registry.subscribe(move |_| {
                tail_hits.fetch_add(1, Ordering::SeqCst);
            })
        };

        registry.emit(&summary());
        registry.emit(&summary());
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert_eq!(tail_hits.load(Ordering::SeqCst), 2);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn detached_listener_outlives_handle() {
        let registry = ListenerRegistry::new();
        registry.subscribe(|_| {}).detach();
        assert_eq!(registry.len(), 1);
    }
}
