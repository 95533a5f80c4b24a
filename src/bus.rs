//! In-process event bus.
//!
//! A small synchronous pub/sub registry: both sync paths (realtime
//! channel and fallback poller) publish their normalized events here,
//! and tracking sessions subscribe. Dispatch is synchronous on the
//! publisher's task, in subscriber insertion order, and a panicking
//! subscriber never takes down the dispatch loop or its siblings.

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use serde_json::Value;
use std::sync::Arc;

type Handler = Arc<dyn Fn(&Value) + Send + Sync>;

struct Entry {
    id: u64,
    handler: Handler,
}

/// Opaque token identifying one subscription. Unsubscribing requires
/// the handle, so one subscriber can never detach another's callback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionHandle {
    event: String,
    id: u64,
}

/// Synchronous pub/sub registry keyed by event name.
pub struct EventBus {
    next_id: AtomicU64,
    topics: Mutex<HashMap<String, Vec<Entry>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            topics: Mutex::new(HashMap::new()),
        }
    }

    /// Registers a callback for an event name. The same callback logic
    /// may be registered any number of times; each registration gets
    /// its own handle.
    pub fn subscribe(
        &self,
        event: &str,
        handler: impl Fn(&Value) + Send + Sync + 'static,
    ) -> SubscriptionHandle {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let mut topics = self.topics.lock().unwrap();
        topics.entry(event.to_string()).or_default().push(Entry {
            id,
            handler: Arc::new(handler),
        });
        SubscriptionHandle {
            event: event.to_string(),
            id,
        }
    }

    /// Removes one subscription. Unknown or already-removed handles
    /// are a no-op.
    pub fn unsubscribe(&self, handle: &SubscriptionHandle) {
        let mut topics = self.topics.lock().unwrap();
        if let Some(entries) = topics.get_mut(&handle.event) {
            entries.retain(|e| e.id != handle.id);
            if entries.is_empty() {
                topics.remove(&handle.event);
            }
        }
    }

    /// Delivers `payload` to every current subscriber of `event`, in
    /// registration order, on the calling task.
    ///
    /// The subscriber list is snapshotted up front, then each entry is
    /// re-checked against the live registry before invocation, so a
    /// callback that unsubscribes itself (or a later entry) during
    /// dispatch is honored. Handler panics are caught and logged.
    pub fn publish(&self, event: &str, payload: &Value) {
        let snapshot: Vec<(u64, Handler)> = {
            let topics = self.topics.lock().unwrap();
            match topics.get(event) {
                Some(entries) => entries
                    .iter()
                    .map(|e| (e.id, Arc::clone(&e.handler)))
                    .collect(),
                None => return,
            }
        };

        for (id, handler) in snapshot {
            let still_registered = {
                let topics = self.topics.lock().unwrap();
                topics
                    .get(event)
                    .map(|entries| entries.iter().any(|e| e.id == id))
                    .unwrap_or(false)
            };
            if !still_registered {
                continue;
            }
            if catch_unwind(AssertUnwindSafe(|| handler(payload))).is_err() {
                log::error!(
                    "[courier-link] Subscriber for '{}' panicked; continuing dispatch",
                    event
                );
            }
        }
    }

    /// Number of live subscriptions for an event.
    pub fn subscriber_count(&self, event: &str) -> usize {
        self.topics
            .lock()
            .unwrap()
            .get(event)
            .map(|e| e.len())
            .unwrap_or(0)
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
