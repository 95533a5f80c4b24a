//! Polling fallback: periodic HTTP refresh when realtime is down.
//!
//! One loop per poller, never overlapping: each tick awaits the fetch
//! inline, and missed ticks are skipped rather than bursted. Results
//! are published as the same canonical events the realtime channel
//! emits, so sessions cannot tell the two paths apart.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::json;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::bus::EventBus;
use crate::events;
use crate::fetch::OrderFetcher;
use crate::models::{DriverLocation, OrderSnapshot};
use crate::status::OrderStatus;

/// Consecutive fetch failures before the degraded event fires.
const DEGRADED_FAILURE_THRESHOLD: u32 = 3;

/// Periodic order refresher. Start/stop are cheap and idempotent;
/// at most one loop runs at a time.
pub struct FallbackPoller {
    bus: Arc<EventBus>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl FallbackPoller {
    pub fn new(bus: Arc<EventBus>) -> Self {
        Self {
            bus,
            task: Mutex::new(None),
        }
    }

    /// Starts polling. A no-op if a loop is already running. The first
    /// fetch happens immediately, not after one interval.
    pub fn start(&self, order_id: &str, interval: Duration, fetcher: Arc<dyn OrderFetcher>) {
        let mut slot = self.task.lock().unwrap();
        if let Some(handle) = slot.as_ref() {
            if !handle.is_finished() {
                log::debug!("[courier-link] Poller already running for {}", order_id);
                return;
            }
        }
        log::info!(
            "[courier-link] Starting fallback polling for {} every {:?}",
            order_id,
            interval
        );
        let bus = Arc::clone(&self.bus);
        let order_id = order_id.to_string();
        *slot = Some(tokio::spawn(poll_loop(order_id, interval, fetcher, bus)));
    }

    /// Stops polling. Safe to call repeatedly or when never started.
    pub fn stop(&self) {
        if let Some(handle) = self.task.lock().unwrap().take() {
            handle.abort();
            log::debug!("[courier-link] Fallback poller stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        self.task
            .lock()
            .unwrap()
            .as_ref()
            .map(|h| !h.is_finished())
            .unwrap_or(false)
    }
}

impl Drop for FallbackPoller {
    fn drop(&mut self) {
        if let Some(handle) = self.task.lock().unwrap().take() {
            handle.abort();
        }
    }
}

async fn poll_loop(
    order_id: String,
    interval: Duration,
    fetcher: Arc<dyn OrderFetcher>,
    bus: Arc<EventBus>,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    let mut last_status: Option<OrderStatus> = None;
    let mut last_location: Option<DriverLocation> = None;
    let mut last_driver_id: Option<String> = None;
    let mut consecutive_failures: u32 = 0;

    loop {
        ticker.tick().await;
        match fetcher.fetch_order(&order_id).await {
            Ok(snapshot) => {
                if consecutive_failures >= DEGRADED_FAILURE_THRESHOLD {
                    log::info!(
                        "[courier-link] Polling for {} recovered after {} failures",
                        order_id,
                        consecutive_failures
                    );
                }
                consecutive_failures = 0;
                let terminal = publish_changes(
                    &bus,
                    &order_id,
                    &snapshot,
                    &mut last_status,
                    &mut last_location,
                    &mut last_driver_id,
                );
                if terminal {
                    log::info!(
                        "[courier-link] Order {} reached a terminal status; polling ends",
                        order_id
                    );
                    return;
                }
            }
            Err(e) => {
                consecutive_failures += 1;
                log::warn!(
                    "[courier-link] Poll for {} failed ({} consecutive): {}",
                    order_id,
                    consecutive_failures,
                    e
                );
                if consecutive_failures == DEGRADED_FAILURE_THRESHOLD {
                    bus.publish(
                        events::CONNECTIVITY_DEGRADED,
                        &json!({
                            "order_id": order_id,
                            "consecutive_failures": consecutive_failures,
                        }),
                    );
                }
            }
        }
    }
}

/// Publishes whatever changed since the previous successful poll.
/// Returns true once the order hits a terminal status.
fn publish_changes(
    bus: &EventBus,
    order_id: &str,
    snapshot: &OrderSnapshot,
    last_status: &mut Option<OrderStatus>,
    last_location: &mut Option<DriverLocation>,
    last_driver_id: &mut Option<String>,
) -> bool {
    let mut terminal = false;

    match snapshot.canonical_status() {
        Some(status) => {
            if *last_status != Some(status) {
                *last_status = Some(status);
                bus.publish(
                    events::ORDER_STATUS_UPDATE,
                    &json!({
                        "order_id": order_id,
                        "status": status.as_str(),
                        "message": snapshot.message,
                        "estimated_delivery_minutes": snapshot.estimated_delivery_minutes,
                    }),
                );
            }
            terminal = status.is_terminal();
        }
        None => {
            log::warn!(
                "[courier-link] Poll for {} returned unrecognized status '{}'",
                order_id,
                snapshot.status
            );
        }
    }

    if let Some(location) = snapshot.location() {
        if *last_location != Some(location) {
            *last_location = Some(location);
            bus.publish(
                events::DRIVER_LOCATION_UPDATE,
                &json!({
                    "order_id": order_id,
                    "latitude": location.latitude,
                    "longitude": location.longitude,
                }),
            );
        }
    }

    if let Some(driver) = &snapshot.driver {
        if last_driver_id.as_deref() != Some(driver.id.as_str()) {
            *last_driver_id = Some(driver.id.clone());
            bus.publish(
                events::DRIVER_ASSIGNED,
                &json!({"order_id": order_id, "driver": driver}),
            );
        }
    }

    terminal
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{CourierLinkError, Result};
    use crate::models::Driver;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Returns queued snapshots in order, then repeats the last one;
    /// an empty queue means every call fails.
    struct ScriptedFetcher {
        calls: AtomicUsize,
        script: Mutex<VecDeque<Result<OrderSnapshot>>>,
        repeat_last: Mutex<Option<OrderSnapshot>>,
    }

    impl ScriptedFetcher {
        fn new(script: Vec<Result<OrderSnapshot>>) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                script: Mutex::new(script.into_iter().collect()),
                repeat_last: Mutex::new(None),
            })
        }

        fn call_count(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl OrderFetcher for ScriptedFetcher {
        async fn fetch_order(&self, _order_id: &str) -> Result<OrderSnapshot> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match self.script.lock().unwrap().pop_front() {
                Some(Ok(snapshot)) => {
                    *self.repeat_last.lock().unwrap() = Some(snapshot.clone());
                    Ok(snapshot)
                }
                Some(Err(e)) => Err(e),
                None => match self.repeat_last.lock().unwrap().clone() {
                    Some(snapshot) => Ok(snapshot),
                    None => Err(CourierLinkError::Fetch("scripted failure".to_string())),
                },
            }
        }
    }

    fn snapshot(status: &str) -> OrderSnapshot {
        OrderSnapshot {
            status: status.to_string(),
            driver: None,
            driver_location: None,
            estimated_delivery_minutes: None,
            message: None,
        }
    }

    fn fetch_err() -> Result<OrderSnapshot> {
        Err(CourierLinkError::Fetch("scripted failure".to_string()))
    }

    #[tokio::test]
    async fn test_publishes_only_on_change() {
        let bus = Arc::new(EventBus::new());
        let updates = Arc::new(AtomicUsize::new(0));
        let u = Arc::clone(&updates);
        bus.subscribe(events::ORDER_STATUS_UPDATE, move |_| {
            u.fetch_add(1, Ordering::SeqCst);
        });

        let fetcher = ScriptedFetcher::new(vec![
            Ok(snapshot("preparing")),
            Ok(snapshot("preparing")),
            Ok(snapshot("ready")),
        ]);
        let poller = FallbackPoller::new(Arc::clone(&bus));
        poller.start("42", Duration::from_millis(20), fetcher.clone());

        tokio::time::sleep(Duration::from_millis(150)).await;
        poller.stop();

        // preparing once, ready once; the duplicate poll emits nothing.
        assert_eq!(updates.load(Ordering::SeqCst), 2);
        assert!(fetcher.call_count() >= 3);
    }

    #[tokio::test]
    async fn test_degraded_after_three_consecutive_failures() {
        let bus = Arc::new(EventBus::new());
        let degraded = Arc::new(AtomicUsize::new(0));
        let d = Arc::clone(&degraded);
        bus.subscribe(events::CONNECTIVITY_DEGRADED, move |payload| {
            assert_eq!(payload["consecutive_failures"], 3);
            d.fetch_add(1, Ordering::SeqCst);
        });

        let fetcher = ScriptedFetcher::new(vec![]);
        let poller = FallbackPoller::new(Arc::clone(&bus));
        poller.start("42", Duration::from_millis(10), fetcher);

        tokio::time::sleep(Duration::from_millis(120)).await;
        poller.stop();

        // Fired exactly once when the streak hit the threshold.
        assert_eq!(degraded.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_success_resets_failure_streak() {
        let bus = Arc::new(EventBus::new());
        let degraded = Arc::new(AtomicUsize::new(0));
        let d = Arc::clone(&degraded);
        bus.subscribe(events::CONNECTIVITY_DEGRADED, move |_| {
            d.fetch_add(1, Ordering::SeqCst);
        });

        // Two failures, a success, two more failures: never three in a row.
        let fetcher = ScriptedFetcher::new(vec![
            fetch_err(),
            fetch_err(),
            Ok(snapshot("preparing")),
        ]);
        let poller = FallbackPoller::new(Arc::clone(&bus));
        poller.start("42", Duration::from_millis(10), fetcher.clone());

        tokio::time::sleep(Duration::from_millis(80)).await;
        poller.stop();
        assert_eq!(degraded.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_start_twice_runs_one_loop() {
        let bus = Arc::new(EventBus::new());
        let fetcher = ScriptedFetcher::new(vec![Ok(snapshot("preparing"))]);
        let poller = FallbackPoller::new(bus);

        poller.start("42", Duration::from_millis(20), fetcher.clone());
        poller.start("42", Duration::from_millis(20), fetcher.clone());
        assert!(poller.is_running());

        tokio::time::sleep(Duration::from_millis(110)).await;
        poller.stop();

        // A second loop would roughly double the call count.
        assert!(fetcher.call_count() <= 7);
    }

    #[tokio::test]
    async fn test_stop_is_idempotent() {
        let bus = Arc::new(EventBus::new());
        let poller = FallbackPoller::new(bus);
        poller.stop();
        assert!(!poller.is_running());

        let fetcher = ScriptedFetcher::new(vec![Ok(snapshot("pending"))]);
        poller.start("42", Duration::from_millis(20), fetcher);
        poller.stop();
        poller.stop();
        assert!(!poller.is_running());
    }

    #[tokio::test]
    async fn test_terminal_status_ends_the_loop() {
        let bus = Arc::new(EventBus::new());
        let fetcher = ScriptedFetcher::new(vec![Ok(snapshot("delivered"))]);
        let poller = FallbackPoller::new(bus);
        poller.start("42", Duration::from_millis(10), fetcher.clone());

        tokio::time::sleep(Duration::from_millis(80)).await;
        assert!(!poller.is_running());
        // One fetch, then the loop exited on its own.
        assert_eq!(fetcher.call_count(), 1);
    }

    #[tokio::test]
    async fn test_driver_and_location_changes_published() {
        let bus = Arc::new(EventBus::new());
        let locations = Arc::new(AtomicUsize::new(0));
        let drivers = Arc::new(AtomicUsize::new(0));
        let l = Arc::clone(&locations);
        let dr = Arc::clone(&drivers);
        bus.subscribe(events::DRIVER_LOCATION_UPDATE, move |_| {
            l.fetch_add(1, Ordering::SeqCst);
        });
        bus.subscribe(events::DRIVER_ASSIGNED, move |payload| {
            assert_eq!(payload["driver"]["id"], "drv-1");
            dr.fetch_add(1, Ordering::SeqCst);
        });

        let mut with_driver = snapshot("picked_up");
        with_driver.driver = Some(Driver {
            id: "drv-1".to_string(),
            name: None,
            phone: None,
            vehicle: None,
        });
        with_driver.driver_location = Some(serde_json::json!({"lat": 9.03, "lng": 38.75}));

        let mut moved = with_driver.clone();
        moved.driver_location = Some(serde_json::json!({"lat": 9.04, "lng": 38.75}));

        let fetcher = ScriptedFetcher::new(vec![Ok(with_driver), Ok(moved)]);
        let poller = FallbackPoller::new(Arc::clone(&bus));
        poller.start("42", Duration::from_millis(15), fetcher);

        tokio::time::sleep(Duration::from_millis(100)).await;
        poller.stop();

        assert_eq!(locations.load(Ordering::SeqCst), 2);
        assert_eq!(drivers.load(Ordering::SeqCst), 1);
    }
}
