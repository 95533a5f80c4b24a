//! Per-order tracking session.
//!
//! A [`TrackingSession`] subscribes to the canonical events for one
//! order, decides which sync path is active (realtime vs polling),
//! and applies every update through a single routine that enforces
//! the lifecycle rules: terminal statuses absorb everything, stale or
//! regressive statuses are dropped, and observers only hear about
//! actual changes. Because both the channel and the poller publish
//! the same events on the same bus, the apply routine is the one
//! ordering point regardless of where data came from.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::SystemTime;

use serde_json::Value;
use tokio::task::JoinHandle;

use crate::bus::{EventBus, SubscriptionHandle};
use crate::channel::RealtimeChannel;
use crate::credentials::CredentialStore;
use crate::error::Result;
use crate::events;
use crate::fetch::OrderFetcher;
use crate::handlers::{ConnectionError, DisconnectReason, TrackingHandlers};
use crate::models::{Driver, DriverLocation, OrderSnapshot, StatusUpdate, TrackingMode};
use crate::poller::FallbackPoller;
use crate::protocol;
use crate::status::OrderStatus;
use crate::timeouts::CourierLinkTimeouts;

struct SessionState {
    mode: TrackingMode,
    last_status: Option<OrderStatus>,
    last_location: Option<DriverLocation>,
    last_driver_id: Option<String>,
    last_synced_at: Option<SystemTime>,
}

struct SessionInner {
    order_id: String,
    room: String,
    bus: Arc<EventBus>,
    channel: Arc<RealtimeChannel>,
    poller: FallbackPoller,
    fetcher: Arc<dyn OrderFetcher>,
    handlers: TrackingHandlers,
    timeouts: CourierLinkTimeouts,
    state: Mutex<SessionState>,
    bus_subs: Mutex<Vec<SubscriptionHandle>>,
    guards: Mutex<Vec<JoinHandle<()>>>,
    stopped: AtomicBool,
    /// True when no realtime credential was available at start; a
    /// degraded poll path is then a dead end, not a temporary dip.
    credential_missing: bool,
    /// Client-level registry of orders with live sessions.
    active_orders: Arc<Mutex<HashSet<String>>>,
}

/// Tracks one order until it is stopped or reaches a terminal status.
///
/// Dropping the session stops tracking.
pub struct TrackingSession {
    inner: Arc<SessionInner>,
}

impl std::fmt::Debug for TrackingSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TrackingSession")
            .field("order_id", &self.inner.order_id)
            .finish_non_exhaustive()
    }
}

impl TrackingSession {
    #[allow(clippy::too_many_arguments)]
    pub(crate) async fn start(
        order_id: String,
        bus: Arc<EventBus>,
        channel: Arc<RealtimeChannel>,
        fetcher: Arc<dyn OrderFetcher>,
        credential_store: Arc<dyn CredentialStore>,
        credential_key: String,
        timeouts: CourierLinkTimeouts,
        handlers: TrackingHandlers,
        active_orders: Arc<Mutex<HashSet<String>>>,
    ) -> Result<TrackingSession> {
        let credential = match credential_store.get(&credential_key).await {
            Ok(found) => found,
            Err(e) => {
                log::warn!("[courier-link] Credential lookup failed: {}", e);
                None
            }
        };

        let inner = Arc::new(SessionInner {
            room: protocol::order_room(&order_id),
            order_id,
            poller: FallbackPoller::new(Arc::clone(&bus)),
            bus,
            channel,
            fetcher,
            handlers,
            timeouts,
            state: Mutex::new(SessionState {
                mode: TrackingMode::Uninitialized,
                last_status: None,
                last_location: None,
                last_driver_id: None,
                last_synced_at: None,
            }),
            bus_subs: Mutex::new(Vec::new()),
            guards: Mutex::new(Vec::new()),
            stopped: AtomicBool::new(false),
            credential_missing: credential.is_none(),
            active_orders,
        });

        inner.subscribe_bus_events();
        inner.channel.join_room(inner.room.clone()).await?;

        match credential {
            Some(token) => {
                inner.channel.connect(token).await?;
                inner.spawn_guard_timers();
                // A shared channel may already be up (another order is
                // being tracked); there is no connect event coming.
                if inner.channel.is_connected() {
                    inner.handle_connect();
                }
            }
            None => {
                // No realtime path possible; go straight to polling.
                log::warn!(
                    "[courier-link] No credential for order {}; realtime disabled",
                    inner.order_id
                );
                inner.handlers.emit_error(ConnectionError::new(
                    "no credential available; tracking falls back to polling",
                    true,
                ));
                inner.activate_polling();
            }
        }

        log::info!("[courier-link] Tracking started for order {}", inner.order_id);
        Ok(TrackingSession { inner })
    }

    pub fn order_id(&self) -> &str {
        &self.inner.order_id
    }

    pub fn mode(&self) -> TrackingMode {
        self.inner.state.lock().unwrap().mode
    }

    pub fn last_known_status(&self) -> Option<OrderStatus> {
        self.inner.state.lock().unwrap().last_status
    }

    pub fn last_known_location(&self) -> Option<DriverLocation> {
        self.inner.state.lock().unwrap().last_location
    }

    pub fn last_synced_at(&self) -> Option<SystemTime> {
        self.inner.state.lock().unwrap().last_synced_at
    }

    pub fn is_stopped(&self) -> bool {
        self.inner.stopped.load(Ordering::SeqCst)
    }

    /// Seeds the session from an order-detail response, typically the
    /// fetch the tracking view already performed. Goes through the
    /// same apply routine as live updates, so a snapshot older than
    /// what the session has seen changes nothing.
    pub fn apply_snapshot(&self, snapshot: &OrderSnapshot) {
        let inner = &self.inner;
        if let Some(status) = snapshot.canonical_status() {
            inner.apply_status(
                status,
                snapshot.message.clone(),
                snapshot.estimated_delivery_minutes,
            );
        }
        if let Some(location) = snapshot.location() {
            inner.apply_location(location);
        }
        if let Some(driver) = &snapshot.driver {
            inner.apply_driver(driver.clone());
        }
    }

    /// Locally marks the order cancelled (e.g. the user cancelled it
    /// through the app before the server echoed the change). Runs
    /// through the normal apply routine: observers are notified once
    /// and the server's own cancellation event later is a duplicate.
    pub fn mark_cancelled(&self) {
        self.inner.apply_status(OrderStatus::Cancelled, None, None);
    }

    /// Tears the session down: guard timers cancelled, poller stopped,
    /// bus subscriptions removed, room left. Idempotent; the shared
    /// channel stays up for other sessions.
    pub fn stop_tracking(&self) {
        self.inner.stop();
    }
}

impl Drop for TrackingSession {
    fn drop(&mut self) {
        self.inner.stop();
    }
}

impl SessionInner {
    fn subscribe_bus_events(self: &Arc<Self>) {
        let mut subs = Vec::new();

        subs.push(self.on_bus(events::ORDER_STATUS_UPDATE, |inner, payload| {
            inner.on_status_payload(payload);
        }));
        subs.push(self.on_bus(events::DRIVER_LOCATION_UPDATE, |inner, payload| {
            inner.on_location_payload(payload);
        }));
        subs.push(self.on_bus(events::DRIVER_ASSIGNED, |inner, payload| {
            inner.on_driver_payload(payload);
        }));
        subs.push(self.on_bus(events::CONNECT, |inner, _| {
            inner.handle_connect();
        }));
        subs.push(self.on_bus(events::DISCONNECT, |inner, payload| {
            inner.handle_disconnect(payload);
        }));
        subs.push(self.on_bus(events::CONNECT_ERROR, |inner, payload| {
            inner.handle_connect_error(payload);
        }));
        subs.push(self.on_bus(events::CONNECTIVITY_DEGRADED, |inner, payload| {
            inner.handle_degraded(payload);
        }));

        *self.bus_subs.lock().unwrap() = subs;
    }

    /// Subscribes with a weak self-reference so the bus never keeps a
    /// stopped session alive.
    fn on_bus(
        self: &Arc<Self>,
        event: &str,
        callback: fn(&SessionInner, &Value),
    ) -> SubscriptionHandle {
        let weak: Weak<SessionInner> = Arc::downgrade(self);
        self.bus.subscribe(event, move |payload| {
            if let Some(inner) = weak.upgrade() {
                callback(&inner, payload);
            }
        })
    }

    fn spawn_guard_timers(self: &Arc<Self>) {
        let mut guards = self.guards.lock().unwrap();

        // Guard 1: if the channel is not up shortly after start, begin
        // polling rather than leave the view frozen. The channel keeps
        // trying in the background and flips the session back on
        // connect.
        let weak = Arc::downgrade(self);
        let channel = Arc::clone(&self.channel);
        let guard = self.timeouts.realtime_guard;
        guards.push(tokio::spawn(async move {
            let connected = channel.check_connection(guard).await;
            if !connected {
                if let Some(inner) = weak.upgrade() {
                    log::info!(
                        "[courier-link] Realtime not up within {:?} for order {}; polling",
                        guard,
                        inner.order_id
                    );
                    inner.activate_polling();
                }
            }
        }));

        // Guard 2: hard bound on time-to-first-path.
        let weak = Arc::downgrade(self);
        let deadline = self.timeouts.fallback_deadline;
        guards.push(tokio::spawn(async move {
            tokio::time::sleep(deadline).await;
            if let Some(inner) = weak.upgrade() {
                if !inner.channel.is_connected() && !inner.poller.is_running() {
                    inner.activate_polling();
                }
            }
        }));
    }

    /// Accepts payloads addressed to this order, plus legacy frames
    /// that carry no order id at all.
    fn payload_is_for_me(&self, payload: &Value) -> bool {
        match payload.get("order_id") {
            None | Some(Value::Null) => true,
            Some(Value::String(s)) => s == &self.order_id,
            Some(Value::Number(n)) => n.to_string() == self.order_id,
            Some(_) => false,
        }
    }

    fn on_status_payload(&self, payload: &Value) {
        if !self.payload_is_for_me(payload) {
            return;
        }
        let raw = match payload.get("status").and_then(Value::as_str) {
            Some(s) => s,
            None => return,
        };
        let status = match OrderStatus::parse(raw) {
            Some(s) => s,
            None => {
                log::warn!(
                    "[courier-link] Unrecognized status '{}' for order {}; ignored",
                    raw,
                    self.order_id
                );
                return;
            }
        };
        let message = payload
            .get("message")
            .and_then(Value::as_str)
            .map(str::to_string);
        let eta = payload
            .get("estimated_delivery_minutes")
            .and_then(Value::as_u64)
            .map(|v| v as u32);
        self.apply_status(status, message, eta);
    }

    fn on_location_payload(&self, payload: &Value) {
        if !self.payload_is_for_me(payload) {
            return;
        }
        let (Some(latitude), Some(longitude)) = (
            payload.get("latitude").and_then(Value::as_f64),
            payload.get("longitude").and_then(Value::as_f64),
        ) else {
            return;
        };
        self.apply_location(DriverLocation::new(latitude, longitude));
    }

    fn on_driver_payload(&self, payload: &Value) {
        if !self.payload_is_for_me(payload) {
            return;
        }
        let driver = match payload
            .get("driver")
            .cloned()
            .map(serde_json::from_value::<Driver>)
        {
            Some(Ok(driver)) => driver,
            _ => {
                log::warn!(
                    "[courier-link] Undecodable driver payload for order {}",
                    self.order_id
                );
                return;
            }
        };
        self.apply_driver(driver);
    }

    /// The single ordering point for status changes, wherever they
    /// came from. Terminal absorbs, duplicates and regressions drop.
    fn apply_status(&self, status: OrderStatus, message: Option<String>, eta: Option<u32>) {
        if self.stopped.load(Ordering::SeqCst) {
            return;
        }
        {
            let mut state = self.state.lock().unwrap();
            if let Some(current) = state.last_status {
                if current.is_terminal() {
                    log::debug!(
                        "[courier-link] Order {} is {}; dropping late '{}'",
                        self.order_id,
                        current,
                        status
                    );
                    return;
                }
                if status == current {
                    return;
                }
                if !status.is_terminal() && status.rank() <= current.rank() {
                    log::debug!(
                        "[courier-link] Stale status '{}' for order {} (already {})",
                        status,
                        self.order_id,
                        current
                    );
                    return;
                }
            }
            state.last_status = Some(status);
            state.last_synced_at = Some(SystemTime::now());
        }

        log::info!("[courier-link] Order {} -> {}", self.order_id, status);
        self.handlers.emit_status_update(StatusUpdate {
            status,
            message,
            estimated_delivery_minutes: eta,
        });

        if status.is_terminal() {
            // Nothing further can change; stop burning the network.
            self.poller.stop();
        }
    }

    fn apply_location(&self, location: DriverLocation) {
        if self.stopped.load(Ordering::SeqCst) {
            return;
        }
        {
            let mut state = self.state.lock().unwrap();
            if state.last_location == Some(location) {
                return;
            }
            state.last_location = Some(location);
            state.last_synced_at = Some(SystemTime::now());
        }
        self.handlers.emit_location_update(location);
    }

    fn apply_driver(&self, driver: Driver) {
        if self.stopped.load(Ordering::SeqCst) {
            return;
        }
        {
            let mut state = self.state.lock().unwrap();
            if state.last_driver_id.as_deref() == Some(driver.id.as_str()) {
                return;
            }
            state.last_driver_id = Some(driver.id.clone());
            state.last_synced_at = Some(SystemTime::now());
        }
        self.handlers.emit_driver_assigned(driver);
    }

    fn handle_connect(&self) {
        if self.stopped.load(Ordering::SeqCst) {
            return;
        }
        let previous = {
            let mut state = self.state.lock().unwrap();
            if state.mode == TrackingMode::Realtime {
                return;
            }
            let previous = state.mode;
            state.mode = TrackingMode::Realtime;
            previous
        };
        if previous == TrackingMode::Polling {
            self.poller.stop();
        }
        log::info!(
            "[courier-link] Order {} now tracking in realtime mode",
            self.order_id
        );
        self.handlers.emit_mode_change(TrackingMode::Realtime);
        self.handlers.emit_connect();
    }

    fn handle_disconnect(&self, payload: &Value) {
        if self.stopped.load(Ordering::SeqCst) {
            return;
        }
        let reason = payload
            .get("reason")
            .and_then(Value::as_str)
            .unwrap_or("connection lost")
            .to_string();
        let was_realtime = self.state.lock().unwrap().mode == TrackingMode::Realtime;
        self.handlers
            .emit_disconnect(DisconnectReason::new(reason, was_realtime));
        if was_realtime {
            // Cover the gap immediately; a successful reconnect flips
            // us back.
            self.activate_polling();
        }
    }

    fn handle_connect_error(&self, payload: &Value) {
        if self.stopped.load(Ordering::SeqCst) {
            return;
        }
        let message = payload
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or("realtime connection failed")
            .to_string();
        self.handlers
            .emit_error(ConnectionError::new(message, true));
        self.activate_polling();
    }

    fn handle_degraded(&self, payload: &Value) {
        if self.stopped.load(Ordering::SeqCst) || !self.payload_is_for_me(payload) {
            return;
        }
        log::warn!(
            "[courier-link] Connectivity degraded for order {}",
            self.order_id
        );
        self.handlers.emit_degraded();
        if self.credential_missing {
            // Realtime was never an option and polling is failing too.
            self.handlers.emit_error(ConnectionError::new(
                "no tracking path available: realtime credential missing and polling is failing",
                false,
            ));
        }
    }

    fn activate_polling(&self) {
        if self.stopped.load(Ordering::SeqCst) {
            return;
        }
        {
            let mut state = self.state.lock().unwrap();
            if state.mode == TrackingMode::Polling {
                return;
            }
            state.mode = TrackingMode::Polling;
        }
        self.poller.start(
            &self.order_id,
            self.timeouts.poll_interval,
            Arc::clone(&self.fetcher),
        );
        self.handlers.emit_mode_change(TrackingMode::Polling);
    }

    fn stop(&self) {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return;
        }
        for guard in self.guards.lock().unwrap().drain(..) {
            guard.abort();
        }
        self.poller.stop();
        for handle in self.bus_subs.lock().unwrap().drain(..) {
            self.bus.unsubscribe(&handle);
        }
        self.channel.leave_room_now(&self.room);
        self.active_orders.lock().unwrap().remove(&self.order_id);

        let mut state = self.state.lock().unwrap();
        state.mode = TrackingMode::Uninitialized;
        state.last_status = None;
        state.last_location = None;
        state.last_driver_id = None;
        state.last_synced_at = None;
        log::info!("[courier-link] Tracking stopped for order {}", self.order_id);
    }
}
