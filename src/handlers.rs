//! Observer callbacks for tracking lifecycle events.
//!
//! [`TrackingHandlers`] is the UI-facing notification surface: every
//! hook is optional, registered with a builder method, and invoked
//! with already-deduplicated, lifecycle-checked data.

use std::fmt;
use std::sync::Arc;

use crate::models::{Driver, DriverLocation, StatusUpdate, TrackingMode};

/// Why the realtime channel went down.
#[derive(Debug, Clone)]
pub struct DisconnectReason {
    pub reason: String,
    /// Whether the channel will try to reconnect on its own.
    pub will_reconnect: bool,
}

impl DisconnectReason {
    pub fn new(reason: impl Into<String>, will_reconnect: bool) -> Self {
        Self {
            reason: reason.into(),
            will_reconnect,
        }
    }
}

impl fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} (will_reconnect: {})",
            self.reason, self.will_reconnect
        )
    }
}

/// A connection-level failure reported to observers.
#[derive(Debug, Clone)]
pub struct ConnectionError {
    pub message: String,
    /// `false` means no sync path remains and tracking cannot recover
    /// without intervention.
    pub recoverable: bool,
}

impl ConnectionError {
    pub fn new(message: impl Into<String>, recoverable: bool) -> Self {
        Self {
            message: message.into(),
            recoverable,
        }
    }
}

impl fmt::Display for ConnectionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (recoverable: {})", self.message, self.recoverable)
    }
}

type OnConnect = Arc<dyn Fn() + Send + Sync>;
type OnDisconnect = Arc<dyn Fn(DisconnectReason) + Send + Sync>;
type OnError = Arc<dyn Fn(ConnectionError) + Send + Sync>;
type OnStatusUpdate = Arc<dyn Fn(StatusUpdate) + Send + Sync>;
type OnLocationUpdate = Arc<dyn Fn(DriverLocation) + Send + Sync>;
type OnDriverAssigned = Arc<dyn Fn(Driver) + Send + Sync>;
type OnModeChange = Arc<dyn Fn(TrackingMode) + Send + Sync>;
type OnDegraded = Arc<dyn Fn() + Send + Sync>;

/// Optional observer callbacks for a tracking session.
///
/// Cheap to clone (all hooks are `Arc`ed). Callbacks run on SDK tasks
/// and should hand work off rather than block.
#[derive(Clone, Default)]
pub struct TrackingHandlers {
    on_connect: Option<OnConnect>,
    on_disconnect: Option<OnDisconnect>,
    on_error: Option<OnError>,
    on_status_update: Option<OnStatusUpdate>,
    on_location_update: Option<OnLocationUpdate>,
    on_driver_assigned: Option<OnDriverAssigned>,
    on_mode_change: Option<OnModeChange>,
    on_degraded: Option<OnDegraded>,
}

impl TrackingHandlers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Called when the realtime channel completes its handshake.
    pub fn on_connect(mut self, callback: impl Fn() + Send + Sync + 'static) -> Self {
        self.on_connect = Some(Arc::new(callback));
        self
    }

    /// Called when the realtime channel drops.
    pub fn on_disconnect(
        mut self,
        callback: impl Fn(DisconnectReason) + Send + Sync + 'static,
    ) -> Self {
        self.on_disconnect = Some(Arc::new(callback));
        self
    }

    /// Called on connection-level failures.
    pub fn on_error(mut self, callback: impl Fn(ConnectionError) + Send + Sync + 'static) -> Self {
        self.on_error = Some(Arc::new(callback));
        self
    }

    /// Called for each accepted (new, non-regressive) status change.
    pub fn on_status_update(
        mut self,
        callback: impl Fn(StatusUpdate) + Send + Sync + 'static,
    ) -> Self {
        self.on_status_update = Some(Arc::new(callback));
        self
    }

    /// Called for each changed driver position.
    pub fn on_location_update(
        mut self,
        callback: impl Fn(DriverLocation) + Send + Sync + 'static,
    ) -> Self {
        self.on_location_update = Some(Arc::new(callback));
        self
    }

    /// Called once per newly assigned driver.
    pub fn on_driver_assigned(
        mut self,
        callback: impl Fn(Driver) + Send + Sync + 'static,
    ) -> Self {
        self.on_driver_assigned = Some(Arc::new(callback));
        self
    }

    /// Called when a session switches between realtime and polling.
    pub fn on_mode_change(
        mut self,
        callback: impl Fn(TrackingMode) + Send + Sync + 'static,
    ) -> Self {
        self.on_mode_change = Some(Arc::new(callback));
        self
    }

    /// Called when the polling path has failed repeatedly and no sync
    /// path is making progress.
    pub fn on_degraded(mut self, callback: impl Fn() + Send + Sync + 'static) -> Self {
        self.on_degraded = Some(Arc::new(callback));
        self
    }

    pub(crate) fn emit_connect(&self) {
        if let Some(cb) = &self.on_connect {
            cb();
        }
    }

    pub(crate) fn emit_disconnect(&self, reason: DisconnectReason) {
        if let Some(cb) = &self.on_disconnect {
            cb(reason);
        }
    }

    pub(crate) fn emit_error(&self, error: ConnectionError) {
        if let Some(cb) = &self.on_error {
            cb(error);
        }
    }

    pub(crate) fn emit_status_update(&self, update: StatusUpdate) {
        if let Some(cb) = &self.on_status_update {
            cb(update);
        }
    }

    pub(crate) fn emit_location_update(&self, location: DriverLocation) {
        if let Some(cb) = &self.on_location_update {
            cb(location);
        }
    }

    pub(crate) fn emit_driver_assigned(&self, driver: Driver) {
        if let Some(cb) = &self.on_driver_assigned {
            cb(driver);
        }
    }

    pub(crate) fn emit_mode_change(&self, mode: TrackingMode) {
        if let Some(cb) = &self.on_mode_change {
            cb(mode);
        }
    }

    pub(crate) fn emit_degraded(&self) {
        if let Some(cb) = &self.on_degraded {
            cb();
        }
    }
}

impl fmt::Debug for TrackingHandlers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TrackingHandlers")
            .field("on_connect", &self.on_connect.is_some())
            .field("on_disconnect", &self.on_disconnect.is_some())
            .field("on_error", &self.on_error.is_some())
            .field("on_status_update", &self.on_status_update.is_some())
            .field("on_location_update", &self.on_location_update.is_some())
            .field("on_driver_assigned", &self.on_driver_assigned.is_some())
            .field("on_mode_change", &self.on_mode_change.is_some())
            .field("on_degraded", &self.on_degraded.is_some())
            .finish()
    }
}
