//! Canonical event names published on the [`EventBus`](crate::EventBus).
//!
//! The realtime channel and the fallback poller both normalize their raw
//! input into these names before publishing; nothing downstream of the
//! bus ever sees a historical server spelling.

/// The realtime channel finished its handshake and is live.
pub const CONNECT: &str = "connect";

/// The realtime channel lost (or deliberately closed) its connection.
/// Payload: `{"reason": "..."}`.
pub const DISCONNECT: &str = "disconnect";

/// The realtime channel gave up connecting after exhausting its
/// reconnect budget. Payload: `{"message": "...", "attempts": n}`.
pub const CONNECT_ERROR: &str = "connect_error";

/// An order moved to a new lifecycle status.
/// Payload: `{"order_id": "...", "status": "...", "message": ...,
/// "estimated_delivery_minutes": ...}`.
pub const ORDER_STATUS_UPDATE: &str = "order:status_update";

/// The assigned driver reported a new position.
/// Payload: `{"order_id": "...", "latitude": f64, "longitude": f64}`.
pub const DRIVER_LOCATION_UPDATE: &str = "driver:location_update";

/// A driver was assigned to the order.
/// Payload: `{"order_id": "...", "driver": {...}}`.
pub const DRIVER_ASSIGNED: &str = "driver:assigned";

/// The polling path has failed several consecutive times; neither sync
/// path is making progress. Payload: `{"order_id": "...",
/// "consecutive_failures": n}`.
pub const CONNECTIVITY_DEGRADED: &str = "connectivity:degraded";
