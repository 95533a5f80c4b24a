//! Wire messages and event-name normalization.
//!
//! The server side of the tracking channel has gone through several
//! payload generations: a structured `room_event` envelope, plus older
//! flat frames whose event names drifted between snake_case and
//! camelCase. Everything inbound is normalized here into one canonical
//! event per concept; nothing past this module sees a historical
//! spelling. Unknown frames are skipped with a debug log, never an
//! error.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::error::{CourierLinkError, Result};
use crate::events;
use crate::location::normalize_location;

/// Frames the client sends.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub(crate) enum ClientMessage {
    Authenticate { token: String },
    JoinRoom { room: String },
    LeaveRoom { room: String },
}

/// Structured frames the server sends.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub(crate) enum ServerMessage {
    AuthSuccess {
        #[serde(default)]
        #[allow(dead_code)]
        session_id: Option<String>,
    },
    AuthError {
        message: String,
    },
    RoomEvent {
        room: String,
        event: String,
        #[serde(default)]
        data: Value,
    },
}

/// A normalized event ready for the bus.
pub(crate) struct CanonicalEvent {
    pub name: &'static str,
    pub payload: Value,
}

/// Room name for one order's events.
pub(crate) fn order_room(order_id: &str) -> String {
    format!("order:{}", order_id)
}

fn order_id_from_room(room: &str) -> &str {
    room.strip_prefix("order:").unwrap_or(room)
}

/// Decodes one text frame into at most one canonical event.
///
/// `Ok(None)` means a recognized but non-routable frame (auth acks,
/// unknown event names). `Err` is reserved for frames that are not
/// JSON at all.
pub(crate) fn normalize_frame(text: &str) -> Result<Option<CanonicalEvent>> {
    let value: Value = serde_json::from_str(text)
        .map_err(|e| CourierLinkError::MalformedPayload(format!("not JSON: {}", e)))?;

    if let Ok(message) = serde_json::from_value::<ServerMessage>(value.clone()) {
        return Ok(match message {
            ServerMessage::AuthSuccess { .. } => None,
            ServerMessage::AuthError { message } => {
                log::warn!("[courier-link] Server reported auth error: {}", message);
                None
            }
            ServerMessage::RoomEvent { room, event, data } => {
                canonical_room_event(&room, &event, &data)
            }
        });
    }

    Ok(legacy_flat_event(&value))
}

fn canonical_room_event(room: &str, event: &str, data: &Value) -> Option<CanonicalEvent> {
    let order_id = order_id_from_room(room);
    match event {
        "status_update" | "order_update" | "order_status" => status_event(Some(order_id), data),
        "location_update" | "driver_location" => location_event(Some(order_id), data),
        "driver_assigned" => driver_event(Some(order_id), data),
        other => {
            log::debug!(
                "[courier-link] Ignoring unknown room event '{}' for {}",
                other,
                room
            );
            None
        }
    }
}

/// Older backends sent flat frames with the event name under `type` or
/// `event` and the order id inline.
fn legacy_flat_event(value: &Value) -> Option<CanonicalEvent> {
    let name = value
        .get("type")
        .or_else(|| value.get("event"))
        .and_then(Value::as_str)?;
    let order_id = value
        .get("order_id")
        .or_else(|| value.get("orderId"))
        .and_then(Value::as_str);

    match name {
        "order_status" | "order_status_update" | "orderStatusUpdated" | "orderUpdated" => {
            status_event(order_id, value)
        }
        "driver_location" | "driver_location_update" | "driverLocationUpdate"
        | "locationUpdate" => location_event(order_id, value),
        "driver_assigned" | "driverAssigned" => driver_event(order_id, value),
        other => {
            log::debug!("[courier-link] Ignoring unknown frame type '{}'", other);
            None
        }
    }
}

fn status_event(order_id: Option<&str>, data: &Value) -> Option<CanonicalEvent> {
    let status = match data.get("status").and_then(Value::as_str) {
        Some(s) => s,
        None => {
            log::warn!("[courier-link] Status frame without a status field; dropping");
            return None;
        }
    };
    let mut payload = json!({
        "status": status,
        "message": data.get("message").and_then(Value::as_str),
        "estimated_delivery_minutes": data
            .get("estimated_delivery_minutes")
            .or_else(|| data.get("estimatedDeliveryMinutes"))
            .and_then(Value::as_u64),
    });
    attach_order_id(&mut payload, order_id);
    Some(CanonicalEvent {
        name: events::ORDER_STATUS_UPDATE,
        payload,
    })
}

fn location_event(order_id: Option<&str>, data: &Value) -> Option<CanonicalEvent> {
    // Some generations nest the position under `location`.
    let source = data
        .get("location")
        .filter(|v| v.is_object())
        .unwrap_or(data);
    let location = match normalize_location(source) {
        Some(loc) => loc,
        None => {
            log::warn!("[courier-link] Unparseable driver location; dropping frame");
            return None;
        }
    };
    let mut payload = json!({
        "latitude": location.latitude,
        "longitude": location.longitude,
    });
    attach_order_id(&mut payload, order_id);
    Some(CanonicalEvent {
        name: events::DRIVER_LOCATION_UPDATE,
        payload,
    })
}

fn driver_event(order_id: Option<&str>, data: &Value) -> Option<CanonicalEvent> {
    let driver = match data.get("driver") {
        Some(d) if d.is_object() => d.clone(),
        _ => {
            log::warn!("[courier-link] Driver-assigned frame without driver object; dropping");
            return None;
        }
    };
    let mut payload = json!({ "driver": driver });
    attach_order_id(&mut payload, order_id);
    Some(CanonicalEvent {
        name: events::DRIVER_ASSIGNED,
        payload,
    })
}

fn attach_order_id(payload: &mut Value, order_id: Option<&str>) {
    if let (Some(obj), Some(id)) = (payload.as_object_mut(), order_id) {
        obj.insert("order_id".to_string(), Value::String(id.to_string()));
    }
}
