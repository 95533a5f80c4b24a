//! Point-in-time order state returned by the HTTP fetch path.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::location::normalize_location;
use crate::models::{Driver, DriverLocation};
use crate::status::OrderStatus;

/// One order-detail response. The status is kept as the raw server
/// string so a snapshot with an unknown status still decodes; callers
/// go through [`canonical_status`](Self::canonical_status).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderSnapshot {
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub driver: Option<Driver>,
    /// Raw driver position in whatever shape the backend produced.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub driver_location: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub estimated_delivery_minutes: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl OrderSnapshot {
    /// The parsed lifecycle status, or `None` for spellings this SDK
    /// does not recognize.
    pub fn canonical_status(&self) -> Option<OrderStatus> {
        OrderStatus::parse(&self.status)
    }

    /// The driver position normalized to latitude/longitude.
    pub fn location(&self) -> Option<DriverLocation> {
        self.driver_location.as_ref().and_then(normalize_location)
    }
}
