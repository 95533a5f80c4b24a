//! Derived status notification delivered to UI observers.

use serde::{Deserialize, Serialize};

use crate::status::OrderStatus;

/// A deduplicated, lifecycle-checked status change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusUpdate {
    pub status: OrderStatus,
    /// Optional human-readable note attached by the server.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub estimated_delivery_minutes: Option<u32>,
}
