//! Order lifecycle states and the rules for moving between them.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Lifecycle status of a delivery order.
///
/// The lifecycle is monotonic: once an order has been observed in a
/// status, earlier statuses arriving late (out-of-order frames, stale
/// poll results) are rejected by the session's apply routine. The two
/// terminal statuses absorb every further update.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Pending,
    Accepted,
    Preparing,
    Ready,
    PickedUp,
    Delivered,
    Cancelled,
}

impl OrderStatus {
    /// Parses a raw server status string, tolerating casing, hyphens,
    /// and a few legacy spellings still emitted by older backends.
    pub fn parse(raw: &str) -> Option<Self> {
        let normalized = raw.trim().to_ascii_lowercase().replace('-', "_");
        match normalized.as_str() {
            "pending" => Some(OrderStatus::Pending),
            "accepted" | "confirmed" => Some(OrderStatus::Accepted),
            "preparing" => Some(OrderStatus::Preparing),
            "ready" => Some(OrderStatus::Ready),
            "picked_up" | "pickedup" | "on_the_way" | "out_for_delivery" => {
                Some(OrderStatus::PickedUp)
            }
            "delivered" | "completed" => Some(OrderStatus::Delivered),
            "cancelled" | "canceled" => Some(OrderStatus::Cancelled),
            _ => None,
        }
    }

    /// Canonical wire spelling of this status.
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Pending => "pending",
            OrderStatus::Accepted => "accepted",
            OrderStatus::Preparing => "preparing",
            OrderStatus::Ready => "ready",
            OrderStatus::PickedUp => "picked_up",
            OrderStatus::Delivered => "delivered",
            OrderStatus::Cancelled => "cancelled",
        }
    }

    /// Progress-step index for a four-step tracking display:
    /// placed (0), being prepared (1), on the way (2), done (3).
    pub fn step_index(&self) -> u8 {
        match self {
            OrderStatus::Pending => 0,
            OrderStatus::Accepted | OrderStatus::Preparing => 1,
            OrderStatus::Ready | OrderStatus::PickedUp => 2,
            OrderStatus::Delivered | OrderStatus::Cancelled => 3,
        }
    }

    /// Terminal statuses end the lifecycle; no later update may
    /// replace them.
    pub fn is_terminal(&self) -> bool {
        matches!(self, OrderStatus::Delivered | OrderStatus::Cancelled)
    }

    /// Position in the full lifecycle, used for the regression check.
    /// Distinct from [`step_index`](Self::step_index): `accepted` and
    /// `preparing` share a display step but are ordered here.
    pub(crate) fn rank(&self) -> u8 {
        match self {
            OrderStatus::Pending => 0,
            OrderStatus::Accepted => 1,
            OrderStatus::Preparing => 2,
            OrderStatus::Ready => 3,
            OrderStatus::PickedUp => 4,
            OrderStatus::Delivered => 5,
            OrderStatus::Cancelled => 5,
        }
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_canonical_spellings() {
        assert_eq!(OrderStatus::parse("pending"), Some(OrderStatus::Pending));
        assert_eq!(OrderStatus::parse("picked_up"), Some(OrderStatus::PickedUp));
        assert_eq!(OrderStatus::parse("delivered"), Some(OrderStatus::Delivered));
        assert_eq!(OrderStatus::parse("cancelled"), Some(OrderStatus::Cancelled));
    }

    #[test]
    fn test_parse_is_lenient() {
        assert_eq!(OrderStatus::parse(" Picked-Up "), Some(OrderStatus::PickedUp));
        assert_eq!(
            OrderStatus::parse("out_for_delivery"),
            Some(OrderStatus::PickedUp)
        );
        assert_eq!(OrderStatus::parse("canceled"), Some(OrderStatus::Cancelled));
        assert_eq!(OrderStatus::parse("CONFIRMED"), Some(OrderStatus::Accepted));
        assert_eq!(OrderStatus::parse("refunded"), None);
        assert_eq!(OrderStatus::parse(""), None);
    }

    #[test]
    fn test_step_index_mapping() {
        assert_eq!(OrderStatus::Pending.step_index(), 0);
        assert_eq!(OrderStatus::Accepted.step_index(), 1);
        assert_eq!(OrderStatus::Preparing.step_index(), 1);
        assert_eq!(OrderStatus::Ready.step_index(), 2);
        assert_eq!(OrderStatus::PickedUp.step_index(), 2);
        assert_eq!(OrderStatus::Delivered.step_index(), 3);
    }

    #[test]
    fn test_terminal_statuses() {
        assert!(OrderStatus::Delivered.is_terminal());
        assert!(OrderStatus::Cancelled.is_terminal());
        assert!(!OrderStatus::PickedUp.is_terminal());
        assert!(!OrderStatus::Pending.is_terminal());
    }

    #[test]
    fn test_rank_orders_full_lifecycle() {
        assert!(OrderStatus::Accepted.rank() < OrderStatus::Preparing.rank());
        assert!(OrderStatus::Preparing.rank() < OrderStatus::Ready.rank());
        assert!(OrderStatus::PickedUp.rank() < OrderStatus::Delivered.rank());
    }

    #[test]
    fn test_serde_round_trip() {
        let json = serde_json::to_string(&OrderStatus::PickedUp).unwrap();
        assert_eq!(json, "\"picked_up\"");
        let back: OrderStatus = serde_json::from_str(&json).unwrap();
        assert_eq!(back, OrderStatus::PickedUp);
    }
}
