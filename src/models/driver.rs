//! Driver details delivered with assignment events.

use serde::{Deserialize, Serialize};

/// The driver assigned to an order. Everything but the id is optional;
/// backends vary in how much profile data they attach.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Driver {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vehicle: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deserialize_minimal() {
        let driver: Driver = serde_json::from_str(r#"{"id": "drv-1"}"#).unwrap();
        assert_eq!(driver.id, "drv-1");
        assert!(driver.name.is_none());
    }

    #[test]
    fn test_deserialize_full() {
        let driver: Driver = serde_json::from_str(
            r#"{"id": "drv-2", "name": "Abel", "phone": "+251911000000", "vehicle": "motorbike"}"#,
        )
        .unwrap();
        assert_eq!(driver.name.as_deref(), Some("Abel"));
        assert_eq!(driver.vehicle.as_deref(), Some("motorbike"));
    }
}
