//! Canonical driver position.

use serde::{Deserialize, Serialize};

/// A normalized driver position. Always latitude-first, regardless of
/// which wire shape the server used. See
/// [`normalize_location`](crate::location::normalize_location).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DriverLocation {
    pub latitude: f64,
    pub longitude: f64,
}

impl DriverLocation {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }
}
