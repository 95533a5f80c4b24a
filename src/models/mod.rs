//! Data models shared across the SDK.

pub mod driver;
pub mod driver_location;
pub mod order_snapshot;
pub mod status_update;
pub mod tracking_mode;

pub use driver::Driver;
pub use driver_location::DriverLocation;
pub use order_snapshot::OrderSnapshot;
pub use status_update::StatusUpdate;
pub use tracking_mode::TrackingMode;
