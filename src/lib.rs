//! courier-link: client-side order tracking synchronization.
//!
//! Keeps a client's view of an order's status and its driver's position
//! consistent with server-side truth over an unreliable network. A
//! [`RealtimeChannel`] maintains one duplex connection (authenticated
//! handshake, heartbeats, reconnect with exponential backoff, room-scoped
//! subscriptions) and a [`FallbackPoller`] takes over with periodic HTTP
//! refreshes whenever the channel cannot be established or sustained.
//!
//! Both paths funnel normalized events through an in-process [`EventBus`];
//! a per-order [`TrackingSession`] applies them through a single routine
//! that enforces the order lifecycle (no regressions, terminal states
//! absorb everything) and deduplicates before notifying UI observers via
//! [`TrackingHandlers`].
//!
//! # Example
//!
//! ```rust,no_run
//! use courier_link::{CourierLinkClient, TrackingHandlers};
//!
//! # async fn example() -> courier_link::Result<()> {
//! let client = CourierLinkClient::builder()
//!     .base_url("https://api.example.com")
//!     .handlers(
//!         TrackingHandlers::new()
//!             .on_status_update(|update| println!("status: {}", update.status))
//!             .on_location_update(|loc| println!("driver at {},{}", loc.latitude, loc.longitude)),
//!     )
//!     .build()?;
//!
//! let session = client.track_order("order-42").await?;
//! // ... later, when the tracking view closes:
//! session.stop_tracking();
//! # Ok(())
//! # }
//! ```

pub mod bus;
pub mod channel;
pub mod client;
pub mod credentials;
pub mod error;
pub mod events;
pub mod fetch;
pub mod handlers;
pub mod location;
pub mod models;
pub mod options;
pub mod poller;
mod protocol;
pub mod session;
pub mod status;
pub mod timeouts;

pub use bus::{EventBus, SubscriptionHandle};
pub use channel::{ChannelConfig, ConnectionState, RealtimeChannel};
pub use client::{CourierLinkClient, CourierLinkClientBuilder};
pub use credentials::{CredentialStore, MemoryCredentialStore};
pub use error::{CourierLinkError, Result};
pub use fetch::{HttpOrderFetcher, OrderFetcher};
pub use handlers::{ConnectionError, DisconnectReason, TrackingHandlers};
pub use location::normalize_location;
pub use models::{Driver, DriverLocation, OrderSnapshot, StatusUpdate, TrackingMode};
pub use options::ReconnectPolicy;
pub use poller::FallbackPoller;
pub use session::TrackingSession;
pub use status::OrderStatus;
pub use timeouts::CourierLinkTimeouts;
