//! Client entry point.
//!
//! One [`CourierLinkClient`] per backend: it owns the event bus, the
//! shared realtime channel, and the HTTP fetcher, and hands out one
//! [`TrackingSession`] per order. Sessions share the channel (rooms
//! are reference-counted inside it), so tracking a second order does
//! not open a second socket.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::bus::EventBus;
use crate::channel::{ChannelConfig, RealtimeChannel};
use crate::credentials::{CredentialStore, MemoryCredentialStore};
use crate::error::{CourierLinkError, Result};
use crate::fetch::{HttpOrderFetcher, OrderFetcher};
use crate::handlers::TrackingHandlers;
use crate::models::OrderSnapshot;
use crate::options::ReconnectPolicy;
use crate::session::TrackingSession;
use crate::timeouts::CourierLinkTimeouts;

const DEFAULT_CREDENTIAL_KEY: &str = "auth_token";
const WS_TRACKING_PATH: &str = "/ws/tracking";

/// Maps the HTTP base URL to the realtime endpoint, unless an
/// explicit override was configured.
fn resolve_ws_url(base_url: &str, override_url: Option<&str>) -> Result<String> {
    if let Some(explicit) = override_url {
        let parsed = url::Url::parse(explicit)
            .map_err(|e| CourierLinkError::Configuration(format!("invalid ws_url: {}", e)))?;
        if parsed.scheme() != "ws" && parsed.scheme() != "wss" {
            return Err(CourierLinkError::Configuration(format!(
                "ws_url must use ws:// or wss://, got '{}'",
                parsed.scheme()
            )));
        }
        return Ok(explicit.to_string());
    }

    let mut parsed = url::Url::parse(base_url)
        .map_err(|e| CourierLinkError::Configuration(format!("invalid base_url: {}", e)))?;
    let scheme = match parsed.scheme() {
        "http" | "ws" => "ws",
        "https" | "wss" => "wss",
        other => {
            return Err(CourierLinkError::Configuration(format!(
                "unsupported base_url scheme '{}'",
                other
            )))
        }
    };
    parsed
        .set_scheme(scheme)
        .map_err(|_| CourierLinkError::Configuration("could not derive ws url".to_string()))?;
    parsed.set_path(WS_TRACKING_PATH);
    parsed.set_query(None);
    parsed.set_fragment(None);
    Ok(parsed.to_string())
}

/// Builder for [`CourierLinkClient`].
pub struct CourierLinkClientBuilder {
    base_url: Option<String>,
    ws_url: Option<String>,
    credential_store: Option<Arc<dyn CredentialStore>>,
    credential_key: String,
    timeouts: CourierLinkTimeouts,
    reconnect: ReconnectPolicy,
    handlers: TrackingHandlers,
    fetcher: Option<Arc<dyn OrderFetcher>>,
}

impl CourierLinkClientBuilder {
    fn new() -> Self {
        Self {
            base_url: None,
            ws_url: None,
            credential_store: None,
            credential_key: DEFAULT_CREDENTIAL_KEY.to_string(),
            timeouts: CourierLinkTimeouts::default(),
            reconnect: ReconnectPolicy::default(),
            handlers: TrackingHandlers::default(),
            fetcher: None,
        }
    }

    /// Backend base URL (required), e.g. `https://api.example.com`.
    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    /// Explicit realtime endpoint. By default it is derived from the
    /// base URL (`wss://host/ws/tracking`).
    pub fn ws_url(mut self, url: impl Into<String>) -> Self {
        self.ws_url = Some(url.into());
        self
    }

    /// Where the auth credential lives. Defaults to an empty in-memory
    /// store, which means polling-only tracking until one is set.
    pub fn credential_store(mut self, store: Arc<dyn CredentialStore>) -> Self {
        self.credential_store = Some(store);
        self
    }

    /// Key under which the credential is stored. Defaults to
    /// `auth_token`.
    pub fn credential_key(mut self, key: impl Into<String>) -> Self {
        self.credential_key = key.into();
        self
    }

    pub fn timeouts(mut self, timeouts: CourierLinkTimeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    pub fn reconnect_policy(mut self, policy: ReconnectPolicy) -> Self {
        self.reconnect = policy;
        self
    }

    /// Default observer callbacks, cloned into every session. Override
    /// per order with
    /// [`track_order_with`](CourierLinkClient::track_order_with).
    pub fn handlers(mut self, handlers: TrackingHandlers) -> Self {
        self.handlers = handlers;
        self
    }

    /// Replaces the HTTP fetcher, mainly for tests.
    pub fn fetcher(mut self, fetcher: Arc<dyn OrderFetcher>) -> Self {
        self.fetcher = Some(fetcher);
        self
    }

    /// Builds the client and spawns the channel task.
    ///
    /// Must be called within a Tokio runtime.
    pub fn build(self) -> Result<CourierLinkClient> {
        let base_url = self
            .base_url
            .ok_or_else(|| CourierLinkError::Configuration("base_url is required".to_string()))?;
        let ws_url = resolve_ws_url(&base_url, self.ws_url.as_deref())?;

        let credential_store = self
            .credential_store
            .unwrap_or_else(|| Arc::new(MemoryCredentialStore::new()));

        let fetcher = match self.fetcher {
            Some(fetcher) => fetcher,
            None => {
                let http = reqwest::Client::builder()
                    .timeout(self.timeouts.fetch_timeout)
                    .connect_timeout(self.timeouts.connect_timeout)
                    .pool_idle_timeout(Duration::from_secs(90))
                    .build()
                    .map_err(|e| {
                        CourierLinkError::Configuration(format!("http client: {}", e))
                    })?;
                Arc::new(HttpOrderFetcher::new(
                    base_url.clone(),
                    http,
                    Arc::clone(&credential_store),
                    self.credential_key.clone(),
                )) as Arc<dyn OrderFetcher>
            }
        };

        let bus = Arc::new(EventBus::new());
        let channel = Arc::new(RealtimeChannel::new(
            ChannelConfig {
                url: ws_url,
                timeouts: self.timeouts.clone(),
                reconnect: self.reconnect,
            },
            Arc::clone(&bus),
        ));

        Ok(CourierLinkClient {
            bus,
            channel,
            fetcher,
            credential_store,
            credential_key: self.credential_key,
            timeouts: self.timeouts,
            handlers: self.handlers,
            active_orders: Arc::new(Mutex::new(HashSet::new())),
        })
    }
}

/// Facade over the sync layer. Cheap to share behind an `Arc`.
pub struct CourierLinkClient {
    bus: Arc<EventBus>,
    channel: Arc<RealtimeChannel>,
    fetcher: Arc<dyn OrderFetcher>,
    credential_store: Arc<dyn CredentialStore>,
    credential_key: String,
    timeouts: CourierLinkTimeouts,
    handlers: TrackingHandlers,
    active_orders: Arc<Mutex<HashSet<String>>>,
}

impl std::fmt::Debug for CourierLinkClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CourierLinkClient")
            .field("credential_key", &self.credential_key)
            .field("timeouts", &self.timeouts)
            .finish_non_exhaustive()
    }
}

impl CourierLinkClient {
    pub fn builder() -> CourierLinkClientBuilder {
        CourierLinkClientBuilder::new()
    }

    /// Starts tracking an order with the client's default handlers.
    /// At most one live session per order id.
    pub async fn track_order(&self, order_id: &str) -> Result<TrackingSession> {
        self.track_order_with(order_id, self.handlers.clone()).await
    }

    /// Starts tracking an order with session-specific handlers.
    pub async fn track_order_with(
        &self,
        order_id: &str,
        handlers: TrackingHandlers,
    ) -> Result<TrackingSession> {
        {
            let mut active = self.active_orders.lock().unwrap();
            if !active.insert(order_id.to_string()) {
                return Err(CourierLinkError::AlreadyTracking(order_id.to_string()));
            }
        }

        let result = TrackingSession::start(
            order_id.to_string(),
            Arc::clone(&self.bus),
            Arc::clone(&self.channel),
            Arc::clone(&self.fetcher),
            Arc::clone(&self.credential_store),
            self.credential_key.clone(),
            self.timeouts.clone(),
            handlers,
            Arc::clone(&self.active_orders),
        )
        .await;

        if result.is_err() {
            self.active_orders.lock().unwrap().remove(order_id);
        }
        result
    }

    /// One-shot order fetch, e.g. to seed a session via
    /// [`TrackingSession::apply_snapshot`].
    pub async fn fetch_order(&self, order_id: &str) -> Result<OrderSnapshot> {
        self.fetcher.fetch_order(order_id).await
    }

    /// The event bus both sync paths publish on. Exposed for
    /// diagnostics and tests.
    pub fn bus(&self) -> Arc<EventBus> {
        Arc::clone(&self.bus)
    }

    /// The shared realtime channel.
    pub fn channel(&self) -> Arc<RealtimeChannel> {
        Arc::clone(&self.channel)
    }

    /// Permanently closes the realtime channel. Live sessions keep
    /// working in polling mode.
    pub async fn shutdown(&self) -> Result<()> {
        self.channel.shutdown().await
    }
}
