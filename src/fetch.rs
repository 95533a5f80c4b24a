//! HTTP order fetching, the pull half of the sync layer.

use std::sync::Arc;

use async_trait::async_trait;

use crate::credentials::CredentialStore;
use crate::error::{CourierLinkError, Result};
use crate::models::OrderSnapshot;

/// Fetches the current state of one order. The fallback poller and the
/// initial session seeding both go through this seam, so tests swap in
/// scripted implementations.
#[async_trait]
pub trait OrderFetcher: Send + Sync {
    async fn fetch_order(&self, order_id: &str) -> Result<OrderSnapshot>;
}

/// Production fetcher: `GET {base_url}/api/orders/{order_id}`, with a
/// bearer credential attached when the store has one.
pub struct HttpOrderFetcher {
    base_url: String,
    http: reqwest::Client,
    credential_store: Arc<dyn CredentialStore>,
    credential_key: String,
}

impl HttpOrderFetcher {
    pub fn new(
        base_url: impl Into<String>,
        http: reqwest::Client,
        credential_store: Arc<dyn CredentialStore>,
        credential_key: impl Into<String>,
    ) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self {
            base_url,
            http,
            credential_store,
            credential_key: credential_key.into(),
        }
    }
}

#[async_trait]
impl OrderFetcher for HttpOrderFetcher {
    async fn fetch_order(&self, order_id: &str) -> Result<OrderSnapshot> {
        let url = format!("{}/api/orders/{}", self.base_url, order_id);
        let mut request = self.http.get(&url);

        match self.credential_store.get(&self.credential_key).await {
            Ok(Some(token)) => request = request.bearer_auth(token),
            Ok(None) => {}
            Err(e) => log::warn!("[courier-link] Credential lookup failed for fetch: {}", e),
        }

        let response = request.send().await?;
        let status = response.status();
        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
            return Err(CourierLinkError::CredentialMissing(format!(
                "order fetch rejected with HTTP {}",
                status.as_u16()
            )));
        }
        if !status.is_success() {
            return Err(CourierLinkError::Fetch(format!(
                "order fetch failed with HTTP {}",
                status.as_u16()
            )));
        }

        let snapshot = response
            .json::<OrderSnapshot>()
            .await
            .map_err(|e| CourierLinkError::MalformedPayload(format!("order response: {}", e)))?;
        Ok(snapshot)
    }
}
