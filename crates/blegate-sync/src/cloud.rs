//! # Cloud Client
//!
//! HTTP client for the gateway backend.
//!
//! ## Request Pipeline
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │  CloudApi call ──► reqwest (default headers) ──► HTTP response          │
//! │                     Authorization: Gateway <hash>        │              │
//! │                     Content-Type: application/json       ▼              │
//! │                                                   status 2xx?  ── no ──► Status
//! │                                                          │ yes          │
//! │                                                          ▼              │
//! │                                                   JSON envelope ─ bad ─► MalformedResponse
//! │                                                          │              │
//! │                                                          ▼              │
//! │                                                   meta.error? ─ set ──► Backend
//! │                                                          │ null         │
//! │                                                          ▼              │
//! │                                                   data[0] / default     │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The sync loops depend on the [`CloudApi`] trait, not on the HTTP client,
//! so tests substitute an in-process fake.

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use serde::de::DeserializeOwned;
use tracing::{debug, info};
use url::Url;

use blegate_core::Transaction;

use crate::config::GatewayConfig;
use crate::error::{ClientError, ClientResult};
use crate::protocol::{
    AuthRequest, CatalogSnapshot, Envelope, Gate, GateInfo, SyncRequest, SyncResponse,
};

const AUTH_PATH: &str = "/api/gate/auth";
const DEVICES_PATH: &str = "/api/gate/v2/devices";
const SYNC_PATH: &str = "/api/gate/sync";

// =============================================================================
// Cloud API Trait
// =============================================================================

/// Operations the runtime needs from the backend.
#[async_trait]
pub trait CloudApi: Send + Sync {
    /// Exchanges the API key for backend acceptance of this gateway.
    ///
    /// Returns the gateway record when the backend includes one.
    async fn authenticate(&self) -> ClientResult<Option<GateInfo>>;

    /// Fetches the full device/device-group whitelist.
    async fn fetch_catalog(&self) -> ClientResult<CatalogSnapshot>;

    /// Uploads a batch of transactions, scoped by `watermark` when non-zero.
    async fn upload_transactions(
        &self,
        batch: &[Transaction],
        watermark: i64,
    ) -> ClientResult<SyncResponse>;
}

// =============================================================================
// HTTP Implementation
// =============================================================================

/// [`CloudApi`] over HTTPS.
#[derive(Debug, Clone)]
pub struct HttpCloudClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    gateway_hash: String,
}

impl HttpCloudClient {
    /// Builds a client from the `[gateway]` and `[cloud]` sections.
    pub fn new(config: &GatewayConfig) -> ClientResult<Self> {
        let base_url = config.cloud.base_url.trim_end_matches('/').to_string();
        Url::parse(&base_url)?;

        let mut headers = HeaderMap::new();
        let credential = HeaderValue::from_str(&format!("Gateway {}", config.gateway.hash))
            .map_err(|e| ClientError::InvalidCredential(e.to_string()))?;
        headers.insert(AUTHORIZATION, credential);
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        let http = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(config.request_timeout())
            .connect_timeout(std::time::Duration::from_secs(
                config.cloud.connect_timeout_secs,
            ))
            .build()?;

        Ok(Self {
            http,
            base_url,
            api_key: config.gateway.api_key.clone(),
            gateway_hash: config.gateway.hash.clone(),
        })
    }

    /// Builds the absolute URL for an endpoint path.
    pub(crate) fn endpoint(&self, path: &str) -> ClientResult<Url> {
        Ok(Url::parse(&format!("{}{}", self.base_url, path))?)
    }

    /// Builds the upload URL, attaching `last_sync` only when non-zero.
    pub(crate) fn sync_url(&self, watermark: i64) -> ClientResult<Url> {
        let mut url = self.endpoint(SYNC_PATH)?;
        if watermark != 0 {
            url.query_pairs_mut()
                .append_pair("last_sync", &watermark.to_string());
        }
        Ok(url)
    }

    /// Checks status, then decodes the envelope and its `meta.error`.
    async fn decode<T: DeserializeOwned>(
        path: &str,
        resp: reqwest::Response,
    ) -> ClientResult<Envelope<T>> {
        let status = resp.status();
        let body = resp.text().await?;
        debug!(path, status = status.as_u16(), response = %body, "Backend response");

        if !status.is_success() {
            return Err(ClientError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let envelope: Envelope<T> = serde_json::from_str(&body)?;
        if let Some(message) = envelope.meta.error_message() {
            return Err(ClientError::Backend(message));
        }

        Ok(envelope)
    }
}

#[async_trait]
impl CloudApi for HttpCloudClient {
    async fn authenticate(&self) -> ClientResult<Option<GateInfo>> {
        let body = AuthRequest {
            api_key: self.api_key.clone(),
            gate: Gate {
                hash: self.gateway_hash.clone(),
            },
        };
        debug!(path = AUTH_PATH, gateway = %self.gateway_hash, "Authenticating gateway");

        let resp = self
            .http
            .post(self.endpoint(AUTH_PATH)?)
            .json(&body)
            .send()
            .await?;

        let envelope = Self::decode::<GateInfo>(AUTH_PATH, resp).await?;
        let gate = envelope.data.into_iter().next();

        info!(
            gateway = %self.gateway_hash,
            name = gate.as_ref().map(|g| g.name.as_str()).unwrap_or(""),
            "Gateway authenticated"
        );
        Ok(gate)
    }

    async fn fetch_catalog(&self) -> ClientResult<CatalogSnapshot> {
        let resp = self.http.get(self.endpoint(DEVICES_PATH)?).send().await?;

        let envelope = Self::decode::<CatalogSnapshot>(DEVICES_PATH, resp).await?;
        envelope.data.into_iter().next().ok_or_else(|| {
            ClientError::MalformedResponse("catalog response has no data entries".into())
        })
    }

    async fn upload_transactions(
        &self,
        batch: &[Transaction],
        watermark: i64,
    ) -> ClientResult<SyncResponse> {
        let body = SyncRequest::from_batch(batch);
        debug!(
            path = SYNC_PATH,
            count = batch.len(),
            last_sync = watermark,
            "Uploading transactions"
        );

        let resp = self
            .http
            .post(self.sync_url(watermark)?)
            .json(&body)
            .send()
            .await?;

        let envelope = Self::decode::<SyncResponse>(SYNC_PATH, resp).await?;
        Ok(envelope.data.into_iter().next().unwrap_or_default())
    }
}

// =============================================================================
// Tests
// =============================================================================
