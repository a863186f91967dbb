//! HTTP client for the inventory backend.
//!
//! Speaks the backend's wire contract: conditional product writes against a
//! base version, atomic batch deduction, and idempotent sale submission.
//! This layer does no retrying of its own; the resilience layer above it
//! owns retries and the circuit breaker.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{RequestBuilder, Response, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, warn};

use tillsync_core::{InventoryBackend, UpdateResult};
use tillsync_domain::{
    DeductionRequest, LineShortage, Product, ProductPatch, Result, SaleDraft, SaleReceipt,
    TillsyncError,
};

use crate::errors::InfraError;

const IDEMPOTENCY_HEADER: &str = "Idempotency-Key";

/// Configuration for the backend client.
#[derive(Debug, Clone)]
pub struct BackendClientConfig {
    /// Base URL, e.g. "https://inventory.example.com".
    pub base_url: String,
    /// Bearer token, if the deployment requires one.
    pub api_token: Option<String>,
    /// Per-request timeout.
    pub timeout: Duration,
}

impl Default for BackendClientConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8080".to_string(),
            api_token: None,
            timeout: Duration::from_secs(10),
        }
    }
}

/// Thin reqwest wrapper implementing the [`InventoryBackend`] port.
pub struct BackendClient {
    http: reqwest::Client,
    config: BackendClientConfig,
}

#[derive(Debug, Serialize)]
struct UpdateProductRequest<'a> {
    #[serde(rename = "baseVersion")]
    base_version: i64,
    patch: &'a ProductPatch,
}

#[derive(Debug, Deserialize)]
struct ConflictResponse {
    code: String,
    current: Product,
}

#[derive(Debug, Deserialize)]
struct DeductConflictResponse {
    code: String,
    #[serde(default)]
    failures: Vec<LineShortage>,
}

impl BackendClient {
    /// Build a client from configuration.
    pub fn new(config: BackendClientConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(InfraError::from)?;
        Ok(Self { http, config })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.config.base_url.trim_end_matches('/'))
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.config.api_token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    /// Map a non-success response into a domain error, consuming the body.
    async fn error_for(&self, response: Response) -> TillsyncError {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        let snippet: String = body.chars().take(200).collect();
        warn!(status = status.as_u16(), body = %snippet, "backend request failed");

        match status {
            StatusCode::NOT_FOUND => TillsyncError::NotFound(format!("HTTP 404: {snippet}")),
            StatusCode::REQUEST_TIMEOUT | StatusCode::TOO_MANY_REQUESTS => {
                TillsyncError::Network(format!("HTTP {}: {snippet}", status.as_u16()))
            }
            status if status.is_server_error() => {
                TillsyncError::Network(format!("HTTP {}: {snippet}", status.as_u16()))
            }
            status if status.is_client_error() => {
                TillsyncError::InvalidInput(format!("HTTP {}: {snippet}", status.as_u16()))
            }
            status => TillsyncError::Network(format!("HTTP {}: {snippet}", status.as_u16())),
        }
    }
}

#[async_trait]
impl InventoryBackend for BackendClient {
    #[instrument(skip(self), fields(product_id = %product_id))]
    async fn fetch_product(&self, product_id: &str) -> Result<Option<Product>> {
        let request = self.authorized(self.http.get(self.url(&format!("/products/{product_id}"))));
        let response = request.send().await.map_err(InfraError::from)?;

        match response.status() {
            StatusCode::OK => {
                let product = response.json::<Product>().await.map_err(InfraError::from)?;
                Ok(Some(product))
            }
            StatusCode::NOT_FOUND => Ok(None),
            _ => Err(self.error_for(response).await),
        }
    }

    #[instrument(skip(self, patch), fields(product_id = %product_id, base_version))]
    async fn update_product(
        &self,
        product_id: &str,
        base_version: i64,
        patch: &ProductPatch,
        idempotency_key: &str,
    ) -> Result<UpdateResult> {
        let body = UpdateProductRequest { base_version, patch };
        let request = self
            .authorized(self.http.put(self.url(&format!("/products/{product_id}"))))
            .header(IDEMPOTENCY_HEADER, idempotency_key)
            .json(&body);
        let response = request.send().await.map_err(InfraError::from)?;

        match response.status() {
            StatusCode::OK => {
                let product = response.json::<Product>().await.map_err(InfraError::from)?;
                Ok(UpdateResult::Accepted(product))
            }
            StatusCode::CONFLICT => {
                let conflict = response.json::<ConflictResponse>().await.map_err(|err| {
                    warn!(error = %err, "conflict body was unparseable");
                    TillsyncError::Conflict {
                        entity_id: product_id.to_string(),
                        base_version,
                    }
                })?;
                debug!(code = %conflict.code, server_version = conflict.current.version,
                    "conditional write rejected");
                Ok(UpdateResult::StaleVersion(conflict.current))
            }
            StatusCode::NOT_FOUND => Ok(UpdateResult::NotFound),
            _ => Err(self.error_for(response).await),
        }
    }

    #[instrument(skip(self, request), fields(lines = request.items.len()))]
    async fn deduct_stock(&self, request: &DeductionRequest) -> Result<()> {
        let http_request = self
            .authorized(self.http.post(self.url("/inventory/deduct")))
            .header(IDEMPOTENCY_HEADER, &request.idempotency_key)
            .json(request);
        let response = http_request.send().await.map_err(InfraError::from)?;

        match response.status() {
            StatusCode::OK => Ok(()),
            StatusCode::CONFLICT => {
                let conflict =
                    response.json::<DeductConflictResponse>().await.map_err(InfraError::from)?;
                debug!(code = %conflict.code, failing_lines = conflict.failures.len(),
                    "deduction rejected");
                Err(TillsyncError::InsufficientStock(conflict.failures))
            }
            _ => Err(self.error_for(response).await),
        }
    }

    #[instrument(skip(self, draft), fields(location_id = %draft.location_id))]
    async fn submit_sale(&self, draft: &SaleDraft, idempotency_key: &str) -> Result<SaleReceipt> {
        let request = self
            .authorized(self.http.post(self.url("/sales")))
            .header(IDEMPOTENCY_HEADER, idempotency_key)
            .json(draft);
        let response = request.send().await.map_err(InfraError::from)?;

        match response.status() {
            StatusCode::OK | StatusCode::CREATED => {
                let receipt = response.json::<SaleReceipt>().await.map_err(InfraError::from)?;
                Ok(receipt)
            }
            _ => Err(self.error_for(response).await),
        }
    }

    #[instrument(skip(self))]
    async fn health_check(&self) -> Result<()> {
        let response = self
            .authorized(self.http.get(self.url("/health")))
            .send()
            .await
            .map_err(InfraError::from)?;
        if response.status().is_success() {
            Ok(())
        } else {
            Err(self.error_for(response).await)
        }
    }
}
