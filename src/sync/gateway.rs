//! HTTP client for the persistence service.
//!
//! Every request carries a fixed timeout. A timed-out attempt is retried up
//! to `retries` more times before the call fails with
//! [`TopologyError::Timeout`]. Other transport errors fail immediately.

use itertools::Itertools;
use reqwest::header::CONTENT_TYPE;
use reqwest::{Client, Method, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::time::Duration;
use tracing::{debug, warn};

use crate::anomaly::AnomalyMetric;
use crate::error::{Result, TopologyError};
use crate::graph::{ConnectionId, DeviceId, DeviceMetrics};
use crate::models::{
    AnomalousDevice, AssociateJsonRequest, ConnectionCreateRequest, ConnectionPatch,
    ConnectionRecord, DeviceAnalysis, DevicePatch, DeviceRecord, ErrorBody, HistoryEntry,
    MetricRankings, MetricsSample, PinRecord, ProjectDocument, ProjectSummary, StatusSummary,
    TopologyDetails,
};

/// Reported for operations whose response body is empty.
pub const DEFAULT_SUCCESS_MESSAGE: &str = "Operation successful";

#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Base URL including the `/api` prefix.
    pub base_url: String,
    pub timeout: Duration,
    pub retries: u32,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:8201/api".into(),
            timeout: Duration::from_millis(5000),
            retries: 2,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SyncGateway {
    client: Client,
    base_url: String,
    retries: u32,
}

impl SyncGateway {
    pub fn new(config: &GatewayConfig) -> Result<Self> {
        let client = Client::builder()
            .user_agent(concat!("netviz-editor/", env!("CARGO_PKG_VERSION")))
            .timeout(config.timeout)
            .build()?;
        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            retries: config.retries,
        })
    }

    /// Sends one request, retrying timeouts. Returns the status and body of
    /// the first attempt that completed.
    async fn execute(
        &self,
        method: Method,
        path: &str,
        body: Option<Vec<u8>>,
    ) -> Result<(StatusCode, Vec<u8>)> {
        let url = format!("{}{}", self.base_url, path);
        let attempts = self.retries + 1;
        for attempt in 1..=attempts {
            let mut request = self.client.request(method.clone(), &url);
            if let Some(body) = &body {
                request = request
                    .header(CONTENT_TYPE, "application/json")
                    .body(body.clone());
            }
            let outcome = async {
                let response = request.send().await?;
                let status = response.status();
                let bytes = response.bytes().await?;
                Ok::<_, reqwest::Error>((status, bytes.to_vec()))
            }
            .await;
            match outcome {
                Ok((status, bytes)) => {
                    debug!(%method, path, status = status.as_u16(), attempt, "api response");
                    return Ok((status, bytes));
                }
                Err(e) if e.is_timeout() => {
                    warn!(%method, path, attempt, attempts, "request timed out");
                }
                Err(e) => return Err(e.into()),
            }
        }
        Err(TopologyError::Timeout {
            endpoint: format!("{method} {path}"),
            attempts,
        })
    }

    /// Runs a request and decodes the body. `Ok(None)` means the backend
    /// answered with a success status and an empty body.
    async fn call<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        body: Option<Vec<u8>>,
    ) -> Result<Option<T>> {
        let endpoint = format!("{method} {path}");
        let (status, bytes) = self.execute(method, path, body).await?;

        if !status.is_success() {
            let message = serde_json::from_slice::<ErrorBody>(&bytes)
                .map(|b| b.error)
                .unwrap_or_else(|_| {
                    let text = String::from_utf8_lossy(&bytes).trim().to_string();
                    if text.is_empty() {
                        status.to_string()
                    } else {
                        text
                    }
                });
            return Err(TopologyError::Backend {
                status: status.as_u16(),
                message,
            });
        }

        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Ok(None);
        }
        serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|e| TopologyError::MalformedResponse {
                endpoint,
                reason: e.to_string(),
            })
    }

    /// Like [`Self::call`] but an empty body is a protocol error.
    async fn fetch<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        body: Option<Vec<u8>>,
    ) -> Result<T> {
        let endpoint = format!("{method} {path}");
        self.call(method, path, body)
            .await?
            .ok_or(TopologyError::MalformedResponse {
                endpoint,
                reason: "empty response body".into(),
            })
    }

    /// For operations that answer with a status message or nothing.
    async fn command(&self, method: Method, path: &str, body: Option<Vec<u8>>) -> Result<String> {
        let reply: Option<serde_json::Value> = self.call(method, path, body).await?;
        let message = reply
            .and_then(|v| v.get("message").and_then(|m| m.as_str()).map(str::to_string))
            .unwrap_or_else(|| DEFAULT_SUCCESS_MESSAGE.to_string());
        Ok(message)
    }

    fn encode<B: Serialize + ?Sized>(body: &B) -> Result<Option<Vec<u8>>> {
        Ok(Some(serde_json::to_vec(body)?))
    }

    /// Appends the parameters that are set as a query string.
    fn with_query(path: &str, params: &[(&str, Option<String>)]) -> String {
        let query = params
            .iter()
            .filter_map(|(key, value)| value.as_ref().map(|v| format!("{key}={v}")))
            .join("&");
        if query.is_empty() {
            path.to_string()
        } else {
            format!("{path}?{query}")
        }
    }

    // --- devices ---

    pub async fn list_devices(&self) -> Result<Vec<DeviceRecord>> {
        self.fetch(Method::GET, "/devices", None).await
    }

    pub async fn add_device(&self, record: &DeviceRecord) -> Result<DeviceRecord> {
        self.fetch(Method::POST, "/add_device", Self::encode(record)?)
            .await
    }

    pub async fn update_device(&self, id: &DeviceId, patch: &DevicePatch) -> Result<String> {
        self.command(Method::PUT, &format!("/devices/{id}"), Self::encode(patch)?)
            .await
    }

    pub async fn delete_device(&self, id: &DeviceId) -> Result<String> {
        self.command(Method::DELETE, &format!("/devices/{id}"), None)
            .await
    }

    pub async fn update_metrics(&self, id: &DeviceId, metrics: &DeviceMetrics) -> Result<String> {
        self.command(
            Method::PUT,
            &format!("/device_metrics/{id}"),
            Self::encode(metrics)?,
        )
        .await
    }

    /// Stored metrics reports, newest first.
    pub async fn metrics_history(&self, id: &DeviceId) -> Result<Vec<MetricsSample>> {
        self.fetch(Method::GET, &format!("/device_metrics/{id}"), None)
            .await
    }

    /// Replaces every device and connection on the backend.
    pub async fn replace_topology(&self, doc: &ProjectDocument) -> Result<String> {
        self.command(Method::PUT, "/topology", Self::encode(doc)?)
            .await
    }

    // --- connections ---

    pub async fn list_connections(&self) -> Result<Vec<ConnectionRecord>> {
        self.fetch(Method::GET, "/connections", None).await
    }

    pub async fn add_connection(&self, request: &ConnectionCreateRequest) -> Result<ConnectionRecord> {
        self.fetch(Method::POST, "/connections", Self::encode(request)?)
            .await
    }

    pub async fn update_connection(&self, id: &ConnectionId, patch: &ConnectionPatch) -> Result<String> {
        self.command(Method::PUT, &format!("/connections/{id}"), Self::encode(patch)?)
            .await
    }

    pub async fn delete_connection(&self, id: &ConnectionId) -> Result<String> {
        self.command(Method::DELETE, &format!("/connections/{id}"), None)
            .await
    }

    // --- projects ---

    pub async fn save_project(&self, doc: &ProjectDocument) -> Result<ProjectSummary> {
        self.fetch(Method::POST, "/projects", Self::encode(doc)?)
            .await
    }

    pub async fn list_projects(&self) -> Result<Vec<ProjectSummary>> {
        self.fetch(Method::GET, "/projects", None).await
    }

    pub async fn load_project(&self, id: u64) -> Result<ProjectDocument> {
        self.fetch(Method::GET, &format!("/projects/{id}"), None)
            .await
    }

    pub async fn list_json_files(&self) -> Result<Vec<String>> {
        self.fetch(Method::GET, "/json_files", None).await
    }

    // --- pins ---

    pub async fn list_pins(&self) -> Result<Vec<PinRecord>> {
        self.fetch(Method::GET, "/pins", None).await
    }

    pub async fn add_pin(&self, pin: &PinRecord) -> Result<PinRecord> {
        self.fetch(Method::POST, "/pins", Self::encode(pin)?).await
    }

    pub async fn delete_pin(&self, id: u64) -> Result<String> {
        self.command(Method::DELETE, &format!("/pins/{id}"), None)
            .await
    }

    pub async fn associate_json(&self, request: &AssociateJsonRequest) -> Result<String> {
        self.command(Method::POST, "/pins/associate_json", Self::encode(request)?)
            .await
    }

    pub async fn pins_by_json(&self, file: &str) -> Result<Vec<PinRecord>> {
        self.fetch(Method::GET, &format!("/pins/by_json/{file}"), None)
            .await
    }

    // --- anomaly scores ---

    pub async fn topology_details(&self) -> Result<TopologyDetails> {
        self.fetch(Method::GET, "/network/topology/details", None)
            .await
    }

    pub async fn status_summary(&self) -> Result<StatusSummary> {
        self.fetch(Method::GET, "/zscore/status-summary", None)
            .await
    }

    pub async fn device_zscores(&self, id: &DeviceId) -> Result<DeviceAnalysis> {
        self.fetch(Method::GET, &format!("/device/{id}/zscores"), None)
            .await
    }

    /// Devices beyond `threshold` (the backend default when `None`).
    pub async fn network_anomalies(
        &self,
        threshold: Option<f64>,
        metric: Option<AnomalyMetric>,
    ) -> Result<Vec<AnomalousDevice>> {
        let path = Self::with_query(
            "/network/anomalies",
            &[
                ("threshold", threshold.map(|t| t.to_string())),
                ("metric", metric.map(|m| m.to_string())),
            ],
        );
        self.fetch(Method::GET, &path, None).await
    }

    pub async fn metric_rankings(&self, metric: Option<AnomalyMetric>) -> Result<MetricRankings> {
        let path = Self::with_query("/metrics/rankings", &[("metric", metric.map(|m| m.to_string()))]);
        self.fetch(Method::GET, &path, None).await
    }

    pub async fn device_history(
        &self,
        id: &DeviceId,
        limit: Option<usize>,
        metric: Option<AnomalyMetric>,
    ) -> Result<Vec<HistoryEntry>> {
        let path = Self::with_query(
            &format!("/device/{id}/history"),
            &[
                ("limit", limit.map(|l| l.to_string())),
                ("metric", metric.map(|m| m.to_string())),
            ],
        );
        self.fetch(Method::GET, &path, None).await
    }
}
