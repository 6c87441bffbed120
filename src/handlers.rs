use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{delete, get, post, put},
    Json, Router,
};
use polars::prelude::PolarsError;
use serde::Deserialize;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use crate::anomaly::AnomalyMetric;
use crate::data;
use crate::error::TopologyError;
use crate::graph::{
    check_bandwidth, ConnectionId, ConnectionMetrics, ConnectionType, DeviceId, DeviceMetrics,
    DeviceType, Point,
};
use crate::models::{
    AnomalousDevice, AssociateJsonRequest, ConnectionCreateRequest, ConnectionPatch,
    ConnectionRecord, DeviceAnalysis, DevicePatch, DeviceRecord, ErrorBody, HistoryEntry,
    MetricRankings, MetricsSample, PinRecord, ProjectDocument, ProjectSummary, StatusMessage,
    StatusSummary, TopologyDetails,
};
use crate::state::{AppState, StoredProject};
use crate::sync::codec;
use crate::zscore;

/// Error response: a status code plus `{"error": message}`.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn internal(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: message.into(),
        }
    }
}

impl From<TopologyError> for ApiError {
    fn from(e: TopologyError) -> Self {
        let status = match &e {
            TopologyError::NotFound { .. } => StatusCode::NOT_FOUND,
            TopologyError::ValidationFailed(_)
            | TopologyError::InvalidLayer(_)
            | TopologyError::DanglingReference { .. }
            | TopologyError::JsonParse(_) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            error!("request failed: {e}");
        }
        Self {
            status,
            message: e.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(ErrorBody { error: self.message })).into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

fn scoring_failed(e: PolarsError) -> ApiError {
    error!("Polars z-score error: {}", e);
    ApiError::internal("failed to compute anomaly scores")
}

/// Reports returned by the history endpoints unless `limit` says otherwise.
pub const DEFAULT_HISTORY_LIMIT: usize = 100;

/// Query parameters for `GET /api/network/anomalies`.
#[derive(Debug, Default, Deserialize)]
pub struct AnomalyQuery {
    #[serde(default, deserialize_with = "empty_string_as_none")]
    pub threshold: Option<f64>,
    #[serde(default, deserialize_with = "empty_string_as_none")]
    pub metric: Option<AnomalyMetric>,
}

/// Query parameters for `GET /api/metrics/rankings`.
#[derive(Debug, Default, Deserialize)]
pub struct RankingQuery {
    #[serde(default, deserialize_with = "empty_string_as_none")]
    pub metric: Option<AnomalyMetric>,
}

/// Query parameters for `GET /api/device/{id}/history`.
#[derive(Debug, Default, Deserialize)]
pub struct HistoryQuery {
    #[serde(default, deserialize_with = "empty_string_as_none")]
    pub limit: Option<usize>,
    #[serde(default, deserialize_with = "empty_string_as_none")]
    pub metric: Option<AnomalyMetric>,
}

fn empty_string_as_none<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: serde::Deserializer<'de>,
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    let opt: Option<String> = Option::deserialize(deserializer)?;
    match opt {
        None => Ok(None),
        Some(s) if s.is_empty() => Ok(None),
        Some(s) => s.parse::<T>().map(Some).map_err(serde::de::Error::custom),
    }
}

/// The persistence service, mounted under `/api`.
pub fn router(state: Arc<AppState>) -> Router {
    let api = Router::new()
        .route("/devices", get(list_devices))
        .route("/add_device", post(add_device))
        .route("/devices/{id}", put(update_device).delete(delete_device))
        .route(
            "/device_metrics/{id}",
            get(metrics_history).put(update_device_metrics),
        )
        .route("/topology", put(replace_topology))
        .route("/connections", get(list_connections).post(add_connection))
        .route(
            "/connections/{id}",
            put(update_connection).delete(delete_connection),
        )
        .route("/projects", get(list_projects).post(save_project))
        .route("/projects/{id}", get(load_project))
        .route("/json_files", get(list_json_files))
        .route("/pins", get(list_pins).post(add_pin))
        .route("/pins/{id}", delete(delete_pin))
        .route("/pins/associate_json", post(associate_json))
        .route("/pins/by_json/{file}", get(pins_by_json))
        .route("/network/topology/details", get(topology_details))
        .route("/zscore/status-summary", get(status_summary))
        .route("/device/{id}/zscores", get(device_zscores))
        .route("/device/{id}/history", get(device_history))
        .route("/network/anomalies", get(network_anomalies))
        .route("/metrics/rankings", get(metric_rankings));

    Router::new()
        .nest("/api", api)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn non_blank(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

fn check_device(record: &DeviceRecord) -> Result<(), TopologyError> {
    if record.name.trim().is_empty() {
        return Err(TopologyError::invalid("device name is required"));
    }
    record.device_type.parse::<DeviceType>()?;
    if !Point::new(record.x, record.y).is_finite() {
        return Err(TopologyError::invalid("coordinates must be valid numbers"));
    }
    if let Some(metrics) = &record.metrics {
        metrics.check()?;
    }
    Ok(())
}

/// Endpoint rules for a new link among `devices`, given the links already
/// accepted.
fn check_link(
    devices: &[DeviceRecord],
    connections: &[ConnectionRecord],
    source: &DeviceId,
    target: &DeviceId,
) -> Result<(), TopologyError> {
    if source == target {
        return Err(TopologyError::invalid("cannot connect device to itself"));
    }
    for endpoint in [source, target] {
        if !devices.iter().any(|d| d.id.as_ref() == Some(endpoint)) {
            return Err(TopologyError::not_found("device", endpoint));
        }
    }
    let duplicate = connections.iter().any(|c| {
        (&c.source_device_id == source && &c.target_device_id == target)
            || (&c.source_device_id == target && &c.target_device_id == source)
    });
    if duplicate {
        return Err(TopologyError::invalid(
            "connection already exists between these devices",
        ));
    }
    Ok(())
}

fn apply_patch(record: &mut DeviceRecord, patch: &DevicePatch) -> Result<(), TopologyError> {
    if let Some(name) = non_blank(&patch.config.name) {
        record.name = name.to_string();
    }
    let fields = [
        (&mut record.ip_address, &patch.config.ip_address),
        (&mut record.subnet_mask, &patch.config.subnet_mask),
        (&mut record.mac_address, &patch.config.mac_address),
        (&mut record.gateway, &patch.config.gateway),
        (&mut record.dns_server, &patch.config.dns_server),
    ];
    for (slot, value) in fields {
        if let Some(v) = non_blank(value) {
            *slot = Some(v.to_string());
        }
    }
    let x = patch.x.unwrap_or(record.x);
    let y = patch.y.unwrap_or(record.y);
    if !Point::new(x, y).is_finite() {
        return Err(TopologyError::invalid("coordinates must be valid numbers"));
    }
    record.x = x;
    record.y = y;
    Ok(())
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}

/// GET /api/devices
pub async fn list_devices(State(state): State<Arc<AppState>>) -> Json<Vec<DeviceRecord>> {
    Json(state.data.read().await.devices.clone())
}

/// POST /api/add_device - Keeps a client-minted id, otherwise assigns one.
pub async fn add_device(
    State(state): State<Arc<AppState>>,
    Json(mut record): Json<DeviceRecord>,
) -> ApiResult<(StatusCode, Json<DeviceRecord>)> {
    check_device(&record)?;
    let mut data = state.data.write().await;
    let id = match record.id.take() {
        Some(id) => id,
        None => DeviceId::from(data.next_id().to_string()),
    };
    if data.devices.iter().any(|d| d.id.as_ref() == Some(&id)) {
        return Err(TopologyError::invalid(format!("device id already in use: {id}")).into());
    }
    if let Some(metrics) = record.metrics {
        data.record_metrics(&id, metrics, unix_now());
    }
    record.id = Some(id);
    data.devices.push(record.clone());
    Ok((StatusCode::CREATED, Json(record)))
}

/// PUT /api/devices/{id}
pub async fn update_device(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(patch): Json<DevicePatch>,
) -> ApiResult<Json<StatusMessage>> {
    let id = DeviceId::from(id);
    let mut data = state.data.write().await;
    let record = data
        .devices
        .iter_mut()
        .find(|d| d.id.as_ref() == Some(&id))
        .ok_or_else(|| TopologyError::not_found("device", &id))?;
    apply_patch(record, &patch)?;
    Ok(Json(StatusMessage::new("Device updated")))
}

/// DELETE /api/devices/{id} - Also drops every connection touching the
/// device.
pub async fn delete_device(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Json<StatusMessage>> {
    let id = DeviceId::from(id);
    let mut data = state.data.write().await;
    let before = data.devices.len();
    data.devices.retain(|d| d.id.as_ref() != Some(&id));
    if data.devices.len() == before {
        return Err(TopologyError::not_found("device", &id).into());
    }
    data.history.remove(&id);
    let links = data.connections.len();
    data.connections
        .retain(|c| c.source_device_id != id && c.target_device_id != id);
    let removed = links - data.connections.len();
    Ok(Json(StatusMessage::new(format!(
        "Device deleted with {removed} connection(s)"
    ))))
}

/// PUT /api/device_metrics/{id} - Sets the current metrics and appends them
/// to the device's history.
pub async fn update_device_metrics(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(metrics): Json<DeviceMetrics>,
) -> ApiResult<Json<StatusMessage>> {
    metrics.check()?;
    let id = DeviceId::from(id);
    let mut data = state.data.write().await;
    let record = data
        .devices
        .iter_mut()
        .find(|d| d.id.as_ref() == Some(&id))
        .ok_or_else(|| TopologyError::not_found("device", &id))?;
    record.metrics = Some(metrics);
    data.record_metrics(&id, metrics, unix_now());
    Ok(Json(StatusMessage::new("Metrics updated")))
}

/// GET /api/device_metrics/{id} - Stored reports, newest first.
pub async fn metrics_history(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Json<Vec<MetricsSample>>> {
    let id = DeviceId::from(id);
    let data = state.data.read().await;
    data.device(&id)
        .ok_or_else(|| TopologyError::not_found("device", &id))?;
    Ok(Json(
        data.metrics_history(&id)
            .take(DEFAULT_HISTORY_LIMIT)
            .copied()
            .collect(),
    ))
}

/// GET /api/connections
pub async fn list_connections(State(state): State<Arc<AppState>>) -> Json<Vec<ConnectionRecord>> {
    Json(state.data.read().await.connections.clone())
}

/// POST /api/connections
pub async fn add_connection(
    State(state): State<Arc<AppState>>,
    Json(request): Json<ConnectionCreateRequest>,
) -> ApiResult<(StatusCode, Json<ConnectionRecord>)> {
    let (source, target) = (&request.source_device_id, &request.target_device_id);
    request.connection_type.parse::<ConnectionType>()?;
    check_bandwidth(request.bandwidth)?;

    let mut data = state.data.write().await;
    check_link(&data.devices, &data.connections, source, target)?;

    let id = match request.id.clone() {
        Some(id) => id,
        None => ConnectionId::from(data.next_id().to_string()),
    };
    if data.connections.iter().any(|c| c.id.as_ref() == Some(&id)) {
        return Err(TopologyError::invalid(format!("connection id already in use: {id}")).into());
    }
    let record = ConnectionRecord {
        id: Some(id),
        source_device_id: source.clone(),
        target_device_id: target.clone(),
        connection_type: request.connection_type.clone(),
        bandwidth: request.bandwidth,
        start_port_id: None,
        end_port_id: None,
        layer: None,
        metrics: Some(ConnectionMetrics {
            latency: request.metrics.latency,
            packet_loss: request.metrics.packet_loss,
            throughput: 0.0,
        }),
    };
    data.connections.push(record.clone());
    Ok((StatusCode::CREATED, Json(record)))
}

/// PUT /api/connections/{id}
pub async fn update_connection(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(patch): Json<ConnectionPatch>,
) -> ApiResult<Json<StatusMessage>> {
    if let Some(kind) = &patch.connection_type {
        kind.parse::<ConnectionType>()?;
    }
    if let Some(bandwidth) = patch.bandwidth {
        check_bandwidth(bandwidth)?;
    }
    let id = ConnectionId::from(id);
    let mut data = state.data.write().await;
    let record = data
        .connections
        .iter_mut()
        .find(|c| c.id.as_ref() == Some(&id))
        .ok_or_else(|| TopologyError::not_found("connection", &id))?;
    if let Some(kind) = patch.connection_type {
        record.connection_type = kind;
    }
    if let Some(bandwidth) = patch.bandwidth {
        record.bandwidth = bandwidth;
    }
    Ok(Json(StatusMessage::new("Connection updated")))
}

/// DELETE /api/connections/{id}
pub async fn delete_connection(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Json<StatusMessage>> {
    let id = ConnectionId::from(id);
    let mut data = state.data.write().await;
    let before = data.connections.len();
    data.connections.retain(|c| c.id.as_ref() != Some(&id));
    if data.connections.len() == before {
        return Err(TopologyError::not_found("connection", &id).into());
    }
    Ok(Json(StatusMessage::new("Connection deleted")))
}

/// PUT /api/topology - Replaces every device and connection, as after a
/// project load in the editor. Nothing changes unless the whole document
/// is valid.
pub async fn replace_topology(
    State(state): State<Arc<AppState>>,
    Json(document): Json<ProjectDocument>,
) -> ApiResult<Json<StatusMessage>> {
    for record in &document.devices {
        check_device(record)?;
    }
    let mut data = state.data.write().await;

    let mut devices: Vec<DeviceRecord> = Vec::with_capacity(document.devices.len());
    for mut record in document.devices {
        let id = match record.id.take() {
            Some(id) => id,
            None => DeviceId::from(data.next_id().to_string()),
        };
        if devices.iter().any(|d| d.id.as_ref() == Some(&id)) {
            return Err(TopologyError::invalid(format!("duplicate device id: {id}")).into());
        }
        record.id = Some(id);
        devices.push(record);
    }

    let mut connections: Vec<ConnectionRecord> = Vec::with_capacity(document.connections.len());
    for mut record in document.connections {
        record.connection_type.parse::<ConnectionType>()?;
        check_bandwidth(record.bandwidth)?;
        check_link(
            &devices,
            &connections,
            &record.source_device_id,
            &record.target_device_id,
        )?;
        let id = match record.id.take() {
            Some(id) => id,
            None => ConnectionId::from(data.next_id().to_string()),
        };
        if connections.iter().any(|c| c.id.as_ref() == Some(&id)) {
            return Err(TopologyError::invalid(format!("duplicate connection id: {id}")).into());
        }
        record.id = Some(id);
        connections.push(record);
    }

    let now = unix_now();
    data.history
        .retain(|id, _| devices.iter().any(|d| d.id.as_ref() == Some(id)));
    for record in &devices {
        if let (Some(id), Some(metrics)) = (&record.id, record.metrics) {
            data.record_metrics(id, metrics, now);
        }
    }
    let message = format!(
        "Topology replaced with {} device(s) and {} connection(s)",
        devices.len(),
        connections.len()
    );
    data.devices = devices;
    data.connections = connections;
    info!("{message}");
    Ok(Json(StatusMessage::new(message)))
}

/// POST /api/projects - Stores the project and writes `<name>.json` into
/// the projects directory.
pub async fn save_project(
    State(state): State<Arc<AppState>>,
    Json(document): Json<ProjectDocument>,
) -> ApiResult<Json<ProjectSummary>> {
    let name = non_blank(&document.name)
        .ok_or_else(|| TopologyError::invalid("project name is required"))?
        .to_string();
    // Devices must decode; connections that do not fit are tolerated as on load.
    codec::project_to_graph(&document)?;
    let path = state.config.projects_dir.join(data::project_file_name(&name)?);
    let written = {
        let (path, document) = (path.clone(), document.clone());
        tokio::task::spawn_blocking(move || data::save_project_file(&path, &document)).await
    };
    written.map_err(|e| ApiError::internal(format!("project write task failed: {e}")))??;

    let mut data = state.data.write().await;
    let id = data.next_id();
    let stored = StoredProject { id, document };
    let summary = stored.summary();
    data.projects.push(stored);
    info!(project = id, path = %path.display(), "project saved");
    Ok(Json(summary))
}

/// GET /api/projects
pub async fn list_projects(State(state): State<Arc<AppState>>) -> Json<Vec<ProjectSummary>> {
    let data = state.data.read().await;
    Json(data.projects.iter().map(StoredProject::summary).collect())
}

/// GET /api/projects/{id}
pub async fn load_project(
    State(state): State<Arc<AppState>>,
    Path(id): Path<u64>,
) -> ApiResult<Json<ProjectDocument>> {
    let data = state.data.read().await;
    data.projects
        .iter()
        .find(|p| p.id == id)
        .map(|p| Json(p.document.clone()))
        .ok_or_else(|| TopologyError::not_found("project", id).into())
}

/// GET /api/json_files
pub async fn list_json_files(State(state): State<Arc<AppState>>) -> ApiResult<Json<Vec<String>>> {
    let dir = state.config.projects_dir.clone();
    let files = tokio::task::spawn_blocking(move || data::list_json_files(&dir))
        .await
        .map_err(|e| ApiError::internal(format!("directory listing task failed: {e}")))??;
    Ok(Json(files))
}

/// GET /api/pins
pub async fn list_pins(State(state): State<Arc<AppState>>) -> Json<Vec<PinRecord>> {
    Json(state.data.read().await.pins.clone())
}

/// POST /api/pins - Assigns the id and, when missing, the timestamp.
pub async fn add_pin(
    State(state): State<Arc<AppState>>,
    Json(mut pin): Json<PinRecord>,
) -> ApiResult<(StatusCode, Json<PinRecord>)> {
    if pin.pin_name.trim().is_empty() {
        return Err(TopologyError::invalid("pin name is required").into());
    }
    if !(-90.0..=90.0).contains(&pin.latitude) || !(-180.0..=180.0).contains(&pin.longitude) {
        return Err(TopologyError::invalid(format!(
            "coordinates out of range: {}, {}",
            pin.latitude, pin.longitude
        ))
        .into());
    }
    let mut data = state.data.write().await;
    pin.id = Some(data.next_id());
    pin.timestamp_utc.get_or_insert_with(unix_now);
    data.pins.push(pin.clone());
    Ok((StatusCode::CREATED, Json(pin)))
}

/// DELETE /api/pins/{id}
pub async fn delete_pin(
    State(state): State<Arc<AppState>>,
    Path(id): Path<u64>,
) -> ApiResult<Json<StatusMessage>> {
    let mut data = state.data.write().await;
    let before = data.pins.len();
    data.pins.retain(|p| p.id != Some(id));
    if data.pins.len() == before {
        return Err(TopologyError::not_found("pin", id).into());
    }
    Ok(Json(StatusMessage::new("Pin deleted")))
}

/// POST /api/pins/associate_json
pub async fn associate_json(
    State(state): State<Arc<AppState>>,
    Json(request): Json<AssociateJsonRequest>,
) -> ApiResult<Json<StatusMessage>> {
    let file = request.json_file.trim();
    if file.is_empty() {
        return Err(TopologyError::invalid("json_file is required").into());
    }
    let mut data = state.data.write().await;
    let pin = data
        .pins
        .iter_mut()
        .find(|p| p.id == Some(request.pin_id))
        .ok_or_else(|| TopologyError::not_found("pin", request.pin_id))?;
    pin.json_file = Some(file.to_string());
    Ok(Json(StatusMessage::new(format!(
        "Pin {} associated with {file}",
        request.pin_id
    ))))
}

/// GET /api/pins/by_json/{file}
pub async fn pins_by_json(
    State(state): State<Arc<AppState>>,
    Path(file): Path<String>,
) -> Json<Vec<PinRecord>> {
    let data = state.data.read().await;
    Json(
        data.pins
            .iter()
            .filter(|p| p.json_file.as_deref() == Some(file.as_str()))
            .cloned()
            .collect(),
    )
}

/// GET /api/network/topology/details - Z-scores computed with Polars.
pub async fn topology_details(
    State(state): State<Arc<AppState>>,
) -> ApiResult<Json<TopologyDetails>> {
    let data = state.data.read().await;
    let result = zscore::topology_details(&data.devices);
    drop(data);

    result.map(Json).map_err(scoring_failed)
}

/// GET /api/zscore/status-summary
pub async fn status_summary(State(state): State<Arc<AppState>>) -> ApiResult<Json<StatusSummary>> {
    let Json(details) = topology_details(State(state)).await?;
    Ok(Json(zscore::status_summary(&details)))
}

/// GET /api/device/{id}/zscores - One device against the population.
pub async fn device_zscores(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Json<DeviceAnalysis>> {
    let id = DeviceId::from(id);
    let data = state.data.read().await;
    let metrics = data
        .device(&id)
        .ok_or_else(|| TopologyError::not_found("device", &id))?
        .metrics
        .ok_or_else(|| TopologyError::not_found("device metrics", &id))?;
    let stats = zscore::device_population(&data.devices);
    drop(data);

    let stats = stats.map_err(scoring_failed)?;
    Ok(Json(zscore::analyze_device(&stats, &metrics)))
}

/// GET /api/network/anomalies?threshold=&metric=
pub async fn network_anomalies(
    State(state): State<Arc<AppState>>,
    Query(query): Query<AnomalyQuery>,
) -> ApiResult<Json<Vec<AnomalousDevice>>> {
    let threshold = query.threshold.unwrap_or(zscore::DEFAULT_ANOMALY_THRESHOLD);
    if !(threshold.is_finite() && threshold >= 0.0) {
        return Err(TopologyError::invalid(format!("invalid threshold: {threshold}")).into());
    }
    let data = state.data.read().await;
    let result = zscore::anomalous_devices(&data.devices, threshold, query.metric);
    drop(data);

    result.map(Json).map_err(scoring_failed)
}

/// GET /api/metrics/rankings?metric=
pub async fn metric_rankings(
    State(state): State<Arc<AppState>>,
    Query(query): Query<RankingQuery>,
) -> ApiResult<Json<MetricRankings>> {
    let data = state.data.read().await;
    let result = zscore::metric_rankings(&data.devices, query.metric);
    drop(data);

    result.map(Json).map_err(scoring_failed)
}

/// GET /api/device/{id}/history?limit=&metric= - Stored reports, newest
/// first, scored against the current population.
pub async fn device_history(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Query(query): Query<HistoryQuery>,
) -> ApiResult<Json<Vec<HistoryEntry>>> {
    let id = DeviceId::from(id);
    let limit = query.limit.unwrap_or(DEFAULT_HISTORY_LIMIT);
    let data = state.data.read().await;
    data.device(&id)
        .ok_or_else(|| TopologyError::not_found("device", &id))?;
    let stats = zscore::device_population(&data.devices).map_err(scoring_failed)?;
    let samples: Vec<MetricsSample> = data.metrics_history(&id).take(limit).copied().collect();
    drop(data);

    Ok(Json(zscore::score_history(&stats, &samples, query.metric)))
}
