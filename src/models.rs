//! Wire and file schemas shared by the sync gateway and the persistence
//! service.
//!
//! These mirror the JSON documents exactly; conversion to and from the graph
//! model lives in `sync::codec`.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

use crate::anomaly::AnomalyStatus;
use crate::graph::{
    ConnectionId, ConnectionMetrics, DeviceConfigUpdate, DeviceId, DeviceMetrics, LayerVisibility,
    Service,
};

/// A device as exchanged with the backend and stored in project files.
///
/// `id` is optional so the same shape works as an "add device" request; the
/// backend assigns one when it is missing.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DeviceRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<DeviceId>,
    pub name: String,
    #[serde(rename = "type")]
    pub device_type: String,
    pub x: f64,
    pub y: f64,
    #[serde(default)]
    pub ip_address: Option<String>,
    #[serde(default)]
    pub subnet_mask: Option<String>,
    #[serde(default)]
    pub mac_address: Option<String>,
    #[serde(default)]
    pub gateway: Option<String>,
    #[serde(default)]
    pub dns_server: Option<String>,
    #[serde(default)]
    pub metrics: Option<DeviceMetrics>,
    #[serde(default)]
    pub subnet: Option<String>,
    #[serde(default)]
    pub services: Vec<Service>,
    /// Per-layer visibility; absent means "type default".
    #[serde(default)]
    pub layer: Option<LayerVisibility>,
}

/// Partial device update: configuration fields and/or a new position.
#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
pub struct DevicePatch {
    #[serde(flatten)]
    pub config: DeviceConfigUpdate,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub x: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub y: Option<f64>,
}

/// A connection as stored in project files and returned by the backend.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct ConnectionRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<ConnectionId>,
    pub source_device_id: DeviceId,
    pub target_device_id: DeviceId,
    #[serde(rename = "type")]
    pub connection_type: String,
    pub bandwidth: f64,
    #[serde(rename = "startPortId", default, skip_serializing_if = "Option::is_none")]
    pub start_port_id: Option<String>,
    #[serde(rename = "endPortId", default, skip_serializing_if = "Option::is_none")]
    pub end_port_id: Option<String>,
    #[serde(default)]
    pub layer: Option<LayerVisibility>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metrics: Option<ConnectionMetrics>,
}

/// Link metrics carried by a connection create request.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Default)]
pub struct LinkMetrics {
    pub latency: f64,
    pub packet_loss: f64,
}

/// Body of `POST /api/connections`.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct ConnectionCreateRequest {
    /// Client-minted id; the backend keeps it when present.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<ConnectionId>,
    pub source_device_id: DeviceId,
    pub target_device_id: DeviceId,
    #[serde(rename = "type")]
    pub connection_type: String,
    pub bandwidth: f64,
    #[serde(default)]
    pub metrics: LinkMetrics,
}

/// Body of `PUT /api/connections/{id}`.
#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
pub struct ConnectionPatch {
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub connection_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bandwidth: Option<f64>,
}

/// A full project: the canonical on-disk and interchange document.
#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
pub struct ProjectDocument {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default)]
    pub devices: Vec<DeviceRecord>,
    #[serde(default)]
    pub connections: Vec<ConnectionRecord>,
}

/// Listing entry returned by `GET /api/projects` and `POST /api/projects`.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct ProjectSummary {
    pub id: u64,
    pub name: String,
    pub device_count: usize,
    pub connection_count: usize,
}

/// Geolocated map marker, owned by the backend.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct PinRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<u64>,
    pub pin_name: String,
    pub latitude: f64,
    pub longitude: f64,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub subcategory: Option<String>,
    #[serde(default)]
    pub status_classification: Option<String>,
    #[serde(default)]
    pub priority_level: Option<String>,
    #[serde(default)]
    pub json_file: Option<String>,
    /// Seconds since the Unix epoch, UTC.
    #[serde(default)]
    pub timestamp_utc: Option<u64>,
}

/// Body of `POST /api/pins/associate_json`.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct AssociateJsonRequest {
    pub pin_id: u64,
    pub json_file: String,
}

/// Generic status body; the backend answers some operations with only this.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct StatusMessage {
    pub message: String,
}

impl StatusMessage {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Error body of every non-success response.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct ErrorBody {
    pub error: String,
}

/// One metric's anomaly score as reported by the backend.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct ZScoreRecord {
    pub zscore: Option<f64>,
    #[serde(default)]
    pub status: Option<String>,
}

/// Per-device entry of the topology details response.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct DeviceAnomalies {
    pub id: DeviceId,
    #[serde(default)]
    pub name: Option<String>,
    /// Keyed by metric name (`cpu_usage`, ..., `zscore_mean`); absent when
    /// no score could be computed.
    #[serde(default)]
    pub zscores: Option<HashMap<String, ZScoreRecord>>,
}

/// Response of `GET /api/network/topology/details`.
#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
pub struct TopologyDetails {
    pub devices: Vec<DeviceAnomalies>,
}

/// Response of `GET /api/zscore/status-summary`: devices per worst status.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatusSummary {
    pub normal: usize,
    pub warning: usize,
    pub critical: usize,
    pub extreme: usize,
}

/// One scored metric of a device against the current population.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq)]
pub struct MetricAnalysis {
    pub current_value: f64,
    pub population_mean: f64,
    pub population_std: f64,
    pub zscore: f64,
    pub status: AnomalyStatus,
}

/// The `zscore_mean` entry of a device analysis.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct MeanAnalysis {
    pub zscore: f64,
    pub status: AnomalyStatus,
    pub component_scores: Vec<f64>,
    pub metric_count: usize,
}

/// Response of `GET /api/device/{id}/zscores`: one entry per scored metric
/// name plus `zscore_mean`.
#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
pub struct DeviceAnalysis {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub zscore_mean: Option<MeanAnalysis>,
    #[serde(flatten)]
    pub metrics: BTreeMap<String, MetricAnalysis>,
}

/// A metric score with the value it was computed from. `zscore_mean` has no
/// value of its own.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq)]
pub struct MetricScore {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<f64>,
    pub zscore: f64,
    pub status: AnomalyStatus,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct MetricAnomaly {
    pub metric: String,
    #[serde(flatten)]
    pub score: MetricScore,
}

/// Entry of `GET /api/network/anomalies`.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct AnomalousDevice {
    pub device_id: DeviceId,
    pub device_name: String,
    pub anomalies: Vec<MetricAnomaly>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct RankingEntry {
    pub device_id: DeviceId,
    pub device_name: String,
    #[serde(flatten)]
    pub score: MetricScore,
}

/// Response of `GET /api/metrics/rankings`: devices per metric name, largest
/// |z| first.
pub type MetricRankings = BTreeMap<String, Vec<RankingEntry>>;

/// One stored metrics report (`GET /api/device_metrics/{id}`).
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq)]
pub struct MetricsSample {
    /// Seconds since the Unix epoch, UTC.
    pub timestamp: u64,
    pub metrics: DeviceMetrics,
}

/// A stored sample scored against today's population
/// (`GET /api/device/{id}/history`).
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct HistoryEntry {
    pub timestamp: u64,
    pub metrics: BTreeMap<String, MetricScore>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_schema_accepts_numeric_ids() {
        let doc: ProjectDocument = serde_json::from_str(
            r#"{
                "devices": [
                    {"id": 1, "name": "R1", "type": "router", "x": 10, "y": 20,
                     "ipAddress": "10.0.0.1", "layer": {"physical": true, "logical": true, "application": false}},
                    {"id": "dev_abc", "name": "S1", "type": "server", "x": 200, "y": 20}
                ],
                "connections": [
                    {"id": 3, "source_device_id": 1, "target_device_id": "dev_abc",
                     "type": "fiber", "bandwidth": 1000, "startPortId": "1_port2", "endPortId": "dev_abc_port1"}
                ]
            }"#,
        )
        .unwrap();
        assert_eq!(doc.devices[0].id, Some(DeviceId::from("1")));
        assert_eq!(doc.devices[0].ip_address.as_deref(), Some("10.0.0.1"));
        assert_eq!(doc.connections[0].source_device_id.as_str(), "1");
        assert_eq!(doc.connections[0].start_port_id.as_deref(), Some("1_port2"));
    }

    #[test]
    fn test_visibility_with_missing_key_is_rejected() {
        let result: Result<DeviceRecord, _> = serde_json::from_str(
            r#"{"name": "R1", "type": "router", "x": 0, "y": 0, "layer": {"physical": true}}"#,
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_patch_flattens_config() {
        let patch = DevicePatch {
            config: DeviceConfigUpdate {
                ip_address: Some("10.1.1.1".into()),
                ..Default::default()
            },
            x: Some(5.0),
            y: None,
        };
        let json = serde_json::to_value(&patch).unwrap();
        assert_eq!(json, serde_json::json!({"ipAddress": "10.1.1.1", "x": 5.0}));
    }
}
