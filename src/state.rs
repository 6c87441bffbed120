use std::collections::{HashMap, VecDeque};
use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::warn;

use crate::controller::ControllerOptions;
use crate::editor::EditorOptions;
use crate::graph::{DeviceId, DeviceMetrics};
use crate::models::{
    ConnectionRecord, DeviceRecord, MetricsSample, PinRecord, ProjectDocument, ProjectSummary,
};
use crate::render::RenderOptions;
use crate::scheduler::RefreshSchedule;
use crate::sync::GatewayConfig;

/// Application configuration from environment variables.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// Address to bind the HTTP server to.
    pub bind_address: String,
    /// Persistence API the editor talks to, including the `/api` prefix.
    pub api_base_url: String,
    /// Per-attempt request timeout.
    pub request_timeout: Duration,
    /// Extra attempts after a timed-out request.
    pub request_retries: u32,
    /// Metrics refresh period; zero disables it.
    pub metrics_interval: Duration,
    /// Anomaly score refresh period; zero disables it.
    pub anomaly_interval: Duration,
    pub show_grid: bool,
    /// Where saved projects are written as `<name>.json`.
    pub projects_dir: PathBuf,
    /// Devices placed by the headless simulation session; 0 runs no session.
    pub simulate_devices: usize,
    pub forbid_endpoint_pairs: bool,
}

impl Config {
    /// Creates Config from environment variables with defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Same as [`Config::from_env`] over an arbitrary variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        Self {
            bind_address: lookup("BIND_ADDRESS").unwrap_or_else(|| "0.0.0.0:8201".into()),
            api_base_url: lookup("API_BASE_URL")
                .unwrap_or_else(|| "http://127.0.0.1:8201/api".into()),
            request_timeout: Duration::from_millis(parse_var(&lookup, "REQUEST_TIMEOUT_MS", 5000)),
            request_retries: parse_var(&lookup, "REQUEST_RETRIES", 2),
            metrics_interval: Duration::from_secs(parse_var(&lookup, "METRICS_INTERVAL_SECS", 5)),
            anomaly_interval: Duration::from_secs(parse_var(&lookup, "ANOMALY_INTERVAL_SECS", 10)),
            show_grid: parse_var(&lookup, "SHOW_GRID", true),
            projects_dir: lookup("PROJECTS_DIR")
                .unwrap_or_else(|| "data/projects".into())
                .into(),
            simulate_devices: parse_var(&lookup, "SIMULATE_DEVICES", 0),
            forbid_endpoint_pairs: parse_var(&lookup, "FORBID_ENDPOINT_PAIRS", false),
        }
    }

    pub fn gateway(&self) -> GatewayConfig {
        GatewayConfig {
            base_url: self.api_base_url.clone(),
            timeout: self.request_timeout,
            retries: self.request_retries,
        }
    }

    pub fn schedule(&self) -> RefreshSchedule {
        RefreshSchedule {
            metrics: self.metrics_interval,
            anomalies: self.anomaly_interval,
        }
    }

    pub fn editor_options(&self) -> EditorOptions {
        EditorOptions {
            render: RenderOptions {
                show_grid: self.show_grid,
                ..Default::default()
            },
            controller: ControllerOptions {
                forbid_endpoint_pairs: self.forbid_endpoint_pairs,
                ..Default::default()
            },
            seed: None,
        }
    }
}

fn parse_var<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> T {
    match lookup(key) {
        None => default,
        Some(raw) => raw.trim().parse().unwrap_or_else(|_| {
            warn!(key, value = %raw, "ignoring unparsable setting, using default");
            default
        }),
    }
}

/// A saved project as kept by the persistence service.
#[derive(Debug, Clone)]
pub struct StoredProject {
    pub id: u64,
    pub document: ProjectDocument,
}

impl StoredProject {
    pub fn summary(&self) -> ProjectSummary {
        ProjectSummary {
            id: self.id,
            name: self.document.name.clone().unwrap_or_default(),
            device_count: self.document.devices.len(),
            connection_count: self.document.connections.len(),
        }
    }
}

/// Metrics reports kept per device; older ones are dropped.
pub const HISTORY_CAPACITY: usize = 1000;

/// In-memory records of the persistence service.
#[derive(Debug, Default)]
pub struct BackendData {
    pub devices: Vec<DeviceRecord>,
    pub connections: Vec<ConnectionRecord>,
    pub projects: Vec<StoredProject>,
    pub pins: Vec<PinRecord>,
    /// Metrics reports per device, oldest first.
    pub history: HashMap<DeviceId, VecDeque<MetricsSample>>,
    last_id: u64,
}

impl BackendData {
    /// Next server-assigned numeric id, shared by every record kind.
    pub fn next_id(&mut self) -> u64 {
        self.last_id += 1;
        self.last_id
    }

    pub fn device(&self, id: &DeviceId) -> Option<&DeviceRecord> {
        self.devices.iter().find(|d| d.id.as_ref() == Some(id))
    }

    pub fn record_metrics(&mut self, id: &DeviceId, metrics: DeviceMetrics, timestamp: u64) {
        let samples = self.history.entry(id.clone()).or_default();
        samples.push_back(MetricsSample { timestamp, metrics });
        while samples.len() > HISTORY_CAPACITY {
            samples.pop_front();
        }
    }

    /// Stored reports for `id`, newest first.
    pub fn metrics_history(&self, id: &DeviceId) -> impl Iterator<Item = &MetricsSample> {
        self.history.get(id).into_iter().flat_map(|s| s.iter().rev())
    }
}

/// Shared application state passed to all request handlers.
#[derive(Debug)]
pub struct AppState {
    pub config: Config,
    /// Service records protected by RwLock.
    pub data: RwLock<BackendData>,
}

impl AppState {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            data: RwLock::new(BackendData::default()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(vars: &[(&str, &str)]) -> Config {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = config_from(&[]);
        assert_eq!(config.bind_address, "0.0.0.0:8201");
        assert_eq!(config.api_base_url, "http://127.0.0.1:8201/api");
        assert_eq!(config.request_timeout, Duration::from_millis(5000));
        assert_eq!(config.request_retries, 2);
        assert_eq!(config.metrics_interval, Duration::from_secs(5));
        assert_eq!(config.anomaly_interval, Duration::from_secs(10));
        assert!(config.show_grid);
        assert_eq!(config.projects_dir, PathBuf::from("data/projects"));
        assert_eq!(config.simulate_devices, 0);
        assert!(!config.forbid_endpoint_pairs);
    }

    #[test]
    fn test_overrides_and_bad_values() {
        let config = config_from(&[
            ("REQUEST_RETRIES", "5"),
            ("SHOW_GRID", "false"),
            ("METRICS_INTERVAL_SECS", "soon"),
            ("FORBID_ENDPOINT_PAIRS", "true"),
        ]);
        assert_eq!(config.request_retries, 5);
        assert!(!config.show_grid);
        assert_eq!(config.metrics_interval, Duration::from_secs(5));
        assert!(config.editor_options().controller.forbid_endpoint_pairs);
        assert!(!config.editor_options().render.show_grid);
    }

    fn sample(cpu: u32) -> DeviceMetrics {
        DeviceMetrics {
            cpu,
            memory: 10,
            disk: 10,
            vulnerability: 1,
            network: 10,
            temperature: 40,
        }
    }

    #[test]
    fn test_history_newest_first_and_capped() {
        let mut data = BackendData::default();
        let id = DeviceId::from("7");
        for t in 0..(HISTORY_CAPACITY as u64 + 5) {
            data.record_metrics(&id, sample(t as u32 % 100), t);
        }
        let timestamps: Vec<u64> = data.metrics_history(&id).map(|s| s.timestamp).collect();
        assert_eq!(timestamps.len(), HISTORY_CAPACITY);
        assert_eq!(timestamps[0], HISTORY_CAPACITY as u64 + 4);
        assert_eq!(*timestamps.last().unwrap(), 5);
        assert_eq!(data.metrics_history(&DeviceId::from("8")).count(), 0);
    }

    #[test]
    fn test_ids_are_shared_and_increasing() {
        let mut data = BackendData::default();
        assert_eq!(data.next_id(), 1);
        assert_eq!(data.next_id(), 2);
    }
}
