//! Anomaly (z-score) overlay data.
//!
//! The backend scores each device per metric; the overlay remembers the last
//! report and picks one metric at a time for display.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use crate::error::TopologyError;
use crate::graph::{DeviceId, TopologyGraph};
use crate::models::TopologyDetails;

/// Severity bucket of a z-score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnomalyStatus {
    Normal,
    Warning,
    Critical,
    Extreme,
}

impl AnomalyStatus {
    /// Buckets by magnitude: `<= 1` normal, `<= 2` warning, `<= 3` critical.
    pub fn from_zscore(z: f64) -> Self {
        let magnitude = z.abs();
        if magnitude <= 1.0 {
            AnomalyStatus::Normal
        } else if magnitude <= 2.0 {
            AnomalyStatus::Warning
        } else if magnitude <= 3.0 {
            AnomalyStatus::Critical
        } else {
            AnomalyStatus::Extreme
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            AnomalyStatus::Normal => "normal",
            AnomalyStatus::Warning => "warning",
            AnomalyStatus::Critical => "critical",
            AnomalyStatus::Extreme => "extreme",
        }
    }

    pub fn color(self) -> &'static str {
        match self {
            AnomalyStatus::Normal => "#00ff00",
            AnomalyStatus::Warning => "#ffa500",
            AnomalyStatus::Critical => "#ff4444",
            AnomalyStatus::Extreme => "#ff0000",
        }
    }
}

/// Metric the overlay displays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum AnomalyMetric {
    #[default]
    CpuUsage,
    MemoryUsage,
    DiskUsage,
    VulnerabilityScore,
    /// Mean of the per-metric scores.
    ZscoreMean,
}

impl AnomalyMetric {
    pub const ALL: [AnomalyMetric; 5] = [
        AnomalyMetric::CpuUsage,
        AnomalyMetric::MemoryUsage,
        AnomalyMetric::DiskUsage,
        AnomalyMetric::VulnerabilityScore,
        AnomalyMetric::ZscoreMean,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            AnomalyMetric::CpuUsage => "cpu_usage",
            AnomalyMetric::MemoryUsage => "memory_usage",
            AnomalyMetric::DiskUsage => "disk_usage",
            AnomalyMetric::VulnerabilityScore => "vulnerability_score",
            AnomalyMetric::ZscoreMean => "zscore_mean",
        }
    }
}

impl fmt::Display for AnomalyMetric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AnomalyMetric {
    type Err = TopologyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        AnomalyMetric::ALL
            .into_iter()
            .find(|m| m.as_str() == s)
            .ok_or_else(|| TopologyError::invalid(format!("unknown anomaly metric '{s}'")))
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AnomalyScore {
    pub zscore: f64,
    pub status: AnomalyStatus,
}

impl AnomalyScore {
    pub fn new(zscore: f64) -> Self {
        Self {
            zscore,
            status: AnomalyStatus::from_zscore(zscore),
        }
    }
}

/// Last anomaly report plus the metric currently shown.
#[derive(Debug, Clone, Default)]
pub struct AnomalyOverlay {
    metric: AnomalyMetric,
    scores: HashMap<DeviceId, HashMap<AnomalyMetric, AnomalyScore>>,
}

impl AnomalyOverlay {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn metric(&self) -> AnomalyMetric {
        self.metric
    }

    /// Switching metric re-picks from the last report; no refetch needed.
    pub fn set_metric(&mut self, metric: AnomalyMetric) {
        self.metric = metric;
    }

    /// Replaces the overlay with a fresh report. Entries for devices that
    /// are not in `graph`, unknown metric names and null scores are dropped.
    pub fn apply(&mut self, details: &TopologyDetails, graph: &TopologyGraph) -> usize {
        self.scores.clear();
        for entry in &details.devices {
            if !graph.contains_device(&entry.id) {
                continue;
            }
            let Some(zscores) = &entry.zscores else {
                continue;
            };
            let per_metric: HashMap<AnomalyMetric, AnomalyScore> = zscores
                .iter()
                .filter_map(|(name, record)| {
                    let metric = name.parse::<AnomalyMetric>().ok()?;
                    Some((metric, AnomalyScore::new(record.zscore?)))
                })
                .collect();
            if !per_metric.is_empty() {
                self.scores.insert(entry.id.clone(), per_metric);
            }
        }
        self.scores.len()
    }

    pub fn insert(&mut self, device: DeviceId, metric: AnomalyMetric, score: AnomalyScore) {
        self.scores.entry(device).or_default().insert(metric, score);
    }

    /// Score of the selected metric for `device`, if any.
    pub fn score_for(&self, device: &DeviceId) -> Option<AnomalyScore> {
        self.scores.get(device)?.get(&self.metric).copied()
    }

    pub fn forget(&mut self, device: &DeviceId) {
        self.scores.remove(device);
    }

    pub fn clear(&mut self) {
        self.scores.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.scores.is_empty()
    }
}
