//! Population z-scores over device metrics.
//!
//! Mean and sample standard deviation per metric come from a polars lazy
//! query over the devices that report metrics. A metric without spread
//! (one device, or identical values) scores 0 for everyone.

use polars::prelude::*;
use std::collections::HashMap;

use crate::anomaly::{AnomalyMetric, AnomalyStatus};
use crate::graph::DeviceMetrics;
use crate::models::{
    AnomalousDevice, DeviceAnalysis, DeviceAnomalies, DeviceRecord, HistoryEntry, MeanAnalysis,
    MetricAnalysis, MetricAnomaly, MetricRankings, MetricScore, MetricsSample, RankingEntry,
    StatusSummary, TopologyDetails, ZScoreRecord,
};

/// Metrics that are scored directly; `zscore_mean` is derived from them.
pub const SCORED: [AnomalyMetric; 4] = [
    AnomalyMetric::CpuUsage,
    AnomalyMetric::MemoryUsage,
    AnomalyMetric::DiskUsage,
    AnomalyMetric::VulnerabilityScore,
];

/// |z| above which a metric is reported as anomalous.
pub const DEFAULT_ANOMALY_THRESHOLD: f64 = 2.0;

/// Raw values in [`SCORED`] order.
fn scored_values(metrics: &DeviceMetrics) -> [f64; 4] {
    [metrics.cpu, metrics.memory, metrics.disk, metrics.vulnerability].map(f64::from)
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Population {
    pub mean: f64,
    /// Sample standard deviation (n - 1); 0 when undefined.
    pub std: f64,
}

impl Population {
    pub fn zscore(&self, value: f64) -> f64 {
        if self.std > 0.0 {
            (value - self.mean) / self.std
        } else {
            0.0
        }
    }
}

pub type PopulationStats = HashMap<AnomalyMetric, Population>;

/// Mean and standard deviation per scored metric. Empty input gives an
/// empty map.
pub fn population_stats(samples: &[DeviceMetrics]) -> PolarsResult<PopulationStats> {
    if samples.is_empty() {
        return Ok(HashMap::new());
    }
    let values: Vec<[f64; 4]> = samples.iter().map(scored_values).collect();
    let column = |i: usize| -> Vec<f64> { values.iter().map(|v| v[i]).collect() };
    let df = df!(
        SCORED[0].as_str() => column(0),
        SCORED[1].as_str() => column(1),
        SCORED[2].as_str() => column(2),
        SCORED[3].as_str() => column(3)
    )?;

    let aggregations: Vec<Expr> = SCORED
        .iter()
        .flat_map(|m| {
            let name = m.as_str();
            [
                col(name).mean().alias(format!("{name}_mean").as_str()),
                col(name).std(1).alias(format!("{name}_std").as_str()),
            ]
        })
        .collect();
    let stats = df.lazy().select(aggregations).collect()?;

    let scalar = |name: String| -> PolarsResult<Option<f64>> {
        Ok(stats.column(name.as_str())?.f64()?.get(0))
    };
    let mut out = HashMap::new();
    for metric in SCORED {
        let name = metric.as_str();
        let mean = scalar(format!("{name}_mean"))?.unwrap_or(0.0);
        let std = scalar(format!("{name}_std"))?
            .filter(|s| s.is_finite())
            .unwrap_or(0.0);
        out.insert(metric, Population { mean, std });
    }
    Ok(out)
}

/// Population over every device that reports metrics.
pub fn device_population(devices: &[DeviceRecord]) -> PolarsResult<PopulationStats> {
    let samples: Vec<DeviceMetrics> = devices.iter().filter_map(|d| d.metrics).collect();
    population_stats(&samples)
}

fn score(value: Option<f64>, zscore: f64) -> MetricScore {
    MetricScore {
        value,
        zscore,
        status: AnomalyStatus::from_zscore(zscore),
    }
}

/// Scores one sample: the scored metrics in order, then `zscore_mean`.
pub fn score_sample(
    stats: &PopulationStats,
    metrics: &DeviceMetrics,
) -> Vec<(AnomalyMetric, MetricScore)> {
    let mut scores = Vec::with_capacity(SCORED.len() + 1);
    let mut sum = 0.0;
    for (metric, value) in SCORED.into_iter().zip(scored_values(metrics)) {
        let z = stats.get(&metric).map_or(0.0, |p| p.zscore(value));
        sum += z;
        scores.push((metric, score(Some(value), z)));
    }
    scores.push((
        AnomalyMetric::ZscoreMean,
        score(None, sum / SCORED.len() as f64),
    ));
    scores
}

/// Scores every device. Devices without metrics are listed without
/// scores.
pub fn topology_details(devices: &[DeviceRecord]) -> PolarsResult<TopologyDetails> {
    let stats = device_population(devices)?;
    let devices = devices
        .iter()
        .filter_map(|device| {
            let id = device.id.clone()?;
            let zscores = device.metrics.map(|metrics| {
                score_sample(&stats, &metrics)
                    .into_iter()
                    .map(|(metric, s)| {
                        let record = ZScoreRecord {
                            zscore: Some(s.zscore),
                            status: Some(s.status.as_str().to_string()),
                        };
                        (metric.as_str().to_string(), record)
                    })
                    .collect()
            });
            Some(DeviceAnomalies {
                id,
                name: Some(device.name.clone()),
                zscores,
            })
        })
        .collect();
    Ok(TopologyDetails { devices })
}

/// Full analysis of one device: value, population and score per metric,
/// plus the mean of the component scores.
pub fn analyze_device(stats: &PopulationStats, metrics: &DeviceMetrics) -> DeviceAnalysis {
    let mut analysis = DeviceAnalysis::default();
    let mut components = Vec::with_capacity(SCORED.len());
    for (metric, value) in SCORED.into_iter().zip(scored_values(metrics)) {
        let Some(population) = stats.get(&metric) else {
            continue;
        };
        let zscore = population.zscore(value);
        components.push(zscore);
        analysis.metrics.insert(
            metric.as_str().to_string(),
            MetricAnalysis {
                current_value: value,
                population_mean: population.mean,
                population_std: population.std,
                zscore,
                status: AnomalyStatus::from_zscore(zscore),
            },
        );
    }
    if !components.is_empty() {
        let mean = components.iter().sum::<f64>() / components.len() as f64;
        analysis.zscore_mean = Some(MeanAnalysis {
            zscore: mean,
            status: AnomalyStatus::from_zscore(mean),
            metric_count: components.len(),
            component_scores: components,
        });
    }
    analysis
}

/// Devices with at least one metric beyond `threshold`. With `metric`, only
/// devices where that metric is among the anomalies are kept.
pub fn anomalous_devices(
    devices: &[DeviceRecord],
    threshold: f64,
    metric: Option<AnomalyMetric>,
) -> PolarsResult<Vec<AnomalousDevice>> {
    let stats = device_population(devices)?;
    let found = devices
        .iter()
        .filter_map(|device| {
            let device_id = device.id.clone()?;
            let metrics = device.metrics.as_ref()?;
            let anomalies: Vec<MetricAnomaly> = score_sample(&stats, metrics)
                .into_iter()
                .filter(|(_, s)| s.zscore.abs() > threshold)
                .map(|(m, score)| MetricAnomaly {
                    metric: m.as_str().to_string(),
                    score,
                })
                .collect();
            let wanted = metric.map_or(true, |m| anomalies.iter().any(|a| a.metric == m.as_str()));
            (wanted && !anomalies.is_empty()).then(|| AnomalousDevice {
                device_id,
                device_name: device.name.clone(),
                anomalies,
            })
        })
        .collect();
    Ok(found)
}

/// Devices per metric ordered by |z|, largest first. Ties keep device
/// order. With `metric`, only that ranking is returned.
pub fn metric_rankings(
    devices: &[DeviceRecord],
    metric: Option<AnomalyMetric>,
) -> PolarsResult<MetricRankings> {
    let stats = device_population(devices)?;
    let mut rankings: MetricRankings = AnomalyMetric::ALL
        .into_iter()
        .filter(|m| metric.map_or(true, |wanted| wanted == *m))
        .map(|m| (m.as_str().to_string(), Vec::new()))
        .collect();

    for device in devices {
        let (Some(id), Some(metrics)) = (&device.id, &device.metrics) else {
            continue;
        };
        for (m, score) in score_sample(&stats, metrics) {
            if let Some(entries) = rankings.get_mut(m.as_str()) {
                entries.push(RankingEntry {
                    device_id: id.clone(),
                    device_name: device.name.clone(),
                    score,
                });
            }
        }
    }
    for entries in rankings.values_mut() {
        entries.sort_by(|a, b| b.score.zscore.abs().total_cmp(&a.score.zscore.abs()));
    }
    Ok(rankings)
}

/// Scores stored samples against `stats`, keeping their order.
pub fn score_history<'a>(
    stats: &PopulationStats,
    samples: impl IntoIterator<Item = &'a MetricsSample>,
    metric: Option<AnomalyMetric>,
) -> Vec<HistoryEntry> {
    samples
        .into_iter()
        .map(|sample| HistoryEntry {
            timestamp: sample.timestamp,
            metrics: score_sample(stats, &sample.metrics)
                .into_iter()
                .filter(|(m, _)| metric.map_or(true, |wanted| wanted == *m))
                .map(|(m, s)| (m.as_str().to_string(), s))
                .collect(),
        })
        .collect()
}

/// Counts devices by the worst status among their scored metrics.
pub fn status_summary(details: &TopologyDetails) -> StatusSummary {
    let mut summary = StatusSummary::default();
    for scores in details.devices.iter().filter_map(|d| d.zscores.as_ref()) {
        let worst = SCORED
            .iter()
            .filter_map(|m| scores.get(m.as_str()).and_then(|r| r.zscore))
            .map(f64::abs)
            .fold(0.0, f64::max);
        match AnomalyStatus::from_zscore(worst) {
            AnomalyStatus::Normal => summary.normal += 1,
            AnomalyStatus::Warning => summary.warning += 1,
            AnomalyStatus::Critical => summary.critical += 1,
            AnomalyStatus::Extreme => summary.extreme += 1,
        }
    }
    summary
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metrics(cpu: u32) -> DeviceMetrics {
        DeviceMetrics {
            cpu,
            memory: 50,
            disk: 50,
            vulnerability: 10,
            network: 100,
            temperature: 40,
        }
    }

    fn with_vulnerability(cpu: u32, vulnerability: u32) -> DeviceMetrics {
        DeviceMetrics {
            vulnerability,
            ..metrics(cpu)
        }
    }

    fn device(id: &str, cpu: Option<u32>) -> DeviceRecord {
        serde_json::from_value(serde_json::json!({
            "id": id, "name": id, "type": "server", "x": 0, "y": 0,
            "metrics": cpu.map(metrics),
        }))
        .unwrap()
    }

    mod population_tests {
        use super::*;

        #[test]
        fn test_sample_std() {
            let stats = population_stats(&[metrics(10), metrics(20), metrics(30)]).unwrap();
            let cpu = stats[&AnomalyMetric::CpuUsage];
            assert!((cpu.mean - 20.0).abs() < 1e-9);
            assert!((cpu.std - 10.0).abs() < 1e-9);
            assert_eq!(stats[&AnomalyMetric::MemoryUsage].std, 0.0);
        }

        #[test]
        fn test_single_sample_has_no_spread() {
            let stats = population_stats(&[metrics(70)]).unwrap();
            assert_eq!(stats[&AnomalyMetric::CpuUsage].zscore(70.0), 0.0);
        }

        #[test]
        fn test_empty_population() {
            assert!(population_stats(&[]).unwrap().is_empty());
        }
    }

    mod details_tests {
        use super::*;

        #[test]
        fn test_scores_and_mean() {
            let details =
                topology_details(&[device("a", Some(10)), device("b", Some(20)), device("c", Some(30))])
                    .unwrap();
            let a = details.devices[0].zscores.as_ref().unwrap();
            assert!((a["cpu_usage"].zscore.unwrap() + 1.0).abs() < 1e-9);
            assert_eq!(a["cpu_usage"].status.as_deref(), Some("normal"));
            assert_eq!(a["memory_usage"].zscore, Some(0.0));
            assert!((a["zscore_mean"].zscore.unwrap() + 0.25).abs() < 1e-9);
        }

        #[test]
        fn test_device_without_metrics_is_unscored() {
            let details = topology_details(&[device("a", Some(10)), device("b", None)]).unwrap();
            assert_eq!(details.devices.len(), 2);
            assert!(details.devices[1].zscores.is_none());
        }

        #[test]
        fn test_mean_is_average_of_component_scores() {
            let mut devices = vec![device("a", Some(10)), device("b", Some(20)), device("c", Some(30))];
            for (record, vulnerability) in devices.iter_mut().zip([0, 0, 90]) {
                record.metrics = record.metrics.map(|m| with_vulnerability(m.cpu, vulnerability));
            }
            let details = topology_details(&devices).unwrap();
            let c = details.devices[2].zscores.as_ref().unwrap();
            let cpu = c["cpu_usage"].zscore.unwrap();
            let vulnerability = c["vulnerability_score"].zscore.unwrap();
            let mean = c["zscore_mean"].zscore.unwrap();
            assert!((vulnerability - 60.0 / 2700f64.sqrt()).abs() < 1e-9);
            assert!((mean - (cpu + vulnerability) / 4.0).abs() < 1e-9);
            assert!((mean - vulnerability).abs() > 0.1);
        }

        #[test]
        fn test_summary_uses_worst_metric() {
            let mut devices: Vec<DeviceRecord> =
                (0..9).map(|i| device(&format!("d{i}"), Some(10))).collect();
            devices.push(device("hot", Some(100)));
            let details = topology_details(&devices).unwrap();
            let summary = status_summary(&details);
            assert_eq!(summary.normal, 9);
            assert_eq!(summary.critical, 1);
        }
    }

    mod analysis_tests {
        use super::*;

        fn hot_network() -> Vec<DeviceRecord> {
            let mut devices: Vec<DeviceRecord> =
                (0..9).map(|i| device(&format!("d{i}"), Some(10))).collect();
            devices.push(device("hot", Some(100)));
            devices
        }

        #[test]
        fn test_analyze_device() {
            let stats = population_stats(&[metrics(10), metrics(20), metrics(30)]).unwrap();
            let analysis = analyze_device(&stats, &metrics(30));
            let cpu = analysis.metrics["cpu_usage"];
            assert_eq!(cpu.current_value, 30.0);
            assert!((cpu.population_mean - 20.0).abs() < 1e-9);
            assert!((cpu.population_std - 10.0).abs() < 1e-9);
            assert!((cpu.zscore - 1.0).abs() < 1e-9);
            assert_eq!(cpu.status, AnomalyStatus::Normal);

            let mean = analysis.zscore_mean.unwrap();
            assert_eq!(mean.metric_count, 4);
            assert_eq!(mean.component_scores.len(), 4);
            assert!((mean.zscore - 0.25).abs() < 1e-9);
        }

        #[test]
        fn test_analysis_without_population_is_empty() {
            let analysis = analyze_device(&HashMap::new(), &metrics(30));
            assert!(analysis.metrics.is_empty());
            assert!(analysis.zscore_mean.is_none());
        }

        #[test]
        fn test_anomalies_beyond_threshold() {
            let devices = hot_network();
            let found = anomalous_devices(&devices, DEFAULT_ANOMALY_THRESHOLD, None).unwrap();
            assert_eq!(found.len(), 1);
            assert_eq!(found[0].device_id.as_str(), "hot");
            assert_eq!(found[0].anomalies.len(), 1);
            let cpu = &found[0].anomalies[0];
            assert_eq!(cpu.metric, "cpu_usage");
            assert_eq!(cpu.score.value, Some(100.0));
            assert_eq!(cpu.score.status, AnomalyStatus::Critical);

            assert!(anomalous_devices(&devices, 3.0, None).unwrap().is_empty());
            let by_memory =
                anomalous_devices(&devices, DEFAULT_ANOMALY_THRESHOLD, Some(AnomalyMetric::MemoryUsage))
                    .unwrap();
            assert!(by_memory.is_empty());
        }

        #[test]
        fn test_rankings_order_by_magnitude() {
            let devices = [device("a", Some(10)), device("b", Some(20)), device("c", Some(30))];
            let rankings = metric_rankings(&devices, None).unwrap();
            assert_eq!(rankings.len(), AnomalyMetric::ALL.len());
            let order: Vec<&str> = rankings["cpu_usage"]
                .iter()
                .map(|e| e.device_id.as_str())
                .collect();
            assert_eq!(order, vec!["a", "c", "b"]);

            let disk = metric_rankings(&devices, Some(AnomalyMetric::DiskUsage)).unwrap();
            assert_eq!(disk.keys().collect::<Vec<_>>(), vec!["disk_usage"]);
            assert_eq!(disk["disk_usage"].len(), 3);
        }

        #[test]
        fn test_history_scored_against_population() {
            let stats = population_stats(&[metrics(10), metrics(20), metrics(30)]).unwrap();
            let samples = [
                MetricsSample { timestamp: 2, metrics: metrics(40) },
                MetricsSample { timestamp: 1, metrics: metrics(20) },
            ];
            let history = score_history(&stats, &samples, None);
            assert_eq!(history.len(), 2);
            assert_eq!(history[0].timestamp, 2);
            assert!((history[0].metrics["cpu_usage"].zscore - 2.0).abs() < 1e-9);
            assert_eq!(history[0].metrics["cpu_usage"].status, AnomalyStatus::Warning);
            assert!(history[0].metrics.contains_key("zscore_mean"));

            let cpu_only = score_history(&stats, &samples, Some(AnomalyMetric::CpuUsage));
            assert!(cpu_only.iter().all(|e| e.metrics.len() == 1));
        }
    }
}
