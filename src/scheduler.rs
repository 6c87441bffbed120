//! Periodic refresh ticks for the editor loop.
//!
//! Jobs never touch editor state; they only post a [`RefreshTick`] into a
//! bounded channel. A tick that finds the channel full is dropped, so a busy
//! editor sees at most one pending tick of each kind per free slot.

use std::time::Duration;
use tokio::sync::mpsc;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{debug, info};

use crate::error::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshTick {
    /// Re-randomize metrics of the live devices and push them.
    Metrics,
    /// Fetch anomaly scores from the backend.
    Anomalies,
}

/// Tick periods. A zero period disables that tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RefreshSchedule {
    pub metrics: Duration,
    pub anomalies: Duration,
}

impl Default for RefreshSchedule {
    fn default() -> Self {
        Self {
            metrics: Duration::from_secs(5),
            anomalies: Duration::from_secs(10),
        }
    }
}

pub struct RefreshScheduler {
    scheduler: JobScheduler,
}

impl RefreshScheduler {
    /// Registers the repeated jobs and starts the scheduler.
    pub async fn start(schedule: RefreshSchedule, ticks: mpsc::Sender<RefreshTick>) -> Result<Self> {
        let scheduler = JobScheduler::new().await?;
        for (every, tick) in [
            (schedule.metrics, RefreshTick::Metrics),
            (schedule.anomalies, RefreshTick::Anomalies),
        ] {
            if every.is_zero() {
                debug!(?tick, "refresh tick disabled");
                continue;
            }
            scheduler.add(tick_job(every, tick, ticks.clone())?).await?;
        }
        scheduler.start().await?;
        info!(
            metrics_secs = schedule.metrics.as_secs(),
            anomalies_secs = schedule.anomalies.as_secs(),
            "refresh scheduler started"
        );
        Ok(Self { scheduler })
    }

    pub async fn shutdown(mut self) -> Result<()> {
        self.scheduler.shutdown().await?;
        Ok(())
    }
}

fn tick_job(every: Duration, tick: RefreshTick, ticks: mpsc::Sender<RefreshTick>) -> Result<Job> {
    let job = Job::new_repeated_async(every, move |_id, _scheduler| {
        let ticks = ticks.clone();
        Box::pin(async move {
            if ticks.try_send(tick).is_err() {
                debug!(?tick, "refresh tick dropped");
            }
        })
    })?;
    Ok(job)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_metrics_tick_arrives_and_disabled_tick_does_not() {
        let (tx, mut rx) = mpsc::channel(4);
        let scheduler = RefreshScheduler::start(
            RefreshSchedule {
                metrics: Duration::from_secs(1),
                anomalies: Duration::ZERO,
            },
            tx,
        )
        .await
        .unwrap();

        let first = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("no tick within 5s");
        assert_eq!(first, Some(RefreshTick::Metrics));
        while let Ok(tick) = rx.try_recv() {
            assert_eq!(tick, RefreshTick::Metrics);
        }
        scheduler.shutdown().await.unwrap();
    }
}
