//! Background task executing sync commands in queue order.

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::{SyncCommand, SyncGateway, SyncReport};
use crate::error::Result;

/// Sending side of the worker queue. Cheap to clone.
#[derive(Debug, Clone)]
pub struct SyncHandle {
    commands: mpsc::UnboundedSender<SyncCommand>,
}

impl SyncHandle {
    pub fn new(commands: mpsc::UnboundedSender<SyncCommand>) -> Self {
        Self { commands }
    }

    /// Fire-and-forget. Returns false once the worker has stopped.
    pub fn queue(&self, command: SyncCommand) -> bool {
        let label = command.label();
        match self.commands.send(command) {
            Ok(()) => true,
            Err(_) => {
                warn!(command = label, "sync worker stopped, command dropped");
                false
            }
        }
    }
}

/// Starts the worker. It stops when every handle is dropped or the report
/// receiver goes away.
pub fn spawn_worker(
    gateway: SyncGateway,
) -> (SyncHandle, mpsc::UnboundedReceiver<SyncReport>, JoinHandle<()>) {
    let (command_tx, mut command_rx) = mpsc::unbounded_channel::<SyncCommand>();
    let (report_tx, report_rx) = mpsc::unbounded_channel();
    let task = tokio::spawn(async move {
        while let Some(command) = command_rx.recv().await {
            let report = execute(&gateway, command).await;
            if report_tx.send(report).is_err() {
                break;
            }
        }
        debug!("sync worker finished");
    });
    (SyncHandle::new(command_tx), report_rx, task)
}

/// Runs one command against the gateway. Never fails: errors become
/// [`SyncReport::Failed`].
pub async fn execute(gateway: &SyncGateway, command: SyncCommand) -> SyncReport {
    let label = command.label();
    let background = command.is_background();
    let outcome: Result<SyncReport> = async {
        let report = match command {
            SyncCommand::CreateDevice(record) => {
                let created = gateway.add_device(&record).await?;
                completed(label, format!("Device '{}' saved", created.name), background)
            }
            SyncCommand::UpdateDevice { id, patch } => {
                completed(label, gateway.update_device(&id, &patch).await?, background)
            }
            SyncCommand::DeleteDevice(id) => {
                completed(label, gateway.delete_device(&id).await?, background)
            }
            SyncCommand::PushMetrics { id, metrics } => {
                completed(label, gateway.update_metrics(&id, &metrics).await?, background)
            }
            SyncCommand::CreateConnection(request) => {
                gateway.add_connection(&request).await?;
                completed(label, "Connection saved".to_string(), background)
            }
            SyncCommand::DeleteConnection(id) => {
                completed(label, gateway.delete_connection(&id).await?, background)
            }
            SyncCommand::SaveProject(doc) => SyncReport::ProjectSaved(gateway.save_project(&doc).await?),
            SyncCommand::LoadProject(id) => SyncReport::ProjectLoaded(gateway.load_project(id).await?),
            SyncCommand::ReplaceTopology(doc) => {
                completed(label, gateway.replace_topology(&doc).await?, background)
            }
            SyncCommand::FetchAnomalies => SyncReport::Anomalies(gateway.topology_details().await?),
            SyncCommand::FetchPins => SyncReport::Pins(gateway.list_pins().await?),
        };
        Ok(report)
    }
    .await;

    outcome.unwrap_or_else(|error| {
        warn!(command = label, "sync failed: {error}");
        SyncReport::Failed { label, error }
    })
}

fn completed(label: &'static str, message: String, background: bool) -> SyncReport {
    SyncReport::Completed {
        label,
        message,
        background,
    }
}
