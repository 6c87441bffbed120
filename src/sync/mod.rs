//! Synchronization with the persistence service.
//!
//! `codec` maps the graph to the wire schema, `gateway` talks HTTP and
//! `worker` runs queued [`SyncCommand`]s off the editor task, sending a
//! [`SyncReport`] back for each one.

pub mod codec;
mod gateway;
mod worker;

pub use gateway::{GatewayConfig, SyncGateway, DEFAULT_SUCCESS_MESSAGE};
pub use worker::{execute, spawn_worker, SyncHandle};

use crate::error::TopologyError;
use crate::graph::{ConnectionId, DeviceId, DeviceMetrics};
use crate::models::{
    ConnectionCreateRequest, DevicePatch, DeviceRecord, PinRecord, ProjectDocument,
    ProjectSummary, TopologyDetails,
};

/// A backend effect requested by the controller or the scheduler.
#[derive(Debug, Clone, PartialEq)]
pub enum SyncCommand {
    CreateDevice(DeviceRecord),
    UpdateDevice { id: DeviceId, patch: DevicePatch },
    DeleteDevice(DeviceId),
    PushMetrics { id: DeviceId, metrics: DeviceMetrics },
    CreateConnection(ConnectionCreateRequest),
    DeleteConnection(ConnectionId),
    SaveProject(ProjectDocument),
    LoadProject(u64),
    /// Make the backend's live devices and connections match a loaded
    /// project.
    ReplaceTopology(ProjectDocument),
    FetchAnomalies,
    FetchPins,
}

impl SyncCommand {
    pub fn label(&self) -> &'static str {
        match self {
            SyncCommand::CreateDevice(_) => "add device",
            SyncCommand::UpdateDevice { .. } => "update device",
            SyncCommand::DeleteDevice(_) => "delete device",
            SyncCommand::PushMetrics { .. } => "update metrics",
            SyncCommand::CreateConnection(_) => "add connection",
            SyncCommand::DeleteConnection(_) => "delete connection",
            SyncCommand::SaveProject(_) => "save project",
            SyncCommand::LoadProject(_) => "load project",
            SyncCommand::ReplaceTopology(_) => "sync loaded project",
            SyncCommand::FetchAnomalies => "fetch anomaly scores",
            SyncCommand::FetchPins => "fetch pins",
        }
    }

    /// Periodic traffic completes silently; everything else is announced.
    pub fn is_background(&self) -> bool {
        matches!(
            self,
            SyncCommand::PushMetrics { .. } | SyncCommand::FetchAnomalies
        )
    }
}

/// Outcome of one executed command.
#[derive(Debug)]
pub enum SyncReport {
    Completed {
        label: &'static str,
        message: String,
        background: bool,
    },
    ProjectSaved(ProjectSummary),
    ProjectLoaded(ProjectDocument),
    Anomalies(TopologyDetails),
    Pins(Vec<PinRecord>),
    Failed {
        label: &'static str,
        error: TopologyError,
    },
}
