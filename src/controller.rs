//! Interaction controller.
//!
//! Turns pointer, keyboard and UI commands into store mutations. The
//! controller performs no I/O: backend effects are returned as
//! [`SyncCommand`]s for the caller to queue. Every failure ends up as one
//! error notice and every user-visible success as one success notice.

use rand::Rng;
use tracing::debug;

use crate::error::{Result, TopologyError};
use crate::graph::{
    check_bandwidth, ConnectionId, ConnectionType, Device, DeviceConfigUpdate, DeviceId, DeviceType,
    MetricsUpdate, Point,
};
use crate::models::{DevicePatch, ProjectDocument};
use crate::notice::NoticeBoard;
use crate::render::ViewTransform;
use crate::store::{DragState, Store};
use crate::sync::{codec, SyncCommand};

#[derive(Debug, Clone, PartialEq)]
pub enum Mode {
    Idle,
    DraggingDevice {
        device: DeviceId,
        /// Pointer position minus device origin at pointer-down.
        offset: Point,
        /// Device origin at pointer-down, restored on Escape.
        start: Point,
        moved: bool,
    },
    Connecting {
        source: Option<DeviceId>,
    },
}

/// Pointer input in client (displayed) coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PointerEvent {
    Down(Point),
    Move(Point),
    Up(Point),
    Click(Point),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Key {
    Escape,
    Delete,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionRef {
    Id(ConnectionId),
    /// Position in the store's connection list.
    Index(usize),
}

/// UI-level entry points (forms, buttons, menus).
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    AddDevice {
        name: String,
        device_type: DeviceType,
        position: Point,
    },
    AddConnection {
        source: DeviceId,
        target: DeviceId,
        connection_type: ConnectionType,
        bandwidth: f64,
    },
    RemoveConnection(ConnectionRef),
    RemoveDevice(DeviceId),
    UpdateDeviceConfig {
        id: DeviceId,
        update: DeviceConfigUpdate,
    },
    UpdateMetrics {
        id: DeviceId,
        update: MetricsUpdate,
    },
    SaveProject {
        name: String,
    },
    /// Replace the graph with an already parsed project document.
    LoadProject(ProjectDocument),
    /// Ask the backend for a stored project.
    FetchProject(u64),
    /// Ask the backend for the map pins.
    FetchPins,
    SetLayer(String),
    ToggleConnectMode,
    SetConnectionDefaults {
        connection_type: ConnectionType,
        bandwidth: f64,
    },
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ControllerOptions {
    /// Refuse direct links between two endpoint devices (workstation or
    /// client).
    pub forbid_endpoint_pairs: bool,
    /// Type used by connect mode.
    pub connection_type: ConnectionType,
    /// Bandwidth used by connect mode, in Mbps.
    pub bandwidth: f64,
}

impl Default for ControllerOptions {
    fn default() -> Self {
        Self {
            forbid_endpoint_pairs: false,
            connection_type: ConnectionType::Ethernet,
            bandwidth: 1000.0,
        }
    }
}

pub struct Controller {
    mode: Mode,
    options: ControllerOptions,
    transform: ViewTransform,
    notices: NoticeBoard,
}

impl Controller {
    pub fn new(options: ControllerOptions) -> Self {
        Self {
            mode: Mode::Idle,
            options,
            transform: ViewTransform::identity(),
            notices: NoticeBoard::new(),
        }
    }

    pub fn mode(&self) -> &Mode {
        &self.mode
    }

    pub fn options(&self) -> &ControllerOptions {
        &self.options
    }

    pub fn notices(&self) -> &NoticeBoard {
        &self.notices
    }

    pub fn notices_mut(&mut self) -> &mut NoticeBoard {
        &mut self.notices
    }

    pub fn set_transform(&mut self, transform: ViewTransform) {
        self.transform = transform;
    }

    pub fn handle_pointer<R: Rng + ?Sized>(
        &mut self,
        store: &mut Store,
        event: PointerEvent,
        rng: &mut R,
    ) -> Vec<SyncCommand> {
        let outcome = self.on_pointer(store, event, rng);
        self.settle(outcome)
    }

    pub fn handle_key(&mut self, store: &mut Store, key: Key) -> Vec<SyncCommand> {
        let outcome = self.on_key(store, key);
        self.settle(outcome)
    }

    pub fn handle_command<R: Rng + ?Sized>(
        &mut self,
        store: &mut Store,
        command: Command,
        rng: &mut R,
    ) -> Vec<SyncCommand> {
        let outcome = self.on_command(store, command, rng);
        self.settle(outcome)
    }

    fn settle(&mut self, outcome: Result<Vec<SyncCommand>>) -> Vec<SyncCommand> {
        outcome.unwrap_or_else(|e| {
            debug!("interaction rejected: {e}");
            self.notices.report_error(e.to_string());
            Vec::new()
        })
    }

    fn on_pointer<R: Rng + ?Sized>(
        &mut self,
        store: &mut Store,
        event: PointerEvent,
        rng: &mut R,
    ) -> Result<Vec<SyncCommand>> {
        match event {
            PointerEvent::Down(client) => {
                let point = self.transform.to_logical(client);
                if self.mode != Mode::Idle {
                    return Ok(Vec::new());
                }
                let Some(device) = store.graph().device_at(point) else {
                    return Ok(Vec::new());
                };
                let (device, start) = (device.id().clone(), device.position());
                let offset = point - start;
                store.set_drag_state(Some(DragState {
                    device: device.clone(),
                    offset,
                }))?;
                self.mode = Mode::DraggingDevice {
                    device,
                    offset,
                    start,
                    moved: false,
                };
                Ok(Vec::new())
            }
            PointerEvent::Move(client) => {
                let Mode::DraggingDevice { device, offset, .. } = &self.mode else {
                    return Ok(Vec::new());
                };
                let (device, offset) = (device.clone(), *offset);
                let point = self.transform.to_logical(client);
                if let Err(e) = store.move_device(&device, point - offset) {
                    self.mode = Mode::Idle;
                    return Err(e);
                }
                if let Mode::DraggingDevice { moved, .. } = &mut self.mode {
                    *moved = true;
                }
                Ok(Vec::new())
            }
            PointerEvent::Up(_) => {
                if !matches!(self.mode, Mode::DraggingDevice { .. }) {
                    return Ok(Vec::new());
                }
                let Mode::DraggingDevice { device, moved, .. } =
                    std::mem::replace(&mut self.mode, Mode::Idle)
                else {
                    return Ok(Vec::new());
                };
                store.set_drag_state(None)?;
                if !moved {
                    return Ok(Vec::new());
                }
                let position = store.graph().device(&device)?.position();
                self.notices.report_success("Device position updated");
                Ok(vec![SyncCommand::UpdateDevice {
                    id: device,
                    patch: DevicePatch {
                        x: Some(position.x),
                        y: Some(position.y),
                        ..Default::default()
                    },
                }])
            }
            PointerEvent::Click(client) => {
                let point = self.transform.to_logical(client);
                let hit = store.graph().device_at(point).map(|d| d.id().clone());
                match self.mode.clone() {
                    Mode::Idle => {
                        store.set_selected_device(hit)?;
                        Ok(Vec::new())
                    }
                    Mode::Connecting { source } => self.connect_click(store, source, hit, rng),
                    Mode::DraggingDevice { .. } => Ok(Vec::new()),
                }
            }
        }
    }

    fn connect_click<R: Rng + ?Sized>(
        &mut self,
        store: &mut Store,
        source: Option<DeviceId>,
        hit: Option<DeviceId>,
        rng: &mut R,
    ) -> Result<Vec<SyncCommand>> {
        let Some(hit) = hit else {
            debug!("connect mode cancelled by click on empty space");
            self.mode = Mode::Idle;
            return Ok(Vec::new());
        };
        match source {
            None => {
                store.set_selected_device(Some(hit.clone()))?;
                self.mode = Mode::Connecting { source: Some(hit) };
                Ok(Vec::new())
            }
            Some(source) => {
                self.mode = Mode::Idle;
                let ControllerOptions {
                    connection_type,
                    bandwidth,
                    ..
                } = self.options;
                self.create_connection(store, &source, &hit, connection_type, bandwidth, rng)
            }
        }
    }

    fn on_key(&mut self, store: &mut Store, key: Key) -> Result<Vec<SyncCommand>> {
        match key {
            Key::Escape => {
                match std::mem::replace(&mut self.mode, Mode::Idle) {
                    Mode::DraggingDevice {
                        device,
                        start,
                        moved,
                        ..
                    } => {
                        if moved {
                            store.move_device(&device, start)?;
                        }
                        store.set_drag_state(None)?;
                    }
                    Mode::Connecting { .. } | Mode::Idle => {}
                }
                Ok(Vec::new())
            }
            Key::Delete => match store.selected_id().cloned() {
                Some(id) => self.remove_device(store, id),
                None => Ok(Vec::new()),
            },
        }
    }

    fn on_command<R: Rng + ?Sized>(
        &mut self,
        store: &mut Store,
        command: Command,
        rng: &mut R,
    ) -> Result<Vec<SyncCommand>> {
        match command {
            Command::AddDevice {
                name,
                device_type,
                position,
            } => {
                let device = Device::new(position, name, device_type, rng)?;
                let record = codec::device_to_wire(store.add_device(device)?);
                self.notices.report_success("Device added successfully");
                Ok(vec![SyncCommand::CreateDevice(record)])
            }
            Command::AddConnection {
                source,
                target,
                connection_type,
                bandwidth,
            } => self.create_connection(store, &source, &target, connection_type, bandwidth, rng),
            Command::RemoveConnection(reference) => {
                let id = match reference {
                    ConnectionRef::Id(id) => id,
                    ConnectionRef::Index(index) => store
                        .connections()
                        .get(index)
                        .map(|c| c.id().clone())
                        .ok_or_else(|| TopologyError::not_found("connection", format!("#{index}")))?,
                };
                match store.remove_connection(&id)? {
                    Some(_) => {
                        self.notices.report_success("Connection removed");
                        Ok(vec![SyncCommand::DeleteConnection(id)])
                    }
                    None => Err(TopologyError::not_found("connection", &id)),
                }
            }
            Command::RemoveDevice(id) => self.remove_device(store, id),
            Command::UpdateDeviceConfig { id, update } => {
                store.update_device(&id, &update)?;
                self.notices.report_success("Device configuration updated");
                Ok(vec![SyncCommand::UpdateDevice {
                    id,
                    patch: DevicePatch {
                        config: update,
                        ..Default::default()
                    },
                }])
            }
            Command::UpdateMetrics { id, update } => {
                let mut merged = store.graph().device(&id)?.metrics;
                merged.apply(&update);
                merged.check()?;
                let metrics = store.update_device_metrics(&id, &update)?.metrics;
                self.notices.report_success("Metrics updated");
                Ok(vec![SyncCommand::PushMetrics { id, metrics }])
            }
            Command::SaveProject { name } => {
                let name = name.trim();
                if name.is_empty() {
                    return Err(TopologyError::invalid("project name is required"));
                }
                let doc = codec::graph_to_project(store.graph(), Some(name.to_string()));
                Ok(vec![SyncCommand::SaveProject(doc)])
            }
            Command::LoadProject(doc) => {
                let loaded = codec::project_to_graph(&doc)?;
                let skipped = loaded.skipped.len();
                store.replace_graph(loaded.graph)?;
                self.mode = Mode::Idle;
                if skipped == 0 {
                    self.notices.report_success("Project loaded");
                } else {
                    self.notices.report_success(format!(
                        "Project loaded, {skipped} connection(s) skipped"
                    ));
                }
                // The backend mirrors what was actually restored.
                let restored = codec::graph_to_project(store.graph(), doc.name);
                Ok(vec![SyncCommand::ReplaceTopology(restored)])
            }
            Command::FetchProject(id) => Ok(vec![SyncCommand::LoadProject(id)]),
            Command::FetchPins => Ok(vec![SyncCommand::FetchPins]),
            Command::SetLayer(name) => {
                store.set_active_layer(&name)?;
                Ok(Vec::new())
            }
            Command::ToggleConnectMode => {
                self.mode = match self.mode {
                    Mode::Idle => Mode::Connecting { source: None },
                    Mode::Connecting { .. } => Mode::Idle,
                    Mode::DraggingDevice { .. } => return Ok(Vec::new()),
                };
                Ok(Vec::new())
            }
            Command::SetConnectionDefaults {
                connection_type,
                bandwidth,
            } => {
                check_bandwidth(bandwidth)?;
                self.options.connection_type = connection_type;
                self.options.bandwidth = bandwidth;
                Ok(Vec::new())
            }
        }
    }

    fn check_policy(&self, store: &Store, source: &DeviceId, target: &DeviceId) -> Result<()> {
        if !self.options.forbid_endpoint_pairs {
            return Ok(());
        }
        let graph = store.graph();
        let (a, b) = (graph.device(source)?, graph.device(target)?);
        if a.device_type.is_endpoint() && b.device_type.is_endpoint() {
            return Err(TopologyError::invalid(format!(
                "a {} cannot be connected directly to a {}",
                a.device_type, b.device_type
            )));
        }
        Ok(())
    }

    fn create_connection<R: Rng + ?Sized>(
        &mut self,
        store: &mut Store,
        source: &DeviceId,
        target: &DeviceId,
        connection_type: ConnectionType,
        bandwidth: f64,
        rng: &mut R,
    ) -> Result<Vec<SyncCommand>> {
        self.check_policy(store, source, target)?;
        let conn = store.connect(source, target, connection_type, bandwidth, rng)?;
        let request = codec::connection_request(conn);
        self.notices.report_success("Connection created");
        Ok(vec![SyncCommand::CreateConnection(request)])
    }

    fn remove_device(&mut self, store: &mut Store, id: DeviceId) -> Result<Vec<SyncCommand>> {
        let Some(device) = store.remove_device(&id)? else {
            return Err(TopologyError::not_found("device", &id));
        };
        let involved = match &self.mode {
            Mode::DraggingDevice { device, .. } => device == &id,
            Mode::Connecting { source } => source.as_ref() == Some(&id),
            Mode::Idle => false,
        };
        if involved {
            self.mode = Mode::Idle;
        }
        self.notices
            .report_success(format!("Device '{}' removed", device.name));
        Ok(vec![SyncCommand::DeleteDevice(id)])
    }
}
