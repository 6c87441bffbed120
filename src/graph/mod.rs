//! Topology graph model: devices, ports and connections plus derived geometry.
//!
//! Pure data; no I/O, no timers. The [`TopologyGraph`] aggregate keeps the
//! structural invariants (unique ids, no self or duplicate connections, ports
//! re-anchored after moves); the state store is its only owner.

mod connection;
mod device;
mod geometry;
mod id;
mod layer;

pub(crate) use connection::check_bandwidth;
pub use connection::{Connection, ConnectionMetrics, ConnectionType, Endpoint};
pub use device::{
    Device, DeviceConfigUpdate, DeviceMetrics, DeviceType, MetricRange, MetricRanges,
    MetricsUpdate, NetworkConfig, Port, PortSide, Service,
};
pub use geometry::{Point, Rect, SurfaceSize, DEVICE_HEIGHT, DEVICE_WIDTH};
pub use id::{ConnectionId, DeviceId, RawId};
pub use layer::{Layer, LayerVisibility};

use rand::Rng;

use crate::error::{Result, TopologyError};

/// Hit radius used when picking ports with the pointer.
pub const PORT_HIT_RADIUS: f64 = 5.0;

/// A port found under the pointer.
#[derive(Debug, Clone, Copy)]
pub struct PortHit<'a> {
    pub device: &'a Device,
    pub port: &'a Port,
}

/// First device (in list order) whose rectangle contains `point`.
pub fn hit_test_device(devices: &[Device], point: Point) -> Option<&Device> {
    devices.iter().find(|d| d.contains(point))
}

/// First port within `radius` of `point`, scanning devices then ports.
pub fn hit_test_port(devices: &[Device], point: Point, radius: f64) -> Option<PortHit<'_>> {
    devices.iter().find_map(|device| {
        device
            .ports()
            .iter()
            .find(|port| port.position.distance(point) <= radius)
            .map(|port| PortHit { device, port })
    })
}

/// Devices and connections owned together.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TopologyGraph {
    devices: Vec<Device>,
    connections: Vec<Connection>,
}

impl TopologyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Devices in creation order.
    pub fn devices(&self) -> &[Device] {
        &self.devices
    }

    pub fn connections(&self) -> &[Connection] {
        &self.connections
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty() && self.connections.is_empty()
    }

    pub fn contains_device(&self, id: &DeviceId) -> bool {
        self.devices.iter().any(|d| d.id() == id)
    }

    pub fn device(&self, id: &DeviceId) -> Result<&Device> {
        self.devices
            .iter()
            .find(|d| d.id() == id)
            .ok_or_else(|| TopologyError::not_found("device", id))
    }

    fn device_index(&self, id: &DeviceId) -> Result<usize> {
        self.devices
            .iter()
            .position(|d| d.id() == id)
            .ok_or_else(|| TopologyError::not_found("device", id))
    }

    pub fn connection(&self, id: &ConnectionId) -> Result<&Connection> {
        self.connections
            .iter()
            .find(|c| c.id() == id)
            .ok_or_else(|| TopologyError::not_found("connection", id))
    }

    pub fn insert_device(&mut self, device: Device) -> Result<()> {
        if self.contains_device(device.id()) {
            return Err(TopologyError::invalid(format!(
                "device id already in use: {}",
                device.id()
            )));
        }
        self.devices.push(device);
        Ok(())
    }

    /// Removes a device and every connection touching it.
    ///
    /// Returns `None` when the id is unknown.
    pub fn remove_device(&mut self, id: &DeviceId) -> Option<(Device, Vec<Connection>)> {
        let index = self.devices.iter().position(|d| d.id() == id)?;
        let device = self.devices.remove(index);
        let (removed, kept): (Vec<_>, Vec<_>) = std::mem::take(&mut self.connections)
            .into_iter()
            .partition(|c| c.involves(id));
        self.connections = kept;
        Some((device, removed))
    }

    /// Applies `f` to a device. Position is not reachable from here; use
    /// [`TopologyGraph::move_device`].
    pub fn update_device<F>(&mut self, id: &DeviceId, f: F) -> Result<&Device>
    where
        F: FnOnce(&mut Device),
    {
        let index = self.device_index(id)?;
        f(&mut self.devices[index]);
        Ok(&self.devices[index])
    }

    /// Moves a device and re-anchors every connection attached to it.
    pub fn move_device(&mut self, id: &DeviceId, position: Point) -> Result<&Device> {
        let index = self.device_index(id)?;
        self.devices[index].move_to(position)?;
        self.reanchor_connections_of(id);
        Ok(&self.devices[index])
    }

    fn reanchor_connections_of(&mut self, id: &DeviceId) {
        let devices = &self.devices;
        for conn in self.connections.iter_mut().filter(|c| c.involves(id)) {
            let source = devices.iter().find(|d| d.id() == &conn.source().device);
            let target = devices.iter().find(|d| d.id() == &conn.target().device);
            if let (Some(source), Some(target)) = (source, target) {
                conn.reanchor(source, target);
            }
        }
    }

    /// Structural checks for a prospective connection between two devices.
    pub fn validate_connection(&self, source: &DeviceId, target: &DeviceId) -> Result<()> {
        if source == target {
            return Err(TopologyError::invalid("cannot connect device to itself"));
        }
        self.device(source)?;
        self.device(target)?;
        if self.connections.iter().any(|c| c.relates(source, target)) {
            return Err(TopologyError::invalid(
                "connection already exists between these devices",
            ));
        }
        Ok(())
    }

    /// Builds and inserts a connection between two existing devices.
    pub fn connect<R: Rng + ?Sized>(
        &mut self,
        source: &DeviceId,
        target: &DeviceId,
        connection_type: ConnectionType,
        bandwidth: f64,
        rng: &mut R,
    ) -> Result<&Connection> {
        self.validate_connection(source, target)?;
        let mut conn = Connection::between(
            ConnectionId::generate(),
            self.device(source)?,
            self.device(target)?,
            connection_type,
            bandwidth,
        )?;
        conn.randomize_metrics(rng);
        self.insert_connection(conn)
    }

    /// Inserts a prebuilt connection after validating it against the graph.
    /// Its ports are re-anchored to the current device positions.
    pub fn insert_connection(&mut self, mut conn: Connection) -> Result<&Connection> {
        if self.connections.iter().any(|c| c.id() == conn.id()) {
            return Err(TopologyError::invalid(format!(
                "connection id already in use: {}",
                conn.id()
            )));
        }
        let (source, target) = (conn.source().device.clone(), conn.target().device.clone());
        self.validate_connection(&source, &target)?;
        conn.reanchor(self.device(&source)?, self.device(&target)?);
        self.connections.push(conn);
        Ok(&self.connections[self.connections.len() - 1])
    }

    pub fn remove_connection(&mut self, id: &ConnectionId) -> Option<Connection> {
        let index = self.connections.iter().position(|c| c.id() == id)?;
        Some(self.connections.remove(index))
    }

    /// Redraws metrics for every device and connection currently present.
    pub fn randomize_metrics<R: Rng + ?Sized>(&mut self, rng: &mut R) {
        for device in &mut self.devices {
            device.randomize_metrics(rng);
        }
        for conn in &mut self.connections {
            conn.randomize_metrics(rng);
        }
    }

    pub fn device_at(&self, point: Point) -> Option<&Device> {
        hit_test_device(&self.devices, point)
    }

    pub fn port_at(&self, point: Point, radius: f64) -> Option<PortHit<'_>> {
        hit_test_port(&self.devices, point, radius)
    }
}
