//! Conversion between the graph model and the wire/file schema.

use tracing::warn;

use crate::error::{Result, TopologyError};
use crate::graph::{Connection, ConnectionId, ConnectionType, Device, DeviceId, DeviceType, Point, TopologyGraph};
use crate::models::{
    ConnectionCreateRequest, ConnectionRecord, DeviceRecord, LinkMetrics, ProjectDocument,
};

pub fn device_to_wire(device: &Device) -> DeviceRecord {
    let position = device.position();
    DeviceRecord {
        id: Some(device.id().clone()),
        name: device.name.clone(),
        device_type: device.device_type.as_str().to_string(),
        x: position.x,
        y: position.y,
        ip_address: Some(device.config.ip_address.clone()),
        subnet_mask: Some(device.config.subnet_mask.clone()),
        mac_address: Some(device.config.mac_address.clone()),
        gateway: Some(device.config.gateway.clone()),
        dns_server: Some(device.config.dns_server.clone()),
        metrics: Some(device.metrics),
        subnet: Some(device.subnet.clone()),
        services: device.services.clone(),
        layer: Some(device.layers),
    }
}

pub fn connection_to_wire(conn: &Connection) -> ConnectionRecord {
    ConnectionRecord {
        id: Some(conn.id().clone()),
        source_device_id: conn.source().device.clone(),
        target_device_id: conn.target().device.clone(),
        connection_type: conn.connection_type.as_str().to_string(),
        bandwidth: conn.bandwidth(),
        start_port_id: Some(conn.source().port.clone()),
        end_port_id: Some(conn.target().port.clone()),
        layer: Some(conn.layers),
        metrics: Some(conn.metrics),
    }
}

/// Body for `POST /api/connections`.
pub fn connection_request(conn: &Connection) -> ConnectionCreateRequest {
    ConnectionCreateRequest {
        id: Some(conn.id().clone()),
        source_device_id: conn.source().device.clone(),
        target_device_id: conn.target().device.clone(),
        connection_type: conn.connection_type.as_str().to_string(),
        bandwidth: conn.bandwidth(),
        metrics: LinkMetrics {
            latency: conn.metrics.latency,
            packet_loss: conn.metrics.packet_loss,
        },
    }
}

fn copy_field(slot: &mut String, value: &Option<String>) {
    if let Some(v) = value {
        slot.clone_from(v);
    }
}

/// Rebuilds a device. Missing optional fields keep their defaults; a missing
/// id, an unknown type or out-of-range metrics reject the record.
pub fn device_from_wire(record: &DeviceRecord) -> Result<Device> {
    let id = record
        .id
        .clone()
        .ok_or_else(|| TopologyError::invalid(format!("device '{}' has no id", record.name)))?;
    let device_type: DeviceType = record.device_type.parse()?;
    let mut device = Device::with_id(id, Point::new(record.x, record.y), &record.name, device_type)?;

    copy_field(&mut device.config.ip_address, &record.ip_address);
    copy_field(&mut device.config.subnet_mask, &record.subnet_mask);
    copy_field(&mut device.config.mac_address, &record.mac_address);
    copy_field(&mut device.config.gateway, &record.gateway);
    copy_field(&mut device.config.dns_server, &record.dns_server);
    copy_field(&mut device.subnet, &record.subnet);
    if let Some(metrics) = record.metrics {
        metrics.check()?;
        device.metrics = metrics;
    }
    if let Some(layers) = record.layer {
        device.layers = layers;
    }
    device.services = record.services.clone();
    Ok(device)
}

fn endpoint_device<'a>(
    devices: &'a [Device],
    connection: &ConnectionId,
    device: &DeviceId,
) -> Result<&'a Device> {
    devices
        .iter()
        .find(|d| d.id() == device)
        .ok_or_else(|| TopologyError::DanglingReference {
            connection: connection.to_string(),
            device: device.to_string(),
        })
}

/// Rebuilds a connection against already reconstructed devices.
///
/// Ports are re-anchored from the device positions; stored port ids are
/// not trusted.
pub fn connection_from_wire(record: &ConnectionRecord, devices: &[Device]) -> Result<Connection> {
    let id = record.id.clone().ok_or_else(|| {
        TopologyError::invalid(format!(
            "connection {} -> {} has no id",
            record.source_device_id, record.target_device_id
        ))
    })?;
    let source = endpoint_device(devices, &id, &record.source_device_id)?;
    let target = endpoint_device(devices, &id, &record.target_device_id)?;
    let connection_type: ConnectionType = record.connection_type.parse()?;

    let mut conn = Connection::between(id, source, target, connection_type, record.bandwidth)?;
    if let Some(layers) = record.layer {
        conn.layers = layers;
    }
    if let Some(metrics) = record.metrics {
        conn.metrics = metrics;
    }
    Ok(conn)
}

pub fn graph_to_project(graph: &TopologyGraph, name: Option<String>) -> ProjectDocument {
    ProjectDocument {
        name,
        devices: graph.devices().iter().map(device_to_wire).collect(),
        connections: graph.connections().iter().map(connection_to_wire).collect(),
    }
}

/// Result of a project load.
#[derive(Debug)]
pub struct LoadedProject {
    pub graph: TopologyGraph,
    /// Connections that could not be restored, with the reason.
    pub skipped: Vec<(ConnectionRecord, TopologyError)>,
}

/// Devices first, all or nothing; then connections, skipping the ones that
/// do not fit the reconstructed devices.
pub fn project_to_graph(doc: &ProjectDocument) -> Result<LoadedProject> {
    let mut graph = TopologyGraph::new();
    for record in &doc.devices {
        graph.insert_device(device_from_wire(record)?)?;
    }

    let mut skipped = Vec::new();
    for record in &doc.connections {
        let restored = connection_from_wire(record, graph.devices())
            .and_then(|conn| graph.insert_connection(conn).map(|_| ()));
        if let Err(e) = restored {
            warn!(
                source = %record.source_device_id,
                target = %record.target_device_id,
                "skipping connection during load: {e}"
            );
            skipped.push((record.clone(), e));
        }
    }
    Ok(LoadedProject { graph, skipped })
}
