//! Typed, bandwidth-tagged edges between two devices.

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::device::Device;
use super::id::{ConnectionId, DeviceId};
use super::layer::LayerVisibility;
use crate::error::{Result, TopologyError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionType {
    Ethernet,
    Fiber,
    Vpn,
    Wifi,
}

impl ConnectionType {
    pub const ALL: [ConnectionType; 4] = [
        ConnectionType::Ethernet,
        ConnectionType::Fiber,
        ConnectionType::Vpn,
        ConnectionType::Wifi,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ConnectionType::Ethernet => "ethernet",
            ConnectionType::Fiber => "fiber",
            ConnectionType::Vpn => "vpn",
            ConnectionType::Wifi => "wifi",
        }
    }
}

impl fmt::Display for ConnectionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ConnectionType {
    type Err = TopologyError;

    fn from_str(s: &str) -> Result<Self> {
        ConnectionType::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| {
                TopologyError::invalid(format!(
                    "invalid connection type '{s}', must be one of: ethernet, fiber, vpn, wifi"
                ))
            })
    }
}

/// Synthetic link metrics.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ConnectionMetrics {
    /// Milliseconds.
    pub latency: f64,
    /// Percent.
    pub packet_loss: f64,
    /// Mbps, bounded by the link bandwidth.
    pub throughput: f64,
}

impl ConnectionMetrics {
    pub fn sample<R: Rng + ?Sized>(bandwidth: f64, rng: &mut R) -> Self {
        Self {
            latency: rng.gen_range(0.0..100.0),
            packet_loss: rng.gen_range(0.0..5.0),
            throughput: rng.gen::<f64>() * bandwidth,
        }
    }
}

/// One side of a connection: a device and the port currently used on it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub device: DeviceId,
    pub port: String,
}

pub(crate) fn check_bandwidth(bandwidth: f64) -> Result<()> {
    if bandwidth.is_finite() && bandwidth > 0.0 {
        Ok(())
    } else {
        Err(TopologyError::invalid("bandwidth must be a positive number"))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Connection {
    id: ConnectionId,
    source: Endpoint,
    target: Endpoint,
    pub connection_type: ConnectionType,
    bandwidth: f64,
    pub layers: LayerVisibility,
    pub metrics: ConnectionMetrics,
}

impl Connection {
    /// Creates a connection anchored on the nearest port pair.
    ///
    /// Only checks what can be checked from the two devices alone; duplicate
    /// pairs are the graph's concern.
    pub fn between(
        id: ConnectionId,
        source: &Device,
        target: &Device,
        connection_type: ConnectionType,
        bandwidth: f64,
    ) -> Result<Self> {
        if source.id() == target.id() {
            return Err(TopologyError::invalid("cannot connect device to itself"));
        }
        check_bandwidth(bandwidth)?;
        let (source_port, target_port) = anchor_ports(source, target);
        Ok(Self {
            id,
            source: Endpoint {
                device: source.id().clone(),
                port: source_port,
            },
            target: Endpoint {
                device: target.id().clone(),
                port: target_port,
            },
            connection_type,
            bandwidth,
            layers: LayerVisibility::ALL_VISIBLE,
            metrics: ConnectionMetrics::default(),
        })
    }

    pub fn id(&self) -> &ConnectionId {
        &self.id
    }

    pub fn source(&self) -> &Endpoint {
        &self.source
    }

    pub fn target(&self) -> &Endpoint {
        &self.target
    }

    pub fn bandwidth(&self) -> f64 {
        self.bandwidth
    }

    pub fn involves(&self, device: &DeviceId) -> bool {
        &self.source.device == device || &self.target.device == device
    }

    /// True when this connection joins `a` and `b` in either direction.
    pub fn relates(&self, a: &DeviceId, b: &DeviceId) -> bool {
        (&self.source.device == a && &self.target.device == b)
            || (&self.source.device == b && &self.target.device == a)
    }

    /// Re-anchors both ends on the nearest port pair for the devices'
    /// current positions. Calling it twice without movement is a no-op.
    pub fn reanchor(&mut self, source: &Device, target: &Device) {
        let (source_port, target_port) = anchor_ports(source, target);
        self.source.port = source_port;
        self.target.port = target_port;
    }

    pub fn randomize_metrics<R: Rng + ?Sized>(&mut self, rng: &mut R) {
        self.metrics = ConnectionMetrics::sample(self.bandwidth, rng);
    }
}

fn anchor_ports(source: &Device, target: &Device) -> (String, String) {
    (
        source.nearest_port(target.position()).id.clone(),
        target.nearest_port(source.position()).id.clone(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{DeviceType, Point};
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn pair() -> (Device, Device) {
        let mut rng = StdRng::seed_from_u64(1);
        let a = Device::new(Point::new(50.0, 50.0), "A", DeviceType::Workstation, &mut rng).unwrap();
        let b = Device::new(Point::new(250.0, 50.0), "B", DeviceType::Router, &mut rng).unwrap();
        (a, b)
    }

    #[test]
    fn test_ports_face_each_other() {
        let (a, b) = pair();
        let conn =
            Connection::between(ConnectionId::generate(), &a, &b, ConnectionType::Ethernet, 1000.0)
                .unwrap();
        assert_eq!(conn.source().port, a.ports()[1].id);
        assert_eq!(conn.target().port, b.ports()[0].id);
    }

    #[test]
    fn test_self_connection_rejected() {
        let (a, _) = pair();
        let err = Connection::between(ConnectionId::generate(), &a, &a, ConnectionType::Fiber, 10.0)
            .unwrap_err();
        assert!(matches!(err, TopologyError::ValidationFailed(_)));
    }

    #[test]
    fn test_non_positive_bandwidth_rejected() {
        let (a, b) = pair();
        for bw in [0.0, -5.0, f64::INFINITY] {
            assert!(
                Connection::between(ConnectionId::generate(), &a, &b, ConnectionType::Vpn, bw)
                    .is_err()
            );
        }
    }

    #[test]
    fn test_reanchor_follows_moves_and_is_idempotent() {
        let (a, mut b) = pair();
        let mut conn =
            Connection::between(ConnectionId::generate(), &a, &b, ConnectionType::Wifi, 54.0)
                .unwrap();
        b.move_to(Point::new(50.0, 300.0)).unwrap();
        conn.reanchor(&a, &b);
        assert_eq!(conn.source().port, a.ports()[3].id);
        assert_eq!(conn.target().port, b.ports()[2].id);
        let before = conn.clone();
        conn.reanchor(&a, &b);
        assert_eq!(conn, before);
    }

    #[test]
    fn test_relates_is_unordered() {
        let (a, b) = pair();
        let conn =
            Connection::between(ConnectionId::generate(), &a, &b, ConnectionType::Ethernet, 100.0)
                .unwrap();
        assert!(conn.relates(a.id(), b.id()));
        assert!(conn.relates(b.id(), a.id()));
        assert!(conn.involves(b.id()));
    }

    #[test]
    fn test_metrics_bounded_by_bandwidth() {
        let (a, b) = pair();
        let mut rng = StdRng::seed_from_u64(3);
        let mut conn =
            Connection::between(ConnectionId::generate(), &a, &b, ConnectionType::Ethernet, 10.0)
                .unwrap();
        for _ in 0..100 {
            conn.randomize_metrics(&mut rng);
            assert!(conn.metrics.throughput < 10.0);
            assert!(conn.metrics.latency < 100.0);
            assert!(conn.metrics.packet_loss < 5.0);
        }
    }
}
