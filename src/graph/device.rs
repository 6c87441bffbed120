//! Devices, their ports and their synthetic metrics.

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::geometry::{Point, Rect, DEVICE_HEIGHT, DEVICE_WIDTH};
use super::id::DeviceId;
use super::layer::LayerVisibility;
use crate::error::{Result, TopologyError};

/// Kind of device. Drives default visibility, colors and metric ranges.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceType {
    Workstation,
    Server,
    Router,
    Switch,
    Client,
}

impl DeviceType {
    pub const ALL: [DeviceType; 5] = [
        DeviceType::Workstation,
        DeviceType::Server,
        DeviceType::Router,
        DeviceType::Switch,
        DeviceType::Client,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            DeviceType::Workstation => "workstation",
            DeviceType::Server => "server",
            DeviceType::Router => "router",
            DeviceType::Switch => "switch",
            DeviceType::Client => "client",
        }
    }

    /// Display label, e.g. "Router".
    pub fn label(self) -> String {
        let s = self.as_str();
        let mut chars = s.chars();
        match chars.next() {
            Some(first) => first.to_uppercase().chain(chars).collect(),
            None => String::new(),
        }
    }

    /// End-user machines, as opposed to infrastructure.
    pub fn is_endpoint(self) -> bool {
        matches!(self, DeviceType::Workstation | DeviceType::Client)
    }

    pub fn default_visibility(self) -> LayerVisibility {
        LayerVisibility {
            physical: true,
            logical: true,
            application: matches!(self, DeviceType::Server | DeviceType::Client),
        }
    }

    /// Inclusive sampling ranges for synthetic metrics.
    pub fn metric_ranges(self) -> MetricRanges {
        let r = MetricRange::new;
        match self {
            DeviceType::Workstation => MetricRanges {
                cpu: r(5, 60),
                memory: r(20, 70),
                disk: r(10, 80),
                vulnerability: r(10, 60),
                network: r(1, 100),
                temperature: r(35, 65),
            },
            DeviceType::Server => MetricRanges {
                cpu: r(20, 95),
                memory: r(40, 95),
                disk: r(30, 90),
                vulnerability: r(5, 50),
                network: r(100, 1000),
                temperature: r(45, 80),
            },
            DeviceType::Router => MetricRanges {
                cpu: r(5, 50),
                memory: r(10, 60),
                disk: r(0, 20),
                vulnerability: r(5, 40),
                network: r(200, 1000),
                temperature: r(40, 70),
            },
            DeviceType::Switch => MetricRanges {
                cpu: r(2, 40),
                memory: r(10, 50),
                disk: r(0, 10),
                vulnerability: r(2, 30),
                network: r(100, 1000),
                temperature: r(35, 60),
            },
            DeviceType::Client => MetricRanges {
                cpu: r(0, 99),
                memory: r(0, 99),
                disk: r(0, 99),
                vulnerability: r(0, 99),
                network: r(0, 999),
                temperature: r(40, 79),
            },
        }
    }
}

impl fmt::Display for DeviceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DeviceType {
    type Err = TopologyError;

    fn from_str(s: &str) -> Result<Self> {
        DeviceType::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| {
                TopologyError::invalid(format!(
                    "invalid device type '{s}', must be one of: workstation, server, router, switch, client"
                ))
            })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MetricRange {
    pub min: u32,
    pub max: u32,
}

impl MetricRange {
    pub const fn new(min: u32, max: u32) -> Self {
        Self { min, max }
    }

    fn sample<R: Rng + ?Sized>(self, rng: &mut R) -> u32 {
        rng.gen_range(self.min..=self.max)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MetricRanges {
    pub cpu: MetricRange,
    pub memory: MetricRange,
    pub disk: MetricRange,
    pub vulnerability: MetricRange,
    pub network: MetricRange,
    pub temperature: MetricRange,
}

/// Snapshot of a device's synthetic health metrics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceMetrics {
    /// Percent.
    pub cpu: u32,
    /// Percent.
    pub memory: u32,
    /// Percent.
    pub disk: u32,
    /// Percent.
    pub vulnerability: u32,
    /// Mbps.
    pub network: u32,
    /// Degrees Celsius.
    pub temperature: u32,
}

impl Default for DeviceMetrics {
    fn default() -> Self {
        Self {
            cpu: 0,
            memory: 0,
            disk: 0,
            vulnerability: 0,
            network: 0,
            temperature: 40,
        }
    }
}

impl DeviceMetrics {
    pub fn sample<R: Rng + ?Sized>(ranges: &MetricRanges, rng: &mut R) -> Self {
        Self {
            cpu: ranges.cpu.sample(rng),
            memory: ranges.memory.sample(rng),
            disk: ranges.disk.sample(rng),
            vulnerability: ranges.vulnerability.sample(rng),
            network: ranges.network.sample(rng),
            temperature: ranges.temperature.sample(rng),
        }
    }

    /// Merges the fields present in `update`.
    pub fn apply(&mut self, update: &MetricsUpdate) {
        let MetricsUpdate {
            cpu,
            memory,
            disk,
            vulnerability,
            network,
            temperature,
        } = *update;
        self.cpu = cpu.unwrap_or(self.cpu);
        self.memory = memory.unwrap_or(self.memory);
        self.disk = disk.unwrap_or(self.disk);
        self.vulnerability = vulnerability.unwrap_or(self.vulnerability);
        self.network = network.unwrap_or(self.network);
        self.temperature = temperature.unwrap_or(self.temperature);
    }

    /// Percent fields must stay within 0..=100.
    pub fn check(&self) -> Result<()> {
        let percents = [
            ("cpu", self.cpu),
            ("memory", self.memory),
            ("disk", self.disk),
            ("vulnerability", self.vulnerability),
        ];
        match percents.iter().find(|(_, v)| *v > 100) {
            Some((name, v)) => Err(TopologyError::invalid(format!(
                "{name} metric out of range: {v}%"
            ))),
            None => Ok(()),
        }
    }
}

/// Partial metrics, as sent by the "update metrics" form.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricsUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpu: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub disk: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vulnerability: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub network: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<u32>,
}

impl From<DeviceMetrics> for MetricsUpdate {
    fn from(m: DeviceMetrics) -> Self {
        Self {
            cpu: Some(m.cpu),
            memory: Some(m.memory),
            disk: Some(m.disk),
            vulnerability: Some(m.vulnerability),
            network: Some(m.network),
            temperature: Some(m.temperature),
        }
    }
}

/// Free-form network settings; only checked for blankness at the UI boundary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkConfig {
    pub ip_address: String,
    pub subnet_mask: String,
    pub mac_address: String,
    pub gateway: String,
    pub dns_server: String,
}

impl NetworkConfig {
    pub fn with_mac(mac_address: String) -> Self {
        Self {
            ip_address: "192.168.1.1".into(),
            subnet_mask: "255.255.255.0".into(),
            mac_address,
            gateway: "192.168.1.254".into(),
            dns_server: "8.8.8.8".into(),
        }
    }
}

/// Partial configuration update. Blank values leave the field untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceConfigUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip_address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subnet_mask: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mac_address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gateway: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dns_server: Option<String>,
}

fn merge_field(slot: &mut String, value: &Option<String>) {
    if let Some(v) = value.as_deref().map(str::trim).filter(|v| !v.is_empty()) {
        *slot = v.to_string();
    }
}

/// Service tags shown on the application layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Service {
    Http,
    Ssh,
    Dns,
}

impl Service {
    pub const ALL: [Service; 3] = [Service::Http, Service::Ssh, Service::Dns];

    pub fn as_str(self) -> &'static str {
        match self {
            Service::Http => "HTTP",
            Service::Ssh => "SSH",
            Service::Dns => "DNS",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PortSide {
    Left,
    Right,
    Top,
    Bottom,
}

/// Attachment point on a device's rectangle.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Port {
    pub id: String,
    pub name: String,
    pub side: PortSide,
    pub position: Point,
}

fn layout_ports(id: &DeviceId, origin: Point) -> [Port; 4] {
    let (w, h) = (DEVICE_WIDTH, DEVICE_HEIGHT);
    let port = |n: u8, side: PortSide, dx: f64, dy: f64| Port {
        id: format!("{id}_port{n}"),
        name: format!("port{n}"),
        side,
        position: Point::new(origin.x + dx, origin.y + dy),
    };
    [
        port(1, PortSide::Left, 0.0, h / 2.0),
        port(2, PortSide::Right, w, h / 2.0),
        port(3, PortSide::Top, w / 2.0, 0.0),
        port(4, PortSide::Bottom, w / 2.0, h),
    ]
}

fn random_mac<R: Rng + ?Sized>(rng: &mut R) -> String {
    (0..6)
        .map(|_| format!("{:02X}", rng.gen::<u8>()))
        .collect::<Vec<_>>()
        .join(":")
}

/// A node of the topology graph.
///
/// The position and ports are private: [`Device::move_to`] is the only way to
/// relocate a device, and it regenerates the ports in the same call.
#[derive(Debug, Clone, PartialEq)]
pub struct Device {
    id: DeviceId,
    pub name: String,
    pub device_type: DeviceType,
    origin: Point,
    ports: [Port; 4],
    pub config: NetworkConfig,
    pub metrics: DeviceMetrics,
    pub layers: LayerVisibility,
    pub services: Vec<Service>,
    pub subnet: String,
}

impl Device {
    /// Creates a device with a fresh id, default network settings and
    /// randomized metrics and services.
    pub fn new<R: Rng + ?Sized>(
        position: Point,
        name: impl Into<String>,
        device_type: DeviceType,
        rng: &mut R,
    ) -> Result<Self> {
        let mut device = Self::with_id(DeviceId::generate(), position, name, device_type)?;
        device.config.mac_address = random_mac(rng);
        device.services = Service::ALL
            .into_iter()
            .filter(|_| rng.gen_bool(0.5))
            .collect();
        device.randomize_metrics(rng);
        Ok(device)
    }

    /// Creates a device with a known id and neutral defaults. Used when
    /// reconstructing devices from wire records.
    pub fn with_id(
        id: DeviceId,
        position: Point,
        name: impl Into<String>,
        device_type: DeviceType,
    ) -> Result<Self> {
        if !position.is_finite() {
            return Err(TopologyError::invalid("coordinates must be valid numbers"));
        }
        let name = name.into();
        if name.trim().is_empty() {
            return Err(TopologyError::invalid("device name is required"));
        }
        let ports = layout_ports(&id, position);
        Ok(Self {
            id,
            name,
            device_type,
            origin: position,
            ports,
            config: NetworkConfig::with_mac("00:00:00:00:00:00".into()),
            metrics: DeviceMetrics::default(),
            layers: device_type.default_visibility(),
            services: Vec::new(),
            subnet: "192.168.1.0/24".into(),
        })
    }

    pub fn id(&self) -> &DeviceId {
        &self.id
    }

    /// Top-left corner of the device rectangle.
    pub fn position(&self) -> Point {
        self.origin
    }

    pub fn rect(&self) -> Rect {
        Rect::new(self.origin, DEVICE_WIDTH, DEVICE_HEIGHT)
    }

    pub fn ports(&self) -> &[Port] {
        &self.ports
    }

    pub fn port(&self, id: &str) -> Option<&Port> {
        self.ports.iter().find(|p| p.id == id)
    }

    /// Relocates the device and regenerates its ports.
    pub fn move_to(&mut self, position: Point) -> Result<()> {
        if !position.is_finite() {
            return Err(TopologyError::invalid("coordinates must be valid numbers"));
        }
        self.origin = position;
        self.ports = layout_ports(&self.id, position);
        Ok(())
    }

    /// Port closest to `toward`; the first port wins exact ties.
    pub fn nearest_port(&self, toward: Point) -> &Port {
        let mut best = &self.ports[0];
        let mut best_distance = best.position.distance(toward);
        for port in &self.ports[1..] {
            let d = port.position.distance(toward);
            if d < best_distance {
                best = port;
                best_distance = d;
            }
        }
        best
    }

    pub fn contains(&self, point: Point) -> bool {
        self.rect().contains(point)
    }

    /// Draws a fresh metrics snapshot from this device type's ranges.
    pub fn randomize_metrics<R: Rng + ?Sized>(&mut self, rng: &mut R) {
        self.metrics = DeviceMetrics::sample(&self.device_type.metric_ranges(), rng);
    }

    pub fn apply_config(&mut self, update: &DeviceConfigUpdate) {
        merge_field(&mut self.name, &update.name);
        merge_field(&mut self.config.ip_address, &update.ip_address);
        merge_field(&mut self.config.subnet_mask, &update.subnet_mask);
        merge_field(&mut self.config.mac_address, &update.mac_address);
        merge_field(&mut self.config.gateway, &update.gateway);
        merge_field(&mut self.config.dns_server, &update.dns_server);
    }
}
