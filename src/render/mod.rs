//! Full-frame rendering of a store snapshot.
//!
//! The renderer is stateless between frames and never mutates the store.
//! A failure while drawing one entity is logged and counted; the rest of the
//! frame is still drawn.

mod style;
mod surface;
mod transform;

pub use style::{connection_stroke, device_fill, GRID_SIZE};
pub use surface::{DisplayList, DrawCommand, Stroke, Surface, TextAlign, TextStyle};
pub use transform::ViewTransform;

use itertools::Itertools;
use tracing::error;

use crate::anomaly::{AnomalyOverlay, AnomalyScore};
use crate::error::{Result, TopologyError};
use crate::graph::{Connection, Device, Endpoint, Layer, Point, TopologyGraph, DEVICE_WIDTH};
use crate::store::Store;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RenderOptions {
    pub show_grid: bool,
    pub grid_size: f64,
}

impl Default for RenderOptions {
    fn default() -> Self {
        Self {
            show_grid: true,
            grid_size: GRID_SIZE,
        }
    }
}

/// What one frame drew.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrameReport {
    pub connections: usize,
    pub devices: usize,
    pub badges: usize,
    pub failures: usize,
}

#[derive(Debug, Clone, Default)]
pub struct Renderer {
    options: RenderOptions,
}

impl Renderer {
    pub fn new(options: RenderOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &RenderOptions {
        &self.options
    }

    /// Clears the surface and redraws grid, visible connections, visible
    /// devices and their anomaly badges, in that order.
    ///
    /// Nothing here fails the caller: every failed step is logged and
    /// counted in [`FrameReport::failures`]. A store that is not initialized
    /// has nothing to draw, so the frame is skipped.
    pub fn draw(
        &self,
        store: &Store,
        overlay: &AnomalyOverlay,
        surface: &mut dyn Surface,
    ) -> FrameReport {
        let mut report = FrameReport::default();
        if let Err(e) = store.surface() {
            error!("frame skipped: {e}");
            report.failures += 1;
            return report;
        }
        if let Err(e) = surface.clear() {
            error!("failed to clear surface: {e}");
            report.failures += 1;
        }
        if let Err(e) = surface.reset_transform() {
            error!("failed to reset surface transform: {e}");
            report.failures += 1;
        }
        if self.options.show_grid {
            if let Err(e) = self.draw_grid(surface) {
                error!("failed to draw grid: {e}");
                report.failures += 1;
            }
        }

        let layer = store.active_layer();
        let graph = store.graph();

        for conn in graph
            .connections()
            .iter()
            .filter(|c| c.layers.is_visible(layer))
        {
            match draw_connection(graph, conn, layer, surface) {
                Ok(()) => report.connections += 1,
                Err(e) => {
                    error!(connection = %conn.id(), "failed to draw connection: {e}");
                    report.failures += 1;
                }
            }
        }

        let visible: Vec<&Device> = graph
            .devices()
            .iter()
            .filter(|d| d.layers.is_visible(layer))
            .collect();
        let selected = store.selected_id();

        for device in &visible {
            let is_selected = selected == Some(device.id());
            match draw_device(device, layer, is_selected, surface) {
                Ok(()) => report.devices += 1,
                Err(e) => {
                    error!(device = %device.id(), "failed to draw device: {e}");
                    report.failures += 1;
                }
            }
        }

        for device in &visible {
            let Some(score) = overlay.score_for(device.id()) else {
                continue;
            };
            match draw_badge(device, score, surface) {
                Ok(()) => report.badges += 1,
                Err(e) => {
                    error!(device = %device.id(), "failed to draw anomaly badge: {e}");
                    report.failures += 1;
                }
            }
        }

        report
    }

    fn draw_grid(&self, surface: &mut dyn Surface) -> Result<()> {
        let step = self.options.grid_size;
        if !(step.is_finite() && step > 0.0) {
            return Err(TopologyError::invalid("grid size must be positive"));
        }
        let size = surface.size();
        let mut x = 0.0;
        while x <= size.width {
            surface.stroke_line(
                Point::new(x, 0.0),
                Point::new(x, size.height),
                &style::GRID_STROKE,
            )?;
            x += step;
        }
        let mut y = 0.0;
        while y <= size.height {
            surface.stroke_line(
                Point::new(0.0, y),
                Point::new(size.width, y),
                &style::GRID_STROKE,
            )?;
            y += step;
        }
        Ok(())
    }
}

fn port_position(graph: &TopologyGraph, endpoint: &Endpoint) -> Result<Point> {
    let device = graph.device(&endpoint.device)?;
    device
        .port(&endpoint.port)
        .map(|p| p.position)
        .ok_or_else(|| TopologyError::not_found("port", &endpoint.port))
}

fn draw_connection(
    graph: &TopologyGraph,
    conn: &Connection,
    layer: Layer,
    surface: &mut dyn Surface,
) -> Result<()> {
    let from = port_position(graph, conn.source())?;
    let to = port_position(graph, conn.target())?;
    surface.stroke_line(from, to, &connection_stroke(conn.connection_type))?;

    let label = match layer {
        Layer::Physical => Some(format!("{:.1} Mbps", conn.metrics.throughput)),
        Layer::Logical => Some(format!(
            "{:.0}ms | {} Mbps",
            conn.metrics.latency,
            conn.bandwidth()
        )),
        Layer::Application | Layer::Cip => None,
    };
    if let Some(label) = label {
        let mid = from.midpoint(to);
        surface.fill_text(&label, Point::new(mid.x, mid.y - 8.0), &style::LINK_LABEL)?;
    }
    Ok(())
}

/// Per-layer detail lines printed inside the device body.
fn detail_lines(device: &Device, layer: Layer) -> Vec<String> {
    match layer {
        Layer::Physical => vec![
            format!("CPU: {}%", device.metrics.cpu),
            format!("Mem: {}%", device.metrics.memory),
            format!("Net: {} Mbps", device.metrics.network),
        ],
        Layer::Logical => vec![device.config.ip_address.clone(), device.subnet.clone()],
        Layer::Application if device.services.is_empty() => vec!["No services".to_string()],
        Layer::Application => vec![device.services.iter().map(|s| s.as_str()).join(", ")],
        Layer::Cip => Vec::new(),
    }
}

fn draw_device(
    device: &Device,
    layer: Layer,
    selected: bool,
    surface: &mut dyn Surface,
) -> Result<()> {
    device.metrics.check()?;
    let rect = device.rect();
    let outline = if selected {
        &style::SELECTED_OUTLINE
    } else {
        &style::DEVICE_OUTLINE
    };
    surface.fill_rect(rect, device_fill(layer, device.device_type), outline)?;
    for port in device.ports() {
        surface.fill_circle(port.position, style::PORT_RADIUS, style::PORT_FILL)?;
    }

    let center_x = rect.center().x;
    let origin = rect.origin;
    surface.fill_text(&device.name, Point::new(center_x, origin.y + 18.0), &style::LABEL)?;
    surface.fill_text(
        &device.device_type.label(),
        Point::new(center_x, origin.y + 32.0),
        &style::DETAIL_CENTERED,
    )?;
    for (i, line) in detail_lines(device, layer).iter().enumerate() {
        let y = origin.y + 46.0 + 12.0 * i as f64;
        surface.fill_text(line, Point::new(origin.x + 6.0, y), &style::DETAIL)?;
    }
    Ok(())
}

fn draw_badge(device: &Device, score: AnomalyScore, surface: &mut dyn Surface) -> Result<()> {
    if !score.zscore.is_finite() {
        return Err(TopologyError::invalid("z-score is not a finite number"));
    }
    let origin = device.position();
    let center = Point::new(origin.x + DEVICE_WIDTH - 10.0, origin.y + 10.0);
    surface.fill_circle(center, style::BADGE_RADIUS, score.status.color())?;
    surface.fill_text(
        &format!("z={:.2}", score.zscore),
        Point::new(center.x, origin.y - 4.0),
        &style::LINK_LABEL,
    )?;
    Ok(())
}
