//! Fixed color and stroke tables.

use super::surface::{Stroke, TextAlign, TextStyle};
use crate::graph::{ConnectionType, DeviceType, Layer};

pub const GRID_SIZE: f64 = 20.0;
pub const GRID_STROKE: Stroke = Stroke::solid("#f0f0f0", 0.5);

pub const DEVICE_OUTLINE: Stroke = Stroke::solid("#333333", 1.0);
pub const SELECTED_OUTLINE: Stroke = Stroke::solid("#2196f3", 2.0);

pub const PORT_RADIUS: f64 = 4.0;
pub const PORT_FILL: &str = "#666666";

pub const BADGE_RADIUS: f64 = 6.0;

pub const LABEL: TextStyle = TextStyle {
    color: "#000000",
    size: 12.0,
    align: TextAlign::Center,
};

pub const DETAIL: TextStyle = TextStyle {
    color: "#333333",
    size: 10.0,
    align: TextAlign::Left,
};

pub const DETAIL_CENTERED: TextStyle = TextStyle {
    align: TextAlign::Center,
    ..DETAIL
};

pub const LINK_LABEL: TextStyle = TextStyle {
    color: "#666666",
    size: 10.0,
    align: TextAlign::Center,
};

/// Device body fill for the active layer.
pub fn device_fill(layer: Layer, device_type: DeviceType) -> &'static str {
    match (layer, device_type) {
        (Layer::Logical, DeviceType::Router) => "#ffeb3b",
        (Layer::Logical, DeviceType::Switch) => "#4caf50",
        (Layer::Application, DeviceType::Server) => "#2196f3",
        (Layer::Application, DeviceType::Client) => "#ff9800",
        _ => "#ffffff",
    }
}

pub fn connection_stroke(connection_type: ConnectionType) -> Stroke {
    match connection_type {
        ConnectionType::Ethernet => Stroke::solid("#4caf50", 2.0),
        ConnectionType::Fiber => Stroke::solid("#2196f3", 2.0),
        ConnectionType::Vpn => Stroke {
            color: "#ff9800",
            width: 2.0,
            dash: &[5.0, 5.0],
        },
        ConnectionType::Wifi => Stroke {
            color: "#9c27b0",
            width: 2.0,
            dash: &[2.0, 2.0],
        },
    }
}
