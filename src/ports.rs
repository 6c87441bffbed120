//! Ports to the widgets living next to the canvas.
//!
//! The editor only pushes data out; neither widget ever calls back.

/// Map widget.
pub trait MarkerPort: Send {
    fn add_marker(&mut self, lat: f64, lng: f64, label: &str);
}

/// Time-series chart widget.
pub trait ChartPort: Send {
    fn append_point(&mut self, series: &str, value: f64);
}

/// Discards everything. Used when no widget is attached.
#[derive(Debug, Default, Clone, Copy)]
pub struct Detached;

impl MarkerPort for Detached {
    fn add_marker(&mut self, _lat: f64, _lng: f64, _label: &str) {}
}

impl ChartPort for Detached {
    fn append_point(&mut self, _series: &str, _value: f64) {}
}
