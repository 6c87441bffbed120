//! Mapping between displayed (client) coordinates and logical surface
//! coordinates.
//!
//! A canvas may be displayed at a different size than its pixel buffer, and
//! offset inside its container. Pointer events arrive in client space; hit
//! tests and drawing happen in logical space.

use crate::error::{Result, TopologyError};
use crate::graph::{Point, SurfaceSize};

/// Axis-aligned affine map `logical = (client - origin) * scale`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ViewTransform {
    origin: Point,
    scale_x: f64,
    scale_y: f64,
}

impl Default for ViewTransform {
    fn default() -> Self {
        Self::identity()
    }
}

impl ViewTransform {
    #[must_use]
    pub const fn identity() -> Self {
        Self {
            origin: Point::new(0.0, 0.0),
            scale_x: 1.0,
            scale_y: 1.0,
        }
    }

    /// Transform for a surface of `logical` size displayed at `displayed`
    /// size with its top-left corner at `origin` in client space.
    pub fn fit(displayed: SurfaceSize, logical: SurfaceSize, origin: Point) -> Result<Self> {
        if !displayed.is_usable() || !logical.is_usable() || !origin.is_finite() {
            return Err(TopologyError::invalid(
                "view transform needs finite, non-empty sizes",
            ));
        }
        Ok(Self {
            origin,
            scale_x: logical.width / displayed.width,
            scale_y: logical.height / displayed.height,
        })
    }

    pub fn to_logical(&self, client: Point) -> Point {
        Point::new(
            (client.x - self.origin.x) * self.scale_x,
            (client.y - self.origin.y) * self.scale_y,
        )
    }

    pub fn to_client(&self, logical: Point) -> Point {
        Point::new(
            logical.x / self.scale_x + self.origin.x,
            logical.y / self.scale_y + self.origin.y,
        )
    }
}
