//! Abstract 2D drawing surface and a recording implementation.

use serde::Serialize;

use crate::error::Result;
use crate::graph::{Point, Rect, SurfaceSize};

/// Line style: color plus dash pattern (empty = solid).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Stroke {
    pub color: &'static str,
    pub width: f64,
    pub dash: &'static [f64],
}

impl Stroke {
    pub const fn solid(color: &'static str, width: f64) -> Self {
        Self {
            color,
            width,
            dash: &[],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TextAlign {
    Left,
    Center,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TextStyle {
    pub color: &'static str,
    pub size: f64,
    pub align: TextAlign,
}

/// Drawing operations the renderer needs. Coordinates are logical pixels.
///
/// Implementations wrap a real canvas or, for tests and headless sessions,
/// record the calls ([`DisplayList`]).
pub trait Surface {
    fn size(&self) -> SurfaceSize;
    fn clear(&mut self) -> Result<()>;
    /// Back to the identity transform.
    fn reset_transform(&mut self) -> Result<()>;
    fn stroke_line(&mut self, from: Point, to: Point, stroke: &Stroke) -> Result<()>;
    fn fill_rect(&mut self, rect: Rect, fill: &'static str, outline: &Stroke) -> Result<()>;
    fn fill_circle(&mut self, center: Point, radius: f64, fill: &'static str) -> Result<()>;
    fn fill_text(&mut self, text: &str, at: Point, style: &TextStyle) -> Result<()>;
}

/// One recorded drawing call.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum DrawCommand {
    Clear,
    ResetTransform,
    Line {
        from: Point,
        to: Point,
        stroke: Stroke,
    },
    Rect {
        rect: Rect,
        fill: &'static str,
        outline: Stroke,
    },
    Circle {
        center: Point,
        radius: f64,
        fill: &'static str,
    },
    Text {
        text: String,
        at: Point,
        style: TextStyle,
    },
}

/// Recording surface. Two frames of the same state compare equal.
#[derive(Debug, Clone, PartialEq)]
pub struct DisplayList {
    size: SurfaceSize,
    commands: Vec<DrawCommand>,
}

impl DisplayList {
    pub fn new(size: SurfaceSize) -> Self {
        Self {
            size,
            commands: Vec::new(),
        }
    }

    /// Commands since the last `clear`.
    pub fn commands(&self) -> &[DrawCommand] {
        &self.commands
    }

    pub fn texts(&self) -> impl Iterator<Item = &str> {
        self.commands.iter().filter_map(|c| match c {
            DrawCommand::Text { text, .. } => Some(text.as_str()),
            _ => None,
        })
    }
}

impl Surface for DisplayList {
    fn size(&self) -> SurfaceSize {
        self.size
    }

    fn clear(&mut self) -> Result<()> {
        self.commands.clear();
        self.commands.push(DrawCommand::Clear);
        Ok(())
    }

    fn reset_transform(&mut self) -> Result<()> {
        self.commands.push(DrawCommand::ResetTransform);
        Ok(())
    }

    fn stroke_line(&mut self, from: Point, to: Point, stroke: &Stroke) -> Result<()> {
        self.commands.push(DrawCommand::Line {
            from,
            to,
            stroke: stroke.clone(),
        });
        Ok(())
    }

    fn fill_rect(&mut self, rect: Rect, fill: &'static str, outline: &Stroke) -> Result<()> {
        self.commands.push(DrawCommand::Rect {
            rect,
            fill,
            outline: outline.clone(),
        });
        Ok(())
    }

    fn fill_circle(&mut self, center: Point, radius: f64, fill: &'static str) -> Result<()> {
        self.commands.push(DrawCommand::Circle {
            center,
            radius,
            fill,
        });
        Ok(())
    }

    fn fill_text(&mut self, text: &str, at: Point, style: &TextStyle) -> Result<()> {
        self.commands.push(DrawCommand::Text {
            text: text.to_string(),
            at,
            style: style.clone(),
        });
        Ok(())
    }
}
