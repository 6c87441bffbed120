//! Visual layers and per-entity layer visibility.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::TopologyError;

/// Rendering mode of the editor. Not a data partition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Layer {
    #[default]
    Physical,
    Logical,
    Application,
    /// Risk overlay; every entity is visible on it.
    Cip,
}

impl Layer {
    pub const ALL: [Layer; 4] = [
        Layer::Physical,
        Layer::Logical,
        Layer::Application,
        Layer::Cip,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Layer::Physical => "physical",
            Layer::Logical => "logical",
            Layer::Application => "application",
            Layer::Cip => "cip",
        }
    }
}

impl fmt::Display for Layer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Layer {
    type Err = TopologyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Layer::ALL
            .into_iter()
            .find(|layer| layer.as_str() == s)
            .ok_or_else(|| TopologyError::InvalidLayer(s.to_string()))
    }
}

/// Which data layers an entity shows up on.
///
/// All three keys are required when decoding, so a record missing one is
/// rejected instead of silently hiding the entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LayerVisibility {
    pub physical: bool,
    pub logical: bool,
    pub application: bool,
}

impl LayerVisibility {
    pub const ALL_VISIBLE: LayerVisibility = LayerVisibility {
        physical: true,
        logical: true,
        application: true,
    };

    pub fn is_visible(&self, layer: Layer) -> bool {
        match layer {
            Layer::Physical => self.physical,
            Layer::Logical => self.logical,
            Layer::Application => self.application,
            Layer::Cip => true,
        }
    }
}
