use serde::{Deserialize, Serialize};

use crate::constants::heightmap::DEFAULT_ELEMENT_MULTIPLIER;
use crate::error::{TerrainError, TerrainResult};

/// Wire element type of a decoded sample buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ElementKind {
    Uint8,
    Uint16,
    Int16,
    Float32,
}

impl ElementKind {
    pub fn bytes_per_element(self) -> usize {
        match self {
            ElementKind::Uint8 => 1,
            ElementKind::Uint16 | ElementKind::Int16 => 2,
            ElementKind::Float32 => 4,
        }
    }
}

/// Fixed-point layout of height samples within a tile buffer.
///
/// A height occupies `elements_per_height` consecutive elements starting at
/// `sample_index * stride`, combined as a mixed-radix integer with base
/// `element_multiplier`. The decoded integer maps to meters through
/// `height_scale` and `height_offset`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HeightmapStructure {
    /// Scale from the decoded integer domain to meters.
    pub height_scale: f64,
    /// Offset applied after scaling.
    pub height_offset: f64,
    /// Elements combined into one height value.
    pub elements_per_height: u32,
    /// Elements between the start of consecutive heights. Must be at least
    /// `elements_per_height`.
    pub stride: u32,
    /// Mixed-radix base combining elements into a height.
    pub element_multiplier: f64,
    /// Most-significant element first when set.
    pub is_big_endian: bool,
    /// Lower clamp bound applied when encoding resampled heights.
    pub lowest_encoded_height: Option<f64>,
    /// Upper clamp bound applied when encoding resampled heights.
    pub highest_encoded_height: Option<f64>,
}

impl Default for HeightmapStructure {
    fn default() -> Self {
        Self {
            height_scale: 1.0,
            height_offset: 0.0,
            elements_per_height: 1,
            stride: 1,
            element_multiplier: DEFAULT_ELEMENT_MULTIPLIER,
            is_big_endian: false,
            lowest_encoded_height: None,
            highest_encoded_height: None,
        }
    }
}

impl HeightmapStructure {
    pub fn validate(&self) -> TerrainResult<()> {
        if self.elements_per_height == 0 {
            return Err(TerrainError::InvalidConfig {
                reason: "elements_per_height must be at least 1".into(),
            });
        }
        if self.stride < self.elements_per_height {
            return Err(TerrainError::InvalidConfig {
                reason: format!(
                    "stride {} is smaller than elements_per_height {}",
                    self.stride, self.elements_per_height
                ),
            });
        }
        if self.element_multiplier < 2.0 {
            return Err(TerrainError::InvalidConfig {
                reason: "element_multiplier must be at least 2".into(),
            });
        }
        Ok(())
    }

    /// Clamps a resampled height to the configured encode range. An
    /// unconfigured bound leaves that side unclamped.
    pub fn clamp_encoded(&self, height: f64) -> f64 {
        let mut clamped = height;
        if let Some(lowest) = self.lowest_encoded_height {
            clamped = clamped.max(lowest);
        }
        if let Some(highest) = self.highest_encoded_height {
            clamped = clamped.min(highest);
        }
        clamped
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let structure = HeightmapStructure::default();
        assert_eq!(structure.height_scale, 1.0);
        assert_eq!(structure.elements_per_height, 1);
        assert_eq!(structure.stride, 1);
        assert!(!structure.is_big_endian);
        assert!(structure.validate().is_ok());
    }

    #[test]
    fn test_stride_invariant() {
        let structure = HeightmapStructure {
            elements_per_height: 3,
            stride: 2,
            ..Default::default()
        };
        assert!(structure.validate().is_err());
    }

    #[test]
    fn test_clamp_bounds_are_one_sided() {
        let structure = HeightmapStructure {
            lowest_encoded_height: Some(0.0),
            ..Default::default()
        };
        assert_eq!(structure.clamp_encoded(-5.0), 0.0);
        assert_eq!(structure.clamp_encoded(1.0e9), 1.0e9);
    }
}
