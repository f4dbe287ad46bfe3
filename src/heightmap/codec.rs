//! Fixed-point height sample codec
//!
//! Heights are stored as mixed-radix integers spread over consecutive
//! buffer elements. These functions are on the interpolation and resampling
//! hot paths and perform no bounds checking of their own; sample indices
//! are validated by callers against the tile dimensions.

use crate::heightmap::HeightmapStructure;

/// Reads the raw (unscaled) height integer at `index`.
pub fn decode_height(samples: &[f64], structure: &HeightmapStructure, index: usize) -> f64 {
    let base = index * structure.stride as usize;
    let count = structure.elements_per_height as usize;
    let multiplier = structure.element_multiplier;

    let mut height = 0.0;
    if structure.is_big_endian {
        for i in 0..count {
            height = height * multiplier + samples[base + i];
        }
    } else {
        for i in (0..count).rev() {
            height = height * multiplier + samples[base + i];
        }
    }
    height
}

/// Writes a pre-clamped raw height integer at `index`.
///
/// Digits are emitted most-significant first; the final digit absorbs the
/// remainder so `decode_height` reconstructs `height` exactly.
pub fn encode_height(samples: &mut [f64], structure: &HeightmapStructure, index: usize, height: f64) {
    let base = index * structure.stride as usize;
    let count = structure.elements_per_height as usize;
    let multiplier = structure.element_multiplier;

    let mut divisor = multiplier.powi(count as i32 - 1);
    let mut remaining = height;
    if structure.is_big_endian {
        for i in 0..count - 1 {
            let digit = (remaining / divisor).trunc();
            samples[base + i] = digit;
            remaining -= digit * divisor;
            divisor /= multiplier;
        }
        samples[base + count - 1] = remaining;
    } else {
        for i in (1..count).rev() {
            let digit = (remaining / divisor).trunc();
            samples[base + i] = digit;
            remaining -= digit * divisor;
            divisor /= multiplier;
        }
        samples[base] = remaining;
    }
}
