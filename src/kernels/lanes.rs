// SPDX-License-Identifier: GPL-3.0-only

//! Fixed-width lane arithmetic used by the pixel kernels
//!
//! Rows are processed in chunks of `N` pixels held in `[f32; N]` arrays so
//! the compiler can vectorize each step. The chunk width is picked once per
//! request from the row width.

/// Chunk width selected for a row
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VectorWidth {
    /// 32 pixels per chunk
    W32,
    /// 16 pixels per chunk
    W16,
    /// One pixel at a time, for widths that are not a multiple of 16
    Scalar,
}

impl VectorWidth {
    /// Widest chunk that divides `width`
    pub fn for_width(width: usize) -> Self {
        if width % 32 == 0 {
            VectorWidth::W32
        } else if width % 16 == 0 {
            VectorWidth::W16
        } else {
            VectorWidth::Scalar
        }
    }

    pub fn lanes(self) -> usize {
        match self {
            VectorWidth::W32 => 32,
            VectorWidth::W16 => 16,
            VectorWidth::Scalar => 1,
        }
    }
}

/// Saturating float to byte conversion.
///
/// Values below 0 become 0, values above 255 become 255, NaN becomes 0 and
/// everything else is truncated toward zero.
#[inline]
pub fn saturate(value: f32) -> u8 {
    // `as` saturates for float to integer casts
    value as u8
}

#[inline]
pub fn saturate_lanes<const N: usize>(values: &[f32; N]) -> [u8; N] {
    std::array::from_fn(|i| saturate(values[i]))
}

/// `a + w * (b - a)` per lane
#[inline]
pub fn lerp_lanes<const N: usize>(a: &[f32; N], b: &[f32; N], w: &[f32; N]) -> [f32; N] {
    std::array::from_fn(|i| a[i] + w[i] * (b[i] - a[i]))
}

/// `a + w * (b - a)` with one weight for every lane
#[inline]
pub fn lerp_lanes_uniform<const N: usize>(a: &[f32; N], b: &[f32; N], w: f32) -> [f32; N] {
    std::array::from_fn(|i| a[i] + w * (b[i] - a[i]))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn saturate_clamps_and_truncates() {
        assert_eq!(saturate(-12.5), 0);
        assert_eq!(saturate(0.0), 0);
        assert_eq!(saturate(127.9), 127);
        assert_eq!(saturate(255.0), 255);
        assert_eq!(saturate(400.0), 255);
        assert_eq!(saturate(f32::NAN), 0);
        assert_eq!(saturate(f32::INFINITY), 255);
    }

    #[test]
    fn width_selection_prefers_wider_chunks() {
        assert_eq!(VectorWidth::for_width(64), VectorWidth::W32);
        assert_eq!(VectorWidth::for_width(48), VectorWidth::W16);
        assert_eq!(VectorWidth::for_width(20), VectorWidth::Scalar);
        assert_eq!(VectorWidth::W16.lanes(), 16);
    }

    #[test]
    fn lerp_endpoints() {
        let a = [10.0f32; 4];
        let b = [30.0f32; 4];
        assert_eq!(lerp_lanes_uniform(&a, &b, 0.0), a);
        assert_eq!(lerp_lanes_uniform(&a, &b, 0.5), [20.0; 4]);
        assert_eq!(lerp_lanes(&a, &b, &[1.0; 4]), b);
    }
}
