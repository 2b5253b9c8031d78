// SPDX-License-Identifier: GPL-3.0-only

//! Planar YUV overlays
//!
//! An overlay owns one host allocation holding the luma plane followed by
//! two quarter-size chroma planes. YV12 stores V before U, IYUV (I420) U
//! before V.

use crate::coprocessor::{EffectiveAddress, HostBuffer, HostMemory};
use crate::errors::ComposeError;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum YuvFormat {
    /// Y, V, U
    Yv12,
    /// Y, U, V
    Iyuv,
}

impl YuvFormat {
    pub fn fourcc(&self) -> &'static str {
        match self {
            YuvFormat::Yv12 => "YV12",
            YuvFormat::Iyuv => "IYUV",
        }
    }

    /// Plane indices of (V, U)
    fn chroma_planes(&self) -> (usize, usize) {
        match self {
            YuvFormat::Yv12 => (1, 2),
            YuvFormat::Iyuv => (2, 1),
        }
    }
}

impl fmt::Display for YuvFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.fourcc())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Rect {
    pub x: i32,
    pub y: i32,
    pub w: u32,
    pub h: u32,
}

impl Rect {
    pub fn new(x: i32, y: i32, w: u32, h: u32) -> Self {
        Self { x, y, w, h }
    }

    /// Rectangle at the origin
    pub fn sized(w: u32, h: u32) -> Self {
        Self::new(0, 0, w, h)
    }

    pub fn same_size(&self, other: &Rect) -> bool {
        self.w == other.w && self.h == other.h
    }
}

pub struct YuvOverlay {
    format: YuvFormat,
    width: u32,
    height: u32,
    pitches: [u32; 3],
    offsets: [usize; 3],
    pixels: HostBuffer,
    locked: bool,
}

impl YuvOverlay {
    pub(crate) fn new(
        memory: &HostMemory,
        width: u32,
        height: u32,
        format: YuvFormat,
    ) -> Result<Self, ComposeError> {
        if width < 2 || height < 2 {
            return Err(ComposeError::InvalidGeometry(format!(
                "{} overlay of {}x{} is too small",
                format, width, height
            )));
        }
        let (w, h) = (width as usize, height as usize);
        let pitches = [width, width / 2, width / 2];
        let chroma_size = (w / 2) * (h / 2);
        let offsets = [0, w * h, w * h + chroma_size];
        let pixels = memory.alloc(w * h + 2 * chroma_size)?;

        Ok(Self {
            format,
            width,
            height,
            pitches,
            offsets,
            pixels,
            locked: false,
        })
    }

    pub fn format(&self) -> YuvFormat {
        self.format
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn pitches(&self) -> [u32; 3] {
        self.pitches
    }

    pub fn offsets(&self) -> [usize; 3] {
        self.offsets
    }

    pub fn rect(&self) -> Rect {
        Rect::sized(self.width, self.height)
    }

    pub fn plane_len(&self, plane: usize) -> usize {
        let rows = if plane == 0 {
            self.height as usize
        } else {
            self.height as usize / 2
        };
        self.pitches[plane.min(2)] as usize * rows
    }

    pub fn plane_addr(&self, plane: usize) -> EffectiveAddress {
        self.pixels.addr().offset(self.offsets[plane.min(2)])
    }

    /// Addresses of the Y, V and U planes
    pub fn yvu_planes(&self) -> (EffectiveAddress, EffectiveAddress, EffectiveAddress) {
        let (v, u) = self.format.chroma_planes();
        (self.plane_addr(0), self.plane_addr(v), self.plane_addr(u))
    }

    pub fn lock(&mut self) {
        self.locked = true;
    }

    pub fn unlock(&mut self) {
        self.locked = false;
    }

    pub fn is_locked(&self) -> bool {
        self.locked
    }

    /// Overwrite plane `plane` (in memory order)
    pub fn write_plane(&self, plane: usize, data: &[u8]) -> Result<(), ComposeError> {
        if plane > 2 || data.len() != self.plane_len(plane) {
            return Err(ComposeError::InvalidGeometry(format!(
                "plane {} of a {}x{} overlay takes {} bytes, got {}",
                plane,
                self.width,
                self.height,
                self.plane_len(plane.min(2)),
                data.len()
            )));
        }
        self.pixels.write_at(self.offsets[plane], data)?;
        Ok(())
    }

    /// Write Y, U and V planes, placing the chroma planes per format
    pub fn write_yuv(&self, y: &[u8], u: &[u8], v: &[u8]) -> Result<(), ComposeError> {
        let (v_plane, u_plane) = self.format.chroma_planes();
        self.write_plane(0, y)?;
        self.write_plane(u_plane, u)?;
        self.write_plane(v_plane, v)
    }

    /// Flat color
    pub fn fill(&self, y: u8, u: u8, v: u8) -> Result<(), ComposeError> {
        let luma = vec![y; self.plane_len(0)];
        let cb = vec![u; self.plane_len(1)];
        let cr = vec![v; self.plane_len(2)];
        self.write_yuv(&luma, &cb, &cr)
    }
}

impl fmt::Debug for YuvOverlay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("YuvOverlay")
            .field("format", &self.format)
            .field("width", &self.width)
            .field("height", &self.height)
            .field("pixels", &self.pixels)
            .field("locked", &self.locked)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plane_layout_follows_format() {
        let memory = HostMemory::new();
        let yv12 = YuvOverlay::new(&memory, 32, 16, YuvFormat::Yv12).unwrap();
        assert_eq!(yv12.pitches(), [32, 16, 16]);
        assert_eq!(yv12.offsets(), [0, 512, 640]);
        let (y, v, u) = yv12.yvu_planes();
        assert_eq!(v.as_u64() - y.as_u64(), 512);
        assert_eq!(u.as_u64() - y.as_u64(), 640);

        let iyuv = YuvOverlay::new(&memory, 32, 16, YuvFormat::Iyuv).unwrap();
        let (y, v, u) = iyuv.yvu_planes();
        assert_eq!(u.as_u64() - y.as_u64(), 512);
        assert_eq!(v.as_u64() - y.as_u64(), 640);
    }

    #[test]
    fn write_yuv_places_chroma_by_format() {
        let memory = HostMemory::new();
        let overlay = YuvOverlay::new(&memory, 4, 2, YuvFormat::Iyuv).unwrap();
        overlay.write_yuv(&[1; 8], &[2; 2], &[3; 2]).unwrap();
        let mut plane = [0u8; 2];
        memory.read(overlay.plane_addr(1), &mut plane).unwrap();
        assert_eq!(plane, [2, 2]);
        assert!(overlay.write_plane(0, &[0; 3]).is_err());
    }

    #[test]
    fn lock_state_toggles() {
        let memory = HostMemory::new();
        let mut overlay = YuvOverlay::new(&memory, 4, 2, YuvFormat::Yv12).unwrap();
        assert!(!overlay.is_locked());
        overlay.lock();
        assert!(overlay.is_locked());
        overlay.unlock();
        assert!(!overlay.is_locked());
    }
}
