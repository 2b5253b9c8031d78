// SPDX-License-Identifier: GPL-3.0-only

//! Framebuffer device boundary
//!
//! The compositor only needs a contiguous, DMA-visible region with a known
//! line length, plus vsync and frame selection. [`MemoryFramebuffer`] keeps
//! that region in host memory and records what was shown, which is all the
//! CLI and tests need.

use crate::constants::VideoMode;
use crate::coprocessor::{EffectiveAddress, HostBuffer, HostMemory};
use crate::errors::DeviceError;
use serde::Serialize;
use tracing::{debug, trace};

/// Geometry reported by the device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ScreenInfo {
    /// Visible (and writeable) width in pixels
    pub xres: u32,
    /// Visible (and writeable) height in pixels
    pub yres: u32,
    pub bits_per_pixel: u32,
    /// Bytes between two rows
    pub line_length: u32,
    /// Frames the mapped memory can hold
    pub num_frames: u32,
}

impl ScreenInfo {
    pub fn pixel_size(&self) -> u32 {
        self.bits_per_pixel / 8
    }

    pub fn frame_size(&self) -> usize {
        self.line_length as usize * self.yres as usize
    }

    pub fn memory_size(&self) -> usize {
        self.frame_size() * self.num_frames.max(1) as usize
    }
}

pub trait FramebufferDevice {
    fn screen_info(&self) -> ScreenInfo;

    /// Start of the mapped framebuffer memory
    fn base_address(&self) -> EffectiveAddress;

    /// Clear the whole mapped memory
    fn blank(&mut self) -> Result<(), DeviceError>;

    fn wait_for_vsync(&mut self) -> Result<(), DeviceError>;

    /// Show frame `index` from the next vsync on
    fn select_frame(&mut self, index: usize) -> Result<(), DeviceError>;
}

/// Framebuffer living in host memory
pub struct MemoryFramebuffer {
    info: ScreenInfo,
    memory: HostBuffer,
    shown: usize,
    flips: u64,
    vsyncs: u64,
}

impl MemoryFramebuffer {
    /// 32 bpp framebuffer for `mode` holding `num_frames` frames
    pub fn new(memory: &HostMemory, mode: &VideoMode, num_frames: u32) -> Result<Self, DeviceError> {
        Self::with_info(
            memory,
            ScreenInfo {
                xres: mode.width,
                yres: mode.height,
                bits_per_pixel: 32,
                line_length: mode.width * 4,
                num_frames,
            },
        )
    }

    pub fn with_info(memory: &HostMemory, info: ScreenInfo) -> Result<Self, DeviceError> {
        if !matches!(info.bits_per_pixel, 16 | 24 | 32) {
            return Err(DeviceError::UnsupportedDepth(info.bits_per_pixel));
        }
        let memory = memory.alloc(info.memory_size())?;
        debug!(
            width = info.xres,
            height = info.yres,
            frames = info.num_frames,
            bytes = memory.len(),
            "Mapped framebuffer"
        );
        Ok(Self {
            info,
            memory,
            shown: 0,
            flips: 0,
            vsyncs: 0,
        })
    }

    /// Raw bytes of frame `index`
    pub fn frame(&self, index: usize) -> Result<Vec<u8>, DeviceError> {
        let frames = self.info.num_frames.max(1) as usize;
        if index >= frames {
            return Err(DeviceError::NoSuchFrame { index, frames });
        }
        let mut bytes = vec![0u8; self.info.frame_size()];
        self.memory.read_at(index * self.info.frame_size(), &mut bytes)?;
        Ok(bytes)
    }

    /// Raw bytes of the frame currently selected for display
    pub fn visible_frame(&self) -> Result<Vec<u8>, DeviceError> {
        self.frame(self.shown)
    }

    pub fn shown_frame(&self) -> usize {
        self.shown
    }

    pub fn flips(&self) -> u64 {
        self.flips
    }

    pub fn vsyncs(&self) -> u64 {
        self.vsyncs
    }
}

impl FramebufferDevice for MemoryFramebuffer {
    fn screen_info(&self) -> ScreenInfo {
        self.info
    }

    fn base_address(&self) -> EffectiveAddress {
        self.memory.addr()
    }

    fn blank(&mut self) -> Result<(), DeviceError> {
        self.memory.fill(0)?;
        Ok(())
    }

    fn wait_for_vsync(&mut self) -> Result<(), DeviceError> {
        self.vsyncs += 1;
        Ok(())
    }

    fn select_frame(&mut self, index: usize) -> Result<(), DeviceError> {
        let frames = self.info.num_frames.max(1) as usize;
        if index >= frames {
            return Err(DeviceError::NoSuchFrame { index, frames });
        }
        trace!(frame = index, "Page flip");
        self.shown = index;
        self.flips += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::VIDEO_MODES;

    #[test]
    fn frames_are_addressable_and_bounded() {
        let memory = HostMemory::new();
        let mut fb = MemoryFramebuffer::new(&memory, &VIDEO_MODES[8], 2).unwrap();
        assert_eq!(fb.screen_info().frame_size(), 720 * 4 * 480);
        assert!(fb.select_frame(1).is_ok());
        assert_eq!(fb.shown_frame(), 1);
        assert_eq!(
            fb.select_frame(2),
            Err(DeviceError::NoSuchFrame { index: 2, frames: 2 })
        );
    }

    #[test]
    fn unsupported_depth_is_rejected() {
        let memory = HostMemory::new();
        let info = ScreenInfo {
            xres: 16,
            yres: 16,
            bits_per_pixel: 8,
            line_length: 16,
            num_frames: 1,
        };
        assert!(matches!(
            MemoryFramebuffer::with_info(&memory, info),
            Err(DeviceError::UnsupportedDepth(8))
        ));
    }
}
