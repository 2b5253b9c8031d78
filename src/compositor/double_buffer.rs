// SPDX-License-Identifier: GPL-3.0-only

//! Double-buffered framebuffer view
//!
//! Two write targets in the same mapped memory, each offset so that an image
//! smaller than the screen lands centered. After a committed write the
//! written target waits for its flip; writing through it again before the
//! flip is acknowledged is refused.

use super::framebuffer::ScreenInfo;
use crate::coprocessor::EffectiveAddress;
use crate::errors::ComposeError;

/// Bounded input size and its centering offsets on the screen
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Centering {
    pub bounded_width: u32,
    pub bounded_height: u32,
    pub width_offset: u32,
    pub height_offset: u32,
}

impl Centering {
    /// Clamp `width` x `height` to the writeable area and center it
    pub fn new(info: &ScreenInfo, width: u32, height: u32) -> Self {
        let bounded_width = width.min(info.xres);
        let bounded_height = height.min(info.yres);
        Self {
            bounded_width,
            bounded_height,
            width_offset: (info.xres - bounded_width) / 2,
            height_offset: (info.yres - bounded_height) / 2,
        }
    }
}

#[derive(Debug, Clone)]
pub struct DoubleBufferedView {
    centers: [EffectiveAddress; 2],
    index: usize,
    double_buffering: bool,
    flip_pending: Option<usize>,
}

impl DoubleBufferedView {
    pub fn new(
        base: EffectiveAddress,
        info: &ScreenInfo,
        centering: &Centering,
        double_buffering: bool,
    ) -> Self {
        let mut view = Self {
            centers: [base; 2],
            index: 0,
            double_buffering,
            flip_pending: None,
        };
        view.recenter(base, info, centering);
        view
    }

    /// Recompute both targets for `centering`
    pub fn recenter(&mut self, base: EffectiveAddress, info: &ScreenInfo, centering: &Centering) {
        let first = base.offset(
            centering.width_offset as usize * info.pixel_size() as usize
                + centering.height_offset as usize * info.line_length as usize,
        );
        self.centers = [first, first.offset(info.yres as usize * info.line_length as usize)];
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn is_double_buffered(&self) -> bool {
        self.double_buffering
    }

    pub fn center(&self, index: usize) -> EffectiveAddress {
        self.centers[index & 1]
    }

    /// Target for the next write
    pub fn write_target(&self) -> Result<EffectiveAddress, ComposeError> {
        if self.flip_pending == Some(self.index) {
            return Err(ComposeError::FlipPending(self.index));
        }
        Ok(self.centers[self.index])
    }

    /// Mark the current target written; returns the frame index to show
    pub fn commit(&mut self) -> usize {
        let written = self.index;
        self.flip_pending = Some(written);
        if self.double_buffering {
            self.index ^= 1;
        }
        written
    }

    /// The device showed the committed frame
    pub fn acknowledge_flip(&mut self) {
        self.flip_pending = None;
    }
}
