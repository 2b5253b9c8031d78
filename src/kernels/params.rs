// SPDX-License-Identifier: GPL-3.0-only

//! Parameter blocks exchanged with the kernels
//!
//! Every block is `#[repr(C)]` plain data padded to a multiple of
//! [`PARAM_BLOCK_ALIGN`] bytes and lives in its own host allocation, which
//! is aligned to the same boundary.

use crate::constants::PARAM_BLOCK_ALIGN;
use bytemuck::{Pod, Zeroable};

/// Framebuffer writer request
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct WriterParams {
    /// Source pixels
    pub data: u64,
    /// First destination byte; aligned down to 16 by the kernel
    pub center: u64,
    pub out_line_stride: u32,
    pub in_line_stride: u32,
    pub bounded_input_height: u32,
    pub bounded_input_width: u32,
    pub fb_pixel_size: u32,
    _pad: [u32; 23],
}

/// YUV to BGRA conversion request
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct ConvertParams {
    pub y_plane: u64,
    pub v_plane: u64,
    pub u_plane: u64,
    pub dst: u64,
    pub src_width: u32,
    pub src_height: u32,
    _pad: [u32; 22],
}

/// Bilinear scaling request
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct ScaleParams {
    pub y_plane: u64,
    pub v_plane: u64,
    pub u_plane: u64,
    /// Destination buffer holding Y, then V, then U
    pub dst: u64,
    pub src_width: u32,
    pub src_height: u32,
    pub dst_width: u32,
    pub dst_height: u32,
    _pad: [u32; 20],
}

const _: () = assert!(std::mem::size_of::<WriterParams>() % PARAM_BLOCK_ALIGN == 0);
const _: () = assert!(std::mem::size_of::<ConvertParams>() % PARAM_BLOCK_ALIGN == 0);
const _: () = assert!(std::mem::size_of::<ScaleParams>() % PARAM_BLOCK_ALIGN == 0);

impl WriterParams {
    pub fn new(
        data: u64,
        center: u64,
        out_line_stride: u32,
        in_line_stride: u32,
        bounded_input_width: u32,
        bounded_input_height: u32,
        fb_pixel_size: u32,
    ) -> Self {
        Self {
            data,
            center,
            out_line_stride,
            in_line_stride,
            bounded_input_height,
            bounded_input_width,
            fb_pixel_size,
            ..Self::zeroed()
        }
    }
}

impl ConvertParams {
    pub fn new(y_plane: u64, v_plane: u64, u_plane: u64, dst: u64, width: u32, height: u32) -> Self {
        Self {
            y_plane,
            v_plane,
            u_plane,
            dst,
            src_width: width,
            src_height: height,
            ..Self::zeroed()
        }
    }
}

impl ScaleParams {
    pub fn new(
        y_plane: u64,
        v_plane: u64,
        u_plane: u64,
        dst: u64,
        src: (u32, u32),
        dst_size: (u32, u32),
    ) -> Self {
        Self {
            y_plane,
            v_plane,
            u_plane,
            dst,
            src_width: src.0,
            src_height: src.1,
            dst_width: dst_size.0,
            dst_height: dst_size.1,
            ..Self::zeroed()
        }
    }
}
