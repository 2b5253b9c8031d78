// SPDX-License-Identifier: GPL-3.0-only

//! Coprocessor-resident kernels
//!
//! Three independent programs with no shared state: the framebuffer writer,
//! the YUV to BGRA converter and the bilinear scaler. All of them follow the
//! execution model in [`runtime`] and reach host memory only through their
//! context's DMA engine.

pub mod bilinear_scaler;
pub mod fb_writer;
pub mod lanes;
pub mod params;
pub mod runtime;
pub mod yuv2rgb;

pub use bilinear_scaler::BilinearScaler;
pub use fb_writer::FbWriter;
pub use params::{ConvertParams, ScaleParams, WriterParams};
pub use yuv2rgb::Yuv2Rgb;
