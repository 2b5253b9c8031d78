// SPDX-License-Identifier: MPL-2.0

//! spu-video - coprocessor offloaded video output
//!
//! Decoded planar YUV frames are scaled, converted to packed pixels and
//! copied to a double-buffered framebuffer by three kernels running on
//! auxiliary coprocessor cores. The host side only composes: it sizes and
//! centers the surface, dispatches requests and flips.
//!
//! # Architecture
//!
//! - [`coprocessor`]: host memory, cores, local stores, DMA, mailboxes and
//!   the job lifecycle
//! - [`kernels`]: framebuffer writer, YUV to BGRA converter, bilinear scaler
//! - [`compositor`]: video modes, surface, overlays and page flipping
//! - [`config`]: user configuration handling
//!
//! # Example
//!
//! ```no_run
//! use spu_video::compositor::{FrameCompositor, MemoryFramebuffer, Rect, YuvFormat};
//! use spu_video::constants::VIDEO_MODES;
//! use spu_video::coprocessor::CoprocessorSystem;
//! use spu_video::Config;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = Config::default();
//! let system = CoprocessorSystem::from_config(&config);
//! let fb = MemoryFramebuffer::new(system.memory(), &VIDEO_MODES[8], 2)?;
//! let mut compositor = FrameCompositor::new(system, fb, config)?;
//! compositor.set_video_mode(640, 360)?;
//! let overlay = compositor.create_yuv_overlay(320, 180, YuvFormat::Yv12)?;
//! overlay.fill(180, 128, 128)?;
//! compositor.display_yuv_overlay(&overlay, overlay.rect(), Rect::sized(640, 360))?;
//! # Ok(())
//! # }
//! ```

pub mod compositor;
pub mod config;
pub mod constants;
pub mod coprocessor;
pub mod errors;
pub mod kernels;

// Re-export commonly used types
pub use compositor::{FrameCompositor, FrameOutcome};
pub use config::{Config, ProtocolErrorPolicy};
pub use constants::MailboxMessage;
pub use coprocessor::{CoprocessorJob, CoprocessorSystem};
