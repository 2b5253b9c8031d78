// SPDX-License-Identifier: GPL-3.0-only

//! CLI commands for the offload pipeline
//!
//! This module provides command-line functionality for:
//! - Listing the display modes of the framebuffer backend
//! - Playing a synthetic clip and saving the visible frame

use spu_video::compositor::{
    FrameCompositor, FramebufferDevice, MemoryFramebuffer, Rect, YuvFormat, YuvOverlay,
};
use spu_video::config::Config;
use spu_video::constants::VIDEO_MODES;
use spu_video::coprocessor::CoprocessorSystem;
use spu_video::FrameOutcome;
use std::path::{Path, PathBuf};
use std::time::Instant;

/// Arguments of the `play` command
pub struct PlayOptions {
    pub mode: usize,
    pub clip: (u32, u32),
    pub scale_to: Option<(u32, u32)>,
    pub frames: u32,
    pub output: Option<PathBuf>,
    pub config: Option<PathBuf>,
}

/// Parse a `WIDTHxHEIGHT` size argument
pub fn parse_size(value: &str) -> Result<(u32, u32), String> {
    let (w, h) = value
        .split_once(['x', 'X'])
        .ok_or_else(|| format!("expected WIDTHxHEIGHT, got '{}'", value))?;
    let w = w.trim().parse::<u32>().map_err(|e| format!("bad width: {}", e))?;
    let h = h.trim().parse::<u32>().map_err(|e| format!("bad height: {}", e))?;
    Ok((w, h))
}

/// List all display modes
pub fn list_modes() -> Result<(), Box<dyn std::error::Error>> {
    println!("Available display modes:");
    println!();
    for (index, mode) in VIDEO_MODES.iter().enumerate() {
        println!(
            "  [{}] {:>4}x{:<4}  {}",
            index, mode.width, mode.height, mode.label
        );
    }
    Ok(())
}

/// Play a synthetic clip through scaler, converter and writer
pub fn play(options: PlayOptions) -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::load_or_default(options.config.as_deref())?;
    let mode = VIDEO_MODES.get(options.mode).ok_or_else(|| {
        format!(
            "Display mode {} not found. Use 'spu-video modes' to see available modes.",
            options.mode
        )
    })?;

    let (clip_w, clip_h) = options.clip;
    let (dst_w, dst_h) = options.scale_to.unwrap_or(options.clip);

    println!(
        "Playing {}x{} clip at {}x{} on {} ({}x{})",
        clip_w, clip_h, dst_w, dst_h, mode.label, mode.width, mode.height
    );

    let system = CoprocessorSystem::from_config(&config);
    let framebuffer = MemoryFramebuffer::new(system.memory(), mode, 2)?;
    let mut compositor = FrameCompositor::new(system, framebuffer, config)?;
    compositor.set_video_mode(dst_w, dst_h)?;
    let mut overlay = compositor.create_yuv_overlay(clip_w, clip_h, YuvFormat::Yv12)?;

    let started = Instant::now();
    for frame in 0..options.frames {
        overlay.lock();
        paint_test_pattern(&overlay, frame)?;
        overlay.unlock();

        let outcome =
            compositor.display_yuv_overlay(&overlay, overlay.rect(), Rect::sized(dst_w, dst_h))?;
        if let FrameOutcome::Dropped { reason } = outcome {
            println!("  frame {} dropped: {}", frame, reason);
        }
    }
    let elapsed = started.elapsed();

    println!(
        "Presented {} frame(s), dropped {} in {:.2?}",
        compositor.frames_presented(),
        compositor.frames_dropped(),
        elapsed
    );

    if let Some(path) = options.output.as_deref() {
        save_visible_frame(compositor.device(), path)?;
        println!("Saved visible frame to: {}", path.display());
    }

    compositor.free_yuv_overlay(overlay)?;
    compositor.quit()?;
    Ok(())
}

/// Diagonal luma ramp moving one step per frame over slowly shifting chroma
fn paint_test_pattern(overlay: &YuvOverlay, frame: u32) -> Result<(), Box<dyn std::error::Error>> {
    let width = overlay.width() as usize;
    let height = overlay.height() as usize;
    let shift = frame as usize * 4;

    let mut y = vec![0u8; overlay.plane_len(0)];
    for (row, line) in y.chunks_exact_mut(width).enumerate() {
        for (col, px) in line.iter_mut().enumerate() {
            *px = 16 + ((col + row + shift) % 220) as u8;
        }
    }

    let chroma_w = width / 2;
    let chroma_h = height / 2;
    let mut u = vec![0u8; overlay.plane_len(1)];
    let mut v = vec![0u8; overlay.plane_len(2)];
    for row in 0..chroma_h {
        for col in 0..chroma_w {
            let i = row * chroma_w + col;
            u[i] = 16 + ((col * 224 / chroma_w.max(1) + shift) % 224) as u8;
            v[i] = 16 + ((row * 224 / chroma_h.max(1)) % 224) as u8;
        }
    }

    overlay.write_yuv(&y, &u, &v)?;
    Ok(())
}

/// Write the displayed framebuffer frame as PNG (BGRA in memory)
fn save_visible_frame(
    framebuffer: &MemoryFramebuffer,
    path: &Path,
) -> Result<(), Box<dyn std::error::Error>> {
    let info = framebuffer.screen_info();
    let mut pixels = framebuffer.visible_frame()?;
    for px in pixels.chunks_exact_mut(4) {
        px.swap(0, 2);
    }

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let image = image::RgbaImage::from_raw(info.xres, info.yres, pixels)
        .ok_or("Framebuffer size does not match its geometry")?;
    image.save(path)?;
    Ok(())
}
