// SPDX-License-Identifier: MPL-2.0

//! Integration tests for the full scale, convert and write pipeline

use spu_video::compositor::{
    FrameCompositor, FramebufferDevice, MemoryFramebuffer, Rect, ScreenInfo, YuvFormat,
};
use spu_video::coprocessor::{CoprocessorJob, CoprocessorSystem, EffectiveAddress, ProgramImage};
use spu_video::errors::{ComposeError, DeviceError, JobError};
use spu_video::kernels::ScaleParams;
use spu_video::{Config, FrameOutcome, ProtocolErrorPolicy};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

fn screen(xres: u32, yres: u32) -> ScreenInfo {
    ScreenInfo {
        xres,
        yres,
        bits_per_pixel: 32,
        line_length: xres * 4,
        num_frames: 2,
    }
}

fn compositor(info: ScreenInfo, config: Config) -> FrameCompositor<MemoryFramebuffer> {
    let system = CoprocessorSystem::from_config(&config);
    let fb = MemoryFramebuffer::with_info(system.memory(), info).unwrap();
    FrameCompositor::new(system, fb, config).unwrap()
}

/// Framebuffer whose next page flip can be made to fail
struct FlakyFramebuffer {
    inner: MemoryFramebuffer,
    fail_flip: Arc<AtomicBool>,
}

impl FramebufferDevice for FlakyFramebuffer {
    fn screen_info(&self) -> ScreenInfo {
        self.inner.screen_info()
    }

    fn base_address(&self) -> EffectiveAddress {
        self.inner.base_address()
    }

    fn blank(&mut self) -> Result<(), DeviceError> {
        self.inner.blank()
    }

    fn wait_for_vsync(&mut self) -> Result<(), DeviceError> {
        self.inner.wait_for_vsync()
    }

    fn select_frame(&mut self, index: usize) -> Result<(), DeviceError> {
        if self.fail_flip.swap(false, Ordering::SeqCst) {
            return Err(DeviceError::NoSuchFrame { index, frames: 0 });
        }
        self.inner.select_frame(index)
    }
}

fn flaky_compositor(
    config: Config,
) -> (FrameCompositor<FlakyFramebuffer>, Arc<AtomicBool>) {
    let system = CoprocessorSystem::from_config(&config);
    let fail_flip = Arc::new(AtomicBool::new(false));
    let fb = FlakyFramebuffer {
        inner: MemoryFramebuffer::with_info(system.memory(), screen(32, 32)).unwrap(),
        fail_flip: Arc::clone(&fail_flip),
    };
    (FrameCompositor::new(system, fb, config).unwrap(), fail_flip)
}

#[test]
fn test_scaled_overlay_fills_screen() {
    let mut compositor = compositor(screen(64, 64), Config::default());
    compositor.set_video_mode(64, 64).unwrap();
    let overlay = compositor
        .create_yuv_overlay(32, 32, YuvFormat::Yv12)
        .unwrap();
    overlay.fill(180, 128, 128).unwrap();

    let outcome = compositor
        .display_yuv_overlay(&overlay, overlay.rect(), Rect::sized(64, 64))
        .unwrap();
    assert_eq!(outcome, FrameOutcome::Presented { frame: 0 });

    let frame = compositor.device().visible_frame().unwrap();
    assert_eq!(frame.len(), 64 * 64 * 4);
    for px in frame.chunks_exact(4) {
        assert_eq!(px, [180, 180, 180, 255]);
    }

    // Second frame goes to the other buffer
    let outcome = compositor
        .display_yuv_overlay(&overlay, overlay.rect(), Rect::sized(64, 64))
        .unwrap();
    assert_eq!(outcome, FrameOutcome::Presented { frame: 1 });
    assert_eq!(compositor.device().shown_frame(), 1);
    assert_eq!(compositor.device().flips(), 2);
    assert_eq!(compositor.device().vsyncs(), 2);
    assert_eq!(compositor.frames_presented(), 2);

    compositor.free_yuv_overlay(overlay).unwrap();
}

#[test]
fn test_scaler_identity_reproduces_planes() {
    let system = CoprocessorSystem::from_config(&Config::default());
    let memory = system.memory().clone();
    let (w, h) = (32usize, 16usize);
    let y: Vec<u8> = (0..w * h).map(|i| (i * 31 % 251) as u8).collect();
    let v: Vec<u8> = (0..w * h / 4).map(|i| (i * 17 % 253) as u8).collect();
    let u: Vec<u8> = (0..w * h / 4).map(|i| (255 - i * 5 % 256) as u8).collect();

    let y_plane = memory.alloc(y.len()).unwrap();
    // Offset chroma rows off their quadword boundary
    let chroma = memory.alloc(8 + v.len() + u.len()).unwrap();
    y_plane.write_at(0, &y).unwrap();
    chroma.write_at(8, &v).unwrap();
    chroma.write_at(8 + v.len(), &u).unwrap();
    let dst = memory.alloc(w * h * 3 / 2).unwrap();

    let params = memory
        .alloc_pod(&ScaleParams::new(
            y_plane.addr().as_u64(),
            chroma.addr().offset(8).as_u64(),
            chroma.addr().offset(8 + v.len()).as_u64(),
            dst.addr().as_u64(),
            (w as u32, h as u32),
            (w as u32, h as u32),
        ))
        .unwrap();
    let mut scaler = CoprocessorJob::new(&system, "scaler", ProgramImage::bilinear_scaler(), false);
    scaler.run_once(params.addr()).unwrap();

    let out = dst.to_vec().unwrap();
    assert_eq!(&out[..w * h], &y[..]);
    assert_eq!(&out[w * h..w * h + v.len()], &v[..]);
    assert_eq!(&out[w * h + v.len()..], &u[..]);
}

#[test]
fn test_smaller_overlay_is_centered() {
    let mut compositor = compositor(screen(128, 64), Config::default());
    compositor.set_video_mode(64, 32).unwrap();
    let centering = compositor.centering().unwrap();
    assert_eq!((centering.width_offset, centering.height_offset), (32, 16));

    let overlay = compositor
        .create_yuv_overlay(64, 32, YuvFormat::Iyuv)
        .unwrap();
    overlay.fill(180, 128, 128).unwrap();
    compositor
        .display_yuv_overlay(&overlay, overlay.rect(), Rect::sized(64, 32))
        .unwrap();

    let frame = compositor.device().visible_frame().unwrap();
    for row in 0..64usize {
        for col in 0..128usize {
            let px = &frame[(row * 128 + col) * 4..(row * 128 + col + 1) * 4];
            let inside = (16..48).contains(&row) && (32..96).contains(&col);
            if inside {
                assert_eq!(px, [180, 180, 180, 255], "pixel {},{}", col, row);
            } else {
                assert_eq!(px, [0, 0, 0, 0], "pixel {},{}", col, row);
            }
        }
    }
}

#[test]
fn test_update_writes_surface_rows_without_touching_the_border() {
    let mut compositor = compositor(screen(128, 64), Config::default());
    let surface = compositor.set_video_mode(64, 32).unwrap();
    assert_eq!(surface.pitch, 256);

    let pattern: Vec<u8> = (0..surface.pitch as usize * 32)
        .map(|i| (i / 256 * 7 + i % 256) as u8 % 250 + 1)
        .collect();
    compositor.surface().unwrap().write_at(0, &pattern).unwrap();
    assert_eq!(
        compositor.update().unwrap(),
        FrameOutcome::Presented { frame: 0 }
    );

    let frame = compositor.device().visible_frame().unwrap();
    let line = 128 * 4;
    for row in 0..64usize {
        let bytes = &frame[row * line..(row + 1) * line];
        if (16..48).contains(&row) {
            let src = &pattern[(row - 16) * 256..(row - 15) * 256];
            assert_eq!(&bytes[128..384], src, "row {}", row);
            assert!(bytes[..128].iter().all(|&b| b == 0));
            assert!(bytes[384..].iter().all(|&b| b == 0));
        } else {
            assert!(bytes.iter().all(|&b| b == 0), "row {}", row);
        }
    }
}

#[test]
fn test_single_buffering_always_shows_frame_zero() {
    let config = Config {
        double_buffering: false,
        ..Config::default()
    };
    let mut compositor = compositor(screen(32, 32), config);
    let surface = compositor.set_video_mode(32, 32).unwrap();
    assert!(!surface.double_buffered);
    assert!(!compositor.view().unwrap().is_double_buffered());
    for _ in 0..3 {
        assert_eq!(
            compositor.update().unwrap(),
            FrameOutcome::Presented { frame: 0 }
        );
        assert_eq!(compositor.view().unwrap().index(), 0);
    }
}

/// Settings that make every mailbox wait on a full HD frame give up at once
fn impatient(policy: ProtocolErrorPolicy) -> Config {
    Config {
        poll_interval_us: 1,
        protocol_error_policy: policy,
        ..Config::default()
    }
}

#[test]
fn test_timed_out_write_is_collected_by_the_next_frame() {
    let mut compositor = compositor(screen(1920, 1080), impatient(ProtocolErrorPolicy::DropFrame));
    compositor.set_video_mode(1920, 1080).unwrap();
    compositor.set_mailbox_timeout(Some(Duration::ZERO));
    assert!(matches!(
        compositor.update().unwrap(),
        FrameOutcome::Dropped { .. }
    ));

    // Once waits may take as long as they need, the late FIN is picked up
    compositor.set_mailbox_timeout(None);
    assert_eq!(
        compositor.update().unwrap(),
        FrameOutcome::Presented { frame: 0 }
    );
    assert_eq!(compositor.frames_dropped(), 1);

    // The pipeline also survives a mode change afterwards
    compositor.set_video_mode(16, 16).unwrap();
    for _ in 0..3 {
        assert!(matches!(
            compositor.update().unwrap(),
            FrameOutcome::Presented { .. }
        ));
    }
}

#[test]
fn test_timed_out_conversion_keeps_its_buffers() {
    let config = Config {
        scaler_keep_alive: false,
        ..impatient(ProtocolErrorPolicy::Abort)
    };
    let mut compositor = compositor(screen(1920, 1080), config);
    compositor.set_video_mode(1920, 1080).unwrap();
    let overlay = compositor
        .create_yuv_overlay(320, 240, YuvFormat::Yv12)
        .unwrap();
    overlay.fill(180, 128, 128).unwrap();
    let full = Rect::sized(1920, 1080);

    compositor.set_mailbox_timeout(Some(Duration::ZERO));
    assert!(matches!(
        compositor.display_yuv_overlay(&overlay, overlay.rect(), full),
        Err(ComposeError::Job(JobError::Timeout { .. }))
    ));

    // A converter that lost its scaled input would fail this frame
    compositor.set_mailbox_timeout(None);
    assert_eq!(
        compositor
            .display_yuv_overlay(&overlay, overlay.rect(), full)
            .unwrap(),
        FrameOutcome::Presented { frame: 0 }
    );
    let frame = compositor.device().visible_frame().unwrap();
    assert!(frame.chunks_exact(4).all(|px| px == [180, 180, 180, 255]));

    compositor.free_yuv_overlay(overlay).unwrap();
}

#[test]
fn test_drop_frame_policy_skips_failed_frame() {
    let (mut compositor, fail_flip) = flaky_compositor(Config::default());
    compositor.set_video_mode(32, 32).unwrap();

    fail_flip.store(true, Ordering::SeqCst);
    assert!(matches!(
        compositor.update().unwrap(),
        FrameOutcome::Dropped { .. }
    ));
    assert_eq!(compositor.frames_dropped(), 1);

    assert!(matches!(
        compositor.update().unwrap(),
        FrameOutcome::Presented { .. }
    ));
    assert_eq!(compositor.frames_presented(), 1);
}

#[test]
fn test_drop_frame_recovers_with_single_buffering() {
    let config = Config {
        double_buffering: false,
        ..Config::default()
    };
    let (mut compositor, fail_flip) = flaky_compositor(config);
    compositor.set_video_mode(32, 32).unwrap();

    fail_flip.store(true, Ordering::SeqCst);
    assert!(matches!(
        compositor.update().unwrap(),
        FrameOutcome::Dropped { .. }
    ));
    assert_eq!(
        compositor.update().unwrap(),
        FrameOutcome::Presented { frame: 0 }
    );
}

#[test]
fn test_abort_policy_returns_the_failure() {
    let config = Config {
        protocol_error_policy: ProtocolErrorPolicy::Abort,
        ..Config::default()
    };
    let (mut compositor, fail_flip) = flaky_compositor(config);
    compositor.set_video_mode(32, 32).unwrap();

    fail_flip.store(true, Ordering::SeqCst);
    assert!(matches!(
        compositor.update(),
        Err(ComposeError::Device(DeviceError::NoSuchFrame { .. }))
    ));
    assert_eq!(compositor.frames_dropped(), 0);
}

#[test]
fn test_overlay_requires_a_video_mode() {
    let mut compositor = compositor(screen(32, 32), Config::default());
    assert!(matches!(
        compositor.create_yuv_overlay(16, 16, YuvFormat::Yv12),
        Err(ComposeError::ModeNotSet)
    ));
    assert!(matches!(compositor.update(), Err(ComposeError::ModeNotSet)));
}

#[test]
fn test_source_rect_must_match_overlay() {
    let mut compositor = compositor(screen(32, 32), Config::default());
    compositor.set_video_mode(32, 32).unwrap();
    let overlay = compositor
        .create_yuv_overlay(16, 16, YuvFormat::Yv12)
        .unwrap();
    assert!(matches!(
        compositor.display_yuv_overlay(&overlay, Rect::sized(8, 8), Rect::sized(32, 32)),
        Err(ComposeError::InvalidGeometry(_))
    ));
    assert!(matches!(
        compositor.display_yuv_overlay(&overlay, overlay.rect(), Rect::sized(64, 64)),
        Err(ComposeError::InvalidGeometry(_))
    ));
}

#[test]
fn test_quit_returns_every_core() {
    let mut compositor = compositor(screen(32, 32), Config::default());
    compositor.set_video_mode(32, 32).unwrap();
    let overlay = compositor
        .create_yuv_overlay(16, 16, YuvFormat::Yv12)
        .unwrap();
    overlay.fill(90, 128, 128).unwrap();
    compositor
        .display_yuv_overlay(&overlay, overlay.rect(), Rect::sized(32, 32))
        .unwrap();
    assert!(compositor.system().available_cores() < compositor.system().total_cores());

    compositor.free_yuv_overlay(overlay).unwrap();
    compositor.quit().unwrap();
    assert_eq!(
        compositor.system().available_cores(),
        compositor.system().total_cores()
    );
}
