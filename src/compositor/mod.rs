// SPDX-License-Identifier: GPL-3.0-only

//! Host-side frame composition
//!
//! The compositor owns the visible surface and the coprocessor jobs that
//! fill it. Setting a video mode sizes and centers the surface on the
//! framebuffer; every update pushes the surface through the writer kernel
//! and flips. YUV overlays are optionally scaled, converted into the surface
//! and then presented through the same update path.

pub mod double_buffer;
pub mod framebuffer;
pub mod overlay;

pub use double_buffer::{Centering, DoubleBufferedView};
pub use framebuffer::{FramebufferDevice, MemoryFramebuffer, ScreenInfo};
pub use overlay::{Rect, YuvFormat, YuvOverlay};

use crate::config::{Config, ProtocolErrorPolicy};
use crate::constants::{VIDEO_MODES, VideoMode};
use crate::coprocessor::protocol::ProtocolState;
use crate::coprocessor::{
    CoprocessorJob, CoprocessorSystem, EffectiveAddress, HostBuffer, ProgramImage,
};
use crate::errors::{ComposeError, JobError};
use crate::kernels::{ConvertParams, ScaleParams, WriterParams};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Bytes per pixel of the only surface format overlays are converted to
const OVERLAY_PIXEL_SIZE: u32 = 4;

/// Result of one frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameOutcome {
    /// The frame reached the display as framebuffer frame `frame`
    Presented { frame: usize },
    /// The frame was skipped after a recoverable failure
    Dropped { reason: String },
}

/// Surface created by [`FrameCompositor::set_video_mode`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SurfaceInfo {
    pub width: u32,
    pub height: u32,
    pub pitch: u32,
    pub pixel_size: u32,
    pub double_buffered: bool,
}

struct ModeState {
    surface: HostBuffer,
    info: SurfaceInfo,
    centering: Centering,
    /// Source stride handed to the writer
    input_line_length: u32,
    view: DoubleBufferedView,
}

/// Buffers a submitted request reads or writes; held until its job is idle
struct InFlight {
    _buffers: Vec<HostBuffer>,
}

impl InFlight {
    fn new(buffers: impl IntoIterator<Item = HostBuffer>) -> Self {
        Self {
            _buffers: buffers.into_iter().collect(),
        }
    }
}

/// Whether `job` can no longer touch the buffers of its last request
fn is_quiescent(job: &CoprocessorJob) -> bool {
    !job.is_running() || job.protocol_state() == ProtocolState::Idle
}

pub struct FrameCompositor<D: FramebufferDevice> {
    system: CoprocessorSystem,
    config: Config,
    device: D,
    writer: CoprocessorJob,
    writer_params: HostBuffer,
    converter: Option<CoprocessorJob>,
    scaler: Option<CoprocessorJob>,
    scaling_enabled: bool,
    mode: Option<ModeState>,
    pending_convert: Option<InFlight>,
    pending_scale: Option<InFlight>,
    presented: u64,
    dropped: u64,
}

impl<D: FramebufferDevice> FrameCompositor<D> {
    /// Initialise video output on `device` and start the writer
    pub fn new(system: CoprocessorSystem, device: D, config: Config) -> Result<Self, ComposeError> {
        let info = device.screen_info();
        info!(
            width = info.xres,
            height = info.yres,
            bpp = info.bits_per_pixel,
            frames = info.num_frames,
            "Initialising video output"
        );

        let writer_params = system.memory().alloc_pod(&WriterParams::default())?;
        let mut writer = CoprocessorJob::new(
            &system,
            "fb_writer",
            ProgramImage::fb_writer(),
            config.writer_keep_alive,
        )
        .with_config(&config);
        if config.writer_keep_alive {
            writer.start()?;
        } else {
            writer.boot()?;
        }

        Ok(Self {
            system,
            config,
            device,
            writer,
            writer_params,
            converter: None,
            scaler: None,
            scaling_enabled: true,
            mode: None,
            pending_convert: None,
            pending_scale: None,
            presented: 0,
            dropped: 0,
        })
    }

    /// Display modes the backend offers, largest first
    pub fn list_modes() -> &'static [VideoMode] {
        &VIDEO_MODES
    }

    pub fn screen_info(&self) -> ScreenInfo {
        self.device.screen_info()
    }

    pub fn device(&self) -> &D {
        &self.device
    }

    pub fn system(&self) -> &CoprocessorSystem {
        &self.system
    }

    pub fn surface(&self) -> Option<&HostBuffer> {
        self.mode.as_ref().map(|m| &m.surface)
    }

    pub fn surface_info(&self) -> Option<SurfaceInfo> {
        self.mode.as_ref().map(|m| m.info)
    }

    pub fn centering(&self) -> Option<Centering> {
        self.mode.as_ref().map(|m| m.centering)
    }

    pub fn view(&self) -> Option<&DoubleBufferedView> {
        self.mode.as_ref().map(|m| &m.view)
    }

    pub fn scaling_enabled(&self) -> bool {
        self.scaling_enabled
    }

    pub fn frames_presented(&self) -> u64 {
        self.presented
    }

    pub fn frames_dropped(&self) -> u64 {
        self.dropped
    }

    /// Change the mailbox wait bound of every job, current and future
    pub fn set_mailbox_timeout(&mut self, timeout: Option<Duration>) {
        self.config.mailbox_timeout_ms = timeout.map(|t| t.as_millis() as u64);
        for job in [Some(&mut self.writer), self.converter.as_mut(), self.scaler.as_mut()]
            .into_iter()
            .flatten()
        {
            job.set_timeout(timeout);
        }
    }

    /// Size the surface for `width` x `height` and center it on screen
    pub fn set_video_mode(&mut self, width: u32, height: u32) -> Result<SurfaceInfo, ComposeError> {
        if width == 0 || height == 0 {
            return Err(ComposeError::InvalidGeometry(format!(
                "video mode {}x{}",
                width, height
            )));
        }
        self.finish_pending()?;
        // The old surface may still be read by an unanswered write
        self.writer.resync()?;

        let screen = self.device.screen_info();
        let pixel_size = screen.pixel_size();
        let centering = Centering::new(&screen, width, height);
        let double_buffered = self.config.double_buffering && screen.num_frames >= 2;

        self.device.blank()?;
        let view = DoubleBufferedView::new(
            self.device.base_address(),
            &screen,
            &centering,
            double_buffered,
        );

        let pitch = width * pixel_size;
        let surface = self
            .system
            .memory()
            .alloc(pitch as usize * height as usize)?;
        let info = SurfaceInfo {
            width,
            height,
            pitch,
            pixel_size,
            double_buffered,
        };
        info!(
            width,
            height,
            bounded_width = centering.bounded_width,
            bounded_height = centering.bounded_height,
            double_buffered,
            "Video mode set"
        );

        self.mode = Some(ModeState {
            surface,
            info,
            centering,
            input_line_length: pitch,
            view,
        });
        Ok(info)
    }

    /// Copy the surface to the framebuffer and flip
    pub fn update(&mut self) -> Result<FrameOutcome, ComposeError> {
        let result = self.present();
        self.settle(result)
    }

    /// Create an overlay and bring up the converter for it
    pub fn create_yuv_overlay(
        &mut self,
        width: u32,
        height: u32,
        format: YuvFormat,
    ) -> Result<YuvOverlay, ComposeError> {
        let mode = self.mode.as_ref().ok_or(ComposeError::ModeNotSet)?;
        if !matches!(mode.info.pixel_size, 2..=4) {
            return Err(ComposeError::UnsupportedSurface(mode.info.pixel_size));
        }
        let overlay = YuvOverlay::new(self.system.memory(), width, height, format)?;

        if self.converter.is_none() {
            let mut converter = CoprocessorJob::new(
                &self.system,
                "yuv2rgb",
                ProgramImage::yuv2rgb(),
                self.config.converter_keep_alive,
            )
            .with_config(&self.config);
            if self.config.converter_keep_alive {
                converter.start()?;
            } else {
                converter.boot()?;
            }
            self.converter = Some(converter);
        }
        debug!(width, height, format = %format, "YUV overlay created");
        Ok(overlay)
    }

    /// Scale (if `src` and `dst` differ in size), convert and present `overlay`
    pub fn display_yuv_overlay(
        &mut self,
        overlay: &YuvOverlay,
        src: Rect,
        dst: Rect,
    ) -> Result<FrameOutcome, ComposeError> {
        let result = self.convert_overlay(overlay, &src, &dst).and_then(|()| self.present());
        self.settle(result)
    }

    /// Release an overlay and shut the converter down
    pub fn free_yuv_overlay(&mut self, overlay: YuvOverlay) -> Result<(), ComposeError> {
        self.finish_pending()?;
        self.finish_scaling()?;
        drop(overlay);
        if let Some(mut converter) = self.converter.take() {
            converter.shutdown()?;
        }
        Ok(())
    }

    /// Shut down every job and release the surface
    pub fn quit(&mut self) -> Result<(), ComposeError> {
        info!(
            presented = self.presented,
            dropped = self.dropped,
            "Shutting down video output"
        );
        if let Err(e) = self.finish_pending().and_then(|()| self.finish_scaling()) {
            warn!(error = %e, "Outstanding request failed during shutdown");
        }
        let mut first_error = None;
        for job in [Some(&mut self.writer), self.converter.as_mut(), self.scaler.as_mut()]
            .into_iter()
            .flatten()
        {
            if let Err(e) = job.shutdown() {
                warn!(job = job.name(), error = %e, "Job shutdown failed");
                first_error.get_or_insert(e);
            }
        }
        self.converter = None;
        self.scaler = None;
        if first_error.is_none() {
            self.pending_convert = None;
            self.pending_scale = None;
            self.mode = None;
        }
        match first_error {
            Some(e) => Err(e.into()),
            None => Ok(()),
        }
    }

    fn settle(&mut self, result: Result<usize, ComposeError>) -> Result<FrameOutcome, ComposeError> {
        match result {
            Ok(frame) => {
                self.presented += 1;
                Ok(FrameOutcome::Presented { frame })
            }
            Err(e) if self.is_droppable(&e) => {
                self.dropped += 1;
                warn!(error = %e, dropped = self.dropped, "Dropping frame");
                self.recover();
                Ok(FrameOutcome::Dropped {
                    reason: e.to_string(),
                })
            }
            Err(e) => Err(e),
        }
    }

    fn is_droppable(&self, error: &ComposeError) -> bool {
        self.config.protocol_error_policy == ProtocolErrorPolicy::DropFrame
            && matches!(
                error,
                ComposeError::Job(_)
                    | ComposeError::Memory(_)
                    | ComposeError::Device(_)
                    | ComposeError::StageUnavailable(_)
            )
    }

    /// Bring failed resident jobs back up after a dropped frame.
    ///
    /// Jobs still inside an exchange are left alone; the next frame collects
    /// their late FIN before reusing them. Their buffers stay held until then.
    fn recover(&mut self) {
        // A dropped frame is never flipped; its target may be written again
        if let Some(mode) = self.mode.as_mut() {
            mode.view.acknowledge_flip();
        }
        for job in [Some(&mut self.writer), self.converter.as_mut(), self.scaler.as_mut()]
            .into_iter()
            .flatten()
        {
            if job.keep_alive() && !job.is_running() {
                info!(job = job.name(), "Restarting coprocessor job");
                if let Err(e) = job.start() {
                    warn!(job = job.name(), error = %e, "Restart failed");
                }
            }
        }
        if self.converter.as_ref().is_none_or(is_quiescent) {
            self.pending_convert = None;
        }
        if self.scaler.as_ref().is_none_or(is_quiescent) {
            self.pending_scale = None;
        }
    }

    /// Wait for a submitted conversion to finish, then release its buffers
    fn finish_pending(&mut self) -> Result<(), ComposeError> {
        if let Some(converter) = self.converter.as_mut() {
            converter.resync()?;
        }
        self.pending_convert = None;
        Ok(())
    }

    /// Same as [`Self::finish_pending`] for an interrupted scale
    fn finish_scaling(&mut self) -> Result<(), ComposeError> {
        if let Some(scaler) = self.scaler.as_mut() {
            scaler.resync()?;
        }
        self.pending_scale = None;
        Ok(())
    }

    fn present(&mut self) -> Result<usize, ComposeError> {
        self.finish_pending()?;
        // Parameters and target are reused; the previous write must be done
        self.writer.resync()?;

        let screen = self.device.screen_info();
        let base = self.device.base_address();
        let mode = self.mode.as_mut().ok_or(ComposeError::ModeNotSet)?;
        mode.view.recenter(base, &screen, &mode.centering);
        let target = mode.view.write_target()?;

        let params = WriterParams::new(
            mode.surface.addr().as_u64(),
            target.as_u64(),
            screen.line_length,
            mode.input_line_length,
            mode.centering.bounded_width,
            mode.centering.bounded_height,
            screen.pixel_size(),
        );
        self.writer_params.write_pod(&params)?;
        if self.writer.keep_alive() {
            self.writer.request(self.writer_params.addr())?;
        } else {
            self.writer.run_once(self.writer_params.addr())?;
        }

        let frame = mode.view.commit();
        self.device.wait_for_vsync()?;
        self.device.select_frame(frame)?;
        mode.view.acknowledge_flip();
        debug!(frame, "Frame presented");
        Ok(frame)
    }

    fn convert_overlay(
        &mut self,
        overlay: &YuvOverlay,
        src: &Rect,
        dst: &Rect,
    ) -> Result<(), ComposeError> {
        let mode = self.mode.as_ref().ok_or(ComposeError::ModeNotSet)?;
        if mode.info.pixel_size != OVERLAY_PIXEL_SIZE {
            return Err(ComposeError::UnsupportedSurface(mode.info.pixel_size));
        }
        if !src.same_size(&overlay.rect()) {
            return Err(ComposeError::InvalidGeometry(format!(
                "source {}x{} does not match the {}x{} overlay",
                src.w,
                src.h,
                overlay.width(),
                overlay.height()
            )));
        }
        let surface_len = mode.surface.len();
        if dst.w < 2
            || dst.h < 2
            || dst.w as usize * dst.h as usize * OVERLAY_PIXEL_SIZE as usize > surface_len
        {
            return Err(ComposeError::InvalidGeometry(format!(
                "destination {}x{} does not fit the surface",
                dst.w, dst.h
            )));
        }
        let surface_addr = mode.surface.addr();

        self.finish_pending()?;

        let (mut y, mut v, mut u) = overlay.yvu_planes();
        let mut scaled = None;
        if !src.same_size(dst) {
            debug!(src_w = src.w, src_h = src.h, dst_w = dst.w, dst_h = dst.h, "Scaling overlay");
            let buffer = self.scale(y, v, u, src, dst)?;
            let picture = dst.w as usize * dst.h as usize;
            y = buffer.addr();
            v = y.offset(picture);
            u = v.offset(picture / 4);
            scaled = Some(buffer);
        }

        let params = self.system.memory().alloc_pod(&ConvertParams::new(
            y.as_u64(),
            v.as_u64(),
            u.as_u64(),
            surface_addr.as_u64(),
            dst.w,
            dst.h,
        ))?;
        let converter = self
            .converter
            .as_mut()
            .ok_or(ComposeError::StageUnavailable("converter"))?;
        if converter.keep_alive() {
            let submitted = converter.submit(params.addr());
            self.pending_convert = Some(InFlight::new([params].into_iter().chain(scaled)));
            submitted?;
        } else {
            converter.run_once(params.addr())?;
        }

        let screen = self.device.screen_info();
        if let Some(mode) = self.mode.as_mut() {
            mode.centering = Centering::new(&screen, dst.w, dst.h);
            mode.input_line_length = dst.w * OVERLAY_PIXEL_SIZE;
        }
        Ok(())
    }

    /// Run the scaler once into a fresh buffer
    fn scale(
        &mut self,
        y: EffectiveAddress,
        v: EffectiveAddress,
        u: EffectiveAddress,
        src: &Rect,
        dst: &Rect,
    ) -> Result<HostBuffer, ComposeError> {
        if !self.scaling_enabled {
            return Err(ComposeError::StageUnavailable("scaler"));
        }
        self.finish_scaling()?;
        if self.scaler.is_none() {
            let mut scaler = CoprocessorJob::new(
                &self.system,
                "bilin_scaler",
                ProgramImage::bilinear_scaler(),
                self.config.scaler_keep_alive,
            )
            .with_config(&self.config);
            let booted = if self.config.scaler_keep_alive {
                scaler.start()
            } else {
                scaler.boot()
            };
            if let Err(e) = booted {
                warn!(error = %e, "Scaler unavailable, disabling scaling");
                self.scaling_enabled = false;
                return Err(ComposeError::StageUnavailable("scaler"));
            }
            self.scaler = Some(scaler);
        }

        let picture = dst.w as usize * dst.h as usize;
        let memory = self.system.memory();
        let buffer = memory.alloc(picture + picture / 2)?;
        let params = memory.alloc_pod(&ScaleParams::new(
            y.as_u64(),
            v.as_u64(),
            u.as_u64(),
            buffer.addr().as_u64(),
            (src.w, src.h),
            (dst.w, dst.h),
        ))?;

        let scaler = self
            .scaler
            .as_mut()
            .ok_or(ComposeError::StageUnavailable("scaler"))?;
        let result: Result<(), JobError> = if scaler.keep_alive() {
            scaler.request(params.addr())
        } else {
            scaler.run_once(params.addr())
        };
        if let Err(e) = result {
            self.pending_scale = Some(InFlight::new([params, buffer]));
            return Err(e.into());
        }
        Ok(buffer)
    }
}

impl<D: FramebufferDevice> Drop for FrameCompositor<D> {
    fn drop(&mut self) {
        if let Err(e) = self.quit() {
            warn!(error = %e, "Video shutdown failed");
        }
    }
}
