// SPDX-License-Identifier: GPL-3.0-only

//! Loadable kernel programs

use super::context::KernelEnv;
use super::memory::EffectiveAddress;
use crate::errors::KernelError;
use crate::kernels::{BilinearScaler, FbWriter, Yuv2Rgb};
use std::fmt;
use std::sync::Arc;

/// Code that runs inside a coprocessor context.
///
/// `process` handles one request: the parameter block lives at `params` in
/// host memory and must be fetched through the context's DMA engine.
pub trait KernelProgram: Send + Sync {
    fn name(&self) -> &'static str;

    /// Local store bytes the program needs at its largest supported geometry
    fn local_store_footprint(&self) -> usize;

    fn process(&self, env: &KernelEnv, params: EffectiveAddress) -> Result<(), KernelError>;
}

/// Handle to a program that can be loaded into any number of contexts
#[derive(Clone)]
pub struct ProgramImage {
    program: Arc<dyn KernelProgram>,
}

impl ProgramImage {
    pub fn new<P: KernelProgram + 'static>(program: P) -> Self {
        Self {
            program: Arc::new(program),
        }
    }

    /// Framebuffer writer
    pub fn fb_writer() -> Self {
        Self::new(FbWriter)
    }

    /// Planar YUV to packed BGRA converter
    pub fn yuv2rgb() -> Self {
        Self::new(Yuv2Rgb)
    }

    /// Bilinear YUV scaler
    pub fn bilinear_scaler() -> Self {
        Self::new(BilinearScaler)
    }

    pub fn name(&self) -> &'static str {
        self.program.name()
    }

    pub fn local_store_footprint(&self) -> usize {
        self.program.local_store_footprint()
    }

    pub(crate) fn program(&self) -> &dyn KernelProgram {
        self.program.as_ref()
    }
}

impl fmt::Debug for ProgramImage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProgramImage")
            .field("name", &self.name())
            .field("footprint", &self.local_store_footprint())
            .finish()
    }
}
