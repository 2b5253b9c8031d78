// SPDX-License-Identifier: GPL-3.0-only

//! Framebuffer writer kernel
//!
//! Copies `bounded_input_height` rows of `bounded_input_width * fb_pixel_size`
//! bytes from the surface to the framebuffer. Four staging slots rotate so
//! that a row can be fetched while up to three earlier rows are still being
//! stored. A slot is only refilled after its previous store has retired.

use super::params::WriterParams;
use crate::constants::{DMA_QUADWORD, MAX_HDTV_WIDTH};
use crate::coprocessor::dma::{DmaList, Staged, StagingRing, aligned_offset, slot_stride};
use crate::coprocessor::{EffectiveAddress, KernelEnv, KernelProgram};
use crate::errors::KernelError;
use tracing::trace;

/// Staging slots (and DMA tags) in the pipeline
const SLOTS: usize = 4;

/// Largest pixel the writer is sized for
const MAX_PIXEL_SIZE: usize = 4;

pub struct FbWriter;

impl KernelProgram for FbWriter {
    fn name(&self) -> &'static str {
        "fb_writer_spu"
    }

    fn local_store_footprint(&self) -> usize {
        // Each slot also needs room to realign a row between source and destination
        SLOTS * (slot_stride(MAX_HDTV_WIDTH * MAX_PIXEL_SIZE) + DMA_QUADWORD)
    }

    fn process(&self, env: &KernelEnv, params: EffectiveAddress) -> Result<(), KernelError> {
        let p: WriterParams = env.fetch_params(params)?;
        let row_bytes = p.bounded_input_width as usize * p.fb_pixel_size as usize;
        let rows = p.bounded_input_height as usize;
        trace!(
            width = p.bounded_input_width,
            height = rows,
            pixel_size = p.fb_pixel_size,
            "Writer request"
        );
        if row_bytes == 0 || rows == 0 {
            return Ok(());
        }

        let capacity = slot_stride(row_bytes) + DMA_QUADWORD;
        let mut buffers = Vec::with_capacity(SLOTS);
        for _ in 0..SLOTS {
            buffers.push(env.local_store().alloc(capacity)?);
        }
        let mut ring = StagingRing::new(buffers);

        let mut src = EffectiveAddress(p.data);
        let mut dst = EffectiveAddress(p.center).align_down(DMA_QUADWORD as u64);
        for row in 0..rows {
            let slot = row % SLOTS;
            let tag = slot as u8;

            // Waits for this slot's previous store
            let buffer = ring.acquire(slot)?;
            let fetch_at = aligned_offset(0, src);
            let mut buffer = env
                .dma()
                .get(tag, buffer, DmaList::single(fetch_at, src, row_bytes))?
                .wait()?;

            let store_at = aligned_offset(0, dst);
            if store_at != fetch_at {
                buffer.copy_within(fetch_at..fetch_at + row_bytes, store_at);
            }
            let store = env
                .dma()
                .put(tag, buffer, DmaList::single(store_at, dst, row_bytes))?;
            ring.release(slot, Staged::InFlight(store));

            src = src.offset(p.in_line_stride as usize);
            dst = dst.offset(p.out_line_stride as usize);
        }

        ring.drain()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coprocessor::{CoprocessorSystem, CoprocessorJob, ProgramImage};
    use crate::constants::DEFAULT_LOCAL_STORE_SIZE;

    #[test]
    fn copies_every_row_including_remainder() {
        let system = CoprocessorSystem::new(1, DEFAULT_LOCAL_STORE_SIZE);
        let memory = system.memory().clone();
        let (width, height, pixel) = (8usize, 7usize, 4usize);
        let src = memory.alloc(width * pixel * height).unwrap();
        let dst = memory.alloc(64 * height).unwrap();
        let pattern: Vec<u8> = (0..width * pixel * height).map(|i| (i % 251) as u8).collect();
        src.write_at(0, &pattern).unwrap();

        let params = memory
            .alloc_pod(&WriterParams::new(
                src.addr().as_u64(),
                dst.addr().as_u64(),
                64,
                (width * pixel) as u32,
                width as u32,
                height as u32,
                pixel as u32,
            ))
            .unwrap();
        let mut job = CoprocessorJob::new(&system, "writer", ProgramImage::fb_writer(), true);
        job.start().unwrap();
        job.request(params.addr()).unwrap();

        let out = dst.to_vec().unwrap();
        for row in 0..height {
            let expected = &pattern[row * width * pixel..(row + 1) * width * pixel];
            assert_eq!(&out[row * 64..row * 64 + width * pixel], expected, "row {}", row);
            assert!(out[row * 64 + width * pixel..(row + 1) * 64].iter().all(|&b| b == 0));
        }
        job.shutdown().unwrap();
    }

    #[test]
    fn realigns_rows_whose_addresses_differ_in_low_bits() {
        let system = CoprocessorSystem::new(1, DEFAULT_LOCAL_STORE_SIZE);
        let memory = system.memory().clone();
        let src = memory.alloc(3 * 12).unwrap();
        let dst = memory.alloc(3 * 48).unwrap();
        let pattern: Vec<u8> = (1..=36).collect();
        src.write_at(0, &pattern).unwrap();

        // 12 byte source stride puts rows at offsets 0, 12 and 24
        let params = memory
            .alloc_pod(&WriterParams::new(
                src.addr().as_u64(),
                dst.addr().as_u64(),
                48,
                12,
                3,
                3,
                4,
            ))
            .unwrap();
        let mut job =
            CoprocessorJob::new(&system, "writer-once", ProgramImage::fb_writer(), false);
        job.run_once(params.addr()).unwrap();

        let out = dst.to_vec().unwrap();
        for row in 0..3 {
            assert_eq!(&out[row * 48..row * 48 + 12], &pattern[row * 12..row * 12 + 12]);
        }
    }
}
