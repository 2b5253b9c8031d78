// SPDX-License-Identifier: GPL-3.0-only

//! Planar YUV 4:2:0 to packed BGRA converter kernel
//!
//! Works on groups of four luma rows and the two chroma rows they share. The
//! Y, V and U rows of a group arrive through a single DMA list into one
//! staging set; two sets alternate so the next group is in flight while the
//! current one is converted. Converted groups go out from two output buffers
//! in two half-size transfers each.
//!
//! ```text
//! U' = U - 128, V' = V - 128
//! R = Y + 1.403 V'
//! G = Y - (0.344 U' + 0.714 V')
//! B = Y + 1.773 U'
//! ```
//!
//! Every pixel is written as the little-endian word `B | G << 8 | R << 16 |
//! 0xff << 24`, i.e. the bytes B, G, R, A.

use super::lanes::{VectorWidth, saturate_lanes};
use super::params::ConvertParams;
use crate::constants::MAX_HDTV_WIDTH;
use crate::coprocessor::dma::{DmaList, Staged, StagingRing, aligned_offset, slot_stride};
use crate::coprocessor::{EffectiveAddress, KernelEnv, KernelProgram};
use crate::errors::KernelError;
use tracing::trace;

/// Luma rows per group
const GROUP_ROWS: usize = 4;
/// Chroma rows per group
const GROUP_CHROMA_ROWS: usize = 2;
/// Bytes per output pixel
const BGRA: usize = 4;

const FETCH_TAGS: [u8; 2] = [0, 1];
const STORE_TAGS: [u8; 2] = [2, 3];

pub struct Yuv2Rgb;

impl KernelProgram for Yuv2Rgb {
    fn name(&self) -> &'static str {
        "yuv2rgb_spu"
    }

    fn local_store_footprint(&self) -> usize {
        let frame = Frame::sized(MAX_HDTV_WIDTH, GROUP_ROWS);
        2 * frame.input_capacity() + 2 * frame.output_capacity()
    }

    fn process(&self, env: &KernelEnv, params: EffectiveAddress) -> Result<(), KernelError> {
        let p: ConvertParams = env.fetch_params(params)?;
        let frame = Frame::from_params(&p);
        trace!(width = frame.width, height = frame.height, "Convert request");
        if frame.width == 0 || frame.height == 0 {
            return Ok(());
        }

        let store = env.local_store();
        let mut inputs = StagingRing::new(vec![
            store.alloc(frame.input_capacity())?,
            store.alloc(frame.input_capacity())?,
        ]);
        let mut outputs = StagingRing::new(vec![
            store.alloc(frame.output_capacity())?,
            store.alloc(frame.output_capacity())?,
        ]);
        let lanes = VectorWidth::for_width(frame.width);
        let groups = frame.height.div_ceil(GROUP_ROWS);
        let mut layouts = [GroupLayout::default(); 2];

        layouts[0] = fetch_group(env, &frame, &mut inputs, 0, 0)?;
        for group in 0..groups {
            let slot = group % 2;
            let input = inputs.acquire(slot)?;
            if group + 1 < groups {
                layouts[1 - slot] = fetch_group(env, &frame, &mut inputs, 1 - slot, group + 1)?;
            }

            let layout = layouts[slot];
            let mut output = outputs.acquire(slot)?;
            let dst = frame.dst.offset(layout.first_row * frame.width * BGRA);
            let out_at = aligned_offset(0, dst);
            let row_bytes = frame.width * BGRA;

            for row in 0..layout.rows {
                let chroma = layout.chroma_slot(row);
                let y = &input[layout.luma[row]..layout.luma[row] + frame.width];
                let v = &input[layout.v[chroma]..layout.v[chroma] + frame.chroma_width];
                let u = &input[layout.u[chroma]..layout.u[chroma] + frame.chroma_width];
                let start = out_at + row * row_bytes;
                convert_row(lanes, y, v, u, &mut output[start..start + row_bytes]);
            }

            // Two half-size stores
            let total = layout.rows * row_bytes;
            let first = layout.rows.div_ceil(2) * row_bytes;
            let mut list = DmaList::new();
            list.push(out_at, dst, first);
            if total > first {
                list.push(out_at + first, dst.offset(first), total - first);
            }
            let transfer = env.dma().put(STORE_TAGS[slot], output, list)?;
            outputs.release(slot, Staged::InFlight(transfer));
            inputs.release(slot, Staged::Ready(input));
        }

        outputs.drain()?;
        Ok(())
    }
}

/// Geometry of one conversion request
struct Frame {
    width: usize,
    height: usize,
    chroma_width: usize,
    chroma_height: usize,
    y: EffectiveAddress,
    v: EffectiveAddress,
    u: EffectiveAddress,
    dst: EffectiveAddress,
}

impl Frame {
    fn from_params(p: &ConvertParams) -> Self {
        let mut frame = Self::sized(p.src_width as usize, p.src_height as usize);
        frame.y = EffectiveAddress(p.y_plane);
        frame.v = EffectiveAddress(p.v_plane);
        frame.u = EffectiveAddress(p.u_plane);
        frame.dst = EffectiveAddress(p.dst);
        frame
    }

    fn sized(width: usize, height: usize) -> Self {
        Self {
            width,
            height,
            chroma_width: (width / 2).max(1),
            chroma_height: (height / 2).max(1),
            y: EffectiveAddress::default(),
            v: EffectiveAddress::default(),
            u: EffectiveAddress::default(),
            dst: EffectiveAddress::default(),
        }
    }

    fn input_capacity(&self) -> usize {
        GROUP_ROWS * slot_stride(self.width) + 2 * GROUP_CHROMA_ROWS * slot_stride(self.chroma_width)
    }

    fn output_capacity(&self) -> usize {
        slot_stride(GROUP_ROWS * self.width * BGRA)
    }

    fn chroma_row(&self, luma_row: usize) -> usize {
        (luma_row / 2).min(self.chroma_height - 1)
    }
}

/// Where each row of a fetched group sits in its staging set
#[derive(Debug, Clone, Copy, Default)]
struct GroupLayout {
    first_row: usize,
    rows: usize,
    first_chroma: usize,
    luma: [usize; GROUP_ROWS],
    v: [usize; GROUP_CHROMA_ROWS],
    u: [usize; GROUP_CHROMA_ROWS],
}

impl GroupLayout {
    fn chroma_slot(&self, row: usize) -> usize {
        ((self.first_row + row) / 2)
            .saturating_sub(self.first_chroma)
            .min(GROUP_CHROMA_ROWS - 1)
    }
}

fn fetch_group(
    env: &KernelEnv,
    frame: &Frame,
    inputs: &mut StagingRing,
    slot: usize,
    group: usize,
) -> Result<GroupLayout, KernelError> {
    let first_row = group * GROUP_ROWS;
    let mut layout = GroupLayout {
        first_row,
        rows: GROUP_ROWS.min(frame.height - first_row),
        first_chroma: frame.chroma_row(first_row),
        ..GroupLayout::default()
    };

    let mut list = DmaList::new();
    let luma_stride = slot_stride(frame.width);
    for row in 0..layout.rows {
        let ea = frame.y.offset((first_row + row) * frame.width);
        layout.luma[row] = aligned_offset(row * luma_stride, ea);
        list.push(layout.luma[row], ea, frame.width);
    }

    // Chroma rows may start anywhere inside a quadword
    let chroma_stride = slot_stride(frame.chroma_width);
    let chroma_base = GROUP_ROWS * luma_stride;
    for i in 0..GROUP_CHROMA_ROWS {
        let row = (layout.first_chroma + i).min(frame.chroma_height - 1);
        let v = frame.v.offset(row * frame.chroma_width);
        let u = frame.u.offset(row * frame.chroma_width);
        layout.v[i] = aligned_offset(chroma_base + i * chroma_stride, v);
        layout.u[i] = aligned_offset(chroma_base + (GROUP_CHROMA_ROWS + i) * chroma_stride, u);
        list.push(layout.v[i], v, frame.chroma_width);
        list.push(layout.u[i], u, frame.chroma_width);
    }

    let buffer = inputs.acquire(slot)?;
    let transfer = env.dma().get(FETCH_TAGS[slot], buffer, list)?;
    inputs.release(slot, Staged::InFlight(transfer));
    Ok(layout)
}

/// Convert one row of `y.len()` pixels into `out` (4 bytes per pixel)
pub fn convert_row(lanes: VectorWidth, y: &[u8], v: &[u8], u: &[u8], out: &mut [u8]) {
    match lanes {
        VectorWidth::W32 => convert_row_lanes::<32>(y, v, u, out),
        VectorWidth::W16 => convert_row_lanes::<16>(y, v, u, out),
        VectorWidth::Scalar => convert_row_lanes::<1>(y, v, u, out),
    }
}

fn convert_row_lanes<const N: usize>(y: &[u8], v: &[u8], u: &[u8], out: &mut [u8]) {
    let width = y.len();
    let full = width - width % N;
    for x in (0..full).step_by(N) {
        convert_chunk::<N>(x, y, v, u, out);
    }
    for x in full..width {
        convert_chunk::<1>(x, y, v, u, out);
    }
}

#[inline]
fn convert_chunk<const N: usize>(x0: usize, y: &[u8], v: &[u8], u: &[u8], out: &mut [u8]) {
    let last = v.len().min(u.len()).saturating_sub(1);
    let luma: [f32; N] = std::array::from_fn(|i| y[x0 + i] as f32);
    let cb: [f32; N] = std::array::from_fn(|i| u[((x0 + i) / 2).min(last)] as f32 - 128.0);
    let cr: [f32; N] = std::array::from_fn(|i| v[((x0 + i) / 2).min(last)] as f32 - 128.0);

    let r: [u8; N] = saturate_lanes(&std::array::from_fn(|i| luma[i] + 1.403 * cr[i]));
    let g: [u8; N] = saturate_lanes(&std::array::from_fn(|i| {
        luma[i] - (0.344 * cb[i] + 0.714 * cr[i])
    }));
    let b: [u8; N] = saturate_lanes(&std::array::from_fn(|i| luma[i] + 1.773 * cb[i]));

    for i in 0..N {
        let pixel = b[i] as u32 | (g[i] as u32) << 8 | (r[i] as u32) << 16 | 0xff << 24;
        let at = (x0 + i) * BGRA;
        out[at..at + BGRA].copy_from_slice(&pixel.to_le_bytes());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn convert(y: &[u8], v: &[u8], u: &[u8]) -> Vec<u8> {
        let mut out = vec![0u8; y.len() * 4];
        convert_row(VectorWidth::for_width(y.len()), y, v, u, &mut out);
        out
    }

    #[test]
    fn neutral_chroma_gives_grey() {
        let y: Vec<u8> = (0..32).map(|i| i * 8).collect();
        let out = convert(&y, &[128; 16], &[128; 16]);
        for (x, px) in out.chunks_exact(4).enumerate() {
            assert_eq!(px, [y[x], y[x], y[x], 255]);
        }
    }

    #[test]
    fn extreme_inputs_saturate() {
        let out = convert(&[255; 16], &[255; 8], &[255; 8]);
        assert_eq!(&out[..4], &[255, 120, 255, 255]);
        let out = convert(&[0; 16], &[0; 8], &[0; 8]);
        assert_eq!(&out[..4], &[0, 135, 0, 255]);
    }

    #[test]
    fn chroma_is_shared_by_pixel_pairs() {
        let mut v = [128u8; 8];
        v[1] = 228;
        let out = convert(&[100; 16], &v, &[128; 8]);
        let red: Vec<u8> = out.chunks_exact(4).map(|px| px[2]).collect();
        assert_eq!(red[0], 100);
        assert_eq!(red[1], 100);
        assert_eq!(red[2], 240);
        assert_eq!(red[3], 240);
        assert_eq!(red[4], 100);
    }

    #[test]
    fn scalar_path_matches_vector_path() {
        let y: Vec<u8> = (0..32).map(|i| (i * 7) as u8).collect();
        let v: Vec<u8> = (0..16).map(|i| (i * 13) as u8).collect();
        let u: Vec<u8> = (0..16).map(|i| (255 - i * 11) as u8).collect();
        let mut vector = vec![0u8; 128];
        let mut scalar = vec![0u8; 128];
        convert_row(VectorWidth::W32, &y, &v, &u, &mut vector);
        convert_row(VectorWidth::Scalar, &y, &v, &u, &mut scalar);
        assert_eq!(vector, scalar);
    }
}
