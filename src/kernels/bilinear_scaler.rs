// SPDX-License-Identifier: GPL-3.0-only

//! Bilinear YUV 4:2:0 scaler kernel
//!
//! Destination rows are produced in pairs: two luma rows plus one row of
//! each chroma plane. For a pair the four luma source rows and the two
//! source rows of each chroma plane arrive through one DMA list; two staging
//! sets alternate so the next pair is fetched while the current one is
//! interpolated.
//!
//! Each destination coordinate is mapped on its own from scale factors
//! computed once per request (`src = dst * src_len / dst_len`), so errors do
//! not accumulate across a row or down the image. The integer part picks the
//! north-west sample, the fraction is the weight. Neighbours past the last
//! row or column are clamped to it.
//!
//! The destination buffer holds Y (`dst_w * dst_h`), then V, then U (each
//! `dst_w * dst_h / 4`). With an odd destination height the last luma row is
//! left untouched.

use super::lanes::{VectorWidth, lerp_lanes, lerp_lanes_uniform, saturate_lanes};
use super::params::ScaleParams;
use crate::constants::MAX_HDTV_WIDTH;
use crate::coprocessor::dma::{DmaList, Staged, StagingRing, aligned_offset, slot_stride};
use crate::coprocessor::{EffectiveAddress, KernelEnv, KernelProgram};
use crate::errors::KernelError;
use tracing::trace;

const FETCH_TAGS: [u8; 2] = [0, 1];
const STORE_TAGS: [u8; 2] = [2, 3];

pub struct BilinearScaler;

impl KernelProgram for BilinearScaler {
    fn name(&self) -> &'static str {
        "bilin_scaler_spu"
    }

    fn local_store_footprint(&self) -> usize {
        let input = 4 * slot_stride(MAX_HDTV_WIDTH) + 4 * slot_stride(MAX_HDTV_WIDTH / 2);
        let output = slot_stride(2 * MAX_HDTV_WIDTH) + 2 * slot_stride(MAX_HDTV_WIDTH / 2);
        2 * input + 2 * output
    }

    fn process(&self, env: &KernelEnv, params: EffectiveAddress) -> Result<(), KernelError> {
        let p: ScaleParams = env.fetch_params(params)?;
        let geometry = Geometry::from_params(&p);
        trace!(
            src_width = p.src_width,
            src_height = p.src_height,
            dst_width = p.dst_width,
            dst_height = p.dst_height,
            "Scale request"
        );
        if geometry.luma.src_w == 0
            || geometry.luma.src_h == 0
            || geometry.luma.dst_w == 0
            || geometry.luma.dst_h < 2
        {
            return Ok(());
        }

        let store = env.local_store();
        let mut inputs = StagingRing::new(vec![
            store.alloc(geometry.input_capacity())?,
            store.alloc(geometry.input_capacity())?,
        ]);
        let mut outputs = StagingRing::new(vec![
            store.alloc(geometry.output_capacity())?,
            store.alloc(geometry.output_capacity())?,
        ]);

        let luma_columns = ColumnMap::new(geometry.luma.src_w, geometry.luma.dst_w, geometry.x_scale);
        let chroma_columns =
            ColumnMap::new(geometry.chroma.src_w, geometry.chroma.dst_w, geometry.x_scale);
        let luma_lanes = VectorWidth::for_width(geometry.luma.dst_w);
        let chroma_lanes = VectorWidth::for_width(geometry.chroma.dst_w);

        let pairs = geometry.luma.dst_h / 2;
        let mut layouts = [PairLayout::default(); 2];
        layouts[0] = fetch_pair(env, &geometry, &mut inputs, 0, 0)?;
        for pair in 0..pairs {
            let slot = pair % 2;
            let input = inputs.acquire(slot)?;
            if pair + 1 < pairs {
                layouts[1 - slot] = fetch_pair(env, &geometry, &mut inputs, 1 - slot, pair + 1)?;
            }

            let layout = layouts[slot];
            let mut output = outputs.acquire(slot)?;
            let out = geometry.output_layout(pair);
            let (sw, dw) = (geometry.luma.src_w, geometry.luma.dst_w);
            for half in 0..2 {
                let north = &input[layout.luma[2 * half]..layout.luma[2 * half] + sw];
                let south = &input[layout.luma[2 * half + 1]..layout.luma[2 * half + 1] + sw];
                let at = out.luma + half * dw;
                interpolate_row(
                    luma_lanes,
                    north,
                    south,
                    layout.luma_weight[half],
                    &luma_columns,
                    &mut output[at..at + dw],
                );
            }

            let (csw, cdw) = (geometry.chroma.src_w, geometry.chroma.dst_w);
            if cdw > 0 {
                for (rows, at) in [(layout.v, out.v), (layout.u, out.u)] {
                    let north = &input[rows[0]..rows[0] + csw];
                    let south = &input[rows[1]..rows[1] + csw];
                    interpolate_row(
                        chroma_lanes,
                        north,
                        south,
                        layout.chroma_weight,
                        &chroma_columns,
                        &mut output[at..at + cdw],
                    );
                }
            }

            let mut list = DmaList::new();
            list.push(out.luma, out.luma_ea, 2 * dw);
            if cdw > 0 {
                list.push(out.v, out.v_ea, cdw);
                list.push(out.u, out.u_ea, cdw);
            }
            let transfer = env.dma().put(STORE_TAGS[slot], output, list)?;
            outputs.release(slot, Staged::InFlight(transfer));
            inputs.release(slot, Staged::Ready(input));
        }

        outputs.drain()?;
        Ok(())
    }
}

/// Source and destination extent of one plane
#[derive(Debug, Clone, Copy)]
struct Plane {
    src: EffectiveAddress,
    src_w: usize,
    src_h: usize,
    dst: EffectiveAddress,
    dst_w: usize,
    dst_h: usize,
}

struct Geometry {
    luma: Plane,
    chroma: Plane,
    v_src: EffectiveAddress,
    u_src: EffectiveAddress,
    v_dst: EffectiveAddress,
    u_dst: EffectiveAddress,
    x_scale: f32,
    y_scale: f32,
}

impl Geometry {
    fn from_params(p: &ScaleParams) -> Self {
        let (sw, sh) = (p.src_width as usize, p.src_height as usize);
        let (dw, dh) = (p.dst_width as usize, p.dst_height as usize);
        let dst = EffectiveAddress(p.dst);
        let v_dst = dst.offset(dw * dh);
        Self {
            luma: Plane {
                src: EffectiveAddress(p.y_plane),
                src_w: sw,
                src_h: sh,
                dst,
                dst_w: dw,
                dst_h: dh,
            },
            chroma: Plane {
                src: EffectiveAddress(p.v_plane),
                src_w: (sw / 2).max(1),
                src_h: (sh / 2).max(1),
                dst: v_dst,
                dst_w: dw / 2,
                dst_h: dh / 2,
            },
            v_src: EffectiveAddress(p.v_plane),
            u_src: EffectiveAddress(p.u_plane),
            v_dst,
            u_dst: v_dst.offset(dw * dh / 4),
            x_scale: sw as f32 / dw.max(1) as f32,
            y_scale: sh as f32 / dh.max(1) as f32,
        }
    }

    fn input_capacity(&self) -> usize {
        4 * slot_stride(self.luma.src_w) + 4 * slot_stride(self.chroma.src_w)
    }

    fn output_capacity(&self) -> usize {
        slot_stride(2 * self.luma.dst_w) + 2 * slot_stride(self.chroma.dst_w)
    }

    fn output_layout(&self, pair: usize) -> OutputLayout {
        let luma_ea = self.luma.dst.offset(2 * pair * self.luma.dst_w);
        let v_ea = self.v_dst.offset(pair * self.chroma.dst_w);
        let u_ea = self.u_dst.offset(pair * self.chroma.dst_w);
        let chroma_base = slot_stride(2 * self.luma.dst_w);
        let chroma_stride = slot_stride(self.chroma.dst_w);
        OutputLayout {
            luma: aligned_offset(0, luma_ea),
            v: aligned_offset(chroma_base, v_ea),
            u: aligned_offset(chroma_base + chroma_stride, u_ea),
            luma_ea,
            v_ea,
            u_ea,
        }
    }
}

/// Source row index and north-south weight for destination row `dst_row`
fn source_row(dst_row: usize, scale: f32, src_len: usize) -> (usize, usize, f32) {
    let position = dst_row as f32 * scale;
    let north = (position as usize).min(src_len - 1);
    let weight = position - position.trunc();
    (north, (north + 1).min(src_len - 1), weight)
}

/// Per-column source indices and east-west weights, computed once per request
struct ColumnMap {
    west: Vec<usize>,
    east: Vec<usize>,
    weight: Vec<f32>,
}

impl ColumnMap {
    fn new(src_w: usize, dst_w: usize, scale: f32) -> Self {
        let last = src_w.saturating_sub(1);
        let mut map = Self {
            west: Vec::with_capacity(dst_w),
            east: Vec::with_capacity(dst_w),
            weight: Vec::with_capacity(dst_w),
        };
        for x in 0..dst_w {
            let position = x as f32 * scale;
            let west = (position as usize).min(last);
            map.west.push(west);
            map.east.push((west + 1).min(last));
            map.weight.push(position - position.trunc());
        }
        map
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct PairLayout {
    /// North and south rows for each of the two destination luma rows
    luma: [usize; 4],
    luma_weight: [f32; 2],
    v: [usize; 2],
    u: [usize; 2],
    chroma_weight: f32,
}

struct OutputLayout {
    luma: usize,
    v: usize,
    u: usize,
    luma_ea: EffectiveAddress,
    v_ea: EffectiveAddress,
    u_ea: EffectiveAddress,
}

fn fetch_pair(
    env: &KernelEnv,
    geometry: &Geometry,
    inputs: &mut StagingRing,
    slot: usize,
    pair: usize,
) -> Result<PairLayout, KernelError> {
    let mut layout = PairLayout::default();
    let mut list = DmaList::new();
    let luma = &geometry.luma;
    let luma_stride = slot_stride(luma.src_w);

    for half in 0..2 {
        let (north, south, weight) = source_row(2 * pair + half, geometry.y_scale, luma.src_h);
        layout.luma_weight[half] = weight;
        for (i, row) in [north, south].into_iter().enumerate() {
            let index = 2 * half + i;
            let ea = luma.src.offset(row * luma.src_w);
            layout.luma[index] = aligned_offset(index * luma_stride, ea);
            list.push(layout.luma[index], ea, luma.src_w);
        }
    }

    let chroma = &geometry.chroma;
    let (north, south, weight) = source_row(pair, geometry.y_scale, chroma.src_h);
    layout.chroma_weight = weight;
    let chroma_base = 4 * luma_stride;
    let chroma_stride = slot_stride(chroma.src_w);
    for (i, row) in [north, south].into_iter().enumerate() {
        let v = geometry.v_src.offset(row * chroma.src_w);
        let u = geometry.u_src.offset(row * chroma.src_w);
        layout.v[i] = aligned_offset(chroma_base + i * chroma_stride, v);
        layout.u[i] = aligned_offset(chroma_base + (2 + i) * chroma_stride, u);
        list.push(layout.v[i], v, chroma.src_w);
        list.push(layout.u[i], u, chroma.src_w);
    }

    let buffer = inputs.acquire(slot)?;
    let transfer = env.dma().get(FETCH_TAGS[slot], buffer, list)?;
    inputs.release(slot, Staged::InFlight(transfer));
    Ok(layout)
}

fn interpolate_row(
    lanes: VectorWidth,
    north: &[u8],
    south: &[u8],
    ns_weight: f32,
    columns: &ColumnMap,
    out: &mut [u8],
) {
    match lanes {
        VectorWidth::W32 => interpolate_lanes::<32>(north, south, ns_weight, columns, out),
        VectorWidth::W16 => interpolate_lanes::<16>(north, south, ns_weight, columns, out),
        VectorWidth::Scalar => interpolate_lanes::<1>(north, south, ns_weight, columns, out),
    }
}

fn interpolate_lanes<const N: usize>(
    north: &[u8],
    south: &[u8],
    ns_weight: f32,
    columns: &ColumnMap,
    out: &mut [u8],
) {
    let width = out.len();
    let full = width - width % N;
    for x in (0..full).step_by(N) {
        interpolate_chunk::<N>(x, north, south, ns_weight, columns, out);
    }
    for x in full..width {
        interpolate_chunk::<1>(x, north, south, ns_weight, columns, out);
    }
}

#[inline]
fn interpolate_chunk<const N: usize>(
    x0: usize,
    north: &[u8],
    south: &[u8],
    ns_weight: f32,
    columns: &ColumnMap,
    out: &mut [u8],
) {
    let west = &columns.west[x0..x0 + N];
    let east = &columns.east[x0..x0 + N];
    let nw: [f32; N] = std::array::from_fn(|i| north[west[i]] as f32);
    let ne: [f32; N] = std::array::from_fn(|i| north[east[i]] as f32);
    let sw: [f32; N] = std::array::from_fn(|i| south[west[i]] as f32);
    let se: [f32; N] = std::array::from_fn(|i| south[east[i]] as f32);
    let ew: [f32; N] = std::array::from_fn(|i| columns.weight[x0 + i]);

    let top = lerp_lanes(&nw, &ne, &ew);
    let bottom = lerp_lanes(&sw, &se, &ew);
    let result = saturate_lanes(&lerp_lanes_uniform(&top, &bottom, ns_weight));
    out[x0..x0 + N].copy_from_slice(&result);
}
