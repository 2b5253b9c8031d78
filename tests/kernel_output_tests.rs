// SPDX-License-Identifier: MPL-2.0

//! Integration tests checking kernel output through real coprocessor jobs

use spu_video::Config;
use spu_video::coprocessor::{CoprocessorJob, CoprocessorSystem, HostBuffer, ProgramImage};
use spu_video::kernels::{ConvertParams, ScaleParams};

fn pattern(len: usize, mul: usize, add: usize) -> Vec<u8> {
    (0..len).map(|i| ((i * mul + add) % 256) as u8).collect()
}

fn upload(system: &CoprocessorSystem, data: &[u8]) -> HostBuffer {
    let buffer = system.memory().alloc(data.len()).unwrap();
    buffer.write_at(0, data).unwrap();
    buffer
}

/// Reference BGRA conversion of one pixel
fn bgra(y: u8, u: u8, v: u8) -> [u8; 4] {
    let luma = y as f32;
    let cb = u as f32 - 128.0;
    let cr = v as f32 - 128.0;
    let r = (luma + 1.403 * cr) as u8;
    let g = (luma - (0.344 * cb + 0.714 * cr)) as u8;
    let b = (luma + 1.773 * cb) as u8;
    [b, g, r, 255]
}

/// Reference bilinear resample of one plane with the kernel's coordinate mapping
fn resample(
    src: &[u8],
    (sw, sh): (usize, usize),
    (dw, dh): (usize, usize),
    (x_scale, y_scale): (f32, f32),
) -> Vec<u8> {
    let mut out = Vec::with_capacity(dw * dh);
    for row in 0..dh {
        let py = row as f32 * y_scale;
        let north = (py as usize).min(sh - 1);
        let south = (north + 1).min(sh - 1);
        let wy = py - py.trunc();
        for col in 0..dw {
            let px = col as f32 * x_scale;
            let west = (px as usize).min(sw - 1);
            let east = (west + 1).min(sw - 1);
            let wx = px - px.trunc();
            let at = |r: usize, c: usize| src[r * sw + c] as f32;
            let top = at(north, west) + wx * (at(north, east) - at(north, west));
            let bottom = at(south, west) + wx * (at(south, east) - at(south, west));
            out.push((top + wy * (bottom - top)) as u8);
        }
    }
    out
}

#[test]
fn test_converter_handles_partial_last_group() {
    // 48 wide takes the 16-lane path; 7 rows leave a 3-row last group
    let (w, h) = (48usize, 7usize);
    let (cw, ch) = (w / 2, h / 2);
    let system = CoprocessorSystem::from_config(&Config::default());
    let y = pattern(w * h, 7, 16);
    let v = pattern(cw * ch, 13, 60);
    let u = pattern(cw * ch, 29, 90);
    let y_plane = upload(&system, &y);
    let v_plane = upload(&system, &v);
    let u_plane = upload(&system, &u);
    let dst = system.memory().alloc(w * h * 4).unwrap();

    let params = system
        .memory()
        .alloc_pod(&ConvertParams::new(
            y_plane.addr().as_u64(),
            v_plane.addr().as_u64(),
            u_plane.addr().as_u64(),
            dst.addr().as_u64(),
            w as u32,
            h as u32,
        ))
        .unwrap();
    let mut job = CoprocessorJob::new(&system, "yuv2rgb", ProgramImage::yuv2rgb(), false);
    job.run_once(params.addr()).unwrap();

    let out = dst.to_vec().unwrap();
    for row in 0..h {
        let crow = (row / 2).min(ch - 1);
        for col in 0..w {
            let c = crow * cw + col / 2;
            let expected = bgra(y[row * w + col], u[c], v[c]);
            let at = (row * w + col) * 4;
            assert_eq!(out[at..at + 4], expected, "pixel {},{}", col, row);
        }
    }
}

#[test]
fn test_scaler_resamples_non_uniform_ratio() {
    let (sw, sh) = (20usize, 10usize);
    let (dw, dh) = (48usize, 6usize);
    let system = CoprocessorSystem::from_config(&Config::default());
    let y = pattern(sw * sh, 37, 3);
    let v = pattern(sw * sh / 4, 23, 40);
    let u = pattern(sw * sh / 4, 11, 200);
    let y_plane = upload(&system, &y);
    let v_plane = upload(&system, &v);
    let u_plane = upload(&system, &u);
    let dst = system.memory().alloc(dw * dh * 3 / 2).unwrap();

    let params = system
        .memory()
        .alloc_pod(&ScaleParams::new(
            y_plane.addr().as_u64(),
            v_plane.addr().as_u64(),
            u_plane.addr().as_u64(),
            dst.addr().as_u64(),
            (sw as u32, sh as u32),
            (dw as u32, dh as u32),
        ))
        .unwrap();
    let mut job = CoprocessorJob::new(&system, "scaler", ProgramImage::bilinear_scaler(), false);
    job.run_once(params.addr()).unwrap();

    let scales = (sw as f32 / dw as f32, sh as f32 / dh as f32);
    let out = dst.to_vec().unwrap();
    let luma = dw * dh;
    let chroma = luma / 4;
    assert_eq!(&out[..luma], &resample(&y, (sw, sh), (dw, dh), scales)[..]);
    assert_eq!(
        &out[luma..luma + chroma],
        &resample(&v, (sw / 2, sh / 2), (dw / 2, dh / 2), scales)[..]
    );
    assert_eq!(
        &out[luma + chroma..],
        &resample(&u, (sw / 2, sh / 2), (dw / 2, dh / 2), scales)[..]
    );
}
