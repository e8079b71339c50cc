// SPDX-License-Identifier: GPL-3.0-only

//! Host-side pixel format conversion
//!
//! Reference implementations of the conversion kernels, bit-exact with the
//! WGSL compute shader, plus the inverse encoders the simulated driver uses
//! to produce raw test patterns.
//!
//! All YCbCr math is integer BT.601 limited range:
//! ```text
//! C = Y - 16, D = Cb - 128, E = Cr - 128
//! R = (298C + 409E + 128) >> 8
//! G = (298C - 100D - 208E + 128) >> 8
//! B = (298C + 516D + 128) >> 8
//! ```
//! The 10-bit variant uses offsets 64/512 and rounds with 512 >> 10.

use super::types::{LinkLayout, PixelFormat};
use crate::constants::SQD_ROW_HEADER_BYTES;

#[inline]
fn clamp8(value: i32) -> u8 {
    value.clamp(0, 255) as u8
}

/// Convert one 8-bit YCbCr sample to RGB
#[inline]
pub fn ycbcr_to_rgb(y: u8, cb: u8, cr: u8) -> [u8; 3] {
    let c = y as i32 - 16;
    let d = cb as i32 - 128;
    let e = cr as i32 - 128;
    [
        clamp8((298 * c + 409 * e + 128) >> 8),
        clamp8((298 * c - 100 * d - 208 * e + 128) >> 8),
        clamp8((298 * c + 516 * d + 128) >> 8),
    ]
}

/// Convert one 10-bit YCbCr sample to 8-bit RGB
#[inline]
pub fn ycbcr10_to_rgb(y: u16, cb: u16, cr: u16) -> [u8; 3] {
    let c = y as i32 - 64;
    let d = cb as i32 - 512;
    let e = cr as i32 - 512;
    [
        clamp8((298 * c + 409 * e + 512) >> 10),
        clamp8((298 * c - 100 * d - 208 * e + 512) >> 10),
        clamp8((298 * c + 516 * d + 512) >> 10),
    ]
}

/// Convert one RGB pixel to 8-bit YCbCr
#[inline]
pub fn rgb_to_ycbcr(rgb: [u8; 3]) -> [u8; 3] {
    let r = rgb[0] as i32;
    let g = rgb[1] as i32;
    let b = rgb[2] as i32;
    [
        clamp8(((66 * r + 129 * g + 25 * b + 128) >> 8) + 16),
        clamp8(((-38 * r - 74 * g + 112 * b + 128) >> 8) + 128),
        clamp8(((112 * r - 94 * g - 18 * b + 128) >> 8) + 128),
    ]
}

/// Unpack one Y210 pixel pair into `[Y0, Cb, Y1, Cr]`
///
/// Five bytes carry four 10-bit samples:
/// ```text
/// [Y0 9:2][Cb 9:2][Y1 9:2][Cr 9:2][Cr 1:0, Y1 1:0, Cb 1:0, Y0 1:0]
/// ```
#[inline]
pub fn unpack_y210_pair(bytes: &[u8]) -> [u16; 4] {
    let low = bytes[4] as u16;
    [
        ((bytes[0] as u16) << 2) | (low & 0x03),
        ((bytes[1] as u16) << 2) | ((low >> 2) & 0x03),
        ((bytes[2] as u16) << 2) | ((low >> 4) & 0x03),
        ((bytes[3] as u16) << 2) | ((low >> 6) & 0x03),
    ]
}

/// Pack `[Y0, Cb, Y1, Cr]` 10-bit samples into one Y210 pixel pair
#[inline]
pub fn pack_y210_pair(samples: [u16; 4]) -> [u8; 5] {
    let mut out = [0u8; 5];
    for (i, sample) in samples.iter().enumerate() {
        out[i] = (sample >> 2) as u8;
        out[4] |= ((sample & 0x03) as u8) << (2 * i);
    }
    out
}

/// Packed YUY2 to packed RGB24
pub fn yuy2_to_rgb24(
    src: &[u8],
    src_step: usize,
    dst: &mut [u8],
    dst_step: usize,
    width: u32,
    height: u32,
) {
    for row in 0..height as usize {
        let src_row = &src[row * src_step..];
        let dst_row = &mut dst[row * dst_step..];
        for x in 0..width as usize {
            let pair = &src_row[(x / 2) * 4..(x / 2) * 4 + 4];
            let y = pair[(x & 1) * 2];
            dst_row[x * 3..x * 3 + 3].copy_from_slice(&ycbcr_to_rgb(y, pair[1], pair[3]));
        }
    }
}

/// Reorder channels: output channel `i` takes source channel `order[i]`
#[allow(clippy::too_many_arguments)]
pub fn swap_channels(
    src: &[u8],
    src_step: usize,
    src_channels: usize,
    order: [u32; 3],
    dst: &mut [u8],
    dst_step: usize,
    width: u32,
    height: u32,
) {
    for row in 0..height as usize {
        let src_row = &src[row * src_step..];
        let dst_row = &mut dst[row * dst_step..];
        for x in 0..width as usize {
            let pixel = &src_row[x * src_channels..x * src_channels + src_channels];
            for (ch, &from) in order.iter().enumerate() {
                dst_row[x * 3 + ch] = pixel[from as usize];
            }
        }
    }
}

/// Packed Y210 to packed RGB24
pub fn y210_to_rgb24(
    src: &[u8],
    src_step: usize,
    dst: &mut [u8],
    dst_step: usize,
    width: u32,
    height: u32,
) {
    for row in 0..height as usize {
        let src_row = &src[row * src_step..];
        let dst_row = &mut dst[row * dst_step..];
        for x in 0..width as usize {
            let [y0, cb, y1, cr] = unpack_y210_pair(&src_row[(x / 2) * 5..(x / 2) * 5 + 5]);
            let y = if x & 1 == 0 { y0 } else { y1 };
            dst_row[x * 3..x * 3 + 3].copy_from_slice(&ycbcr10_to_rgb(y, cb, cr));
        }
    }
}

/// Source byte offset of output pixel `(x, y)` in a square-division frame
///
/// Quadrants are stored top-left, top-right, bottom-left, bottom-right,
/// each `height / 2` rows of `src_step` bytes.
#[inline]
pub fn quad_link_offset(
    x: usize,
    y: usize,
    width: usize,
    height: usize,
    src_step: usize,
    header: usize,
) -> usize {
    let (half_w, half_h) = (width / 2, height / 2);
    let quadrant = (y / half_h) * 2 + x / half_w;
    let src_row = quadrant * half_h + y % half_h;
    src_row * src_step + header + (x % half_w / 2) * 5
}

/// Square-division quad-link Y210 to packed RGB24
///
/// `width` must be a multiple of 4 and `height` a multiple of 2.
#[allow(clippy::too_many_arguments)]
pub fn y210_quad_link_to_rgb24(
    src: &[u8],
    src_step: usize,
    header: usize,
    dst: &mut [u8],
    dst_step: usize,
    width: u32,
    height: u32,
) {
    let (w, h) = (width as usize, height as usize);
    for y in 0..h {
        let dst_row = &mut dst[y * dst_step..];
        for x in 0..w {
            let base = quad_link_offset(x, y, w, h, src_step, header);
            let [y0, cb, y1, cr] = unpack_y210_pair(&src[base..base + 5]);
            let luma = if x & 1 == 0 { y0 } else { y1 };
            dst_row[x * 3..x * 3 + 3].copy_from_slice(&ycbcr10_to_rgb(luma, cb, cr));
        }
    }
}

/// Two-plane NV12 to packed RGB24; both planes share `src_step`
pub fn nv12_to_rgb24(
    luma: &[u8],
    chroma: &[u8],
    src_step: usize,
    dst: &mut [u8],
    dst_step: usize,
    width: u32,
    height: u32,
) {
    for row in 0..height as usize {
        let y_row = &luma[row * src_step..];
        let uv_row = &chroma[(row / 2) * src_step..];
        let dst_row = &mut dst[row * dst_step..];
        for x in 0..width as usize {
            let uv = (x / 2) * 2;
            dst_row[x * 3..x * 3 + 3]
                .copy_from_slice(&ycbcr_to_rgb(y_row[x], uv_row[uv], uv_row[uv + 1]));
        }
    }
}

/// Encode a packed RGB24 image as a raw single-link frame
///
/// Chroma is taken from the first pixel of each pair (or 2x2 block for NV12).
pub fn encode_rgb24(format: PixelFormat, rgb: &[u8], width: u32, height: u32) -> Vec<u8> {
    let w = width as usize;
    let h = height as usize;
    let pixel = |x: usize, y: usize| -> [u8; 3] {
        let i = (y * w + x) * 3;
        [rgb[i], rgb[i + 1], rgb[i + 2]]
    };

    match format {
        PixelFormat::Bgr24 => rgb
            .chunks_exact(3)
            .flat_map(|p| [p[2], p[1], p[0]])
            .collect(),
        PixelFormat::Yuy2 => {
            let mut out = Vec::with_capacity(w.div_ceil(2) * 4 * h);
            for y in 0..h {
                for x in (0..w).step_by(2) {
                    let [y0, cb, cr] = rgb_to_ycbcr(pixel(x, y));
                    let [y1, _, _] = rgb_to_ycbcr(pixel((x + 1).min(w - 1), y));
                    out.extend_from_slice(&[y0, cb, y1, cr]);
                }
            }
            out
        }
        PixelFormat::Y210 => {
            let mut out = Vec::with_capacity(w.div_ceil(2) * 5 * h);
            for y in 0..h {
                for x in (0..w).step_by(2) {
                    let [y0, cb, cr] = rgb_to_ycbcr(pixel(x, y));
                    let [y1, _, _] = rgb_to_ycbcr(pixel((x + 1).min(w - 1), y));
                    let samples = [y0, cb, y1, cr].map(|s| (s as u16) << 2);
                    out.extend_from_slice(&pack_y210_pair(samples));
                }
            }
            out
        }
        PixelFormat::Nv12 => {
            let step = w.next_multiple_of(2);
            let mut out = Vec::with_capacity(step * h + step * h.div_ceil(2));
            for y in 0..h {
                for x in 0..w {
                    out.push(rgb_to_ycbcr(pixel(x, y))[0]);
                }
                out.resize(out.len() + step - w, 0);
            }
            for y in (0..h).step_by(2) {
                for x in (0..w).step_by(2) {
                    let [_, cb, cr] = rgb_to_ycbcr(pixel(x, y));
                    out.extend_from_slice(&[cb, cr]);
                }
            }
            out
        }
    }
}

/// Encode a packed RGB24 image as a square-division quad-link Y210 frame
///
/// `header` fills the link header of each source row from its row index;
/// trailer bytes stay zero.
pub fn encode_y210_quad_link<F>(
    rgb: &[u8],
    width: u32,
    height: u32,
    mut header: F,
) -> Vec<u8>
where
    F: FnMut(usize) -> [u8; SQD_ROW_HEADER_BYTES],
{
    let (w, h) = (width as usize, height as usize);
    let step = PixelFormat::Y210.row_step(width, LinkLayout::QuadLink);
    let mut out = vec![0u8; PixelFormat::Y210.frame_size(width, height, LinkLayout::QuadLink)];
    for row in 0..h * 2 {
        out[row * step..row * step + SQD_ROW_HEADER_BYTES].copy_from_slice(&header(row));
    }
    for y in 0..h {
        for x in (0..w).step_by(2) {
            let i = (y * w + x) * 3;
            let [y0, cb, cr] = rgb_to_ycbcr([rgb[i], rgb[i + 1], rgb[i + 2]]);
            let [y1, _, _] = rgb_to_ycbcr([rgb[i + 3], rgb[i + 4], rgb[i + 5]]);
            let samples = [y0, cb, y1, cr].map(|s| (s as u16) << 2);
            let base = quad_link_offset(x, y, w, h, step, SQD_ROW_HEADER_BYTES);
            out[base..base + 5].copy_from_slice(&pack_y210_pair(samples));
        }
    }
    out
}
