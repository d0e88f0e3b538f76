//! YUV 4:2:0 to BGRA conversion.
//!
//! Luma maps one to one onto output pixels, but each chroma sample covers a
//! 2x2 block. Simple upsampling repeats the sample over its block. Fancy
//! upsampling, the default, interpolates each output chroma value from the
//! four nearest samples with weights 9:3:3:1, rounding twice the way libwebp
//! does so that output matches it bit for bit.
//!
//! The colour conversion is the 14-bit fixed point BT.601 one from libwebp's
//! `src/dsp/yuv.h`.

use alloc::vec;

/// Borrowed views of the three planes of a frame.
pub(crate) struct Planes<'a> {
    pub(crate) y: &'a [u8],
    pub(crate) u: &'a [u8],
    pub(crate) v: &'a [u8],
    pub(crate) y_stride: usize,
    pub(crate) uv_stride: usize,
}

/// `_mm_mulhi_epu16` emulation
#[inline]
fn mulhi(v: u8, coeff: u16) -> i32 {
    ((u32::from(v) * u32::from(coeff)) >> 8) as i32
}

#[inline]
fn clip(v: i32) -> u8 {
    const YUV_FIX2: i32 = 6;
    (v >> YUV_FIX2).clamp(0, 255) as u8
}

#[inline(always)]
fn yuv_to_r(y: u8, v: u8) -> u8 {
    clip(mulhi(y, 19077) + mulhi(v, 26149) - 14234)
}

#[inline(always)]
fn yuv_to_g(y: u8, u: u8, v: u8) -> u8 {
    clip(mulhi(y, 19077) - mulhi(u, 6419) - mulhi(v, 13320) + 8708)
}

#[inline(always)]
fn yuv_to_b(y: u8, u: u8) -> u8 {
    clip(mulhi(y, 19077) + mulhi(u, 33050) - 17685)
}

#[inline]
fn set_pixel(bgra: &mut [u8], y: u8, u: u8, v: u8) {
    bgra[0] = yuv_to_b(y, u);
    bgra[1] = yuv_to_g(y, u, v);
    bgra[2] = yuv_to_r(y, v);
    bgra[3] = 0xff;
}

/// Second-stage average for an output sample whose nearest chroma sample is
/// `a`, horizontal neighbour `b`, vertical neighbour `c` and diagonal `d`.
#[inline]
fn fancy(a: u8, b: u8, c: u8, d: u8) -> u8 {
    let [a, b, c, d] = [a, b, c, d].map(u32::from);
    let diag = (a + 3 * b + 3 * c + d + 8) >> 3;
    ((diag + a) >> 1) as u8
}

#[inline]
fn edge(near: u8, far: u8) -> u8 {
    ((3 * u32::from(near) + u32::from(far) + 2) >> 2) as u8
}

/// Upsamples one chroma row to `out.len()` samples. `near` is the chroma row
/// that covers the output row and `far` the one on the other side of it.
fn upsample_row(near: &[u8], far: &[u8], out: &mut [u8]) {
    let width = out.len();
    out[0] = edge(near[0], far[0]);

    for x in 1..=(width - 1) / 2 {
        out[2 * x - 1] = fancy(near[x - 1], near[x], far[x - 1], far[x]);
        out[2 * x] = fancy(near[x], near[x - 1], far[x], far[x - 1]);
    }

    if width % 2 == 0 {
        let last = width / 2 - 1;
        out[width - 1] = edge(near[last], far[last]);
    }
}

/// Chroma rows `(near, far)` used for output row `y`.
#[inline]
fn chroma_rows(y: usize, chroma_height: usize) -> (usize, usize) {
    let near = y / 2;
    let far = if y == 0 {
        0
    } else if y % 2 == 1 {
        (near + 1).min(chroma_height - 1)
    } else {
        near - 1
    };
    (near, far)
}

#[inline]
fn chroma_line(plane: &[u8], stride: usize, row: usize, len: usize) -> &[u8] {
    &plane[row * stride..][..len]
}

/// Fills `buf` with `width * height` BGRA pixels using fancy upsampling.
pub(crate) fn fill_bgra_fancy(buf: &mut [u8], planes: &Planes<'_>, width: usize, height: usize) {
    let chroma_width = width.div_ceil(2);
    let chroma_height = height.div_ceil(2);
    let chroma_row = |plane, row| chroma_line(plane, planes.uv_stride, row, chroma_width);

    let mut u_row = vec![0u8; width];
    let mut v_row = vec![0u8; width];

    for (y, out) in buf.chunks_exact_mut(width * 4).take(height).enumerate() {
        let (near, far) = chroma_rows(y, chroma_height);
        upsample_row(chroma_row(planes.u, near), chroma_row(planes.u, far), &mut u_row);
        upsample_row(chroma_row(planes.v, near), chroma_row(planes.v, far), &mut v_row);

        let y_row = &planes.y[y * planes.y_stride..][..width];
        for (((bgra, &luma), &u), &v) in out
            .chunks_exact_mut(4)
            .zip(y_row)
            .zip(u_row.iter())
            .zip(v_row.iter())
        {
            set_pixel(bgra, luma, u, v);
        }
    }
}

/// Fills `buf` with `width * height` BGRA pixels, repeating each chroma
/// sample over its 2x2 block.
pub(crate) fn fill_bgra_simple(buf: &mut [u8], planes: &Planes<'_>, width: usize, height: usize) {
    for (y, out) in buf.chunks_exact_mut(width * 4).take(height).enumerate() {
        let y_row = &planes.y[y * planes.y_stride..][..width];
        let u_row = &planes.u[(y / 2) * planes.uv_stride..];
        let v_row = &planes.v[(y / 2) * planes.uv_stride..];
        for (x, (bgra, &luma)) in out.chunks_exact_mut(4).zip(y_row).enumerate() {
            set_pixel(bgra, luma, u_row[x / 2], v_row[x / 2]);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::vec::Vec;

    fn upsample_plane(plane: &[u8], stride: usize, width: usize, height: usize) -> Vec<Vec<u8>> {
        let chroma_height = height.div_ceil(2);
        (0..height)
            .map(|y| {
                let (near, far) = chroma_rows(y, chroma_height);
                let mut out = vec![0u8; width];
                upsample_row(&plane[near * stride..], &plane[far * stride..], &mut out);
                out
            })
            .collect()
    }

    #[test]
    fn test_fancy_grid() {
        let u = [34, 101, 123, 163];
        let v = [97, 167, 149, 23];
        assert_eq!(
            upsample_plane(&u, 2, 4, 4),
            [
                [34, 51, 84, 101],
                [56, 71, 101, 117],
                [101, 112, 136, 148],
                [123, 133, 153, 163],
            ]
        );
        assert_eq!(
            upsample_plane(&v, 2, 4, 4),
            [
                [97, 115, 150, 167],
                [110, 115, 126, 131],
                [136, 117, 78, 59],
                [149, 118, 55, 23],
            ]
        );
    }

    #[test]
    fn fancy_odd_dimensions() {
        let u = [10, 200, 50, 90, 30, 250];
        assert_eq!(
            upsample_plane(&u, 3, 5, 3),
            [
                [10, 58, 153, 163, 88],
                [30, 62, 126, 143, 114],
                [70, 71, 72, 104, 168],
            ]
        );
    }

    #[test]
    fn chroma_row_mapping() {
        assert_eq!(chroma_rows(0, 2), (0, 0));
        assert_eq!(chroma_rows(1, 2), (0, 1));
        assert_eq!(chroma_rows(2, 2), (1, 0));
        // Last row of an even-height image has nothing below it.
        assert_eq!(chroma_rows(3, 2), (1, 1));
    }

    #[test]
    fn test_yuv_conversions() {
        let (y, u, v) = (203, 40, 42);

        assert_eq!(yuv_to_r(y, v), 80);
        assert_eq!(yuv_to_g(y, u, v), 255);
        assert_eq!(yuv_to_b(y, u), 40);
    }

    #[test]
    fn mid_grey() {
        let mut px = [0u8; 4];
        set_pixel(&mut px, 128, 128, 128);
        assert_eq!(px, [130, 130, 130, 255]);
    }

    #[test]
    fn simple_repeats_chroma_and_respects_strides() {
        // 3x2 image in planes padded to a 16 pixel stride.
        let mut y = [0u8; 32];
        y[..3].copy_from_slice(&[128, 128, 128]);
        y[16..19].copy_from_slice(&[128, 128, 128]);
        let mut u = [128u8; 8];
        let v = [128u8; 8];
        u[1] = 0;
        let planes = Planes {
            y: &y,
            u: &u,
            v: &v,
            y_stride: 16,
            uv_stride: 8,
        };
        let mut buf = [0u8; 3 * 2 * 4];
        fill_bgra_simple(&mut buf, &planes, 3, 2);
        for row in buf.chunks_exact(12) {
            assert_eq!(&row[..8], &[130, 130, 130, 255, 130, 130, 130, 255]);
            assert_ne!(&row[8..], &[130, 130, 130, 255]);
        }

        let mut fancy = [0u8; 3 * 2 * 4];
        fill_bgra_fancy(&mut fancy, &planes, 3, 2);
        assert_eq!(&fancy[..4], &[130, 130, 130, 255]);
        assert!(fancy.chunks_exact(4).all(|px| px[3] == 255));
    }
}
