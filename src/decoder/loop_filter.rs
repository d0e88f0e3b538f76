//! In-loop deblocking filters from RFC 6386 section 15.
//!
//! Every function works on a flat plane. `pos` indexes the first pixel past
//! the edge (`q0`) and `step` is the distance between successive taps across
//! the edge: 1 for vertical edges, the plane stride for horizontal ones.

#![allow(clippy::too_many_arguments)]

#[inline]
fn clamp_i8(v: i32) -> i32 {
    v.clamp(-128, 127)
}

#[inline]
fn clamp_u8(v: i32) -> u8 {
    v.clamp(0, 255) as u8
}

#[inline]
fn taps(buf: &[u8], pos: usize, step: usize) -> [i32; 8] {
    [
        i32::from(buf[pos - 4 * step]),
        i32::from(buf[pos - 3 * step]),
        i32::from(buf[pos - 2 * step]),
        i32::from(buf[pos - step]),
        i32::from(buf[pos]),
        i32::from(buf[pos + step]),
        i32::from(buf[pos + 2 * step]),
        i32::from(buf[pos + 3 * step]),
    ]
}

/// Edge activity test shared by both filter types. `limit2` is `2 * limit + 1`.
#[inline]
fn needs_filter(p1: i32, p0: i32, q0: i32, q1: i32, limit2: i32) -> bool {
    4 * (p0 - q0).abs() + (p1 - q1).abs() <= limit2
}

#[inline]
fn needs_filter_normal(t: &[i32; 8], limit2: i32, interior: i32) -> bool {
    let [p3, p2, p1, p0, q0, q1, q2, q3] = *t;
    needs_filter(p1, p0, q0, q1, limit2)
        && (p3 - p2).abs() <= interior
        && (p2 - p1).abs() <= interior
        && (p1 - p0).abs() <= interior
        && (q3 - q2).abs() <= interior
        && (q2 - q1).abs() <= interior
        && (q1 - q0).abs() <= interior
}

#[inline]
fn high_edge_variance(t: &[i32; 8], thresh: i32) -> bool {
    (t[2] - t[3]).abs() > thresh || (t[5] - t[4]).abs() > thresh
}

/// Adjusts `p0` and `q0` only.
#[inline]
fn filter2(buf: &mut [u8], pos: usize, step: usize) {
    let p1 = i32::from(buf[pos - 2 * step]);
    let p0 = i32::from(buf[pos - step]);
    let q0 = i32::from(buf[pos]);
    let q1 = i32::from(buf[pos + step]);
    let a = 3 * (q0 - p0) + clamp_i8(p1 - q1);
    let a1 = clamp_i8(a + 4) >> 3;
    let a2 = clamp_i8(a + 3) >> 3;
    buf[pos - step] = clamp_u8(p0 + a2);
    buf[pos] = clamp_u8(q0 - a1);
}

/// Inner-edge filter adjusting two pixels on each side.
#[inline]
fn filter4(buf: &mut [u8], pos: usize, step: usize) {
    let p1 = i32::from(buf[pos - 2 * step]);
    let p0 = i32::from(buf[pos - step]);
    let q0 = i32::from(buf[pos]);
    let q1 = i32::from(buf[pos + step]);
    let a = 3 * (q0 - p0);
    let a1 = clamp_i8(a + 4) >> 3;
    let a2 = clamp_i8(a + 3) >> 3;
    let a3 = (a1 + 1) >> 1;
    buf[pos - 2 * step] = clamp_u8(p1 + a3);
    buf[pos - step] = clamp_u8(p0 + a2);
    buf[pos] = clamp_u8(q0 - a1);
    buf[pos + step] = clamp_u8(q1 - a3);
}

/// Macroblock-edge filter adjusting three pixels on each side.
#[inline]
fn filter6(buf: &mut [u8], pos: usize, step: usize) {
    let p2 = i32::from(buf[pos - 3 * step]);
    let p1 = i32::from(buf[pos - 2 * step]);
    let p0 = i32::from(buf[pos - step]);
    let q0 = i32::from(buf[pos]);
    let q1 = i32::from(buf[pos + step]);
    let q2 = i32::from(buf[pos + 2 * step]);
    let a = clamp_i8(3 * (q0 - p0) + clamp_i8(p1 - q1));
    let a1 = (27 * a + 63) >> 7;
    let a2 = (18 * a + 63) >> 7;
    let a3 = (9 * a + 63) >> 7;
    buf[pos - 3 * step] = clamp_u8(p2 + a3);
    buf[pos - 2 * step] = clamp_u8(p1 + a2);
    buf[pos - step] = clamp_u8(p0 + a1);
    buf[pos] = clamp_u8(q0 - a1);
    buf[pos + step] = clamp_u8(q1 - a2);
    buf[pos + 2 * step] = clamp_u8(q2 - a3);
}

/// Simple filter along one edge of `len` pixels. `advance` moves along the edge.
pub(crate) fn simple_edge(
    buf: &mut [u8],
    mut pos: usize,
    step: usize,
    advance: usize,
    len: usize,
    limit: u8,
) {
    let limit2 = 2 * i32::from(limit) + 1;
    for _ in 0..len {
        let p1 = i32::from(buf[pos - 2 * step]);
        let p0 = i32::from(buf[pos - step]);
        let q0 = i32::from(buf[pos]);
        let q1 = i32::from(buf[pos + step]);
        if needs_filter(p1, p0, q0, q1, limit2) {
            filter2(buf, pos, step);
        }
        pos += advance;
    }
}

/// Normal filter along a macroblock edge.
pub(crate) fn macroblock_edge(
    buf: &mut [u8],
    mut pos: usize,
    step: usize,
    advance: usize,
    len: usize,
    limit: u8,
    interior_limit: u8,
    hev_thresh: u8,
) {
    let limit2 = 2 * i32::from(limit) + 1;
    for _ in 0..len {
        let t = taps(buf, pos, step);
        if needs_filter_normal(&t, limit2, i32::from(interior_limit)) {
            if high_edge_variance(&t, i32::from(hev_thresh)) {
                filter2(buf, pos, step);
            } else {
                filter6(buf, pos, step);
            }
        }
        pos += advance;
    }
}

/// Normal filter along an inner 4x4 edge.
pub(crate) fn subblock_edge(
    buf: &mut [u8],
    mut pos: usize,
    step: usize,
    advance: usize,
    len: usize,
    limit: u8,
    interior_limit: u8,
    hev_thresh: u8,
) {
    let limit2 = 2 * i32::from(limit) + 1;
    for _ in 0..len {
        let t = taps(buf, pos, step);
        if needs_filter_normal(&t, limit2, i32::from(interior_limit)) {
            if high_edge_variance(&t, i32::from(hev_thresh)) {
                filter2(buf, pos, step);
            } else {
                filter4(buf, pos, step);
            }
        }
        pos += advance;
    }
}
