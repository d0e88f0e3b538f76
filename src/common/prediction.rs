//! Intra prediction for VP8 key frames.
//!
//! Prediction runs on a small bordered workspace per macroblock: row 0 holds
//! the samples above the block (plus four above-right samples for luma),
//! column 0 holds the samples to the left, and position 0 the top-left corner.
//! The block itself starts at `(1, 1)`.

use super::types::{ChromaMode, IntraMode, LumaMode};

/// Luma workspace stride: 1 border pixel + 16 luma pixels + 4 top-right, padded.
pub(crate) const LUMA_STRIDE: usize = 32;
/// Luma workspace size: 17 rows (1 border + 16).
pub(crate) const LUMA_BLOCK_SIZE: usize = LUMA_STRIDE * (1 + 16);

/// Chroma workspace stride.
pub(crate) const CHROMA_STRIDE: usize = 32;
/// Chroma workspace size: 9 rows (1 border + 8).
pub(crate) const CHROMA_BLOCK_SIZE: usize = CHROMA_STRIDE * (8 + 1);

/// Value used for samples above the first macroblock row.
const TOP_BORDER: u8 = 127;
/// Value used for samples left of the first macroblock column.
const LEFT_BORDER: u8 = 129;

/// Loads the border samples around macroblock `(mbx, mby)` into a luma
/// workspace.
///
/// `top` is the bottom row of the macroblock row above, `mbw * 16` wide.
/// `left` holds the top-left corner followed by the 16 samples to the left.
pub(crate) fn update_border_luma(
    ws: &mut [u8; LUMA_BLOCK_SIZE],
    mbx: usize,
    mby: usize,
    mbw: usize,
    top: &[u8],
    left: &[u8; 17],
) {
    let stride = LUMA_STRIDE;

    if mby == 0 {
        ws[1..stride].fill(TOP_BORDER);
    } else {
        ws[1..17].copy_from_slice(&top[mbx * 16..][..16]);
        if mbx + 1 == mbw {
            // Nothing to the right: repeat the last sample above.
            let last = top[mbx * 16 + 15];
            ws[17..21].fill(last);
        } else {
            ws[17..21].copy_from_slice(&top[mbx * 16 + 16..][..4]);
        }
    }

    // Sub-blocks in the right column read their above-right samples from the
    // macroblock above, replicated on rows 4, 8 and 12.
    for row in [4, 8, 12] {
        ws.copy_within(17..21, row * stride + 17);
    }

    for y in 0..16 {
        ws[(y + 1) * stride] = if mbx == 0 { LEFT_BORDER } else { left[1 + y] };
    }

    ws[0] = corner(mbx, mby, left[0]);
}

/// Chroma counterpart of [`update_border_luma`], for one 8x8 plane.
pub(crate) fn update_border_chroma(
    ws: &mut [u8; CHROMA_BLOCK_SIZE],
    mbx: usize,
    mby: usize,
    top: &[u8],
    left: &[u8; 9],
) {
    let stride = CHROMA_STRIDE;

    if mby == 0 {
        ws[1..stride].fill(TOP_BORDER);
    } else {
        ws[1..9].copy_from_slice(&top[mbx * 8..][..8]);
    }

    for y in 0..8 {
        ws[(y + 1) * stride] = if mbx == 0 { LEFT_BORDER } else { left[1 + y] };
    }

    ws[0] = corner(mbx, mby, left[0]);
}

fn corner(mbx: usize, mby: usize, left_corner: u8) -> u8 {
    if mby == 0 {
        TOP_BORDER
    } else if mbx == 0 {
        LEFT_BORDER
    } else {
        left_corner
    }
}

/// Fills the 16x16 luma prediction of a whole-macroblock mode.
pub(crate) fn predict_luma16(ws: &mut [u8], mode: LumaMode, mbx: usize, mby: usize) {
    let stride = LUMA_STRIDE;
    match mode {
        LumaMode::DC => predict_dcpred(ws, 16, stride, mby != 0, mbx != 0),
        LumaMode::V => predict_vpred(ws, 16, 1, 1, stride),
        LumaMode::H => predict_hpred(ws, 16, 1, 1, stride),
        LumaMode::TM => predict_tmpred(ws, 16, 1, 1, stride),
        // Sub-blocks are predicted one at a time with `predict_subblock`.
        LumaMode::B => {}
    }
}

/// Fills an 8x8 chroma prediction.
pub(crate) fn predict_chroma8(ws: &mut [u8], mode: ChromaMode, mbx: usize, mby: usize) {
    let stride = CHROMA_STRIDE;
    match mode {
        ChromaMode::DC => predict_dcpred(ws, 8, stride, mby != 0, mbx != 0),
        ChromaMode::V => predict_vpred(ws, 8, 1, 1, stride),
        ChromaMode::H => predict_hpred(ws, 8, 1, 1, stride),
        ChromaMode::TM => predict_tmpred(ws, 8, 1, 1, stride),
    }
}

/// Fills the 4x4 prediction for the sub-block whose top-left pixel is `(x0, y0)`.
pub(crate) fn predict_subblock(a: &mut [u8], mode: IntraMode, x0: usize, y0: usize) {
    let stride = LUMA_STRIDE;
    match mode {
        IntraMode::DC => predict_bdcpred(a, x0, y0, stride),
        IntraMode::TM => predict_tmpred(a, 4, x0, y0, stride),
        IntraMode::VE => predict_bvepred(a, x0, y0, stride),
        IntraMode::HE => predict_bhepred(a, x0, y0, stride),
        IntraMode::LD => predict_bldpred(a, x0, y0, stride),
        IntraMode::RD => predict_brdpred(a, x0, y0, stride),
        IntraMode::VR => predict_bvrpred(a, x0, y0, stride),
        IntraMode::VL => predict_bvlpred(a, x0, y0, stride),
        IntraMode::HD => predict_bhdpred(a, x0, y0, stride),
        IntraMode::HU => predict_bhupred(a, x0, y0, stride),
    }
}

fn avg3(left: u8, this: u8, right: u8) -> u8 {
    ((u16::from(left) + 2 * u16::from(this) + u16::from(right) + 2) >> 2) as u8
}

fn avg2(this: u8, right: u8) -> u8 {
    ((u16::from(this) + u16::from(right) + 1) >> 1) as u8
}

fn predict_vpred(a: &mut [u8], size: usize, x0: usize, y0: usize, stride: usize) {
    let (above, below) = a.split_at_mut(stride * y0);
    let above = &above[(y0 - 1) * stride + x0..][..size];
    for row in below.chunks_exact_mut(stride).take(size) {
        row[x0..][..size].copy_from_slice(above);
    }
}

fn predict_hpred(a: &mut [u8], size: usize, x0: usize, y0: usize, stride: usize) {
    for row in a.chunks_exact_mut(stride).skip(y0).take(size) {
        let left = row[x0 - 1];
        row[x0..][..size].fill(left);
    }
}

/// DC prediction over the block at `(1, 1)`, averaging whichever edges exist.
fn predict_dcpred(a: &mut [u8], size: usize, stride: usize, above: bool, left: bool) {
    let mut sum = 0u32;
    let mut shift = if size == 8 { 2u32 } else { 3u32 };

    if left {
        sum += (0..size).map(|y| u32::from(a[(y + 1) * stride])).sum::<u32>();
        shift += 1;
    }
    if above {
        sum += a[1..=size].iter().map(|&v| u32::from(v)).sum::<u32>();
        shift += 1;
    }

    let dc = if !left && !above {
        128u8
    } else {
        ((sum + (1 << (shift - 1))) >> shift) as u8
    };

    for row in a.chunks_exact_mut(stride).skip(1).take(size) {
        row[1..=size].fill(dc);
    }
}

// X_ij = L_i + A_j - P, clamped (RFC 6386 section 12.2).
fn predict_tmpred(a: &mut [u8], size: usize, x0: usize, y0: usize, stride: usize) {
    let (above, block) = a.split_at_mut(y0 * stride);
    let p = i32::from(above[(y0 - 1) * stride + x0 - 1]);
    let above = &above[(y0 - 1) * stride + x0..][..size];

    for row in block.chunks_exact_mut(stride).take(size) {
        let left_minus_p = i32::from(row[x0 - 1]) - p;
        for (cur, &abv) in row[x0..][..size].iter_mut().zip(above) {
            *cur = (left_minus_p + i32::from(abv)).clamp(0, 255) as u8;
        }
    }
}

/// The eight samples above a sub-block, including the four above-right.
fn top_pixels(a: &[u8], x0: usize, y0: usize, stride: usize) -> [u8; 8] {
    let mut top = [0u8; 8];
    top.copy_from_slice(&a[(y0 - 1) * stride + x0..][..8]);
    top
}

fn left_pixels(a: &[u8], x0: usize, y0: usize, stride: usize) -> [u8; 4] {
    core::array::from_fn(|i| a[(y0 + i) * stride + x0 - 1])
}

/// The left column bottom to top, the corner, then the four samples above:
/// `[L3, L2, L1, L0, P, A0, A1, A2, A3]`.
fn edge_pixels(a: &[u8], x0: usize, y0: usize, stride: usize) -> [u8; 9] {
    let [l0, l1, l2, l3] = left_pixels(a, x0, y0, stride);
    let corner = (y0 - 1) * stride + x0 - 1;
    let above = &a[corner..][..5];
    [l3, l2, l1, l0, above[0], above[1], above[2], above[3], above[4]]
}

/// Writes a 4x4 block given as rows.
fn store4x4(a: &mut [u8], x0: usize, y0: usize, stride: usize, rows: [[u8; 4]; 4]) {
    for (i, row) in rows.iter().enumerate() {
        a[(y0 + i) * stride + x0..][..4].copy_from_slice(row);
    }
}

fn predict_bdcpred(a: &mut [u8], x0: usize, y0: usize, stride: usize) {
    let top = top_pixels(a, x0, y0, stride);
    let left = left_pixels(a, x0, y0, stride);
    let sum: u32 = top[..4]
        .iter()
        .chain(left.iter())
        .map(|&v| u32::from(v))
        .sum();
    let dc = ((sum + 4) >> 3) as u8;
    store4x4(a, x0, y0, stride, [[dc; 4]; 4]);
}

fn predict_bvepred(a: &mut [u8], x0: usize, y0: usize, stride: usize) {
    let p = a[(y0 - 1) * stride + x0 - 1];
    let t = top_pixels(a, x0, y0, stride);
    let row = [
        avg3(p, t[0], t[1]),
        avg3(t[0], t[1], t[2]),
        avg3(t[1], t[2], t[3]),
        avg3(t[2], t[3], t[4]),
    ];
    store4x4(a, x0, y0, stride, [row; 4]);
}

fn predict_bhepred(a: &mut [u8], x0: usize, y0: usize, stride: usize) {
    let p = a[(y0 - 1) * stride + x0 - 1];
    let [l0, l1, l2, l3] = left_pixels(a, x0, y0, stride);
    store4x4(
        a,
        x0,
        y0,
        stride,
        [
            [avg3(p, l0, l1); 4],
            [avg3(l0, l1, l2); 4],
            [avg3(l1, l2, l3); 4],
            [avg3(l2, l3, l3); 4],
        ],
    );
}

fn predict_bldpred(a: &mut [u8], x0: usize, y0: usize, stride: usize) {
    let t = top_pixels(a, x0, y0, stride);
    let d: [u8; 7] = core::array::from_fn(|i| avg3(t[i], t[i + 1], t[(i + 2).min(7)]));
    let rows = core::array::from_fn(|y| [d[y], d[y + 1], d[y + 2], d[y + 3]]);
    store4x4(a, x0, y0, stride, rows);
}

fn predict_brdpred(a: &mut [u8], x0: usize, y0: usize, stride: usize) {
    let e = edge_pixels(a, x0, y0, stride);
    let d: [u8; 7] = core::array::from_fn(|i| avg3(e[i], e[i + 1], e[i + 2]));
    let rows = core::array::from_fn(|y| [d[3 - y], d[4 - y], d[5 - y], d[6 - y]]);
    store4x4(a, x0, y0, stride, rows);
}

fn predict_bvrpred(a: &mut [u8], x0: usize, y0: usize, stride: usize) {
    let [_, e1, e2, e3, e4, e5, e6, e7, e8] = edge_pixels(a, x0, y0, stride);
    store4x4(
        a,
        x0,
        y0,
        stride,
        [
            [avg2(e4, e5), avg2(e5, e6), avg2(e6, e7), avg2(e7, e8)],
            [avg3(e3, e4, e5), avg3(e4, e5, e6), avg3(e5, e6, e7), avg3(e6, e7, e8)],
            [avg3(e2, e3, e4), avg2(e4, e5), avg2(e5, e6), avg2(e6, e7)],
            [avg3(e1, e2, e3), avg3(e3, e4, e5), avg3(e4, e5, e6), avg3(e5, e6, e7)],
        ],
    );
}

fn predict_bvlpred(a: &mut [u8], x0: usize, y0: usize, stride: usize) {
    let [a0, a1, a2, a3, a4, a5, a6, a7] = top_pixels(a, x0, y0, stride);
    store4x4(
        a,
        x0,
        y0,
        stride,
        [
            [avg2(a0, a1), avg2(a1, a2), avg2(a2, a3), avg2(a3, a4)],
            [avg3(a0, a1, a2), avg3(a1, a2, a3), avg3(a2, a3, a4), avg3(a3, a4, a5)],
            [avg2(a1, a2), avg2(a2, a3), avg2(a3, a4), avg3(a4, a5, a6)],
            [avg3(a1, a2, a3), avg3(a2, a3, a4), avg3(a3, a4, a5), avg3(a5, a6, a7)],
        ],
    );
}

fn predict_bhdpred(a: &mut [u8], x0: usize, y0: usize, stride: usize) {
    let [e0, e1, e2, e3, e4, e5, e6, e7, _] = edge_pixels(a, x0, y0, stride);
    store4x4(
        a,
        x0,
        y0,
        stride,
        [
            [avg2(e3, e4), avg3(e3, e4, e5), avg3(e4, e5, e6), avg3(e5, e6, e7)],
            [avg2(e2, e3), avg3(e2, e3, e4), avg2(e3, e4), avg3(e3, e4, e5)],
            [avg2(e1, e2), avg3(e1, e2, e3), avg2(e2, e3), avg3(e2, e3, e4)],
            [avg2(e0, e1), avg3(e0, e1, e2), avg2(e1, e2), avg3(e1, e2, e3)],
        ],
    );
}

fn predict_bhupred(a: &mut [u8], x0: usize, y0: usize, stride: usize) {
    let [l0, l1, l2, l3] = left_pixels(a, x0, y0, stride);
    store4x4(
        a,
        x0,
        y0,
        stride,
        [
            [avg2(l0, l1), avg3(l0, l1, l2), avg2(l1, l2), avg3(l1, l2, l3)],
            [avg2(l1, l2), avg3(l1, l2, l3), avg2(l2, l3), avg3(l2, l3, l3)],
            [avg2(l2, l3), avg3(l2, l3, l3), l3, l3],
            [l3; 4],
        ],
    );
}
