//! Inverse transforms from RFC 6386 section 14.
//!
//! The `*_add` functions add the inverse transform of a dequantised block to
//! a 4x4 area of a prediction buffer, clamping to `0..=255`.

/// 16 bit fixed point version of cos(PI/8) * sqrt(2) - 1
const CONST1: i64 = 20091;
/// 16 bit fixed point version of sin(PI/8) * sqrt(2)
const CONST2: i64 = 35468;

#[inline]
fn mul1(x: i64) -> i64 {
    x + ((x * CONST1) >> 16)
}

#[inline]
fn mul2(x: i64) -> i64 {
    (x * CONST2) >> 16
}

/// Full 4x4 inverse DCT, in place. The result is the residual to add.
pub(crate) fn idct4x4(block: &mut [i32; 16]) {
    // The intermediate results may overflow the types, so we stretch the type.
    let fetch = |block: &[i32; 16], idx: usize| i64::from(block[idx]);

    for i in 0usize..4 {
        let a1 = fetch(block, i) + fetch(block, 8 + i);
        let b1 = fetch(block, i) - fetch(block, 8 + i);
        let c1 = mul2(fetch(block, 4 + i)) - mul1(fetch(block, 12 + i));
        let d1 = mul1(fetch(block, 4 + i)) + mul2(fetch(block, 12 + i));

        block[i] = (a1 + d1) as i32;
        block[4 + i] = (b1 + c1) as i32;
        block[8 + i] = (b1 - c1) as i32;
        block[12 + i] = (a1 - d1) as i32;
    }

    for row in block.chunks_exact_mut(4) {
        let dc = i64::from(row[0]) + 4;
        let a1 = dc + i64::from(row[2]);
        let b1 = dc - i64::from(row[2]);
        let c1 = mul2(i64::from(row[1])) - mul1(i64::from(row[3]));
        let d1 = mul1(i64::from(row[1])) + mul2(i64::from(row[3]));

        row[0] = ((a1 + d1) >> 3) as i32;
        row[1] = ((b1 + c1) >> 3) as i32;
        row[2] = ((b1 - c1) >> 3) as i32;
        row[3] = ((a1 - d1) >> 3) as i32;
    }
}

#[inline]
fn add_clamped(dst: &mut [u8], pos: usize, v: i32) {
    dst[pos] = (i32::from(dst[pos]) + v).clamp(0, 255) as u8;
}

/// Adds the full inverse DCT of `coeffs` at `pos`.
pub(crate) fn idct_add(coeffs: &[i32; 16], dst: &mut [u8], pos: usize, stride: usize) {
    let mut residual = *coeffs;
    idct4x4(&mut residual);
    for (y, row) in residual.chunks_exact(4).enumerate() {
        for (x, &v) in row.iter().enumerate() {
            add_clamped(dst, pos + y * stride + x, v);
        }
    }
}

/// Inverse DCT for a block whose only non-zero coefficient is the DC term.
pub(crate) fn idct_dc_add(coeffs: &[i32; 16], dst: &mut [u8], pos: usize, stride: usize) {
    let dc = (coeffs[0] + 4) >> 3;
    for y in 0..4 {
        for x in 0..4 {
            add_clamped(dst, pos + y * stride + x, dc);
        }
    }
}

/// Inverse DCT for a block whose non-zero coefficients are limited to
/// indices 0, 1 and 4, the first three in zigzag order.
pub(crate) fn idct_ac3_add(coeffs: &[i32; 16], dst: &mut [u8], pos: usize, stride: usize) {
    let a = i64::from(coeffs[0]) + 4;
    let c4 = mul2(i64::from(coeffs[4]));
    let d4 = mul1(i64::from(coeffs[4]));
    let c1 = mul2(i64::from(coeffs[1]));
    let d1 = mul1(i64::from(coeffs[1]));
    for (y, dc) in [a + d4, a + c4, a - c4, a - d4].into_iter().enumerate() {
        let row = pos + y * stride;
        add_clamped(dst, row, ((dc + d1) >> 3) as i32);
        add_clamped(dst, row + 1, ((dc + c1) >> 3) as i32);
        add_clamped(dst, row + 2, ((dc - c1) >> 3) as i32);
        add_clamped(dst, row + 3, ((dc - d1) >> 3) as i32);
    }
}

// 14.3 inverse walsh-hadamard transform, used in decoding
pub(crate) fn iwht4x4(block: &mut [i32; 16]) {
    for i in 0usize..4 {
        let a1 = block[i] + block[12 + i];
        let b1 = block[4 + i] + block[8 + i];
        let c1 = block[4 + i] - block[8 + i];
        let d1 = block[i] - block[12 + i];

        block[i] = a1 + b1;
        block[4 + i] = c1 + d1;
        block[8 + i] = a1 - b1;
        block[12 + i] = d1 - c1;
    }

    for row in block.chunks_exact_mut(4) {
        let a1 = row[0] + row[3];
        let b1 = row[1] + row[2];
        let c1 = row[1] - row[2];
        let d1 = row[0] - row[3];

        row[0] = (a1 + b1 + 3) >> 3;
        row[1] = (c1 + d1 + 3) >> 3;
        row[2] = (a1 - b1 + 3) >> 3;
        row[3] = (d1 - c1 + 3) >> 3;
    }
}
