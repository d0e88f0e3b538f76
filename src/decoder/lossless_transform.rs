//! Inverse image transforms for VP8L decoding.
//!
//! Pixels are packed ARGB words (`0xAARRGGBB`). Transforms are undone in the
//! reverse of the order they were read from the bitstream.

use alloc::vec;
use alloc::vec::Vec;

/// Transform type identifier as coded in the bitstream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub(crate) enum TransformType {
    Predictor = 0,
    CrossColor = 1,
    SubtractGreen = 2,
    ColorIndexing = 3,
}

impl TransformType {
    pub(crate) const fn from_bits(val: u32) -> Self {
        match val & 3 {
            0 => TransformType::Predictor,
            1 => TransformType::CrossColor,
            2 => TransformType::SubtractGreen,
            _ => TransformType::ColorIndexing,
        }
    }
}

/// A transform read from the stream, with the image width it applies to.
#[derive(Debug, Clone)]
pub(crate) struct Transform {
    pub(crate) kind: TransformType,
    /// Width of the image this transform produces when inverted.
    pub(crate) xsize: u32,
    /// Tile size (predictor, cross-color) or pixel packing (color indexing) exponent.
    pub(crate) bits: u8,
    /// Per-tile parameters, or the expanded palette for color indexing.
    pub(crate) data: Vec<u32>,
}

impl Transform {
    /// Undoes this transform on `pixels`, which hold `height` rows of the
    /// coded width. Returns the rows at full width.
    pub(crate) fn apply_inverse(&self, pixels: Vec<u32>, height: u32) -> Vec<u32> {
        let width = self.xsize as usize;
        let height = height as usize;
        match self.kind {
            TransformType::Predictor => {
                let mut pixels = pixels;
                apply_predictor_inverse(&mut pixels, width, height, self.bits, &self.data);
                pixels
            }
            TransformType::CrossColor => {
                let mut pixels = pixels;
                apply_cross_color_inverse(&mut pixels, width, height, self.bits, &self.data);
                pixels
            }
            TransformType::SubtractGreen => {
                let mut pixels = pixels;
                apply_add_green(&mut pixels);
                pixels
            }
            TransformType::ColorIndexing => {
                apply_color_indexing_inverse(&pixels, width, height, self.bits, &self.data)
            }
        }
    }
}

/// Predictor modes, selected per tile by the green byte of the predictor image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub(crate) enum PredictorMode {
    Black = 0,                 // 0xff000000
    Left = 1,                  // L
    Top = 2,                   // T
    TopRight = 3,              // TR
    TopLeft = 4,               // TL
    AvgAvgLtrT = 5,            // Avg(Avg(L,TR), T)
    AvgLTl = 6,                // Avg(L, TL)
    AvgLT = 7,                 // Avg(L, T)
    AvgTlT = 8,                // Avg(TL, T)
    AvgTTr = 9,                // Avg(T, TR)
    AvgAvgLTlAvgTTr = 10,      // Avg(Avg(L,TL), Avg(T,TR))
    Select = 11,               // Select(L, T, TL)
    ClampAddSubtractFull = 12, // Clamp(L + T - TL)
    ClampAddSubtractHalf = 13, // Clamp(Avg(L,T) + (Avg(L,T)-TL)/2)
}

impl PredictorMode {
    /// Modes 14 and 15 are not defined and predict black.
    pub(crate) const fn from_u8(val: u8) -> Self {
        match val & 0xf {
            1 => PredictorMode::Left,
            2 => PredictorMode::Top,
            3 => PredictorMode::TopRight,
            4 => PredictorMode::TopLeft,
            5 => PredictorMode::AvgAvgLtrT,
            6 => PredictorMode::AvgLTl,
            7 => PredictorMode::AvgLT,
            8 => PredictorMode::AvgTlT,
            9 => PredictorMode::AvgTTr,
            10 => PredictorMode::AvgAvgLTlAvgTTr,
            11 => PredictorMode::Select,
            12 => PredictorMode::ClampAddSubtractFull,
            13 => PredictorMode::ClampAddSubtractHalf,
            _ => PredictorMode::Black,
        }
    }
}

#[inline]
pub(crate) const fn argb_alpha(argb: u32) -> u8 {
    (argb >> 24) as u8
}

#[inline]
pub(crate) const fn argb_red(argb: u32) -> u8 {
    (argb >> 16) as u8
}

#[inline]
pub(crate) const fn argb_green(argb: u32) -> u8 {
    (argb >> 8) as u8
}

#[inline]
pub(crate) const fn argb_blue(argb: u32) -> u8 {
    argb as u8
}

#[inline]
pub(crate) const fn make_argb(a: u8, r: u8, g: u8, b: u8) -> u32 {
    ((a as u32) << 24) | ((r as u32) << 16) | ((g as u32) << 8) | (b as u32)
}

/// Number of `1 << bits` tiles needed to cover `size` pixels.
#[inline]
pub(crate) const fn subsample_size(size: u32, bits: u8) -> u32 {
    (size + (1 << bits) - 1) >> bits
}

/// Per-channel sum modulo 256.
#[inline]
pub(crate) fn add_pixels(a: u32, b: u32) -> u32 {
    let alpha_green = (a & 0xff00ff00).wrapping_add(b & 0xff00ff00);
    let red_blue = (a & 0x00ff00ff).wrapping_add(b & 0x00ff00ff);
    (alpha_green & 0xff00ff00) | (red_blue & 0x00ff00ff)
}

#[inline]
fn predict(mode: PredictorMode, left: u32, top: u32, top_left: u32, top_right: u32) -> u32 {
    match mode {
        PredictorMode::Black => 0xff000000,
        PredictorMode::Left => left,
        PredictorMode::Top => top,
        PredictorMode::TopRight => top_right,
        PredictorMode::TopLeft => top_left,
        PredictorMode::AvgAvgLtrT => average2(average2(left, top_right), top),
        PredictorMode::AvgLTl => average2(left, top_left),
        PredictorMode::AvgLT => average2(left, top),
        PredictorMode::AvgTlT => average2(top_left, top),
        PredictorMode::AvgTTr => average2(top, top_right),
        PredictorMode::AvgAvgLTlAvgTTr => {
            average2(average2(left, top_left), average2(top, top_right))
        }
        PredictorMode::Select => select(left, top, top_left),
        PredictorMode::ClampAddSubtractFull => clamp_add_subtract_full(left, top, top_left),
        PredictorMode::ClampAddSubtractHalf => clamp_add_subtract_half(left, top, top_left),
    }
}

/// Component-wise floor average.
#[inline]
fn average2(a: u32, b: u32) -> u32 {
    (((a ^ b) & 0xfefefefe) >> 1) + (a & b)
}

#[inline]
fn abs_diff_sum(a: u32, b: u32) -> u32 {
    u32::from(argb_alpha(a).abs_diff(argb_alpha(b)))
        + u32::from(argb_red(a).abs_diff(argb_red(b)))
        + u32::from(argb_green(a).abs_diff(argb_green(b)))
        + u32::from(argb_blue(a).abs_diff(argb_blue(b)))
}

/// Picks whichever of left and top is closer to the gradient `L + T - TL`.
/// Ties go to top.
#[inline]
fn select(left: u32, top: u32, top_left: u32) -> u32 {
    let predict_left = abs_diff_sum(top, top_left);
    let predict_top = abs_diff_sum(left, top_left);
    if predict_left < predict_top {
        left
    } else {
        top
    }
}

#[inline]
fn clamp(val: i16) -> u8 {
    val.clamp(0, 255) as u8
}

#[inline]
fn clamp_add_subtract_full(left: u32, top: u32, top_left: u32) -> u32 {
    let channel =
        |f: fn(u32) -> u8| clamp(i16::from(f(left)) + i16::from(f(top)) - i16::from(f(top_left)));
    make_argb(
        channel(argb_alpha),
        channel(argb_red),
        channel(argb_green),
        channel(argb_blue),
    )
}

#[inline]
fn clamp_add_subtract_half(left: u32, top: u32, top_left: u32) -> u32 {
    let avg = average2(left, top);
    let channel = |f: fn(u32) -> u8| {
        let a = i16::from(f(avg));
        clamp(a + (a - i16::from(f(top_left))) / 2)
    };
    make_argb(
        channel(argb_alpha),
        channel(argb_red),
        channel(argb_green),
        channel(argb_blue),
    )
}

/// Adds the prediction back onto each residual, in raster order.
///
/// The first pixel predicts black, the rest of the first row predicts left,
/// and the first column predicts top. Other pixels use their tile's mode. At
/// the right edge the top-right neighbour is the first pixel of the current
/// row, which is what the flat row-major layout yields.
pub(crate) fn apply_predictor_inverse(
    pixels: &mut [u32],
    width: usize,
    height: usize,
    size_bits: u8,
    modes: &[u32],
) {
    if width == 0 || height == 0 {
        return;
    }
    pixels[0] = add_pixels(pixels[0], 0xff000000);
    for x in 1..width {
        pixels[x] = add_pixels(pixels[x], pixels[x - 1]);
    }

    let tiles_per_row = subsample_size(width as u32, size_bits) as usize;
    for y in 1..height {
        let row = y * width;
        pixels[row] = add_pixels(pixels[row], pixels[row - width]);
        let tile_row = &modes[(y >> size_bits) * tiles_per_row..][..tiles_per_row];
        for x in 1..width {
            let i = row + x;
            let mode = PredictorMode::from_u8(argb_green(tile_row[x >> size_bits]));
            let pred = predict(
                mode,
                pixels[i - 1],
                pixels[i - width],
                pixels[i - width - 1],
                pixels[i - width + 1],
            );
            pixels[i] = add_pixels(pixels[i], pred);
        }
    }
}

/// `(t * c) >> 5` on signed bytes.
#[inline]
fn color_transform_delta(t: u8, c: u8) -> i32 {
    (i32::from(t as i8) * i32::from(c as i8)) >> 5
}

/// Undoes the chroma shear. Each tile's element carries `green_to_red` in
/// blue, `green_to_blue` in green and `red_to_blue` in red.
pub(crate) fn apply_cross_color_inverse(
    pixels: &mut [u32],
    width: usize,
    height: usize,
    size_bits: u8,
    multipliers: &[u32],
) {
    let tiles_per_row = subsample_size(width as u32, size_bits) as usize;
    for y in 0..height {
        let tile_row = &multipliers[(y >> size_bits) * tiles_per_row..][..tiles_per_row];
        let row = &mut pixels[y * width..][..width];
        for (x, pixel) in row.iter_mut().enumerate() {
            let m = tile_row[x >> size_bits];
            let green_to_red = argb_blue(m);
            let green_to_blue = argb_green(m);
            let red_to_blue = argb_red(m);

            let argb = *pixel;
            let green = argb_green(argb);
            let mut red = i32::from(argb_red(argb));
            let mut blue = i32::from(argb_blue(argb));
            red += color_transform_delta(green_to_red, green);
            red &= 0xff;
            blue += color_transform_delta(green_to_blue, green);
            blue += color_transform_delta(red_to_blue, red as u8);
            blue &= 0xff;
            *pixel = (argb & 0xff00ff00) | ((red as u32) << 16) | blue as u32;
        }
    }
}

/// R += G, B += G.
pub(crate) fn apply_add_green(pixels: &mut [u32]) {
    for pixel in pixels.iter_mut() {
        let green = (*pixel >> 8) & 0xff;
        let red_blue = (*pixel & 0x00ff00ff).wrapping_add((green << 16) | green);
        *pixel = (*pixel & 0xff00ff00) | (red_blue & 0x00ff00ff);
    }
}

/// Expands palette indices into colors. With `bits > 0`, each coded pixel's
/// green byte packs `1 << bits` indices, lowest bits first.
pub(crate) fn apply_color_indexing_inverse(
    packed: &[u32],
    width: usize,
    height: usize,
    bits: u8,
    palette: &[u32],
) -> Vec<u32> {
    let mut out = vec![0u32; width * height];
    map_color_indices(
        packed,
        argb_green,
        width,
        height,
        bits,
        &mut out,
        |index| palette[index],
    );
    out
}

/// Shared unpacking loop for ARGB and byte planes. `index_of` extracts the
/// packed index byte from a coded pixel.
pub(crate) fn map_color_indices<S: Copy, T>(
    packed: &[S],
    index_of: impl Fn(S) -> u8,
    width: usize,
    height: usize,
    bits: u8,
    out: &mut [T],
    lookup: impl Fn(usize) -> T,
) {
    let coded_width = subsample_size(width as u32, bits) as usize;
    let bits_per_pixel = 8 >> bits;
    let count_mask = (1usize << bits) - 1;
    let bit_mask = (1u32 << bits_per_pixel) - 1;
    for y in 0..height {
        let src = &packed[y * coded_width..][..coded_width];
        let dst = &mut out[y * width..][..width];
        let mut packed_pixels = 0u32;
        for (x, d) in dst.iter_mut().enumerate() {
            if x & count_mask == 0 {
                packed_pixels = u32::from(index_of(src[x >> bits]));
            }
            *d = lookup((packed_pixels & bit_mask) as usize);
            packed_pixels >>= bits_per_pixel;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_green_wraps_per_channel() {
        let mut px = [0x80_f0_40_20u32];
        apply_add_green(&mut px);
        assert_eq!(px[0], 0x80_30_40_60);
    }

    #[test]
    fn average_matches_per_channel_floor() {
        assert_eq!(average2(0xff_00_10_03, 0x01_00_11_04), 0x80_00_10_03);
    }

    #[test]
    fn select_prefers_top_on_ties() {
        let left = 0x10101010;
        let top = 0x20202020;
        let top_left = 0x18181818;
        assert_eq!(select(left, top, top_left), top);
        // Left is far from the top-left, so the gradient sits near left.
        assert_eq!(select(0x80808080, 0x10101010, 0x11111111), 0x80808080);
    }

    #[test]
    fn clamped_predictors() {
        assert_eq!(
            clamp_add_subtract_full(0xff_80_00_10, 0xff_90_00_10, 0x00_00_10_30),
            0xff_ff_00_00
        );
        // avg = 0x40, 0x40 + (0x40 - 0x00) / 2 = 0x60; avg = 0x10, 0x10 + (0x10 - 0x30) / 2 = 0
        assert_eq!(
            clamp_add_subtract_half(0x40_40_10_10, 0x40_40_10_10, 0x00_00_30_30),
            0x60_60_00_00
        );
    }

    #[test]
    fn predictor_borders_and_modes() {
        // 3x2 image, one tile using mode 2 (top).
        let mut px = [1, 1, 1, 5, 7, 9];
        let modes = [make_argb(0, 0, PredictorMode::Top as u8, 0)];
        apply_predictor_inverse(&mut px, 3, 2, 2, &modes);
        assert_eq!(&px[..3], &[0xff000001, 0xff000002, 0xff000003]);
        // First column predicts top; the others follow the tile mode.
        assert_eq!(&px[3..], &[0xff000006, 0xff000009, 0xff00000c]);
    }

    #[test]
    fn right_edge_top_right_wraps_to_row_start() {
        // 2x2, mode 3 (top-right): pixel (1,1) takes pixels[1*2 + 0].
        let mut px = [0x00000010, 0, 0x00000001, 0x00000001];
        let modes = [make_argb(0, 0, PredictorMode::TopRight as u8, 0)];
        apply_predictor_inverse(&mut px, 2, 2, 2, &modes);
        assert_eq!(px[2], 0xff000011);
        assert_eq!(px[3], 0xff000012);
    }

    #[test]
    fn cross_color_identity_with_zero_multipliers() {
        let mut px = [0x12345678, 0x9abcdef0];
        apply_cross_color_inverse(&mut px, 2, 1, 2, &[0]);
        assert_eq!(px, [0x12345678, 0x9abcdef0]);
    }

    #[test]
    fn cross_color_applies_deltas() {
        // green_to_red = 32: red += (32 * g) >> 5 = g.
        let mut px = [make_argb(0xff, 0x10, 0x04, 0x00)];
        apply_cross_color_inverse(&mut px, 1, 1, 2, &[make_argb(0, 0, 0, 32)]);
        assert_eq!(px[0], make_argb(0xff, 0x14, 0x04, 0x00));
        // red_to_blue = 64 uses the already corrected red: 2 * 0x14.
        let mut px = [make_argb(0xff, 0x10, 0x04, 0x00)];
        apply_cross_color_inverse(&mut px, 1, 1, 2, &[make_argb(0, 64, 0, 32)]);
        assert_eq!(px[0], make_argb(0xff, 0x14, 0x04, 0x28));
    }

    #[test]
    fn color_indexing_unpacks_two_bit_indices() {
        let palette = [0xff000000, 0xff0000ff, 0xff00ff00, 0xffff0000];
        // Indices 1, 2, 3, 0, 2 packed four per byte, low bits first.
        let packed = [(0b00_11_10_01u32) << 8, 0b10 << 8];
        let out = apply_color_indexing_inverse(&packed, 5, 1, 2, &palette);
        assert_eq!(
            out,
            [palette[1], palette[2], palette[3], palette[0], palette[2]]
        );
    }

    #[test]
    fn transform_type_from_bits() {
        assert_eq!(TransformType::from_bits(0), TransformType::Predictor);
        assert_eq!(TransformType::from_bits(3), TransformType::ColorIndexing);
    }
}
