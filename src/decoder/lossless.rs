//! VP8L lossless decoding.
//!
//! A VP8L image is a stack of transforms, an optional color cache, a set of
//! Huffman code groups (optionally selected per tile by a meta image) and an
//! LZ77-style stream of literals, backward references and cache hits. Every
//! parameter image (transform data, meta image) is itself a nested stream
//! without transforms or meta image.

use alloc::vec;
use alloc::vec::Vec;

use log::{debug, trace};

use super::api::DecodeError;
use super::bit_reader::WindowBitReader;
use super::huffman::{
    HuffmanGroup, HuffmanTable, ALPHA, BLUE, DIST, GREEN, HUFFMAN_TABLE_BITS, LENGTHS_TABLE_BITS,
    RED,
};
use super::lossless_transform::{
    add_pixels, argb_green, map_color_indices, subsample_size, Transform, TransformType,
};

const VP8L_MAGIC: u8 = 0x2f;
const VP8L_VERSION_BITS: u32 = 3;
const VP8L_IMAGE_SIZE_BITS: u32 = 14;

const NUM_LITERAL_CODES: u32 = 256;
const NUM_LENGTH_CODES: u32 = 24;
const NUM_DISTANCE_CODES: u16 = 40;
const NUM_CODE_LENGTH_CODES: usize = 19;
const CODE_LENGTH_CODE_ORDER: [usize; NUM_CODE_LENGTH_CODES] =
    [17, 18, 0, 1, 2, 3, 4, 5, 16, 6, 7, 8, 9, 10, 11, 12, 13, 14, 15];

/// First length-code symbol that is a repeat instruction.
const CODE_LENGTH_LITERALS: u16 = 16;
const CODE_LENGTH_REPEAT_CODE: u16 = 16;
const CODE_LENGTH_EXTRA_BITS: [u32; 3] = [2, 3, 7];
const CODE_LENGTH_REPEAT_OFFSETS: [usize; 3] = [3, 3, 11];
const DEFAULT_CODE_LENGTH: u8 = 8;

const MAX_CACHE_BITS: u32 = 11;
const MIN_TRANSFORM_BITS: u8 = 2;
const NUM_TRANSFORM_BITS: u32 = 3;
const MIN_HUFFMAN_BITS: u8 = 2;
const NUM_HUFFMAN_BITS: u32 = 3;

/// Color cache hash multiplier.
const COLOR_CACHE_MULT: u32 = 0x1e35a7bd;

/// Short distance codes, packed as `(yoffset << 4) | (8 - xoffset)`.
const CODE_TO_PLANE: [u8; 120] = [
    0x18, 0x07, 0x17, 0x19, 0x28, 0x06, 0x27, 0x29, 0x16, 0x1a, 0x26, 0x2a,
    0x38, 0x05, 0x37, 0x39, 0x15, 0x1b, 0x36, 0x3a, 0x25, 0x2b, 0x48, 0x04,
    0x47, 0x49, 0x14, 0x1c, 0x35, 0x3b, 0x46, 0x4a, 0x24, 0x2c, 0x58, 0x45,
    0x4b, 0x34, 0x3c, 0x03, 0x57, 0x59, 0x13, 0x1d, 0x56, 0x5a, 0x23, 0x2d,
    0x44, 0x4c, 0x55, 0x5b, 0x33, 0x3d, 0x68, 0x02, 0x67, 0x69, 0x12, 0x1e,
    0x66, 0x6a, 0x22, 0x2e, 0x54, 0x5c, 0x43, 0x4d, 0x65, 0x6b, 0x32, 0x3e,
    0x78, 0x01, 0x77, 0x79, 0x53, 0x5d, 0x11, 0x1f, 0x64, 0x6c, 0x42, 0x4e,
    0x76, 0x7a, 0x21, 0x2f, 0x75, 0x7b, 0x31, 0x3f, 0x63, 0x6d, 0x52, 0x5e,
    0x00, 0x74, 0x7c, 0x41, 0x4f, 0x10, 0x20, 0x62, 0x6e, 0x30, 0x73, 0x7d,
    0x51, 0x5f, 0x40, 0x72, 0x7e, 0x61, 0x6f, 0x50, 0x71, 0x7f, 0x60, 0x70,
];

/// Maps a distance code to a pixel distance for an image `xsize` wide.
///
/// Codes up to 120 name a nearby `(dx, dy)` neighbour; larger codes are the
/// plain distance plus 120. The result is never below 1.
pub(crate) fn plane_code_to_distance(xsize: u32, plane_code: u32) -> usize {
    if plane_code > 120 {
        (plane_code - 120) as usize
    } else {
        let dist_code = CODE_TO_PLANE[plane_code as usize - 1];
        let yoffset = i64::from(dist_code >> 4);
        let xoffset = 8 - i64::from(dist_code & 0xf);
        let dist = yoffset * i64::from(xsize) + xoffset;
        if dist >= 1 {
            dist as usize
        } else {
            1
        }
    }
}

/// Hash table of recently seen colors.
#[derive(Debug, Clone)]
pub(crate) struct ColorCache {
    colors: Vec<u32>,
    hash_shift: u32,
}

impl ColorCache {
    /// `bits` must be in `1..=11`.
    pub(crate) fn new(bits: u32) -> Self {
        debug_assert!((1..=MAX_CACHE_BITS).contains(&bits));
        Self {
            colors: vec![0; 1 << bits],
            hash_shift: 32 - bits,
        }
    }

    #[inline]
    pub(crate) fn key(&self, argb: u32) -> usize {
        (COLOR_CACHE_MULT.wrapping_mul(argb) >> self.hash_shift) as usize
    }

    #[inline]
    pub(crate) fn insert(&mut self, argb: u32) {
        let key = self.key(argb);
        self.colors[key] = argb;
    }

    #[inline]
    pub(crate) fn lookup(&self, key: usize) -> Option<u32> {
        self.colors.get(key).copied()
    }

    pub(crate) fn size(&self) -> usize {
        self.colors.len()
    }
}

/// Values from the 5-byte VP8L header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct LosslessHeader {
    pub(crate) width: u32,
    pub(crate) height: u32,
    pub(crate) alpha_is_used: bool,
}

/// Entropy-coding state for one image stream.
struct DecodeState {
    groups: Vec<HuffmanGroup>,
    /// Group index per tile; empty when a single group covers the image.
    meta_image: Vec<u32>,
    meta_bits: u8,
    meta_xsize: u32,
    cache: Option<ColorCache>,
}

impl DecodeState {
    /// Mask selecting the column bits that stay within one tile.
    fn tile_mask(&self) -> usize {
        if self.meta_image.is_empty() {
            usize::MAX
        } else {
            (1 << self.meta_bits) - 1
        }
    }

    #[inline]
    fn group_index(&self, x: usize, y: usize) -> usize {
        if self.meta_image.is_empty() {
            return 0;
        }
        let bits = self.meta_bits;
        self.meta_image[self.meta_xsize as usize * (y >> bits) + (x >> bits)] as usize
    }

    /// True when only green carries information and no cache is used.
    fn is_8b_optimizable(&self) -> bool {
        self.cache.is_none() && self.groups.iter().all(|g| g.is_trivial_literal)
    }
}

/// Decoder over one VP8L bitstream (or a headerless alpha stream).
pub(crate) struct LosslessDecoder<'a> {
    br: WindowBitReader<'a>,
    transforms_seen: u8,
}

impl<'a> LosslessDecoder<'a> {
    pub(crate) fn new(data: &'a [u8]) -> Self {
        Self {
            br: WindowBitReader::new(data),
            transforms_seen: 0,
        }
    }

    /// Reads the signature, dimensions, alpha hint and version.
    pub(crate) fn read_header(&mut self) -> Result<LosslessHeader, DecodeError> {
        let signature = self.br.read_bits(8) as u8;
        if signature != VP8L_MAGIC {
            return Err(DecodeError::LosslessSignatureInvalid(signature));
        }
        let width = self.br.read_bits(VP8L_IMAGE_SIZE_BITS) + 1;
        let height = self.br.read_bits(VP8L_IMAGE_SIZE_BITS) + 1;
        let alpha_is_used = self.br.read_bit();
        let version = self.br.read_bits(VP8L_VERSION_BITS);
        if version != 0 {
            return Err(DecodeError::VersionNumberInvalid(version as u8));
        }
        if self.br.is_end_of_stream() {
            return Err(DecodeError::NotEnoughInitData);
        }
        Ok(LosslessHeader {
            width,
            height,
            alpha_is_used,
        })
    }

    /// Decodes the top-level image after [`Self::read_header`], returning
    /// `width * height` ARGB pixels.
    pub(crate) fn decode_image(
        &mut self,
        width: u32,
        height: u32,
    ) -> Result<Vec<u32>, DecodeError> {
        let (transforms, state, coded_width) = self.read_level0_header(width, height)?;
        let pixels = self.decode_pixels(state, coded_width, height)?;
        Ok(apply_inverse_transforms(&transforms, pixels, height))
    }

    /// Decodes a headerless stream and keeps only the green channel, as used
    /// by compressed alpha planes.
    pub(crate) fn decode_alpha_plane(
        &mut self,
        width: u32,
        height: u32,
    ) -> Result<Vec<u8>, DecodeError> {
        let (transforms, state, coded_width) = self.read_level0_header(width, height)?;

        if let [palette] = transforms.as_slice() {
            if palette.kind == TransformType::ColorIndexing && state.is_8b_optimizable() {
                trace!("alpha plane: 8-bit palette path");
                let indices = self.decode_indices(&state, coded_width, height)?;
                let mut alpha = vec![0u8; width as usize * height as usize];
                map_color_indices(
                    &indices,
                    |index| index,
                    width as usize,
                    height as usize,
                    palette.bits,
                    &mut alpha,
                    |index| argb_green(palette.data[index]),
                );
                return Ok(alpha);
            }
        }

        let pixels = self.decode_pixels(state, coded_width, height)?;
        let pixels = apply_inverse_transforms(&transforms, pixels, height);
        Ok(pixels.iter().map(|&argb| argb_green(argb)).collect())
    }

    /// Transforms, color cache and Huffman codes of the top-level image.
    fn read_level0_header(
        &mut self,
        width: u32,
        height: u32,
    ) -> Result<(Vec<Transform>, DecodeState, u32), DecodeError> {
        let mut xsize = width;
        let mut transforms = Vec::new();
        while self.br.read_bit() {
            let transform = self.read_transform(&mut xsize, height)?;
            transforms.push(transform);
        }
        self.br.check_eos()?;
        debug!(
            "VP8L {}x{}: transforms {:?}",
            width,
            height,
            transforms.iter().map(|t| t.kind).collect::<Vec<_>>()
        );
        let state = self.read_entropy_state(xsize, height, true)?;
        Ok((transforms, state, xsize))
    }

    fn read_transform(&mut self, xsize: &mut u32, ysize: u32) -> Result<Transform, DecodeError> {
        let kind = TransformType::from_bits(self.br.read_bits(2));
        if self.transforms_seen & (1 << kind as u8) != 0 {
            return Err(DecodeError::TransformError("transform used twice"));
        }
        self.transforms_seen |= 1 << kind as u8;

        let mut transform = Transform {
            kind,
            xsize: *xsize,
            bits: 0,
            data: Vec::new(),
        };
        match kind {
            TransformType::Predictor | TransformType::CrossColor => {
                transform.bits = self.br.read_bits(NUM_TRANSFORM_BITS) as u8 + MIN_TRANSFORM_BITS;
                transform.data = self.decode_sub_image(
                    subsample_size(*xsize, transform.bits),
                    subsample_size(ysize, transform.bits),
                )?;
            }
            TransformType::ColorIndexing => {
                let num_colors = self.br.read_bits(8) + 1;
                let bits = if num_colors > 16 {
                    0
                } else if num_colors > 4 {
                    1
                } else if num_colors > 2 {
                    2
                } else {
                    3
                };
                *xsize = subsample_size(*xsize, bits);
                transform.bits = bits;
                let colors = self.decode_sub_image(num_colors, 1)?;
                transform.data = expand_color_map(&colors, bits);
            }
            TransformType::SubtractGreen => {}
        }
        Ok(transform)
    }

    /// Decodes a nested parameter image: no transforms and no meta image.
    fn decode_sub_image(&mut self, xsize: u32, ysize: u32) -> Result<Vec<u32>, DecodeError> {
        let state = self.read_entropy_state(xsize, ysize, false)?;
        self.decode_pixels(state, xsize, ysize)
    }

    fn read_entropy_state(
        &mut self,
        xsize: u32,
        ysize: u32,
        is_level0: bool,
    ) -> Result<DecodeState, DecodeError> {
        let mut cache = None;
        if self.br.read_bit() {
            let bits = self.br.read_bits(4);
            if !(1..=MAX_CACHE_BITS).contains(&bits) {
                return Err(DecodeError::InvalidColorCacheBits(bits as u8));
            }
            cache = Some(ColorCache::new(bits));
        }
        let cache_size = cache.as_ref().map_or(0, ColorCache::size);

        let mut meta_image = Vec::new();
        let mut meta_bits = 0;
        let mut meta_xsize = 0;
        let mut num_groups = 1;
        if is_level0 && self.br.read_bit() {
            meta_bits = self.br.read_bits(NUM_HUFFMAN_BITS) as u8 + MIN_HUFFMAN_BITS;
            meta_xsize = subsample_size(xsize, meta_bits);
            let meta_ysize = subsample_size(ysize, meta_bits);
            meta_image = self.decode_sub_image(meta_xsize, meta_ysize)?;
            for entry in meta_image.iter_mut() {
                *entry = (*entry >> 8) & 0xffff;
                num_groups = num_groups.max(*entry as usize + 1);
            }
            trace!("VP8L meta image: {} groups, tile bits {}", num_groups, meta_bits);
        }
        self.br.check_eos()?;

        let alphabet_sizes = [
            (NUM_LITERAL_CODES + NUM_LENGTH_CODES) as u16 + cache_size as u16,
            256,
            256,
            256,
            NUM_DISTANCE_CODES,
        ];
        let mut groups = Vec::with_capacity(num_groups);
        for _ in 0..num_groups {
            let mut codes: [HuffmanTable; 5] = Default::default();
            for (code, &size) in codes.iter_mut().zip(alphabet_sizes.iter()) {
                *code = self.read_huffman_code(usize::from(size))?;
            }
            groups.push(HuffmanGroup::new(codes));
        }

        Ok(DecodeState {
            groups,
            meta_image,
            meta_bits,
            meta_xsize,
            cache,
        })
    }

    fn read_huffman_code(&mut self, alphabet_size: usize) -> Result<HuffmanTable, DecodeError> {
        let mut code_lengths = vec![0u8; alphabet_size];
        if self.br.read_bit() {
            let num_symbols = self.br.read_bits(1) + 1;
            let first_symbol_bits = if self.br.read_bit() { 8 } else { 1 };
            let first = self.br.read_bits(first_symbol_bits) as usize;
            if let Some(len) = code_lengths.get_mut(first) {
                *len = 1;
            }
            if num_symbols == 2 {
                let second = self.br.read_bits(8) as usize;
                if let Some(len) = code_lengths.get_mut(second) {
                    *len = 1;
                }
            }
        } else {
            let mut code_length_code_lengths = [0u8; NUM_CODE_LENGTH_CODES];
            let num_codes = self.br.read_bits(4) as usize + 4;
            for &index in &CODE_LENGTH_CODE_ORDER[..num_codes] {
                code_length_code_lengths[index] = self.br.read_bits(3) as u8;
            }
            self.read_code_lengths(&code_length_code_lengths, &mut code_lengths)?;
        }
        self.br.check_eos()?;
        HuffmanTable::build(&code_lengths, HUFFMAN_TABLE_BITS)
    }

    fn read_code_lengths(
        &mut self,
        code_length_code_lengths: &[u8; NUM_CODE_LENGTH_CODES],
        code_lengths: &mut [u8],
    ) -> Result<(), DecodeError> {
        let table = HuffmanTable::build(code_length_code_lengths, LENGTHS_TABLE_BITS)?;
        let num_symbols = code_lengths.len();

        let mut max_symbol = if self.br.read_bit() {
            let length_bits = 2 + 2 * self.br.read_bits(3);
            let max_symbol = 2 + self.br.read_bits(length_bits) as usize;
            if max_symbol > num_symbols {
                return Err(DecodeError::HuffmanError("max_symbol exceeds alphabet"));
            }
            max_symbol
        } else {
            num_symbols
        };

        let mut prev_code_len = DEFAULT_CODE_LENGTH;
        let mut symbol = 0;
        while symbol < num_symbols {
            if max_symbol == 0 {
                break;
            }
            max_symbol -= 1;
            self.br.fill_window();
            let code_len = table.read_symbol(&mut self.br);
            if code_len < CODE_LENGTH_LITERALS {
                code_lengths[symbol] = code_len as u8;
                symbol += 1;
                if code_len != 0 {
                    prev_code_len = code_len as u8;
                }
            } else {
                let slot = usize::from(code_len - CODE_LENGTH_LITERALS);
                let repeat = self.br.read_bits(CODE_LENGTH_EXTRA_BITS[slot]) as usize
                    + CODE_LENGTH_REPEAT_OFFSETS[slot];
                if symbol + repeat > num_symbols {
                    return Err(DecodeError::HuffmanError("code length repeat overflows"));
                }
                let length = if code_len == CODE_LENGTH_REPEAT_CODE {
                    prev_code_len
                } else {
                    0
                };
                code_lengths[symbol..symbol + repeat].fill(length);
                symbol += repeat;
            }
            self.br.check_eos()?;
        }
        Ok(())
    }

    /// Length or distance prefix code plus its extra bits.
    #[inline]
    fn read_copy_value(&mut self, symbol: u16) -> u32 {
        let symbol = u32::from(symbol);
        if symbol < 4 {
            return symbol + 1;
        }
        let extra_bits = (symbol - 2) >> 1;
        let offset = (2 + (symbol & 1)) << extra_bits;
        offset + self.br.read_bits(extra_bits) + 1
    }

    /// Decodes `xsize * ysize` ARGB pixels.
    fn decode_pixels(
        &mut self,
        mut state: DecodeState,
        xsize: u32,
        ysize: u32,
    ) -> Result<Vec<u32>, DecodeError> {
        let width = xsize as usize;
        let total = width * ysize as usize;
        let mut data = vec![0u32; total];
        let mask = state.tile_mask();
        let len_code_limit = (NUM_LITERAL_CODES + NUM_LENGTH_CODES) as u16;
        let mut cache = state.cache.take();

        let mut pos = 0usize;
        let mut col = 0usize;
        let mut row = 0usize;
        let mut group_index = state.group_index(0, 0);

        while pos < total {
            self.br.check_eos()?;
            if col & mask == 0 {
                group_index = state.group_index(col, row);
            }
            let group = &state.groups[group_index];
            let htrees = &group.codes;

            if group.is_trivial_code {
                let argb = group.literal_arb;
                data[pos] = argb;
                if let Some(cache) = cache.as_mut() {
                    cache.insert(argb);
                }
                pos += 1;
                col += 1;
                if col >= width {
                    col = 0;
                    row += 1;
                }
                continue;
            }

            self.br.fill_window();
            let code = htrees[GREEN].read_symbol(&mut self.br);
            if u32::from(code) < NUM_LITERAL_CODES {
                let argb = if group.is_trivial_literal {
                    group.literal_arb | (u32::from(code) << 8)
                } else {
                    let red = htrees[RED].read_symbol(&mut self.br);
                    self.br.fill_window();
                    let blue = htrees[BLUE].read_symbol(&mut self.br);
                    let alpha = htrees[ALPHA].read_symbol(&mut self.br);
                    (u32::from(alpha) << 24)
                        | (u32::from(red) << 16)
                        | (u32::from(code) << 8)
                        | u32::from(blue)
                };
                data[pos] = argb;
                if let Some(cache) = cache.as_mut() {
                    cache.insert(argb);
                }
                pos += 1;
                col += 1;
                if col >= width {
                    col = 0;
                    row += 1;
                }
            } else if code < len_code_limit {
                let length = self.read_copy_value(code - NUM_LITERAL_CODES as u16) as usize;
                let dist_symbol = htrees[DIST].read_symbol(&mut self.br);
                self.br.fill_window();
                let dist_code = self.read_copy_value(dist_symbol);
                let dist = plane_code_to_distance(xsize, dist_code);
                if dist > pos || total - pos < length {
                    return Err(DecodeError::BitstreamError("backward reference out of range"));
                }
                for i in pos..pos + length {
                    data[i] = data[i - dist];
                }
                if let Some(cache) = cache.as_mut() {
                    for &argb in &data[pos..pos + length] {
                        cache.insert(argb);
                    }
                }
                pos += length;
                col += length;
                while col >= width {
                    col -= width;
                    row += 1;
                }
                if pos < total && col & mask != 0 {
                    group_index = state.group_index(col, row);
                }
            } else {
                let cache = cache
                    .as_mut()
                    .ok_or(DecodeError::BitstreamError("color cache symbol without cache"))?;
                let key = usize::from(code - len_code_limit);
                let argb = cache
                    .lookup(key)
                    .ok_or(DecodeError::BitstreamError("color cache index out of range"))?;
                cache.insert(argb);
                data[pos] = argb;
                pos += 1;
                col += 1;
                if col >= width {
                    col = 0;
                    row += 1;
                }
            }
        }
        // The last pixel may have been read from past the end of the input.
        self.br.check_eos()?;
        Ok(data)
    }

    /// Green-only variant of [`Self::decode_pixels`] for palette-coded alpha.
    fn decode_indices(
        &mut self,
        state: &DecodeState,
        xsize: u32,
        ysize: u32,
    ) -> Result<Vec<u8>, DecodeError> {
        let width = xsize as usize;
        let total = width * ysize as usize;
        let mut data = vec![0u8; total];
        let mask = state.tile_mask();
        let len_code_limit = (NUM_LITERAL_CODES + NUM_LENGTH_CODES) as u16;

        let mut pos = 0usize;
        let mut col = 0usize;
        let mut row = 0usize;
        let mut group_index = state.group_index(0, 0);

        while pos < total {
            self.br.check_eos()?;
            if col & mask == 0 {
                group_index = state.group_index(col, row);
            }
            let htrees = &state.groups[group_index].codes;
            self.br.fill_window();
            let code = htrees[GREEN].read_symbol(&mut self.br);
            if u32::from(code) < NUM_LITERAL_CODES {
                data[pos] = code as u8;
                pos += 1;
                col += 1;
                if col >= width {
                    col = 0;
                    row += 1;
                }
            } else if code < len_code_limit {
                let length = self.read_copy_value(code - NUM_LITERAL_CODES as u16) as usize;
                let dist_symbol = htrees[DIST].read_symbol(&mut self.br);
                self.br.fill_window();
                let dist_code = self.read_copy_value(dist_symbol);
                let dist = plane_code_to_distance(xsize, dist_code);
                if dist > pos || total - pos < length {
                    return Err(DecodeError::BitstreamError("backward reference out of range"));
                }
                for i in pos..pos + length {
                    data[i] = data[i - dist];
                }
                pos += length;
                col += length;
                while col >= width {
                    col -= width;
                    row += 1;
                }
                if pos < total && col & mask != 0 {
                    group_index = state.group_index(col, row);
                }
            } else {
                return Err(DecodeError::BitstreamError("color cache symbol without cache"));
            }
        }
        self.br.check_eos()?;
        Ok(data)
    }
}

/// Rebuilds the palette from its delta coding and pads it to the size the
/// index packing can address. Missing entries are transparent black.
fn expand_color_map(colors: &[u32], bits: u8) -> Vec<u32> {
    let final_num_colors = 1usize << (8 >> bits);
    let mut palette = vec![0u32; final_num_colors.max(colors.len())];
    let mut prev = 0u32;
    for (dst, &delta) in palette.iter_mut().zip(colors) {
        prev = add_pixels(prev, delta);
        *dst = prev;
    }
    palette
}

fn apply_inverse_transforms(transforms: &[Transform], pixels: Vec<u32>, height: u32) -> Vec<u32> {
    transforms
        .iter()
        .rev()
        .fold(pixels, |pixels, transform| transform.apply_inverse(pixels, height))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decoder::api::ErrorKind;
    use crate::decoder::bit_reader::tests::BitWriter;

    /// Header for a `width` x `height` image with the alpha hint set.
    fn write_header(w: &mut BitWriter, width: u32, height: u32) {
        w.write_bits(u32::from(VP8L_MAGIC), 8);
        w.write_bits(width - 1, 14);
        w.write_bits(height - 1, 14);
        w.write_bits(1, 1);
        w.write_bits(0, 3);
    }

    /// Five codes for a group where every channel is one fixed value.
    fn write_constant_group(w: &mut BitWriter, argb: u32) {
        w.write_simple_code(&[argb_green(argb)]);
        w.write_simple_code(&[(argb >> 16) as u8]);
        w.write_simple_code(&[argb as u8]);
        w.write_simple_code(&[(argb >> 24) as u8]);
        w.write_simple_code(&[0]);
    }

    #[test]
    fn plane_codes() {
        // (0, 1): one row up.
        assert_eq!(plane_code_to_distance(100, 1), 100);
        // (1, 0): one pixel to the left.
        assert_eq!(plane_code_to_distance(100, 2), 1);
        // (-1, 1): up and to the right.
        assert_eq!(plane_code_to_distance(100, 4), 99);
        // Clamped when the image is narrower than the offset.
        assert_eq!(plane_code_to_distance(1, 4), 1);
        assert_eq!(plane_code_to_distance(100, 121), 1);
        assert_eq!(plane_code_to_distance(100, 500), 380);
    }

    #[test]
    fn color_cache_round_trip() {
        let mut cache = ColorCache::new(4);
        for argb in [0xff000000, 0x12345678, 0xdeadbeef] {
            cache.insert(argb);
            assert_eq!(cache.lookup(cache.key(argb)), Some(argb));
        }
        assert_eq!(cache.lookup(16), None);
    }

    #[test]
    fn palette_is_delta_coded_and_padded() {
        let palette = expand_color_map(&[0xff102030, 0x01010101, 0x00ff0000], 2);
        assert_eq!(palette, [0xff102030, 0x00112131, 0x00102131, 0]);
    }

    #[test]
    fn header_fields() {
        let mut w = BitWriter::new();
        write_header(&mut w, 300, 2);
        let bytes = w.finish();
        let header = LosslessDecoder::new(&bytes).read_header().unwrap();
        assert_eq!(
            header,
            LosslessHeader {
                width: 300,
                height: 2,
                alpha_is_used: true
            }
        );
        assert!(matches!(
            LosslessDecoder::new(&[0x2e, 0, 0, 0, 0]).read_header(),
            Err(DecodeError::LosslessSignatureInvalid(0x2e))
        ));
    }

    #[test]
    fn trivial_group_fills_image() {
        let mut w = BitWriter::new();
        write_header(&mut w, 3, 2);
        w.write_bits(0, 1); // no transform
        w.write_bits(0, 1); // no color cache
        w.write_bits(0, 1); // no meta image
        write_constant_group(&mut w, 0x80402010);
        let bytes = w.finish();

        let mut dec = LosslessDecoder::new(&bytes);
        let header = dec.read_header().unwrap();
        let pixels = dec.decode_image(header.width, header.height).unwrap();
        assert_eq!(pixels, vec![0x80402010; 6]);
    }

    #[test]
    fn literals_and_backward_reference() {
        let mut w = BitWriter::new();
        write_header(&mut w, 4, 1);
        w.write_bits(0, 1);
        w.write_bits(0, 1);
        w.write_bits(0, 1);
        // Green: literal 0x11 (code 0) or length symbol 256 would need 9 bits,
        // so use a normal code: symbols 0x11 and 257 with one bit each.
        w.write_bits(0, 1); // normal code
        w.write_bits(0, 4); // 4 code length codes: orders 17, 18, 0, 1
        w.write_bits(0, 3);
        w.write_bits(0, 3);
        w.write_bits(1, 3); // length 0 -> 1 bit
        w.write_bits(1, 3); // length 1 -> 1 bit
        w.write_bits(0, 1); // max_symbol = alphabet
        // Code-length symbols: 0 -> code "0", 1 -> code "1".
        for symbol in 0..280 {
            let len = u32::from(symbol == 0x11 || symbol == 257);
            w.write_bits(len, 1);
        }
        w.write_simple_code(&[0x22]); // red
        w.write_simple_code(&[0x33]); // blue
        w.write_simple_code(&[0xff]); // alpha
        w.write_simple_code(&[1]); // distance symbol 1 -> code 2 -> distance 1
        // Pixels: literal, then copy of length 2 (symbol 257) at distance 1,
        // then another literal.
        w.write_bits(0, 1);
        w.write_bits(1, 1);
        w.write_bits(0, 1);
        let bytes = w.finish();

        let mut dec = LosslessDecoder::new(&bytes);
        let header = dec.read_header().unwrap();
        let pixels = dec.decode_image(header.width, header.height).unwrap();
        assert_eq!(pixels, vec![0xff221133; 4]);
    }

    #[test]
    fn backward_reference_before_start_is_rejected() {
        let mut w = BitWriter::new();
        write_header(&mut w, 2, 1);
        w.write_bits(0, 3);
        // Green code with a single length symbol is not expressible as a
        // simple code, so use the normal form with only symbol 256 present.
        w.write_bits(0, 1);
        w.write_bits(0, 4);
        w.write_bits(0, 3);
        w.write_bits(0, 3);
        w.write_bits(1, 3);
        w.write_bits(1, 3);
        w.write_bits(0, 1);
        for symbol in 0..280 {
            w.write_bits(u32::from(symbol == 256), 1);
        }
        for _ in 0..4 {
            w.write_simple_code(&[0]);
        }
        let bytes = w.finish();

        let mut dec = LosslessDecoder::new(&bytes);
        let header = dec.read_header().unwrap();
        assert!(matches!(
            dec.decode_image(header.width, header.height),
            Err(DecodeError::BitstreamError(_))
        ));
    }

    #[test]
    fn duplicate_transform_is_rejected() {
        let mut w = BitWriter::new();
        write_header(&mut w, 1, 1);
        w.write_bits(1, 1);
        w.write_bits(TransformType::SubtractGreen as u32, 2);
        w.write_bits(1, 1);
        w.write_bits(TransformType::SubtractGreen as u32, 2);
        let bytes = w.finish();
        let mut dec = LosslessDecoder::new(&bytes);
        let header = dec.read_header().unwrap();
        assert!(matches!(
            dec.decode_image(header.width, header.height),
            Err(DecodeError::TransformError(_))
        ));
    }

    #[test]
    fn invalid_cache_bits_are_rejected() {
        let mut w = BitWriter::new();
        write_header(&mut w, 1, 1);
        w.write_bits(0, 1);
        w.write_bits(1, 1);
        w.write_bits(12, 4);
        let bytes = w.finish();
        let mut dec = LosslessDecoder::new(&bytes);
        let header = dec.read_header().unwrap();
        assert!(matches!(
            dec.decode_image(header.width, header.height),
            Err(DecodeError::InvalidColorCacheBits(12))
        ));
    }

    /// Palette-coded alpha: four pixels using palette entries 1, 0, 1, 1.
    fn palette_alpha_stream(use_cache_path: bool) -> Vec<u8> {
        let mut w = BitWriter::new();
        w.write_bits(1, 1);
        w.write_bits(TransformType::ColorIndexing as u32, 2);
        w.write_bits(1, 8); // two colors
        // Palette sub-image (2x1): no cache, single group.
        w.write_bits(0, 1);
        w.write_simple_code(&[0x00, 0x80]); // green deltas
        w.write_simple_code(&[0]);
        w.write_simple_code(&[0]);
        w.write_simple_code(&[0]);
        w.write_simple_code(&[0]);
        w.write_bits(0, 1); // 0x00
        w.write_bits(1, 1); // 0x80
        w.write_bits(0, 1); // no transform follows
        if use_cache_path {
            // A color cache forces the 32-bit path.
            w.write_bits(1, 1);
            w.write_bits(1, 4);
        } else {
            w.write_bits(0, 1);
        }
        w.write_bits(0, 1); // no meta image
        // Packed image is 1 pixel wide: indices 1,0,1,1 -> 0b1101 at 1 bit each.
        w.write_simple_code(&[0b1101]);
        w.write_simple_code(&[0]);
        w.write_simple_code(&[0]);
        w.write_simple_code(&[0]);
        w.write_simple_code(&[0]);
        w.finish()
    }

    #[test]
    fn alpha_palette_fast_path_matches_full_decode() {
        for use_cache_path in [false, true] {
            let bytes = palette_alpha_stream(use_cache_path);
            let alpha = LosslessDecoder::new(&bytes).decode_alpha_plane(4, 1).unwrap();
            assert_eq!(alpha, [0x80, 0x00, 0x80, 0x80], "cache path: {use_cache_path}");
        }
    }

    /// Palette-coded 4 x `rows` alpha where every packed row costs one bit:
    /// even rows are indices 0,1,0,0 and odd rows 1,0,1,1.
    fn striped_alpha_stream(rows: u32) -> Vec<u8> {
        let mut w = BitWriter::new();
        w.write_bits(1, 1);
        w.write_bits(TransformType::ColorIndexing as u32, 2);
        w.write_bits(1, 8);
        w.write_bits(0, 1);
        w.write_simple_code(&[0x00, 0x80]);
        for _ in 0..4 {
            w.write_simple_code(&[0]);
        }
        w.write_bits(0, 1);
        w.write_bits(1, 1);
        w.write_bits(0, 1); // no transform follows
        w.write_bits(0, 1); // no color cache
        w.write_bits(0, 1); // no meta image
        w.write_simple_code(&[0b0010, 0b1101]); // "0" -> 0b0010, "1" -> 0b1101
        for _ in 0..4 {
            w.write_simple_code(&[0]);
        }
        for y in 0..rows {
            w.write_bits(y & 1, 1);
        }
        w.finish()
    }

    #[test]
    fn striped_alpha_decodes_every_row() {
        let bytes = striped_alpha_stream(16);
        let alpha = LosslessDecoder::new(&bytes).decode_alpha_plane(4, 16).unwrap();
        for (y, row) in alpha.chunks_exact(4).enumerate() {
            let expected = if y & 1 == 0 {
                [0x00, 0x80, 0x00, 0x00]
            } else {
                [0x80, 0x00, 0x80, 0x80]
            };
            assert_eq!(row, expected, "row {y}");
        }
    }

    #[test]
    fn truncated_palette_alpha_is_rejected() {
        let bytes = striped_alpha_stream(16);
        // Dropping the last byte leaves the final rows' bits past the end.
        let cut = &bytes[..bytes.len() - 1];
        let err = LosslessDecoder::new(cut).decode_alpha_plane(4, 16).unwrap_err();
        assert!(matches!(err, DecodeError::BitstreamError(_)), "{err}");
        assert_eq!(err.kind(), ErrorKind::Bitstream);

        for len in 8..bytes.len() {
            assert!(
                LosslessDecoder::new(&bytes[..len]).decode_alpha_plane(4, 16).is_err(),
                "length {len} decoded"
            );
        }
    }

    #[test]
    fn truncated_argb_pixels_are_rejected() {
        // 121 bits in all, so the final pixel's code bit is alone in the last byte.
        let mut w = BitWriter::new();
        write_header(&mut w, 5, 3);
        w.write_bits(0, 3);
        w.write_simple_code(&[0x10, 0x90]);
        w.write_simple_code(&[0x20]);
        w.write_simple_code(&[0x30]);
        w.write_simple_code(&[0xff]);
        w.write_simple_code(&[0]);
        for i in 0..15 {
            w.write_bits(i & 1, 1);
        }
        let bytes = w.finish();
        assert_eq!(bytes.len(), 16);

        let mut dec = LosslessDecoder::new(&bytes);
        let header = dec.read_header().unwrap();
        let pixels = dec.decode_image(header.width, header.height).unwrap();
        assert_eq!(pixels[13], 0xff209030);
        assert_eq!(pixels[14], 0xff201030);

        let cut = &bytes[..bytes.len() - 1];
        let mut dec = LosslessDecoder::new(cut);
        let header = dec.read_header().unwrap();
        let err = dec.decode_image(header.width, header.height).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Bitstream, "{err}");
    }

    proptest::proptest! {
        #[test]
        fn cache_returns_inserted_color(argb in proptest::num::u32::ANY, bits in 1u32..=MAX_CACHE_BITS) {
            let mut cache = ColorCache::new(bits);
            cache.insert(argb);
            let key = cache.key(argb);
            proptest::prop_assert!(key < cache.size());
            proptest::prop_assert_eq!(cache.lookup(key), Some(argb));
        }

        #[test]
        fn plane_codes_stay_positive(xsize in 1u32..=16384, code in 1u32..=4096) {
            let dist = plane_code_to_distance(xsize, code);
            proptest::prop_assert!(dist >= 1);
            if code > 120 {
                proptest::prop_assert_eq!(dist, (code - 120) as usize);
            }
        }
    }
}
