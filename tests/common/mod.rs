//! Builders for synthetic WebP files shared by the integration tests.
#![allow(dead_code)]

/// `convert -size 2x2 xc:#f00 red.webp`
pub const RED_2X2: [u8; 68] = [
    0x52, 0x49, 0x46, 0x46, 0x3c, 0x00, 0x00, 0x00, 0x57, 0x45, 0x42, 0x50, 0x56, 0x50, 0x38, 0x20,
    0x30, 0x00, 0x00, 0x00, 0xd0, 0x01, 0x00, 0x9d, 0x01, 0x2a, 0x02, 0x00, 0x02, 0x00, 0x02, 0x00,
    0x34, 0x25, 0xa0, 0x02, 0x74, 0xba, 0x01, 0xf8, 0x00, 0x03, 0xb0, 0x00, 0xfe, 0xf0, 0xc4, 0x0b,
    0xff, 0x20, 0xb9, 0x61, 0x75, 0xc8, 0xd7, 0xff, 0x20, 0x3f, 0xe4, 0x07, 0xfc, 0x80, 0xff, 0xf8,
    0xf2, 0x00, 0x00, 0x00,
];

/// The same bitstream with a 3x3 frame size, so the image ends mid chroma sample.
pub fn red_3x3() -> Vec<u8> {
    let mut data = RED_2X2.to_vec();
    data[26] = 3;
    data[28] = 3;
    data
}

/// The `VP8 ` payload of [`RED_2X2`].
pub fn red_2x2_bitstream() -> &'static [u8] {
    &RED_2X2[20..]
}

pub fn chunk(fourcc: &[u8; 4], payload: &[u8]) -> Vec<u8> {
    let mut out = fourcc.to_vec();
    out.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    out.extend_from_slice(payload);
    if payload.len() % 2 == 1 {
        out.push(0);
    }
    out
}

pub fn riff(chunks: &[Vec<u8>]) -> Vec<u8> {
    let body: Vec<u8> = chunks.concat();
    let mut out = b"RIFF".to_vec();
    out.extend_from_slice(&(body.len() as u32 + 4).to_le_bytes());
    out.extend_from_slice(b"WEBP");
    out.extend_from_slice(&body);
    out
}

pub const ALPHA_FLAG: u8 = 0x10;
pub const ANIMATION_FLAG: u8 = 0x02;

pub fn vp8x(flags: u8, width: u32, height: u32) -> Vec<u8> {
    let mut payload = vec![flags, 0, 0, 0];
    payload.extend_from_slice(&(width - 1).to_le_bytes()[..3]);
    payload.extend_from_slice(&(height - 1).to_le_bytes()[..3]);
    chunk(b"VP8X", &payload)
}

/// LSB-first bit packer for VP8L streams.
#[derive(Default)]
pub struct BitWriter {
    buffer: Vec<u8>,
    bits: u64,
    used: u8,
}

impl BitWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn write_bits(&mut self, value: u32, n_bits: u8) {
        self.bits |= u64::from(value) << self.used;
        self.used += n_bits;
        while self.used >= 8 {
            self.buffer.push(self.bits as u8);
            self.bits >>= 8;
            self.used -= 8;
        }
    }

    /// A simple prefix code holding one or two 8-bit symbols.
    pub fn write_simple_code(&mut self, symbols: &[u8]) {
        self.write_bits(1, 1);
        self.write_bits(symbols.len() as u32 - 1, 1);
        self.write_bits(1, 1);
        for &s in symbols {
            self.write_bits(u32::from(s), 8);
        }
    }

    pub fn finish(mut self) -> Vec<u8> {
        if self.used > 0 {
            self.buffer.push(self.bits as u8);
        }
        self.buffer
    }
}

/// A VP8L stream using the subtract-green transform.
///
/// Green alternates between 0x40 and 0x80 in a checkerboard starting with
/// 0x40; red and blue are stored as 0x10 and 0x20 before green is added back.
/// Decoded BGRA is `[0x60, 0x40, 0x50, 0xff]` on even squares and
/// `[0xa0, 0x80, 0x90, 0xff]` on odd ones.
pub fn checkerboard_lossless(width: u32, height: u32, alpha_is_used: bool) -> Vec<u8> {
    let mut w = BitWriter::new();
    w.write_bits(0x2f, 8);
    w.write_bits(width - 1, 14);
    w.write_bits(height - 1, 14);
    w.write_bits(u32::from(alpha_is_used), 1);
    w.write_bits(0, 3);

    w.write_bits(1, 1); // transform present
    w.write_bits(2, 2); // subtract green
    w.write_bits(0, 1); // no more transforms
    w.write_bits(0, 1); // no color cache
    w.write_bits(0, 1); // no meta prefix codes

    w.write_simple_code(&[0x40, 0x80]); // green: 0x40 -> "0", 0x80 -> "1"
    w.write_simple_code(&[0x10]); // red
    w.write_simple_code(&[0x20]); // blue
    w.write_simple_code(&[0xff]); // alpha
    w.write_simple_code(&[0]); // distance

    for y in 0..height {
        for x in 0..width {
            w.write_bits((x + y) & 1, 1);
        }
    }
    w.finish()
}

pub fn subtract_green_2x2(alpha_is_used: bool) -> Vec<u8> {
    checkerboard_lossless(2, 2, alpha_is_used)
}

/// A 2x2 VP8L stream with four distinct pixels and only the subtract-green
/// transform. Decodes to the BGRA values in [`FOUR_COLORS_BGRA`].
pub fn four_colors_lossless() -> Vec<u8> {
    let mut w = BitWriter::new();
    w.write_bits(0x2f, 8);
    w.write_bits(1, 14);
    w.write_bits(1, 14);
    w.write_bits(0, 1);
    w.write_bits(0, 3);

    w.write_bits(1, 1); // transform present
    w.write_bits(2, 2); // subtract green
    w.write_bits(0, 1);
    w.write_bits(0, 1); // no color cache
    w.write_bits(0, 1); // no meta prefix codes

    w.write_simple_code(&[0x40, 0x80]); // green
    w.write_simple_code(&[0x10, 0x30]); // red
    w.write_simple_code(&[0x20]); // blue
    w.write_simple_code(&[0xff]); // alpha
    w.write_simple_code(&[0]); // distance

    // (green, red) code bits per pixel; blue and alpha take no bits.
    for (g, r) in [(0, 0), (1, 0), (0, 1), (1, 1)] {
        w.write_bits(g, 1);
        w.write_bits(r, 1);
    }
    w.finish()
}

pub const FOUR_COLORS_BGRA: [[u8; 4]; 4] = [
    [0x60, 0x40, 0x50, 0xff],
    [0xa0, 0x80, 0x90, 0xff],
    [0x60, 0x40, 0x70, 0xff],
    [0xa0, 0x80, 0xb0, 0xff],
];
