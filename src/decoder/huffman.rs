//! Canonical Huffman tables for VP8L.
//!
//! Tables are flat: a root table indexed by the next `root_bits` bits of the
//! stream, followed by second-level tables for codes longer than the root.
//! A root entry whose `bits` exceeds the root width points at its sub-table.

use alloc::vec;
use alloc::vec::Vec;

use super::api::DecodeError;
use super::bit_reader::WindowBitReader;

/// Longest code length VP8L allows.
pub(crate) const MAX_ALLOWED_CODE_LENGTH: usize = 15;

/// Root width for the five per-group codes.
pub(crate) const HUFFMAN_TABLE_BITS: u32 = 8;

/// Root width for the code-length code, whose lengths never exceed 7.
pub(crate) const LENGTHS_TABLE_BITS: u32 = 7;

/// One table slot: how many bits the code uses, and the symbol (or sub-table offset).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub(crate) struct HuffmanCode {
    pub(crate) bits: u8,
    pub(crate) value: u16,
}

#[derive(Clone, Debug, Default)]
pub(crate) struct HuffmanTable {
    root_bits: u32,
    entries: Vec<HuffmanCode>,
}

impl HuffmanTable {
    /// Builds the decode table for `code_lengths` with a root of `root_bits` bits.
    pub(crate) fn build(code_lengths: &[u8], root_bits: u32) -> Result<Self, DecodeError> {
        let mut count = [0u16; MAX_ALLOWED_CODE_LENGTH + 1];
        for &len in code_lengths {
            if usize::from(len) > MAX_ALLOWED_CODE_LENGTH {
                return Err(DecodeError::HuffmanError("code length above 15"));
            }
            count[usize::from(len)] += 1;
        }
        if usize::from(count[0]) == code_lengths.len() {
            return Err(DecodeError::HuffmanError("no symbols in code"));
        }

        let mut offset = [0u16; MAX_ALLOWED_CODE_LENGTH + 1];
        for len in 1..MAX_ALLOWED_CODE_LENGTH {
            if u32::from(count[len]) > 1 << len {
                return Err(DecodeError::HuffmanError("over-subscribed code"));
            }
            offset[len + 1] = offset[len] + count[len];
        }

        let mut sorted = vec![0u16; code_lengths.len()];
        for (symbol, &len) in code_lengths.iter().enumerate() {
            if len > 0 {
                let slot = &mut offset[usize::from(len)];
                sorted[usize::from(*slot)] = symbol as u16;
                *slot += 1;
            }
        }
        let num_symbols = usize::from(offset[MAX_ALLOWED_CODE_LENGTH]);

        let root_size = 1usize << root_bits;
        let mut entries = vec![HuffmanCode::default(); root_size];

        if num_symbols == 1 {
            entries.fill(HuffmanCode {
                bits: 0,
                value: sorted[0],
            });
            return Ok(Self { root_bits, entries });
        }

        let mask = root_size - 1;
        let mut key = 0usize;
        let mut symbol = 0usize;
        let mut num_nodes = 1i32;
        let mut num_open = 1i32;

        let mut step = 2usize;
        for len in 1..=root_bits as usize {
            num_open <<= 1;
            num_nodes += num_open;
            num_open -= i32::from(count[len]);
            if num_open < 0 {
                return Err(DecodeError::HuffmanError("over-subscribed code"));
            }
            while count[len] > 0 {
                let code = HuffmanCode {
                    bits: len as u8,
                    value: sorted[symbol],
                };
                symbol += 1;
                replicate(&mut entries[key..], step, root_size, code);
                key = next_key(key, len);
                count[len] -= 1;
            }
            step <<= 1;
        }

        let mut table_start = 0usize;
        let mut table_size = root_size;
        let mut low = usize::MAX;
        step = 2;
        for len in root_bits as usize + 1..=MAX_ALLOWED_CODE_LENGTH {
            num_open <<= 1;
            num_nodes += num_open;
            num_open -= i32::from(count[len]);
            if num_open < 0 {
                return Err(DecodeError::HuffmanError("over-subscribed code"));
            }
            while count[len] > 0 {
                if key & mask != low {
                    table_start += table_size;
                    let table_bits = next_table_bit_size(&count, len, root_bits as usize);
                    table_size = 1 << table_bits;
                    entries.resize(table_start + table_size, HuffmanCode::default());
                    low = key & mask;
                    entries[low] = HuffmanCode {
                        bits: (table_bits + root_bits as usize) as u8,
                        value: table_start as u16,
                    };
                }
                let code = HuffmanCode {
                    bits: (len - root_bits as usize) as u8,
                    value: sorted[symbol],
                };
                symbol += 1;
                let sub = table_start + (key >> root_bits);
                replicate(&mut entries[sub..], step, table_size, code);
                key = next_key(key, len);
                count[len] -= 1;
            }
            step <<= 1;
        }

        if num_nodes != 2 * num_symbols as i32 - 1 {
            return Err(DecodeError::HuffmanError("incomplete code"));
        }
        Ok(Self { root_bits, entries })
    }

    /// True when the code has a single symbol and consumes no bits.
    #[inline]
    pub(crate) fn is_trivial(&self) -> bool {
        self.entries[0].bits == 0
    }

    /// The symbol of a trivial code.
    #[inline]
    pub(crate) fn trivial_symbol(&self) -> u16 {
        self.entries[0].value
    }

    /// Decodes one symbol. The caller keeps the bit window filled.
    #[inline]
    pub(crate) fn read_symbol(&self, br: &mut WindowBitReader<'_>) -> u16 {
        let val = br.prefetch_bits();
        let mut entry = self.entries[(val & ((1 << self.root_bits) - 1)) as usize];
        let extra = u32::from(entry.bits).saturating_sub(self.root_bits);
        if extra > 0 {
            br.skip_bits(self.root_bits);
            let val = br.prefetch_bits();
            entry = self.entries[usize::from(entry.value) + (val & ((1 << extra) - 1)) as usize];
        }
        br.skip_bits(u32::from(entry.bits));
        entry.value
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }
}

/// Fills every `step`-th entry of `table[..end]` with `code`, walking down from `end`.
#[inline]
fn replicate(table: &mut [HuffmanCode], step: usize, end: usize, code: HuffmanCode) {
    let mut i = end;
    loop {
        i -= step;
        table[i] = code;
        if i == 0 {
            break;
        }
    }
}

/// Increments `key` in bit-reversed order over its low `len` bits.
#[inline]
fn next_key(key: usize, len: usize) -> usize {
    let mut step = 1 << (len - 1);
    while key & step != 0 {
        step >>= 1;
    }
    if step != 0 {
        (key & (step - 1)) + step
    } else {
        key
    }
}

/// Width of the second-level table needed for codes starting at `len`.
fn next_table_bit_size(
    count: &[u16; MAX_ALLOWED_CODE_LENGTH + 1],
    mut len: usize,
    root_bits: usize,
) -> usize {
    let mut left = 1i32 << (len - root_bits);
    while len < MAX_ALLOWED_CODE_LENGTH {
        left -= i32::from(count[len]);
        if left <= 0 {
            break;
        }
        len += 1;
        left <<= 1;
    }
    len - root_bits
}

/// Index of each code inside a [`HuffmanGroup`].
pub(crate) const GREEN: usize = 0;
pub(crate) const RED: usize = 1;
pub(crate) const BLUE: usize = 2;
pub(crate) const ALPHA: usize = 3;
pub(crate) const DIST: usize = 4;

/// The five codes used for one tile of the image.
#[derive(Clone, Debug, Default)]
pub(crate) struct HuffmanGroup {
    pub(crate) codes: [HuffmanTable; 5],
    /// Red, blue and alpha each have a single symbol.
    pub(crate) is_trivial_literal: bool,
    /// Green is a single literal as well, so every pixel is `literal_arb`.
    pub(crate) is_trivial_code: bool,
    /// The fixed ARGB bits contributed by trivial codes.
    pub(crate) literal_arb: u32,
}

impl HuffmanGroup {
    pub(crate) fn new(codes: [HuffmanTable; 5]) -> Self {
        let is_trivial_literal =
            codes[RED].is_trivial() && codes[BLUE].is_trivial() && codes[ALPHA].is_trivial();
        let mut literal_arb = 0;
        let mut is_trivial_code = false;
        if is_trivial_literal {
            literal_arb = (u32::from(codes[ALPHA].trivial_symbol()) << 24)
                | (u32::from(codes[RED].trivial_symbol()) << 16)
                | u32::from(codes[BLUE].trivial_symbol());
            if codes[GREEN].is_trivial() && codes[GREEN].trivial_symbol() < 256 {
                is_trivial_code = true;
                literal_arb |= u32::from(codes[GREEN].trivial_symbol()) << 8;
            }
        }
        Self {
            codes,
            is_trivial_literal,
            is_trivial_code,
            literal_arb,
        }
    }
}
