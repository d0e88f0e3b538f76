//! LSB-first bit reader for VP8L streams.
//!
//! Keeps a 64-bit little-endian window over the input. Callers may read up to
//! 24 bits at a time; the window is refilled byte by byte as bits are consumed.

use super::api::DecodeError;

/// Width of the bit window.
const LBITS: u32 = 64;
/// Refill threshold used by [`WindowBitReader::fill_window`].
const WBITS: u32 = 32;
/// Largest value accepted by [`WindowBitReader::read_bits`].
pub(crate) const MAX_READ_BITS: u32 = 24;

pub(crate) struct WindowBitReader<'a> {
    data: &'a [u8],
    val: u64,
    pos: usize,
    bit_pos: u32,
    eos: bool,
}

impl<'a> WindowBitReader<'a> {
    pub(crate) fn new(data: &'a [u8]) -> Self {
        let mut val = 0u64;
        let pos = data.len().min(8);
        for (i, &byte) in data[..pos].iter().enumerate() {
            val |= u64::from(byte) << (8 * i);
        }
        Self {
            data,
            val,
            pos,
            bit_pos: 0,
            eos: false,
        }
    }

    /// Reads `n_bits` (at most 24) bits, least significant first.
    ///
    /// Once the stream is exhausted every read returns 0.
    #[inline]
    pub(crate) fn read_bits(&mut self, n_bits: u32) -> u32 {
        debug_assert!(n_bits <= MAX_READ_BITS);
        if !self.eos && n_bits <= MAX_READ_BITS {
            let value = self.prefetch_bits() & ((1u32 << n_bits) - 1);
            self.bit_pos += n_bits;
            self.shift_bytes();
            value
        } else {
            self.set_end_of_stream();
            0
        }
    }

    /// Reads a single bit as a flag.
    #[inline]
    pub(crate) fn read_bit(&mut self) -> bool {
        self.read_bits(1) != 0
    }

    /// Returns the next 32 bits of the window without consuming them.
    #[inline]
    pub(crate) fn prefetch_bits(&self) -> u32 {
        (self.val >> (self.bit_pos & (LBITS - 1))) as u32
    }

    /// Consumes `n_bits` previously inspected with [`Self::prefetch_bits`].
    #[inline]
    pub(crate) fn skip_bits(&mut self, n_bits: u32) {
        self.bit_pos += n_bits;
    }

    /// Tops up the window so at least 32 unread bits are available, if the input has them.
    #[inline]
    pub(crate) fn fill_window(&mut self) {
        if self.bit_pos >= WBITS {
            self.shift_bytes();
        }
    }

    /// Latches and reports whether reads have run past the end of the input.
    #[inline]
    pub(crate) fn is_end_of_stream(&mut self) -> bool {
        if !self.eos && self.pos == self.data.len() && self.bit_pos > LBITS {
            self.set_end_of_stream();
        }
        self.eos
    }

    /// Turns an exhausted stream into an error.
    #[inline]
    pub(crate) fn check_eos(&mut self) -> Result<(), DecodeError> {
        if self.is_end_of_stream() {
            Err(DecodeError::BitstreamError("VP8L stream truncated"))
        } else {
            Ok(())
        }
    }

    fn shift_bytes(&mut self) {
        while self.bit_pos >= 8 && self.pos < self.data.len() {
            self.val >>= 8;
            self.val |= u64::from(self.data[self.pos]) << (LBITS - 8);
            self.pos += 1;
            self.bit_pos -= 8;
        }
        if self.pos == self.data.len() && self.bit_pos > LBITS {
            self.set_end_of_stream();
        }
    }

    #[cold]
    fn set_end_of_stream(&mut self) {
        self.eos = true;
        self.bit_pos = 0;
    }
}
