//! Boolean entropy decoder for VP8 partitions.
//!
//! The range is kept as `range - 1` so that a split never overflows eight bits,
//! and renormalisation is a single table lookup instead of a shift loop. Bytes
//! are loaded seven at a time into a 64-bit accumulator; `bits` counts how many
//! of them are still unread below the current 8-bit window.

use super::api::DecodeError;
use super::vp8::TreeNode;

/// Number of bits pulled from the partition by one bulk load.
const BITS: i32 = 56;

const fn log2_range_table() -> [u8; 128] {
    let mut table = [0u8; 128];
    let mut i = 0;
    while i < 128 {
        // 7 - floor(log2(i + 1))
        let range = (i + 1) as u32;
        table[i] = (7 - (31 - range.leading_zeros())) as u8;
        i += 1;
    }
    table
}

const fn new_range_table() -> [u8; 128] {
    let mut table = [0u8; 128];
    let mut i = 0;
    while i < 128 {
        let shift = LOG2_RANGE[i];
        table[i] = (((i as u32 + 1) << shift) - 1) as u8;
        i += 1;
    }
    table
}

/// Renormalisation shift for `range - 1 <= 0x7e`.
pub(crate) const LOG2_RANGE: [u8; 128] = log2_range_table();

/// `range - 1` after renormalisation, indexed by `range - 1 <= 0x7e`.
pub(crate) const NEW_RANGE: [u8; 128] = new_range_table();

/// Binary arithmetic decoder over one VP8 partition.
///
/// Reads past the end of the partition yield zero bits and latch [`Self::is_eof`].
pub(crate) struct BooleanDecoder<'a> {
    data: &'a [u8],
    pos: usize,
    value: u64,
    range: u32,
    bits: i32,
    eof: bool,
}

impl<'a> BooleanDecoder<'a> {
    pub(crate) fn new(data: &'a [u8]) -> Self {
        let mut decoder = Self {
            data,
            pos: 0,
            value: 0,
            range: 255 - 1,
            bits: -8,
            eof: false,
        };
        decoder.load_new_bytes();
        decoder
    }

    #[inline]
    fn load_new_bytes(&mut self) {
        if let Some(chunk) = self.data.get(self.pos..self.pos + 8) {
            // Only the first seven bytes are consumed; the eighth keeps the read in bounds.
            let mut word = [0u8; 8];
            word.copy_from_slice(chunk);
            let in_bits = u64::from_be_bytes(word) >> 8;
            self.pos += (BITS / 8) as usize;
            self.value = (self.value << BITS) | in_bits;
            self.bits += BITS;
        } else {
            self.load_final_bytes();
        }
    }

    #[cold]
    fn load_final_bytes(&mut self) {
        if let Some(&byte) = self.data.get(self.pos) {
            self.pos += 1;
            self.bits += 8;
            self.value = (self.value << 8) | u64::from(byte);
        } else if !self.eof {
            self.value <<= 8;
            self.bits += 8;
            self.eof = true;
        } else {
            // Keep shifting in zeros without letting `bits` run away.
            self.bits = 0;
        }
    }

    /// Decodes one bit whose probability of being zero is `prob / 256`.
    #[inline]
    pub(crate) fn read_bool(&mut self, prob: u8) -> bool {
        if self.bits < 0 {
            self.load_new_bytes();
        }
        let mut range = self.range;
        let pos = self.bits;
        let split = (range * u32::from(prob)) >> 8;
        let value = (self.value >> pos) as u32;
        let bit = value > split;
        if bit {
            range -= split + 1;
            self.value -= u64::from(split + 1) << pos;
        } else {
            range = split;
        }
        if range <= 0x7e {
            let idx = range as usize;
            self.bits -= i32::from(LOG2_RANGE[idx]);
            range = u32::from(NEW_RANGE[idx]);
        }
        self.range = range;
        bit
    }

    /// [`Self::read_bool`] as an integer, for arithmetic on token values.
    #[inline]
    pub(crate) fn read_bit(&mut self, prob: u8) -> i32 {
        i32::from(self.read_bool(prob))
    }

    #[inline]
    pub(crate) fn read_flag(&mut self) -> bool {
        self.read_bool(128)
    }

    /// Reads `n` equiprobable bits, most significant first.
    pub(crate) fn read_literal(&mut self, n: u8) -> u32 {
        let mut v = 0u32;
        for _ in 0..n {
            v = (v << 1) | u32::from(self.read_flag());
        }
        v
    }

    /// Reads an `n` bit magnitude followed by a sign bit.
    pub(crate) fn read_signed_literal(&mut self, n: u8) -> i32 {
        let magnitude = self.read_literal(n) as i32;
        if self.read_flag() {
            -magnitude
        } else {
            magnitude
        }
    }

    /// A presence flag, then (if set) a signed literal; absent values are 0.
    pub(crate) fn read_optional_signed_value(&mut self, n: u8) -> i32 {
        if self.read_flag() {
            self.read_signed_literal(n)
        } else {
            0
        }
    }

    /// Walks a probability tree from the root, returning the leaf value.
    pub(crate) fn read_with_tree(&mut self, tree: &[TreeNode]) -> i8 {
        let mut index = 0usize;
        loop {
            let node = tree[index];
            let branch = if self.read_bool(node.prob) {
                node.right
            } else {
                node.left
            };
            if branch & 0x80 != 0 {
                return TreeNode::value_from_branch(branch);
            }
            index = usize::from(branch);
        }
    }

    #[inline]
    pub(crate) fn is_eof(&self) -> bool {
        self.eof
    }

    /// Passes `value` through unless the partition ran dry while producing it.
    #[inline]
    pub(crate) fn check<T>(&self, value: T) -> Result<T, DecodeError> {
        if self.eof {
            Err(DecodeError::BitstreamError("VP8 partition exhausted"))
        } else {
            Ok(value)
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::common::types::*;
    use alloc::vec;
    use alloc::vec::Vec;

    /// Range coder from RFC 6386 section 7.3, used to produce test partitions.
    pub(crate) struct BoolEncoder {
        writer: Vec<u8>,
        bottom: u32,
        range: u32,
        bit_num: i32,
    }

    impl BoolEncoder {
        pub(crate) fn new() -> Self {
            Self {
                writer: vec![],
                bottom: 0,
                range: 255,
                bit_num: 24,
            }
        }

        fn add_one_to_output(&mut self) {
            let mut i = self.writer.len();
            while i > 0 {
                i -= 1;
                if self.writer[i] < 255 {
                    self.writer[i] += 1;
                    return;
                }
                self.writer[i] = 0;
            }
            self.writer.insert(0, 1);
        }

        pub(crate) fn write_bool(&mut self, bit: bool, prob: u8) {
            let split = 1 + (((self.range - 1) * u32::from(prob)) >> 8);
            if bit {
                self.bottom += split;
                self.range -= split;
            } else {
                self.range = split;
            }
            while self.range < 128 {
                self.range <<= 1;
                if self.bottom & (1 << 31) != 0 {
                    self.add_one_to_output();
                }
                self.bottom <<= 1;
                self.bit_num -= 1;
                if self.bit_num == 0 {
                    self.writer.push((self.bottom >> 24) as u8);
                    self.bottom &= (1 << 24) - 1;
                    self.bit_num = 8;
                }
            }
        }

        pub(crate) fn write_flag(&mut self, bit: bool) {
            self.write_bool(bit, 128);
        }

        pub(crate) fn write_literal(&mut self, n: u8, value: u32) {
            for bit in (0..n).rev() {
                self.write_flag((value >> bit) & 1 != 0);
            }
        }

        pub(crate) fn write_optional_signed(&mut self, n: u8, value: Option<i32>) {
            self.write_flag(value.is_some());
            if let Some(value) = value {
                self.write_literal(n, value.unsigned_abs());
                self.write_flag(value < 0);
            }
        }

        /// Encodes `value` as a leaf of `tree`, walking up from the leaf.
        pub(crate) fn write_with_tree(&mut self, tree: &[i8], probs: &[u8], value: i8) {
            let mut path = Vec::new();
            let mut index = tree
                .iter()
                .position(|&x| x == -value)
                .expect("value is a leaf of the tree");
            loop {
                path.push((index % 2 == 1, probs[index / 2]));
                let node_start = index - index % 2;
                if node_start == 0 {
                    break;
                }
                index = tree
                    .iter()
                    .position(|&x| x > 0 && x as usize == node_start)
                    .expect("node has a parent");
            }
            for &(bit, prob) in path.iter().rev() {
                self.write_bool(bit, prob);
            }
        }

        pub(crate) fn finish(mut self) -> Vec<u8> {
            let mut c = self.bit_num;
            let mut v = self.bottom;
            if self.bottom & (1 << (32 - self.bit_num)) != 0 {
                self.add_one_to_output();
            }
            v <<= c & 0b111;
            c = (c >> 3) - 1;
            while c >= 0 {
                v <<= 8;
                c -= 1;
            }
            for _ in 0..4 {
                self.writer.push((v >> 24) as u8);
                v <<= 8;
            }
            self.writer
        }
    }

    #[test]
    fn renormalisation_tables() {
        assert_eq!(LOG2_RANGE[0], 7);
        assert_eq!(LOG2_RANGE[1], 6);
        assert_eq!(LOG2_RANGE[2], 6);
        assert_eq!(LOG2_RANGE[3], 5);
        assert_eq!(LOG2_RANGE[127], 0);
        assert_eq!(&NEW_RANGE[..9], &[127, 127, 191, 127, 159, 191, 223, 127, 143]);
        // After renormalisation the range is always back in [128, 255].
        for i in 0..=0x7e {
            assert!(NEW_RANGE[i] >= 127);
        }
    }

    #[test]
    fn decodes_known_bytes() {
        let mut d = BooleanDecoder::new(&[104, 101, 107, 128]);
        assert!(!d.read_flag());
        assert!(d.read_bool(10));
        assert!(!d.read_bool(250));
        assert_eq!(d.read_literal(1), 1);
        assert_eq!(d.read_literal(3), 5);
        assert_eq!(d.read_literal(8), 64);
        assert_eq!(d.read_literal(8), 185);
        assert!(d.check(()).is_ok());
    }

    #[test]
    fn encoder_round_trip() {
        let mut e = BoolEncoder::new();
        e.write_bool(true, 40);
        e.write_bool(true, 110);
        e.write_bool(false, 70);
        e.write_bool(false, 10);
        e.write_bool(true, 5);
        e.write_optional_signed(6, Some(-17));
        e.write_optional_signed(6, None);
        e.write_literal(7, 99);
        let bytes = e.finish();

        let mut d = BooleanDecoder::new(&bytes);
        assert!(d.read_bool(40));
        assert!(d.read_bool(110));
        assert!(!d.read_bool(70));
        assert!(!d.read_bool(10));
        assert!(d.read_bool(5));
        assert_eq!(d.read_optional_signed_value(6), -17);
        assert_eq!(d.read_optional_signed_value(6), 0);
        assert_eq!(d.read_literal(7), 99);
        assert!(!d.is_eof());
    }

    #[test]
    fn long_partition_crosses_bulk_loads() {
        let mut e = BoolEncoder::new();
        for i in 0..2000u32 {
            e.write_bool(i % 3 == 0, (i % 255) as u8 + 1);
        }
        let bytes = e.finish();
        let mut d = BooleanDecoder::new(&bytes);
        for i in 0..2000u32 {
            assert_eq!(d.read_bool((i % 255) as u8 + 1), i % 3 == 0, "bit {i}");
        }
        assert!(d.check(()).is_ok());
    }

    #[test]
    fn tree_round_trip() {
        use crate::decoder::vp8::tree_nodes_from;
        let nodes = tree_nodes_from(KEYFRAME_YMODE_TREE, KEYFRAME_YMODE_PROBS);
        let mut e = BoolEncoder::new();
        for mode in [LumaMode::TM, LumaMode::B, LumaMode::DC, LumaMode::H, LumaMode::V] {
            e.write_with_tree(&KEYFRAME_YMODE_TREE, &KEYFRAME_YMODE_PROBS, mode as i8);
        }
        let bytes = e.finish();
        let mut d = BooleanDecoder::new(&bytes);
        for mode in [LumaMode::TM, LumaMode::B, LumaMode::DC, LumaMode::H, LumaMode::V] {
            assert_eq!(d.read_with_tree(&nodes), mode as i8);
        }
    }

    #[test]
    fn exhausted_partition_reads_zero_and_latches() {
        let mut d = BooleanDecoder::new(&[]);
        assert_eq!(d.read_literal(8), 0);
        assert!(d.is_eof());
        assert!(d.check(()).is_err());
        assert_eq!(d.read_literal(16), 0);
    }

    proptest::proptest! {
        #[test]
        fn random_bools_round_trip(
            bits in proptest::collection::vec((proptest::bool::ANY, 1u8..=255), 0..600),
        ) {
            let mut e = BoolEncoder::new();
            for &(bit, prob) in &bits {
                e.write_bool(bit, prob);
            }
            let bytes = e.finish();
            let mut d = BooleanDecoder::new(&bytes);
            for &(bit, prob) in &bits {
                proptest::prop_assert_eq!(d.read_bool(prob), bit);
            }
            proptest::prop_assert!(!d.is_eof());
        }

        #[test]
        fn decoding_is_deterministic(
            data in proptest::collection::vec(proptest::num::u8::ANY, 0..64),
            probs in proptest::collection::vec(proptest::num::u8::ANY, 1..200),
        ) {
            let mut a = BooleanDecoder::new(&data);
            let mut b = BooleanDecoder::new(&data);
            for &p in &probs {
                proptest::prop_assert_eq!(a.read_bool(p), b.read_bool(p));
            }
            proptest::prop_assert_eq!(a.is_eof(), b.is_eof());
        }
    }
}
