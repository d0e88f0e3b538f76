//! Per-frame tables derived from the VP8 frame header: dequantisation
//! factors, coefficient probabilities and loop filter strengths.

use crate::common::types::*;

use super::arithmetic::BooleanDecoder;

/// Dequantisation factors for one segment.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub(crate) struct QuantMatrix {
    pub(crate) ydc: i32,
    pub(crate) yac: i32,
    pub(crate) y2dc: i32,
    pub(crate) y2ac: i32,
    pub(crate) uvdc: i32,
    pub(crate) uvac: i32,
}

/// The five optional quantiser deltas from the frame header.
#[derive(Debug, Default, Clone, Copy)]
pub(crate) struct QuantDeltas {
    pub(crate) ydc: i32,
    pub(crate) y2dc: i32,
    pub(crate) y2ac: i32,
    pub(crate) uvdc: i32,
    pub(crate) uvac: i32,
}

impl QuantDeltas {
    pub(crate) fn read(b: &mut BooleanDecoder<'_>) -> Self {
        Self {
            ydc: b.read_optional_signed_value(4),
            y2dc: b.read_optional_signed_value(4),
            y2ac: b.read_optional_signed_value(4),
            uvdc: b.read_optional_signed_value(4),
            uvac: b.read_optional_signed_value(4),
        }
    }
}

fn dc_quant(index: i32) -> i32 {
    i32::from(DC_QUANT[index.clamp(0, 127) as usize])
}

fn ac_quant(index: i32) -> i32 {
    i32::from(AC_QUANT[index.clamp(0, 127) as usize])
}

impl QuantMatrix {
    /// Builds the factors for quantiser index `q`.
    pub(crate) fn new(q: i32, deltas: &QuantDeltas) -> Self {
        Self {
            ydc: dc_quant(q + deltas.ydc),
            yac: ac_quant(q),
            y2dc: dc_quant(q + deltas.y2dc) * 2,
            y2ac: (ac_quant(q + deltas.y2ac) * 155 / 100).max(8),
            uvdc: dc_quant(q + deltas.uvdc).min(132),
            uvac: ac_quant(q + deltas.uvac),
        }
    }
}

/// Coefficient probabilities indexed by `[plane][position][context]`, where
/// position 16 is a sentinel that is never read.
pub(crate) type TokenProbs = [[[[Prob; NUM_DCT_TOKENS - 1]; 3]; 17]; 4];

/// Reads the per-frame probability updates on top of the default tables and
/// expands bands into coefficient positions.
pub(crate) fn read_token_probs(b: &mut BooleanDecoder<'_>) -> TokenProbs {
    let mut bands = COEFF_PROBS;
    for (plane, updates) in bands.iter_mut().zip(COEFF_UPDATE_PROBS.iter()) {
        for (band, band_updates) in plane.iter_mut().zip(updates.iter()) {
            for (ctx, ctx_updates) in band.iter_mut().zip(band_updates.iter()) {
                for (prob, &update) in ctx.iter_mut().zip(ctx_updates.iter()) {
                    if b.read_bool(update) {
                        *prob = b.read_literal(8) as u8;
                    }
                }
            }
        }
    }

    let mut probs = [[[[0u8; NUM_DCT_TOKENS - 1]; 3]; 17]; 4];
    for (plane, by_pos) in probs.iter_mut().enumerate() {
        for (pos, ctx) in by_pos.iter_mut().enumerate() {
            *ctx = bands[plane][usize::from(COEFF_BANDS[pos])];
        }
    }
    probs
}

/// Loop filter strength for one (segment, 4x4-predicted) pair.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub(crate) struct FilterInfo {
    /// Edge limit for inner edges; macroblock edges use `limit + 4`.
    /// Zero disables filtering.
    pub(crate) limit: u8,
    pub(crate) interior_limit: u8,
    pub(crate) hev_thresh: u8,
    /// Whether the inner 4x4 edges are filtered.
    pub(crate) inner: bool,
}

/// Frame-level loop filter parameters.
#[derive(Debug, Default, Clone, Copy)]
pub(crate) struct FilterHeader {
    pub(crate) simple: bool,
    pub(crate) level: u8,
    pub(crate) sharpness: u8,
    pub(crate) use_lf_delta: bool,
    pub(crate) ref_lf_delta: [i32; 4],
    pub(crate) mode_lf_delta: [i32; 4],
}

impl FilterHeader {
    pub(crate) fn read(b: &mut BooleanDecoder<'_>) -> Self {
        let mut header = Self {
            simple: b.read_flag(),
            level: b.read_literal(6) as u8,
            sharpness: b.read_literal(3) as u8,
            use_lf_delta: b.read_flag(),
            ..Self::default()
        };
        if header.use_lf_delta && b.read_flag() {
            for delta in &mut header.ref_lf_delta {
                *delta = b.read_optional_signed_value(6);
            }
            for delta in &mut header.mode_lf_delta {
                *delta = b.read_optional_signed_value(6);
            }
        }
        header
    }

    /// Computes the filter strength for a macroblock whose segment has
    /// `base_level` as its filter level.
    pub(crate) fn strength(&self, base_level: i32, is_4x4: bool) -> FilterInfo {
        let mut level = base_level;
        if self.use_lf_delta {
            level += self.ref_lf_delta[0];
            if is_4x4 {
                level += self.mode_lf_delta[0];
            }
        }
        let level = level.clamp(0, 63) as u8;
        if level == 0 {
            return FilterInfo {
                inner: is_4x4,
                ..FilterInfo::default()
            };
        }

        let mut interior_limit = level;
        if self.sharpness > 0 {
            interior_limit >>= if self.sharpness > 4 { 2 } else { 1 };
            interior_limit = interior_limit.min(9 - self.sharpness);
        }
        let interior_limit = interior_limit.max(1);

        FilterInfo {
            limit: 2 * level + interior_limit,
            interior_limit,
            hev_thresh: u8::from(level >= 40) + u8::from(level >= 15),
            inner: is_4x4,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decoder::arithmetic::tests::BoolEncoder;

    #[test]
    fn quantiser_clamps_and_scales() {
        let m = QuantMatrix::new(0, &QuantDeltas::default());
        assert_eq!((m.ydc, m.yac), (4, 4));
        assert_eq!(m.y2dc, 8);
        // 4 * 155 / 100 = 6, raised to the minimum of 8.
        assert_eq!(m.y2ac, 8);

        let m = QuantMatrix::new(200, &QuantDeltas::default());
        assert_eq!(m.yac, 284);
        assert_eq!(m.y2ac, 284 * 155 / 100);
        assert_eq!(m.uvdc, 132);

        let deltas = QuantDeltas {
            ydc: -5,
            ..QuantDeltas::default()
        };
        assert_eq!(QuantMatrix::new(2, &deltas).ydc, 4);
    }

    #[test]
    fn probabilities_default_without_updates() {
        let mut e = BoolEncoder::new();
        for plane in COEFF_UPDATE_PROBS {
            for band in plane {
                for ctx in band {
                    for update in ctx {
                        e.write_bool(false, update);
                    }
                }
            }
        }
        let data = e.finish();
        let mut b = BooleanDecoder::new(&data);
        let probs = read_token_probs(&mut b);
        assert!(b.check(()).is_ok());
        assert_eq!(probs[1][0], COEFF_PROBS[1][0]);
        assert_eq!(probs[3][4], COEFF_PROBS[3][6]);
        assert_eq!(probs[2][15], COEFF_PROBS[2][7]);
    }

    #[test]
    fn probability_update_lands_in_every_position_of_the_band() {
        let mut e = BoolEncoder::new();
        for (i, plane) in COEFF_UPDATE_PROBS.iter().enumerate() {
            for (j, band) in plane.iter().enumerate() {
                for (k, ctx) in band.iter().enumerate() {
                    for (t, &update) in ctx.iter().enumerate() {
                        let hit = (i, j, k, t) == (0, 6, 2, 0);
                        e.write_bool(hit, update);
                        if hit {
                            e.write_literal(8, 77);
                        }
                    }
                }
            }
        }
        let data = e.finish();
        let probs = read_token_probs(&mut BooleanDecoder::new(&data));
        for pos in [4, 7, 14] {
            assert_eq!(probs[0][pos][2][0], 77);
        }
        assert_eq!(probs[0][5][2][0], COEFF_PROBS[0][4][2][0]);
    }

    #[test]
    fn filter_strengths() {
        let header = FilterHeader {
            level: 20,
            ..FilterHeader::default()
        };
        let info = header.strength(20, false);
        assert_eq!(info.interior_limit, 20);
        assert_eq!(info.limit, 60);
        assert_eq!(info.hev_thresh, 1);
        assert!(!info.inner);

        let sharp = FilterHeader {
            sharpness: 5,
            ..header
        };
        // 20 >> 2 = 5, capped at 9 - 5 = 4.
        assert_eq!(sharp.strength(20, true).interior_limit, 4);
        assert!(sharp.strength(20, true).inner);

        assert_eq!(header.strength(45, false).hev_thresh, 2);
        assert_eq!(header.strength(3, false).hev_thresh, 0);
        assert_eq!(header.strength(0, false).limit, 0);

        let delta = FilterHeader {
            use_lf_delta: true,
            ref_lf_delta: [-30, 0, 0, 0],
            mode_lf_delta: [10, 0, 0, 0],
            ..header
        };
        assert_eq!(delta.strength(20, false).limit, 0);
        assert_eq!(delta.strength(25, true).limit, 2 * 5 + 5);
    }
}
