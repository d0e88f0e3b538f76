//! ALPH chunk decoding.
//!
//! The chunk starts with one header byte, followed by either the raw alpha
//! plane or a headerless VP8L stream whose green channel carries alpha. The
//! plane may additionally be coded as residuals of a spatial predictor.

use alloc::vec;
use alloc::vec::Vec;

use log::{debug, warn};

use super::api::DecodeError;
use super::lossless::LosslessDecoder;

/// How the alpha plane bytes are stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum AlphaCompression {
    None,
    Lossless,
}

/// Spatial predictor applied to the alpha plane before coding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AlphaFilter {
    /// Bytes are stored as-is.
    #[default]
    None,
    /// Each byte is predicted from its left neighbour.
    Horizontal,
    /// Each byte is predicted from the byte above.
    Vertical,
    /// Each byte is predicted from `clamp(left + top - top_left)`.
    Gradient,
}

impl AlphaFilter {
    fn from_bits(bits: u8) -> Self {
        match bits & 3 {
            0 => Self::None,
            1 => Self::Horizontal,
            2 => Self::Vertical,
            _ => Self::Gradient,
        }
    }
}

/// The ALPH header byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct AlphaHeader {
    pub(crate) compression: AlphaCompression,
    pub(crate) filter: AlphaFilter,
    pub(crate) pre_processing: u8,
}

impl AlphaHeader {
    /// Splits the ALPH header byte into compression, filter and
    /// pre-processing fields.
    ///
    /// Unknown compression methods and set reserved bits are errors.
    /// Pre-processing levels 2 and 3 are reserved but accepted with a
    /// warning; the level is only a hint about how the encoder quantized the
    /// plane, so the stored values decode the same either way.
    pub(crate) fn parse(byte: u8) -> Result<Self, DecodeError> {
        let compression = match byte & 3 {
            0 => AlphaCompression::None,
            1 => AlphaCompression::Lossless,
            _ => return Err(DecodeError::InvalidCompressionMethod),
        };
        let filter = AlphaFilter::from_bits(byte >> 2);
        let pre_processing = (byte >> 4) & 3;
        if byte >> 6 != 0 {
            return Err(DecodeError::InvalidAlphaHeader(byte));
        }
        if pre_processing > 1 {
            warn!("alpha pre-processing level {pre_processing} is reserved, ignoring");
        }
        Ok(Self {
            compression,
            filter,
            pre_processing,
        })
    }
}

/// Decodes an ALPH chunk payload into a `width * height` alpha plane.
pub(crate) fn decode_alpha(data: &[u8], width: u32, height: u32) -> Result<Vec<u8>, DecodeError> {
    let (&first, payload) = data.split_first().ok_or(DecodeError::AlphaChunkSizeMismatch)?;
    let header = AlphaHeader::parse(first)?;
    debug!(
        "ALPH: {:?}, filter {:?}, pre-processing {}",
        header.compression, header.filter, header.pre_processing
    );

    let num_pixels = width as usize * height as usize;
    let mut plane = match header.compression {
        AlphaCompression::None => payload
            .get(..num_pixels)
            .ok_or(DecodeError::AlphaChunkSizeMismatch)?
            .to_vec(),
        AlphaCompression::Lossless => {
            LosslessDecoder::new(payload).decode_alpha_plane(width, height)?
        }
    };
    unfilter(header.filter, &mut plane, width as usize, height as usize);
    Ok(plane)
}

#[inline]
fn gradient_predictor(left: u8, top: u8, top_left: u8) -> u8 {
    (i16::from(left) + i16::from(top) - i16::from(top_left)).clamp(0, 255) as u8
}

/// Reverses `filter` in place on a row-major `width * height` plane.
///
/// The first row is always predicted from the left, and the first byte of
/// every later row from the byte above it.
pub fn unfilter(filter: AlphaFilter, plane: &mut [u8], width: usize, height: usize) {
    if filter == AlphaFilter::None || width == 0 {
        return;
    }
    for y in 0..height.min(plane.len() / width) {
        let (done, rest) = plane.split_at_mut(y * width);
        let row = &mut rest[..width];
        let prev = if y == 0 {
            None
        } else {
            Some(&done[(y - 1) * width..])
        };
        match (filter, prev) {
            (AlphaFilter::None, _) => {}
            (_, None) | (AlphaFilter::Horizontal, _) => {
                let mut pred = prev.map_or(0, |p| p[0]);
                for v in row.iter_mut() {
                    *v = v.wrapping_add(pred);
                    pred = *v;
                }
            }
            (AlphaFilter::Vertical, Some(prev)) => {
                for (v, &top) in row.iter_mut().zip(prev) {
                    *v = v.wrapping_add(top);
                }
            }
            (AlphaFilter::Gradient, Some(prev)) => {
                let mut left = prev[0];
                let mut top_left = prev[0];
                for (v, &top) in row.iter_mut().zip(prev) {
                    left = v.wrapping_add(gradient_predictor(left, top, top_left));
                    top_left = top;
                    *v = left;
                }
            }
        }
    }
}

/// Applies `filter` to a row-major plane, producing the residuals that
/// [`unfilter`] turns back into `plane`.
pub fn filter(filter: AlphaFilter, plane: &[u8], width: usize, height: usize) -> Vec<u8> {
    let mut out = vec![0u8; plane.len()];
    if filter == AlphaFilter::None || width == 0 {
        out.copy_from_slice(plane);
        return out;
    }
    for y in 0..height.min(plane.len() / width) {
        let row = &plane[y * width..][..width];
        let dst = &mut out[y * width..][..width];
        let prev = if y == 0 {
            None
        } else {
            Some(&plane[(y - 1) * width..][..width])
        };
        match (filter, prev) {
            (AlphaFilter::None, _) => {}
            (_, None) | (AlphaFilter::Horizontal, _) => {
                dst[0] = row[0].wrapping_sub(prev.map_or(0, |p| p[0]));
                for x in 1..width {
                    dst[x] = row[x].wrapping_sub(row[x - 1]);
                }
            }
            (AlphaFilter::Vertical, Some(prev)) => {
                for x in 0..width {
                    dst[x] = row[x].wrapping_sub(prev[x]);
                }
            }
            (AlphaFilter::Gradient, Some(prev)) => {
                dst[0] = row[0].wrapping_sub(prev[0]);
                for x in 1..width {
                    let pred = gradient_predictor(row[x - 1], prev[x], prev[x - 1]);
                    dst[x] = row[x].wrapping_sub(pred);
                }
            }
        }
    }
    out
}
