//! RIFF container walk producing [`ImageMetadata`].
//!
//! Only still images are accepted. The walk records where the bitstream and
//! optional `ALPH` chunk live; it never interprets metadata chunks.

use alloc::format;
use core::ops::Range;

use hashbrown::HashMap;
use log::{debug, warn};

use super::api::{DecodeError, ImageMetadata};
use super::vp8::FrameHeader;
use crate::slice_reader::SliceReader;

const RIFF_HEADER_SIZE: usize = 12;
const CHUNK_HEADER_SIZE: usize = 8;
const VP8X_CHUNK_SIZE: usize = 10;
const VP8L_HEADER_SIZE: usize = 5;
const VP8L_MAGIC: u8 = 0x2f;

const ANIMATION_FLAG: u8 = 0x02;
const ALPHA_FLAG: u8 = 0x10;

/// Chunk kinds the container layer distinguishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) enum ChunkKind {
    Vp8,
    Vp8l,
    Vp8x,
    Alph,
    Anim,
    Anmf,
    Frgm,
    Iccp,
    Exif,
    Xmp,
    Unknown([u8; 4]),
}

impl ChunkKind {
    pub(crate) const fn from_fourcc(fourcc: [u8; 4]) -> Self {
        match &fourcc {
            b"VP8 " => Self::Vp8,
            b"VP8L" => Self::Vp8l,
            b"VP8X" => Self::Vp8x,
            b"ALPH" => Self::Alph,
            b"ANIM" => Self::Anim,
            b"ANMF" => Self::Anmf,
            b"FRGM" => Self::Frgm,
            b"ICCP" => Self::Iccp,
            b"EXIF" => Self::Exif,
            b"XMP " => Self::Xmp,
            _ => Self::Unknown(fourcc),
        }
    }
}

/// The fields of a `VP8X` chunk this decoder cares about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ExtendedHeader {
    flags: u8,
    canvas_width: u32,
    canvas_height: u32,
}

impl ExtendedHeader {
    fn parse(payload: &[u8]) -> Result<Self, DecodeError> {
        if payload.len() < VP8X_CHUNK_SIZE {
            return Err(DecodeError::InvalidChunkSize);
        }
        let mut r = SliceReader::new(payload);
        let flags = r.read_u8()?;
        r.skip(3)?;
        let canvas_width = r.read_u24_le()? + 1;
        let canvas_height = r.read_u24_le()? + 1;
        Ok(Self {
            flags,
            canvas_width,
            canvas_height,
        })
    }
}

/// Dimensions and alpha hint from the 5-byte VP8L header.
fn lossless_info(payload: &[u8]) -> Result<(u32, u32, bool), DecodeError> {
    let mut r = SliceReader::new(payload);
    let signature = r.read_u8()?;
    if signature != VP8L_MAGIC {
        return Err(DecodeError::LosslessSignatureInvalid(signature));
    }
    let bits = r.read_u32_le()?;
    let version = bits >> 29;
    if version != 0 {
        return Err(DecodeError::VersionNumberInvalid(version as u8));
    }
    let width = (bits & 0x3fff) + 1;
    let height = ((bits >> 14) & 0x3fff) + 1;
    Ok((width, height, (bits >> 28) & 1 != 0))
}

fn read_chunk_header(r: &mut SliceReader<'_>) -> Result<([u8; 4], usize), DecodeError> {
    let mut fourcc = [0u8; 4];
    r.read_exact(&mut fourcc)?;
    let size = r.read_u32_le()? as usize;
    Ok((fourcc, size))
}

/// Walks the container and locates the image data.
pub(crate) fn probe(data: &[u8]) -> Result<ImageMetadata, DecodeError> {
    let mut r = SliceReader::new(data);
    let (riff, riff_size) = read_chunk_header(&mut r)?;
    if &riff != b"RIFF" {
        return Err(DecodeError::RiffSignatureInvalid(riff));
    }
    let mut webp = [0u8; 4];
    r.read_exact(&mut webp)?;
    if &webp != b"WEBP" {
        return Err(DecodeError::WebpSignatureInvalid(webp));
    }
    if riff_size < 4 + CHUNK_HEADER_SIZE {
        return Err(DecodeError::InvalidChunkSize);
    }
    let riff_end = riff_size
        .checked_add(CHUNK_HEADER_SIZE)
        .filter(|&end| end <= data.len())
        .ok_or(DecodeError::InvalidChunkSize)?;
    if riff_end < data.len() {
        warn!("{} trailing bytes after the RIFF chunk", data.len() - riff_end);
    }

    let mut chunks: HashMap<ChunkKind, Range<usize>> = HashMap::new();
    let mut first = None;
    let mut image = None;
    let mut pos = RIFF_HEADER_SIZE;

    while riff_end - pos >= CHUNK_HEADER_SIZE {
        let mut r = SliceReader::new(&data[pos..riff_end]);
        let (fourcc, size) = read_chunk_header(&mut r)?;
        let start = pos + CHUNK_HEADER_SIZE;
        let end = start
            .checked_add(size)
            .filter(|&end| end <= riff_end)
            .ok_or(DecodeError::InvalidChunkSize)?;
        let kind = ChunkKind::from_fourcc(fourcc);
        debug!("chunk {:?} at {}..{}", kind, start, end);

        match kind {
            ChunkKind::Anim | ChunkKind::Anmf => {
                return Err(DecodeError::UnsupportedFeature("animated images".into()))
            }
            ChunkKind::Frgm => {
                return Err(DecodeError::UnsupportedFeature("image fragments".into()))
            }
            ChunkKind::Vp8 | ChunkKind::Vp8l if image.is_none() => image = Some(kind),
            ChunkKind::Unknown(fourcc) => warn!("skipping unknown chunk {fourcc:x?}"),
            _ => {}
        }
        if first.is_none() {
            first = Some(kind);
        }
        chunks.entry(kind).or_insert(start..end);

        // Chunk payloads are padded to an even size.
        pos = (end + (size & 1)).min(riff_end);

        // A simple file holds nothing but the bitstream.
        if first != Some(ChunkKind::Vp8x) {
            break;
        }
    }

    let extended = match first {
        Some(ChunkKind::Vp8x) => {
            let range = chunks.get(&ChunkKind::Vp8x).cloned().ok_or(DecodeError::ChunkMissing)?;
            let header = ExtendedHeader::parse(&data[range])?;
            debug!(
                "VP8X: flags {:#04x}, canvas {}x{}",
                header.flags, header.canvas_width, header.canvas_height
            );
            if header.flags & ANIMATION_FLAG != 0 {
                return Err(DecodeError::UnsupportedFeature("animated images".into()));
            }
            Some(header)
        }
        Some(ChunkKind::Vp8 | ChunkKind::Vp8l) => None,
        Some(ChunkKind::Unknown(fourcc)) => return Err(DecodeError::ChunkHeaderInvalid(fourcc)),
        Some(_) | None => return Err(DecodeError::ChunkMissing),
    };

    let kind = image.ok_or(DecodeError::ChunkMissing)?;
    let range = chunks.get(&kind).cloned().ok_or(DecodeError::ChunkMissing)?;
    let payload = &data[range.clone()];

    let (width, height, is_lossless, has_alpha, alpha) = match kind {
        ChunkKind::Vp8 => {
            let header = FrameHeader::parse(payload)?;
            let alpha = chunks.get(&ChunkKind::Alph).cloned();
            (
                u32::from(header.width),
                u32::from(header.height),
                false,
                alpha.is_some(),
                alpha,
            )
        }
        _ => {
            if payload.len() < VP8L_HEADER_SIZE {
                return Err(DecodeError::NotEnoughInitData);
            }
            let (width, height, alpha_hint) = lossless_info(payload)?;
            let flagged = extended.is_some_and(|h| h.flags & ALPHA_FLAG != 0);
            (width, height, true, alpha_hint || flagged, None)
        }
    };

    if let Some(header) = extended {
        if (header.canvas_width, header.canvas_height) != (width, height) {
            return Err(DecodeError::InconsistentImageSizes);
        }
    }

    let alpha = alpha.unwrap_or(0..0);
    let metadata = ImageMetadata {
        width,
        height,
        is_lossless,
        has_alpha,
        data_offset: range.start as u64,
        data_size: u32::try_from(range.len()).map_err(|_| DecodeError::InvalidChunkSize)?,
        alpha_offset: alpha.start as u64,
        alpha_size: u32::try_from(alpha.len()).map_err(|_| DecodeError::InvalidChunkSize)?,
    };
    debug!(
        "{} image {}x{}, {}",
        if is_lossless { "lossless" } else { "lossy" },
        width,
        height,
        if has_alpha {
            format!("with alpha ({} bytes)", metadata.alpha_size)
        } else {
            "opaque".into()
        },
    );
    Ok(metadata)
}
