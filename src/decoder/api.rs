use alloc::string::String;
use alloc::vec;
use alloc::vec::Vec;

use log::debug;
use thiserror::Error;

use super::alpha::decode_alpha;
use super::container;
use super::limits::Limits;
use super::lossless::LosslessDecoder;
use super::vp8::Vp8Decoder;

/// Errors that can occur when attempting to decode a WebP image
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum DecodeError {
    /// RIFF's "RIFF" signature not found or invalid
    #[error("Invalid RIFF signature: {0:x?}")]
    RiffSignatureInvalid([u8; 4]),

    /// WebP's "WEBP" signature not found or invalid
    #[error("Invalid WebP signature: {0:x?}")]
    WebpSignatureInvalid([u8; 4]),

    /// An expected chunk was missing
    #[error("An expected chunk was missing")]
    ChunkMissing,

    /// Chunk Header was incorrect or invalid in its usage
    #[error("Invalid Chunk header: {0:x?}")]
    ChunkHeaderInvalid([u8; 4]),

    /// A chunk extends past its parent, or is too small for its contents
    #[error("Invalid chunk size")]
    InvalidChunkSize,

    /// The metadata record points outside the source bytes
    #[error("Image data range {offset}+{size} is outside the {len} byte source")]
    DataOutOfRange {
        /// Start of the range.
        offset: u64,
        /// Length of the range.
        size: u32,
        /// Length of the source.
        len: usize,
    },

    /// A header was cut short
    #[error("Not enough header data")]
    NotEnoughInitData,

    /// Width or height is zero
    #[error("Invalid image dimensions {width}x{height}")]
    InvalidDimensions {
        /// Decoded width.
        width: u32,
        /// Decoded height.
        height: u32,
    },

    /// The container and the bitstream disagree on the image size
    #[error("Inconsistent image sizes")]
    InconsistentImageSizes,

    /// Image is too large for the platform's pointer size
    #[error("Image too large")]
    ImageTooLarge,

    /// VP8's `[0x9D, 0x01, 0x2A]` magic not found or invalid
    #[error("Invalid VP8 magic: {0:x?}")]
    Vp8MagicInvalid([u8; 3]),

    /// At time of writing, only the YUV colour-space encoded as `0` is specified
    #[error("Invalid VP8 color space: {0}")]
    ColorSpaceInvalid(u8),

    /// A VP8 partition does not fit in the chunk
    #[error("Invalid VP8 partition size")]
    PartitionSizeInvalid,

    /// Signature of 0x2f not found
    #[error("Invalid lossless signature: {0:x?}")]
    LosslessSignatureInvalid(u8),

    /// Version Number was not zero
    #[error("Invalid lossless version number: {0}")]
    VersionNumberInvalid(u8),

    /// Reserved bits of the ALPH header byte were set
    #[error("Invalid alpha header byte: {0:#04x}")]
    InvalidAlphaHeader(u8),

    /// Invalid compression method
    #[error("Invalid compression method")]
    InvalidCompressionMethod,

    /// Alpha chunk doesn't match the frame's size
    #[error("Alpha chunk size mismatch")]
    AlphaChunkSizeMismatch,

    /// The entropy-coded data broke an invariant or ran out
    #[error("Corrupt bitstream: {0}")]
    BitstreamError(&'static str),

    /// An invalid Huffman code was encountered
    #[error("Invalid Huffman code: {0}")]
    HuffmanError(&'static str),

    /// The transforms specified were invalid
    #[error("Invalid transform: {0}")]
    TransformError(&'static str),

    /// Invalid color cache bits
    #[error("Invalid color cache bits: {0}")]
    InvalidColorCacheBits(u8),

    /// LUMA prediction mode was not recognised
    #[error("Invalid VP8 luma prediction mode: {0}")]
    LumaPredictionModeInvalid(i8),

    /// Intra-prediction mode was not recognised
    #[error("Invalid VP8 intra prediction mode: {0}")]
    IntraPredictionModeInvalid(i8),

    /// Chroma prediction mode was not recognised
    #[error("Invalid VP8 chroma prediction mode: {0}")]
    ChromaPredictionModeInvalid(i8),

    /// The file may be valid, but this crate doesn't support decoding it.
    #[error("Unsupported feature: {0}")]
    UnsupportedFeature(String),

    /// The operation exists in the API but has no implementation
    #[error("Not implemented: {0}")]
    NotImplemented(&'static str),

    /// A configured [`Limits`] value was exceeded
    #[error("Limit exceeded: {0}")]
    LimitExceeded(String),

    /// Memory limit exceeded
    #[error("Memory limit exceeded")]
    MemoryLimitExceeded,
}

/// Coarse classification of a [`DecodeError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Structural problem: bad signature, truncated header, size overflow.
    InvalidFormat,
    /// Entropy-coded content is corrupt or ends early.
    Bitstream,
    /// Valid input using a feature this decoder does not handle.
    Unsupported,
    /// The requested operation is not implemented.
    NotImplemented,
    /// Rejected by the caller's [`Limits`].
    LimitExceeded,
}

impl DecodeError {
    /// The category this error belongs to.
    pub fn kind(&self) -> ErrorKind {
        use DecodeError::*;
        match self {
            RiffSignatureInvalid(_)
            | WebpSignatureInvalid(_)
            | ChunkMissing
            | ChunkHeaderInvalid(_)
            | InvalidChunkSize
            | DataOutOfRange { .. }
            | NotEnoughInitData
            | InvalidDimensions { .. }
            | InconsistentImageSizes
            | ImageTooLarge
            | Vp8MagicInvalid(_)
            | ColorSpaceInvalid(_)
            | PartitionSizeInvalid
            | LosslessSignatureInvalid(_)
            | VersionNumberInvalid(_)
            | InvalidAlphaHeader(_)
            | InvalidCompressionMethod
            | AlphaChunkSizeMismatch => ErrorKind::InvalidFormat,
            BitstreamError(_)
            | HuffmanError(_)
            | TransformError(_)
            | InvalidColorCacheBits(_)
            | LumaPredictionModeInvalid(_)
            | IntraPredictionModeInvalid(_)
            | ChromaPredictionModeInvalid(_) => ErrorKind::Bitstream,
            UnsupportedFeature(_) => ErrorKind::Unsupported,
            NotImplemented(_) => ErrorKind::NotImplemented,
            LimitExceeded(_) | MemoryLimitExceeded => ErrorKind::LimitExceeded,
        }
    }
}

/// Methods for upsampling the chroma values in lossy decoding
///
/// The chroma red and blue planes are encoded in VP8 as half the size of the luma plane
/// Therefore we need to upsample these values up to fit each pixel in the image.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum UpsamplingMethod {
    /// Fancy upsampling
    ///
    /// Interpolates between the 4 chroma samples nearest to the pixel with
    /// 9:3:3:1 weights. Matches dwebp's default output exactly.
    #[default]
    Bilinear,
    /// Simple upsampling, just uses the closest u/v value to the pixel when upsampling
    ///
    /// Matches the -nofancy option in dwebp.
    Simple,
}

/// Options controlling a decode.
///
/// # Example
///
/// ```rust
/// use webpcore::{DecodeConfig, Limits, UpsamplingMethod};
///
/// let config = DecodeConfig::default()
///     .upsampling(UpsamplingMethod::Simple)
///     .limits(Limits::default().max_dimensions(4096, 4096));
/// assert!(config.apply_loop_filter);
/// ```
#[derive(Clone, Debug, PartialEq)]
#[non_exhaustive]
pub struct DecodeConfig {
    /// Chroma upsampling used for lossy images.
    pub upsampling: UpsamplingMethod,
    /// Resource limits checked before decoding.
    pub limits: Limits,
    /// Run the VP8 in-loop deblocking filter. Turning it off matches dwebp's
    /// `-nofilter` and is only useful for diagnostics.
    pub apply_loop_filter: bool,
}

impl Default for DecodeConfig {
    fn default() -> Self {
        Self {
            upsampling: UpsamplingMethod::default(),
            limits: Limits::default(),
            apply_loop_filter: true,
        }
    }
}

impl DecodeConfig {
    /// Set the chroma upsampling method.
    #[must_use]
    pub fn upsampling(mut self, method: UpsamplingMethod) -> Self {
        self.upsampling = method;
        self
    }

    /// Set the resource limits.
    #[must_use]
    pub fn limits(mut self, limits: Limits) -> Self {
        self.limits = limits;
        self
    }

    /// Enable or disable the VP8 loop filter.
    #[must_use]
    pub fn apply_loop_filter(mut self, apply: bool) -> Self {
        self.apply_loop_filter = apply;
        self
    }
}

/// Where the image data of a WebP file lives, as found by the container walk.
///
/// Offsets are relative to the start of the source passed to [`decode`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ImageMetadata {
    /// Image width in pixels.
    pub width: u32,
    /// Image height in pixels.
    pub height: u32,
    /// The bitstream is VP8L rather than VP8.
    pub is_lossless: bool,
    /// The image carries an alpha channel.
    pub has_alpha: bool,
    /// Offset of the `VP8 ` or `VP8L` payload.
    pub data_offset: u64,
    /// Length of the `VP8 ` or `VP8L` payload.
    pub data_size: u32,
    /// Offset of the `ALPH` payload, if any.
    pub alpha_offset: u64,
    /// Length of the `ALPH` payload; zero when there is none.
    pub alpha_size: u32,
}

impl ImageMetadata {
    /// Walks the RIFF container of a complete WebP file.
    pub fn probe(data: &[u8]) -> Result<Self, DecodeError> {
        container::probe(data)
    }
}

/// Layout of a [`DecodedImage`]'s pixel bytes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PixelFormat {
    /// B, G, R and a padding byte that is always `0xff`.
    Bgr32,
    /// B, G, R, A.
    Bgra32,
}

/// A decoded image, row-major with no padding between rows.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DecodedImage {
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
    /// What the fourth byte of each pixel means.
    pub format: PixelFormat,
    /// `width * height * 4` bytes.
    pub pixels: Vec<u8>,
}

impl DecodedImage {
    /// Bytes per row.
    pub fn stride(&self) -> usize {
        self.width as usize * 4
    }

    /// Whether every alpha byte is `0xff`.
    pub fn is_opaque(&self) -> bool {
        self.pixels.chunks_exact(4).all(|px| px[3] == 0xff)
    }
}

/// Cropped YUV 4:2:0 planes of a lossy image.
///
/// Contains separate Y, U, and V planes at their native resolutions.
/// Y is full resolution, U and V are half resolution in each dimension.
#[derive(Debug, Clone)]
pub struct YuvPlanes {
    /// Luma plane (full resolution).
    pub y: Vec<u8>,
    /// Chroma blue plane (half resolution in each dimension).
    pub u: Vec<u8>,
    /// Chroma red plane (half resolution in each dimension).
    pub v: Vec<u8>,
    /// Width of the luma plane in pixels.
    pub y_width: u32,
    /// Height of the luma plane in pixels.
    pub y_height: u32,
    /// Width of each chroma plane in pixels.
    pub uv_width: u32,
    /// Height of each chroma plane in pixels.
    pub uv_height: u32,
}

fn slice_source(data: &[u8], offset: u64, size: u32) -> Result<&[u8], DecodeError> {
    let out_of_range = || DecodeError::DataOutOfRange {
        offset,
        size,
        len: data.len(),
    };
    let start = usize::try_from(offset).map_err(|_| out_of_range())?;
    let end = start
        .checked_add(size as usize)
        .ok_or_else(out_of_range)?;
    data.get(start..end).ok_or_else(out_of_range)
}

fn output_size(width: u32, height: u32) -> Result<usize, DecodeError> {
    (width as usize)
        .checked_mul(height as usize)
        .and_then(|n| n.checked_mul(4))
        .ok_or(DecodeError::ImageTooLarge)
}

/// Decodes the image described by `metadata` out of `data` with default
/// options.
pub fn decode(metadata: &ImageMetadata, data: &[u8]) -> Result<DecodedImage, DecodeError> {
    decode_with_config(metadata, data, &DecodeConfig::default())
}

/// Decodes the image described by `metadata` out of `data`.
///
/// Nothing is returned unless the whole image decoded.
pub fn decode_with_config(
    metadata: &ImageMetadata,
    data: &[u8],
    config: &DecodeConfig,
) -> Result<DecodedImage, DecodeError> {
    let limits = &config.limits;
    limits.check_input_size(data.len() as u64)?;
    let (width, height) = (metadata.width, metadata.height);
    if width == 0 || height == 0 {
        return Err(DecodeError::InvalidDimensions { width, height });
    }
    limits.check_dimensions(width, height)?;
    let out_len = output_size(width, height)?;
    let payload = slice_source(data, metadata.data_offset, metadata.data_size)?;

    debug!(
        "decoding {}x{} {} image, {:?} upsampling",
        width,
        height,
        if metadata.is_lossless { "lossless" } else { "lossy" },
        config.upsampling,
    );

    let image = if metadata.is_lossless {
        // The ARGB plane plus the output.
        limits.check_memory(out_len.saturating_mul(2))?;
        let mut decoder = LosslessDecoder::new(payload);
        let header = decoder.read_header()?;
        if (header.width, header.height) != (width, height) {
            return Err(DecodeError::InconsistentImageSizes);
        }
        let argb = decoder.decode_image(width, height)?;
        compose_lossless(&argb, width, height, metadata.has_alpha)
    } else {
        let decoder = Vp8Decoder::new(payload, config.apply_loop_filter)?;
        if decoder.dimensions() != (width, height) {
            return Err(DecodeError::InconsistentImageSizes);
        }
        limits.check_memory(out_len.saturating_add(decoder.buffer_size()))?;
        let frame = decoder.decode()?;

        let mut pixels = vec![0u8; out_len];
        frame.fill_bgra(&mut pixels, config.upsampling);

        let alpha = if metadata.alpha_size > 0 {
            let chunk = slice_source(data, metadata.alpha_offset, metadata.alpha_size)?;
            Some(decode_alpha(chunk, width, height)?)
        } else {
            None
        };
        compose_lossy(pixels, alpha.as_deref(), width, height)
    };
    Ok(image)
}

/// Converts decoded ARGB words to BGRA bytes.
fn compose_lossless(argb: &[u32], width: u32, height: u32, has_alpha: bool) -> DecodedImage {
    let mut pixels = Vec::with_capacity(argb.len() * 4);
    for &p in argb {
        // Little-endian ARGB is B, G, R, A in memory order.
        let mut bgra = p.to_le_bytes();
        if !has_alpha {
            bgra[3] = 0xff;
        }
        pixels.extend_from_slice(&bgra);
    }
    DecodedImage {
        width,
        height,
        format: if has_alpha {
            PixelFormat::Bgra32
        } else {
            PixelFormat::Bgr32
        },
        pixels,
    }
}

/// Merges an optional alpha plane into lossy BGRA output.
fn compose_lossy(mut pixels: Vec<u8>, alpha: Option<&[u8]>, width: u32, height: u32) -> DecodedImage {
    let format = match alpha {
        Some(plane) => {
            for (px, &a) in pixels.chunks_exact_mut(4).zip(plane) {
                px[3] = a;
            }
            PixelFormat::Bgra32
        }
        None => PixelFormat::Bgr32,
    };
    DecodedImage {
        width,
        height,
        format,
        pixels,
    }
}

/// Decode a complete WebP file to BGRA pixels (blue, green, red, alpha order).
///
/// # Example
///
/// ```rust,no_run
/// let webp_data: &[u8] = &[]; // your WebP data
/// let image = webpcore::decode_bgra(webp_data)?;
/// assert_eq!(image.pixels.len(), image.stride() * image.height as usize);
/// # Ok::<(), webpcore::DecodeError>(())
/// ```
pub fn decode_bgra(data: &[u8]) -> Result<DecodedImage, DecodeError> {
    let metadata = ImageMetadata::probe(data)?;
    decode(&metadata, data)
}

/// Decode a lossy WebP file to its YUV 4:2:0 planes, skipping colour
/// conversion. Alpha is ignored.
pub fn decode_yuv420(data: &[u8]) -> Result<YuvPlanes, DecodeError> {
    let metadata = ImageMetadata::probe(data)?;
    if metadata.is_lossless {
        return Err(DecodeError::UnsupportedFeature(
            "YUV output of lossless images".into(),
        ));
    }
    let limits = Limits::default();
    limits.check_input_size(data.len() as u64)?;
    limits.check_dimensions(metadata.width, metadata.height)?;

    let payload = slice_source(data, metadata.data_offset, metadata.data_size)?;
    let decoder = Vp8Decoder::new(payload, true)?;
    limits.check_memory(decoder.buffer_size())?;
    let frame = decoder.decode()?;
    let (y, u, v) = frame.cropped_planes();
    Ok(YuvPlanes {
        y,
        u,
        v,
        y_width: u32::from(frame.width),
        y_height: u32::from(frame.height),
        uv_width: frame.chroma_width() as u32,
        uv_height: frame.chroma_height() as u32,
    })
}

/// Encoding is not supported; always fails with
/// [`DecodeError::NotImplemented`].
pub fn encode(_pixels: &[u8], _width: u32, _height: u32) -> Result<Vec<u8>, DecodeError> {
    Err(DecodeError::NotImplemented("WebP encoding"))
}
