//! WebP decoder implementation

mod alpha;
mod api;
pub(crate) mod arithmetic;
mod bit_reader;
mod container;
mod huffman;
mod limits;
mod loop_filter;
mod lossless;
mod lossless_transform;
mod quant;
mod vp8;
mod yuv;

// Re-export public API
pub use alpha::{filter, unfilter, AlphaFilter};
pub use api::{
    decode, decode_bgra, decode_with_config, decode_yuv420, encode, DecodeConfig, DecodeError,
    DecodedImage, ErrorKind, ImageMetadata, PixelFormat, UpsamplingMethod, YuvPlanes,
};
pub use limits::Limits;
