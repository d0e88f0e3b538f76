//! Decoding of WebP still images
//!
//! This crate decodes lossy (VP8) and lossless (VP8L) WebP images, with or
//! without an `ALPH` alpha channel, into packed BGRA pixels. Animated files
//! are recognised and rejected.
//!
//! # Features
//!
//! - `std` (default): implement `std::error::Error` for [`DecodeError`].
//!
//! # no_std Support
//!
//! Decoding is fully supported in `no_std` environments (requires `alloc`):
//! ```toml
//! [dependencies]
//! webpcore = { version = "...", default-features = false }
//! ```
//!
//! All decoding functions take `&[u8]` slices directly - no Read/Seek traits required.
//!
//! # Decoding
//!
//! Use the convenience function:
//!
//! ```rust,no_run
//! let webp_data: &[u8] = &[]; // your WebP data
//! let image = webpcore::decode_bgra(webp_data)?;
//! println!("{}x{}, opaque: {}", image.width, image.height, image.is_opaque());
//! # Ok::<(), webpcore::DecodeError>(())
//! ```
//!
//! Or probe the container first and decode with explicit options:
//!
//! ```rust,no_run
//! use webpcore::{DecodeConfig, ImageMetadata, Limits, UpsamplingMethod};
//!
//! let webp_data: &[u8] = &[]; // your WebP data
//! let metadata = ImageMetadata::probe(webp_data)?;
//! let config = DecodeConfig::default()
//!     .upsampling(UpsamplingMethod::Simple)
//!     .limits(Limits::default().max_dimensions(4096, 4096));
//! let image = webpcore::decode_with_config(&metadata, webp_data, &config)?;
//! # Ok::<(), webpcore::DecodeError>(())
//! ```
//!
//! # Logging
//!
//! Header fields and container decisions are reported through the [`log`]
//! facade at `debug` level, per-row progress at `trace`, and recoverable
//! oddities in the input at `warn`.

#![cfg_attr(not(feature = "std"), no_std)]
#![forbid(unsafe_code)]
#![deny(missing_docs)]

extern crate alloc;

mod common;
mod decoder;
mod slice_reader;

pub use decoder::{
    decode, decode_bgra, decode_with_config, decode_yuv420, encode, filter, unfilter,
    AlphaFilter, DecodeConfig, DecodeError, DecodedImage, ErrorKind, ImageMetadata, Limits,
    PixelFormat, UpsamplingMethod, YuvPlanes,
};
