//! End-to-end decoding through the public API.

mod common;

use common::*;
use webpcore::{
    decode, decode_bgra, decode_with_config, decode_yuv420, encode, filter, AlphaFilter,
    DecodeConfig, DecodeError, ErrorKind, ImageMetadata, Limits, PixelFormat, UpsamplingMethod,
};

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn assert_uniform_red(pixels: &[u8]) {
    let first = &pixels[..4];
    assert!(pixels.chunks_exact(4).all(|px| px == first), "{pixels:?}");
    let [b, g, r, a] = [first[0], first[1], first[2], first[3]];
    assert!(r > 200 && g < 50 && b < 50, "not red: {first:?}");
    assert_eq!(a, 0xff);
}

#[test]
fn decode_2x2_single_color_image() {
    init_logging();
    let image = decode_bgra(&RED_2X2).unwrap();
    assert_eq!((image.width, image.height), (2, 2));
    assert_eq!(image.format, PixelFormat::Bgr32);
    assert_eq!(image.pixels.len(), 2 * 2 * 4);
    assert!(image.is_opaque());
    assert_uniform_red(&image.pixels);
}

#[test]
fn decode_3x3_single_color_image() {
    init_logging();
    let image = decode_bgra(&red_3x3()).unwrap();
    assert_eq!((image.width, image.height), (3, 3));
    assert_eq!(image.stride(), 12);
    assert_uniform_red(&image.pixels);
}

#[test]
fn upsampling_and_loop_filter_options_agree_on_flat_color() {
    let meta = ImageMetadata::probe(&RED_2X2).unwrap();
    let fancy = decode(&meta, &RED_2X2).unwrap();
    let config = DecodeConfig::default()
        .upsampling(UpsamplingMethod::Simple)
        .apply_loop_filter(false);
    let simple = decode_with_config(&meta, &RED_2X2, &config).unwrap();
    assert_eq!(fancy, simple);
}

#[test]
fn probe_simple_lossy() {
    let meta = ImageMetadata::probe(&RED_2X2).unwrap();
    assert_eq!(
        meta,
        ImageMetadata {
            width: 2,
            height: 2,
            is_lossless: false,
            has_alpha: false,
            data_offset: 20,
            data_size: 48,
            alpha_offset: 0,
            alpha_size: 0,
        }
    );
}

#[test]
fn yuv_planes_are_cropped() {
    let planes = decode_yuv420(&red_3x3()).unwrap();
    assert_eq!((planes.y_width, planes.y_height), (3, 3));
    assert_eq!((planes.uv_width, planes.uv_height), (2, 2));
    assert_eq!(planes.y.len(), 9);
    assert_eq!(planes.u.len(), 4);
    assert_eq!(planes.v.len(), 4);
    // Red has low blue-difference and high red-difference chroma.
    assert!(planes.u.iter().all(|&u| u < 128));
    assert!(planes.v.iter().all(|&v| v > 128));
}

#[test]
fn lossless_subtract_green() {
    init_logging();
    let file = riff(&[chunk(b"VP8L", &subtract_green_2x2(false))]);
    let meta = ImageMetadata::probe(&file).unwrap();
    assert!(meta.is_lossless);
    assert!(!meta.has_alpha);

    let image = decode(&meta, &file).unwrap();
    assert_eq!(image.format, PixelFormat::Bgr32);
    let dark = [0x60, 0x40, 0x50, 0xff];
    let light = [0xa0, 0x80, 0x90, 0xff];
    assert_eq!(image.pixels, [dark, light, light, dark].concat());
}

#[test]
fn lossless_four_distinct_pixels() {
    let file = riff(&[chunk(b"VP8L", &four_colors_lossless())]);
    let image = decode_bgra(&file).unwrap();
    assert_eq!(image.pixels, FOUR_COLORS_BGRA.concat());
}

#[test]
fn lossless_alpha_hint_selects_bgra() {
    let file = riff(&[chunk(b"VP8L", &subtract_green_2x2(true))]);
    let image = decode_bgra(&file).unwrap();
    assert_eq!(image.format, PixelFormat::Bgra32);
    // The stream's alpha is 0xff everywhere.
    assert!(image.is_opaque());
}

#[test]
fn lossless_has_no_yuv_output() {
    let file = riff(&[chunk(b"VP8L", &subtract_green_2x2(false))]);
    let err = decode_yuv420(&file).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Unsupported);
}

fn lossy_with_alpha(alph: &[u8]) -> Vec<u8> {
    riff(&[
        vp8x(ALPHA_FLAG, 2, 2),
        chunk(b"ALPH", alph),
        chunk(b"VP8 ", red_2x2_bitstream()),
    ])
}

#[test]
fn raw_alpha_plane() {
    init_logging();
    let plane = [0u8, 85, 170, 255];
    let file = lossy_with_alpha(&[&[0x00][..], &plane].concat());

    let meta = ImageMetadata::probe(&file).unwrap();
    assert!(meta.has_alpha);
    assert_eq!(meta.alpha_size, 5);

    let image = decode(&meta, &file).unwrap();
    assert_eq!(image.format, PixelFormat::Bgra32);
    assert!(!image.is_opaque());
    let alpha: Vec<u8> = image.pixels.chunks_exact(4).map(|px| px[3]).collect();
    assert_eq!(alpha, plane);

    let opaque = decode_bgra(&RED_2X2).unwrap();
    for (px, base) in image.pixels.chunks_exact(4).zip(opaque.pixels.chunks_exact(4)) {
        assert_eq!(px[..3], base[..3]);
    }
}

#[test]
fn filtered_alpha_plane() {
    let plane = [10u8, 20, 40, 80];
    for (bits, method) in [
        (1, AlphaFilter::Horizontal),
        (2, AlphaFilter::Vertical),
        (3, AlphaFilter::Gradient),
    ] {
        let residuals = filter(method, &plane, 2, 2);
        let file = lossy_with_alpha(&[&[bits << 2][..], &residuals].concat());
        let image = decode_bgra(&file).unwrap();
        let alpha: Vec<u8> = image.pixels.chunks_exact(4).map(|px| px[3]).collect();
        assert_eq!(alpha, plane, "{method:?}");
    }
}

#[test]
fn alpha_errors() {
    // Reserved header bits.
    let err = decode_bgra(&lossy_with_alpha(&[0xc0, 0, 0, 0, 0])).unwrap_err();
    assert!(matches!(err, DecodeError::InvalidAlphaHeader(0xc0)));
    // Compression method 2.
    let err = decode_bgra(&lossy_with_alpha(&[0x02, 0, 0, 0, 0])).unwrap_err();
    assert!(matches!(err, DecodeError::InvalidCompressionMethod));
    // Too few raw bytes.
    let err = decode_bgra(&lossy_with_alpha(&[0x00, 0, 0])).unwrap_err();
    assert!(matches!(err, DecodeError::AlphaChunkSizeMismatch));
}

#[test]
fn animation_is_unsupported() {
    let anim = riff(&[
        vp8x(ANIMATION_FLAG, 2, 2),
        chunk(b"VP8 ", red_2x2_bitstream()),
    ]);
    assert_eq!(decode_bgra(&anim).unwrap_err().kind(), ErrorKind::Unsupported);

    let anmf = riff(&[vp8x(0, 2, 2), chunk(b"ANMF", &[0; 16])]);
    assert_eq!(decode_bgra(&anmf).unwrap_err().kind(), ErrorKind::Unsupported);
}

#[test]
fn truncated_input() {
    for len in [0, 3, 11, 19, 40, 67] {
        let err = decode_bgra(&RED_2X2[..len]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidFormat, "length {len}: {err}");
    }
}

#[test]
fn truncated_partitions() {
    // Keep the container consistent but cut the bitstream inside the first
    // partition, then right after it so the token partition is empty.
    for len in [20, 24] {
        let payload = &red_2x2_bitstream()[..len];
        let err = decode_bgra(&riff(&[chunk(b"VP8 ", payload)])).unwrap_err();
        assert!(matches!(err, DecodeError::PartitionSizeInvalid), "{err}");
    }
}

#[test]
fn truncated_lossless_pixels() {
    let full = subtract_green_2x2(false);
    assert!(decode_bgra(&riff(&[chunk(b"VP8L", &full)])).is_ok());

    // The last pixel's code bit sits in the final byte.
    let cut = &full[..full.len() - 1];
    let err = decode_bgra(&riff(&[chunk(b"VP8L", cut)])).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Bitstream, "{err}");

    let large = checkerboard_lossless(16, 16, false);
    for len in 8..large.len() {
        let result = decode_bgra(&riff(&[chunk(b"VP8L", &large[..len])]));
        assert!(result.is_err(), "length {len} decoded");
    }
}

#[test]
fn metadata_outside_source() {
    let mut meta = ImageMetadata::probe(&RED_2X2).unwrap();
    meta.data_size += 100;
    assert!(matches!(
        decode(&meta, &RED_2X2),
        Err(DecodeError::DataOutOfRange { len: 68, .. })
    ));
}

#[test]
fn metadata_must_match_bitstream() {
    let mut meta = ImageMetadata::probe(&RED_2X2).unwrap();
    meta.width = 3;
    assert!(matches!(
        decode(&meta, &RED_2X2),
        Err(DecodeError::InconsistentImageSizes)
    ));
}

#[test]
fn encode_is_not_implemented() {
    let err = encode(&[0; 16], 2, 2).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotImplemented);
    assert!(err.to_string().contains("Not implemented"));
}

#[test]
fn limits_are_enforced() {
    let meta = ImageMetadata::probe(&RED_2X2).unwrap();

    let small = DecodeConfig::default().limits(Limits::default().max_dimensions(1, 1));
    let err = decode_with_config(&meta, &RED_2X2, &small).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::LimitExceeded);

    let tiny_input = DecodeConfig::default().limits(Limits::none().max_input_size(10));
    assert!(decode_with_config(&meta, &RED_2X2, &tiny_input).is_err());

    let no_memory = DecodeConfig::default().limits(Limits::none().max_memory(16));
    assert!(matches!(
        decode_with_config(&meta, &RED_2X2, &no_memory),
        Err(DecodeError::MemoryLimitExceeded)
    ));

    let unlimited = DecodeConfig::default().limits(Limits::none());
    assert!(decode_with_config(&meta, &RED_2X2, &unlimited).is_ok());
}
