//! VP8 key frame decoding, as used by lossy WebP.
//!
//! Only intra frames are supported. Decoding proceeds one macroblock row at a
//! time: prediction modes for the row are parsed from the first partition,
//! residuals are read from the row's token partition and added to the
//! prediction, and the finished row is deblocked in place.
//!
//! # Related Links
//! * [rfc-6386](http://tools.ietf.org/html/rfc6386) - The VP8 Data Format and Decoding Guide

use alloc::boxed::Box;
use alloc::format;
use alloc::vec;
use alloc::vec::Vec;

use log::{debug, trace};

use super::api::{DecodeError, UpsamplingMethod};
use super::arithmetic::BooleanDecoder;
use super::loop_filter;
use super::quant::{
    read_token_probs, FilterHeader, FilterInfo, QuantDeltas, QuantMatrix, TokenProbs,
};
use super::yuv;
use crate::common::prediction::*;
use crate::common::transform;
use crate::common::types::*;
use crate::slice_reader::SliceReader;

const VP8_MAGIC: [u8; 3] = [0x9d, 0x01, 0x2a];

/// Size of the uncompressed data chunk at the start of a key frame.
pub(crate) const KEYFRAME_HEADER_SIZE: usize = 10;

/// VP8 probability tree node.
#[derive(Clone, Copy, Debug)]
pub(crate) struct TreeNode {
    /// Left branch: a node index, or a leaf value tagged with `0x80`.
    pub(crate) left: u8,
    /// Right branch, encoded like `left`.
    pub(crate) right: u8,
    /// Probability of taking the left branch.
    pub(crate) prob: Prob,
}

impl TreeNode {
    const UNINIT: TreeNode = TreeNode {
        left: 0,
        right: 0,
        prob: 0,
    };

    const fn prepare_branch(t: i8) -> u8 {
        if t > 0 {
            (t as u8) / 2
        } else {
            let value = -t;
            0x80 | (value as u8)
        }
    }

    pub(crate) const fn value_from_branch(t: u8) -> i8 {
        (t & !0x80) as i8
    }
}

/// Converts an RFC 6386 style tree (pairs of branches, leaves negated) and its
/// node probabilities into decoder nodes.
pub(crate) const fn tree_nodes_from<const N: usize, const M: usize>(
    tree: [i8; N],
    probs: [Prob; M],
) -> [TreeNode; M] {
    if N != 2 * M {
        panic!("invalid tree with probs");
    }
    let mut nodes = [TreeNode::UNINIT; M];
    let mut i = 0;
    while i < M {
        nodes[i].left = TreeNode::prepare_branch(tree[2 * i]);
        nodes[i].right = TreeNode::prepare_branch(tree[2 * i + 1]);
        nodes[i].prob = probs[i];
        i += 1;
    }
    nodes
}

const KEYFRAME_YMODE_NODES: [TreeNode; 4] =
    tree_nodes_from(KEYFRAME_YMODE_TREE, KEYFRAME_YMODE_PROBS);

const KEYFRAME_BPRED_MODE_NODES: [[[TreeNode; 9]; 10]; 10] = {
    let mut output = [[[TreeNode::UNINIT; 9]; 10]; 10];
    let mut i = 0;
    while i < output.len() {
        let mut j = 0;
        while j < output[i].len() {
            output[i][j] =
                tree_nodes_from(KEYFRAME_BPRED_MODE_TREE, KEYFRAME_BPRED_MODE_PROBS[i][j]);
            j += 1;
        }
        i += 1;
    }
    output
};

const KEYFRAME_UV_MODE_NODES: [TreeNode; 3] =
    tree_nodes_from(KEYFRAME_UV_MODE_TREE, KEYFRAME_UV_MODE_PROBS);

/// The uncompressed part of a key frame header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct FrameHeader {
    pub(crate) width: u16,
    pub(crate) height: u16,
    /// Upscaling hints; recorded but not applied.
    pub(crate) horizontal_scale: u8,
    pub(crate) vertical_scale: u8,
    pub(crate) profile: u8,
    pub(crate) first_partition_size: usize,
}

impl FrameHeader {
    /// Parses the frame tag, start code and picture size.
    pub(crate) fn parse(data: &[u8]) -> Result<Self, DecodeError> {
        let mut r = SliceReader::new(data);
        let tag = r.read_u24_le()?;

        if tag & 1 != 0 {
            return Err(DecodeError::UnsupportedFeature("VP8 inter frames".into()));
        }
        let profile = ((tag >> 1) & 7) as u8;
        if profile > 3 {
            return Err(DecodeError::UnsupportedFeature(format!(
                "VP8 profile {profile}"
            )));
        }
        if (tag >> 4) & 1 == 0 {
            return Err(DecodeError::UnsupportedFeature(
                "VP8 frames not meant for display".into(),
            ));
        }
        let first_partition_size = (tag >> 5) as usize;

        let mut magic = [0u8; 3];
        r.read_exact(&mut magic)?;
        if magic != VP8_MAGIC {
            return Err(DecodeError::Vp8MagicInvalid(magic));
        }

        let w = r.read_u16_le()?;
        let h = r.read_u16_le()?;
        let header = Self {
            width: w & 0x3fff,
            height: h & 0x3fff,
            horizontal_scale: (w >> 14) as u8,
            vertical_scale: (h >> 14) as u8,
            profile,
            first_partition_size,
        };
        if header.width == 0 || header.height == 0 {
            return Err(DecodeError::InvalidDimensions {
                width: u32::from(header.width),
                height: u32::from(header.height),
            });
        }
        Ok(header)
    }
}

/// Segment-based adjustments (RFC 6386 section 9.3).
#[derive(Debug, Clone, Copy)]
struct SegmentHeader {
    enabled: bool,
    update_map: bool,
    /// Values replace the frame defaults instead of adjusting them.
    absolute_values: bool,
    quantizer: [i32; MAX_SEGMENTS],
    filter_level: [i32; MAX_SEGMENTS],
    tree_nodes: [TreeNode; 3],
}

impl Default for SegmentHeader {
    fn default() -> Self {
        Self {
            enabled: false,
            update_map: false,
            absolute_values: true,
            quantizer: [0; MAX_SEGMENTS],
            filter_level: [0; MAX_SEGMENTS],
            tree_nodes: tree_nodes_from(SEGMENT_ID_TREE, [255; 3]),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FilterType {
    Off,
    Simple,
    Normal,
}

#[derive(Default, Clone, Copy)]
struct MacroBlock {
    bpred: [IntraMode; 16],
    luma_mode: LumaMode,
    chroma_mode: ChromaMode,
    segment: u8,
    coeffs_skipped: bool,
}

/// Info required from a previously decoded macro block in future
/// For the top macroblocks this will be the bottom values, for the left macroblock the right values
#[derive(Default, Clone, Copy)]
struct PreviousMacroBlock {
    bpred: [IntraMode; 4],
    // complexity is laid out like: y2,y,y,y,y,u,u,v,v
    complexity: [u8; 9],
}

/// A decoded frame: macroblock-aligned YUV 4:2:0 planes.
#[derive(Default, Debug, Clone)]
pub(crate) struct Frame {
    pub(crate) width: u16,
    pub(crate) height: u16,
    pub(crate) ybuf: Vec<u8>,
    pub(crate) ubuf: Vec<u8>,
    pub(crate) vbuf: Vec<u8>,
}

impl Frame {
    pub(crate) fn luma_stride(&self) -> usize {
        usize::from(self.width.div_ceil(16)) * 16
    }

    pub(crate) fn chroma_stride(&self) -> usize {
        self.luma_stride() / 2
    }

    pub(crate) fn chroma_width(&self) -> usize {
        usize::from(self.width.div_ceil(2))
    }

    pub(crate) fn chroma_height(&self) -> usize {
        usize::from(self.height.div_ceil(2))
    }

    /// Converts the visible part of the frame to BGRA with opaque alpha.
    pub(crate) fn fill_bgra(&self, buf: &mut [u8], upsampling: UpsamplingMethod) {
        let planes = yuv::Planes {
            y: &self.ybuf,
            u: &self.ubuf,
            v: &self.vbuf,
            y_stride: self.luma_stride(),
            uv_stride: self.chroma_stride(),
        };
        let (width, height) = (usize::from(self.width), usize::from(self.height));
        match upsampling {
            UpsamplingMethod::Bilinear => yuv::fill_bgra_fancy(buf, &planes, width, height),
            UpsamplingMethod::Simple => yuv::fill_bgra_simple(buf, &planes, width, height),
        }
    }

    /// Copies the visible area of each plane into tightly packed buffers.
    pub(crate) fn cropped_planes(&self) -> (Vec<u8>, Vec<u8>, Vec<u8>) {
        let crop = |plane: &[u8], stride: usize, w: usize, h: usize| -> Vec<u8> {
            plane
                .chunks_exact(stride)
                .take(h)
                .flat_map(|row| &row[..w])
                .copied()
                .collect()
        };
        let (w, h) = (usize::from(self.width), usize::from(self.height));
        let (cw, ch) = (self.chroma_width(), self.chroma_height());
        (
            crop(&self.ybuf, self.luma_stride(), w, h),
            crop(&self.ubuf, self.chroma_stride(), cw, ch),
            crop(&self.vbuf, self.chroma_stride(), cw, ch),
        )
    }
}

/// VP8 key frame decoder over one `VP8 ` chunk payload.
pub(crate) struct Vp8Decoder<'a> {
    header: FrameHeader,
    b: BooleanDecoder<'a>,
    partitions: Vec<BooleanDecoder<'a>>,

    mbwidth: usize,
    mbheight: usize,

    segments: SegmentHeader,
    filter: FilterHeader,
    filter_type: FilterType,
    apply_loop_filter: bool,
    /// Indexed by `[segment][is_4x4]`.
    filter_strengths: [[FilterInfo; 2]; MAX_SEGMENTS],

    quant: [QuantMatrix; MAX_SEGMENTS],
    token_probs: Box<TokenProbs>,
    prob_skip_false: Option<Prob>,

    top: Vec<PreviousMacroBlock>,
    left: PreviousMacroBlock,

    // The borders from the previous macroblock, used for predictions
    // See Section 12
    // Note that the left border contains the top left pixel
    top_border_y: Vec<u8>,
    left_border_y: [u8; 17],
    top_border_u: Vec<u8>,
    left_border_u: [u8; 9],
    top_border_v: Vec<u8>,
    left_border_v: [u8; 9],

    ws_y: [u8; LUMA_BLOCK_SIZE],
    ws_u: [u8; CHROMA_BLOCK_SIZE],
    ws_v: [u8; CHROMA_BLOCK_SIZE],

    /// Dequantised coefficients: 16 luma blocks, then 4 U and 4 V.
    coeffs: [[i32; 16]; 24],
    row: Vec<MacroBlock>,
    row_filter: Vec<FilterInfo>,

    frame: Frame,
}

impl<'a> Vp8Decoder<'a> {
    /// Parses the frame header and the first partition's frame-level fields.
    ///
    /// No frame buffers are allocated until [`Self::decode`], so callers may
    /// check [`Self::dimensions`] against their limits first.
    pub(crate) fn new(data: &'a [u8], apply_loop_filter: bool) -> Result<Self, DecodeError> {
        let header = FrameHeader::parse(data)?;
        let mut r = SliceReader::new(data);
        r.skip(KEYFRAME_HEADER_SIZE)?;
        let first = r
            .take(header.first_partition_size)
            .map_err(|_| DecodeError::PartitionSizeInvalid)?;

        let mbwidth = usize::from(header.width.div_ceil(16));
        let mbheight = usize::from(header.height.div_ceil(16));

        let mut decoder = Self {
            header,
            b: BooleanDecoder::new(first),
            partitions: Vec::new(),
            mbwidth,
            mbheight,
            segments: SegmentHeader::default(),
            filter: FilterHeader::default(),
            filter_type: FilterType::Off,
            apply_loop_filter,
            filter_strengths: [[FilterInfo::default(); 2]; MAX_SEGMENTS],
            quant: [QuantMatrix::default(); MAX_SEGMENTS],
            token_probs: Box::new([[[[0; NUM_DCT_TOKENS - 1]; 3]; 17]; 4]),
            prob_skip_false: None,
            top: Vec::new(),
            left: PreviousMacroBlock::default(),
            top_border_y: Vec::new(),
            left_border_y: [0; 17],
            top_border_u: Vec::new(),
            left_border_u: [0; 9],
            top_border_v: Vec::new(),
            left_border_v: [0; 9],
            ws_y: [0; LUMA_BLOCK_SIZE],
            ws_u: [0; CHROMA_BLOCK_SIZE],
            ws_v: [0; CHROMA_BLOCK_SIZE],
            coeffs: [[0; 16]; 24],
            row: Vec::new(),
            row_filter: Vec::new(),
            frame: Frame::default(),
        };
        decoder.read_frame_header(r.remaining_slice())?;
        Ok(decoder)
    }

    pub(crate) fn dimensions(&self) -> (u32, u32) {
        (u32::from(self.header.width), u32::from(self.header.height))
    }

    /// Bytes of frame and border storage [`Self::decode`] will allocate.
    pub(crate) fn buffer_size(&self) -> usize {
        let luma = self.mbwidth * 16 * self.mbheight * 16;
        luma + luma / 2 + self.mbwidth * (16 + 8 + 8 + 4)
    }

    fn read_segment_header(&mut self) {
        let b = &mut self.b;
        let s = &mut self.segments;
        s.enabled = b.read_flag();
        if !s.enabled {
            return;
        }
        s.update_map = b.read_flag();
        let update_data = b.read_flag();

        if update_data {
            s.absolute_values = b.read_flag();
            for q in &mut s.quantizer {
                *q = b.read_optional_signed_value(7);
            }
            for level in &mut s.filter_level {
                *level = b.read_optional_signed_value(6);
            }
        }

        if s.update_map {
            for node in &mut s.tree_nodes {
                node.prob = if b.read_flag() {
                    b.read_literal(8) as u8
                } else {
                    255
                };
            }
        }
    }

    fn init_partitions(&mut self, n: usize, data: &'a [u8]) -> Result<(), DecodeError> {
        let mut r = SliceReader::new(data);
        let sizes = r
            .take(3 * (n - 1))
            .map_err(|_| DecodeError::PartitionSizeInvalid)?;

        for size in sizes.chunks_exact(3) {
            let size = SliceReader::new(size).read_u24_le()? as usize;
            let part = r.take(size).map_err(|_| DecodeError::PartitionSizeInvalid)?;
            self.partitions.push(BooleanDecoder::new(part));
        }

        // The last partition takes whatever is left.
        let last = r.remaining_slice();
        if last.is_empty() {
            return Err(DecodeError::PartitionSizeInvalid);
        }
        self.partitions.push(BooleanDecoder::new(last));
        Ok(())
    }

    fn read_quantization_indices(&mut self) {
        let base = self.b.read_literal(7) as i32;
        let deltas = QuantDeltas::read(&mut self.b);

        for (i, matrix) in self.quant.iter_mut().enumerate() {
            let q = if !self.segments.enabled {
                base
            } else if self.segments.absolute_values {
                self.segments.quantizer[i]
            } else {
                self.segments.quantizer[i] + base
            };
            *matrix = QuantMatrix::new(q, &deltas);
        }
    }

    fn precompute_filter_strengths(&mut self) {
        if self.filter_type == FilterType::Off {
            return;
        }
        for (segment, strengths) in self.filter_strengths.iter_mut().enumerate() {
            let mut base_level = i32::from(self.filter.level);
            if self.segments.enabled {
                base_level = self.segments.filter_level[segment];
                if !self.segments.absolute_values {
                    base_level += i32::from(self.filter.level);
                }
            }
            for (is_4x4, info) in strengths.iter_mut().enumerate() {
                *info = self.filter.strength(base_level, is_4x4 == 1);
            }
        }
    }

    fn read_frame_header(&mut self, rest: &'a [u8]) -> Result<(), DecodeError> {
        let color_space = self.b.read_literal(1) as u8;
        let _clamping_type = self.b.read_literal(1);
        if color_space != 0 {
            return Err(DecodeError::ColorSpaceInvalid(color_space));
        }

        self.read_segment_header();

        self.filter = FilterHeader::read(&mut self.b);
        self.filter_type = if self.filter.level == 0 || !self.apply_loop_filter {
            FilterType::Off
        } else if self.filter.simple {
            FilterType::Simple
        } else {
            FilterType::Normal
        };

        let num_partitions = 1usize << self.b.read_literal(2);
        self.b.check(())?;
        self.init_partitions(num_partitions, rest)?;

        self.read_quantization_indices();

        // Refresh entropy probs: there is only one frame.
        let _ = self.b.read_literal(1);

        self.token_probs = Box::new(read_token_probs(&mut self.b));

        self.prob_skip_false = if self.b.read_flag() {
            Some(self.b.read_literal(8) as u8)
        } else {
            None
        };
        self.b.check(())?;

        self.precompute_filter_strengths();

        debug!(
            "VP8 frame {}x{} (profile {}, scale {}/{}), {} partition(s), {:?} filter level {} sharpness {}, segments {}",
            self.header.width,
            self.header.height,
            self.header.profile,
            self.header.horizontal_scale,
            self.header.vertical_scale,
            num_partitions,
            self.filter_type,
            self.filter.level,
            self.filter.sharpness,
            self.segments.enabled,
        );
        Ok(())
    }

    fn read_macroblock_header(&mut self, mbx: usize) -> Result<MacroBlock, DecodeError> {
        let mut mb = MacroBlock::default();

        if self.segments.update_map {
            mb.segment = self.b.read_with_tree(&self.segments.tree_nodes) as u8;
        }

        mb.coeffs_skipped = if let Some(prob) = self.prob_skip_false {
            self.b.read_bool(prob)
        } else {
            false
        };

        let luma = self.b.read_with_tree(&KEYFRAME_YMODE_NODES);
        mb.luma_mode =
            LumaMode::from_i8(luma).ok_or(DecodeError::LumaPredictionModeInvalid(luma))?;

        match mb.luma_mode.into_intra() {
            // `LumaMode::B` - each sub-block carries its own mode.
            None => {
                for y in 0usize..4 {
                    for x in 0usize..4 {
                        let top = self.top[mbx].bpred[x];
                        let left = self.left.bpred[y];
                        let intra = self.b.read_with_tree(
                            &KEYFRAME_BPRED_MODE_NODES[top as usize][left as usize],
                        );
                        let bmode = IntraMode::from_i8(intra)
                            .ok_or(DecodeError::IntraPredictionModeInvalid(intra))?;
                        mb.bpred[x + y * 4] = bmode;

                        self.top[mbx].bpred[x] = bmode;
                        self.left.bpred[y] = bmode;
                    }
                }
            }
            Some(mode) => {
                mb.bpred = [mode; 16];
                self.top[mbx].bpred = [mode; 4];
                self.left.bpred = [mode; 4];
            }
        }

        let chroma = self.b.read_with_tree(&KEYFRAME_UV_MODE_NODES);
        mb.chroma_mode =
            ChromaMode::from_i8(chroma).ok_or(DecodeError::ChromaPredictionModeInvalid(chroma))?;

        Ok(mb)
    }

    /// Reads the residuals of one macroblock into `self.coeffs`.
    ///
    /// Returns one 2-bit code per block (luma blocks first, then chroma)
    /// selecting the inverse transform: 0 none, 1 DC only, 2 the first three
    /// coefficients, 3 full.
    fn read_residual_data(&mut self, mb: &MacroBlock, mbx: usize, p: usize) -> u64 {
        let b = &mut self.partitions[p];
        let probs = &*self.token_probs;
        let q = self.quant[usize::from(mb.segment)];
        let top = &mut self.top[mbx].complexity;
        let left = &mut self.left.complexity;
        let mut codes = 0u64;

        self.coeffs = [[0; 16]; 24];

        let first = if mb.luma_mode == LumaMode::B {
            0
        } else {
            let mut dc = [0i32; 16];
            let ctx = usize::from(top[0] + left[0]);
            let nz = read_coefficients(
                b,
                &probs[Plane::Y2 as usize],
                ctx,
                (q.y2dc, q.y2ac),
                0,
                &mut dc,
            );
            top[0] = u8::from(nz > 0);
            left[0] = top[0];
            transform::iwht4x4(&mut dc);
            for (block, &v) in self.coeffs.iter_mut().zip(dc.iter()) {
                block[0] = v;
            }
            1
        };
        let plane = if first == 1 {
            Plane::YCoeff1
        } else {
            Plane::YCoeff0
        };

        for y in 0usize..4 {
            let mut l = left[1 + y];
            for x in 0usize..4 {
                let i = 4 * y + x;
                let ctx = usize::from(top[1 + x] + l);
                let block = &mut self.coeffs[i];
                let nz = read_coefficients(
                    b,
                    &probs[plane as usize],
                    ctx,
                    (q.ydc, q.yac),
                    first,
                    block,
                );
                l = u8::from(nz > first);
                top[1 + x] = l;
                codes |= block_code(nz, block[0] != 0) << (2 * i);
            }
            left[1 + y] = l;
        }

        // U blocks use complexity entries 5 and 6, V blocks 7 and 8.
        for (plane_index, ctx_base) in [(0usize, 5usize), (1, 7)] {
            for y in 0usize..2 {
                let mut l = left[ctx_base + y];
                for x in 0usize..2 {
                    let i = 16 + 4 * plane_index + 2 * y + x;
                    let ctx = usize::from(top[ctx_base + x] + l);
                    let block = &mut self.coeffs[i];
                    let nz = read_coefficients(
                        b,
                        &probs[Plane::Chroma as usize],
                        ctx,
                        (q.uvdc, q.uvac),
                        0,
                        block,
                    );
                    l = u8::from(nz > 0);
                    top[ctx_base + x] = l;
                    codes |= block_code(nz, block[0] != 0) << (2 * i);
                }
                left[ctx_base + y] = l;
            }
        }

        codes
    }

    fn clear_complexity(&mut self, mbx: usize, luma_mode: LumaMode) {
        // A skipped 4x4-predicted macroblock has no Y2 block, so its Y2
        // context carries through.
        let start = if luma_mode == LumaMode::B { 1 } else { 0 };
        self.left.complexity[start..].fill(0);
        self.top[mbx].complexity[start..].fill(0);
    }

    fn reconstruct_macroblock(&mut self, mbx: usize, mby: usize, mb: &MacroBlock, codes: u64) {
        let stride = LUMA_STRIDE;
        update_border_luma(
            &mut self.ws_y,
            mbx,
            mby,
            self.mbwidth,
            &self.top_border_y,
            &self.left_border_y,
        );

        if mb.luma_mode != LumaMode::B {
            predict_luma16(&mut self.ws_y, mb.luma_mode, mbx, mby);
        }
        for (i, block) in self.coeffs[..16].iter().enumerate() {
            let (x0, y0) = (1 + 4 * (i % 4), 1 + 4 * (i / 4));
            if mb.luma_mode == LumaMode::B {
                predict_subblock(&mut self.ws_y, mb.bpred[i], x0, y0);
            }
            add_residual(block, (codes >> (2 * i)) & 3, &mut self.ws_y, y0 * stride + x0, stride);
        }

        let chroma = [
            (&mut self.ws_u, &self.top_border_u, &self.left_border_u, 16),
            (&mut self.ws_v, &self.top_border_v, &self.left_border_v, 20),
        ];
        for (ws, top, left, first_block) in chroma {
            update_border_chroma(ws, mbx, mby, top, left);
            predict_chroma8(ws, mb.chroma_mode, mbx, mby);
            for j in 0..4 {
                let i = first_block + j;
                let (x0, y0) = (1 + 4 * (j % 2), 1 + 4 * (j / 2));
                let pos = y0 * CHROMA_STRIDE + x0;
                add_residual(&self.coeffs[i], (codes >> (2 * i)) & 3, ws, pos, CHROMA_STRIDE);
            }
        }

        self.save_borders(mbx);
        self.store_macroblock(mbx, mby);
    }

    /// Keeps the unfiltered right column and bottom row for the neighbours.
    fn save_borders(&mut self, mbx: usize) {
        let ws = &self.ws_y;
        self.left_border_y[0] = ws[16];
        for (y, left) in self.left_border_y[1..].iter_mut().enumerate() {
            *left = ws[(y + 1) * LUMA_STRIDE + 16];
        }
        self.top_border_y[mbx * 16..][..16].copy_from_slice(&ws[16 * LUMA_STRIDE + 1..][..16]);

        let chroma = [
            (&self.ws_u, &mut self.left_border_u, &mut self.top_border_u),
            (&self.ws_v, &mut self.left_border_v, &mut self.top_border_v),
        ];
        for (ws, left_border, top_border) in chroma {
            left_border[0] = ws[8];
            for (y, left) in left_border[1..].iter_mut().enumerate() {
                *left = ws[(y + 1) * CHROMA_STRIDE + 8];
            }
            top_border[mbx * 8..][..8].copy_from_slice(&ws[8 * CHROMA_STRIDE + 1..][..8]);
        }
    }

    fn store_macroblock(&mut self, mbx: usize, mby: usize) {
        let y_stride = self.mbwidth * 16;
        for y in 0..16 {
            let dst = (mby * 16 + y) * y_stride + mbx * 16;
            self.frame.ybuf[dst..][..16]
                .copy_from_slice(&self.ws_y[(y + 1) * LUMA_STRIDE + 1..][..16]);
        }

        let uv_stride = self.mbwidth * 8;
        for y in 0..8 {
            let dst = (mby * 8 + y) * uv_stride + mbx * 8;
            let src = (y + 1) * CHROMA_STRIDE + 1;
            self.frame.ubuf[dst..][..8].copy_from_slice(&self.ws_u[src..][..8]);
            self.frame.vbuf[dst..][..8].copy_from_slice(&self.ws_v[src..][..8]);
        }
    }

    /// Deblocks every macroblock of row `mby`, left to right.
    fn filter_row(&mut self, mby: usize) {
        let y_stride = self.mbwidth * 16;
        let uv_stride = self.mbwidth * 8;

        for (mbx, info) in self.row_filter.iter().enumerate() {
            if info.limit == 0 {
                continue;
            }
            let limit = info.limit;
            let mb_limit = limit + 4;
            let ilevel = info.interior_limit;
            let hev = info.hev_thresh;
            let y_pos = mby * 16 * y_stride + mbx * 16;
            let uv_pos = mby * 8 * uv_stride + mbx * 8;
            let ybuf = &mut self.frame.ybuf;

            if self.filter_type == FilterType::Simple {
                if mbx > 0 {
                    loop_filter::simple_edge(ybuf, y_pos, 1, y_stride, 16, mb_limit);
                }
                if info.inner {
                    for x in [4, 8, 12] {
                        loop_filter::simple_edge(ybuf, y_pos + x, 1, y_stride, 16, limit);
                    }
                }
                if mby > 0 {
                    loop_filter::simple_edge(ybuf, y_pos, y_stride, 1, 16, mb_limit);
                }
                if info.inner {
                    for y in [4, 8, 12] {
                        let pos = y_pos + y * y_stride;
                        loop_filter::simple_edge(ybuf, pos, y_stride, 1, 16, limit);
                    }
                }
                continue;
            }

            let planes: [(&mut Vec<u8>, usize, usize, usize, &[usize]); 3] = [
                (&mut self.frame.ybuf, y_pos, y_stride, 16, &[4, 8, 12]),
                (&mut self.frame.ubuf, uv_pos, uv_stride, 8, &[4]),
                (&mut self.frame.vbuf, uv_pos, uv_stride, 8, &[4]),
            ];
            for (buf, pos, stride, len, inner_edges) in planes {
                if mbx > 0 {
                    loop_filter::macroblock_edge(buf, pos, 1, stride, len, mb_limit, ilevel, hev);
                }
                if info.inner {
                    for &x in inner_edges {
                        loop_filter::subblock_edge(buf, pos + x, 1, stride, len, limit, ilevel, hev);
                    }
                }
                if mby > 0 {
                    loop_filter::macroblock_edge(buf, pos, stride, 1, len, mb_limit, ilevel, hev);
                }
                if info.inner {
                    for &y in inner_edges {
                        let edge = pos + y * stride;
                        loop_filter::subblock_edge(buf, edge, stride, 1, len, limit, ilevel, hev);
                    }
                }
            }
        }
    }

    /// Decodes all macroblocks and returns the finished frame.
    pub(crate) fn decode(mut self) -> Result<Frame, DecodeError> {
        let (mbw, mbh) = (self.mbwidth, self.mbheight);
        self.frame = Frame {
            width: self.header.width,
            height: self.header.height,
            ybuf: vec![0u8; mbw * 16 * mbh * 16],
            ubuf: vec![0u8; mbw * 8 * mbh * 8],
            vbuf: vec![0u8; mbw * 8 * mbh * 8],
        };
        // Defaults are intra mode DC and complexity 0.
        self.top = vec![PreviousMacroBlock::default(); mbw];
        self.top_border_y = vec![127u8; mbw * 16];
        self.top_border_u = vec![127u8; mbw * 8];
        self.top_border_v = vec![127u8; mbw * 8];
        self.row = Vec::with_capacity(mbw);
        self.row_filter = vec![FilterInfo::default(); mbw];

        let num_partitions = self.partitions.len();

        for mby in 0..mbh {
            self.left = PreviousMacroBlock::default();
            self.row.clear();
            for mbx in 0..mbw {
                let mb = self.read_macroblock_header(mbx)?;
                self.row.push(mb);
            }
            if self.b.is_eof() {
                return Err(DecodeError::BitstreamError(
                    "premature end of the first partition",
                ));
            }

            let p = mby % num_partitions;
            self.left = PreviousMacroBlock::default();
            for mbx in 0..mbw {
                let mb = self.row[mbx];
                let codes = if mb.coeffs_skipped {
                    self.clear_complexity(mbx, mb.luma_mode);
                    self.coeffs = [[0; 16]; 24];
                    0
                } else {
                    self.read_residual_data(&mb, mbx, p)
                };
                if self.partitions[p].is_eof() {
                    return Err(DecodeError::BitstreamError(
                        "premature end of a token partition",
                    ));
                }

                if self.filter_type != FilterType::Off {
                    let is_4x4 = mb.luma_mode == LumaMode::B;
                    let mut info = self.filter_strengths[usize::from(mb.segment)][usize::from(is_4x4)];
                    info.inner |= codes != 0;
                    self.row_filter[mbx] = info;
                }

                self.reconstruct_macroblock(mbx, mby, &mb, codes);
            }

            if self.filter_type != FilterType::Off {
                self.filter_row(mby);
            }
            self.left_border_y = [0; 17];
            self.left_border_u = [0; 9];
            self.left_border_v = [0; 9];
            trace!("VP8 macroblock row {mby}/{mbh} done");
        }

        Ok(self.frame)
    }
}

#[inline]
fn block_code(nz: usize, dc_nonzero: bool) -> u64 {
    if nz > 3 {
        3
    } else if nz > 1 {
        2
    } else {
        u64::from(dc_nonzero)
    }
}

#[inline]
fn add_residual(block: &[i32; 16], code: u64, ws: &mut [u8], pos: usize, stride: usize) {
    match code {
        3 => transform::idct_add(block, ws, pos, stride),
        2 => transform::idct_ac3_add(block, ws, pos, stride),
        1 => transform::idct_dc_add(block, ws, pos, stride),
        _ => {}
    }
}

/// Reads the magnitude of a token larger than one (DCT_2 and up).
fn read_large_value(b: &mut BooleanDecoder<'_>, p: &[Prob; NUM_DCT_TOKENS - 1]) -> i32 {
    if !b.read_bool(p[3]) {
        if !b.read_bool(p[4]) {
            2
        } else {
            3 + b.read_bit(p[5])
        }
    } else if !b.read_bool(p[6]) {
        if !b.read_bool(p[7]) {
            // DCT_CAT1
            5 + b.read_bit(PROB_DCT_CAT[0][0])
        } else {
            // DCT_CAT2
            7 + 2 * b.read_bit(PROB_DCT_CAT[1][0]) + b.read_bit(PROB_DCT_CAT[1][1])
        }
    } else {
        // DCT_CAT3 to DCT_CAT6
        let bit1 = b.read_bit(p[8]);
        let bit0 = b.read_bit(p[9 + bit1 as usize]);
        let cat = (2 * bit1 + bit0) as usize;
        let mut extra = 0;
        for &prob in PROB_DCT_CAT[2 + cat].iter().take_while(|&&prob| prob > 0) {
            extra = 2 * extra + b.read_bit(prob);
        }
        extra + 3 + (8 << cat)
    }
}

/// Reads the tokens of one 4x4 block, starting at zigzag position `first`,
/// and stores the dequantised coefficients in natural order.
///
/// Returns the position after the last decoded coefficient, so 0 (or
/// `first`) means the block is empty.
fn read_coefficients(
    b: &mut BooleanDecoder<'_>,
    probs: &[[[Prob; NUM_DCT_TOKENS - 1]; 3]; 17],
    ctx: usize,
    (dc, ac): (i32, i32),
    first: usize,
    out: &mut [i32; 16],
) -> usize {
    let mut n = first;
    let mut p = &probs[n][ctx];
    while n < 16 {
        if !b.read_bool(p[0]) {
            // End of block.
            return n;
        }
        while !b.read_bool(p[1]) {
            // DCT_0
            n += 1;
            if n == 16 {
                return 16;
            }
            p = &probs[n][0];
        }

        let next = &probs[n + 1];
        let v = if !b.read_bool(p[2]) {
            p = &next[1];
            1
        } else {
            let v = read_large_value(b, p);
            p = &next[2];
            v
        };
        let v = if b.read_flag() { -v } else { v };
        out[usize::from(ZIGZAG[n])] = v * if n > 0 { ac } else { dc };
        n += 1;
    }
    16
}
