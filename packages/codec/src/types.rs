//! Core types for accelerator sessions.

use std::time::Duration;

use crate::CodecError;

/// Video codec type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Codec {
    /// H.264/AVC codec.
    #[default]
    H264,
    /// H.265/HEVC codec.
    Hevc,
    /// Uncompressed pictures behind a coded-unit framing (copy kernels).
    Raw,
}

impl Codec {
    /// Extract the NAL unit type from the first header byte.
    #[must_use]
    pub fn nal_type(&self, header: u8) -> u8 {
        match self {
            Self::Hevc => (header >> 1) & 0x3F,
            Self::H264 | Self::Raw => header & 0x1F,
        }
    }

    /// Returns true if `nal_type` is a sequence parameter set for this codec.
    #[must_use]
    pub fn is_sequence_parameter_set(&self, nal_type: u8) -> bool {
        match self {
            Self::Hevc => nal_type == 33,
            Self::H264 | Self::Raw => nal_type == 7,
        }
    }

    /// Returns true if `nal_type` carries picture data (a coded slice).
    ///
    /// Raw units are always pictures.
    #[must_use]
    pub fn is_picture(&self, nal_type: u8) -> bool {
        match self {
            Self::H264 => (1..=5).contains(&nal_type),
            Self::Hevc => nal_type <= 31,
            Self::Raw => true,
        }
    }
}

/// Pixel layout of a picture.
///
/// Planar layouts carry three planes; packed layouts carry one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum PixelFormat {
    /// YUV 4:2:0, three planes, chroma halved in both directions.
    #[default]
    Yuv420p,
    /// YUV 4:2:2, three planes, chroma halved horizontally.
    Yuv422p,
    /// YUV 4:4:4, three full-size planes.
    Yuv444p,
    /// Packed 4:2:2 (Y0 U Y1 V), one plane of two samples per pixel.
    Yuyv422,
}

impl PixelFormat {
    /// Number of planes carried by this layout.
    #[must_use]
    pub fn plane_count(&self) -> usize {
        match self {
            Self::Yuyv422 => 1,
            _ => 3,
        }
    }

    /// Returns true if this is a planar layout.
    #[must_use]
    pub fn is_planar(&self) -> bool {
        self.plane_count() > 1
    }

    /// Chroma subsampling shifts as (horizontal, vertical).
    #[must_use]
    pub fn chroma_shift(&self) -> (u32, u32) {
        match self {
            Self::Yuv420p => (1, 1),
            Self::Yuv422p | Self::Yuyv422 => (1, 0),
            Self::Yuv444p => (0, 0),
        }
    }

    /// Samples per row and number of rows for `plane` of a `width`x`height` picture.
    #[must_use]
    pub fn plane_geometry(&self, plane: usize, width: u32, height: u32) -> (usize, usize) {
        let (w, h) = (width as usize, height as usize);
        match (self, plane) {
            (Self::Yuyv422, _) => (w * 2, h),
            (_, 0) => (w, h),
            _ => {
                let (sx, sy) = self.chroma_shift();
                (w >> sx, h >> sy)
            }
        }
    }

    /// Tight line size in bytes for `plane` at the given bit depth.
    #[must_use]
    pub fn line_size(&self, plane: usize, width: u32, bit_depth: u8) -> usize {
        let (samples, _) = self.plane_geometry(plane, width, 1);
        samples * bytes_per_sample(bit_depth)
    }
}

/// Bytes used to store one sample at `bit_depth`.
#[must_use]
pub fn bytes_per_sample(bit_depth: u8) -> usize {
    (usize::from(bit_depth) + 7) >> 3
}

/// Which way data flows through a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// Frames in, coded units out.
    Encode,
    /// Coded units in, frames out.
    Decode,
    /// Frames in, one or more frames out.
    Filter,
}

/// Rate control for encode sessions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RateControl {
    /// Target bitrate in bits per second.
    Bitrate(u32),
    /// Fixed quantizer, used when no bitrate is given.
    FixedQp(u32),
}

impl Default for RateControl {
    fn default() -> Self {
        Self::Bitrate(5_000_000) // 5 Mbps
    }
}

/// Fine-grained encoder knobs passed through to the accelerator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EncoderTuning {
    /// Adaptive quantization on/off (0 or 1).
    pub aq_mode: u8,
    /// Temporal AQ gain, 50..=200.
    pub aq_temporal_gain: u32,
    /// Spatial AQ gain, 50..=200.
    pub aq_spatial_gain: u32,
    /// QP offset for I pictures, -10..=10.
    pub qp_offset_i: i32,
    /// QP offsets for the three B-picture layers, -10..=10.
    pub qp_offset_b: [i32; 3],
}

impl Default for EncoderTuning {
    fn default() -> Self {
        Self {
            aq_mode: 1,
            aq_temporal_gain: 100,
            aq_spatial_gain: 100,
            qp_offset_i: -4,
            qp_offset_b: [1, 2, 2],
        }
    }
}

impl EncoderTuning {
    fn validate(&self) -> Result<(), CodecError> {
        if self.aq_mode > 1 {
            return Err(CodecError::invalid_config(format!(
                "aq mode {} out of range 0..=1",
                self.aq_mode
            )));
        }
        for (name, gain) in [
            ("temporal", self.aq_temporal_gain),
            ("spatial", self.aq_spatial_gain),
        ] {
            if !(50..=200).contains(&gain) {
                return Err(CodecError::invalid_config(format!(
                    "{name} aq gain {gain} out of range 50..=200"
                )));
            }
        }
        let offsets = std::iter::once(self.qp_offset_i).chain(self.qp_offset_b);
        for offset in offsets {
            if !(-10..=10).contains(&offset) {
                return Err(CodecError::invalid_config(format!(
                    "qp offset {offset} out of range -10..=10"
                )));
            }
        }
        Ok(())
    }
}

/// Geometry of one filter output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FilterOutput {
    /// Output width in pixels.
    pub width: u32,
    /// Output height in pixels.
    pub height: u32,
}

impl FilterOutput {
    /// Create a filter output of the given size.
    #[must_use]
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// The four-rung ladder used by scaler kernels when nothing else is asked for.
    #[must_use]
    pub fn default_ladder() -> Vec<Self> {
        vec![
            Self::new(1280, 720),
            Self::new(852, 480),
            Self::new(640, 360),
            Self::new(256, 144),
        ]
    }
}

/// Maximum number of outputs a filter session may produce per input.
pub const MAX_FILTER_OUTPUTS: usize = 4;

/// How the adapter waits for output that is not ready yet.
///
/// Empty polls first spin, then yield, then sleep with exponential
/// backoff capped at `max_sleep`. Exceeding `timeout` is a fault.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    /// Empty polls retried immediately.
    pub spin_limit: u32,
    /// Further empty polls that yield the thread.
    pub yield_limit: u32,
    /// First sleep once spinning and yielding are exhausted.
    pub min_sleep: Duration,
    /// Upper bound for a single sleep.
    pub max_sleep: Duration,
    /// Total wait before a receive is declared stuck.
    pub timeout: Duration,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            spin_limit: 64,
            yield_limit: 256,
            min_sleep: Duration::from_micros(50),
            max_sleep: Duration::from_millis(2),
            timeout: Duration::from_secs(5),
        }
    }
}

impl PollPolicy {
    /// Set the total wait before a receive is declared stuck.
    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the spin and yield budgets.
    #[must_use]
    pub fn budgets(mut self, spin_limit: u32, yield_limit: u32) -> Self {
        self.spin_limit = spin_limit;
        self.yield_limit = yield_limit;
        self
    }
}

/// Configuration for opening an accelerator session.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Encode, decode or filter.
    pub direction: Direction,
    /// Codec of the coded side.
    pub codec: Codec,
    /// Frame width in pixels.
    pub width: u32,
    /// Frame height in pixels.
    pub height: u32,
    /// Layout of the frame side.
    pub pixel_format: PixelFormat,
    /// Bits per sample on the frame side (8 or 16).
    pub bit_depth: u8,
    /// Framerate as (numerator, denominator).
    pub framerate: (u32, u32),
    /// Rate control (encode only).
    pub rate_control: RateControl,
    /// GOP length. 0 lets the accelerator choose.
    pub gop_size: u32,
    /// IDR period. 0 lets the accelerator choose.
    pub idr_period: u32,
    /// Rate-control look-ahead: 0 (off) or 8..=64.
    pub lookahead_depth: u32,
    /// Encoder knobs.
    pub tuning: EncoderTuning,
    /// Decode intra pictures only.
    pub intra_only: bool,
    /// Decode reference pictures only.
    pub ref_only: bool,
    /// Layout handed back by decode sessions, when different from `pixel_format`.
    pub output_format: Option<PixelFormat>,
    /// Per-output geometry (filter only).
    pub filter_outputs: Vec<FilterOutput>,
    /// Upper bound on units in flight. `None` defers to the accelerator.
    pub pipeline_depth: Option<usize>,
    /// Receive wait policy.
    pub poll: PollPolicy,
    /// Accelerator log verbosity passed at session creation.
    pub log_level: u8,
    /// Vendor-specific parameters, forwarded verbatim at session creation.
    pub vendor: Option<String>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            direction: Direction::Encode,
            codec: Codec::H264,
            width: 1920,
            height: 1080,
            pixel_format: PixelFormat::Yuv420p,
            bit_depth: 8,
            framerate: (30, 1),
            rate_control: RateControl::default(),
            gop_size: 30, // Keyframe every 30 frames
            idr_period: 0,
            lookahead_depth: 0,
            tuning: EncoderTuning::default(),
            intra_only: false,
            ref_only: false,
            output_format: None,
            filter_outputs: Vec::new(),
            pipeline_depth: None,
            poll: PollPolicy::default(),
            log_level: 0,
            vendor: None,
        }
    }
}

impl SessionConfig {
    /// Create an encode session configuration.
    #[must_use]
    pub fn encoder(codec: Codec, width: u32, height: u32) -> Self {
        Self {
            direction: Direction::Encode,
            codec,
            width,
            height,
            ..Default::default()
        }
    }

    /// Create a decode session configuration.
    #[must_use]
    pub fn decoder(codec: Codec, width: u32, height: u32) -> Self {
        Self {
            direction: Direction::Decode,
            codec,
            width,
            height,
            ..Default::default()
        }
    }

    /// Create a filter session configuration with a single output of the input size.
    #[must_use]
    pub fn filter(width: u32, height: u32) -> Self {
        Self {
            direction: Direction::Filter,
            codec: Codec::Raw,
            width,
            height,
            filter_outputs: vec![FilterOutput::new(width, height)],
            ..Default::default()
        }
    }

    /// Set the frame-side pixel layout and bit depth.
    #[must_use]
    pub fn pixel_format(mut self, format: PixelFormat, bit_depth: u8) -> Self {
        self.pixel_format = format;
        self.bit_depth = bit_depth;
        self
    }

    /// Set the framerate.
    #[must_use]
    pub fn framerate(mut self, num: u32, den: u32) -> Self {
        self.framerate = (num, den);
        self
    }

    /// Set the target bitrate in bits per second. Zero selects fixed QP 35.
    #[must_use]
    pub fn bitrate(mut self, bitrate: u32) -> Self {
        self.rate_control = if bitrate > 0 {
            RateControl::Bitrate(bitrate)
        } else {
            RateControl::FixedQp(35)
        };
        self
    }

    /// Use a fixed quantizer.
    #[must_use]
    pub fn fixed_qp(mut self, qp: u32) -> Self {
        self.rate_control = RateControl::FixedQp(qp);
        self
    }

    /// Set GOP length and IDR period.
    #[must_use]
    pub fn gop(mut self, gop_size: u32, idr_period: u32) -> Self {
        self.gop_size = gop_size;
        self.idr_period = idr_period;
        self
    }

    /// Set the rate-control look-ahead depth.
    #[must_use]
    pub fn lookahead(mut self, depth: u32) -> Self {
        self.lookahead_depth = depth;
        self
    }

    /// Set encoder knobs.
    #[must_use]
    pub fn tuning(mut self, tuning: EncoderTuning) -> Self {
        self.tuning = tuning;
        self
    }

    /// Restrict decoding to intra or reference pictures.
    #[must_use]
    pub fn decode_subset(mut self, intra_only: bool, ref_only: bool) -> Self {
        self.intra_only = intra_only;
        self.ref_only = ref_only;
        self
    }

    /// Ask a decode session for a different output layout.
    #[must_use]
    pub fn output_format(mut self, format: PixelFormat) -> Self {
        self.output_format = Some(format);
        self
    }

    /// Replace the filter outputs.
    #[must_use]
    pub fn filter_outputs(mut self, outputs: Vec<FilterOutput>) -> Self {
        self.filter_outputs = outputs;
        self
    }

    /// Bound the number of units in flight.
    #[must_use]
    pub fn pipeline_depth(mut self, depth: usize) -> Self {
        self.pipeline_depth = Some(depth);
        self
    }

    /// Pass a vendor parameter string to the accelerator unchanged.
    #[must_use]
    pub fn vendor(mut self, params: impl Into<String>) -> Self {
        self.vendor = Some(params.into());
        self
    }

    /// Set the receive wait policy.
    #[must_use]
    pub fn poll(mut self, poll: PollPolicy) -> Self {
        self.poll = poll;
        self
    }

    /// Layout of frames handed back to the host.
    #[must_use]
    pub fn host_output_format(&self) -> PixelFormat {
        self.output_format.unwrap_or(self.pixel_format)
    }

    /// Check the configuration before any accelerator resource is created.
    pub fn validate(&self) -> Result<(), CodecError> {
        check_dimensions(self.width, self.height)?;

        if !matches!(self.bit_depth, 8 | 16) {
            return Err(CodecError::UnsupportedPixelFormat {
                format: self.pixel_format,
                bit_depth: self.bit_depth,
            });
        }
        if !self.pixel_format.is_planar() {
            return Err(CodecError::UnsupportedPixelFormat {
                format: self.pixel_format,
                bit_depth: self.bit_depth,
            });
        }
        if self.framerate.0 == 0 || self.framerate.1 == 0 {
            return Err(CodecError::invalid_config(format!(
                "framerate {}/{} is not usable",
                self.framerate.0, self.framerate.1
            )));
        }
        if self.pipeline_depth == Some(0) {
            return Err(CodecError::invalid_config("pipeline depth must be at least 1"));
        }

        match self.direction {
            Direction::Encode => {
                if self.lookahead_depth != 0 && !(8..=64).contains(&self.lookahead_depth) {
                    return Err(CodecError::invalid_config(format!(
                        "look-ahead depth {} must be 0 or within 8..=64",
                        self.lookahead_depth
                    )));
                }
                if let RateControl::FixedQp(qp) = self.rate_control {
                    if qp > 51 {
                        return Err(CodecError::invalid_config(format!("qp {qp} above 51")));
                    }
                }
                self.tuning.validate()?;
            }
            Direction::Decode => {
                if self.intra_only && self.ref_only {
                    return Err(CodecError::invalid_config(
                        "intra-only and reference-only decoding are exclusive",
                    ));
                }
                if self.output_format == Some(PixelFormat::Yuyv422)
                    && (self.pixel_format != PixelFormat::Yuv422p || self.bit_depth != 8)
                {
                    return Err(CodecError::UnsupportedPixelFormat {
                        format: PixelFormat::Yuyv422,
                        bit_depth: self.bit_depth,
                    });
                }
                if let Some(format) = self.output_format {
                    if format != PixelFormat::Yuyv422 && format != self.pixel_format {
                        return Err(CodecError::UnsupportedPixelFormat {
                            format,
                            bit_depth: self.bit_depth,
                        });
                    }
                }
            }
            Direction::Filter => {
                if self.filter_outputs.is_empty() || self.filter_outputs.len() > MAX_FILTER_OUTPUTS {
                    return Err(CodecError::invalid_config(format!(
                        "filter needs 1..={MAX_FILTER_OUTPUTS} outputs, got {}",
                        self.filter_outputs.len()
                    )));
                }
                for output in &self.filter_outputs {
                    check_dimensions(output.width, output.height)?;
                }
            }
        }
        Ok(())
    }
}

fn check_dimensions(width: u32, height: u32) -> Result<(), CodecError> {
    if width == 0 || height == 0 || width % 2 != 0 || height % 2 != 0 {
        return Err(CodecError::InvalidDimensions { width, height });
    }
    Ok(())
}
