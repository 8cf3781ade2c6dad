//! Host-facing traits for accelerator-backed encode, decode and filter sessions.

use crate::{Codec, CodecError, PixelFormat, VideoFrame};

/// Trait for types that can provide planar video frame data.
///
/// This trait allows different frame types to be submitted without
/// requiring a specific concrete type.
pub trait VideoFrameData: Send {
    /// Returns the frame width in pixels.
    fn width(&self) -> u32;

    /// Returns the frame height in pixels.
    fn height(&self) -> u32;

    /// Returns the pixel layout of the frame.
    fn pixel_format(&self) -> PixelFormat;

    /// Returns the bits per sample.
    fn bit_depth(&self) -> u8;

    /// Returns plane `index`, or an empty slice if the plane does not exist.
    fn plane(&self, index: usize) -> &[u8];

    /// Returns the stride of plane `index` in bytes.
    fn stride(&self, index: usize) -> usize;

    /// Presentation timestamp.
    fn pts(&self) -> Option<i64>;

    /// Decode timestamp.
    fn dts(&self) -> Option<i64>;
}

/// A coded unit in start-code framing, or a length-prefixed packet on input to decoders.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedPacket {
    /// Coded bitstream bytes.
    pub data: Vec<u8>,
    /// Presentation timestamp.
    pub pts: Option<i64>,
    /// Decode timestamp.
    pub dts: Option<i64>,
    /// Whether this packet starts a random access point.
    pub is_keyframe: bool,
    /// Output index (monotonically increasing).
    pub frame_index: u64,
}

impl EncodedPacket {
    /// Create a new packet.
    #[must_use]
    pub fn new(data: Vec<u8>, pts: Option<i64>, dts: Option<i64>) -> Self {
        Self {
            data,
            pts,
            dts,
            is_keyframe: false,
            frame_index: 0,
        }
    }
}

/// Outcome of one synchronous call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Output<T> {
    /// One output unit is available.
    Unit(T),
    /// The pipeline is filling; call again with more input.
    Pending,
    /// Every submitted unit has been returned.
    EndOfStream,
}

impl<T> Output<T> {
    /// Returns the unit, if any.
    pub fn unit(self) -> Option<T> {
        match self {
            Self::Unit(value) => Some(value),
            _ => None,
        }
    }

    /// Returns true once the stream is exhausted.
    #[must_use]
    pub fn is_end_of_stream(&self) -> bool {
        matches!(self, Self::EndOfStream)
    }

    /// Map the carried unit.
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Output<U> {
        match self {
            Self::Unit(value) => Output::Unit(f(value)),
            Self::Pending => Output::Pending,
            Self::EndOfStream => Output::EndOfStream,
        }
    }
}

/// Trait for video encoders.
///
/// One call submits at most one frame and returns at most one packet.
/// Passing `None` signals end of input; keep calling with `None` until
/// [`Output::EndOfStream`] to collect everything still in flight.
pub trait VideoEncoder: Send {
    /// Submit a frame (or `None` to drain) and collect at most one packet.
    fn encode(&mut self, frame: Option<&dyn VideoFrameData>)
        -> Result<Output<EncodedPacket>, CodecError>;

    /// Drain the encoder and return every remaining packet.
    fn flush(&mut self) -> Result<Vec<EncodedPacket>, CodecError> {
        let mut packets = Vec::new();
        loop {
            match self.encode(None)? {
                Output::Unit(packet) => packets.push(packet),
                Output::Pending => continue,
                Output::EndOfStream => return Ok(packets),
            }
        }
    }

    /// Release the session. Calling this more than once is harmless.
    fn close(&mut self) -> Result<(), CodecError>;

    /// Returns the codec being used.
    fn codec(&self) -> Codec;

    /// Returns the configured dimensions (width, height).
    fn dimensions(&self) -> (u32, u32);
}

/// Trait for video decoders.
///
/// Packets may carry several length-prefixed units; each packet counts
/// as one unit of work. `None` or an empty packet signals end of input.
pub trait VideoDecoder: Send {
    /// Submit a packet (or `None` to drain) and collect at most one frame.
    fn decode(&mut self, packet: Option<&EncodedPacket>) -> Result<Output<VideoFrame>, CodecError>;

    /// Drain the decoder and return every remaining frame.
    fn flush(&mut self) -> Result<Vec<VideoFrame>, CodecError> {
        let mut frames = Vec::new();
        loop {
            match self.decode(None)? {
                Output::Unit(frame) => frames.push(frame),
                Output::Pending => continue,
                Output::EndOfStream => return Ok(frames),
            }
        }
    }

    /// Release the session. Calling this more than once is harmless.
    fn close(&mut self) -> Result<(), CodecError>;

    /// Returns the codec being used.
    fn codec(&self) -> Codec;

    /// Returns the configured dimensions (width, height).
    fn dimensions(&self) -> (u32, u32);
}

/// Trait for frame-to-frames filters such as scalers and copy kernels.
pub trait VideoFilter: Send {
    /// Submit a frame (or `None` to drain) and collect one set of outputs.
    fn filter(&mut self, frame: Option<&dyn VideoFrameData>)
        -> Result<Output<Vec<VideoFrame>>, CodecError>;

    /// Drain the filter and return every remaining output set.
    fn flush(&mut self) -> Result<Vec<Vec<VideoFrame>>, CodecError> {
        let mut sets = Vec::new();
        loop {
            match self.filter(None)? {
                Output::Unit(set) => sets.push(set),
                Output::Pending => continue,
                Output::EndOfStream => return Ok(sets),
            }
        }
    }

    /// Release the session. Calling this more than once is harmless.
    fn close(&mut self) -> Result<(), CodecError>;

    /// Number of frames produced per input.
    fn output_count(&self) -> usize;
}
