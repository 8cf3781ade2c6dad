//! Host-side data model for pipelined video accelerator sessions.
//!
//! This crate holds what an application sees of an accelerator: frames,
//! coded packets, session configuration and the traits that encode,
//! decode and filter front-ends implement. The adapter that drives the
//! accelerator itself lives in `xma-bridge`.
//!
//! # Quick Start
//!
//! ```ignore
//! use xma_codec::{Codec, Output, SessionConfig, VideoEncoder, VideoFrame};
//!
//! let config = SessionConfig::encoder(Codec::Hevc, 1920, 1080)
//!     .framerate(60, 1)
//!     .lookahead(30);
//!
//! let mut encoder = open_encoder(config)?;
//!
//! let frame = VideoFrame::alloc(1920, 1080, PixelFormat::Yuv420p, 8).with_timestamps(Some(0), None);
//! if let Output::Unit(packet) = encoder.encode(Some(&frame))? {
//!     // packet.data holds start-code framed units
//! }
//! for packet in encoder.flush()? {
//!     // packets still in flight at end of input
//! }
//! ```
//!
//! # Architecture
//!
//! The crate is built around the [`VideoEncoder`], [`VideoDecoder`] and
//! [`VideoFilter`] traits. Each call submits at most one unit and returns
//! at most one, wrapped in [`Output`] so that pipeline fill and end of
//! stream are explicit.

mod error;
mod frame;
mod traits;
mod types;

pub use error::CodecError;
pub use frame::{expected_frame_size, plane_span, VideoFrame};
pub use traits::{EncodedPacket, Output, VideoDecoder, VideoEncoder, VideoFilter, VideoFrameData};
pub use types::{
    bytes_per_sample, Codec, Direction, EncoderTuning, FilterOutput, PixelFormat, PollPolicy,
    RateControl, SessionConfig, MAX_FILTER_OUTPUTS,
};
