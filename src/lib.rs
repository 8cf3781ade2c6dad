//! xma-bridge - synchronous frame-at-a-time adapter for pipelined video accelerators.
//!
//! Hardware encoders, decoders and scalers run as sessions with internal
//! pipelines: input goes in, output comes out some units later. Host
//! frameworks want one unit in and at most one unit out per call. This
//! crate sits between the two:
//!
//! - [`Session`] owns a device session, counts units in flight and
//!   enforces the open/drain/close lifecycle.
//! - [`flow`] maps device answers to "output due" or "pipeline filling"
//!   and bounds the wait for output.
//! - [`timestamps`] carries presentation and decode timestamps across the
//!   pipeline delay.
//! - [`reframe`] converts length-prefixed container packets into start-code
//!   units and strips encoder padding.
//! - [`transfer`] hands host frames to the device, copying only when strides
//!   do not match.
//!
//! [`Encoder`], [`Decoder`] and [`Filter`] implement the `xma-codec` host
//! traits on top of any [`Accelerator`].
//!
//! # Example
//!
//! ```ignore
//! use xma_bridge::loopback::{LoopbackEncoder, LoopbackOptions};
//! use xma_bridge::{Encoder, Codec, Output, SessionConfig, VideoEncoder};
//!
//! let config = SessionConfig::encoder(Codec::H264, 1280, 720);
//! let mut encoder = Encoder::new(LoopbackEncoder::new(LoopbackOptions::default().latency(4)), &config)?;
//!
//! for frame in &frames {
//!     if let Output::Unit(packet) = encoder.encode(Some(frame))? {
//!         send(packet);
//!     }
//! }
//! for packet in encoder.flush()? {
//!     send(packet);
//! }
//! encoder.close()?;
//! ```

mod decoder;
mod device;
mod encoder;
mod filter;
mod session;

pub mod flow;
pub mod reframe;
pub mod timestamps;
pub mod transfer;

#[cfg(feature = "loopback")]
pub mod loopback;

pub use decoder::Decoder;
pub use device::{Accelerator, BitstreamBuffer, FrameView};
pub use encoder::Encoder;
pub use filter::Filter;
pub use flow::{RecvStatus, SendStatus};
pub use session::{Session, SessionState};
pub use timestamps::Timestamps;

pub use xma_codec::{
    Codec, CodecError, Direction, EncodedPacket, EncoderTuning, FilterOutput, Output, PixelFormat,
    PollPolicy, RateControl, SessionConfig, VideoDecoder, VideoEncoder, VideoFilter, VideoFrame,
    VideoFrameData,
};
