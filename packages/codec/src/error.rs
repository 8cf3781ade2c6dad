//! Error types for accelerator sessions.

use thiserror::Error;

use crate::PixelFormat;

/// Errors that can occur while driving an accelerator session.
#[derive(Debug, Error)]
pub enum CodecError {
    /// Invalid frame or session dimensions.
    #[error("invalid dimensions: {width}x{height}")]
    InvalidDimensions { width: u32, height: u32 },

    /// Pixel layout or bit depth the session cannot carry.
    #[error("unsupported pixel format {format:?} at {bit_depth} bits")]
    UnsupportedPixelFormat { format: PixelFormat, bit_depth: u8 },

    /// Session configuration rejected before the device was touched.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Container configuration record could not be interpreted.
    #[error("malformed configuration record: {0}")]
    MalformedConfigRecord(String),

    /// The accelerator refused to create a session.
    #[error("session creation failed: {0}")]
    SessionCreate(String),

    /// The accelerator reported an unrecoverable fault.
    #[error("session fault: {0}")]
    SessionFault(String),

    /// No output appeared within the receive poll budget.
    #[error("receive timed out after {polls} empty polls ({waited_ms} ms)")]
    PollTimeout { polls: u32, waited_ms: u64 },

    /// API call made in the wrong state or sequence.
    #[error("invalid call: {0}")]
    InvalidCall(String),

    /// Invalid parameter passed to the adapter.
    #[error("invalid parameter: {0}")]
    InvalidParam(String),

    /// Output buffer is not large enough for the produced unit.
    #[error("buffer not large enough: need {needed} bytes, have {capacity}")]
    NotEnoughBuffer { needed: usize, capacity: usize },

    /// The session has been closed.
    #[error("session closed")]
    Closed,

    /// Frame conversion error.
    #[error("frame conversion error: {0}")]
    ConversionError(String),

    /// Generic/unknown error.
    #[error("accelerator error: {0}")]
    Generic(String),
}

impl CodecError {
    /// Create an InvalidParam error with a message.
    pub fn invalid_param(msg: impl Into<String>) -> Self {
        Self::InvalidParam(msg.into())
    }

    /// Create an InvalidConfig error with a message.
    pub fn invalid_config(msg: impl Into<String>) -> Self {
        Self::InvalidConfig(msg.into())
    }

    /// Create an InvalidCall error with a message.
    pub fn invalid_call(msg: impl Into<String>) -> Self {
        Self::InvalidCall(msg.into())
    }

    /// Create a SessionFault error with a message.
    pub fn fault(msg: impl Into<String>) -> Self {
        Self::SessionFault(msg.into())
    }

    /// Create a Generic error with a message.
    pub fn generic(msg: impl Into<String>) -> Self {
        Self::Generic(msg.into())
    }

    /// Returns true for errors that end the stream at session open.
    #[must_use]
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            Self::InvalidDimensions { .. }
                | Self::UnsupportedPixelFormat { .. }
                | Self::InvalidConfig(_)
                | Self::MalformedConfigRecord(_)
                | Self::SessionCreate(_)
        )
    }
}
