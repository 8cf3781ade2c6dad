//! The accelerator seam: what the adapter needs from a session-oriented device.
//!
//! A device accepts one unit at a time through [`Accelerator::submit`] and
//! hands back finished units through [`Accelerator::receive`]. Passing
//! `None` to `submit` is the end-of-stream marker (the "null unit").

use xma_codec::{CodecError, Direction, PixelFormat, SessionConfig};

use crate::flow::{RecvStatus, SendStatus};

/// A device-side session.
///
/// Implementations are driven from a single thread by [`crate::Session`];
/// they never see a submit after a fault or after `close`.
pub trait Accelerator: Send {
    /// What one submit carries.
    type Input<'a>;

    /// Destination a finished unit is written into. Owned by the adapter.
    type Output;

    /// Create the device session.
    fn open(&mut self, config: &SessionConfig) -> Result<(), CodecError>;

    /// Submit one unit, or `None` to signal end of input.
    fn submit(&mut self, unit: Option<Self::Input<'_>>) -> Result<SendStatus, CodecError>;

    /// Try to take one finished unit.
    fn receive(&mut self, dst: &mut Self::Output) -> Result<RecvStatus, CodecError>;

    /// Release the device session.
    fn close(&mut self) -> Result<(), CodecError>;

    /// Data direction this device implements.
    fn direction(&self) -> Direction;

    /// Maximum units in flight, when the device knows it.
    fn pipeline_depth_hint(&self) -> Option<usize> {
        None
    }

    /// Whether every drain cycle needs its own null unit.
    ///
    /// Decoders take a single null unit and keep flushing on their own.
    fn null_per_drain_cycle(&self) -> bool {
        true
    }
}

/// A borrowed picture in the layout the device expects.
#[derive(Debug, Clone, Copy)]
pub struct FrameView<'a> {
    /// Frame width in pixels.
    pub width: u32,
    /// Frame height in pixels.
    pub height: u32,
    /// Pixel layout.
    pub pixel_format: PixelFormat,
    /// Bits per sample.
    pub bit_depth: u8,
    /// Plane data; only the first `plane_count()` entries are meaningful.
    pub planes: [&'a [u8]; 3],
    /// Row stride per plane.
    pub strides: [usize; 3],
}

impl FrameView<'_> {
    /// Number of meaningful planes.
    #[must_use]
    pub fn plane_count(&self) -> usize {
        self.pixel_format.plane_count()
    }

    /// Visible rows of `plane`.
    pub fn rows(&self, plane: usize) -> impl Iterator<Item = &[u8]> + '_ {
        let line = self.pixel_format.line_size(plane, self.width, self.bit_depth);
        let (_, rows) = self.pixel_format.plane_geometry(plane, self.width, self.height);
        let stride = self.strides[plane].max(1);
        self.planes[plane]
            .chunks(stride)
            .take(rows)
            .map(move |row| &row[..line.min(row.len())])
    }
}

/// Fixed-capacity destination for coded output, reused every cycle.
#[derive(Debug)]
pub struct BitstreamBuffer {
    data: Vec<u8>,
    len: usize,
    keyframe: bool,
}

impl BitstreamBuffer {
    /// Allocate a buffer that can hold `capacity` bytes.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            data: vec![0u8; capacity],
            len: 0,
            keyframe: false,
        }
    }

    /// Bytes the buffer can hold.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    /// Write `bytes` as the new content.
    pub fn fill(&mut self, bytes: &[u8]) -> Result<(), CodecError> {
        let capacity = self.data.len();
        let dst = self.data.get_mut(..bytes.len()).ok_or(CodecError::NotEnoughBuffer {
            needed: bytes.len(),
            capacity,
        })?;
        dst.copy_from_slice(bytes);
        self.len = bytes.len();
        Ok(())
    }

    /// Whole backing storage, for devices that write in place before [`Self::set_len`].
    pub fn spare_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    /// Mark how many bytes are valid.
    pub fn set_len(&mut self, len: usize) -> Result<(), CodecError> {
        if len > self.data.len() {
            return Err(CodecError::NotEnoughBuffer {
                needed: len,
                capacity: self.data.len(),
            });
        }
        self.len = len;
        Ok(())
    }

    /// Valid bytes.
    #[must_use]
    pub fn filled(&self) -> &[u8] {
        &self.data[..self.len]
    }

    /// Number of valid bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Returns true if no bytes are valid.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Drop the first `count` valid bytes, shifting the rest to the front.
    pub fn discard_front(&mut self, count: usize) {
        let count = count.min(self.len);
        self.data.copy_within(count..self.len, 0);
        self.len -= count;
    }

    pub fn set_keyframe(&mut self, keyframe: bool) {
        self.keyframe = keyframe;
    }

    #[must_use]
    pub fn is_keyframe(&self) -> bool {
        self.keyframe
    }

    /// Free the backing storage.
    pub fn release(&mut self) {
        self.data = Vec::new();
        self.len = 0;
    }
}
