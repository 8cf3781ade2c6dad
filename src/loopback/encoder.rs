use xma_codec::{CodecError, Direction, SessionConfig};

use super::{LoopbackOptions, Pipeline, Take};
use crate::flow::{RecvStatus, SendStatus};
use crate::reframe::{nal_unit_type, START_CODE};
use crate::{Accelerator, BitstreamBuffer, FrameView};

/// Loopback encoder: one start-code framed unit per frame.
///
/// The unit is a one-byte header (IDR every `gop_size` frames, non-IDR
/// otherwise) followed by the frame's visible samples, plane after plane.
pub struct LoopbackEncoder {
    pipeline: Pipeline<(Vec<u8>, bool)>,
    gop_size: u64,
    frames: u64,
    vendor: Option<String>,
}

impl LoopbackEncoder {
    pub fn new(options: LoopbackOptions) -> Self {
        Self {
            pipeline: Pipeline::new(options),
            gop_size: 0,
            frames: 0,
            vendor: None,
        }
    }

    /// Times the device session was released.
    pub fn close_count(&self) -> u32 {
        self.pipeline.closes
    }

    /// Vendor parameters received at open.
    pub fn vendor_params(&self) -> Option<&str> {
        self.vendor.as_deref()
    }

    fn encode(&mut self, frame: &FrameView<'_>) -> (Vec<u8>, bool) {
        let keyframe = match self.gop_size {
            0 => self.frames == 0,
            gop => self.frames % gop == 0,
        };
        self.frames += 1;

        let header = if keyframe {
            0x60 | nal_unit_type::IDR_SLICE
        } else {
            0x40 | nal_unit_type::NON_IDR_SLICE
        };
        let mut unit = Vec::new();
        unit.extend_from_slice(&START_CODE);
        unit.push(header);
        for plane in 0..frame.plane_count() {
            for row in frame.rows(plane) {
                unit.extend_from_slice(row);
            }
        }
        (unit, keyframe)
    }
}

impl Accelerator for LoopbackEncoder {
    type Input<'a> = FrameView<'a>;
    type Output = BitstreamBuffer;

    fn open(&mut self, config: &SessionConfig) -> Result<(), CodecError> {
        self.pipeline.open()?;
        self.gop_size = u64::from(config.gop_size);
        self.vendor = config.vendor.clone();
        tracing::debug!(
            "Loopback encoder open: {:?} {}x{}, latency {}, vendor params {:?}",
            config.codec,
            config.width,
            config.height,
            self.pipeline.latency(),
            config.vendor
        );
        Ok(())
    }

    fn submit(&mut self, frame: Option<FrameView<'_>>) -> Result<SendStatus, CodecError> {
        self.pipeline.check_submit()?;
        self.pipeline.count_submit();
        match frame {
            Some(frame) => {
                let unit = self.encode(&frame);
                Ok(self.pipeline.push(unit))
            }
            None => {
                self.pipeline.end_of_input();
                Ok(SendStatus::Accepted)
            }
        }
    }

    fn receive(&mut self, dst: &mut BitstreamBuffer) -> Result<RecvStatus, CodecError> {
        match self.pipeline.take()? {
            Take::Ready((unit, keyframe)) => {
                let mut out = self.pipeline.padding();
                out.extend_from_slice(&unit);
                dst.fill(&out)?;
                dst.set_keyframe(keyframe);
                Ok(RecvStatus::Ready)
            }
            Take::Busy | Take::Starved => Ok(RecvStatus::TryAgain),
        }
    }

    fn close(&mut self) -> Result<(), CodecError> {
        self.pipeline.close();
        Ok(())
    }

    fn direction(&self) -> Direction {
        Direction::Encode
    }

    fn pipeline_depth_hint(&self) -> Option<usize> {
        self.pipeline.depth_hint()
    }
}
