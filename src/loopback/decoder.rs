use xma_codec::{expected_frame_size, CodecError, Direction, SessionConfig, VideoFrame};

use super::{LoopbackOptions, Pipeline, Take};
use crate::flow::{RecvStatus, SendStatus};
use crate::reframe::{nal_unit_type, split_start_code_units, START_CODE};
use crate::Accelerator;

/// Loopback decoder: reverses [`super::LoopbackEncoder`].
///
/// Every submit must be start-code framed. Parameter sets are noted,
/// pictures are queued, anything else is accepted and ignored.
pub struct LoopbackDecoder {
    pipeline: Pipeline<Vec<u8>>,
    picture_size: usize,
    seen_sps: bool,
    seen_pps: bool,
    units: Vec<usize>,
}

impl LoopbackDecoder {
    pub fn new(options: LoopbackOptions) -> Self {
        Self {
            pipeline: Pipeline::new(options),
            picture_size: 0,
            seen_sps: false,
            seen_pps: false,
            units: Vec::new(),
        }
    }

    pub fn close_count(&self) -> u32 {
        self.pipeline.closes
    }

    /// Byte length of every unit submitted so far, in order.
    pub fn submitted_units(&self) -> &[usize] {
        &self.units
    }

    /// Whether an SPS and a PPS have been seen.
    pub fn has_parameter_sets(&self) -> bool {
        self.seen_sps && self.seen_pps
    }

    fn note_parameter_sets(&mut self, unit: &[u8]) {
        for payload in split_start_code_units(unit) {
            match payload.first().map(|h| h & 0x1F) {
                Some(nal_unit_type::SPS) => self.seen_sps = true,
                Some(nal_unit_type::PPS) => self.seen_pps = true,
                _ => {}
            }
        }
    }
}

impl Accelerator for LoopbackDecoder {
    type Input<'a> = &'a [u8];
    type Output = VideoFrame;

    fn open(&mut self, config: &SessionConfig) -> Result<(), CodecError> {
        self.pipeline.open()?;
        self.picture_size =
            expected_frame_size(config.width, config.height, config.pixel_format, config.bit_depth);
        tracing::debug!(
            "Loopback decoder open: {:?} {}x{} {:?}, latency {}",
            config.codec,
            config.width,
            config.height,
            config.pixel_format,
            self.pipeline.latency()
        );
        Ok(())
    }

    fn submit(&mut self, unit: Option<&[u8]>) -> Result<SendStatus, CodecError> {
        self.pipeline.check_submit()?;
        self.pipeline.count_submit();
        let Some(unit) = unit else {
            self.pipeline.end_of_input();
            return Ok(SendStatus::Accepted);
        };
        self.units.push(unit.len());

        let Some(payload) = unit.strip_prefix(&START_CODE[..]) else {
            return Err(CodecError::fault("unit without start code"));
        };
        match payload.first().map(|h| h & 0x1F) {
            Some(nal_unit_type::SPS | nal_unit_type::PPS) => {
                self.note_parameter_sets(unit);
                Ok(self.pipeline.status())
            }
            Some(nal_unit_type::IDR_SLICE | nal_unit_type::NON_IDR_SLICE) => {
                if self.pipeline.options.require_parameter_sets && !self.has_parameter_sets() {
                    return Err(CodecError::fault("picture before parameter sets"));
                }
                let body = &payload[1..];
                if body.len() != self.picture_size {
                    return Err(CodecError::fault(format!(
                        "picture of {} bytes, expected {}",
                        body.len(),
                        self.picture_size
                    )));
                }
                Ok(self.pipeline.push(body.to_vec()))
            }
            _ => Ok(self.pipeline.status()),
        }
    }

    fn receive(&mut self, dst: &mut VideoFrame) -> Result<RecvStatus, CodecError> {
        let draining = self.pipeline.draining;
        match self.pipeline.take()? {
            Take::Ready(body) => {
                let mut offset = 0;
                for plane in 0..dst.pixel_format.plane_count() {
                    for row in dst.rows_mut(plane) {
                        let end = offset + row.len();
                        let src = body
                            .get(offset..end)
                            .ok_or_else(|| CodecError::fault("output frame larger than picture"))?;
                        row.copy_from_slice(src);
                        offset = end;
                    }
                }
                Ok(RecvStatus::Ready)
            }
            Take::Busy => Ok(RecvStatus::TryAgain),
            Take::Starved if draining => Ok(RecvStatus::TryAgain),
            Take::Starved => Ok(RecvStatus::SendMoreData),
        }
    }

    fn close(&mut self) -> Result<(), CodecError> {
        self.pipeline.close();
        Ok(())
    }

    fn direction(&self) -> Direction {
        Direction::Decode
    }

    fn pipeline_depth_hint(&self) -> Option<usize> {
        self.pipeline.depth_hint()
    }

    fn null_per_drain_cycle(&self) -> bool {
        false
    }
}
