use xma_codec::{bytes_per_sample, CodecError, Direction, FilterOutput, SessionConfig, VideoFrame};

use super::{LoopbackOptions, Pipeline, Take};
use crate::flow::{RecvStatus, SendStatus};
use crate::{Accelerator, FrameView};

/// Loopback filter: nearest-neighbour scaling to every configured output.
///
/// An output the size of the input is an exact copy.
pub struct LoopbackFilter {
    pipeline: Pipeline<Vec<VideoFrame>>,
    outputs: Vec<FilterOutput>,
}

impl LoopbackFilter {
    pub fn new(options: LoopbackOptions) -> Self {
        Self {
            pipeline: Pipeline::new(options),
            outputs: Vec::new(),
        }
    }

    pub fn close_count(&self) -> u32 {
        self.pipeline.closes
    }

    fn scale(&self, frame: &FrameView<'_>) -> Vec<VideoFrame> {
        self.outputs
            .iter()
            .map(|output| {
                let mut out =
                    VideoFrame::alloc(output.width, output.height, frame.pixel_format, frame.bit_depth);
                for plane in 0..frame.plane_count() {
                    scale_plane(frame, plane, &mut out);
                }
                out
            })
            .collect()
    }
}

fn scale_plane(src: &FrameView<'_>, plane: usize, dst: &mut VideoFrame) {
    let bps = bytes_per_sample(src.bit_depth);
    let (src_w, src_h) = src.pixel_format.plane_geometry(plane, src.width, src.height);
    let (dst_w, dst_h) = dst.pixel_format.plane_geometry(plane, dst.width, dst.height);
    let src_rows: Vec<&[u8]> = src.rows(plane).collect();
    if src_rows.len() < src_h || src_w == 0 {
        return;
    }
    for (y, row) in dst.rows_mut(plane).enumerate() {
        let src_row = src_rows[y * src_h / dst_h];
        for (x, sample) in row.chunks_exact_mut(bps).enumerate() {
            let sx = x * src_w / dst_w;
            sample.copy_from_slice(&src_row[sx * bps..(sx + 1) * bps]);
        }
    }
}

impl Accelerator for LoopbackFilter {
    type Input<'a> = FrameView<'a>;
    type Output = Vec<VideoFrame>;

    fn open(&mut self, config: &SessionConfig) -> Result<(), CodecError> {
        self.pipeline.open()?;
        self.outputs = config.filter_outputs.clone();
        tracing::debug!(
            "Loopback filter open: {}x{} to {} outputs, latency {}",
            config.width,
            config.height,
            self.outputs.len(),
            self.pipeline.latency()
        );
        Ok(())
    }

    fn submit(&mut self, frame: Option<FrameView<'_>>) -> Result<SendStatus, CodecError> {
        self.pipeline.check_submit()?;
        self.pipeline.count_submit();
        match frame {
            Some(frame) => {
                let set = self.scale(&frame);
                Ok(self.pipeline.push(set))
            }
            None => {
                self.pipeline.end_of_input();
                Ok(SendStatus::Accepted)
            }
        }
    }

    fn receive(&mut self, dst: &mut Vec<VideoFrame>) -> Result<RecvStatus, CodecError> {
        match self.pipeline.take()? {
            Take::Ready(set) => {
                if dst.len() != set.len() {
                    return Err(CodecError::fault(format!(
                        "{} output buffers for {} outputs",
                        dst.len(),
                        set.len()
                    )));
                }
                for (out, produced) in dst.iter_mut().zip(set) {
                    if out.planes.iter().map(Vec::len).ne(produced.planes.iter().map(Vec::len)) {
                        return Err(CodecError::fault("output buffer does not match output geometry"));
                    }
                    for (dst_plane, src_plane) in out.planes.iter_mut().zip(&produced.planes) {
                        dst_plane.copy_from_slice(src_plane);
                    }
                }
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
        Direction::Filter
    }

    fn pipeline_depth_hint(&self) -> Option<usize> {
        self.pipeline.depth_hint()
    }
}
