//! Filter front-end: one frame in, one frame per configured output out.

use tracing::info;
use xma_codec::{CodecError, Direction, Output, SessionConfig, VideoFilter, VideoFrame, VideoFrameData};

use crate::transfer::{self, StagingBuffer};
use crate::{Accelerator, FrameView, Session, Timestamps};

/// Accelerator-backed scaler or copy filter.
pub struct Filter<A: Accelerator> {
    session: Session<A>,
    staging: StagingBuffer,
    outputs: Vec<VideoFrame>,
}

impl<A> Filter<A>
where
    A: for<'a> Accelerator<Input<'a> = FrameView<'a>, Output = Vec<VideoFrame>>,
{
    /// Open a filter session on `device`.
    pub fn new(device: A, config: &SessionConfig) -> Result<Self, CodecError> {
        if config.direction != Direction::Filter {
            return Err(CodecError::invalid_config(format!(
                "{:?} configuration for a filter",
                config.direction
            )));
        }
        let mut session = Session::new(device);
        session.open(config)?;

        let outputs: Vec<VideoFrame> = config
            .filter_outputs
            .iter()
            .map(|o| VideoFrame::alloc(o.width, o.height, config.pixel_format, config.bit_depth))
            .collect();
        let sizes: Vec<String> = outputs.iter().map(|o| format!("{}x{}", o.width, o.height)).collect();
        info!(
            "Filter ready: {}x{} -> [{}]",
            config.width,
            config.height,
            sizes.join(", ")
        );

        Ok(Self {
            session,
            staging: StagingBuffer::new(config.width, config.height, config.pixel_format, config.bit_depth),
            outputs,
        })
    }

    pub fn session(&self) -> &Session<A> {
        &self.session
    }

    fn stamp(&self, ts: Timestamps) -> Vec<VideoFrame> {
        self.outputs
            .iter()
            .map(|frame| frame.clone().with_timestamps(ts.pts, ts.dts))
            .collect()
    }
}

impl<A> VideoFilter for Filter<A>
where
    A: for<'a> Accelerator<Input<'a> = FrameView<'a>, Output = Vec<VideoFrame>>,
{
    fn filter(&mut self, frame: Option<&dyn VideoFrameData>) -> Result<Output<Vec<VideoFrame>>, CodecError> {
        let result = match frame {
            Some(frame) => {
                let ts = Timestamps::new(frame.pts(), frame.dts());
                let (view, _) = transfer::transfer(frame, &mut self.staging)?;
                self.session.cycle(view, ts, &mut self.outputs)?
            }
            None => self.session.drain(&mut self.outputs)?,
        };
        Ok(result.map(|ts| self.stamp(ts)))
    }

    fn close(&mut self) -> Result<(), CodecError> {
        let result = self.session.close();
        self.staging.release();
        result
    }

    fn output_count(&self) -> usize {
        self.outputs.len()
    }
}

#[cfg(all(test, feature = "loopback"))]
mod tests {
    use super::*;
    use crate::loopback::{LoopbackFilter, LoopbackOptions};
    use xma_codec::{FilterOutput, PixelFormat};

    fn gradient(width: u32, height: u32, pts: i64) -> VideoFrame {
        let mut frame = VideoFrame::alloc_padded(width, height, PixelFormat::Yuv420p, 8, 16)
            .with_timestamps(Some(pts), Some(pts));
        for plane in 0..3 {
            for (y, row) in frame.rows_mut(plane).enumerate() {
                for (x, sample) in row.iter_mut().enumerate() {
                    *sample = (x + y + plane) as u8;
                }
            }
        }
        frame
    }

    #[test]
    fn test_copy_filter_round_trip() {
        let config = SessionConfig::filter(64, 32);
        let mut filter = Filter::new(LoopbackFilter::new(LoopbackOptions::default().latency(3)), &config).unwrap();

        let frames: Vec<VideoFrame> = (0..8).map(|pts| gradient(64, 32, pts)).collect();
        let mut out = Vec::new();
        for frame in &frames {
            if let Output::Unit(set) = filter.filter(Some(frame)).unwrap() {
                out.push(set);
            }
        }
        // Pipelined: nothing for the first two frames.
        assert_eq!(out.len(), 6);
        out.extend(filter.flush().unwrap());

        assert_eq!(out.len(), frames.len());
        for (set, src) in out.iter().zip(&frames) {
            assert_eq!(set.len(), 1);
            assert_eq!(set[0].pts, src.pts);
            assert_eq!(set[0].packed(), src.packed());
        }
    }

    #[test]
    fn test_scaler_ladder() {
        let ladder = vec![FilterOutput::new(32, 16), FilterOutput::new(16, 8)];
        let config = SessionConfig::filter(64, 32).filter_outputs(ladder);
        let mut filter = Filter::new(LoopbackFilter::new(LoopbackOptions::default()), &config).unwrap();
        assert_eq!(filter.output_count(), 2);

        let src = gradient(64, 32, 7);
        let set = filter.filter(Some(&src)).unwrap().unit().unwrap();
        assert_eq!((set[0].width, set[0].height), (32, 16));
        assert_eq!((set[1].width, set[1].height), (16, 8));
        // Nearest neighbour: output (x, y) samples input (2x, 2y).
        let row1: Vec<&[u8]> = set[0].rows(0).collect();
        assert_eq!(row1[3][5], (10 + 6) as u8);
        assert!(set.iter().all(|f| f.pts == Some(7)));
    }

    #[test]
    fn test_drain_without_input() {
        let config = SessionConfig::filter(64, 32);
        let mut filter = Filter::new(LoopbackFilter::new(LoopbackOptions::default()), &config).unwrap();
        assert!(filter.flush().unwrap().is_empty());
        filter.close().unwrap();
        filter.close().unwrap();
        assert_eq!(filter.session().device().close_count(), 1);
    }
}
