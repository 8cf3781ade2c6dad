//! Encoder front-end: frames in, start-code framed units out.

use tracing::{debug, info, warn};
use xma_codec::{
    expected_frame_size, Codec, CodecError, Direction, EncodedPacket, Output, SessionConfig,
    VideoEncoder, VideoFrameData,
};

use crate::reframe;
use crate::transfer::{self, StagingBuffer, TransferMode};
use crate::{Accelerator, BitstreamBuffer, FrameView, Session, Timestamps};

/// Headroom over the raw frame size for coded output.
const OUTPUT_HEADROOM: usize = 64 * 1024;

/// Accelerator-backed video encoder.
///
/// Some accelerators emit filler ahead of the first start code of the
/// first unit; it is removed before the unit reaches the host.
pub struct Encoder<A: Accelerator> {
    session: Session<A>,
    staging: StagingBuffer,
    output: BitstreamBuffer,
    codec: Codec,
    width: u32,
    height: u32,
    first_output_checked: bool,
    last_mode: Option<TransferMode>,
}

impl<A> Encoder<A>
where
    A: for<'a> Accelerator<Input<'a> = FrameView<'a>, Output = BitstreamBuffer>,
{
    /// Open an encode session on `device`.
    pub fn new(device: A, config: &SessionConfig) -> Result<Self, CodecError> {
        if config.direction != Direction::Encode {
            return Err(CodecError::invalid_config(format!(
                "{:?} configuration for an encoder",
                config.direction
            )));
        }
        let mut session = Session::new(device);
        session.open(config)?;

        let frame_size =
            expected_frame_size(config.width, config.height, config.pixel_format, config.bit_depth);
        info!(
            "Encoder ready: {:?} {}x{} @ {}/{} fps, {:?}, gop {}",
            config.codec,
            config.width,
            config.height,
            config.framerate.0,
            config.framerate.1,
            config.rate_control,
            config.gop_size
        );

        Ok(Self {
            session,
            staging: StagingBuffer::new(config.width, config.height, config.pixel_format, config.bit_depth),
            output: BitstreamBuffer::with_capacity(frame_size + OUTPUT_HEADROOM),
            codec: config.codec,
            width: config.width,
            height: config.height,
            first_output_checked: false,
            last_mode: None,
        })
    }

    pub fn session(&self) -> &Session<A> {
        &self.session
    }

    /// How the most recent frame reached the device.
    pub fn last_transfer_mode(&self) -> Option<TransferMode> {
        self.last_mode
    }

    fn packet(&mut self, ts: Timestamps) -> EncodedPacket {
        if !self.first_output_checked {
            self.first_output_checked = true;
            match reframe::find_start_code(self.output.filled()) {
                Some(0) => {}
                Some(padding) => {
                    debug!("Discarding {} bytes ahead of the first start code", padding);
                    self.output.discard_front(padding);
                }
                None => warn!("First encoded unit carries no start code; passing it through"),
            }
        }

        EncodedPacket {
            data: self.output.filled().to_vec(),
            pts: ts.pts,
            dts: ts.dts.or(ts.pts),
            is_keyframe: self.output.is_keyframe(),
            frame_index: self.session.produced() - 1,
        }
    }
}

impl<A> VideoEncoder for Encoder<A>
where
    A: for<'a> Accelerator<Input<'a> = FrameView<'a>, Output = BitstreamBuffer>,
{
    fn encode(&mut self, frame: Option<&dyn VideoFrameData>) -> Result<Output<EncodedPacket>, CodecError> {
        let result = match frame {
            Some(frame) => {
                let ts = Timestamps::new(frame.pts(), frame.dts());
                let (view, mode) = transfer::transfer(frame, &mut self.staging)?;
                if self.last_mode != Some(mode) {
                    debug!("Frame transfer mode: {:?}", mode);
                    self.last_mode = Some(mode);
                }
                self.session.cycle(view, ts, &mut self.output)?
            }
            None => self.session.drain(&mut self.output)?,
        };
        Ok(match result {
            Output::Unit(ts) => Output::Unit(self.packet(ts)),
            Output::Pending => Output::Pending,
            Output::EndOfStream => Output::EndOfStream,
        })
    }

    fn close(&mut self) -> Result<(), CodecError> {
        let result = self.session.close();
        self.staging.release();
        self.output.release();
        result
    }

    fn codec(&self) -> Codec {
        self.codec
    }

    fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }
}

#[cfg(all(test, feature = "loopback"))]
mod tests {
    use super::*;
    use crate::loopback::{LoopbackEncoder, LoopbackOptions};
    use crate::reframe::START_CODE;
    use rand::{rngs::StdRng, Rng, SeedableRng};
    use xma_codec::{PixelFormat, VideoFrame};

    const W: u32 = 32;
    const H: u32 = 16;

    fn encoder(options: LoopbackOptions) -> Encoder<LoopbackEncoder> {
        let config = SessionConfig::encoder(Codec::H264, W, H).gop(4, 0);
        Encoder::new(LoopbackEncoder::new(options), &config).unwrap()
    }

    fn frames(count: i64, padding: usize) -> Vec<VideoFrame> {
        let mut rng = StdRng::seed_from_u64(42);
        (0..count)
            .map(|pts| {
                let mut frame = VideoFrame::alloc_padded(W, H, PixelFormat::Yuv420p, 8, padding)
                    .with_timestamps(Some(pts * 3000), Some(pts * 3000 - 1));
                for plane in &mut frame.planes {
                    rng.fill(plane.as_mut_slice());
                }
                frame
            })
            .collect()
    }

    fn run(encoder: &mut Encoder<LoopbackEncoder>, frames: &[VideoFrame]) -> Vec<EncodedPacket> {
        let mut packets = Vec::new();
        for frame in frames {
            if let Output::Unit(packet) = encoder.encode(Some(frame)).unwrap() {
                packets.push(packet);
            }
        }
        packets.extend(encoder.flush().unwrap());
        packets
    }

    #[test]
    fn test_one_packet_per_frame_in_order() {
        let frames = frames(12, 0);
        let mut encoder = encoder(LoopbackOptions::default().latency(3).busy_polls(20, 7));
        let packets = run(&mut encoder, &frames);

        assert_eq!(packets.len(), frames.len());
        for (i, (packet, frame)) in packets.iter().zip(&frames).enumerate() {
            assert_eq!(packet.pts, frame.pts);
            assert_eq!(packet.dts, frame.dts);
            assert_eq!(packet.frame_index, i as u64);
            assert_eq!(packet.is_keyframe, i % 4 == 0);
            assert!(packet.data.starts_with(&START_CODE));
            assert_eq!(&packet.data[5..], frame.packed().as_slice());
        }
        assert_eq!(encoder.last_transfer_mode(), Some(TransferMode::Wrapped));
    }

    #[test]
    fn test_first_output_padding_removed() {
        let frames = frames(3, 0);
        for padding in [0, 1, 7, 300] {
            let mut encoder = encoder(LoopbackOptions::default().latency(2).first_output_padding(padding));
            let packets = run(&mut encoder, &frames);
            assert_eq!(packets.len(), 3);
            for packet in &packets {
                assert_eq!(reframe::find_start_code(&packet.data), Some(0), "padding {padding}");
                assert_eq!(packet.data.len(), 5 + frames[0].packed().len());
            }
        }
    }

    /// Emits canned units, one per submit.
    struct Canned {
        units: std::collections::VecDeque<Vec<u8>>,
    }

    impl Accelerator for Canned {
        type Input<'a> = FrameView<'a>;
        type Output = BitstreamBuffer;

        fn open(&mut self, _config: &SessionConfig) -> Result<(), CodecError> {
            Ok(())
        }

        fn submit(&mut self, _unit: Option<FrameView<'_>>) -> Result<crate::SendStatus, CodecError> {
            Ok(crate::SendStatus::Accepted)
        }

        fn receive(&mut self, dst: &mut BitstreamBuffer) -> Result<crate::RecvStatus, CodecError> {
            match self.units.pop_front() {
                Some(unit) => {
                    dst.fill(&unit)?;
                    Ok(crate::RecvStatus::Ready)
                }
                None => Err(CodecError::fault("no canned unit left")),
            }
        }

        fn close(&mut self) -> Result<(), CodecError> {
            Ok(())
        }

        fn direction(&self) -> Direction {
            Direction::Encode
        }
    }

    #[test]
    fn test_first_output_without_start_code_passes_through() {
        let first = vec![0x65, 1, 2, 3, 0, 0, 1];
        // Only the first unit is scanned; filler here stays.
        let second = vec![7, 7, 0, 0, 0, 1, 0x41, 9];
        let device = Canned {
            units: [first.clone(), second.clone()].into(),
        };
        let config = SessionConfig::encoder(Codec::H264, W, H);
        let mut encoder = Encoder::new(device, &config).unwrap();

        let frames = frames(2, 0);
        let packets: Vec<EncodedPacket> = frames
            .iter()
            .map(|f| encoder.encode(Some(f)).unwrap().unit().unwrap())
            .collect();
        assert_eq!(packets[0].data, first);
        assert_eq!(packets[1].data, second);
        assert_eq!(packets[1].pts, frames[1].pts);
    }

    #[test]
    fn test_padded_strides_are_staged() {
        let frames = frames(6, 24);
        let mut encoder = encoder(LoopbackOptions::default().latency(2));
        let packets = run(&mut encoder, &frames);
        assert_eq!(encoder.last_transfer_mode(), Some(TransferMode::Staged));
        for (packet, frame) in packets.iter().zip(&frames) {
            assert_eq!(&packet.data[5..], frame.packed().as_slice());
        }
    }

    #[test]
    fn test_missing_dts_falls_back_to_pts() {
        let mut frame = VideoFrame::alloc(W, H, PixelFormat::Yuv420p, 8);
        frame.pts = Some(90);
        let mut encoder = encoder(LoopbackOptions::default());
        let packet = encoder.encode(Some(&frame)).unwrap().unit().unwrap();
        assert_eq!(packet.dts, Some(90));
    }

    #[test]
    fn test_close_twice() {
        let mut encoder = encoder(LoopbackOptions::default().latency(2));
        let frames = frames(1, 0);
        assert_eq!(encoder.encode(Some(&frames[0])).unwrap(), Output::Pending);
        encoder.close().unwrap();
        encoder.close().unwrap();
        assert_eq!(encoder.session().device().close_count(), 1);
        assert!(matches!(encoder.encode(Some(&frames[0])), Err(CodecError::Closed)));
    }

    #[test]
    fn test_wrong_direction_rejected() {
        let config = SessionConfig::filter(W, H);
        let result = Encoder::new(LoopbackEncoder::new(LoopbackOptions::default()), &config);
        assert!(matches!(result, Err(CodecError::InvalidConfig(_))));
    }

    #[test]
    fn test_invalid_config_never_opens_device() {
        let config = SessionConfig::encoder(Codec::Hevc, W, H).lookahead(5);
        let result = Encoder::new(LoopbackEncoder::new(LoopbackOptions::default()), &config);
        assert!(matches!(result, Err(CodecError::InvalidConfig(_))));
    }

    #[test]
    fn test_random_latency_and_polling() {
        let mut rng = StdRng::seed_from_u64(9);
        let frames = frames(16, 0);
        for _ in 0..8 {
            let latency = rng.random_range(1..=8);
            let polls = rng.random_range(0..200);
            let mut encoder = encoder(LoopbackOptions::default().latency(latency).busy_polls(polls, rng.random()));
            let packets = run(&mut encoder, &frames);
            let pts: Vec<_> = packets.iter().map(|p| p.pts).collect();
            let expected: Vec<_> = frames.iter().map(|f| f.pts).collect();
            assert_eq!(pts, expected, "latency {latency}");
        }
    }
}
