//! Decoder front-end: container packets in, frames out.
//!
//! When the stream comes with a version-1 avcC record, packets are
//! length-prefixed. Each unit is re-framed with a start code and
//! submitted on its own, and the record's parameter sets go out once as
//! a single unit ahead of the first packet (unless that packet brings
//! its own). Otherwise packets are passed through unchanged.
//!
//! Only packets holding a coded slice count as an input unit and take a
//! timestamp slot. SEI, AUD or parameter-set-only packets are submitted
//! but no picture is expected back for them.

use tracing::{debug, info, warn};
use xma_codec::{
    Codec, CodecError, Direction, EncodedPacket, Output, PixelFormat, SessionConfig, VideoDecoder,
    VideoFrame,
};

use crate::flow::SendStatus;
use crate::reframe::{self, AvcConfigRecord, Framed};
use crate::{Accelerator, Session, Timestamps};

/// Accelerator-backed video decoder.
pub struct Decoder<A: Accelerator> {
    session: Session<A>,
    record: Option<AvcConfigRecord>,
    parameter_sets_sent: bool,
    output: VideoFrame,
    output_format: PixelFormat,
    codec: Codec,
}

impl<A> Decoder<A>
where
    A: for<'a> Accelerator<Input<'a> = &'a [u8], Output = VideoFrame>,
{
    /// Open a decode session on `device`.
    ///
    /// `config_record` is the container's codec configuration, if any.
    pub fn new(device: A, config: &SessionConfig, config_record: Option<&[u8]>) -> Result<Self, CodecError> {
        if config.direction != Direction::Decode {
            return Err(CodecError::invalid_config(format!(
                "{:?} configuration for a decoder",
                config.direction
            )));
        }
        let record = match config_record {
            Some(bytes) => AvcConfigRecord::parse(bytes)?,
            None => None,
        };

        let mut session = Session::new(device);
        session.open(config)?;

        match &record {
            Some(record) => info!(
                "Decoder ready: {:?} {}x{}, {}-byte length prefixes, {} SPS / {} PPS",
                config.codec,
                config.width,
                config.height,
                record.length_size,
                record.sps.len(),
                record.pps.len()
            ),
            None => info!(
                "Decoder ready: {:?} {}x{}, start-code framed input",
                config.codec, config.width, config.height
            ),
        }

        Ok(Self {
            session,
            record,
            parameter_sets_sent: false,
            output: VideoFrame::alloc(config.width, config.height, config.pixel_format, config.bit_depth),
            output_format: config.host_output_format(),
            codec: config.codec,
        })
    }

    pub fn session(&self) -> &Session<A> {
        &self.session
    }

    /// Length prefix width, or `None` for start-code framed input.
    pub fn length_size(&self) -> Option<usize> {
        self.record.as_ref().map(|r| r.length_size)
    }

    /// Submit every unit of one packet.
    ///
    /// Returns the status of the last submit, or `None` when the packet held
    /// no coded slice: the device owes no picture for it.
    fn submit_packet(&mut self, data: &[u8]) -> Result<Option<SendStatus>, CodecError> {
        let codec = self.codec;
        let Some(record) = &self.record else {
            let status = self.session.submit(data)?;
            return Ok(reframe::carries_picture(data, codec).then_some(status));
        };

        if !self.parameter_sets_sent {
            if reframe::carries_parameter_sets(data, record.length_size, codec) {
                debug!("First packet carries its own parameter sets");
            } else if !record.is_empty() {
                let unit = record.parameter_set_unit();
                debug!("Submitting {} bytes of parameter sets", unit.len());
                self.session.submit(&unit[..])?;
            }
            self.parameter_sets_sent = true;
        }

        let mut status = SendStatus::NeedsMoreInput;
        let mut picture = false;
        for framed in reframe::length_prefixed_units(data, record.length_size) {
            status = match framed {
                Framed::Unit(payload) => {
                    picture |= reframe::is_picture_unit(payload, codec);
                    let unit = reframe::to_start_code_unit(payload);
                    self.session.submit(&unit[..])?
                }
                Framed::Malformed { offset, rest } => {
                    warn!(
                        "Length prefix at byte {} of {}-byte packet overruns it; submitting the rest as is",
                        offset,
                        data.len()
                    );
                    self.session.submit(rest)?
                }
            };
        }
        Ok(picture.then_some(status))
    }

    fn frame(&self, ts: Timestamps) -> Result<VideoFrame, CodecError> {
        let frame = self.output.clone().with_timestamps(ts.pts, ts.dts);
        if self.output_format == PixelFormat::Yuyv422 {
            frame.to_yuyv422()
        } else {
            Ok(frame)
        }
    }
}

impl<A> VideoDecoder for Decoder<A>
where
    A: for<'a> Accelerator<Input<'a> = &'a [u8], Output = VideoFrame>,
{
    fn decode(&mut self, packet: Option<&EncodedPacket>) -> Result<Output<VideoFrame>, CodecError> {
        let result = match packet {
            Some(packet) if !packet.data.is_empty() => match self.submit_packet(&packet.data)? {
                Some(status) => {
                    self.session.record_input(Timestamps::new(packet.pts, packet.dts))?;
                    match status {
                        SendStatus::NeedsMoreInput => Output::Pending,
                        SendStatus::Accepted => self.session.receive(&mut self.output)?,
                    }
                }
                None => {
                    debug!("Packet of {} bytes carries no picture", packet.data.len());
                    Output::Pending
                }
            },
            _ => self.session.drain(&mut self.output)?,
        };
        match result {
            Output::Unit(ts) => Ok(Output::Unit(self.frame(ts)?)),
            Output::Pending => Ok(Output::Pending),
            Output::EndOfStream => Ok(Output::EndOfStream),
        }
    }

    fn close(&mut self) -> Result<(), CodecError> {
        self.session.close()
    }

    fn codec(&self) -> Codec {
        self.codec
    }

    fn dimensions(&self) -> (u32, u32) {
        (self.output.width, self.output.height)
    }
}

#[cfg(all(test, feature = "loopback"))]
mod tests {
    use super::*;
    use crate::loopback::{LoopbackDecoder, LoopbackEncoder, LoopbackOptions};
    use crate::reframe::START_CODE;
    use crate::Encoder;
    use bytes::Bytes;
    use rand::{rngs::StdRng, Rng, SeedableRng};
    use xma_codec::VideoEncoder;

    const W: u32 = 32;
    const H: u32 = 16;
    const SPS: &[u8] = &[0x67, 0x64, 0x00, 0x1f, 0xAC, 0xD9];
    const PPS: &[u8] = &[0x68, 0xEB, 0xE3];

    fn avcc(length_size: usize) -> Vec<u8> {
        AvcConfigRecord {
            length_size,
            sps: vec![Bytes::from_static(SPS)],
            pps: vec![Bytes::from_static(PPS)],
        }
        .to_bytes()
        .unwrap()
    }

    fn source_frames(count: i64, format: PixelFormat) -> Vec<VideoFrame> {
        let mut rng = StdRng::seed_from_u64(5);
        (0..count)
            .map(|pts| {
                let mut frame = VideoFrame::alloc_padded(W, H, format, 8, 8).with_timestamps(Some(pts), None);
                for plane in &mut frame.planes {
                    rng.fill(plane.as_mut_slice());
                }
                frame
            })
            .collect()
    }

    /// Encode through the loopback encoder and repackage as length-prefixed packets.
    fn encode(frames: &[VideoFrame], format: PixelFormat, length_size: usize) -> Vec<EncodedPacket> {
        let config = SessionConfig::encoder(Codec::H264, W, H).pixel_format(format, 8);
        let mut encoder = Encoder::new(LoopbackEncoder::new(LoopbackOptions::default().latency(2)), &config).unwrap();
        let mut packets = Vec::new();
        for frame in frames {
            if let Output::Unit(packet) = encoder.encode(Some(frame)).unwrap() {
                packets.push(packet);
            }
        }
        packets.extend(encoder.flush().unwrap());
        for packet in &mut packets {
            let payload = &packet.data[START_CODE.len()..];
            packet.data = reframe::to_length_prefixed(&[payload], length_size).unwrap();
        }
        packets
    }

    fn decoder(options: LoopbackOptions, config: SessionConfig, record: Option<&[u8]>) -> Decoder<LoopbackDecoder> {
        Decoder::new(LoopbackDecoder::new(options), &config, record).unwrap()
    }

    fn decode_all(decoder: &mut Decoder<LoopbackDecoder>, packets: &[EncodedPacket]) -> Vec<VideoFrame> {
        let mut frames = Vec::new();
        for packet in packets {
            if let Output::Unit(frame) = decoder.decode(Some(packet)).unwrap() {
                frames.push(frame);
            }
        }
        frames.extend(decoder.flush().unwrap());
        frames
    }

    #[test]
    fn test_round_trip_through_length_prefixes() {
        for length_size in [2, 4] {
            let frames = source_frames(10, PixelFormat::Yuv420p);
            let packets = encode(&frames, PixelFormat::Yuv420p, length_size);
            let config = SessionConfig::decoder(Codec::H264, W, H);
            let record = avcc(length_size);
            let mut decoder = decoder(
                LoopbackOptions::default().latency(3).busy_polls(30, 11).require_parameter_sets(),
                config,
                Some(&record[..]),
            );
            assert_eq!(decoder.length_size(), Some(length_size));

            let decoded = decode_all(&mut decoder, &packets);
            assert_eq!(decoded.len(), frames.len());
            for (out, src) in decoded.iter().zip(&frames) {
                assert_eq!(out.pts, src.pts);
                assert_eq!(out.packed(), src.packed());
            }

            // Parameter sets went out once, as one unit, before the first picture.
            let units = decoder.session().device().submitted_units();
            assert_eq!(units[0], 2 * START_CODE.len() + SPS.len() + PPS.len());
            assert_eq!(units.len(), frames.len() + 1);
        }
    }

    #[test]
    fn test_length_prefixed_units_submitted_separately() {
        let config = SessionConfig::decoder(Codec::H264, W, H);
        let record = avcc(2);
        let mut decoder = decoder(LoopbackOptions::default(), config, Some(&record[..]));

        let sei = |len: usize| vec![0x06u8; len];
        let (a, b, c) = (sei(5), sei(12), sei(3));
        let data = reframe::to_length_prefixed(&[&a[..], &b[..], &c[..]], 2).unwrap();
        let packet = EncodedPacket::new(data, Some(1), None);
        assert_eq!(decoder.decode(Some(&packet)).unwrap(), Output::Pending);

        let units = decoder.session().device().submitted_units();
        assert_eq!(&units[1..], &[9, 16, 7]);
        // SEI only: nothing is owed for it.
        assert_eq!(decoder.session().pending(), 0);
    }

    #[test]
    fn test_packets_without_pictures_keep_timestamps_aligned() {
        let frames = source_frames(3, PixelFormat::Yuv420p);
        let packets = encode(&frames, PixelFormat::Yuv420p, 4);
        let record = avcc(4);
        let mut decoder = decoder(
            LoopbackOptions::default().latency(2),
            SessionConfig::decoder(Codec::H264, W, H),
            Some(&record[..]),
        );
        assert_eq!(decoder.session().pipeline_depth(), Some(2));

        let sei = reframe::to_length_prefixed(&[&[0x06, 5, 1][..]], 4).unwrap();
        let aud = reframe::to_length_prefixed(&[&[0x09, 0xF0][..]], 4).unwrap();
        let mut input = vec![EncodedPacket::new(sei, Some(100), None)];
        for (i, packet) in packets.iter().enumerate() {
            input.push(packet.clone());
            input.push(EncodedPacket::new(aud.clone(), Some(200 + i as i64), None));
        }

        let decoded = decode_all(&mut decoder, &input);
        let pts: Vec<_> = decoded.iter().map(|f| f.pts).collect();
        assert_eq!(pts, vec![Some(0), Some(1), Some(2)]);
        for (out, src) in decoded.iter().zip(&frames) {
            assert_eq!(out.packed(), src.packed());
        }
        assert_eq!(decoder.session().pending(), 3);
        assert_eq!(decoder.session().produced(), 3);
    }

    #[test]
    fn test_start_code_parameter_set_packet_not_counted() {
        let frames = source_frames(2, PixelFormat::Yuv420p);
        let config = SessionConfig::encoder(Codec::H264, W, H);
        let mut encoder = Encoder::new(LoopbackEncoder::new(LoopbackOptions::default()), &config).unwrap();
        let pictures: Vec<EncodedPacket> = frames
            .iter()
            .map(|f| encoder.encode(Some(f)).unwrap().unit().unwrap())
            .collect();

        let mut decoder = decoder(
            LoopbackOptions::default().latency(2).require_parameter_sets(),
            SessionConfig::decoder(Codec::H264, W, H),
            None,
        );
        let parameter_sets = [&START_CODE[..], SPS, &START_CODE[..], PPS].concat();
        let mut input = vec![EncodedPacket::new(parameter_sets, Some(-1), None)];
        input.extend(pictures);

        let decoded = decode_all(&mut decoder, &input);
        let pts: Vec<_> = decoded.iter().map(|f| f.pts).collect();
        assert_eq!(pts, vec![Some(0), Some(1)]);
    }

    #[test]
    fn test_refused_first_packet_keeps_parameter_sets_pending() {
        let frames = source_frames(1, PixelFormat::Yuv420p);
        let packets = encode(&frames, PixelFormat::Yuv420p, 4);
        let record = avcc(4);
        let mut decoder = decoder(LoopbackOptions::default(), SessionConfig::decoder(Codec::H264, W, H), Some(&record[..]));

        assert_eq!(decoder.decode(None).unwrap(), Output::EndOfStream);
        assert!(matches!(decoder.decode(Some(&packets[0])), Err(CodecError::InvalidCall(_))));
        assert!(!decoder.parameter_sets_sent);
        assert!(decoder.session().device().submitted_units().is_empty());
    }

    #[test]
    fn test_in_band_parameter_sets_suppress_record() {
        let config = SessionConfig::decoder(Codec::H264, W, H);
        let record = avcc(4);
        let mut decoder = decoder(LoopbackOptions::default().require_parameter_sets(), config, Some(&record[..]));

        let frames = source_frames(1, PixelFormat::Yuv420p);
        let mut packets = encode(&frames, PixelFormat::Yuv420p, 4);
        let picture = packets[0].data[4..].to_vec();
        packets[0].data = reframe::to_length_prefixed(&[SPS, PPS, &picture[..]], 4).unwrap();

        let frame = decoder.decode(Some(&packets[0])).unwrap().unit().unwrap();
        assert_eq!(frame.packed(), frames[0].packed());
        let units = decoder.session().device().submitted_units();
        assert_eq!(units[..2], [4 + SPS.len(), 4 + PPS.len()]);
        assert_eq!(units.len(), 3);
    }

    #[test]
    fn test_start_code_input_passes_through() {
        let frames = source_frames(4, PixelFormat::Yuv420p);
        let config = SessionConfig::encoder(Codec::H264, W, H);
        let mut encoder = Encoder::new(LoopbackEncoder::new(LoopbackOptions::default()), &config).unwrap();
        let packets: Vec<EncodedPacket> = frames
            .iter()
            .map(|f| encoder.encode(Some(f)).unwrap().unit().unwrap())
            .collect();

        // A record that is not version 1 means start-code framing.
        let record = [0u8, 0, 0, 1, 0x67];
        let mut decoder = decoder(LoopbackOptions::default().latency(2), SessionConfig::decoder(Codec::H264, W, H), Some(&record[..]));
        assert_eq!(decoder.length_size(), None);

        let decoded = decode_all(&mut decoder, &packets);
        assert_eq!(decoded.len(), 4);
        let units = decoder.session().device().submitted_units();
        assert!(units.iter().all(|&len| len == packets[0].data.len()));
    }

    #[test]
    fn test_malformed_record_fails_open() {
        let config = SessionConfig::decoder(Codec::H264, W, H);
        let result = Decoder::new(LoopbackDecoder::new(LoopbackOptions::default()), &config, Some(&[1u8, 0x64, 0][..]));
        assert!(matches!(result, Err(CodecError::MalformedConfigRecord(_))));
    }

    #[test]
    fn test_overrunning_length_submits_remainder() {
        let config = SessionConfig::decoder(Codec::H264, W, H);
        let record = avcc(4);
        let mut decoder = decoder(LoopbackOptions::default(), config, Some(&record[..]));

        // One SEI, then a length that claims far more than is left.
        let mut data = reframe::to_length_prefixed(&[&[0x06, 1, 2][..]], 4).unwrap();
        data.extend_from_slice(&[0, 0, 0, 1]);
        let packet = EncodedPacket::new(data, None, None);
        assert_eq!(decoder.decode(Some(&packet)).unwrap(), Output::Pending);
        let units = decoder.session().device().submitted_units();
        assert_eq!(&units[1..], &[7, 4]);
    }

    #[test]
    fn test_yuyv_output() {
        let frames = source_frames(3, PixelFormat::Yuv422p);
        let packets = encode(&frames, PixelFormat::Yuv422p, 4);
        let config = SessionConfig::decoder(Codec::H264, W, H)
            .pixel_format(PixelFormat::Yuv422p, 8)
            .output_format(PixelFormat::Yuyv422);
        let record = avcc(4);
        let mut decoder = decoder(LoopbackOptions::default().latency(2), config, Some(&record[..]));

        let decoded = decode_all(&mut decoder, &packets);
        assert_eq!(decoded.len(), 3);
        for (out, src) in decoded.iter().zip(&frames) {
            assert_eq!(out.pixel_format, PixelFormat::Yuyv422);
            assert_eq!(out.strides, vec![W as usize * 2]);
            assert_eq!(out.planes[0][0], src.planes[0][0]);
            assert_eq!(out.planes[0][1], src.planes[1][0]);
            assert_eq!(out.planes[0][3], src.planes[2][0]);
        }
    }

    #[test]
    fn test_empty_packet_drains_and_null_sent_once() {
        let frames = source_frames(5, PixelFormat::Yuv420p);
        let packets = encode(&frames, PixelFormat::Yuv420p, 4);
        let record = avcc(4);
        let mut decoder = decoder(
            LoopbackOptions::default().latency(4),
            SessionConfig::decoder(Codec::H264, W, H),
            Some(&record[..]),
        );
        let mut out = 0;
        for packet in &packets {
            if decoder.decode(Some(packet)).unwrap().unit().is_some() {
                out += 1;
            }
        }
        assert_eq!(out, 2);

        let empty = EncodedPacket::new(Vec::new(), None, None);
        while let Output::Unit(_) = decoder.decode(Some(&empty)).unwrap() {
            out += 1;
        }
        assert_eq!(out, 5);
        // Real input after end of stream is refused.
        assert!(matches!(decoder.decode(Some(&packets[0])), Err(CodecError::InvalidCall(_))));
    }

    #[test]
    fn test_random_packet_sizes_round_trip() {
        let mut rng = StdRng::seed_from_u64(77);
        for _ in 0..4 {
            let latency = rng.random_range(1..=6);
            let frames = source_frames(rng.random_range(1..12), PixelFormat::Yuv420p);
            let packets = encode(&frames, PixelFormat::Yuv420p, 4);
            let record = avcc(4);
            let mut decoder = decoder(
                LoopbackOptions::default().latency(latency),
                SessionConfig::decoder(Codec::H264, W, H),
                Some(&record[..]),
            );
            let decoded = decode_all(&mut decoder, &packets);
            let pts: Vec<_> = decoded.iter().map(|f| f.pts).collect();
            let expected: Vec<_> = frames.iter().map(|f| f.pts).collect();
            assert_eq!(pts, expected);
        }
    }
}
