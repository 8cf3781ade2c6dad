//! Loopback pipeline demo - encode, decode and scale synthetic frames through
//! loopback accelerators, one or more sessions at a time.
//!
//! Each session encodes a test pattern, repackages the output as
//! length-prefixed packets with an avcC record, decodes it back, checks the
//! decoded pictures against the source, and runs them through a scaler.
//!
//! Usage:
//!   xma-loopback [options]
//!
//! Options:
//!   --frames <n>        Frames per session (default: 60)
//!   --width <px>        Frame width (default: 320)
//!   --height <px>       Frame height (default: 240)
//!   --sessions <n>      Concurrent sessions (default: 2)
//!   --latency <n>       Pipeline latency of every device (default: 4)
//!   --padding <bytes>   Filler ahead of the first encoded unit (default: 16)
//!   --stride-pad <n>    Extra bytes per source row, forces staging (default: 32)
//!   --busy-polls <n>    Max empty polls per output (default: 64)
//!   --json              Print a JSON summary

use anyhow::{bail, Result};
use bytes::Bytes;
use std::time::Instant;
use xma_bridge::loopback::{LoopbackDecoder, LoopbackEncoder, LoopbackFilter, LoopbackOptions};
use xma_bridge::reframe::{self, AvcConfigRecord, START_CODE};
use xma_bridge::{
    Codec, CodecError, Decoder, EncodedPacket, Encoder, Filter, FilterOutput, Output, PixelFormat, SessionConfig,
    VideoDecoder, VideoEncoder, VideoFilter, VideoFrame,
};

struct Args {
    frames: u32,
    width: u32,
    height: u32,
    sessions: u32,
    latency: usize,
    padding: usize,
    stride_pad: usize,
    busy_polls: u32,
    json: bool,
}

fn parse_args() -> Option<Args> {
    let args: Vec<String> = std::env::args().collect();
    let mut result = Args {
        frames: 60,
        width: 320,
        height: 240,
        sessions: 2,
        latency: 4,
        padding: 16,
        stride_pad: 32,
        busy_polls: 64,
        json: false,
    };

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--frames" if i + 1 < args.len() => {
                result.frames = args[i + 1].parse().ok()?;
                i += 2;
            }
            "--width" if i + 1 < args.len() => {
                result.width = args[i + 1].parse().ok()?;
                i += 2;
            }
            "--height" if i + 1 < args.len() => {
                result.height = args[i + 1].parse().ok()?;
                i += 2;
            }
            "--sessions" if i + 1 < args.len() => {
                result.sessions = args[i + 1].parse().ok()?;
                i += 2;
            }
            "--latency" if i + 1 < args.len() => {
                result.latency = args[i + 1].parse().ok()?;
                i += 2;
            }
            "--padding" if i + 1 < args.len() => {
                result.padding = args[i + 1].parse().ok()?;
                i += 2;
            }
            "--stride-pad" if i + 1 < args.len() => {
                result.stride_pad = args[i + 1].parse().ok()?;
                i += 2;
            }
            "--busy-polls" if i + 1 < args.len() => {
                result.busy_polls = args[i + 1].parse().ok()?;
                i += 2;
            }
            "--json" => {
                result.json = true;
                i += 1;
            }
            "--help" | "-h" => return None,
            other => {
                eprintln!("Unknown argument: {}", other);
                return None;
            }
        }
    }

    Some(result)
}

fn print_usage() {
    println!("Loopback pipeline demo - encode, decode and scale through loopback accelerators");
    println!();
    println!("Usage: xma-loopback [OPTIONS]");
    println!();
    println!("Options:");
    println!("  --frames <n>        Frames per session (default: 60)");
    println!("  --width <px>        Frame width (default: 320)");
    println!("  --height <px>       Frame height (default: 240)");
    println!("  --sessions <n>      Concurrent sessions (default: 2)");
    println!("  --latency <n>       Pipeline latency of every device (default: 4)");
    println!("  --padding <bytes>   Filler ahead of the first encoded unit (default: 16)");
    println!("  --stride-pad <n>    Extra bytes per source row, forces staging (default: 32)");
    println!("  --busy-polls <n>    Max empty polls per output (default: 64)");
    println!("  --json              Print a JSON summary");
}

/// Outcome of one encode/decode/scale run.
struct Report {
    session: u32,
    frames: usize,
    packets: usize,
    coded_bytes: usize,
    decoded: usize,
    mismatches: usize,
    scaled_sets: usize,
    elapsed_ms: u128,
}

// ============================================================================
// Pipeline stages
// ============================================================================

fn test_pattern(args: &Args, index: u32) -> VideoFrame {
    let mut frame = VideoFrame::alloc_padded(args.width, args.height, PixelFormat::Yuv420p, 8, args.stride_pad)
        .with_timestamps(Some(i64::from(index) * 3000), None);
    for plane in 0..3 {
        for (y, row) in frame.rows_mut(plane).enumerate() {
            for (x, sample) in row.iter_mut().enumerate() {
                *sample = (x as u32 + 2 * y as u32 + 7 * index + 50 * plane as u32) as u8;
            }
        }
    }
    frame
}

fn device_options(args: &Args, seed: u64) -> LoopbackOptions {
    LoopbackOptions::default()
        .latency(args.latency)
        .busy_polls(args.busy_polls, seed)
}

fn encode(args: &Args, seed: u64, frames: &[VideoFrame]) -> Result<Vec<EncodedPacket>> {
    let config = SessionConfig::encoder(Codec::H264, args.width, args.height)
        .framerate(30, 1)
        .bitrate(2_000_000)
        .gop(30, 30);
    let device = LoopbackEncoder::new(device_options(args, seed).first_output_padding(args.padding));
    let mut encoder = Encoder::new(device, &config)?;

    let mut packets = Vec::with_capacity(frames.len());
    for frame in frames {
        if let Output::Unit(packet) = encoder.encode(Some(frame))? {
            packets.push(packet);
        }
    }
    packets.extend(encoder.flush()?);
    tracing::debug!("Staging mode: {:?}", encoder.last_transfer_mode());
    encoder.close()?;
    Ok(packets)
}

/// Turn start-code units into 4-byte length-prefixed packets plus an avcC record.
fn repackage(packets: &mut [EncodedPacket]) -> Result<Vec<u8>> {
    for packet in packets.iter_mut() {
        let Some(payload) = packet.data.strip_prefix(&START_CODE[..]) else {
            bail!("encoded unit {} lacks a start code", packet.frame_index);
        };
        packet.data = reframe::to_length_prefixed(&[payload], 4)?;
    }
    let record = AvcConfigRecord {
        length_size: 4,
        sps: vec![Bytes::from_static(&[0x67, 0x42, 0xC0, 0x1E, 0xDA])],
        pps: vec![Bytes::from_static(&[0x68, 0xCE, 0x3C, 0x80])],
    };
    Ok(record.to_bytes()?)
}

fn decode(args: &Args, seed: u64, packets: &[EncodedPacket], record: &[u8]) -> Result<Vec<VideoFrame>> {
    let config = SessionConfig::decoder(Codec::H264, args.width, args.height);
    let device = LoopbackDecoder::new(device_options(args, seed).require_parameter_sets());
    let mut decoder = Decoder::new(device, &config, Some(record))?;

    let mut frames = Vec::with_capacity(packets.len());
    for packet in packets {
        if let Output::Unit(frame) = decoder.decode(Some(packet))? {
            frames.push(frame);
        }
    }
    frames.extend(decoder.flush()?);
    decoder.close()?;
    Ok(frames)
}

fn scale(args: &Args, seed: u64, frames: &[VideoFrame]) -> Result<usize> {
    let half = |v: u32| (v / 2) & !1;
    let ladder = vec![
        FilterOutput::new(args.width, args.height),
        FilterOutput::new(half(args.width).max(2), half(args.height).max(2)),
    ];
    let config = SessionConfig::filter(args.width, args.height).filter_outputs(ladder);
    let mut filter = Filter::new(LoopbackFilter::new(device_options(args, seed)), &config)?;

    let mut sets = 0;
    for frame in frames {
        if let Output::Unit(_) = filter.filter(Some(frame))? {
            sets += 1;
        }
    }
    sets += filter.flush()?.len();
    filter.close()?;
    Ok(sets)
}

fn run_session(args: &Args, session: u32) -> Result<Report> {
    let start = Instant::now();
    let seed = u64::from(session);
    let source: Vec<VideoFrame> = (0..args.frames).map(|i| test_pattern(args, i)).collect();

    let mut packets = encode(args, seed, &source)?;
    let coded_bytes = packets.iter().map(|p| p.data.len()).sum();
    let record = repackage(&mut packets)?;
    let decoded = decode(args, seed, &packets, &record)?;

    let mismatches = source
        .iter()
        .zip(&decoded)
        .filter(|(src, out)| src.pts != out.pts || checksum(&src.packed()) != checksum(&out.packed()))
        .count()
        + source.len().abs_diff(decoded.len());

    let scaled_sets = scale(args, seed, &decoded)?;

    Ok(Report {
        session,
        frames: source.len(),
        packets: packets.len(),
        coded_bytes,
        decoded: decoded.len(),
        mismatches,
        scaled_sets,
        elapsed_ms: start.elapsed().as_millis(),
    })
}

/// FNV-1a over the visible samples.
fn checksum(bytes: &[u8]) -> u64 {
    bytes
        .iter()
        .fold(0xcbf2_9ce4_8422_2325, |hash, &b| (hash ^ u64::from(b)).wrapping_mul(0x0000_0100_0000_01b3))
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("xma_bridge=debug".parse()?)
                .add_directive("info".parse()?),
        )
        .init();

    let Some(args) = parse_args() else {
        print_usage();
        return Ok(());
    };
    if args.sessions == 0 {
        bail!("--sessions must be at least 1");
    }
    let args = std::sync::Arc::new(args);

    tracing::info!(
        "Running {} sessions of {} frames at {}x{}, latency {}",
        args.sessions,
        args.frames,
        args.width,
        args.height,
        args.latency
    );

    let mut handles = Vec::new();
    for session in 0..args.sessions {
        let args = args.clone();
        handles.push(tokio::task::spawn_blocking(move || run_session(&args, session)));
    }

    let mut reports = Vec::new();
    for (session, handle) in handles.into_iter().enumerate() {
        match handle.await? {
            Ok(report) => reports.push(report),
            Err(e) => {
                match e.downcast_ref::<CodecError>() {
                    Some(err) if err.is_configuration() => {
                        tracing::error!("Session {} rejected at open: {}", session, err)
                    }
                    Some(err) => tracing::error!("Session {} failed mid-stream: {}", session, err),
                    None => tracing::error!("Session {} failed: {:#}", session, e),
                }
                return Err(e);
            }
        }
    }

    let failed = reports.iter().filter(|r| r.mismatches > 0).count();
    for r in &reports {
        tracing::info!(
            "Session {}: {} frames -> {} packets ({} bytes) -> {} decoded, {} mismatches, {} scaled sets in {} ms",
            r.session,
            r.frames,
            r.packets,
            r.coded_bytes,
            r.decoded,
            r.mismatches,
            r.scaled_sets,
            r.elapsed_ms
        );
    }

    if args.json {
        let sessions: Vec<serde_json::Value> = reports
            .iter()
            .map(|r| {
                serde_json::json!({
                    "session": r.session,
                    "frames": r.frames,
                    "packets": r.packets,
                    "coded_bytes": r.coded_bytes,
                    "decoded": r.decoded,
                    "mismatches": r.mismatches,
                    "scaled_sets": r.scaled_sets,
                    "elapsed_ms": r.elapsed_ms,
                })
            })
            .collect();
        let summary = serde_json::json!({
            "width": args.width,
            "height": args.height,
            "latency": args.latency,
            "sessions": sessions,
            "failed": failed,
        });
        println!("{}", serde_json::to_string_pretty(&summary)?);
    }

    if failed > 0 {
        bail!("{} of {} sessions produced mismatched frames", failed, reports.len());
    }
    Ok(())
}
