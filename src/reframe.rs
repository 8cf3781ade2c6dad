//! Bitstream reframing between container and accelerator framing.
//!
//! Containers carry H.264/HEVC as length-prefixed units described by a
//! configuration record (avcC). Accelerators take start-code framed units
//! (Annex B), one per submit. Everything here is bounds-checked: malformed
//! input degrades to a warning and a best-effort submit, never a panic.

use bytes::{BufMut, Bytes, BytesMut};
use xma_codec::{Codec, CodecError};

/// Four-byte Annex B start code.
pub const START_CODE: [u8; 4] = [0x00, 0x00, 0x00, 0x01];

/// H.264 NAL unit types.
pub mod nal_unit_type {
    /// Non-IDR slice
    pub const NON_IDR_SLICE: u8 = 1;
    /// IDR slice (keyframe)
    pub const IDR_SLICE: u8 = 5;
    /// Supplemental enhancement information
    pub const SEI: u8 = 6;
    /// Sequence parameter set
    pub const SPS: u8 = 7;
    /// Picture parameter set
    pub const PPS: u8 = 8;
}

/// Offset of the first four-byte start code in `data`.
#[must_use]
pub fn find_start_code(data: &[u8]) -> Option<usize> {
    data.windows(START_CODE.len()).position(|w| w == START_CODE)
}

/// Prefix `payload` with a start code.
#[must_use]
pub fn to_start_code_unit(payload: &[u8]) -> Bytes {
    let mut unit = BytesMut::with_capacity(START_CODE.len() + payload.len());
    unit.put_slice(&START_CODE);
    unit.put_slice(payload);
    unit.freeze()
}

/// Split start-code framed data into unit payloads.
///
/// Only four-byte start codes delimit units.
#[must_use]
pub fn split_start_code_units(data: &[u8]) -> Vec<&[u8]> {
    let mut starts = Vec::new();
    let mut pos = 0;
    while let Some(offset) = find_start_code(&data[pos..]) {
        starts.push(pos + offset);
        pos += offset + START_CODE.len();
    }
    starts
        .iter()
        .enumerate()
        .map(|(i, &start)| {
            let end = starts.get(i + 1).copied().unwrap_or(data.len());
            &data[start + START_CODE.len()..end]
        })
        .collect()
}

/// Returns true if a unit payload is a coded slice.
#[must_use]
pub fn is_picture_unit(payload: &[u8], codec: Codec) -> bool {
    payload
        .first()
        .is_some_and(|&header| codec.is_picture(codec.nal_type(header)))
}

/// Returns true if start-code framed data holds at least one coded slice.
///
/// Data without any start code cannot be classified and counts as a picture.
#[must_use]
pub fn carries_picture(data: &[u8], codec: Codec) -> bool {
    let units = split_start_code_units(data);
    units.is_empty() || units.iter().any(|unit| is_picture_unit(unit, codec))
}

/// Parsed avcC configuration record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AvcConfigRecord {
    /// Width in bytes of each unit's length prefix (1, 2 or 4).
    pub length_size: usize,
    /// Sequence parameter sets, without framing.
    pub sps: Vec<Bytes>,
    /// Picture parameter sets, without framing.
    pub pps: Vec<Bytes>,
}

impl AvcConfigRecord {
    /// Shortest record that can announce length-prefixed framing.
    pub const MIN_LEN: usize = 7;

    /// Parse a configuration record.
    ///
    /// Returns `Ok(None)` when the record does not start with version 1:
    /// the stream is then taken to be start-code framed already.
    pub fn parse(record: &[u8]) -> Result<Option<Self>, CodecError> {
        if record.first() != Some(&1) {
            return Ok(None);
        }
        if record.len() < Self::MIN_LEN {
            return Err(CodecError::MalformedConfigRecord(format!(
                "{} bytes, need at least {}",
                record.len(),
                Self::MIN_LEN
            )));
        }

        let length_size = usize::from(record[4] & 0x03) + 1;
        if length_size == 3 {
            return Err(CodecError::MalformedConfigRecord(
                "3-byte length prefixes are not valid".to_string(),
            ));
        }

        let mut pos = 5;
        let mut sps = Vec::new();
        let mut pps = Vec::new();
        for (class, sets) in [&mut sps, &mut pps].into_iter().enumerate() {
            let Some(&count) = record.get(pos) else {
                break;
            };
            pos += 1;
            let count = if class == 0 { count & 0x1F } else { count };
            for _ in 0..count {
                match read_entry(record, pos) {
                    Some((payload, next)) => {
                        sets.push(Bytes::copy_from_slice(payload));
                        pos = next;
                    }
                    None => {
                        tracing::warn!(
                            "Truncated parameter set at byte {} of {}-byte configuration record",
                            pos,
                            record.len()
                        );
                        pos = record.len();
                        break;
                    }
                }
            }
        }

        Ok(Some(Self { length_size, sps, pps }))
    }

    /// Returns true if the record carries no parameter sets.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sps.is_empty() && self.pps.is_empty()
    }

    /// All parameter sets, SPS first, each behind a start code, in one unit.
    #[must_use]
    pub fn parameter_set_unit(&self) -> Bytes {
        let size: usize = self
            .sps
            .iter()
            .chain(&self.pps)
            .map(|ps| START_CODE.len() + ps.len())
            .sum();
        let mut unit = BytesMut::with_capacity(size);
        for ps in self.sps.iter().chain(&self.pps) {
            unit.put_slice(&START_CODE);
            unit.put_slice(ps);
        }
        unit.freeze()
    }

    /// Serialize back to avcC bytes.
    ///
    /// Fails on a length size other than 1, 2 or 4, more than 31 SPS or
    /// 255 PPS entries, or an entry longer than 65535 bytes.
    pub fn to_bytes(&self) -> Result<Vec<u8>, CodecError> {
        if !matches!(self.length_size, 1 | 2 | 4) {
            return Err(CodecError::invalid_param(format!(
                "length size {} is not 1, 2 or 4",
                self.length_size
            )));
        }
        let sps_count = u8::try_from(self.sps.len())
            .ok()
            .filter(|&n| n <= 0x1F)
            .ok_or_else(|| CodecError::invalid_param(format!("{} SPS entries", self.sps.len())))?;
        let pps_count = u8::try_from(self.pps.len())
            .map_err(|_| CodecError::invalid_param(format!("{} PPS entries", self.pps.len())))?;

        let mut out = Vec::new();
        out.push(1); // configuration_version

        // Profile, compatibility, and level from the first SPS
        match self.sps.first() {
            Some(sps) if sps.len() >= 4 => out.extend_from_slice(&sps[1..4]),
            _ => out.extend_from_slice(&[0x64, 0x00, 0x1f]), // High profile, level 3.1
        }

        out.push(0xFC | (self.length_size as u8 - 1)); // reserved | length_size_minus_one

        out.push(0xE0 | sps_count); // reserved | num_sps
        for sps in &self.sps {
            write_entry(&mut out, sps)?;
        }

        out.push(pps_count);
        for pps in &self.pps {
            write_entry(&mut out, pps)?;
        }
        Ok(out)
    }
}

fn write_entry(out: &mut Vec<u8>, entry: &[u8]) -> Result<(), CodecError> {
    let len = u16::try_from(entry.len()).map_err(|_| {
        CodecError::invalid_param(format!("parameter set of {} bytes", entry.len()))
    })?;
    out.extend_from_slice(&len.to_be_bytes());
    out.extend_from_slice(entry);
    Ok(())
}

fn read_entry(record: &[u8], pos: usize) -> Option<(&[u8], usize)> {
    let len = record.get(pos..pos + 2)?;
    let len = usize::from(u16::from_be_bytes([len[0], len[1]]));
    let start = pos + 2;
    let payload = record.get(start..start + len)?;
    Some((payload, start + len))
}

/// One step of walking a length-prefixed packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Framed<'a> {
    /// A complete unit payload.
    Unit(&'a [u8]),
    /// A length prefix that runs past the packet; `rest` is everything from `offset` on.
    Malformed { offset: usize, rest: &'a [u8] },
}

/// Iterator over the units of a length-prefixed packet.
#[derive(Debug, Clone)]
pub struct LengthPrefixedUnits<'a> {
    data: &'a [u8],
    pos: usize,
    length_size: usize,
}

/// Walk `data` as units behind `length_size`-byte big-endian lengths.
#[must_use]
pub fn length_prefixed_units(data: &[u8], length_size: usize) -> LengthPrefixedUnits<'_> {
    LengthPrefixedUnits {
        data,
        pos: 0,
        length_size,
    }
}

impl<'a> Iterator for LengthPrefixedUnits<'a> {
    type Item = Framed<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.pos >= self.data.len() {
            return None;
        }
        let offset = self.pos;
        let malformed = Framed::Malformed {
            offset,
            rest: &self.data[offset..],
        };

        let header_end = offset + self.length_size;
        let Some(header) = self.data.get(offset..header_end) else {
            self.pos = self.data.len();
            return Some(malformed);
        };
        let size = header
            .iter()
            .fold(0usize, |acc, &b| (acc << 8) | usize::from(b));
        let Some(payload) = self.data.get(header_end..header_end.saturating_add(size)) else {
            self.pos = self.data.len();
            return Some(malformed);
        };

        self.pos = header_end + size;
        Some(Framed::Unit(payload))
    }
}

/// Frame unit payloads behind `length_size`-byte lengths.
pub fn to_length_prefixed(units: &[&[u8]], length_size: usize) -> Result<Vec<u8>, CodecError> {
    if !matches!(length_size, 1 | 2 | 4) {
        return Err(CodecError::invalid_param(format!(
            "length prefix of {length_size} bytes"
        )));
    }
    let max = if length_size == 4 {
        u32::MAX as usize
    } else {
        (1usize << (8 * length_size)) - 1
    };
    let mut out = Vec::with_capacity(units.iter().map(|u| u.len() + length_size).sum());
    for unit in units {
        if unit.len() > max {
            return Err(CodecError::invalid_param(format!(
                "unit of {} bytes exceeds {length_size}-byte length prefix",
                unit.len()
            )));
        }
        let len = (unit.len() as u32).to_be_bytes();
        out.extend_from_slice(&len[4 - length_size..]);
        out.extend_from_slice(unit);
    }
    Ok(out)
}

/// Returns true if a length-prefixed packet carries its own sequence parameter set.
#[must_use]
pub fn carries_parameter_sets(packet: &[u8], length_size: usize, codec: Codec) -> bool {
    length_prefixed_units(packet, length_size).any(|framed| match framed {
        Framed::Unit(payload) => payload
            .first()
            .is_some_and(|&header| codec.is_sequence_parameter_set(codec.nal_type(header))),
        Framed::Malformed { .. } => false,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(length_size: usize, sps: &[&[u8]], pps: &[&[u8]]) -> AvcConfigRecord {
        AvcConfigRecord {
            length_size,
            sps: sps.iter().map(|s| Bytes::copy_from_slice(s)).collect(),
            pps: pps.iter().map(|p| Bytes::copy_from_slice(p)).collect(),
        }
    }

    #[test]
    fn test_find_start_code() {
        assert_eq!(find_start_code(&[0, 0, 0, 1, 0x65]), Some(0));
        assert_eq!(find_start_code(&[7, 7, 7, 0, 0, 0, 1]), Some(3));
        assert_eq!(find_start_code(&[0, 0, 1, 0x65]), None);
        assert_eq!(find_start_code(&[]), None);
    }

    #[test]
    fn test_split_start_code_units() {
        let data = [0, 0, 0, 1, 0x67, 1, 2, 0, 0, 0, 1, 0x68, 3];
        assert_eq!(
            split_start_code_units(&data),
            vec![&[0x67u8, 1, 2][..], &[0x68u8, 3][..]]
        );
    }

    #[test]
    fn test_parse_record() {
        let sps = [0x67, 0x64, 0x00, 0x1f, 0xAC];
        let pps = [0x68, 0xEE, 0x3C];
        let bytes = record(4, &[&sps[..]], &[&pps[..]]).to_bytes().unwrap();
        let parsed = AvcConfigRecord::parse(&bytes).unwrap().unwrap();
        assert_eq!(parsed.length_size, 4);
        assert_eq!(parsed.sps, vec![Bytes::copy_from_slice(&sps)]);
        assert_eq!(parsed.pps, vec![Bytes::copy_from_slice(&pps)]);
    }

    #[test]
    fn test_record_length_size_from_low_bits() {
        let bytes = record(2, &[&[0x67, 1, 2, 3][..]], &[]).to_bytes().unwrap();
        assert_eq!(bytes[4], 0xFD);
        let parsed = AvcConfigRecord::parse(&bytes).unwrap().unwrap();
        assert_eq!(parsed.length_size, 2);
    }

    #[test]
    fn test_non_version_one_record_means_start_codes() {
        assert_eq!(AvcConfigRecord::parse(&[0, 0, 0, 1, 0x67]).unwrap(), None);
        assert_eq!(AvcConfigRecord::parse(&[]).unwrap(), None);
    }

    #[test]
    fn test_short_record_rejected() {
        let err = AvcConfigRecord::parse(&[1, 0x64, 0, 0x1f, 0xFF, 0xE1]).unwrap_err();
        assert!(matches!(err, CodecError::MalformedConfigRecord(_)));
    }

    #[test]
    fn test_truncated_entry_skipped() {
        // One complete SPS, then a PPS claiming 200 bytes.
        let mut bytes = vec![1, 0x64, 0, 0x1f, 0xFF, 0xE1, 0, 3, 0x67, 1, 2, 1, 0, 200, 0x68];
        let parsed = AvcConfigRecord::parse(&bytes).unwrap().unwrap();
        assert_eq!(parsed.sps.len(), 1);
        assert!(parsed.pps.is_empty());

        // A length field cut in half.
        bytes.truncate(12);
        let parsed = AvcConfigRecord::parse(&bytes).unwrap().unwrap();
        assert_eq!(parsed.sps.len(), 1);
        assert!(parsed.pps.is_empty());
    }

    #[test]
    fn test_sps_count_masks_reserved_bits() {
        // 0xE0 | 0 parameter sets: reserved bits alone must not read as 224 entries.
        let bytes = [1, 0x64, 0, 0x1f, 0xFF, 0xE0, 0];
        let parsed = AvcConfigRecord::parse(&bytes).unwrap().unwrap();
        assert!(parsed.is_empty());
    }

    #[test]
    fn test_parameter_set_unit() {
        let rec = record(4, &[&[0x67, 1][..], &[0x67, 2][..]], &[&[0x68, 3][..]]);
        assert_eq!(
            rec.parameter_set_unit(),
            Bytes::from_static(&[0, 0, 0, 1, 0x67, 1, 0, 0, 0, 1, 0x67, 2, 0, 0, 0, 1, 0x68, 3])
        );
    }

    #[test]
    fn test_walk_two_byte_prefixes() {
        let (a, b, c) = ([0x06u8; 5], [0x06u8; 12], [0x06u8; 3]);
        let packet = to_length_prefixed(&[&a[..], &b[..], &c[..]], 2).unwrap();
        let sizes: Vec<usize> = length_prefixed_units(&packet, 2)
            .map(|framed| match framed {
                Framed::Unit(payload) => to_start_code_unit(payload).len(),
                Framed::Malformed { .. } => panic!("well-formed packet"),
            })
            .collect();
        assert_eq!(sizes, vec![9, 16, 7]);
    }

    #[test]
    fn test_walk_overlong_prefix() {
        let packet = [0, 0, 0, 2, 0x41, 0x9A, 0, 0, 0, 50, 0x41];
        let items: Vec<Framed<'_>> = length_prefixed_units(&packet, 4).collect();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0], Framed::Unit(&[0x41, 0x9A]));
        assert_eq!(
            items[1],
            Framed::Malformed {
                offset: 6,
                rest: &packet[6..]
            }
        );
    }

    #[test]
    fn test_walk_truncated_header() {
        let packet = [0, 0, 0, 1, 0x41, 0, 0];
        let items: Vec<Framed<'_>> = length_prefixed_units(&packet, 4).collect();
        assert_eq!(items[0], Framed::Unit(&[0x41]));
        assert!(matches!(items[1], Framed::Malformed { offset: 5, .. }));
    }

    #[test]
    fn test_zero_length_unit() {
        let packet = [0, 0, 0, 1, 0x41];
        let items: Vec<Framed<'_>> = length_prefixed_units(&packet, 2).collect();
        assert_eq!(items, vec![Framed::Unit(&[]), Framed::Unit(&[0x41])]);
    }

    #[test]
    fn test_one_byte_prefix_limit() {
        assert!(to_length_prefixed(&[&[0u8; 256][..]], 1).is_err());
        assert!(to_length_prefixed(&[&[0u8; 255][..]], 1).is_ok());
        assert!(to_length_prefixed(&[&[0u8; 4][..]], 3).is_err());
    }

    #[test]
    fn test_record_write_rejects_bad_fields() {
        let sps = [0x67u8, 0x64, 0x00, 0x1f];
        for length_size in [0, 3, 8] {
            assert!(matches!(
                record(length_size, &[&sps[..]], &[]).to_bytes(),
                Err(CodecError::InvalidParam(_))
            ));
        }

        let many: Vec<&[u8]> = vec![&sps[..]; 32];
        assert!(record(4, &many, &[]).to_bytes().is_err());
        assert!(record(4, &many[..31], &[]).to_bytes().is_ok());

        let long = vec![0x68u8; 70_000];
        assert!(record(4, &[&sps[..]], &[&long[..]]).to_bytes().is_err());
    }

    #[test]
    fn test_picture_classification() {
        let slices = [&START_CODE[..], &[0x06, 1][..], &START_CODE[..], &[0x65, 2][..]].concat();
        let sei_only = [&START_CODE[..], &[0x06, 1, 2][..]].concat();
        let aud = [&START_CODE[..], &[0x09, 0xF0][..]].concat();
        assert!(carries_picture(&slices, Codec::H264));
        assert!(!carries_picture(&sei_only, Codec::H264));
        assert!(!carries_picture(&aud, Codec::H264));
        assert!(carries_picture(&[0x65, 1, 2], Codec::H264));
        assert!(is_picture_unit(&[0x41], Codec::H264));
        assert!(!is_picture_unit(&[], Codec::H264));
    }

    #[test]
    fn test_carries_parameter_sets() {
        let with_sps = to_length_prefixed(&[&[0x67, 1, 2][..], &[0x65, 9][..]], 4).unwrap();
        let without = to_length_prefixed(&[&[0x65, 9][..]], 4).unwrap();
        assert!(carries_parameter_sets(&with_sps, 4, Codec::H264));
        assert!(!carries_parameter_sets(&without, 4, Codec::H264));

        let hevc_sps = to_length_prefixed(&[&[33 << 1, 1][..]], 4).unwrap();
        assert!(carries_parameter_sets(&hevc_sps, 4, Codec::Hevc));
    }
}
