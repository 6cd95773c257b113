//! Compact satellite payload decoding
//!
//! Every frame starts with a sync byte and a version byte. The version picks
//! a [`WireFormat`] from the [`PayloadDecoder`] registry, so new formats plug
//! in without touching reconciliation.
//!
//! ## Version 1 layout
//!
//! ```text
//! 0      sync 0x5A
//! 1      version 0x01
//! 2      flags: bit0 SNAPSHOT, bit1 FIELD_AGE, other bits zero
//! 3..5   sequence (u16 BE)
//! 5..9   transmission time, unix seconds (u32 BE)
//! 9      field count N
//! ..     N fields: header u16 BE = width << 14 | index
//!                  [age u16 BE seconds, when FIELD_AGE]
//!                  value (1 byte for width 0, else 2/4/8 bytes of raw words)
//! end-2  CRC-16/MODBUS over all previous bytes (LE)
//! ```

use crate::core::config::ContextResolver;
use crate::error::{Result, SatProxyError};
use bytes::{Buf, BufMut, BytesMut};
use crc::{Crc, CRC_16_MODBUS};
use satproxy_model::DataType;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

pub const SYNC_BYTE: u8 = 0x5A;
pub const VERSION_1: u8 = 0x01;
pub const FLAG_SNAPSHOT: u8 = 0x01;
pub const FLAG_FIELD_AGE: u8 = 0x02;
/// Largest compact index a field header can carry
pub const MAX_FIELD_INDEX: u32 = 0x3FFF;

const HEADER_LEN: usize = 10;
const CRC_LEN: usize = 2;

const MODBUS_CRC: Crc<u16> = Crc::<u16>::new(&CRC_16_MODBUS);

/// Why a frame was rejected
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum MalformedReason {
    #[error("frame truncated")]
    Truncated,
    #[error("bad sync byte")]
    BadSync,
    #[error("checksum mismatch")]
    BadChecksum,
    #[error("unknown format version {0}")]
    UnknownVersion(u8),
    #[error("reserved flag bits set (0x{0:02X})")]
    ReservedFlags(u8),
    #[error("bit field {index} carries value {value}")]
    BadBitValue { index: u32, value: u8 },
    #[error("{0} trailing bytes after the last field")]
    TrailingBytes(usize),
    #[error("frame of {0} bytes exceeds the size limit")]
    TooLarge(usize),
    #[error("field {index} age exceeds the frame timestamp")]
    AgeUnderflow { index: u32 },
}

/// Encoded size class of a field value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum FieldWidth {
    /// One byte, 0 or 1
    Bit,
    Word,
    DoubleWord,
    QuadWord,
}

impl FieldWidth {
    pub fn code(&self) -> u16 {
        match self {
            Self::Bit => 0,
            Self::Word => 1,
            Self::DoubleWord => 2,
            Self::QuadWord => 3,
        }
    }

    fn from_code(code: u16) -> Self {
        match code & 0b11 {
            0 => Self::Bit,
            1 => Self::Word,
            2 => Self::DoubleWord,
            _ => Self::QuadWord,
        }
    }

    /// Number of raw words carried (a bit is held as one word)
    pub fn word_count(&self) -> usize {
        match self {
            Self::Bit | Self::Word => 1,
            Self::DoubleWord => 2,
            Self::QuadWord => 4,
        }
    }

    /// Width a register of this type is reported with
    pub fn for_data_type(data_type: DataType) -> Self {
        match (data_type, data_type.word_count()) {
            (DataType::Bool, _) => Self::Bit,
            (_, 1) => Self::Word,
            (_, 2) => Self::DoubleWord,
            _ => Self::QuadWord,
        }
    }

    fn from_word_count(words: usize) -> Option<Self> {
        match words {
            1 => Some(Self::Word),
            2 => Some(Self::DoubleWord),
            4 => Some(Self::QuadWord),
            _ => None,
        }
    }
}

/// One register reading carried by a frame
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldUpdate {
    /// Compact index into the outstation's register list
    pub index: u32,
    pub width: FieldWidth,
    /// Register words as presented by the device (a bit is `[0]` or `[1]`)
    pub raw: Vec<u16>,
    /// Reading time at the outstation (ms since epoch)
    pub timestamp_ms: i64,
}

impl FieldUpdate {
    pub fn bit(index: u32, value: bool, timestamp_ms: i64) -> Self {
        Self {
            index,
            width: FieldWidth::Bit,
            raw: vec![u16::from(value)],
            timestamp_ms,
        }
    }

    pub fn word(index: u32, value: u16, timestamp_ms: i64) -> Self {
        Self {
            index,
            width: FieldWidth::Word,
            raw: vec![value],
            timestamp_ms,
        }
    }

    /// Multi-word field; `None` unless 1, 2 or 4 words are given
    pub fn words(index: u32, raw: Vec<u16>, timestamp_ms: i64) -> Option<Self> {
        let width = FieldWidth::from_word_count(raw.len())?;
        Some(Self {
            index,
            width,
            raw,
            timestamp_ms,
        })
    }
}

/// Format-level content of one frame
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedFrame {
    pub sequence: u16,
    /// Transmission time (ms since epoch, whole seconds on the wire)
    pub timestamp_ms: i64,
    /// Full snapshot rather than a delta
    pub snapshot: bool,
    pub fields: Vec<FieldUpdate>,
}

/// One decoded satellite transmission for a known outstation
#[derive(Debug, Clone, PartialEq)]
pub struct PayloadMessage {
    pub outstation_id: String,
    pub version: u8,
    pub sequence: u16,
    pub timestamp_ms: i64,
    pub snapshot: bool,
    pub fields: Vec<FieldUpdate>,
}

impl PayloadMessage {
    pub fn new(outstation_id: impl Into<String>, version: u8, frame: DecodedFrame) -> Self {
        Self {
            outstation_id: outstation_id.into(),
            version,
            sequence: frame.sequence,
            timestamp_ms: frame.timestamp_ms,
            snapshot: frame.snapshot,
            fields: frame.fields,
        }
    }
}

/// A versioned compact frame format
pub trait WireFormat: Send + Sync {
    /// Version byte this format answers to
    fn version(&self) -> u8;

    /// Parse a complete frame, sync and version bytes included
    fn decode(&self, frame: &[u8]) -> std::result::Result<DecodedFrame, MalformedReason>;
}

/// Version 1 compact frame
#[derive(Debug, Clone, Copy, Default)]
pub struct CompactFrameV1;

fn need(buf: &[u8], len: usize) -> std::result::Result<(), MalformedReason> {
    if buf.remaining() < len {
        return Err(MalformedReason::Truncated);
    }
    Ok(())
}

impl CompactFrameV1 {
    /// Build a frame. Fields older than the frame timestamp get an age.
    pub fn encode(&self, frame: &DecodedFrame) -> Result<Vec<u8>> {
        if frame.fields.len() > usize::from(u8::MAX) {
            return Err(SatProxyError::validation(format!(
                "{} fields do not fit one frame",
                frame.fields.len()
            )));
        }
        if frame.timestamp_ms < 0 || frame.timestamp_ms / 1000 > i64::from(u32::MAX) {
            return Err(SatProxyError::validation("frame timestamp out of range"));
        }
        let ts_secs = frame.timestamp_ms / 1000;
        let aged = frame
            .fields
            .iter()
            .any(|f| f.timestamp_ms / 1000 != ts_secs);

        let mut flags = 0u8;
        if frame.snapshot {
            flags |= FLAG_SNAPSHOT;
        }
        if aged {
            flags |= FLAG_FIELD_AGE;
        }

        let mut buf = BytesMut::with_capacity(HEADER_LEN + CRC_LEN + frame.fields.len() * 6);
        buf.put_u8(SYNC_BYTE);
        buf.put_u8(VERSION_1);
        buf.put_u8(flags);
        buf.put_u16(frame.sequence);
        buf.put_u32(ts_secs as u32);
        buf.put_u8(frame.fields.len() as u8);

        for field in &frame.fields {
            if field.index > MAX_FIELD_INDEX {
                return Err(SatProxyError::validation(format!(
                    "field index {} exceeds {}",
                    field.index, MAX_FIELD_INDEX
                )));
            }
            if field.raw.len() != field.width.word_count() {
                return Err(SatProxyError::validation(format!(
                    "field {} carries {} words for width {:?}",
                    field.index,
                    field.raw.len(),
                    field.width
                )));
            }
            buf.put_u16((field.width.code() << 14) | field.index as u16);
            if aged {
                let age = ts_secs - field.timestamp_ms / 1000;
                let age = u16::try_from(age).map_err(|_| {
                    SatProxyError::validation(format!(
                        "field {} age {}s is not encodable",
                        field.index, age
                    ))
                })?;
                buf.put_u16(age);
            }
            match field.width {
                FieldWidth::Bit => buf.put_u8(u8::from(field.raw[0] != 0)),
                _ => field.raw.iter().for_each(|w| buf.put_u16(*w)),
            }
        }

        let crc = MODBUS_CRC.checksum(&buf);
        buf.put_u16_le(crc);
        Ok(buf.to_vec())
    }
}

impl WireFormat for CompactFrameV1 {
    fn version(&self) -> u8 {
        VERSION_1
    }

    fn decode(&self, frame: &[u8]) -> std::result::Result<DecodedFrame, MalformedReason> {
        if frame.len() < HEADER_LEN + CRC_LEN {
            return Err(MalformedReason::Truncated);
        }
        if frame[0] != SYNC_BYTE {
            return Err(MalformedReason::BadSync);
        }

        // Integrity first: nothing past this point reads unverified bytes
        let (body, trailer) = frame.split_at(frame.len() - CRC_LEN);
        let expected = u16::from_le_bytes([trailer[0], trailer[1]]);
        if MODBUS_CRC.checksum(body) != expected {
            return Err(MalformedReason::BadChecksum);
        }

        let mut buf = &body[1..];
        let version = buf.get_u8();
        if version != VERSION_1 {
            return Err(MalformedReason::UnknownVersion(version));
        }
        let flags = buf.get_u8();
        if flags & !(FLAG_SNAPSHOT | FLAG_FIELD_AGE) != 0 {
            return Err(MalformedReason::ReservedFlags(flags));
        }
        let sequence = buf.get_u16();
        let ts_secs = i64::from(buf.get_u32());
        let count = buf.get_u8();

        let mut fields = Vec::with_capacity(usize::from(count));
        for _ in 0..count {
            need(buf, 2)?;
            let header = buf.get_u16();
            let width = FieldWidth::from_code(header >> 14);
            let index = u32::from(header) & MAX_FIELD_INDEX;

            let age = if flags & FLAG_FIELD_AGE != 0 {
                need(buf, 2)?;
                i64::from(buf.get_u16())
            } else {
                0
            };
            if age > ts_secs {
                return Err(MalformedReason::AgeUnderflow { index });
            }

            let raw = match width {
                FieldWidth::Bit => {
                    need(buf, 1)?;
                    let value = buf.get_u8();
                    if value > 1 {
                        return Err(MalformedReason::BadBitValue { index, value });
                    }
                    vec![u16::from(value)]
                },
                _ => {
                    let words = width.word_count();
                    need(buf, words * 2)?;
                    (0..words).map(|_| buf.get_u16()).collect()
                },
            };

            fields.push(FieldUpdate {
                index,
                width,
                raw,
                timestamp_ms: (ts_secs - age) * 1000,
            });
        }

        if buf.has_remaining() {
            return Err(MalformedReason::TrailingBytes(buf.remaining()));
        }

        Ok(DecodedFrame {
            sequence,
            timestamp_ms: ts_secs * 1000,
            snapshot: flags & FLAG_SNAPSHOT != 0,
            fields,
        })
    }
}

/// Versioned decoder front end
///
/// Checks the outstation against the resolver first, then hands the frame to
/// the format registered for its version byte. Holds no per-stream state, so
/// a corrupt frame cannot affect the next one.
pub struct PayloadDecoder {
    formats: HashMap<u8, Arc<dyn WireFormat>>,
    resolver: Arc<ContextResolver>,
    max_frame_len: usize,
}

impl PayloadDecoder {
    /// Decoder with version 1 registered
    pub fn new(resolver: Arc<ContextResolver>, max_frame_len: usize) -> Self {
        let mut decoder = Self {
            formats: HashMap::new(),
            resolver,
            max_frame_len,
        };
        decoder.register(Arc::new(CompactFrameV1));
        decoder
    }

    /// Add or replace the format for its version byte
    pub fn register(&mut self, format: Arc<dyn WireFormat>) {
        self.formats.insert(format.version(), format);
    }

    /// Whether payloads for this outstation would get past the resolver check
    pub fn knows(&self, outstation_id: &str) -> bool {
        self.resolver.contains(outstation_id)
    }

    pub fn versions(&self) -> Vec<u8> {
        let mut versions: Vec<u8> = self.formats.keys().copied().collect();
        versions.sort_unstable();
        versions
    }

    pub fn decode(&self, outstation_id: &str, bytes: &[u8]) -> Result<PayloadMessage> {
        if !self.resolver.contains(outstation_id) {
            return Err(SatProxyError::unknown_outstation(outstation_id));
        }
        if bytes.len() > self.max_frame_len {
            return Err(MalformedReason::TooLarge(bytes.len()).into());
        }
        if bytes.len() < 2 {
            return Err(MalformedReason::Truncated.into());
        }
        if bytes[0] != SYNC_BYTE {
            return Err(MalformedReason::BadSync.into());
        }

        let version = bytes[1];
        let format = self
            .formats
            .get(&version)
            .ok_or(MalformedReason::UnknownVersion(version))?;
        let frame = format.decode(bytes)?;
        Ok(PayloadMessage::new(outstation_id, version, frame))
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;
    use crate::core::config::{OutstationContext, ResolverState};
    use satproxy_model::{RegisterDefinition, RegisterKind, RegisterMap};

    const TS: i64 = 1_700_000_000_000;

    fn frame(snapshot: bool, fields: Vec<FieldUpdate>) -> DecodedFrame {
        DecodedFrame {
            sequence: 7,
            timestamp_ms: TS,
            snapshot,
            fields,
        }
    }

    fn decoder() -> PayloadDecoder {
        let map = RegisterMap::new(
            "A1",
            1,
            vec![RegisterDefinition::new(
                0,
                RegisterKind::HoldingRegister,
                100,
                DataType::U16,
            )],
        )
        .unwrap();
        let state = ResolverState::build(vec![OutstationContext::new(
            map,
            "127.0.0.1:5020".parse().unwrap(),
            false,
        )])
        .unwrap();
        PayloadDecoder::new(Arc::new(ContextResolver::new(state)), 256)
    }

    /// Fix up the trailing CRC after a test mutates the body
    fn reseal(bytes: &mut Vec<u8>) {
        let len = bytes.len();
        let crc = MODBUS_CRC.checksum(&bytes[..len - 2]);
        bytes[len - 2..].copy_from_slice(&crc.to_le_bytes());
    }

    #[test]
    fn test_known_frame_layout() {
        let bytes = CompactFrameV1
            .encode(&frame(false, vec![FieldUpdate::word(0, 42, TS)]))
            .unwrap();
        assert_eq!(&bytes[..3], &[0x5A, 0x01, 0x00]);
        assert_eq!(&bytes[3..5], &[0x00, 0x07]);
        assert_eq!(bytes[9], 1);
        // width 1, index 0, value 42
        assert_eq!(&bytes[10..14], &[0x40, 0x00, 0x00, 0x2A]);
        assert_eq!(bytes.len(), 16);
    }

    #[test]
    fn test_decode_mixed_widths_and_ages() {
        let fields = vec![
            FieldUpdate::bit(3, true, TS),
            FieldUpdate::word(0, 42, TS - 5_000),
            FieldUpdate::words(1, vec![0x4148, 0x0000], TS).unwrap(),
            FieldUpdate::words(2, vec![1, 2, 3, 4], TS - 60_000).unwrap(),
        ];
        let bytes = CompactFrameV1.encode(&frame(true, fields.clone())).unwrap();
        assert_eq!(bytes[2], FLAG_SNAPSHOT | FLAG_FIELD_AGE);

        let decoded = CompactFrameV1.decode(&bytes).unwrap();
        assert!(decoded.snapshot);
        assert_eq!(decoded.sequence, 7);
        assert_eq!(decoded.timestamp_ms, TS);
        assert_eq!(decoded.fields, fields);
    }

    #[test]
    fn test_checksum_checked_before_content() {
        let mut bytes = CompactFrameV1
            .encode(&frame(false, vec![FieldUpdate::word(0, 42, TS)]))
            .unwrap();
        bytes[2] = 0xF0; // reserved flags, but unsealed
        assert_eq!(
            CompactFrameV1.decode(&bytes),
            Err(MalformedReason::BadChecksum)
        );
        reseal(&mut bytes);
        assert_eq!(
            CompactFrameV1.decode(&bytes),
            Err(MalformedReason::ReservedFlags(0xF0))
        );
    }

    #[test]
    fn test_structural_violations() {
        let good = CompactFrameV1
            .encode(&frame(false, vec![FieldUpdate::word(0, 42, TS)]))
            .unwrap();

        // Field count claims more fields than present
        let mut bytes = good.clone();
        bytes[9] = 2;
        reseal(&mut bytes);
        assert_eq!(CompactFrameV1.decode(&bytes), Err(MalformedReason::Truncated));

        // Extra byte after the last field
        let mut bytes = good.clone();
        bytes.insert(14, 0xFF);
        reseal(&mut bytes);
        assert_eq!(
            CompactFrameV1.decode(&bytes),
            Err(MalformedReason::TrailingBytes(1))
        );

        // Bit field carrying 2
        let mut bytes = CompactFrameV1
            .encode(&frame(false, vec![FieldUpdate::bit(5, true, TS)]))
            .unwrap();
        bytes[12] = 2;
        reseal(&mut bytes);
        assert_eq!(
            CompactFrameV1.decode(&bytes),
            Err(MalformedReason::BadBitValue { index: 5, value: 2 })
        );

        assert_eq!(
            CompactFrameV1.decode(&good[..5]),
            Err(MalformedReason::Truncated)
        );
        let mut bytes = good;
        bytes[0] = 0x00;
        assert_eq!(CompactFrameV1.decode(&bytes), Err(MalformedReason::BadSync));
    }

    #[test]
    fn test_age_underflow() {
        let mut bytes = CompactFrameV1
            .encode(&DecodedFrame {
                sequence: 1,
                timestamp_ms: 10_000,
                snapshot: false,
                fields: vec![FieldUpdate::word(0, 1, 5_000)],
            })
            .unwrap();
        // Raise the age from 5s to 20s, older than the 10s frame timestamp
        bytes[12] = 0x00;
        bytes[13] = 20;
        reseal(&mut bytes);
        assert_eq!(
            CompactFrameV1.decode(&bytes),
            Err(MalformedReason::AgeUnderflow { index: 0 })
        );
    }

    #[test]
    fn test_encode_rejects_unrepresentable_fields() {
        assert!(CompactFrameV1
            .encode(&frame(false, vec![FieldUpdate::word(MAX_FIELD_INDEX + 1, 0, TS)]))
            .is_err());
        assert!(FieldUpdate::words(0, vec![1, 2, 3], TS).is_none());
    }

    #[test]
    fn test_decoder_front_end() {
        let decoder = decoder();
        let bytes = CompactFrameV1
            .encode(&frame(false, vec![FieldUpdate::word(0, 42, TS)]))
            .unwrap();

        let message = decoder.decode("A1", &bytes).unwrap();
        assert_eq!(message.outstation_id, "A1");
        assert_eq!(message.version, VERSION_1);
        assert_eq!(message.fields[0].raw, vec![42]);

        assert!(matches!(
            decoder.decode("Z9", &bytes),
            Err(SatProxyError::UnknownOutstation(_))
        ));

        let mut v2 = bytes.clone();
        v2[1] = 2;
        assert!(matches!(
            decoder.decode("A1", &v2),
            Err(SatProxyError::MalformedPayload(MalformedReason::UnknownVersion(2)))
        ));

        let huge = vec![SYNC_BYTE; 300];
        assert!(matches!(
            decoder.decode("A1", &huge),
            Err(SatProxyError::MalformedPayload(MalformedReason::TooLarge(300)))
        ));

        // A corrupt frame does not disturb the next good one
        let mut corrupt = bytes.clone();
        corrupt[11] ^= 0xFF;
        assert!(decoder.decode("A1", &corrupt).is_err());
        assert!(decoder.decode("A1", &bytes).is_ok());
        assert_eq!(decoder.versions(), vec![1]);
    }
}
