//! Frame Encoding/Decoding Module
//!
//! This module provides the wire format of the controller protocol: a fixed
//! 64-byte frame carrying a function code, the controller serial number and a
//! function-specific payload.
//!
//! # Overview
//!
//! ```text
//! +--------+----------+-----------+-------------+----------------------+
//! | Byte 0 | Byte 1   | Bytes 2-3 | Bytes 4-7   | Bytes 8-63           |
//! +--------+----------+-----------+-------------+----------------------+
//! | 0x17   | Function | Reserved  | Serial (LE) | Payload (zero pad)   |
//! +--------+----------+-----------+-------------+----------------------+
//! ```
//!
//! The encoding module is responsible for:
//! - Building outbound frames from a function code and a [`Payload`] rule
//! - Reading the fixed header of inbound frames
//! - Field helpers shared by the payload schemas: little-endian integers,
//!   BCD dates, IPv4 octets, MAC addresses and the firmware version number
//!
//! Payload schemas per function code live in [`crate::service`].
//!
//! # Example
//!
//! ```no_run
//! use accessctl::encoding::{Frame, Payload};
//!
//! let frame = Frame::encode(0x40, Some(223_000_123), &Payload::Byte(1)).unwrap();
//! assert_eq!(frame.as_bytes().len(), 64);
//! ```

pub mod codec;

use std::net::Ipv4Addr;

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, Offset, TimeZone, Utc};
use thiserror::Error;

/// Result type for encoding operations
pub type Result<T> = std::result::Result<T, EncodingError>;

/// Total size of every frame on the wire
pub const FRAME_SIZE: usize = 64;

/// Constant first byte of every frame
pub const PREAMBLE: u8 = 0x17;

/// Offset of the payload area
pub const PAYLOAD_OFFSET: usize = 8;

/// Largest payload a frame can carry
pub const MAX_PAYLOAD: usize = FRAME_SIZE - PAYLOAD_OFFSET;

/// Smallest inbound datagram that still carries a function code and serial
pub const HEADER_SIZE: usize = 8;

/// Length of a BCD encoded `YYYYMMDDHHmmss` timestamp
pub const BCD_DATE_LEN: usize = 7;

/// Civil time zone of every date on the wire (Asia/Shanghai, no DST)
pub const PROTOCOL_UTC_OFFSET_SECS: i32 = 8 * 3600;

/// Errors that can occur during encoding/decoding operations
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EncodingError {
    /// Fewer than eight bytes received, the header cannot be read
    #[error("frame too short: {0} bytes, need at least {HEADER_SIZE}")]
    FrameTooShort(usize),
    /// Payload does not fit the 56 byte payload area
    #[error("payload too large: {0} bytes, at most {MAX_PAYLOAD} allowed")]
    PayloadTooLarge(usize),
    /// Hex-digit payload string is not valid hex
    #[error("invalid hex payload: {0}")]
    InvalidHex(String),
    /// Value out of valid range
    #[error("value out of range: {0}")]
    ValueOutOfRange(String),
}

/// How the payload area of an outbound frame is filled
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Payload {
    /// Payload area stays zeroed
    #[default]
    None,
    /// A single byte at offset 8
    Byte(u8),
    /// A pre-built byte sequence
    Bytes(Vec<u8>),
    /// A string of hex digits written verbatim as bytes; whitespace is ignored
    Hex(String),
}

impl Payload {
    /// Resolve the rule into the bytes that land at offset 8
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let bytes = match self {
            Payload::None => Vec::new(),
            Payload::Byte(b) => vec![*b],
            Payload::Bytes(bytes) => bytes.clone(),
            Payload::Hex(digits) => {
                let compact: String = digits.chars().filter(|c| !c.is_whitespace()).collect();
                hex::decode(&compact).map_err(|e| EncodingError::InvalidHex(e.to_string()))?
            }
        };

        if bytes.len() > MAX_PAYLOAD {
            return Err(EncodingError::PayloadTooLarge(bytes.len()));
        }

        Ok(bytes)
    }
}

/// A complete 64-byte protocol frame
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Frame([u8; FRAME_SIZE]);

impl Frame {
    /// Build an outbound frame.
    ///
    /// A serial of `None` leaves bytes 4-7 zeroed, which addresses every
    /// controller that hears the frame.
    pub fn encode(function: u8, serial: Option<u32>, payload: &Payload) -> Result<Self> {
        let body = payload.to_bytes()?;

        let mut data = [0u8; FRAME_SIZE];
        data[0] = PREAMBLE;
        data[1] = function;
        if let Some(serial) = serial {
            data[4..8].copy_from_slice(&serial.to_le_bytes());
        }
        data[PAYLOAD_OFFSET..PAYLOAD_OFFSET + body.len()].copy_from_slice(&body);

        Ok(Frame(data))
    }

    /// Copy received bytes into a frame, zero padding anything missing.
    ///
    /// Bytes past the 64th are dropped.
    pub fn from_slice(data: &[u8]) -> Result<Self> {
        if data.len() < HEADER_SIZE {
            return Err(EncodingError::FrameTooShort(data.len()));
        }

        let mut frame = [0u8; FRAME_SIZE];
        let len = data.len().min(FRAME_SIZE);
        frame[..len].copy_from_slice(&data[..len]);
        Ok(Frame(frame))
    }

    /// Function code at byte 1
    pub fn function(&self) -> u8 {
        self.0[1]
    }

    /// Controller serial at bytes 4-7, zero when addressed to all
    pub fn serial(&self) -> u32 {
        u32::from_le_bytes([self.0[4], self.0[5], self.0[6], self.0[7]])
    }

    /// The 56 byte payload area
    pub fn payload(&self) -> &[u8] {
        &self.0[PAYLOAD_OFFSET..]
    }

    /// Raw wire bytes
    pub fn as_bytes(&self) -> &[u8; FRAME_SIZE] {
        &self.0
    }
}

impl AsRef<[u8]> for Frame {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl std::fmt::Debug for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Frame")
            .field("function", &format_args!("0x{:02X}", self.function()))
            .field("serial", &self.serial())
            .field("payload", &hex::encode_upper(self.payload()))
            .finish()
    }
}

/// Header of an inbound datagram
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub function: u8,
    pub serial: u32,
}

/// Read function code and serial from an inbound datagram.
///
/// The preamble is not checked; frames are accepted as long as the header
/// is present. Returns the header and the payload bytes that follow it.
pub fn decode_header(data: &[u8]) -> Result<(FrameHeader, &[u8])> {
    if data.len() < HEADER_SIZE {
        return Err(EncodingError::FrameTooShort(data.len()));
    }

    let header = FrameHeader {
        function: data[1],
        serial: u32::from_le_bytes([data[4], data[5], data[6], data[7]]),
    };
    let end = data.len().min(FRAME_SIZE);
    Ok((header, &data[HEADER_SIZE..end]))
}

/// Little-endian reader over a payload
pub struct Buffer<'a> {
    data: &'a [u8],
    position: usize,
}

impl<'a> Buffer<'a> {
    /// Create a new buffer reader
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, position: 0 }
    }

    /// Get remaining bytes
    pub fn remaining(&self) -> usize {
        self.data.len().saturating_sub(self.position)
    }

    /// Read a single byte
    pub fn read_u8(&mut self) -> Option<u8> {
        self.read_bytes(1).map(|b| b[0])
    }

    /// Read a 16-bit value (little-endian)
    pub fn read_u16(&mut self) -> Option<u16> {
        self.read_bytes(2).map(|b| u16::from_le_bytes([b[0], b[1]]))
    }

    /// Read a 32-bit value (little-endian)
    pub fn read_u32(&mut self) -> Option<u32> {
        self.read_bytes(4)
            .map(|b| u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    /// Read four octets as an IPv4 address
    pub fn read_ipv4(&mut self) -> Option<Ipv4Addr> {
        self.read_bytes(4).and_then(decode_ipv4)
    }

    /// Read n bytes
    pub fn read_bytes(&mut self, n: usize) -> Option<&'a [u8]> {
        if self.remaining() >= n {
            let bytes = &self.data[self.position..self.position + n];
            self.position += n;
            Some(bytes)
        } else {
            None
        }
    }
}

/// The fixed protocol time zone
pub fn protocol_offset() -> FixedOffset {
    FixedOffset::east_opt(PROTOCOL_UTC_OFFSET_SECS).unwrap_or_else(|| Utc.fix())
}

/// Encode a timestamp as 7 BCD bytes `YYYYMMDDHHmmss` in the protocol zone
pub fn encode_bcd_datetime<Tz: TimeZone>(at: &DateTime<Tz>) -> Result<[u8; BCD_DATE_LEN]> {
    let local = at.with_timezone(&protocol_offset());
    let digits = local.format("%Y%m%d%H%M%S").to_string();
    let bytes = hex::decode(&digits).map_err(|e| EncodingError::InvalidHex(e.to_string()))?;

    bytes
        .try_into()
        .map_err(|_| EncodingError::ValueOutOfRange(format!("year out of range in {digits}")))
}

/// Decode 7 BCD bytes into a timestamp in the protocol zone.
///
/// Returns `None` for digits that do not form a calendar date.
pub fn decode_bcd_datetime(bcd: &[u8]) -> Option<DateTime<FixedOffset>> {
    if bcd.len() < BCD_DATE_LEN {
        return None;
    }

    let digits = hex::encode(&bcd[..BCD_DATE_LEN]);
    let naive = NaiveDateTime::parse_from_str(&digits, "%Y%m%d%H%M%S").ok()?;
    protocol_offset().from_local_datetime(&naive).single()
}

/// Encode a calendar date as 4 BCD bytes `YYYYMMDD`
pub fn encode_bcd_date(date: NaiveDate) -> Result<[u8; 4]> {
    let digits = date.format("%Y%m%d").to_string();
    let bytes = hex::decode(&digits).map_err(|e| EncodingError::InvalidHex(e.to_string()))?;

    bytes
        .try_into()
        .map_err(|_| EncodingError::ValueOutOfRange(format!("year out of range in {digits}")))
}

/// Decode 4 BCD bytes `YYYYMMDD`
pub fn decode_bcd_date(bcd: &[u8]) -> Option<NaiveDate> {
    if bcd.len() < 4 {
        return None;
    }
    NaiveDate::parse_from_str(&hex::encode(&bcd[..4]), "%Y%m%d").ok()
}

/// First four octets as a dotted-quad address, `None` if fewer are given
pub fn decode_ipv4(octets: &[u8]) -> Option<Ipv4Addr> {
    let octets: [u8; 4] = octets.get(..4)?.try_into().ok()?;
    Some(Ipv4Addr::from(octets))
}

/// Six raw bytes as colon separated uppercase hex pairs
pub fn format_mac(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|b| format!("{:02X}", b))
        .collect::<Vec<_>>()
        .join(":")
}

/// Firmware version from its two raw bytes.
///
/// The hex rendering of the bytes is read as a decimal number and divided
/// by 100, so `01 02` is version 1.02. Bytes whose hex form contains the
/// digits a-f carry no version and yield `None`.
pub fn decode_firmware_version(bytes: &[u8]) -> Option<f64> {
    hex::encode(bytes)
        .parse::<u32>()
        .ok()
        .map(|v| v as f64 / 100.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Datelike, Timelike};

    #[test]
    fn test_encode_layout() {
        let frame = Frame::encode(0x40, Some(0x01020304), &Payload::Byte(2)).unwrap();
        let bytes = frame.as_bytes();

        assert_eq!(bytes.len(), FRAME_SIZE);
        assert_eq!(bytes[0], PREAMBLE);
        assert_eq!(bytes[1], 0x40);
        assert_eq!(&bytes[2..4], &[0, 0]);
        assert_eq!(&bytes[4..8], &[0x04, 0x03, 0x02, 0x01]);
        assert_eq!(bytes[8], 2);
        assert!(bytes[9..].iter().all(|b| *b == 0));
    }

    #[test]
    fn test_encode_without_serial_addresses_all() {
        let frame = Frame::encode(0x94, None, &Payload::None).unwrap();
        assert_eq!(frame.serial(), 0);
        assert!(frame.payload().iter().all(|b| *b == 0));
    }

    #[test]
    fn test_hex_payload_ignores_whitespace() {
        let frame = Frame::encode(0x54, Some(1), &Payload::Hex("55 aa aa 55".into())).unwrap();
        assert_eq!(&frame.payload()[..4], &[0x55, 0xAA, 0xAA, 0x55]);

        let err = Frame::encode(0x54, Some(1), &Payload::Hex("5x".into())).unwrap_err();
        assert!(matches!(err, EncodingError::InvalidHex(_)));
    }

    #[test]
    fn test_payload_too_large() {
        let full = Frame::encode(0x50, None, &Payload::Bytes(vec![0xFF; MAX_PAYLOAD])).unwrap();
        assert_eq!(full.payload(), &[0xFF; MAX_PAYLOAD][..]);

        let err = Frame::encode(0x50, None, &Payload::Bytes(vec![0; MAX_PAYLOAD + 1])).unwrap_err();
        assert_eq!(err, EncodingError::PayloadTooLarge(57));
    }

    #[test]
    fn test_decode_header() {
        let frame = Frame::encode(0x94, Some(223_000_123), &Payload::Byte(9)).unwrap();
        let (header, payload) = decode_header(frame.as_bytes()).unwrap();
        assert_eq!(header.function, 0x94);
        assert_eq!(header.serial, 223_000_123);
        assert_eq!(payload.len(), MAX_PAYLOAD);
        assert_eq!(payload[0], 9);

        assert_eq!(
            decode_header(&[0x17, 0x20, 0, 0, 1]).unwrap_err(),
            EncodingError::FrameTooShort(5)
        );
    }

    #[test]
    fn test_from_slice_pads_short_frames() {
        let frame = Frame::from_slice(&[0x17, 0x40, 0, 0, 1, 0, 0, 0, 3]).unwrap();
        assert_eq!(frame.function(), 0x40);
        assert_eq!(frame.serial(), 1);
        assert_eq!(frame.payload()[0], 3);
        assert!(Frame::from_slice(&[0x17]).is_err());
    }

    #[test]
    fn test_buffer_little_endian() {
        let data = [0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07];
        let mut buf = Buffer::new(&data);
        assert_eq!(buf.read_u32(), Some(0x04030201));
        assert_eq!(buf.read_u16(), Some(0x0605));
        assert_eq!(buf.read_u8(), Some(0x07));
        assert_eq!(buf.read_u8(), None);
        assert_eq!(buf.remaining(), 0);
    }

    #[test]
    fn test_bcd_datetime_is_shanghai_time() {
        let utc = Utc.with_ymd_and_hms(2019, 12, 31, 16, 30, 5).unwrap();
        let bcd = encode_bcd_datetime(&utc).unwrap();
        assert_eq!(bcd, [0x20, 0x20, 0x01, 0x01, 0x00, 0x30, 0x05]);

        let decoded = decode_bcd_datetime(&bcd).unwrap();
        assert_eq!(decoded, utc);
        assert_eq!(decoded.year(), 2020);
        assert_eq!(decoded.hour(), 0);
        assert_eq!(decoded.offset().local_minus_utc(), PROTOCOL_UTC_OFFSET_SECS);
    }

    #[test]
    fn test_bcd_datetime_rejects_garbage() {
        assert!(decode_bcd_datetime(&[0x20, 0x19, 0x13, 0x01, 0, 0, 0]).is_none());
        assert!(decode_bcd_datetime(&[0; 7]).is_none());
        assert!(decode_bcd_datetime(&[0x20, 0x19]).is_none());
    }

    #[test]
    fn test_bcd_date() {
        let date = NaiveDate::from_ymd_opt(2029, 12, 31).unwrap();
        assert_eq!(encode_bcd_date(date).unwrap(), [0x20, 0x29, 0x12, 0x31]);
        assert_eq!(decode_bcd_date(&[0x20, 0x29, 0x12, 0x31]), Some(date));
    }

    #[test]
    fn test_ip_mac_and_version_fields() {
        assert_eq!(
            decode_ipv4(&[0xC0, 0xA8, 0x01, 0x64]),
            Some(Ipv4Addr::new(192, 168, 1, 100))
        );
        assert_eq!(decode_ipv4(&[0xC0, 0xA8, 0x01]), None);
        assert_eq!(
            format_mac(&[0xAA, 0xBB, 0xCC, 0xDD, 0xEE, 0xFF]),
            "AA:BB:CC:DD:EE:FF"
        );
        assert_eq!(decode_firmware_version(&[0x01, 0x02]), Some(1.02));
        assert_eq!(decode_firmware_version(&[0x06, 0x62]), Some(6.62));
        assert_eq!(decode_firmware_version(&[0x0A, 0x01]), None);
    }
}

#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #[test]
        fn frame_layout_holds_for_any_payload(
            function in any::<u8>(),
            serial in proptest::option::of(any::<u32>()),
            payload in proptest::collection::vec(any::<u8>(), 0..=MAX_PAYLOAD),
        ) {
            let frame = Frame::encode(function, serial, &Payload::Bytes(payload.clone())).unwrap();
            let bytes = frame.as_bytes();

            prop_assert_eq!(bytes.len(), FRAME_SIZE);
            prop_assert_eq!(bytes[0], PREAMBLE);
            prop_assert_eq!(bytes[1], function);
            prop_assert_eq!(&bytes[2..4], &[0u8, 0][..]);
            prop_assert_eq!(&bytes[4..8], &serial.unwrap_or(0).to_le_bytes()[..]);
            prop_assert_eq!(&bytes[8..8 + payload.len()], &payload[..]);
            prop_assert!(bytes[8 + payload.len()..].iter().all(|b| *b == 0));
        }

        #[test]
        fn oversized_payload_is_rejected(extra in 1usize..64) {
            let payload = Payload::Bytes(vec![0xAB; MAX_PAYLOAD + extra]);
            prop_assert!(matches!(
                Frame::encode(0x40, None, &payload),
                Err(EncodingError::PayloadTooLarge(_))
            ));
        }

        #[test]
        fn header_decodes_from_any_long_enough_datagram(
            data in proptest::collection::vec(any::<u8>(), HEADER_SIZE..128),
        ) {
            let (header, payload) = decode_header(&data).unwrap();
            prop_assert_eq!(header.function, data[1]);
            prop_assert_eq!(header.serial, u32::from_le_bytes([data[4], data[5], data[6], data[7]]));
            prop_assert_eq!(payload.len(), data.len().min(FRAME_SIZE) - HEADER_SIZE);
        }
    }
}
