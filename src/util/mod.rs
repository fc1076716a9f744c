//! Utility Functions Module
//!
//! This module provides helpers used throughout the crate that are not part of
//! the wire format itself.
//!
//! # Overview
//!
//! Utilities provided include:
//! - Dotted-quad address parsing
//! - Hex dumps and human readable frame descriptions for logging
//! - Per-channel communication statistics
//!
//! # Example
//!
//! ```no_run
//! use accessctl::util::*;
//!
//! let ip = parse_ipv4("192.168.1.100").unwrap();
//! assert_eq!(ip.octets(), [0xC0, 0xA8, 0x01, 0x64]);
//! ```

use std::net::Ipv4Addr;

/// Parse a dotted-quad IPv4 address
pub fn parse_ipv4(address: &str) -> Result<Ipv4Addr, String> {
    address
        .trim()
        .parse::<Ipv4Addr>()
        .map_err(|e| format!("invalid IPv4 address '{address}': {e}"))
}

/// Multi-line hex dump of a frame, 16 bytes per row with an ASCII column.
///
/// Every row starts with `prefix` and the row offset.
pub fn hex_dump(data: &[u8], prefix: &str) -> String {
    data.chunks(16)
        .enumerate()
        .map(|(row, chunk)| {
            let (low, high) = chunk.split_at(chunk.len().min(8));
            let ascii: String = chunk
                .iter()
                .map(|&b| if b == b' ' || b.is_ascii_graphic() { b as char } else { '.' })
                .collect();
            format!(
                "{prefix}{:04X}: {:<24} {:<24} |{ascii}|\n",
                row * 16,
                spaced_hex(low),
                spaced_hex(high)
            )
        })
        .collect()
}

fn spaced_hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02X} ")).collect()
}

/// Statistics collection helpers
pub mod statistics {
    /// Frame counters of one delivery channel
    #[derive(Debug, Default, Clone, PartialEq, Eq)]
    pub struct CommunicationStats {
        pub messages_sent: u64,
        pub messages_received: u64,
        pub bytes_sent: u64,
        pub bytes_received: u64,
        pub errors: u64,
        /// Scheduled re-transmissions fired
        pub retries: u64,
    }

    impl CommunicationStats {
        /// Create new statistics
        pub fn new() -> Self {
            Self::default()
        }

        /// Record a sent message
        pub fn record_sent(&mut self, bytes: usize) {
            self.messages_sent += 1;
            self.bytes_sent += bytes as u64;
        }

        /// Record a received message
        pub fn record_received(&mut self, bytes: usize) {
            self.messages_received += 1;
            self.bytes_received += bytes as u64;
        }

        /// Record an error
        pub fn record_error(&mut self) {
            self.errors += 1;
        }

        /// Record a retry
        pub fn record_retry(&mut self) {
            self.retries += 1;
        }
    }
}

/// Debug formatting of protocol frames
pub mod debug {
    use crate::encoding::Frame;
    use crate::service::function_name;

    /// One line description of an outbound frame.
    ///
    /// Advisory only; the text format is not stable.
    pub fn describe_frame(frame: &Frame, payload: &[u8]) -> String {
        let target = match frame.serial() {
            0 => "all".to_string(),
            serial => serial.to_string(),
        };
        format!(
            "Func {}, controller {}, payload to send: <{}>",
            function_name(frame.function()),
            target,
            hex::encode(payload)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoding::{Frame, Payload};

    #[test]
    fn test_parse_ipv4() {
        assert_eq!(
            parse_ipv4("192.168.1.100").unwrap().octets(),
            [0xC0, 0xA8, 0x01, 0x64]
        );
        assert_eq!(parse_ipv4(" 10.0.0.1 ").unwrap(), Ipv4Addr::new(10, 0, 0, 1));
        assert!(parse_ipv4("192.168.1").is_err());
        assert!(parse_ipv4("invalid").is_err());
    }

    #[test]
    fn test_hex_dump() {
        let dump = hex_dump(&[0x17, 0x94, b'A', b'B'], "> ");
        assert!(dump.starts_with("> 0000: 17 94 41 42"));
        assert!(dump.ends_with("|..AB|\n"));

        let frame = Frame::encode(0x40, Some(1), &Payload::Byte(1)).unwrap();
        let dump = hex_dump(frame.as_bytes(), "");
        let rows: Vec<&str> = dump.lines().collect();
        assert_eq!(rows.len(), 4);
        assert!(rows[0].starts_with("0000: 17 40 00 00 01 00 00 00  01 00"));
        assert!(rows[3].starts_with("0030: "));
        assert!(hex_dump(&[], "").is_empty());
    }

    #[test]
    fn test_describe_frame() {
        let frame = Frame::encode(0x40, Some(223_000_123), &Payload::Byte(1)).unwrap();
        assert_eq!(
            debug::describe_frame(&frame, &[1]),
            "Func OpenDoor, controller 223000123, payload to send: <01>"
        );

        let frame = Frame::encode(0x94, None, &Payload::None).unwrap();
        assert_eq!(
            debug::describe_frame(&frame, &[]),
            "Func Search, controller all, payload to send: <>"
        );
    }

    #[test]
    fn test_communication_stats() {
        let mut stats = statistics::CommunicationStats::new();
        stats.record_sent(64);
        stats.record_sent(64);
        stats.record_received(64);
        stats.record_retry();

        assert_eq!(stats.messages_sent, 2);
        assert_eq!(stats.bytes_sent, 128);
        assert_eq!(stats.bytes_received, 64);
        assert_eq!(stats.retries, 1);

        stats.record_error();
        assert_eq!(stats.errors, 1);
    }
}
