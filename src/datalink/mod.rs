//! Controller Data Link Module
//!
//! This module delivers encoded frames to a controller. Two delivery channels
//! exist and a session picks one when it is created:
//!
//! - **Connectionless** ([`UdpChannel`]): UDP datagrams to the controller
//!   port. While the controller's address is unknown frames go to the link
//!   broadcast address `255.255.255.255`.
//! - **Connection-oriented** ([`StreamChannel`]): writes to an established
//!   byte stream, typically a relay that keeps a persistent session to the
//!   controller. Unicast only.
//!
//! # Architecture
//!
//! [`TransportChannel`] is a closed enum over the two channels exposing a
//! single `send` operation. Sending never fails the caller: transmit errors
//! are logged and counted. The fallible `try_send` of each channel reports
//! a [`DataLinkError`] for callers that want to inspect it.
//!
//! # Examples
//!
//! ```no_run
//! use std::sync::Arc;
//! use accessctl::datalink::{TransportChannel, UdpChannel};
//! use accessctl::service::Command;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let socket = tokio::net::UdpSocket::bind("0.0.0.0:0").await?;
//! let channel = TransportChannel::from(UdpChannel::new(socket, 60000, None));
//!
//! let frame = Command::search().frame(None)?;
//! channel.send(&frame).await;
//! # Ok(())
//! # }
//! ```

mod stream;
mod udp;

pub use stream::StreamChannel;
pub use udp::UdpChannel;

use std::fmt;
use std::io;
use std::net::Ipv4Addr;
use std::sync::Arc;

use thiserror::Error;

use crate::encoding::Frame;
use crate::util::statistics::CommunicationStats;

/// Default UDP port of the controller
pub const CONTROLLER_PORT: u16 = 60000;

/// Result type for data link operations
pub type Result<T> = std::result::Result<T, DataLinkError>;

/// Errors that can occur while handing a frame to the network
#[derive(Debug, Error)]
pub enum DataLinkError {
    /// The socket or stream refused the frame
    #[error("failed to send frame to {target}: {source}")]
    TransportSendFailure {
        target: String,
        #[source]
        source: io::Error,
    },
}

impl DataLinkError {
    pub(crate) fn send_failure(target: impl fmt::Display, source: io::Error) -> Self {
        DataLinkError::TransportSendFailure {
            target: target.to_string(),
            source,
        }
    }
}

/// Where a connectionless frame is sent
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Destination {
    /// `255.255.255.255`, used while the controller address is unknown
    Broadcast,
    /// A known controller address
    Host(Ipv4Addr),
}

impl Destination {
    /// Destination for an optional known address
    pub fn from_known(address: Option<Ipv4Addr>) -> Self {
        match address {
            Some(ip) => Destination::Host(ip),
            None => Destination::Broadcast,
        }
    }

    /// IP the datagram is addressed to
    pub fn ip(self) -> Ipv4Addr {
        match self {
            Destination::Broadcast => Ipv4Addr::BROADCAST,
            Destination::Host(ip) => ip,
        }
    }

    /// Whether the socket must be in broadcast mode for this destination
    pub fn is_broadcast(self) -> bool {
        matches!(self, Destination::Broadcast)
    }
}

impl fmt::Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.ip())
    }
}

/// Delivery channel bound to one controller session
pub enum TransportChannel {
    /// Broadcast-capable UDP delivery; shared with scheduled echoes
    Connectionless(Arc<UdpChannel>),
    /// Unicast delivery over an established stream
    ConnectionOriented(StreamChannel),
}

impl TransportChannel {
    /// Transmit a frame once. Failures are logged, never returned.
    pub async fn send(&self, frame: &Frame) {
        match self {
            TransportChannel::Connectionless(udp) => udp.send(frame).await,
            TransportChannel::ConnectionOriented(stream) => stream.send(frame).await,
        }
    }

    /// Whether this is the UDP channel
    pub fn is_connectionless(&self) -> bool {
        matches!(self, TransportChannel::Connectionless(_))
    }

    /// The UDP channel, if this is one
    pub fn udp(&self) -> Option<&Arc<UdpChannel>> {
        match self {
            TransportChannel::Connectionless(udp) => Some(udp),
            TransportChannel::ConnectionOriented(_) => None,
        }
    }

    /// Snapshot of the channel counters
    pub fn stats(&self) -> CommunicationStats {
        match self {
            TransportChannel::Connectionless(udp) => udp.stats(),
            TransportChannel::ConnectionOriented(stream) => stream.stats(),
        }
    }
}

impl From<UdpChannel> for TransportChannel {
    fn from(channel: UdpChannel) -> Self {
        TransportChannel::Connectionless(Arc::new(channel))
    }
}

impl From<Arc<UdpChannel>> for TransportChannel {
    fn from(channel: Arc<UdpChannel>) -> Self {
        TransportChannel::Connectionless(channel)
    }
}

impl From<StreamChannel> for TransportChannel {
    fn from(channel: StreamChannel) -> Self {
        TransportChannel::ConnectionOriented(channel)
    }
}

impl fmt::Debug for TransportChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportChannel::Connectionless(udp) => f
                .debug_tuple("Connectionless")
                .field(&udp.destination())
                .finish(),
            TransportChannel::ConnectionOriented(_) => f.write_str("ConnectionOriented"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_destination() {
        assert_eq!(Destination::from_known(None), Destination::Broadcast);
        assert_eq!(Destination::Broadcast.ip(), Ipv4Addr::new(255, 255, 255, 255));
        assert_eq!(Destination::Broadcast.to_string(), "255.255.255.255");

        let host = Destination::from_known(Some(Ipv4Addr::new(192, 168, 1, 100)));
        assert!(!host.is_broadcast());
        assert_eq!(host.to_string(), "192.168.1.100");
    }

    #[test]
    fn test_send_failure_message() {
        let err = DataLinkError::send_failure(
            Destination::Broadcast,
            io::Error::new(io::ErrorKind::PermissionDenied, "denied"),
        );
        assert_eq!(
            err.to_string(),
            "failed to send frame to 255.255.255.255: denied"
        );
    }
}
