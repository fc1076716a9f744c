//! Connectionless (UDP) delivery
//!
//! Frames go to the controller port of either a known host or the link
//! broadcast address. The socket's broadcast flag is process-visible state,
//! so every transmit holds the channel's send lock while it switches the flag
//! and sends; a broadcast send and a unicast send on the same channel can
//! therefore never interleave.

use std::io;
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use tokio::net::UdpSocket;

use super::{DataLinkError, Destination, Result};
use crate::encoding::Frame;
use crate::util::statistics::CommunicationStats;

/// UDP channel to one controller
pub struct UdpChannel {
    /// Bound socket supplied by the caller
    socket: Arc<UdpSocket>,
    /// Controller UDP port
    port: u16,
    /// Known controller address; `None` means broadcast
    address: RwLock<Option<Ipv4Addr>>,
    /// Serializes broadcast flag changes with the transmit they guard
    send_lock: tokio::sync::Mutex<()>,
    stats: Mutex<CommunicationStats>,
}

impl UdpChannel {
    /// Wrap a bound socket. `address` is the controller address if known.
    pub fn new(socket: UdpSocket, port: u16, address: Option<Ipv4Addr>) -> Self {
        Self {
            socket: Arc::new(socket),
            port,
            address: RwLock::new(address),
            send_lock: tokio::sync::Mutex::new(()),
            stats: Mutex::new(CommunicationStats::new()),
        }
    }

    /// The underlying socket
    pub fn socket(&self) -> &Arc<UdpSocket> {
        &self.socket
    }

    /// Controller UDP port
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Known controller address
    pub fn address(&self) -> Option<Ipv4Addr> {
        *self.address.read().unwrap_or_else(PoisonError::into_inner)
    }

    /// Record or forget the controller address
    pub fn set_address(&self, address: Option<Ipv4Addr>) {
        *self.address.write().unwrap_or_else(PoisonError::into_inner) = address;
    }

    /// Where the next frame will go
    pub fn destination(&self) -> Destination {
        Destination::from_known(self.address())
    }

    /// Transmit a frame once, reporting failures.
    ///
    /// The destination is read at transmit time. For broadcast sends the
    /// broadcast flag is switched on first and switched back off if the
    /// transmit fails.
    pub async fn try_send(&self, frame: &Frame) -> Result<usize> {
        let _guard = self.send_lock.lock().await;

        let destination = self.destination();
        let target = SocketAddr::from((destination.ip(), self.port));

        if destination.is_broadcast() {
            self.socket
                .set_broadcast(true)
                .map_err(|e| self.failed(target, e))?;
        }

        match self.socket.send_to(frame.as_bytes(), target).await {
            Ok(sent) => {
                self.lock_stats().record_sent(sent);
                Ok(sent)
            }
            Err(e) => {
                if destination.is_broadcast() {
                    if let Err(reset) = self.socket.set_broadcast(false) {
                        log::warn!("failed to reset broadcast mode: {reset}");
                    }
                }
                Err(self.failed(target, e))
            }
        }
    }

    /// Transmit a frame once; failures are logged
    pub async fn send(&self, frame: &Frame) {
        if let Err(e) = self.try_send(frame).await {
            log::error!("{e}");
        }
    }

    /// Count a scheduled re-transmission
    pub(crate) fn record_echo(&self) {
        self.lock_stats().record_retry();
    }

    /// Receive one datagram from the socket
    pub async fn recv_from(&self, buf: &mut [u8]) -> io::Result<(usize, SocketAddr)> {
        let received = self.socket.recv_from(buf).await?;
        self.lock_stats().record_received(received.0);
        Ok(received)
    }

    /// Snapshot of the channel counters
    pub fn stats(&self) -> CommunicationStats {
        self.lock_stats().clone()
    }

    fn failed(&self, target: SocketAddr, source: io::Error) -> DataLinkError {
        self.lock_stats().record_error();
        DataLinkError::send_failure(target, source)
    }

    fn lock_stats(&self) -> std::sync::MutexGuard<'_, CommunicationStats> {
        self.stats.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoding::Payload;

    async fn loopback() -> (UdpChannel, UdpSocket) {
        let controller = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let port = controller.local_addr().unwrap().port();
        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let channel = UdpChannel::new(socket, port, Some(Ipv4Addr::LOCALHOST));
        (channel, controller)
    }

    #[tokio::test]
    async fn test_unicast_send() {
        let (channel, controller) = loopback().await;
        let frame = Frame::encode(0x40, Some(17), &Payload::Byte(1)).unwrap();

        assert_eq!(channel.try_send(&frame).await.unwrap(), 64);

        let mut buf = [0u8; 128];
        let (len, from) = controller.recv_from(&mut buf).await.unwrap();
        assert_eq!(len, 64);
        assert_eq!(&buf[..len], frame.as_bytes());
        assert_eq!(from, channel.socket().local_addr().unwrap());

        let stats = channel.stats();
        assert_eq!(stats.messages_sent, 1);
        assert_eq!(stats.bytes_sent, 64);
        assert_eq!(stats.errors, 0);
    }

    #[tokio::test]
    async fn test_unknown_address_targets_broadcast() {
        let (channel, _controller) = loopback().await;
        channel.set_address(None);
        assert_eq!(channel.destination(), Destination::Broadcast);
        assert_eq!(channel.destination().to_string(), "255.255.255.255");

        channel.set_address(Some(Ipv4Addr::new(192, 168, 1, 100)));
        assert_eq!(
            channel.destination(),
            Destination::Host(Ipv4Addr::new(192, 168, 1, 100))
        );
    }

    #[tokio::test]
    async fn test_failed_send_is_counted_not_raised() {
        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        // an IPv4 socket cannot reach port 0
        let channel = UdpChannel::new(socket, 0, Some(Ipv4Addr::LOCALHOST));
        let frame = Frame::encode(0x40, Some(17), &Payload::Byte(1)).unwrap();

        assert!(channel.try_send(&frame).await.is_err());
        channel.send(&frame).await;
        assert_eq!(channel.stats().errors, 2);
        assert_eq!(channel.stats().messages_sent, 0);
    }
}
