//! Connection-oriented delivery over an established stream

use std::net::SocketAddr;
use std::sync::{Mutex, PoisonError};

use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::net::tcp::OwnedReadHalf;
use tokio::net::TcpStream;

use super::{DataLinkError, Result};
use crate::encoding::Frame;
use crate::util::statistics::CommunicationStats;

type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Stream channel to a controller or to a relay in front of it.
///
/// Writes are not retried; a failed write is reported once.
pub struct StreamChannel {
    writer: tokio::sync::Mutex<BoxedWriter>,
    peer: Option<SocketAddr>,
    stats: Mutex<CommunicationStats>,
}

impl StreamChannel {
    /// Wrap the write side of an established stream
    pub fn new<W>(writer: W) -> Self
    where
        W: AsyncWrite + Send + Unpin + 'static,
    {
        Self {
            writer: tokio::sync::Mutex::new(Box::new(writer)),
            peer: None,
            stats: Mutex::new(CommunicationStats::new()),
        }
    }

    /// Split a connected TCP stream. The read half is returned for use with
    /// [`crate::encoding::codec::FrameCodec`].
    pub fn from_tcp(stream: TcpStream) -> (Self, OwnedReadHalf) {
        let peer = stream.peer_addr().ok();
        let (read, write) = stream.into_split();
        let mut channel = Self::new(write);
        channel.peer = peer;
        (channel, read)
    }

    /// Remote end of the stream, when known
    pub fn peer(&self) -> Option<SocketAddr> {
        self.peer
    }

    /// Write one frame, reporting failures
    pub async fn try_send(&self, frame: &Frame) -> Result<()> {
        let mut writer = self.writer.lock().await;

        let written = async {
            writer.write_all(frame.as_bytes()).await?;
            writer.flush().await
        }
        .await;

        match written {
            Ok(()) => {
                self.lock_stats().record_sent(frame.as_bytes().len());
                Ok(())
            }
            Err(e) => {
                self.lock_stats().record_error();
                let target = self
                    .peer
                    .map(|peer| peer.to_string())
                    .unwrap_or_else(|| "stream".to_string());
                Err(DataLinkError::send_failure(target, e))
            }
        }
    }

    /// Write one frame; failures are logged
    pub async fn send(&self, frame: &Frame) {
        if let Err(e) = self.try_send(frame).await {
            log::error!("{e}");
        }
    }

    /// Snapshot of the channel counters
    pub fn stats(&self) -> CommunicationStats {
        self.lock_stats().clone()
    }

    fn lock_stats(&self) -> std::sync::MutexGuard<'_, CommunicationStats> {
        self.stats.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoding::Payload;
    use std::io;

    #[tokio::test]
    async fn test_writes_whole_frame() {
        let frame = Frame::encode(0x40, Some(9), &Payload::Byte(2)).unwrap();
        let mock = tokio_test::io::Builder::new()
            .write(frame.as_bytes())
            .build();

        let channel = StreamChannel::new(mock);
        channel.try_send(&frame).await.unwrap();
        assert_eq!(channel.stats().messages_sent, 1);
        assert_eq!(channel.stats().bytes_sent, 64);
    }

    #[tokio::test]
    async fn test_write_error_is_not_retried() {
        let frame = Frame::encode(0x40, Some(9), &Payload::Byte(2)).unwrap();
        let mock = tokio_test::io::Builder::new()
            .write_error(io::Error::new(io::ErrorKind::BrokenPipe, "closed"))
            .build();

        let channel = StreamChannel::new(mock);
        let err = channel.try_send(&frame).await.unwrap_err();
        assert_eq!(err.to_string(), "failed to send frame to stream: closed");
        assert_eq!(channel.stats().errors, 1);
    }
}
