//! Echo Scheduling Module
//!
//! Broadcast UDP delivery to a controller is unreliable, so every command a
//! user issues on a connectionless channel is sent again three times at fixed
//! offsets after the original transmit: 7, 24 and 53 seconds.
//!
//! # Overview
//!
//! - Echoes copy the original frame byte for byte
//! - The destination is resolved at fire time, so an echo goes to the
//!   controller address once it has been learned and to the broadcast address
//!   while it is unknown
//! - Echoes never schedule further echoes
//! - Pending echoes are kept in one flat list; [`EchoScheduler::cancel_all`]
//!   drops every one of them in a single call and dropping the scheduler does
//!   the same
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use accessctl::datalink::UdpChannel;
//! use accessctl::service::Command;
//! use accessctl::transport::EchoScheduler;
//!
//! # async fn example(channel: Arc<UdpChannel>) -> Result<(), Box<dyn std::error::Error>> {
//! let echoes = EchoScheduler::new();
//! let frame = Command::open_door(1).frame(Some(223_000_123))?;
//! channel.send(&frame).await;
//! echoes.schedule(channel.clone(), frame);
//! # Ok(())
//! # }
//! ```

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};

use crate::datalink::UdpChannel;
use crate::encoding::Frame;

/// Offsets of the echoes from the original transmit
pub const ECHO_OFFSETS: [Duration; 3] = [
    Duration::from_secs(7),
    Duration::from_secs(24),
    Duration::from_secs(53),
];

/// One pending re-transmission
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScheduledEcho {
    pub fire_at: Instant,
    pub frame: Frame,
}

/// Echoes of one original transmit and the task that fires them
struct EchoTask {
    echoes: Arc<Mutex<Vec<ScheduledEcho>>>,
    handle: JoinHandle<()>,
}

/// Scheduler for the fixed echo re-transmissions of one session
pub struct EchoScheduler {
    tasks: Mutex<Vec<EchoTask>>,
    trace: bool,
}

impl Default for EchoScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl EchoScheduler {
    /// Create an empty scheduler that logs every echo it fires
    pub fn new() -> Self {
        Self {
            tasks: Mutex::new(Vec::new()),
            trace: true,
        }
    }

    /// Switch the per-echo log line on or off. Send failures are logged
    /// regardless.
    pub fn with_trace(mut self, trace: bool) -> Self {
        self.trace = trace;
        self
    }

    /// Schedule the echoes of a frame that was just sent on `channel`
    pub fn schedule(&self, channel: Arc<UdpChannel>, frame: Frame) {
        let sent_at = Instant::now();
        let pending: Vec<ScheduledEcho> = ECHO_OFFSETS
            .iter()
            .map(|offset| ScheduledEcho {
                fire_at: sent_at + *offset,
                frame,
            })
            .collect();

        let echoes = Arc::new(Mutex::new(pending.clone()));
        let remaining = echoes.clone();
        let trace = self.trace;
        let handle = tokio::spawn(async move {
            for (n, echo) in pending.into_iter().enumerate() {
                sleep_until(echo.fire_at).await;
                lock(&remaining).retain(|e| e.fire_at != echo.fire_at);
                if trace {
                    log::debug!(
                        "echo {} of function 0x{:02X} for controller {} to {}",
                        n + 1,
                        echo.frame.function(),
                        echo.frame.serial(),
                        channel.destination()
                    );
                }
                channel.record_echo();
                channel.send(&echo.frame).await;
            }
        });

        let mut tasks = lock(&self.tasks);
        tasks.retain(|task| !task.handle.is_finished());
        tasks.push(EchoTask { echoes, handle });
    }

    /// Echoes that have not fired yet, earliest first
    pub fn pending(&self) -> Vec<ScheduledEcho> {
        let tasks = lock(&self.tasks);
        let mut pending: Vec<ScheduledEcho> = tasks
            .iter()
            .filter(|task| !task.handle.is_finished())
            .flat_map(|task| lock(&task.echoes).clone())
            .collect();
        pending.sort_by_key(|echo| echo.fire_at);
        pending
    }

    /// Drop every pending echo
    pub fn cancel_all(&self) {
        for task in lock(&self.tasks).drain(..) {
            task.handle.abort();
        }
    }
}

impl Drop for EchoScheduler {
    fn drop(&mut self) {
        self.cancel_all();
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoding::Payload;
    use std::net::Ipv4Addr;
    use tokio::net::UdpSocket;

    async fn loopback() -> (Arc<UdpChannel>, UdpSocket) {
        let controller = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let port = controller.local_addr().unwrap().port();
        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let channel = UdpChannel::new(socket, port, Some(Ipv4Addr::LOCALHOST));
        (Arc::new(channel), controller)
    }

    #[tokio::test(start_paused = true)]
    async fn test_echo_offsets() {
        let (channel, controller) = loopback().await;
        let scheduler = EchoScheduler::new();
        let frame = Frame::encode(0x40, Some(1), &Payload::Byte(1)).unwrap();

        let start = Instant::now();
        scheduler.schedule(channel.clone(), frame);

        let pending = scheduler.pending();
        assert_eq!(pending.len(), 3);
        let offsets: Vec<u64> = pending
            .iter()
            .map(|e| e.fire_at.duration_since(start).as_secs())
            .collect();
        assert_eq!(offsets, vec![7, 24, 53]);

        let mut buf = [0u8; 64];
        for expected in [7, 24, 53] {
            let (len, _) = controller.recv_from(&mut buf).await.unwrap();
            assert_eq!(&buf[..len], frame.as_bytes());
            assert_eq!(start.elapsed().as_secs(), expected);
        }

        tokio::task::yield_now().await;
        assert!(scheduler.pending().is_empty());
        assert_eq!(channel.stats().retries, 3);
        assert_eq!(channel.stats().messages_sent, 3);
    }

    /// Records log lines so tests can check what was traced
    struct Capture;

    static LINES: Mutex<Vec<String>> = Mutex::new(Vec::new());
    static CAPTURE: Capture = Capture;

    impl log::Log for Capture {
        fn enabled(&self, _: &log::Metadata) -> bool {
            true
        }

        fn log(&self, record: &log::Record) {
            lock(&LINES).push(record.args().to_string());
        }

        fn flush(&self) {}
    }

    fn captured(needle: &str) -> usize {
        lock(&LINES).iter().filter(|line| line.contains(needle)).count()
    }

    #[tokio::test(start_paused = true)]
    async fn test_echo_trace_follows_flag() {
        log::set_logger(&CAPTURE).unwrap();
        log::set_max_level(log::LevelFilter::Trace);

        let (channel, controller) = loopback().await;
        let traced = EchoScheduler::new();
        let quiet = EchoScheduler::new().with_trace(false);

        let frame = |serial| Frame::encode(0x40, Some(serial), &Payload::Byte(1)).unwrap();
        traced.schedule(channel.clone(), frame(917_001));
        quiet.schedule(channel.clone(), frame(917_002));

        let mut buf = [0u8; 64];
        for _ in 0..6 {
            controller.recv_from(&mut buf).await.unwrap();
        }
        tokio::task::yield_now().await;

        assert_eq!(captured("controller 917001"), 3);
        assert_eq!(captured("controller 917002"), 0);
        assert_eq!(channel.stats().retries, 6);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_all() {
        let (channel, _controller) = loopback().await;
        let scheduler = EchoScheduler::new();
        let frame = Frame::encode(0x40, Some(1), &Payload::Byte(1)).unwrap();

        scheduler.schedule(channel.clone(), frame);
        scheduler.schedule(channel.clone(), frame);
        assert_eq!(scheduler.pending().len(), 6);

        scheduler.cancel_all();
        assert!(scheduler.pending().is_empty());

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(channel.stats().messages_sent, 0);
    }
}
