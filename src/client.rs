//! Controller Client
//!
//! This module provides the session object used to talk to one door
//! controller: typed operations (open a door, manage card authorizations,
//! read and set the clock, manage network settings), inbound frame dispatch
//! and address discovery.
//!
//! # Overview
//!
//! A [`ControllerClient`] owns
//! - the target serial (`None` addresses every controller that hears a frame)
//! - one [`TransportChannel`], chosen at construction
//! - the [`DiscoveryCoordinator`] of the current discovery attempt
//! - the [`EchoScheduler`] that re-sends user commands on UDP
//!
//! Operations are fire-and-forget: they return once the frame has been handed
//! to the network. Replies arrive asynchronously and are fed back through
//! [`ControllerClient::handle_frame`], either by the caller's own receive loop
//! or by [`ControllerClient::spawn_receiver`] (UDP) and
//! [`ControllerClient::spawn_stream_receiver`] (stream read half).
//!
//! # Example
//!
//! ```no_run
//! use std::time::Duration;
//! use accessctl::client::{ClientConfig, ControllerClient};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let socket = tokio::net::UdpSocket::bind("0.0.0.0:60001").await?;
//! let client = std::sync::Arc::new(ControllerClient::connectionless(
//!     socket,
//!     Some(223_000_123),
//!     None,
//!     ClientConfig::default(),
//! )?);
//! client.spawn_receiver(|response| println!("{response:?}"));
//!
//! let found = client.discover().await?;
//! if let Ok(Some(ip)) = tokio::time::timeout(Duration::from_secs(5), found.resolved()).await {
//!     println!("controller at {ip}");
//!     client.open_door(1).await?;
//! }
//! # Ok(())
//! # }
//! ```

use std::net::{Ipv4Addr, SocketAddrV4};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use bytes::BytesMut;
use chrono::{DateTime, TimeZone, Utc};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::net::UdpSocket;
use tokio::task::JoinHandle;
use tokio_util::codec::Decoder;

use crate::datalink::{TransportChannel, UdpChannel, CONTROLLER_PORT};
use crate::encoding::codec::FrameCodec;
use crate::encoding::{EncodingError, FRAME_SIZE};
use crate::network::{DiscoveryCoordinator, DiscoveryHandle, DiscoveryState};
use crate::service::{AuthGrant, Command, FunctionCode, Response};
use crate::transport::{EchoScheduler, ScheduledEcho};
use crate::util::{debug, hex_dump};

/// Result type for client operations
pub type Result<T> = std::result::Result<T, ClientError>;

/// Errors returned by client operations
#[derive(Debug, Error)]
pub enum ClientError {
    /// The command could not be encoded; nothing was sent
    #[error(transparent)]
    Encoding(#[from] EncodingError),
    /// The configuration does not fit the channel
    #[error("configuration error: {0}")]
    Config(String),
}

/// Session options
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct ClientConfig {
    /// Suppress the per-frame trace
    pub hide_log: bool,
    /// Do not echo user commands on UDP
    pub disable_echo: bool,
    /// UDP port the controller listens on
    pub controller_port: u16,
    /// Event server registered with the controller once its address is
    /// learned. UDP sessions only.
    pub callback_server: Option<SocketAddrV4>,
    /// Status report interval in seconds sent with the event server
    pub report_interval: u8,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            hide_log: false,
            disable_echo: false,
            controller_port: CONTROLLER_PORT,
            callback_server: None,
            report_interval: 0,
        }
    }
}

impl ClientConfig {
    /// Defaults, with `WGC_HIDE_LOG` and `WGC_DISABLE_ECHO` switched on by
    /// any non-empty value
    pub fn from_env() -> Self {
        let flag = |name: &str| std::env::var_os(name).is_some_and(|v| !v.is_empty());
        Self {
            hide_log: flag("WGC_HIDE_LOG"),
            disable_echo: flag("WGC_DISABLE_ECHO"),
            ..Self::default()
        }
    }
}

/// Session with one door controller
pub struct ControllerClient {
    serial: Option<u32>,
    channel: TransportChannel,
    config: ClientConfig,
    discovery: Mutex<DiscoveryCoordinator>,
    echoes: EchoScheduler,
}

impl ControllerClient {
    /// Create a session on an existing channel.
    ///
    /// A serial of zero is treated as no serial: frames address every
    /// controller and discovery is not possible. The controller address of a
    /// UDP channel, when already set, is taken as known.
    pub fn new(
        channel: impl Into<TransportChannel>,
        serial: Option<u32>,
        config: ClientConfig,
    ) -> Result<Self> {
        let channel = channel.into();
        if config.callback_server.is_some() && !channel.is_connectionless() {
            return Err(ClientError::Config(
                "an event server can only be registered on a UDP session".into(),
            ));
        }

        let serial = serial.filter(|serial| *serial != 0);
        let known = channel.udp().and_then(|udp| udp.address());
        let echoes = EchoScheduler::new().with_trace(!config.hide_log);

        Ok(Self {
            serial,
            channel,
            config,
            discovery: Mutex::new(DiscoveryCoordinator::new(serial, known)),
            echoes,
        })
    }

    /// Create a UDP session on a bound socket. `address` is the controller
    /// address when already known.
    pub fn connectionless(
        socket: UdpSocket,
        serial: Option<u32>,
        address: Option<Ipv4Addr>,
        config: ClientConfig,
    ) -> Result<Self> {
        let channel = UdpChannel::new(socket, config.controller_port, address);
        Self::new(channel, serial, config)
    }

    /// Target serial
    pub fn serial(&self) -> Option<u32> {
        self.serial
    }

    /// Session options
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Delivery channel
    pub fn channel(&self) -> &TransportChannel {
        &self.channel
    }

    /// Known controller address
    pub fn address(&self) -> Option<Ipv4Addr> {
        match self.channel.udp() {
            Some(udp) => udp.address(),
            None => self.lock_discovery().resolved(),
        }
    }

    /// State of the current discovery attempt
    pub fn discovery_state(&self) -> DiscoveryState {
        self.lock_discovery().state()
    }

    /// Result of the current discovery attempt, without starting it
    pub fn discovery(&self) -> DiscoveryHandle {
        self.lock_discovery().handle()
    }

    /// Echoes that have not fired yet
    pub fn pending_echoes(&self) -> Vec<ScheduledEcho> {
        self.echoes.pending()
    }

    /// Start discovery if it has not started and return its result.
    ///
    /// Resolves immediately when the address is already known.
    pub async fn discover(&self) -> Result<DiscoveryHandle> {
        self.start_discovery(self.echo_enabled()).await
    }

    /// Decode and dispatch one inbound datagram.
    ///
    /// Search replies are offered to discovery; every decoded frame is
    /// returned for the caller's own handling. Datagrams too short to carry
    /// a header are dropped.
    pub async fn handle_frame(&self, data: &[u8]) -> Option<Response> {
        let response = match Response::decode(data) {
            Ok(response) => response,
            Err(e) => {
                log::debug!("dropping inbound datagram: {e}");
                return None;
            }
        };

        if !self.config.hide_log {
            log::debug!(
                "[WGC] Received {} from controller {}",
                response.function_name(),
                response.serial
            );
            if log::log_enabled!(log::Level::Trace) {
                log::trace!("inbound frame:\n{}", hex_dump(data, "  "));
            }
        }

        let learned = self.lock_discovery().offer(&response);
        if let Some(ip) = learned {
            self.address_learned(ip).await;
        }

        Some(response)
    }

    /// Read the UDP socket in a background task, dispatching every datagram
    /// through [`Self::handle_frame`] and passing the result to `handler`.
    ///
    /// Returns `None` on connection-oriented sessions, whose read side is
    /// owned by the caller. The task ends when the session is dropped or the
    /// socket fails.
    pub fn spawn_receiver<F>(self: &Arc<Self>, mut handler: F) -> Option<JoinHandle<()>>
    where
        F: FnMut(Response) + Send + 'static,
    {
        let udp = self.channel.udp()?.clone();
        let session = Arc::downgrade(self);

        Some(tokio::spawn(async move {
            let mut buf = [0u8; 2 * FRAME_SIZE];
            loop {
                let len = match udp.recv_from(&mut buf).await {
                    Ok((len, _)) => len,
                    Err(e) => {
                        log::error!("receive loop stopped: {e}");
                        break;
                    }
                };

                let Some(client) = session.upgrade() else {
                    break;
                };
                if let Some(response) = client.handle_frame(&buf[..len]).await {
                    handler(response);
                }
            }
        }))
    }

    /// Read 64-byte frames from the read side of a stream in a background
    /// task, dispatching each through [`Self::handle_frame`].
    ///
    /// The task ends at end of stream, on a read error or when the session
    /// is dropped.
    pub fn spawn_stream_receiver<R, F>(self: &Arc<Self>, mut reader: R, mut handler: F) -> JoinHandle<()>
    where
        R: AsyncRead + Send + Unpin + 'static,
        F: FnMut(Response) + Send + 'static,
    {
        let session = Arc::downgrade(self);

        tokio::spawn(async move {
            let mut codec = FrameCodec::new();
            let mut buf = BytesMut::with_capacity(4 * FRAME_SIZE);
            loop {
                match reader.read_buf(&mut buf).await {
                    Ok(0) => {
                        log::debug!("stream closed by peer");
                        break;
                    }
                    Ok(_) => {}
                    Err(e) => {
                        log::error!("receive loop stopped: {e}");
                        break;
                    }
                }

                while let Ok(Some(frame)) = codec.decode(&mut buf) {
                    let Some(client) = session.upgrade() else {
                        return;
                    };
                    if let Some(response) = client.handle_frame(frame.as_bytes()).await {
                        handler(response);
                    }
                }
            }
        })
    }

    /// Broadcast-capable search; also starts discovery when the address is
    /// unknown
    pub async fn search(&self) -> Result<()> {
        self.submit(Command::search()).await
    }

    /// Query the controller network settings; answered by a Search reply
    pub async fn get_address(&self) -> Result<()> {
        self.search().await
    }

    /// Pulse the lock of one door
    pub async fn open_door(&self, door: u8) -> Result<()> {
        self.submit(Command::open_door(door)).await
    }

    /// Read the controller clock
    pub async fn get_date(&self) -> Result<()> {
        self.submit(Command::get_date()).await
    }

    /// Set the controller clock
    pub async fn set_date<Tz: TimeZone>(&self, at: &DateTime<Tz>) -> Result<()> {
        let command = Command::set_date(at)?;
        self.submit(command).await
    }

    /// Set the controller clock to now
    pub async fn sync_date(&self) -> Result<()> {
        self.set_date(&Utc::now()).await
    }

    /// Authorize a card for one door, or for every door when `door` is `None`
    pub async fn set_auth(&self, card: u32, door: Option<u8>) -> Result<()> {
        let mut grant = AuthGrant::new(card);
        if let Some(door) = door {
            grant = grant.for_door(door)?;
        }
        self.set_auth_with(&grant).await
    }

    /// Write a fully specified card authorization
    pub async fn set_auth_with(&self, grant: &AuthGrant) -> Result<()> {
        let command = Command::set_auth(grant)?;
        self.submit(command).await
    }

    /// Look up a card authorization
    pub async fn get_auth(&self, card: u32) -> Result<()> {
        self.submit(Command::get_auth(card)).await
    }

    /// Remove a card authorization
    pub async fn remove_auth(&self, card: u32) -> Result<()> {
        self.submit(Command::remove_auth(card)).await
    }

    /// Remove every card authorization
    pub async fn clear_auth(&self) -> Result<()> {
        self.submit(Command::clear_auth()).await
    }

    /// Register the event server
    pub async fn set_server_address(&self, server: SocketAddrV4, interval: u8) -> Result<()> {
        self.submit(Command::set_server_address(server, interval)).await
    }

    /// Read the registered event server
    pub async fn get_server_address(&self) -> Result<()> {
        self.submit(Command::get_server_address()).await
    }

    /// Reassign the controller's network identity.
    ///
    /// The old address is forgotten and a fresh discovery starts; its result
    /// is returned.
    pub async fn set_address(
        &self,
        ip: Ipv4Addr,
        subnet: Ipv4Addr,
        gateway: Ipv4Addr,
    ) -> Result<DiscoveryHandle> {
        self.submit(Command::set_controller_address(ip, subnet, gateway))
            .await?;

        if let Some(udp) = self.channel.udp() {
            udp.set_address(None);
        }
        *self.lock_discovery() = DiscoveryCoordinator::new(self.serial, None);

        self.start_discovery(false).await
    }

    async fn start_discovery(&self, echo: bool) -> Result<DiscoveryHandle> {
        let (handle, begin) = {
            let mut discovery = self.lock_discovery();
            (discovery.handle(), discovery.begin())
        };

        if begin {
            self.transmit(&Command::search(), echo).await?;
        }
        Ok(handle)
    }

    /// Send a user-issued command: echoed on UDP, and preceded by a
    /// discovery search while the address is unknown
    async fn submit(&self, command: Command) -> Result<()> {
        let starts_discovery = self.channel.is_connectionless() && self.lock_discovery().begin();
        if starts_discovery && command.function != FunctionCode::Search {
            self.transmit(&Command::search(), false).await?;
        }

        self.transmit(&command, self.echo_enabled()).await
    }

    async fn transmit(&self, command: &Command, echo: bool) -> Result<()> {
        let frame = command.frame(self.serial)?;

        if !self.config.hide_log {
            let payload = command.payload.to_bytes()?;
            log::info!("[WGC] {}", debug::describe_frame(&frame, &payload));
            if let Some(udp) = self.channel.udp() {
                log::info!("[WGC] Sending local data to {}.", udp.destination());
            }
            if log::log_enabled!(log::Level::Trace) {
                log::trace!("outbound frame:\n{}", hex_dump(frame.as_bytes(), "  "));
            }
        }

        self.channel.send(&frame).await;

        if echo {
            if let Some(udp) = self.channel.udp() {
                self.echoes.schedule(udp.clone(), frame);
            }
        }
        Ok(())
    }

    async fn address_learned(&self, ip: Ipv4Addr) {
        log::info!(
            "controller {} found at {ip}",
            self.serial.unwrap_or_default()
        );

        let Some(udp) = self.channel.udp() else {
            return;
        };
        udp.set_address(Some(ip));

        if let Some(server) = self.config.callback_server {
            let register = Command::set_server_address(server, self.config.report_interval);
            if let Err(e) = self.transmit(&register, false).await {
                log::warn!("event server registration not sent: {e}");
            }
        }
    }

    fn echo_enabled(&self) -> bool {
        !self.config.disable_echo && self.channel.is_connectionless()
    }

    fn lock_discovery(&self) -> MutexGuard<'_, DiscoveryCoordinator> {
        self.discovery.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
