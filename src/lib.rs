#![doc = include_str!("../README.md")]

pub mod client;
pub mod datalink;
pub mod encoding;
pub mod network;
pub mod service;
pub mod transport;
pub mod util;

// Re-export main types without glob imports to avoid conflicts
pub use client::{ClientConfig, ClientError, ControllerClient};
pub use datalink::{DataLinkError, Destination, StreamChannel, TransportChannel, UdpChannel};
pub use encoding::{EncodingError, Frame, Payload};
pub use network::{DiscoveryHandle, DiscoveryState};
pub use service::{AuthGrant, Command, Doors, FunctionCode, Response, ResponseBody};

pub const FRAME_SIZE: usize = encoding::FRAME_SIZE;
pub const DEFAULT_CONTROLLER_PORT: u16 = datalink::CONTROLLER_PORT;
