//! Controller Command Catalog
//!
//! This module implements the commands a door controller understands and the
//! typed responses it sends back. Every command is identified by a one-byte
//! function code; the function code selects both the layout of the outbound
//! payload and the schema used to decode the reply.
//!
//! # Overview
//!
//! | Code | Name            | Request payload                                    |
//! |------|-----------------|----------------------------------------------------|
//! | 0x20 | Status          | none (unsolicited event pushed by the controller)   |
//! | 0x30 | SetDate         | 7 byte BCD timestamp                               |
//! | 0x32 | GetDate         | none                                               |
//! | 0x40 | OpenDoor        | door number                                        |
//! | 0x50 | SetAuth         | card, valid from, valid to, door enable flags      |
//! | 0x52 | RemoveAuth      | card                                               |
//! | 0x54 | ClearAuth       | confirmation marker `55 AA AA 55`                  |
//! | 0x5A | GetAuth         | card                                               |
//! | 0x90 | SetServerIp     | ip, port, report interval                          |
//! | 0x92 | GetServerIp     | none                                               |
//! | 0x94 | Search          | none                                               |
//! | 0x96 | SetControllerIp | ip, subnet, gateway, confirmation marker           |
//!
//! # Example
//!
//! ```no_run
//! use accessctl::service::{Command, Response, ResponseBody};
//!
//! let frame = Command::open_door(1).frame(Some(223_000_123)).unwrap();
//! let response = Response::decode(frame.as_bytes()).unwrap();
//! assert!(matches!(response.body, ResponseBody::Ack { .. }));
//! ```

use std::fmt;
use std::net::{Ipv4Addr, SocketAddrV4};

use bitflags::bitflags;
use chrono::{DateTime, FixedOffset, NaiveDate, TimeZone};

use crate::encoding::{
    decode_bcd_date, decode_bcd_datetime, decode_firmware_version, decode_header, format_mac,
    encode_bcd_date, encode_bcd_datetime, Buffer, EncodingError, Frame, Payload, Result,
    BCD_DATE_LEN,
};

/// Confirmation marker required by destructive commands
pub const CONFIRM_MARKER: [u8; 4] = [0x55, 0xAA, 0xAA, 0x55];

/// Function codes of the controller protocol
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum FunctionCode {
    Status = 0x20,
    SetDate = 0x30,
    GetDate = 0x32,
    OpenDoor = 0x40,
    SetAuth = 0x50,
    RemoveAuth = 0x52,
    ClearAuth = 0x54,
    GetAuth = 0x5A,
    SetServerIp = 0x90,
    GetServerIp = 0x92,
    Search = 0x94,
    SetControllerIp = 0x96,
}

/// Shape of the payload a function code expects in an outbound frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestLayout {
    /// Only ever sent by the controller
    Unsolicited,
    /// Payload area stays empty
    Empty,
    /// One byte
    Byte,
    /// A fixed number of bytes
    Fixed(usize),
}

impl FunctionCode {
    /// Every known function code
    pub const ALL: [FunctionCode; 12] = [
        FunctionCode::Status,
        FunctionCode::SetDate,
        FunctionCode::GetDate,
        FunctionCode::OpenDoor,
        FunctionCode::SetAuth,
        FunctionCode::RemoveAuth,
        FunctionCode::ClearAuth,
        FunctionCode::GetAuth,
        FunctionCode::SetServerIp,
        FunctionCode::GetServerIp,
        FunctionCode::Search,
        FunctionCode::SetControllerIp,
    ];

    /// Display name of the function
    pub fn name(self) -> &'static str {
        match self {
            FunctionCode::Status => "Status",
            FunctionCode::SetDate => "SetDate",
            FunctionCode::GetDate => "GetDate",
            FunctionCode::OpenDoor => "OpenDoor",
            FunctionCode::SetAuth => "SetAuth",
            FunctionCode::RemoveAuth => "RemoveAuth",
            FunctionCode::ClearAuth => "ClearAuth",
            FunctionCode::GetAuth => "GetAuth",
            FunctionCode::SetServerIp => "SetServerIp",
            FunctionCode::GetServerIp => "GetServerIp",
            FunctionCode::Search => "Search",
            FunctionCode::SetControllerIp => "SetControllerIp",
        }
    }

    /// Outbound payload layout
    pub fn request_layout(self) -> RequestLayout {
        match self {
            FunctionCode::Status => RequestLayout::Unsolicited,
            FunctionCode::GetDate | FunctionCode::GetServerIp | FunctionCode::Search => {
                RequestLayout::Empty
            }
            FunctionCode::OpenDoor => RequestLayout::Byte,
            FunctionCode::SetDate => RequestLayout::Fixed(BCD_DATE_LEN),
            FunctionCode::SetServerIp => RequestLayout::Fixed(7),
            FunctionCode::RemoveAuth | FunctionCode::ClearAuth | FunctionCode::GetAuth => {
                RequestLayout::Fixed(4)
            }
            FunctionCode::SetAuth | FunctionCode::SetControllerIp => RequestLayout::Fixed(16),
        }
    }
}

impl TryFrom<u8> for FunctionCode {
    type Error = u8;

    fn try_from(value: u8) -> std::result::Result<Self, u8> {
        FunctionCode::ALL
            .into_iter()
            .find(|code| *code as u8 == value)
            .ok_or(value)
    }
}

impl fmt::Display for FunctionCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Display name for a raw function code, `Unknown (0xNN)` when not in the catalog
pub fn function_name(code: u8) -> String {
    match FunctionCode::try_from(code) {
        Ok(function) => function.name().to_string(),
        Err(code) => format!("Unknown (0x{:02X})", code),
    }
}

bitflags! {
    /// Doors a card is allowed to open
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct Doors: u8 {
        const DOOR_1 = 0b0001;
        const DOOR_2 = 0b0010;
        const DOOR_3 = 0b0100;
        const DOOR_4 = 0b1000;
    }
}

impl Doors {
    /// A single door, numbered from 1
    pub fn door(number: u8) -> Option<Doors> {
        match number {
            1..=4 => Doors::from_bits(1 << (number - 1)),
            _ => None,
        }
    }

    /// One enable byte per door, door 1 first
    pub fn enable_bytes(self) -> [u8; 4] {
        let mut flags = [0u8; 4];
        for (i, flag) in flags.iter_mut().enumerate() {
            *flag = u8::from(self.bits() & (1 << i) != 0);
        }
        flags
    }
}

/// A card authorization as written by SetAuth
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuthGrant {
    pub card: u32,
    pub valid_from: NaiveDate,
    pub valid_to: NaiveDate,
    pub doors: Doors,
}

impl AuthGrant {
    /// Grant a card access to every door for the default validity window
    pub fn new(card: u32) -> Self {
        Self {
            card,
            valid_from: NaiveDate::from_ymd_opt(2019, 1, 1).unwrap_or_default(),
            valid_to: NaiveDate::from_ymd_opt(2029, 12, 31).unwrap_or_default(),
            doors: Doors::all(),
        }
    }

    /// Restrict the grant to a single door (1-4)
    pub fn for_door(mut self, door: u8) -> Result<Self> {
        self.doors = Doors::door(door)
            .ok_or_else(|| EncodingError::ValueOutOfRange(format!("door {door} not in 1..=4")))?;
        Ok(self)
    }

    /// Replace the validity window
    pub fn valid_between(mut self, from: NaiveDate, to: NaiveDate) -> Self {
        self.valid_from = from;
        self.valid_to = to;
        self
    }

    fn encode(&self) -> Result<Vec<u8>> {
        let mut payload = Vec::with_capacity(16);
        payload.extend_from_slice(&self.card.to_le_bytes());
        payload.extend_from_slice(&encode_bcd_date(self.valid_from)?);
        payload.extend_from_slice(&encode_bcd_date(self.valid_to)?);
        payload.extend_from_slice(&self.doors.enable_bytes());
        Ok(payload)
    }
}

/// One outbound command: a function code and its payload rule
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    pub function: FunctionCode,
    pub payload: Payload,
}

impl Command {
    /// Create a command from its parts
    pub fn new(function: FunctionCode, payload: Payload) -> Self {
        Self { function, payload }
    }

    /// Ask every controller in the broadcast domain to report its network identity
    pub fn search() -> Self {
        Self::new(FunctionCode::Search, Payload::None)
    }

    /// Pulse the lock of one door
    pub fn open_door(door: u8) -> Self {
        Self::new(FunctionCode::OpenDoor, Payload::Byte(door))
    }

    /// Read the controller clock
    pub fn get_date() -> Self {
        Self::new(FunctionCode::GetDate, Payload::None)
    }

    /// Set the controller clock
    pub fn set_date<Tz: TimeZone>(at: &DateTime<Tz>) -> Result<Self> {
        let bcd = encode_bcd_datetime(at)?;
        Ok(Self::new(FunctionCode::SetDate, Payload::Bytes(bcd.to_vec())))
    }

    /// Write a card authorization
    pub fn set_auth(grant: &AuthGrant) -> Result<Self> {
        Ok(Self::new(FunctionCode::SetAuth, Payload::Bytes(grant.encode()?)))
    }

    /// Look up a card authorization
    pub fn get_auth(card: u32) -> Self {
        Self::new(FunctionCode::GetAuth, Payload::Bytes(card.to_le_bytes().to_vec()))
    }

    /// Remove a card authorization
    pub fn remove_auth(card: u32) -> Self {
        Self::new(FunctionCode::RemoveAuth, Payload::Bytes(card.to_le_bytes().to_vec()))
    }

    /// Remove every card authorization
    pub fn clear_auth() -> Self {
        Self::new(FunctionCode::ClearAuth, Payload::Bytes(CONFIRM_MARKER.to_vec()))
    }

    /// Register the server that receives status events
    pub fn set_server_address(server: SocketAddrV4, interval: u8) -> Self {
        let mut payload = Vec::with_capacity(7);
        payload.extend_from_slice(&server.ip().octets());
        payload.extend_from_slice(&server.port().to_le_bytes());
        payload.push(interval);
        Self::new(FunctionCode::SetServerIp, Payload::Bytes(payload))
    }

    /// Read the registered event server
    pub fn get_server_address() -> Self {
        Self::new(FunctionCode::GetServerIp, Payload::None)
    }

    /// Reassign the controller's own network identity
    pub fn set_controller_address(ip: Ipv4Addr, subnet: Ipv4Addr, gateway: Ipv4Addr) -> Self {
        let mut payload = Vec::with_capacity(16);
        payload.extend_from_slice(&ip.octets());
        payload.extend_from_slice(&subnet.octets());
        payload.extend_from_slice(&gateway.octets());
        payload.extend_from_slice(&CONFIRM_MARKER);
        Self::new(FunctionCode::SetControllerIp, Payload::Bytes(payload))
    }

    /// Encode into a frame addressed to `serial`, or to all controllers.
    ///
    /// The payload must match the function's [`RequestLayout`]; inbound-only
    /// functions cannot be sent.
    pub fn frame(&self, serial: Option<u32>) -> Result<Frame> {
        let bytes = self.payload.to_bytes()?;
        let fits = match self.function.request_layout() {
            RequestLayout::Unsolicited => false,
            RequestLayout::Empty => bytes.is_empty(),
            RequestLayout::Byte => bytes.len() == 1,
            RequestLayout::Fixed(n) => bytes.len() == n,
        };
        if !fits {
            return Err(EncodingError::ValueOutOfRange(format!(
                "{} does not take a {} byte payload",
                self.function,
                bytes.len()
            )));
        }

        Frame::encode(self.function as u8, serial, &Payload::Bytes(bytes))
    }
}

/// Kind of an unsolicited status event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum EventKind {
    None,
    Card,
    Open,
    Alert,
    Other(u8),
}

impl From<u8> for EventKind {
    fn from(value: u8) -> Self {
        match value {
            0 => EventKind::None,
            1 => EventKind::Card,
            2 => EventKind::Open,
            3 => EventKind::Alert,
            other => EventKind::Other(other),
        }
    }
}

/// Which side of the door an event happened on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Direction {
    In,
    Out,
}

/// Status event pushed by the controller (0x20)
#[derive(Debug, Clone, PartialEq)]
pub struct StatusEvent {
    pub index: u32,
    pub kind: EventKind,
    pub allowed: bool,
    pub door: u8,
    pub direction: Direction,
    pub card: u32,
    pub time: Option<DateTime<FixedOffset>>,
}

/// Card authorization read back with GetAuth
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthRecord {
    /// `None` when the card is not authorized
    pub card: Option<u32>,
    pub valid_from: Option<NaiveDate>,
    pub valid_to: Option<NaiveDate>,
}

/// Event server registration read back with GetServerIp
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerAddress {
    pub ip: Ipv4Addr,
    pub port: u16,
    pub interval: u8,
}

/// Network identity of a controller, answered to Search
#[derive(Debug, Clone, PartialEq)]
pub struct SearchReply {
    pub ip: Ipv4Addr,
    pub subnet: Ipv4Addr,
    pub gateway: Ipv4Addr,
    pub mac: String,
    pub version: Option<f64>,
    pub release: String,
}

/// Network identity confirmed by SetControllerIp
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkAddress {
    pub ip: Ipv4Addr,
    pub subnet: Ipv4Addr,
    pub gateway: Ipv4Addr,
}

/// Typed payload of an inbound frame
#[derive(Debug, Clone, PartialEq)]
pub enum ResponseBody {
    Status(StatusEvent),
    /// Controller clock, answered to GetDate and SetDate
    Date(Option<DateTime<FixedOffset>>),
    /// Result flag of a command without data
    Ack { success: bool },
    Auth(AuthRecord),
    ServerAddress(ServerAddress),
    Search(SearchReply),
    NetworkAddress(NetworkAddress),
    /// Function code without a schema, or a payload too short for its schema
    Unknown { payload: Vec<u8> },
}

/// A decoded inbound frame
#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    pub function: u8,
    pub serial: u32,
    pub body: ResponseBody,
}

impl Response {
    /// Decode an inbound frame.
    ///
    /// Only a datagram shorter than the 8 byte header is an error. Unknown
    /// function codes and truncated payloads decode to
    /// [`ResponseBody::Unknown`] carrying the raw payload.
    pub fn decode(data: &[u8]) -> Result<Self> {
        let (header, payload) = decode_header(data)?;

        let body = FunctionCode::try_from(header.function)
            .ok()
            .and_then(|function| decode_body(function, payload))
            .unwrap_or_else(|| ResponseBody::Unknown {
                payload: payload.to_vec(),
            });

        Ok(Self {
            function: header.function,
            serial: header.serial,
            body,
        })
    }

    /// Function code if it is part of the catalog
    pub fn function_code(&self) -> Option<FunctionCode> {
        FunctionCode::try_from(self.function).ok()
    }

    /// Display name of the function
    pub fn function_name(&self) -> String {
        function_name(self.function)
    }

    /// Search reply carried by this frame, if any.
    ///
    /// A Search request heard on the broadcast domain decodes with an
    /// all-zero identity; only frames carrying a usable unicast address
    /// count as replies.
    pub fn search_reply(&self) -> Option<&SearchReply> {
        match (&self.body, self.function_code()) {
            (ResponseBody::Search(reply), Some(FunctionCode::Search))
                if !reply.ip.is_unspecified() && !reply.ip.is_broadcast() =>
            {
                Some(reply)
            }
            _ => None,
        }
    }
}

fn decode_body(function: FunctionCode, payload: &[u8]) -> Option<ResponseBody> {
    let mut buf = Buffer::new(payload);

    let body = match function {
        FunctionCode::Status => {
            let index = buf.read_u32()?;
            let kind = EventKind::from(buf.read_u8()?);
            let allowed = buf.read_u8()? != 0;
            let door = buf.read_u8()?;
            let direction = if buf.read_u8()? == 1 {
                Direction::In
            } else {
                Direction::Out
            };
            let card = buf.read_u32()?;
            let time = decode_bcd_datetime(buf.read_bytes(BCD_DATE_LEN)?);
            ResponseBody::Status(StatusEvent {
                index,
                kind,
                allowed,
                door,
                direction,
                card,
                time,
            })
        }
        FunctionCode::GetDate | FunctionCode::SetDate => {
            ResponseBody::Date(decode_bcd_datetime(buf.read_bytes(BCD_DATE_LEN)?))
        }
        FunctionCode::OpenDoor
        | FunctionCode::SetAuth
        | FunctionCode::RemoveAuth
        | FunctionCode::ClearAuth
        | FunctionCode::SetServerIp => ResponseBody::Ack {
            success: buf.read_u8()? != 0,
        },
        FunctionCode::GetAuth => {
            let card = buf.read_u32()?;
            ResponseBody::Auth(AuthRecord {
                card: (card != 0).then_some(card),
                valid_from: decode_bcd_date(buf.read_bytes(4)?),
                valid_to: decode_bcd_date(buf.read_bytes(4)?),
            })
        }
        FunctionCode::GetServerIp => ResponseBody::ServerAddress(ServerAddress {
            ip: buf.read_ipv4()?,
            port: buf.read_u16()?,
            interval: buf.read_u8()?,
        }),
        FunctionCode::Search => ResponseBody::Search(SearchReply {
            ip: buf.read_ipv4()?,
            subnet: buf.read_ipv4()?,
            gateway: buf.read_ipv4()?,
            mac: format_mac(buf.read_bytes(6)?),
            version: decode_firmware_version(buf.read_bytes(2)?),
            release: hex::encode(buf.read_bytes(4)?),
        }),
        FunctionCode::SetControllerIp => ResponseBody::NetworkAddress(NetworkAddress {
            ip: buf.read_ipv4()?,
            subnet: buf.read_ipv4()?,
            gateway: buf.read_ipv4()?,
        }),
    };

    Some(body)
}
