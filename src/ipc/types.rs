/*!
 * IPC Types
 * Messages, pulse codes and receive events
 */

use crate::core::limits::MESSAGE_HEADER_SIZE;
use crate::core::types::RcvId;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Fixed-size message header, opaque to the transport
///
/// The first two bytes are read as a little-endian message type only to
/// recognise device-protocol framing; everything else belongs to the
/// application protocol.
#[derive(Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageHeader(pub [u8; MESSAGE_HEADER_SIZE]);

impl MessageHeader {
    #[must_use]
    pub const fn zeroed() -> Self {
        Self([0u8; MESSAGE_HEADER_SIZE])
    }

    /// Header whose leading type field is `msg_type`
    #[must_use]
    pub fn with_type(msg_type: u16) -> Self {
        let mut header = Self::zeroed();
        header.0[..2].copy_from_slice(&msg_type.to_le_bytes());
        header
    }

    #[inline]
    #[must_use]
    pub fn msg_type(&self) -> u16 {
        u16::from_le_bytes([self.0[0], self.0[1]])
    }

    #[inline]
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Build from up to `MESSAGE_HEADER_SIZE` bytes, zero padded
    #[must_use]
    pub fn from_slice(bytes: &[u8]) -> Self {
        let mut header = Self::zeroed();
        let len = bytes.len().min(MESSAGE_HEADER_SIZE);
        header.0[..len].copy_from_slice(&bytes[..len]);
        header
    }
}

impl fmt::Debug for MessageHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MessageHeader")
            .field("msg_type", &format_args!("0x{:04x}", self.msg_type()))
            .finish()
    }
}

/// IPC message: fixed header plus payload
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Message {
    pub header: MessageHeader,
    pub payload: Vec<u8>,
}

impl Message {
    #[inline]
    #[must_use]
    pub fn new(payload: Vec<u8>) -> Self {
        Self {
            header: MessageHeader::zeroed(),
            payload,
        }
    }

    #[inline]
    #[must_use]
    pub fn with_header(header: MessageHeader, payload: Vec<u8>) -> Self {
        Self { header, payload }
    }

    /// Empty message, used for bare-status replies
    #[inline]
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// Payload length in bytes
    #[inline(always)]
    #[must_use]
    pub fn len(&self) -> usize {
        self.payload.len()
    }

    #[inline(always)]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }
}

/// Reason a pulse was delivered
///
/// Negative raw codes are generated by the kernel itself; positive ones by
/// pulse sources in this layer. Unknown codes are kept as `Other`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PulseCode {
    /// Last client connection to the channel went away
    Disconnect,
    /// A reply-blocked client gave up waiting
    Unblock,
    /// A server this process was connected to died
    CoidDeath,
    Timed,
    Interprocess,
    Intraprocess,
    MqueueEmpty,
    Event,
    Get,
    Set,
    Other(i8),
}

impl PulseCode {
    pub const RAW_UNBLOCK: i8 = -32;
    pub const RAW_DISCONNECT: i8 = -33;
    pub const RAW_COIDDEATH: i8 = -35;

    #[must_use]
    pub const fn from_raw(raw: i8) -> Self {
        match raw {
            Self::RAW_DISCONNECT => PulseCode::Disconnect,
            Self::RAW_UNBLOCK => PulseCode::Unblock,
            Self::RAW_COIDDEATH => PulseCode::CoidDeath,
            1 => PulseCode::Timed,
            2 => PulseCode::Interprocess,
            3 => PulseCode::Intraprocess,
            4 => PulseCode::MqueueEmpty,
            5 => PulseCode::Event,
            6 => PulseCode::Get,
            7 => PulseCode::Set,
            other => PulseCode::Other(other),
        }
    }

    #[must_use]
    pub const fn raw(self) -> i8 {
        match self {
            PulseCode::Disconnect => Self::RAW_DISCONNECT,
            PulseCode::Unblock => Self::RAW_UNBLOCK,
            PulseCode::CoidDeath => Self::RAW_COIDDEATH,
            PulseCode::Timed => 1,
            PulseCode::Interprocess => 2,
            PulseCode::Intraprocess => 3,
            PulseCode::MqueueEmpty => 4,
            PulseCode::Event => 5,
            PulseCode::Get => 6,
            PulseCode::Set => 7,
            PulseCode::Other(raw) => raw,
        }
    }

    /// Generated by the kernel rather than an application pulse source
    #[must_use]
    pub const fn is_system(self) -> bool {
        self.raw() < 0
    }

    /// Whether an application may send this code
    ///
    /// `Other` only counts when no named variant owns its raw value, so the
    /// receiver decodes exactly what was sent.
    #[must_use]
    pub const fn is_user_code(self) -> bool {
        if self.is_system() {
            return false;
        }
        match self {
            PulseCode::Other(raw) => matches!(PulseCode::from_raw(raw), PulseCode::Other(_)),
            _ => true,
        }
    }
}

/// What woke a `receive`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Pulse { code: PulseCode, sender_value: i32 },
    Message(Message),
}

/// Where the answer to a received event goes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReplyHandle {
    /// Reply-blocked sender
    Message(RcvId),
    /// Pulse source; pulses carry no reply, this only names the sender
    Pulse(i32),
}
