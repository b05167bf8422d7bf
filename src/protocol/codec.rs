//! MQTT 3.1.1 control packet codec
//!
//! Pure functions with no I/O and no state. Encoders write into a caller-owned
//! [`PacketBuffer`] and return the encoded packet as a slice of it; a packet
//! that would not fit is rejected before anything is written.
//!
//! Only the packets a QoS 0 publisher needs are covered: CONNECT, PUBLISH and
//! PINGREQ outbound, CONNACK and PINGRESP inbound.

use super::buffer::PacketBuffer;
use thiserror::Error;

/// Largest value representable by the four-byte remaining-length field
pub const MAX_REMAINING_LENGTH: u32 = 268_435_455;

/// Protocol name carried in the CONNECT variable header
pub const PROTOCOL_NAME: &str = "MQTT";

/// Protocol level for MQTT 3.1.1
pub const PROTOCOL_LEVEL: u8 = 0x04;

/// Username + password + clean session
pub const CONNECT_FLAGS: u8 = 0xC2;

/// Fixed PINGREQ packet
pub const PINGREQ_PACKET: [u8; 2] = [0xC0, 0x00];

/// Length of a well-formed CONNACK
pub const CONNACK_LEN: usize = 4;

// Protocol name (2 + 4) + level (1) + flags (1) + keep-alive (2)
const CONNECT_VARIABLE_HEADER_LEN: usize = 10;

/// Control packet types used by this client
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketType {
    Connect = 1,
    ConnAck = 2,
    Publish = 3,
    PingReq = 12,
    PingResp = 13,
    Disconnect = 14,
}

impl PacketType {
    /// Fixed-header first byte with all flag bits cleared
    pub const fn header_byte(self) -> u8 {
        (self as u8) << 4
    }

    pub fn from_header_byte(byte: u8) -> Option<Self> {
        match byte >> 4 {
            1 => Some(PacketType::Connect),
            2 => Some(PacketType::ConnAck),
            3 => Some(PacketType::Publish),
            12 => Some(PacketType::PingReq),
            13 => Some(PacketType::PingResp),
            14 => Some(PacketType::Disconnect),
            _ => None,
        }
    }
}

/// Codec failures
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodecError {
    #[error("packet needs {required} bytes but buffer capacity is {capacity}")]
    BufferCapacityExceeded { required: usize, capacity: usize },
    #[error("remaining length {0} exceeds the MQTT maximum of 268435455")]
    RemainingLengthTooLarge(usize),
    #[error("string of {length} bytes exceeds the 65535 byte MQTT limit")]
    StringTooLong { length: usize },
    #[error("remaining length field is longer than four bytes")]
    MalformedRemainingLength,
    #[error("packet is truncated")]
    IncompletePacket,
}

/// Encoded remaining-length field, one to four bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VariableLength {
    bytes: [u8; 4],
    len: usize,
}

impl VariableLength {
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes[..self.len]
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

/// Number of bytes the remaining-length encoding of `value` occupies
pub const fn variable_length_size(value: usize) -> usize {
    if value < 128 {
        1
    } else if value < 16_384 {
        2
    } else if value < 2_097_152 {
        3
    } else {
        4
    }
}

/// Encode `value` as an MQTT remaining length: base-128 digits, least
/// significant first, continuation bit set on every digit but the last
pub fn encode_variable_length(value: usize) -> Result<VariableLength, CodecError> {
    if value > MAX_REMAINING_LENGTH as usize {
        return Err(CodecError::RemainingLengthTooLarge(value));
    }

    let mut bytes = [0u8; 4];
    let mut len = 0;
    let mut remaining = value;

    loop {
        let mut digit = (remaining % 128) as u8;
        remaining /= 128;
        if remaining > 0 {
            digit |= 0x80;
        }
        bytes[len] = digit;
        len += 1;
        if remaining == 0 {
            break;
        }
    }

    Ok(VariableLength { bytes, len })
}

/// Decode a remaining-length field from the start of `bytes`
///
/// Returns the value and the number of bytes consumed.
pub fn decode_variable_length(bytes: &[u8]) -> Result<(usize, usize), CodecError> {
    let mut value = 0usize;
    let mut multiplier = 1usize;

    for (index, &byte) in bytes.iter().enumerate() {
        if index == 4 {
            return Err(CodecError::MalformedRemainingLength);
        }
        value += (byte & 0x7F) as usize * multiplier;
        if byte & 0x80 == 0 {
            return Ok((value, index + 1));
        }
        multiplier *= 128;
    }

    if bytes.len() >= 4 {
        Err(CodecError::MalformedRemainingLength)
    } else {
        Err(CodecError::IncompletePacket)
    }
}

fn checked_str_len(value: &str) -> Result<usize, CodecError> {
    if value.len() > u16::MAX as usize {
        return Err(CodecError::StringTooLong {
            length: value.len(),
        });
    }
    Ok(2 + value.len())
}

/// Write the fixed header after verifying the whole packet fits
fn begin_packet(
    buffer: &mut PacketBuffer,
    header: u8,
    remaining: usize,
) -> Result<(), CodecError> {
    let length = encode_variable_length(remaining)?;
    buffer.clear();
    buffer.ensure_fits(1 + length.len() + remaining)?;
    buffer.put_u8(header)?;
    buffer.put_slice(length.as_bytes())
}

/// Encode a CONNECT packet with username, password and clean session set
pub fn encode_connect<'a>(
    buffer: &'a mut PacketBuffer,
    client_id: &str,
    username: &str,
    password: &str,
    keep_alive_secs: u16,
) -> Result<&'a [u8], CodecError> {
    let remaining = CONNECT_VARIABLE_HEADER_LEN
        + checked_str_len(client_id)?
        + checked_str_len(username)?
        + checked_str_len(password)?;

    begin_packet(buffer, PacketType::Connect.header_byte(), remaining)?;
    buffer.put_str(PROTOCOL_NAME)?;
    buffer.put_u8(PROTOCOL_LEVEL)?;
    buffer.put_u8(CONNECT_FLAGS)?;
    buffer.put_u16(keep_alive_secs)?;
    buffer.put_str(client_id)?;
    buffer.put_str(username)?;
    buffer.put_str(password)?;

    Ok(buffer.as_slice())
}

/// Encode a QoS 0 PUBLISH (no DUP, no RETAIN, no packet identifier)
pub fn encode_publish<'a>(
    buffer: &'a mut PacketBuffer,
    topic: &str,
    payload: &[u8],
) -> Result<&'a [u8], CodecError> {
    let remaining = checked_str_len(topic)? + payload.len();

    begin_packet(buffer, PacketType::Publish.header_byte(), remaining)?;
    buffer.put_str(topic)?;
    buffer.put_slice(payload)?;

    Ok(buffer.as_slice())
}

/// Encode the two-byte PINGREQ
pub fn encode_pingreq(buffer: &mut PacketBuffer) -> Result<&[u8], CodecError> {
    buffer.clear();
    buffer.ensure_fits(PINGREQ_PACKET.len())?;
    buffer.put_slice(&PINGREQ_PACKET)?;
    Ok(buffer.as_slice())
}

/// CONNACK return codes defined by MQTT 3.1.1
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectReturnCode {
    Accepted = 0,
    UnacceptableProtocolVersion = 1,
    IdentifierRejected = 2,
    ServerUnavailable = 3,
    BadUserNameOrPassword = 4,
    NotAuthorized = 5,
}

impl ConnectReturnCode {
    pub fn from_byte(code: u8) -> Option<Self> {
        match code {
            0 => Some(ConnectReturnCode::Accepted),
            1 => Some(ConnectReturnCode::UnacceptableProtocolVersion),
            2 => Some(ConnectReturnCode::IdentifierRejected),
            3 => Some(ConnectReturnCode::ServerUnavailable),
            4 => Some(ConnectReturnCode::BadUserNameOrPassword),
            5 => Some(ConnectReturnCode::NotAuthorized),
            _ => None,
        }
    }

    pub fn description(self) -> &'static str {
        match self {
            ConnectReturnCode::Accepted => "connection accepted",
            ConnectReturnCode::UnacceptableProtocolVersion => "unacceptable protocol version",
            ConnectReturnCode::IdentifierRejected => "client identifier rejected",
            ConnectReturnCode::ServerUnavailable => "server unavailable",
            ConnectReturnCode::BadUserNameOrPassword => "bad username or password",
            ConnectReturnCode::NotAuthorized => "not authorized",
        }
    }
}

/// Outcome of decoding a CONNACK
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnAckResult {
    pub accepted: bool,
    pub session_present: bool,
    /// Raw return code, `None` when the packet shape was invalid
    pub return_code: Option<u8>,
}

impl ConnAckResult {
    const MALFORMED: ConnAckResult = ConnAckResult {
        accepted: false,
        session_present: false,
        return_code: None,
    };

    /// Human-readable reason for a refused or malformed CONNACK
    pub fn describe(&self) -> String {
        match self.return_code {
            None => "malformed CONNACK".to_string(),
            Some(code) => match ConnectReturnCode::from_byte(code) {
                Some(known) => format!("{} (0x{code:02X})", known.description()),
                None => format!("unknown return code 0x{code:02X}"),
            },
        }
    }
}

/// Decode a CONNACK; any shape other than `{0x20, 0x02, sp, rc}` is rejected
pub fn decode_connack(bytes: &[u8]) -> ConnAckResult {
    if bytes.len() != CONNACK_LEN
        || bytes[0] != PacketType::ConnAck.header_byte()
        || bytes[1] != 0x02
        || bytes[2] > 0x01
    {
        return ConnAckResult::MALFORMED;
    }

    ConnAckResult {
        accepted: bytes[3] == ConnectReturnCode::Accepted as u8,
        session_present: bytes[2] == 0x01,
        return_code: Some(bytes[3]),
    }
}

/// Inbound packet classification
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IncomingPacket {
    ConnAck(ConnAckResult),
    PingResp,
    /// A recognised packet this client does not act on
    Other(PacketType),
    /// Empty frame or unknown packet type
    Unrecognised,
}

/// Classify an inbound frame by its fixed header
pub fn decode_incoming(bytes: &[u8]) -> IncomingPacket {
    let Some(&first) = bytes.first() else {
        return IncomingPacket::Unrecognised;
    };

    match PacketType::from_header_byte(first) {
        Some(PacketType::ConnAck) => IncomingPacket::ConnAck(decode_connack(bytes)),
        Some(PacketType::PingResp) => IncomingPacket::PingResp,
        Some(other) => IncomingPacket::Other(other),
        None => IncomingPacket::Unrecognised,
    }
}
