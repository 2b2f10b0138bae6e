//! MQTT 3.1 / 3.1.1 packet framing.
//!
//! Encoders write into a caller-supplied fixed buffer and return the number of
//! bytes used; nothing here allocates. Decoders work on the variable header
//! bytes that the client has already pulled off the wire.

use crate::network::error::Error;
use heapless::Vec;

// MQTT Control Packet types - these are the fixed header packet type values
/// MQTT CONNECT packet type identifier.
pub const CONNECT: u8 = 0x10;
/// MQTT CONNACK packet type identifier.
pub const CONNACK: u8 = 0x20;
/// MQTT PUBLISH packet type identifier.
pub const PUBLISH: u8 = 0x30;
/// MQTT PUBACK packet type identifier.
pub const PUBACK: u8 = 0x40;
/// MQTT SUBSCRIBE packet type identifier (with the mandatory 0b0010 flags).
pub const SUBSCRIBE: u8 = 0x82;
/// MQTT SUBACK packet type identifier.
pub const SUBACK: u8 = 0x90;
/// MQTT PINGREQ packet type identifier.
pub const PINGREQ: u8 = 0xC0;
/// MQTT PINGRESP packet type identifier.
pub const PINGRESP: u8 = 0xD0;
/// MQTT DISCONNECT packet type identifier.
pub const DISCONNECT: u8 = 0xE0;

/// Largest value the four-byte remaining length field can carry.
pub const MAX_REMAINING_LENGTH: usize = 268_435_455;

/// SUBACK return code signalling a rejected subscription.
pub const SUBACK_FAILURE: u8 = 0x80;

const CONNECT_FLAG_CLEAN_SESSION: u8 = 0x02;
const CONNECT_FLAG_PASSWORD: u8 = 0x40;
const CONNECT_FLAG_USERNAME: u8 = 0x80;

/// Quality of Service levels for MQTT messages.
///
/// This deployment only sends and acknowledges [`QoS::AtLeastOnce`], but the
/// other levels are decoded so that a misbehaving broker is visible in logs.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum QoS {
    /// **QoS 0**: At most once delivery.
    AtMostOnce = 0,
    /// **QoS 1**: At least once delivery. Requires a PUBACK from the receiver.
    AtLeastOnce = 1,
    /// **QoS 2**: Exactly once delivery.
    ExactlyOnce = 2,
}

impl QoS {
    /// Decode the two QoS bits of a PUBLISH fixed header.
    pub fn from_bits(bits: u8) -> Result<Self, Error> {
        match bits {
            0 => Ok(QoS::AtMostOnce),
            1 => Ok(QoS::AtLeastOnce),
            2 => Ok(QoS::ExactlyOnce),
            _ => Err(Error::ProtocolError),
        }
    }
}

/// MQTT protocol revision used for the CONNECT handshake.
#[derive(Debug, PartialEq, Eq, Clone, Copy, Default)]
pub enum ProtocolVersion {
    /// MQTT 3.1 (`MQIsdp`, level 3)
    V3_1,
    /// MQTT 3.1.1 (`MQTT`, level 4)
    #[default]
    V3_1_1,
}

impl ProtocolVersion {
    fn name(self) -> &'static [u8] {
        match self {
            ProtocolVersion::V3_1 => b"MQIsdp",
            ProtocolVersion::V3_1_1 => b"MQTT",
        }
    }

    fn level(self) -> u8 {
        match self {
            ProtocolVersion::V3_1 => 3,
            ProtocolVersion::V3_1_1 => 4,
        }
    }
}

/// Fields of a CONNECT packet.
#[derive(Debug, Clone, Copy)]
pub struct ConnectPacket<'a> {
    pub client_id: &'a str,
    pub keep_alive_seconds: u16,
    pub clean_session: bool,
    pub version: ProtocolVersion,
    pub username: Option<&'a str>,
    pub password: Option<&'a [u8]>,
}

/// Bounded writer over a fixed buffer.
struct Encoder<'b> {
    buf: &'b mut [u8],
    pos: usize,
}

impl<'b> Encoder<'b> {
    fn new(buf: &'b mut [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn put_slice(&mut self, bytes: &[u8]) -> Result<(), Error> {
        let end = self.pos + bytes.len();
        if end > self.buf.len() {
            return Err(Error::BufferTooSmall);
        }
        self.buf[self.pos..end].copy_from_slice(bytes);
        self.pos = end;
        Ok(())
    }

    fn put_u8(&mut self, byte: u8) -> Result<(), Error> {
        self.put_slice(&[byte])
    }

    fn put_u16(&mut self, value: u16) -> Result<(), Error> {
        self.put_slice(&value.to_be_bytes())
    }

    /// Length-prefixed UTF-8 string or binary field.
    fn put_field(&mut self, bytes: &[u8]) -> Result<(), Error> {
        let len = u16::try_from(bytes.len()).map_err(|_| Error::ProtocolError)?;
        self.put_u16(len)?;
        self.put_slice(bytes)
    }

    fn put_fixed_header(&mut self, packet_type: u8, remaining: usize) -> Result<(), Error> {
        self.put_u8(packet_type)?;
        let encoded = encode_remaining_length(remaining)?;
        self.put_slice(&encoded)
    }

    fn finish(self) -> usize {
        self.pos
    }
}

/// Encode the remaining length field for an MQTT packet.
///
/// Each byte carries seven bits of the value, least significant group first;
/// the top bit flags a continuation byte.
pub fn encode_remaining_length(mut len: usize) -> Result<Vec<u8, 4>, Error> {
    if len > MAX_REMAINING_LENGTH {
        return Err(Error::ProtocolError);
    }
    let mut out = Vec::new();
    loop {
        let mut byte = (len % 128) as u8;
        len /= 128;
        if len > 0 {
            byte |= 0x80;
        }
        out.push(byte).map_err(|_| Error::ProtocolError)?;
        if len == 0 {
            break;
        }
    }
    Ok(out)
}

/// Decode a remaining length field, pulling one byte at a time from `next`.
pub fn decode_remaining_length<F>(mut next: F) -> Result<usize, Error>
where
    F: FnMut() -> Result<u8, Error>,
{
    let mut value = 0usize;
    let mut multiplier = 1usize;
    for _ in 0..4 {
        let byte = next()?;
        value += (byte & 0x7F) as usize * multiplier;
        if byte & 0x80 == 0 {
            return Ok(value);
        }
        multiplier *= 128;
    }
    Err(Error::ProtocolError)
}

/// Encode a CONNECT packet.
pub fn encode_connect(buf: &mut [u8], packet: &ConnectPacket<'_>) -> Result<usize, Error> {
    let name = packet.version.name();
    let mut remaining = 2 + name.len() + 1 + 1 + 2 + 2 + packet.client_id.len();
    let mut flags = 0;
    if packet.clean_session {
        flags |= CONNECT_FLAG_CLEAN_SESSION;
    }
    if let Some(username) = packet.username {
        flags |= CONNECT_FLAG_USERNAME;
        remaining += 2 + username.len();
    }
    if let Some(password) = packet.password {
        flags |= CONNECT_FLAG_PASSWORD;
        remaining += 2 + password.len();
    }

    let mut enc = Encoder::new(buf);
    enc.put_fixed_header(CONNECT, remaining)?;

    // --- Variable Header ---
    enc.put_field(name)?;
    enc.put_u8(packet.version.level())?;
    enc.put_u8(flags)?;
    enc.put_u16(packet.keep_alive_seconds)?;

    // --- Payload ---
    enc.put_field(packet.client_id.as_bytes())?;
    if let Some(username) = packet.username {
        enc.put_field(username.as_bytes())?;
    }
    if let Some(password) = packet.password {
        enc.put_field(password)?;
    }
    Ok(enc.finish())
}

/// Encode a SUBSCRIBE packet for a single topic filter.
pub fn encode_subscribe(
    buf: &mut [u8],
    packet_id: u16,
    topic: &str,
    qos: QoS,
) -> Result<usize, Error> {
    let remaining = 2 + 2 + topic.len() + 1;
    let mut enc = Encoder::new(buf);
    enc.put_fixed_header(SUBSCRIBE, remaining)?;
    enc.put_u16(packet_id)?;
    enc.put_field(topic.as_bytes())?;
    enc.put_u8(qos as u8)?;
    Ok(enc.finish())
}

/// Encode the fixed and variable header of a PUBLISH packet.
///
/// The payload itself is not copied; the caller writes it straight after the
/// header so that its size is not bounded by the transmit buffer.
pub fn encode_publish_header(
    buf: &mut [u8],
    topic: &str,
    qos: QoS,
    packet_id: u16,
    payload_len: usize,
) -> Result<usize, Error> {
    let id_len = if qos == QoS::AtMostOnce { 0 } else { 2 };
    let remaining = 2 + topic.len() + id_len + payload_len;
    let flags = PUBLISH | ((qos as u8) << 1);

    let mut enc = Encoder::new(buf);
    enc.put_fixed_header(flags, remaining)?;
    enc.put_field(topic.as_bytes())?;
    if id_len > 0 {
        enc.put_u16(packet_id)?;
    }
    Ok(enc.finish())
}

/// Encode a PUBACK for an inbound QoS 1 message.
pub fn encode_puback(buf: &mut [u8], packet_id: u16) -> Result<usize, Error> {
    let mut enc = Encoder::new(buf);
    enc.put_fixed_header(PUBACK, 2)?;
    enc.put_u16(packet_id)?;
    Ok(enc.finish())
}

/// Encode a PINGREQ.
pub fn encode_pingreq(buf: &mut [u8]) -> Result<usize, Error> {
    let mut enc = Encoder::new(buf);
    enc.put_fixed_header(PINGREQ, 0)?;
    Ok(enc.finish())
}

/// Encode a DISCONNECT.
pub fn encode_disconnect(buf: &mut [u8]) -> Result<usize, Error> {
    let mut enc = Encoder::new(buf);
    enc.put_fixed_header(DISCONNECT, 0)?;
    Ok(enc.finish())
}

/// Decode a CONNACK body into `(session_present, return_code)`.
pub fn decode_connack(body: &[u8]) -> Result<(bool, u8), Error> {
    match body {
        [flags, code] => Ok((flags & 0x01 != 0, *code)),
        _ => Err(Error::ProtocolError),
    }
}

/// Decode the packet identifier that opens PUBACK and SUBACK bodies.
pub fn decode_packet_id(body: &[u8]) -> Result<u16, Error> {
    match body {
        [hi, lo, ..] => Ok(u16::from_be_bytes([*hi, *lo])),
        _ => Err(Error::ProtocolError),
    }
}

/// Decode a SUBACK body into `(packet_id, first_return_code)`.
pub fn decode_suback(body: &[u8]) -> Result<(u16, u8), Error> {
    if body.len() < 3 {
        return Err(Error::ProtocolError);
    }
    Ok((decode_packet_id(body)?, body[2]))
}

/// Split the flag nibble of a PUBLISH fixed header into `(dup, qos, retain)`.
pub fn decode_publish_flags(header: u8) -> Result<(bool, QoS, bool), Error> {
    let qos = QoS::from_bits((header >> 1) & 0x03)?;
    Ok((header & 0x08 != 0, qos, header & 0x01 != 0))
}
