//! MQTT framing and field extraction.
//!
//! The balancer never rewrites client or broker traffic, so decoding here only
//! cuts frames out of the byte stream and pulls out the handful of fields the
//! routing and dead-letter logic look at. The raw frame is always kept and is
//! what gets forwarded.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio_util::codec::Decoder;

use crate::utils::{Error, Result};

/// Largest value a four byte remaining-length varint can carry.
pub const MAX_REMAINING_LENGTH: usize = 268_435_455;

/// Protocol level sent in CONNECT by MQTT 5.0 clients.
pub const PROTOCOL_LEVEL_V5: u8 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum PacketType {
    Connect = 1,
    Connack = 2,
    Publish = 3,
    Puback = 4,
    Pubrec = 5,
    Pubrel = 6,
    Pubcomp = 7,
    Subscribe = 8,
    Suback = 9,
    Unsubscribe = 10,
    Unsuback = 11,
    Pingreq = 12,
    Pingresp = 13,
    Disconnect = 14,
    Auth = 15,
}

impl TryFrom<u8> for PacketType {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self> {
        Ok(match value {
            1 => PacketType::Connect,
            2 => PacketType::Connack,
            3 => PacketType::Publish,
            4 => PacketType::Puback,
            5 => PacketType::Pubrec,
            6 => PacketType::Pubrel,
            7 => PacketType::Pubcomp,
            8 => PacketType::Subscribe,
            9 => PacketType::Suback,
            10 => PacketType::Unsubscribe,
            11 => PacketType::Unsuback,
            12 => PacketType::Pingreq,
            13 => PacketType::Pingresp,
            14 => PacketType::Disconnect,
            15 => PacketType::Auth,
            other => return Err(Error::Codec(format!("invalid packet type {other}"))),
        })
    }
}

/// A decoded frame: the fields routing needs plus the untouched bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub packet_type: PacketType,
    /// PUBLISH topic, or every topic filter of a SUBSCRIBE / UNSUBSCRIBE.
    pub topics: Vec<String>,
    pub qos: u8,
    pub retain: bool,
    pub message_id: Option<u16>,
    pub payload: Bytes,
    /// Protocol level carried by CONNECT.
    pub protocol_level: Option<u8>,
    pub raw: Bytes,
}

impl Packet {
    pub fn topic(&self) -> Option<&str> {
        self.topics.first().map(String::as_str)
    }

    /// The publish view of this frame, if it is a PUBLISH.
    pub fn to_publish(&self) -> Option<PublishPacket> {
        if self.packet_type != PacketType::Publish {
            return None;
        }
        Some(PublishPacket {
            topic: self.topic()?.to_string(),
            qos: self.qos,
            retain: self.retain,
            message_id: self.message_id,
            payload: self.payload.clone(),
        })
    }
}

/// The in-memory shape of a publish, as stored, tracked and redelivered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishPacket {
    pub topic: String,
    pub qos: u8,
    pub retain: bool,
    pub message_id: Option<u16>,
    pub payload: Bytes,
}

/// Largest frame a connection accepts unless configured otherwise.
pub const DEFAULT_MAX_FRAME: usize = 1024 * 1024;

/// Upper bound on what a single incomplete frame may reserve up front.
const RESERVE_CHUNK: usize = 64 * 1024;

/// Splits a byte stream into whole MQTT frames.
///
/// Only a malformed remaining length or a frame over `max_frame` is an error
/// here, since the stream cannot be resynchronised after one. Field-level
/// problems surface later from [`decode`] and cost just that frame.
#[derive(Debug, Clone, Copy)]
pub struct MqttCodec {
    max_frame: usize,
}

impl MqttCodec {
    /// A codec rejecting frames longer than `max_frame` bytes, fixed header
    /// included.
    pub fn new(max_frame: usize) -> Self {
        Self {
            max_frame: max_frame.min(1 + 4 + MAX_REMAINING_LENGTH),
        }
    }

    pub fn max_frame(&self) -> usize {
        self.max_frame
    }
}

impl Default for MqttCodec {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_FRAME)
    }
}

impl Decoder for MqttCodec {
    type Item = Bytes;
    type Error = Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Bytes>> {
        if src.is_empty() {
            return Ok(None);
        }
        let Some((remaining, len_bytes)) = decode_remaining_length(&src[1..])? else {
            return Ok(None);
        };
        let total = 1 + len_bytes + remaining;
        if total > self.max_frame {
            return Err(Error::Codec(format!(
                "frame of {total} bytes exceeds limit of {}",
                self.max_frame
            )));
        }
        if src.len() < total {
            src.reserve((total - src.len()).min(RESERVE_CHUNK));
            return Ok(None);
        }
        Ok(Some(src.split_to(total).freeze()))
    }
}

/// Decode a remaining-length varint. `Ok(None)` means more bytes are needed.
pub fn decode_remaining_length(buf: &[u8]) -> Result<Option<(usize, usize)>> {
    let mut value = 0usize;
    let mut multiplier = 1usize;

    for (i, &byte) in buf.iter().enumerate() {
        if i == 4 {
            return Err(Error::Codec("remaining length exceeds four bytes".into()));
        }
        value += (byte & 0x7F) as usize * multiplier;
        if byte & 0x80 == 0 {
            return Ok(Some((value, i + 1)));
        }
        multiplier *= 128;
    }
    if buf.len() >= 4 {
        return Err(Error::Codec("remaining length exceeds four bytes".into()));
    }
    Ok(None)
}

fn put_remaining_length(mut len: usize, buf: &mut BytesMut) {
    loop {
        let mut byte = (len % 128) as u8;
        len /= 128;
        if len > 0 {
            byte |= 0x80;
        }
        buf.put_u8(byte);
        if len == 0 {
            break;
        }
    }
}

/// Packet type of a raw frame, read from the fixed header alone.
pub fn peek_type(raw: &[u8]) -> Result<PacketType> {
    match raw.first() {
        Some(header) => PacketType::try_from(header >> 4),
        None => Err(Error::Codec("empty frame".into())),
    }
}

/// Decode every complete frame in `bytes`. Trailing partial data is an error.
pub fn decode_frames(bytes: &[u8], protocol_level: u8) -> Result<Vec<Packet>> {
    let mut buf = BytesMut::from(bytes);
    // The input is already in memory, so only the wire format bounds it.
    let mut codec = MqttCodec::new(usize::MAX);
    let mut packets = Vec::new();

    while let Some(raw) = codec.decode(&mut buf)? {
        packets.push(decode(raw, protocol_level)?);
    }
    if !buf.is_empty() {
        return Err(Error::Codec(format!("{} trailing bytes", buf.len())));
    }
    Ok(packets)
}

/// Extract routing fields from one whole frame.
///
/// `protocol_level` is the level negotiated by the connection's CONNECT; it
/// decides whether PUBLISH and SUBSCRIBE carry a properties block.
pub fn decode(raw: Bytes, protocol_level: u8) -> Result<Packet> {
    let header = *raw.first().ok_or_else(|| Error::Codec("empty frame".into()))?;
    let packet_type = PacketType::try_from(header >> 4)?;
    let flags = header & 0x0F;

    let (remaining, len_bytes) = decode_remaining_length(&raw[1..])?
        .ok_or_else(|| Error::Codec("truncated fixed header".into()))?;
    let start = 1 + len_bytes;
    if raw.len() != start + remaining {
        return Err(Error::Codec(format!(
            "{packet_type:?} length mismatch: header says {remaining}, frame has {}",
            raw.len() - start
        )));
    }

    let mut body = raw.slice(start..);
    let v5 = protocol_level == PROTOCOL_LEVEL_V5;
    let mut packet = Packet {
        packet_type,
        topics: Vec::new(),
        qos: 0,
        retain: false,
        message_id: None,
        payload: Bytes::new(),
        protocol_level: None,
        raw: raw.clone(),
    };

    match packet_type {
        PacketType::Connect => {
            let _protocol_name = read_string(&mut body)?;
            packet.protocol_level = Some(read_u8(&mut body)?);
        }
        PacketType::Publish => {
            packet.qos = (flags >> 1) & 0x03;
            packet.retain = flags & 0x01 != 0;
            if packet.qos > 2 {
                return Err(Error::Codec("PUBLISH with QoS 3".into()));
            }
            packet.topics.push(read_string(&mut body)?);
            if packet.qos > 0 {
                packet.message_id = Some(read_u16(&mut body)?);
            }
            if v5 {
                skip_properties(&mut body)?;
            }
            packet.payload = body;
        }
        PacketType::Subscribe | PacketType::Unsubscribe => {
            packet.message_id = Some(read_u16(&mut body)?);
            if v5 {
                skip_properties(&mut body)?;
            }
            while body.has_remaining() {
                packet.topics.push(read_string(&mut body)?);
                if packet_type == PacketType::Subscribe {
                    read_u8(&mut body)?;
                }
            }
        }
        PacketType::Puback
        | PacketType::Pubrec
        | PacketType::Pubrel
        | PacketType::Pubcomp
        | PacketType::Suback
        | PacketType::Unsuback => {
            packet.message_id = Some(read_u16(&mut body)?);
        }
        PacketType::Connack
        | PacketType::Pingreq
        | PacketType::Pingresp
        | PacketType::Disconnect
        | PacketType::Auth => {}
    }

    Ok(packet)
}

fn read_u8(buf: &mut Bytes) -> Result<u8> {
    if !buf.has_remaining() {
        return Err(Error::Codec("unexpected end of frame".into()));
    }
    Ok(buf.get_u8())
}

fn read_u16(buf: &mut Bytes) -> Result<u16> {
    if buf.remaining() < 2 {
        return Err(Error::Codec("unexpected end of frame".into()));
    }
    Ok(buf.get_u16())
}

fn read_string(buf: &mut Bytes) -> Result<String> {
    let len = read_u16(buf)? as usize;
    if buf.remaining() < len {
        return Err(Error::Codec("string runs past end of frame".into()));
    }
    let bytes = buf.split_to(len);
    String::from_utf8(bytes.to_vec()).map_err(|_| Error::Codec("invalid UTF-8 string".into()))
}

fn skip_properties(buf: &mut Bytes) -> Result<()> {
    let (len, len_bytes) = decode_remaining_length(buf)?
        .ok_or_else(|| Error::Codec("truncated properties length".into()))?;
    if buf.remaining() < len_bytes + len {
        return Err(Error::Codec("properties run past end of frame".into()));
    }
    buf.advance(len_bytes + len);
    Ok(())
}

fn put_string(s: &str, buf: &mut BytesMut) {
    buf.put_u16(s.len() as u16);
    buf.put_slice(s.as_bytes());
}

fn frame(header: u8, body: &[u8]) -> Bytes {
    let mut buf = BytesMut::with_capacity(body.len() + 5);
    buf.put_u8(header);
    put_remaining_length(body.len(), &mut buf);
    buf.put_slice(body);
    buf.freeze()
}

/// Render a publish as an MQTT 3.1.1 PUBLISH frame.
pub fn encode_publish(publish: &PublishPacket) -> Bytes {
    let mut body = BytesMut::new();
    put_string(&publish.topic, &mut body);
    if publish.qos > 0 {
        body.put_u16(publish.message_id.unwrap_or(0));
    }
    body.put_slice(&publish.payload);

    let header = (PacketType::Publish as u8) << 4 | (publish.qos & 0x03) << 1 | publish.retain as u8;
    frame(header, &body)
}

/// MQTT 3.1.1 CONNECT with a clean session and no credentials.
pub fn encode_connect(client_id: &str, keep_alive: u16) -> Bytes {
    let mut body = BytesMut::new();
    put_string("MQTT", &mut body);
    body.put_u8(4);
    body.put_u8(0x02);
    body.put_u16(keep_alive);
    put_string(client_id, &mut body);
    frame((PacketType::Connect as u8) << 4, &body)
}

pub fn encode_connack(return_code: u8) -> Bytes {
    frame((PacketType::Connack as u8) << 4, &[0x00, return_code])
}

pub fn encode_subscribe(message_id: u16, topics: &[(&str, u8)]) -> Bytes {
    let mut body = BytesMut::new();
    body.put_u16(message_id);
    for (topic, qos) in topics {
        put_string(topic, &mut body);
        body.put_u8(*qos);
    }
    frame((PacketType::Subscribe as u8) << 4 | 0x02, &body)
}

pub fn encode_puback(message_id: u16) -> Bytes {
    frame((PacketType::Puback as u8) << 4, &message_id.to_be_bytes())
}

pub fn encode_pingreq() -> Bytes {
    frame((PacketType::Pingreq as u8) << 4, &[])
}

pub fn encode_pingresp() -> Bytes {
    frame((PacketType::Pingresp as u8) << 4, &[])
}
