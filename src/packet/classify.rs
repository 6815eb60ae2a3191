use super::codec::{Packet, PacketType};
use crate::utils::{Error, Result};

/// How the balancer treats a frame coming from a client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// Fanned out to every broker link.
    Connect { protocol_level: u8 },
    /// Logged for replay and sent to the selected broker only.
    Subscribe { topics: Vec<String> },
    /// Fanned out so standby links stay alive.
    Ping,
    /// Data plane: PUBLISH, acks, UNSUBSCRIBE, DISCONNECT. Selected broker only.
    Other(PacketType),
}

pub fn classify(packet: &Packet) -> Result<Frame> {
    Ok(match packet.packet_type {
        PacketType::Connect => Frame::Connect {
            protocol_level: packet.protocol_level.unwrap_or(4),
        },
        PacketType::Subscribe => {
            if packet.topics.is_empty() {
                return Err(Error::Codec("SUBSCRIBE without topic filters".into()));
            }
            Frame::Subscribe {
                topics: packet.topics.clone(),
            }
        }
        PacketType::Pingreq => Frame::Ping,
        other => Frame::Other(other),
    })
}

/// Broker responses every client must see, whichever broker sent them.
pub fn is_control_response(packet_type: PacketType) -> bool {
    matches!(packet_type, PacketType::Connack | PacketType::Pingresp)
}
