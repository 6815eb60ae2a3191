//! Durable form of a publish.
//!
//! A `PublishPacket` is written as JSON with its payload base64 encoded, and
//! the JSON text is base64 encoded once more before it reaches the ledger.

use base64::{Engine as _, engine::general_purpose::STANDARD};
use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::packet::PublishPacket;
use crate::utils::Result;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DurableEnvelope {
    pub topic: String,
    pub qos: u8,
    pub retain: bool,
    pub message_id: Option<u16>,
    #[serde(with = "base64_bytes")]
    pub payload: Bytes,
}

impl DurableEnvelope {
    pub fn from_packet(packet: &PublishPacket) -> Self {
        Self {
            topic: packet.topic.clone(),
            qos: packet.qos,
            retain: packet.retain,
            message_id: packet.message_id,
            payload: packet.payload.clone(),
        }
    }

    pub fn into_packet(self) -> PublishPacket {
        PublishPacket {
            topic: self.topic,
            qos: self.qos,
            retain: self.retain,
            message_id: self.message_id,
            payload: self.payload,
        }
    }

    /// The string stored in the ledger.
    pub fn encode(&self) -> Result<String> {
        let json = serde_json::to_vec(self)?;
        Ok(STANDARD.encode(json))
    }

    pub fn decode(encoded: &str) -> Result<Self> {
        let json = STANDARD.decode(encoded.trim())?;
        Ok(serde_json::from_slice(&json)?)
    }
}

mod base64_bytes {
    use base64::{Engine as _, engine::general_purpose::STANDARD};
    use bytes::Bytes;
    use serde::{Deserialize, Deserializer, Serializer, de};

    pub fn serialize<S: Serializer>(bytes: &Bytes, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Bytes, D::Error> {
        let text = String::deserialize(deserializer)?;
        STANDARD
            .decode(text)
            .map(Bytes::from)
            .map_err(de::Error::custom)
    }
}
