//! The `packet` module is the thin layer between raw MQTT bytes and the
//! routing logic: frame splitting, field extraction and classification.

pub mod classify;
pub mod codec;

pub use classify::{Frame, classify, is_control_response};
pub use codec::{MqttCodec, Packet, PacketType, PublishPacket};
