//! Broker self-registration listener.
//!
//! A broker announces itself by connecting here and subscribing to
//! `$ZILMQTT/<broker id>/<ip>/<port>`. The announcement is recorded in the
//! registry under `<broker id>.zilmqtt` and the connection is closed. Only
//! enough MQTT is spoken to get the broker's client to its SUBSCRIBE.

use std::sync::Arc;

use futures::StreamExt;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio_util::codec::FramedRead;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::packet::codec::{decode, encode_connack, encode_pingresp};
use crate::packet::{MqttCodec, PacketType};
use crate::registry::BrokerRegistry;
use crate::utils::{Error, Result};

pub const ANNOUNCE_PREFIX: &str = "$ZILMQTT";
pub const HOSTNAME_SUFFIX: &str = "zilmqtt";

/// Announcers only send CONNECT, PINGREQ and one SUBSCRIBE.
const ANNOUNCER_MAX_FRAME: usize = 64 * 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Announcement {
    pub broker_id: String,
    pub ip: String,
    pub port: u16,
}

impl Announcement {
    /// The id the broker is known by everywhere else.
    pub fn hostname(&self) -> String {
        broker_hostname(&self.broker_id)
    }
}

pub fn broker_hostname(broker_id: &str) -> String {
    format!("{broker_id}.{HOSTNAME_SUFFIX}")
}

pub fn is_announcement(topic: &str) -> bool {
    topic
        .strip_prefix(ANNOUNCE_PREFIX)
        .is_some_and(|rest| rest.starts_with('/'))
}

/// Parse `$ZILMQTT/<id>/<ip>/<port>`.
pub fn parse_announcement(topic: &str) -> Result<Announcement> {
    let invalid = || Error::InvalidAnnouncement(topic.to_string());
    let rest = topic
        .strip_prefix(ANNOUNCE_PREFIX)
        .and_then(|r| r.strip_prefix('/'))
        .ok_or_else(invalid)?;

    let parts: Vec<&str> = rest.split('/').collect();
    let [broker_id, ip, port] = parts.as_slice() else {
        return Err(invalid());
    };
    if broker_id.is_empty() || ip.is_empty() {
        return Err(invalid());
    }
    let port = port.parse::<u16>().map_err(|_| invalid())?;

    Ok(Announcement {
        broker_id: broker_id.to_string(),
        ip: ip.to_string(),
        port,
    })
}

pub async fn start_registration_server(
    listener: TcpListener,
    registry: Arc<BrokerRegistry>,
    shutdown: CancellationToken,
) {
    if let Ok(addr) = listener.local_addr() {
        info!("Registration listener on {addr}");
    }

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    debug!("Announcer connected from {peer}");
                    tokio::spawn(handle_announcer(stream, registry.clone()));
                }
                Err(e) => warn!("Accept failed: {e}"),
            },
        }
    }
}

async fn handle_announcer(stream: TcpStream, registry: Arc<BrokerRegistry>) {
    let (read_half, mut write_half) = stream.into_split();
    let mut frames = FramedRead::new(read_half, MqttCodec::new(ANNOUNCER_MAX_FRAME));
    let mut protocol_level = 4;

    while let Some(next) = frames.next().await {
        let packet = match next.and_then(|raw| decode(raw, protocol_level)) {
            Ok(packet) => packet,
            Err(e) => {
                warn!("Dropping announcer connection: {e}");
                break;
            }
        };

        match packet.packet_type {
            PacketType::Connect => {
                protocol_level = packet.protocol_level.unwrap_or(protocol_level);
                if write_half.write_all(&encode_connack(0)).await.is_err() {
                    break;
                }
            }
            PacketType::Pingreq => {
                if write_half.write_all(&encode_pingresp()).await.is_err() {
                    break;
                }
            }
            PacketType::Subscribe => {
                for topic in packet.topics.iter().filter(|t| is_announcement(t)) {
                    announce(topic, &registry).await;
                }
                break;
            }
            PacketType::Disconnect => break,
            other => debug!("Ignoring {other:?} on registration listener"),
        }
    }

    let _ = write_half.shutdown().await;
}

async fn announce(topic: &str, registry: &BrokerRegistry) {
    let announcement = match parse_announcement(topic) {
        Ok(a) => a,
        Err(e) => {
            warn!("{e}");
            return;
        }
    };
    if let Err(e) = registry
        .register(&announcement.hostname(), &announcement.ip, announcement.port)
        .await
    {
        error!("Could not register broker '{}': {e}", announcement.broker_id);
    }
}
