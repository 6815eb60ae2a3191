//! Client session on the load-balancer side.
//!
//! A [`Session`] belongs to one client connection. It holds a link to every
//! broker that was known when the client connected, the id of the broker
//! currently serving the client and the SUBSCRIBE frames to replay after a
//! failover. All of it is owned by the connection task; nothing is shared
//! across sessions.

mod failover;

use bytes::Bytes;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::packet::{Frame, Packet, PacketType, classify, is_control_response};
use crate::registry::BrokerRegistry;
use crate::utils::{Error, Result};

pub use failover::FailoverOutcome;

/// Outbound half of a session's connection to one broker.
#[derive(Debug, Clone)]
pub struct BrokerLink {
    pub id: String,
    outbound: mpsc::UnboundedSender<Bytes>,
}

impl BrokerLink {
    pub fn new(id: impl Into<String>, outbound: mpsc::UnboundedSender<Bytes>) -> Self {
        Self {
            id: id.into(),
            outbound,
        }
    }

    fn send(&self, frame: &Bytes) {
        if self.outbound.send(frame.clone()).is_err() {
            warn!("Link to broker '{}' is gone, frame dropped", self.id);
        }
    }
}

/// A SUBSCRIBE as the client sent it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subscription {
    pub topics: Vec<String>,
    pub frame: Bytes,
}

#[derive(Debug)]
pub struct Session {
    client_id: String,
    brokers: Vec<BrokerLink>,
    selected: String,
    subscriptions: Vec<Subscription>,
    protocol_level: u8,
}

impl Session {
    pub fn new(client_id: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            brokers: Vec::new(),
            selected: String::new(),
            subscriptions: Vec::new(),
            protocol_level: 4,
        }
    }

    /// Take ownership of the broker links. The first one becomes the selected broker.
    pub fn attach(&mut self, links: Vec<BrokerLink>) -> Result<()> {
        let Some(first) = links.first() else {
            return Err(Error::NoBrokers(self.client_id.clone()));
        };
        self.selected = first.id.clone();
        self.brokers = links;
        debug!(
            "Session '{}' attached to {} broker(s), selected '{}'",
            self.client_id,
            self.brokers.len(),
            self.selected
        );
        Ok(())
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    pub fn is_attached(&self) -> bool {
        !self.brokers.is_empty()
    }

    pub fn selected(&self) -> &str {
        &self.selected
    }

    pub fn broker_ids(&self) -> Vec<&str> {
        self.brokers.iter().map(|b| b.id.as_str()).collect()
    }

    pub fn subscriptions(&self) -> &[Subscription] {
        &self.subscriptions
    }

    /// Protocol level from the client's CONNECT, 4 until one is seen.
    pub fn protocol_level(&self) -> u8 {
        self.protocol_level
    }

    fn selected_link(&self) -> Option<&BrokerLink> {
        self.brokers.iter().find(|b| b.id == self.selected)
    }

    fn send_selected(&self, frame: &Bytes) {
        match self.selected_link() {
            Some(link) => link.send(frame),
            None => warn!("Session '{}' has no selected broker", self.client_id),
        }
    }

    fn fan_out(&self, frame: &Bytes) {
        for link in &self.brokers {
            link.send(frame);
        }
    }

    /// Forward one client frame according to its kind.
    ///
    /// CONNECT and PINGREQ go to every broker; SUBSCRIBE is logged for replay,
    /// sent to the selected broker and recorded in the topic map; everything
    /// else goes to the selected broker only.
    pub fn route_client_packet(&mut self, packet: &Packet, registry: &BrokerRegistry) -> Result<()> {
        match classify(packet)? {
            Frame::Connect { protocol_level } => {
                self.protocol_level = protocol_level;
                self.fan_out(&packet.raw);
            }
            Frame::Subscribe { topics } => {
                self.send_selected(&packet.raw);
                for topic in &topics {
                    registry.append_topic_affinity(topic, &self.selected);
                }
                self.subscriptions.push(Subscription {
                    topics,
                    frame: packet.raw.clone(),
                });
            }
            Frame::Ping => self.fan_out(&packet.raw),
            Frame::Other(_) => self.send_selected(&packet.raw),
        }
        Ok(())
    }

    /// Whether a frame of `packet_type` from `broker_id` should reach the client.
    pub fn should_forward_to_client(&self, broker_id: &str, packet_type: PacketType) -> bool {
        if !self.brokers.iter().any(|b| b.id == broker_id) {
            return false;
        }
        is_control_response(packet_type) || broker_id == self.selected
    }
}
