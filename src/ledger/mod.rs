//! The `ledger` module is the seam to the durable store that holds the broker
//! directory, topic assignments, retained messages and dead letters.
//!
//! Everything else in the crate talks to the store through the [`Ledger`]
//! trait. The bundled implementation, [`SledLedger`], keeps the four
//! collections in `sled` trees.

pub mod sled_store;

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::utils::Result;

pub use sled_store::SledLedger;

/// Where a broker accepts MQTT connections.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BrokerAddress {
    pub host: String,
    pub port: u16,
}

/// Broker id (hostname) to address, ordered by id.
pub type BrokerDirectory = BTreeMap<String, BrokerAddress>;

/// Topic to the broker ids that received a SUBSCRIBE for it.
pub type TopicMap = HashMap<String, Vec<String>>;

#[async_trait]
pub trait Ledger: Send + Sync + 'static {
    async fn get_dns_records(&self) -> Result<BrokerDirectory>;

    async fn get_broker_topic_map(&self) -> Result<TopicMap>;

    async fn register_dns(&self, hostname: &str, ip: &str, port: u16) -> Result<()>;

    /// Forget every registered broker. Run once when a balancer starts.
    async fn clear_dns_cache(&self) -> Result<()>;

    /// Replace the full broker list for `topic`.
    async fn update_topic_assignments(&self, topic: &str, brokers: &[String]) -> Result<()>;

    /// Encoded envelopes retained for `topic`, oldest first.
    async fn get_retained_messages(&self, topic: &str) -> Result<Vec<String>>;

    /// Append one encoded envelope to the retained list of `topic`.
    async fn set_retained_messages(&self, topic: &str, message: &str) -> Result<()>;

    /// Fetch and clear the dead letters queued for `client_id`.
    async fn get_dead_letter_queue(&self, client_id: &str) -> Result<Vec<String>>;

    /// Append one encoded envelope per client id to that client's queue.
    async fn set_dead_letter_queue(&self, records: &HashMap<String, String>) -> Result<()>;
}

#[cfg(test)]
mod tests;
