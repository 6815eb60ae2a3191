//! Ledger backed by `sled`
//!
//! Each collection lives in its own tree, keyed by hostname, topic or client
//! id. List values (topic assignments, retained messages, dead letters) are
//! JSON arrays of strings; appends go through `update_and_fetch` so two
//! writers never lose each other's entries.

use std::collections::HashMap;

use async_trait::async_trait;
use sled::{Db, Tree};
use tracing::warn;

use super::{BrokerAddress, BrokerDirectory, Ledger, TopicMap};
use crate::utils::Result;

const BROKER_DNS: &str = "broker_dns";
const TOPIC_ASSIGNMENT: &str = "topic_assignment";
const RETAINED_MESSAGES: &str = "retained_messages";
const DEAD_LETTER_QUEUE: &str = "dead_letter_queue";

#[derive(Clone)]
pub struct SledLedger {
    db: Db,
}

impl SledLedger {
    /// Open or create a ledger at `path`.
    pub fn open(path: &str) -> Result<Self> {
        Ok(Self {
            db: sled::open(path)?,
        })
    }

    fn tree(&self, name: &str) -> Result<Tree> {
        Ok(self.db.open_tree(name)?)
    }

    fn append(&self, tree: &str, key: &str, item: &str) -> Result<()> {
        self.tree(tree)?.update_and_fetch(key, |old| {
            let mut list = decode_list(old);
            list.push(item.to_string());
            serde_json::to_vec(&list).ok()
        })?;
        Ok(())
    }

    async fn flush(&self) -> Result<()> {
        let db = self.db.clone();
        tokio::task::spawn_blocking(move || db.flush())
            .await
            .map_err(std::io::Error::from)??;
        Ok(())
    }
}

fn decode_list(bytes: Option<&[u8]>) -> Vec<String> {
    bytes
        .and_then(|b| serde_json::from_slice(b).ok())
        .unwrap_or_default()
}

/// Letters taken off a dead-letter queue. Once removed they exist only here,
/// so a failed flush is logged rather than returned.
pub(super) fn drained_letters(
    client_id: &str,
    removed: Option<&[u8]>,
    flushed: Result<()>,
) -> Vec<String> {
    if let Err(e) = flushed {
        warn!("Dead-letter removal for '{client_id}' not flushed: {e}");
    }
    decode_list(removed)
}

#[async_trait]
impl Ledger for SledLedger {
    async fn get_dns_records(&self) -> Result<BrokerDirectory> {
        let mut records = BrokerDirectory::new();
        for entry in self.tree(BROKER_DNS)?.iter() {
            let (key, value) = entry?;
            let hostname = String::from_utf8_lossy(&key).into_owned();
            let address: BrokerAddress = serde_json::from_slice(&value)?;
            records.insert(hostname, address);
        }
        Ok(records)
    }

    async fn get_broker_topic_map(&self) -> Result<TopicMap> {
        let mut map = TopicMap::new();
        for entry in self.tree(TOPIC_ASSIGNMENT)?.iter() {
            let (key, value) = entry?;
            let topic = String::from_utf8_lossy(&key).into_owned();
            map.insert(topic, serde_json::from_slice(&value)?);
        }
        Ok(map)
    }

    async fn register_dns(&self, hostname: &str, ip: &str, port: u16) -> Result<()> {
        let address = BrokerAddress {
            host: ip.to_string(),
            port,
        };
        self.tree(BROKER_DNS)?
            .insert(hostname, serde_json::to_vec(&address)?)?;
        self.flush().await
    }

    async fn clear_dns_cache(&self) -> Result<()> {
        self.tree(BROKER_DNS)?.clear()?;
        self.flush().await
    }

    async fn update_topic_assignments(&self, topic: &str, brokers: &[String]) -> Result<()> {
        self.tree(TOPIC_ASSIGNMENT)?
            .insert(topic, serde_json::to_vec(brokers)?)?;
        self.flush().await
    }

    async fn get_retained_messages(&self, topic: &str) -> Result<Vec<String>> {
        let value = self.tree(RETAINED_MESSAGES)?.get(topic)?;
        Ok(decode_list(value.as_deref()))
    }

    async fn set_retained_messages(&self, topic: &str, message: &str) -> Result<()> {
        self.append(RETAINED_MESSAGES, topic, message)?;
        self.flush().await
    }

    async fn get_dead_letter_queue(&self, client_id: &str) -> Result<Vec<String>> {
        let removed = self.tree(DEAD_LETTER_QUEUE)?.remove(client_id)?;
        let flushed = match removed {
            Some(_) => self.flush().await,
            None => Ok(()),
        };
        Ok(drained_letters(client_id, removed.as_deref(), flushed))
    }

    async fn set_dead_letter_queue(&self, records: &HashMap<String, String>) -> Result<()> {
        for (client_id, letter) in records {
            self.append(DEAD_LETTER_QUEUE, client_id, letter)?;
        }
        self.flush().await
    }
}

impl std::fmt::Debug for SledLedger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SledLedger")
            .field("db", &"sled::Db")
            .finish()
    }
}
