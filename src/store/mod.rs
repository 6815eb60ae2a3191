//! Retained and dead-letter storage on top of the ledger.
//!
//! Translates between in-memory publishes and [`DurableEnvelope`] strings.
//! Entries that no longer decode are skipped with a warning rather than
//! failing the whole read.

pub mod envelope;

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::ledger::Ledger;
use crate::packet::PublishPacket;
use crate::utils::Result;

pub use envelope::DurableEnvelope;

#[derive(Clone)]
pub struct MessageStore {
    ledger: Arc<dyn Ledger>,
}

impl MessageStore {
    pub fn new(ledger: Arc<dyn Ledger>) -> Self {
        Self { ledger }
    }

    pub async fn get_retained(&self, topic: &str) -> Result<Vec<PublishPacket>> {
        let stored = self.ledger.get_retained_messages(topic).await?;
        Ok(decode_all(&stored, topic))
    }

    /// Store `packet` as retained for `topic`. Does nothing unless the retain flag is set.
    pub async fn set_retained(&self, topic: &str, packet: &PublishPacket) -> Result<()> {
        if !packet.retain {
            return Ok(());
        }
        let encoded = DurableEnvelope::from_packet(packet).encode()?;
        self.ledger.set_retained_messages(topic, &encoded).await?;
        debug!("Retained message stored for '{topic}'");
        Ok(())
    }

    pub async fn enqueue_dead_letters(
        &self,
        letters: HashMap<String, DurableEnvelope>,
    ) -> Result<()> {
        if letters.is_empty() {
            return Ok(());
        }
        let mut records = HashMap::with_capacity(letters.len());
        for (client_id, envelope) in letters {
            records.insert(client_id, envelope.encode()?);
        }
        self.ledger.set_dead_letter_queue(&records).await
    }

    /// Everything queued for `client_id`. The queue is cleared by the read.
    pub async fn dequeue_dead_letters(&self, client_id: &str) -> Result<Vec<PublishPacket>> {
        let stored = self.ledger.get_dead_letter_queue(client_id).await?;
        Ok(decode_all(&stored, client_id))
    }
}

fn decode_all(stored: &[String], key: &str) -> Vec<PublishPacket> {
    stored
        .iter()
        .filter_map(|s| match DurableEnvelope::decode(s) {
            Ok(envelope) => Some(envelope.into_packet()),
            Err(e) => {
                warn!("Skipping unreadable stored message under '{key}': {e}");
                None
            }
        })
        .collect()
}

impl std::fmt::Debug for MessageStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageStore").finish_non_exhaustive()
    }
}
