//! Dead-letter exchange
//!
//! One [`DeadLetterExchange`] tracks a single QoS > 0 publish and the clients
//! it was sent to. Acks routed through the [`AckRouter`] strike clients off the
//! pending set. When the timeout elapses (or shutdown is requested) whatever
//! is still pending is written to the dead-letter queue in one batch and the
//! instance is done. Acks arriving after that are not seen.

pub mod router;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::packet::PublishPacket;
use crate::store::{DurableEnvelope, MessageStore};
use crate::utils::Result;

pub use router::{AckEvent, AckKind, AckRouter, AckSubscription, DeliveryKey};

#[derive(Debug)]
pub struct DeadLetterExchange {
    pending: HashMap<String, PublishPacket>,
    subscription: AckSubscription,
    store: Arc<MessageStore>,
    deadline: Instant,
    shutdown: CancellationToken,
}

impl DeadLetterExchange {
    /// Arm an exchange for `packet` sent to `recipients`. Listening starts now,
    /// so acks that arrive before [`start_timer`](Self::start_timer) still count.
    pub fn new<I>(
        router: &AckRouter,
        store: Arc<MessageStore>,
        recipients: I,
        packet: PublishPacket,
        timeout: Duration,
        shutdown: CancellationToken,
    ) -> Self
    where
        I: IntoIterator<Item = String>,
    {
        let key = DeliveryKey {
            topic: packet.topic.clone(),
            message_id: packet.message_id.unwrap_or_default(),
        };
        let pending = recipients
            .into_iter()
            .map(|client_id| (client_id, packet.clone()))
            .collect();

        Self {
            pending,
            subscription: router.subscribe(key),
            store,
            deadline: Instant::now() + timeout,
            shutdown,
        }
    }

    pub fn key(&self) -> &DeliveryKey {
        self.subscription.key()
    }

    /// Clients that have not acknowledged yet, sorted.
    pub fn pending_clients(&self) -> Vec<String> {
        let mut clients: Vec<_> = self.pending.keys().cloned().collect();
        clients.sort();
        clients
    }

    /// Run until every recipient acked or the timeout passed.
    ///
    /// Resolves with the number of dead letters written. An error means the
    /// store write failed and those letters are lost.
    pub async fn start_timer(mut self) -> Result<usize> {
        let expiry = tokio::time::sleep_until(self.deadline);
        tokio::pin!(expiry);

        while !self.pending.is_empty() {
            // Acks already queued are applied before expiry is considered.
            tokio::select! {
                biased;
                Some(event) = self.subscription.recv() => self.on_ack(event),
                _ = self.shutdown.cancelled() => {
                    debug!("Draining exchange for {:?} early", self.key());
                    break;
                }
                _ = &mut expiry => break,
            }
        }

        let Self {
            pending,
            subscription,
            store,
            ..
        } = self;
        let key = subscription.key().clone();
        drop(subscription);

        if pending.is_empty() {
            debug!("All recipients acknowledged {key:?}");
            return Ok(0);
        }

        let letters: HashMap<_, _> = pending
            .into_iter()
            .filter(|(_, packet)| !packet.retain)
            .map(|(client_id, packet)| (client_id, DurableEnvelope::from_packet(&packet)))
            .collect();
        let count = letters.len();
        store.enqueue_dead_letters(letters).await?;

        if count > 0 {
            info!("{count} dead letter(s) queued for {key:?}");
        }
        Ok(count)
    }

    fn on_ack(&mut self, event: AckEvent) {
        if event.key != *self.key() {
            return;
        }
        if self.pending.remove(&event.client_id).is_some() {
            debug!(
                "{:?} from '{}' for {:?}",
                event.kind,
                event.client_id,
                event.key
            );
        }
    }
}

#[cfg(test)]
mod tests;
