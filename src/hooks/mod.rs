//! Integration points for the embedded broker engine.
//!
//! The engine owns the MQTT state machine. It calls into [`BrokerHooks`] when
//! a client connects, before a subscribe or publish is authorised, and for
//! every PUBACK / PUBREL it receives. The hooks deliver retained messages and
//! dead letters, persist retained publishes and arm a dead-letter exchange
//! for each QoS > 0 publish.
//!
//! `zilmqtt serve` runs no engine, so nothing is armed there. A host that
//! embeds an engine builds one `BrokerHooks` over its [`MessageStore`], with
//! `dlx.timeout_secs` as the exchange timeout, and awaits
//! [`BrokerHooks::drain`] on shutdown so pending exchanges write their dead
//! letters before the process exits.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::dlx::{AckEvent, AckRouter, DeadLetterExchange};
use crate::packet::PublishPacket;
use crate::store::MessageStore;

pub struct BrokerHooks {
    store: Arc<MessageStore>,
    acks: AckRouter,
    dlx_timeout: Duration,
    shutdown: CancellationToken,
    timers: Mutex<JoinSet<()>>,
}

impl BrokerHooks {
    pub fn new(store: Arc<MessageStore>, dlx_timeout: Duration, shutdown: CancellationToken) -> Self {
        Self {
            store,
            acks: AckRouter::new(),
            dlx_timeout,
            shutdown,
            timers: Mutex::new(JoinSet::new()),
        }
    }

    pub fn ack_router(&self) -> &AckRouter {
        &self.acks
    }

    /// Dead letters owed to `client_id`, removed from the queue. The engine
    /// republishes them to the client.
    pub async fn on_client_connected(&self, client_id: &str) -> Vec<PublishPacket> {
        match self.store.dequeue_dead_letters(client_id).await {
            Ok(letters) => {
                if !letters.is_empty() {
                    info!("Redelivering {} dead letter(s) to '{client_id}'", letters.len());
                }
                letters
            }
            Err(e) => {
                warn!("Could not fetch dead letters for '{client_id}': {e}");
                Vec::new()
            }
        }
    }

    /// Retained messages to deliver to a new subscriber of `topic`.
    pub async fn authorize_subscribe(&self, topic: &str) -> Vec<PublishPacket> {
        self.store.get_retained(topic).await.unwrap_or_else(|e| {
            warn!("Could not load retained messages for '{topic}': {e}");
            Vec::new()
        })
    }

    /// Persist a retained publish and arm a dead-letter exchange for `recipients`.
    /// Returns whether an exchange was armed.
    pub async fn authorize_publish(&self, packet: &PublishPacket, recipients: Vec<String>) -> bool {
        if let Err(e) = self.store.set_retained(&packet.topic, packet).await {
            warn!("Could not store retained message for '{}': {e}", packet.topic);
        }

        if packet.qos == 0 || packet.retain || packet.message_id.is_none() || recipients.is_empty() {
            return false;
        }

        let exchange = DeadLetterExchange::new(
            &self.acks,
            self.store.clone(),
            recipients,
            packet.clone(),
            self.dlx_timeout,
            self.shutdown.child_token(),
        );
        let key = exchange.key().clone();

        let mut timers = self.timers.lock().unwrap_or_else(PoisonError::into_inner);
        while timers.try_join_next().is_some() {}
        timers.spawn(async move {
            match exchange.start_timer().await {
                Ok(n) => debug!("Exchange for {key:?} finished, {n} dead letter(s)"),
                Err(e) => warn!("Dead letters for {key:?} were not stored: {e}"),
            }
        });
        true
    }

    pub fn on_ack(&self, event: AckEvent) {
        if self.acks.publish(event.clone()) == 0 {
            debug!("No exchange waiting for {:?} from '{}'", event.key, event.client_id);
        }
    }

    /// Expire every armed exchange now and wait for their writes.
    pub async fn drain(&self) {
        self.shutdown.cancel();
        let mut timers = {
            let mut guard = self.timers.lock().unwrap_or_else(PoisonError::into_inner);
            std::mem::take(&mut *guard)
        };
        let count = timers.len();
        while timers.join_next().await.is_some() {}
        if count > 0 {
            info!("Drained {count} dead-letter exchange(s)");
        }
    }
}

impl std::fmt::Debug for BrokerHooks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BrokerHooks")
            .field("dlx_timeout", &self.dlx_timeout)
            .field("waiting", &self.acks.waiting())
            .finish()
    }
}

#[cfg(test)]
mod tests;
