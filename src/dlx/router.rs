//! Routes acknowledgement events to the dead-letter exchanges waiting on them.
//!
//! Each exchange subscribes with the [`DeliveryKey`] of the publish it tracks
//! and only ever sees acks for that key. Dropping the [`AckSubscription`]
//! removes it from the map.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::mpsc;

/// Identifies one publish in flight: the topic and its packet identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DeliveryKey {
    pub topic: String,
    pub message_id: u16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckKind {
    /// QoS 1 acknowledgement.
    Puback,
    /// QoS 2 release.
    Pubrel,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AckEvent {
    pub key: DeliveryKey,
    pub client_id: String,
    pub kind: AckKind,
}

type Waiters = Vec<(u64, mpsc::UnboundedSender<AckEvent>)>;

#[derive(Debug, Default)]
struct RouterState {
    next_id: u64,
    waiting: HashMap<DeliveryKey, Waiters>,
}

#[derive(Debug, Clone, Default)]
pub struct AckRouter {
    state: Arc<Mutex<RouterState>>,
}

impl AckRouter {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, RouterState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn subscribe(&self, key: DeliveryKey) -> AckSubscription {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut state = self.lock();
        let id = state.next_id;
        state.next_id += 1;
        state.waiting.entry(key.clone()).or_default().push((id, tx));

        AckSubscription {
            id,
            key,
            rx,
            router: self.clone(),
        }
    }

    /// Hand `event` to every subscriber of its key. Returns how many received it.
    pub fn publish(&self, event: AckEvent) -> usize {
        let state = self.lock();
        let Some(waiters) = state.waiting.get(&event.key) else {
            return 0;
        };
        waiters
            .iter()
            .filter(|(_, tx)| tx.send(event.clone()).is_ok())
            .count()
    }

    /// Number of live subscriptions across all keys.
    pub fn waiting(&self) -> usize {
        self.lock().waiting.values().map(Vec::len).sum()
    }

    fn unsubscribe(&self, key: &DeliveryKey, id: u64) {
        let mut state = self.lock();
        if let Some(waiters) = state.waiting.get_mut(key) {
            waiters.retain(|(other, _)| *other != id);
            if waiters.is_empty() {
                state.waiting.remove(key);
            }
        }
    }
}

#[derive(Debug)]
pub struct AckSubscription {
    id: u64,
    key: DeliveryKey,
    rx: mpsc::UnboundedReceiver<AckEvent>,
    router: AckRouter,
}

impl AckSubscription {
    pub fn key(&self) -> &DeliveryKey {
        &self.key
    }

    pub async fn recv(&mut self) -> Option<AckEvent> {
        self.rx.recv().await
    }
}

impl Drop for AckSubscription {
    fn drop(&mut self) {
        self.router.unsubscribe(&self.key, self.id);
    }
}
