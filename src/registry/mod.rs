//! Broker registry
//!
//! Process-wide cache of the broker directory and the topic-affinity map,
//! refreshed from the ledger on a timer.
//!
//! Concurrency notes:
//! - Readers call [`BrokerRegistry::get`] and receive an `Arc` to an immutable
//!   snapshot. Writers build a new snapshot and swap the `Arc`, so a reader
//!   never sees a half-updated map.
//! - Topic-affinity writes update the local snapshot immediately and push the
//!   new list to the ledger from a spawned task (bounded retries, then logged
//!   and abandoned). The returned `JoinHandle` may be ignored.
//! - A failed refresh leaves the previous snapshot in place.

use std::collections::HashSet;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::ledger::{BrokerDirectory, Ledger, TopicMap};
use crate::utils::Result;
use crate::utils::retry::{RetryPolicy, retry, with_timeout};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Broker {
    pub id: String,
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Default)]
pub struct RegistrySnapshot {
    brokers: BrokerDirectory,
    topics: TopicMap,
    refreshed_at: Option<DateTime<Utc>>,
}

impl RegistrySnapshot {
    /// Known brokers, ordered by id.
    pub fn brokers(&self) -> Vec<Broker> {
        self.brokers
            .iter()
            .map(|(id, addr)| Broker {
                id: id.clone(),
                host: addr.host.clone(),
                port: addr.port,
            })
            .collect()
    }

    pub fn broker_count(&self) -> usize {
        self.brokers.len()
    }

    pub fn topics(&self) -> &TopicMap {
        &self.topics
    }

    /// Broker ids recorded for `topic`, duplicates included.
    pub fn topic_brokers(&self, topic: &str) -> &[String] {
        self.topics.get(topic).map(Vec::as_slice).unwrap_or_default()
    }

    /// When the snapshot was last loaded from the ledger.
    pub fn refreshed_at(&self) -> Option<DateTime<Utc>> {
        self.refreshed_at
    }
}

pub struct BrokerRegistry {
    ledger: Arc<dyn Ledger>,
    state: RwLock<Arc<RegistrySnapshot>>,
    retry: RetryPolicy,
}

impl BrokerRegistry {
    pub fn new(ledger: Arc<dyn Ledger>, retry: RetryPolicy) -> Self {
        Self {
            ledger,
            state: RwLock::new(Arc::new(RegistrySnapshot::default())),
            retry,
        }
    }

    /// Current snapshot. Never touches the network.
    pub fn get(&self) -> Arc<RegistrySnapshot> {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn swap(&self, snapshot: RegistrySnapshot) {
        *self.state.write().unwrap_or_else(PoisonError::into_inner) = Arc::new(snapshot);
    }

    /// Start from a clean broker directory: clear the ledger's DNS cache, then load.
    pub async fn init(&self) -> Result<()> {
        let limit = self.retry.call_timeout;
        if let Err(e) = with_timeout("clear_dns_cache", limit, self.ledger.clear_dns_cache()).await {
            warn!("Could not clear the ledger DNS cache: {e}");
        }
        self.refresh().await
    }

    /// Reload brokers and topic affinity from the ledger and swap them in together.
    pub async fn refresh(&self) -> Result<()> {
        let limit = self.retry.call_timeout;
        let brokers = with_timeout("get_dns_records", limit, self.ledger.get_dns_records()).await?;
        let topics =
            with_timeout("get_broker_topic_map", limit, self.ledger.get_broker_topic_map()).await?;

        debug!(
            "Registry refreshed: {} brokers, {} topics",
            brokers.len(),
            topics.len()
        );
        self.swap(RegistrySnapshot {
            brokers,
            topics,
            refreshed_at: Some(Utc::now()),
        });
        Ok(())
    }

    /// Record a broker in the ledger, then reload so it is visible immediately.
    pub async fn register(&self, hostname: &str, ip: &str, port: u16) -> Result<()> {
        retry(&self.retry, "register_dns", || {
            self.ledger.register_dns(hostname, ip, port)
        })
        .await?;
        info!("Broker '{hostname}' registered at {ip}:{port}");
        self.refresh().await
    }

    /// Replace the broker list for `topic`.
    pub fn update_topic_affinity(&self, topic: &str, broker_ids: Vec<String>) -> JoinHandle<()> {
        let changed = self.edit_topics(|topics| {
            topics.insert(topic.to_string(), broker_ids);
            vec![topic.to_string()]
        });
        self.persist(changed)
    }

    /// Append `broker_id` to the list for `topic`. Repeats are kept.
    pub fn append_topic_affinity(&self, topic: &str, broker_id: &str) -> JoinHandle<()> {
        let changed = self.edit_topics(|topics| {
            topics
                .entry(topic.to_string())
                .or_default()
                .push(broker_id.to_string());
            vec![topic.to_string()]
        });
        self.persist(changed)
    }

    /// For each topic, drop every occurrence of `old_id` and append `new_id`.
    pub fn reassign_topics(&self, topics: &[String], old_id: &str, new_id: &str) -> JoinHandle<()> {
        let changed = self.edit_topics(|map| {
            let mut seen = HashSet::new();
            let mut changed = Vec::new();
            for topic in topics {
                if !seen.insert(topic.as_str()) {
                    continue;
                }
                let entry = map.entry(topic.clone()).or_default();
                entry.retain(|id| id != old_id);
                entry.push(new_id.to_string());
                changed.push(topic.clone());
            }
            changed
        });
        self.persist(changed)
    }

    /// Apply `edit` to a copy of the topic map and swap it in under one write lock.
    /// Returns the edited topics with their new broker lists.
    fn edit_topics<F>(&self, edit: F) -> Vec<(String, Vec<String>)>
    where
        F: FnOnce(&mut TopicMap) -> Vec<String>,
    {
        let mut guard = self.state.write().unwrap_or_else(PoisonError::into_inner);
        let mut next = RegistrySnapshot::clone(&guard);
        let changed = edit(&mut next.topics);
        let updates = changed
            .into_iter()
            .map(|topic| {
                let ids = next.topics.get(&topic).cloned().unwrap_or_default();
                (topic, ids)
            })
            .collect();
        *guard = Arc::new(next);
        updates
    }

    fn persist(&self, updates: Vec<(String, Vec<String>)>) -> JoinHandle<()> {
        let ledger = self.ledger.clone();
        let policy = self.retry;
        tokio::spawn(async move {
            for (topic, ids) in updates {
                let res = retry(&policy, "update_topic_assignments", || {
                    ledger.update_topic_assignments(&topic, &ids)
                })
                .await;
                match res {
                    Ok(()) => debug!("Topic map for '{topic}' stored: {ids:?}"),
                    Err(e) => warn!("Topic map for '{topic}' not stored in ledger: {e}"),
                }
            }
        })
    }

    /// Refresh every `interval` until `shutdown` fires.
    pub async fn start_refresh_loop(
        registry: Arc<BrokerRegistry>,
        interval: Duration,
        shutdown: CancellationToken,
    ) {
        info!("Refreshing broker registry every {}s", interval.as_secs());
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(interval) => {
                    if let Err(e) = registry.refresh().await {
                        warn!("Registry refresh failed, keeping previous snapshot: {e}");
                    }
                }
            }
        }
    }
}

impl std::fmt::Debug for BrokerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BrokerRegistry")
            .field("snapshot", &self.get())
            .finish()
    }
}
