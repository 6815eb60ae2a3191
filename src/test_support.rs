//! Fixtures shared by the unit tests.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tempfile::TempDir;

use crate::ledger::{BrokerDirectory, Ledger, SledLedger, TopicMap};
use crate::utils::retry::RetryPolicy;
use crate::utils::{Error, Result};

pub fn temp_ledger() -> (TempDir, SledLedger) {
    let dir = tempfile::tempdir().unwrap();
    let ledger = SledLedger::open(dir.path().to_str().unwrap()).unwrap();
    (dir, ledger)
}

pub fn fast_retry() -> RetryPolicy {
    RetryPolicy {
        max_attempts: 2,
        initial_backoff: Duration::from_millis(1),
        call_timeout: Duration::from_secs(1),
    }
}

/// A sled ledger that can be switched into an unreachable state.
pub struct FlakyLedger {
    inner: SledLedger,
    down: AtomicBool,
    pub writes: AtomicUsize,
}

impl FlakyLedger {
    pub fn new(inner: SledLedger) -> Arc<Self> {
        Arc::new(Self {
            inner,
            down: AtomicBool::new(false),
            writes: AtomicUsize::new(0),
        })
    }

    pub fn set_down(&self, down: bool) {
        self.down.store(down, Ordering::SeqCst);
    }

    fn check(&self, op: &'static str) -> Result<()> {
        if self.down.load(Ordering::SeqCst) {
            return Err(Error::Ledger {
                op,
                message: "ledger unreachable".into(),
            });
        }
        Ok(())
    }

    fn write(&self, op: &'static str) -> Result<()> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        self.check(op)
    }
}

#[async_trait]
impl Ledger for FlakyLedger {
    async fn get_dns_records(&self) -> Result<BrokerDirectory> {
        self.check("get_dns_records")?;
        self.inner.get_dns_records().await
    }

    async fn get_broker_topic_map(&self) -> Result<TopicMap> {
        self.check("get_broker_topic_map")?;
        self.inner.get_broker_topic_map().await
    }

    async fn register_dns(&self, hostname: &str, ip: &str, port: u16) -> Result<()> {
        self.write("register_dns")?;
        self.inner.register_dns(hostname, ip, port).await
    }

    async fn clear_dns_cache(&self) -> Result<()> {
        self.write("clear_dns_cache")?;
        self.inner.clear_dns_cache().await
    }

    async fn update_topic_assignments(&self, topic: &str, brokers: &[String]) -> Result<()> {
        self.write("update_topic_assignments")?;
        self.inner.update_topic_assignments(topic, brokers).await
    }

    async fn get_retained_messages(&self, topic: &str) -> Result<Vec<String>> {
        self.check("get_retained_messages")?;
        self.inner.get_retained_messages(topic).await
    }

    async fn set_retained_messages(&self, topic: &str, message: &str) -> Result<()> {
        self.write("set_retained_messages")?;
        self.inner.set_retained_messages(topic, message).await
    }

    async fn get_dead_letter_queue(&self, client_id: &str) -> Result<Vec<String>> {
        self.check("get_dead_letter_queue")?;
        self.inner.get_dead_letter_queue(client_id).await
    }

    async fn set_dead_letter_queue(&self, records: &HashMap<String, String>) -> Result<()> {
        self.write("set_dead_letter_queue")?;
        self.inner.set_dead_letter_queue(records).await
    }
}
