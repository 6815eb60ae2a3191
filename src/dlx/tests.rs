use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio_util::sync::CancellationToken;

use super::{AckEvent, AckKind, AckRouter, DeadLetterExchange, DeliveryKey};
use crate::packet::PublishPacket;
use crate::store::MessageStore;
use crate::test_support::{FlakyLedger, temp_ledger};
use crate::utils::Error;

const TIMEOUT: Duration = Duration::from_secs(10);

fn publish(retain: bool) -> PublishPacket {
    PublishPacket {
        topic: "sensors/temp".into(),
        qos: 1,
        retain,
        message_id: Some(7),
        payload: Bytes::from_static(b"21.5"),
    }
}

fn ack(client_id: &str, kind: AckKind) -> AckEvent {
    AckEvent {
        key: DeliveryKey {
            topic: "sensors/temp".into(),
            message_id: 7,
        },
        client_id: client_id.to_string(),
        kind,
    }
}

fn recipients(ids: &[&str]) -> Vec<String> {
    ids.iter().map(|s| s.to_string()).collect()
}

#[tokio::test(start_paused = true)]
async fn only_unacknowledged_clients_get_dead_letters() {
    let (_dir, ledger) = temp_ledger();
    let store = Arc::new(MessageStore::new(Arc::new(ledger)));
    let router = AckRouter::new();

    let dlx = DeadLetterExchange::new(
        &router,
        store.clone(),
        recipients(&["c1", "c2", "c3"]),
        publish(false),
        TIMEOUT,
        CancellationToken::new(),
    );
    assert_eq!(router.publish(ack("c1", AckKind::Puback)), 1);
    assert_eq!(router.publish(ack("c2", AckKind::Pubrel)), 1);

    assert_eq!(dlx.start_timer().await.unwrap(), 1);

    assert!(store.dequeue_dead_letters("c1").await.unwrap().is_empty());
    assert!(store.dequeue_dead_letters("c2").await.unwrap().is_empty());
    assert_eq!(
        store.dequeue_dead_letters("c3").await.unwrap(),
        vec![publish(false)]
    );
}

#[tokio::test(start_paused = true)]
async fn fully_acknowledged_publish_writes_nothing() {
    let (_dir, ledger) = temp_ledger();
    let store = Arc::new(MessageStore::new(Arc::new(ledger)));
    let router = AckRouter::new();

    let dlx = DeadLetterExchange::new(
        &router,
        store.clone(),
        recipients(&["c1", "c2", "c3"]),
        publish(false),
        TIMEOUT,
        CancellationToken::new(),
    );
    let timer = tokio::spawn(dlx.start_timer());
    for client in ["c3", "c1", "c2"] {
        router.publish(ack(client, AckKind::Puback));
    }

    assert_eq!(timer.await.unwrap().unwrap(), 0);
    assert_eq!(router.waiting(), 0);
    for client in ["c1", "c2", "c3"] {
        assert!(store.dequeue_dead_letters(client).await.unwrap().is_empty());
    }
}

#[tokio::test(start_paused = true)]
async fn acks_after_expiry_are_not_observed() {
    let (_dir, ledger) = temp_ledger();
    let store = Arc::new(MessageStore::new(Arc::new(ledger)));
    let router = AckRouter::new();

    let dlx = DeadLetterExchange::new(
        &router,
        store.clone(),
        recipients(&["c1"]),
        publish(false),
        TIMEOUT,
        CancellationToken::new(),
    );
    assert_eq!(router.waiting(), 1);
    assert_eq!(dlx.start_timer().await.unwrap(), 1);

    assert_eq!(router.waiting(), 0);
    assert_eq!(router.publish(ack("c1", AckKind::Puback)), 0);
    assert_eq!(store.dequeue_dead_letters("c1").await.unwrap().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn acks_for_other_messages_are_not_delivered() {
    let (_dir, ledger) = temp_ledger();
    let store = Arc::new(MessageStore::new(Arc::new(ledger)));
    let router = AckRouter::new();

    let dlx = DeadLetterExchange::new(
        &router,
        store,
        recipients(&["c1"]),
        publish(false),
        TIMEOUT,
        CancellationToken::new(),
    );
    let mut other = ack("c1", AckKind::Puback);
    other.key.message_id = 8;
    assert_eq!(router.publish(other), 0);

    assert_eq!(dlx.pending_clients(), vec!["c1".to_string()]);
    assert_eq!(dlx.start_timer().await.unwrap(), 1);
}

#[tokio::test(start_paused = true)]
async fn retained_entries_are_never_dead_lettered() {
    let (_dir, ledger) = temp_ledger();
    let store = Arc::new(MessageStore::new(Arc::new(ledger)));
    let router = AckRouter::new();

    let dlx = DeadLetterExchange::new(
        &router,
        store.clone(),
        recipients(&["c1"]),
        publish(true),
        TIMEOUT,
        CancellationToken::new(),
    );
    assert_eq!(dlx.start_timer().await.unwrap(), 0);
    assert!(store.dequeue_dead_letters("c1").await.unwrap().is_empty());
}

#[tokio::test]
async fn shutdown_drains_pending_entries_immediately() {
    let (_dir, ledger) = temp_ledger();
    let store = Arc::new(MessageStore::new(Arc::new(ledger)));
    let router = AckRouter::new();
    let shutdown = CancellationToken::new();

    let dlx = DeadLetterExchange::new(
        &router,
        store.clone(),
        recipients(&["c1", "c2"]),
        publish(false),
        Duration::from_secs(3600),
        shutdown.clone(),
    );
    router.publish(ack("c2", AckKind::Puback));
    shutdown.cancel();

    let written = tokio::time::timeout(Duration::from_secs(5), dlx.start_timer())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(written, 1);
    assert_eq!(store.dequeue_dead_letters("c1").await.unwrap().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn store_failure_at_expiry_is_reported() {
    let (_dir, inner) = temp_ledger();
    let ledger = FlakyLedger::new(inner);
    let store = Arc::new(MessageStore::new(ledger.clone()));
    let router = AckRouter::new();

    let dlx = DeadLetterExchange::new(
        &router,
        store,
        recipients(&["c1"]),
        publish(false),
        TIMEOUT,
        CancellationToken::new(),
    );
    ledger.set_down(true);

    let res = dlx.start_timer().await;

    assert!(matches!(
        res,
        Err(Error::Ledger {
            op: "set_dead_letter_queue",
            ..
        })
    ));
    assert_eq!(router.waiting(), 0);
    assert_eq!(ledger.writes.load(std::sync::atomic::Ordering::SeqCst), 1);
}
