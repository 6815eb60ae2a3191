use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio_util::sync::CancellationToken;

use super::BrokerHooks;
use crate::dlx::{AckEvent, AckKind, DeliveryKey};
use crate::packet::PublishPacket;
use crate::store::MessageStore;
use crate::test_support::temp_ledger;

fn hooks() -> (tempfile::TempDir, Arc<MessageStore>, BrokerHooks) {
    let (dir, ledger) = temp_ledger();
    let store = Arc::new(MessageStore::new(Arc::new(ledger)));
    let hooks = BrokerHooks::new(store.clone(), Duration::from_secs(10), CancellationToken::new());
    (dir, store, hooks)
}

fn publish(qos: u8, retain: bool) -> PublishPacket {
    PublishPacket {
        topic: "sensors/temp".into(),
        qos,
        retain,
        message_id: (qos > 0).then_some(11),
        payload: Bytes::from_static(b"19.0"),
    }
}

#[tokio::test(start_paused = true)]
async fn silent_subscriber_gets_exactly_one_dead_letter() {
    let (_dir, store, hooks) = hooks();
    let recipients = vec!["alive".to_string(), "gone".to_string()];

    assert!(hooks.authorize_publish(&publish(1, false), recipients).await);
    hooks.on_ack(AckEvent {
        key: DeliveryKey {
            topic: "sensors/temp".into(),
            message_id: 11,
        },
        client_id: "alive".into(),
        kind: AckKind::Puback,
    });

    tokio::time::sleep(Duration::from_secs(11)).await;
    hooks.drain().await;

    assert!(store.dequeue_dead_letters("alive").await.unwrap().is_empty());
    assert_eq!(
        store.dequeue_dead_letters("gone").await.unwrap(),
        vec![publish(1, false)]
    );
}

#[tokio::test]
async fn reconnecting_client_receives_dead_letters_once() {
    let (_dir, store, hooks) = hooks();
    assert!(hooks.authorize_publish(&publish(1, false), vec!["c1".into()]).await);
    hooks.drain().await;

    assert_eq!(hooks.on_client_connected("c1").await, vec![publish(1, false)]);
    assert!(hooks.on_client_connected("c1").await.is_empty());
    assert!(store.dequeue_dead_letters("c1").await.unwrap().is_empty());
}

#[tokio::test]
async fn qos0_and_retained_publishes_are_not_tracked() {
    let (_dir, _store, hooks) = hooks();

    assert!(!hooks.authorize_publish(&publish(0, false), vec!["c1".into()]).await);
    assert!(!hooks.authorize_publish(&publish(1, true), vec!["c1".into()]).await);
    assert_eq!(hooks.ack_router().waiting(), 0);
}

#[tokio::test]
async fn retained_publish_is_served_to_new_subscribers() {
    let (_dir, _store, hooks) = hooks();
    let retained = publish(1, true);

    hooks.authorize_publish(&retained, vec![]).await;

    assert_eq!(hooks.authorize_subscribe("sensors/temp").await, vec![retained]);
    assert!(hooks.authorize_subscribe("sensors/other").await.is_empty());
}

#[tokio::test]
async fn drain_flushes_pending_exchanges_without_waiting_for_expiry() {
    let (_dir, ledger) = temp_ledger();
    let store = Arc::new(MessageStore::new(Arc::new(ledger)));
    let hooks = BrokerHooks::new(store.clone(), Duration::from_secs(3600), CancellationToken::new());

    assert!(hooks.authorize_publish(&publish(2, false), vec!["idle".into()]).await);
    tokio::time::timeout(Duration::from_secs(5), hooks.drain())
        .await
        .expect("drain should not wait for the exchange timeout");

    assert_eq!(hooks.ack_router().waiting(), 0);
    assert_eq!(
        store.dequeue_dead_letters("idle").await.unwrap(),
        vec![publish(2, false)]
    );
}
