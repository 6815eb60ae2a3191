use std::collections::HashMap;

use super::sled_store::drained_letters;
use super::Ledger;
use crate::test_support::temp_ledger;
use crate::utils::Error;

#[tokio::test]
async fn register_and_clear_dns() {
    let (_dir, ledger) = temp_ledger();
    ledger.register_dns("b1.zilmqtt", "10.0.0.1", 1883).await.unwrap();
    ledger.register_dns("b0.zilmqtt", "10.0.0.2", 1884).await.unwrap();

    let records = ledger.get_dns_records().await.unwrap();
    let ids: Vec<_> = records.keys().cloned().collect();
    assert_eq!(ids, vec!["b0.zilmqtt", "b1.zilmqtt"]);
    assert_eq!(records["b1.zilmqtt"].port, 1883);

    ledger.clear_dns_cache().await.unwrap();
    assert!(ledger.get_dns_records().await.unwrap().is_empty());
}

#[tokio::test]
async fn topic_assignments_are_replaced_whole() {
    let (_dir, ledger) = temp_ledger();
    ledger
        .update_topic_assignments("t", &["a".into(), "a".into()])
        .await
        .unwrap();
    ledger
        .update_topic_assignments("t", &["b".into()])
        .await
        .unwrap();

    let map = ledger.get_broker_topic_map().await.unwrap();
    assert_eq!(map["t"], vec!["b".to_string()]);
}

#[tokio::test]
async fn dead_letter_queue_is_cleared_on_fetch() {
    let (_dir, ledger) = temp_ledger();
    let mut batch = HashMap::new();
    batch.insert("c1".to_string(), "m1".to_string());
    ledger.set_dead_letter_queue(&batch).await.unwrap();
    batch.insert("c1".to_string(), "m2".to_string());
    ledger.set_dead_letter_queue(&batch).await.unwrap();

    assert_eq!(
        ledger.get_dead_letter_queue("c1").await.unwrap(),
        vec!["m1".to_string(), "m2".to_string()]
    );
    assert!(ledger.get_dead_letter_queue("c1").await.unwrap().is_empty());
}

#[test]
fn removed_letters_survive_a_failed_flush() {
    let flush_err = Error::Io(std::io::Error::other("disk full"));

    let letters = drained_letters("c1", Some(&br#"["m1","m2"]"#[..]), Err(flush_err));

    assert_eq!(letters, vec!["m1".to_string(), "m2".to_string()]);
    assert!(drained_letters("c1", None, Ok(())).is_empty());
}

#[tokio::test]
async fn retained_messages_append() {
    let (_dir, ledger) = temp_ledger();
    ledger.set_retained_messages("t", "r1").await.unwrap();
    ledger.set_retained_messages("t", "r2").await.unwrap();
    assert_eq!(
        ledger.get_retained_messages("t").await.unwrap(),
        vec!["r1".to_string(), "r2".to_string()]
    );
    assert!(ledger.get_retained_messages("other").await.unwrap().is_empty());
}
