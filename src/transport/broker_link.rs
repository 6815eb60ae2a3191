//! Outbound TCP connections from a client session to the brokers.
//!
//! Each link runs a writer task fed by the session's [`BrokerLink`] channel
//! and a reader task that cuts broker frames and reports them, followed by a
//! single `Closed` event, on the session's event channel.

use std::time::Duration;

use bytes::Bytes;
use futures::StreamExt;
use futures::future::join_all;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_util::codec::FramedRead;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::packet::MqttCodec;
use crate::registry::Broker;
use crate::session::BrokerLink;
use crate::utils::Result;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BrokerEvent {
    Frame { broker_id: String, raw: Bytes },
    Closed { broker_id: String },
}

/// Connect to `broker` and start its reader and writer tasks. `codec` bounds
/// the frames accepted from the broker.
pub async fn dial(
    broker: &Broker,
    connect_timeout: Duration,
    codec: MqttCodec,
    events: mpsc::UnboundedSender<BrokerEvent>,
    cancel: CancellationToken,
) -> Result<BrokerLink> {
    let addr = format!("{}:{}", broker.host, broker.port);
    let stream = match tokio::time::timeout(connect_timeout, TcpStream::connect(&addr)).await {
        Ok(res) => res?,
        Err(_) => {
            return Err(std::io::Error::new(
                std::io::ErrorKind::TimedOut,
                format!("connect to {addr} timed out"),
            )
            .into());
        }
    };
    stream.set_nodelay(true)?;
    let (read_half, mut write_half) = stream.into_split();
    let (tx, mut rx) = mpsc::unbounded_channel::<Bytes>();
    let link_cancel = cancel.child_token();

    let id = broker.id.clone();
    let writer_cancel = link_cancel.clone();
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = writer_cancel.cancelled() => break,
                frame = rx.recv() => {
                    let Some(frame) = frame else { break };
                    if let Err(e) = write_half.write_all(&frame).await {
                        warn!("Write to broker '{id}' failed: {e}");
                        break;
                    }
                }
            }
        }
        let _ = write_half.shutdown().await;
    });

    let id = broker.id.clone();
    tokio::spawn(async move {
        let mut frames = FramedRead::new(read_half, codec);
        loop {
            tokio::select! {
                _ = link_cancel.cancelled() => return,
                next = frames.next() => match next {
                    Some(Ok(raw)) => {
                        let event = BrokerEvent::Frame { broker_id: id.clone(), raw };
                        if events.send(event).is_err() {
                            break;
                        }
                    }
                    Some(Err(e)) => {
                        warn!("Unreadable stream from broker '{id}': {e}");
                        break;
                    }
                    None => break,
                },
            }
        }
        debug!("Link to broker '{id}' closed");
        link_cancel.cancel();
        let _ = events.send(BrokerEvent::Closed { broker_id: id });
    });

    Ok(BrokerLink::new(broker.id.clone(), tx))
}

/// Dial every broker concurrently. Unreachable brokers are logged and left
/// out; the rest keep the order of `brokers`.
pub async fn dial_all(
    brokers: &[Broker],
    connect_timeout: Duration,
    codec: MqttCodec,
    events: &mpsc::UnboundedSender<BrokerEvent>,
    cancel: &CancellationToken,
) -> Vec<BrokerLink> {
    let attempts = brokers
        .iter()
        .map(|b| dial(b, connect_timeout, codec, events.clone(), cancel.clone()));

    join_all(attempts)
        .await
        .into_iter()
        .zip(brokers)
        .filter_map(|(res, broker)| match res {
            Ok(link) => Some(link),
            Err(e) => {
                warn!("Broker '{}' unreachable: {e}", broker.id);
                None
            }
        })
        .collect()
}
