//! Client-facing listener of the load balancer.
//!
//! One task per client connection owns the [`Session`] and serialises
//! everything that touches it: frames from the client, frames and close
//! events from the broker links.

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_util::codec::FramedRead;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::broker_link::{BrokerEvent, dial_all};
use crate::packet::MqttCodec;
use crate::packet::codec::{decode, peek_type};
use crate::registry::BrokerRegistry;
use crate::session::Session;

#[derive(Debug, Clone)]
pub struct BalancerContext {
    pub registry: Arc<BrokerRegistry>,
    pub connect_timeout: Duration,
    /// Frame limit for the client connection and its broker links.
    pub codec: MqttCodec,
}

/// Accept clients until `shutdown` fires.
pub async fn start_balancer_server(
    listener: TcpListener,
    ctx: BalancerContext,
    shutdown: CancellationToken,
) {
    if let Ok(addr) = listener.local_addr() {
        info!("Load balancer listening on {addr}");
    }

    loop {
        let (stream, peer) = tokio::select! {
            _ = shutdown.cancelled() => break,
            accepted = listener.accept() => match accepted {
                Ok(conn) => conn,
                Err(e) => {
                    warn!("Accept failed: {e}");
                    continue;
                }
            },
        };

        let client_id = format!("client-{}", uuid::Uuid::new_v4());
        debug!("{client_id} connected from {peer}");
        tokio::spawn(handle_client(stream, client_id, ctx.clone(), shutdown.child_token()));
    }
}

async fn handle_client(
    stream: TcpStream,
    client_id: String,
    ctx: BalancerContext,
    cancel: CancellationToken,
) {
    if let Err(e) = stream.set_nodelay(true) {
        debug!("set_nodelay on {client_id}: {e}");
    }
    let (read_half, mut write_half) = stream.into_split();
    let mut frames = FramedRead::new(read_half, ctx.codec);
    let (events_tx, mut events) = mpsc::unbounded_channel::<BrokerEvent>();
    let mut session = Session::new(client_id.clone());

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            next = frames.next() => {
                let raw = match next {
                    Some(Ok(raw)) => raw,
                    Some(Err(e)) => {
                        warn!("{client_id} sent an unreadable stream: {e}");
                        break;
                    }
                    None => break,
                };

                if !session.is_attached() {
                    let brokers = ctx.registry.get().brokers();
                    let links =
                        dial_all(&brokers, ctx.connect_timeout, ctx.codec, &events_tx, &cancel)
                            .await;
                    if let Err(e) = session.attach(links) {
                        error!("Closing {client_id}: {e}");
                        break;
                    }
                }

                let packet = match decode(raw, session.protocol_level()) {
                    Ok(packet) => packet,
                    Err(e) => {
                        warn!("Dropping frame from {client_id}: {e}");
                        continue;
                    }
                };
                if let Err(e) = session.route_client_packet(&packet, &ctx.registry) {
                    warn!("Dropping {:?} from {client_id}: {e}", packet.packet_type);
                }
            }
            Some(event) = events.recv() => match event {
                BrokerEvent::Frame { broker_id, raw } => {
                    let forward = peek_type(&raw)
                        .map(|pt| session.should_forward_to_client(&broker_id, pt))
                        .unwrap_or(false);
                    if forward && write_half.write_all(&raw).await.is_err() {
                        break;
                    }
                }
                BrokerEvent::Closed { broker_id } => {
                    match session.on_broker_closed(&broker_id, &ctx.registry) {
                        Ok(outcome) => debug!("{client_id}: {outcome:?}"),
                        Err(e) => {
                            error!("Closing {client_id}: {e}");
                            break;
                        }
                    }
                }
            },
        }
    }

    cancel.cancel();
    let _ = write_half.shutdown().await;
    info!("{client_id} disconnected");
}
