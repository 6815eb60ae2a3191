//! # zilmqtt
//!
//! `zilmqtt` spreads MQTT clients over a pool of backend brokers. Every client
//! session keeps a live connection to each known broker, so when the broker
//! serving it goes away another one takes over without a reconnect and the
//! client's subscriptions are replayed onto it. On the broker side a
//! dead-letter exchange tracks QoS 1/2 publishes and stores whatever was not
//! acknowledged in time for delivery on the client's next connect.
//!
//! ## Modules
//!
//! - `config`: process configuration (file + environment).
//! - `packet`: MQTT frame splitting, field extraction and classification.
//! - `ledger`: the durable store behind a trait, with a `sled` implementation.
//! - `registry`: cached broker directory and topic-to-broker map.
//! - `session`: per-client broker set, forwarding policy and failover.
//! - `transport`: the client listener, broker links and the registration listener.
//! - `store`: retained messages and dead letters in their durable envelope form.
//! - `dlx`: the dead-letter exchange and the ack router feeding it.
//! - `hooks`: entry points for the embedded broker engine.
//! - `utils`: errors, logging and retry helpers.

pub mod config;
pub mod dlx;
pub mod hooks;
pub mod ledger;
pub mod packet;
pub mod registry;
pub mod session;
pub mod store;
pub mod transport;
pub mod utils;

#[cfg(test)]
mod test_support;
