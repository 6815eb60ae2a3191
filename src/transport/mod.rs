//! The `transport` module owns the TCP side of the load balancer.
//!
//! - `balancer`: the client-facing listener and per-client connection loop.
//! - `broker_link`: outbound connections from a session to each broker.
//! - `registration`: the listener brokers use to announce themselves.

pub mod balancer;
pub mod broker_link;
pub mod registration;

pub use balancer::{BalancerContext, start_balancer_server};
pub use broker_link::BrokerEvent;
pub use registration::start_registration_server;
