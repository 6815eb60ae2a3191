//! The `error` module defines the error type shared by the load balancer,
//! the broker registry and the dead-letter exchange.
//!
//! Errors are recovered at the nearest boundary: a single client session or a
//! single dead-letter exchange instance. Nothing here is allowed to take down
//! the accept loops.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed frame: {0}")]
    Codec(String),

    #[error("configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("ledger call '{op}' failed: {message}")]
    Ledger { op: &'static str, message: String },

    #[error("ledger call '{0}' timed out")]
    LedgerTimeout(&'static str),

    #[error("sled error: {0}")]
    Sled(#[from] sled::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("base64 error: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("no broker reachable for session {0}")]
    NoBrokers(String),

    #[error("session {0} has no alternate broker to fail over to")]
    NoAlternateBroker(String),

    #[error("invalid broker announcement '{0}'")]
    InvalidAnnouncement(String),
}

impl Error {
    /// True for failures of the external ledger that a later call may not hit again.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Error::Ledger { .. } | Error::LedgerTimeout(_) | Error::Sled(_) | Error::Io(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, Error>;
