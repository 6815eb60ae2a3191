//! The `utils` module holds the ambient pieces shared by every component:
//! the error type, tracing initialisation and the ledger retry policy.

pub mod error;
pub mod logging;
pub mod retry;

pub use error::{Error, Result};
