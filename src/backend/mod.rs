//! Backend adapters
//!
//! One module per store family. Each ships a native client trait mirroring the
//! store's own API, the wire types that API speaks, the adapter translating the
//! record contract onto it, and an in-memory client that executes native requests
//! the way the store would.

use std::time::Duration;

use thiserror::Error;

use crate::config::StoreConfig;

pub mod couch;
pub mod dynamo;
pub mod simpledb;
pub mod table;

/// Failure reported by a native client
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ClientError {
    #[error("resource not found: {0}")]
    ResourceNotFound(String),

    #[error("resource in use: {0}")]
    ResourceInUse(String),

    #[error("condition check failed: {0}")]
    ConditionFailed(String),

    #[error("request throttled: {0}")]
    Throttled(String),

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("transport failure: {0}")]
    Transport(String),
}

pub type ClientResult<T> = std::result::Result<T, ClientError>;

/// Delay before resubmitting unprocessed batch items; doubles per attempt
pub(crate) fn retry_delay(config: &StoreConfig, attempt: u32) -> Duration {
    config
        .retry_backoff
        .saturating_mul(2u32.saturating_pow(attempt.min(16)))
}
