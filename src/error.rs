//! Crate-level error type

use crate::billing::store::StoreError;

/// Errors raised outside the checkout path (configuration, I/O, decoding)
#[derive(Debug, thiserror::Error)]
pub enum GateError {
    #[error("Configuration error: {0}")]
    Config(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Document store error: {0}")]
    Store(#[from] StoreError),
}

pub type GateResult<T> = Result<T, GateError>;
