//! Error types for EarShot

use thiserror::Error;

/// Core error type
#[derive(Error, Debug)]
pub enum EsError {
    #[error("malformed config: {0}")]
    MalformedConfig(String),

    #[error("transport fault: {0}")]
    Transport(String),

    #[error("malformed packet: {0}")]
    MalformedPacket(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias
pub type EsResult<T> = Result<T, EsError>;
