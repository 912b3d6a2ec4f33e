//! Error types for workq.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Raised by exclusive creates. Claimers treat this as contention, not failure.
    #[error("node already exists: {0}")]
    NodeExists(String),

    #[error("no such node: {0}")]
    NoNode(String),

    #[error("coordination session expired")]
    SessionExpired,

    #[error("coordination service error: {0}")]
    Coordination(String),

    #[error("wait cancelled")]
    Cancelled,

    #[error("configuration error: {0}")]
    Config(String),

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, Error>;
