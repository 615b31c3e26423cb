//! Server error types.

use thiserror::Error;

/// Server errors.
#[derive(Debug, Error)]
pub enum Error {
    /// Service error, such as the owner name being taken.
    #[error(transparent)]
    Service(#[from] p2patter_core::Error),

    /// Protocol error.
    #[error("protocol error: {0}")]
    Protocol(#[from] p2patter_proto::Error),

    /// Transport error.
    #[error("transport error: {0}")]
    Transport(String),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// IO error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<p2patter_client::Error> for Error {
    fn from(error: p2patter_client::Error) -> Self {
        Error::Service(error.into())
    }
}
