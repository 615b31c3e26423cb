//! Client error types.

use thiserror::Error;

/// Client errors.
#[derive(Debug, Error)]
pub enum Error {
    /// Connection failed.
    #[error("connection error: {0}")]
    Connection(String),

    /// Protocol error.
    #[error("protocol error: {0}")]
    Protocol(#[from] p2patter_proto::Error),

    /// Request timed out.
    #[error("request timed out")]
    Timeout,

    /// The endpoint answered with an error status.
    #[error("server error {code}: {message}")]
    Server {
        /// Wire error code.
        code: u32,
        /// Detail text.
        message: String,
    },
}

impl From<Error> for p2patter_core::Error {
    fn from(error: Error) -> Self {
        match error {
            Error::Connection(msg) => p2patter_core::Error::Communication(msg),
            Error::Timeout => p2patter_core::Error::Communication("request timed out".to_string()),
            Error::Protocol(e) => p2patter_core::Error::Protocol(e),
            Error::Server { code, message } => p2patter_core::Error::from_code(code, message),
        }
    }
}
