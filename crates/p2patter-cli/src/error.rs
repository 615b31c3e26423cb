//! CLI error types.

use thiserror::Error;

/// Errors reported by the command-line client.
#[derive(Debug, Error)]
pub enum CliError {
    /// Malformed arguments.
    #[error("{0}")]
    Usage(String),

    /// The owner has no running microblog.
    #[error("{0} is not bound")]
    NotBound(String),

    /// The serial does not name a live message.
    #[error("no such message: {0}")]
    NotFound(String),

    /// Registry or microblog unreachable.
    #[error("connectivity error: {0}")]
    Connectivity(String),

    /// Anything else.
    #[error("{0}")]
    Other(String),
}

impl From<p2patter_core::Error> for CliError {
    fn from(error: p2patter_core::Error) -> Self {
        match error {
            p2patter_core::Error::NotBound(name) => CliError::NotBound(name),
            p2patter_core::Error::NotFound(detail) => CliError::NotFound(detail),
            p2patter_core::Error::Communication(detail) => CliError::Connectivity(detail),
            other => CliError::Other(other.to_string()),
        }
    }
}

impl From<p2patter_client::Error> for CliError {
    fn from(error: p2patter_client::Error) -> Self {
        p2patter_core::Error::from(error).into()
    }
}
