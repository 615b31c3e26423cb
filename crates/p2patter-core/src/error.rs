//! Core error types.

use p2patter_proto::error_codes;
use thiserror::Error;

/// Errors raised by logs, hubs, the registry, and their remote stand-ins.
///
/// Every variant maps to a wire error code, so a failure raised inside a
/// remote service surfaces at the caller as the same variant.
#[derive(Debug, Error)]
pub enum Error {
    /// Name has no live binding.
    #[error("not bound: {0}")]
    NotBound(String),

    /// Name is already bound.
    #[error("already bound: {0}")]
    AlreadyBound(String),

    /// Serial number does not resolve to a live message.
    #[error("not found: {0}")]
    NotFound(String),

    /// Lease is unknown or has expired.
    #[error("lease expired: {0}")]
    LeaseExpired(String),

    /// Registry or service unreachable, or the call timed out.
    #[error("communication failure: {0}")]
    Communication(String),

    /// A listener could not be reached.
    #[error("listener delivery failed: {0}")]
    ListenerDelivery(String),

    /// Operation not served by the endpoint.
    #[error("unsupported operation: {0}")]
    Unsupported(String),

    /// Protocol error.
    #[error("protocol error: {0}")]
    Protocol(#[from] p2patter_proto::Error),

    /// Any other failure reported by a remote endpoint.
    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Wire error code for this error.
    pub fn code(&self) -> u32 {
        match self {
            Error::NotBound(_) => error_codes::NOT_BOUND,
            Error::AlreadyBound(_) => error_codes::ALREADY_BOUND,
            Error::NotFound(_) => error_codes::NOT_FOUND,
            Error::LeaseExpired(_) => error_codes::LEASE_EXPIRED,
            Error::Communication(_) => error_codes::COMMUNICATION,
            Error::ListenerDelivery(_) => error_codes::LISTENER_DELIVERY,
            Error::Unsupported(_) => error_codes::UNSUPPORTED,
            Error::Protocol(_) => error_codes::INVALID_REQUEST,
            Error::Internal(_) => error_codes::INTERNAL,
        }
    }

    /// Detail text carried on the wire next to the code.
    pub fn detail(&self) -> String {
        match self {
            Error::NotBound(d)
            | Error::AlreadyBound(d)
            | Error::NotFound(d)
            | Error::LeaseExpired(d)
            | Error::Communication(d)
            | Error::ListenerDelivery(d)
            | Error::Unsupported(d)
            | Error::Internal(d) => d.clone(),
            Error::Protocol(e) => e.to_string(),
        }
    }

    /// Rebuild an error from a wire code and its detail text.
    pub fn from_code(code: u32, detail: impl Into<String>) -> Self {
        let detail = detail.into();
        match code {
            error_codes::NOT_BOUND => Error::NotBound(detail),
            error_codes::ALREADY_BOUND => Error::AlreadyBound(detail),
            error_codes::NOT_FOUND => Error::NotFound(detail),
            error_codes::LEASE_EXPIRED => Error::LeaseExpired(detail),
            error_codes::COMMUNICATION => Error::Communication(detail),
            error_codes::LISTENER_DELIVERY => Error::ListenerDelivery(detail),
            error_codes::UNSUPPORTED => Error::Unsupported(detail),
            error_codes::INVALID_REQUEST => {
                Error::Protocol(p2patter_proto::Error::InvalidMessage(detail))
            }
            _ => Error::Internal(detail),
        }
    }

    /// Whether retrying the call might succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::Communication(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_code_roundtrip() {
        let errors = [
            Error::NotBound("alice".into()),
            Error::AlreadyBound("alice".into()),
            Error::NotFound("message 4".into()),
            Error::LeaseExpired("lease 9".into()),
            Error::Communication("tcp://h:1".into()),
            Error::ListenerDelivery("listener 2".into()),
            Error::Unsupported("bind".into()),
        ];
        for error in errors {
            let rebuilt = Error::from_code(error.code(), error.detail());
            assert_eq!(rebuilt.code(), error.code());
            assert_eq!(rebuilt.detail(), error.detail());
        }
    }

    #[test]
    fn test_unknown_code_is_internal() {
        assert!(matches!(Error::from_code(999, "boom"), Error::Internal(ref d) if d == "boom"));
        assert!(Error::Communication("x".into()).is_transient());
        assert!(!Error::NotFound("x".into()).is_transient());
    }
}
