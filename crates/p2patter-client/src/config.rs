//! Client configuration.

use std::time::Duration;

/// Default registry address.
pub const DEFAULT_ADDRESS: &str = "tcp://127.0.0.1:4160";

/// Default request timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Default maximum message size (4 MB plus the frame header).
pub const DEFAULT_MAX_MESSAGE_SIZE: usize =
    p2patter_proto::codec::MAX_FRAME_SIZE + p2patter_proto::codec::LENGTH_PREFIX_SIZE;

/// Build an nng TCP URL from a host and port.
pub fn tcp_url(host: &str, port: u16) -> String {
    format!("tcp://{}:{}", host, port)
}

/// Client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Endpoint address (e.g., "tcp://127.0.0.1:4160" or "ipc:///tmp/p2patter.sock").
    pub address: String,

    /// Request timeout. A call that exceeds it fails as a communication error.
    pub timeout: Duration,

    /// Maximum message size in bytes.
    pub max_message_size: usize,
}

impl ClientConfig {
    /// Create a configuration for the given address.
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            timeout: DEFAULT_TIMEOUT,
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
        }
    }

    /// Create a configuration for a TCP host and port.
    pub fn tcp(host: &str, port: u16) -> Self {
        Self::new(tcp_url(host, port))
    }

    /// Same settings, different address.
    pub fn with_address(mut self, address: impl Into<String>) -> Self {
        self.address = address.into();
        self
    }

    /// Set the request timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the maximum message size.
    pub fn with_max_message_size(mut self, size: usize) -> Self {
        self.max_message_size = size;
        self
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self::new(DEFAULT_ADDRESS)
    }
}
