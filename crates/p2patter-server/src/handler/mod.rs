//! Request handlers.
//!
//! A server hosts one handler: the microblog of one owner or the name
//! registry. Each answers its own operations and rejects the rest with
//! [`error_codes::UNSUPPORTED`].

mod microblog;
mod registry;

pub use microblog::MicroblogHandler;
pub use registry::RegistryHandler;

use async_trait::async_trait;
use p2patter_client::ClientConfig;
use p2patter_core::Error;
use p2patter_proto::{error_codes, Operation, Request, Response};

use crate::config::ServerConfig;

/// Handles decoded requests.
#[async_trait]
pub trait RequestHandler: Send + Sync {
    /// Handle a request and return its response. Failures are encoded in the
    /// response status.
    async fn handle(&self, request: Request) -> Response;
}

/// Convert an error to an error response.
fn error_response(request_id: u64, error: Error) -> Response {
    Response::error(request_id, error.code(), error.detail())
}

fn unsupported(request_id: u64, operation: &Operation) -> Response {
    Response::error(
        request_id,
        error_codes::UNSUPPORTED,
        format!("{} is not served here", operation.name()),
    )
}

/// Client settings used to dial back to remote listeners.
fn listener_config(config: &ServerConfig) -> ClientConfig {
    ClientConfig::default()
        .with_timeout(config.notify_timeout)
        .with_max_message_size(config.max_message_size)
}
