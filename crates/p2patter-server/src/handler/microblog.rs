use std::sync::Arc;

use async_trait::async_trait;
use p2patter_client::ClientConfig;
use p2patter_core::{Error, MicroblogService};
use p2patter_proto::{Operation, Request, Response, ResponsePayload};

use super::{error_response, listener_config, unsupported, RequestHandler};
use crate::config::ServerConfig;
use crate::remote_listener::RemoteListener;

/// Serves one owner's microblog.
pub struct MicroblogHandler {
    service: Arc<MicroblogService>,
    listener_config: ClientConfig,
}

impl MicroblogHandler {
    /// Create a handler for `service`.
    pub fn new(service: Arc<MicroblogService>, config: &ServerConfig) -> Self {
        Self {
            service,
            listener_config: listener_config(config),
        }
    }

    /// The hosted service.
    pub fn service(&self) -> &Arc<MicroblogService> {
        &self.service
    }

    fn handle_inner(&self, request: &Request) -> Result<Response, Error> {
        let id = request.id;
        let payload = match &request.operation {
            Operation::Ping => ResponsePayload::Pong,
            Operation::PostMessage { text } => {
                ResponsePayload::Rendered(self.service.post_message(text))
            }
            Operation::DeleteMessage { serial } => {
                ResponsePayload::Rendered(self.service.delete_message(*serial)?)
            }
            Operation::Subscribe { listener } => {
                let remote = RemoteListener::new(listener.clone(), self.listener_config.clone());
                let grant = self.service.subscribe(Arc::new(remote));
                tracing::info!(
                    owner = %self.service.owner(),
                    endpoint = %listener.endpoint,
                    lease_id = grant.lease_id,
                    "subscriber added"
                );
                ResponsePayload::Lease(grant)
            }
            Operation::RecentSnapshot => ResponsePayload::Snapshot(self.service.recent_snapshot()),
            Operation::RenewLease { lease_id } => {
                ResponsePayload::Lease(self.service.renew(*lease_id)?)
            }
            Operation::CancelLease { lease_id } => {
                self.service.cancel(*lease_id)?;
                ResponsePayload::Acknowledged
            }
            other => return Ok(unsupported(id, other)),
        };
        Ok(Response::ok(id, payload))
    }
}

#[async_trait]
impl RequestHandler for MicroblogHandler {
    async fn handle(&self, request: Request) -> Response {
        match self.handle_inner(&request) {
            Ok(response) => response,
            Err(e) => {
                tracing::debug!(op = request.operation.name(), error = %e, "request failed");
                error_response(request.id, e)
            }
        }
    }
}
