use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use p2patter_client::ClientConfig;
use p2patter_core::{Error, Registry};
use p2patter_proto::{Operation, Request, Response, ResponsePayload};

use super::{error_response, listener_config, unsupported, RequestHandler};
use crate::config::ServerConfig;
use crate::remote_listener::RemoteListener;

/// Serves the name registry. Bindings map names to endpoint addresses.
pub struct RegistryHandler {
    registry: Arc<Registry<String>>,
    default_binding_lease: Duration,
    listener_config: ClientConfig,
}

impl RegistryHandler {
    /// Create a handler for `registry`.
    pub fn new(registry: Arc<Registry<String>>, config: &ServerConfig) -> Self {
        Self {
            registry,
            default_binding_lease: config.service.binding_lease_interval,
            listener_config: listener_config(config),
        }
    }

    /// The hosted registry.
    pub fn registry(&self) -> &Arc<Registry<String>> {
        &self.registry
    }

    fn handle_inner(&self, request: &Request) -> Result<Response, Error> {
        let id = request.id;
        let payload = match &request.operation {
            Operation::Ping => ResponsePayload::Pong,
            Operation::Bind {
                name,
                type_tag,
                endpoint,
                lease_ms,
            } => {
                // A zero interval asks for the registry default.
                let lease = match lease_ms {
                    0 => self.default_binding_lease,
                    ms => Duration::from_millis(*ms),
                };
                ResponsePayload::Lease(self.registry.bind(name, type_tag, endpoint.clone(), lease)?)
            }
            Operation::Unbind { name } => {
                self.registry.unbind(name)?;
                ResponsePayload::Acknowledged
            }
            Operation::Lookup { name } => ResponsePayload::Endpoint(self.registry.lookup(name)?),
            Operation::List { type_tag } => ResponsePayload::Names(self.registry.list(type_tag)),
            Operation::Watch { filter, listener } => {
                let remote = RemoteListener::new(listener.clone(), self.listener_config.clone());
                let grant = self
                    .registry
                    .add_change_listener(filter.clone(), Arc::new(remote));
                tracing::info!(
                    endpoint = %listener.endpoint,
                    lease_id = grant.lease_id,
                    "change listener added"
                );
                ResponsePayload::Lease(grant)
            }
            Operation::RenewLease { lease_id } => {
                ResponsePayload::Lease(self.registry.renew(*lease_id)?)
            }
            Operation::CancelLease { lease_id } => {
                self.registry.cancel(*lease_id)?;
                ResponsePayload::Acknowledged
            }
            other => return Ok(unsupported(id, other)),
        };
        Ok(Response::ok(id, payload))
    }
}

#[async_trait]
impl RequestHandler for RegistryHandler {
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

#[cfg(test)]
mod tests {
    use super::*;
    use p2patter_proto::{error_codes, ChangeFilter, ListenerRef, Status, MICROBLOG_TYPE};

    fn handler() -> RegistryHandler {
        let config = ServerConfig::new("ipc:///tmp/unused.sock");
        RegistryHandler::new(Arc::new(Registry::new(&config.service)), &config)
    }

    fn error_code(response: &Response) -> Option<u32> {
        match &response.status {
            Status::Ok => None,
            Status::Error { code, .. } => Some(*code),
        }
    }

    #[tokio::test]
    async fn test_bind_lookup_unbind() {
        let handler = handler();
        let endpoint = "tcp://127.0.0.1:7400";

        let bound = handler
            .handle(Request::bind(1, "alice", MICROBLOG_TYPE, endpoint, 60_000))
            .await;
        assert!(matches!(bound.payload, ResponsePayload::Lease(grant) if grant.interval_ms == 60_000));

        let taken = handler
            .handle(Request::bind(2, "alice", MICROBLOG_TYPE, "tcp://elsewhere:1", 0))
            .await;
        assert_eq!(error_code(&taken), Some(error_codes::ALREADY_BOUND));

        let found = handler.handle(Request::lookup(3, "alice")).await;
        assert_eq!(found.payload, ResponsePayload::Endpoint(endpoint.into()));

        let names = handler.handle(Request::list(4, MICROBLOG_TYPE)).await;
        assert_eq!(names.payload, ResponsePayload::Names(vec!["alice".into()]));

        let unbound = handler.handle(Request::unbind(5, "alice")).await;
        assert_eq!(unbound.payload, ResponsePayload::Acknowledged);

        let missing = handler.handle(Request::lookup(6, "alice")).await;
        assert_eq!(error_code(&missing), Some(error_codes::NOT_BOUND));
    }

    #[tokio::test]
    async fn test_default_binding_lease() {
        let handler = handler();
        let bound = handler
            .handle(Request::bind(1, "bob", MICROBLOG_TYPE, "tcp://h:1", 0))
            .await;
        assert!(matches!(bound.payload, ResponsePayload::Lease(grant) if grant.interval_ms == 5000));
    }

    #[tokio::test]
    async fn test_watch_lease() {
        let handler = handler();
        let listener = ListenerRef {
            endpoint: "ipc:///tmp/p2patter-test-nobody.sock".into(),
            listener_id: 2,
        };
        let filter = ChangeFilter::for_type(MICROBLOG_TYPE).report_bound();

        let lease_id = match handler.handle(Request::watch(1, filter, listener)).await.payload {
            ResponsePayload::Lease(grant) => grant.lease_id,
            other => panic!("unexpected payload: {:?}", other),
        };
        let cancelled = handler.handle(Request::cancel_lease(2, lease_id)).await;
        assert!(cancelled.status.is_ok());

        let again = handler.handle(Request::cancel_lease(3, lease_id)).await;
        assert_eq!(error_code(&again), Some(error_codes::LEASE_EXPIRED));
    }

    #[tokio::test]
    async fn test_microblog_operations_unsupported() {
        let handler = handler();
        let response = handler.handle(Request::post_message(1, "hi")).await;
        assert_eq!(error_code(&response), Some(error_codes::UNSUPPORTED));
    }
}
