//! Listener stand-in that dials back to a follower's callback endpoint.

use async_trait::async_trait;
use tokio::sync::OnceCell;

use p2patter_client::{ClientConfig, Connection};
use p2patter_core::{Error, Listener};
use p2patter_proto::{Event, ListenerRef, Operation, ResponsePayload};

/// Forwards events to a listener exported by a remote callback endpoint.
///
/// The connection is dialed on first delivery. Any failure, including the
/// endpoint answering that it no longer knows the listener, is reported as
/// [`Error::ListenerDelivery`], which ends the subscription.
pub struct RemoteListener {
    target: ListenerRef,
    config: ClientConfig,
    connection: OnceCell<Connection>,
}

impl RemoteListener {
    /// Create a stand-in for `target`. `config` supplies timeouts and size
    /// limits; its address is replaced by the target endpoint.
    pub fn new(target: ListenerRef, config: ClientConfig) -> Self {
        let config = config.with_address(target.endpoint.clone());
        Self {
            target,
            config,
            connection: OnceCell::new(),
        }
    }

    /// The listener this stand-in delivers to.
    pub fn target(&self) -> &ListenerRef {
        &self.target
    }

    async fn deliver(&self, seq: u64, event: Event) -> Result<(), p2patter_client::Error> {
        let connection = self
            .connection
            .get_or_try_init(|| Connection::connect(self.config.clone()))
            .await?;

        match connection
            .call(Operation::Notify {
                listener_id: self.target.listener_id,
                seq,
                event,
            })
            .await?
        {
            ResponsePayload::Acknowledged => Ok(()),
            _ => Err(p2patter_client::Error::Protocol(
                p2patter_proto::Error::UnexpectedResponse("acknowledged"),
            )),
        }
    }
}

#[async_trait]
impl<E> Listener<E> for RemoteListener
where
    E: Clone + Into<Event> + Send + Sync + 'static,
{
    async fn report(&self, seq: u64, event: &E) -> Result<(), Error> {
        self.deliver(seq, event.clone().into()).await.map_err(|e| {
            tracing::debug!(
                endpoint = %self.target.endpoint,
                listener_id = self.target.listener_id,
                seq,
                error = %e,
                "notification failed"
            );
            Error::ListenerDelivery(format!(
                "{}#{}: {}",
                self.target.endpoint, self.target.listener_id, e
            ))
        })
    }
}
