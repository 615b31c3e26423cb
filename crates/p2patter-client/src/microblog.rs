//! Remote microblog handle.

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;

use p2patter_core::{Error, MessageListener, MicroblogRef};
use p2patter_proto::{LeaseGrant, Operation, RecentSnapshot, ResponsePayload};

use crate::callback::CallbackEndpoint;
use crate::config::ClientConfig;
use crate::connection::Connection;

/// A microblog service reached over the network.
///
/// Subscribing needs a [`CallbackEndpoint`] to export the listener through.
pub struct RemoteMicroblog {
    owner: String,
    connection: Connection,
    callbacks: Option<Arc<CallbackEndpoint>>,
    /// Exported listener per subscription lease.
    exported: DashMap<u64, u64>,
}

impl RemoteMicroblog {
    /// Connect to the microblog of `owner` at `config.address`.
    pub async fn connect(
        owner: impl Into<String>,
        config: ClientConfig,
        callbacks: Option<Arc<CallbackEndpoint>>,
    ) -> Result<Self, Error> {
        let connection = Connection::connect(config).await?;
        Ok(Self {
            owner: owner.into(),
            connection,
            callbacks,
            exported: DashMap::new(),
        })
    }

    /// Owner this handle was resolved for.
    pub fn owner(&self) -> &str {
        &self.owner
    }

    /// Endpoint address.
    pub fn address(&self) -> &str {
        self.connection.address()
    }

    /// Check that the service answers.
    pub async fn ping(&self) -> Result<(), Error> {
        Ok(self.connection.ping().await?)
    }

    async fn rendered(&self, operation: Operation) -> Result<String, Error> {
        match self.connection.call(operation).await? {
            ResponsePayload::Rendered(rendered) => Ok(rendered),
            _ => Err(unexpected("rendered message")),
        }
    }

    async fn lease(&self, operation: Operation) -> Result<LeaseGrant, Error> {
        match self.connection.call(operation).await? {
            ResponsePayload::Lease(grant) => Ok(grant),
            _ => Err(unexpected("lease")),
        }
    }

    fn withdraw(&self, lease_id: u64) {
        if let (Some((_, listener_id)), Some(callbacks)) =
            (self.exported.remove(&lease_id), &self.callbacks)
        {
            callbacks.unexport(listener_id);
        }
    }
}

#[async_trait]
impl MicroblogRef for RemoteMicroblog {
    async fn post_message(&self, text: &str) -> Result<String, Error> {
        self.rendered(Operation::PostMessage {
            text: text.to_string(),
        })
        .await
    }

    async fn delete_message(&self, serial: u64) -> Result<String, Error> {
        self.rendered(Operation::DeleteMessage { serial }).await
    }

    async fn subscribe(&self, listener: Arc<MessageListener>) -> Result<LeaseGrant, Error> {
        let callbacks = self.callbacks.as_ref().ok_or_else(|| {
            Error::Unsupported("subscribing needs a callback endpoint".to_string())
        })?;

        let listener_ref = callbacks.export_messages(listener);
        let listener_id = listener_ref.listener_id;
        match self
            .lease(Operation::Subscribe {
                listener: listener_ref,
            })
            .await
        {
            Ok(grant) => {
                self.exported.insert(grant.lease_id, listener_id);
                tracing::debug!(owner = %self.owner, lease_id = grant.lease_id, listener_id, "subscribed");
                Ok(grant)
            }
            Err(e) => {
                callbacks.unexport(listener_id);
                Err(e)
            }
        }
    }

    async fn renew(&self, lease_id: u64) -> Result<LeaseGrant, Error> {
        let result = self.lease(Operation::RenewLease { lease_id }).await;
        if let Err(Error::LeaseExpired(_)) = &result {
            self.withdraw(lease_id);
        }
        result
    }

    async fn cancel(&self, lease_id: u64) -> Result<(), Error> {
        self.withdraw(lease_id);
        self.connection
            .call(Operation::CancelLease { lease_id })
            .await?;
        Ok(())
    }

    async fn recent_snapshot(&self) -> Result<RecentSnapshot, Error> {
        match self.connection.call(Operation::RecentSnapshot).await? {
            ResponsePayload::Snapshot(snapshot) => Ok(snapshot),
            _ => Err(unexpected("snapshot")),
        }
    }
}

impl std::fmt::Debug for RemoteMicroblog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteMicroblog")
            .field("owner", &self.owner)
            .field("address", &self.connection.address())
            .finish()
    }
}

pub(crate) fn unexpected(expected: &'static str) -> Error {
    Error::Protocol(p2patter_proto::Error::UnexpectedResponse(expected))
}
