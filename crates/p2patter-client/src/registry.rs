//! Registry client.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;

use p2patter_core::{ChangeListener, Directory, Error, MicroblogRef};
use p2patter_proto::{ChangeFilter, LeaseGrant, Operation, ResponsePayload};

use crate::callback::CallbackEndpoint;
use crate::config::ClientConfig;
use crate::connection::Connection;
use crate::microblog::{unexpected, RemoteMicroblog};

/// Handle to a name registry reached over the network.
///
/// Services use it to bind their names; followers use it as a
/// [`Directory`]. Watching needs a [`CallbackEndpoint`].
pub struct RegistryClient {
    connection: Connection,
    config: ClientConfig,
    callbacks: Option<Arc<CallbackEndpoint>>,
    /// Exported listener per watch lease.
    exported: DashMap<u64, u64>,
}

impl RegistryClient {
    /// Connect to the registry at `config.address`.
    ///
    /// Microblogs resolved through this client inherit `config` apart from
    /// the address.
    pub async fn connect(
        config: ClientConfig,
        callbacks: Option<Arc<CallbackEndpoint>>,
    ) -> Result<Self, Error> {
        let connection = Connection::connect(config.clone()).await?;
        Ok(Self {
            connection,
            config,
            callbacks,
            exported: DashMap::new(),
        })
    }

    /// Registry address.
    pub fn address(&self) -> &str {
        self.connection.address()
    }

    /// Check that the registry answers.
    pub async fn ping(&self) -> Result<(), Error> {
        Ok(self.connection.ping().await?)
    }

    /// Bind `name` to a service endpoint for one lease interval.
    pub async fn bind(
        &self,
        name: &str,
        type_tag: &str,
        endpoint: &str,
        lease: Duration,
    ) -> Result<LeaseGrant, Error> {
        self.lease(Operation::Bind {
            name: name.to_string(),
            type_tag: type_tag.to_string(),
            endpoint: endpoint.to_string(),
            lease_ms: lease.as_millis() as u64,
        })
        .await
    }

    /// Remove a binding.
    pub async fn unbind(&self, name: &str) -> Result<(), Error> {
        self.connection
            .call(Operation::Unbind {
                name: name.to_string(),
            })
            .await?;
        Ok(())
    }

    /// Resolve a name to its endpoint address.
    pub async fn lookup_endpoint(&self, name: &str) -> Result<String, Error> {
        match self
            .connection
            .call(Operation::Lookup {
                name: name.to_string(),
            })
            .await?
        {
            ResponsePayload::Endpoint(endpoint) => Ok(endpoint),
            _ => Err(unexpected("endpoint")),
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
impl Directory for RegistryClient {
    async fn lookup(&self, name: &str) -> Result<Arc<dyn MicroblogRef>, Error> {
        let endpoint = self.lookup_endpoint(name).await?;
        let microblog = RemoteMicroblog::connect(
            name,
            self.config.clone().with_address(endpoint),
            self.callbacks.clone(),
        )
        .await?;
        Ok(Arc::new(microblog))
    }

    async fn list(&self, type_tag: &str) -> Result<Vec<String>, Error> {
        match self
            .connection
            .call(Operation::List {
                type_tag: type_tag.to_string(),
            })
            .await?
        {
            ResponsePayload::Names(names) => Ok(names),
            _ => Err(unexpected("names")),
        }
    }

    async fn watch(
        &self,
        filter: ChangeFilter,
        listener: Arc<ChangeListener>,
    ) -> Result<LeaseGrant, Error> {
        let callbacks = self.callbacks.as_ref().ok_or_else(|| {
            Error::Unsupported("watching needs a callback endpoint".to_string())
        })?;

        let listener_ref = callbacks.export_changes(listener);
        let listener_id = listener_ref.listener_id;
        match self
            .lease(Operation::Watch {
                filter,
                listener: listener_ref,
            })
            .await
        {
            Ok(grant) => {
                self.exported.insert(grant.lease_id, listener_id);
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
}

impl std::fmt::Debug for RegistryClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegistryClient")
            .field("address", &self.connection.address())
            .finish()
    }
}
