//! Server processes: the registry and one owner's microblog.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;

use p2patter_client::{ClientConfig, RegistryClient};
use p2patter_core::{Directory, Error as ServiceError, MicroblogService, Registry};
use p2patter_proto::{LeaseGrant, MICROBLOG_TYPE};

use crate::config::ServerConfig;
use crate::error::Error;
use crate::handler::{MicroblogHandler, RegistryHandler};
use crate::transport::Transport;

/// Shortest renewal or sweep period.
const MIN_PERIOD: Duration = Duration::from_millis(50);

/// A running name registry.
pub struct RegistryNode {
    registry: Arc<Registry<String>>,
    transport: Transport,
    sweep_interval: Duration,
}

impl RegistryNode {
    /// Listen on `config.listen_address`.
    pub fn start(config: &ServerConfig) -> Result<Self, Error> {
        let registry = Arc::new(Registry::new(&config.service));
        let handler = Arc::new(RegistryHandler::new(Arc::clone(&registry), config));
        let transport = Transport::new(config, handler)?;

        Ok(Self {
            registry,
            transport,
            sweep_interval: config.sweep_interval,
        })
    }

    /// The hosted registry.
    pub fn registry(&self) -> &Arc<Registry<String>> {
        &self.registry
    }

    /// Address the registry listens on.
    pub fn address(&self) -> &str {
        self.transport.address()
    }

    /// Serve until a shutdown signal arrives, sweeping expired bindings so
    /// that crashed services are announced as unbound.
    pub async fn run_until_shutdown(self, mut shutdown: broadcast::Receiver<()>) -> Result<(), Error> {
        let running = self.transport.start()?;
        let mut sweep = tokio::time::interval(self.sweep_interval.max(MIN_PERIOD));

        loop {
            tokio::select! {
                _ = sweep.tick() => {
                    let removed = self.registry.sweep();
                    if removed > 0 {
                        tracing::info!(removed, "expired bindings removed");
                    }
                }
                _ = shutdown.recv() => break,
            }
        }

        self.transport.log_summary();
        running.stop().await;
        tracing::info!("registry stopped");
        Ok(())
    }
}

/// A running microblog, bound in the registry under its owner name.
pub struct MicroblogNode {
    service: Arc<MicroblogService>,
    transport: Transport,
    registry: RegistryClient,
    binding: LeaseGrant,
    binding_lease: Duration,
    sweep_interval: Duration,
}

impl MicroblogNode {
    /// Listen on `config.listen_address` and bind `name` in the registry at
    /// `registry_address`.
    ///
    /// Fails with [`ServiceError::AlreadyBound`] if the name is taken; the
    /// listening socket is closed again.
    pub async fn start(
        config: &ServerConfig,
        registry_address: &str,
        name: &str,
    ) -> Result<Self, Error> {
        let service = Arc::new(MicroblogService::new(name, &config.service));
        let handler = Arc::new(MicroblogHandler::new(Arc::clone(&service), config));
        let transport = Transport::new(config, handler)?;

        let client_config = ClientConfig::new(registry_address)
            .with_timeout(config.request_timeout)
            .with_max_message_size(config.max_message_size);
        let registry = RegistryClient::connect(client_config, None).await?;

        let binding_lease = config.service.binding_lease_interval;
        let binding = registry
            .bind(name, MICROBLOG_TYPE, transport.address(), binding_lease)
            .await?;
        tracing::info!(
            owner = %name,
            endpoint = %transport.address(),
            lease_id = binding.lease_id,
            "microblog bound"
        );

        Ok(Self {
            service,
            transport,
            registry,
            binding,
            binding_lease,
            sweep_interval: config.sweep_interval,
        })
    }

    /// The hosted service.
    pub fn service(&self) -> &Arc<MicroblogService> {
        &self.service
    }

    /// Address the microblog listens on.
    pub fn address(&self) -> &str {
        self.transport.address()
    }

    /// Serve until a shutdown signal arrives, renewing the binding at half
    /// its interval, then unbind.
    pub async fn run_until_shutdown(
        mut self,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<(), Error> {
        let running = self.transport.start()?;
        let mut renew = tokio::time::interval((self.binding_lease / 2).max(MIN_PERIOD));
        let mut sweep = tokio::time::interval(self.sweep_interval.max(MIN_PERIOD));
        renew.tick().await;

        loop {
            tokio::select! {
                _ = renew.tick() => self.renew_binding().await,
                _ = sweep.tick() => {
                    self.service.sweep();
                }
                _ = shutdown.recv() => break,
            }
        }

        let owner = self.service.owner().to_string();
        match self.registry.unbind(&owner).await {
            Ok(()) => tracing::info!(owner = %owner, "microblog unbound"),
            Err(e) => tracing::warn!(owner = %owner, error = %e, "failed to unbind"),
        }
        self.transport.log_summary();
        running.stop().await;
        Ok(())
    }

    async fn renew_binding(&mut self) {
        let owner = self.service.owner();
        match self.registry.renew(self.binding.lease_id).await {
            Ok(grant) => self.binding = grant,
            Err(ServiceError::LeaseExpired(_)) => {
                tracing::warn!(owner = %owner, "binding lapsed, binding again");
                match self
                    .registry
                    .bind(owner, MICROBLOG_TYPE, self.transport.address(), self.binding_lease)
                    .await
                {
                    Ok(grant) => self.binding = grant,
                    Err(e) => tracing::error!(owner = %owner, error = %e, "failed to bind again"),
                }
            }
            Err(e) => tracing::warn!(owner = %owner, error = %e, "binding renewal failed"),
        }
    }
}
