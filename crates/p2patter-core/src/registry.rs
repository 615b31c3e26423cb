//! In-memory name registry.
//!
//! Binds names to service handles under a lease, answers lookups and listings,
//! and announces every bind and unbind to filtered change listeners. A binding
//! whose lease lapses is removed the next time the registry is touched, or by
//! [`Registry::sweep`], and announced as unbound.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use p2patter_proto::{ChangeFilter, LeaseGrant, RegistryEvent};
use parking_lot::Mutex;
use tokio::time::Instant;

use crate::config::ServiceConfig;
use crate::error::Error;
use crate::lease::{Lease, LeaseIds};
use crate::listener::ChangeListener;
use crate::pubsub::EventHub;
use crate::remote::{Directory, MicroblogRef};

struct Binding<H> {
    handle: H,
    type_tag: String,
    lease: Lease,
}

/// Name registry holding handles of type `H`.
///
/// The network registry stores endpoint URLs; in-process setups store
/// service handles directly.
pub struct Registry<H> {
    bindings: Mutex<HashMap<String, Binding<H>>>,
    changes: EventHub<RegistryEvent>,
    lease_ids: Arc<LeaseIds>,
}

impl<H: Clone + Send + Sync + 'static> Registry<H> {
    /// Create an empty registry. Change listeners get `config.lease_interval`.
    pub fn new(config: &ServiceConfig) -> Self {
        let lease_ids = Arc::new(LeaseIds::new());
        Self {
            bindings: Mutex::new(HashMap::new()),
            changes: EventHub::with_lease_ids("registry", config, Arc::clone(&lease_ids)),
            lease_ids,
        }
    }

    /// Bind a name. Fails with [`Error::AlreadyBound`] if it has a live binding.
    pub fn bind(
        &self,
        name: &str,
        type_tag: &str,
        handle: H,
        lease_interval: Duration,
    ) -> Result<LeaseGrant, Error> {
        let mut bindings = self.bindings.lock();
        self.expire(&mut bindings);

        if bindings.contains_key(name) {
            return Err(Error::AlreadyBound(name.to_string()));
        }

        let lease = Lease::new(self.lease_ids.next_id(), lease_interval);
        let grant = lease.grant();
        bindings.insert(
            name.to_string(),
            Binding {
                handle,
                type_tag: type_tag.to_string(),
                lease,
            },
        );
        self.changes.publish(RegistryEvent::bound(name, type_tag));

        tracing::info!(name, type_tag, lease_id = grant.lease_id, "name bound");
        Ok(grant)
    }

    /// Remove a binding. Fails with [`Error::NotBound`] if there is none.
    pub fn unbind(&self, name: &str) -> Result<(), Error> {
        let mut bindings = self.bindings.lock();
        self.expire(&mut bindings);

        let binding = bindings
            .remove(name)
            .ok_or_else(|| Error::NotBound(name.to_string()))?;
        self.changes
            .publish(RegistryEvent::unbound(name, binding.type_tag.as_str()));

        tracing::info!(name, "name unbound");
        Ok(())
    }

    /// Resolve a name. Fails with [`Error::NotBound`] if it has no live binding.
    pub fn lookup(&self, name: &str) -> Result<H, Error> {
        let mut bindings = self.bindings.lock();
        self.expire(&mut bindings);

        bindings
            .get(name)
            .map(|binding| binding.handle.clone())
            .ok_or_else(|| Error::NotBound(name.to_string()))
    }

    /// Names bound under a type tag, sorted.
    pub fn list(&self, type_tag: &str) -> Vec<String> {
        let mut bindings = self.bindings.lock();
        self.expire(&mut bindings);

        let mut names: Vec<String> = bindings
            .iter()
            .filter(|(_, binding)| binding.type_tag == type_tag)
            .map(|(name, _)| name.clone())
            .collect();
        names.sort();
        names
    }

    /// Register a listener for the change events `filter` accepts.
    pub fn add_change_listener(
        &self,
        filter: ChangeFilter,
        listener: Arc<ChangeListener>,
    ) -> LeaseGrant {
        self.changes
            .subscribe_filtered(listener, move |event| filter.matches(event))
    }

    /// Renew a binding lease or a change-listener lease.
    pub fn renew(&self, lease_id: u64) -> Result<LeaseGrant, Error> {
        let mut bindings = self.bindings.lock();
        self.expire(&mut bindings);

        if let Some(binding) = bindings
            .values_mut()
            .find(|binding| binding.lease.id() == lease_id)
        {
            binding.lease.renew();
            return Ok(binding.lease.grant());
        }
        drop(bindings);
        self.changes.renew(lease_id)
    }

    /// Cancel a lease. Cancelling a binding lease unbinds the name.
    pub fn cancel(&self, lease_id: u64) -> Result<(), Error> {
        let mut bindings = self.bindings.lock();
        self.expire(&mut bindings);

        let name = bindings
            .iter()
            .find(|(_, binding)| binding.lease.id() == lease_id)
            .map(|(name, _)| name.clone());
        if let Some(name) = name {
            if let Some(binding) = bindings.remove(&name) {
                self.changes
                    .publish(RegistryEvent::unbound(name.as_str(), binding.type_tag.as_str()));
                tracing::info!(name = %name, lease_id, "binding lease cancelled");
            }
            return Ok(());
        }
        drop(bindings);
        self.changes.cancel(lease_id)
    }

    /// Remove expired bindings and change listeners.
    ///
    /// Returns the number of bindings removed.
    pub fn sweep(&self) -> usize {
        let removed = {
            let mut bindings = self.bindings.lock();
            self.expire(&mut bindings)
        };
        self.changes.sweep();
        removed
    }

    /// Number of live bindings.
    pub fn len(&self) -> usize {
        let mut bindings = self.bindings.lock();
        self.expire(&mut bindings);
        bindings.len()
    }

    /// Whether no names are bound.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn expire(&self, bindings: &mut HashMap<String, Binding<H>>) -> usize {
        let now = Instant::now();
        let expired: Vec<String> = bindings
            .iter()
            .filter(|(_, binding)| binding.lease.is_expired_at(now))
            .map(|(name, _)| name.clone())
            .collect();

        for name in &expired {
            if let Some(binding) = bindings.remove(name) {
                tracing::info!(name = %name, "binding lease expired");
                self.changes
                    .publish(RegistryEvent::unbound(name.as_str(), binding.type_tag.as_str()));
            }
        }
        expired.len()
    }
}

#[async_trait]
impl Directory for Registry<Arc<dyn MicroblogRef>> {
    async fn lookup(&self, name: &str) -> Result<Arc<dyn MicroblogRef>, Error> {
        Registry::lookup(self, name)
    }

    async fn list(&self, type_tag: &str) -> Result<Vec<String>, Error> {
        Ok(Registry::list(self, type_tag))
    }

    async fn watch(
        &self,
        filter: ChangeFilter,
        listener: Arc<ChangeListener>,
    ) -> Result<LeaseGrant, Error> {
        Ok(self.add_change_listener(filter, listener))
    }

    async fn renew(&self, lease_id: u64) -> Result<LeaseGrant, Error> {
        Registry::renew(self, lease_id)
    }

    async fn cancel(&self, lease_id: u64) -> Result<(), Error> {
        Registry::cancel(self, lease_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::listener::ChannelListener;
    use crate::microblog::MicroblogService;
    use p2patter_proto::{ChangeKind, MICROBLOG_TYPE};

    const LEASE: Duration = Duration::from_secs(5);

    fn registry() -> Registry<String> {
        Registry::new(&ServiceConfig::default())
    }

    #[tokio::test]
    async fn test_bind_lookup_unbind() {
        let registry = registry();
        registry
            .bind("alice", MICROBLOG_TYPE, "tcp://a:1".into(), LEASE)
            .unwrap();

        assert_eq!(registry.lookup("alice").unwrap(), "tcp://a:1");
        assert!(matches!(
            registry.bind("alice", MICROBLOG_TYPE, "tcp://b:1".into(), LEASE),
            Err(Error::AlreadyBound(_))
        ));

        registry.unbind("alice").unwrap();
        assert!(matches!(registry.lookup("alice"), Err(Error::NotBound(_))));
        assert!(matches!(registry.unbind("alice"), Err(Error::NotBound(_))));
    }

    #[tokio::test]
    async fn test_list_by_type() {
        let registry = registry();
        registry.bind("carol", MICROBLOG_TYPE, "c".into(), LEASE).unwrap();
        registry.bind("alice", MICROBLOG_TYPE, "a".into(), LEASE).unwrap();
        registry.bind("printer", "printer", "p".into(), LEASE).unwrap();

        assert_eq!(registry.list(MICROBLOG_TYPE), vec!["alice", "carol"]);
        assert_eq!(registry.list("printer"), vec!["printer"]);
        assert!(registry.list("nothing").is_empty());
    }

    #[tokio::test]
    async fn test_change_listener_filters_and_sequences() {
        let registry = registry();
        let (listener, mut rx) = ChannelListener::<RegistryEvent>::new();
        registry.add_change_listener(
            ChangeFilter::for_type(MICROBLOG_TYPE).report_bound().report_unbound(),
            Arc::new(listener),
        );

        registry.bind("printer", "printer", "p".into(), LEASE).unwrap();
        registry.bind("bob", MICROBLOG_TYPE, "b".into(), LEASE).unwrap();
        registry.unbind("bob").unwrap();

        let (seq, event) = rx.recv().await.unwrap();
        assert_eq!(seq, 2);
        assert_eq!(event, RegistryEvent::bound("bob", MICROBLOG_TYPE));
        let (seq, event) = rx.recv().await.unwrap();
        assert_eq!(seq, 3);
        assert_eq!(event.kind, ChangeKind::Unbound);
    }

    #[tokio::test(start_paused = true)]
    async fn test_binding_expiry_announces_unbound() {
        let registry: Registry<String> =
            Registry::new(&ServiceConfig::default().with_lease_interval(Duration::from_secs(300)));
        let (listener, mut rx) = ChannelListener::<RegistryEvent>::new();
        registry.add_change_listener(ChangeFilter::new().report_unbound(), Arc::new(listener));
        registry.bind("dave", MICROBLOG_TYPE, "d".into(), Duration::from_secs(60)).unwrap();

        tokio::time::advance(Duration::from_secs(61)).await;
        assert_eq!(registry.sweep(), 1);

        let (_, event) = rx.recv().await.unwrap();
        assert_eq!(event, RegistryEvent::unbound("dave", MICROBLOG_TYPE));
        assert!(registry.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_renew_binding() {
        let registry = registry();
        let grant = registry.bind("erin", MICROBLOG_TYPE, "e".into(), LEASE).unwrap();

        tokio::time::advance(Duration::from_secs(4)).await;
        registry.renew(grant.lease_id).unwrap();
        tokio::time::advance(Duration::from_secs(4)).await;

        assert!(registry.lookup("erin").is_ok());

        tokio::time::advance(Duration::from_secs(2)).await;
        assert!(matches!(registry.lookup("erin"), Err(Error::NotBound(_))));
        assert!(matches!(registry.renew(grant.lease_id), Err(Error::LeaseExpired(_))));
    }

    #[tokio::test]
    async fn test_cancel_binding_and_watch() {
        let registry = registry();
        let (listener, mut rx) = ChannelListener::<RegistryEvent>::new();
        let watch = registry.add_change_listener(
            ChangeFilter::new().report_bound().report_unbound(),
            Arc::new(listener),
        );
        let binding = registry.bind("frank", MICROBLOG_TYPE, "f".into(), LEASE).unwrap();
        assert_ne!(watch.lease_id, binding.lease_id);

        registry.cancel(binding.lease_id).unwrap();
        assert!(registry.lookup("frank").is_err());
        assert_eq!(rx.recv().await.unwrap().1.kind, ChangeKind::Bound);
        assert_eq!(rx.recv().await.unwrap().1.kind, ChangeKind::Unbound);

        registry.cancel(watch.lease_id).unwrap();
        registry.bind("grace", MICROBLOG_TYPE, "g".into(), LEASE).unwrap();
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_directory_lookup() {
        let registry: Registry<Arc<dyn MicroblogRef>> = Registry::new(&ServiceConfig::default());
        let service = Arc::new(MicroblogService::new("alice", &ServiceConfig::default()));
        service.post_message_at("hi", 100);
        registry
            .bind("alice", MICROBLOG_TYPE, service.clone(), LEASE)
            .unwrap();

        let directory: &dyn Directory = &registry;
        let found = directory.lookup("alice").await.unwrap();
        let snapshot = found.recent_snapshot().await.unwrap();
        assert_eq!(snapshot.latest.unwrap().text, "hi");
        assert_eq!(directory.list(MICROBLOG_TYPE).await.unwrap(), vec!["alice"]);
        assert!(matches!(directory.lookup("bob").await, Err(Error::NotBound(_))));
    }
}
