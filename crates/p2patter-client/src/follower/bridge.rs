//! Registry notifications to follower actions.

use std::sync::{Arc, Weak};

use async_trait::async_trait;
use parking_lot::Mutex;

use p2patter_core::{Error, Listener};
use p2patter_proto::{ChangeKind, RegistryEvent};

use super::watch::WatchSet;

/// Receives the owner transitions a [`DiscoveryBridge`] decides on.
///
/// Implementations must not block; long work belongs on a spawned task.
pub trait OwnerTracker: Send + Sync {
    /// A pending owner became active: subscribe and catch up.
    fn attach(self: Arc<Self>, owner: String);

    /// An active owner went away: report it and drop its subscription.
    fn detach(self: Arc<Self>, owner: String);
}

/// Registry change listener driving a [`WatchSet`].
///
/// A bound event for a pending name activates it and attaches the owner; an
/// unbound event for an active name returns it to pending and detaches it.
/// Anything else, including repeats, changes nothing.
pub struct DiscoveryBridge {
    watch: Arc<Mutex<WatchSet>>,
    tracker: Weak<dyn OwnerTracker>,
}

impl DiscoveryBridge {
    /// Create a bridge over a shared watch set.
    pub fn new(watch: Arc<Mutex<WatchSet>>, tracker: Weak<dyn OwnerTracker>) -> Self {
        Self { watch, tracker }
    }

    /// Apply one event. Returns the transition made, if any.
    pub fn apply(&self, event: &RegistryEvent) -> Option<ChangeKind> {
        let changed = {
            let mut watch = self.watch.lock();
            match event.kind {
                ChangeKind::Bound => watch.activate(&event.name),
                ChangeKind::Unbound => watch.deactivate(&event.name),
            }
        };
        if !changed {
            return None;
        }

        if let Some(tracker) = self.tracker.upgrade() {
            match event.kind {
                ChangeKind::Bound => tracker.attach(event.name.clone()),
                ChangeKind::Unbound => tracker.detach(event.name.clone()),
            }
        }
        Some(event.kind)
    }
}

#[async_trait]
impl Listener<RegistryEvent> for DiscoveryBridge {
    async fn report(&self, seq: u64, event: &RegistryEvent) -> Result<(), Error> {
        if self.tracker.strong_count() == 0 {
            return Err(Error::ListenerDelivery("follower closed".to_string()));
        }
        let transition = self.apply(event);
        tracing::debug!(seq, name = %event.name, kind = ?event.kind, ?transition, "registry change");
        Ok(())
    }
}
