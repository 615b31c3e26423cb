//! Event hub with lease-bounded subscriptions.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use p2patter_proto::LeaseGrant;
use parking_lot::Mutex;
use tokio::time::Instant;

use super::subscription::{EventFilter, Offer, Subscription};
use crate::config::ServiceConfig;
use crate::error::Error;
use crate::lease::{Lease, LeaseIds};
use crate::listener::Listener;

struct HubState<E> {
    subscriptions: HashMap<u64, Subscription<E>>,
    next_seq: u64,
}

/// Fans events out to subscribed listeners.
///
/// Expired subscriptions are dropped lazily on every publish and eagerly by
/// [`sweep`](Self::sweep); either way an expired listener never receives an
/// event. Expiry is silent: nothing is sent to the listener.
///
/// Events are sequenced under the hub lock, so every listener observes them
/// in publish order.
pub struct EventHub<E> {
    source: Arc<str>,
    state: Mutex<HubState<E>>,
    lease_ids: Arc<LeaseIds>,
    lease_interval: Duration,
    queue_capacity: usize,
}

impl<E: Send + Sync + 'static> EventHub<E> {
    /// Create a hub with its own lease identifiers.
    ///
    /// `source` names the hub in log output.
    pub fn new(source: impl Into<Arc<str>>, config: &ServiceConfig) -> Self {
        Self::with_lease_ids(source, config, Arc::new(LeaseIds::new()))
    }

    /// Create a hub drawing lease identifiers from a shared source.
    pub fn with_lease_ids(
        source: impl Into<Arc<str>>,
        config: &ServiceConfig,
        lease_ids: Arc<LeaseIds>,
    ) -> Self {
        Self {
            source: source.into(),
            state: Mutex::new(HubState {
                subscriptions: HashMap::new(),
                next_seq: 1,
            }),
            lease_ids,
            lease_interval: config.lease_interval,
            queue_capacity: config.queue_capacity,
        }
    }

    /// Subscribe a listener to every event.
    ///
    /// Must be called within a tokio runtime.
    pub fn subscribe(&self, listener: Arc<dyn Listener<E>>) -> LeaseGrant {
        self.insert(listener, None)
    }

    /// Subscribe a listener to the events `filter` accepts.
    pub fn subscribe_filtered<F>(&self, listener: Arc<dyn Listener<E>>, filter: F) -> LeaseGrant
    where
        F: Fn(&E) -> bool + Send + Sync + 'static,
    {
        self.insert(listener, Some(Box::new(filter)))
    }

    fn insert(
        &self,
        listener: Arc<dyn Listener<E>>,
        filter: Option<EventFilter<E>>,
    ) -> LeaseGrant {
        let lease = Lease::new(self.lease_ids.next_id(), self.lease_interval);
        let grant = lease.grant();
        let subscription = Subscription::spawn(
            Arc::clone(&self.source),
            lease,
            listener,
            filter,
            self.queue_capacity,
        );

        self.state
            .lock()
            .subscriptions
            .insert(grant.lease_id, subscription);

        tracing::debug!(
            source = %self.source,
            lease_id = grant.lease_id,
            interval_ms = grant.interval_ms,
            "subscription created"
        );
        grant
    }

    /// Publish an event to every live subscription.
    ///
    /// Never blocks on delivery. Returns the sequence number assigned to the
    /// event.
    pub fn publish(&self, event: E) -> u64 {
        let now = Instant::now();
        let event = Arc::new(event);

        let mut state = self.state.lock();
        let seq = state.next_seq;
        state.next_seq += 1;

        let mut dropped = Vec::new();
        for (&lease_id, subscription) in &state.subscriptions {
            if subscription.is_expired_at(now) {
                tracing::debug!(source = %self.source, lease_id, "lease expired");
                dropped.push(lease_id);
                continue;
            }
            match subscription.offer(seq, &event) {
                Offer::Queued | Offer::Skipped => {}
                Offer::Overflow => {
                    tracing::warn!(
                        source = %self.source,
                        lease_id,
                        "listener queue full, dropping subscription"
                    );
                    dropped.push(lease_id);
                }
                Offer::Closed => dropped.push(lease_id),
            }
        }

        for lease_id in dropped {
            if let Some(subscription) = state.subscriptions.remove(&lease_id) {
                subscription.abort();
            }
        }

        tracing::trace!(source = %self.source, seq, "event published");
        seq
    }

    /// Extend a subscription lease by one interval.
    pub fn renew(&self, lease_id: u64) -> Result<LeaseGrant, Error> {
        let mut state = self.state.lock();
        let expired = match state.subscriptions.get_mut(&lease_id) {
            Some(subscription) if !subscription.is_expired_at(Instant::now()) => {
                subscription.lease.renew();
                return Ok(subscription.lease.grant());
            }
            Some(_) => true,
            None => false,
        };
        if expired {
            if let Some(subscription) = state.subscriptions.remove(&lease_id) {
                subscription.abort();
            }
        }
        Err(Error::LeaseExpired(format!("{} lease {}", self.source, lease_id)))
    }

    /// End a subscription. Nothing is delivered to it afterwards.
    pub fn cancel(&self, lease_id: u64) -> Result<(), Error> {
        let removed = self.state.lock().subscriptions.remove(&lease_id);
        match removed {
            Some(subscription) => {
                subscription.abort();
                tracing::debug!(source = %self.source, lease_id, "subscription cancelled");
                Ok(())
            }
            None => Err(Error::LeaseExpired(format!("{} lease {}", self.source, lease_id))),
        }
    }

    /// Remove every expired subscription. Returns how many were removed.
    pub fn sweep(&self) -> usize {
        let now = Instant::now();
        let mut state = self.state.lock();
        let expired: Vec<u64> = state
            .subscriptions
            .iter()
            .filter(|(_, subscription)| subscription.is_expired_at(now))
            .map(|(&lease_id, _)| lease_id)
            .collect();

        for lease_id in &expired {
            if let Some(subscription) = state.subscriptions.remove(lease_id) {
                subscription.abort();
            }
        }
        if !expired.is_empty() {
            tracing::debug!(source = %self.source, count = expired.len(), "expired subscriptions swept");
        }
        expired.len()
    }

    /// Whether a lease names a live subscription.
    pub fn contains(&self, lease_id: u64) -> bool {
        self.state
            .lock()
            .subscriptions
            .get(&lease_id)
            .is_some_and(|subscription| !subscription.is_expired_at(Instant::now()))
    }

    /// Number of subscriptions held, including expired ones not yet removed.
    pub fn len(&self) -> usize {
        self.state.lock().subscriptions.len()
    }

    /// Whether the hub holds no subscriptions.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
