//! One listener's slot in an event hub.

use std::sync::Arc;

use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::lease::Lease;
use crate::listener::Listener;

/// Predicate deciding whether a subscription wants an event.
pub(crate) type EventFilter<E> = Box<dyn Fn(&E) -> bool + Send + Sync>;

/// Outcome of handing an event to a subscription.
pub(crate) enum Offer {
    /// Event queued for delivery.
    Queued,
    /// Filter rejected the event.
    Skipped,
    /// The queue is full; the listener is not keeping up.
    Overflow,
    /// The delivery task has stopped after a failed delivery.
    Closed,
}

/// A listener bound to a lease, with its own queue and delivery task.
pub(crate) struct Subscription<E> {
    pub(crate) lease: Lease,
    filter: Option<EventFilter<E>>,
    sender: mpsc::Sender<(u64, Arc<E>)>,
    worker: JoinHandle<()>,
}

impl<E: Send + Sync + 'static> Subscription<E> {
    /// Start the delivery task for a listener.
    ///
    /// Must be called within a tokio runtime.
    pub(crate) fn spawn(
        source: Arc<str>,
        lease: Lease,
        listener: Arc<dyn Listener<E>>,
        filter: Option<EventFilter<E>>,
        capacity: usize,
    ) -> Self {
        let (sender, mut rx) = mpsc::channel::<(u64, Arc<E>)>(capacity.max(1));
        let lease_id = lease.id();

        let worker = tokio::spawn(async move {
            while let Some((seq, event)) = rx.recv().await {
                if let Err(e) = listener.report(seq, event.as_ref()).await {
                    tracing::debug!(
                        source = %source,
                        lease_id,
                        seq,
                        error = %e,
                        "listener unreachable, dropping subscription"
                    );
                    break;
                }
            }
        });

        Self {
            lease,
            filter,
            sender,
            worker,
        }
    }

    /// Queue an event if the filter accepts it.
    pub(crate) fn offer(&self, seq: u64, event: &Arc<E>) -> Offer {
        if let Some(filter) = &self.filter {
            if !filter(event) {
                return Offer::Skipped;
            }
        }
        match self.sender.try_send((seq, Arc::clone(event))) {
            Ok(()) => Offer::Queued,
            Err(TrySendError::Full(_)) => Offer::Overflow,
            Err(TrySendError::Closed(_)) => Offer::Closed,
        }
    }

    pub(crate) fn is_expired_at(&self, now: Instant) -> bool {
        self.lease.is_expired_at(now)
    }

    /// Stop delivery immediately, discarding anything still queued.
    pub(crate) fn abort(self) {
        self.worker.abort();
    }
}
