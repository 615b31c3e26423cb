//! Follower session.

use std::collections::HashMap;
use std::mem;
use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use futures::future::join_all;
use parking_lot::Mutex;
use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use p2patter_core::{Directory, Error, InitialSnapshot, Listener, MicroblogRef};
use p2patter_proto::{
    ChangeFilter, LeaseGrant, Message, MicroblogEvent, RecentSnapshot, MICROBLOG_TYPE,
};

use super::bridge::{DiscoveryBridge, OwnerTracker};
use super::watch::WatchSet;

/// Shortest renewal period, whatever the granted interval.
const MIN_RENEW_PERIOD: Duration = Duration::from_millis(50);

/// How long the renewal task sleeps when it holds no lease.
const IDLE_PERIOD: Duration = Duration::from_secs(1);

/// One item of a follower's feed.
#[derive(Debug, Clone, PartialEq)]
pub enum FeedItem {
    /// The initial view, ascending by `(timestamp, owner, serial)`. Always
    /// the first item, emitted exactly once.
    Snapshot(Vec<Message>),
    /// A message delivered after the initial view.
    Message(Message),
    /// A followed owner's service went away.
    Unavailable(String),
}

/// Live, ordered feed of a set of owners.
///
/// Per owner, messages are delivered at most once and in serial order: each
/// owner carries the highest serial delivered so far, and anything at or
/// below it is dropped. The mark resets when the owner unbinds, since a new
/// service instance numbers from 1 again.
pub struct FollowerSession {
    inner: Arc<SessionInner>,
    renewal: Mutex<Option<JoinHandle<()>>>,
}

struct SessionInner {
    directory: Arc<dyn Directory>,
    watch: Arc<Mutex<WatchSet>>,
    state: Mutex<SessionState>,
    output: mpsc::UnboundedSender<FeedItem>,
    /// Wakes the renewal task when a lease is added or replaced.
    leases_changed: Arc<Notify>,
}

struct SessionState {
    owners: HashMap<String, OwnerState>,
    /// Present until the initial snapshot has been emitted.
    startup: Option<Startup>,
    next_generation: u64,
    watch_lease: Option<HeldLease>,
}

/// A granted lease and the instant its holder renews it.
///
/// Every lease is renewed at half of its own granted interval; a microblog
/// and the registry may grant different intervals.
#[derive(Debug, Clone, Copy)]
struct HeldLease {
    grant: LeaseGrant,
    renew_at: Instant,
}

impl HeldLease {
    fn new(grant: LeaseGrant) -> Self {
        Self {
            grant,
            renew_at: Instant::now() + renew_period(&grant),
        }
    }

    /// Try again before the lease can lapse, after a failed renewal.
    fn retry_soon(&mut self) {
        self.renew_at = Instant::now() + (renew_period(&self.grant) / 2).max(MIN_RENEW_PERIOD);
    }

    fn is_due(&self, now: Instant) -> bool {
        now >= self.renew_at
    }
}

#[derive(Default)]
struct Startup {
    snapshot: InitialSnapshot,
    /// Items raised while the snapshot was being assembled, in arrival order.
    held: Vec<FeedItem>,
}

struct OwnerState {
    /// Identifies the subscription; events from older ones are refused.
    generation: u64,
    service: Option<Arc<dyn MicroblogRef>>,
    lease: Option<HeldLease>,
    caught_up: bool,
    /// Events that beat the catch-up snapshot.
    early: Vec<Message>,
    delivered: u64,
}

impl FollowerSession {
    /// Start following `names`.
    ///
    /// Registers for registry changes first, then attaches every name that
    /// is already bound and emits their merged recent messages as the
    /// [`FeedItem::Snapshot`]. Names not yet bound stay pending until a bind
    /// notification arrives.
    pub async fn start<I, S>(
        directory: Arc<dyn Directory>,
        names: I,
    ) -> Result<(Self, mpsc::UnboundedReceiver<FeedItem>), Error>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let (output, feed) = mpsc::unbounded_channel();
        let inner = Arc::new(SessionInner {
            directory,
            watch: Arc::new(Mutex::new(WatchSet::new(names))),
            state: Mutex::new(SessionState {
                owners: HashMap::new(),
                startup: Some(Startup::default()),
                next_generation: 1,
                watch_lease: None,
            }),
            output,
            leases_changed: Arc::new(Notify::new()),
        });

        let grant = inner.register_watch().await?;
        let claimed = match inner.claim_bound().await {
            Ok(claimed) => claimed,
            Err(e) => {
                let _ = inner.directory.cancel(grant.lease_id).await;
                return Err(e);
            }
        };

        join_all(
            claimed
                .into_iter()
                .map(|name| Arc::clone(&inner).attach_owner(name)),
        )
        .await;
        inner.finish_startup();

        let renewal = tokio::spawn(renew_loop(
            Arc::downgrade(&inner),
            Arc::clone(&inner.leases_changed),
        ));

        Ok((
            Self {
                inner,
                renewal: Mutex::new(Some(renewal)),
            },
            feed,
        ))
    }

    /// Start watching another name. Attaches it right away if it is bound.
    pub async fn watch(&self, name: &str) {
        let claimed = {
            let mut watch = self.inner.watch.lock();
            watch.insert(name) && watch.activate(name)
        };
        if claimed {
            Arc::clone(&self.inner).attach_owner(name.to_string()).await;
        }
    }

    /// Stop watching a name and cancel its subscription.
    ///
    /// Nothing more is delivered for it. Returns `false` if it was not
    /// watched.
    pub async fn unwatch(&self, name: &str) -> bool {
        let watched = self.inner.watch.lock().remove(name);
        let removed = self.inner.state.lock().owners.remove(name);

        if let Some(owner) = removed {
            cancel_subscription(name, owner).await;
        }
        if watched {
            tracing::info!(owner = %name, "unwatched");
        }
        watched
    }

    /// Pending names, sorted.
    pub fn pending(&self) -> Vec<String> {
        self.inner.watch.lock().pending().map(String::from).collect()
    }

    /// Active names, sorted.
    pub fn active(&self) -> Vec<String> {
        self.inner.watch.lock().active().map(String::from).collect()
    }

    /// Cancel every subscription and the registry watch.
    pub async fn shutdown(&self) {
        if let Some(renewal) = self.renewal.lock().take() {
            renewal.abort();
        }

        self.inner.watch.lock().clear();
        let (owners, watch_lease) = {
            let mut state = self.inner.state.lock();
            (mem::take(&mut state.owners), state.watch_lease.take())
        };

        join_all(
            owners
                .into_iter()
                .map(|(name, owner)| async move { cancel_subscription(&name, owner).await }),
        )
        .await;

        if let Some(held) = watch_lease {
            if let Err(e) = self.inner.directory.cancel(held.grant.lease_id).await {
                tracing::debug!(error = %e, "failed to cancel registry watch");
            }
        }
        tracing::info!("follower shut down");
    }
}

impl Drop for FollowerSession {
    fn drop(&mut self) {
        if let Some(renewal) = self.renewal.get_mut().take() {
            renewal.abort();
        }
    }
}

impl SessionInner {
    fn bridge(self: &Arc<Self>) -> Arc<DiscoveryBridge> {
        let weak: Weak<SessionInner> = Arc::downgrade(self);
        let tracker: Weak<dyn OwnerTracker> = weak;
        Arc::new(DiscoveryBridge::new(Arc::clone(&self.watch), tracker))
    }

    async fn register_watch(self: &Arc<Self>) -> Result<LeaseGrant, Error> {
        let filter = ChangeFilter::for_type(MICROBLOG_TYPE)
            .report_bound()
            .report_unbound();
        let grant = self.directory.watch(filter, self.bridge()).await?;
        self.state.lock().watch_lease = Some(HeldLease::new(grant));
        self.leases_changed.notify_one();
        tracing::debug!(
            lease_id = grant.lease_id,
            interval_ms = grant.interval_ms,
            "registry watch registered"
        );
        Ok(grant)
    }

    /// Activate every pending name the registry lists as bound.
    async fn claim_bound(&self) -> Result<Vec<String>, Error> {
        let bound = self.directory.list(MICROBLOG_TYPE).await?;
        let mut watch = self.watch.lock();
        Ok(bound
            .into_iter()
            .filter(|name| watch.activate(name))
            .collect())
    }

    /// Subscribe to an active owner and catch up on its recent messages.
    ///
    /// On failure the name returns to pending.
    async fn attach_owner(self: Arc<Self>, name: String) {
        let generation = {
            let mut state = self.state.lock();
            let generation = state.next_generation;
            state.next_generation += 1;
            // A re-attach keeps the mark so nothing is delivered twice.
            let delivered = state.owners.get(&name).map_or(0, |owner| owner.delivered);
            state.owners.insert(
                name.clone(),
                OwnerState {
                    generation,
                    service: None,
                    lease: None,
                    caught_up: false,
                    early: Vec::new(),
                    delivered,
                },
            );
            generation
        };

        match self.connect_owner(&name, generation).await {
            Ok((service, lease, snapshot)) => {
                self.complete_attach(&name, generation, service, lease, snapshot)
            }
            Err(e) => self.abandon_attach(&name, generation, e),
        }
    }

    async fn connect_owner(
        self: &Arc<Self>,
        name: &str,
        generation: u64,
    ) -> Result<(Arc<dyn MicroblogRef>, LeaseGrant, RecentSnapshot), Error> {
        let service = self.directory.lookup(name).await?;
        let listener = Arc::new(OwnerListener {
            session: Arc::downgrade(self),
            owner: name.to_string(),
            generation,
        });
        let lease = service.subscribe(listener).await?;

        match service.recent_snapshot().await {
            Ok(snapshot) => Ok((service, lease, snapshot)),
            Err(e) => {
                let _ = service.cancel(lease.lease_id).await;
                Err(e)
            }
        }
    }

    fn complete_attach(
        &self,
        name: &str,
        generation: u64,
        service: Arc<dyn MicroblogRef>,
        lease: LeaseGrant,
        snapshot: RecentSnapshot,
    ) {
        let mut state = self.state.lock();
        let SessionState {
            owners, startup, ..
        } = &mut *state;

        let Some(owner) = owners
            .get_mut(name)
            .filter(|owner| owner.generation == generation)
        else {
            // Detached or unwatched while attaching.
            drop(state);
            tokio::spawn(async move {
                let _ = service.cancel(lease.lease_id).await;
            });
            return;
        };

        owner.service = Some(service);
        owner.lease = Some(HeldLease::new(lease));
        self.leases_changed.notify_one();
        owner.caught_up = true;
        let early = mem::take(&mut owner.early);

        match startup {
            Some(startup) => {
                startup.snapshot.merge(snapshot);
                startup.held.extend(early.into_iter().map(FeedItem::Message));
            }
            None => {
                let mut catch_up = snapshot.into_messages();
                catch_up.sort_by(Message::feed_cmp);
                for message in catch_up.into_iter().chain(early) {
                    if message.serial > owner.delivered {
                        owner.delivered = message.serial;
                        let _ = self.output.send(FeedItem::Message(message));
                    }
                }
            }
        }

        tracing::info!(
            owner = %name,
            lease_id = lease.lease_id,
            interval_ms = lease.interval_ms,
            "subscribed"
        );
    }

    fn abandon_attach(&self, name: &str, generation: u64, error: Error) {
        if !self.is_current(name, generation) {
            return;
        }

        self.watch.lock().deactivate(name);
        let mut state = self.state.lock();
        if state
            .owners
            .get(name)
            .is_some_and(|owner| owner.generation == generation)
        {
            state.owners.remove(name);
        }

        match error {
            Error::NotBound(_) => tracing::debug!(owner = %name, "not bound yet, pending"),
            e => tracing::warn!(owner = %name, error = %e, "attach failed, pending"),
        }
    }

    fn on_event(&self, owner_name: &str, generation: u64, message: Message) -> Result<(), Error> {
        let mut state = self.state.lock();
        let SessionState {
            owners, startup, ..
        } = &mut *state;

        let Some(owner) = owners
            .get_mut(owner_name)
            .filter(|owner| owner.generation == generation)
        else {
            return Err(Error::ListenerDelivery(format!(
                "stale subscription to {}",
                owner_name
            )));
        };

        if !owner.caught_up {
            owner.early.push(message);
        } else if let Some(startup) = startup {
            startup.held.push(FeedItem::Message(message));
        } else if message.serial > owner.delivered {
            owner.delivered = message.serial;
            let _ = self.output.send(FeedItem::Message(message));
        }
        Ok(())
    }

    /// Emit the initial snapshot, then whatever was held back while it was
    /// assembled.
    fn finish_startup(&self) {
        let mut state = self.state.lock();
        let Some(Startup { snapshot, held }) = state.startup.take() else {
            return;
        };

        let mut marks: HashMap<String, u64> = HashMap::new();
        for message in snapshot.iter() {
            let mark = marks.entry(message.owner.clone()).or_insert(0);
            *mark = (*mark).max(message.serial);
        }
        tracing::info!(messages = snapshot.len(), held = held.len(), "initial snapshot ready");
        let _ = self.output.send(FeedItem::Snapshot(snapshot.into_messages()));

        for item in held {
            match item {
                FeedItem::Message(message) => {
                    let mark = marks.entry(message.owner.clone()).or_insert(0);
                    if message.serial > *mark {
                        *mark = message.serial;
                        let _ = self.output.send(FeedItem::Message(message));
                    }
                }
                FeedItem::Unavailable(owner) => {
                    marks.remove(&owner);
                    let _ = self.output.send(FeedItem::Unavailable(owner));
                }
                FeedItem::Snapshot(_) => {}
            }
        }

        for (name, owner) in state.owners.iter_mut() {
            if let Some(mark) = marks.get(name) {
                owner.delivered = owner.delivered.max(*mark);
            }
        }
    }

    /// Earliest instant at which a held lease is due for renewal.
    fn next_renewal(&self) -> Option<Instant> {
        let state = self.state.lock();
        state
            .owners
            .values()
            .filter_map(|owner| owner.lease.map(|held| held.renew_at))
            .chain(state.watch_lease.map(|held| held.renew_at))
            .min()
    }

    /// Renew every lease that is due. Reconciles pending names whenever the
    /// registry watch is renewed.
    async fn renew_due(self: &Arc<Self>) {
        let now = Instant::now();
        let due: Vec<(String, u64, Arc<dyn MicroblogRef>, u64)> = self
            .state
            .lock()
            .owners
            .iter()
            .filter_map(|(name, owner)| match (&owner.service, &owner.lease) {
                (Some(service), Some(held)) if held.is_due(now) => Some((
                    name.clone(),
                    owner.generation,
                    Arc::clone(service),
                    held.grant.lease_id,
                )),
                _ => None,
            })
            .collect();

        for (name, generation, service, lease_id) in due {
            match service.renew(lease_id).await {
                Ok(grant) => {
                    let mut state = self.state.lock();
                    if let Some(owner) = state
                        .owners
                        .get_mut(&name)
                        .filter(|owner| owner.generation == generation)
                    {
                        owner.lease = Some(HeldLease::new(grant));
                    }
                }
                Err(Error::LeaseExpired(_)) => {
                    if self.is_current(&name, generation) {
                        tracing::info!(owner = %name, "subscription lapsed, re-attaching");
                        Arc::clone(self).attach_owner(name).await;
                    }
                }
                Err(e) => {
                    tracing::warn!(owner = %name, error = %e, "subscription renewal failed");
                    let mut state = self.state.lock();
                    if let Some(held) = state
                        .owners
                        .get_mut(&name)
                        .filter(|owner| owner.generation == generation)
                        .and_then(|owner| owner.lease.as_mut())
                    {
                        held.retry_soon();
                    }
                }
            }
        }

        let watch_lease = self.state.lock().watch_lease;
        let Some(held) = watch_lease.filter(|held| held.is_due(now)) else {
            return;
        };
        match self.directory.renew(held.grant.lease_id).await {
            Ok(grant) => self.replace_watch_lease(held.grant.lease_id, |slot| {
                *slot = HeldLease::new(grant)
            }),
            Err(Error::LeaseExpired(_)) => {
                tracing::info!("registry watch lapsed, re-registering");
                if let Err(e) = self.register_watch().await {
                    tracing::warn!(error = %e, "failed to re-register registry watch");
                    self.replace_watch_lease(held.grant.lease_id, HeldLease::retry_soon);
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "registry watch renewal failed");
                self.replace_watch_lease(held.grant.lease_id, HeldLease::retry_soon);
            }
        }
        self.reconcile().await;
    }

    fn is_current(&self, name: &str, generation: u64) -> bool {
        self.state
            .lock()
            .owners
            .get(name)
            .is_some_and(|owner| owner.generation == generation)
    }

    /// Update the watch lease if it is still the one identified by `lease_id`.
    fn replace_watch_lease(&self, lease_id: u64, update: impl FnOnce(&mut HeldLease)) {
        let mut state = self.state.lock();
        if let Some(slot) = state
            .watch_lease
            .as_mut()
            .filter(|slot| slot.grant.lease_id == lease_id)
        {
            update(slot);
        }
    }

    /// Pick up pending names that are bound but whose notification was
    /// missed.
    async fn reconcile(self: &Arc<Self>) {
        if self.watch.lock().pending().next().is_none() {
            return;
        }
        match self.claim_bound().await {
            Ok(claimed) => {
                for name in claimed {
                    Arc::clone(self).attach_owner(name).await;
                }
            }
            Err(e) => tracing::debug!(error = %e, "registry listing failed"),
        }
    }
}

impl OwnerTracker for SessionInner {
    fn attach(self: Arc<Self>, owner: String) {
        tokio::spawn(self.attach_owner(owner));
    }

    fn detach(self: Arc<Self>, owner: String) {
        let removed = {
            let mut state = self.state.lock();
            let removed = state.owners.remove(&owner);
            let item = FeedItem::Unavailable(owner.clone());
            match &mut state.startup {
                Some(startup) => startup.held.push(item),
                None => {
                    let _ = self.output.send(item);
                }
            }
            removed
        };

        tracing::info!(owner = %owner, "owner unavailable");
        if let Some(removed) = removed {
            tokio::spawn(async move { cancel_subscription(&owner, removed).await });
        }
    }
}

/// Message listener for one owner subscription.
struct OwnerListener {
    session: Weak<SessionInner>,
    owner: String,
    generation: u64,
}

#[async_trait]
impl Listener<MicroblogEvent> for OwnerListener {
    async fn report(&self, _seq: u64, event: &MicroblogEvent) -> Result<(), Error> {
        let session = self
            .session
            .upgrade()
            .ok_or_else(|| Error::ListenerDelivery("follower closed".to_string()))?;
        session.on_event(&self.owner, self.generation, event.message.clone())
    }
}

async fn cancel_subscription(name: &str, owner: OwnerState) {
    if let (Some(service), Some(held)) = (owner.service, owner.lease) {
        if let Err(e) = service.cancel(held.grant.lease_id).await {
            tracing::debug!(owner = %name, error = %e, "failed to cancel subscription");
        }
    }
}

fn renew_period(grant: &LeaseGrant) -> Duration {
    (Duration::from_millis(grant.interval_ms) / 2).max(MIN_RENEW_PERIOD)
}

/// Sleep until the earliest lease is due, renew what is due, repeat.
///
/// A new or replaced lease wakes the task early so that its deadline is
/// taken into account.
async fn renew_loop(session: Weak<SessionInner>, leases_changed: Arc<Notify>) {
    loop {
        let next = match session.upgrade() {
            Some(inner) => inner.next_renewal(),
            None => return,
        };
        let deadline = next.unwrap_or_else(|| Instant::now() + IDLE_PERIOD);

        tokio::select! {
            _ = tokio::time::sleep_until(deadline) => {}
            _ = leases_changed.notified() => continue,
        }

        let Some(inner) = session.upgrade() else {
            return;
        };
        inner.renew_due().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_renew_period_is_half_the_interval() {
        let grant = LeaseGrant {
            lease_id: 1,
            interval_ms: 5000,
        };
        assert_eq!(renew_period(&grant), Duration::from_millis(2500));

        let tiny = LeaseGrant {
            lease_id: 1,
            interval_ms: 10,
        };
        assert_eq!(renew_period(&tiny), MIN_RENEW_PERIOD);
    }

    #[tokio::test(start_paused = true)]
    async fn test_each_lease_is_due_on_its_own_interval() {
        let short = HeldLease::new(LeaseGrant {
            lease_id: 1,
            interval_ms: 1000,
        });
        let long = HeldLease::new(LeaseGrant {
            lease_id: 2,
            interval_ms: 10_000,
        });

        tokio::time::advance(Duration::from_millis(499)).await;
        assert!(!short.is_due(Instant::now()));

        tokio::time::advance(Duration::from_millis(1)).await;
        assert!(short.is_due(Instant::now()));
        assert!(!long.is_due(Instant::now()));

        tokio::time::advance(Duration::from_millis(4500)).await;
        assert!(long.is_due(Instant::now()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_comes_before_expiry() {
        let mut held = HeldLease::new(LeaseGrant {
            lease_id: 1,
            interval_ms: 1000,
        });
        tokio::time::advance(Duration::from_millis(500)).await;

        held.retry_soon();
        assert_eq!(held.renew_at, Instant::now() + Duration::from_millis(250));
    }
}
