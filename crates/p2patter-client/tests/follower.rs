//! Follower sessions against in-process microblogs and registry.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use p2patter_client::{FeedItem, FollowerSession};
use p2patter_core::{
    ChangeListener, Directory, Error, MessageListener, MicroblogRef, MicroblogService, Registry,
    ServiceConfig,
};
use p2patter_proto::{ChangeFilter, LeaseGrant, RecentSnapshot, MICROBLOG_TYPE};
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::time::timeout;

type TestRegistry = Registry<Arc<dyn MicroblogRef>>;

const BASE: i64 = 1_700_000_000;

fn registry() -> Arc<TestRegistry> {
    Arc::new(Registry::new(&ServiceConfig::default()))
}

/// A registry whose change listeners hold leases of `interval`.
fn registry_with_lease(interval: Duration) -> Arc<TestRegistry> {
    Arc::new(Registry::new(
        &ServiceConfig::default().with_lease_interval(interval),
    ))
}

/// A bound microblog whose subscribers hold leases of `interval`.
fn microblog_with_lease(
    registry: &TestRegistry,
    owner: &str,
    interval: Duration,
) -> Arc<MicroblogService> {
    let config = ServiceConfig::default().with_lease_interval(interval);
    let service = Arc::new(MicroblogService::new(owner, &config));
    bind(registry, &service);
    service
}

/// Live messages received so far, as `(owner, serial)`.
fn drain_messages(feed: &mut UnboundedReceiver<FeedItem>) -> Vec<(String, u64)> {
    let mut received = Vec::new();
    while let Ok(item) = feed.try_recv() {
        match item {
            FeedItem::Message(message) => received.push((message.owner, message.serial)),
            other => panic!("expected message, got {:?}", other),
        }
    }
    received
}

fn serials_of(received: &[(String, u64)], owner: &str) -> Vec<u64> {
    received
        .iter()
        .filter(|(name, _)| name == owner)
        .map(|(_, serial)| *serial)
        .collect()
}

/// Microblog whose lease renewals can be made to fail.
struct UnreliableMicroblog {
    inner: Arc<MicroblogService>,
    refuse_renewals: AtomicBool,
}

#[async_trait]
impl MicroblogRef for UnreliableMicroblog {
    async fn post_message(&self, text: &str) -> Result<String, Error> {
        MicroblogRef::post_message(self.inner.as_ref(), text).await
    }

    async fn delete_message(&self, serial: u64) -> Result<String, Error> {
        MicroblogRef::delete_message(self.inner.as_ref(), serial).await
    }

    async fn subscribe(&self, listener: Arc<MessageListener>) -> Result<LeaseGrant, Error> {
        MicroblogRef::subscribe(self.inner.as_ref(), listener).await
    }

    async fn renew(&self, lease_id: u64) -> Result<LeaseGrant, Error> {
        if self.refuse_renewals.load(Ordering::SeqCst) {
            return Err(Error::Communication("microblog unreachable".into()));
        }
        MicroblogRef::renew(self.inner.as_ref(), lease_id).await
    }

    async fn cancel(&self, lease_id: u64) -> Result<(), Error> {
        MicroblogRef::cancel(self.inner.as_ref(), lease_id).await
    }

    async fn recent_snapshot(&self) -> Result<RecentSnapshot, Error> {
        MicroblogRef::recent_snapshot(self.inner.as_ref()).await
    }
}

/// Registry whose lease renewals can be made to fail.
struct UnreliableDirectory {
    inner: Arc<TestRegistry>,
    refuse_renewals: AtomicBool,
}

#[async_trait]
impl Directory for UnreliableDirectory {
    async fn lookup(&self, name: &str) -> Result<Arc<dyn MicroblogRef>, Error> {
        Directory::lookup(self.inner.as_ref(), name).await
    }

    async fn list(&self, type_tag: &str) -> Result<Vec<String>, Error> {
        Directory::list(self.inner.as_ref(), type_tag).await
    }

    async fn watch(
        &self,
        filter: ChangeFilter,
        listener: Arc<ChangeListener>,
    ) -> Result<LeaseGrant, Error> {
        Directory::watch(self.inner.as_ref(), filter, listener).await
    }

    async fn renew(&self, lease_id: u64) -> Result<LeaseGrant, Error> {
        if self.refuse_renewals.load(Ordering::SeqCst) {
            return Err(Error::Communication("registry unreachable".into()));
        }
        Directory::renew(self.inner.as_ref(), lease_id).await
    }

    async fn cancel(&self, lease_id: u64) -> Result<(), Error> {
        Directory::cancel(self.inner.as_ref(), lease_id).await
    }
}

fn bind(registry: &TestRegistry, service: &Arc<MicroblogService>) {
    registry
        .bind(
            service.owner(),
            MICROBLOG_TYPE,
            service.clone(),
            Duration::from_secs(3600),
        )
        .unwrap();
}

fn microblog(registry: &TestRegistry, owner: &str) -> Arc<MicroblogService> {
    let service = Arc::new(MicroblogService::new(owner, &ServiceConfig::default()));
    bind(registry, &service);
    service
}

async fn next(feed: &mut UnboundedReceiver<FeedItem>) -> FeedItem {
    timeout(Duration::from_secs(5), feed.recv())
        .await
        .expect("feed item within timeout")
        .expect("feed open")
}

async fn assert_quiet(feed: &mut UnboundedReceiver<FeedItem>) {
    assert!(timeout(Duration::from_millis(200), feed.recv()).await.is_err());
}

async fn wait_for_subscribers(service: &MicroblogService, count: usize) {
    timeout(Duration::from_secs(5), async {
        while service.subscription_count() != count {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("subscription count reached");
}

fn keys(item: FeedItem) -> Vec<(String, u64)> {
    match item {
        FeedItem::Snapshot(messages) => messages
            .into_iter()
            .map(|m| (m.owner, m.serial))
            .collect(),
        other => panic!("expected snapshot, got {:?}", other),
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn initial_snapshot_is_merged_by_time() {
    let registry = registry();
    let alice = microblog(&registry, "alice");
    let bob = microblog(&registry, "bob");

    alice.post_message_at("first", BASE);
    bob.post_message_at("middle", BASE + 2);
    alice.post_message_at("last", BASE + 5);

    let (_session, mut feed) = FollowerSession::start(registry.clone(), ["alice", "bob"])
        .await
        .unwrap();

    assert_eq!(
        keys(next(&mut feed).await),
        vec![
            ("alice".to_string(), 1),
            ("bob".to_string(), 1),
            ("alice".to_string(), 2)
        ]
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn catch_up_window_is_two_messages() {
    let registry = registry();
    let alice = microblog(&registry, "alice");
    for i in 0..5 {
        alice.post_message_at(&format!("m{}", i), BASE + i);
    }
    alice.delete_message(5).unwrap();

    let (_session, mut feed) = FollowerSession::start(registry.clone(), ["alice"])
        .await
        .unwrap();

    assert_eq!(
        keys(next(&mut feed).await),
        vec![("alice".to_string(), 3), ("alice".to_string(), 4)]
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn pending_owner_is_picked_up_on_bind() {
    let registry = registry();
    let (session, mut feed) = FollowerSession::start(registry.clone(), ["carol"])
        .await
        .unwrap();

    assert_eq!(next(&mut feed).await, FeedItem::Snapshot(Vec::new()));
    assert_eq!(session.pending(), vec!["carol"]);

    let carol = microblog(&registry, "carol");
    wait_for_subscribers(&carol, 1).await;
    assert_eq!(session.active(), vec!["carol"]);

    for text in ["one", "two", "three"] {
        carol.post_message(text);
    }
    for serial in 1..=3 {
        match next(&mut feed).await {
            FeedItem::Message(message) => {
                assert_eq!(message.owner, "carol");
                assert_eq!(message.serial, serial);
            }
            other => panic!("expected message, got {:?}", other),
        }
    }
    assert_quiet(&mut feed).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn unbind_reports_unavailable_and_rebind_starts_over() {
    let registry = registry();
    let alice = microblog(&registry, "alice");
    alice.post_message_at("old", BASE);

    let (session, mut feed) = FollowerSession::start(registry.clone(), ["alice"])
        .await
        .unwrap();
    assert_eq!(keys(next(&mut feed).await), vec![("alice".to_string(), 1)]);

    registry.unbind("alice").unwrap();
    assert_eq!(next(&mut feed).await, FeedItem::Unavailable("alice".into()));
    assert_eq!(session.pending(), vec!["alice"]);

    // A fresh instance numbers from 1 again and is caught up as usual.
    let restarted = Arc::new(MicroblogService::new("alice", &ServiceConfig::default()));
    restarted.post_message_at("new", BASE + 60);
    bind(&registry, &restarted);

    match next(&mut feed).await {
        FeedItem::Message(message) => {
            assert_eq!(message.serial, 1);
            assert_eq!(message.text, "new");
        }
        other => panic!("expected message, got {:?}", other),
    }
    assert_quiet(&mut feed).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn unwatch_stops_delivery() {
    let registry = registry();
    let alice = microblog(&registry, "alice");
    let (session, mut feed) = FollowerSession::start(registry.clone(), ["alice"])
        .await
        .unwrap();
    next(&mut feed).await;
    assert_eq!(alice.subscription_count(), 1);

    assert!(session.unwatch("alice").await);
    assert!(!session.unwatch("alice").await);
    assert_eq!(alice.subscription_count(), 0);

    alice.post_message("unseen");
    assert_quiet(&mut feed).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn watch_after_start_attaches_bound_owner() {
    let registry = registry();
    let dave = microblog(&registry, "dave");
    dave.post_message_at("hello", BASE);

    let (session, mut feed) = FollowerSession::start(registry.clone(), Vec::<String>::new())
        .await
        .unwrap();
    assert_eq!(next(&mut feed).await, FeedItem::Snapshot(Vec::new()));

    session.watch("dave").await;
    match next(&mut feed).await {
        FeedItem::Message(message) => assert_eq!((message.owner.as_str(), message.serial), ("dave", 1)),
        other => panic!("expected message, got {:?}", other),
    }
    assert_eq!(dave.subscription_count(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn shutdown_cancels_subscriptions() {
    let registry = registry();
    let alice = microblog(&registry, "alice");
    let bob = microblog(&registry, "bob");

    let (session, mut feed) = FollowerSession::start(registry.clone(), ["alice", "bob"])
        .await
        .unwrap();
    next(&mut feed).await;

    session.shutdown().await;
    assert_eq!(alice.subscription_count(), 0);
    assert_eq!(bob.subscription_count(), 0);
    assert!(session.active().is_empty());

    alice.post_message("after shutdown");
    assert_quiet(&mut feed).await;
}

#[tokio::test(start_paused = true)]
async fn subscription_lease_shorter_than_watch_lease_is_kept_alive() {
    let registry = registry_with_lease(Duration::from_secs(10));
    let alice = microblog_with_lease(&registry, "alice", Duration::from_secs(1));

    let (_session, mut feed) = FollowerSession::start(registry.clone(), ["alice"])
        .await
        .unwrap();
    assert_eq!(next(&mut feed).await, FeedItem::Snapshot(Vec::new()));

    // Several subscription intervals pass before anything is posted.
    tokio::time::sleep(Duration::from_secs(3)).await;
    for text in ["m1", "m2", "m3"] {
        alice.post_message(text);
    }
    tokio::time::sleep(Duration::from_secs(4)).await;

    let received = drain_messages(&mut feed);
    assert_eq!(serials_of(&received, "alice"), vec![1, 2, 3]);
    assert_eq!(alice.subscription_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn short_leases_survive_many_intervals() {
    let registry = registry_with_lease(Duration::from_secs(1));
    let alice = microblog_with_lease(&registry, "alice", Duration::from_secs(2));

    let (session, mut feed) = FollowerSession::start(registry.clone(), ["alice", "carol"])
        .await
        .unwrap();
    assert_eq!(next(&mut feed).await, FeedItem::Snapshot(Vec::new()));

    tokio::time::sleep(Duration::from_secs(5)).await;
    let carol = microblog_with_lease(&registry, "carol", Duration::from_millis(500));
    wait_for_subscribers(&carol, 1).await;
    assert_eq!(session.active(), vec!["alice", "carol"]);

    for round in 0..3 {
        alice.post_message(&format!("alice {}", round));
        carol.post_message(&format!("carol {}", round));
        tokio::time::sleep(Duration::from_millis(1700)).await;
    }
    tokio::time::sleep(Duration::from_secs(3)).await;

    let received = drain_messages(&mut feed);
    assert_eq!(serials_of(&received, "alice"), vec![1, 2, 3]);
    assert_eq!(serials_of(&received, "carol"), vec![1, 2, 3]);
    assert_eq!(alice.subscription_count(), 1);
    assert_eq!(carol.subscription_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn lapsed_subscription_is_reattached_without_duplicates() {
    let registry = registry_with_lease(Duration::from_secs(10));
    let config = ServiceConfig::default().with_lease_interval(Duration::from_secs(1));
    let alice = Arc::new(MicroblogService::new("alice", &config));
    let unreliable = Arc::new(UnreliableMicroblog {
        inner: Arc::clone(&alice),
        refuse_renewals: AtomicBool::new(false),
    });
    registry
        .bind(
            "alice",
            MICROBLOG_TYPE,
            unreliable.clone() as Arc<dyn MicroblogRef>,
            Duration::from_secs(3600),
        )
        .unwrap();

    let (_session, mut feed) = FollowerSession::start(registry.clone(), ["alice"])
        .await
        .unwrap();
    assert_eq!(next(&mut feed).await, FeedItem::Snapshot(Vec::new()));

    alice.post_message("before");
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(drain_messages(&mut feed), vec![("alice".to_string(), 1)]);

    // Renewals fail long enough for the subscription to lapse; a message
    // posted meanwhile reaches nobody live.
    unreliable.refuse_renewals.store(true, Ordering::SeqCst);
    tokio::time::sleep(Duration::from_secs(3)).await;
    alice.post_message("during");
    assert_eq!(alice.subscription_count(), 0);

    // The next renewal finds the lease gone and subscribes again; catch-up
    // supplies the missed message and skips the one already delivered.
    unreliable.refuse_renewals.store(false, Ordering::SeqCst);
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(alice.subscription_count(), 1);

    alice.post_message("after");
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(
        drain_messages(&mut feed),
        vec![("alice".to_string(), 2), ("alice".to_string(), 3)]
    );
}

#[tokio::test(start_paused = true)]
async fn lapsed_watch_is_registered_again() {
    let registry = registry_with_lease(Duration::from_secs(1));
    let directory = Arc::new(UnreliableDirectory {
        inner: registry.clone(),
        refuse_renewals: AtomicBool::new(true),
    });

    let (session, mut feed) = FollowerSession::start(directory.clone(), ["carol"])
        .await
        .unwrap();
    assert_eq!(next(&mut feed).await, FeedItem::Snapshot(Vec::new()));

    tokio::time::sleep(Duration::from_secs(3)).await;
    directory.refuse_renewals.store(false, Ordering::SeqCst);
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(session.pending(), vec!["carol"]);

    let carol = microblog_with_lease(&registry, "carol", Duration::from_secs(1));
    wait_for_subscribers(&carol, 1).await;
    assert_eq!(session.active(), vec!["carol"]);

    for text in ["one", "two"] {
        carol.post_message(text);
    }
    tokio::time::sleep(Duration::from_secs(3)).await;
    assert_eq!(
        drain_messages(&mut feed),
        vec![("carol".to_string(), 1), ("carol".to_string(), 2)]
    );
}
