//! Microblog service behaviour under concurrent callers and lapsing leases.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use p2patter_core::{ChannelListener, Error, Listener, MicroblogService, ServiceConfig};
use p2patter_proto::MicroblogEvent;

struct CountingListener {
    calls: AtomicUsize,
}

#[async_trait]
impl Listener<MicroblogEvent> for CountingListener {
    async fn report(&self, _seq: u64, _event: &MicroblogEvent) -> Result<(), Error> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_posts_get_gapless_serials_and_ordered_events() {
    let service = Arc::new(MicroblogService::new("alice", &ServiceConfig::default()));
    let (listener, mut rx) = ChannelListener::<MicroblogEvent>::new();
    service.subscribe(Arc::new(listener));

    let mut tasks = Vec::new();
    for worker in 0..8 {
        let service = Arc::clone(&service);
        tasks.push(tokio::spawn(async move {
            for i in 0..50 {
                service.post_message(&format!("worker {} message {}", worker, i));
            }
        }));
    }
    for task in tasks {
        task.await.unwrap();
    }

    let mut serials = Vec::new();
    let mut last_seq = 0;
    while serials.len() < 400 {
        let (seq, event) = rx.recv().await.unwrap();
        assert!(seq > last_seq);
        last_seq = seq;
        serials.push(event.message.serial);
    }

    // Delivered in the order serials were allocated, none missing or repeated.
    assert_eq!(serials, (1..=400).collect::<Vec<u64>>());
}

#[tokio::test]
async fn concurrent_deletes_tombstone_once() {
    let service = Arc::new(MicroblogService::new("bob", &ServiceConfig::default()));
    for i in 0..20 {
        service.post_message_at(&format!("m{}", i), 1_000 + i);
    }

    let mut tasks = Vec::new();
    for _ in 0..4 {
        let service = Arc::clone(&service);
        tasks.push(tokio::spawn(async move {
            (1..=20)
                .filter(|&serial| service.delete_message(serial).is_ok())
                .collect::<Vec<u64>>()
        }));
    }

    let mut removed = BTreeSet::new();
    let mut total = 0;
    for task in tasks {
        let serials = task.await.unwrap();
        total += serials.len();
        removed.extend(serials);
    }
    assert_eq!(total, 20);
    assert_eq!(removed.len(), 20);

    let snapshot = service.recent_snapshot();
    assert!(snapshot.latest.is_none() && snapshot.previous.is_none());
}

#[tokio::test(start_paused = true)]
async fn expired_subscription_is_not_delivered_to() {
    let service = MicroblogService::new("carol", &ServiceConfig::default());
    let expiring = Arc::new(CountingListener {
        calls: AtomicUsize::new(0),
    });
    let (renewed, mut rx) = ChannelListener::<MicroblogEvent>::new();

    service.subscribe(expiring.clone());
    let kept = service.subscribe(Arc::new(renewed));

    service.post_message_at("before", 1);
    assert_eq!(rx.recv().await.unwrap().1.message.serial, 1);

    for _ in 0..3 {
        tokio::time::advance(Duration::from_secs(2)).await;
        service.renew(kept.lease_id).unwrap();
    }

    // The publisher is unaffected by the lapsed lease.
    let rendered = service.post_message_at("after", 2);
    assert!(rendered.ends_with("after"));
    assert_eq!(rx.recv().await.unwrap().1.message.serial, 2);

    assert_eq!(expiring.calls.load(Ordering::SeqCst), 1);
    assert_eq!(service.subscription_count(), 1);
}
