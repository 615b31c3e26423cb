//! The microblog service of one owner.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use p2patter_proto::{LeaseGrant, MicroblogEvent, RecentSnapshot};
use parking_lot::RwLock;

use crate::config::ServiceConfig;
use crate::error::Error;
use crate::listener::MessageListener;
use crate::log::MessageLog;
use crate::pubsub::EventHub;
use crate::remote::MicroblogRef;

/// A microblog: one owner's message log and the hub announcing additions.
///
/// Appends and removals take the log's write lock, and an append publishes
/// its event before releasing it, so events leave the hub in serial order.
/// Snapshots share the read lock and never see a half-applied append.
pub struct MicroblogService {
    owner: String,
    log: RwLock<MessageLog>,
    hub: EventHub<MicroblogEvent>,
}

impl MicroblogService {
    /// Create an empty microblog for an owner.
    pub fn new(owner: impl Into<String>, config: &ServiceConfig) -> Self {
        let owner = owner.into();
        Self {
            log: RwLock::new(MessageLog::new(owner.clone())),
            hub: EventHub::new(format!("microblog:{}", owner), config),
            owner,
        }
    }

    /// Owner of this microblog.
    pub fn owner(&self) -> &str {
        &self.owner
    }

    /// Append a message stamped with the current time.
    pub fn post_message(&self, text: &str) -> String {
        self.post_message_at(text, Utc::now().timestamp())
    }

    /// Append a message with an explicit timestamp (unix seconds).
    pub fn post_message_at(&self, text: &str, timestamp: i64) -> String {
        let mut log = self.log.write();
        let message = log.append(text, timestamp);
        let rendered = message.render();

        tracing::info!(owner = %self.owner, serial = message.serial, "message posted");
        self.hub.publish(MicroblogEvent::message_added(message));
        rendered
    }

    /// Tombstone a message and return the form it had.
    pub fn delete_message(&self, serial: u64) -> Result<String, Error> {
        let removed = self.log.write().remove(serial)?;
        tracing::info!(owner = %self.owner, serial, "message removed");
        Ok(removed.render())
    }

    /// Register a listener for message-added events.
    pub fn subscribe(&self, listener: Arc<MessageListener>) -> LeaseGrant {
        self.hub.subscribe(listener)
    }

    /// Renew a subscription lease.
    pub fn renew(&self, lease_id: u64) -> Result<LeaseGrant, Error> {
        self.hub.renew(lease_id)
    }

    /// Cancel a subscription.
    pub fn cancel(&self, lease_id: u64) -> Result<(), Error> {
        self.hub.cancel(lease_id)
    }

    /// The two most recent live messages.
    pub fn recent_snapshot(&self) -> RecentSnapshot {
        let (latest, previous) = self.log.read().recent_two();
        RecentSnapshot {
            owner: self.owner.clone(),
            latest,
            previous,
        }
    }

    /// Drop expired subscriptions.
    pub fn sweep(&self) -> usize {
        self.hub.sweep()
    }

    /// Number of subscriptions held.
    pub fn subscription_count(&self) -> usize {
        self.hub.len()
    }
}

#[async_trait]
impl MicroblogRef for MicroblogService {
    async fn post_message(&self, text: &str) -> Result<String, Error> {
        Ok(MicroblogService::post_message(self, text))
    }

    async fn delete_message(&self, serial: u64) -> Result<String, Error> {
        MicroblogService::delete_message(self, serial)
    }

    async fn subscribe(&self, listener: Arc<MessageListener>) -> Result<LeaseGrant, Error> {
        Ok(MicroblogService::subscribe(self, listener))
    }

    async fn renew(&self, lease_id: u64) -> Result<LeaseGrant, Error> {
        MicroblogService::renew(self, lease_id)
    }

    async fn cancel(&self, lease_id: u64) -> Result<(), Error> {
        MicroblogService::cancel(self, lease_id)
    }

    async fn recent_snapshot(&self) -> Result<RecentSnapshot, Error> {
        Ok(MicroblogService::recent_snapshot(self))
    }
}
