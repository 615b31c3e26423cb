//! Traits at the remote seams.
//!
//! Followers and command-line tools talk to microblogs and the registry
//! through these traits. In-process implementations live in this crate; the
//! network implementations live in the client crate.

use std::sync::Arc;

use async_trait::async_trait;
use p2patter_proto::{ChangeFilter, LeaseGrant, RecentSnapshot};

use crate::error::Error;
use crate::listener::{ChangeListener, MessageListener};

/// Handle to one owner's microblog service.
#[async_trait]
pub trait MicroblogRef: Send + Sync {
    /// Append a message and return its rendered form.
    async fn post_message(&self, text: &str) -> Result<String, Error>;

    /// Tombstone a message and return the form it had.
    ///
    /// Fails with [`Error::NotFound`] if `serial` is not a live message.
    async fn delete_message(&self, serial: u64) -> Result<String, Error>;

    /// Register a listener for message-added events.
    async fn subscribe(&self, listener: Arc<MessageListener>) -> Result<LeaseGrant, Error>;

    /// Renew a subscription lease.
    async fn renew(&self, lease_id: u64) -> Result<LeaseGrant, Error>;

    /// Cancel a subscription.
    async fn cancel(&self, lease_id: u64) -> Result<(), Error>;

    /// The two most recent live messages.
    async fn recent_snapshot(&self) -> Result<RecentSnapshot, Error>;
}

/// The part of the name registry a follower uses.
#[async_trait]
pub trait Directory: Send + Sync {
    /// Resolve a name to its microblog.
    ///
    /// Fails with [`Error::NotBound`] if the name has no live binding.
    async fn lookup(&self, name: &str) -> Result<Arc<dyn MicroblogRef>, Error>;

    /// Names currently bound under a type tag.
    async fn list(&self, type_tag: &str) -> Result<Vec<String>, Error>;

    /// Register a listener for bind/unbind events passing `filter`.
    async fn watch(
        &self,
        filter: ChangeFilter,
        listener: Arc<ChangeListener>,
    ) -> Result<LeaseGrant, Error>;

    /// Renew a watch lease.
    async fn renew(&self, lease_id: u64) -> Result<LeaseGrant, Error>;

    /// Cancel a watch.
    async fn cancel(&self, lease_id: u64) -> Result<(), Error>;
}
