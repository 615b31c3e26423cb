//! Follower: a live, ordered feed of several owners.
//!
//! A follower names the owners it is interested in. Owners already bound when
//! it starts are subscribed to and caught up into one ordered initial
//! snapshot; owners that appear later are picked up from registry bind
//! notifications. Each owner is either pending (not known to exist) or active
//! (subscribed).
//!
//! - [`WatchSet`] - the pending and active name sets
//! - [`DiscoveryBridge`] - turns bind/unbind notifications into attach/detach
//! - [`FollowerSession`] - subscriptions, catch-up, de-duplication, renewal

mod bridge;
mod session;
mod watch;

pub use bridge::{DiscoveryBridge, OwnerTracker};
pub use session::{FeedItem, FollowerSession};
pub use watch::WatchSet;
