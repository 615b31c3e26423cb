//! Lease-bounded publish/subscribe.
//!
//! An [`EventHub`] fans every published event out to its live subscriptions.
//! Each subscription has its own bounded queue and delivery task, so a slow
//! or dead listener never holds up the publisher or the other listeners.

mod hub;
mod subscription;

pub use hub::EventHub;
