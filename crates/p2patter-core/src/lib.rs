//! P2Patter core.
//!
//! This crate holds everything that runs inside a single process and does not
//! touch the network:
//!
//! - [`log`] - Per-owner message log with tombstones and serial allocation
//! - [`pubsub`] - Lease-bounded event fan-out ([`EventHub`])
//! - [`microblog`] - The microblog service for one owner
//! - [`registry`] - In-memory name registry with change notifications
//! - [`snapshot`] - Ordered merge buffer for a follower's initial view
//! - [`remote`] - Traits at the remote seams ([`MicroblogRef`], [`Directory`])

pub mod config;
pub mod error;
pub mod lease;
pub mod listener;
pub mod log;
pub mod microblog;
pub mod pubsub;
pub mod registry;
pub mod remote;
pub mod snapshot;

pub use config::ServiceConfig;
pub use error::Error;
pub use lease::{Lease, LeaseIds};
pub use listener::{ChangeListener, ChannelListener, Listener, MessageListener};
pub use log::{MessageLog, SerialAllocator};
pub use microblog::MicroblogService;
pub use pubsub::EventHub;
pub use registry::Registry;
pub use remote::{Directory, MicroblogRef};
pub use snapshot::InitialSnapshot;
