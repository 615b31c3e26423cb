//! P2Patter client library.
//!
//! Talks to microblog services and the name registry over nng REQ sockets,
//! and receives their event notifications through a [`CallbackEndpoint`].
//!
//! The [`follower`] module builds a live, ordered feed of several owners on
//! top of any [`Directory`](p2patter_core::Directory).
//!
//! # Example
//!
//! ```ignore
//! use p2patter_client::{ClientConfig, RegistryClient};
//! use p2patter_core::Directory;
//!
//! let registry = RegistryClient::connect(ClientConfig::new("tcp://127.0.0.1:4160"), None).await?;
//! let alice = registry.lookup("alice").await?;
//! println!("{}", alice.post_message("hello").await?);
//! ```

pub mod callback;
pub mod config;
pub mod connection;
pub mod error;
pub mod follower;
pub mod microblog;
pub mod registry;

pub use callback::CallbackEndpoint;
pub use config::{tcp_url, ClientConfig};
pub use connection::Connection;
pub use error::Error;
pub use follower::{FeedItem, FollowerSession};
pub use microblog::RemoteMicroblog;
pub use registry::RegistryClient;
