//! P2Patter server library.
//!
//! Hosts either the name registry or one owner's microblog behind an nng
//! REP socket. Subscribers and change listeners are remote: the server dials
//! back to their callback endpoints to deliver events.

pub mod config;
pub mod error;
pub mod handler;
pub mod node;
pub mod remote_listener;
pub mod transport;

pub use config::{Args, Role, ServerConfig};
pub use error::Error;
pub use handler::{MicroblogHandler, RegistryHandler, RequestHandler};
pub use node::{MicroblogNode, RegistryNode};
pub use remote_listener::RemoteListener;
pub use transport::Transport;
