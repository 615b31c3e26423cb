//! P2Patter protocol types and serialization.
//!
//! This crate defines the wire protocol shared by microblog services, the
//! name registry, and followers, using rkyv for serialization.
//!
//! # Modules
//!
//! - [`model`] - Messages, events, filters, and lease grants
//! - [`message`] - Request/response message wrappers
//! - [`codec`] - Length-prefix framing and request/response encoding
//! - [`error`] - Protocol error types

pub mod codec;
pub mod error;
pub mod message;
pub mod model;

pub use error::Error;

// Re-export commonly used types at crate root
pub use message::{error_codes, Operation, Request, Response, ResponsePayload, Status};
pub use model::{
    ChangeFilter, ChangeKind, Event, LeaseGrant, ListenerRef, Message, MicroblogEvent,
    RecentSnapshot, RegistryEvent, MICROBLOG_TYPE, SEPARATOR,
};

/// Protocol version for wire compatibility.
pub const PROTOCOL_VERSION: u32 = 1;
