//! Per-owner message storage.

mod message_log;
mod serial;

pub use message_log::MessageLog;
pub use serial::SerialAllocator;
