//! Request and response message types.

use crate::model::{ChangeFilter, Event, LeaseGrant, ListenerRef, RecentSnapshot};
use rkyv::{Archive, Deserialize, Serialize};
use serde::{Deserialize as SerdeDeserialize, Serialize as SerdeSerialize};

/// A request sent to a microblog, the registry, or a callback endpoint.
#[derive(Debug, Clone, PartialEq, Archive, Serialize, Deserialize, SerdeSerialize, SerdeDeserialize)]
pub struct Request {
    /// Unique request identifier for correlation.
    pub id: u64,
    /// The operation to perform.
    pub operation: Operation,
}

/// Operations that can be requested.
///
/// Each endpoint kind answers its own subset and rejects the rest with
/// [`error_codes::UNSUPPORTED`].
#[derive(Debug, Clone, PartialEq, Archive, Serialize, Deserialize, SerdeSerialize, SerdeDeserialize)]
pub enum Operation {
    /// Ping the endpoint (for health checks).
    Ping,

    /// Append a message to the microblog.
    PostMessage {
        /// Message text.
        text: String,
    },
    /// Tombstone a message in the microblog.
    DeleteMessage {
        /// Serial number of the message to remove.
        serial: u64,
    },
    /// Subscribe an exported listener to message-added events.
    Subscribe {
        /// Where to deliver events.
        listener: ListenerRef,
    },
    /// Fetch the two most recent live messages.
    RecentSnapshot,

    /// Renew a lease granted by this endpoint.
    RenewLease {
        /// Lease to renew.
        lease_id: u64,
    },
    /// Cancel a lease granted by this endpoint.
    CancelLease {
        /// Lease to cancel.
        lease_id: u64,
    },

    /// Bind a name to a service endpoint.
    Bind {
        /// Name to bind.
        name: String,
        /// Type tag of the service.
        type_tag: String,
        /// nng URL where the service listens.
        endpoint: String,
        /// Lease interval requested by the service, in milliseconds.
        lease_ms: u64,
    },
    /// Remove a binding.
    Unbind {
        /// Name to unbind.
        name: String,
    },
    /// Resolve a name to its endpoint.
    Lookup {
        /// Name to resolve.
        name: String,
    },
    /// List the names currently bound under a type tag.
    List {
        /// Type tag to list.
        type_tag: String,
    },
    /// Register an exported listener for registry change events.
    Watch {
        /// Which events to report.
        filter: ChangeFilter,
        /// Where to deliver events.
        listener: ListenerRef,
    },

    /// Deliver an event to an exported listener.
    Notify {
        /// Listener identifier within the callback endpoint.
        listener_id: u64,
        /// Sequence number assigned by the event source.
        seq: u64,
        /// The event.
        event: Event,
    },
}

impl Operation {
    /// Short operation name for logs.
    pub fn name(&self) -> &'static str {
        match self {
            Operation::Ping => "ping",
            Operation::PostMessage { .. } => "post_message",
            Operation::DeleteMessage { .. } => "delete_message",
            Operation::Subscribe { .. } => "subscribe",
            Operation::RecentSnapshot => "recent_snapshot",
            Operation::RenewLease { .. } => "renew_lease",
            Operation::CancelLease { .. } => "cancel_lease",
            Operation::Bind { .. } => "bind",
            Operation::Unbind { .. } => "unbind",
            Operation::Lookup { .. } => "lookup",
            Operation::List { .. } => "list",
            Operation::Watch { .. } => "watch",
            Operation::Notify { .. } => "notify",
        }
    }
}

impl Request {
    /// Create a request with the given operation.
    pub fn new(id: u64, operation: Operation) -> Self {
        Self { id, operation }
    }

    /// Create a ping request.
    pub fn ping(id: u64) -> Self {
        Self::new(id, Operation::Ping)
    }

    /// Create a post message request.
    pub fn post_message(id: u64, text: impl Into<String>) -> Self {
        Self::new(id, Operation::PostMessage { text: text.into() })
    }

    /// Create a delete message request.
    pub fn delete_message(id: u64, serial: u64) -> Self {
        Self::new(id, Operation::DeleteMessage { serial })
    }

    /// Create a subscribe request.
    pub fn subscribe(id: u64, listener: ListenerRef) -> Self {
        Self::new(id, Operation::Subscribe { listener })
    }

    /// Create a recent snapshot request.
    pub fn recent_snapshot(id: u64) -> Self {
        Self::new(id, Operation::RecentSnapshot)
    }

    /// Create a lease renewal request.
    pub fn renew_lease(id: u64, lease_id: u64) -> Self {
        Self::new(id, Operation::RenewLease { lease_id })
    }

    /// Create a lease cancellation request.
    pub fn cancel_lease(id: u64, lease_id: u64) -> Self {
        Self::new(id, Operation::CancelLease { lease_id })
    }

    /// Create a bind request.
    pub fn bind(
        id: u64,
        name: impl Into<String>,
        type_tag: impl Into<String>,
        endpoint: impl Into<String>,
        lease_ms: u64,
    ) -> Self {
        Self::new(
            id,
            Operation::Bind {
                name: name.into(),
                type_tag: type_tag.into(),
                endpoint: endpoint.into(),
                lease_ms,
            },
        )
    }

    /// Create an unbind request.
    pub fn unbind(id: u64, name: impl Into<String>) -> Self {
        Self::new(id, Operation::Unbind { name: name.into() })
    }

    /// Create a lookup request.
    pub fn lookup(id: u64, name: impl Into<String>) -> Self {
        Self::new(id, Operation::Lookup { name: name.into() })
    }

    /// Create a list request.
    pub fn list(id: u64, type_tag: impl Into<String>) -> Self {
        Self::new(
            id,
            Operation::List {
                type_tag: type_tag.into(),
            },
        )
    }

    /// Create a watch request.
    pub fn watch(id: u64, filter: ChangeFilter, listener: ListenerRef) -> Self {
        Self::new(id, Operation::Watch { filter, listener })
    }

    /// Create a notify request.
    pub fn notify(id: u64, listener_id: u64, seq: u64, event: Event) -> Self {
        Self::new(
            id,
            Operation::Notify {
                listener_id,
                seq,
                event,
            },
        )
    }
}

/// A response to a request.
#[derive(Debug, Clone, PartialEq, Archive, Serialize, Deserialize, SerdeSerialize, SerdeDeserialize)]
pub struct Response {
    /// Request ID this response correlates to.
    pub id: u64,
    /// Response status.
    pub status: Status,
    /// Response payload.
    pub payload: ResponsePayload,
}

/// Response status.
#[derive(Debug, Clone, PartialEq, Archive, Serialize, Deserialize, SerdeSerialize, SerdeDeserialize)]
pub enum Status {
    /// Request succeeded.
    Ok,
    /// Request failed with an error.
    Error {
        /// Error code for programmatic handling.
        code: u32,
        /// Human-readable error detail.
        message: String,
    },
}

impl Status {
    /// Create an error status.
    pub fn error(code: u32, message: impl Into<String>) -> Self {
        Status::Error {
            code,
            message: message.into(),
        }
    }

    /// Check if this is a success status.
    pub fn is_ok(&self) -> bool {
        matches!(self, Status::Ok)
    }

    /// Check if this is an error status.
    pub fn is_error(&self) -> bool {
        matches!(self, Status::Error { .. })
    }
}

/// Response payload variants.
#[derive(Debug, Clone, PartialEq, Archive, Serialize, Deserialize, SerdeSerialize, SerdeDeserialize)]
pub enum ResponsePayload {
    /// Pong response to ping.
    Pong,
    /// Rendered form of a posted or removed message.
    Rendered(String),
    /// A granted or renewed lease.
    Lease(LeaseGrant),
    /// Recent messages of a microblog.
    Snapshot(RecentSnapshot),
    /// Endpoint a name resolves to.
    Endpoint(String),
    /// Names bound under a type tag.
    Names(Vec<String>),
    /// The operation completed with nothing to return.
    Acknowledged,
    /// Empty payload (for errors).
    Empty,
}

impl Response {
    /// Create a successful response with the given payload.
    pub fn ok(id: u64, payload: ResponsePayload) -> Self {
        Self {
            id,
            status: Status::Ok,
            payload,
        }
    }

    /// Create a pong response.
    pub fn pong(id: u64) -> Self {
        Self::ok(id, ResponsePayload::Pong)
    }

    /// Create an acknowledgement.
    pub fn acknowledged(id: u64) -> Self {
        Self::ok(id, ResponsePayload::Acknowledged)
    }

    /// Create an error response.
    pub fn error(id: u64, code: u32, message: impl Into<String>) -> Self {
        Self {
            id,
            status: Status::error(code, message),
            payload: ResponsePayload::Empty,
        }
    }
}

/// Standard error codes.
pub mod error_codes {
    /// Unknown/internal error.
    pub const INTERNAL: u32 = 1;
    /// Invalid request format.
    pub const INVALID_REQUEST: u32 = 2;
    /// Serial number does not resolve to a live message, or unknown listener.
    pub const NOT_FOUND: u32 = 3;
    /// Name has no live binding.
    pub const NOT_BOUND: u32 = 4;
    /// Name is already bound.
    pub const ALREADY_BOUND: u32 = 5;
    /// Lease unknown or expired.
    pub const LEASE_EXPIRED: u32 = 6;
    /// Operation not served by this endpoint.
    pub const UNSUPPORTED: u32 = 7;
    /// Downstream endpoint unreachable.
    pub const COMMUNICATION: u32 = 8;
    /// Listener could not be reached.
    pub const LISTENER_DELIVERY: u32 = 9;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Message, MicroblogEvent};

    #[test]
    fn test_post_request() {
        let request = Request::post_message(7, "hello");
        assert_eq!(request.id, 7);
        assert_eq!(request.operation.name(), "post_message");
        assert!(matches!(
            request.operation,
            Operation::PostMessage { ref text } if text == "hello"
        ));
    }

    #[test]
    fn test_error_response() {
        let response = Response::error(42, error_codes::NOT_FOUND, "no message 9");

        assert_eq!(response.id, 42);
        assert!(response.status.is_error());
        assert_eq!(response.payload, ResponsePayload::Empty);

        if let Status::Error { code, message } = &response.status {
            assert_eq!(*code, error_codes::NOT_FOUND);
            assert_eq!(message, "no message 9");
        }
    }

    #[test]
    fn test_notify_rkyv_roundtrip() {
        let event = Event::Microblog(MicroblogEvent::message_added(Message::new(
            "alice", 1, 100, "hi",
        )));
        let request = Request::notify(3, 11, 5, event);

        let bytes = rkyv::to_bytes::<rkyv::rancor::Error>(&request).unwrap();
        let archived = rkyv::access::<ArchivedRequest, rkyv::rancor::Error>(&bytes).unwrap();
        let deserialized: Request =
            rkyv::deserialize::<Request, rkyv::rancor::Error>(archived).unwrap();

        assert_eq!(request, deserialized);
    }
}
