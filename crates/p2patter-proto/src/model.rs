//! Value types shared by services, the registry, and followers.

use std::cmp::Ordering;
use std::fmt;

use chrono::{DateTime, Local};
use rkyv::{Archive, Deserialize, Serialize};
use serde::{Deserialize as SerdeDeserialize, Serialize as SerdeSerialize};

/// Separator line printed above every rendered message (80 hyphens).
pub const SEPARATOR: &str = concat!(
    "----------",
    "----------",
    "----------",
    "----------",
    "----------",
    "----------",
    "----------",
    "----------",
);

/// Registry type tag under which microblog services are bound.
pub const MICROBLOG_TYPE: &str = "microblog";

/// Date/time pattern used in rendered message headers.
pub const TIMESTAMP_FORMAT: &str = "%Y/%m/%d %H:%M:%S";

/// A posted microblog message.
///
/// Immutable once created. `timestamp` is UTC unix seconds; sub-second
/// precision is never carried.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Archive, Serialize, Deserialize, SerdeSerialize, SerdeDeserialize)]
pub struct Message {
    /// Owner of the microblog the message belongs to.
    pub owner: String,
    /// Per-owner serial number, starting at 1.
    pub serial: u64,
    /// Post time in unix seconds.
    pub timestamp: i64,
    /// Message text.
    pub text: String,
}

impl Message {
    /// Create a new message.
    pub fn new(owner: impl Into<String>, serial: u64, timestamp: i64, text: impl Into<String>) -> Self {
        Self {
            owner: owner.into(),
            serial,
            timestamp,
            text: text.into(),
        }
    }

    /// Post time in the local time zone.
    pub fn posted_at(&self) -> Option<DateTime<Local>> {
        DateTime::from_timestamp(self.timestamp, 0).map(|utc| utc.with_timezone(&Local))
    }

    /// The `"{owner} -- Message {serial} -- {timestamp}"` header line.
    pub fn header(&self) -> String {
        let when = match self.posted_at() {
            Some(at) => at.format(TIMESTAMP_FORMAT).to_string(),
            None => self.timestamp.to_string(),
        };
        format!("{} -- Message {} -- {}", self.owner, self.serial, when)
    }

    /// Full rendered form: separator, header, and text on three lines.
    pub fn render(&self) -> String {
        format!("{}\n{}\n{}", SEPARATOR, self.header(), self.text)
    }

    /// Compare by the feed ordering key `(timestamp, owner, serial)`.
    pub fn feed_cmp(&self, other: &Message) -> Ordering {
        self.timestamp
            .cmp(&other.timestamp)
            .then_with(|| self.owner.cmp(&other.owner))
            .then_with(|| self.serial.cmp(&other.serial))
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render())
    }
}

/// Render the report printed when a followed owner's service goes away.
pub fn render_unavailable(owner: &str) -> String {
    format!("{}\n{} -- Failed", SEPARATOR, owner)
}

/// Event raised by a microblog when a message is added.
#[derive(Debug, Clone, PartialEq, Archive, Serialize, Deserialize, SerdeSerialize, SerdeDeserialize)]
pub struct MicroblogEvent {
    /// Owner whose log changed.
    pub owner: String,
    /// The message that was added.
    pub message: Message,
}

impl MicroblogEvent {
    /// Create a message-added event.
    pub fn message_added(message: Message) -> Self {
        Self {
            owner: message.owner.clone(),
            message,
        }
    }
}

/// Direction of a registry change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Archive, Serialize, Deserialize, SerdeSerialize, SerdeDeserialize)]
pub enum ChangeKind {
    /// A name became associated with a service endpoint.
    Bound,
    /// A name lost its binding (explicit unbind or lease expiry).
    Unbound,
}

/// Change notification emitted by the registry.
#[derive(Debug, Clone, PartialEq, Archive, Serialize, Deserialize, SerdeSerialize, SerdeDeserialize)]
pub struct RegistryEvent {
    /// Bound or unbound.
    pub kind: ChangeKind,
    /// The affected name.
    pub name: String,
    /// Type tag of the affected binding.
    pub type_tag: String,
}

impl RegistryEvent {
    /// Create a bound event.
    pub fn bound(name: impl Into<String>, type_tag: impl Into<String>) -> Self {
        Self {
            kind: ChangeKind::Bound,
            name: name.into(),
            type_tag: type_tag.into(),
        }
    }

    /// Create an unbound event.
    pub fn unbound(name: impl Into<String>, type_tag: impl Into<String>) -> Self {
        Self {
            kind: ChangeKind::Unbound,
            name: name.into(),
            type_tag: type_tag.into(),
        }
    }
}

/// Selects which registry change events a listener receives.
#[derive(Debug, Clone, PartialEq, Eq, Default, Archive, Serialize, Deserialize, SerdeSerialize, SerdeDeserialize)]
pub struct ChangeFilter {
    /// Only report bindings with this type tag; `None` reports every type.
    pub type_tag: Option<String>,
    /// Report bound events.
    pub bound: bool,
    /// Report unbound events.
    pub unbound: bool,
}

impl ChangeFilter {
    /// A filter that reports nothing until directions are added.
    pub fn new() -> Self {
        Self::default()
    }

    /// Restrict to one type tag.
    pub fn for_type(type_tag: impl Into<String>) -> Self {
        Self {
            type_tag: Some(type_tag.into()),
            ..Self::default()
        }
    }

    /// Include bound events.
    pub fn report_bound(mut self) -> Self {
        self.bound = true;
        self
    }

    /// Include unbound events.
    pub fn report_unbound(mut self) -> Self {
        self.unbound = true;
        self
    }

    /// Check whether an event passes this filter.
    pub fn matches(&self, event: &RegistryEvent) -> bool {
        let direction = match event.kind {
            ChangeKind::Bound => self.bound,
            ChangeKind::Unbound => self.unbound,
        };
        direction
            && self
                .type_tag
                .as_deref()
                .map_or(true, |tag| tag == event.type_tag)
    }
}

/// A lease grant as seen on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Archive, Serialize, Deserialize, SerdeSerialize, SerdeDeserialize)]
pub struct LeaseGrant {
    /// Lease identifier, unique within the granting endpoint.
    pub lease_id: u64,
    /// Interval within which the holder must renew, in milliseconds.
    pub interval_ms: u64,
}

/// The two most recent live messages of one owner.
#[derive(Debug, Clone, PartialEq, Archive, Serialize, Deserialize, SerdeSerialize, SerdeDeserialize)]
pub struct RecentSnapshot {
    /// Owner the snapshot was taken from.
    pub owner: String,
    /// Most recent live message.
    pub latest: Option<Message>,
    /// Second most recent live message.
    pub previous: Option<Message>,
}

impl RecentSnapshot {
    /// Iterate over the messages present, most recent first.
    pub fn messages(&self) -> impl Iterator<Item = &Message> {
        self.latest.iter().chain(self.previous.iter())
    }

    /// Consume the snapshot into its present messages, most recent first.
    pub fn into_messages(self) -> Vec<Message> {
        self.latest.into_iter().chain(self.previous).collect()
    }
}

/// Address of a listener exported through a callback endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Archive, Serialize, Deserialize, SerdeSerialize, SerdeDeserialize)]
pub struct ListenerRef {
    /// nng URL of the callback endpoint.
    pub endpoint: String,
    /// Listener identifier within that endpoint.
    pub listener_id: u64,
}

/// Event payload carried by a notify request.
#[derive(Debug, Clone, PartialEq, Archive, Serialize, Deserialize, SerdeSerialize, SerdeDeserialize)]
pub enum Event {
    /// A microblog event.
    Microblog(MicroblogEvent),
    /// A registry change event.
    Registry(RegistryEvent),
}

impl From<MicroblogEvent> for Event {
    fn from(event: MicroblogEvent) -> Self {
        Event::Microblog(event)
    }
}

impl From<RegistryEvent> for Event {
    fn from(event: RegistryEvent) -> Self {
        Event::Registry(event)
    }
}
