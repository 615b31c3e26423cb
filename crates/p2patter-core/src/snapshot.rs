//! Ordered merge buffer for a follower's initial view.

use std::cmp::Ordering;

use p2patter_proto::{Message, RecentSnapshot};

/// Messages collected during catch-up, kept ascending by
/// `(timestamp, owner, serial)`.
///
/// Each insert scans from the front and places the message before the first
/// entry whose key is not smaller. A message whose key is already present is
/// the same message and is not inserted twice.
#[derive(Debug, Clone, Default)]
pub struct InitialSnapshot {
    messages: Vec<Message>,
}

impl InitialSnapshot {
    /// Create an empty buffer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge one message. Returns `false` if it was already present.
    pub fn insert(&mut self, message: Message) -> bool {
        let position = self
            .messages
            .iter()
            .position(|existing| existing.feed_cmp(&message) != Ordering::Less)
            .unwrap_or(self.messages.len());

        if self
            .messages
            .get(position)
            .is_some_and(|existing| existing.feed_cmp(&message) == Ordering::Equal)
        {
            return false;
        }
        self.messages.insert(position, message);
        true
    }

    /// Merge every message of an owner's recent snapshot.
    pub fn merge(&mut self, snapshot: RecentSnapshot) {
        for message in snapshot.into_messages() {
            self.insert(message);
        }
    }

    /// Whether an owner's message is present.
    pub fn contains(&self, owner: &str, serial: u64) -> bool {
        self.messages
            .iter()
            .any(|m| m.owner == owner && m.serial == serial)
    }

    /// Highest serial present for an owner, or 0.
    pub fn high_water(&self, owner: &str) -> u64 {
        self.messages
            .iter()
            .filter(|m| m.owner == owner)
            .map(|m| m.serial)
            .max()
            .unwrap_or(0)
    }

    /// Messages in ascending order.
    pub fn iter(&self) -> impl Iterator<Item = &Message> {
        self.messages.iter()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Hand the ascending sequence over, consuming the buffer.
    pub fn into_messages(self) -> Vec<Message> {
        self.messages
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn keys(snapshot: &InitialSnapshot) -> Vec<(String, u64)> {
        snapshot
            .iter()
            .map(|m| (m.owner.clone(), m.serial))
            .collect()
    }

    #[test]
    fn test_scenario_order() {
        // alice posts at :00 and :05, bob at :02.
        let mut snapshot = InitialSnapshot::new();
        snapshot.merge(RecentSnapshot {
            owner: "alice".into(),
            latest: Some(Message::new("alice", 2, 5, "later")),
            previous: Some(Message::new("alice", 1, 0, "first")),
        });
        snapshot.merge(RecentSnapshot {
            owner: "bob".into(),
            latest: Some(Message::new("bob", 1, 2, "middle")),
            previous: None,
        });

        assert_eq!(
            keys(&snapshot),
            vec![
                ("alice".to_string(), 1),
                ("bob".to_string(), 1),
                ("alice".to_string(), 2)
            ]
        );
    }

    #[test]
    fn test_order_independent_of_input_order() {
        let messages = vec![
            Message::new("carol", 1, 10, "a"),
            Message::new("alice", 3, 10, "b"),
            Message::new("alice", 2, 10, "c"),
            Message::new("bob", 7, 4, "d"),
            Message::new("zed", 1, 12, "e"),
        ];

        let mut forward = InitialSnapshot::new();
        for m in messages.iter().cloned() {
            forward.insert(m);
        }
        let mut backward = InitialSnapshot::new();
        for m in messages.iter().rev().cloned() {
            backward.insert(m);
        }

        assert_eq!(keys(&forward), keys(&backward));
        assert_eq!(
            keys(&forward),
            vec![
                ("bob".to_string(), 7),
                ("alice".to_string(), 2),
                ("alice".to_string(), 3),
                ("carol".to_string(), 1),
                ("zed".to_string(), 1)
            ]
        );
    }

    #[test]
    fn test_duplicate_ignored() {
        let mut snapshot = InitialSnapshot::new();
        assert!(snapshot.insert(Message::new("alice", 1, 0, "x")));
        assert!(!snapshot.insert(Message::new("alice", 1, 0, "x")));
        assert_eq!(snapshot.len(), 1);
        assert!(snapshot.contains("alice", 1));
        assert_eq!(snapshot.high_water("alice"), 1);
        assert_eq!(snapshot.high_water("bob"), 0);
    }
}
