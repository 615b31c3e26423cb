//! Append/tombstone message log.

use std::mem;

use p2patter_proto::Message;

use super::SerialAllocator;
use crate::error::Error;

#[derive(Debug, Clone)]
enum Slot {
    /// Slot 0; never holds a message.
    Sentinel,
    Live(Message),
    Tombstone,
}

/// Messages of one owner, indexed by serial.
///
/// Slot `n` holds serial `n`, so the vector length is always one past the
/// highest allocated serial and lookups are O(1). Removed messages leave a
/// tombstone so a serial is never reused.
#[derive(Debug, Clone)]
pub struct MessageLog {
    owner: String,
    serials: SerialAllocator,
    slots: Vec<Slot>,
}

impl MessageLog {
    /// Create an empty log for an owner.
    pub fn new(owner: impl Into<String>) -> Self {
        Self {
            owner: owner.into(),
            serials: SerialAllocator::new(),
            slots: vec![Slot::Sentinel],
        }
    }

    /// Owner of this log.
    pub fn owner(&self) -> &str {
        &self.owner
    }

    /// Append a message stamped with `timestamp` (unix seconds).
    pub fn append(&mut self, text: impl Into<String>, timestamp: i64) -> Message {
        let serial = self.serials.allocate();
        debug_assert_eq!(slot_index(serial), Some(self.slots.len()));

        let message = Message::new(self.owner.clone(), serial, timestamp, text);
        self.slots.push(Slot::Live(message.clone()));
        message
    }

    /// Tombstone a live message and return it.
    pub fn remove(&mut self, serial: u64) -> Result<Message, Error> {
        let slot = slot_index(serial)
            .and_then(|index| self.slots.get_mut(index))
            .filter(|slot| matches!(slot, Slot::Live(_)));
        if let Some(slot) = slot {
            if let Slot::Live(message) = mem::replace(slot, Slot::Tombstone) {
                return Ok(message);
            }
        }
        Err(Error::NotFound(format!(
            "{} has no message {}",
            self.owner, serial
        )))
    }

    /// Look up a live message.
    pub fn get(&self, serial: u64) -> Option<&Message> {
        match slot_index(serial).and_then(|index| self.slots.get(index)) {
            Some(Slot::Live(message)) => Some(message),
            _ => None,
        }
    }

    /// The two most recent live messages, most recent first.
    pub fn recent_two(&self) -> (Option<Message>, Option<Message>) {
        let mut live = self.slots.iter().rev().filter_map(|slot| match slot {
            Slot::Live(message) => Some(message.clone()),
            _ => None,
        });
        let latest = live.next();
        let previous = live.next();
        (latest, previous)
    }

    /// Highest serial allocated so far, or 0 if none.
    pub fn last_serial(&self) -> u64 {
        self.serials.last()
    }

    /// Number of live messages.
    pub fn live_count(&self) -> usize {
        self.slots
            .iter()
            .filter(|slot| matches!(slot, Slot::Live(_)))
            .count()
    }
}

/// Position of `serial` in the slot array, if the platform can address it.
fn slot_index(serial: u64) -> Option<usize> {
    usize::try_from(serial).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_append_assigns_increasing_serials() {
        let mut log = MessageLog::new("alice");
        let first = log.append("one", 100);
        let second = log.append("two", 101);

        assert_eq!(first.serial, 1);
        assert_eq!(second.serial, 2);
        assert_eq!(second.owner, "alice");
        assert_eq!(log.last_serial(), 2);
        assert_eq!(log.get(1), Some(&first));
    }

    #[test]
    fn test_remove_tombstones() {
        let mut log = MessageLog::new("alice");
        log.append("one", 100);
        log.append("two", 101);

        let removed = log.remove(1).unwrap();
        assert_eq!(removed.text, "one");
        assert!(log.get(1).is_none());
        assert_eq!(log.live_count(), 1);

        assert!(matches!(log.remove(1), Err(Error::NotFound(_))));
        // The sentinel and unallocated serials are not messages.
        assert!(matches!(log.remove(0), Err(Error::NotFound(_))));
        assert!(matches!(log.remove(42), Err(Error::NotFound(_))));
        assert!(matches!(log.remove(u64::MAX), Err(Error::NotFound(_))));
        assert!(log.get(u64::MAX).is_none());
        assert_eq!(log.live_count(), 1);

        // Serials keep climbing past tombstones.
        assert_eq!(log.append("three", 102).serial, 3);
    }

    #[test]
    fn test_recent_two() {
        let mut log = MessageLog::new("bob");
        assert_eq!(log.recent_two(), (None, None));

        let one = log.append("one", 1);
        assert_eq!(log.recent_two(), (Some(one.clone()), None));

        let two = log.append("two", 2);
        let three = log.append("three", 3);
        assert_eq!(log.recent_two(), (Some(three.clone()), Some(two.clone())));

        log.remove(2).unwrap();
        assert_eq!(log.recent_two(), (Some(three.clone()), Some(one.clone())));

        log.remove(3).unwrap();
        log.remove(1).unwrap();
        assert_eq!(log.recent_two(), (None, None));
    }

    #[test]
    fn test_slot_index_is_checked() {
        assert_eq!(slot_index(7), Some(7));
        if usize::BITS < u64::BITS {
            assert_eq!(slot_index(u64::MAX), None);
        } else {
            assert_eq!(slot_index(u64::MAX), Some(usize::MAX));
        }
    }
}
