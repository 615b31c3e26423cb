//! Leases and lease identifiers.
//!
//! Expiry is measured with [`tokio::time::Instant`] so paused-clock tests can
//! advance past it deterministically.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use p2patter_proto::LeaseGrant;
use tokio::time::Instant;

/// Source of lease identifiers.
///
/// A registry shares one source between its bindings and its change
/// listeners so a lease id names exactly one grant.
#[derive(Debug)]
pub struct LeaseIds {
    next: AtomicU64,
}

impl LeaseIds {
    /// Create a source whose first identifier is 1.
    pub fn new() -> Self {
        Self {
            next: AtomicU64::new(1),
        }
    }

    /// Allocate the next identifier.
    pub fn next_id(&self) -> u64 {
        self.next.fetch_add(1, Ordering::SeqCst)
    }
}

impl Default for LeaseIds {
    fn default() -> Self {
        Self::new()
    }
}

/// A time-bounded grant that must be renewed before it expires.
#[derive(Debug, Clone)]
pub struct Lease {
    id: u64,
    interval: Duration,
    expires_at: Instant,
}

impl Lease {
    /// Grant a lease starting now.
    pub fn new(id: u64, interval: Duration) -> Self {
        Self {
            id,
            interval,
            expires_at: Instant::now() + interval,
        }
    }

    /// Lease identifier.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Renewal interval.
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Instant at which the lease lapses.
    pub fn expires_at(&self) -> Instant {
        self.expires_at
    }

    /// Check expiry against a given instant.
    pub fn is_expired_at(&self, now: Instant) -> bool {
        now >= self.expires_at
    }

    /// Check expiry against the current instant.
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Instant::now())
    }

    /// Push expiry one full interval past now.
    pub fn renew(&mut self) {
        self.expires_at = Instant::now() + self.interval;
    }

    /// The wire form of this lease.
    pub fn grant(&self) -> LeaseGrant {
        LeaseGrant {
            lease_id: self.id,
            interval_ms: self.interval.as_millis() as u64,
        }
    }
}
