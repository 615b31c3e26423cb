//! Service configuration.

use std::time::Duration;

/// Default subscription lease interval.
pub const DEFAULT_LEASE_INTERVAL: Duration = Duration::from_secs(5);

/// Default registry binding lease interval.
pub const DEFAULT_BINDING_LEASE_INTERVAL: Duration = Duration::from_secs(5);

/// Default number of undelivered events buffered per listener.
pub const DEFAULT_QUEUE_CAPACITY: usize = 1024;

/// Configuration shared by microblog services and the registry.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// Lease interval granted to subscriptions and change listeners.
    pub lease_interval: Duration,

    /// Lease interval a service requests when binding its name.
    pub binding_lease_interval: Duration,

    /// Per-listener delivery queue capacity. A listener whose queue fills up
    /// is dropped.
    pub queue_capacity: usize,
}

impl ServiceConfig {
    /// Create a configuration with default values.
    pub fn new() -> Self {
        Self {
            lease_interval: DEFAULT_LEASE_INTERVAL,
            binding_lease_interval: DEFAULT_BINDING_LEASE_INTERVAL,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
        }
    }

    /// Set the subscription lease interval.
    pub fn with_lease_interval(mut self, interval: Duration) -> Self {
        self.lease_interval = interval;
        self
    }

    /// Set the binding lease interval.
    pub fn with_binding_lease_interval(mut self, interval: Duration) -> Self {
        self.binding_lease_interval = interval;
        self
    }

    /// Set the per-listener queue capacity.
    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity.max(1);
        self
    }
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self::new()
    }
}
