//! Server configuration.

use std::time::Duration;

use clap::{Parser, Subcommand};
use p2patter_client::config::DEFAULT_MAX_MESSAGE_SIZE;
use p2patter_client::tcp_url;
use p2patter_core::ServiceConfig;

/// Default request timeout in seconds.
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

/// Default timeout for a notification sent to a listener, in milliseconds.
pub const DEFAULT_NOTIFY_TIMEOUT_MS: u64 = 5000;

/// Default interval between expiry sweeps, in milliseconds.
pub const DEFAULT_SWEEP_INTERVAL_MS: u64 = 1000;

fn default_transport_workers() -> usize {
    std::thread::available_parallelism()
        .map(|count| count.get())
        .unwrap_or(4)
        .max(1)
}

/// Listen address a microblog uses when none is given. Reachable from this
/// host only.
pub fn default_microblog_address(name: &str) -> String {
    format!("ipc:///tmp/p2patter-microblog-{}.sock", name)
}

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address the REP socket listens on (e.g., "tcp://0.0.0.0:4160").
    pub listen_address: String,

    /// Requests slower than this are logged.
    pub request_timeout: Duration,

    /// Maximum message size in bytes.
    pub max_message_size: usize,

    /// Number of transport worker loops (AsyncContext instances).
    pub transport_workers: usize,

    /// Interval between sweeps of expired leases.
    pub sweep_interval: Duration,

    /// Timeout for delivering one notification to a remote listener.
    pub notify_timeout: Duration,

    /// Lease intervals and queue sizes of the hosted service.
    pub service: ServiceConfig,
}

impl ServerConfig {
    /// Create a configuration listening on `listen_address`.
    pub fn new(listen_address: impl Into<String>) -> Self {
        Self {
            listen_address: listen_address.into(),
            request_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
            transport_workers: default_transport_workers(),
            sweep_interval: Duration::from_millis(DEFAULT_SWEEP_INTERVAL_MS),
            notify_timeout: Duration::from_millis(DEFAULT_NOTIFY_TIMEOUT_MS),
            service: ServiceConfig::default(),
        }
    }

    /// Set the request timeout.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Set the maximum message size.
    pub fn with_max_message_size(mut self, size: usize) -> Self {
        self.max_message_size = size;
        self
    }

    /// Set the number of transport worker loops.
    pub fn with_transport_workers(mut self, workers: usize) -> Self {
        self.transport_workers = workers.max(1);
        self
    }

    /// Set the sweep interval.
    pub fn with_sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = interval;
        self
    }

    /// Set the notification timeout.
    pub fn with_notify_timeout(mut self, timeout: Duration) -> Self {
        self.notify_timeout = timeout;
        self
    }

    /// Set the service configuration.
    pub fn with_service(mut self, service: ServiceConfig) -> Self {
        self.service = service;
        self
    }
}

/// What a server process hosts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Role {
    /// The name registry.
    Registry,
    /// One owner's microblog, bound in the registry at `registry`.
    Microblog {
        /// Registry address.
        registry: String,
        /// Owner name to bind.
        name: String,
    },
}

/// Command-line arguments for the server.
#[derive(Parser, Debug)]
#[command(name = "p2patter-server")]
#[command(version, about = "P2Patter microblog and registry server", long_about = None)]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,

    /// Request timeout in seconds.
    #[arg(long, global = true, default_value_t = DEFAULT_REQUEST_TIMEOUT_SECS)]
    pub timeout: u64,

    /// Transport worker loops (0 = auto).
    #[arg(long, global = true, default_value_t = 0)]
    pub workers: usize,

    /// Interval between expiry sweeps in milliseconds.
    #[arg(long, global = true, default_value_t = DEFAULT_SWEEP_INTERVAL_MS)]
    pub sweep_interval_ms: u64,

    /// Lease interval granted to subscribers and watchers, in milliseconds.
    #[arg(long, global = true, default_value_t = 5000)]
    pub lease_ms: u64,
}

/// Server subcommands.
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the name registry on host:port.
    Registry {
        /// Host to listen on.
        host: String,
        /// Port to listen on.
        port: u16,
    },
    /// Run the microblog of one owner, bound in the registry at host:port.
    #[command(after_help = "The microblog is registered under the --listen address. \
        The default is an ipc socket in /tmp, reachable from this host only; \
        give a tcp:// address to serve publishers and followers elsewhere.")]
    Microblog {
        /// Registry host.
        host: String,
        /// Registry port.
        port: u16,
        /// Owner name.
        name: String,
        /// Address to serve the microblog on.
        ///
        /// Defaults to a local ipc socket, which only publishers and
        /// followers on this host can reach. Give a tcp address, e.g.
        /// `--listen tcp://0.0.0.0:7401`, to serve other hosts.
        #[arg(long, value_name = "URL")]
        listen: Option<String>,
    },
}

impl Args {
    /// Convert command-line arguments to a role and server configuration.
    pub fn into_config(self) -> (Role, ServerConfig) {
        let (role, listen_address) = match self.command {
            Command::Registry { host, port } => (Role::Registry, tcp_url(&host, port)),
            Command::Microblog {
                host,
                port,
                name,
                listen,
            } => {
                let listen = listen.unwrap_or_else(|| default_microblog_address(&name));
                (
                    Role::Microblog {
                        registry: tcp_url(&host, port),
                        name,
                    },
                    listen,
                )
            }
        };

        let transport_workers = if self.workers == 0 {
            default_transport_workers()
        } else {
            self.workers.max(1)
        };

        let config = ServerConfig::new(listen_address)
            .with_request_timeout(Duration::from_secs(self.timeout))
            .with_transport_workers(transport_workers)
            .with_sweep_interval(Duration::from_millis(self.sweep_interval_ms.max(1)))
            .with_service(
                ServiceConfig::default().with_lease_interval(Duration::from_millis(self.lease_ms)),
            );
        (role, config)
    }
}
