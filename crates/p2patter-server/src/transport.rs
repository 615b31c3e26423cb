//! Server transport layer using async-nng.
//!
//! Listens on one nng REP socket. Worker threads each run an `AsyncContext`
//! receive loop; decoded requests are handled on the runtime that created
//! the transport, so listener tasks spawned by handlers outlive the worker.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use async_nng::AsyncContext;
use nng::options::Options;
use nng::{Message, Protocol, Socket};
use tokio::runtime::Handle;

use p2patter_proto::codec::{decode_request, encode_response};
use p2patter_proto::{error_codes, Response};

use crate::config::ServerConfig;
use crate::error::Error;
use crate::handler::RequestHandler;

/// How often idle workers check the stop flag.
const RECEIVE_POLL: Duration = Duration::from_secs(1);

/// Request counters for the shutdown summary.
#[derive(Debug)]
pub struct TransportMetrics {
    requests_total: AtomicU64,
    requests_failed: AtomicU64,
    started_at: Instant,
}

impl TransportMetrics {
    fn new() -> Self {
        Self {
            requests_total: AtomicU64::new(0),
            requests_failed: AtomicU64::new(0),
            started_at: Instant::now(),
        }
    }

    fn record(&self, success: bool) {
        self.requests_total.fetch_add(1, Ordering::Relaxed);
        if !success {
            self.requests_failed.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Get the uptime duration.
    pub fn uptime(&self) -> Duration {
        self.started_at.elapsed()
    }

    /// Get total requests count.
    pub fn total_requests(&self) -> u64 {
        self.requests_total.load(Ordering::Relaxed)
    }

    /// Get failed requests count.
    pub fn failed_requests(&self) -> u64 {
        self.requests_failed.load(Ordering::Relaxed)
    }
}

/// Server transport that handles incoming requests.
pub struct Transport {
    socket: Socket,
    address: String,
    handler: Arc<dyn RequestHandler>,
    runtime: Handle,
    max_message_size: usize,
    metrics: Arc<TransportMetrics>,
    request_timeout: Duration,
    worker_count: usize,
}

/// Worker threads of a started transport.
pub struct RunningTransport {
    stop_flag: Arc<AtomicBool>,
    handles: Vec<thread::JoinHandle<()>>,
}

impl RunningTransport {
    /// Stop the workers and wait for them to exit.
    pub async fn stop(self) {
        self.stop_flag.store(true, Ordering::SeqCst);
        let handles = self.handles;
        let _ = tokio::task::spawn_blocking(move || {
            for handle in handles {
                let _ = handle.join();
            }
        })
        .await;
    }
}

impl Transport {
    /// Listen on `config.listen_address`.
    ///
    /// Must be called within a tokio runtime; requests are handled on it.
    pub fn new(config: &ServerConfig, handler: Arc<dyn RequestHandler>) -> Result<Self, Error> {
        let socket = Socket::new(Protocol::Rep0)
            .map_err(|e| Error::Transport(format!("failed to create socket: {}", e)))?;

        socket
            .set_opt::<nng::options::RecvMaxSize>(config.max_message_size)
            .map_err(|e| Error::Transport(format!("failed to set max message size: {}", e)))?;

        socket.listen(&config.listen_address).map_err(|e| {
            Error::Transport(format!(
                "failed to listen on {}: {}",
                config.listen_address, e
            ))
        })?;
        tracing::info!(address = %config.listen_address, "listening");

        let runtime = Handle::try_current()
            .map_err(|e| Error::Config(format!("transport needs a tokio runtime: {}", e)))?;

        Ok(Self {
            socket,
            address: config.listen_address.clone(),
            handler,
            runtime,
            max_message_size: config.max_message_size,
            metrics: Arc::new(TransportMetrics::new()),
            request_timeout: config.request_timeout,
            worker_count: config.transport_workers.max(1),
        })
    }

    /// Address the transport listens on.
    pub fn address(&self) -> &str {
        &self.address
    }

    /// Get a reference to the transport metrics.
    pub fn metrics(&self) -> &TransportMetrics {
        &self.metrics
    }

    /// Start the worker threads.
    pub fn start(&self) -> Result<RunningTransport, Error> {
        let stop_flag = Arc::new(AtomicBool::new(false));
        let handles = self.spawn_worker_threads(Arc::clone(&stop_flag))?;
        tracing::info!(workers = handles.len(), "transport ready, accepting requests");
        Ok(RunningTransport { stop_flag, handles })
    }

    /// Run the transport until a shutdown signal arrives.
    pub async fn run_until_shutdown(
        &self,
        mut shutdown: tokio::sync::broadcast::Receiver<()>,
    ) -> Result<(), Error> {
        let running = self.start()?;
        let _ = shutdown.recv().await;
        self.log_summary();
        running.stop().await;
        Ok(())
    }

    /// Log request counters.
    pub fn log_summary(&self) {
        tracing::info!(
            total_requests = self.metrics.total_requests(),
            failed = self.metrics.failed_requests(),
            uptime_secs = self.metrics.uptime().as_secs(),
            "stopping transport"
        );
    }

    fn worker(&self) -> TransportWorker {
        TransportWorker {
            handler: Arc::clone(&self.handler),
            runtime: self.runtime.clone(),
            max_message_size: self.max_message_size,
        }
    }

    fn spawn_worker_threads(
        &self,
        stop_flag: Arc<AtomicBool>,
    ) -> Result<Vec<thread::JoinHandle<()>>, Error> {
        let mut handles = Vec::with_capacity(self.worker_count);
        for worker_id in 0..self.worker_count {
            let socket = self.socket.clone();
            let worker = self.worker();
            let metrics = Arc::clone(&self.metrics);
            let request_timeout = self.request_timeout;
            let stop_flag = Arc::clone(&stop_flag);

            let handle = thread::Builder::new()
                .name(format!("p2patter-transport-{}", worker_id))
                .spawn(move || {
                    let runtime = match tokio::runtime::Builder::new_current_thread()
                        .enable_all()
                        .build()
                    {
                        Ok(runtime) => runtime,
                        Err(e) => {
                            tracing::error!(error = %e, worker_id, "failed to build worker runtime");
                            return;
                        }
                    };

                    runtime.block_on(async move {
                        let mut ctx = match AsyncContext::try_from(&socket) {
                            Ok(ctx) => ctx,
                            Err(e) => {
                                tracing::error!(error = %e, worker_id, "failed to create async context");
                                return;
                            }
                        };

                        loop {
                            if stop_flag.load(Ordering::SeqCst) {
                                tracing::debug!(worker_id, "transport worker stopping");
                                return;
                            }

                            match ctx.receive(Some(RECEIVE_POLL)).await {
                                Ok(msg) => {
                                    let start = Instant::now();
                                    let (response_bytes, is_success) =
                                        worker.process(msg.as_slice()).await;
                                    let elapsed = start.elapsed();

                                    let response_msg = Message::from(response_bytes.as_slice());
                                    if let Err((_, e)) = ctx.send(response_msg, None).await {
                                        tracing::error!(error = %e, worker_id, "failed to send response");
                                        metrics.record(false);
                                    } else {
                                        metrics.record(is_success);
                                    }

                                    if elapsed > request_timeout {
                                        tracing::warn!(
                                            worker_id,
                                            duration_ms = elapsed.as_millis() as u64,
                                            timeout_ms = request_timeout.as_millis() as u64,
                                            "request exceeded timeout"
                                        );
                                    }
                                }
                                Err(nng::Error::TimedOut) => continue,
                                Err(nng::Error::Closed) => return,
                                Err(e) => {
                                    tracing::error!(error = %e, worker_id, "receive error");
                                }
                            }
                        }
                    });
                })
                .map_err(|e| Error::Transport(format!("failed to spawn transport worker: {}", e)))?;

            handles.push(handle);
        }

        Ok(handles)
    }
}

impl Drop for Transport {
    fn drop(&mut self) {
        self.socket.close();
    }
}

struct TransportWorker {
    handler: Arc<dyn RequestHandler>,
    runtime: Handle,
    max_message_size: usize,
}

impl TransportWorker {
    /// Process a raw message and return (response bytes, is_success).
    async fn process(&self, data: &[u8]) -> (Vec<u8>, bool) {
        let response = match self.decode(data) {
            Ok(request) => {
                let handler = Arc::clone(&self.handler);
                let id = request.id;
                match self
                    .runtime
                    .spawn(async move { handler.handle(request).await })
                    .await
                {
                    Ok(response) => response,
                    Err(e) => {
                        tracing::error!(error = %e, "request handler failed");
                        Response::error(id, error_codes::INTERNAL, "request handler failed")
                    }
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "rejecting malformed request");
                // The request ID is unknown.
                Response::error(0, error_codes::INVALID_REQUEST, e.to_string())
            }
        };
        let is_success = response.status.is_ok();

        match encode_response(&response) {
            Ok(bytes) => (bytes, is_success),
            Err(e) => {
                tracing::error!(error = %e, "failed to encode response");
                let fallback = Response::error(response.id, error_codes::INTERNAL, e.to_string());
                (encode_response(&fallback).unwrap_or_default(), false)
            }
        }
    }

    fn decode(&self, data: &[u8]) -> Result<p2patter_proto::Request, Error> {
        if data.len() > self.max_message_size {
            return Err(Error::Protocol(p2patter_proto::Error::InvalidMessage(format!(
                "message too large: {} bytes (max: {})",
                data.len(),
                self.max_message_size
            ))));
        }
        Ok(decode_request(data)?)
    }
}
