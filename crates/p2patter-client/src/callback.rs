//! Callback endpoint for exported listeners.
//!
//! Remote services cannot call a follower's listener objects directly. The
//! follower exports each listener here, sends the resulting [`ListenerRef`]
//! along with its subscribe or watch request, and the service dials back with
//! `Notify` requests. Notifications are handled one at a time in arrival
//! order.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use nng::options::{Options, RecvTimeout};
use nng::{Protocol, Socket};
use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::sync::oneshot;

use p2patter_core::{ChangeListener, MessageListener};
use p2patter_proto::codec::{decode_request, encode_response};
use p2patter_proto::{error_codes, Event, ListenerRef, Operation, Request, Response};

use crate::error::Error;

/// How often the receive loop checks for shutdown.
const POLL_INTERVAL: Duration = Duration::from_millis(250);

#[derive(Clone)]
enum Exported {
    Messages(Arc<MessageListener>),
    Changes(Arc<ChangeListener>),
}

/// REP socket dispatching `Notify` requests to exported listeners.
pub struct CallbackEndpoint {
    address: String,
    listeners: Arc<DashMap<u64, Exported>>,
    next_id: AtomicU64,
    shutdown: Mutex<Option<oneshot::Sender<()>>>,
}

impl CallbackEndpoint {
    /// Listen on `address` and start the receive loop.
    ///
    /// Must be called within a tokio runtime; listeners run on it.
    pub fn bind(address: impl Into<String>) -> Result<Arc<Self>, Error> {
        let address = address.into();
        let socket = Socket::new(Protocol::Rep0)
            .map_err(|e| Error::Connection(format!("failed to create socket: {}", e)))?;
        socket
            .set_opt::<RecvTimeout>(Some(POLL_INTERVAL))
            .map_err(|e| Error::Connection(format!("failed to set recv timeout: {}", e)))?;
        socket
            .listen(&address)
            .map_err(|e| Error::Connection(format!("failed to listen on {}: {}", address, e)))?;

        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let endpoint = Arc::new(Self {
            address: address.clone(),
            listeners: Arc::new(DashMap::new()),
            next_id: AtomicU64::new(1),
            shutdown: Mutex::new(Some(shutdown_tx)),
        });

        let listeners = Arc::clone(&endpoint.listeners);
        let handle = Handle::current();
        tokio::task::spawn_blocking(move || run_sync(socket, listeners, handle, shutdown_rx));

        tracing::info!(address = %address, "callback endpoint listening");
        Ok(endpoint)
    }

    /// Address services dial back to.
    pub fn address(&self) -> &str {
        &self.address
    }

    /// Export a message listener.
    pub fn export_messages(&self, listener: Arc<MessageListener>) -> ListenerRef {
        self.export(Exported::Messages(listener))
    }

    /// Export a registry change listener.
    pub fn export_changes(&self, listener: Arc<ChangeListener>) -> ListenerRef {
        self.export(Exported::Changes(listener))
    }

    fn export(&self, exported: Exported) -> ListenerRef {
        let listener_id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.listeners.insert(listener_id, exported);
        ListenerRef {
            endpoint: self.address.clone(),
            listener_id,
        }
    }

    /// Withdraw an exported listener. Later notifications for it are
    /// answered with `NOT_FOUND`, which ends the sender's subscription.
    pub fn unexport(&self, listener_id: u64) -> bool {
        self.listeners.remove(&listener_id).is_some()
    }

    /// Number of exported listeners.
    pub fn exported_count(&self) -> usize {
        self.listeners.len()
    }

    /// Stop the receive loop.
    pub fn shutdown(&self) {
        if let Some(tx) = self.shutdown.lock().take() {
            let _ = tx.send(());
        }
    }
}

impl Drop for CallbackEndpoint {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn run_sync(
    socket: Socket,
    listeners: Arc<DashMap<u64, Exported>>,
    handle: Handle,
    mut shutdown_rx: oneshot::Receiver<()>,
) {
    loop {
        match shutdown_rx.try_recv() {
            Ok(_) | Err(oneshot::error::TryRecvError::Closed) => {
                tracing::debug!("callback endpoint shutting down");
                return;
            }
            Err(oneshot::error::TryRecvError::Empty) => {}
        }

        let message = match socket.recv() {
            Ok(message) => message,
            Err(nng::Error::TimedOut) => continue,
            Err(nng::Error::Closed) => return,
            Err(e) => {
                tracing::error!(error = %e, "callback receive error");
                continue;
            }
        };

        let response = match decode_request(message.as_slice()) {
            Ok(request) => handle.block_on(dispatch(&listeners, request)),
            Err(e) => {
                tracing::warn!(error = %e, "malformed callback request");
                Response::error(0, error_codes::INVALID_REQUEST, e.to_string())
            }
        };

        let bytes = match encode_response(&response) {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::error!(error = %e, "failed to encode callback response");
                continue;
            }
        };
        if let Err((_, e)) = socket.send(nng::Message::from(bytes.as_slice())) {
            tracing::warn!(error = %e, "failed to send callback response");
        }
    }
}

async fn dispatch(listeners: &DashMap<u64, Exported>, request: Request) -> Response {
    let id = request.id;
    let (listener_id, seq, event) = match request.operation {
        Operation::Ping => return Response::pong(id),
        Operation::Notify {
            listener_id,
            seq,
            event,
        } => (listener_id, seq, event),
        other => {
            return Response::error(id, error_codes::UNSUPPORTED, other.name());
        }
    };

    // Clone out of the map so no shard lock is held while the listener runs.
    let Some(exported) = listeners.get(&listener_id).map(|entry| entry.value().clone()) else {
        return Response::error(
            id,
            error_codes::NOT_FOUND,
            format!("listener {} not exported", listener_id),
        );
    };

    let result = match (exported, event) {
        (Exported::Messages(listener), Event::Microblog(event)) => {
            listener.report(seq, &event).await
        }
        (Exported::Changes(listener), Event::Registry(event)) => {
            listener.report(seq, &event).await
        }
        _ => {
            return Response::error(
                id,
                error_codes::INVALID_REQUEST,
                format!("event kind does not match listener {}", listener_id),
            );
        }
    };

    match result {
        Ok(()) => Response::acknowledged(id),
        Err(e) => Response::error(id, e.code(), e.detail()),
    }
}
