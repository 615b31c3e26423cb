//! Request/reply connection to one endpoint.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use nng::options::{Options, RecvMaxSize, RecvTimeout, SendTimeout};
use nng::{Protocol, Socket};
use parking_lot::Mutex;

use p2patter_proto::codec::{decode_response, encode_request};
use p2patter_proto::{Operation, Request, Response, ResponsePayload, Status};

use crate::config::ClientConfig;
use crate::error::Error;

/// A REQ socket dialed to one endpoint.
///
/// Calls run the blocking socket on tokio's blocking pool. The socket is
/// shared behind a lock, so calls on one connection are serialized; open more
/// connections for parallelism.
pub struct Connection {
    socket: Arc<Mutex<Socket>>,
    config: ClientConfig,
    next_id: AtomicU64,
}

impl Connection {
    /// Dial an endpoint.
    pub async fn connect(config: ClientConfig) -> Result<Self, Error> {
        let dial_config = config.clone();
        let socket = tokio::task::spawn_blocking(move || open_socket(&dial_config))
            .await
            .map_err(|e| Error::Connection(format!("task join failed: {}", e)))??;

        tracing::debug!(address = %config.address, "connected");
        Ok(Self {
            socket: Arc::new(Mutex::new(socket)),
            config,
            next_id: AtomicU64::new(1),
        })
    }

    /// Endpoint address.
    pub fn address(&self) -> &str {
        &self.config.address
    }

    /// Configuration this connection was opened with.
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Send a request and wait for its response.
    pub async fn send_request(&self, request: Request) -> Result<Response, Error> {
        let framed = encode_request(&request)?;
        if framed.len() > self.config.max_message_size {
            return Err(Error::Protocol(p2patter_proto::Error::InvalidMessage(format!(
                "request too large: {} bytes (max: {})",
                framed.len(),
                self.config.max_message_size
            ))));
        }

        let socket = Arc::clone(&self.socket);
        let reply = tokio::task::spawn_blocking(move || {
            let socket = socket.lock();
            socket
                .send(nng::Message::from(framed.as_slice()))
                .map_err(|(_, e)| transport_error("send", e))?;
            socket.recv().map_err(|e| transport_error("receive", e))
        })
        .await
        .map_err(|e| Error::Connection(format!("task join failed: {}", e)))??;

        let response = decode_response(reply.as_slice())?;
        if response.id != request.id {
            return Err(Error::Protocol(p2patter_proto::Error::InvalidMessage(format!(
                "response ID mismatch: expected {}, got {}",
                request.id, response.id
            ))));
        }
        Ok(response)
    }

    /// Perform an operation and return its payload, turning an error status
    /// into [`Error::Server`].
    pub async fn call(&self, operation: Operation) -> Result<ResponsePayload, Error> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let name = operation.name();
        let response = self.send_request(Request::new(id, operation)).await?;

        match response.status {
            Status::Ok => Ok(response.payload),
            Status::Error { code, message } => {
                tracing::debug!(address = %self.config.address, op = name, code, %message, "call failed");
                Err(Error::Server { code, message })
            }
        }
    }

    /// Check that the endpoint answers.
    pub async fn ping(&self) -> Result<(), Error> {
        match self.call(Operation::Ping).await? {
            ResponsePayload::Pong => Ok(()),
            _ => Err(Error::Protocol(p2patter_proto::Error::UnexpectedResponse("pong"))),
        }
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("address", &self.config.address)
            .field("timeout", &self.config.timeout)
            .finish()
    }
}

fn open_socket(config: &ClientConfig) -> Result<Socket, Error> {
    let socket = Socket::new(Protocol::Req0)
        .map_err(|e| Error::Connection(format!("failed to create socket: {}", e)))?;

    socket
        .set_opt::<RecvMaxSize>(config.max_message_size)
        .map_err(|e| Error::Connection(format!("failed to set max message size: {}", e)))?;
    socket
        .set_opt::<SendTimeout>(Some(config.timeout))
        .map_err(|e| Error::Connection(format!("failed to set send timeout: {}", e)))?;
    socket
        .set_opt::<RecvTimeout>(Some(config.timeout))
        .map_err(|e| Error::Connection(format!("failed to set recv timeout: {}", e)))?;

    socket
        .dial(&config.address)
        .map_err(|e| Error::Connection(format!("failed to connect to {}: {}", config.address, e)))?;
    Ok(socket)
}

fn transport_error(stage: &str, e: nng::Error) -> Error {
    match e {
        nng::Error::TimedOut => Error::Timeout,
        _ => Error::Connection(format!("failed to {}: {}", stage, e)),
    }
}
