//! Event listeners.

use async_trait::async_trait;
use p2patter_proto::{MicroblogEvent, RegistryEvent};
use tokio::sync::mpsc;

use crate::error::Error;

/// Receives events from an [`EventHub`](crate::EventHub).
///
/// `seq` is assigned by the event source and increases with every event it
/// raises. An `Err` return tells the hub the listener is gone; it receives
/// nothing further.
#[async_trait]
pub trait Listener<E: Send + Sync + 'static>: Send + Sync {
    /// Deliver one event.
    async fn report(&self, seq: u64, event: &E) -> Result<(), Error>;
}

/// Listener for message-added events of a microblog.
pub type MessageListener = dyn Listener<MicroblogEvent>;

/// Listener for registry bind/unbind events.
pub type ChangeListener = dyn Listener<RegistryEvent>;

/// Listener that forwards `(seq, event)` pairs into a channel.
///
/// Delivery fails once the receiving half is dropped.
pub struct ChannelListener<E> {
    tx: mpsc::UnboundedSender<(u64, E)>,
}

impl<E> ChannelListener<E> {
    /// Create a listener and the receiver its events arrive on.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<(u64, E)>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

#[async_trait]
impl<E: Clone + Send + Sync + 'static> Listener<E> for ChannelListener<E> {
    async fn report(&self, seq: u64, event: &E) -> Result<(), Error> {
        self.tx
            .send((seq, event.clone()))
            .map_err(|_| Error::ListenerDelivery("receiver dropped".to_string()))
    }
}
