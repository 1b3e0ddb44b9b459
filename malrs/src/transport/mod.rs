//! Transport seam between the interaction layer and the wire.
//!
//! A [`Transport`] owns the I/O resources, frames messages on the way out
//! and unframes them on the way in. Inbound messages are surfaced through a
//! channel obtained once with [`Transport::take_receiver`]; the routing
//! context drains it and dispatches to endpoints.
//!
//! Two implementations ship with the crate: [`TcpTransport`] for real
//! networking and [`LoopbackTransport`] for single-process composition and
//! tests. Both are driven through the same interface, so the interaction
//! layer never knows which one it runs on.

mod loopback;
mod tcp;

pub use loopback::LoopbackTransport;
pub use tcp::{TcpConfig, TcpTransport};

use malrs_core::{Message, Uri};
use tokio::sync::mpsc;

/// Errors surfaced synchronously by a transport.
///
/// Socket-level failures are asynchronous and local to the transport's
/// background tasks: they are logged, the affected message is dropped, and
/// the connection is evicted so the next send redials.
#[derive(Debug, Clone, thiserror::Error)]
pub enum TransportError {
    /// The transport has been closed; no further messages are accepted.
    #[error("transport closed")]
    Closed,

    /// An I/O operation failed while setting the transport up.
    #[error("I/O error: {0}")]
    Io(String),
}

impl From<std::io::Error> for TransportError {
    fn from(error: std::io::Error) -> Self {
        TransportError::Io(error.to_string())
    }
}

/// A message transport: asynchronous transmit plus an inbound channel.
pub trait Transport: Send + Sync + 'static {
    /// The advertised base URI of this transport
    /// (e.g. `maltcp://127.0.0.1:4500`). Endpoint URIs are rooted here.
    fn local_uri(&self) -> Uri;

    /// Enqueue a message for delivery and return immediately. The actual
    /// send is asynchronous; connection failures are not reported here.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Closed`] after `close`.
    fn transmit(&self, msg: Message) -> Result<(), TransportError>;

    /// Enqueue several messages. Atomic per message only: an error leaves
    /// the already-enqueued prefix in flight.
    ///
    /// # Errors
    ///
    /// Returns the first enqueue failure.
    fn transmit_multiple(&self, msgs: Vec<Message>) -> Result<(), TransportError> {
        for msg in msgs {
            self.transmit(msg)?;
        }
        Ok(())
    }

    /// Take ownership of the inbound message channel. Yields `Some` exactly
    /// once; the caller becomes the single consumer of inbound messages.
    fn take_receiver(&self) -> Option<mpsc::UnboundedReceiver<Message>>;

    /// Shut the transport down: stop accepting, close open connections and
    /// the transmit channel. Idempotent.
    fn close(&self);
}
