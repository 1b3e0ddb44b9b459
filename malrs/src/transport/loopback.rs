//! In-process transport: transmit short-circuits into delivery.
//!
//! Useful for composing providers and consumers inside one process and for
//! exercising the interaction layer without sockets. Every transmitted
//! message is handed straight back to the owning context, which routes it
//! by destination URI exactly as it would route a frame off the wire.

use std::sync::{Mutex, PoisonError};

use malrs_core::{Message, Uri};
use tokio::sync::mpsc;

use super::{Transport, TransportError};

/// A transport that delivers every transmitted message back to its own
/// context.
pub struct LoopbackTransport {
    uri: Uri,
    sender: Mutex<Option<mpsc::UnboundedSender<Message>>>,
    receiver: Mutex<Option<mpsc::UnboundedReceiver<Message>>>,
}

impl LoopbackTransport {
    /// Create a loopback transport advertising `malloop://<name>`.
    pub fn new(name: &str) -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        Self {
            uri: Uri::new(format!("malloop://{name}")),
            sender: Mutex::new(Some(sender)),
            receiver: Mutex::new(Some(receiver)),
        }
    }
}

impl Transport for LoopbackTransport {
    fn local_uri(&self) -> Uri {
        self.uri.clone()
    }

    fn transmit(&self, msg: Message) -> Result<(), TransportError> {
        let guard = self.sender.lock().unwrap_or_else(PoisonError::into_inner);
        match guard.as_ref() {
            Some(sender) => sender.send(msg).map_err(|_| TransportError::Closed),
            None => Err(TransportError::Closed),
        }
    }

    fn take_receiver(&self) -> Option<mpsc::UnboundedReceiver<Message>> {
        self.receiver
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    fn close(&self) {
        // Dropping the sender ends the receiver's stream.
        self.sender
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_transmit_loops_back() {
        let transport = LoopbackTransport::new("node-a");
        let mut rx = transport.take_receiver().expect("receiver");

        let msg = Message {
            uri_to: Uri::new("malloop://node-a/provider"),
            body: vec![1, 2, 3],
            ..Message::default()
        };
        transport.transmit(msg.clone()).expect("transmit");

        let delivered = rx.recv().await.expect("delivered");
        assert_eq!(delivered, msg);
    }

    #[test]
    fn test_receiver_taken_once() {
        let transport = LoopbackTransport::new("node-a");
        assert!(transport.take_receiver().is_some());
        assert!(transport.take_receiver().is_none());
    }

    #[tokio::test]
    async fn test_close_rejects_transmit_and_ends_stream() {
        let transport = LoopbackTransport::new("node-a");
        let mut rx = transport.take_receiver().expect("receiver");

        transport.close();
        assert!(matches!(
            transport.transmit(Message::default()),
            Err(TransportError::Closed)
        ));
        assert!(rx.recv().await.is_none());

        // Idempotent.
        transport.close();
    }

    #[test]
    fn test_transmit_multiple_enqueues_in_order() {
        let transport = LoopbackTransport::new("node-a");
        let mut rx = transport.take_receiver().expect("receiver");

        let msgs: Vec<Message> = (0..3)
            .map(|n| Message {
                transaction_id: n,
                ..Message::default()
            })
            .collect();
        transport.transmit_multiple(msgs).expect("transmit");

        for expected in 0..3 {
            let msg = rx.try_recv().expect("queued");
            assert_eq!(msg.transaction_id, expected);
        }
    }
}
