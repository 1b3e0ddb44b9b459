//! The routing context: owns the transport and multiplexes endpoints.
//!
//! A [`Context`] registers [`Listener`]s by URI. Outbound messages pass
//! through unchanged to the transport; inbound messages are routed to the
//! listener registered under their destination URI. Unroutable messages
//! are logged and dropped, never fatal.
//!
//! Listeners are dispatched synchronously on the delivery task and must
//! not block beyond enqueueing to their own internal queues.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use malrs_core::{Message, Uri};

use crate::error::{MalError, MalResult};
use crate::transport::Transport;

/// An addressable endpoint owned by a [`Context`].
///
/// Implemented by the initiator-side operation context and the
/// responder-side handler context.
pub trait Listener: Send + Sync {
    /// Handle one inbound message. Called synchronously on the delivery
    /// task; implementations enqueue and return.
    fn on_message(&self, msg: Message);

    /// The endpoint is being unregistered; release owned operations or
    /// handlers so any pending waits complete.
    fn on_close(&self);
}

/// Router owning a transport and the URI → listener endpoint map.
pub struct Context {
    transport: Box<dyn Transport>,
    endpoints: RwLock<HashMap<Uri, Arc<dyn Listener>>>,
}

impl Context {
    /// Wrap a transport and start draining its inbound channel. Must be
    /// called within a tokio runtime: delivery runs on a spawned task.
    pub fn new(transport: impl Transport) -> Arc<Self> {
        let receiver = transport.take_receiver();
        let ctx = Arc::new(Self {
            transport: Box::new(transport),
            endpoints: RwLock::new(HashMap::new()),
        });

        if let Some(mut receiver) = receiver {
            let weak = Arc::downgrade(&ctx);
            tokio::spawn(async move {
                while let Some(msg) = receiver.recv().await {
                    let Some(ctx) = weak.upgrade() else { break };
                    ctx.deliver(msg);
                }
                tracing::debug!("delivery task exited");
            });
        }
        ctx
    }

    /// The transport's advertised base URI.
    pub fn uri(&self) -> Uri {
        self.transport.local_uri()
    }

    /// Synthesise an endpoint URI rooted at the transport base.
    pub fn new_uri(&self, service_path: &str) -> Uri {
        Uri::new(format!(
            "{}/{}",
            self.transport.local_uri(),
            service_path.trim_start_matches('/')
        ))
    }

    /// Register a listener under a URI.
    ///
    /// # Errors
    ///
    /// Returns [`MalError::DuplicateEndpoint`] if the URI is taken; the
    /// existing registration is untouched.
    pub fn register_endpoint(&self, uri: Uri, listener: Arc<dyn Listener>) -> MalResult<()> {
        let mut endpoints = self
            .endpoints
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        if endpoints.contains_key(&uri) {
            tracing::warn!(%uri, "endpoint already registered");
            return Err(MalError::DuplicateEndpoint { uri });
        }
        tracing::debug!(%uri, "endpoint registered");
        endpoints.insert(uri, listener);
        Ok(())
    }

    /// Unregister a listener and invoke its `on_close`.
    ///
    /// # Errors
    ///
    /// Returns [`MalError::UnknownEndpoint`] if nothing is registered
    /// under the URI.
    pub fn unregister_endpoint(&self, uri: &Uri) -> MalResult<()> {
        let removed = self
            .endpoints
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(uri);
        match removed {
            Some(listener) => {
                tracing::info!(%uri, "endpoint unregistered");
                listener.on_close();
                Ok(())
            }
            None => Err(MalError::UnknownEndpoint { uri: uri.clone() }),
        }
    }

    /// Hand a fully addressed message to the transport. Nothing is filled
    /// in on the caller's behalf.
    ///
    /// # Errors
    ///
    /// Propagates the transport's synchronous outcome.
    pub fn send(&self, msg: Message) -> MalResult<()> {
        self.transport.transmit(msg).map_err(MalError::from)
    }

    /// Route one inbound message to the endpoint named by its destination
    /// URI. Called by the transport delivery task; a message for an
    /// unregistered URI is logged and dropped.
    pub fn deliver(&self, msg: Message) {
        let listener = self
            .endpoints
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&msg.uri_to)
            .cloned();
        match listener {
            Some(listener) => listener.on_message(msg),
            None => {
                tracing::warn!(uri_to = %msg.uri_to, tid = msg.transaction_id, "no endpoint for message, dropping");
            }
        }
    }

    /// Shut down: close every endpoint, then the transport.
    pub fn close(&self) {
        let endpoints: Vec<(Uri, Arc<dyn Listener>)> = self
            .endpoints
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .drain()
            .collect();
        for (uri, listener) in endpoints {
            tracing::debug!(%uri, "closing endpoint");
            listener.on_close();
        }
        self.transport.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::LoopbackTransport;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    struct RecordingListener {
        received: Mutex<Vec<Message>>,
        closed: AtomicUsize,
    }

    impl RecordingListener {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                received: Mutex::new(Vec::new()),
                closed: AtomicUsize::new(0),
            })
        }

        fn received_count(&self) -> usize {
            self.received.lock().expect("lock").len()
        }
    }

    impl Listener for RecordingListener {
        fn on_message(&self, msg: Message) {
            self.received.lock().expect("lock").push(msg);
        }

        fn on_close(&self) {
            self.closed.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn test_new_uri_is_rooted_at_transport_base() {
        let ctx = Context::new(LoopbackTransport::new("node-a"));
        assert_eq!(
            ctx.new_uri("provider").as_str(),
            "malloop://node-a/provider"
        );
        assert_eq!(
            ctx.new_uri("/provider").as_str(),
            "malloop://node-a/provider"
        );
    }

    #[tokio::test]
    async fn test_duplicate_endpoint_rejected_first_stays() {
        let ctx = Context::new(LoopbackTransport::new("node-a"));
        let uri = ctx.new_uri("foo");
        let first = RecordingListener::new();
        let second = RecordingListener::new();

        ctx.register_endpoint(uri.clone(), first.clone())
            .expect("first registration");
        assert!(matches!(
            ctx.register_endpoint(uri.clone(), second),
            Err(MalError::DuplicateEndpoint { .. })
        ));

        // The first listener still receives traffic.
        let msg = Message {
            uri_to: uri,
            ..Message::default()
        };
        ctx.deliver(msg);
        assert_eq!(first.received_count(), 1);
    }

    #[tokio::test]
    async fn test_deliver_unknown_uri_is_dropped() {
        let ctx = Context::new(LoopbackTransport::new("node-a"));
        let msg = Message {
            uri_to: Uri::new("malloop://node-a/ghost"),
            ..Message::default()
        };
        // Must not panic or error.
        ctx.deliver(msg);
    }

    #[tokio::test]
    async fn test_unregister_invokes_on_close() {
        let ctx = Context::new(LoopbackTransport::new("node-a"));
        let uri = ctx.new_uri("foo");
        let listener = RecordingListener::new();

        ctx.register_endpoint(uri.clone(), listener.clone())
            .expect("register");
        ctx.unregister_endpoint(&uri).expect("unregister");
        assert_eq!(listener.closed.load(Ordering::SeqCst), 1);

        assert!(matches!(
            ctx.unregister_endpoint(&uri),
            Err(MalError::UnknownEndpoint { .. })
        ));
    }

    #[tokio::test]
    async fn test_send_loops_back_to_registered_endpoint() {
        let ctx = Context::new(LoopbackTransport::new("node-a"));
        let uri = ctx.new_uri("echo");
        let listener = RecordingListener::new();
        ctx.register_endpoint(uri.clone(), listener.clone())
            .expect("register");

        ctx.send(Message {
            uri_to: uri,
            body: vec![0xAA],
            ..Message::default()
        })
        .expect("send");

        // Delivery runs on a background task.
        for _ in 0..50 {
            if listener.received_count() == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(listener.received_count(), 1);
    }

    #[tokio::test]
    async fn test_close_closes_endpoints_and_transport() {
        let ctx = Context::new(LoopbackTransport::new("node-a"));
        let listener = RecordingListener::new();
        ctx.register_endpoint(ctx.new_uri("foo"), listener.clone())
            .expect("register");

        ctx.close();
        assert_eq!(listener.closed.load(Ordering::SeqCst), 1);
        assert!(ctx.send(Message::default()).is_err());
    }
}
