//! Responder-side dispatch: typed handlers keyed by service coordinates.
//!
//! A [`HandlerContext`] is the symmetric twin of the initiator endpoint:
//! it owns a map from (area, area version, service, operation) to a
//! registered handler and, for each inbound message, builds the matching
//! [`Transaction`] and invokes the handler with it.
//!
//! Handlers run synchronously on the delivery task and must either return
//! promptly or move their work onto their own task.

mod transaction;

pub use transaction::{
    InvokeTransaction, ProgressTransaction, PublisherTransaction, RequestTransaction,
    SendTransaction, SubmitTransaction, SubscriberTransaction, Transaction,
};

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use malrs_core::{InteractionType, Message, ServiceKey, Uri};

use crate::context::{Context, Listener};
use crate::error::{MalError, MalResult};

/// The interaction pattern a handler serves. One handler kind exists per
/// pattern, with a single broker kind covering both Pub/Sub halves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandlerKind {
    /// Serves Send interactions.
    Send,
    /// Serves Submit interactions.
    Submit,
    /// Serves Request interactions.
    Request,
    /// Serves Invoke interactions.
    Invoke,
    /// Serves Progress interactions.
    Progress,
    /// Serves both halves of Pub/Sub interactions.
    Broker,
}

impl HandlerKind {
    fn serves(self, interaction_type: InteractionType) -> bool {
        matches!(
            (self, interaction_type),
            (Self::Send, InteractionType::Send)
                | (Self::Submit, InteractionType::Submit)
                | (Self::Request, InteractionType::Request)
                | (Self::Invoke, InteractionType::Invoke)
                | (Self::Progress, InteractionType::Progress)
                | (Self::Broker, InteractionType::PubSub)
        )
    }
}

/// Handler callback: receives the inbound message and the transaction to
/// reply through.
pub type Handler = Arc<dyn Fn(Message, Transaction) -> MalResult<()> + Send + Sync>;

#[derive(Clone)]
struct HandlerDescriptor {
    kind: HandlerKind,
    handler: Handler,
}

/// Responder endpoint: dispatches inbound messages to handlers by service
/// coordinates.
pub struct HandlerContext {
    ctx: Arc<Context>,
    uri: Uri,
    handlers: RwLock<HashMap<ServiceKey, HandlerDescriptor>>,
}

impl HandlerContext {
    /// Create the endpoint and register it with the context under
    /// `service_path`.
    ///
    /// # Errors
    ///
    /// Returns [`MalError::DuplicateEndpoint`] if the URI is taken.
    pub fn new(ctx: &Arc<Context>, service_path: &str) -> MalResult<Arc<Self>> {
        let uri = ctx.new_uri(service_path);
        let hctx = Arc::new(Self {
            ctx: Arc::clone(ctx),
            uri: uri.clone(),
            handlers: RwLock::new(HashMap::new()),
        });
        ctx.register_endpoint(uri, Arc::clone(&hctx) as Arc<dyn Listener>)?;
        Ok(hctx)
    }

    /// This endpoint's URI.
    pub fn uri(&self) -> &Uri {
        &self.uri
    }

    /// Register a handler for Send interactions on `key`.
    ///
    /// # Errors
    ///
    /// Returns [`MalError::DuplicateHandler`] if the key is taken.
    pub fn register_send_handler<F>(&self, key: ServiceKey, handler: F) -> MalResult<()>
    where
        F: Fn(Message, Transaction) -> MalResult<()> + Send + Sync + 'static,
    {
        self.register(HandlerKind::Send, key, Arc::new(handler))
    }

    /// Register a handler for Submit interactions on `key`.
    ///
    /// # Errors
    ///
    /// Returns [`MalError::DuplicateHandler`] if the key is taken.
    pub fn register_submit_handler<F>(&self, key: ServiceKey, handler: F) -> MalResult<()>
    where
        F: Fn(Message, Transaction) -> MalResult<()> + Send + Sync + 'static,
    {
        self.register(HandlerKind::Submit, key, Arc::new(handler))
    }

    /// Register a handler for Request interactions on `key`.
    ///
    /// # Errors
    ///
    /// Returns [`MalError::DuplicateHandler`] if the key is taken.
    pub fn register_request_handler<F>(&self, key: ServiceKey, handler: F) -> MalResult<()>
    where
        F: Fn(Message, Transaction) -> MalResult<()> + Send + Sync + 'static,
    {
        self.register(HandlerKind::Request, key, Arc::new(handler))
    }

    /// Register a handler for Invoke interactions on `key`.
    ///
    /// # Errors
    ///
    /// Returns [`MalError::DuplicateHandler`] if the key is taken.
    pub fn register_invoke_handler<F>(&self, key: ServiceKey, handler: F) -> MalResult<()>
    where
        F: Fn(Message, Transaction) -> MalResult<()> + Send + Sync + 'static,
    {
        self.register(HandlerKind::Invoke, key, Arc::new(handler))
    }

    /// Register a handler for Progress interactions on `key`.
    ///
    /// # Errors
    ///
    /// Returns [`MalError::DuplicateHandler`] if the key is taken.
    pub fn register_progress_handler<F>(&self, key: ServiceKey, handler: F) -> MalResult<()>
    where
        F: Fn(Message, Transaction) -> MalResult<()> + Send + Sync + 'static,
    {
        self.register(HandlerKind::Progress, key, Arc::new(handler))
    }

    /// Register a broker handler serving both Pub/Sub halves on `key`.
    /// The handler receives a [`Transaction::Publisher`] or
    /// [`Transaction::Subscriber`] depending on the inbound stage.
    ///
    /// # Errors
    ///
    /// Returns [`MalError::DuplicateHandler`] if the key is taken.
    pub fn register_broker_handler<F>(&self, key: ServiceKey, handler: F) -> MalResult<()>
    where
        F: Fn(Message, Transaction) -> MalResult<()> + Send + Sync + 'static,
    {
        self.register(HandlerKind::Broker, key, Arc::new(handler))
    }

    /// Unregister this endpoint from the context.
    ///
    /// # Errors
    ///
    /// Returns [`MalError::UnknownEndpoint`] if already unregistered.
    pub fn close(&self) -> MalResult<()> {
        self.ctx.unregister_endpoint(&self.uri)
    }

    fn register(&self, kind: HandlerKind, key: ServiceKey, handler: Handler) -> MalResult<()> {
        let mut handlers = self
            .handlers
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        if handlers.contains_key(&key) {
            tracing::error!(uri = %self.uri, %key, "handler already registered");
            return Err(MalError::DuplicateHandler { key });
        }
        tracing::debug!(uri = %self.uri, %key, ?kind, "handler registered");
        handlers.insert(key, HandlerDescriptor { kind, handler });
        Ok(())
    }

    fn dispatch(&self, msg: Message) -> MalResult<()> {
        let key = msg.service_key();
        let descriptor = self
            .handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&key)
            .cloned()
            .ok_or(MalError::UnknownHandler { key })?;

        if !descriptor.kind.serves(msg.interaction_type) {
            return Err(MalError::HandlerKindMismatch {
                key,
                registered: descriptor.kind,
                requested: msg.interaction_type,
            });
        }

        let transaction = Transaction::for_message(Arc::clone(&self.ctx), self.uri.clone(), &msg)?;
        (descriptor.handler)(msg, transaction)
    }
}

impl Listener for HandlerContext {
    fn on_message(&self, msg: Message) {
        let tid = msg.transaction_id;
        if let Err(error) = self.dispatch(msg) {
            tracing::error!(uri = %self.uri, tid, %error, "cannot dispatch message, dropping");
        }
    }

    fn on_close(&self) {
        let mut handlers = self
            .handlers
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let count = handlers.len();
        handlers.clear();
        tracing::info!(uri = %self.uri, handlers = count, "handler context closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::LoopbackTransport;
    use malrs_core::stage;
    use std::sync::Mutex;

    fn test_key() -> ServiceKey {
        ServiceKey::new(1, 1, 1, 1)
    }

    fn inbound(interaction_type: InteractionType, interaction_stage: u8) -> Message {
        Message {
            uri_from: Uri::new("malloop://node-a/consumer"),
            uri_to: Uri::new("malloop://node-a/provider"),
            interaction_type,
            interaction_stage,
            transaction_id: 3,
            service_area: 1,
            area_version: 1,
            service: 1,
            operation: 1,
            ..Message::default()
        }
    }

    async fn test_hctx() -> Arc<HandlerContext> {
        let ctx = Context::new(LoopbackTransport::new("node-a"));
        HandlerContext::new(&ctx, "provider").expect("endpoint")
    }

    #[tokio::test]
    async fn test_duplicate_handler_rejected() {
        let hctx = test_hctx().await;
        hctx.register_submit_handler(test_key(), |_msg, _tx| Ok(()))
            .expect("first registration");
        assert!(matches!(
            hctx.register_request_handler(test_key(), |_msg, _tx| Ok(())),
            Err(MalError::DuplicateHandler { .. })
        ));
    }

    #[tokio::test]
    async fn test_dispatch_invokes_matching_handler() {
        let hctx = test_hctx().await;
        let seen: Arc<Mutex<Vec<u64>>> = Arc::new(Mutex::new(Vec::new()));
        let record = Arc::clone(&seen);
        hctx.register_submit_handler(test_key(), move |msg, tx| {
            assert!(matches!(tx, Transaction::Submit(_)));
            record.lock().expect("lock").push(msg.transaction_id);
            Ok(())
        })
        .expect("register");

        hctx.on_message(inbound(InteractionType::Submit, stage::SUBMIT));
        assert_eq!(*seen.lock().expect("lock"), vec![3]);
    }

    #[tokio::test]
    async fn test_dispatch_without_handler_is_dropped() {
        let hctx = test_hctx().await;
        assert!(matches!(
            hctx.dispatch(inbound(InteractionType::Submit, stage::SUBMIT)),
            Err(MalError::UnknownHandler { .. })
        ));
        // Through the listener interface it only logs.
        hctx.on_message(inbound(InteractionType::Submit, stage::SUBMIT));
    }

    #[tokio::test]
    async fn test_dispatch_kind_mismatch_rejected() {
        let hctx = test_hctx().await;
        hctx.register_submit_handler(test_key(), |_msg, _tx| Ok(()))
            .expect("register");

        assert!(matches!(
            hctx.dispatch(inbound(InteractionType::Request, stage::REQUEST)),
            Err(MalError::HandlerKindMismatch { .. })
        ));
    }

    #[tokio::test]
    async fn test_pubsub_transaction_selected_by_stage() {
        let hctx = test_hctx().await;
        let kinds: Arc<Mutex<Vec<&'static str>>> = Arc::new(Mutex::new(Vec::new()));
        let record = Arc::clone(&kinds);
        hctx.register_broker_handler(test_key(), move |_msg, tx| {
            let kind = match tx {
                Transaction::Publisher(_) => "publisher",
                Transaction::Subscriber(_) => "subscriber",
                _ => "other",
            };
            record.lock().expect("lock").push(kind);
            Ok(())
        })
        .expect("register");

        hctx.on_message(inbound(InteractionType::PubSub, stage::PUBSUB_PUBLISH_REGISTER));
        hctx.on_message(inbound(InteractionType::PubSub, stage::PUBSUB_PUBLISH));
        hctx.on_message(inbound(InteractionType::PubSub, stage::PUBSUB_PUBLISH_DEREGISTER));
        hctx.on_message(inbound(InteractionType::PubSub, stage::PUBSUB_REGISTER));
        hctx.on_message(inbound(InteractionType::PubSub, stage::PUBSUB_DEREGISTER));

        assert_eq!(
            *kinds.lock().expect("lock"),
            vec!["publisher", "publisher", "publisher", "subscriber", "subscriber"]
        );
    }

    #[tokio::test]
    async fn test_pubsub_bad_stage_rejected() {
        let hctx = test_hctx().await;
        hctx.register_broker_handler(test_key(), |_msg, _tx| Ok(()))
            .expect("register");

        // A NOTIFY arriving at the broker side belongs to neither half.
        assert!(matches!(
            hctx.dispatch(inbound(InteractionType::PubSub, stage::PUBSUB_NOTIFY)),
            Err(MalError::BadStage {
                stage: stage::PUBSUB_NOTIFY
            })
        ));
    }
}
