//! Initiator-side interaction state machines.
//!
//! An [`OperationContext`] is an endpoint that multiplexes many concurrent
//! interactions over one URI. It allocates transaction ids, keeps the
//! transaction → operation demultiplexer, and routes each reply into the
//! inbound queue of the operation that initiated the exchange.
//!
//! Operations come in one flavour per interaction pattern:
//!
//! | Pattern  | Type | Blocking calls |
//! |----------|------|----------------|
//! | Send     | [`SendOperation`] | none |
//! | Submit   | [`SubmitOperation`] | `submit` |
//! | Request  | [`RequestOperation`] | `request` |
//! | Invoke   | [`InvokeOperation`] | `invoke`, `get_response` |
//! | Progress | [`ProgressOperation`] | `progress`, `get_update`, `get_response` |
//! | Pub/Sub  | [`SubscriberOperation`] / [`PublisherOperation`] | registration and notify calls |
//!
//! Every operation starts in `Created` and ends in `Final` (or `Closed`).
//! A reply with a stage illegal for the current state finalizes the
//! operation and surfaces [`MalError::BadStage`]; closing the inbound
//! queue under a waiter surfaces [`MalError::OperationEnded`]. `reset`
//! returns a finalized operation to `Created` under a fresh transaction
//! id.

mod invoke;
mod progress;
mod pubsub;
mod request;
mod send;
mod submit;

pub use invoke::InvokeOperation;
pub use progress::ProgressOperation;
pub use pubsub::{PublisherOperation, SubscriberOperation};
pub use request::RequestOperation;
pub use send::SendOperation;
pub use submit::SubmitOperation;

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use malrs_core::{InteractionType, Message, ServiceKey, Uri, now_millis};
use tokio::sync::mpsc;

use crate::context::{Context, Listener};
use crate::error::{MalError, MalResult};

/// Capacity of each operation's inbound queue. The router never blocks on
/// a full queue; overflow messages are dropped and logged.
const OPERATION_QUEUE_CAPACITY: usize = 16;

/// Lifecycle status of an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationStatus {
    /// Freshly created or reset; no message emitted yet.
    Created,
    /// Initial message emitted, first reply pending.
    Initiated,
    /// Acknowledgement received (Invoke, Progress).
    Acknowledged,
    /// At least one update received (Progress).
    Progressing,
    /// Registration emitted, ack pending (Pub/Sub).
    RegisterInitiated,
    /// Registration acknowledged (Pub/Sub).
    Registered,
    /// Re-registration emitted, ack pending. Reserved: nothing
    /// transitions here until re-registration is supported.
    ReregisterInitiated,
    /// Deregistration emitted, ack pending (Pub/Sub).
    DeregisterInitiated,
    /// Terminal: the interaction completed or failed.
    Final,
    /// Terminal: explicitly closed; every further call is rejected.
    Closed,
}

/// Routing record for one live transaction: where replies go and what
/// they must look like to be accepted.
pub(crate) struct TransactionEntry {
    sender: mpsc::Sender<Message>,
    interaction_type: InteractionType,
    key: ServiceKey,
}

/// Initiator endpoint: allocates transaction ids and demultiplexes
/// replies to the operations created from it.
pub struct OperationContext {
    ctx: Arc<Context>,
    uri: Uri,
    transactions: Mutex<HashMap<u64, TransactionEntry>>,
    tx_counter: AtomicU64,
}

impl OperationContext {
    /// Create the endpoint and register it with the context under
    /// `service_path`.
    ///
    /// # Errors
    ///
    /// Returns [`MalError::DuplicateEndpoint`] if the URI is taken.
    pub fn new(ctx: &Arc<Context>, service_path: &str) -> MalResult<Arc<Self>> {
        let uri = ctx.new_uri(service_path);
        let ictx = Arc::new(Self {
            ctx: Arc::clone(ctx),
            uri: uri.clone(),
            transactions: Mutex::new(HashMap::new()),
            tx_counter: AtomicU64::new(0),
        });
        ctx.register_endpoint(uri, Arc::clone(&ictx) as Arc<dyn Listener>)?;
        Ok(ictx)
    }

    /// This endpoint's URI.
    pub fn uri(&self) -> &Uri {
        &self.uri
    }

    /// Allocate the next transaction id. Ids start at 1 and are unique
    /// for the lifetime of this endpoint; allocation is safe from any
    /// thread.
    pub fn transaction_id(&self) -> u64 {
        self.tx_counter.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Create a one-way send operation towards `uri_to`.
    pub fn send_operation(self: &Arc<Self>, uri_to: Uri, key: ServiceKey) -> SendOperation {
        SendOperation::new(Arc::clone(self), uri_to, key)
    }

    /// Create a submit operation towards `uri_to`.
    pub fn submit_operation(self: &Arc<Self>, uri_to: Uri, key: ServiceKey) -> SubmitOperation {
        SubmitOperation::new(Arc::clone(self), uri_to, key)
    }

    /// Create a request operation towards `uri_to`.
    pub fn request_operation(self: &Arc<Self>, uri_to: Uri, key: ServiceKey) -> RequestOperation {
        RequestOperation::new(Arc::clone(self), uri_to, key)
    }

    /// Create an invoke operation towards `uri_to`.
    pub fn invoke_operation(self: &Arc<Self>, uri_to: Uri, key: ServiceKey) -> InvokeOperation {
        InvokeOperation::new(Arc::clone(self), uri_to, key)
    }

    /// Create a progress operation towards `uri_to`.
    pub fn progress_operation(self: &Arc<Self>, uri_to: Uri, key: ServiceKey) -> ProgressOperation {
        ProgressOperation::new(Arc::clone(self), uri_to, key)
    }

    /// Create a pub/sub consumer operation towards the broker at `uri_to`.
    pub fn subscriber_operation(
        self: &Arc<Self>,
        uri_to: Uri,
        key: ServiceKey,
    ) -> SubscriberOperation {
        SubscriberOperation::new(Arc::clone(self), uri_to, key)
    }

    /// Create a pub/sub producer operation towards the broker at `uri_to`.
    pub fn publisher_operation(
        self: &Arc<Self>,
        uri_to: Uri,
        key: ServiceKey,
    ) -> PublisherOperation {
        PublisherOperation::new(Arc::clone(self), uri_to, key)
    }

    /// Unregister this endpoint from the context, ending every operation
    /// still registered under it.
    ///
    /// # Errors
    ///
    /// Returns [`MalError::UnknownEndpoint`] if already unregistered.
    pub fn close(&self) -> MalResult<()> {
        self.ctx.unregister_endpoint(&self.uri)
    }

    pub(crate) fn send(&self, msg: Message) -> MalResult<()> {
        self.ctx.send(msg)
    }

    pub(crate) fn register(&self, tid: u64, entry: TransactionEntry) -> MalResult<()> {
        let mut transactions = self
            .transactions
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if transactions.contains_key(&tid) {
            tracing::warn!(uri = %self.uri, tid, "operation already registered for transaction");
            return Err(MalError::DuplicateTransaction { tid });
        }
        transactions.insert(tid, entry);
        Ok(())
    }

    pub(crate) fn deregister(&self, tid: u64) -> MalResult<()> {
        let removed = self
            .transactions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&tid);
        match removed {
            Some(_) => Ok(()),
            None => Err(MalError::UnknownTransaction { tid }),
        }
    }
}

impl Listener for OperationContext {
    fn on_message(&self, msg: Message) {
        let transactions = self
            .transactions
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let Some(entry) = transactions.get(&msg.transaction_id) else {
            tracing::debug!(
                uri = %self.uri,
                tid = msg.transaction_id,
                "no operation for transaction, dropping message"
            );
            return;
        };

        // Replies must match the service coordinates and pattern of the
        // operation that initiated the transaction.
        if entry.key != msg.service_key() || entry.interaction_type != msg.interaction_type {
            tracing::error!(
                uri = %self.uri,
                tid = msg.transaction_id,
                interaction_type = %msg.interaction_type,
                key = %msg.service_key(),
                "mismatched reply for transaction, dropping message"
            );
            return;
        }

        if let Err(error) = entry.sender.try_send(msg) {
            tracing::warn!(
                uri = %self.uri,
                %error,
                "operation queue unavailable, dropping message"
            );
        }
    }

    fn on_close(&self) {
        // Dropping the senders closes every operation's inbound queue, so
        // pending waits complete with an end-of-operation signal.
        let mut transactions = self
            .transactions
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let count = transactions.len();
        transactions.clear();
        tracing::info!(uri = %self.uri, operations = count, "operation context closed");
    }
}

/// State shared by every operation flavour: identity, routing, status and
/// the inbound queue ends.
pub(crate) struct OperationCore {
    ictx: Arc<OperationContext>,
    tid: u64,
    uri_to: Uri,
    key: ServiceKey,
    interaction_type: InteractionType,
    status: OperationStatus,
    /// Producer end, handed to the router on registration.
    tx: Option<mpsc::Sender<Message>>,
    /// Consumer end; `None` for operations that never receive.
    rx: Option<mpsc::Receiver<Message>>,
}

impl OperationCore {
    /// Core for an operation that expects replies.
    fn queued(
        ictx: Arc<OperationContext>,
        uri_to: Uri,
        key: ServiceKey,
        interaction_type: InteractionType,
    ) -> Self {
        let tid = ictx.transaction_id();
        let (tx, rx) = mpsc::channel(OPERATION_QUEUE_CAPACITY);
        Self {
            ictx,
            tid,
            uri_to,
            key,
            interaction_type,
            status: OperationStatus::Created,
            tx: Some(tx),
            rx: Some(rx),
        }
    }

    /// Core for an operation that never receives (Send).
    fn unqueued(
        ictx: Arc<OperationContext>,
        uri_to: Uri,
        key: ServiceKey,
        interaction_type: InteractionType,
    ) -> Self {
        let tid = ictx.transaction_id();
        Self {
            ictx,
            tid,
            uri_to,
            key,
            interaction_type,
            status: OperationStatus::Created,
            tx: None,
            rx: None,
        }
    }

    fn check(&self, allowed: &[OperationStatus]) -> MalResult<()> {
        if allowed.contains(&self.status) {
            Ok(())
        } else {
            Err(MalError::BadStatus {
                status: self.status,
            })
        }
    }

    fn new_message(&self, interaction_stage: u8, body: &[u8]) -> Message {
        Message {
            uri_from: self.ictx.uri().clone(),
            uri_to: self.uri_to.clone(),
            timestamp: now_millis(),
            interaction_type: self.interaction_type,
            interaction_stage,
            transaction_id: self.tid,
            service_area: self.key.area,
            area_version: self.key.area_version,
            service: self.key.service,
            operation: self.key.operation,
            body: body.to_vec(),
            ..Message::default()
        }
    }

    /// Register this operation in the context's demultiplexer, handing
    /// over the queue's producer end.
    fn register(&mut self) -> MalResult<()> {
        let sender = self.tx.take().ok_or(MalError::BadStatus {
            status: self.status,
        })?;
        self.ictx.register(
            self.tid,
            TransactionEntry {
                sender,
                interaction_type: self.interaction_type,
                key: self.key,
            },
        )
    }

    /// Wait for the next inbound message; a closed queue finalizes the
    /// operation.
    async fn next(&mut self) -> MalResult<Message> {
        let Some(rx) = self.rx.as_mut() else {
            self.finalize();
            return Err(MalError::OperationEnded);
        };
        match rx.recv().await {
            Some(msg) => Ok(msg),
            None => {
                self.finalize();
                tracing::debug!(uri = %self.ictx.uri(), tid = self.tid, "operation ends");
                Err(MalError::OperationEnded)
            }
        }
    }

    /// Move to `Final` and withdraw from the demultiplexer. The queue's
    /// consumer end is kept so a later `reset` starts from a clean pair.
    fn finalize(&mut self) {
        self.status = OperationStatus::Final;
        let _ = self.ictx.deregister(self.tid);
    }

    /// Unexpected-stage reply: finalize and surface the stage.
    fn bad_stage(&mut self, msg: &Message) -> MalError {
        let stage = msg.interaction_stage;
        self.finalize();
        tracing::error!(
            uri = %self.ictx.uri(),
            tid = self.tid,
            stage,
            "unexpected reply stage"
        );
        MalError::BadStage { stage }
    }

    /// Split an accepted reply into its application outcome.
    fn into_reply(&mut self, msg: Message) -> MalResult<Message> {
        if msg.is_error_message {
            Err(MalError::Application(msg))
        } else {
            Ok(msg)
        }
    }

    /// Close the operation: idempotent, empties the queue and rejects
    /// every future call.
    fn close(&mut self) {
        if self.status == OperationStatus::Closed {
            return;
        }
        // Capture the status before overwriting it: a finalized or unused
        // operation is already out of the demultiplexer.
        let previous = self.status;
        self.status = OperationStatus::Closed;
        if previous != OperationStatus::Created && previous != OperationStatus::Final {
            let _ = self.ictx.deregister(self.tid);
        }
        self.tx = None;
        self.rx = None;
    }

    /// Return a finalized operation to `Created` under a fresh
    /// transaction id, with a fresh inbound queue.
    ///
    /// # Errors
    ///
    /// Returns [`MalError::BadStatus`] unless the operation is `Final`.
    fn reset(&mut self) -> MalResult<()> {
        if self.status != OperationStatus::Final {
            return Err(MalError::BadStatus {
                status: self.status,
            });
        }
        self.tid = self.ictx.transaction_id();
        if self.rx.is_some() {
            let (tx, rx) = mpsc::channel(OPERATION_QUEUE_CAPACITY);
            self.tx = Some(tx);
            self.rx = Some(rx);
        }
        self.status = OperationStatus::Created;
        Ok(())
    }

    fn tid(&self) -> u64 {
        self.tid
    }

    fn status(&self) -> OperationStatus {
        self.status
    }
}

// Accessors shared by the pattern types; kept on the core so each pattern
// file stays focused on its state machine.
macro_rules! common_operation_api {
    () => {
        /// The transaction id threading this interaction's messages.
        pub fn transaction_id(&self) -> u64 {
            self.core.tid()
        }

        /// Current lifecycle status.
        pub fn status(&self) -> crate::operation::OperationStatus {
            self.core.status()
        }

        /// Close the operation: idempotent; empties and closes the
        /// inbound queue, withdraws from the demultiplexer, and rejects
        /// all future calls.
        pub fn close(&mut self) {
            self.core.close();
        }

        /// Return a finalized operation to `Created` under a fresh
        /// transaction id.
        ///
        /// # Errors
        ///
        /// Returns [`MalError::BadStatus`](crate::error::MalError::BadStatus)
        /// unless the operation is `Final`.
        pub fn reset(&mut self) -> crate::error::MalResult<()> {
            self.core.reset()
        }
    };
}
pub(crate) use common_operation_api;
