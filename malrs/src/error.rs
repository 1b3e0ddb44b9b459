//! Error types for the interaction layer.

use malrs_core::{InteractionType, Message, ServiceKey, Uri};

use crate::handler::HandlerKind;
use crate::operation::OperationStatus;
use crate::transport::TransportError;
use crate::wire::WireError;

/// Errors surfaced by contexts, operations, handlers and transactions.
#[derive(Debug, thiserror::Error)]
pub enum MalError {
    /// An endpoint is already registered under this URI.
    #[error("endpoint already registered: {uri}")]
    DuplicateEndpoint {
        /// The contested URI.
        uri: Uri,
    },

    /// No endpoint is registered under this URI.
    #[error("no endpoint registered: {uri}")]
    UnknownEndpoint {
        /// The URI that was looked up.
        uri: Uri,
    },

    /// An operation is already registered under this transaction id.
    #[error("operation already registered for transaction {tid}")]
    DuplicateTransaction {
        /// The contested transaction id.
        tid: u64,
    },

    /// No operation is registered under this transaction id.
    #[error("no operation registered for transaction {tid}")]
    UnknownTransaction {
        /// The transaction id that was looked up.
        tid: u64,
    },

    /// A handler is already registered under this service key.
    #[error("handler already registered: {key}")]
    DuplicateHandler {
        /// The contested service key.
        key: ServiceKey,
    },

    /// No handler is registered under this service key.
    #[error("no handler registered: {key}")]
    UnknownHandler {
        /// The service key that was looked up.
        key: ServiceKey,
    },

    /// The registered handler serves a different interaction pattern.
    #[error("handler kind mismatch for {key}: registered {registered:?}, message {requested}")]
    HandlerKindMismatch {
        /// The service key that was dispatched.
        key: ServiceKey,
        /// Kind of the registered handler.
        registered: HandlerKind,
        /// Interaction type of the inbound message.
        requested: InteractionType,
    },

    /// The operation is not in a status that permits this call.
    #[error("bad operation status: {status:?}")]
    BadStatus {
        /// Status the operation was in.
        status: OperationStatus,
    },

    /// A message arrived with a stage illegal for the current state.
    /// The operation has been finalized.
    #[error("bad interaction stage: {stage}")]
    BadStage {
        /// The offending stage value.
        stage: u8,
    },

    /// The operation's inbound queue closed while waiting for a reply.
    #[error("operation ends")]
    OperationEnded,

    /// The peer answered with an application-level error; the reply
    /// message carries the error payload in its body.
    #[error("application error reply")]
    Application(Message),

    /// Wire-format failure.
    #[error(transparent)]
    Wire(#[from] WireError),

    /// Transport failure.
    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// Result type for interaction-layer operations.
pub type MalResult<T> = Result<T, MalError>;
