//! # malrs
//!
//! Runtime for a message-oriented middleware modelled on the CCSDS
//! Mission Operations Message Abstraction Layer (MAL).
//!
//! Application code drives typed, stateful *interactions* (Send, Submit,
//! Request, Invoke, Progress and Publish/Subscribe) over an unreliable,
//! connection-oriented transport; service code serves the same patterns
//! through a symmetric *handler* side. Many concurrent interactions are
//! multiplexed over shared endpoints by a per-endpoint transaction id.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────┐
//! │                  Application Code                     │
//! │   OperationContext (initiate)  HandlerContext (serve) │
//! ├───────────────────────────────────────────────────────┤
//! │   Context (endpoint routing)                          │
//! │   • URI → listener map                                │
//! │   • transaction demultiplexing per endpoint           │
//! ├───────────────────────────────────────────────────────┤
//! │   Transport (TcpTransport / LoopbackTransport)        │
//! │   • connection cache per host:port                    │
//! │   • one reader task per connection, one writer task   │
//! ├───────────────────────────────────────────────────────┤
//! │   Wire Format (23-octet fixed header + body)          │
//! │   • length-prefixed, self-delimiting frames           │
//! └───────────────────────────────────────────────────────┘
//! ```
//!
//! ## Components
//!
//! | Component | Purpose |
//! |-----------|---------|
//! | [`Context`] | Routes messages between endpoints and the transport |
//! | [`OperationContext`] | Initiator endpoint: allocates transactions, drives state machines |
//! | [`HandlerContext`] | Responder endpoint: dispatches to registered handlers |
//! | [`TcpTransport`] | MALTCP framing over real sockets |
//! | [`LoopbackTransport`] | In-process transport for tests and composition |
//!
//! ## Quick Start
//!
//! ```ignore
//! use malrs::{Context, HandlerContext, OperationContext, ServiceKey, TcpConfig, TcpTransport, Transaction};
//!
//! let key = ServiceKey::new(1, 1, 1, 1);
//!
//! // Provider side.
//! let provider = Context::new(TcpTransport::bind(TcpConfig::with_port(4500)).await?);
//! let handlers = HandlerContext::new(&provider, "provider")?;
//! handlers.register_submit_handler(key, |_msg, tx| {
//!     let Transaction::Submit(tx) = tx else { return Ok(()) };
//!     tx.ack(&[])
//! })?;
//!
//! // Consumer side.
//! let consumer = Context::new(TcpTransport::bind(TcpConfig::default()).await?);
//! let operations = OperationContext::new(&consumer, "consumer")?;
//! let mut submit = operations.submit_operation(handlers.uri().clone(), key);
//! let ack = submit.submit(&[0x01]).await?;
//! ```

#![deny(missing_docs)]
#![deny(clippy::unwrap_used)]

/// Endpoint routing: the context and its listener seam.
pub mod context;

/// Error types for the interaction layer.
pub mod error;

/// Responder-side dispatch and transactions.
pub mod handler;

/// Initiator-side interaction state machines.
pub mod operation;

/// Transports: TCP and in-process loopback.
pub mod transport;

/// MALTCP wire format.
pub mod wire;

// Re-export the core data model for convenience.
pub use malrs_core::{
    BinaryDecoder, BinaryEncoder, CodecError, Decoder, Element, ElementConstructor, Encoder,
    InteractionType, Message, QosLevel, ServiceKey, SessionType, Uri, UriParseError,
    decode_element, encode_element, is_registered, new_element, now_millis, register_element,
    stage,
};

pub use context::{Context, Listener};
pub use error::{MalError, MalResult};
pub use handler::{
    Handler, HandlerContext, HandlerKind, InvokeTransaction, ProgressTransaction,
    PublisherTransaction, RequestTransaction, SendTransaction, SubmitTransaction,
    SubscriberTransaction, Transaction,
};
pub use operation::{
    InvokeOperation, OperationContext, OperationStatus, ProgressOperation, PublisherOperation,
    RequestOperation, SendOperation, SubmitOperation, SubscriberOperation,
};
pub use transport::{LoopbackTransport, TcpConfig, TcpTransport, Transport, TransportError};
pub use wire::{
    FIXED_HEADER_LEN, HeaderDefaults, MAX_BODY_SIZE, PROTOCOL_VERSION, WireError, decode_message,
    encode_message, patch_body_length,
};
