//! # malrs-core
//!
//! Core data model for the malrs messaging runtime, an implementation of
//! the CCSDS Mission Operations Message Abstraction Layer (MAL).
//!
//! This crate is transport-independent: it defines the message envelope,
//! the addressing and interaction-selector types, the pluggable codec
//! interface, and the process-wide element registry that backs polymorphic
//! decoding. The runtime crate (`malrs`) builds the interaction state
//! machines and the TCP transport on top of these types.
//!
//! ## Core Types
//!
//! | Type | Purpose |
//! |------|---------|
//! | [`Message`] | Universal envelope passed between layers |
//! | [`Uri`] | Opaque endpoint address, byte-exact equality |
//! | [`ServiceKey`] | (area, area version, service, operation) selector |
//! | [`InteractionType`] / [`stage`] | Pattern and stage wire constants |
//! | [`Encoder`] / [`Decoder`] | Pluggable encoding seam |
//! | [`Element`] | Self-describing data type keyed by short form |

#![deny(missing_docs)]
#![deny(clippy::unwrap_used)]

/// Pluggable encoding traits and the big-endian binary codec.
pub mod codec;

/// Polymorphic elements and the short-form registry.
pub mod element;

/// The MAL message envelope.
pub mod message;

/// Addressing and interaction-selector types.
pub mod types;

pub use codec::{
    BinaryDecoder, BinaryEncoder, CodecError, Decoder, Encoder, decode_element, encode_element,
};
pub use element::{Element, ElementConstructor, is_registered, new_element, register_element};
pub use message::{Message, now_millis};
pub use types::{
    InteractionType, QosLevel, ServiceKey, SessionType, Uri, UriParseError, stage,
};
