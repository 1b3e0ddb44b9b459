//! Core types for MAL addressing and interaction selection.
//!
//! This module provides the fundamental types shared by every layer:
//! - [`Uri`]: opaque endpoint address, compared byte-exact
//! - [`ServiceKey`]: the (area, area version, service, operation) selector
//! - [`InteractionType`]: the six MAL interaction patterns
//! - [`stage`]: interaction-stage wire constants, stable across versions

use serde::{Deserialize, Serialize};

/// Opaque endpoint address.
///
/// A URI names exactly one listener; equality is byte-exact. The canonical
/// shape is `<transport>://host:port/servicepath`, where `host:port` is used
/// by the transport for routing and `servicepath` is carried end-to-end for
/// endpoint lookup at the destination.
///
/// # Examples
///
/// ```
/// use malrs_core::Uri;
///
/// let uri = Uri::new("maltcp://127.0.0.1:4500/provider");
/// assert_eq!(uri.host_port().expect("host"), "127.0.0.1:4500");
/// assert_eq!(uri.service_path(), "provider");
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Uri(String);

impl Uri {
    /// Create a URI from any string-like value. No validation is performed;
    /// a URI is only interpreted when the transport routes it.
    pub fn new(uri: impl Into<String>) -> Self {
        Self(uri.into())
    }

    /// The raw URI text.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether the URI is the empty string (an unset field).
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Extract the `host:port` routing component.
    ///
    /// # Errors
    ///
    /// Returns [`UriParseError`] if the URI has no `scheme://` prefix or an
    /// empty authority.
    pub fn host_port(&self) -> Result<&str, UriParseError> {
        let rest = self
            .0
            .split_once("://")
            .ok_or(UriParseError::MissingScheme)?
            .1;
        let authority = rest.split('/').next().unwrap_or(rest);
        if authority.is_empty() {
            return Err(UriParseError::MissingAuthority);
        }
        Ok(authority)
    }

    /// The service path after `host:port`, without the leading slash.
    /// Empty when the URI only names a transport base.
    pub fn service_path(&self) -> &str {
        self.0
            .split_once("://")
            .and_then(|(_, rest)| rest.split_once('/'))
            .map(|(_, path)| path)
            .unwrap_or("")
    }
}

impl std::fmt::Display for Uri {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Uri {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for Uri {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Error splitting a URI into routing components.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum UriParseError {
    /// No `scheme://` separator found.
    #[error("missing scheme separator")]
    MissingScheme,
    /// The authority (`host:port`) part is empty.
    #[error("missing authority")]
    MissingAuthority,
}

/// Selector for one service operation: area, area version, service and
/// operation numbers. This four-tuple keys handler registration and gates
/// reply verification on the initiator side.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct ServiceKey {
    /// Service area number.
    pub area: u16,
    /// Area version, pinning compatibility.
    pub area_version: u8,
    /// Service number within the area.
    pub service: u16,
    /// Operation number within the service.
    pub operation: u16,
}

impl ServiceKey {
    /// Create a selector from its four components.
    pub const fn new(area: u16, area_version: u8, service: u16, operation: u16) -> Self {
        Self {
            area,
            area_version,
            service,
            operation,
        }
    }
}

impl std::fmt::Display for ServiceKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}v{}/{}.{}",
            self.area, self.area_version, self.service, self.operation
        )
    }
}

/// The six MAL interaction patterns.
///
/// Wire values are stable and must not be renumbered.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize,
)]
#[repr(u8)]
pub enum InteractionType {
    /// One-way emission, no reply.
    #[default]
    Send = 1,
    /// Request acknowledged by a single SUBMIT_ACK.
    Submit = 2,
    /// Request answered by a single REQUEST_RESPONSE.
    Request = 3,
    /// Request acknowledged, then answered (two replies).
    Invoke = 4,
    /// Request acknowledged, streamed updates, final response.
    Progress = 5,
    /// Publish/subscribe brokered interaction.
    PubSub = 6,
}

impl InteractionType {
    /// Numeric wire value.
    pub const fn as_u8(self) -> u8 {
        self as u8
    }

    /// Parse a wire value back into an interaction type.
    pub const fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(Self::Send),
            2 => Some(Self::Submit),
            3 => Some(Self::Request),
            4 => Some(Self::Invoke),
            5 => Some(Self::Progress),
            6 => Some(Self::PubSub),
            _ => None,
        }
    }
}

impl std::fmt::Display for InteractionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Send => "SEND",
            Self::Submit => "SUBMIT",
            Self::Request => "REQUEST",
            Self::Invoke => "INVOKE",
            Self::Progress => "PROGRESS",
            Self::PubSub => "PUBSUB",
        };
        f.write_str(name)
    }
}

/// Interaction-stage wire constants.
///
/// Stages number the steps inside one pattern, starting at 1 in the
/// initiator-to-responder direction. Values are per-pattern (a stage is only
/// meaningful next to its [`InteractionType`]) and stable across versions.
pub mod stage {
    /// SEND: the single emission.
    pub const SEND: u8 = 1;

    /// SUBMIT: initial submission.
    pub const SUBMIT: u8 = 1;
    /// SUBMIT: acknowledgement.
    pub const SUBMIT_ACK: u8 = 2;

    /// REQUEST: initial request.
    pub const REQUEST: u8 = 1;
    /// REQUEST: response.
    pub const REQUEST_RESPONSE: u8 = 2;

    /// INVOKE: initial invocation.
    pub const INVOKE: u8 = 1;
    /// INVOKE: acknowledgement.
    pub const INVOKE_ACK: u8 = 2;
    /// INVOKE: final response.
    pub const INVOKE_RESPONSE: u8 = 3;

    /// PROGRESS: initial request.
    pub const PROGRESS: u8 = 1;
    /// PROGRESS: acknowledgement.
    pub const PROGRESS_ACK: u8 = 2;
    /// PROGRESS: intermediate update, repeated.
    pub const PROGRESS_UPDATE: u8 = 3;
    /// PROGRESS: final response, closes the stream.
    pub const PROGRESS_RESPONSE: u8 = 4;

    /// PUBSUB: consumer registration.
    pub const PUBSUB_REGISTER: u8 = 1;
    /// PUBSUB: consumer registration acknowledgement.
    pub const PUBSUB_REGISTER_ACK: u8 = 2;
    /// PUBSUB: producer registration.
    pub const PUBSUB_PUBLISH_REGISTER: u8 = 3;
    /// PUBSUB: producer registration acknowledgement.
    pub const PUBSUB_PUBLISH_REGISTER_ACK: u8 = 4;
    /// PUBSUB: publication, repeated.
    pub const PUBSUB_PUBLISH: u8 = 5;
    /// PUBSUB: notification delivered to a consumer, repeated.
    pub const PUBSUB_NOTIFY: u8 = 6;
    /// PUBSUB: consumer deregistration.
    pub const PUBSUB_DEREGISTER: u8 = 7;
    /// PUBSUB: consumer deregistration acknowledgement.
    pub const PUBSUB_DEREGISTER_ACK: u8 = 8;
    /// PUBSUB: producer deregistration.
    pub const PUBSUB_PUBLISH_DEREGISTER: u8 = 9;
    /// PUBSUB: producer deregistration acknowledgement.
    pub const PUBSUB_PUBLISH_DEREGISTER_ACK: u8 = 10;
}

/// Delivery quality-of-service levels.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize,
)]
#[repr(u8)]
pub enum QosLevel {
    /// No delivery guarantee.
    #[default]
    BestEffort = 0,
    /// Guaranteed delivery.
    Assured = 1,
    /// Guaranteed, order-preserving delivery.
    Queued = 2,
    /// Delivery within a time bound, stale messages dropped.
    Timely = 3,
}

impl QosLevel {
    /// Numeric wire value.
    pub const fn as_u8(self) -> u8 {
        self as u8
    }

    /// Parse a wire value back into a QoS level.
    pub const fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::BestEffort),
            1 => Some(Self::Assured),
            2 => Some(Self::Queued),
            3 => Some(Self::Timely),
            _ => None,
        }
    }
}

/// Session in which a message is exchanged.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize,
)]
#[repr(u8)]
pub enum SessionType {
    /// Live operations session.
    #[default]
    Live = 0,
    /// Simulation session.
    Simulation = 1,
    /// Replay of recorded data.
    Replay = 2,
}

impl SessionType {
    /// Numeric wire value.
    pub const fn as_u8(self) -> u8 {
        self as u8
    }

    /// Parse a wire value back into a session type.
    pub const fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::Live),
            1 => Some(Self::Simulation),
            2 => Some(Self::Replay),
            _ => None,
        }
    }
}
