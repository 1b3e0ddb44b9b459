//! The MAL message envelope.

use serde::{Deserialize, Serialize};

use crate::types::{InteractionType, QosLevel, ServiceKey, SessionType, Uri};

/// Universal in-memory message envelope.
///
/// Every message carries a fully populated header on the wire. Fields are
/// plain values; "absent" optional fields are the type's default (empty
/// string, empty vector, zero) and may be substituted with transport
/// defaults at encode time.
///
/// `transaction_id` threads the messages of one interaction together and is
/// only meaningful within the scope of the initiating endpoint.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Originating endpoint. May be filled in by the transport on receive
    /// when the peer did not provide one.
    pub uri_from: Uri,
    /// Destination endpoint, used for routing end-to-end.
    pub uri_to: Uri,
    /// Opaque authentication token, carried but never verified.
    pub authentication_id: Vec<u8>,
    /// Creation time, milliseconds since the Unix epoch.
    pub timestamp: u64,
    /// Delivery quality of service.
    pub qos_level: QosLevel,
    /// Message priority within its QoS class.
    pub priority: u32,
    /// Domain the message belongs to, as an ordered identifier list.
    pub domain: Vec<String>,
    /// Network zone selector.
    pub network_zone: String,
    /// Session kind.
    pub session: SessionType,
    /// Session instance name.
    pub session_name: String,
    /// Interaction pattern this message belongs to.
    pub interaction_type: InteractionType,
    /// Stage within the pattern; must be valid for `interaction_type`.
    pub interaction_stage: u8,
    /// Transaction identifier, unique per initiating endpoint.
    pub transaction_id: u64,
    /// Service area number.
    pub service_area: u16,
    /// Area version.
    pub area_version: u8,
    /// Service number.
    pub service: u16,
    /// Operation number.
    pub operation: u16,
    /// Identifier of the encoding used for `body`, carried opaquely.
    pub encoding_id: u8,
    /// Whether this is an error reply; the body then carries the
    /// application-defined error payload.
    pub is_error_message: bool,
    /// Opaque payload bytes.
    pub body: Vec<u8>,
}

impl Message {
    /// The (area, area version, service, operation) selector of this message.
    pub const fn service_key(&self) -> ServiceKey {
        ServiceKey {
            area: self.service_area,
            area_version: self.area_version,
            service: self.service,
            operation: self.operation,
        }
    }
}

/// Current time as milliseconds since the Unix epoch, for stamping outgoing
/// message headers. Returns 0 if the system clock is before the epoch.
pub fn now_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() as u64)
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::stage;

    #[test]
    fn test_default_message_is_empty() {
        let msg = Message::default();
        assert!(msg.uri_from.is_empty());
        assert!(msg.uri_to.is_empty());
        assert!(msg.body.is_empty());
        assert!(!msg.is_error_message);
        assert_eq!(msg.transaction_id, 0);
    }

    #[test]
    fn test_service_key_extraction() {
        let msg = Message {
            service_area: 4,
            area_version: 2,
            service: 7,
            operation: 11,
            ..Message::default()
        };
        assert_eq!(msg.service_key(), ServiceKey::new(4, 2, 7, 11));
    }

    #[test]
    fn test_message_serde_roundtrip() {
        let msg = Message {
            uri_from: Uri::new("maltcp://127.0.0.1:4500/consumer"),
            uri_to: Uri::new("maltcp://127.0.0.1:4501/provider"),
            interaction_type: InteractionType::Submit,
            interaction_stage: stage::SUBMIT,
            transaction_id: 42,
            body: vec![1, 2, 3],
            ..Message::default()
        };
        let json = serde_json::to_string(&msg).expect("serialize");
        let decoded: Message = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(msg, decoded);
    }

    #[test]
    fn test_now_millis_is_recent() {
        // 2020-01-01 in epoch milliseconds; any sane clock is past this.
        assert!(now_millis() > 1_577_836_800_000);
    }
}
