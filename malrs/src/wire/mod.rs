//! MALTCP wire format for message framing.
//!
//! Frame format: `[fixed header:23][variable part + body:N]`
//!
//! The fixed header is 23 octets:
//!
//! | Octets | Content |
//! |--------|---------|
//! | 0      | version (3 high bits) \| SDU type (5 low bits) |
//! | 1–2    | service area (big-endian) |
//! | 3–4    | service (big-endian) |
//! | 5–6    | operation (big-endian) |
//! | 7      | area version |
//! | 8      | is-error (bit 7) \| QoS level (bits 5–4) \| session (bits 1–0) |
//! | 9–16   | transaction id (big-endian) |
//! | 17     | presence flags for the optional fields |
//! | 18     | body encoding id |
//! | 19–22  | length of everything after the fixed header (big-endian) |
//!
//! The SDU type compactly names the (interaction type, interaction stage)
//! pair. The variable part carries the flag-controlled optional fields in
//! presence-flag order, followed by the opaque body. Frames are
//! self-delimiting on a stream socket through the length field.
//!
//! [`encode_message`] leaves a zero placeholder in the length field; the
//! transport stamps the real value with [`patch_body_length`] immediately
//! before the socket write.

use malrs_core::codec::{BinaryDecoder, BinaryEncoder, Decoder, Encoder};
use malrs_core::{CodecError, InteractionType, Message, QosLevel, SessionType, Uri, stage};
use serde::{Deserialize, Serialize};

/// Length of the fixed message header in octets.
pub const FIXED_HEADER_LEN: usize = 23;

/// Offset of the big-endian 32-bit length field inside the fixed header.
pub const BODY_LENGTH_OFFSET: usize = 19;

/// Protocol version stamped into the high bits of octet 0.
pub const PROTOCOL_VERSION: u8 = 1;

/// Maximum length of a frame's variable part (optional fields plus body).
///
/// Larger frames are rejected to prevent memory exhaustion from a
/// malformed or hostile length field.
pub const MAX_BODY_SIZE: usize = 1024 * 1024;

/// Presence-flag bits for the optional header fields, octet 17.
pub mod presence {
    /// Source URI present.
    pub const SOURCE_URI: u8 = 0x80;
    /// Destination URI present.
    pub const DESTINATION_URI: u8 = 0x40;
    /// Priority present.
    pub const PRIORITY: u8 = 0x20;
    /// Timestamp present.
    pub const TIMESTAMP: u8 = 0x10;
    /// Network zone present.
    pub const NETWORK_ZONE: u8 = 0x08;
    /// Session name present.
    pub const SESSION_NAME: u8 = 0x04;
    /// Domain present.
    pub const DOMAIN: u8 = 0x02;
    /// Authentication id present.
    pub const AUTHENTICATION_ID: u8 = 0x01;
    /// All optional fields present.
    pub const ALL: u8 = 0xFF;
}

/// Wire format error types.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WireError {
    /// Not enough data to parse the frame.
    #[error("truncated frame: need {needed} bytes, have {have}")]
    Truncated {
        /// Minimum bytes required.
        needed: usize,
        /// Bytes available.
        have: usize,
    },

    /// The frame carries an unsupported protocol version.
    #[error("unsupported protocol version: {version}")]
    UnsupportedVersion {
        /// Version found in the frame.
        version: u8,
    },

    /// The SDU type octet does not name a known (type, stage) pair.
    #[error("unknown SDU type: {sdu}")]
    UnknownSdu {
        /// The unknown SDU value.
        sdu: u8,
    },

    /// The stage is not valid for the interaction type.
    #[error("no SDU type for {interaction_type} stage {stage}")]
    InvalidStage {
        /// Interaction type of the message.
        interaction_type: InteractionType,
        /// Offending stage value.
        stage: u8,
    },

    /// A fixed-header field holds a value outside its legal range.
    #[error("invalid header field: {message}")]
    InvalidHeader {
        /// Description of the invalid field.
        message: String,
    },

    /// The variable part exceeds [`MAX_BODY_SIZE`].
    #[error("frame body too large: {size} bytes (max {MAX_BODY_SIZE})")]
    BodyTooLarge {
        /// Claimed variable-part length.
        size: usize,
    },

    /// A variable-part field failed to encode or decode.
    #[error(transparent)]
    Codec(#[from] CodecError),
}

/// Default values substituted for optional header fields that are unset on
/// encode, or absent (flag cleared) on decode.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeaderDefaults {
    /// Default priority; substituted when a message's priority is 0.
    pub priority: u32,
    /// Default network zone.
    pub network_zone: String,
    /// Default session name.
    pub session_name: String,
    /// Default domain.
    pub domain: Vec<String>,
    /// Default authentication id.
    pub authentication_id: Vec<u8>,
}

/// Map an (interaction type, stage) pair onto its SDU type octet.
///
/// # Errors
///
/// Returns [`WireError::InvalidStage`] when the stage is not part of the
/// pattern.
pub fn sdu_type(
    interaction_type: InteractionType,
    interaction_stage: u8,
) -> Result<u8, WireError> {
    let sdu = match (interaction_type, interaction_stage) {
        (InteractionType::Send, stage::SEND) => 0,
        (InteractionType::Submit, stage::SUBMIT) => 1,
        (InteractionType::Submit, stage::SUBMIT_ACK) => 2,
        (InteractionType::Request, stage::REQUEST) => 3,
        (InteractionType::Request, stage::REQUEST_RESPONSE) => 4,
        (InteractionType::Invoke, stage::INVOKE) => 5,
        (InteractionType::Invoke, stage::INVOKE_ACK) => 6,
        (InteractionType::Invoke, stage::INVOKE_RESPONSE) => 7,
        (InteractionType::Progress, stage::PROGRESS) => 8,
        (InteractionType::Progress, stage::PROGRESS_ACK) => 9,
        (InteractionType::Progress, stage::PROGRESS_UPDATE) => 10,
        (InteractionType::Progress, stage::PROGRESS_RESPONSE) => 11,
        (InteractionType::PubSub, stage::PUBSUB_REGISTER) => 12,
        (InteractionType::PubSub, stage::PUBSUB_REGISTER_ACK) => 13,
        (InteractionType::PubSub, stage::PUBSUB_PUBLISH_REGISTER) => 14,
        (InteractionType::PubSub, stage::PUBSUB_PUBLISH_REGISTER_ACK) => 15,
        (InteractionType::PubSub, stage::PUBSUB_PUBLISH) => 16,
        (InteractionType::PubSub, stage::PUBSUB_NOTIFY) => 17,
        (InteractionType::PubSub, stage::PUBSUB_DEREGISTER) => 18,
        (InteractionType::PubSub, stage::PUBSUB_DEREGISTER_ACK) => 19,
        (InteractionType::PubSub, stage::PUBSUB_PUBLISH_DEREGISTER) => 20,
        (InteractionType::PubSub, stage::PUBSUB_PUBLISH_DEREGISTER_ACK) => 21,
        (interaction_type, interaction_stage) => {
            return Err(WireError::InvalidStage {
                interaction_type,
                stage: interaction_stage,
            });
        }
    };
    Ok(sdu)
}

/// Map an SDU type octet back onto its (interaction type, stage) pair.
///
/// # Errors
///
/// Returns [`WireError::UnknownSdu`] for values above 21.
pub fn interaction_from_sdu(sdu: u8) -> Result<(InteractionType, u8), WireError> {
    let pair = match sdu {
        0 => (InteractionType::Send, stage::SEND),
        1 => (InteractionType::Submit, stage::SUBMIT),
        2 => (InteractionType::Submit, stage::SUBMIT_ACK),
        3 => (InteractionType::Request, stage::REQUEST),
        4 => (InteractionType::Request, stage::REQUEST_RESPONSE),
        5 => (InteractionType::Invoke, stage::INVOKE),
        6 => (InteractionType::Invoke, stage::INVOKE_ACK),
        7 => (InteractionType::Invoke, stage::INVOKE_RESPONSE),
        8 => (InteractionType::Progress, stage::PROGRESS),
        9 => (InteractionType::Progress, stage::PROGRESS_ACK),
        10 => (InteractionType::Progress, stage::PROGRESS_UPDATE),
        11 => (InteractionType::Progress, stage::PROGRESS_RESPONSE),
        12 => (InteractionType::PubSub, stage::PUBSUB_REGISTER),
        13 => (InteractionType::PubSub, stage::PUBSUB_REGISTER_ACK),
        14 => (InteractionType::PubSub, stage::PUBSUB_PUBLISH_REGISTER),
        15 => (InteractionType::PubSub, stage::PUBSUB_PUBLISH_REGISTER_ACK),
        16 => (InteractionType::PubSub, stage::PUBSUB_PUBLISH),
        17 => (InteractionType::PubSub, stage::PUBSUB_NOTIFY),
        18 => (InteractionType::PubSub, stage::PUBSUB_DEREGISTER),
        19 => (InteractionType::PubSub, stage::PUBSUB_DEREGISTER_ACK),
        20 => (InteractionType::PubSub, stage::PUBSUB_PUBLISH_DEREGISTER),
        21 => (InteractionType::PubSub, stage::PUBSUB_PUBLISH_DEREGISTER_ACK),
        sdu => return Err(WireError::UnknownSdu { sdu }),
    };
    Ok(pair)
}

/// Length of the variable part announced by a fixed header.
pub fn body_length(header: &[u8; FIXED_HEADER_LEN]) -> usize {
    u32::from_be_bytes([
        header[BODY_LENGTH_OFFSET],
        header[BODY_LENGTH_OFFSET + 1],
        header[BODY_LENGTH_OFFSET + 2],
        header[BODY_LENGTH_OFFSET + 3],
    ]) as usize
}

/// Stamp the length field of a complete frame: octets 19–22 become
/// `frame.len() - 23`, big-endian.
///
/// # Panics
///
/// Panics in debug builds if the frame is shorter than the fixed header.
pub fn patch_body_length(frame: &mut [u8]) {
    debug_assert!(frame.len() >= FIXED_HEADER_LEN);
    let length = (frame.len() - FIXED_HEADER_LEN) as u32;
    frame[BODY_LENGTH_OFFSET..BODY_LENGTH_OFFSET + 4].copy_from_slice(&length.to_be_bytes());
}

/// Encode a message into a frame, leaving the length field zeroed.
///
/// Optional fields are written when their bit is set in `flags`; unset
/// message fields (zero priority, empty strings, empty lists) are replaced
/// by the transport `defaults`.
///
/// # Errors
///
/// Fails when the version does not fit three bits, the (type, stage) pair
/// has no SDU type, the variable part exceeds [`MAX_BODY_SIZE`], or a
/// field fails to encode.
pub fn encode_message(
    msg: &Message,
    version: u8,
    flags: u8,
    defaults: &HeaderDefaults,
) -> Result<Vec<u8>, WireError> {
    if version > 0x07 {
        return Err(WireError::UnsupportedVersion { version });
    }
    let sdu = sdu_type(msg.interaction_type, msg.interaction_stage)?;

    let mut header = [0u8; FIXED_HEADER_LEN];
    header[0] = (version << 5) | sdu;
    header[1..3].copy_from_slice(&msg.service_area.to_be_bytes());
    header[3..5].copy_from_slice(&msg.service.to_be_bytes());
    header[5..7].copy_from_slice(&msg.operation.to_be_bytes());
    header[7] = msg.area_version;
    header[8] = (u8::from(msg.is_error_message) << 7)
        | (msg.qos_level.as_u8() << 4)
        | msg.session.as_u8();
    header[9..17].copy_from_slice(&msg.transaction_id.to_be_bytes());
    header[17] = flags;
    header[18] = msg.encoding_id;
    // Octets 19..23 stay zero until patch_body_length.

    let mut encoder = BinaryEncoder::new();
    if flags & presence::SOURCE_URI != 0 {
        encoder.encode_str(msg.uri_from.as_str())?;
    }
    if flags & presence::DESTINATION_URI != 0 {
        encoder.encode_str(msg.uri_to.as_str())?;
    }
    if flags & presence::PRIORITY != 0 {
        let priority = if msg.priority == 0 {
            defaults.priority
        } else {
            msg.priority
        };
        encoder.encode_u32(priority)?;
    }
    if flags & presence::TIMESTAMP != 0 {
        encoder.encode_u64(msg.timestamp)?;
    }
    if flags & presence::NETWORK_ZONE != 0 {
        let zone = if msg.network_zone.is_empty() {
            &defaults.network_zone
        } else {
            &msg.network_zone
        };
        encoder.encode_str(zone)?;
    }
    if flags & presence::SESSION_NAME != 0 {
        let name = if msg.session_name.is_empty() {
            &defaults.session_name
        } else {
            &msg.session_name
        };
        encoder.encode_str(name)?;
    }
    if flags & presence::DOMAIN != 0 {
        let domain = if msg.domain.is_empty() {
            &defaults.domain
        } else {
            &msg.domain
        };
        let count = u16::try_from(domain.len()).map_err(|_| WireError::InvalidHeader {
            message: format!("domain list too long: {} identifiers", domain.len()),
        })?;
        encoder.encode_u16(count)?;
        for identifier in domain {
            encoder.encode_str(identifier)?;
        }
    }
    if flags & presence::AUTHENTICATION_ID != 0 {
        let auth = if msg.authentication_id.is_empty() {
            &defaults.authentication_id
        } else {
            &msg.authentication_id
        };
        encoder.encode_blob(auth)?;
    }

    let variable = encoder.into_bytes();
    let body_size = variable.len() + msg.body.len();
    if body_size > MAX_BODY_SIZE {
        return Err(WireError::BodyTooLarge { size: body_size });
    }

    let mut frame = Vec::with_capacity(FIXED_HEADER_LEN + body_size);
    frame.extend_from_slice(&header);
    frame.extend_from_slice(&variable);
    frame.extend_from_slice(&msg.body);
    Ok(frame)
}

/// Decode a complete frame back into a message.
///
/// Presence flags are honoured: fields whose bit is cleared take the
/// transport `defaults` (or stay empty for the URIs and timestamp). Bytes
/// remaining after the flagged fields form the body.
///
/// # Errors
///
/// Fails on short input, a version other than `version`, an unknown SDU
/// type, out-of-range header fields, or malformed variable fields.
pub fn decode_message(
    frame: &[u8],
    version: u8,
    defaults: &HeaderDefaults,
) -> Result<Message, WireError> {
    if frame.len() < FIXED_HEADER_LEN {
        return Err(WireError::Truncated {
            needed: FIXED_HEADER_LEN,
            have: frame.len(),
        });
    }

    let frame_version = frame[0] >> 5;
    if frame_version != version {
        return Err(WireError::UnsupportedVersion {
            version: frame_version,
        });
    }
    let (interaction_type, interaction_stage) = interaction_from_sdu(frame[0] & 0x1F)?;

    let service_area = u16::from_be_bytes([frame[1], frame[2]]);
    let service = u16::from_be_bytes([frame[3], frame[4]]);
    let operation = u16::from_be_bytes([frame[5], frame[6]]);
    let area_version = frame[7];

    let is_error_message = frame[8] & 0x80 != 0;
    let qos_level = QosLevel::from_u8((frame[8] >> 4) & 0x03).ok_or_else(|| {
        WireError::InvalidHeader {
            message: format!("invalid QoS level octet: {:#04x}", frame[8]),
        }
    })?;
    let session = SessionType::from_u8(frame[8] & 0x03).ok_or_else(|| {
        WireError::InvalidHeader {
            message: format!("invalid session octet: {:#04x}", frame[8]),
        }
    })?;

    let transaction_id = u64::from_be_bytes([
        frame[9], frame[10], frame[11], frame[12], frame[13], frame[14], frame[15], frame[16],
    ]);
    let flags = frame[17];
    let encoding_id = frame[18];

    let mut decoder = BinaryDecoder::new(&frame[FIXED_HEADER_LEN..]);
    let uri_from = if flags & presence::SOURCE_URI != 0 {
        Uri::new(decoder.decode_str()?)
    } else {
        Uri::default()
    };
    let uri_to = if flags & presence::DESTINATION_URI != 0 {
        Uri::new(decoder.decode_str()?)
    } else {
        Uri::default()
    };
    let priority = if flags & presence::PRIORITY != 0 {
        decoder.decode_u32()?
    } else {
        defaults.priority
    };
    let timestamp = if flags & presence::TIMESTAMP != 0 {
        decoder.decode_u64()?
    } else {
        0
    };
    let network_zone = if flags & presence::NETWORK_ZONE != 0 {
        decoder.decode_str()?
    } else {
        defaults.network_zone.clone()
    };
    let session_name = if flags & presence::SESSION_NAME != 0 {
        decoder.decode_str()?
    } else {
        defaults.session_name.clone()
    };
    let domain = if flags & presence::DOMAIN != 0 {
        let count = decoder.decode_u16()? as usize;
        let mut domain = Vec::with_capacity(count.min(64));
        for _ in 0..count {
            domain.push(decoder.decode_str()?);
        }
        domain
    } else {
        defaults.domain.clone()
    };
    let authentication_id = if flags & presence::AUTHENTICATION_ID != 0 {
        decoder.decode_blob()?
    } else {
        defaults.authentication_id.clone()
    };

    let body = decoder.take_rest().to_vec();

    Ok(Message {
        uri_from,
        uri_to,
        authentication_id,
        timestamp,
        qos_level,
        priority,
        domain,
        network_zone,
        session,
        session_name,
        interaction_type,
        interaction_stage,
        transaction_id,
        service_area,
        area_version,
        service,
        operation,
        encoding_id,
        is_error_message,
        body,
    })
}
