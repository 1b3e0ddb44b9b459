//! Pluggable encoding of MAL data.
//!
//! The [`Encoder`] and [`Decoder`] traits are the seam between the
//! interaction layer and any concrete encoding. The runtime ships one
//! implementation, the fixed-width big-endian [`BinaryEncoder`] /
//! [`BinaryDecoder`] pair used for message headers; bodies may use any
//! encoding, named by the message's encoding id.
//!
//! Polymorphic fields typed as an abstract element are written with
//! [`encode_element`] / [`decode_element`], which dispatch on the element's
//! absolute short form through the process-wide registry (see
//! [`crate::element`]).
//!
//! # Example
//!
//! ```
//! use malrs_core::codec::{BinaryDecoder, BinaryEncoder, Decoder, Encoder};
//!
//! let mut encoder = BinaryEncoder::new();
//! encoder.encode_u16(4500).expect("encode");
//! encoder.encode_str("LEO").expect("encode");
//!
//! let bytes = encoder.into_bytes();
//! let mut decoder = BinaryDecoder::new(&bytes);
//! assert_eq!(decoder.decode_u16().expect("decode"), 4500);
//! assert_eq!(decoder.decode_str().expect("decode"), "LEO");
//! ```

use crate::element::{Element, new_element};

/// Error type for codec and element-registry operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CodecError {
    /// Not enough bytes left to decode the requested value.
    #[error("truncated input: need {needed} more bytes, have {have}")]
    Truncated {
        /// Bytes required by the value being decoded.
        needed: usize,
        /// Bytes actually remaining.
        have: usize,
    },

    /// The bytes do not form a valid value of the requested type.
    #[error("malformed value: {message}")]
    Malformed {
        /// Description of the malformation.
        message: String,
    },

    /// No element constructor is registered for this short form.
    #[error("unknown short form: {short_form:#018x}")]
    UnknownShortForm {
        /// The absolute short form that failed to resolve.
        short_form: u64,
    },

    /// An element constructor is already registered for this short form.
    #[error("short form already registered: {short_form:#018x}")]
    DuplicateShortForm {
        /// The absolute short form that was registered twice.
        short_form: u64,
    },
}

/// Primitive-writing half of a MAL encoding.
///
/// Implementations append values to an internal buffer; methods are
/// fallible so bounded or streaming encoders can report failure.
pub trait Encoder {
    /// Encode a boolean.
    fn encode_bool(&mut self, value: bool) -> Result<(), CodecError>;
    /// Encode an unsigned octet.
    fn encode_u8(&mut self, value: u8) -> Result<(), CodecError>;
    /// Encode an unsigned short.
    fn encode_u16(&mut self, value: u16) -> Result<(), CodecError>;
    /// Encode an unsigned integer.
    fn encode_u32(&mut self, value: u32) -> Result<(), CodecError>;
    /// Encode an unsigned long.
    fn encode_u64(&mut self, value: u64) -> Result<(), CodecError>;
    /// Encode a signed long.
    fn encode_i64(&mut self, value: i64) -> Result<(), CodecError>;
    /// Encode a length-prefixed byte string.
    fn encode_blob(&mut self, value: &[u8]) -> Result<(), CodecError>;
    /// Encode a length-prefixed UTF-8 string.
    fn encode_str(&mut self, value: &str) -> Result<(), CodecError>;
}

/// Primitive-reading half of a MAL encoding.
pub trait Decoder {
    /// Decode a boolean.
    fn decode_bool(&mut self) -> Result<bool, CodecError>;
    /// Decode an unsigned octet.
    fn decode_u8(&mut self) -> Result<u8, CodecError>;
    /// Decode an unsigned short.
    fn decode_u16(&mut self) -> Result<u16, CodecError>;
    /// Decode an unsigned integer.
    fn decode_u32(&mut self) -> Result<u32, CodecError>;
    /// Decode an unsigned long.
    fn decode_u64(&mut self) -> Result<u64, CodecError>;
    /// Decode a signed long.
    fn decode_i64(&mut self) -> Result<i64, CodecError>;
    /// Decode a length-prefixed byte string.
    fn decode_blob(&mut self) -> Result<Vec<u8>, CodecError>;
    /// Decode a length-prefixed UTF-8 string.
    fn decode_str(&mut self) -> Result<String, CodecError>;
}

/// Encode a polymorphic element: its absolute short form followed by its
/// fields.
///
/// # Errors
///
/// Propagates any error from the underlying encoder or the element itself.
pub fn encode_element(
    encoder: &mut dyn Encoder,
    element: &dyn Element,
) -> Result<(), CodecError> {
    encoder.encode_u64(element.short_form())?;
    element.encode(encoder)
}

/// Decode a polymorphic element by reading its short form, constructing a
/// fresh zero-valued instance through the registry, and decoding into it.
///
/// # Errors
///
/// Returns [`CodecError::UnknownShortForm`] when no constructor is
/// registered, or any decode error from the element's fields.
pub fn decode_element(decoder: &mut dyn Decoder) -> Result<Box<dyn Element>, CodecError> {
    let short_form = decoder.decode_u64()?;
    let mut element = new_element(short_form)?;
    element.decode(decoder)?;
    Ok(element)
}

/// Fixed-width big-endian encoder.
///
/// Integers are written big-endian at their natural width; booleans as a
/// single 0/1 octet; blobs and strings with a 32-bit big-endian length
/// prefix.
#[derive(Debug, Default)]
pub struct BinaryEncoder {
    buf: Vec<u8>,
}

impl BinaryEncoder {
    /// Create an empty encoder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Bytes encoded so far.
    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }

    /// Consume the encoder and return the encoded bytes.
    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }
}

impl Encoder for BinaryEncoder {
    fn encode_bool(&mut self, value: bool) -> Result<(), CodecError> {
        self.buf.push(u8::from(value));
        Ok(())
    }

    fn encode_u8(&mut self, value: u8) -> Result<(), CodecError> {
        self.buf.push(value);
        Ok(())
    }

    fn encode_u16(&mut self, value: u16) -> Result<(), CodecError> {
        self.buf.extend_from_slice(&value.to_be_bytes());
        Ok(())
    }

    fn encode_u32(&mut self, value: u32) -> Result<(), CodecError> {
        self.buf.extend_from_slice(&value.to_be_bytes());
        Ok(())
    }

    fn encode_u64(&mut self, value: u64) -> Result<(), CodecError> {
        self.buf.extend_from_slice(&value.to_be_bytes());
        Ok(())
    }

    fn encode_i64(&mut self, value: i64) -> Result<(), CodecError> {
        self.buf.extend_from_slice(&value.to_be_bytes());
        Ok(())
    }

    fn encode_blob(&mut self, value: &[u8]) -> Result<(), CodecError> {
        let length = u32::try_from(value.len()).map_err(|_| CodecError::Malformed {
            message: format!("blob too long: {} bytes", value.len()),
        })?;
        self.buf.extend_from_slice(&length.to_be_bytes());
        self.buf.extend_from_slice(value);
        Ok(())
    }

    fn encode_str(&mut self, value: &str) -> Result<(), CodecError> {
        self.encode_blob(value.as_bytes())
    }
}

/// Fixed-width big-endian decoder over a borrowed byte slice.
#[derive(Debug)]
pub struct BinaryDecoder<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> BinaryDecoder<'a> {
    /// Create a decoder positioned at the start of `buf`.
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    /// Bytes not yet consumed.
    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    /// Consume and return all remaining bytes.
    pub fn take_rest(&mut self) -> &'a [u8] {
        let rest = &self.buf[self.pos..];
        self.pos = self.buf.len();
        rest
    }

    fn take(&mut self, count: usize) -> Result<&'a [u8], CodecError> {
        if self.remaining() < count {
            return Err(CodecError::Truncated {
                needed: count,
                have: self.remaining(),
            });
        }
        let bytes = &self.buf[self.pos..self.pos + count];
        self.pos += count;
        Ok(bytes)
    }

    fn take_array<const N: usize>(&mut self) -> Result<[u8; N], CodecError> {
        let bytes = self.take(N)?;
        let mut array = [0u8; N];
        array.copy_from_slice(bytes);
        Ok(array)
    }
}

impl Decoder for BinaryDecoder<'_> {
    fn decode_bool(&mut self) -> Result<bool, CodecError> {
        match self.decode_u8()? {
            0 => Ok(false),
            1 => Ok(true),
            other => Err(CodecError::Malformed {
                message: format!("invalid boolean octet: {other}"),
            }),
        }
    }

    fn decode_u8(&mut self) -> Result<u8, CodecError> {
        Ok(self.take(1)?[0])
    }

    fn decode_u16(&mut self) -> Result<u16, CodecError> {
        Ok(u16::from_be_bytes(self.take_array()?))
    }

    fn decode_u32(&mut self) -> Result<u32, CodecError> {
        Ok(u32::from_be_bytes(self.take_array()?))
    }

    fn decode_u64(&mut self) -> Result<u64, CodecError> {
        Ok(u64::from_be_bytes(self.take_array()?))
    }

    fn decode_i64(&mut self) -> Result<i64, CodecError> {
        Ok(i64::from_be_bytes(self.take_array()?))
    }

    fn decode_blob(&mut self) -> Result<Vec<u8>, CodecError> {
        let length = self.decode_u32()? as usize;
        Ok(self.take(length)?.to_vec())
    }

    fn decode_str(&mut self) -> Result<String, CodecError> {
        let bytes = self.decode_blob()?;
        String::from_utf8(bytes).map_err(|e| CodecError::Malformed {
            message: format!("invalid UTF-8 string: {e}"),
        })
    }
}
