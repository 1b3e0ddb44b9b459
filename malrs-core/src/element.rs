//! Polymorphic MAL elements and the process-wide element registry.
//!
//! Every concrete MAL data type identifies itself by a 64-bit *absolute
//! short form*. Fields typed as an abstract element are written as the
//! short form followed by the element's own encoding; to decode them, the
//! codec needs a way to construct a fresh, zero-valued instance of the
//! right concrete type. That mapping is the element registry.
//!
//! The registry is write-once-at-startup: each data type registers its
//! constructor during process initialisation, before any decode runs.
//! Decoding a short form with no registered constructor fails with
//! [`CodecError::UnknownShortForm`].
//!
//! # Example
//!
//! ```
//! use malrs_core::codec::{CodecError, Decoder, Encoder};
//! use malrs_core::element::{Element, register_element};
//!
//! #[derive(Debug, Default)]
//! struct Severity {
//!     level: u8,
//! }
//!
//! impl Element for Severity {
//!     fn short_form(&self) -> u64 {
//!         0x0200_0001_0000_0007
//!     }
//!
//!     fn encode(&self, encoder: &mut dyn Encoder) -> Result<(), CodecError> {
//!         encoder.encode_u8(self.level)
//!     }
//!
//!     fn decode(&mut self, decoder: &mut dyn Decoder) -> Result<(), CodecError> {
//!         self.level = decoder.decode_u8()?;
//!         Ok(())
//!     }
//! }
//!
//! register_element(0x0200_0001_0000_0007, || Box::new(Severity::default()))
//!     .expect("first registration");
//! ```

use std::collections::HashMap;
use std::sync::{OnceLock, PoisonError, RwLock};

use crate::codec::{CodecError, Decoder, Encoder};

/// A self-describing MAL data type.
///
/// Implementors encode and decode themselves through the primitive codec
/// interface and name their concrete type with an absolute short form.
pub trait Element: std::fmt::Debug + Send {
    /// The absolute short form uniquely naming this element type.
    fn short_form(&self) -> u64;

    /// Encode this element's fields (the short form itself is written by
    /// [`crate::codec::encode_element`]).
    ///
    /// # Errors
    ///
    /// Propagates encoder failures.
    fn encode(&self, encoder: &mut dyn Encoder) -> Result<(), CodecError>;

    /// Decode this element's fields in place, overwriting the zero value.
    ///
    /// # Errors
    ///
    /// Propagates decoder failures.
    fn decode(&mut self, decoder: &mut dyn Decoder) -> Result<(), CodecError>;
}

/// Nullary constructor returning a fresh, zero-valued element.
pub type ElementConstructor = fn() -> Box<dyn Element>;

fn registry() -> &'static RwLock<HashMap<u64, ElementConstructor>> {
    static REGISTRY: OnceLock<RwLock<HashMap<u64, ElementConstructor>>> = OnceLock::new();
    REGISTRY.get_or_init(|| RwLock::new(HashMap::new()))
}

/// Register the constructor for an element type.
///
/// # Errors
///
/// Returns [`CodecError::DuplicateShortForm`] if the short form is already
/// taken; the existing registration is left untouched.
pub fn register_element(
    short_form: u64,
    constructor: ElementConstructor,
) -> Result<(), CodecError> {
    let mut map = registry().write().unwrap_or_else(PoisonError::into_inner);
    if map.contains_key(&short_form) {
        return Err(CodecError::DuplicateShortForm { short_form });
    }
    map.insert(short_form, constructor);
    Ok(())
}

/// Construct a fresh, zero-valued element for the given short form.
///
/// # Errors
///
/// Returns [`CodecError::UnknownShortForm`] when nothing is registered.
pub fn new_element(short_form: u64) -> Result<Box<dyn Element>, CodecError> {
    let map = registry().read().unwrap_or_else(PoisonError::into_inner);
    match map.get(&short_form) {
        Some(constructor) => Ok(constructor()),
        None => Err(CodecError::UnknownShortForm { short_form }),
    }
}

/// Whether a constructor is registered for the given short form.
pub fn is_registered(short_form: u64) -> bool {
    registry()
        .read()
        .unwrap_or_else(PoisonError::into_inner)
        .contains_key(&short_form)
}
