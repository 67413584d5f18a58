//! # Codec Registry
//!
//! Maps the `encoding` of a [`crate::crd::DatasourceRef`] to a decoder that
//! turns the string stored in the backend into the raw bytes written to the
//! Kubernetes Secret.
//!
//! Built-in encodings:
//! - `""` - identity, the UTF-8 bytes of the stored string
//! - `"base64"` - standard base64 with padding
//!
//! New encodings are added with [`CodecRegistry::register`]; callers only
//! ever go through [`CodecRegistry::decode`].

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use base64::{engine::general_purpose, Engine as _};
use thiserror::Error;

/// Encoding name of the identity codec
pub const IDENTITY: &str = "";

/// Encoding name of the standard base64 codec
pub const BASE64: &str = "base64";

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("[EncodingNotImplemented] encoding {0} not supported")]
    EncodingNotImplemented(String),

    #[error("unable to decode {encoding} data: {source}")]
    Decode {
        encoding: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
}

/// Turns a backend value into raw bytes
pub trait Decoder: Send + Sync {
    /// # Errors
    ///
    /// Returns an error when `input` is not valid for this encoding.
    fn decode(&self, input: &str) -> Result<Vec<u8>, Box<dyn std::error::Error + Send + Sync>>;
}

/// Pass-through decoder
#[derive(Debug, Clone, Copy, Default)]
pub struct IdentityDecoder;

impl Decoder for IdentityDecoder {
    fn decode(&self, input: &str) -> Result<Vec<u8>, Box<dyn std::error::Error + Send + Sync>> {
        Ok(input.as_bytes().to_vec())
    }
}

/// Standard alphabet base64 decoder
#[derive(Debug, Clone, Copy, Default)]
pub struct Base64Decoder;

impl Decoder for Base64Decoder {
    fn decode(&self, input: &str) -> Result<Vec<u8>, Box<dyn std::error::Error + Send + Sync>> {
        Ok(general_purpose::STANDARD.decode(input)?)
    }
}

/// Lookup table from encoding name to decoder
#[derive(Clone)]
pub struct CodecRegistry {
    decoders: HashMap<String, Arc<dyn Decoder>>,
}

impl fmt::Debug for CodecRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<&str> = self.decoders.keys().map(String::as_str).collect();
        names.sort_unstable();
        f.debug_struct("CodecRegistry")
            .field("encodings", &names)
            .finish()
    }
}

impl Default for CodecRegistry {
    fn default() -> Self {
        let mut registry = Self::empty();
        registry.register(IDENTITY, IdentityDecoder);
        registry.register(BASE64, Base64Decoder);
        registry
    }
}

impl CodecRegistry {
    /// Registry without any codec, not even identity
    #[must_use]
    pub fn empty() -> Self {
        Self {
            decoders: HashMap::new(),
        }
    }

    /// Add or replace the decoder for `encoding`
    pub fn register(&mut self, encoding: impl Into<String>, decoder: impl Decoder + 'static) {
        self.decoders.insert(encoding.into(), Arc::new(decoder));
    }

    /// Decode `input` with the codec registered for `encoding`
    ///
    /// # Errors
    ///
    /// [`CodecError::EncodingNotImplemented`] for an unknown encoding,
    /// [`CodecError::Decode`] when the payload is malformed.
    pub fn decode(&self, encoding: &str, input: &str) -> Result<Vec<u8>, CodecError> {
        let decoder = self
            .decoders
            .get(encoding)
            .ok_or_else(|| CodecError::EncodingNotImplemented(encoding.to_string()))?;

        decoder.decode(input).map_err(|source| CodecError::Decode {
            encoding: encoding.to_string(),
            source,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_passes_bytes_through() {
        let registry = CodecRegistry::default();
        assert_eq!(
            registry.decode("", "fake-content").unwrap(),
            b"fake-content".to_vec()
        );
    }

    #[test]
    fn test_base64_decodes() {
        let registry = CodecRegistry::default();
        assert_eq!(
            registry.decode("base64", "aGVsbG8gd29ybGQ=").unwrap(),
            b"hello world".to_vec()
        );
    }

    #[test]
    fn test_malformed_base64() {
        let registry = CodecRegistry::default();
        let err = registry
            .decode("base64", "this is not base64!!")
            .unwrap_err();
        assert!(matches!(err, CodecError::Decode { ref encoding, .. } if encoding == "base64"));
    }

    #[test]
    fn test_unknown_encoding() {
        let registry = CodecRegistry::default();
        let err = registry.decode("base65", "anything").unwrap_err();
        assert!(matches!(err, CodecError::EncodingNotImplemented(ref name) if name == "base65"));
        assert_eq!(
            err.to_string(),
            "[EncodingNotImplemented] encoding base65 not supported"
        );
    }

    #[test]
    fn test_register_custom_codec() {
        struct Reverse;
        impl Decoder for Reverse {
            fn decode(
                &self,
                input: &str,
            ) -> Result<Vec<u8>, Box<dyn std::error::Error + Send + Sync>> {
                Ok(input.bytes().rev().collect())
            }
        }

        let mut registry = CodecRegistry::default();
        assert!(registry.decode("reverse", "abc").is_err());
        registry.register("reverse", Reverse);
        assert_eq!(registry.decode("reverse", "abc").unwrap(), b"cba".to_vec());
    }

    #[test]
    fn test_empty_registry_has_no_identity() {
        let registry = CodecRegistry::empty();
        assert!(matches!(
            registry.decode("", "x"),
            Err(CodecError::EncodingNotImplemented(_))
        ));
    }
}
