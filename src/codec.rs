//! Payload codec
//!
//! Encoding and decoding of opaque cache payloads.
//!
//! The engine is generic over a [`PayloadCodec`]; [`BincodeCodec`] is the
//! default. A codec must distinguish values that can *never* be encoded
//! ([`CodecError::Unsupported`], which excludes the entry from caching) from
//! transient or data-dependent failures.

use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;

/// Errors raised while encoding or decoding payloads
#[derive(Debug, Error)]
pub enum CodecError {
    /// The value's type cannot be represented by this codec
    #[error("unsupported payload: {0}")]
    Unsupported(String),

    /// Encoding failed for another reason
    #[error("encode failed: {0}")]
    Encode(String),

    /// Stored bytes could not be turned back into a value
    #[error("decode failed: {0}")]
    Decode(String),
}

/// Pluggable payload serialization
pub trait PayloadCodec: Send + Sync {
    /// Encode a value to bytes
    fn encode<V: Serialize + ?Sized>(&self, value: &V) -> Result<Vec<u8>, CodecError>;

    /// Decode bytes produced by [`PayloadCodec::encode`]
    fn decode<V: DeserializeOwned>(&self, bytes: &[u8]) -> Result<V, CodecError>;
}

/// Compact binary codec backed by bincode
#[derive(Debug, Clone, Copy, Default)]
pub struct BincodeCodec;

impl PayloadCodec for BincodeCodec {
    fn encode<V: Serialize + ?Sized>(&self, value: &V) -> Result<Vec<u8>, CodecError> {
        bincode::serialize(value).map_err(|e| match *e {
            // Serialize impls refusing the format, or unsized sequences
            bincode::ErrorKind::Custom(msg) => CodecError::Unsupported(msg),
            bincode::ErrorKind::SequenceMustHaveLength => {
                CodecError::Unsupported("sequence must have a known length".to_string())
            }
            other => CodecError::Encode(other.to_string()),
        })
    }

    fn decode<V: DeserializeOwned>(&self, bytes: &[u8]) -> Result<V, CodecError> {
        bincode::deserialize(bytes).map_err(|e| CodecError::Decode(e.to_string()))
    }
}
