//! Payload type descriptors and the canonical JSON codec.
//!
//! Every message crossing the broker is encoded with `serde_json`. The
//! payload type of a handler is captured statically at registration time as
//! a [`PayloadType`], so no runtime reflection is needed to decode.

use std::fmt;

use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::{Serialize, Serializer};

/// Static description of a handler's payload type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PayloadType {
    type_name: &'static str,
}

impl PayloadType {
    /// Captures the payload type `T`.
    #[must_use]
    pub fn of<T: ?Sized>() -> Self {
        Self {
            type_name: std::any::type_name::<T>(),
        }
    }

    /// Fully qualified type name, e.g. `my_app::Order`.
    #[must_use]
    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    /// Unqualified type name, e.g. `Order`.
    #[must_use]
    pub fn short_name(&self) -> &'static str {
        let base = self.type_name.split('<').next().unwrap_or(self.type_name);
        base.rsplit("::").next().unwrap_or(base)
    }
}

impl fmt::Display for PayloadType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.type_name)
    }
}

impl Serialize for PayloadType {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.type_name)
    }
}

/// Errors from encoding or decoding a payload.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("failed to encode {payload_type}: {source}")]
    Encode {
        payload_type: PayloadType,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to decode {payload_type}: {source}")]
    Decode {
        payload_type: PayloadType,
        #[source]
        source: serde_json::Error,
    },
}

/// Encodes `value` as UTF-8 JSON.
///
/// # Errors
///
/// Returns [`CodecError::Encode`] if `value` cannot be represented as JSON
/// (e.g. a map with non-string keys).
pub fn encode<T: Serialize>(value: &T) -> Result<Bytes, CodecError> {
    serde_json::to_vec(value)
        .map(Bytes::from)
        .map_err(|source| CodecError::Encode {
            payload_type: PayloadType::of::<T>(),
            source,
        })
}

/// Decodes JSON bytes into `T`.
///
/// # Errors
///
/// Returns [`CodecError::Decode`] if the bytes are not valid JSON for `T`.
pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, CodecError> {
    serde_json::from_slice(bytes).map_err(|source| CodecError::Decode {
        payload_type: PayloadType::of::<T>(),
        source,
    })
}
