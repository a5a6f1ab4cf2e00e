//! JSON codec for wire payloads.
//!
//! This module provides the single place where serde_json is invoked for
//! wire traffic, so encoding configuration and error handling stay
//! consistent across the codebase. Malformed inbound text is a protocol
//! error: it is reported to the caller, logged, and dropped, never panicked
//! on.

use serde::Serialize;
use std::fmt;

/// Errors that can occur during encoding or decoding.
///
/// Error messages are `String`s because serde_json errors are opaque; the
/// formatted message preserves the diagnostic detail (line/column, expected
/// token) that would otherwise be lost. Codec errors are exceptional
/// conditions, not hot-path operations.
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum CodecError {
    /// The encoding operation failed.
    Encode {
        /// The underlying serde_json error message.
        message: String,
    },
    /// The decoding operation failed.
    Decode {
        /// The underlying serde_json error message.
        message: String,
    },
}

impl fmt::Display for CodecError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CodecError::Encode { message } => write!(f, "JSON encode error: {message}"),
            CodecError::Decode { message } => write!(f, "JSON decode error: {message}"),
        }
    }
}

impl std::error::Error for CodecError {}

/// Encodes any serializable payload into a JSON value ready for publishing.
pub(crate) fn encode<T: Serialize>(payload: &T) -> Result<serde_json::Value, CodecError> {
    serde_json::to_value(payload).map_err(|e| CodecError::Encode {
        message: e.to_string(),
    })
}

/// Decodes one inbound message body.
pub(crate) fn decode_str(text: &str) -> Result<serde_json::Value, CodecError> {
    serde_json::from_str(text).map_err(|e| CodecError::Decode {
        message: e.to_string(),
    })
}
