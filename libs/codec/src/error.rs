//! Codec-level errors for RWF message processing
//!
//! Each error variant carries the offset and context of the failing read so a
//! log line is enough to locate the problem in a captured frame.

use thiserror::Error;

/// RWF decoding and encoding errors with diagnostic context
#[derive(Debug, Error, Clone, PartialEq)]
pub enum CodecError {
    /// Buffer is too small to contain the expected structure
    #[error("Message too small: need {need} bytes, got {got} (context: {context})")]
    MessageTooSmall {
        need: usize,
        got: usize,
        context: String,
    },

    /// A length prefix points past the end of its enclosing buffer
    #[error("Truncated {context}: declared {declared} bytes at offset {offset}, {available} available (action: {suggested_action})")]
    Truncated {
        context: String,
        declared: usize,
        available: usize,
        offset: usize,
        suggested_action: String,
    },

    /// Message class byte is not a known class
    #[error("Unknown message class {class}: valid classes are 1-8")]
    UnknownMsgClass { class: u8 },

    /// Enumerated byte outside its registry
    #[error("Invalid {field} value {value} at offset {offset}")]
    InvalidEnum {
        field: &'static str,
        value: u8,
        offset: usize,
    },

    /// Primitive or container type the decoder does not handle here
    #[error("Unsupported data type {data_type} for {context}")]
    UnsupportedType { data_type: u8, context: String },

    /// Primitive encoded with a length its type does not allow
    #[error("Invalid {type_name} length {len}: {expected}")]
    InvalidPrimitiveLength {
        type_name: &'static str,
        len: usize,
        expected: &'static str,
    },

    /// Payload contents violate the structure declared for them
    #[error("Invalid payload at offset {offset}: {description} (buffer: {buffer_size} bytes)")]
    InvalidPayload {
        offset: usize,
        description: String,
        buffer_size: usize,
    },

    /// Encoded value does not fit its wire length prefix
    #[error("{what} too large: {size} bytes exceeds limit {limit}")]
    TooLarge {
        what: &'static str,
        size: usize,
        limit: usize,
    },
}

impl CodecError {
    pub fn message_too_small(need: usize, got: usize, context: impl Into<String>) -> Self {
        Self::MessageTooSmall {
            need,
            got,
            context: context.into(),
        }
    }

    /// Truncation error with a hint derived from how far off the length is
    pub fn truncated(
        context: impl Into<String>,
        declared: usize,
        available: usize,
        offset: usize,
    ) -> Self {
        let suggested_action = if available == 0 {
            "check message framing"
        } else if declared > available * 2 {
            "likely corrupted length field"
        } else {
            "incomplete message - check packed frame splitting"
        };

        Self::Truncated {
            context: context.into(),
            declared,
            available,
            offset,
            suggested_action: suggested_action.to_string(),
        }
    }

    pub fn invalid_enum(field: &'static str, value: u8, offset: usize) -> Self {
        Self::InvalidEnum {
            field,
            value,
            offset,
        }
    }

    pub fn unsupported_type(data_type: impl Into<u8>, context: impl Into<String>) -> Self {
        Self::UnsupportedType {
            data_type: data_type.into(),
            context: context.into(),
        }
    }

    pub fn invalid_payload(
        offset: usize,
        description: impl Into<String>,
        buffer_size: usize,
    ) -> Self {
        Self::InvalidPayload {
            offset,
            description: description.into(),
            buffer_size,
        }
    }
}

/// Result type for codec operations
pub type CodecResult<T> = std::result::Result<T, CodecError>;

/// Hex preview of the first bytes of a buffer for diagnostics
pub fn hex_preview(data: &[u8]) -> String {
    const PREVIEW: usize = 32;
    if data.len() > PREVIEW {
        format!("{}... ({} bytes)", hex::encode(&data[..PREVIEW]), data.len())
    } else {
        hex::encode(data)
    }
}
