//! Error types for the consumer
//!
//! `SessionError` covers the connection lifecycle and never reaches item
//! listeners. `ItemError` is what one subscription's listeners see.

use rdm_types::{State, StateCode};
use rssl_transport::TransportError;
use rwf_codec::CodecError;
use thiserror::Error;

/// Result type alias for session operations
pub type Result<T> = std::result::Result<T, SessionError>;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// Undecodable frame; the frame is skipped, the connection survives
    #[error("Decode error: {0}")]
    Codec(#[from] CodecError),

    #[error("Login failed: {reason}")]
    LoginFailed { reason: String, recoverable: bool },

    #[error("Source directory request failed: {reason}")]
    DirectoryFailed { reason: String },

    #[error("Dictionary request failed: {reason}")]
    DictionaryFailed { reason: String },

    #[error("Liveness timeout: nothing received for {timeout_ms}ms")]
    PingTimeout { timeout_ms: u64 },

    /// Response on a stream nobody requested
    #[error("Protocol error on stream {stream_id}: {message}")]
    Protocol { stream_id: i32, message: String },

    #[error("Session request channel closed")]
    ChannelClosed,

    #[error("Recovery requested: {reason}")]
    RecoveryRequested { reason: String },

    /// Reactor thread or runtime could not be created
    #[error("Failed to start session reactor: {0}")]
    Startup(#[from] std::io::Error),
}

impl SessionError {
    /// Whether the reconnect loop may try again after this error
    pub fn is_recoverable(&self) -> bool {
        match self {
            SessionError::LoginFailed { recoverable, .. } => *recoverable,
            SessionError::ChannelClosed | SessionError::Startup(_) => false,
            SessionError::Transport(e) => e.is_retryable(),
            _ => true,
        }
    }
}

/// Item-level failure delivered to the listeners of one subscription
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ItemError {
    /// Unknown source or malformed symbol; raised before any wire traffic
    #[error("Bad symbol: {reason}")]
    BadSymbol { reason: String },

    #[error("Item not found: {text}")]
    NotFound { text: String },

    #[error("Not entitled: {text}")]
    NotEntitled { text: String },

    #[error("Request timed out: {text}")]
    Timeout { text: String },

    /// Another consumer preempted the item
    #[error("Platform error: {text}")]
    Platform { text: String },

    #[error("Stream ids exhausted ({capacity} in use)")]
    StreamsExhausted { capacity: usize },

    #[error("Stream closed ({code:?}): {text}")]
    Closed { code: StateCode, text: String },
}

impl ItemError {
    /// Map a closed stream state onto the item error it represents
    pub fn from_closed_state(state: &State) -> Self {
        let text = state.text.clone();
        match state.code {
            StateCode::NotFound => ItemError::NotFound { text },
            StateCode::NotEntitled => ItemError::NotEntitled { text },
            StateCode::Timeout => ItemError::Timeout { text },
            StateCode::Preempted => ItemError::Platform { text },
            _ if looks_like_not_found(&text) => ItemError::NotFound { text },
            code => ItemError::Closed { code, text },
        }
    }
}

/// Providers that close with a generic code but a "not found" text
fn looks_like_not_found(text: &str) -> bool {
    let lower = text.to_ascii_lowercase();
    lower.contains("not found") || lower.contains("unknown item") || lower.contains("not in cache")
}
