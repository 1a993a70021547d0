//! Caller-visible events: item messages, item status and quality, and
//! connection lifecycle events.

use std::fmt;
use std::sync::Arc;

use crate::book::BookMessage;
use crate::fields::FieldSet;

/// Source + symbol identity of one logical item
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ItemKey {
    pub source: Arc<str>,
    pub symbol: Arc<str>,
}

impl ItemKey {
    pub fn new(source: &str, symbol: &str) -> Self {
        Self {
            source: Arc::from(source),
            symbol: Arc::from(symbol),
        }
    }
}

impl fmt::Display for ItemKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.source, self.symbol)
    }
}

/// How a delivered message relates to the item's image
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageType {
    /// First image, sent to the listener that asked for it
    Initial,
    /// Image re-sent to existing listeners when another listener refreshes
    Recap,
    Update,
    /// State-only message; carries sequence zero
    Status,
    BookInitial,
    BookRecap,
    BookUpdate,
}

impl MessageType {
    /// Book flavour of an image/update type
    pub fn for_book(self) -> Self {
        match self {
            MessageType::Initial => MessageType::BookInitial,
            MessageType::Recap => MessageType::BookRecap,
            MessageType::Update => MessageType::BookUpdate,
            other => other,
        }
    }

    pub fn is_image(self) -> bool {
        matches!(
            self,
            MessageType::Initial
                | MessageType::Recap
                | MessageType::BookInitial
                | MessageType::BookRecap
        )
    }

    /// Whether the message consumes a data sequence number
    pub fn is_sequenced(self) -> bool {
        self != MessageType::Status
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Quality {
    Ok,
    Stale,
}

/// Status delivered to item listeners
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemStatus {
    /// Data is flowing and current
    Live,
    /// Last known data may be out of date
    Stale,
    /// A snapshot request was answered; no further messages follow
    SnapshotComplete,
}

/// Payload of a delivered message
#[derive(Debug, Clone, PartialEq)]
pub enum ItemData {
    Fields(FieldSet),
    Book(BookMessage),
    Empty,
}

/// One message delivered to item listeners
#[derive(Debug, Clone, PartialEq)]
pub struct ItemMessage {
    pub key: ItemKey,
    /// Per-subscription sequence, zero for status messages
    pub seq: u32,
    pub msg_type: MessageType,
    pub data: ItemData,
}

/// Session lifecycle events
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEvent {
    /// First time the session reached Live
    Complete,
    /// Live again after a recovery; items have been re-requested
    Reconnected,
    /// Transport lost while Live; recovery begins
    Lost { reason: String },
    ConnectionFailed { host: String, reason: String },
    LoginFailed { reason: String, recoverable: bool },
    DirectoryFailed { reason: String },
    DictionaryFailed { reason: String },
    /// The session stopped for good
    Stopped,
}

impl fmt::Display for ConnectionEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionEvent::Complete => f.write_str("connection complete"),
            ConnectionEvent::Reconnected => f.write_str("connection reconnected"),
            ConnectionEvent::Lost { reason } => write!(f, "connection lost: {}", reason),
            ConnectionEvent::ConnectionFailed { host, reason } => {
                write!(f, "connection to {} failed: {}", host, reason)
            }
            ConnectionEvent::LoginFailed { reason, recoverable } => {
                write!(f, "login failed ({}): {}", if *recoverable { "recoverable" } else { "terminal" }, reason)
            }
            ConnectionEvent::DirectoryFailed { reason } => {
                write!(f, "source directory failed: {}", reason)
            }
            ConnectionEvent::DictionaryFailed { reason } => {
                write!(f, "dictionary failed: {}", reason)
            }
            ConnectionEvent::Stopped => f.write_str("session stopped"),
        }
    }
}
