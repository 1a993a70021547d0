//! Transport Error Types
//!
//! Error handling for socket connectivity, RIPC framing and the connect handshake.

use std::net::SocketAddr;
use thiserror::Error;

/// Main transport error type
#[derive(Error, Debug)]
pub enum TransportError {
    /// Socket level failure outside an established session
    #[error("Network error: {message}")]
    Network {
        message: String,
        #[source]
        source: Option<std::io::Error>,
    },

    /// Failure tied to a specific RSSL peer
    #[error("Connection error: {message} (remote: {remote_addr:?})")]
    Connection {
        message: String,
        remote_addr: Option<SocketAddr>,
        #[source]
        source: Option<std::io::Error>,
    },

    /// Malformed RIPC frame or unexpected handshake message
    #[error("Protocol error: {message}")]
    Protocol { message: String },

    /// Server refused the connect request
    #[error("Connection rejected by {remote_addr:?}: {reason}")]
    Rejected {
        reason: String,
        remote_addr: Option<SocketAddr>,
    },

    /// Peer closed the socket
    #[error("Connection closed by peer {remote_addr:?}")]
    Closed { remote_addr: Option<SocketAddr> },

    /// Unusable connect options
    #[error("Configuration error: {message}")]
    Configuration {
        message: String,
        field: Option<String>,
    },

    /// Connect, handshake or ping deadline missed
    #[error("Timeout error: {operation} exceeded {timeout_ms}ms")]
    Timeout { operation: String, timeout_ms: u64 },
}

/// Result type alias for transport operations
pub type Result<T> = std::result::Result<T, TransportError>;

impl TransportError {
    /// Socket failure wrapping the io error that caused it
    pub fn network_with_source(message: impl Into<String>, source: std::io::Error) -> Self {
        Self::Network {
            message: message.into(),
            source: Some(source),
        }
    }

    pub fn connection_with_source(
        message: impl Into<String>,
        remote_addr: Option<SocketAddr>,
        source: std::io::Error,
    ) -> Self {
        Self::Connection {
            message: message.into(),
            remote_addr,
            source: Some(source),
        }
    }

    /// Frame or handshake violation
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol {
            message: message.into(),
        }
    }

    pub fn configuration(message: impl Into<String>, field: Option<&str>) -> Self {
        Self::Configuration {
            message: message.into(),
            field: field.map(|s| s.to_string()),
        }
    }

    pub fn timeout(operation: impl Into<String>, timeout_ms: u64) -> Self {
        Self::Timeout {
            operation: operation.into(),
            timeout_ms,
        }
    }

    /// Whether the reconnect policy should try the next host.
    /// Only bad options are fatal; everything else is a lost connection.
    pub fn is_retryable(&self) -> bool {
        match self {
            TransportError::Network { .. } => true,
            TransportError::Connection { .. } => true,
            TransportError::Timeout { .. } => true,
            TransportError::Closed { .. } => true,
            TransportError::Rejected { .. } => true,
            TransportError::Protocol { .. } => true,
            TransportError::Configuration { .. } => false,
        }
    }

    /// Short label used as the `category` log field
    pub fn category(&self) -> &'static str {
        match self {
            TransportError::Network { .. } => "network",
            TransportError::Connection { .. } => "connection",
            TransportError::Protocol { .. } => "protocol",
            TransportError::Rejected { .. } => "rejected",
            TransportError::Closed { .. } => "closed",
            TransportError::Configuration { .. } => "configuration",
            TransportError::Timeout { .. } => "timeout",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_configuration_errors_are_not_retryable() {
        assert!(!TransportError::configuration("no hosts", Some("hosts")).is_retryable());
        assert!(TransportError::timeout("connect", 500).is_retryable());
        assert_eq!(TransportError::protocol("bad frame").category(), "protocol");
    }

    #[test]
    fn test_peer_close_is_a_retryable_loss() {
        let err = TransportError::Closed { remote_addr: None };
        assert!(err.is_retryable());
        assert_eq!(err.category(), "closed");
        let io = std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset");
        assert_eq!(TransportError::network_with_source("read", io).category(), "network");
    }

    #[test]
    fn test_timeout_message() {
        let err = TransportError::timeout("TCP connect", 2500);
        assert_eq!(err.to_string(), "Timeout error: TCP connect exceeded 2500ms");
    }
}
