//! RSSL Transport
//!
//! Socket layer of the consumer: RIPC framing, the connect handshake that
//! negotiates the ping timeout, and a TCP connection the session reactor
//! drives with readiness events and non-blocking reads and writes.
//!
//! ## Architecture Role
//!
//! ```text
//! services/consumer (reactor) → [rssl-transport] → TCP socket
//!          ↑                         ↓
//!    RWF message bytes         length | flags | payload frames
//! ```
//!
//! This crate knows nothing about RWF message contents; it moves opaque
//! message bytes in and out of frames.

pub mod error;
pub mod framing;
pub mod transports;

pub use error::{Result, TransportError};
pub use framing::{Frame, FrameDecoder, RIPC_VERSION};
pub use transports::{ConnectOptions, ReadBatch, RsslConnection};

/// Default read/write buffer size
pub const DEFAULT_TCP_BUFFER_SIZE: usize = 64 * 1024; // 64KB

/// Default TCP connect timeout
pub const DEFAULT_CONNECTION_TIMEOUT_SECS: u64 = 5;
