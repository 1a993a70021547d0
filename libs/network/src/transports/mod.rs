//! Socket Transports
//!
//! RSSL runs over a single TCP socket per session. Connection setup and
//! non-blocking I/O live in [`tcp`]; framing rules live in [`crate::framing`].

pub mod tcp;

#[cfg(test)]
mod tests;

pub use tcp::{ConnectOptions, ReadBatch, RsslConnection};
