//! # RIPC Framing
//!
//! Frame layout on the socket:
//!
//! ```text
//! u16 length (whole frame, header included) | u8 flags | payload
//! ```
//!
//! | Flags  | Payload                                      |
//! |--------|----------------------------------------------|
//! | `0x02` | one RWF message; empty payload is a ping     |
//! | `0x12` | packed: repeated `u16 len · message`         |
//! | `0x40` | connect request: `u8 version · u16 ping (s)` |
//! | `0x41` | connect ack: `u8 version · u16 ping (s)`     |
//! | `0x42` | connect nak: `u16 len · text`                |
//!
//! `FrameDecoder` is incremental: it consumes whole frames from the front of a
//! read buffer and leaves partial frames in place for the next read.

use byteorder::{BigEndian, ByteOrder};
use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{Result, TransportError};

/// Frame header size: length(2) + flags(1)
pub const FRAME_HEADER_SIZE: usize = 3;

/// RIPC major version spoken by this transport
pub const RIPC_VERSION: u8 = 14;

/// Largest frame the `u16` length can describe
pub const MAX_FRAME_SIZE: usize = u16::MAX as usize;

pub mod flags {
    pub const DATA: u8 = 0x02;
    pub const PACKED: u8 = 0x10;
    pub const CONNECT_REQ: u8 = 0x40;
    pub const CONNECT_ACK: u8 = 0x41;
    pub const CONNECT_NAK: u8 = 0x42;
}

/// One decoded transport frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// Empty data frame
    Ping,
    /// Data frame carrying one or more RWF messages
    Data(Vec<Bytes>),
    ConnectRequest { version: u8, ping_timeout: u16 },
    ConnectAck { version: u8, ping_timeout: u16 },
    ConnectNak { reason: String },
}

/// Incremental frame decoder over a growable read buffer
#[derive(Debug, Clone)]
pub struct FrameDecoder {
    max_frame_size: usize,
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new(MAX_FRAME_SIZE)
    }
}

impl FrameDecoder {
    pub fn new(max_frame_size: usize) -> Self {
        Self {
            max_frame_size: max_frame_size.clamp(FRAME_HEADER_SIZE, MAX_FRAME_SIZE),
        }
    }

    /// Take the next complete frame off the front of `buf`
    ///
    /// Returns `Ok(None)` when `buf` holds only part of a frame.
    pub fn decode(&self, buf: &mut BytesMut) -> Result<Option<Frame>> {
        if buf.len() < FRAME_HEADER_SIZE {
            return Ok(None);
        }
        let length = BigEndian::read_u16(&buf[..2]) as usize;
        if length < FRAME_HEADER_SIZE {
            return Err(TransportError::protocol(format!(
                "frame length {} shorter than header",
                length
            )));
        }
        if length > self.max_frame_size {
            return Err(TransportError::protocol(format!(
                "frame length {} exceeds maximum {}",
                length, self.max_frame_size
            )));
        }
        if buf.len() < length {
            return Ok(None);
        }

        let mut frame = buf.split_to(length).freeze();
        frame.advance(2);
        let frame_flags = frame.get_u8();
        parse_frame(frame_flags, frame).map(Some)
    }
}

fn parse_frame(frame_flags: u8, mut payload: Bytes) -> Result<Frame> {
    match frame_flags {
        f if f & flags::CONNECT_REQ == flags::CONNECT_REQ => {
            match f {
                flags::CONNECT_REQ | flags::CONNECT_ACK => {
                    if payload.len() < 3 {
                        return Err(TransportError::protocol("connect frame too short"));
                    }
                    let version = payload.get_u8();
                    let ping_timeout = payload.get_u16();
                    Ok(if f == flags::CONNECT_REQ {
                        Frame::ConnectRequest {
                            version,
                            ping_timeout,
                        }
                    } else {
                        Frame::ConnectAck {
                            version,
                            ping_timeout,
                        }
                    })
                }
                flags::CONNECT_NAK => {
                    let reason = if payload.len() >= 2 {
                        let len = (payload.get_u16() as usize).min(payload.len());
                        String::from_utf8_lossy(&payload[..len]).into_owned()
                    } else {
                        String::new()
                    };
                    Ok(Frame::ConnectNak { reason })
                }
                other => Err(TransportError::protocol(format!(
                    "unknown connect frame flags {:#04x}",
                    other
                ))),
            }
        }
        f if f & flags::DATA != 0 => {
            if f & flags::PACKED != 0 {
                Ok(Frame::Data(split_packed(payload)?))
            } else if payload.is_empty() {
                Ok(Frame::Ping)
            } else {
                Ok(Frame::Data(vec![payload]))
            }
        }
        other => Err(TransportError::protocol(format!(
            "unknown frame flags {:#04x}",
            other
        ))),
    }
}

/// Split a packed payload into its messages
pub fn split_packed(mut payload: Bytes) -> Result<Vec<Bytes>> {
    let mut messages = Vec::new();
    while payload.has_remaining() {
        if payload.len() < 2 {
            return Err(TransportError::protocol("packed frame has a dangling length byte"));
        }
        let len = payload.get_u16() as usize;
        if len > payload.len() {
            return Err(TransportError::protocol(format!(
                "packed message length {} exceeds remaining {}",
                len,
                payload.len()
            )));
        }
        if len > 0 {
            messages.push(payload.split_to(len));
        }
    }
    Ok(messages)
}

fn frame_length(payload_len: usize) -> Result<u16> {
    u16::try_from(payload_len + FRAME_HEADER_SIZE).map_err(|_| {
        TransportError::protocol(format!(
            "payload of {} bytes does not fit one frame",
            payload_len
        ))
    })
}

pub fn encode_data(out: &mut BytesMut, message: &[u8]) -> Result<()> {
    out.put_u16(frame_length(message.len())?);
    out.put_u8(flags::DATA);
    out.put_slice(message);
    Ok(())
}

pub fn encode_packed(out: &mut BytesMut, messages: &[Bytes]) -> Result<()> {
    let payload_len: usize = messages.iter().map(|m| 2 + m.len()).sum();
    out.put_u16(frame_length(payload_len)?);
    out.put_u8(flags::DATA | flags::PACKED);
    for message in messages {
        out.put_u16(message.len() as u16);
        out.put_slice(message);
    }
    Ok(())
}

pub fn encode_ping(out: &mut BytesMut) {
    out.put_u16(FRAME_HEADER_SIZE as u16);
    out.put_u8(flags::DATA);
}

pub fn encode_connect_request(out: &mut BytesMut, ping_timeout: u16) {
    out.put_u16((FRAME_HEADER_SIZE + 3) as u16);
    out.put_u8(flags::CONNECT_REQ);
    out.put_u8(RIPC_VERSION);
    out.put_u16(ping_timeout);
}

pub fn encode_connect_ack(out: &mut BytesMut, ping_timeout: u16) {
    out.put_u16((FRAME_HEADER_SIZE + 3) as u16);
    out.put_u8(flags::CONNECT_ACK);
    out.put_u8(RIPC_VERSION);
    out.put_u16(ping_timeout);
}

pub fn encode_connect_nak(out: &mut BytesMut, reason: &str) {
    let text = &reason.as_bytes()[..reason.len().min(MAX_FRAME_SIZE - FRAME_HEADER_SIZE - 2)];
    out.put_u16((FRAME_HEADER_SIZE + 2 + text.len()) as u16);
    out.put_u8(flags::CONNECT_NAK);
    out.put_u16(text.len() as u16);
    out.put_slice(text);
}
