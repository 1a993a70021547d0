//! # Message Builder
//!
//! Encodes every RWF message class plus the containers carried inside them.
//! The consumer uses it for requests, closes and posts; the provider-side
//! classes (refresh, status, update, ack) exist for simulators and tests.
//!
//! Presence flags (`HAS_KEY`, `HAS_SEQ`, `HAS_STATE`, `HAS_NAK`, `HAS_TEXT`,
//! `HAS_POST_ID`) are derived from the header contents at encode time, so a
//! builder cannot produce a flag word that disagrees with its header.
//!
//! ```rust
//! use rwf_codec::{MsgBuilder, FieldListBuilder};
//! use rdm_types::{DomainType, FieldValue, MsgKey, DataType};
//!
//! let mut fields = FieldListBuilder::new();
//! fields.add(22, &FieldValue::Int(100)).unwrap();
//! let bytes = MsgBuilder::request(DomainType::MarketPrice, 16, MsgKey::named(1, "IBM.N"))
//!     .with_payload(DataType::FieldList, fields.finish())
//!     .encode()
//!     .unwrap();
//! assert!(bytes.len() > 11);
//! ```

use bytes::{BufMut, Bytes, BytesMut};
use rdm_types::{DataType, DomainType, FieldValue, MapEntryAction, FilterAction, MsgKey, State};

use crate::constants::{key_flags, msg_flags, HAS_SUMMARY};
use crate::error::{CodecError, CodecResult};
use crate::message::MsgHeader;
use crate::primitive::{put_value, value_type};

/// Write `u16 len · bytes`
pub fn put_u16_prefixed(out: &mut BytesMut, data: &[u8], what: &'static str) -> CodecResult<()> {
    let len = u16::try_from(data.len()).map_err(|_| CodecError::TooLarge {
        what,
        size: data.len(),
        limit: u16::MAX as usize,
    })?;
    out.put_u16(len);
    out.put_slice(data);
    Ok(())
}

/// Write `u8 len · bytes`
pub fn put_u8_prefixed(out: &mut BytesMut, data: &[u8], what: &'static str) -> CodecResult<()> {
    let len = u8::try_from(data.len()).map_err(|_| CodecError::TooLarge {
        what,
        size: data.len(),
        limit: u8::MAX as usize,
    })?;
    out.put_u8(len);
    out.put_slice(data);
    Ok(())
}

fn count_u16(count: usize, what: &'static str) -> CodecResult<u16> {
    u16::try_from(count).map_err(|_| CodecError::TooLarge {
        what,
        size: count,
        limit: u16::MAX as usize,
    })
}

pub fn encode_state(out: &mut BytesMut, state: &State) -> CodecResult<()> {
    out.put_u8(state.packed());
    out.put_u8(u8::from(state.code));
    put_u16_prefixed(out, state.text.as_bytes(), "state text")
}

pub fn encode_key(out: &mut BytesMut, key: &MsgKey) -> CodecResult<()> {
    let mut flags = 0u8;
    if key.service_id.is_some() {
        flags |= key_flags::SERVICE_ID;
    }
    if key.name.is_some() {
        flags |= key_flags::NAME;
    }
    if key.name_type.is_some() {
        flags |= key_flags::NAME_TYPE;
    }
    if key.filter.is_some() {
        flags |= key_flags::FILTER;
    }
    if key.identifier.is_some() {
        flags |= key_flags::IDENTIFIER;
    }
    if key.attrib.is_some() {
        flags |= key_flags::ATTRIB;
    }
    out.put_u8(flags);
    if let Some(id) = key.service_id {
        out.put_u16(id);
    }
    if let Some(name) = &key.name {
        put_u8_prefixed(out, name.as_bytes(), "key name")?;
    }
    if let Some(name_type) = key.name_type {
        out.put_u8(name_type);
    }
    if let Some(filter) = key.filter {
        out.put_u32(filter);
    }
    if let Some(identifier) = key.identifier {
        out.put_i32(identifier);
    }
    if let Some((container, attrib)) = &key.attrib {
        out.put_u8(u8::from(*container));
        put_u16_prefixed(out, attrib, "key attrib")?;
    }
    Ok(())
}

/// Fluent builder for one message
#[derive(Debug, Clone)]
pub struct MsgBuilder {
    domain: DomainType,
    stream_id: i32,
    flags: u16,
    container: DataType,
    header: MsgHeader,
    payload: Bytes,
}

impl MsgBuilder {
    pub fn new(domain: DomainType, stream_id: i32, header: MsgHeader) -> Self {
        Self {
            domain,
            stream_id,
            flags: 0,
            container: DataType::NoData,
            header,
            payload: Bytes::new(),
        }
    }

    /// Streaming request at default priority
    pub fn request(domain: DomainType, stream_id: i32, key: MsgKey) -> Self {
        Self::new(
            domain,
            stream_id,
            MsgHeader::Request {
                priority_class: 1,
                priority_count: 1,
                key,
            },
        )
        .with_flags(msg_flags::STREAMING)
    }

    pub fn refresh(domain: DomainType, stream_id: i32, state: State) -> Self {
        Self::new(
            domain,
            stream_id,
            MsgHeader::Refresh {
                state,
                seq: None,
                key: None,
            },
        )
    }

    pub fn status(domain: DomainType, stream_id: i32, state: Option<State>) -> Self {
        Self::new(domain, stream_id, MsgHeader::Status { state, key: None })
    }

    pub fn update(domain: DomainType, stream_id: i32, update_type: u8) -> Self {
        Self::new(
            domain,
            stream_id,
            MsgHeader::Update {
                update_type,
                seq: None,
            },
        )
    }

    pub fn close(domain: DomainType, stream_id: i32) -> Self {
        Self::new(domain, stream_id, MsgHeader::Close)
    }

    pub fn ack(domain: DomainType, stream_id: i32, ack_id: u32) -> Self {
        Self::new(
            domain,
            stream_id,
            MsgHeader::Ack {
                ack_id,
                nak_code: None,
                text: None,
            },
        )
    }

    pub fn post(domain: DomainType, stream_id: i32, user_addr: u32, user_id: u32) -> Self {
        Self::new(
            domain,
            stream_id,
            MsgHeader::Post {
                user_addr,
                user_id,
                post_id: None,
                key: None,
            },
        )
    }

    pub fn with_flags(mut self, flags: u16) -> Self {
        self.flags |= flags;
        self
    }

    pub fn without_flags(mut self, flags: u16) -> Self {
        self.flags &= !flags;
        self
    }

    pub fn with_key(mut self, new_key: MsgKey) -> Self {
        match &mut self.header {
            MsgHeader::Request { key, .. } => *key = new_key,
            MsgHeader::Refresh { key, .. }
            | MsgHeader::Status { key, .. }
            | MsgHeader::Post { key, .. } => *key = Some(new_key),
            _ => {}
        }
        self
    }

    pub fn with_seq(mut self, new_seq: u32) -> Self {
        if let MsgHeader::Refresh { seq, .. } | MsgHeader::Update { seq, .. } = &mut self.header {
            *seq = Some(new_seq);
        }
        self
    }

    pub fn with_post_id(mut self, id: u32) -> Self {
        if let MsgHeader::Post { post_id, .. } = &mut self.header {
            *post_id = Some(id);
        }
        self
    }

    pub fn with_nak(mut self, code: u8, message: impl Into<String>) -> Self {
        if let MsgHeader::Ack { nak_code, text, .. } = &mut self.header {
            *nak_code = Some(code);
            *text = Some(message.into());
        }
        self
    }

    pub fn with_payload(mut self, container: DataType, payload: impl Into<Bytes>) -> Self {
        self.container = container;
        self.payload = payload.into();
        self
    }

    fn effective_flags(&self) -> u16 {
        let presence = msg_flags::HAS_KEY
            | msg_flags::HAS_SEQ
            | msg_flags::HAS_STATE
            | msg_flags::HAS_NAK
            | msg_flags::HAS_TEXT
            | msg_flags::HAS_POST_ID;
        let mut flags = self.flags & !presence;
        match &self.header {
            MsgHeader::Refresh { seq, key, .. } => {
                if seq.is_some() {
                    flags |= msg_flags::HAS_SEQ;
                }
                if key.is_some() {
                    flags |= msg_flags::HAS_KEY;
                }
            }
            MsgHeader::Status { state, key } => {
                if state.is_some() {
                    flags |= msg_flags::HAS_STATE;
                }
                if key.is_some() {
                    flags |= msg_flags::HAS_KEY;
                }
            }
            MsgHeader::Update { seq, .. } => {
                if seq.is_some() {
                    flags |= msg_flags::HAS_SEQ;
                }
            }
            MsgHeader::Ack { nak_code, text, .. } => {
                if nak_code.is_some() {
                    flags |= msg_flags::HAS_NAK;
                }
                if text.is_some() {
                    flags |= msg_flags::HAS_TEXT;
                }
            }
            MsgHeader::Post { post_id, key, .. } => {
                if post_id.is_some() {
                    flags |= msg_flags::HAS_POST_ID;
                }
                if key.is_some() {
                    flags |= msg_flags::HAS_KEY;
                }
            }
            MsgHeader::Request { .. } => flags |= msg_flags::HAS_KEY,
            MsgHeader::Close | MsgHeader::Generic => {}
        }
        flags
    }

    /// Append the encoded message to `out`
    pub fn encode_into(&self, out: &mut BytesMut) -> CodecResult<()> {
        let start = out.len();
        out.put_u16(0);
        out.put_u8(u8::from(self.header.class()));
        out.put_u8(u8::from(self.domain));
        out.put_i32(self.stream_id);
        out.put_u16(self.effective_flags());
        out.put_u8(u8::from(self.container));

        match &self.header {
            MsgHeader::Request {
                priority_class,
                priority_count,
                key,
            } => {
                out.put_u8(*priority_class);
                out.put_u16(*priority_count);
                encode_key(out, key)?;
            }
            MsgHeader::Refresh { state, seq, key } => {
                encode_state(out, state)?;
                if let Some(seq) = seq {
                    out.put_u32(*seq);
                }
                if let Some(key) = key {
                    encode_key(out, key)?;
                }
            }
            MsgHeader::Status { state, key } => {
                if let Some(state) = state {
                    encode_state(out, state)?;
                }
                if let Some(key) = key {
                    encode_key(out, key)?;
                }
            }
            MsgHeader::Update { update_type, seq } => {
                out.put_u8(*update_type);
                if let Some(seq) = seq {
                    out.put_u32(*seq);
                }
            }
            MsgHeader::Close | MsgHeader::Generic => {}
            MsgHeader::Ack {
                ack_id,
                nak_code,
                text,
            } => {
                out.put_u32(*ack_id);
                if let Some(code) = nak_code {
                    out.put_u8(*code);
                }
                if let Some(text) = text {
                    put_u16_prefixed(out, text.as_bytes(), "ack text")?;
                }
            }
            MsgHeader::Post {
                user_addr,
                user_id,
                post_id,
                key,
            } => {
                out.put_u32(*user_addr);
                out.put_u32(*user_id);
                if let Some(id) = post_id {
                    out.put_u32(*id);
                }
                if let Some(key) = key {
                    encode_key(out, key)?;
                }
            }
        }

        let header_len = count_u16(out.len() - start - 2, "message header")?;
        out[start..start + 2].copy_from_slice(&header_len.to_be_bytes());
        out.put_slice(&self.payload);
        Ok(())
    }

    pub fn encode(&self) -> CodecResult<Bytes> {
        let mut out = BytesMut::with_capacity(64 + self.payload.len());
        self.encode_into(&mut out)?;
        Ok(out.freeze())
    }
}

#[derive(Debug, Default)]
pub struct FieldListBuilder {
    buf: BytesMut,
    count: usize,
}

impl FieldListBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, fid: i16, value: &FieldValue) -> CodecResult<&mut Self> {
        let mut scratch = BytesMut::new();
        put_value(&mut scratch, value)?;
        self.add_raw(fid, &scratch)
    }

    pub fn add_raw(&mut self, fid: i16, data: &[u8]) -> CodecResult<&mut Self> {
        self.buf.put_i16(fid);
        put_u16_prefixed(&mut self.buf, data, "field value")?;
        self.count += 1;
        Ok(self)
    }

    pub fn finish(&self) -> Bytes {
        let mut out = BytesMut::with_capacity(2 + self.buf.len());
        out.put_u16(self.count.min(u16::MAX as usize) as u16);
        out.put_slice(&self.buf);
        out.freeze()
    }
}

#[derive(Debug, Default)]
pub struct ElementListBuilder {
    buf: BytesMut,
    count: usize,
}

impl ElementListBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, name: &str, value: &FieldValue) -> CodecResult<&mut Self> {
        let mut scratch = BytesMut::new();
        put_value(&mut scratch, value)?;
        self.add_raw(name, value_type(value), &scratch)
    }

    pub fn add_raw(&mut self, name: &str, data_type: DataType, data: &[u8]) -> CodecResult<&mut Self> {
        put_u8_prefixed(&mut self.buf, name.as_bytes(), "element name")?;
        self.buf.put_u8(u8::from(data_type));
        put_u16_prefixed(&mut self.buf, data, "element value")?;
        self.count += 1;
        Ok(self)
    }

    pub fn finish(&self) -> Bytes {
        let mut out = BytesMut::with_capacity(2 + self.buf.len());
        out.put_u16(self.count.min(u16::MAX as usize) as u16);
        out.put_slice(&self.buf);
        out.freeze()
    }
}

#[derive(Debug)]
pub struct MapBuilder {
    key_type: DataType,
    entry_container: DataType,
    summary: Option<Bytes>,
    buf: BytesMut,
    count: usize,
}

impl MapBuilder {
    pub fn new(key_type: DataType, entry_container: DataType) -> Self {
        Self {
            key_type,
            entry_container,
            summary: None,
            buf: BytesMut::new(),
            count: 0,
        }
    }

    pub fn summary(&mut self, summary: impl Into<Bytes>) -> &mut Self {
        self.summary = Some(summary.into());
        self
    }

    /// Payload is ignored for Delete entries
    pub fn add(&mut self, action: MapEntryAction, key: &[u8], payload: &[u8]) -> CodecResult<&mut Self> {
        self.buf.put_u8(u8::from(action));
        put_u16_prefixed(&mut self.buf, key, "map entry key")?;
        if action != MapEntryAction::Delete {
            put_u16_prefixed(&mut self.buf, payload, "map entry payload")?;
        }
        self.count += 1;
        Ok(self)
    }

    pub fn finish(&self) -> CodecResult<Bytes> {
        let mut out = BytesMut::with_capacity(8 + self.buf.len());
        out.put_u8(if self.summary.is_some() { HAS_SUMMARY } else { 0 });
        out.put_u8(u8::from(self.key_type));
        out.put_u8(u8::from(self.entry_container));
        if let Some(summary) = &self.summary {
            put_u16_prefixed(&mut out, summary, "map summary")?;
        }
        out.put_u16(count_u16(self.count, "map entry count")?);
        out.put_slice(&self.buf);
        Ok(out.freeze())
    }
}

#[derive(Debug)]
pub struct FilterListBuilder {
    container: DataType,
    buf: BytesMut,
    count: usize,
}

impl FilterListBuilder {
    pub fn new(container: DataType) -> Self {
        Self {
            container,
            buf: BytesMut::new(),
            count: 0,
        }
    }

    pub fn add(&mut self, id: u8, action: FilterAction, payload: &[u8]) -> CodecResult<&mut Self> {
        self.buf.put_u8(id);
        self.buf.put_u8(u8::from(action));
        if action != FilterAction::Clear {
            put_u16_prefixed(&mut self.buf, payload, "filter entry payload")?;
        }
        self.count += 1;
        Ok(self)
    }

    pub fn finish(&self) -> CodecResult<Bytes> {
        let mut out = BytesMut::with_capacity(3 + self.buf.len());
        out.put_u8(u8::from(self.container));
        out.put_u16(count_u16(self.count, "filter entry count")?);
        out.put_slice(&self.buf);
        Ok(out.freeze())
    }
}

#[derive(Debug)]
pub struct SeriesBuilder {
    entry_container: DataType,
    summary: Option<Bytes>,
    buf: BytesMut,
    count: usize,
}

impl SeriesBuilder {
    pub fn new(entry_container: DataType) -> Self {
        Self {
            entry_container,
            summary: None,
            buf: BytesMut::new(),
            count: 0,
        }
    }

    pub fn summary(&mut self, summary: impl Into<Bytes>) -> &mut Self {
        self.summary = Some(summary.into());
        self
    }

    pub fn add(&mut self, payload: &[u8]) -> CodecResult<&mut Self> {
        put_u16_prefixed(&mut self.buf, payload, "series entry")?;
        self.count += 1;
        Ok(self)
    }

    pub fn finish(&self) -> CodecResult<Bytes> {
        let mut out = BytesMut::with_capacity(6 + self.buf.len());
        out.put_u8(if self.summary.is_some() { HAS_SUMMARY } else { 0 });
        out.put_u8(u8::from(self.entry_container));
        if let Some(summary) = &self.summary {
            put_u16_prefixed(&mut out, summary, "series summary")?;
        }
        out.put_u16(count_u16(self.count, "series entry count")?);
        out.put_slice(&self.buf);
        Ok(out.freeze())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::decode_msg;

    #[test]
    fn test_presence_flags_follow_header() {
        let bytes = MsgBuilder::update(DomainType::MarketPrice, 20, 1)
            .with_flags(msg_flags::HAS_KEY)
            .with_seq(3)
            .encode()
            .unwrap();
        let msg = decode_msg(&bytes).unwrap();
        assert_eq!(msg.flags & msg_flags::HAS_KEY, 0);
        assert_ne!(msg.flags & msg_flags::HAS_SEQ, 0);
    }

    #[test]
    fn test_header_len_covers_class_header() {
        let bytes = MsgBuilder::close(DomainType::MarketByPrice, 17).encode().unwrap();
        assert_eq!(&bytes[..2], &[0x00, 0x09]);
        assert_eq!(bytes.len(), 11);
    }

    #[test]
    fn test_oversized_key_name_rejected() {
        let name = "X".repeat(300);
        let err = MsgBuilder::request(DomainType::MarketPrice, 16, MsgKey::named(1, name))
            .encode()
            .unwrap_err();
        assert!(matches!(err, CodecError::TooLarge { what: "key name", .. }));
    }
}
