//! # RWF Message Parser
//!
//! Decodes the message base and class-specific header of one RWF message.
//! The container payload is returned as a borrowed slice; the header is
//! materialized (state text and key names are small owned values).
//!
//! ## Layout
//!
//! ```text
//! u16 header_len | class | domain | i32 stream_id | u16 flags | container | class header | payload
//!                 \______________ header_len bytes ______________________________/
//! ```
//!
//! Any bytes of the class header beyond the members this decoder knows are
//! skipped using `header_len`, so newer header extensions do not shift the payload.

use rdm_types::{
    DataState, DataType, DomainType, MsgClass, MsgKey, State, StateCode, StreamState,
};

use crate::constants::{key_flags, msg_flags, MSG_BASE_SIZE};
use crate::error::{CodecError, CodecResult};
use crate::reader::Reader;

/// Class-specific message header
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MsgHeader {
    Request {
        priority_class: u8,
        priority_count: u16,
        key: MsgKey,
    },
    Refresh {
        state: State,
        seq: Option<u32>,
        key: Option<MsgKey>,
    },
    Status {
        state: Option<State>,
        key: Option<MsgKey>,
    },
    Update {
        update_type: u8,
        seq: Option<u32>,
    },
    Close,
    Ack {
        ack_id: u32,
        nak_code: Option<u8>,
        text: Option<String>,
    },
    Generic,
    Post {
        user_addr: u32,
        user_id: u32,
        post_id: Option<u32>,
        key: Option<MsgKey>,
    },
}

impl MsgHeader {
    pub fn class(&self) -> MsgClass {
        match self {
            MsgHeader::Request { .. } => MsgClass::Request,
            MsgHeader::Refresh { .. } => MsgClass::Refresh,
            MsgHeader::Status { .. } => MsgClass::Status,
            MsgHeader::Update { .. } => MsgClass::Update,
            MsgHeader::Close => MsgClass::Close,
            MsgHeader::Ack { .. } => MsgClass::Ack,
            MsgHeader::Generic => MsgClass::Generic,
            MsgHeader::Post { .. } => MsgClass::Post,
        }
    }
}

/// One decoded message; the payload borrows the input buffer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Msg<'a> {
    pub domain: DomainType,
    pub stream_id: i32,
    pub flags: u16,
    pub container: DataType,
    pub header: MsgHeader,
    pub payload: &'a [u8],
}

impl Msg<'_> {
    pub fn class(&self) -> MsgClass {
        self.header.class()
    }

    pub fn has_flag(&self, flag: u16) -> bool {
        self.flags & flag != 0
    }

    pub fn is_solicited(&self) -> bool {
        self.has_flag(msg_flags::SOLICITED)
    }

    pub fn is_complete(&self) -> bool {
        self.has_flag(msg_flags::COMPLETE)
    }

    pub fn clears_cache(&self) -> bool {
        self.has_flag(msg_flags::CLEAR_CACHE)
    }

    /// State of a Refresh, or of a Status that carries one
    pub fn state(&self) -> Option<&State> {
        match &self.header {
            MsgHeader::Refresh { state, .. } => Some(state),
            MsgHeader::Status { state, .. } => state.as_ref(),
            _ => None,
        }
    }

    pub fn key(&self) -> Option<&MsgKey> {
        match &self.header {
            MsgHeader::Request { key, .. } => Some(key),
            MsgHeader::Refresh { key, .. }
            | MsgHeader::Status { key, .. }
            | MsgHeader::Post { key, .. } => key.as_ref(),
            _ => None,
        }
    }

    pub fn seq(&self) -> Option<u32> {
        match &self.header {
            MsgHeader::Refresh { seq, .. } | MsgHeader::Update { seq, .. } => *seq,
            _ => None,
        }
    }
}

/// Decode the packed state structure
pub fn decode_state(r: &mut Reader<'_>) -> CodecResult<State> {
    let offset = r.position();
    let packed = r.u8("state byte")?;
    let stream_state = StreamState::try_from(packed >> 3)
        .map_err(|_| CodecError::invalid_enum("stream state", packed >> 3, offset))?;
    let data_state = DataState::try_from(packed & 0x07)
        .map_err(|_| CodecError::invalid_enum("data state", packed & 0x07, offset))?;
    let code = StateCode::from(r.u8("state code")?);
    let text = r.u16_text("state text")?;
    Ok(State {
        stream_state,
        data_state,
        code,
        text,
    })
}

/// Decode a message key; members are present only when flagged
pub fn decode_key(r: &mut Reader<'_>) -> CodecResult<MsgKey> {
    let flags = r.u8("key flags")?;
    let mut key = MsgKey::default();
    if flags & key_flags::SERVICE_ID != 0 {
        key.service_id = Some(r.u16("key service id")?);
    }
    if flags & key_flags::NAME != 0 {
        let name = r.u8_prefixed("key name")?;
        key.name = Some(String::from_utf8_lossy(name).into_owned());
    }
    if flags & key_flags::NAME_TYPE != 0 {
        key.name_type = Some(r.u8("key name type")?);
    }
    if flags & key_flags::FILTER != 0 {
        key.filter = Some(r.u32("key filter")?);
    }
    if flags & key_flags::IDENTIFIER != 0 {
        key.identifier = Some(r.i32("key identifier")?);
    }
    if flags & key_flags::ATTRIB != 0 {
        let container = DataType::from(r.u8("key attrib container")?);
        let attrib = r.u16_prefixed("key attrib")?;
        key.attrib = Some((container, attrib.to_vec()));
    }
    Ok(key)
}

fn decode_header(class: MsgClass, flags: u16, r: &mut Reader<'_>) -> CodecResult<MsgHeader> {
    let has = |f: u16| flags & f != 0;
    let header = match class {
        MsgClass::Request => MsgHeader::Request {
            priority_class: r.u8("request priority class")?,
            priority_count: r.u16("request priority count")?,
            key: decode_key(r)?,
        },
        MsgClass::Refresh => {
            let state = decode_state(r)?;
            let seq = if has(msg_flags::HAS_SEQ) {
                Some(r.u32("refresh seq")?)
            } else {
                None
            };
            let key = if has(msg_flags::HAS_KEY) {
                Some(decode_key(r)?)
            } else {
                None
            };
            MsgHeader::Refresh { state, seq, key }
        }
        MsgClass::Status => {
            let state = if has(msg_flags::HAS_STATE) {
                Some(decode_state(r)?)
            } else {
                None
            };
            let key = if has(msg_flags::HAS_KEY) {
                Some(decode_key(r)?)
            } else {
                None
            };
            MsgHeader::Status { state, key }
        }
        MsgClass::Update => {
            let update_type = r.u8("update type")?;
            let seq = if has(msg_flags::HAS_SEQ) {
                Some(r.u32("update seq")?)
            } else {
                None
            };
            MsgHeader::Update { update_type, seq }
        }
        MsgClass::Close => MsgHeader::Close,
        MsgClass::Ack => {
            let ack_id = r.u32("ack id")?;
            let nak_code = if has(msg_flags::HAS_NAK) {
                Some(r.u8("nak code")?)
            } else {
                None
            };
            let text = if has(msg_flags::HAS_TEXT) {
                Some(r.u16_text("ack text")?)
            } else {
                None
            };
            MsgHeader::Ack {
                ack_id,
                nak_code,
                text,
            }
        }
        MsgClass::Generic => MsgHeader::Generic,
        MsgClass::Post => {
            let user_addr = r.u32("post user address")?;
            let user_id = r.u32("post user id")?;
            let post_id = if has(msg_flags::HAS_POST_ID) {
                Some(r.u32("post id")?)
            } else {
                None
            };
            let key = if has(msg_flags::HAS_KEY) {
                Some(decode_key(r)?)
            } else {
                None
            };
            MsgHeader::Post {
                user_addr,
                user_id,
                post_id,
                key,
            }
        }
    };
    Ok(header)
}

/// Decode one complete message
pub fn decode_msg(data: &[u8]) -> CodecResult<Msg<'_>> {
    let mut outer = Reader::new(data);
    let header_len = outer.u16("message header length")? as usize;
    if header_len < MSG_BASE_SIZE {
        return Err(CodecError::message_too_small(
            MSG_BASE_SIZE,
            header_len,
            "message header length",
        ));
    }
    let header_bytes = outer.bytes(header_len, "message header")?;
    let payload = outer.rest();

    let mut r = Reader::new(header_bytes);
    let raw_class = r.u8("message class")?;
    let class =
        MsgClass::try_from(raw_class).map_err(|_| CodecError::UnknownMsgClass { class: raw_class })?;
    let domain = DomainType::from(r.u8("domain")?);
    let stream_id = r.i32("stream id")?;
    let flags = r.u16("message flags")?;
    let container = DataType::from(r.u8("container type")?);
    let header = decode_header(class, flags, &mut r)?;

    Ok(Msg {
        domain,
        stream_id,
        flags,
        container,
        header,
        payload,
    })
}

/// Peek the domain and stream id without decoding the class header
pub fn peek_route(data: &[u8]) -> CodecResult<(MsgClass, DomainType, i32)> {
    let mut r = Reader::new(data);
    let _ = r.u16("message header length")?;
    let raw_class = r.u8("message class")?;
    let class =
        MsgClass::try_from(raw_class).map_err(|_| CodecError::UnknownMsgClass { class: raw_class })?;
    let domain = DomainType::from(r.u8("domain")?);
    let stream_id = r.i32("stream id")?;
    Ok((class, domain, stream_id))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_hand_built_update() {
        let data = [
            0x00, 0x0e, // header_len 14
            4, 6, // Update, MarketPrice
            0x00, 0x00, 0x00, 0x10, // stream 16
            0x00, 0x10, // HAS_SEQ
            132, // FieldList
            1, // update type
            0x00, 0x00, 0x00, 0x07, // seq 7
            0x00, 0x00, // empty field list
        ];
        let msg = decode_msg(&data).unwrap();
        assert_eq!(msg.class(), MsgClass::Update);
        assert_eq!(msg.domain, DomainType::MarketPrice);
        assert_eq!(msg.stream_id, 16);
        assert_eq!(msg.seq(), Some(7));
        assert_eq!(msg.container, DataType::FieldList);
        assert_eq!(msg.payload, &[0, 0]);
    }

    #[test]
    fn test_unknown_header_bytes_are_skipped() {
        let data = [
            0x00, 0x0b, // header_len 11: base 9 + close(0) + 2 unknown
            5, 6, 0x00, 0x00, 0x00, 0x11, 0x00, 0x00, 128, 0xaa, 0xbb, // close + extension
            0x01, // payload
        ];
        let msg = decode_msg(&data).unwrap();
        assert_eq!(msg.header, MsgHeader::Close);
        assert_eq!(msg.payload, &[0x01]);
    }

    #[test]
    fn test_bad_class_and_short_header() {
        let data = [0x00, 0x09, 42, 6, 0, 0, 0, 16, 0, 0, 128];
        assert!(matches!(
            decode_msg(&data),
            Err(CodecError::UnknownMsgClass { class: 42 })
        ));
        assert!(decode_msg(&[0x00, 0x20, 1, 2]).is_err());
        assert!(decode_msg(&[0x00, 0x02, 1, 2]).is_err());
    }

    #[test]
    fn test_refresh_state_decoding() {
        let data = [
            0x00, 0x0f, 2, 6, 0, 0, 0, 16, 0x00, 0x06, 128, // refresh, SOLICITED|COMPLETE
            (1 << 3) | 2, 6, 0x00, 0x02, b'p', b'r', // open/suspect/preempted "pr"
        ];
        let msg = decode_msg(&data).unwrap();
        let state = msg.state().unwrap();
        assert_eq!(state.stream_state, StreamState::Open);
        assert_eq!(state.data_state, DataState::Suspect);
        assert_eq!(state.code, StateCode::Preempted);
        assert_eq!(state.text, "pr");
        assert!(msg.is_solicited());
        assert!(msg.is_complete());
    }
}
