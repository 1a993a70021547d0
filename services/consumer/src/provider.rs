//! Provider-side encoders
//!
//! Messages an RMDS provider sends to a consumer: login and directory
//! responses, item images, updates, status and acks. The session never sends
//! these; they drive the session tests and local feed simulations.

use bytes::{Bytes, BytesMut};
use rdm_types::{
    DataType, DomainType, FieldValue, FilterAction, MapEntryAction, MsgKey, State,
    DIRECTORY_STREAM_ID, LOGIN_STREAM_ID,
};
use rwf_codec::primitive::put_uint;
use rwf_codec::{
    directory_filter_id, login_attrib, msg_flags, CodecResult, ElementListBuilder,
    FieldListBuilder, FilterListBuilder, MapBuilder, MsgBuilder, NAME_TYPE_USER_NAME,
};

/// One service as advertised in a directory response
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceInfo {
    pub id: u16,
    pub name: String,
    pub up: bool,
    pub accepting: bool,
    /// Domain numbers the service offers
    pub capabilities: Vec<u8>,
}

impl ServiceInfo {
    /// An up, accepting service offering market price and both book domains
    pub fn new(id: u16, name: &str) -> Self {
        Self {
            id,
            name: name.to_string(),
            up: true,
            accepting: true,
            capabilities: vec![
                u8::from(DomainType::MarketPrice),
                u8::from(DomainType::MarketByOrder),
                u8::from(DomainType::MarketByPrice),
            ],
        }
    }

    pub fn down(mut self) -> Self {
        self.up = false;
        self.accepting = false;
        self
    }

    pub fn with_capabilities(mut self, capabilities: &[DomainType]) -> Self {
        self.capabilities = capabilities.iter().map(|d| u8::from(*d)).collect();
        self
    }
}

pub fn field_list(fields: &[(i16, FieldValue)]) -> CodecResult<Bytes> {
    let mut list = FieldListBuilder::new();
    for (fid, value) in fields {
        list.add(*fid, value)?;
    }
    Ok(list.finish())
}

/// Solicited login refresh accepting `user`
pub fn login_refresh(user: &str, support_post: bool) -> CodecResult<Bytes> {
    let mut attrib = ElementListBuilder::new();
    attrib.add(
        login_attrib::SUPPORT_OMM_POST,
        &FieldValue::UInt(u64::from(support_post)),
    )?;
    let key = MsgKey {
        name: Some(user.to_string()),
        name_type: Some(NAME_TYPE_USER_NAME),
        ..MsgKey::default()
    }
    .with_attrib(DataType::ElementList, attrib.finish().to_vec());

    MsgBuilder::refresh(DomainType::Login, LOGIN_STREAM_ID, State::open_ok())
        .with_flags(msg_flags::SOLICITED | msg_flags::COMPLETE)
        .with_key(key)
        .encode()
}

pub fn login_status(state: State) -> CodecResult<Bytes> {
    MsgBuilder::status(DomainType::Login, LOGIN_STREAM_ID, Some(state)).encode()
}

fn service_entry(service: &ServiceInfo) -> CodecResult<Bytes> {
    let mut info = ElementListBuilder::new();
    info.add("Name", &FieldValue::Ascii(service.name.clone()))?;
    info.add_raw("Capabilities", DataType::Buffer, &service.capabilities)?;

    let mut state = ElementListBuilder::new();
    state.add("ServiceState", &FieldValue::UInt(u64::from(service.up)))?;
    state.add("AcceptingRequests", &FieldValue::UInt(u64::from(service.accepting)))?;

    let mut filters = FilterListBuilder::new(DataType::ElementList);
    filters.add(directory_filter_id::INFO, FilterAction::Set, &info.finish())?;
    filters.add(directory_filter_id::STATE, FilterAction::Set, &state.finish())?;
    filters.finish()
}

fn service_key(id: u16) -> BytesMut {
    let mut key = BytesMut::new();
    put_uint(&mut key, u64::from(id));
    key
}

/// Map payload adding `services` and deleting `deleted`
pub fn directory_payload(services: &[ServiceInfo], deleted: &[u16]) -> CodecResult<Bytes> {
    let mut map = MapBuilder::new(DataType::UInt, DataType::FilterList);
    for service in services {
        map.add(MapEntryAction::Add, &service_key(service.id), &service_entry(service)?)?;
    }
    for id in deleted {
        map.add(MapEntryAction::Delete, &service_key(*id), &[])?;
    }
    map.finish()
}

/// Solicited, complete directory refresh
pub fn directory_refresh(services: &[ServiceInfo]) -> CodecResult<Bytes> {
    MsgBuilder::refresh(DomainType::Source, DIRECTORY_STREAM_ID, State::open_ok())
        .with_flags(msg_flags::SOLICITED | msg_flags::COMPLETE | msg_flags::CLEAR_CACHE)
        .with_payload(DataType::Map, directory_payload(services, &[])?)
        .encode()
}

pub fn directory_update(services: &[ServiceInfo], deleted: &[u16]) -> CodecResult<Bytes> {
    MsgBuilder::update(DomainType::Source, DIRECTORY_STREAM_ID, 0)
        .with_payload(DataType::Map, directory_payload(services, deleted)?)
        .encode()
}

pub fn directory_status(state: State) -> CodecResult<Bytes> {
    MsgBuilder::status(DomainType::Source, DIRECTORY_STREAM_ID, Some(state)).encode()
}

/// Solicited complete image with an Open/Ok state
pub fn item_refresh(
    domain: DomainType,
    stream_id: i32,
    container: DataType,
    payload: Bytes,
) -> CodecResult<Bytes> {
    item_refresh_with(
        domain,
        stream_id,
        State::open_ok(),
        msg_flags::SOLICITED | msg_flags::COMPLETE | msg_flags::CLEAR_CACHE,
        container,
        payload,
    )
}

/// Image with explicit state and flags, for multi-part and unsolicited images
pub fn item_refresh_with(
    domain: DomainType,
    stream_id: i32,
    state: State,
    flags: u16,
    container: DataType,
    payload: Bytes,
) -> CodecResult<Bytes> {
    MsgBuilder::refresh(domain, stream_id, state)
        .with_flags(flags)
        .with_payload(container, payload)
        .encode()
}

pub fn item_update(
    domain: DomainType,
    stream_id: i32,
    container: DataType,
    payload: Bytes,
) -> CodecResult<Bytes> {
    MsgBuilder::update(domain, stream_id, 0)
        .with_payload(container, payload)
        .encode()
}

pub fn item_status(domain: DomainType, stream_id: i32, state: State) -> CodecResult<Bytes> {
    MsgBuilder::status(domain, stream_id, Some(state)).encode()
}

/// Ack for `ack_id`, or a nak when `nak` carries a code and text
pub fn ack(stream_id: i32, ack_id: u32, nak: Option<(u8, &str)>) -> CodecResult<Bytes> {
    let mut builder = MsgBuilder::ack(DomainType::MarketPrice, stream_id, ack_id);
    if let Some((code, text)) = nak {
        builder = builder.with_nak(code, text);
    }
    builder.encode()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rdm_types::MsgClass;
    use rwf_codec::{decode_msg, MsgHeader};

    #[test]
    fn test_login_refresh_carries_post_support() {
        let bytes = login_refresh("user", true).unwrap();
        let msg = decode_msg(&bytes).unwrap();
        assert_eq!(msg.class(), MsgClass::Refresh);
        assert!(msg.is_solicited());
        let key = msg.key().unwrap();
        assert_eq!(key.name_str(), "user");
        assert_eq!(key.attrib.as_ref().map(|(t, _)| *t), Some(DataType::ElementList));
    }

    #[test]
    fn test_nak_ack_header() {
        let bytes = ack(LOGIN_STREAM_ID, 5, Some((3, "source down"))).unwrap();
        let msg = decode_msg(&bytes).unwrap();
        match msg.header {
            MsgHeader::Ack {
                ack_id,
                nak_code,
                text,
            } => {
                assert_eq!(ack_id, 5);
                assert_eq!(nak_code, Some(3));
                assert_eq!(text.as_deref(), Some("source down"));
            }
            other => panic!("unexpected header {:?}", other),
        }
    }
}
