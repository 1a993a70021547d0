//! Integration tests for the RWF message codec
//!
//! Exercises the public API the way the consumer and a test provider use it:
//! hand-built bytes for wire-exactness, builder output for the provider side.

use rdm_types::{
    DataState, DataType, DomainType, FieldValue, FilterAction, MapEntryAction, MsgClass, MsgKey,
    Real, State, StateCode, StreamState,
};
use rwf_codec::{
    decode_element_list, decode_field_list, decode_filter_list, decode_map, decode_msg,
    decode_series, decode_value, find_element, msg_flags, ElementListBuilder, FieldListBuilder,
    FilterListBuilder, MapBuilder, MsgBuilder, MsgHeader, SeriesBuilder,
};

#[test]
fn test_request_matches_hand_built_bytes() {
    let bytes = MsgBuilder::request(DomainType::MarketPrice, 16, MsgKey::named(7, "IBM"))
        .encode()
        .unwrap();

    let expected: Vec<u8> = vec![
        0x00, 0x14, // header_len 20
        1, 6, // Request, MarketPrice
        0x00, 0x00, 0x00, 0x10, // stream 16
        0x10, 0x01, // STREAMING | HAS_KEY
        128, // NoData
        1, 0x00, 0x01, // priority class/count
        0x07, // key flags: service id | name | name type
        0x00, 0x07, // service 7
        3, b'I', b'B', b'M', // name
        1, // name type
    ];
    assert_eq!(bytes.to_vec(), expected);
}

#[test]
fn test_refresh_with_key_seq_and_field_list() {
    let mut fields = FieldListBuilder::new();
    fields
        .add(22, &FieldValue::Real(Real::new(10125, 12).unwrap()))
        .unwrap()
        .add(3, &FieldValue::Ascii("IBM".into()))
        .unwrap();

    let bytes = MsgBuilder::refresh(DomainType::MarketPrice, 16, State::open_ok())
        .with_flags(msg_flags::SOLICITED | msg_flags::COMPLETE | msg_flags::CLEAR_CACHE)
        .with_seq(42)
        .with_key(MsgKey::named(1, "IBM.N"))
        .with_payload(DataType::FieldList, fields.finish())
        .encode()
        .unwrap();

    let msg = decode_msg(&bytes).unwrap();
    assert_eq!(msg.class(), MsgClass::Refresh);
    assert!(msg.is_solicited() && msg.is_complete() && msg.clears_cache());
    assert_eq!(msg.seq(), Some(42));
    assert_eq!(msg.key().unwrap().name_str(), "IBM.N");
    assert_eq!(msg.state().unwrap().data_state, DataState::Ok);

    let entries = decode_field_list(msg.payload).unwrap();
    assert_eq!(entries.len(), 2);
    assert_eq!(
        decode_value(DataType::Real, entries[0].data).unwrap().as_f64(),
        Some(101.25)
    );
    assert_eq!(
        decode_value(DataType::AsciiString, entries[1].data).unwrap(),
        FieldValue::Ascii("IBM".into())
    );
}

#[test]
fn test_status_without_state() {
    let bytes = MsgBuilder::status(DomainType::MarketPrice, 18, None).encode().unwrap();
    let msg = decode_msg(&bytes).unwrap();
    assert_eq!(msg.header, MsgHeader::Status { state: None, key: None });
    assert_eq!(msg.flags & msg_flags::HAS_STATE, 0);
}

#[test]
fn test_closed_status_preserves_unknown_code() {
    let state = State::new(StreamState::Closed, DataState::Suspect, StateCode::Other(77), "odd");
    let bytes = MsgBuilder::status(DomainType::MarketPrice, 18, Some(state.clone()))
        .encode()
        .unwrap();
    let msg = decode_msg(&bytes).unwrap();
    assert_eq!(msg.state(), Some(&state));
}

#[test]
fn test_nak_ack() {
    let bytes = MsgBuilder::ack(DomainType::MarketPrice, 1, 5)
        .with_nak(2, "denied")
        .encode()
        .unwrap();
    match decode_msg(&bytes).unwrap().header {
        MsgHeader::Ack { ack_id, nak_code, text } => {
            assert_eq!(ack_id, 5);
            assert_eq!(nak_code, Some(2));
            assert_eq!(text.as_deref(), Some("denied"));
        }
        other => panic!("expected ack, got {:?}", other),
    }
}

#[test]
fn test_post_carries_id_and_key() {
    let bytes = MsgBuilder::post(DomainType::MarketPrice, 1, 0x7f000001, 99)
        .with_post_id(5)
        .with_key(MsgKey::named(3, "MY.RIC"))
        .with_flags(msg_flags::ACK | msg_flags::POST_COMPLETE)
        .encode()
        .unwrap();
    let msg = decode_msg(&bytes).unwrap();
    assert!(msg.has_flag(msg_flags::ACK));
    match msg.header {
        MsgHeader::Post { user_addr, user_id, post_id, key } => {
            assert_eq!(user_addr, 0x7f000001);
            assert_eq!(user_id, 99);
            assert_eq!(post_id, Some(5));
            assert_eq!(key.unwrap().service_id, Some(3));
        }
        other => panic!("expected post, got {:?}", other),
    }
}

#[test]
fn test_directory_map_of_filter_lists() {
    let mut info = ElementListBuilder::new();
    info.add("Name", &FieldValue::Ascii("IDN_RDF".into())).unwrap();
    let mut state = ElementListBuilder::new();
    state.add("ServiceState", &FieldValue::UInt(1)).unwrap();

    let mut filters = FilterListBuilder::new(DataType::ElementList);
    filters
        .add(1, FilterAction::Set, &info.finish())
        .unwrap()
        .add(2, FilterAction::Set, &state.finish())
        .unwrap();

    let mut map = MapBuilder::new(DataType::UInt, DataType::FilterList);
    map.add(MapEntryAction::Add, &[0x01, 0x04], &filters.finish().unwrap())
        .unwrap()
        .add(MapEntryAction::Delete, &[0x09], &[])
        .unwrap();

    let payload = map.finish().unwrap();
    let view = decode_map(&payload).unwrap();
    assert_eq!(view.entries.len(), 2);
    assert_eq!(view.entries[1].action, MapEntryAction::Delete);

    let (container, entries) = decode_filter_list(view.entries[0].payload).unwrap();
    assert_eq!(container, DataType::ElementList);
    let info = decode_element_list(entries[0].payload).unwrap();
    assert_eq!(
        find_element(&info, "Name").unwrap().value().unwrap(),
        FieldValue::Ascii("IDN_RDF".into())
    );
}

#[test]
fn test_series_with_summary() {
    let mut summary = ElementListBuilder::new();
    summary.add("Type", &FieldValue::UInt(2)).unwrap();
    let mut series = SeriesBuilder::new(DataType::ElementList);
    series.summary(summary.finish());
    series.add(&ElementListBuilder::new().finish()).unwrap();

    let bytes = series.finish().unwrap();
    let view = decode_series(&bytes).unwrap();
    assert_eq!(view.entries.len(), 1);
    let summary = decode_element_list(view.summary.unwrap()).unwrap();
    assert_eq!(summary[0].name, "Type");
}

#[test]
fn test_corrupt_inner_payload_does_not_affect_envelope() {
    let mut map = MapBuilder::new(DataType::Buffer, DataType::FieldList);
    map.add(MapEntryAction::Add, b"1A", &[0x00, 0x05, 0x00])
        .unwrap()
        .add(MapEntryAction::Add, b"2B", &FieldListBuilder::new().finish())
        .unwrap();
    let payload = map.finish().unwrap();
    let view = decode_map(&payload).unwrap();
    assert!(decode_field_list(view.entries[0].payload).is_err());
    assert!(decode_field_list(view.entries[1].payload).unwrap().is_empty());
}
