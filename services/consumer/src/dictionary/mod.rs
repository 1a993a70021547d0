//! # Data Dictionary
//!
//! Field definitions (fid → name and wire type) and enum tables (fid, value →
//! display text). Each half is loaded either from a file at startup or from
//! the wire on its own non-streaming stream; the dictionary is complete once
//! both halves are present, whichever way each one arrived.
//!
//! Wire responses are Series payloads. The summary element list names the
//! dictionary `Type` and `Version`; each entry is one element list per
//! definition. Multi-part refreshes accumulate until the part flagged COMPLETE.

pub mod file;

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use bytes::Bytes;
use rdm_types::{
    DataType, DomainType, MsgClass, MsgKey, ENUM_DICTIONARY_STREAM_ID, FIELD_DICTIONARY_STREAM_ID,
};
use rwf_codec::primitive::{require_int, require_uint};
use rwf_codec::{
    decode_element_list, decode_series, dictionary_type, find_element, msg_flags, CodecError,
    CodecResult, Msg, MsgBuilder, DICTIONARY_VERBOSE,
};
use thiserror::Error;
use tracing::{debug, info, warn};

/// Wire name of the field dictionary
pub const FIELD_DICTIONARY_NAME: &str = "RWFFld";

/// Wire name of the enum tables
pub const ENUM_DICTIONARY_NAME: &str = "RWFEnum";

#[derive(Debug, Error)]
pub enum DictionaryError {
    #[error("Failed to read dictionary file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Dictionary parse error at line {line}: {reason}")]
    Parse { line: usize, reason: String },

    #[error("Dictionary response on unexpected stream {stream_id}")]
    UnexpectedStream { stream_id: i32 },

    #[error("Dictionary type {got} received on the {expected} stream")]
    UnexpectedType { expected: &'static str, got: u64 },

    #[error("Dictionary decode error: {0}")]
    Decode(#[from] CodecError),
}

/// One field definition
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldDef {
    pub name: String,
    pub display_name: String,
    pub fid: i16,
    /// Field this one ripples into, 0 when none
    pub ripple_to: i16,
    pub rwf_type: DataType,
    pub rwf_len: u16,
}

/// One enum display value
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnumDef {
    pub fid: i16,
    pub value: u16,
    pub display: String,
}

/// Completion report of one wire response
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DictionaryEvent {
    FieldComplete,
    EnumComplete,
    Failed { reason: String },
}

/// Which halves a file load produced
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LoadStatus {
    pub fields: bool,
    pub enums: bool,
}

/// Notified once per completion or failure
pub trait DictionaryListener: Send + Sync {
    fn on_dictionary(&self, complete: bool);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Half {
    Missing,
    Requested,
    FromFile,
    FromWire,
}

impl Half {
    fn is_loaded(self) -> bool {
        matches!(self, Half::FromFile | Half::FromWire)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Kind {
    Fields,
    Enums,
}

impl Kind {
    fn for_stream(stream_id: i32) -> Option<Self> {
        match stream_id {
            FIELD_DICTIONARY_STREAM_ID => Some(Kind::Fields),
            ENUM_DICTIONARY_STREAM_ID => Some(Kind::Enums),
            _ => None,
        }
    }

    fn label(self) -> &'static str {
        match self {
            Kind::Fields => "field",
            Kind::Enums => "enum",
        }
    }

    fn wire_type(self) -> u64 {
        match self {
            Kind::Fields => dictionary_type::FIELD_DEFINITIONS,
            Kind::Enums => dictionary_type::ENUM_TABLES,
        }
    }
}

pub struct Dictionary {
    fields: HashMap<i16, FieldDef>,
    enums: HashMap<(i16, u16), String>,
    field_half: Half,
    enum_half: Half,
    field_version: Option<String>,
    enum_version: Option<String>,
    listeners: Vec<Arc<dyn DictionaryListener>>,
}

impl Default for Dictionary {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Dictionary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dictionary")
            .field("fields", &self.fields.len())
            .field("enums", &self.enums.len())
            .field("field_half", &self.field_half)
            .field("enum_half", &self.enum_half)
            .finish()
    }
}

impl Dictionary {
    pub fn new() -> Self {
        Self {
            fields: HashMap::new(),
            enums: HashMap::new(),
            field_half: Half::Missing,
            enum_half: Half::Missing,
            field_version: None,
            enum_version: None,
            listeners: Vec::new(),
        }
    }

    /// Load whichever halves have a path; a missing path leaves that half to the wire
    pub fn load_from_files(
        &mut self,
        field_path: Option<&Path>,
        enum_path: Option<&Path>,
    ) -> Result<LoadStatus, DictionaryError> {
        let mut status = LoadStatus::default();
        if let Some(path) = field_path {
            let defs = file::load_field_file(path)?;
            info!(path = %path.display(), count = defs.len(), "Loaded field dictionary");
            for def in defs {
                self.add_field(def);
            }
            self.field_half = Half::FromFile;
            status.fields = true;
        }
        if let Some(path) = enum_path {
            let defs = file::load_enum_file(path)?;
            info!(path = %path.display(), count = defs.len(), "Loaded enum tables");
            for def in defs {
                self.add_enum(def);
            }
            self.enum_half = Half::FromFile;
            status.enums = true;
        }
        Ok(status)
    }

    pub fn add_field(&mut self, def: FieldDef) {
        self.fields.insert(def.fid, def);
    }

    pub fn add_enum(&mut self, def: EnumDef) {
        self.enums.insert((def.fid, def.value), def.display);
    }

    pub fn is_complete(&self) -> bool {
        self.field_half.is_loaded() && self.enum_half.is_loaded()
    }

    pub fn has_fields(&self) -> bool {
        self.field_half.is_loaded()
    }

    pub fn has_enums(&self) -> bool {
        self.enum_half.is_loaded()
    }

    pub fn field(&self, fid: i16) -> Option<&FieldDef> {
        self.fields.get(&fid)
    }

    pub fn field_type(&self, fid: i16) -> Option<DataType> {
        self.fields.get(&fid).map(|d| d.rwf_type)
    }

    pub fn field_by_name(&self, name: &str) -> Option<&FieldDef> {
        self.fields.values().find(|d| d.name == name)
    }

    pub fn enum_display(&self, fid: i16, value: u16) -> Option<&str> {
        self.enums.get(&(fid, value)).map(String::as_str)
    }

    pub fn field_count(&self) -> usize {
        self.fields.len()
    }

    pub fn enum_count(&self) -> usize {
        self.enums.len()
    }

    pub fn version(&self) -> (Option<&str>, Option<&str>) {
        (self.field_version.as_deref(), self.enum_version.as_deref())
    }

    /// Request messages for the halves not yet loaded
    pub fn requests(&mut self, service_id: u16) -> CodecResult<Vec<Bytes>> {
        let mut out = Vec::new();
        if !self.field_half.is_loaded() {
            out.push(Self::request(FIELD_DICTIONARY_STREAM_ID, FIELD_DICTIONARY_NAME, service_id)?);
            self.field_half = Half::Requested;
        }
        if !self.enum_half.is_loaded() {
            out.push(Self::request(ENUM_DICTIONARY_STREAM_ID, ENUM_DICTIONARY_NAME, service_id)?);
            self.enum_half = Half::Requested;
        }
        Ok(out)
    }

    fn request(stream_id: i32, name: &str, service_id: u16) -> CodecResult<Bytes> {
        MsgBuilder::request(
            DomainType::Dictionary,
            stream_id,
            MsgKey::named(service_id, name).with_filter(DICTIONARY_VERBOSE),
        )
        .without_flags(msg_flags::STREAMING)
        .encode()
    }

    /// Wire requests that were in flight are lost with the connection
    pub fn reset_requests(&mut self) {
        for half in [&mut self.field_half, &mut self.enum_half] {
            if *half == Half::Requested {
                *half = Half::Missing;
            }
        }
    }

    /// Fold one dictionary-domain response into the tables
    ///
    /// Returns an event when a half completes or the provider refuses it.
    pub fn process_wire_response(
        &mut self,
        msg: &Msg<'_>,
    ) -> Result<Option<DictionaryEvent>, DictionaryError> {
        let kind = Kind::for_stream(msg.stream_id).ok_or(DictionaryError::UnexpectedStream {
            stream_id: msg.stream_id,
        })?;

        if let Some(state) = msg.state() {
            if state.is_closed() {
                warn!(
                    stream_id = msg.stream_id,
                    state = %state,
                    "{} dictionary request closed by provider",
                    kind.label()
                );
                self.set_half(kind, Half::Missing);
                return Ok(Some(DictionaryEvent::Failed {
                    reason: format!("{} dictionary: {}", kind.label(), state.text),
                }));
            }
        }

        if msg.class() != MsgClass::Refresh {
            debug!(stream_id = msg.stream_id, class = ?msg.class(), "Ignoring dictionary message");
            return Ok(None);
        }
        if msg.container != DataType::Series {
            return Err(CodecError::unsupported_type(msg.container, "dictionary payload").into());
        }

        let series = decode_series(msg.payload)?;
        if let Some(summary) = series.summary {
            let elements = decode_element_list(summary)?;
            if let Some(entry) = find_element(&elements, "Type") {
                let got = require_uint(entry.data, "dictionary type")?;
                if got != kind.wire_type() {
                    return Err(DictionaryError::UnexpectedType {
                        expected: kind.label(),
                        got,
                    });
                }
            }
            if let Some(entry) = find_element(&elements, "Version") {
                let version = String::from_utf8_lossy(entry.data).into_owned();
                match kind {
                    Kind::Fields => self.field_version = Some(version),
                    Kind::Enums => self.enum_version = Some(version),
                }
            }
        }

        let mut added = 0usize;
        for entry in &series.entries {
            let elements = decode_element_list(entry)?;
            match kind {
                Kind::Fields => self.add_field(field_from_elements(&elements)?),
                Kind::Enums => self.add_enum(enum_from_elements(&elements)?),
            }
            added += 1;
        }
        debug!(
            stream_id = msg.stream_id,
            added,
            complete = msg.is_complete(),
            "{} dictionary part",
            kind.label()
        );

        if !msg.is_complete() {
            return Ok(None);
        }
        self.set_half(kind, Half::FromWire);
        info!(
            fields = self.fields.len(),
            enums = self.enums.len(),
            "{} dictionary download complete",
            kind.label()
        );
        Ok(Some(match kind {
            Kind::Fields => DictionaryEvent::FieldComplete,
            Kind::Enums => DictionaryEvent::EnumComplete,
        }))
    }

    fn set_half(&mut self, kind: Kind, half: Half) {
        match kind {
            Kind::Fields => self.field_half = half,
            Kind::Enums => self.enum_half = half,
        }
    }

    pub fn add_listener(&mut self, listener: Arc<dyn DictionaryListener>) {
        self.listeners.push(listener);
    }

    pub fn notify_listeners(&self, complete: bool) {
        for listener in self.listeners.clone() {
            listener.on_dictionary(complete);
        }
    }
}

fn element_text(elements: &[rwf_codec::ElementEntry<'_>], name: &'static str) -> CodecResult<String> {
    find_element(elements, name)
        .map(|e| String::from_utf8_lossy(e.data).into_owned())
        .ok_or_else(|| CodecError::invalid_payload(0, format!("missing {} element", name), 0))
}

fn element_int(elements: &[rwf_codec::ElementEntry<'_>], name: &'static str) -> CodecResult<i64> {
    let entry = find_element(elements, name)
        .ok_or_else(|| CodecError::invalid_payload(0, format!("missing {} element", name), 0))?;
    if entry.data_type == DataType::UInt || entry.data_type == DataType::Enum {
        require_uint(entry.data, name).map(|v| v as i64)
    } else {
        require_int(entry.data, name)
    }
}

fn narrow<T: TryFrom<i64>>(value: i64, name: &'static str) -> CodecResult<T> {
    T::try_from(value).map_err(|_| CodecError::invalid_payload(0, format!("{} out of range: {}", name, value), 0))
}

fn field_from_elements(elements: &[rwf_codec::ElementEntry<'_>]) -> CodecResult<FieldDef> {
    let rwf_type = narrow::<u8>(element_int(elements, "RWFTYPE")?, "RWFTYPE")?;
    Ok(FieldDef {
        name: element_text(elements, "NAME")?,
        display_name: find_element(elements, "DDENAME")
            .map(|e| String::from_utf8_lossy(e.data).into_owned())
            .unwrap_or_default(),
        fid: narrow(element_int(elements, "FID")?, "FID")?,
        ripple_to: narrow(element_int(elements, "RIPPLETO").unwrap_or(0), "RIPPLETO")?,
        rwf_type: DataType::from(rwf_type),
        rwf_len: narrow(element_int(elements, "RWFLEN").unwrap_or(0), "RWFLEN")?,
    })
}

fn enum_from_elements(elements: &[rwf_codec::ElementEntry<'_>]) -> CodecResult<EnumDef> {
    Ok(EnumDef {
        fid: narrow(element_int(elements, "FID")?, "FID")?,
        value: narrow(element_int(elements, "VALUE")?, "VALUE")?,
        display: element_text(elements, "DISPLAY")?,
    })
}

/// Encode a field dictionary refresh part (provider side)
pub fn encode_field_refresh(
    defs: &[FieldDef],
    version: &str,
    complete: bool,
) -> CodecResult<Bytes> {
    use rdm_types::{FieldValue, State};
    use rwf_codec::{ElementListBuilder, SeriesBuilder};

    let mut summary = ElementListBuilder::new();
    summary
        .add("Type", &FieldValue::UInt(dictionary_type::FIELD_DEFINITIONS))?
        .add("Version", &FieldValue::Ascii(version.to_string()))?;

    let mut series = SeriesBuilder::new(DataType::ElementList);
    series.summary(summary.finish());
    for def in defs {
        let mut entry = ElementListBuilder::new();
        entry
            .add("NAME", &FieldValue::Ascii(def.name.clone()))?
            .add("FID", &FieldValue::Int(def.fid as i64))?
            .add("RIPPLETO", &FieldValue::Int(def.ripple_to as i64))?
            .add("RWFTYPE", &FieldValue::UInt(u8::from(def.rwf_type) as u64))?
            .add("RWFLEN", &FieldValue::UInt(def.rwf_len as u64))?;
        series.add(&entry.finish())?;
    }

    let mut builder = MsgBuilder::refresh(DomainType::Dictionary, FIELD_DICTIONARY_STREAM_ID, State::open_ok())
        .with_flags(msg_flags::SOLICITED)
        .with_payload(DataType::Series, series.finish()?);
    if complete {
        builder = builder.with_flags(msg_flags::COMPLETE);
    }
    builder.encode()
}

/// Encode an enum table refresh part (provider side)
pub fn encode_enum_refresh(defs: &[EnumDef], version: &str, complete: bool) -> CodecResult<Bytes> {
    use rdm_types::{FieldValue, State};
    use rwf_codec::{ElementListBuilder, SeriesBuilder};

    let mut summary = ElementListBuilder::new();
    summary
        .add("Type", &FieldValue::UInt(dictionary_type::ENUM_TABLES))?
        .add("Version", &FieldValue::Ascii(version.to_string()))?;

    let mut series = SeriesBuilder::new(DataType::ElementList);
    series.summary(summary.finish());
    for def in defs {
        let mut entry = ElementListBuilder::new();
        entry
            .add("FID", &FieldValue::Int(def.fid as i64))?
            .add("VALUE", &FieldValue::Enum(def.value))?
            .add("DISPLAY", &FieldValue::Ascii(def.display.clone()))?;
        series.add(&entry.finish())?;
    }

    let mut builder = MsgBuilder::refresh(DomainType::Dictionary, ENUM_DICTIONARY_STREAM_ID, State::open_ok())
        .with_flags(msg_flags::SOLICITED)
        .with_payload(DataType::Series, series.finish()?);
    if complete {
        builder = builder.with_flags(msg_flags::COMPLETE);
    }
    builder.encode()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rdm_types::{State, StateCode};
    use rwf_codec::decode_msg;
    use std::fs;
    use tempfile::tempdir;

    fn bid() -> FieldDef {
        FieldDef {
            name: "BID".into(),
            display_name: String::new(),
            fid: 22,
            ripple_to: 0,
            rwf_type: DataType::Real,
            rwf_len: 7,
        }
    }

    #[test]
    fn test_wire_download_in_two_parts() {
        let mut dict = Dictionary::new();
        let requests = dict.requests(1).unwrap();
        assert_eq!(requests.len(), 2);
        let req = decode_msg(&requests[0]).unwrap();
        assert_eq!(req.stream_id, FIELD_DICTIONARY_STREAM_ID);
        assert!(!req.has_flag(msg_flags::STREAMING));
        assert_eq!(req.key().and_then(|k| k.name.as_deref()), Some(FIELD_DICTIONARY_NAME));

        let part1 = encode_field_refresh(&[bid()], "4.20", false).unwrap();
        let event = dict.process_wire_response(&decode_msg(&part1).unwrap()).unwrap();
        assert_eq!(event, None);
        assert_eq!(dict.field_type(22), Some(DataType::Real));

        let mut ask = bid();
        ask.name = "ASK".into();
        ask.fid = 25;
        let part2 = encode_field_refresh(&[ask], "4.20", true).unwrap();
        let event = dict.process_wire_response(&decode_msg(&part2).unwrap()).unwrap();
        assert_eq!(event, Some(DictionaryEvent::FieldComplete));
        assert!(!dict.is_complete());

        let enums = encode_enum_refresh(
            &[EnumDef { fid: 4, value: 1, display: "NYS".into() }],
            "4.20",
            true,
        )
        .unwrap();
        let event = dict.process_wire_response(&decode_msg(&enums).unwrap()).unwrap();
        assert_eq!(event, Some(DictionaryEvent::EnumComplete));
        assert!(dict.is_complete());
        assert_eq!(dict.enum_display(4, 1), Some("NYS"));
        assert_eq!(dict.version(), (Some("4.20"), Some("4.20")));
    }

    #[test]
    fn test_only_missing_half_is_requested() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("RDMFieldDictionary");
        fs::write(&path, "BID \"BID\" 22 NULL PRICE 17 REAL64 7\n").unwrap();

        let mut dict = Dictionary::new();
        let status = dict.load_from_files(Some(&path), None).unwrap();
        assert_eq!(status, LoadStatus { fields: true, enums: false });

        let requests = dict.requests(7).unwrap();
        assert_eq!(requests.len(), 1);
        let req = decode_msg(&requests[0]).unwrap();
        assert_eq!(req.stream_id, ENUM_DICTIONARY_STREAM_ID);
        assert_eq!(req.key().and_then(|k| k.service_id), Some(7));
    }

    #[test]
    fn test_response_on_wrong_stream_is_protocol_error() {
        let mut dict = Dictionary::new();
        let msg = MsgBuilder::refresh(DomainType::Dictionary, 9, State::open_ok())
            .encode()
            .unwrap();
        assert!(matches!(
            dict.process_wire_response(&decode_msg(&msg).unwrap()),
            Err(DictionaryError::UnexpectedStream { stream_id: 9 })
        ));
    }

    #[test]
    fn test_enum_payload_on_field_stream_rejected() {
        let mut dict = Dictionary::new();
        let enums = encode_enum_refresh(&[], "1", true).unwrap();
        let mut msg = decode_msg(&enums).unwrap();
        msg.stream_id = FIELD_DICTIONARY_STREAM_ID;
        assert!(matches!(
            dict.process_wire_response(&msg),
            Err(DictionaryError::UnexpectedType { got: 2, .. })
        ));
    }

    #[test]
    fn test_closed_status_fails_half() {
        let mut dict = Dictionary::new();
        dict.requests(1).unwrap();
        let msg = MsgBuilder::status(
            DomainType::Dictionary,
            ENUM_DICTIONARY_STREAM_ID,
            Some(State::closed(StateCode::NotFound, "no enums")),
        )
        .encode()
        .unwrap();
        let event = dict.process_wire_response(&decode_msg(&msg).unwrap()).unwrap();
        assert!(matches!(event, Some(DictionaryEvent::Failed { .. })));
    }

    #[test]
    fn test_reset_requests_after_disconnect() {
        let mut dict = Dictionary::new();
        dict.requests(1).unwrap();
        dict.reset_requests();
        assert_eq!(dict.requests(1).unwrap().len(), 2);
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let mut dict = Dictionary::new();
        let err = dict
            .load_from_files(Some(Path::new("/nonexistent/RDMFieldDictionary")), None)
            .unwrap_err();
        assert!(matches!(err, DictionaryError::Io { .. }));
    }
}
