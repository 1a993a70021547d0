//! # Container Decoding
//!
//! Borrowed views over the RWF containers the consumer reads:
//! FieldList, ElementList, Map, FilterList and Series.
//!
//! Each decoder validates the container envelope up front and returns entries
//! that borrow from the input buffer. Entry payloads are not decoded here; a
//! failure inside one payload is the caller's to isolate.

use rdm_types::{DataType, FieldValue, FilterAction, MapEntryAction};
use tracing::trace;

use crate::constants::HAS_SUMMARY;
use crate::error::{CodecError, CodecResult};
use crate::primitive::decode_value;
use crate::reader::Reader;

/// Bytes past the declared entry count are tolerated and ignored
fn note_trailing(r: &Reader<'_>, container: &'static str) {
    if !r.is_empty() {
        trace!(container, trailing = r.remaining(), "Ignoring bytes after last entry");
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldEntry<'a> {
    pub fid: i16,
    pub data: &'a [u8],
}

pub fn decode_field_list(data: &[u8]) -> CodecResult<Vec<FieldEntry<'_>>> {
    let mut r = Reader::new(data);
    let count = r.u16("field list count")? as usize;
    let mut entries = Vec::with_capacity(count.min(1024));
    for _ in 0..count {
        let fid = r.i16("field id")?;
        let data = r.u16_prefixed("field value")?;
        entries.push(FieldEntry { fid, data });
    }
    note_trailing(&r, "field list");
    Ok(entries)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ElementEntry<'a> {
    pub name: &'a str,
    pub data_type: DataType,
    pub data: &'a [u8],
}

impl ElementEntry<'_> {
    pub fn value(&self) -> CodecResult<FieldValue> {
        decode_value(self.data_type, self.data)
    }
}

pub fn decode_element_list(data: &[u8]) -> CodecResult<Vec<ElementEntry<'_>>> {
    let mut r = Reader::new(data);
    let count = r.u16("element list count")? as usize;
    let mut entries = Vec::with_capacity(count.min(1024));
    for _ in 0..count {
        let offset = r.position();
        let name_bytes = r.u8_prefixed("element name")?;
        let name = std::str::from_utf8(name_bytes).map_err(|_| {
            CodecError::invalid_payload(offset, "element name is not UTF-8", data.len())
        })?;
        let data_type = DataType::from(r.u8("element type")?);
        let data = r.u16_prefixed("element value")?;
        entries.push(ElementEntry {
            name,
            data_type,
            data,
        });
    }
    note_trailing(&r, "element list");
    Ok(entries)
}

/// Find an element by name
pub fn find_element<'a, 'b>(
    entries: &'b [ElementEntry<'a>],
    name: &str,
) -> Option<&'b ElementEntry<'a>> {
    entries.iter().find(|e| e.name == name)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MapEntry<'a> {
    pub action: MapEntryAction,
    pub key: &'a [u8],
    /// Empty for Delete entries
    pub payload: &'a [u8],
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MapView<'a> {
    pub key_type: DataType,
    pub entry_container: DataType,
    pub summary: Option<&'a [u8]>,
    pub entries: Vec<MapEntry<'a>>,
}

pub fn decode_map(data: &[u8]) -> CodecResult<MapView<'_>> {
    let mut r = Reader::new(data);
    let flags = r.u8("map flags")?;
    let key_type = DataType::from(r.u8("map key type")?);
    let entry_container = DataType::from(r.u8("map entry container")?);
    let summary = if flags & HAS_SUMMARY != 0 {
        Some(r.u16_prefixed("map summary")?)
    } else {
        None
    };
    let count = r.u16("map count")? as usize;
    let mut entries = Vec::with_capacity(count.min(1024));
    for _ in 0..count {
        let offset = r.position();
        let raw = r.u8("map entry action")?;
        let action = MapEntryAction::try_from(raw)
            .map_err(|_| CodecError::invalid_enum("map entry action", raw, offset))?;
        let key = r.u16_prefixed("map entry key")?;
        let payload = if action == MapEntryAction::Delete {
            &[][..]
        } else {
            r.u16_prefixed("map entry payload")?
        };
        entries.push(MapEntry {
            action,
            key,
            payload,
        });
    }
    note_trailing(&r, "map");
    Ok(MapView {
        key_type,
        entry_container,
        summary,
        entries,
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FilterEntry<'a> {
    pub id: u8,
    pub action: FilterAction,
    /// Empty for Clear entries
    pub payload: &'a [u8],
}

pub fn decode_filter_list(data: &[u8]) -> CodecResult<(DataType, Vec<FilterEntry<'_>>)> {
    let mut r = Reader::new(data);
    let container = DataType::from(r.u8("filter list container")?);
    let count = r.u16("filter list count")? as usize;
    let mut entries = Vec::with_capacity(count.min(64));
    for _ in 0..count {
        let id = r.u8("filter entry id")?;
        let offset = r.position();
        let raw = r.u8("filter entry action")?;
        let action = FilterAction::try_from(raw)
            .map_err(|_| CodecError::invalid_enum("filter action", raw, offset))?;
        let payload = if action == FilterAction::Clear {
            &[][..]
        } else {
            r.u16_prefixed("filter entry payload")?
        };
        entries.push(FilterEntry {
            id,
            action,
            payload,
        });
    }
    note_trailing(&r, "filter list");
    Ok((container, entries))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeriesView<'a> {
    pub entry_container: DataType,
    pub summary: Option<&'a [u8]>,
    pub entries: Vec<&'a [u8]>,
}

pub fn decode_series(data: &[u8]) -> CodecResult<SeriesView<'_>> {
    let mut r = Reader::new(data);
    let flags = r.u8("series flags")?;
    let entry_container = DataType::from(r.u8("series entry container")?);
    let summary = if flags & HAS_SUMMARY != 0 {
        Some(r.u16_prefixed("series summary")?)
    } else {
        None
    };
    let count = r.u16("series count")? as usize;
    let mut entries = Vec::with_capacity(count.min(1024));
    for _ in 0..count {
        entries.push(r.u16_prefixed("series entry")?);
    }
    note_trailing(&r, "series");
    Ok(SeriesView {
        entry_container,
        summary,
        entries,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trailing_bytes_after_entries_are_ignored() {
        let data = [0x00, 0x01, 0x00, 0x16, 0x00, 0x01, 0x05, 0xaa, 0xbb];
        let entries = decode_field_list(&data).unwrap();
        assert_eq!(entries, vec![FieldEntry { fid: 22, data: &[5] }]);
    }

    #[test]
    fn test_field_list_entries_borrow_input() {
        let data = [0x00, 0x02, 0x00, 0x16, 0x00, 0x01, 0x05, 0xff, 0xfe, 0x00, 0x00];
        let entries = decode_field_list(&data).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0], FieldEntry { fid: 22, data: &[5] });
        assert_eq!(entries[1].fid, -2);
        assert!(entries[1].data.is_empty());
    }

    #[test]
    fn test_field_list_truncated_entry() {
        let data = [0x00, 0x01, 0x00, 0x16, 0x00, 0x04, 0x05];
        assert!(decode_field_list(&data).is_err());
    }

    #[test]
    fn test_map_delete_has_no_payload() {
        let data = [
            0x00, 16, 132, // flags, key type, container
            0x00, 0x02, // count
            3, 0x00, 0x01, b'A', // delete "A"
            2, 0x00, 0x01, b'B', 0x00, 0x02, 0x00, 0x00, // add "B" with empty field list
        ];
        let map = decode_map(&data).unwrap();
        assert_eq!(map.key_type, DataType::Buffer);
        assert_eq!(map.entries[0].action, MapEntryAction::Delete);
        assert!(map.entries[0].payload.is_empty());
        assert_eq!(map.entries[1].key, b"B");
        assert_eq!(map.entries[1].payload, &[0, 0]);
    }

    #[test]
    fn test_map_rejects_unknown_action() {
        let data = [0x00, 16, 132, 0x00, 0x01, 9, 0x00, 0x00];
        assert!(matches!(
            decode_map(&data),
            Err(CodecError::InvalidEnum { value: 9, .. })
        ));
    }
}
