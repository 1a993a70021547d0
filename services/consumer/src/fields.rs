//! Field decoding and the field sink
//!
//! The subscription hands every field of a field list to a [`FieldSink`] with
//! the wire type the dictionary assigns to its fid. [`FieldSet`] is the sink
//! the consumer ships with; callers with their own message representation
//! implement the trait instead.

use rdm_types::{DataType, FieldValue};
use rwf_codec::{decode_field_list, decode_value, CodecError, CodecResult};

use crate::dictionary::Dictionary;

/// Receives one decoded field at a time
pub trait FieldSink {
    fn on_field(&mut self, fid: i16, data_type: DataType, raw: &[u8]) -> CodecResult<()>;
}

#[derive(Debug, Clone, PartialEq)]
pub struct Field {
    pub fid: i16,
    pub value: FieldValue,
}

/// Ordered fid → value list of one message
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FieldSet {
    fields: Vec<Field>,
}

impl FieldSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, fid: i16, value: FieldValue) {
        self.fields.push(Field { fid, value });
    }

    /// Last value of `fid`
    pub fn get(&self, fid: i16) -> Option<&FieldValue> {
        self.fields.iter().rev().find(|f| f.fid == fid).map(|f| &f.value)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Field> {
        self.fields.iter()
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

impl FieldSink for FieldSet {
    fn on_field(&mut self, fid: i16, data_type: DataType, raw: &[u8]) -> CodecResult<()> {
        let value = decode_value(data_type, raw)?;
        self.push(fid, value);
        Ok(())
    }
}

/// Outcome of decoding one field list
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct DecodeReport {
    pub decoded: usize,
    pub failures: usize,
    pub last_error: Option<String>,
}

impl DecodeReport {
    fn fail(&mut self, reason: String) {
        self.failures += 1;
        self.last_error = Some(reason);
    }
}

/// Decode a field list into `sink`, skipping fields that fail
///
/// Only an undecodable envelope is an error; a field with an unknown fid or a
/// bad value is counted in the report and skipped.
pub fn decode_fields(
    dictionary: &Dictionary,
    payload: &[u8],
    sink: &mut dyn FieldSink,
) -> Result<DecodeReport, CodecError> {
    let entries = decode_field_list(payload)?;
    let mut report = DecodeReport::default();
    for entry in entries {
        let Some(data_type) = dictionary.field_type(entry.fid) else {
            report.fail(format!("fid {} not in dictionary", entry.fid));
            continue;
        };
        match sink.on_field(entry.fid, data_type, entry.data) {
            Ok(()) => report.decoded += 1,
            Err(e) => report.fail(format!("fid {}: {}", entry.fid, e)),
        }
    }
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dictionary::FieldDef;
    use rdm_types::Real;
    use rwf_codec::FieldListBuilder;

    fn dictionary() -> Dictionary {
        let mut dict = Dictionary::new();
        for (fid, name, ty) in [(22, "BID", DataType::Real), (3, "DSPLY_NAME", DataType::RmtesString)] {
            dict.add_field(FieldDef {
                name: name.into(),
                display_name: String::new(),
                fid,
                ripple_to: 0,
                rwf_type: ty,
                rwf_len: 0,
            });
        }
        dict
    }

    #[test]
    fn test_unknown_and_bad_fields_are_skipped() {
        let mut list = FieldListBuilder::new();
        list.add(22, &FieldValue::Real(Real::new(12345, 12).unwrap()))
            .unwrap()
            .add_raw(999, &[1])
            .unwrap()
            .add_raw(22, &[0x7f, 1])
            .unwrap()
            .add(3, &FieldValue::Ascii("IBM".into()))
            .unwrap();
        let payload = list.finish();

        let mut set = FieldSet::new();
        let report = decode_fields(&dictionary(), &payload, &mut set).unwrap();
        assert_eq!(report.decoded, 2);
        assert_eq!(report.failures, 2);
        assert_eq!(set.get(22).and_then(|v| v.as_f64()), Some(123.45));
        assert_eq!(set.get(3), Some(&FieldValue::Ascii("IBM".into())));
    }

    #[test]
    fn test_truncated_envelope_is_error() {
        let mut set = FieldSet::new();
        assert!(decode_fields(&dictionary(), &[0x00, 0x02, 0x00], &mut set).is_err());
    }
}
