//! # Order Book Accumulation
//!
//! Market-By-Order and Market-By-Price responses are maps of book entries
//! tagged Add/Update/Delete. An accumulator folds the entries of one response
//! into a single [`BookMessage`] and keeps whatever per-key state it needs to
//! fill in what the provider leaves out.
//!
//! Per response the subscription calls [`BookAccumulator::start_update`],
//! then [`BookAccumulator::add_entry`] per map entry, then
//! [`BookAccumulator::build_message`]. [`apply_map`] drives that sequence
//! from a wire payload.

pub mod mbo;
pub mod mbp;

use rdm_types::{FieldValue, MapEntryAction, Side};
use rwf_codec::{decode_map, CodecError};
use thiserror::Error;

use crate::dictionary::Dictionary;
use crate::fields::{decode_fields, DecodeReport, FieldSet};

pub use mbo::MboAccumulator;
pub use mbp::MbpAccumulator;

/// Book field ids
pub mod fids {
    pub const ORDER_ID: i16 = 3426;
    pub const ORDER_PRC: i16 = 3427;
    pub const ORDER_SIDE: i16 = 3428;
    pub const ORDER_SIZE: i16 = 3429;
    pub const NO_ORD: i16 = 3430;
    pub const QUOTIM_MS: i16 = 3855;
    pub const ACC_SIZE: i16 = 4356;
    pub const LV_TIM_MS: i16 = 6527;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BookAction {
    Add,
    Update,
    Delete,
}

/// One order or price level change
#[derive(Debug, Clone, PartialEq)]
pub struct BookEntry {
    pub action: BookAction,
    /// Order id (MBO) or price-point key (MBP)
    pub key: String,
    pub side: Option<Side>,
    pub price: Option<f64>,
    pub size: Option<f64>,
    pub num_orders: Option<u64>,
    pub time_ms: Option<u64>,
}

/// Book changes of one response
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BookMessage {
    /// The book was cleared before these entries apply
    pub clear: bool,
    pub entries: Vec<BookEntry>,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BookError {
    #[error("book entry {key} has no price")]
    MissingPrice { key: String },

    #[error("book entry {key} has no side")]
    MissingSide { key: String },

    #[error("delete for unknown book entry {key}")]
    UnknownEntry { key: String },
}

pub trait BookAccumulator: Send {
    /// Begin a response; `clear` drops every tracked entry first
    fn start_update(&mut self, clear: bool);

    fn add_entry(
        &mut self,
        action: MapEntryAction,
        key: &[u8],
        fields: &FieldSet,
    ) -> Result<(), BookError>;

    fn build_message(&mut self) -> BookMessage;

    /// Entries currently live in the book
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

pub(crate) fn key_text(key: &[u8]) -> String {
    String::from_utf8_lossy(key).into_owned()
}

pub(crate) fn price_of(fields: &FieldSet) -> Option<f64> {
    fields
        .get(fids::ORDER_PRC)
        .filter(|v| !v.is_blank())
        .and_then(FieldValue::as_f64)
}

pub(crate) fn side_of(fields: &FieldSet) -> Option<Side> {
    fields
        .get(fids::ORDER_SIDE)
        .and_then(FieldValue::as_enum)
        .and_then(Side::from_enum)
}

pub(crate) fn u64_of(fields: &FieldSet, fid: i16) -> Option<u64> {
    fields.get(fid).and_then(FieldValue::as_u64)
}

pub(crate) fn f64_of(fields: &FieldSet, fid: i16) -> Option<f64> {
    fields
        .get(fid)
        .filter(|v| !v.is_blank())
        .and_then(FieldValue::as_f64)
}

/// Decode a book map payload and fold it into `book`
///
/// Entry-level failures (bad fields, missing price/side, unknown deletes) are
/// counted in the report and the entry is skipped.
pub fn apply_map(
    book: &mut dyn BookAccumulator,
    dictionary: &Dictionary,
    payload: &[u8],
    clear: bool,
) -> Result<(BookMessage, DecodeReport), CodecError> {
    let map = decode_map(payload)?;
    let mut report = DecodeReport::default();
    book.start_update(clear);
    for entry in &map.entries {
        let mut fields = FieldSet::new();
        if entry.action != MapEntryAction::Delete {
            match decode_fields(dictionary, entry.payload, &mut fields) {
                Ok(r) => {
                    report.decoded += r.decoded;
                    report.failures += r.failures;
                    if r.last_error.is_some() {
                        report.last_error = r.last_error;
                    }
                }
                Err(e) => {
                    report.failures += 1;
                    report.last_error = Some(format!("entry {}: {}", key_text(entry.key), e));
                    continue;
                }
            }
        }
        if let Err(e) = book.add_entry(entry.action, entry.key, &fields) {
            report.failures += 1;
            report.last_error = Some(e.to_string());
        }
    }
    Ok((book.build_message(), report))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dictionary::FieldDef;
    use rdm_types::{DataType, Real};
    use rwf_codec::{FieldListBuilder, MapBuilder};

    fn dictionary() -> Dictionary {
        let mut dict = Dictionary::new();
        for (fid, ty) in [
            (fids::ORDER_PRC, DataType::Real),
            (fids::ORDER_SIDE, DataType::Enum),
            (fids::ACC_SIZE, DataType::Real),
        ] {
            dict.add_field(FieldDef {
                name: format!("F{}", fid),
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
    fn test_apply_map_skips_bad_entries() {
        let mut level = FieldListBuilder::new();
        level
            .add(fids::ORDER_PRC, &FieldValue::Real(Real::new(10050, 12).unwrap()))
            .unwrap()
            .add(fids::ACC_SIZE, &FieldValue::Real(Real::new(300, 14).unwrap()))
            .unwrap();
        let mut map = MapBuilder::new(DataType::Buffer, DataType::FieldList);
        map.add(MapEntryAction::Add, b"100.50B", &level.finish())
            .unwrap()
            .add(MapEntryAction::Delete, b"99.00A", &[])
            .unwrap()
            .add(MapEntryAction::Add, b"broken", &[0x00, 0x05])
            .unwrap();
        let payload = map.finish().unwrap();

        let mut book = MbpAccumulator::new();
        let (msg, report) = apply_map(&mut book, &dictionary(), &payload, true).unwrap();
        assert!(msg.clear);
        assert_eq!(msg.entries.len(), 1);
        assert_eq!(msg.entries[0].side, Some(Side::Bid));
        assert_eq!(msg.entries[0].price, Some(100.5));
        assert_eq!(msg.entries[0].size, Some(300.0));
        assert_eq!(report.failures, 2);
        assert_eq!(book.len(), 1);
    }
}
