//! Market-By-Order accumulator
//!
//! Entries are keyed by order id and carry their own side and price. Deletes
//! carry only the key; the accumulator remembers each live order's side and
//! price so the delete it emits is complete.

use std::collections::HashMap;

use rdm_types::{MapEntryAction, Side};

use super::{
    f64_of, fids, key_text, price_of, side_of, u64_of, BookAccumulator, BookAction, BookEntry,
    BookError, BookMessage,
};
use crate::fields::FieldSet;

#[derive(Debug, Clone, Copy, PartialEq)]
struct Order {
    side: Option<Side>,
    price: Option<f64>,
}

#[derive(Debug, Default)]
pub struct MboAccumulator {
    orders: HashMap<Vec<u8>, Order>,
    clear: bool,
    pending: Vec<BookEntry>,
}

impl MboAccumulator {
    pub fn new() -> Self {
        Self::default()
    }
}

impl BookAccumulator for MboAccumulator {
    fn start_update(&mut self, clear: bool) {
        self.pending.clear();
        self.clear = clear;
        if clear {
            self.orders.clear();
        }
    }

    fn add_entry(
        &mut self,
        action: MapEntryAction,
        key: &[u8],
        fields: &FieldSet,
    ) -> Result<(), BookError> {
        match action {
            MapEntryAction::Add | MapEntryAction::Update => {
                let known = self.orders.get(key).copied();
                let order = Order {
                    side: side_of(fields).or(known.and_then(|o| o.side)),
                    price: price_of(fields).or(known.and_then(|o| o.price)),
                };
                if action == MapEntryAction::Add && order.side.is_none() {
                    return Err(BookError::MissingSide { key: key_text(key) });
                }
                self.pending.push(BookEntry {
                    action: if known.is_some() {
                        BookAction::Update
                    } else {
                        BookAction::Add
                    },
                    key: key_text(key),
                    side: order.side,
                    price: order.price,
                    size: f64_of(fields, fids::ORDER_SIZE),
                    num_orders: None,
                    time_ms: u64_of(fields, fids::QUOTIM_MS),
                });
                self.orders.insert(key.to_vec(), order);
                Ok(())
            }
            MapEntryAction::Delete => {
                let order = self
                    .orders
                    .remove(key)
                    .ok_or_else(|| BookError::UnknownEntry { key: key_text(key) })?;
                self.pending.push(BookEntry {
                    action: BookAction::Delete,
                    key: key_text(key),
                    side: order.side,
                    price: order.price,
                    size: None,
                    num_orders: None,
                    time_ms: None,
                });
                Ok(())
            }
        }
    }

    fn build_message(&mut self) -> BookMessage {
        BookMessage {
            clear: std::mem::take(&mut self.clear),
            entries: std::mem::take(&mut self.pending),
        }
    }

    fn len(&self) -> usize {
        self.orders.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rdm_types::{FieldValue, Real};

    fn order(price: i64, side: u16, size: u64) -> FieldSet {
        let mut fields = FieldSet::new();
        fields.push(fids::ORDER_PRC, FieldValue::Real(Real::new(price, 12).unwrap()));
        fields.push(fids::ORDER_SIDE, FieldValue::Enum(side));
        fields.push(fids::ORDER_SIZE, FieldValue::UInt(size));
        fields
    }

    #[test]
    fn test_add_update_delete_order() {
        let mut book = MboAccumulator::new();
        book.start_update(true);
        book.add_entry(MapEntryAction::Add, b"ORD1", &order(2550, 1, 100)).unwrap();
        book.add_entry(MapEntryAction::Add, b"ORD2", &order(2560, 2, 50)).unwrap();
        let msg = book.build_message();
        assert!(msg.clear);
        assert_eq!(msg.entries.len(), 2);
        assert_eq!(book.len(), 2);

        book.start_update(false);
        let mut resize = FieldSet::new();
        resize.push(fids::ORDER_SIZE, FieldValue::UInt(75));
        book.add_entry(MapEntryAction::Update, b"ORD1", &resize).unwrap();
        book.add_entry(MapEntryAction::Delete, b"ORD2", &FieldSet::new()).unwrap();
        let msg = book.build_message();
        assert!(!msg.clear);
        assert_eq!(msg.entries[0].action, BookAction::Update);
        assert_eq!(msg.entries[0].size, Some(75.0));
        assert_eq!(msg.entries[0].price, Some(25.5));
        assert_eq!(msg.entries[1].action, BookAction::Delete);
        assert_eq!(msg.entries[1].side, Some(Side::Ask));
        assert_eq!(book.len(), 1);
    }

    #[test]
    fn test_unknown_delete_and_sideless_add() {
        let mut book = MboAccumulator::new();
        book.start_update(false);
        assert!(matches!(
            book.add_entry(MapEntryAction::Delete, b"NOPE", &FieldSet::new()),
            Err(BookError::UnknownEntry { .. })
        ));
        assert!(matches!(
            book.add_entry(MapEntryAction::Add, b"ORD3", &FieldSet::new()),
            Err(BookError::MissingSide { .. })
        ));
    }
}
