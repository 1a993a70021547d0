//! Market-By-Price accumulator
//!
//! Entries are keyed by an opaque price-point string. Providers do not always
//! send price and side on every entry, so the accumulator keeps a live map of
//! price point → (price, side), filled on Add and consulted on Update/Delete.
//! The side can also come from the key's trailing `A`/`B` marker.
//!
//! Downstream consumers key levels by price. An Update that moves a price
//! point to a new price or side therefore emits a Delete of the old level
//! before the new level, and a price point stays in the map exactly as long
//! as its level is in the book. A second index from (price, side) to key
//! holds at most one key per level: when an entry lands on a level another
//! key owns, that key is deleted first.

use std::collections::HashMap;

use rdm_types::{MapEntryAction, Side};

use super::{
    f64_of, fids, key_text, price_of, side_of, u64_of, BookAccumulator, BookAction, BookEntry,
    BookError, BookMessage,
};
use crate::fields::FieldSet;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PricePoint {
    pub price: f64,
    pub side: Side,
}

impl PricePoint {
    fn level_key(self) -> (u64, Side) {
        (self.price.to_bits(), self.side)
    }
}

#[derive(Debug, Default)]
pub struct MbpAccumulator {
    price_points: HashMap<Vec<u8>, PricePoint>,
    /// (price bits, side) → owning price-point key
    levels: HashMap<(u64, Side), Vec<u8>>,
    clear: bool,
    pending: Vec<BookEntry>,
}

impl MbpAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn price_point(&self, key: &[u8]) -> Option<PricePoint> {
        self.price_points.get(key).copied()
    }

    pub fn price_points(&self) -> impl Iterator<Item = (&[u8], &PricePoint)> {
        self.price_points.iter().map(|(k, v)| (k.as_slice(), v))
    }

    fn level(action: BookAction, key: &[u8], point: PricePoint, fields: &FieldSet) -> BookEntry {
        BookEntry {
            action,
            key: key_text(key),
            side: Some(point.side),
            price: Some(point.price),
            size: f64_of(fields, fids::ACC_SIZE).or_else(|| f64_of(fields, fids::ORDER_SIZE)),
            num_orders: u64_of(fields, fids::NO_ORD),
            time_ms: u64_of(fields, fids::LV_TIM_MS),
        }
    }

    fn delete_level(key: &[u8], point: PricePoint) -> BookEntry {
        BookEntry {
            action: BookAction::Delete,
            key: key_text(key),
            side: Some(point.side),
            price: Some(point.price),
            size: None,
            num_orders: None,
            time_ms: None,
        }
    }

    /// Price and side of an Add/Update, falling back to the tracked point
    fn resolve(
        &self,
        key: &[u8],
        fields: &FieldSet,
        known: Option<PricePoint>,
    ) -> Result<PricePoint, BookError> {
        let side = side_of(fields)
            .or_else(|| Side::from_key_marker(key))
            .or(known.map(|p| p.side))
            .ok_or_else(|| BookError::MissingSide { key: key_text(key) })?;
        let price = price_of(fields)
            .or(known.map(|p| p.price))
            .ok_or_else(|| BookError::MissingPrice { key: key_text(key) })?;
        Ok(PricePoint { price, side })
    }

    /// Drop `key` from both indexes
    fn forget(&mut self, key: &[u8]) -> Option<PricePoint> {
        let point = self.price_points.remove(key)?;
        if self.levels.get(&point.level_key()).is_some_and(|k| k == key) {
            self.levels.remove(&point.level_key());
        }
        Some(point)
    }

    fn upsert(&mut self, key: &[u8], fields: &FieldSet) -> Result<(), BookError> {
        let known = self.price_points.get(key).copied();
        let point = self.resolve(key, fields, known)?;

        let displaced = self
            .levels
            .get(&point.level_key())
            .filter(|owner| owner.as_slice() != key)
            .cloned();
        if let Some(owner) = displaced {
            if let Some(old) = self.forget(&owner) {
                self.pending.push(Self::delete_level(&owner, old));
            }
        }

        match known {
            Some(old) if old != point => {
                self.pending.push(Self::delete_level(key, old));
                self.pending
                    .push(Self::level(BookAction::Add, key, point, fields));
            }
            Some(_) => {
                self.pending
                    .push(Self::level(BookAction::Update, key, point, fields));
            }
            // an Update for a level never added is published as new
            None => {
                self.pending
                    .push(Self::level(BookAction::Add, key, point, fields));
            }
        }
        if let Some(old) = known {
            if self.levels.get(&old.level_key()).is_some_and(|k| k == key) {
                self.levels.remove(&old.level_key());
            }
        }
        self.price_points.insert(key.to_vec(), point);
        self.levels.insert(point.level_key(), key.to_vec());
        Ok(())
    }
}

impl BookAccumulator for MbpAccumulator {
    fn start_update(&mut self, clear: bool) {
        self.pending.clear();
        self.clear = clear;
        if clear {
            self.price_points.clear();
            self.levels.clear();
        }
    }

    fn add_entry(
        &mut self,
        action: MapEntryAction,
        key: &[u8],
        fields: &FieldSet,
    ) -> Result<(), BookError> {
        match action {
            MapEntryAction::Add | MapEntryAction::Update => self.upsert(key, fields),
            MapEntryAction::Delete => {
                let old = self
                    .forget(key)
                    .ok_or_else(|| BookError::UnknownEntry { key: key_text(key) })?;
                self.pending.push(Self::delete_level(key, old));
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
        self.price_points.len()
    }
}
