//! Stream id allocator
//!
//! Item stream ids start at [`FIRST_ITEM_STREAM_ID`]; ids below it belong to
//! the login, directory and dictionary streams. Released ids go to a FIFO free
//! list and are handed out again before the bump region grows, so a long-lived
//! session keeps its id range compact.
//!
//! The table also tracks which streams still await their first response.
//! That pending set bounds how many opens the reactor puts on the wire at
//! once. Table and pending set live behind one mutex ([`SharedStreamTable`])
//! so a caller thread can read backpressure figures while the reactor writes.

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;

use parking_lot::Mutex;
use rdm_types::FIRST_ITEM_STREAM_ID;
use thiserror::Error;

use crate::error::ItemError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("all {capacity} item stream ids are in use")]
pub struct StreamsExhausted {
    pub capacity: usize,
}

impl From<StreamsExhausted> for ItemError {
    fn from(e: StreamsExhausted) -> Self {
        ItemError::StreamsExhausted {
            capacity: e.capacity,
        }
    }
}

/// Fixed-capacity map from stream id to owner
#[derive(Debug)]
pub struct StreamTable<T> {
    capacity: usize,
    slots: Vec<Option<T>>,
    free: VecDeque<i32>,
    in_use: usize,
    pending: HashSet<i32>,
}

pub type SharedStreamTable<T> = Arc<Mutex<StreamTable<T>>>;

impl<T: Copy> StreamTable<T> {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            slots: Vec::new(),
            free: VecDeque::new(),
            in_use: 0,
            pending: HashSet::new(),
        }
    }

    pub fn shared(capacity: usize) -> SharedStreamTable<T> {
        Arc::new(Mutex::new(Self::new(capacity)))
    }

    fn index(stream_id: i32) -> Option<usize> {
        stream_id
            .checked_sub(FIRST_ITEM_STREAM_ID)
            .and_then(|i| usize::try_from(i).ok())
    }

    /// Assign a stream id to `owner`
    pub fn allocate(&mut self, owner: T) -> Result<i32, StreamsExhausted> {
        let stream_id = if let Some(id) = self.free.pop_front() {
            id
        } else if self.slots.len() < self.capacity {
            self.slots.push(None);
            FIRST_ITEM_STREAM_ID + (self.slots.len() - 1) as i32
        } else {
            return Err(StreamsExhausted {
                capacity: self.capacity,
            });
        };

        if let Some(slot) = Self::index(stream_id).and_then(|i| self.slots.get_mut(i)) {
            *slot = Some(owner);
        }
        self.in_use += 1;
        Ok(stream_id)
    }

    pub fn lookup(&self, stream_id: i32) -> Option<T> {
        Self::index(stream_id)
            .and_then(|i| self.slots.get(i))
            .and_then(|slot| *slot)
    }

    /// Return a stream id to the free list
    ///
    /// Releasing an id that is not held is a no-op and returns `None`.
    pub fn release(&mut self, stream_id: i32) -> Option<T> {
        let owner = Self::index(stream_id)
            .and_then(|i| self.slots.get_mut(i))
            .and_then(|slot| slot.take())?;
        self.in_use -= 1;
        self.free.push_back(stream_id);
        self.pending.remove(&stream_id);
        Some(owner)
    }

    pub fn in_use(&self) -> usize {
        self.in_use
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Mark a stream as awaiting its first response
    pub fn mark_pending(&mut self, stream_id: i32) {
        self.pending.insert(stream_id);
    }

    /// First response arrived (or the item closed); returns whether it was pending
    pub fn clear_pending(&mut self, stream_id: i32) -> bool {
        self.pending.remove(&stream_id)
    }

    pub fn is_pending(&self, stream_id: i32) -> bool {
        self.pending.contains(&stream_id)
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Forget outstanding opens; used when the connection drops
    pub fn reset_pending(&mut self) {
        self.pending.clear();
    }
}
