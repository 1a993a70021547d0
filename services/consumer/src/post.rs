//! Post/ack correlation
//!
//! Every outgoing post gets an id; the provider echoes it as the ack id. Acks
//! normally arrive in post order, so lookup scans from the oldest entry and
//! the number of entries skipped is logged to expose reordering.
//!
//! Acks arrive either off-stream on the login stream or on the item's own
//! stream. Both resolve through the same correlator; whichever arrives first
//! wins and a second ack for the same id is logged as unknown.

use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::events::ItemKey;

/// Receives the ack or nak for a post
pub trait PostListener: Send + Sync {
    fn on_ack(&self, ack: &PostAck);
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PostOutcome {
    Ack,
    Nak { code: u8, text: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PostAck {
    pub post_id: u32,
    pub key: ItemKey,
    /// Caller's reply tag, echoed back untouched
    pub reply: Option<String>,
    pub outcome: PostOutcome,
}

impl PostAck {
    pub fn is_ack(&self) -> bool {
        self.outcome == PostOutcome::Ack
    }
}

/// Poster and reply tag waiting on one post id
#[derive(Clone)]
pub struct PostTarget {
    pub poster: Arc<dyn PostListener>,
    pub key: ItemKey,
    pub reply: Option<String>,
}

impl fmt::Debug for PostTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PostTarget")
            .field("key", &self.key)
            .field("reply", &self.reply)
            .finish()
    }
}

impl PostTarget {
    /// Deliver the outcome for `post_id` to the poster
    pub fn complete(self, post_id: u32, outcome: PostOutcome) {
        let ack = PostAck {
            post_id,
            key: self.key,
            reply: self.reply,
            outcome,
        };
        self.poster.on_ack(&ack);
    }
}

#[derive(Debug)]
pub struct PostCorrelator<T> {
    entries: VecDeque<(u32, T)>,
    next_id: u32,
}

impl<T> Default for PostCorrelator<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> PostCorrelator<T> {
    pub fn new() -> Self {
        Self {
            entries: VecDeque::new(),
            next_id: 1,
        }
    }

    /// Record an in-flight post and return its id
    ///
    /// Ids increase monotonically and wrap back to 1; 0 is never issued.
    pub fn add(&mut self, target: T) -> u32 {
        let id = self.next_id;
        self.next_id = match self.next_id.wrapping_add(1) {
            0 => 1,
            next => next,
        };
        self.entries.push_back((id, target));
        id
    }

    /// Take the entry an ack refers to
    pub fn remove(&mut self, ack_id: u32) -> Option<T> {
        let Some(position) = self.entries.iter().position(|(id, _)| *id == ack_id) else {
            warn!(ack_id, in_flight = self.entries.len(), "Ack for unknown post id");
            return None;
        };
        if position > 0 {
            debug!(ack_id, skipped = position, "Ack arrived out of post order");
        }
        self.entries.remove(position).map(|(_, target)| target)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Id the next `add` will return
    pub fn peek_next_id(&self) -> u32 {
        self.next_id
    }

    #[cfg(test)]
    pub(crate) fn set_next_id(&mut self, id: u32) {
        self.next_id = id;
    }
}
