//! Item listeners and the per-subscription listener set
//!
//! Listeners are invoked on the reactor thread. Fan-out iterates a snapshot of
//! the set, so a listener removed by a callback still sees the delivery that
//! was in progress and nothing after it.

use std::sync::Arc;

use crate::error::ItemError;
use crate::events::{ItemKey, ItemMessage, ItemStatus, Quality};

/// Caller-side handle identity, unique for the life of the session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerId(pub u64);

pub trait ItemListener: Send + Sync {
    fn on_message(&self, message: &ItemMessage);

    fn on_status(&self, _key: &ItemKey, _status: ItemStatus) {}

    fn on_error(&self, _key: &ItemKey, _error: &ItemError) {}

    fn on_quality(&self, _key: &ItemKey, _quality: Quality, _cause: &str) {}
}

pub type ListenerEntry = (ListenerId, Arc<dyn ItemListener>);

#[derive(Default, Clone)]
pub struct ListenerSet {
    entries: Vec<ListenerEntry>,
}

impl std::fmt::Debug for ListenerSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries(self.entries.iter().map(|(id, _)| id))
            .finish()
    }
}

impl ListenerSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, id: ListenerId, listener: Arc<dyn ItemListener>) {
        if !self.contains(id) {
            self.entries.push((id, listener));
        }
    }

    pub fn remove(&mut self, id: ListenerId) -> bool {
        let before = self.entries.len();
        self.entries.retain(|(existing, _)| *existing != id);
        self.entries.len() != before
    }

    pub fn contains(&self, id: ListenerId) -> bool {
        self.entries.iter().any(|(existing, _)| *existing == id)
    }

    pub fn get(&self, id: ListenerId) -> Option<Arc<dyn ItemListener>> {
        self.entries
            .iter()
            .find(|(existing, _)| *existing == id)
            .map(|(_, l)| l.clone())
    }

    pub fn ids(&self) -> impl Iterator<Item = ListenerId> + '_ {
        self.entries.iter().map(|(id, _)| *id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Copy of the current entries for iteration
    pub fn snapshot(&self) -> Vec<ListenerEntry> {
        self.entries.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Nop;

    impl ItemListener for Nop {
        fn on_message(&self, _message: &ItemMessage) {}
    }

    #[test]
    fn test_add_is_idempotent_and_remove_reports() {
        let mut set = ListenerSet::new();
        set.add(ListenerId(1), Arc::new(Nop));
        set.add(ListenerId(1), Arc::new(Nop));
        set.add(ListenerId(2), Arc::new(Nop));
        assert_eq!(set.len(), 2);

        let snapshot = set.snapshot();
        assert!(set.remove(ListenerId(1)));
        assert!(!set.remove(ListenerId(1)));
        assert_eq!(snapshot.len(), 2);
        assert_eq!(set.ids().collect::<Vec<_>>(), vec![ListenerId(2)]);
    }
}
