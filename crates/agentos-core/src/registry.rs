use crate::connection::ConnectionKey;
use crate::surface::ScrollSnapshot;
use std::collections::HashMap;

/// In-memory scroll snapshots keyed by (pane, tab). Best effort: nothing is
/// persisted and a fresh process starts empty.
#[derive(Debug, Default)]
pub struct ScrollRegistry {
    snapshots: HashMap<ConnectionKey, ScrollSnapshot>,
}

impl ScrollRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn store(&mut self, key: ConnectionKey, snapshot: ScrollSnapshot) {
        self.snapshots.insert(key, snapshot);
    }

    pub fn get(&self, key: ConnectionKey) -> Option<ScrollSnapshot> {
        self.snapshots.get(&key).copied()
    }

    pub fn take(&mut self, key: ConnectionKey) -> Option<ScrollSnapshot> {
        self.snapshots.remove(&key)
    }

    pub fn len(&self) -> usize {
        self.snapshots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshots.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pane_tree::{PaneId, TabId};

    #[test]
    fn store_overwrites_and_take_removes() {
        let key = ConnectionKey::new(PaneId(1), TabId(2));
        let mut registry = ScrollRegistry::new();
        registry.store(key, ScrollSnapshot { scroll_top: 3, ..Default::default() });
        registry.store(key, ScrollSnapshot { scroll_top: 9, ..Default::default() });
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.get(key).map(|s| s.scroll_top), Some(9));
        assert_eq!(registry.take(key).map(|s| s.scroll_top), Some(9));
        assert!(registry.is_empty());
    }
}
