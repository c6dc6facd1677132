use crate::surface::ScrollSnapshot;
use std::collections::HashSet;
use std::fmt;
use tracing::debug;

pub const DEFAULT_MAX_PANES: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PaneId(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TabId(pub u64);

impl fmt::Display for PaneId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "pane-{}", self.0)
    }
}

impl fmt::Display for TabId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tab-{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Orientation {
    Horizontal,
    Vertical,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Tab {
    id: TabId,
    session_id: Option<String>,
    attached_multiplexer: Option<String>,
    saved_scroll: Option<ScrollSnapshot>,
}

impl Tab {
    fn new(id: TabId) -> Self {
        Self {
            id,
            session_id: None,
            attached_multiplexer: None,
            saved_scroll: None,
        }
    }

    pub fn id(&self) -> TabId {
        self.id
    }

    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    pub fn attached_multiplexer(&self) -> Option<&str> {
        self.attached_multiplexer.as_deref()
    }

    pub fn saved_scroll(&self) -> Option<ScrollSnapshot> {
        self.saved_scroll
    }

    pub fn is_bound(&self) -> bool {
        self.attached_multiplexer.is_some()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PaneLeaf {
    id: PaneId,
    tabs: Vec<Tab>,
    active_tab: TabId,
}

impl PaneLeaf {
    fn new(id: PaneId, first_tab: TabId) -> Self {
        Self {
            id,
            tabs: vec![Tab::new(first_tab)],
            active_tab: first_tab,
        }
    }

    pub fn id(&self) -> PaneId {
        self.id
    }

    pub fn tabs(&self) -> &[Tab] {
        &self.tabs
    }

    pub fn active_tab_id(&self) -> TabId {
        self.active_tab
    }

    pub fn active_tab(&self) -> Option<&Tab> {
        self.tab(self.active_tab)
    }

    pub fn tab(&self, tab: TabId) -> Option<&Tab> {
        self.tabs.iter().find(|candidate| candidate.id == tab)
    }

    fn tab_mut(&mut self, tab: TabId) -> Option<&mut Tab> {
        self.tabs.iter_mut().find(|candidate| candidate.id == tab)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PaneSplit {
    id: PaneId,
    orientation: Orientation,
    first: Box<PaneNode>,
    second: Box<PaneNode>,
}

impl PaneSplit {
    pub fn id(&self) -> PaneId {
        self.id
    }

    pub fn orientation(&self) -> Orientation {
        self.orientation
    }

    pub fn children(&self) -> [&PaneNode; 2] {
        [self.first.as_ref(), self.second.as_ref()]
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum PaneNode {
    Leaf(PaneLeaf),
    Split(PaneSplit),
}

impl PaneNode {
    pub fn id(&self) -> PaneId {
        match self {
            PaneNode::Leaf(leaf) => leaf.id,
            PaneNode::Split(split) => split.id,
        }
    }

    fn collect_leaves<'a>(&'a self, out: &mut Vec<&'a PaneLeaf>) {
        match self {
            PaneNode::Leaf(leaf) => out.push(leaf),
            PaneNode::Split(split) => {
                split.first.collect_leaves(out);
                split.second.collect_leaves(out);
            }
        }
    }

    fn first_leaf(&self) -> PaneId {
        match self {
            PaneNode::Leaf(leaf) => leaf.id,
            PaneNode::Split(split) => split.first.first_leaf(),
        }
    }

    fn find_mut(&mut self, id: PaneId) -> Option<&mut PaneNode> {
        if self.id() == id {
            return Some(self);
        }
        match self {
            PaneNode::Leaf(_) => None,
            PaneNode::Split(split) => match split.first.find_mut(id) {
                Some(found) => Some(found),
                None => split.second.find_mut(id),
            },
        }
    }

    fn leaf_mut(&mut self, id: PaneId) -> Option<&mut PaneLeaf> {
        match self.find_mut(id)? {
            PaneNode::Leaf(leaf) => Some(leaf),
            PaneNode::Split(_) => None,
        }
    }

    /// Removes leaf `id` and puts its sibling subtree where their parent was.
    /// Returns the removed leaf and the first leaf of the promoted sibling.
    fn remove_leaf(&mut self, id: PaneId) -> Option<(PaneLeaf, PaneId)> {
        let target_side = match self {
            PaneNode::Leaf(_) => return None,
            PaneNode::Split(split) => {
                if matches!(&*split.first, PaneNode::Leaf(leaf) if leaf.id == id) {
                    Some(0)
                } else if matches!(&*split.second, PaneNode::Leaf(leaf) if leaf.id == id) {
                    Some(1)
                } else {
                    None
                }
            }
        };
        let Some(side) = target_side else {
            let PaneNode::Split(split) = self else {
                return None;
            };
            return match split.first.remove_leaf(id) {
                Some(removed) => Some(removed),
                None => split.second.remove_leaf(id),
            };
        };

        let taken = std::mem::replace(self, PaneNode::Leaf(PaneLeaf::new(PaneId(0), TabId(0))));
        let split = match taken {
            PaneNode::Split(split) => split,
            other => {
                *self = other;
                return None;
            }
        };
        let (removed, sibling) = if side == 0 {
            (split.first, split.second)
        } else {
            (split.second, split.first)
        };
        *self = *sibling;
        match *removed {
            PaneNode::Leaf(leaf) => Some((leaf, self.first_leaf())),
            PaneNode::Split(_) => None,
        }
    }
}

/// The binary layout tree plus the process-wide focus pointer.
///
/// Queries are pure. Mutators check their own preconditions and return
/// `None`/`false` instead of failing, so the tree is valid after every call.
/// A tab's multiplexer binding can only be changed from inside the crate,
/// which is where the attach protocol lives.
#[derive(Debug, Clone)]
pub struct PaneTree {
    root: PaneNode,
    focused: PaneId,
    max_panes: usize,
    next_id: u64,
}

impl Default for PaneTree {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_PANES)
    }
}

impl PaneTree {
    pub fn new(max_panes: usize) -> Self {
        let root = PaneLeaf::new(PaneId(1), TabId(2));
        Self {
            focused: root.id,
            root: PaneNode::Leaf(root),
            max_panes: max_panes.max(1),
            next_id: 3,
        }
    }

    pub fn root(&self) -> &PaneNode {
        &self.root
    }

    pub fn focused_pane(&self) -> PaneId {
        self.focused
    }

    pub fn leaves(&self) -> Vec<&PaneLeaf> {
        let mut out = Vec::new();
        self.root.collect_leaves(&mut out);
        out
    }

    pub fn leaf_ids(&self) -> Vec<PaneId> {
        self.leaves().iter().map(|leaf| leaf.id).collect()
    }

    pub fn leaf_count(&self) -> usize {
        self.leaves().len()
    }

    pub fn get_pane_data(&self, pane: PaneId) -> Option<&PaneLeaf> {
        self.leaves().into_iter().find(|leaf| leaf.id == pane)
    }

    pub fn get_active_tab(&self, pane: PaneId) -> Option<&Tab> {
        self.get_pane_data(pane)?.active_tab()
    }

    pub fn tab(&self, pane: PaneId, tab: TabId) -> Option<&Tab> {
        self.get_pane_data(pane)?.tab(tab)
    }

    pub fn can_split(&self) -> bool {
        self.leaf_count() < self.max_panes
    }

    pub fn can_close(&self, pane: PaneId) -> bool {
        self.get_pane_data(pane).is_some() && self.leaf_count() > 1
    }

    pub fn split_horizontal(&mut self, pane: PaneId) -> Option<PaneId> {
        self.split(pane, Orientation::Horizontal)
    }

    pub fn split_vertical(&mut self, pane: PaneId) -> Option<PaneId> {
        self.split(pane, Orientation::Vertical)
    }

    /// Replaces leaf `pane` with a split holding the original leaf and a
    /// fresh one. Returns the fresh leaf's id.
    pub fn split(&mut self, pane: PaneId, orientation: Orientation) -> Option<PaneId> {
        if !self.can_split() || self.get_pane_data(pane).is_none() {
            return None;
        }
        let split_id = PaneId(self.alloc_id());
        let fresh = PaneLeaf::new(PaneId(self.alloc_id()), TabId(self.alloc_id()));
        let fresh_id = fresh.id;
        let slot = self.root.find_mut(pane)?;
        let original = std::mem::replace(slot, PaneNode::Leaf(PaneLeaf::new(PaneId(0), TabId(0))));
        *slot = PaneNode::Split(PaneSplit {
            id: split_id,
            orientation,
            first: Box::new(original),
            second: Box::new(PaneNode::Leaf(fresh)),
        });
        debug!(event = "pane_split", pane = %pane, fresh = %fresh_id, orientation = ?orientation);
        Some(fresh_id)
    }

    /// Removes leaf `pane`, promoting its sibling. Refuses to remove the
    /// last leaf. Focus moves into the promoted subtree if it was on `pane`.
    pub fn close(&mut self, pane: PaneId) -> Option<PaneLeaf> {
        if !self.can_close(pane) {
            return None;
        }
        let (removed, promoted) = self.root.remove_leaf(pane)?;
        if self.focused == pane {
            self.focused = promoted;
        }
        debug!(event = "pane_closed", pane = %pane, focus = %self.focused);
        Some(removed)
    }

    pub fn focus_pane(&mut self, pane: PaneId) -> bool {
        if self.get_pane_data(pane).is_none() {
            return false;
        }
        self.focused = pane;
        true
    }

    /// Appends a fresh tab and makes it active.
    pub fn add_tab(&mut self, pane: PaneId) -> Option<TabId> {
        let tab_id = TabId(self.peek_id());
        let leaf = self.root.leaf_mut(pane)?;
        leaf.tabs.push(Tab::new(tab_id));
        leaf.active_tab = tab_id;
        self.next_id += 1;
        Some(tab_id)
    }

    /// Removes a tab. Closing the active tab selects the tab now at the same
    /// index, else the last one. A pane never goes without tabs: removing the
    /// only tab leaves a fresh unbound one in its place.
    pub fn close_tab(&mut self, pane: PaneId, tab: TabId) -> Option<Tab> {
        let replacement = TabId(self.peek_id());
        let leaf = self.root.leaf_mut(pane)?;
        let index = leaf.tabs.iter().position(|candidate| candidate.id == tab)?;
        let removed = leaf.tabs.remove(index);
        let mut used_replacement = false;
        if leaf.tabs.is_empty() {
            leaf.tabs.push(Tab::new(replacement));
            leaf.active_tab = replacement;
            used_replacement = true;
        } else if leaf.active_tab == tab {
            let next = leaf.tabs.get(index).or_else(|| leaf.tabs.last());
            if let Some(next) = next {
                leaf.active_tab = next.id;
            }
        }
        if used_replacement {
            self.next_id += 1;
        }
        Some(removed)
    }

    pub fn switch_tab(&mut self, pane: PaneId, tab: TabId) -> bool {
        let Some(leaf) = self.root.leaf_mut(pane) else {
            return false;
        };
        if leaf.tab(tab).is_none() {
            return false;
        }
        leaf.active_tab = tab;
        true
    }

    pub fn save_tab_scroll(&mut self, pane: PaneId, tab: TabId, snapshot: ScrollSnapshot) -> bool {
        match self.root.leaf_mut(pane).and_then(|leaf| leaf.tab_mut(tab)) {
            Some(tab) => {
                tab.saved_scroll = Some(snapshot);
                true
            }
            None => false,
        }
    }

    pub(crate) fn set_binding(
        &mut self,
        pane: PaneId,
        tab: TabId,
        session_id: Option<String>,
        multiplexer: Option<String>,
    ) -> bool {
        match self.root.leaf_mut(pane).and_then(|leaf| leaf.tab_mut(tab)) {
            Some(tab) => {
                tab.session_id = session_id;
                tab.attached_multiplexer = multiplexer;
                true
            }
            None => false,
        }
    }

    /// Structural self-check: at least one leaf, unique ids, every leaf has
    /// tabs and an active tab that exists, focus on a leaf.
    pub fn is_valid(&self) -> bool {
        let leaves = self.leaves();
        if leaves.is_empty() || leaves.len() > self.max_panes {
            return false;
        }
        let mut seen = HashSet::new();
        if !collect_ids(&self.root, &mut seen) {
            return false;
        }
        for leaf in &leaves {
            if leaf.tabs.is_empty() || leaf.active_tab().is_none() {
                return false;
            }
            for tab in &leaf.tabs {
                if !seen.insert(tab.id.0) {
                    return false;
                }
            }
        }
        leaves.iter().any(|leaf| leaf.id == self.focused)
    }

    fn alloc_id(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    fn peek_id(&self) -> u64 {
        self.next_id
    }
}

fn collect_ids(node: &PaneNode, seen: &mut HashSet<u64>) -> bool {
    if !seen.insert(node.id().0) {
        return false;
    }
    match node {
        PaneNode::Leaf(_) => true,
        PaneNode::Split(split) => collect_ids(&split.first, seen) && collect_ids(&split.second, seen),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn root_id(tree: &PaneTree) -> PaneId {
        tree.leaf_ids()[0]
    }

    #[test]
    fn new_tree_has_single_focused_leaf_with_one_tab() {
        let tree = PaneTree::default();
        let pane = root_id(&tree);
        assert_eq!(tree.focused_pane(), pane);
        assert_eq!(tree.get_pane_data(pane).expect("leaf").tabs().len(), 1);
        assert!(tree.get_active_tab(pane).is_some());
        assert!(tree.is_valid());
        assert!(!tree.can_close(pane));
    }

    #[test]
    fn split_then_close_restores_shape() {
        let mut tree = PaneTree::default();
        let pane = root_id(&tree);
        let before = tree.root().clone();

        let fresh = tree.split_vertical(pane).expect("split");
        assert_eq!(tree.leaf_ids(), vec![pane, fresh]);
        match tree.root() {
            PaneNode::Split(split) => assert_eq!(split.orientation(), Orientation::Vertical),
            other => panic!("expected split, got {other:?}"),
        }
        assert!(tree.is_valid());

        tree.close(fresh).expect("close");
        assert_eq!(tree.root(), &before);
        assert!(tree.is_valid());
    }

    #[test]
    fn close_promotes_exactly_the_sibling_subtree() {
        let mut tree = PaneTree::default();
        let a = root_id(&tree);
        let b = tree.split_horizontal(a).expect("split a");
        let c = tree.split_vertical(b).expect("split b");
        let sibling = match tree.root() {
            PaneNode::Split(split) => split.children()[1].clone(),
            other => panic!("expected split, got {other:?}"),
        };

        tree.close(a).expect("close a");
        assert_eq!(tree.root(), &sibling);
        assert_eq!(tree.leaf_ids(), vec![b, c]);
        assert!(tree.is_valid());
    }

    #[test]
    fn closing_focused_pane_moves_focus_into_promoted_subtree() {
        let mut tree = PaneTree::default();
        let a = root_id(&tree);
        let b = tree.split_horizontal(a).expect("split");
        let c = tree.split_horizontal(b).expect("split");
        assert!(tree.focus_pane(a));

        tree.close(a);
        assert_eq!(tree.focused_pane(), b);
        assert!(tree.focus_pane(c));
        tree.close(c);
        assert_eq!(tree.focused_pane(), b);
    }

    #[test]
    fn split_is_capped_and_last_leaf_cannot_close() {
        let mut tree = PaneTree::new(3);
        let a = root_id(&tree);
        let b = tree.split_horizontal(a).expect("split");
        tree.split_vertical(b).expect("split");
        assert!(!tree.can_split());
        assert_eq!(tree.split_horizontal(a), None);
        assert_eq!(tree.leaf_count(), 3);

        let mut single = PaneTree::default();
        let only = root_id(&single);
        assert!(single.close(only).is_none());
        assert_eq!(single.leaf_count(), 1);
    }

    #[test]
    fn split_and_close_reject_internal_nodes() {
        let mut tree = PaneTree::default();
        let a = root_id(&tree);
        tree.split_horizontal(a).expect("split");
        let internal = tree.root().id();
        assert_eq!(tree.split_vertical(internal), None);
        assert!(tree.close(internal).is_none());
        assert!(!tree.focus_pane(internal));
        assert!(tree.is_valid());
    }

    #[test]
    fn closing_active_tab_selects_same_index_then_last() {
        let mut tree = PaneTree::default();
        let pane = root_id(&tree);
        let first = tree.get_active_tab(pane).expect("tab").id();
        let second = tree.add_tab(pane).expect("tab");
        let third = tree.add_tab(pane).expect("tab");
        assert_eq!(tree.get_active_tab(pane).expect("active").id(), third);

        assert!(tree.switch_tab(pane, second));
        tree.close_tab(pane, second).expect("close");
        assert_eq!(tree.get_active_tab(pane).expect("active").id(), third);

        tree.close_tab(pane, third).expect("close");
        assert_eq!(tree.get_active_tab(pane).expect("active").id(), first);
    }

    #[test]
    fn closing_inactive_tab_keeps_selection() {
        let mut tree = PaneTree::default();
        let pane = root_id(&tree);
        let first = tree.get_active_tab(pane).expect("tab").id();
        let second = tree.add_tab(pane).expect("tab");
        tree.close_tab(pane, first).expect("close");
        assert_eq!(tree.get_active_tab(pane).expect("active").id(), second);
    }

    #[test]
    fn closing_only_tab_leaves_a_fresh_one() {
        let mut tree = PaneTree::default();
        let pane = root_id(&tree);
        let only = tree.get_active_tab(pane).expect("tab").id();
        let removed = tree.close_tab(pane, only).expect("close");
        assert_eq!(removed.id(), only);
        let fresh = tree.get_active_tab(pane).expect("fresh tab");
        assert_ne!(fresh.id(), only);
        assert!(!fresh.is_bound());
        assert!(tree.is_valid());
    }

    #[test]
    fn bindings_are_set_through_crate_api() {
        let mut tree = PaneTree::default();
        let pane = root_id(&tree);
        let tab = tree.get_active_tab(pane).expect("tab").id();
        assert!(tree.set_binding(
            pane,
            tab,
            Some("s1".to_string()),
            Some("claude-s1".to_string())
        ));
        let bound = tree.tab(pane, tab).expect("tab");
        assert_eq!(bound.session_id(), Some("s1"));
        assert_eq!(bound.attached_multiplexer(), Some("claude-s1"));
        assert!(!tree.set_binding(pane, TabId(999), None, None));
    }
}
