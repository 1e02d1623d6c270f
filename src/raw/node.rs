use smallvec::SmallVec;

use super::handle::Handle;
use crate::Key;

/// Inline row capacity. Nodes of a tree whose degree outgrows this spill
/// their rows to the heap; typical ring degrees fit inline.
pub(crate) const INLINE_ROW: usize = 8;

pub(crate) type KeyRow = SmallVec<[Key; INLINE_ROW]>;
pub(crate) type HandleRow = SmallVec<[Handle; INLINE_ROW]>;

/// A tree node. The variant is the leaf flag: leaves sit at level 0 and
/// carry value handles, internal nodes carry separator keys and child
/// links, with one more child than keys.
pub(crate) enum Node {
    Internal(InternalNode),
    Leaf(LeafNode),
}

/// Leaf node: parallel rows of keys and value handles in ascending key
/// order, chained to its neighbours through the cyclic leaf ring.
pub(crate) struct LeafNode {
    parent: Option<Handle>,
    prev: Handle,
    next: Handle,
    keys: KeyRow,
    values: HandleRow,
}

/// Internal node: separator keys and child handles. `keys[i]` equals the
/// smallest key in the subtree under `children[i + 1]`; `children[0]` has
/// no separator. Carries its own per-level sibling ring.
pub(crate) struct InternalNode {
    level: usize,
    parent: Option<Handle>,
    prev: Handle,
    next: Handle,
    keys: KeyRow,
    children: HandleRow,
}

impl Node {
    pub(crate) fn as_leaf(&self) -> &LeafNode {
        match self {
            Node::Leaf(leaf) => leaf,
            Node::Internal(_) => panic!("expected leaf node"),
        }
    }

    pub(crate) fn as_leaf_mut(&mut self) -> &mut LeafNode {
        match self {
            Node::Leaf(leaf) => leaf,
            Node::Internal(_) => panic!("expected leaf node"),
        }
    }

    pub(crate) fn as_internal(&self) -> &InternalNode {
        match self {
            Node::Internal(internal) => internal,
            Node::Leaf(_) => panic!("expected internal node"),
        }
    }

    pub(crate) fn as_internal_mut(&mut self) -> &mut InternalNode {
        match self {
            Node::Internal(internal) => internal,
            Node::Leaf(_) => panic!("expected internal node"),
        }
    }

    pub(crate) fn into_leaf(self) -> LeafNode {
        match self {
            Node::Leaf(leaf) => leaf,
            Node::Internal(_) => panic!("expected leaf node"),
        }
    }

    pub(crate) fn into_internal(self) -> InternalNode {
        match self {
            Node::Internal(internal) => internal,
            Node::Leaf(_) => panic!("expected internal node"),
        }
    }

    pub(crate) fn key_count(&self) -> usize {
        self.keys().len()
    }

    pub(crate) fn keys(&self) -> &[Key] {
        match self {
            Node::Internal(internal) => internal.keys(),
            Node::Leaf(leaf) => leaf.keys(),
        }
    }

    /// Leaves are level 0; an internal node is one above its children.
    pub(crate) fn level(&self) -> usize {
        match self {
            Node::Internal(internal) => internal.level,
            Node::Leaf(_) => 0,
        }
    }

    pub(crate) fn parent(&self) -> Option<Handle> {
        match self {
            Node::Internal(internal) => internal.parent,
            Node::Leaf(leaf) => leaf.parent,
        }
    }

    pub(crate) fn set_parent(&mut self, parent: Option<Handle>) {
        match self {
            Node::Internal(internal) => internal.parent = parent,
            Node::Leaf(leaf) => leaf.parent = parent,
        }
    }

    pub(crate) fn prev(&self) -> Handle {
        match self {
            Node::Internal(internal) => internal.prev,
            Node::Leaf(leaf) => leaf.prev,
        }
    }

    pub(crate) fn next(&self) -> Handle {
        match self {
            Node::Internal(internal) => internal.next,
            Node::Leaf(leaf) => leaf.next,
        }
    }

    pub(crate) fn set_prev(&mut self, prev: Handle) {
        match self {
            Node::Internal(internal) => internal.prev = prev,
            Node::Leaf(leaf) => leaf.prev = prev,
        }
    }

    pub(crate) fn set_next(&mut self, next: Handle) {
        match self {
            Node::Internal(internal) => internal.next = next,
            Node::Leaf(leaf) => leaf.next = next,
        }
    }
}

impl LeafNode {
    /// Creates an empty leaf whose ring links point at itself.
    pub(crate) fn new(own: Handle) -> Self {
        Self {
            parent: None,
            prev: own,
            next: own,
            keys: KeyRow::new(),
            values: HandleRow::new(),
        }
    }

    /// Creates a leaf pre-filled with rows split off a sibling.
    pub(crate) fn from_rows(own: Handle, keys: KeyRow, values: HandleRow) -> Self {
        Self {
            parent: None,
            prev: own,
            next: own,
            keys,
            values,
        }
    }

    pub(crate) fn key_count(&self) -> usize {
        self.keys.len()
    }

    #[inline]
    pub(crate) fn key(&self, index: usize) -> Key {
        self.keys[index]
    }

    pub(crate) fn keys(&self) -> &[Key] {
        &self.keys
    }

    #[inline]
    pub(crate) fn value(&self, index: usize) -> Handle {
        self.values[index]
    }

    pub(crate) fn next(&self) -> Handle {
        self.next
    }

    /// `Ok(i)` if the key is at `i`, `Err(i)` with the insertion slot
    /// otherwise.
    #[inline]
    pub(crate) fn search(&self, key: Key) -> Result<usize, usize> {
        self.keys.binary_search(&key)
    }

    pub(crate) fn insert(&mut self, index: usize, key: Key, value: Handle) {
        self.keys.insert(index, key);
        self.values.insert(index, value);
    }

    pub(crate) fn remove(&mut self, index: usize) -> (Key, Handle) {
        (self.keys.remove(index), self.values.remove(index))
    }

    /// Splits off the upper rows starting at `at` for a new right sibling.
    pub(crate) fn split_off(&mut self, at: usize) -> (KeyRow, HandleRow) {
        let keys = self.keys.drain(at..).collect();
        let values = self.values.drain(at..).collect();
        (keys, values)
    }

    /// Removes the lowest `count` pairs, in order.
    pub(crate) fn take_front(&mut self, count: usize) -> (KeyRow, HandleRow) {
        let keys = self.keys.drain(..count).collect();
        let values = self.values.drain(..count).collect();
        (keys, values)
    }

    /// Removes the highest `count` pairs, in order.
    pub(crate) fn take_back(&mut self, count: usize) -> (KeyRow, HandleRow) {
        let at = self.keys.len() - count;
        self.split_off(at)
    }

    pub(crate) fn prepend_rows(&mut self, keys: KeyRow, values: HandleRow) {
        self.keys.insert_many(0, keys);
        self.values.insert_many(0, values);
    }

    pub(crate) fn append_rows(&mut self, mut keys: KeyRow, mut values: HandleRow) {
        self.keys.append(&mut keys);
        self.values.append(&mut values);
    }

    /// Appends all pairs of a right-hand sibling being merged away.
    pub(crate) fn absorb(&mut self, mut right: LeafNode) {
        self.keys.append(&mut right.keys);
        self.values.append(&mut right.values);
    }
}

impl InternalNode {
    /// Creates an empty internal node whose ring links point at itself.
    pub(crate) fn new(own: Handle, level: usize) -> Self {
        Self {
            level,
            parent: None,
            prev: own,
            next: own,
            keys: KeyRow::new(),
            children: HandleRow::new(),
        }
    }

    /// Creates an internal node pre-filled with rows split off a sibling.
    pub(crate) fn from_rows(own: Handle, level: usize, keys: KeyRow, children: HandleRow) -> Self {
        Self {
            level,
            parent: None,
            prev: own,
            next: own,
            keys,
            children,
        }
    }

    pub(crate) fn level(&self) -> usize {
        self.level
    }

    pub(crate) fn key_count(&self) -> usize {
        self.keys.len()
    }

    pub(crate) fn keys(&self) -> &[Key] {
        &self.keys
    }

    pub(crate) fn set_key(&mut self, index: usize, key: Key) {
        self.keys[index] = key;
    }

    /// Replaces the whole separator row, recomputed from child minimums.
    pub(crate) fn set_keys(&mut self, keys: KeyRow) {
        self.keys = keys;
    }

    pub(crate) fn child_count(&self) -> usize {
        self.children.len()
    }

    #[inline]
    pub(crate) fn child(&self, index: usize) -> Handle {
        self.children[index]
    }

    pub(crate) fn children(&self) -> &[Handle] {
        &self.children
    }

    /// Index of the child covering `key`: the child after the last
    /// separator less than or equal to it.
    #[inline]
    pub(crate) fn search_child(&self, key: Key) -> usize {
        self.keys.partition_point(|&k| k <= key)
    }

    /// Position of a child, by handle identity.
    pub(crate) fn position_of(&self, child: Handle) -> Option<usize> {
        self.children.iter().position(|&c| c == child)
    }

    /// Seeds a fresh node with its single leftmost child.
    pub(crate) fn push_first_child(&mut self, child: Handle) {
        debug_assert!(self.children.is_empty());
        self.children.push(child);
    }

    /// Inserts `right` as the child immediately after position `pos`, with
    /// `key` as its separator.
    pub(crate) fn insert_child_right(&mut self, pos: usize, key: Key, right: Handle) {
        self.keys.insert(pos, key);
        self.children.insert(pos + 1, right);
    }

    /// Removes the child at `pos` along with the separator that goes with
    /// it (for the leftmost child, the separator of the child that becomes
    /// leftmost).
    pub(crate) fn remove_child_at(&mut self, pos: usize) -> Handle {
        let child = self.children.remove(pos);
        self.keys.remove(pos.max(1) - 1);
        child
    }

    /// Splits at separator index `at`: the right sibling takes
    /// `keys[at + 1..]` and `children[at + 1..]`, and `keys[at]` is
    /// promoted, living on only in the parent.
    pub(crate) fn split_off(&mut self, at: usize) -> (Key, KeyRow, HandleRow) {
        let right_keys = self.keys.drain(at + 1..).collect();
        let right_children = self.children.drain(at + 1..).collect();
        let promoted = self.keys.pop().unwrap();
        (promoted, right_keys, right_children)
    }

    /// Removes the lowest `count` children. Separator rows of both nodes
    /// are rebuilt by the caller.
    pub(crate) fn take_children_front(&mut self, count: usize) -> HandleRow {
        self.children.drain(..count).collect()
    }

    /// Removes the highest `count` children.
    pub(crate) fn take_children_back(&mut self, count: usize) -> HandleRow {
        let at = self.children.len() - count;
        self.children.drain(at..).collect()
    }

    pub(crate) fn prepend_children(&mut self, children: HandleRow) {
        self.children.insert_many(0, children);
    }

    pub(crate) fn append_children(&mut self, mut children: HandleRow) {
        self.children.append(&mut children);
    }

    /// Appends the children of a right-hand sibling being merged away.
    pub(crate) fn absorb(&mut self, mut right: InternalNode) {
        self.children.append(&mut right.children);
    }
}
