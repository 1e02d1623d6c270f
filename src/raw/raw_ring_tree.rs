use alloc::vec::Vec;
use core::fmt;

use log::{debug, trace};

use super::arena::Arena;
use super::handle::Handle;
use super::node::{HandleRow, InternalNode, KeyRow, LeafNode, Node};
use crate::Key;

/// The core B+ tree backing `RingTree`.
///
/// Nodes live in one arena, values in another, and every link between
/// nodes (parent, child, ring neighbour) is a handle. The tree owns both
/// arenas outright; a node slot is released when the node is removed from
/// its parent and unlinked from its ring.
pub(crate) struct RawRingTree<V> {
    /// Arena storing all tree nodes.
    nodes: Arena<Node>,
    /// Arena storing all values, separate from the nodes so leaves stay
    /// small and value moves never touch the tree structure.
    values: Arena<V>,
    /// Handle to the root node, absent while the tree is empty.
    root: Option<Handle>,
    /// Number of live key-value pairs.
    len: usize,
    /// Most keys a non-root node may hold before it splits (the degree).
    max_keys: usize,
    /// Fewest keys a non-root node may keep before it rebalances.
    min_keys: usize,
}

impl<V> RawRingTree<V> {
    /// Creates an empty tree. The caller has already validated the degree.
    pub(crate) fn new(degree: usize) -> Self {
        debug_assert!(degree >= 3);
        Self {
            nodes: Arena::new(),
            values: Arena::new(),
            root: None,
            len: 0,
            max_keys: degree,
            min_keys: degree / 2,
        }
    }

    /// Creates an empty tree with arenas pre-sized for `capacity` pairs.
    pub(crate) fn with_capacity(degree: usize, capacity: usize) -> Self {
        debug_assert!(degree >= 3);
        Self {
            nodes: Arena::with_capacity(capacity.div_ceil(degree)),
            values: Arena::with_capacity(capacity),
            root: None,
            len: 0,
            max_keys: degree,
            min_keys: degree / 2,
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.len
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub(crate) fn degree(&self) -> usize {
        self.max_keys
    }

    pub(crate) fn clear(&mut self) {
        self.nodes.clear();
        self.values.clear();
        self.root = None;
        self.len = 0;
    }

    /// Smallest key in the tree.
    pub(crate) fn min_key(&self) -> Option<Key> {
        self.root.map(|root| self.subtree_min(root))
    }

    /// Largest key in the tree.
    pub(crate) fn max_key(&self) -> Option<Key> {
        self.root.map(|root| self.subtree_max(root))
    }

    // ─── Search path ────────────────────────────────────────────────────

    /// Descends from `start` to the leaf covering `key`: at each internal
    /// node, the child after the last separator less than or equal to the
    /// key.
    fn find_leaf_from(&self, start: Handle, key: Key) -> Handle {
        let mut current = start;
        loop {
            match self.nodes.get(current) {
                Node::Leaf(_) => return current,
                Node::Internal(internal) => {
                    current = internal.child(internal.search_child(key));
                }
            }
        }
    }

    pub(crate) fn get(&self, key: Key) -> Option<&V> {
        let root = self.root?;
        let leaf = self.nodes.get(self.find_leaf_from(root, key)).as_leaf();
        let index = leaf.search(key).ok()?;
        Some(self.values.get(leaf.value(index)))
    }

    pub(crate) fn get_mut(&mut self, key: Key) -> Option<&mut V> {
        let root = self.root?;
        let leaf = self.nodes.get(self.find_leaf_from(root, key)).as_leaf();
        let index = leaf.search(key).ok()?;
        let value = leaf.value(index);
        Some(self.values.get_mut(value))
    }

    pub(crate) fn contains_key(&self, key: Key) -> bool {
        self.get(key).is_some()
    }

    /// Values of the at-most-`n` least keys strictly greater than `key`,
    /// in ascending key order.
    ///
    /// The scan starts in the covering leaf just past the probe and walks
    /// the leaf ring. It stops early when the ring comes back around: at
    /// the start leaf, or at any step where the next leaf's minimum does
    /// not increase (the wrap past the maximum key). Fewer than `n`
    /// qualifying keys therefore yield a short result, never wrapped
    /// values.
    pub(crate) fn next_n(&self, key: Key, n: usize) -> Vec<&V> {
        let mut out = Vec::new();
        let Some(root) = self.root else {
            return out;
        };
        if n == 0 {
            return out;
        }
        out.reserve(n.min(self.len));

        let start = self.find_leaf_from(root, key);
        let mut current = start;
        let mut index = match self.nodes.get(start).as_leaf().search(key) {
            Ok(at) => at + 1,
            Err(at) => at,
        };
        loop {
            let leaf = self.nodes.get(current).as_leaf();
            if index < leaf.key_count() {
                out.push(self.values.get(leaf.value(index)));
                index += 1;
                if out.len() == n {
                    break;
                }
            } else {
                let next = leaf.next();
                if next == start || self.nodes.get(next).as_leaf().key(0) < leaf.key(0) {
                    break;
                }
                current = next;
                index = 0;
            }
        }
        out
    }

    // ─── Insertion ──────────────────────────────────────────────────────

    /// Upserts a pair, returning the previous value for an existing key.
    pub(crate) fn insert(&mut self, key: Key, value: V) -> Option<V> {
        let Some(root) = self.root else {
            let value_handle = self.values.alloc(value);
            let leaf = self.nodes.alloc_with(|own| Node::Leaf(LeafNode::new(own)));
            self.nodes.get_mut(leaf).as_leaf_mut().insert(0, key, value_handle);
            self.root = Some(leaf);
            self.len = 1;
            debug!("allocated root leaf");
            return None;
        };

        let leaf = self.find_leaf_from(root, key);
        match self.nodes.get(leaf).as_leaf().search(key) {
            Ok(at) => {
                let value_handle = self.nodes.get(leaf).as_leaf().value(at);
                let old = core::mem::replace(self.values.get_mut(value_handle), value);
                trace!("upsert key={key} len={}", self.len);
                Some(old)
            }
            Err(at) => {
                let value_handle = self.values.alloc(value);
                self.nodes.get_mut(leaf).as_leaf_mut().insert(at, key, value_handle);
                self.len += 1;
                if self.nodes.get(leaf).key_count() > self.max_keys {
                    self.split_leaf(leaf);
                }
                trace!("insert key={key} len={}", self.len);
                None
            }
        }
    }

    /// Splits an overfull leaf: the upper half moves to a new right
    /// sibling, which is spliced into the leaf ring and handed to the
    /// parent with its minimum as the separator.
    fn split_leaf(&mut self, leaf: Handle) {
        let (right_keys, right_values) = {
            let node = self.nodes.get_mut(leaf).as_leaf_mut();
            let at = node.key_count() / 2;
            node.split_off(at)
        };
        let separator = right_keys[0];
        let right = self
            .nodes
            .alloc_with(|own| Node::Leaf(LeafNode::from_rows(own, right_keys, right_values)));
        self.ring_splice_after(leaf, right);
        debug!("split leaf, promoting {separator}");
        self.insert_into_parent(leaf, right, separator);
    }

    /// Hands a freshly split-off `right` sibling to the parent of `left`,
    /// growing a new root when `left` was the top of the spine.
    fn insert_into_parent(&mut self, left: Handle, right: Handle, separator: Key) {
        match self.nodes.get(left).parent() {
            None => {
                let level = self.nodes.get(left).level() + 1;
                let root = self
                    .nodes
                    .alloc_with(|own| Node::Internal(InternalNode::new(own, level)));
                {
                    let node = self.nodes.get_mut(root).as_internal_mut();
                    node.push_first_child(left);
                    node.insert_child_right(0, separator, right);
                }
                self.nodes.get_mut(left).set_parent(Some(root));
                self.nodes.get_mut(right).set_parent(Some(root));
                self.root = Some(root);
                debug!("grew new root at level {level}");
            }
            Some(parent) => {
                let pos = self.position_in_parent(parent, left);
                self.nodes
                    .get_mut(parent)
                    .as_internal_mut()
                    .insert_child_right(pos, separator, right);
                self.nodes.get_mut(right).set_parent(Some(parent));
                if self.nodes.get(parent).key_count() > self.max_keys {
                    self.split_internal(parent);
                }
            }
        }
    }

    /// Splits an overfull internal node. The middle key is promoted and
    /// lives on only in the parent; the right sibling takes everything
    /// above it and is spliced into the ring at its own level.
    fn split_internal(&mut self, node: Handle) {
        let (separator, right_keys, right_children, level) = {
            let internal = self.nodes.get_mut(node).as_internal_mut();
            let at = internal.key_count() / 2;
            let (separator, keys, children) = internal.split_off(at);
            (separator, keys, children, internal.level())
        };
        let right = self.nodes.alloc_with(|own| {
            Node::Internal(InternalNode::from_rows(own, level, right_keys, right_children))
        });
        let moved: HandleRow = self.nodes.get(right).as_internal().children().iter().copied().collect();
        for child in moved {
            self.nodes.get_mut(child).set_parent(Some(right));
        }
        self.ring_splice_after(node, right);
        debug!("split internal node at level {level}, promoting {separator}");
        self.insert_into_parent(node, right, separator);
    }

    // ─── Deletion ───────────────────────────────────────────────────────

    /// Removes a key, returning its value.
    pub(crate) fn remove(&mut self, key: Key) -> Option<V> {
        let root = self.root?;
        let leaf = self.find_leaf_from(root, key);
        let at = self.nodes.get(leaf).as_leaf().search(key).ok()?;
        let is_root_leaf = self.nodes.get(leaf).parent().is_none();
        let count = self.nodes.get(leaf).key_count();

        // The root is exempt from the fill floor; everything else keeps
        // min_keys or rebalances.
        if is_root_leaf || count - 1 >= self.min_keys {
            let (_, value_handle) = self.nodes.get_mut(leaf).as_leaf_mut().remove(at);
            let old = self.values.take(value_handle);
            self.len -= 1;
            if self.nodes.get(leaf).key_count() == 0 {
                self.nodes.free(leaf);
                self.root = None;
                debug_assert_eq!(self.nodes.len(), 0);
                debug_assert_eq!(self.values.len(), 0);
                debug!("tree emptied");
            } else if at == 0 && !is_root_leaf {
                self.fixup_min_walk(leaf);
            }
            trace!("remove key={key} len={}", self.len);
            return Some(old);
        }

        let parent = self.nodes.get(leaf).parent().unwrap();
        let pos = self.position_in_parent(parent, leaf);
        let (sibling, sibling_on_left) = self.pick_sibling(parent, pos);

        let (_, value_handle) = self.nodes.get_mut(leaf).as_leaf_mut().remove(at);
        let old = self.values.take(value_handle);
        self.len -= 1;

        if self.nodes.get(leaf).key_count() == 0 {
            // Degree 3 leaves empty out entirely; there is nothing left to
            // balance, so the leaf is dropped and the sibling stands alone.
            self.ring_unlink(leaf);
            self.nodes.free(leaf);
            self.drop_child(parent, leaf);
            self.fixup_min_walk(sibling);
        } else if self.nodes.get(sibling).key_count() > self.min_keys {
            self.redistribute_leaves(leaf, sibling, sibling_on_left);
            self.fixup_min_walk(leaf);
            self.fixup_min_walk(sibling);
        } else {
            let kept = self.merge_leaves(leaf, sibling, sibling_on_left);
            self.fixup_min_walk(kept);
        }
        trace!("remove key={key} len={}", self.len);
        Some(old)
    }

    /// Adjacent sibling under the same parent, preferring the left
    /// neighbour. The per-level ring would name the same node; the child
    /// sequence is authoritative.
    fn pick_sibling(&self, parent: Handle, pos: usize) -> (Handle, bool) {
        let node = self.nodes.get(parent).as_internal();
        if pos > 0 {
            (node.child(pos - 1), true)
        } else {
            (node.child(pos + 1), false)
        }
    }

    /// Moves pairs from a richer sibling into an underfull leaf. The
    /// transfer is capped so the donor never dips below the fill floor and
    /// the receiver never overflows.
    fn redistribute_leaves(&mut self, leaf: Handle, sibling: Handle, sibling_on_left: bool) {
        let count = (self.max_keys / 2).min(self.nodes.get(sibling).key_count() - self.min_keys);
        if sibling_on_left {
            let (keys, values) = self.nodes.get_mut(sibling).as_leaf_mut().take_back(count);
            self.nodes.get_mut(leaf).as_leaf_mut().prepend_rows(keys, values);
        } else {
            let (keys, values) = self.nodes.get_mut(sibling).as_leaf_mut().take_front(count);
            self.nodes.get_mut(leaf).as_leaf_mut().append_rows(keys, values);
        }
        debug!("redistributed {count} pairs between sibling leaves");
    }

    /// Merges an underfull leaf with its sibling, keeping the left node of
    /// the pair (the one with the smaller minimum) and freeing the right.
    fn merge_leaves(&mut self, leaf: Handle, sibling: Handle, sibling_on_left: bool) -> Handle {
        let (kept, freed) = if sibling_on_left {
            (sibling, leaf)
        } else {
            (leaf, sibling)
        };
        let parent = self.nodes.get(kept).parent().unwrap();
        self.ring_unlink(freed);
        let freed_leaf = self.nodes.take(freed).into_leaf();
        self.nodes.get_mut(kept).as_leaf_mut().absorb(freed_leaf);
        debug!("merged sibling leaves");
        self.drop_child(parent, freed);
        kept
    }

    /// Removes a departed child from `parent` along with its separator,
    /// then rebalances or collapses the parent as needed. This is the
    /// upward leg of every merge.
    fn drop_child(&mut self, parent: Handle, freed: Handle) {
        let pos = self.position_in_parent(parent, freed);
        self.nodes.get_mut(parent).as_internal_mut().remove_child_at(pos);

        let survivors: HandleRow = self.nodes.get(parent).as_internal().children().iter().copied().collect();
        for child in survivors {
            self.nodes.get_mut(child).set_parent(Some(parent));
        }

        if self.nodes.get(parent).parent().is_none() {
            if self.nodes.get(parent).key_count() == 0 {
                // Root with a single child left: promote it.
                let child = self.nodes.get(parent).as_internal().child(0);
                self.nodes.get_mut(child).set_parent(None);
                self.ring_unlink(parent);
                self.nodes.free(parent);
                self.root = Some(child);
                debug!("collapsed root, new root at level {}", self.nodes.get(child).level());
            }
            return;
        }

        if self.nodes.get(parent).key_count() < self.min_keys {
            self.rebalance_internal(parent);
        }
    }

    /// Applies the redistribute-or-merge protocol to an underfull internal
    /// node, recursing upward through `drop_child` when it merges.
    fn rebalance_internal(&mut self, node: Handle) {
        let parent = self.nodes.get(node).parent().unwrap();
        let pos = self.position_in_parent(parent, node);
        let (sibling, sibling_on_left) = self.pick_sibling(parent, pos);

        if self.nodes.get(sibling).key_count() > self.min_keys {
            self.redistribute_internals(node, sibling, sibling_on_left);
            self.fixup_min_walk(node);
            self.fixup_min_walk(sibling);
        } else {
            let kept = self.merge_internals(node, sibling, sibling_on_left);
            self.fixup_min_walk(kept);
        }
    }

    /// Moves children from a richer internal sibling, then rebuilds both
    /// separator rows from the live subtree minimums.
    fn redistribute_internals(&mut self, node: Handle, sibling: Handle, sibling_on_left: bool) {
        let count = (self.max_keys / 2).min(self.nodes.get(sibling).key_count() - self.min_keys);
        let moved = if sibling_on_left {
            self.nodes.get_mut(sibling).as_internal_mut().take_children_back(count)
        } else {
            self.nodes.get_mut(sibling).as_internal_mut().take_children_front(count)
        };
        for &child in &moved {
            self.nodes.get_mut(child).set_parent(Some(node));
        }
        {
            let internal = self.nodes.get_mut(node).as_internal_mut();
            if sibling_on_left {
                internal.prepend_children(moved);
            } else {
                internal.append_children(moved);
            }
        }
        self.rebuild_separators(node);
        self.rebuild_separators(sibling);
        debug!("redistributed {count} children between sibling internal nodes");
    }

    /// Merges an underfull internal node with its sibling; the kept (left)
    /// node adopts all children and its separator row is rebuilt.
    fn merge_internals(&mut self, node: Handle, sibling: Handle, sibling_on_left: bool) -> Handle {
        let (kept, freed) = if sibling_on_left {
            (sibling, node)
        } else {
            (node, sibling)
        };
        let parent = self.nodes.get(kept).parent().unwrap();
        self.ring_unlink(freed);
        let freed_node = self.nodes.take(freed).into_internal();
        let adopted: HandleRow = freed_node.children().iter().copied().collect();
        self.nodes.get_mut(kept).as_internal_mut().absorb(freed_node);
        for child in adopted {
            self.nodes.get_mut(child).set_parent(Some(kept));
        }
        self.rebuild_separators(kept);
        debug!("merged sibling internal nodes at level {}", self.nodes.get(kept).level());
        self.drop_child(parent, freed);
        kept
    }

    /// Recomputes an internal node's separator row: one key per child
    /// past the first, each the minimum of that child's subtree.
    fn rebuild_separators(&mut self, node: Handle) {
        let children: HandleRow = self.nodes.get(node).as_internal().children().iter().copied().collect();
        let mut keys = KeyRow::new();
        for &child in &children[1..] {
            keys.push(self.subtree_min(child));
        }
        self.nodes.get_mut(node).as_internal_mut().set_keys(keys);
    }

    // ─── Separator fixup ────────────────────────────────────────────────

    /// Repairs the ancestor separator after a node's minimum key changed:
    /// climb while the node is its parent's leftmost child (those levels
    /// hold no separator for it), update the first separator met, stop.
    fn fixup_min_walk(&mut self, start: Handle) {
        let mut child = start;
        while let Some(parent) = self.nodes.get(child).parent() {
            let pos = self.position_in_parent(parent, child);
            if pos == 0 {
                child = parent;
                continue;
            }
            let min = self.subtree_min(child);
            self.nodes.get_mut(parent).as_internal_mut().set_key(pos - 1, min);
            break;
        }
    }

    /// Position of `child` in `parent`'s child sequence, by handle
    /// identity. A missing child means the structure is corrupt.
    fn position_in_parent(&self, parent: Handle, child: Handle) -> usize {
        self.nodes
            .get(parent)
            .as_internal()
            .position_of(child)
            .expect("node missing from its parent's child sequence")
    }

    fn subtree_min(&self, node: Handle) -> Key {
        let mut current = node;
        loop {
            match self.nodes.get(current) {
                Node::Leaf(leaf) => return leaf.key(0),
                Node::Internal(internal) => current = internal.child(0),
            }
        }
    }

    fn subtree_max(&self, node: Handle) -> Key {
        let mut current = node;
        loop {
            match self.nodes.get(current) {
                Node::Leaf(leaf) => return leaf.key(leaf.key_count() - 1),
                Node::Internal(internal) => current = internal.child(internal.child_count() - 1),
            }
        }
    }

    // ─── Sibling rings ──────────────────────────────────────────────────

    /// Splices `new` into the ring immediately after `left`. A singleton
    /// ring (`left` pointing at itself) becomes a two-cycle.
    fn ring_splice_after(&mut self, left: Handle, new: Handle) {
        let old_next = self.nodes.get(left).next();
        self.nodes.get_mut(new).set_prev(left);
        self.nodes.get_mut(new).set_next(old_next);
        self.nodes.get_mut(old_next).set_prev(new);
        self.nodes.get_mut(left).set_next(new);
    }

    /// Removes a node from its ring; a singleton is left untouched.
    fn ring_unlink(&mut self, node: Handle) {
        let prev = self.nodes.get(node).prev();
        let next = self.nodes.get(node).next();
        if prev != node {
            self.nodes.get_mut(prev).set_next(next);
            self.nodes.get_mut(next).set_prev(prev);
        }
    }

    // ─── Debug dump ─────────────────────────────────────────────────────

    /// Writes a per-level picture of the tree. The format is for humans
    /// and debug logs, not a stable contract.
    pub(crate) fn dump<W: fmt::Write>(&self, out: &mut W) -> fmt::Result {
        let Some(root) = self.root else {
            return writeln!(out, "empty");
        };
        writeln!(
            out,
            "degree={} len={} min={} max={}",
            self.max_keys,
            self.len,
            self.subtree_min(root),
            self.subtree_max(root)
        )?;
        let mut level: Vec<Handle> = alloc::vec![root];
        loop {
            write!(out, "l{}:", self.nodes.get(level[0]).level())?;
            for &handle in &level {
                write!(out, " [")?;
                for (i, key) in self.nodes.get(handle).keys().iter().enumerate() {
                    if i > 0 {
                        write!(out, " ")?;
                    }
                    write!(out, "{key}")?;
                }
                write!(out, "]")?;
            }
            writeln!(out)?;

            let mut next_level = Vec::new();
            for &handle in &level {
                match self.nodes.get(handle) {
                    Node::Leaf(_) => return Ok(()),
                    Node::Internal(internal) => next_level.extend_from_slice(internal.children()),
                }
            }
            level = next_level;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::collections::BTreeMap;
    use alloc::string::String;
    use alloc::{format, vec};
    use proptest::prelude::*;

    impl<V> RawRingTree<V> {
        /// Walks the whole structure and asserts every invariant the tree
        /// promises after a completed operation.
        pub(crate) fn validate_invariants(&self) {
            let Some(root) = self.root else {
                assert_eq!(self.len, 0, "empty tree must have len 0");
                assert_eq!(self.nodes.len(), 0, "empty tree must hold no nodes");
                assert_eq!(self.values.len(), 0, "empty tree must hold no values");
                return;
            };

            let mut leaves = Vec::new();
            let mut internals_by_level: BTreeMap<usize, Vec<Handle>> = BTreeMap::new();
            let total = self.validate_node(root, true, &mut leaves, &mut internals_by_level);

            assert_eq!(total, self.len, "len must match the pairs in the leaves");
            assert_eq!(self.values.len(), self.len, "value arena out of sync");
            assert_eq!(
                self.nodes.len(),
                leaves.len() + internals_by_level.values().map(Vec::len).sum::<usize>(),
                "node arena holds unreachable nodes"
            );

            self.validate_ring(&leaves, "leaf");
            for leaf_pair in leaves.windows(2) {
                assert!(
                    self.subtree_min(leaf_pair[0]) < self.subtree_min(leaf_pair[1]),
                    "leaf ring must ascend by minimum key"
                );
            }
            for (level, nodes) in &internals_by_level {
                self.validate_ring(nodes, &format!("level-{level}"));
            }
        }

        /// Returns the pair count under `handle`; collects leaves in
        /// left-to-right order and internals per level.
        fn validate_node(
            &self,
            handle: Handle,
            is_root: bool,
            leaves: &mut Vec<Handle>,
            internals_by_level: &mut BTreeMap<usize, Vec<Handle>>,
        ) -> usize {
            let node = self.nodes.get(handle);
            for pair in node.keys().windows(2) {
                assert!(pair[0] < pair[1], "keys within a node must strictly ascend");
            }
            if is_root {
                assert!(node.parent().is_none(), "root must have no parent");
                assert!(node.key_count() >= 1, "a live root holds at least one key");
            } else {
                assert!(
                    node.key_count() >= self.min_keys,
                    "non-root node below fill floor: {} < {}",
                    node.key_count(),
                    self.min_keys
                );
            }
            assert!(
                node.key_count() <= self.max_keys,
                "node above fill ceiling: {} > {}",
                node.key_count(),
                self.max_keys
            );

            match node {
                Node::Leaf(leaf) => {
                    leaves.push(handle);
                    leaf.key_count()
                }
                Node::Internal(internal) => {
                    internals_by_level.entry(internal.level()).or_default().push(handle);
                    assert_eq!(
                        internal.child_count(),
                        internal.key_count() + 1,
                        "internal node must hold one more child than keys"
                    );
                    let mut total = 0;
                    for (i, &child) in internal.children().iter().enumerate() {
                        assert_eq!(
                            self.nodes.get(child).parent(),
                            Some(handle),
                            "child's parent back-link is wrong"
                        );
                        assert_eq!(
                            self.nodes.get(child).level() + 1,
                            internal.level(),
                            "child must sit one level below its parent"
                        );
                        if i > 0 {
                            assert_eq!(
                                internal.keys()[i - 1],
                                self.subtree_min(child),
                                "separator must equal its subtree's minimum"
                            );
                        }
                        total += self.validate_node(child, false, leaves, internals_by_level);
                    }
                    total
                }
            }
        }

        /// `nodes` is a level's members in left-to-right order; the ring
        /// must enumerate exactly that cycle, in both directions.
        fn validate_ring(&self, nodes: &[Handle], what: &str) {
            for (i, &handle) in nodes.iter().enumerate() {
                let next = nodes[(i + 1) % nodes.len()];
                let prev = nodes[(i + nodes.len() - 1) % nodes.len()];
                assert_eq!(self.nodes.get(handle).next(), next, "{what} ring next link broken");
                assert_eq!(self.nodes.get(handle).prev(), prev, "{what} ring prev link broken");
            }
        }

        /// Keys of every leaf in ring order, starting at the leftmost.
        fn ring_keys(&self) -> Vec<Key> {
            let Some(root) = self.root else {
                return Vec::new();
            };
            let mut leaf = root;
            while let Node::Internal(internal) = self.nodes.get(leaf) {
                leaf = internal.child(0);
            }
            let start = leaf;
            let mut keys = Vec::new();
            loop {
                keys.extend_from_slice(self.nodes.get(leaf).keys());
                leaf = self.nodes.get(leaf).next();
                if leaf == start {
                    return keys;
                }
            }
        }

        fn leaf_key_rows(&self) -> Vec<Vec<Key>> {
            let mut leaves = Vec::new();
            let mut internals = BTreeMap::new();
            if let Some(root) = self.root {
                self.validate_node(root, true, &mut leaves, &mut internals);
            }
            leaves
                .iter()
                .map(|&h| self.nodes.get(h).keys().to_vec())
                .collect()
        }
    }

    fn tree_of(degree: usize, keys: impl IntoIterator<Item = Key>) -> RawRingTree<String> {
        let mut tree = RawRingTree::new(degree);
        for key in keys {
            tree.insert(key, format!("v{key}"));
            tree.validate_invariants();
        }
        tree
    }

    #[test]
    fn first_split_promotes_the_right_minimum() {
        let tree = tree_of(3, 1..=4);
        let root = tree.root.unwrap();
        let internal = tree.nodes.get(root).as_internal();
        assert_eq!(internal.keys(), &[3]);
        assert_eq!(tree.leaf_key_rows(), vec![vec![1, 2], vec![3, 4]]);
        assert_eq!(tree.get(2).map(String::as_str), Some("v2"));
        assert_eq!(tree.len(), 4);
    }

    #[test]
    fn ascending_inserts_build_two_levels() {
        let tree = tree_of(3, 1..=8);
        let root = tree.nodes.get(tree.root.unwrap()).as_internal();
        assert_eq!(root.level(), 1);
        assert_eq!(root.keys(), &[3, 5, 7]);
        assert_eq!(
            tree.leaf_key_rows(),
            vec![vec![1, 2], vec![3, 4], vec![5, 6], vec![7, 8]]
        );
    }

    #[test]
    fn root_split_grows_a_third_level() {
        let tree = tree_of(3, 1..=10);
        let root = tree.nodes.get(tree.root.unwrap()).as_internal();
        assert_eq!(root.level(), 2);
        assert_eq!(root.keys(), &[7]);
        assert_eq!(tree.ring_keys(), (1..=10).collect::<Vec<_>>());
    }

    #[test]
    fn upsert_replaces_in_place() {
        let mut tree: RawRingTree<String> = RawRingTree::new(3);
        assert_eq!(tree.insert(5, String::from("x")), None);
        assert_eq!(tree.insert(5, String::from("y")), Some(String::from("x")));
        assert_eq!(tree.get(5).map(String::as_str), Some("y"));
        assert_eq!(tree.len(), 1);
        tree.validate_invariants();
    }

    #[test]
    fn removing_a_leaf_minimum_keeps_separators_fresh() {
        let mut tree = tree_of(3, 1..=4);
        assert_eq!(tree.remove(1), Some(String::from("v1")));
        tree.validate_invariants();
        assert_eq!(tree.get(1), None);
        assert_eq!(tree.leaf_key_rows(), vec![vec![2], vec![3, 4]]);
        for key in 2..=4 {
            assert_eq!(tree.get(key), Some(&format!("v{key}")));
        }
        assert_eq!(tree.len(), 3);
    }

    #[test]
    fn draining_to_one_leaf_collapses_the_root() {
        let mut tree = tree_of(3, 1..=4);
        assert_eq!(tree.remove(1), Some(String::from("v1")));
        assert_eq!(tree.remove(2), Some(String::from("v2")));
        tree.validate_invariants();
        let root = tree.root.unwrap();
        assert!(matches!(tree.nodes.get(root), Node::Leaf(_)));
        assert_eq!(tree.ring_keys(), vec![3, 4]);
        assert_eq!(tree.len(), 2);
    }

    #[test]
    fn removal_cascades_through_internal_levels() {
        let mut tree = tree_of(3, 1..=16);
        for key in 1..=16 {
            assert_eq!(tree.remove(key), Some(format!("v{key}")));
            tree.validate_invariants();
        }
        assert!(tree.is_empty());
        assert!(tree.root.is_none());
    }

    #[test]
    fn removal_in_reverse_order() {
        let mut tree = tree_of(3, 1..=16);
        for key in (1..=16).rev() {
            assert_eq!(tree.remove(key), Some(format!("v{key}")));
            tree.validate_invariants();
        }
        assert!(tree.is_empty());
    }

    #[test]
    fn wider_degrees_redistribute_without_underflow() {
        for degree in [4, 5, 7, 16] {
            let mut tree = tree_of(degree, 0..64);
            for key in (0..64).step_by(3) {
                assert!(tree.remove(key).is_some());
                tree.validate_invariants();
            }
        }
    }

    #[test]
    fn scan_starts_strictly_past_the_probe() {
        let tree = tree_of(3, 1..=10);
        let values = tree.next_n(3, 4);
        assert_eq!(values, vec!["v4", "v5", "v6", "v7"]);
        assert!(tree.next_n(10, 0).is_empty());
    }

    #[test]
    fn scan_stops_at_the_ring_wrap() {
        let tree = tree_of(3, 1..=10);
        // Only two keys lie past 8; the wrap must not leak 1, 2, ...
        assert_eq!(tree.next_n(8, 5), vec!["v9", "v10"]);
        assert!(tree.next_n(10, 3).is_empty());
        assert_eq!(tree.next_n(0, 3), vec!["v1", "v2", "v3"]);
    }

    #[test]
    fn scan_probe_between_keys() {
        let tree = tree_of(3, [10, 20, 30, 40, 50]);
        assert_eq!(tree.next_n(25, 2), vec!["v30", "v40"]);
        assert_eq!(tree.next_n(0, 1), vec!["v10"]);
    }

    #[test]
    fn min_and_max_track_the_extremes() {
        let mut tree = tree_of(3, [7, 3, 11, 5]);
        assert_eq!(tree.min_key(), Some(3));
        assert_eq!(tree.max_key(), Some(11));
        tree.remove(3);
        tree.remove(11);
        assert_eq!(tree.min_key(), Some(5));
        assert_eq!(tree.max_key(), Some(7));
    }

    #[test]
    fn dump_lists_every_level() {
        let tree = tree_of(3, 1..=8);
        let mut out = String::new();
        tree.dump(&mut out).unwrap();
        assert_eq!(
            out,
            "degree=3 len=8 min=1 max=8\nl1: [3 5 7]\nl0: [1 2] [3 4] [5 6] [7 8]\n"
        );

        let empty: RawRingTree<String> = RawRingTree::new(3);
        let mut out = String::new();
        empty.dump(&mut out).unwrap();
        assert_eq!(out, "empty\n");
    }

    #[derive(Clone, Debug)]
    enum Op {
        Insert(Key, u64),
        Remove(Key),
        Get(Key),
        NextN(Key, usize),
    }

    fn op_strategy() -> impl Strategy<Value = Op> {
        // A narrow key range forces collisions, upserts and re-merges.
        let key = 0u64..512;
        prop_oneof![
            5 => (key.clone(), any::<u64>()).prop_map(|(k, v)| Op::Insert(k, v)),
            4 => key.clone().prop_map(Op::Remove),
            2 => key.clone().prop_map(Op::Get),
            1 => (key, 0usize..24).prop_map(|(k, n)| Op::NextN(k, n)),
        ]
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(48))]

        /// Replays random operation sequences against `BTreeMap` and checks
        /// every invariant after each mutation, across several degrees.
        #[test]
        fn matches_btreemap_model(
            degree in 3usize..10,
            ops in proptest::collection::vec(op_strategy(), 1..400),
        ) {
            let mut tree: RawRingTree<u64> = RawRingTree::new(degree);
            let mut model: BTreeMap<Key, u64> = BTreeMap::new();

            for op in ops {
                match op {
                    Op::Insert(key, value) => {
                        prop_assert_eq!(tree.insert(key, value), model.insert(key, value));
                        tree.validate_invariants();
                    }
                    Op::Remove(key) => {
                        prop_assert_eq!(tree.remove(key), model.remove(&key));
                        tree.validate_invariants();
                    }
                    Op::Get(key) => {
                        prop_assert_eq!(tree.get(key), model.get(&key));
                    }
                    Op::NextN(key, n) => {
                        let got: Vec<u64> = tree.next_n(key, n).into_iter().copied().collect();
                        let want: Vec<u64> = model
                            .range(key + 1..)
                            .take(n)
                            .map(|(_, &v)| v)
                            .collect();
                        prop_assert_eq!(got, want);
                    }
                }
                prop_assert_eq!(tree.len(), model.len());
                let ring: Vec<Key> = tree.ring_keys();
                let sorted: Vec<Key> = model.keys().copied().collect();
                prop_assert_eq!(ring, sorted);
            }
        }
    }
}
