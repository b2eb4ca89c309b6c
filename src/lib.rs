//! # bbst
//!
//! An event counter: an ordered map from event id to count, kept in a
//! red-black tree whose nodes live in an index arena.
//!
//! Besides point updates and lookups the tree answers ordered queries
//! (successor, predecessor, inclusive range sums) and can be built in linear
//! time from a sorted dataset.
//!
//! ## Example
//!
//! ```rust
//! use bbst::EventTree;
//!
//! let mut tree = EventTree::new();
//! tree.insert(1, 5);
//! tree.insert(3, 8);
//! let node = tree.insert(1, 2);
//!
//! assert_eq!(tree.count(node), 7);
//! assert_eq!(tree.range_sum(0, 10), 15);
//! assert_eq!(tree.next_after(1).map(|n| tree.entry(n)), Some((3, 8)));
//! ```

pub mod counter;
mod error;

pub use error::{ConstructionFault, CounterError, Result, TreeError};

use log::{debug, trace};
use std::cmp::Ordering;
use std::fmt;
use std::iter::FusedIterator;
use std::ops::{Index, IndexMut};

/// Key type of the map.
pub type EventId = i64;

/// Value type of the map.
pub type Count = i64;

// =============================================================================
// Pointer type
// =============================================================================

/// Arena link: a 32-bit slot index, with `u32::MAX` reserved for NULL.
#[derive(Clone, Copy, PartialEq, Eq)]
struct Ptr(u32);

impl Ptr {
    const NULL: Ptr = Ptr(u32::MAX);

    #[inline]
    fn is_null(self) -> bool {
        self == Self::NULL
    }

    #[inline]
    fn idx(self) -> usize {
        debug_assert!(!self.is_null());
        self.0 as usize
    }

    #[inline]
    fn node_ref(self) -> Option<NodeRef> {
        (!self.is_null()).then_some(NodeRef(self.0))
    }
}

impl From<NodeRef> for Ptr {
    #[inline]
    fn from(node: NodeRef) -> Self {
        Ptr(node.0)
    }
}

impl fmt::Debug for Ptr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_null() {
            f.write_str("NULL")
        } else {
            write!(f, "#{}", self.0)
        }
    }
}

/// Handle to a node of an [`EventTree`].
///
/// A handle stays valid until its node is deleted or the tree is cleared,
/// compacted or rebuilt. Handles are plain slot indices; they carry no
/// generation, so a handle kept past the deletion of its node may later
/// alias a different node that reused the slot.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct NodeRef(u32);

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
enum Dir {
    Left = 0,
    Right = 1,
}

impl Dir {
    #[inline]
    fn opposite(self) -> Self {
        match self {
            Dir::Left => Dir::Right,
            Dir::Right => Dir::Left,
        }
    }
}

/// Node color. Missing children count as black.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Color {
    Red,
    Black,
}

// =============================================================================
// Node Arena
// =============================================================================

#[derive(Clone, Debug)]
struct Node {
    id: EventId,
    count: Count,
    color: Color,
    parent: Ptr,
    child: [Ptr; 2],
}

impl Node {
    fn new(id: EventId, count: Count, color: Color) -> Self {
        Self {
            id,
            count,
            color,
            parent: Ptr::NULL,
            child: [Ptr::NULL; 2],
        }
    }
}

/// Contiguous node storage with a free list of vacated slots.
#[derive(Clone, Default)]
struct NodeArena {
    nodes: Vec<Node>,
    free: Vec<u32>,
}

impl NodeArena {
    fn alloc(&mut self, node: Node) -> Ptr {
        if let Some(slot) = self.free.pop() {
            self.nodes[slot as usize] = node;
            return Ptr(slot);
        }
        assert!(
            self.nodes.len() < Ptr::NULL.0 as usize,
            "node arena is full"
        );
        let slot = self.nodes.len() as u32;
        self.nodes.push(node);
        Ptr(slot)
    }

    fn release(&mut self, ptr: Ptr) {
        let node = &mut self.nodes[ptr.idx()];
        node.parent = Ptr::NULL;
        node.child = [Ptr::NULL; 2];
        self.free.push(ptr.0);
    }

    #[inline]
    fn contains(&self, ptr: Ptr) -> bool {
        !ptr.is_null() && ptr.idx() < self.nodes.len()
    }

    fn clear(&mut self) {
        self.nodes.clear();
        self.free.clear();
    }

    fn capacity(&self) -> usize {
        self.nodes.capacity() * std::mem::size_of::<Node>()
            + self.free.capacity() * std::mem::size_of::<u32>()
    }

    fn shrink_to_fit(&mut self) {
        self.nodes.shrink_to_fit();
        self.free.shrink_to_fit();
    }
}

impl Index<Ptr> for NodeArena {
    type Output = Node;

    #[inline]
    fn index(&self, ptr: Ptr) -> &Node {
        &self.nodes[ptr.idx()]
    }
}

impl IndexMut<Ptr> for NodeArena {
    #[inline]
    fn index_mut(&mut self, ptr: Ptr) -> &mut Node {
        &mut self.nodes[ptr.idx()]
    }
}

// =============================================================================
// EventTree
// =============================================================================

/// An ordered map from event id to count, balanced as a red-black tree.
///
/// Nodes are owned by an internal arena and addressed through [`NodeRef`]
/// handles. Inserting an id that is already present adds to its count rather
/// than replacing it.
#[derive(Clone)]
pub struct EventTree {
    nodes: NodeArena,
    root: Ptr,
    len: usize,
}

impl EventTree {
    pub fn new() -> Self {
        Self {
            nodes: NodeArena::default(),
            root: Ptr::NULL,
            len: 0,
        }
    }

    /// Build a tree from pairs sorted by strictly increasing id, in O(n).
    ///
    /// See [`bulk_build`](Self::bulk_build) for the accepted input.
    pub fn from_sorted(pairs: &[(EventId, Count)]) -> Result<Self> {
        let mut tree = Self::new();
        tree.bulk_build(pairs)?;
        Ok(tree)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Drop every node.
    pub fn clear(&mut self) {
        self.nodes.clear();
        self.root = Ptr::NULL;
        self.len = 0;
    }

    pub fn memory_usage(&self) -> usize {
        std::mem::size_of::<Self>() + self.nodes.capacity()
    }

    pub fn shrink_to_fit(&mut self) {
        self.nodes.shrink_to_fit();
    }

    /// Rebuild the arena densely in key order.
    ///
    /// Deletions leave vacated slots behind that later insertions reuse in
    /// arbitrary order. Compaction lays the nodes out again in key order and
    /// rebalances to minimum height. Every outstanding [`NodeRef`] is
    /// invalidated. Returns the number of nodes rewritten.
    pub fn compact(&mut self) -> usize {
        let entries: Vec<(EventId, Count)> = self.iter().collect();
        let vacated = self.nodes.free.len();
        self.clear();
        self.build_sorted(&entries);
        self.nodes.shrink_to_fit();
        debug!(
            "compacted {} nodes, reclaimed {} vacant slots",
            entries.len(),
            vacated
        );
        entries.len()
    }

    // ---- node accessors ----

    /// Event id stored at `node`.
    ///
    /// Panics if the handle is out of range for this tree.
    #[inline]
    pub fn id(&self, node: NodeRef) -> EventId {
        self.nodes[Ptr::from(node)].id
    }

    #[inline]
    pub fn count(&self, node: NodeRef) -> Count {
        self.nodes[Ptr::from(node)].count
    }

    #[inline]
    pub fn entry(&self, node: NodeRef) -> (EventId, Count) {
        let node = &self.nodes[Ptr::from(node)];
        (node.id, node.count)
    }

    #[inline]
    pub fn color(&self, node: NodeRef) -> Color {
        self.nodes[Ptr::from(node)].color
    }

    pub fn root(&self) -> Option<NodeRef> {
        self.root.node_ref()
    }

    pub fn parent(&self, node: NodeRef) -> Option<NodeRef> {
        self.nodes[Ptr::from(node)].parent.node_ref()
    }

    pub fn left(&self, node: NodeRef) -> Option<NodeRef> {
        self.child(node.into(), Dir::Left).node_ref()
    }

    pub fn right(&self, node: NodeRef) -> Option<NodeRef> {
        self.child(node.into(), Dir::Right).node_ref()
    }

    // ---- link helpers ----

    #[inline]
    fn child(&self, ptr: Ptr, dir: Dir) -> Ptr {
        self.nodes[ptr].child[dir as usize]
    }

    #[inline]
    fn is_red(&self, ptr: Ptr) -> bool {
        !ptr.is_null() && self.nodes[ptr].color == Color::Red
    }

    /// Side of its parent that `ptr` hangs from. `ptr` must not be the root.
    #[inline]
    fn dir_of(&self, ptr: Ptr) -> Dir {
        let parent = self.nodes[ptr].parent;
        debug_assert!(!parent.is_null());
        if self.child(parent, Dir::Left) == ptr {
            Dir::Left
        } else {
            Dir::Right
        }
    }

    /// Attach `child` under `parent` and point it back at `parent`.
    #[inline]
    fn set_child(&mut self, parent: Ptr, dir: Dir, child: Ptr) {
        self.nodes[parent].child[dir as usize] = child;
        if !child.is_null() {
            self.nodes[child].parent = parent;
        }
    }

    /// Put `new` where `old` hangs (under `old`'s parent, or at the root).
    fn transplant(&mut self, old: Ptr, new: Ptr) {
        let parent = self.nodes[old].parent;
        if parent.is_null() {
            self.root = new;
            if !new.is_null() {
                self.nodes[new].parent = Ptr::NULL;
            }
        } else {
            let dir = self.dir_of(old);
            self.set_child(parent, dir, new);
        }
    }

    /// Rotate the subtree at `top` so that `top` moves down on the `dir`
    /// side. Its child on the other side takes its place and is returned.
    fn rotate(&mut self, top: Ptr, dir: Dir) -> Ptr {
        let pivot = self.child(top, dir.opposite());
        debug_assert!(!pivot.is_null(), "rotation needs a pivot");
        let middle = self.child(pivot, dir);

        self.transplant(top, pivot);
        self.set_child(top, dir.opposite(), middle);
        self.set_child(pivot, dir, top);
        pivot
    }

    /// Leftmost (`Dir::Left`) or rightmost node of the subtree at `ptr`.
    fn extreme(&self, mut ptr: Ptr, dir: Dir) -> Ptr {
        loop {
            let next = self.child(ptr, dir);
            if next.is_null() {
                return ptr;
            }
            ptr = next;
        }
    }
}

impl Default for EventTree {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// Lookup
// =============================================================================

impl EventTree {
    /// Walk from the root towards `id`.
    ///
    /// Returns `Ok(node)` on an exact match. Otherwise returns the last node
    /// visited, which holds either the greatest id below `id` or the least id
    /// above it, or `Err(None)` if the tree is empty.
    pub fn search(&self, id: EventId) -> std::result::Result<NodeRef, Option<NodeRef>> {
        let mut last = Ptr::NULL;
        let mut cur = self.root;
        while !cur.is_null() {
            let node = &self.nodes[cur];
            let dir = match id.cmp(&node.id) {
                Ordering::Equal => return Ok(NodeRef(cur.0)),
                Ordering::Less => Dir::Left,
                Ordering::Greater => Dir::Right,
            };
            last = cur;
            cur = node.child[dir as usize];
        }
        Err(last.node_ref())
    }

    pub fn find(&self, id: EventId) -> Option<NodeRef> {
        self.search(id).ok()
    }

    /// Like [`find`](Self::find), but a missing id is a [`TreeError::NotFound`].
    pub fn lookup(&self, id: EventId) -> Result<NodeRef> {
        self.find(id).ok_or(TreeError::NotFound(id))
    }

    pub fn get(&self, id: EventId) -> Option<Count> {
        self.find(id).map(|node| self.count(node))
    }

    pub fn contains(&self, id: EventId) -> bool {
        self.find(id).is_some()
    }

    pub fn first(&self) -> Option<NodeRef> {
        if self.root.is_null() {
            return None;
        }
        self.extreme(self.root, Dir::Left).node_ref()
    }

    pub fn last(&self) -> Option<NodeRef> {
        if self.root.is_null() {
            return None;
        }
        self.extreme(self.root, Dir::Right).node_ref()
    }

    /// The node with the least id `>= id`.
    pub fn lower_bound(&self, id: EventId) -> Option<NodeRef> {
        match self.search(id) {
            Ok(node) => Some(node),
            Err(near) => self.above(near?, id),
        }
    }

    /// The node with the least id `> id`; `id` need not be present.
    pub fn next_after(&self, id: EventId) -> Option<NodeRef> {
        match self.search(id) {
            Ok(node) => self.successor(node),
            Err(near) => self.above(near?, id),
        }
    }

    /// The node with the greatest id `< id`; `id` need not be present.
    pub fn prev_before(&self, id: EventId) -> Option<NodeRef> {
        match self.search(id) {
            Ok(node) => self.predecessor(node),
            Err(near) => {
                let near = near?;
                if self.id(near) < id {
                    Some(near)
                } else {
                    self.predecessor(near)
                }
            }
        }
    }

    /// Given the boundary node of a failed search for `id`, the first node above `id`.
    fn above(&self, near: NodeRef, id: EventId) -> Option<NodeRef> {
        if self.id(near) > id {
            Some(near)
        } else {
            self.successor(near)
        }
    }
}

// =============================================================================
// Insertion
// =============================================================================

impl EventTree {
    /// Add `delta` to the count of `id`, creating the event if needed.
    ///
    /// Returns the node now holding `id`. Counts saturate at the `i64` bounds.
    ///
    /// ```rust
    /// # use bbst::EventTree;
    /// let mut tree = EventTree::new();
    /// tree.insert(7, 3);
    /// let node = tree.insert(7, 4);
    /// assert_eq!(tree.entry(node), (7, 7));
    /// assert_eq!(tree.len(), 1);
    /// ```
    pub fn insert(&mut self, id: EventId, delta: Count) -> NodeRef {
        let mut parent = Ptr::NULL;
        let mut dir = Dir::Left;
        let mut cur = self.root;
        while !cur.is_null() {
            let node = &mut self.nodes[cur];
            dir = match id.cmp(&node.id) {
                Ordering::Equal => {
                    node.count = node.count.saturating_add(delta);
                    return NodeRef(cur.0);
                }
                Ordering::Less => Dir::Left,
                Ordering::Greater => Dir::Right,
            };
            parent = cur;
            cur = node.child[dir as usize];
        }

        self.len += 1;
        if parent.is_null() {
            let node = self.nodes.alloc(Node::new(id, delta, Color::Black));
            self.root = node;
            return NodeRef(node.0);
        }

        let node = self.nodes.alloc(Node::new(id, delta, Color::Red));
        self.set_child(parent, dir, node);
        self.insert_fixup(node);
        NodeRef(node.0)
    }

    /// Restore the red-black invariants after attaching the red node `cur`.
    fn insert_fixup(&mut self, mut cur: Ptr) {
        loop {
            let parent = self.nodes[cur].parent;
            if parent.is_null() {
                self.nodes[cur].color = Color::Black;
                return;
            }
            if self.nodes[parent].color == Color::Black {
                return;
            }

            let grandparent = self.nodes[parent].parent;
            if grandparent.is_null() {
                unreachable!("red node {parent:?} has no parent but is not the root");
            }
            let parent_dir = self.dir_of(parent);
            let uncle = self.child(grandparent, parent_dir.opposite());

            if self.is_red(uncle) {
                trace!(
                    "insert fixup: red uncle, recoloring at {}",
                    self.nodes[grandparent].id
                );
                self.nodes[parent].color = Color::Black;
                self.nodes[uncle].color = Color::Black;
                self.nodes[grandparent].color = Color::Red;
                cur = grandparent;
                continue;
            }

            let top = if self.dir_of(cur) == parent_dir {
                trace!("insert fixup: {parent_dir:?}-{parent_dir:?} single rotation");
                parent
            } else {
                trace!(
                    "insert fixup: {parent_dir:?}-{:?} double rotation",
                    parent_dir.opposite()
                );
                self.rotate(parent, parent_dir);
                cur
            };
            self.rotate(grandparent, parent_dir.opposite());
            self.nodes[top].color = Color::Black;
            self.nodes[grandparent].color = Color::Red;
            return;
        }
    }
}

// =============================================================================
// Navigation
// =============================================================================

impl EventTree {
    /// The node with the next larger id.
    pub fn successor(&self, node: NodeRef) -> Option<NodeRef> {
        self.step(node.into(), Dir::Right).node_ref()
    }

    /// The node with the next smaller id.
    pub fn predecessor(&self, node: NodeRef) -> Option<NodeRef> {
        self.step(node.into(), Dir::Left).node_ref()
    }

    /// In-order neighbour of `ptr` on the `dir` side.
    fn step(&self, ptr: Ptr, dir: Dir) -> Ptr {
        let child = self.child(ptr, dir);
        if !child.is_null() {
            return self.extreme(child, dir.opposite());
        }
        let mut cur = ptr;
        let mut parent = self.nodes[ptr].parent;
        while !parent.is_null() && self.child(parent, dir) == cur {
            cur = parent;
            parent = self.nodes[parent].parent;
        }
        parent
    }

    /// All `(id, count)` pairs in increasing id order.
    pub fn iter(&self) -> Iter<'_> {
        Iter {
            tree: self,
            next: self.first().map_or(Ptr::NULL, Ptr::from),
            upper: EventId::MAX,
        }
    }

    /// Pairs with `lo <= id <= hi`, in increasing id order.
    pub fn range(&self, lo: EventId, hi: EventId) -> Iter<'_> {
        let next = if lo > hi {
            Ptr::NULL
        } else {
            self.lower_bound(lo).map_or(Ptr::NULL, Ptr::from)
        };
        Iter {
            tree: self,
            next,
            upper: hi,
        }
    }

    /// Sum of counts over ids in `lo..=hi`; 0 if none are present.
    ///
    /// Neither bound has to be a stored id.
    pub fn range_sum(&self, lo: EventId, hi: EventId) -> Count {
        self.range(lo, hi)
            .fold(0, |total, (_, count)| total.saturating_add(count))
    }
}

/// In-order iterator over an [`EventTree`], driven by successor steps.
pub struct Iter<'a> {
    tree: &'a EventTree,
    next: Ptr,
    upper: EventId,
}

impl Iterator for Iter<'_> {
    type Item = (EventId, Count);

    fn next(&mut self) -> Option<Self::Item> {
        if self.next.is_null() {
            return None;
        }
        let node = &self.tree.nodes[self.next];
        if node.id > self.upper {
            self.next = Ptr::NULL;
            return None;
        }
        self.next = self.tree.step(self.next, Dir::Right);
        Some((node.id, node.count))
    }
}

impl FusedIterator for Iter<'_> {}

impl<'a> IntoIterator for &'a EventTree {
    type Item = (EventId, Count);
    type IntoIter = Iter<'a>;

    fn into_iter(self) -> Iter<'a> {
        self.iter()
    }
}

// =============================================================================
// Deletion
// =============================================================================

impl EventTree {
    /// Remove `node` from the tree and return its `(id, count)`.
    ///
    /// When `node` has two children its entry is exchanged with its in-order
    /// predecessor and the predecessor's slot is the one unlinked. `node`
    /// then stays live and holds the predecessor's entry, while any handle to
    /// the predecessor becomes invalid.
    ///
    /// ```rust
    /// # use bbst::EventTree;
    /// let mut tree = EventTree::new();
    /// tree.insert(1, 10);
    /// let two = tree.insert(2, 20);
    /// tree.insert(3, 30);
    /// assert_eq!(tree.delete(two), Ok((2, 20)));
    /// assert_eq!(tree.find(2), None);
    /// assert_eq!(tree.len(), 2);
    /// ```
    pub fn delete(&mut self, node: NodeRef) -> Result<(EventId, Count)> {
        let mut target = Ptr::from(node);
        if !self.nodes.contains(target) || self.search(self.nodes[target].id) != Ok(node) {
            return Err(TreeError::DanglingNode(node));
        }
        let removed = self.entry(node);

        let left = self.child(target, Dir::Left);
        if !left.is_null() && !self.child(target, Dir::Right).is_null() {
            let pred = self.extreme(left, Dir::Right);
            self.swap_entries(target, pred);
            target = pred;
        }

        let child = match self.child(target, Dir::Left) {
            left if !left.is_null() => left,
            _ => self.child(target, Dir::Right),
        };
        let parent = self.nodes[target].parent;
        let dir = if parent.is_null() {
            Dir::Left
        } else {
            self.dir_of(target)
        };
        let color = self.nodes[target].color;

        self.transplant(target, child);
        self.nodes.release(target);
        self.len -= 1;

        if color == Color::Black {
            if self.is_red(child) {
                self.nodes[child].color = Color::Black;
            } else if !parent.is_null() {
                self.delete_fixup(parent, dir);
            }
        }
        Ok(removed)
    }

    /// Remove `id` if present and return its count.
    pub fn remove(&mut self, id: EventId) -> Option<Count> {
        let node = self.find(id)?;
        self.delete(node).ok().map(|(_, count)| count)
    }

    /// Exchange only the payloads of two nodes; colors and links stay put.
    fn swap_entries(&mut self, a: Ptr, b: Ptr) {
        let (id, count) = (self.nodes[a].id, self.nodes[a].count);
        self.nodes[a].id = self.nodes[b].id;
        self.nodes[a].count = self.nodes[b].count;
        self.nodes[b].id = id;
        self.nodes[b].count = count;
    }

    /// Repair a black-height deficit on the `dir` side of `parent`.
    ///
    /// The deficient position may be empty (a black leaf was removed), so the
    /// loop is driven by the parent and the side rather than by a node.
    fn delete_fixup(&mut self, mut parent: Ptr, mut dir: Dir) {
        loop {
            let mut sibling = self.child(parent, dir.opposite());
            if sibling.is_null() {
                unreachable!("deficient side of {parent:?} has no sibling");
            }

            if self.nodes[sibling].color == Color::Red {
                trace!(
                    "delete fixup: red sibling {}, rotating {dir:?}",
                    self.nodes[sibling].id
                );
                self.nodes[sibling].color = Color::Black;
                self.nodes[parent].color = Color::Red;
                self.rotate(parent, dir);
                sibling = self.child(parent, dir.opposite());
                if sibling.is_null() {
                    unreachable!("red sibling of {parent:?} had an empty near child");
                }
            }

            let near = self.child(sibling, dir);
            let far = self.child(sibling, dir.opposite());
            match (self.is_red(near), self.is_red(far)) {
                (false, false) => {
                    self.nodes[sibling].color = Color::Red;
                    if self.nodes[parent].color == Color::Red {
                        trace!("delete fixup: recolor, red parent absorbs deficit");
                        self.nodes[parent].color = Color::Black;
                        return;
                    }
                    let grandparent = self.nodes[parent].parent;
                    if grandparent.is_null() {
                        return;
                    }
                    trace!("delete fixup: recolor, deficit moves up");
                    dir = self.dir_of(parent);
                    parent = grandparent;
                }
                (true, false) => {
                    trace!("delete fixup: near red child, double rotation");
                    self.rotate(sibling, dir.opposite());
                    self.nodes[near].color = self.nodes[parent].color;
                    self.nodes[parent].color = Color::Black;
                    self.rotate(parent, dir);
                    return;
                }
                (_, true) => {
                    trace!("delete fixup: far red child, single rotation");
                    self.nodes[sibling].color = self.nodes[parent].color;
                    self.nodes[parent].color = Color::Black;
                    self.nodes[far].color = Color::Black;
                    self.rotate(parent, dir);
                    return;
                }
            }
        }
    }
}

// =============================================================================
// Bulk construction
// =============================================================================

impl EventTree {
    /// Build the tree from pairs sorted by strictly increasing id, in O(n).
    ///
    /// The result has minimum height: every level is full except the
    /// deepest, whose nodes are red. Input is checked before anything is
    /// touched. The tree must be empty, ids must strictly increase, and
    /// counts must not be negative.
    ///
    /// ```rust
    /// # use bbst::EventTree;
    /// let mut tree = EventTree::new();
    /// tree.bulk_build(&[(1, 5), (2, 3), (3, 8)]).unwrap();
    /// assert_eq!(tree.range_sum(1, 3), 16);
    /// assert!(tree.bulk_build(&[(4, 1)]).is_err());
    /// ```
    pub fn bulk_build(&mut self, pairs: &[(EventId, Count)]) -> Result<()> {
        if !self.is_empty() {
            return Err(TreeError::NotEmpty { len: self.len });
        }
        check_sorted(pairs)?;
        self.clear();
        self.build_sorted(pairs);
        Ok(())
    }

    /// Fill the (empty) arena with `pairs` in order and link them up.
    fn build_sorted(&mut self, pairs: &[(EventId, Count)]) {
        debug_assert!(self.nodes.nodes.is_empty() && self.nodes.free.is_empty());
        self.nodes.nodes.reserve_exact(pairs.len());
        for &(id, count) in pairs {
            self.nodes.alloc(Node::new(id, count, Color::Black));
        }
        if pairs.is_empty() {
            return;
        }

        let height = pairs.len().ilog2() as usize;
        self.root = self.build_range(0, pairs.len(), 0, height);
        self.nodes[self.root].color = Color::Black;
        self.len = pairs.len();
        debug!("bulk-built {} nodes, height {}", self.len, height);
    }

    /// Link the slots `start..end` into a subtree rooted at their midpoint.
    fn build_range(&mut self, start: usize, end: usize, depth: usize, height: usize) -> Ptr {
        if start >= end {
            return Ptr::NULL;
        }
        let mid = start + (end - 1 - start) / 2;
        let node = Ptr(mid as u32);
        let left = self.build_range(start, mid, depth + 1, height);
        let right = self.build_range(mid + 1, end, depth + 1, height);
        self.set_child(node, Dir::Left, left);
        self.set_child(node, Dir::Right, right);
        if depth == height {
            self.nodes[node].color = Color::Red;
        }
        node
    }
}

fn check_sorted(pairs: &[(EventId, Count)]) -> Result<()> {
    let mut previous: Option<EventId> = None;
    for (index, &(id, count)) in pairs.iter().enumerate() {
        let fault = if count < 0 {
            Some(ConstructionFault::NegativeCount { id, count })
        } else {
            match previous.map(|previous| (previous, id.cmp(&previous))) {
                Some((_, Ordering::Equal)) => Some(ConstructionFault::Duplicate(id)),
                Some((previous, Ordering::Less)) => {
                    Some(ConstructionFault::Unsorted { previous, id })
                }
                _ => None,
            }
        };
        if let Some(reason) = fault {
            return Err(TreeError::InvalidConstruction { index, reason });
        }
        previous = Some(id);
    }
    Ok(())
}

// =============================================================================
// Inspection
// =============================================================================

impl EventTree {
    /// Number of nodes on the longest root-to-leaf path.
    pub fn height(&self) -> usize {
        let mut stack: Vec<(Ptr, usize)> = Vec::new();
        if !self.root.is_null() {
            stack.push((self.root, 1));
        }
        let mut height = 0;
        while let Some((ptr, depth)) = stack.pop() {
            height = height.max(depth);
            for child in self.nodes[ptr].child {
                if !child.is_null() {
                    stack.push((child, depth + 1));
                }
            }
        }
        height
    }

    /// Black nodes on the leftmost root-to-leaf path, root included.
    pub fn black_height(&self) -> usize {
        let mut height = 0;
        let mut cur = self.root;
        while !cur.is_null() {
            if self.nodes[cur].color == Color::Black {
                height += 1;
            }
            cur = self.child(cur, Dir::Left);
        }
        height
    }

    /// Check every red-black and structural invariant.
    ///
    /// Reports the first violation found. Cost is O(n).
    pub fn validate(&self) -> Result<()> {
        if self.root.is_null() {
            if self.len != 0 {
                return Err(violation(format!("empty root but len {}", self.len)));
            }
            return Ok(());
        }
        if !self.nodes.contains(self.root) {
            return Err(violation(format!("root {:?} outside the arena", self.root)));
        }
        let root = &self.nodes[self.root];
        if !root.parent.is_null() {
            return Err(violation(format!("root {} has parent {:?}", root.id, root.parent)));
        }
        if root.color != Color::Black {
            return Err(violation(format!("root {} is red", root.id)));
        }

        let mut seen = 0;
        self.check_subtree(self.root, None, None, &mut seen)?;
        if seen != self.len {
            return Err(violation(format!(
                "{seen} reachable nodes but len {}",
                self.len
            )));
        }
        Ok(())
    }

    /// Returns the black-height of the subtree at `ptr`.
    fn check_subtree(
        &self,
        ptr: Ptr,
        lower: Option<EventId>,
        upper: Option<EventId>,
        seen: &mut usize,
    ) -> Result<usize> {
        if ptr.is_null() {
            return Ok(0);
        }
        if !self.nodes.contains(ptr) {
            return Err(violation(format!("link {ptr:?} outside the arena")));
        }
        *seen += 1;
        if *seen > self.len {
            return Err(violation(format!(
                "more than {} reachable nodes (cycle?)",
                self.len
            )));
        }

        let node = &self.nodes[ptr];
        if lower.is_some_and(|lower| node.id <= lower) || upper.is_some_and(|upper| node.id >= upper)
        {
            return Err(violation(format!("id {} is out of order", node.id)));
        }
        for child in node.child {
            if child.is_null() {
                continue;
            }
            if !self.nodes.contains(child) {
                return Err(violation(format!("link {child:?} outside the arena")));
            }
            if self.nodes[child].parent != ptr {
                return Err(violation(format!(
                    "child {} of {} points back at {:?}",
                    self.nodes[child].id, node.id, self.nodes[child].parent
                )));
            }
            if node.color == Color::Red && self.nodes[child].color == Color::Red {
                return Err(violation(format!(
                    "red node {} has red child {}",
                    node.id, self.nodes[child].id
                )));
            }
        }

        let left = self.check_subtree(node.child[Dir::Left as usize], lower, Some(node.id), seen)?;
        let right =
            self.check_subtree(node.child[Dir::Right as usize], Some(node.id), upper, seen)?;
        if left != right {
            return Err(violation(format!(
                "black-height mismatch below {}: {left} left, {right} right",
                node.id
            )));
        }
        Ok(left + usize::from(node.color == Color::Black))
    }
}

fn violation(message: String) -> TreeError {
    TreeError::InvariantViolation(message)
}

impl fmt::Debug for EventTree {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.iter()).finish()
    }
}

impl PartialEq for EventTree {
    fn eq(&self, other: &Self) -> bool {
        self.len == other.len && self.iter().eq(other.iter())
    }
}

impl Eq for EventTree {}

impl FromIterator<(EventId, Count)> for EventTree {
    fn from_iter<T: IntoIterator<Item = (EventId, Count)>>(iter: T) -> Self {
        let mut tree = Self::new();
        tree.extend(iter);
        tree
    }
}

impl Extend<(EventId, Count)> for EventTree {
    fn extend<T: IntoIterator<Item = (EventId, Count)>>(&mut self, iter: T) {
        for (id, delta) in iter {
            self.insert(id, delta);
        }
    }
}


#[cfg(test)]
mod proptests;
