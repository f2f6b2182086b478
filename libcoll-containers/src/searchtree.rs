// Copyright 2024-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! The balanced ordered-set engine: an AVL tree where the data is the key.
//! Nodes live in an index arena like the list engines. Insertion
//! rebalances through a `balanced` flag propagated up the recursion;
//! deletion walks an explicit ancestor stack of up to 64 entries and
//! rebalances iteratively on the way back up. A node can be hidden:
//! masked from search without being removed, unhidden by re-adding an
//! equal value.

use crate::error::ContainerError;
use crate::observer::Event;
use crate::protocol::{Collection, Header};
use crate::storage::{self, LoadElement, SaveElement};
use crate::vector::CompareFn;
use crate::{ErrorHook, Flags};
use allocator_api2::alloc::{Allocator, Global};
use allocator_api2::vec::Vec as SlabVec;
use core::cmp::Ordering;
use std::io::{Read, Write};

/// Balance factors. The names follow which side is the taller one.
const LEFT: i8 = 1;
const BALANCED: i8 = 0;
const RIGHT: i8 = -1;

/// Deeper trees than this cannot happen before `count` overflows; the
/// deletion path stack is sized to it.
const MAX_DEPTH: usize = 64;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
struct NodeId(u32);

struct Node<T> {
    left: Option<NodeId>,
    right: Option<NodeId>,
    factor: i8,
    hidden: bool,
    value: T,
}

enum Slot<T> {
    Occupied(Node<T>),
    Free(Option<u32>),
}

/// What [SearchTree::add] did with the value.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Added {
    /// A new node was created.
    New,
    /// An equal hidden node was unhidden and overwritten.
    Unhidden,
    /// An equal visible node already exists; the value was dropped.
    Present,
}

/// AVL-balanced ordered set of `T`.
pub struct SearchTree<T, A: Allocator = Global> {
    header: Header,
    slots: SlabVec<Slot<T>, A>,
    free_head: Option<u32>,
    root: Option<NodeId>,
    count: usize,
    compare: CompareFn<T>,
}

impl<T: Ord> SearchTree<T> {
    pub fn new() -> Self {
        Self::with_compare(Ord::cmp)
    }
}

impl<T: Ord> Default for SearchTree<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Ord> FromIterator<T> for SearchTree<T> {
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        let mut tree = Self::new();
        for value in iter {
            let _ = tree.add(value);
        }
        tree
    }
}

impl<T> SearchTree<T> {
    pub fn with_compare(compare: CompareFn<T>) -> Self {
        Self::with_compare_in(compare, Global)
    }
}

impl<T: Ord, A: Allocator> SearchTree<T, A> {
    pub fn new_in(allocator: A) -> Self {
        Self::with_compare_in(Ord::cmp, allocator)
    }
}

impl<T, A: Allocator> SearchTree<T, A> {
    pub fn with_compare_in(compare: CompareFn<T>, allocator: A) -> Self {
        Self {
            header: Header::new(),
            slots: SlabVec::new_in(allocator),
            free_head: None,
            root: None,
            count: 0,
            compare,
        }
    }

    pub fn compare_fn(&self) -> CompareFn<T> {
        self.compare
    }

    fn node(&self, id: NodeId) -> &Node<T> {
        match &self.slots[id.0 as usize] {
            Slot::Occupied(node) => node,
            Slot::Free(_) => unreachable!("tree handle points at a free slot"),
        }
    }

    fn node_mut(&mut self, id: NodeId) -> &mut Node<T> {
        match &mut self.slots[id.0 as usize] {
            Slot::Occupied(node) => node,
            Slot::Free(_) => unreachable!("tree handle points at a free slot"),
        }
    }

    fn alloc_node(&mut self, value: T) -> NodeId {
        let node = Node {
            left: None,
            right: None,
            factor: BALANCED,
            hidden: false,
            value,
        };
        match self.free_head {
            Some(index) => {
                let next_free = match self.slots[index as usize] {
                    Slot::Free(next) => next,
                    Slot::Occupied(_) => unreachable!("free list points at a live slot"),
                };
                self.free_head = next_free;
                self.slots[index as usize] = Slot::Occupied(node);
                NodeId(index)
            }
            None => {
                let index = self.slots.len() as u32;
                self.slots.push(Slot::Occupied(node));
                NodeId(index)
            }
        }
    }

    fn free_node(&mut self, id: NodeId) -> T {
        let slot = core::mem::replace(&mut self.slots[id.0 as usize], Slot::Free(self.free_head));
        self.free_head = Some(id.0);
        match slot {
            Slot::Occupied(node) => node.value,
            Slot::Free(_) => unreachable!("double free of a tree slot"),
        }
    }

    /// Writes through a parent link; a `None` parent is the root link.
    fn set_link(&mut self, parent: Option<NodeId>, went_right: bool, child: Option<NodeId>) {
        match parent {
            None => self.root = child,
            Some(parent) if went_right => self.node_mut(parent).right = child,
            Some(parent) => self.node_mut(parent).left = child,
        }
    }

    /// LL or LR rotation of a left-heavy subtree; returns the new subroot.
    fn rotate_left_heavy(&mut self, id: NodeId) -> NodeId {
        let left = match self.node(id).left {
            Some(left) => left,
            None => unreachable!("left-heavy node without a left child"),
        };
        if self.node(left).factor == LEFT {
            // LL rotation.
            self.node_mut(id).left = self.node(left).right;
            self.node_mut(left).right = Some(id);
            self.node_mut(id).factor = BALANCED;
            self.node_mut(left).factor = BALANCED;
            left
        } else {
            // LR rotation.
            let grandchild = match self.node(left).right {
                Some(id) => id,
                None => unreachable!("LR rotation without a grandchild"),
            };
            self.node_mut(left).right = self.node(grandchild).left;
            self.node_mut(grandchild).left = Some(left);
            self.node_mut(id).left = self.node(grandchild).right;
            self.node_mut(grandchild).right = Some(id);
            match self.node(grandchild).factor {
                LEFT => {
                    self.node_mut(id).factor = RIGHT;
                    self.node_mut(left).factor = BALANCED;
                }
                BALANCED => {
                    self.node_mut(id).factor = BALANCED;
                    self.node_mut(left).factor = BALANCED;
                }
                _ => {
                    self.node_mut(id).factor = BALANCED;
                    self.node_mut(left).factor = LEFT;
                }
            }
            self.node_mut(grandchild).factor = BALANCED;
            grandchild
        }
    }

    /// RR or RL rotation of a right-heavy subtree; returns the new subroot.
    fn rotate_right_heavy(&mut self, id: NodeId) -> NodeId {
        let right = match self.node(id).right {
            Some(right) => right,
            None => unreachable!("right-heavy node without a right child"),
        };
        if self.node(right).factor == RIGHT {
            // RR rotation.
            self.node_mut(id).right = self.node(right).left;
            self.node_mut(right).left = Some(id);
            self.node_mut(id).factor = BALANCED;
            self.node_mut(right).factor = BALANCED;
            right
        } else {
            // RL rotation.
            let grandchild = match self.node(right).left {
                Some(id) => id,
                None => unreachable!("RL rotation without a grandchild"),
            };
            self.node_mut(right).left = self.node(grandchild).right;
            self.node_mut(grandchild).right = Some(right);
            self.node_mut(id).right = self.node(grandchild).left;
            self.node_mut(grandchild).left = Some(id);
            match self.node(grandchild).factor {
                LEFT => {
                    self.node_mut(id).factor = BALANCED;
                    self.node_mut(right).factor = RIGHT;
                }
                BALANCED => {
                    self.node_mut(id).factor = BALANCED;
                    self.node_mut(right).factor = BALANCED;
                }
                _ => {
                    self.node_mut(id).factor = LEFT;
                    self.node_mut(right).factor = BALANCED;
                }
            }
            self.node_mut(grandchild).factor = BALANCED;
            grandchild
        }
    }

    fn insert_rec(
        &mut self,
        at: Option<NodeId>,
        value: T,
        compare: &dyn Fn(&T, &T) -> Ordering,
        balanced: &mut bool,
    ) -> (NodeId, Added) {
        let Some(id) = at else {
            let id = self.alloc_node(value);
            self.count += 1;
            return (id, Added::New);
        };
        match compare(&value, &self.node(id).value) {
            Ordering::Less => {
                let (new_left, added) =
                    self.insert_rec(self.node(id).left, value, compare, balanced);
                self.node_mut(id).left = Some(new_left);
                let mut subroot = id;
                if added == Added::New && !*balanced {
                    match self.node(id).factor {
                        LEFT => {
                            subroot = self.rotate_left_heavy(id);
                            *balanced = true;
                        }
                        BALANCED => self.node_mut(id).factor = LEFT,
                        _ => {
                            self.node_mut(id).factor = BALANCED;
                            *balanced = true;
                        }
                    }
                }
                (subroot, added)
            }
            Ordering::Greater => {
                let (new_right, added) =
                    self.insert_rec(self.node(id).right, value, compare, balanced);
                self.node_mut(id).right = Some(new_right);
                let mut subroot = id;
                if added == Added::New && !*balanced {
                    match self.node(id).factor {
                        LEFT => {
                            self.node_mut(id).factor = BALANCED;
                            *balanced = true;
                        }
                        BALANCED => self.node_mut(id).factor = RIGHT,
                        _ => {
                            subroot = self.rotate_right_heavy(id);
                            *balanced = true;
                        }
                    }
                }
                (subroot, added)
            }
            Ordering::Equal => {
                let node = self.node_mut(id);
                if node.hidden {
                    // Re-adding an equal value unhides the node; the tree
                    // structure is unchanged, so no rebalancing.
                    node.value = value;
                    node.hidden = false;
                    *balanced = true;
                    (id, Added::Unhidden)
                } else {
                    (id, Added::Present)
                }
            }
        }
    }

    /// Adds a value under the stored compare function; a no-op when an
    /// equal visible value is already present.
    pub fn add(&mut self, value: T) -> Result<Added, ContainerError> {
        let compare = self.compare;
        self.insert_with(value, move |a, b| compare(a, b))
    }

    /// Adds under a one-shot comparator, the channel for auxiliary
    /// comparison state.
    pub fn insert_with(
        &mut self,
        value: T,
        compare: impl Fn(&T, &T) -> Ordering,
    ) -> Result<Added, ContainerError> {
        self.header.guard_mut("SearchTree.insert")?;
        let mut balanced = false;
        let (new_root, added) = self.insert_rec(self.root, value, &compare, &mut balanced);
        self.root = Some(new_root);
        if added != Added::Present {
            self.header.touch();
            self.header.notify(Event::Insert, 0, 1);
        }
        Ok(added)
    }

    fn lookup(&self, value: &T, compare: &dyn Fn(&T, &T) -> Ordering) -> Option<NodeId> {
        let mut at = self.root;
        while let Some(id) = at {
            let node = self.node(id);
            match compare(value, &node.value) {
                Ordering::Less => at = node.left,
                Ordering::Greater => at = node.right,
                Ordering::Equal => {
                    return if node.hidden { None } else { Some(id) };
                }
            }
        }
        None
    }

    /// Finds an equal, visible value.
    pub fn find(&self, value: &T) -> Option<&T> {
        let compare = self.compare;
        self.lookup(value, &move |a, b| compare(a, b))
            .map(|id| &self.node(id).value)
    }

    pub fn contains(&self, value: &T) -> bool {
        self.find(value).is_some()
    }

    /// Masks an equal value from search without removing its node.
    pub fn hide(&mut self, value: &T) -> Result<(), ContainerError> {
        self.header.guard_mut("SearchTree.hide")?;
        let compare = self.compare;
        match self.lookup(value, &move |a, b| compare(a, b)) {
            Some(id) => {
                self.node_mut(id).hidden = true;
                self.header.touch();
                Ok(())
            }
            None => Err(self.header.fail("SearchTree.hide", ContainerError::NotFound)),
        }
    }

    /// Removes an equal value. The ancestor path is recorded on an
    /// explicit stack, and balance factors are repaired iteratively from
    /// the deletion point upward.
    pub fn erase(&mut self, value: &T) -> Result<(), ContainerError> {
        self.header.guard_mut("SearchTree.erase")?;
        // path[0] is the pseudo-root link; dirs[k] records which way the
        // walk left path[k].
        let mut path: [Option<NodeId>; MAX_DEPTH] = [None; MAX_DEPTH];
        let mut dirs = [false; MAX_DEPTH];
        let mut k = 1usize;

        let mut z = match self.root {
            Some(id) => id,
            None => {
                return Err(self.header.fail("SearchTree.erase", ContainerError::NotFound))
            }
        };
        loop {
            match (self.compare)(value, &self.node(z).value) {
                Ordering::Equal => break,
                order => {
                    let went_right = order == Ordering::Greater;
                    path[k] = Some(z);
                    dirs[k] = went_right;
                    k += 1;
                    if k >= MAX_DEPTH {
                        return Err(self
                            .header
                            .fail("SearchTree.erase", ContainerError::Internal));
                    }
                    let next = if went_right {
                        self.node(z).right
                    } else {
                        self.node(z).left
                    };
                    z = match next {
                        Some(id) => id,
                        None => {
                            return Err(self
                                .header
                                .fail("SearchTree.erase", ContainerError::NotFound))
                        }
                    };
                }
            }
        }

        let parent = path[k - 1];
        let parent_dir = dirs[k - 1];

        if self.node(z).right.is_none() {
            let left = self.node(z).left;
            self.set_link(parent, parent_dir, left);
        } else {
            let x = match self.node(z).right {
                Some(id) => id,
                None => unreachable!("checked right child above"),
            };
            if self.node(x).left.is_none() {
                // The right child has no left subtree: slide it up.
                let z_left = self.node(z).left;
                self.node_mut(x).left = z_left;
                self.set_link(parent, parent_dir, Some(x));
                self.node_mut(x).factor = self.node(z).factor;
                dirs[k] = true;
                path[k] = Some(x);
                k += 1;
            } else {
                // Replace z by its in-order successor w, recording the
                // walk for the rebalancing pass.
                let j = k;
                k += 1;
                dirs[k] = false;
                path[k] = Some(x);
                k += 1;
                let mut x = x;
                let mut w = match self.node(x).left {
                    Some(id) => id,
                    None => unreachable!("checked left child above"),
                };
                while let Some(next) = self.node(w).left {
                    x = w;
                    w = next;
                    if k >= MAX_DEPTH {
                        return Err(self
                            .header
                            .fail("SearchTree.erase", ContainerError::Internal));
                    }
                    dirs[k] = false;
                    path[k] = Some(x);
                    k += 1;
                }
                dirs[j] = true;
                path[j] = Some(w);
                let z_left = self.node(z).left;
                let z_right = self.node(z).right;
                let z_factor = self.node(z).factor;
                let w_right = self.node(w).right;
                self.node_mut(w).left = z_left;
                self.node_mut(x).left = w_right;
                self.node_mut(w).right = z_right;
                self.node_mut(w).factor = z_factor;
                self.set_link(parent, parent_dir, Some(w));
            }
        }

        drop(self.free_node(z));
        self.count -= 1;

        // Retreat up the recorded path, repairing factors and rotating
        // where a subtree shrank out of tolerance.
        while k > 1 {
            k -= 1;
            let w = match path[k] {
                Some(id) => id,
                None => unreachable!("deletion path entries below k are set"),
            };
            if !dirs[k] {
                // The left subtree shrank.
                match self.node(w).factor {
                    LEFT => {
                        self.node_mut(w).factor = BALANCED;
                        continue;
                    }
                    BALANCED => {
                        self.node_mut(w).factor = RIGHT;
                        break;
                    }
                    _ => {}
                }
                let x = match self.node(w).right {
                    Some(id) => id,
                    None => {
                        return Err(self
                            .header
                            .fail("SearchTree.erase", ContainerError::Internal))
                    }
                };
                if self.node(x).factor == BALANCED || self.node(x).factor == RIGHT {
                    self.node_mut(w).right = self.node(x).left;
                    self.node_mut(x).left = Some(w);
                    self.set_link(path[k - 1], dirs[k - 1], Some(x));
                    if self.node(x).factor == BALANCED {
                        self.node_mut(x).factor = LEFT;
                        break;
                    }
                    self.node_mut(w).factor = BALANCED;
                    self.node_mut(x).factor = BALANCED;
                } else {
                    let z = match self.node(x).left {
                        Some(id) => id,
                        None => {
                            return Err(self
                                .header
                                .fail("SearchTree.erase", ContainerError::Internal))
                        }
                    };
                    self.node_mut(x).left = self.node(z).right;
                    self.node_mut(z).right = Some(x);
                    self.node_mut(w).right = self.node(z).left;
                    self.node_mut(z).left = Some(w);
                    match self.node(z).factor {
                        RIGHT => {
                            self.node_mut(w).factor = LEFT;
                            self.node_mut(x).factor = BALANCED;
                        }
                        BALANCED => {
                            self.node_mut(w).factor = BALANCED;
                            self.node_mut(x).factor = BALANCED;
                        }
                        _ => {
                            self.node_mut(w).factor = BALANCED;
                            self.node_mut(x).factor = RIGHT;
                        }
                    }
                    self.node_mut(z).factor = BALANCED;
                    self.set_link(path[k - 1], dirs[k - 1], Some(z));
                }
            } else {
                // The right subtree shrank; mirror image.
                match self.node(w).factor {
                    RIGHT => {
                        self.node_mut(w).factor = BALANCED;
                        continue;
                    }
                    BALANCED => {
                        self.node_mut(w).factor = LEFT;
                        break;
                    }
                    _ => {}
                }
                let x = match self.node(w).left {
                    Some(id) => id,
                    None => {
                        return Err(self
                            .header
                            .fail("SearchTree.erase", ContainerError::Internal))
                    }
                };
                if self.node(x).factor == LEFT || self.node(x).factor == BALANCED {
                    self.node_mut(w).left = self.node(x).right;
                    self.node_mut(x).right = Some(w);
                    self.set_link(path[k - 1], dirs[k - 1], Some(x));
                    if self.node(x).factor == BALANCED {
                        self.node_mut(x).factor = RIGHT;
                        break;
                    }
                    self.node_mut(w).factor = BALANCED;
                    self.node_mut(x).factor = BALANCED;
                } else {
                    let z = match self.node(x).right {
                        Some(id) => id,
                        None => {
                            return Err(self
                                .header
                                .fail("SearchTree.erase", ContainerError::Internal))
                        }
                    };
                    self.node_mut(x).right = self.node(z).left;
                    self.node_mut(z).left = Some(x);
                    self.node_mut(w).left = self.node(z).right;
                    self.node_mut(z).right = Some(w);
                    match self.node(z).factor {
                        LEFT => {
                            self.node_mut(w).factor = RIGHT;
                            self.node_mut(x).factor = BALANCED;
                        }
                        BALANCED => {
                            self.node_mut(w).factor = BALANCED;
                            self.node_mut(x).factor = BALANCED;
                        }
                        _ => {
                            self.node_mut(w).factor = BALANCED;
                            self.node_mut(x).factor = LEFT;
                        }
                    }
                    self.node_mut(z).factor = BALANCED;
                    self.set_link(path[k - 1], dirs[k - 1], Some(z));
                }
            }
        }

        self.header.touch();
        self.header.notify(Event::EraseAt, 0, 1);
        Ok(())
    }

    fn visit(&self, id: NodeId, f: &mut dyn FnMut(&T)) -> usize {
        let mut visited = 1;
        let node = self.node(id);
        if let Some(left) = node.left {
            visited += self.visit(left, f);
        }
        f(&node.value);
        if let Some(right) = node.right {
            visited += self.visit(right, f);
        }
        visited
    }

    /// In-order traversal; returns the number of nodes visited.
    pub fn apply(&self, mut f: impl FnMut(&T)) -> usize {
        match self.root {
            Some(root) => self.visit(root, &mut f),
            None => 0,
        }
    }

    fn node_equal<B: Allocator>(
        &self,
        my_id: Option<NodeId>,
        other: &SearchTree<T, B>,
        other_id: Option<NodeId>,
    ) -> bool {
        match (my_id, other_id) {
            (None, None) => true,
            (Some(a), Some(b)) => {
                let mine = self.node(a);
                let theirs = other.node(b);
                mine.hidden == theirs.hidden
                    && mine.factor == theirs.factor
                    && (self.compare)(&mine.value, &theirs.value) == Ordering::Equal
                    && self.node_equal(mine.left, other, theirs.left)
                    && self.node_equal(mine.right, other, theirs.right)
            }
            _ => false,
        }
    }

    /// Structural equality: same count, shape, balance factors, hidden
    /// flags and values under this tree's compare function.
    pub fn equal<B: Allocator>(&self, other: &SearchTree<T, B>) -> bool {
        self.count == other.count && self.node_equal(self.root, other, other.root)
    }

    /// Height of the subtree, for invariant checks.
    fn height(&self, id: Option<NodeId>) -> usize {
        match id {
            None => 0,
            Some(id) => {
                let node = self.node(id);
                1 + self.height(node.left).max(self.height(node.right))
            }
        }
    }

    fn balanced_from(&self, id: Option<NodeId>) -> bool {
        let Some(id) = id else { return true };
        let node = self.node(id);
        let left = self.height(node.left) as i64;
        let right = self.height(node.right) as i64;
        // The stored factor must agree with the measured difference.
        (left - right).abs() <= 1
            && i64::from(node.factor) == left - right
            && self.balanced_from(node.left)
            && self.balanced_from(node.right)
    }

    /// Verifies the AVL invariant over the whole tree by walking it.
    pub fn is_balanced(&self) -> bool {
        self.balanced_from(self.root)
    }

    fn graft<B: Allocator>(
        &mut self,
        source: &mut SearchTree<T, B>,
        id: Option<NodeId>,
    ) -> Option<NodeId> {
        let id = id?;
        let (src_left, src_right, factor, hidden) = {
            let node = source.node(id);
            (node.left, node.right, node.factor, node.hidden)
        };
        let left = self.graft(source, src_left);
        let right = self.graft(source, src_right);
        let value = source.free_node(id);
        let new_id = self.alloc_node(value);
        {
            let node = self.node_mut(new_id);
            node.left = left;
            node.right = right;
            node.factor = factor;
            node.hidden = hidden;
        }
        Some(new_id)
    }

    /// Combines two disjoint trees under a new root holding `root_value`,
    /// stealing both trees' nodes and leaving them empty. The grafted
    /// tree is exactly the two sources hung off the new root; no
    /// rebalancing happens.
    pub fn merge<B: Allocator, C: Allocator>(
        left: &mut SearchTree<T, B>,
        right: &mut SearchTree<T, C>,
        root_value: T,
    ) -> Result<SearchTree<T>, ContainerError> {
        let mut merged = SearchTree::with_compare(left.compare);
        let root = merged.alloc_node(root_value);
        let left_count = left.count;
        let right_count = right.count;
        let left_root = left.root;
        let right_root = right.root;
        let grafted_left = merged.graft(left, left_root);
        let grafted_right = merged.graft(right, right_root);
        {
            let node = merged.node_mut(root);
            node.left = grafted_left;
            node.right = grafted_right;
        }
        merged.root = Some(root);
        merged.count = 1 + left_count + right_count;

        left.root = None;
        left.count = 0;
        left.slots.clear();
        left.free_head = None;
        left.header.touch();
        right.root = None;
        right.count = 0;
        right.slots.clear();
        right.free_head = None;
        right.header.touch();
        Ok(merged)
    }

    fn save_node(
        &self,
        id: Option<NodeId>,
        writer: &mut dyn Write,
        save_fn: SaveElement<'_, T>,
    ) -> std::io::Result<()> {
        match id {
            None => writer.write_all(&[0]),
            Some(id) => {
                let node = self.node(id);
                // tag, biased factor, hidden flag, value, children.
                writer.write_all(&[1, (node.factor + 1) as u8, u8::from(node.hidden)])?;
                save_fn(&node.value, writer)?;
                self.save_node(node.left, writer, save_fn)?;
                self.save_node(node.right, writer, save_fn)
            }
        }
    }

    /// Saves the exact structure (shape, factors, hidden flags) pre-order
    /// so a load compares equal.
    pub fn save(
        &self,
        writer: &mut dyn Write,
        save_fn: SaveElement<'_, T>,
    ) -> Result<(), ContainerError> {
        storage::write_envelope(
            writer,
            &storage::SEARCHTREE_GUID,
            self.count as u64,
            self.header.flags().bits(),
            0,
        )?;
        self.save_node(self.root, writer, save_fn)
            .map_err(|_| self.header.fail("SearchTree.save", ContainerError::FileWrite))
    }

    fn load_node(
        tree: &mut SearchTree<T>,
        reader: &mut dyn Read,
        load_fn: LoadElement<'_, T>,
    ) -> Result<Option<NodeId>, ContainerError> {
        let mut tag = [0u8; 1];
        reader
            .read_exact(&mut tag)
            .map_err(|_| ContainerError::FileRead)?;
        if tag[0] == 0 {
            return Ok(None);
        }
        let mut meta = [0u8; 2];
        reader
            .read_exact(&mut meta)
            .map_err(|_| ContainerError::FileRead)?;
        let factor = meta[0] as i8 - 1;
        if !(RIGHT..=LEFT).contains(&factor) {
            return Err(ContainerError::FileRead);
        }
        let value = load_fn(reader).map_err(|_| ContainerError::FileRead)?;
        let id = tree.alloc_node(value);
        tree.count += 1;
        let left = Self::load_node(tree, reader, load_fn)?;
        let right = Self::load_node(tree, reader, load_fn)?;
        {
            let node = tree.node_mut(id);
            node.factor = factor;
            node.hidden = meta[1] != 0;
            node.left = left;
            node.right = right;
        }
        Ok(Some(id))
    }

    pub fn load(
        reader: &mut dyn Read,
        compare: CompareFn<T>,
        load_fn: LoadElement<'_, T>,
    ) -> Result<SearchTree<T>, ContainerError> {
        let envelope = storage::read_envelope(reader, &storage::SEARCHTREE_GUID)?;
        let mut tree = SearchTree::with_compare(compare);
        tree.root = Self::load_node(&mut tree, reader, load_fn)?;
        if tree.count as u64 != envelope.count {
            return Err(ContainerError::WrongFile);
        }
        tree.header.set_flags(Flags::from_bits(envelope.flags));
        Ok(tree)
    }
}

impl<T: Clone, A: Allocator> SearchTree<T, A> {
    fn copy_node(&self, id: Option<NodeId>, into: &mut SearchTree<T>) -> Option<NodeId> {
        let id = id?;
        let node = self.node(id);
        let left = self.copy_node(node.left, into);
        let right = self.copy_node(node.right, into);
        let new_id = into.alloc_node(node.value.clone());
        {
            let copy = into.node_mut(new_id);
            copy.left = left;
            copy.right = right;
            copy.factor = node.factor;
            copy.hidden = node.hidden;
        }
        Some(new_id)
    }

    /// Deep structural copy.
    pub fn copy(&self) -> SearchTree<T> {
        let mut duplicate = SearchTree::with_compare(self.compare);
        duplicate.root = self.copy_node(self.root, &mut duplicate);
        duplicate.count = self.count;
        *duplicate.header_mut() = self.header.for_copy();
        duplicate
    }
}

impl<T, A: Allocator> SearchTree<T, A> {
    pub(crate) fn header_mut(&mut self) -> &mut Header {
        &mut self.header
    }
}

impl<T, A: Allocator> Collection for SearchTree<T, A> {
    fn len(&self) -> usize {
        self.count
    }

    fn flags(&self) -> Flags {
        self.header.flags()
    }

    fn set_flags(&mut self, flags: Flags) -> Flags {
        self.header.set_flags(flags)
    }

    fn timestamp(&self) -> u64 {
        self.header.timestamp()
    }

    fn clear(&mut self) -> Result<(), ContainerError> {
        self.header.guard_mut("SearchTree.clear")?;
        self.header.notify(Event::Clear, 0, self.count);
        self.slots.clear();
        self.free_head = None;
        self.root = None;
        self.count = 0;
        self.header.touch();
        Ok(())
    }

    fn set_error_hook(&mut self, hook: Option<ErrorHook>) {
        self.header.set_hook(hook);
    }
}

impl<T, A: Allocator> Drop for SearchTree<T, A> {
    fn drop(&mut self) {
        self.header.notify(Event::Finalize, 0, self.count);
    }
}

impl<T, A: Allocator, B: Allocator> PartialEq<SearchTree<T, B>> for SearchTree<T, A> {
    fn eq(&self, other: &SearchTree<T, B>) -> bool {
        self.equal(other)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tree_of(values: impl IntoIterator<Item = i64>) -> SearchTree<i64> {
        values.into_iter().collect()
    }

    #[test]
    fn test_add_find_count() {
        let mut tree: SearchTree<i64> = SearchTree::new();
        for i in [5, 2, 8, 1, 3, 7, 9] {
            assert_eq!(Added::New, tree.add(i).unwrap());
        }
        assert_eq!(Added::Present, tree.add(5).unwrap());
        assert_eq!(7, tree.len());
        assert!(tree.contains(&3));
        assert!(!tree.contains(&4));
        assert!(tree.is_balanced());
    }

    #[test]
    fn test_apply_in_order() {
        let tree = tree_of([4, 2, 6, 1, 3, 5, 7]);
        let mut seen = Vec::new();
        let visited = tree.apply(|v| seen.push(*v));
        assert_eq!(7, visited);
        assert_eq!(vec![1, 2, 3, 4, 5, 6, 7], seen);
    }

    #[test]
    fn test_scenario_ten_doubles() {
        // Build 1..=10, apply counts 10; erase one, apply counts 9; an
        // equivalent rebuild compares equal.
        let ordered: Vec<f64> = (1..=10).map(f64::from).collect();
        let mut tree: SearchTree<f64> = SearchTree::with_compare(f64::total_cmp);
        for v in &ordered {
            tree.add(*v).unwrap();
        }
        assert_eq!(10, tree.apply(|_| {}));

        tree.erase(&2.0).unwrap();
        assert_eq!(9, tree.apply(|_| {}));
        assert!(tree.is_balanced());

        let mut twin: SearchTree<f64> = SearchTree::with_compare(f64::total_cmp);
        for v in &ordered {
            twin.add(*v).unwrap();
        }
        twin.erase(&2.0).unwrap();
        assert!(tree.equal(&twin));
    }

    #[test]
    fn test_balance_across_workload() {
        let mut tree: SearchTree<i64> = SearchTree::new();
        // Ascending insertion is the classic AVL stress.
        for i in 0..256 {
            tree.add(i).unwrap();
        }
        assert!(tree.is_balanced());

        for i in (0..256).step_by(3) {
            tree.erase(&i).unwrap();
        }
        assert!(tree.is_balanced());
        assert_eq!(256 - 86, tree.len());

        for i in (0..256).step_by(3) {
            assert!(!tree.contains(&i));
        }
        for i in (1..256).step_by(3) {
            assert!(tree.contains(&i));
        }
    }

    #[test]
    fn test_erase_missing() {
        let mut tree = tree_of([1, 2, 3]);
        assert_eq!(ContainerError::NotFound, tree.erase(&9).unwrap_err());
        let mut empty: SearchTree<i64> = SearchTree::new();
        assert_eq!(ContainerError::NotFound, empty.erase(&1).unwrap_err());
    }

    #[test]
    fn test_hidden_nodes() {
        let mut tree = tree_of([1, 2, 3]);
        tree.hide(&2).unwrap();
        assert!(!tree.contains(&2));
        assert_eq!(3, tree.len());
        // Re-adding the value unhides the node without growing the tree.
        assert_eq!(Added::Unhidden, tree.add(2).unwrap());
        assert!(tree.contains(&2));
        assert_eq!(3, tree.len());
    }

    #[test]
    fn test_insert_with_aux_comparator() {
        // Compare by absolute value through the one-shot comparator.
        let mut tree: SearchTree<i64> = SearchTree::new();
        tree.add(3).unwrap();
        let added = tree
            .insert_with(-3, |a, b| a.abs().cmp(&b.abs()))
            .unwrap();
        assert_eq!(Added::Present, added);
        assert_eq!(1, tree.len());
    }

    #[test]
    fn test_merge_grafts() {
        let mut left = tree_of([1, 2, 3]);
        let mut right = tree_of([7, 8, 9]);
        let merged = SearchTree::<i64>::merge(&mut left, &mut right, 5).unwrap();
        assert_eq!(7, merged.len());
        assert!(left.is_empty());
        assert!(right.is_empty());

        let mut seen = Vec::new();
        merged.apply(|v| seen.push(*v));
        assert_eq!(vec![1, 2, 3, 5, 7, 8, 9], seen);
    }

    #[test]
    fn test_copy_and_equal() {
        let tree = tree_of([5, 1, 9, 3, 7]);
        let copy = tree.copy();
        assert!(tree.equal(&copy));

        let mut other = tree.copy();
        other.erase(&9).unwrap();
        assert!(!tree.equal(&other));
    }

    #[test]
    fn test_readonly_tree() {
        let mut tree = tree_of([1, 2]);
        tree.set_flags(Flags::READONLY);
        let stamp = tree.timestamp();
        assert_eq!(ContainerError::ReadOnly, tree.add(3).unwrap_err());
        assert_eq!(ContainerError::ReadOnly, tree.erase(&1).unwrap_err());
        assert_eq!(stamp, tree.timestamp());
    }

    #[test]
    fn test_randomized_against_btreeset() {
        use rand::rngs::StdRng;
        use rand::{Rng, SeedableRng};
        use std::collections::BTreeSet;

        let mut rng = StdRng::seed_from_u64(0x5eed);
        let mut tree: SearchTree<u32> = SearchTree::new();
        let mut golden: BTreeSet<u32> = BTreeSet::new();

        for _ in 0..4000 {
            let value = rng.gen_range(0..512);
            if rng.gen_bool(0.6) {
                let added = tree.add(value).unwrap();
                assert_eq!(golden.insert(value), added == Added::New);
            } else {
                let erased = tree.erase(&value).is_ok();
                assert_eq!(golden.remove(&value), erased);
            }
        }

        assert_eq!(golden.len(), tree.len());
        assert!(tree.is_balanced());
        let mut in_order = Vec::new();
        tree.apply(|v| in_order.push(*v));
        assert_eq!(golden.into_iter().collect::<Vec<_>>(), in_order);
    }

    #[test]
    fn test_save_load_structural_roundtrip() {
        let mut tree: SearchTree<u32> = (0..50).collect();
        tree.hide(&17).unwrap();
        let mut buf = Vec::new();
        tree.save(&mut buf, &mut |v, w| {
            storage::encode_varint(u64::from(*v), w)
        })
        .unwrap();

        let back = SearchTree::<u32>::load(&mut buf.as_slice(), Ord::cmp, &mut |r| {
            storage::decode_varint(r).map(|n| n as u32)
        })
        .unwrap();
        assert!(tree.equal(&back));
        assert!(back.is_balanced());
        assert!(!back.contains(&17));
    }
}
