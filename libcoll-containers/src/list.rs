// Copyright 2024-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! The doubly linked sequence engine. Nodes live in an index arena (a slab
//! with an intrusive free list) instead of behind raw pointers, so the
//! prev/next cycle never turns into a cyclic-ownership problem. The slab
//! itself can be placed in any [Allocator], which is how a node-heavy list
//! is backed by a [PoolAllocator](libcoll_alloc::PoolAllocator): pass the
//! pool to [List::new_in] while the list is empty by construction.

use crate::error::ContainerError;
use crate::observer::{Event, EventSet, ObserverId};
use crate::protocol::{Collection, Cursor, Direction, Header, Sequential};
use crate::storage::{self, LoadElement, SaveElement};
use crate::vector::CompareFn;
use crate::{ErrorHook, Flags, Mask};
use allocator_api2::alloc::{Allocator, Global};
use allocator_api2::vec::Vec as SlabVec;
use core::cmp::Ordering;
use core::marker::PhantomData;
use std::io::{Read, Write};

/// Stable handle of a node inside one list's arena.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
struct NodeId(u32);

static_assertions::const_assert_eq!(4, core::mem::size_of::<NodeId>());

struct Node<T> {
    next: Option<NodeId>,
    prev: Option<NodeId>,
    value: T,
}

enum Slot<T> {
    Occupied(Node<T>),
    /// Link in the arena free list.
    Free(Option<u32>),
}

/// Doubly linked list of `T`, with the node slab in allocator `A`.
pub struct List<T, A: Allocator = Global> {
    header: Header,
    slots: SlabVec<Slot<T>, A>,
    free_head: Option<u32>,
    head: Option<NodeId>,
    tail: Option<NodeId>,
    count: usize,
    compare: CompareFn<T>,
}

impl<T: Ord> List<T> {
    pub fn new() -> Self {
        Self::with_compare(Ord::cmp)
    }
}

impl<T: Ord> Default for List<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Ord> FromIterator<T> for List<T> {
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        let mut list = Self::new();
        for value in iter {
            list.push_back_value(value);
        }
        list
    }
}

impl<T> List<T> {
    pub fn with_compare(compare: CompareFn<T>) -> Self {
        Self::with_compare_in(compare, Global)
    }
}

impl<T: Ord, A: Allocator> List<T, A> {
    /// An empty list whose node slab lives in `allocator`; hand it a pool
    /// to give the list arena-backed nodes.
    pub fn new_in(allocator: A) -> Self {
        Self::with_compare_in(Ord::cmp, allocator)
    }
}

impl<T, A: Allocator> List<T, A> {
    pub fn with_compare_in(compare: CompareFn<T>, allocator: A) -> Self {
        Self {
            header: Header::new(),
            slots: SlabVec::new_in(allocator),
            free_head: None,
            head: None,
            tail: None,
            count: 0,
            compare,
        }
    }

    pub fn compare_fn(&self) -> CompareFn<T> {
        self.compare
    }

    #[inline]
    pub(crate) fn header(&self) -> &Header {
        &self.header
    }

    fn node(&self, id: NodeId) -> &Node<T> {
        match &self.slots[id.0 as usize] {
            Slot::Occupied(node) => node,
            Slot::Free(_) => unreachable!("list arena handle points at a free slot"),
        }
    }

    fn node_mut(&mut self, id: NodeId) -> &mut Node<T> {
        match &mut self.slots[id.0 as usize] {
            Slot::Occupied(node) => node,
            Slot::Free(_) => unreachable!("list arena handle points at a free slot"),
        }
    }

    fn alloc_node(&mut self, value: T) -> NodeId {
        let node = Node {
            next: None,
            prev: None,
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
            Slot::Free(_) => unreachable!("double free of a list arena slot"),
        }
    }

    /// Node at logical position `index`, walking from the closer end.
    fn id_at(&self, index: usize) -> Option<NodeId> {
        if index >= self.count {
            return None;
        }
        if index <= self.count / 2 {
            let mut id = self.head?;
            for _ in 0..index {
                id = self.node(id).next?;
            }
            Some(id)
        } else {
            let mut id = self.tail?;
            for _ in 0..(self.count - 1 - index) {
                id = self.node(id).prev?;
            }
            Some(id)
        }
    }

    fn link_front(&mut self, id: NodeId) {
        self.node_mut(id).next = self.head;
        self.node_mut(id).prev = None;
        match self.head {
            Some(old) => self.node_mut(old).prev = Some(id),
            None => self.tail = Some(id),
        }
        self.head = Some(id);
        self.count += 1;
    }

    fn link_back(&mut self, id: NodeId) {
        self.node_mut(id).prev = self.tail;
        self.node_mut(id).next = None;
        match self.tail {
            Some(old) => self.node_mut(old).next = Some(id),
            None => self.head = Some(id),
        }
        self.tail = Some(id);
        self.count += 1;
    }

    /// Inserts `id` immediately before `before`.
    fn link_before(&mut self, id: NodeId, before: NodeId) {
        let prev = self.node(before).prev;
        self.node_mut(id).next = Some(before);
        self.node_mut(id).prev = prev;
        self.node_mut(before).prev = Some(id);
        match prev {
            Some(prev) => self.node_mut(prev).next = Some(id),
            None => self.head = Some(id),
        }
        self.count += 1;
    }

    fn unlink(&mut self, id: NodeId) {
        let (prev, next) = {
            let node = self.node(id);
            (node.prev, node.next)
        };
        match prev {
            Some(prev) => self.node_mut(prev).next = next,
            None => self.head = next,
        }
        match next {
            Some(next) => self.node_mut(next).prev = prev,
            None => self.tail = prev,
        }
        self.count -= 1;
    }

    pub fn front(&self) -> Option<&T> {
        self.head.map(|id| &self.node(id).value)
    }

    pub fn back(&self) -> Option<&T> {
        self.tail.map(|id| &self.node(id).value)
    }

    fn push_front_value(&mut self, value: T) {
        let id = self.alloc_node(value);
        self.link_front(id);
    }

    pub(crate) fn push_back_value(&mut self, value: T) {
        let id = self.alloc_node(value);
        self.link_back(id);
    }

    /// Walks the list front to back.
    pub fn iter(&self) -> ListIter<'_, T, A> {
        ListIter {
            list: self,
            at: self.head,
        }
    }

    pub fn apply(&self, mut f: impl FnMut(&T)) -> usize {
        let mut visited = 0;
        let mut at = self.head;
        while let Some(id) = at {
            f(&self.node(id).value);
            visited += 1;
            at = self.node(id).next;
        }
        visited
    }

    /// Content equality under this list's compare function.
    pub fn equal<B: Allocator>(&self, other: &List<T, B>) -> bool {
        if self.count != other.count || self.header.flags() != other.header().flags() {
            return false;
        }
        self.iter()
            .zip(other.iter())
            .all(|(a, b)| (self.compare)(a, b) == Ordering::Equal)
    }

    /// Reparents every node of `donor` into this list around position
    /// `pivot`: before it for [Direction::Backward], after it for
    /// [Direction::Forward]. The donor is left empty; values move, they
    /// are not re-copied.
    pub fn splice<B: Allocator>(
        &mut self,
        pivot: usize,
        donor: &mut List<T, B>,
        direction: Direction,
    ) -> Result<(), ContainerError> {
        self.header.guard_mut("List.splice")?;
        donor.header().guard_mut("List.splice")?;
        if donor.count == 0 {
            return Ok(());
        }
        if self.count == 0 {
            while let Some(value) = donor.take_front() {
                self.push_back_value(value);
            }
        } else {
            if pivot >= self.count {
                return Err(self.header.fail("List.splice", ContainerError::Index));
            }
            let mut at = match direction {
                // Insert the chain after the pivot, preserving its order.
                Direction::Forward => pivot + 1,
                Direction::Backward => pivot,
            };
            while let Some(value) = donor.take_front() {
                self.insert_value_at(at, value);
                at += 1;
            }
        }
        donor.header_mut().touch();
        self.header.touch();
        self.header.notify(Event::InsertIn, pivot, self.count);
        Ok(())
    }

    fn take_front(&mut self) -> Option<T> {
        let id = self.head?;
        self.unlink(id);
        Some(self.free_node(id))
    }

    fn take_back(&mut self) -> Option<T> {
        let id = self.tail?;
        self.unlink(id);
        Some(self.free_node(id))
    }

    fn insert_value_at(&mut self, index: usize, value: T) {
        if index == 0 {
            self.push_front_value(value);
        } else if index >= self.count {
            self.push_back_value(value);
        } else {
            // id_at is in range for 0 < index < count.
            let Some(before) = self.id_at(index) else {
                return;
            };
            let id = self.alloc_node(value);
            self.link_before(id, before);
        }
    }

    /// Splits off everything after position `pivot` into a new list,
    /// truncating this one.
    pub fn split_after(&mut self, pivot: usize) -> Result<List<T>, ContainerError> {
        self.header.guard_mut("List.split_after")?;
        if pivot >= self.count {
            return Err(self.header.fail("List.split_after", ContainerError::Index));
        }
        let mut tail = List::with_compare(self.compare);
        while self.count > pivot + 1 {
            // take_back reverses; push_front restores the order.
            let Some(value) = self.take_back() else {
                break;
            };
            tail.push_front_value(value);
        }
        self.header.touch();
        Ok(tail)
    }

    /// Rotates left by `n` positions, normalized modulo the count.
    pub fn rotate_left(&mut self, n: usize) -> Result<(), ContainerError> {
        self.header.guard_mut("List.rotate_left")?;
        if self.count < 2 {
            return Ok(());
        }
        let n = n % self.count;
        if n == 0 {
            return Ok(());
        }
        // Close the ring, then break it before the new head.
        let (head, tail) = match (self.head, self.tail) {
            (Some(head), Some(tail)) => (head, tail),
            _ => return Err(self.header.fail("List.rotate_left", ContainerError::Internal)),
        };
        let new_head = match self.id_at(n) {
            Some(id) => id,
            None => return Err(self.header.fail("List.rotate_left", ContainerError::Internal)),
        };
        let new_tail = match self.node(new_head).prev {
            Some(id) => id,
            None => return Err(self.header.fail("List.rotate_left", ContainerError::Internal)),
        };
        self.node_mut(tail).next = Some(head);
        self.node_mut(head).prev = Some(tail);
        self.node_mut(new_tail).next = None;
        self.node_mut(new_head).prev = None;
        self.head = Some(new_head);
        self.tail = Some(new_tail);
        self.header.touch();
        Ok(())
    }

    pub fn rotate_right(&mut self, n: usize) -> Result<(), ContainerError> {
        if self.count < 2 {
            self.header.guard_mut("List.rotate_right")?;
            return Ok(());
        }
        self.rotate_left(self.count - (n % self.count))
    }

    /// Comparison sort: snapshot the node handles, order them by value,
    /// relink in order.
    pub fn sort(&mut self) -> Result<(), ContainerError> {
        self.header.guard_mut("List.sort")?;
        if self.count < 2 {
            return Ok(());
        }
        let mut ids = Vec::with_capacity(self.count);
        let mut at = self.head;
        while let Some(id) = at {
            at = self.node(id).next;
            ids.push(id);
        }
        ids.sort_by(|&a, &b| (self.compare)(&self.node(a).value, &self.node(b).value));

        for pair in ids.windows(2) {
            self.node_mut(pair[0]).next = Some(pair[1]);
            self.node_mut(pair[1]).prev = Some(pair[0]);
        }
        let head = ids[0];
        let tail = ids[ids.len() - 1];
        self.node_mut(head).prev = None;
        self.node_mut(tail).next = None;
        self.head = Some(head);
        self.tail = Some(tail);
        self.header.touch();
        Ok(())
    }

    /// In-place filter: walks in lockstep with the mask, unlinking and
    /// dropping the zero-selected nodes.
    pub fn select(&mut self, mask: &Mask) -> Result<(), ContainerError> {
        self.header.guard_mut("List.select")?;
        if mask.len() != self.count {
            return Err(self.header.fail("List.select", ContainerError::BadMask));
        }
        let mut at = self.head;
        let mut keep = mask.slots();
        while let Some(id) = at {
            at = self.node(id).next;
            if !keep.next().unwrap_or(false) {
                self.unlink(id);
                drop(self.free_node(id));
            }
        }
        self.header.touch();
        Ok(())
    }

    /// Removes the logical span `[start, end)`, dropping its values.
    pub fn remove_range(&mut self, start: usize, end: usize) -> Result<(), ContainerError> {
        self.header.guard_mut("List.remove_range")?;
        let end = end.min(self.count);
        if start > end || start >= self.count {
            return Err(self.header.fail("List.remove_range", ContainerError::Index));
        }
        let mut at = self.id_at(start);
        for _ in start..end {
            let Some(id) = at else { break };
            at = self.node(id).next;
            self.unlink(id);
            drop(self.free_node(id));
        }
        self.header.touch();
        Ok(())
    }

    pub fn subscribe(
        &mut self,
        events: EventSet,
        callback: impl FnMut(&crate::Notification) + 'static,
    ) -> ObserverId {
        self.header.subscribe(events, Box::new(callback))
    }

    pub fn unsubscribe(&mut self, id: ObserverId) -> bool {
        self.header.unsubscribe(id)
    }

    pub(crate) fn header_mut(&mut self) -> &mut Header {
        &mut self.header
    }

    pub fn cursor(&self) -> ListCursor<T, A> {
        ListCursor {
            at: None,
            index: 0,
            timestamp: self.header.timestamp(),
            scratch: None,
            _slab: PhantomData,
        }
    }
}

impl<T: Clone, A: Allocator> List<T, A> {
    /// Deep copy into a fresh arena. The copy starts without observers.
    pub fn copy(&self) -> List<T> {
        let mut duplicate = List::with_compare(self.compare);
        for value in self.iter() {
            duplicate.push_back_value(value.clone());
        }
        *duplicate.header_mut() = self.header.for_copy();
        duplicate
    }

    /// New list holding clones of the mask-selected elements.
    pub fn select_copy(&self, mask: &Mask) -> Result<List<T>, ContainerError> {
        if mask.len() != self.count {
            return Err(self.header.fail("List.select_copy", ContainerError::BadMask));
        }
        let mut out = List::with_compare(self.compare);
        for (value, keep) in self.iter().zip(mask.slots()) {
            if keep {
                out.push_back_value(value.clone());
            }
        }
        Ok(out)
    }

    /// Clones the logical span `[start, end)` into a new list.
    pub fn get_range(&self, start: usize, end: usize) -> Result<List<T>, ContainerError> {
        let end = end.min(self.count);
        if start > end {
            return Err(self.header.fail("List.get_range", ContainerError::Index));
        }
        let mut out = List::with_compare(self.compare);
        for (i, value) in self.iter().enumerate() {
            if i >= end {
                break;
            }
            if i >= start {
                out.push_back_value(value.clone());
            }
        }
        Ok(out)
    }
}

impl<T, A: Allocator> Collection for List<T, A> {
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
        self.header.guard_mut("List.clear")?;
        self.header.notify(Event::Clear, 0, self.count);
        while self.take_front().is_some() {}
        // One stroke: the arena forgets its free list along with the slots.
        self.slots.clear();
        self.free_head = None;
        self.header.touch();
        Ok(())
    }

    fn set_error_hook(&mut self, hook: Option<ErrorHook>) {
        self.header.set_hook(hook);
    }
}

impl<T, A: Allocator> Sequential<T> for List<T, A> {
    fn add(&mut self, value: T) -> Result<(), ContainerError> {
        self.header.guard_mut("List.add")?;
        self.push_back_value(value);
        self.header.touch();
        self.header.notify(Event::Add, self.count - 1, 1);
        Ok(())
    }

    fn get(&self, index: usize) -> Option<&T> {
        self.id_at(index).map(|id| &self.node(id).value)
    }

    fn push_front(&mut self, value: T) -> Result<(), ContainerError> {
        self.header.guard_mut("List.push_front")?;
        self.push_front_value(value);
        self.header.touch();
        self.header.notify(Event::Push, 0, 1);
        Ok(())
    }

    fn push_back(&mut self, value: T) -> Result<(), ContainerError> {
        self.header.guard_mut("List.push_back")?;
        self.push_back_value(value);
        self.header.touch();
        self.header.notify(Event::Push, self.count - 1, 1);
        Ok(())
    }

    fn pop_front(&mut self) -> Result<Option<T>, ContainerError> {
        self.header.guard_mut("List.pop_front")?;
        let value = self.take_front();
        if value.is_some() {
            self.header.touch();
            self.header.notify(Event::Pop, 0, 1);
        }
        Ok(value)
    }

    fn pop_back(&mut self) -> Result<Option<T>, ContainerError> {
        self.header.guard_mut("List.pop_back")?;
        let value = self.take_back();
        if value.is_some() {
            self.header.touch();
            self.header.notify(Event::Pop, self.count, 1);
        }
        Ok(value)
    }

    fn insert_at(&mut self, index: usize, value: T) -> Result<(), ContainerError> {
        self.header.guard_mut("List.insert_at")?;
        if index > self.count {
            return Err(self.header.fail("List.insert_at", ContainerError::Index));
        }
        self.insert_value_at(index, value);
        self.header.touch();
        self.header.notify(Event::InsertAt, index, 1);
        Ok(())
    }

    fn erase_at(&mut self, index: usize) -> Result<T, ContainerError> {
        self.header.guard_mut("List.erase_at")?;
        let Some(id) = self.id_at(index) else {
            return Err(self.header.fail("List.erase_at", ContainerError::Index));
        };
        self.unlink(id);
        let value = self.free_node(id);
        self.header.touch();
        self.header.notify(Event::EraseAt, index, 1);
        Ok(value)
    }

    fn replace_at(&mut self, index: usize, value: T) -> Result<(), ContainerError> {
        self.header.guard_mut("List.replace_at")?;
        let Some(id) = self.id_at(index) else {
            return Err(self.header.fail("List.replace_at", ContainerError::Index));
        };
        self.node_mut(id).value = value;
        self.header.touch();
        self.header.notify(Event::ReplaceAt, index, 1);
        Ok(())
    }

    fn index_of(&self, value: &T) -> Option<usize> {
        self.iter()
            .position(|v| (self.compare)(v, value) == Ordering::Equal)
    }

    fn erase_value(&mut self, value: &T) -> Result<(), ContainerError> {
        self.header.guard_mut("List.erase_value")?;
        match self.index_of(value) {
            Some(index) => self.erase_at(index).map(drop),
            None => Err(self
                .header
                .fail("List.erase_value", ContainerError::NotFound)),
        }
    }

    fn erase_all(&mut self, value: &T) -> Result<usize, ContainerError> {
        self.header.guard_mut("List.erase_all")?;
        let mut erased = 0;
        while let Some(index) = self.index_of(value) {
            self.erase_at(index)?;
            erased += 1;
        }
        Ok(erased)
    }

    fn append(&mut self, other: &mut dyn Sequential<T>) -> Result<(), ContainerError> {
        self.header.guard_mut("List.append")?;
        let moved = other.len();
        while let Some(value) = other.pop_front()? {
            self.push_back_value(value);
        }
        self.header.touch();
        self.header.notify(Event::Append, self.count, moved);
        Ok(())
    }
}

impl<T, A: Allocator> Drop for List<T, A> {
    fn drop(&mut self) {
        self.header.notify(Event::Finalize, 0, self.count);
    }
}

impl<T, A: Allocator> core::fmt::Debug for List<T, A>
where
    T: core::fmt::Debug,
{
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_list().entries(self.iter()).finish()
    }
}

impl<T, A: Allocator, B: Allocator> PartialEq<List<T, B>> for List<T, A> {
    fn eq(&self, other: &List<T, B>) -> bool {
        self.equal(other)
    }
}

/// Front-to-back borrowing iterator.
pub struct ListIter<'a, T, A: Allocator> {
    list: &'a List<T, A>,
    at: Option<NodeId>,
}

impl<'a, T, A: Allocator> Iterator for ListIter<'a, T, A> {
    type Item = &'a T;

    fn next(&mut self) -> Option<&'a T> {
        let id = self.at?;
        let node = self.list.node(id);
        self.at = node.next;
        Some(&node.value)
    }
}

impl<T, A: Allocator> List<T, A> {
    pub fn save(
        &self,
        writer: &mut dyn Write,
        save_fn: SaveElement<'_, T>,
    ) -> Result<(), ContainerError> {
        storage::write_envelope(
            writer,
            &storage::LIST_GUID,
            self.count as u64,
            self.header.flags().bits(),
            0,
        )?;
        let mut at = self.head;
        while let Some(id) = at {
            let node = self.node(id);
            save_fn(&node.value, writer)
                .map_err(|_| self.header.fail("List.save", ContainerError::FileWrite))?;
            at = node.next;
        }
        Ok(())
    }

    pub fn load(
        reader: &mut dyn Read,
        compare: CompareFn<T>,
        load_fn: LoadElement<'_, T>,
    ) -> Result<List<T>, ContainerError> {
        let envelope = storage::read_envelope(reader, &storage::LIST_GUID)?;
        let mut list = List::with_compare(compare);
        for _ in 0..envelope.count {
            let value = load_fn(reader).map_err(|_| ContainerError::FileRead)?;
            list.push_back_value(value);
        }
        list.header_mut().set_flags(Flags::from_bits(envelope.flags));
        Ok(list)
    }
}

/// Bidirectional cursor over a [List].
pub struct ListCursor<T, A: Allocator = Global> {
    at: Option<NodeId>,
    index: usize,
    timestamp: u64,
    scratch: Option<T>,
    _slab: PhantomData<fn(&A)>,
}

impl<T: Clone, A: Allocator> ListCursor<T, A> {
    fn check(&self, list: &List<T, A>, operation: &'static str) -> Result<(), ContainerError> {
        if self.timestamp != list.header().timestamp() {
            Err(list.header().fail(operation, ContainerError::ObjectChanged))
        } else {
            Ok(())
        }
    }

    fn yield_id<'a>(&'a mut self, list: &'a List<T, A>, id: NodeId) -> Option<&'a T> {
        let value = &list.node(id).value;
        if list.header().flags().contains(Flags::READONLY) {
            self.scratch = Some(value.clone());
            self.scratch.as_ref()
        } else {
            Some(value)
        }
    }

    /// Replaces the element under the cursor, erasing it when `value` is
    /// none, then resynchronizes.
    pub fn replace(
        &mut self,
        list: &mut List<T, A>,
        value: Option<T>,
        direction: Direction,
    ) -> Result<(), ContainerError> {
        self.check(list, "ListCursor.replace")?;
        let Some(id) = self.at else {
            return Err(list
                .header()
                .fail("ListCursor.replace", ContainerError::BadArg));
        };
        match value {
            Some(value) => {
                list.replace_at(self.index, value)?;
                if direction == Direction::Backward {
                    self.at = list.node(id).prev;
                    self.index = self.index.saturating_sub(1);
                }
            }
            None => {
                let prev = list.node(id).prev;
                list.erase_at(self.index)?;
                let _ = direction;
                self.at = prev;
                self.index = self.index.saturating_sub(1);
                if prev.is_none() {
                    // Erased the head: back to the fresh state so next()
                    // yields the new head.
                    self.at = None;
                    self.index = 0;
                }
            }
        }
        self.timestamp = list.header().timestamp();
        Ok(())
    }
}

impl<T: Clone, A: Allocator> Cursor for ListCursor<T, A> {
    type Container = List<T, A>;
    type Item = T;

    fn first<'a>(&'a mut self, list: &'a List<T, A>) -> Result<Option<&'a T>, ContainerError> {
        self.check(list, "ListCursor.first")?;
        match list.head {
            Some(id) => {
                self.at = Some(id);
                self.index = 0;
                Ok(self.yield_id(list, id))
            }
            None => Ok(None),
        }
    }

    fn last<'a>(&'a mut self, list: &'a List<T, A>) -> Result<Option<&'a T>, ContainerError> {
        self.check(list, "ListCursor.last")?;
        match list.tail {
            Some(id) => {
                self.at = Some(id);
                self.index = list.count - 1;
                Ok(self.yield_id(list, id))
            }
            None => Ok(None),
        }
    }

    fn next<'a>(&'a mut self, list: &'a List<T, A>) -> Result<Option<&'a T>, ContainerError> {
        self.check(list, "ListCursor.next")?;
        let step = match self.at {
            Some(id) => list.node(id).next.map(|id| (id, self.index + 1)),
            None => list.head.map(|id| (id, 0)),
        };
        match step {
            Some((id, index)) => {
                self.at = Some(id);
                self.index = index;
                Ok(self.yield_id(list, id))
            }
            None => Ok(None),
        }
    }

    fn previous<'a>(&'a mut self, list: &'a List<T, A>) -> Result<Option<&'a T>, ContainerError> {
        self.check(list, "ListCursor.previous")?;
        let step = self.at.and_then(|id| list.node(id).prev);
        match step {
            Some(id) => {
                self.at = Some(id);
                self.index -= 1;
                Ok(self.yield_id(list, id))
            }
            None => Ok(None),
        }
    }

    fn current<'a>(&'a mut self, list: &'a List<T, A>) -> Result<Option<&'a T>, ContainerError> {
        self.check(list, "ListCursor.current")?;
        match self.at {
            Some(id) => Ok(self.yield_id(list, id)),
            None => Ok(None),
        }
    }

    fn seek<'a>(
        &'a mut self,
        list: &'a List<T, A>,
        index: usize,
    ) -> Result<Option<&'a T>, ContainerError> {
        self.check(list, "ListCursor.seek")?;
        let Some(id) = list.id_at(index) else {
            return Err(list.header().fail("ListCursor.seek", ContainerError::Index));
        };
        self.at = Some(id);
        self.index = index;
        Ok(self.yield_id(list, id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use libcoll_alloc::PoolAllocator;

    #[test]
    fn test_push_pop_both_ends() {
        let mut list: List<i32> = List::new();
        list.push_back(2).unwrap();
        list.push_front(1).unwrap();
        list.push_back(3).unwrap();
        assert_eq!(vec![1, 2, 3], list.iter().copied().collect::<Vec<_>>());
        assert_eq!(Some(&1), list.front());
        assert_eq!(Some(&3), list.back());

        assert_eq!(Some(1), list.pop_front().unwrap());
        assert_eq!(Some(3), list.pop_back().unwrap());
        assert_eq!(Some(2), list.pop_back().unwrap());
        assert_eq!(None, list.pop_back().unwrap());
    }

    #[test]
    fn test_insert_erase_walks() {
        let mut list: List<i32> = (0..6).collect();
        list.insert_at(3, 99).unwrap();
        assert_eq!(Some(&99), list.get(3));
        assert_eq!(7, list.len());

        assert_eq!(99, list.erase_at(3).unwrap());
        assert_eq!((0..6).collect::<Vec<_>>(), list.iter().copied().collect::<Vec<_>>());

        assert_eq!(ContainerError::Index, list.erase_at(17).unwrap_err());
        assert_eq!(ContainerError::Index, list.insert_at(9, 0).unwrap_err());
    }

    #[test]
    fn test_arena_slot_reuse() {
        let mut list: List<i32> = (0..4).collect();
        let slots_before = list.slots.len();
        list.erase_at(1).unwrap();
        list.erase_at(1).unwrap();
        list.add(7).unwrap();
        list.add(8).unwrap();
        // Freed slots were recycled; the slab did not grow.
        assert_eq!(slots_before, list.slots.len());
        assert_eq!(vec![0, 3, 7, 8], list.iter().copied().collect::<Vec<_>>());
    }

    #[test]
    fn test_splice_directions() {
        let mut list: List<i32> = [1, 2, 5].into_iter().collect();
        let mut donor: List<i32> = [3, 4].into_iter().collect();
        list.splice(1, &mut donor, Direction::Forward).unwrap();
        assert_eq!(vec![1, 2, 3, 4, 5], list.iter().copied().collect::<Vec<_>>());
        assert!(donor.is_empty());

        let mut front: List<i32> = [0].into_iter().collect();
        list.splice(0, &mut front, Direction::Backward).unwrap();
        assert_eq!(vec![0, 1, 2, 3, 4, 5], list.iter().copied().collect::<Vec<_>>());
    }

    #[test]
    fn test_split_after() {
        let mut list: List<i32> = (0..6).collect();
        let tail = list.split_after(2).unwrap();
        assert_eq!(vec![0, 1, 2], list.iter().copied().collect::<Vec<_>>());
        assert_eq!(vec![3, 4, 5], tail.iter().copied().collect::<Vec<_>>());
    }

    #[test]
    fn test_rotate() {
        let mut list: List<i32> = (1..=5).collect();
        list.rotate_left(2).unwrap();
        assert_eq!(vec![3, 4, 5, 1, 2], list.iter().copied().collect::<Vec<_>>());
        list.rotate_right(2).unwrap();
        assert_eq!(vec![1, 2, 3, 4, 5], list.iter().copied().collect::<Vec<_>>());
        // Rotation by the count is the identity.
        list.rotate_left(5).unwrap();
        assert_eq!(vec![1, 2, 3, 4, 5], list.iter().copied().collect::<Vec<_>>());
    }

    #[test]
    fn test_sort_relinks() {
        let mut list: List<i32> = [5, 1, 4, 2, 3].into_iter().collect();
        list.sort().unwrap();
        assert_eq!(vec![1, 2, 3, 4, 5], list.iter().copied().collect::<Vec<_>>());
        assert_eq!(Some(&1), list.front());
        assert_eq!(Some(&5), list.back());
        // The back walk must agree with the front walk.
        let mut cursor = list.cursor();
        assert_eq!(Some(&5), cursor.last(&list).unwrap());
        assert_eq!(Some(&4), cursor.previous(&list).unwrap());
    }

    #[test]
    fn test_select_and_select_copy() {
        let mut list: List<i32> = (0..6).collect();
        let mask = Mask::from_bools(&[true, false, true, false, true, false]);

        let picked = list.select_copy(&mask).unwrap();
        assert_eq!(vec![0, 2, 4], picked.iter().copied().collect::<Vec<_>>());
        assert_eq!(mask.popcount(), picked.len());

        list.select(&mask).unwrap();
        assert_eq!(vec![0, 2, 4], list.iter().copied().collect::<Vec<_>>());

        let short = Mask::ones(2);
        assert_eq!(ContainerError::BadMask, list.select(&short).unwrap_err());
    }

    #[test]
    fn test_remove_range_half_open() {
        let mut list: List<i32> = (0..6).collect();
        list.remove_range(1, 4).unwrap();
        assert_eq!(vec![0, 4, 5], list.iter().copied().collect::<Vec<_>>());

        // end beyond count clamps.
        list.remove_range(1, 100).unwrap();
        assert_eq!(vec![0], list.iter().copied().collect::<Vec<_>>());
    }

    #[test]
    fn test_value_addressed_ops() {
        let mut list: List<i32> = [7, 8, 7, 9].into_iter().collect();
        assert_eq!(Some(0), list.index_of(&7));
        assert!(list.contains_value(&9));
        list.erase_value(&7).unwrap();
        assert_eq!(vec![8, 7, 9], list.iter().copied().collect::<Vec<_>>());
        assert_eq!(1, list.erase_all(&7).unwrap());
        assert_eq!(ContainerError::NotFound, list.erase_value(&7).unwrap_err());
    }

    #[test]
    fn test_append_moves_source() {
        let mut a: List<i32> = (0..3).collect();
        let mut b: List<i32> = (3..6).collect();
        Sequential::append(&mut a, &mut b).unwrap();
        assert_eq!((0..6).collect::<Vec<_>>(), a.iter().copied().collect::<Vec<_>>());
        assert!(b.is_empty());
    }

    #[test]
    fn test_cursor_invalidation() {
        let mut list: List<i32> = (0..4).collect();
        let mut cursor = list.cursor();
        assert_eq!(Some(&0), cursor.next(&list).unwrap());
        list.push_back(4).unwrap();
        assert_eq!(ContainerError::ObjectChanged, cursor.next(&list).unwrap_err());
    }

    #[test]
    fn test_cursor_replace_erase() {
        let mut list: List<i32> = (0..4).collect();
        let mut cursor = list.cursor();
        cursor.seek(&list, 1).unwrap();
        cursor.replace(&mut list, Some(10), Direction::Forward).unwrap();
        assert_eq!(vec![0, 10, 2, 3], list.iter().copied().collect::<Vec<_>>());

        cursor.replace(&mut list, None, Direction::Forward).unwrap();
        assert_eq!(Some(&2), cursor.next(&list).unwrap());
    }

    #[test]
    fn test_pool_backed_list() {
        let pool = PoolAllocator::new();
        {
            let mut list: List<u64, &PoolAllocator> = List::new_in(&pool);
            for i in 0..100 {
                list.add(i).unwrap();
            }
            assert_eq!(100, list.len());
            assert!(pool.used_bytes() > 0);
            list.clear().unwrap();
            assert!(list.is_empty());
        }
        // The list is gone; the pool reclaims everything in one stroke.
        drop(pool);
    }

    #[test]
    fn test_readonly_list() {
        let mut list: List<i32> = (0..3).collect();
        list.set_flags(Flags::READONLY);
        let stamp = list.timestamp();
        assert_eq!(ContainerError::ReadOnly, list.add(3).unwrap_err());
        assert_eq!(ContainerError::ReadOnly, list.sort().unwrap_err());
        assert_eq!(ContainerError::ReadOnly, list.rotate_left(1).unwrap_err());
        assert_eq!(stamp, list.timestamp());
    }

    #[test]
    fn test_save_load_roundtrip() {
        let list: List<u32> = (0..9).collect();
        let mut buf = Vec::new();
        list.save(&mut buf, &mut |v, w| {
            crate::storage::encode_varint(u64::from(*v), w)
        })
        .unwrap();
        let back = List::<u32>::load(&mut buf.as_slice(), Ord::cmp, &mut |r| {
            crate::storage::decode_varint(r).map(|n| n as u32)
        })
        .unwrap();
        assert!(list.equal(&back));
    }
}
