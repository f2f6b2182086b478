// Copyright 2024-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! The singly linked sequence engine: one link per node, forward-only
//! traversal, O(1) at both the front and (for pushes) the back. The lean
//! sibling of [List](crate::List) for workloads that never walk backwards.

use crate::error::ContainerError;
use crate::protocol::{Collection, Cursor, Header, Sequential};
use crate::storage::{self, LoadElement, SaveElement};
use crate::vector::CompareFn;
use crate::{ErrorHook, Flags};
use crate::observer::Event;
use core::cmp::Ordering;
use std::io::{Read, Write};

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
struct NodeId(u32);

struct Node<T> {
    next: Option<NodeId>,
    value: T,
}

enum Slot<T> {
    Occupied(Node<T>),
    Free(Option<u32>),
}

/// Singly linked list of `T`.
pub struct SList<T> {
    header: Header,
    slots: Vec<Slot<T>>,
    free_head: Option<u32>,
    head: Option<NodeId>,
    tail: Option<NodeId>,
    count: usize,
    compare: CompareFn<T>,
}

impl<T: Ord> SList<T> {
    pub fn new() -> Self {
        Self::with_compare(Ord::cmp)
    }
}

impl<T: Ord> Default for SList<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Ord> FromIterator<T> for SList<T> {
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        let mut list = Self::new();
        for value in iter {
            list.push_back_value(value);
        }
        list
    }
}

impl<T> SList<T> {
    pub fn with_compare(compare: CompareFn<T>) -> Self {
        Self {
            header: Header::new(),
            slots: Vec::new(),
            free_head: None,
            head: None,
            tail: None,
            count: 0,
            compare,
        }
    }

    fn node(&self, id: NodeId) -> &Node<T> {
        match &self.slots[id.0 as usize] {
            Slot::Occupied(node) => node,
            Slot::Free(_) => unreachable!("slist arena handle points at a free slot"),
        }
    }

    fn node_mut(&mut self, id: NodeId) -> &mut Node<T> {
        match &mut self.slots[id.0 as usize] {
            Slot::Occupied(node) => node,
            Slot::Free(_) => unreachable!("slist arena handle points at a free slot"),
        }
    }

    fn alloc_node(&mut self, value: T) -> NodeId {
        let node = Node { next: None, value };
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
            Slot::Free(_) => unreachable!("double free of a slist arena slot"),
        }
    }

    fn id_at(&self, index: usize) -> Option<NodeId> {
        if index >= self.count {
            return None;
        }
        let mut id = self.head?;
        for _ in 0..index {
            id = self.node(id).next?;
        }
        Some(id)
    }

    fn push_front_value(&mut self, value: T) {
        let id = self.alloc_node(value);
        self.node_mut(id).next = self.head;
        self.head = Some(id);
        if self.tail.is_none() {
            self.tail = Some(id);
        }
        self.count += 1;
    }

    fn push_back_value(&mut self, value: T) {
        let id = self.alloc_node(value);
        match self.tail {
            Some(tail) => self.node_mut(tail).next = Some(id),
            None => self.head = Some(id),
        }
        self.tail = Some(id);
        self.count += 1;
    }

    /// Removes and returns the head value: the documented pop-front
    /// contract, nothing else.
    fn take_front(&mut self) -> Option<T> {
        let id = self.head?;
        self.head = self.node(id).next;
        if self.head.is_none() {
            self.tail = None;
        }
        self.count -= 1;
        Some(self.free_node(id))
    }

    pub fn front(&self) -> Option<&T> {
        self.head.map(|id| &self.node(id).value)
    }

    pub fn back(&self) -> Option<&T> {
        self.tail.map(|id| &self.node(id).value)
    }

    pub fn iter(&self) -> impl Iterator<Item = &T> + '_ {
        let mut at = self.head;
        core::iter::from_fn(move || {
            let id = at?;
            let node = self.node(id);
            at = node.next;
            Some(&node.value)
        })
    }

    pub fn apply(&self, mut f: impl FnMut(&T)) -> usize {
        let mut visited = 0;
        for value in self.iter() {
            f(value);
            visited += 1;
        }
        visited
    }

    /// Reverses the chain in place by relinking.
    pub fn reverse(&mut self) -> Result<(), ContainerError> {
        self.header.guard_mut("SList.reverse")?;
        let mut prev = None;
        let mut at = self.head;
        self.tail = self.head;
        while let Some(id) = at {
            let next = self.node(id).next;
            self.node_mut(id).next = prev;
            prev = Some(id);
            at = next;
        }
        self.head = prev;
        self.header.touch();
        Ok(())
    }

    pub fn equal(&self, other: &SList<T>) -> bool {
        if self.count != other.count || self.header.flags() != other.header.flags() {
            return false;
        }
        self.iter()
            .zip(other.iter())
            .all(|(a, b)| (self.compare)(a, b) == Ordering::Equal)
    }

    pub fn cursor(&self) -> SListCursor<T> {
        SListCursor {
            at: None,
            index: 0,
            timestamp: self.header.timestamp(),
            scratch: None,
        }
    }

    pub fn save(
        &self,
        writer: &mut dyn Write,
        save_fn: SaveElement<'_, T>,
    ) -> Result<(), ContainerError> {
        storage::write_envelope(
            writer,
            &storage::SLIST_GUID,
            self.count as u64,
            self.header.flags().bits(),
            0,
        )?;
        for value in self.iter() {
            save_fn(value, writer)
                .map_err(|_| self.header.fail("SList.save", ContainerError::FileWrite))?;
        }
        Ok(())
    }

    pub fn load(
        reader: &mut dyn Read,
        compare: CompareFn<T>,
        load_fn: LoadElement<'_, T>,
    ) -> Result<SList<T>, ContainerError> {
        let envelope = storage::read_envelope(reader, &storage::SLIST_GUID)?;
        let mut list = SList::with_compare(compare);
        for _ in 0..envelope.count {
            let value = load_fn(reader).map_err(|_| ContainerError::FileRead)?;
            list.push_back_value(value);
        }
        list.header.set_flags(Flags::from_bits(envelope.flags));
        Ok(list)
    }
}

impl<T: Clone> SList<T> {
    pub fn copy(&self) -> SList<T> {
        let mut duplicate = SList::with_compare(self.compare);
        for value in self.iter() {
            duplicate.push_back_value(value.clone());
        }
        duplicate.header = self.header.for_copy();
        duplicate
    }
}

impl<T> Collection for SList<T> {
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
        self.header.guard_mut("SList.clear")?;
        self.header.notify(Event::Clear, 0, self.count);
        while self.take_front().is_some() {}
        self.slots.clear();
        self.free_head = None;
        self.header.touch();
        Ok(())
    }

    fn set_error_hook(&mut self, hook: Option<ErrorHook>) {
        self.header.set_hook(hook);
    }
}

impl<T> Sequential<T> for SList<T> {
    fn add(&mut self, value: T) -> Result<(), ContainerError> {
        self.header.guard_mut("SList.add")?;
        self.push_back_value(value);
        self.header.touch();
        self.header.notify(Event::Add, self.count - 1, 1);
        Ok(())
    }

    fn get(&self, index: usize) -> Option<&T> {
        self.id_at(index).map(|id| &self.node(id).value)
    }

    fn push_front(&mut self, value: T) -> Result<(), ContainerError> {
        self.header.guard_mut("SList.push_front")?;
        self.push_front_value(value);
        self.header.touch();
        self.header.notify(Event::Push, 0, 1);
        Ok(())
    }

    fn push_back(&mut self, value: T) -> Result<(), ContainerError> {
        self.header.guard_mut("SList.push_back")?;
        self.push_back_value(value);
        self.header.touch();
        self.header.notify(Event::Push, self.count - 1, 1);
        Ok(())
    }

    fn pop_front(&mut self) -> Result<Option<T>, ContainerError> {
        self.header.guard_mut("SList.pop_front")?;
        let value = self.take_front();
        if value.is_some() {
            self.header.touch();
            self.header.notify(Event::Pop, 0, 1);
        }
        Ok(value)
    }

    /// O(n): walks to the node before the tail.
    fn pop_back(&mut self) -> Result<Option<T>, ContainerError> {
        self.header.guard_mut("SList.pop_back")?;
        if self.count == 0 {
            return Ok(None);
        }
        let value = if self.count == 1 {
            self.take_front()
        } else {
            let Some(before) = self.id_at(self.count - 2) else {
                return Err(self.header.fail("SList.pop_back", ContainerError::Internal));
            };
            let Some(last) = self.node(before).next else {
                return Err(self.header.fail("SList.pop_back", ContainerError::Internal));
            };
            self.node_mut(before).next = None;
            self.tail = Some(before);
            self.count -= 1;
            Some(self.free_node(last))
        };
        self.header.touch();
        self.header.notify(Event::Pop, self.count, 1);
        Ok(value)
    }

    fn insert_at(&mut self, index: usize, value: T) -> Result<(), ContainerError> {
        self.header.guard_mut("SList.insert_at")?;
        if index > self.count {
            return Err(self.header.fail("SList.insert_at", ContainerError::Index));
        }
        if index == 0 {
            self.push_front_value(value);
        } else if index == self.count {
            self.push_back_value(value);
        } else {
            let Some(before) = self.id_at(index - 1) else {
                return Err(self.header.fail("SList.insert_at", ContainerError::Internal));
            };
            let id = self.alloc_node(value);
            let next = self.node(before).next;
            self.node_mut(id).next = next;
            self.node_mut(before).next = Some(id);
            self.count += 1;
        }
        self.header.touch();
        self.header.notify(Event::InsertAt, index, 1);
        Ok(())
    }

    fn erase_at(&mut self, index: usize) -> Result<T, ContainerError> {
        self.header.guard_mut("SList.erase_at")?;
        if index >= self.count {
            return Err(self.header.fail("SList.erase_at", ContainerError::Index));
        }
        let value = if index == 0 {
            match self.take_front() {
                Some(value) => value,
                None => {
                    return Err(self.header.fail("SList.erase_at", ContainerError::Internal))
                }
            }
        } else {
            let Some(before) = self.id_at(index - 1) else {
                return Err(self.header.fail("SList.erase_at", ContainerError::Internal));
            };
            let Some(id) = self.node(before).next else {
                return Err(self.header.fail("SList.erase_at", ContainerError::Internal));
            };
            let next = self.node(id).next;
            self.node_mut(before).next = next;
            if next.is_none() {
                self.tail = Some(before);
            }
            self.count -= 1;
            self.free_node(id)
        };
        self.header.touch();
        self.header.notify(Event::EraseAt, index, 1);
        Ok(value)
    }

    fn replace_at(&mut self, index: usize, value: T) -> Result<(), ContainerError> {
        self.header.guard_mut("SList.replace_at")?;
        let Some(id) = self.id_at(index) else {
            return Err(self.header.fail("SList.replace_at", ContainerError::Index));
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
        self.header.guard_mut("SList.erase_value")?;
        match self.index_of(value) {
            Some(index) => self.erase_at(index).map(drop),
            None => Err(self
                .header
                .fail("SList.erase_value", ContainerError::NotFound)),
        }
    }

    fn erase_all(&mut self, value: &T) -> Result<usize, ContainerError> {
        self.header.guard_mut("SList.erase_all")?;
        let mut erased = 0;
        while let Some(index) = self.index_of(value) {
            self.erase_at(index)?;
            erased += 1;
        }
        Ok(erased)
    }
}

impl<T> Drop for SList<T> {
    fn drop(&mut self) {
        self.header.notify(Event::Finalize, 0, self.count);
    }
}

impl<T: core::fmt::Debug> core::fmt::Debug for SList<T> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_list().entries(self.iter()).finish()
    }
}

impl<T> PartialEq for SList<T> {
    fn eq(&self, other: &Self) -> bool {
        self.equal(other)
    }
}

/// Forward-only cursor; `previous` reports
/// [NotImplemented](ContainerError::NotImplemented).
pub struct SListCursor<T> {
    at: Option<NodeId>,
    index: usize,
    timestamp: u64,
    scratch: Option<T>,
}

impl<T: Clone> SListCursor<T> {
    fn check(&self, list: &SList<T>, operation: &'static str) -> Result<(), ContainerError> {
        if self.timestamp != list.header.timestamp() {
            Err(list.header.fail(operation, ContainerError::ObjectChanged))
        } else {
            Ok(())
        }
    }

    fn yield_id<'a>(&'a mut self, list: &'a SList<T>, id: NodeId) -> Option<&'a T> {
        let value = &list.node(id).value;
        if list.header.flags().contains(Flags::READONLY) {
            self.scratch = Some(value.clone());
            self.scratch.as_ref()
        } else {
            Some(value)
        }
    }
}

impl<T: Clone> Cursor for SListCursor<T> {
    type Container = SList<T>;
    type Item = T;

    fn first<'a>(&'a mut self, list: &'a SList<T>) -> Result<Option<&'a T>, ContainerError> {
        self.check(list, "SListCursor.first")?;
        match list.head {
            Some(id) => {
                self.at = Some(id);
                self.index = 0;
                Ok(self.yield_id(list, id))
            }
            None => Ok(None),
        }
    }

    fn last<'a>(&'a mut self, list: &'a SList<T>) -> Result<Option<&'a T>, ContainerError> {
        self.check(list, "SListCursor.last")?;
        match list.tail {
            Some(id) => {
                self.at = Some(id);
                self.index = list.count - 1;
                Ok(self.yield_id(list, id))
            }
            None => Ok(None),
        }
    }

    fn next<'a>(&'a mut self, list: &'a SList<T>) -> Result<Option<&'a T>, ContainerError> {
        self.check(list, "SListCursor.next")?;
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

    fn previous<'a>(&'a mut self, list: &'a SList<T>) -> Result<Option<&'a T>, ContainerError> {
        Err(list
            .header
            .fail("SListCursor.previous", ContainerError::NotImplemented))
    }

    fn current<'a>(&'a mut self, list: &'a SList<T>) -> Result<Option<&'a T>, ContainerError> {
        self.check(list, "SListCursor.current")?;
        match self.at {
            Some(id) => Ok(self.yield_id(list, id)),
            None => Ok(None),
        }
    }

    fn seek<'a>(
        &'a mut self,
        list: &'a SList<T>,
        index: usize,
    ) -> Result<Option<&'a T>, ContainerError> {
        self.check(list, "SListCursor.seek")?;
        let Some(id) = list.id_at(index) else {
            return Err(list.header.fail("SListCursor.seek", ContainerError::Index));
        };
        self.at = Some(id);
        self.index = index;
        Ok(self.yield_id(list, id))
    }
}
