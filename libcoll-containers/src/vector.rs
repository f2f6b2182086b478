// Copyright 2024-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! The contiguous sequence engine. Elements live in one growable buffer;
//! an optional [Slice] view re-addresses traversals over an arithmetic
//! progression of the backing buffer. Equality, searching and sorting go
//! through the container's compare function, which defaults to [Ord] and
//! can be swapped at construction for any total order.

use crate::error::ContainerError;
use crate::observer::{Event, EventSet, ObserverId};
use crate::protocol::{Collection, Cursor, Direction, Header, Sequential};
use crate::storage::{self, LoadElement, SaveElement};
use crate::{ErrorHook, Flags, Mask};
use core::cmp::Ordering;
use std::io::{Read, Write};

/// Total order used by the value-addressed operations.
pub type CompareFn<T> = fn(&T, &T) -> Ordering;

/// A view `{start, length, stride}` attached to a vector. While attached,
/// traversal-shaped operations address logical element `i` at backing
/// index `start + i*stride`.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Slice {
    pub start: usize,
    pub length: usize,
    pub stride: usize,
}

/// Dense growable sequence of `T`.
pub struct Vector<T> {
    header: Header,
    items: Vec<T>,
    compare: CompareFn<T>,
    slice: Option<Slice>,
    /// When set, an out-of-range `insert_at` materializes the gap with
    /// filler elements instead of failing, giving sparse-array behavior.
    sparse: Option<fn() -> T>,
}

impl<T: Ord> Vector<T> {
    pub fn new() -> Self {
        Self::with_compare(Ord::cmp)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let mut vector = Self::new();
        vector.items.reserve_exact(capacity);
        vector
    }
}

impl<T: Ord> Default for Vector<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Ord> FromIterator<T> for Vector<T> {
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        let mut vector = Self::new();
        vector.items.extend(iter);
        vector
    }
}

impl<T> Vector<T> {
    /// A vector ordered by `compare` instead of `T: Ord`.
    pub fn with_compare(compare: CompareFn<T>) -> Self {
        Self {
            header: Header::new(),
            items: Vec::new(),
            compare,
            slice: None,
            sparse: None,
        }
    }

    pub fn compare_fn(&self) -> CompareFn<T> {
        self.compare
    }

    /// Installs the sparse filler consulted by out-of-range `insert_at`.
    pub fn set_sparse_filler(&mut self, filler: Option<fn() -> T>) {
        self.sparse = filler;
    }

    pub fn capacity(&self) -> usize {
        self.items.capacity()
    }

    /// Grows the capacity to exactly `capacity`. Never shrinks below the
    /// element count.
    pub fn set_capacity(&mut self, capacity: usize) -> Result<(), ContainerError> {
        self.header.guard_mut("Vector.set_capacity")?;
        if capacity > self.items.len() {
            self.items.reserve_exact(capacity - self.items.len());
            self.header.touch();
        }
        Ok(())
    }

    /// Strict grow: does nothing unless `capacity` exceeds the current one.
    pub fn resize_to(&mut self, capacity: usize) -> Result<(), ContainerError> {
        self.header.guard_mut("Vector.resize_to")?;
        if capacity > self.items.capacity() {
            self.items.reserve_exact(capacity - self.items.len());
            self.header.touch();
        }
        Ok(())
    }

    /// The 1.25x growth policy: room for one more element.
    fn grow_for_one(&mut self) {
        if self.items.len() == self.items.capacity() {
            let capacity = self.items.capacity();
            let target = capacity + 1 + capacity / 4;
            self.items.reserve_exact(target - self.items.len());
        }
    }

    /// Backing index of logical element `i`.
    #[inline]
    fn map_index(&self, i: usize) -> usize {
        match self.slice {
            Some(slice) => slice.start + i * slice.stride,
            None => i,
        }
    }

    /// Length of the logical view (slice length while one is attached).
    #[inline]
    fn logical_len(&self) -> usize {
        match self.slice {
            Some(slice) => slice.length,
            None => self.items.len(),
        }
    }

    /// Number of elements in the backing buffer, slice or not.
    pub fn backing_len(&self) -> usize {
        self.items.len()
    }

    /// Attaches a slice view. The last addressed index must fall inside
    /// the backing buffer, and the stride must be nonzero.
    pub fn set_slice(
        &mut self,
        start: usize,
        length: usize,
        stride: usize,
    ) -> Result<(), ContainerError> {
        if stride == 0 {
            return Err(self.header.fail("Vector.set_slice", ContainerError::BadArg));
        }
        if length > 0 {
            let last = start + (length - 1) * stride;
            if last >= self.items.len() {
                return Err(self.header.fail("Vector.set_slice", ContainerError::Index));
            }
        }
        self.slice = Some(Slice {
            start,
            length,
            stride,
        });
        Ok(())
    }

    /// Detaches the slice view, restoring the unrestricted address space.
    pub fn reset_slice(&mut self) {
        self.slice = None;
    }

    pub fn slice_view(&self) -> Option<Slice> {
        self.slice
    }

    pub fn get_mut(&mut self, index: usize) -> Option<&mut T> {
        if index >= self.logical_len() {
            return None;
        }
        let physical = self.map_index(index);
        self.items.get_mut(physical)
    }

    /// Iterates the logical view.
    pub fn iter(&self) -> impl Iterator<Item = &T> + '_ {
        (0..self.logical_len()).map(|i| &self.items[self.map_index(i)])
    }

    /// Calls `f` for every logical element, returning how many were
    /// visited.
    pub fn apply(&self, mut f: impl FnMut(&T)) -> usize {
        let len = self.logical_len();
        for i in 0..len {
            f(&self.items[self.map_index(i)]);
        }
        len
    }

    /// Mutating visit; a content mutation for cursor purposes.
    pub fn apply_mut(&mut self, mut f: impl FnMut(&mut T)) -> Result<usize, ContainerError> {
        self.header.guard_mut("Vector.apply_mut")?;
        let len = self.logical_len();
        for i in 0..len {
            let physical = self.map_index(i);
            f(&mut self.items[physical]);
        }
        self.header.touch();
        Ok(len)
    }

    /// Appends several values; one observer notification for the batch.
    pub fn add_range(
        &mut self,
        values: impl IntoIterator<Item = T>,
    ) -> Result<usize, ContainerError> {
        self.header.guard_mut("Vector.add_range")?;
        let before = self.items.len();
        self.items.extend(values);
        let added = self.items.len() - before;
        if let Some(slice) = self.slice.as_mut() {
            slice.length += added.div_ceil(slice.stride);
        }
        self.header.touch();
        self.header.notify(Event::AddRange, before, added);
        Ok(added)
    }

    /// Moves the elements of `source` into this vector at `index`,
    /// leaving `source` empty.
    pub fn insert_in(
        &mut self,
        index: usize,
        source: &mut Vector<T>,
    ) -> Result<(), ContainerError> {
        self.header.guard_mut("Vector.insert_in")?;
        if index > self.items.len() {
            return Err(self.header.fail("Vector.insert_in", ContainerError::Index));
        }
        let moved = source.items.len();
        self.items.splice(index..index, source.items.drain(..));
        source.header.touch();
        self.header.touch();
        self.header.notify(Event::InsertIn, index, moved);
        Ok(())
    }

    /// First logical index at which the two vectors differ.
    pub fn mismatch(&self, other: &Vector<T>) -> Option<usize> {
        let shorter = self.logical_len().min(other.logical_len());
        for i in 0..shorter {
            let a = &self.items[self.map_index(i)];
            let b = &other.items[other.map_index(i)];
            if (self.compare)(a, b) != Ordering::Equal {
                return Some(i);
            }
        }
        if self.logical_len() != other.logical_len() {
            Some(shorter)
        } else {
            None
        }
    }

    /// Content equality under this vector's compare function; the flag
    /// sets must match too, like the protocol's `equal`. Compare-function
    /// identity is not part of it: distinct monomorphizations of the same
    /// function don't share an address.
    pub fn equal(&self, other: &Vector<T>) -> bool {
        self.header.flags() == other.header.flags() && self.mismatch(other).is_none()
    }

    /// Scans the logical view from `from`, projecting a key out of each
    /// element; the keyed counterpart of `index_of` for structured records.
    pub fn search_by_key<K, F>(&self, from: usize, key: &K, project: F) -> Option<usize>
    where
        K: PartialEq + ?Sized,
        F: Fn(&T) -> &K,
    {
        (from..self.logical_len()).find(|&i| project(&self.items[self.map_index(i)]) == key)
    }

    fn reverse_logical(&mut self, mut lo: usize, mut hi: usize) {
        // Swap from both ends inward, in place.
        while lo < hi {
            let a = self.map_index(lo);
            let b = self.map_index(hi);
            self.items.swap(a, b);
            lo += 1;
            hi -= 1;
        }
    }

    /// Reverses the logical view in place.
    pub fn reverse(&mut self) -> Result<(), ContainerError> {
        self.header.guard_mut("Vector.reverse")?;
        let len = self.logical_len();
        if len > 1 {
            self.reverse_logical(0, len - 1);
            self.header.touch();
        }
        Ok(())
    }

    /// Rotates left by `n` using the three-reversal identity.
    pub fn rotate_left(&mut self, n: usize) -> Result<(), ContainerError> {
        self.header.guard_mut("Vector.rotate_left")?;
        let len = self.logical_len();
        if len < 2 {
            return Ok(());
        }
        let n = n % len;
        if n == 0 {
            return Ok(());
        }
        self.reverse_logical(0, n - 1);
        self.reverse_logical(n, len - 1);
        self.reverse_logical(0, len - 1);
        self.header.touch();
        Ok(())
    }

    pub fn rotate_right(&mut self, n: usize) -> Result<(), ContainerError> {
        let len = self.logical_len();
        if len < 2 {
            self.header.guard_mut("Vector.rotate_right")?;
            return Ok(());
        }
        self.rotate_left(len - (n % len))
    }

    /// Sorts the logical view with the container's compare function.
    pub fn sort(&mut self) -> Result<(), ContainerError> {
        self.header.guard_mut("Vector.sort")?;
        match self.slice {
            None => {
                let compare = self.compare;
                self.items.sort_by(compare);
            }
            Some(_) => {
                // Sort a permutation of the logical indices, then apply it
                // with swaps so strided elements move without cloning.
                let len = self.logical_len();
                let mut order: Vec<usize> = (0..len).collect();
                order.sort_by(|&a, &b| {
                    (self.compare)(&self.items[self.map_index(a)], &self.items[self.map_index(b)])
                });
                for i in 0..len {
                    while order[i] != i {
                        let j = order[i];
                        let a = self.map_index(i);
                        let b = self.map_index(j);
                        self.items.swap(a, b);
                        order.swap(i, j);
                    }
                }
            }
        }
        self.header.touch();
        Ok(())
    }

    /// Keeps only mask-selected elements, in place. The mask length must
    /// equal the backing length.
    pub fn select(&mut self, mask: &Mask) -> Result<(), ContainerError> {
        self.header.guard_mut("Vector.select")?;
        if mask.len() != self.items.len() {
            return Err(self.header.fail("Vector.select", ContainerError::BadMask));
        }
        let mut keep = mask.slots();
        self.items.retain(|_| keep.next().unwrap_or(false));
        self.slice = None;
        self.header.touch();
        Ok(())
    }

    pub fn first(&self) -> Option<&T> {
        self.get(0)
    }

    pub fn last(&self) -> Option<&T> {
        let len = self.logical_len();
        if len == 0 {
            None
        } else {
            self.get(len - 1)
        }
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

    #[inline]
    pub(crate) fn header(&self) -> &Header {
        &self.header
    }

    #[inline]
    pub(crate) fn header_mut(&mut self) -> &mut Header {
        &mut self.header
    }

    /// A cursor bound to the current timestamp.
    pub fn cursor(&self) -> VectorCursor<T> {
        VectorCursor {
            at: None,
            timestamp: self.header.timestamp(),
            scratch: None,
        }
    }
}

impl<T: Clone> Vector<T> {
    /// Deep copy. The copy starts without observers.
    pub fn copy(&self) -> Vector<T> {
        let duplicate = Vector {
            header: self.header.for_copy(),
            items: self.items.clone(),
            compare: self.compare,
            slice: self.slice,
            sparse: self.sparse,
        };
        duplicate
    }

    /// Clones the logical elements of `[start, end)` into a new vector.
    pub fn get_range(&self, start: usize, end: usize) -> Result<Vector<T>, ContainerError> {
        let len = self.logical_len();
        let end = end.min(len);
        if start > end {
            return Err(self.header.fail("Vector.get_range", ContainerError::Index));
        }
        let mut range = Vector::with_compare(self.compare);
        range.items.reserve_exact(end - start);
        for i in start..end {
            range.items.push(self.items[self.map_index(i)].clone());
        }
        Ok(range)
    }

    /// New vector holding the mask-selected elements.
    pub fn select_copy(&self, mask: &Mask) -> Result<Vector<T>, ContainerError> {
        if mask.len() != self.items.len() {
            return Err(self
                .header
                .fail("Vector.select_copy", ContainerError::BadMask));
        }
        let mut out = Vector::with_compare(self.compare);
        for (item, keep) in self.items.iter().zip(mask.slots()) {
            if keep {
                out.items.push(item.clone());
            }
        }
        Ok(out)
    }
}

impl<T> Collection for Vector<T> {
    fn len(&self) -> usize {
        self.logical_len()
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
        self.header.guard_mut("Vector.clear")?;
        self.header.notify(Event::Clear, 0, self.items.len());
        self.items.clear();
        self.slice = None;
        self.header.touch();
        Ok(())
    }

    fn set_error_hook(&mut self, hook: Option<ErrorHook>) {
        self.header.set_hook(hook);
    }
}

impl<T> Sequential<T> for Vector<T> {
    fn add(&mut self, value: T) -> Result<(), ContainerError> {
        self.header.guard_mut("Vector.add")?;
        match self.slice {
            None => {
                self.grow_for_one();
                self.items.push(value);
            }
            Some(slice) => {
                // Appending through a slice lands on the next progression
                // slot: overwrite inside the backing buffer, extend at its
                // end, fail on a gap unless the sparse filler closes it.
                let physical = slice.start + slice.length * slice.stride;
                match physical.cmp(&self.items.len()) {
                    Ordering::Less => self.items[physical] = value,
                    Ordering::Equal => self.items.push(value),
                    Ordering::Greater => match self.sparse {
                        Some(filler) => {
                            while self.items.len() < physical {
                                self.items.push(filler());
                            }
                            self.items.push(value);
                        }
                        None => {
                            return Err(self.header.fail("Vector.add", ContainerError::Index));
                        }
                    },
                }
                if let Some(slice) = self.slice.as_mut() {
                    slice.length += 1;
                }
            }
        }
        self.header.touch();
        self.header.notify(Event::Add, self.logical_len() - 1, 1);
        Ok(())
    }

    fn get(&self, index: usize) -> Option<&T> {
        if index >= self.logical_len() {
            return None;
        }
        self.items.get(self.map_index(index))
    }

    fn push_front(&mut self, value: T) -> Result<(), ContainerError> {
        self.header.guard_mut("Vector.push_front")?;
        self.grow_for_one();
        self.items.insert(0, value);
        self.header.touch();
        self.header.notify(Event::Push, 0, 1);
        Ok(())
    }

    fn push_back(&mut self, value: T) -> Result<(), ContainerError> {
        self.header.guard_mut("Vector.push_back")?;
        self.grow_for_one();
        self.items.push(value);
        self.header.touch();
        self.header.notify(Event::Push, self.items.len() - 1, 1);
        Ok(())
    }

    fn pop_front(&mut self) -> Result<Option<T>, ContainerError> {
        self.header.guard_mut("Vector.pop_front")?;
        if self.items.is_empty() {
            return Ok(None);
        }
        let value = self.items.remove(0);
        // The backing buffer shrank; any slice view is stale.
        self.slice = None;
        self.header.touch();
        self.header.notify(Event::Pop, 0, 1);
        Ok(Some(value))
    }

    fn pop_back(&mut self) -> Result<Option<T>, ContainerError> {
        self.header.guard_mut("Vector.pop_back")?;
        let value = self.items.pop();
        if value.is_some() {
            self.slice = None;
            self.header.touch();
            self.header.notify(Event::Pop, self.items.len(), 1);
        }
        Ok(value)
    }

    fn insert_at(&mut self, index: usize, value: T) -> Result<(), ContainerError> {
        self.header.guard_mut("Vector.insert_at")?;
        if index > self.items.len() {
            // The sparse filler turns the index error into infinite-array
            // behavior; without one the error stands.
            let Some(filler) = self.sparse else {
                return Err(self.header.fail("Vector.insert_at", ContainerError::Index));
            };
            self.resize_to(index + 1)?;
            while self.items.len() < index {
                self.items.push(filler());
            }
        }
        self.grow_for_one();
        self.items.insert(index, value);
        self.header.touch();
        self.header.notify(Event::InsertAt, index, 1);
        Ok(())
    }

    fn erase_at(&mut self, index: usize) -> Result<T, ContainerError> {
        self.header.guard_mut("Vector.erase_at")?;
        if index >= self.items.len() {
            return Err(self.header.fail("Vector.erase_at", ContainerError::Index));
        }
        let value = self.items.remove(index);
        self.slice = None;
        self.header.touch();
        self.header.notify(Event::EraseAt, index, 1);
        Ok(value)
    }

    fn replace_at(&mut self, index: usize, value: T) -> Result<(), ContainerError> {
        self.header.guard_mut("Vector.replace_at")?;
        if index >= self.logical_len() {
            return Err(self.header.fail("Vector.replace_at", ContainerError::Index));
        }
        let physical = self.map_index(index);
        self.items[physical] = value;
        self.header.touch();
        self.header.notify(Event::ReplaceAt, index, 1);
        Ok(())
    }

    fn index_of(&self, value: &T) -> Option<usize> {
        (0..self.logical_len())
            .find(|&i| (self.compare)(&self.items[self.map_index(i)], value) == Ordering::Equal)
    }

    fn erase_value(&mut self, value: &T) -> Result<(), ContainerError> {
        self.header.guard_mut("Vector.erase_value")?;
        match self.index_of(value) {
            Some(index) => {
                self.erase_at(index)?;
                Ok(())
            }
            None => Err(self
                .header
                .fail("Vector.erase_value", ContainerError::NotFound)),
        }
    }

    fn erase_all(&mut self, value: &T) -> Result<usize, ContainerError> {
        self.header.guard_mut("Vector.erase_all")?;
        let mut erased = 0;
        // Re-scan after each erasure; destructors run one at a time.
        while let Some(index) = self.index_of(value) {
            self.erase_at(index)?;
            erased += 1;
        }
        Ok(erased)
    }

    fn append(&mut self, other: &mut dyn Sequential<T>) -> Result<(), ContainerError> {
        self.header.guard_mut("Vector.append")?;
        let moved = other.len();
        while let Some(value) = other.pop_front()? {
            self.grow_for_one();
            self.items.push(value);
        }
        self.header.touch();
        self.header.notify(Event::Append, self.items.len(), moved);
        Ok(())
    }
}

impl<T: Clone> Clone for Vector<T> {
    fn clone(&self) -> Self {
        self.copy()
    }
}

impl<T> PartialEq for Vector<T> {
    fn eq(&self, other: &Self) -> bool {
        self.equal(other)
    }
}

impl<T> core::fmt::Debug for Vector<T>
where
    T: core::fmt::Debug,
{
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_list().entries(self.iter()).finish()
    }
}

impl<T> Drop for Vector<T> {
    fn drop(&mut self) {
        self.header.notify(Event::Finalize, 0, self.items.len());
    }
}

impl<T> Vector<T> {
    /// Writes the envelope and every backing element through `save_fn`.
    pub fn save(
        &self,
        writer: &mut dyn Write,
        save_fn: SaveElement<'_, T>,
    ) -> Result<(), ContainerError> {
        storage::write_envelope(
            writer,
            &storage::VECTOR_GUID,
            self.items.len() as u64,
            self.header.flags().bits(),
            0,
        )?;
        for item in &self.items {
            save_fn(item, writer).map_err(|_| {
                self.header.fail("Vector.save", ContainerError::FileWrite)
            })?;
        }
        Ok(())
    }

    /// Reads a stream produced by [Vector::save]. The restored vector uses
    /// `compare`; flags (including read-only) are restored from the stream.
    pub fn load(
        reader: &mut dyn Read,
        compare: CompareFn<T>,
        load_fn: LoadElement<'_, T>,
    ) -> Result<Self, ContainerError> {
        let envelope = storage::read_envelope(reader, &storage::VECTOR_GUID)?;
        let count = usize::try_from(envelope.count).map_err(|_| ContainerError::FileRead)?;
        let mut vector = Vector::with_compare(compare);
        vector.items.reserve_exact(count);
        for _ in 0..count {
            let item = load_fn(reader).map_err(|_| ContainerError::FileRead)?;
            vector.items.push(item);
        }
        vector.header.set_flags(Flags::from_bits(envelope.flags));
        Ok(vector)
    }
}

/// Bidirectional cursor over a [Vector].
pub struct VectorCursor<T> {
    /// Logical index of the current element, none before the first call.
    at: Option<usize>,
    timestamp: u64,
    /// Private buffer elements are copied into while the vector is
    /// read-only, so no reference into frozen storage escapes.
    scratch: Option<T>,
}

impl<T: Clone> VectorCursor<T> {
    fn check(&self, vector: &Vector<T>, operation: &'static str) -> Result<(), ContainerError> {
        if self.timestamp != vector.header.timestamp() {
            Err(vector.header.fail(operation, ContainerError::ObjectChanged))
        } else {
            Ok(())
        }
    }

    fn yield_at<'a>(&'a mut self, vector: &'a Vector<T>, index: usize) -> Option<&'a T> {
        let item = vector.get(index)?;
        if vector.header.flags().contains(Flags::READONLY) {
            self.scratch = Some(item.clone());
            self.scratch.as_ref()
        } else {
            Some(item)
        }
    }

    /// Replaces the element under the cursor, or erases it when `value` is
    /// none, then moves per `direction` and resynchronizes with the
    /// container.
    pub fn replace(
        &mut self,
        vector: &mut Vector<T>,
        value: Option<T>,
        direction: Direction,
    ) -> Result<(), ContainerError> {
        self.check(vector, "VectorCursor.replace")?;
        let Some(index) = self.at else {
            return Err(vector
                .header
                .fail("VectorCursor.replace", ContainerError::BadArg));
        };
        match value {
            Some(value) => {
                vector.replace_at(index, value)?;
                if direction == Direction::Backward {
                    self.at = index.checked_sub(1);
                }
            }
            None => {
                vector.erase_at(index)?;
                self.at = match direction {
                    // The successor shifted into `index`; step back so the
                    // next call yields it.
                    Direction::Forward => index.checked_sub(1),
                    Direction::Backward => index.checked_sub(1),
                };
            }
        }
        self.timestamp = vector.header.timestamp();
        Ok(())
    }
}

impl<T: Clone> Cursor for VectorCursor<T> {
    type Container = Vector<T>;
    type Item = T;

    fn first<'a>(&'a mut self, vector: &'a Vector<T>) -> Result<Option<&'a T>, ContainerError> {
        self.check(vector, "VectorCursor.first")?;
        self.at = Some(0);
        Ok(self.yield_at(vector, 0))
    }

    fn last<'a>(&'a mut self, vector: &'a Vector<T>) -> Result<Option<&'a T>, ContainerError> {
        self.check(vector, "VectorCursor.last")?;
        let len = vector.logical_len();
        if len == 0 {
            return Ok(None);
        }
        self.at = Some(len - 1);
        Ok(self.yield_at(vector, len - 1))
    }

    fn next<'a>(&'a mut self, vector: &'a Vector<T>) -> Result<Option<&'a T>, ContainerError> {
        self.check(vector, "VectorCursor.next")?;
        let index = self.at.map_or(0, |i| i + 1);
        if index >= vector.logical_len() {
            return Ok(None);
        }
        self.at = Some(index);
        Ok(self.yield_at(vector, index))
    }

    fn previous<'a>(&'a mut self, vector: &'a Vector<T>) -> Result<Option<&'a T>, ContainerError> {
        self.check(vector, "VectorCursor.previous")?;
        let Some(index) = self.at.and_then(|i| i.checked_sub(1)) else {
            return Ok(None);
        };
        self.at = Some(index);
        Ok(self.yield_at(vector, index))
    }

    fn current<'a>(&'a mut self, vector: &'a Vector<T>) -> Result<Option<&'a T>, ContainerError> {
        self.check(vector, "VectorCursor.current")?;
        match self.at {
            Some(index) => Ok(self.yield_at(vector, index)),
            None => Ok(None),
        }
    }

    fn seek<'a>(
        &'a mut self,
        vector: &'a Vector<T>,
        index: usize,
    ) -> Result<Option<&'a T>, ContainerError> {
        self.check(vector, "VectorCursor.seek")?;
        if index >= vector.logical_len() {
            return Err(vector
                .header
                .fail("VectorCursor.seek", ContainerError::Index));
        }
        self.at = Some(index);
        Ok(self.yield_at(vector, index))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observer::Event;

    #[test]
    fn test_thousand_adds_and_pops() {
        // Scenario: fill with 1..=1000, check the middle, drain half.
        let mut v: Vector<i32> = Vector::with_capacity(10);
        for i in 1..=1000 {
            v.add(i).unwrap();
        }
        assert_eq!(1000, v.len());
        assert_eq!(Some(&500), v.get(499));

        let mut sum = 0i64;
        for _ in 0..500 {
            sum += i64::from(v.pop_front().unwrap().unwrap());
        }
        assert_eq!((1 + 500) * 500 / 2, sum);

        let range = v.get_range(0, v.len()).unwrap();
        assert!(range.equal(&v));
    }

    #[test]
    fn test_growth_policy() {
        let mut v: Vector<u8> = Vector::with_capacity(8);
        assert_eq!(8, v.capacity());
        for _ in 0..9 {
            v.add(0).unwrap();
        }
        // 8 + 1 + 8/4
        assert_eq!(11, v.capacity());
    }

    #[test]
    fn test_insert_erase_replace() {
        let mut v: Vector<i32> = [1, 2, 4].into_iter().collect();
        v.insert_at(2, 3).unwrap();
        assert_eq!(vec![1, 2, 3, 4], v.iter().copied().collect::<Vec<_>>());

        assert_eq!(3, v.erase_at(2).unwrap());
        v.replace_at(2, 9).unwrap();
        assert_eq!(vec![1, 2, 9], v.iter().copied().collect::<Vec<_>>());

        assert_eq!(
            ContainerError::Index,
            v.insert_at(17, 0).unwrap_err()
        );
    }

    #[test]
    fn test_sparse_insert() {
        let mut v: Vector<i32> = Vector::new();
        v.set_sparse_filler(Some(|| 0));
        v.insert_at(4, 7).unwrap();
        assert_eq!(5, v.len());
        assert_eq!(vec![0, 0, 0, 0, 7], v.iter().copied().collect::<Vec<_>>());
    }

    #[test]
    fn test_erase_value_and_all() {
        let mut v: Vector<i32> = [5, 1, 5, 2, 5].into_iter().collect();
        v.erase_value(&5).unwrap();
        assert_eq!(vec![1, 5, 2, 5], v.iter().copied().collect::<Vec<_>>());
        assert_eq!(2, v.erase_all(&5).unwrap());
        assert_eq!(ContainerError::NotFound, v.erase_value(&5).unwrap_err());
        assert_eq!(0, v.erase_all(&9).unwrap());
    }

    #[test]
    fn test_rotate_and_reverse() {
        let mut v: Vector<i32> = (1..=5).collect();
        v.rotate_left(2).unwrap();
        assert_eq!(vec![3, 4, 5, 1, 2], v.iter().copied().collect::<Vec<_>>());
        v.rotate_right(2).unwrap();
        assert_eq!(vec![1, 2, 3, 4, 5], v.iter().copied().collect::<Vec<_>>());
        v.reverse().unwrap();
        assert_eq!(vec![5, 4, 3, 2, 1], v.iter().copied().collect::<Vec<_>>());
    }

    #[test]
    fn test_sort_custom_compare() {
        let mut v: Vector<i32> = Vector::with_compare(|a, b| b.cmp(a));
        v.add_range([3, 1, 4, 1, 5]).unwrap();
        v.sort().unwrap();
        assert_eq!(vec![5, 4, 3, 1, 1], v.iter().copied().collect::<Vec<_>>());
    }

    #[test]
    fn test_slice_view() {
        let mut v: Vector<i32> = (0..10).collect();
        v.set_slice(1, 4, 2).unwrap();
        assert_eq!(4, v.len());
        assert_eq!(
            vec![1, 3, 5, 7],
            v.iter().copied().collect::<Vec<_>>()
        );

        // Sorting through the slice only reorders the strided elements.
        v.replace_at(0, 9).unwrap();
        v.sort().unwrap();
        assert_eq!(vec![3, 5, 7, 9], v.iter().copied().collect::<Vec<_>>());
        v.reset_slice();
        assert_eq!(10, v.len());

        assert_eq!(
            ContainerError::Index,
            v.set_slice(4, 5, 3).unwrap_err()
        );
    }

    #[test]
    fn test_select_mask_laws() {
        let v: Vector<i32> = (0..6).collect();

        let all = Mask::ones(6);
        assert!(v.select_copy(&all).unwrap().equal(&v));

        let none = Mask::zeros(6);
        assert!(v.select_copy(&none).unwrap().is_empty());

        let some = Mask::from_bools(&[true, false, true, false, true, false]);
        let picked = v.select_copy(&some).unwrap();
        assert_eq!(some.popcount(), picked.len());
        assert_eq!(vec![0, 2, 4], picked.iter().copied().collect::<Vec<_>>());

        let mut w = v.copy();
        w.select(&some).unwrap();
        assert!(w.equal(&picked));

        let short = Mask::ones(3);
        assert_eq!(ContainerError::BadMask, w.select(&short).unwrap_err());
    }

    #[test]
    fn test_search_by_key() {
        let mut v: Vector<(u32, &str)> = Vector::with_compare(|a, b| a.0.cmp(&b.0));
        v.add_range([(1, "one"), (2, "two"), (3, "two")]).unwrap();
        assert_eq!(Some(1), v.search_by_key(0, "two", |pair| pair.1));
        assert_eq!(Some(2), v.search_by_key(2, "two", |pair| pair.1));
        assert_eq!(None, v.search_by_key(0, "four", |pair| pair.1));
    }

    #[test]
    fn test_readonly_rejects_mutation() {
        let mut v: Vector<i32> = (0..4).collect();
        let flags = v.flags().with(Flags::READONLY);
        v.set_flags(flags);
        let stamp = v.timestamp();

        assert_eq!(ContainerError::ReadOnly, v.add(1).unwrap_err());
        assert_eq!(ContainerError::ReadOnly, v.clear().unwrap_err());
        assert_eq!(ContainerError::ReadOnly, v.sort().unwrap_err());
        assert_eq!(ContainerError::ReadOnly, v.pop_back().unwrap_err());
        assert_eq!(stamp, v.timestamp());
    }

    #[test]
    fn test_cursor_walk_and_invalidation() {
        let mut v: Vector<i32> = (10..15).collect();

        let mut cursor = v.cursor();
        assert_eq!(Some(&10), cursor.first(&v).unwrap());
        assert_eq!(Some(&11), cursor.next(&v).unwrap());
        assert_eq!(Some(&10), cursor.previous(&v).unwrap());
        assert_eq!(Some(&14), cursor.last(&v).unwrap());
        assert_eq!(None, cursor.next(&v).unwrap());
        assert_eq!(Some(&12), cursor.seek(&v, 2).unwrap());

        v.add(99).unwrap();
        assert_eq!(
            ContainerError::ObjectChanged,
            cursor.next(&v).unwrap_err()
        );
    }

    #[test]
    fn test_cursor_replace_and_erase() {
        let mut v: Vector<i32> = (0..5).collect();
        let mut cursor = v.cursor();
        cursor.seek(&v, 2).unwrap();

        cursor.replace(&mut v, Some(20), Direction::Forward).unwrap();
        assert_eq!(Some(&3), cursor.next(&v).unwrap());

        // Erase under the cursor; the next call yields the shifted-in one.
        cursor.replace(&mut v, None, Direction::Forward).unwrap();
        assert_eq!(Some(&4), cursor.next(&v).unwrap());
        assert_eq!(vec![0, 1, 20, 4], v.iter().copied().collect::<Vec<_>>());
    }

    #[test]
    fn test_readonly_cursor_uses_scratch() {
        let mut v: Vector<String> = Vector::new();
        v.add("alpha".to_string()).unwrap();
        v.set_flags(Flags::READONLY);

        let mut cursor = v.cursor();
        let yielded = cursor.first(&v).unwrap().unwrap();
        // The yielded address must not be the container's own storage.
        assert_eq!("alpha", yielded);
        assert!(!core::ptr::eq(yielded, v.get(0).unwrap()));
    }

    #[test]
    fn test_append_across_kinds() {
        let mut a: Vector<i32> = (0..3).collect();
        let mut b: Vector<i32> = (3..6).collect();
        Sequential::append(&mut a, &mut b).unwrap();
        assert_eq!(6, a.len());
        assert!(b.is_empty());
        assert_eq!((0..6).collect::<Vec<_>>(), a.iter().copied().collect::<Vec<_>>());
    }

    #[test]
    fn test_observer_notifications() {
        use std::cell::RefCell;
        use std::rc::Rc;

        let mut v: Vector<i32> = Vector::new();
        let events = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&events);
        v.subscribe(EventSet::of(&[Event::Add, Event::Clear]), move |n| {
            sink.borrow_mut().push(n.event);
        });
        assert!(v.flags().contains(Flags::HAS_OBSERVER));

        v.add(1).unwrap();
        v.pop_back().unwrap();
        v.clear().unwrap();
        assert_eq!(vec![Event::Add, Event::Clear], *events.borrow());
    }

    #[test]
    fn test_save_load_roundtrip() {
        let mut v: Vector<u32> = (0..17).collect();
        v.set_flags(Flags::READONLY);

        let mut buf = Vec::new();
        v.save(&mut buf, &mut |item, w| {
            storage::encode_varint(u64::from(*item), w)
        })
        .unwrap();

        let back = Vector::load(&mut buf.as_slice(), Ord::cmp, &mut |r| {
            storage::decode_varint(r).map(|n| n as u32)
        })
        .unwrap();
        assert!(v.equal(&back));

        // A different container's stream is rejected by GUID.
        let err =
            crate::List::<u32>::load(&mut buf.as_slice(), Ord::cmp, &mut |r| {
                storage::decode_varint(r).map(|n| n as u32)
            })
            .unwrap_err();
        assert_eq!(ContainerError::WrongFile, err);
    }
}
