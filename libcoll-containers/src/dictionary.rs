// Copyright 2024-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! The string-keyed associative engine: separate chaining over a prime
//! bucket table. Keys and values are both copied into entry storage the
//! dictionary owns. The table only grows, by doubling through a fixed
//! prime progression, when the entry count outruns the bucket count.

use crate::error::ContainerError;
use crate::observer::Event;
use crate::protocol::{Associative, Collection, Cursor, Header};
use crate::storage::{self, LoadElement, SaveElement};
use crate::{ErrorHook, Flags, Vector};
use allocator_api2::alloc::{Allocator, Global};
use allocator_api2::vec::Vec as SlabVec;
use std::io::{Read, Write};

/// Hash over key bytes; replaceable per dictionary.
pub type HashFn = fn(&str) -> u64;

/// The times-33 accumulator over the key bytes.
pub fn times33_hash(key: &str) -> u64 {
    key.bytes()
        .fold(0u64, |h, b| h.wrapping_mul(33).wrapping_add(u64::from(b)))
}

/// Bucket counts are always drawn from this prime progression; create
/// picks the smallest entry at least as large as the caller's hint, growth
/// doubles along it.
const PRIMES: [usize; 12] = [
    509, 1021, 2053, 4093, 8191, 16381, 32771, 65521, 131071, 262147, 524287, 1048573,
];

fn prime_at_least(hint: usize) -> usize {
    for prime in PRIMES {
        if prime >= hint {
            return prime;
        }
    }
    PRIMES[PRIMES.len() - 1]
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
struct EntryId(u32);

struct Entry<V> {
    hash: u64,
    key: Box<str>,
    value: V,
    next: Option<EntryId>,
}

enum Slot<V> {
    Occupied(Entry<V>),
    Free(Option<u32>),
}

/// String key -> `V`, chained hash.
pub struct Dictionary<V, A: Allocator = Global> {
    header: Header,
    buckets: Vec<Option<EntryId>>,
    slots: SlabVec<Slot<V>, A>,
    free_head: Option<u32>,
    count: usize,
    hash: HashFn,
}

impl<V> Dictionary<V> {
    pub fn new() -> Self {
        Self::with_hint(0)
    }

    /// `hint` sizes the initial bucket table: the smallest prime of the
    /// progression that is >= hint.
    pub fn with_hint(hint: usize) -> Self {
        Self::with_hint_in(hint, Global)
    }
}

impl<V> Default for Dictionary<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V, A: Allocator> Dictionary<V, A> {
    /// Entry storage lives in `allocator`; hand it a pool for arena-backed
    /// entries.
    pub fn with_hint_in(hint: usize, allocator: A) -> Self {
        Self {
            header: Header::new(),
            buckets: vec![None; prime_at_least(hint)],
            slots: SlabVec::new_in(allocator),
            free_head: None,
            count: 0,
            hash: times33_hash,
        }
    }

    pub fn bucket_count(&self) -> usize {
        self.buckets.len()
    }

    pub fn load_factor(&self) -> f64 {
        self.count as f64 / self.buckets.len() as f64
    }

    pub fn hash_fn(&self) -> HashFn {
        self.hash
    }

    /// Swaps the hash function and rehashes every entry under it.
    pub fn set_hash_fn(&mut self, hash: HashFn) -> Result<HashFn, ContainerError> {
        self.header.guard_mut("Dictionary.set_hash_fn")?;
        let old = self.hash;
        self.hash = hash;
        for slot in self.slots.iter_mut() {
            if let Slot::Occupied(entry) = slot {
                entry.hash = hash(&entry.key);
            }
        }
        self.rebuild_buckets(self.buckets.len());
        self.header.touch();
        Ok(old)
    }

    fn entry(&self, id: EntryId) -> &Entry<V> {
        match &self.slots[id.0 as usize] {
            Slot::Occupied(entry) => entry,
            Slot::Free(_) => unreachable!("dictionary handle points at a free slot"),
        }
    }

    fn entry_mut(&mut self, id: EntryId) -> &mut Entry<V> {
        match &mut self.slots[id.0 as usize] {
            Slot::Occupied(entry) => entry,
            Slot::Free(_) => unreachable!("dictionary handle points at a free slot"),
        }
    }

    fn alloc_entry(&mut self, entry: Entry<V>) -> EntryId {
        match self.free_head {
            Some(index) => {
                let next_free = match self.slots[index as usize] {
                    Slot::Free(next) => next,
                    Slot::Occupied(_) => unreachable!("free list points at a live slot"),
                };
                self.free_head = next_free;
                self.slots[index as usize] = Slot::Occupied(entry);
                EntryId(index)
            }
            None => {
                let index = self.slots.len() as u32;
                self.slots.push(Slot::Occupied(entry));
                EntryId(index)
            }
        }
    }

    fn free_entry(&mut self, id: EntryId) -> Entry<V> {
        let slot = core::mem::replace(&mut self.slots[id.0 as usize], Slot::Free(self.free_head));
        self.free_head = Some(id.0);
        match slot {
            Slot::Occupied(entry) => entry,
            Slot::Free(_) => unreachable!("double free of a dictionary slot"),
        }
    }

    fn bucket_of(&self, hash: u64) -> usize {
        (hash % self.buckets.len() as u64) as usize
    }

    fn find_entry(&self, key: &str) -> Option<EntryId> {
        let hash = (self.hash)(key);
        let mut at = self.buckets[self.bucket_of(hash)];
        while let Some(id) = at {
            let entry = self.entry(id);
            if entry.hash == hash && &*entry.key == key {
                return Some(id);
            }
            at = entry.next;
        }
        None
    }

    /// Relinks every live entry into a bucket table of `len` heads.
    fn rebuild_buckets(&mut self, len: usize) {
        self.buckets.clear();
        self.buckets.resize(len, None);
        for index in 0..self.slots.len() {
            let hash = match &self.slots[index] {
                Slot::Occupied(entry) => entry.hash,
                Slot::Free(_) => continue,
            };
            let bucket = (hash % len as u64) as usize;
            let head = self.buckets[bucket];
            match &mut self.slots[index] {
                Slot::Occupied(entry) => entry.next = head,
                Slot::Free(_) => unreachable!("slot freed mid-rebuild"),
            }
            self.buckets[bucket] = Some(EntryId(index as u32));
        }
    }

    /// The load-factor ceiling is 1.0: grow when entries outnumber
    /// buckets, doubling along the prime progression.
    fn maybe_grow(&mut self) {
        if self.count > self.buckets.len() {
            let next = prime_at_least(self.buckets.len() * 2);
            if next > self.buckets.len() {
                self.rebuild_buckets(next);
            }
        }
    }

    fn add_inner(
        &mut self,
        key: &str,
        value: V,
        overwrite: bool,
        operation: &'static str,
    ) -> Result<bool, ContainerError> {
        self.header.guard_mut(operation)?;
        if let Some(id) = self.find_entry(key) {
            if overwrite {
                self.header.touch();
                self.entry_mut(id).value = value;
            }
            return Ok(false);
        }
        let hash = (self.hash)(key);
        let bucket = self.bucket_of(hash);
        let entry = Entry {
            hash,
            key: Box::from(key),
            value,
            next: self.buckets[bucket],
        };
        let id = self.alloc_entry(entry);
        self.buckets[bucket] = Some(id);
        self.count += 1;
        self.maybe_grow();
        self.header.touch();
        Ok(true)
    }

    /// Adds or overwrites; `Ok(true)` for a fresh key.
    pub fn add(&mut self, key: &str, value: V) -> Result<bool, ContainerError> {
        let added = self.add_inner(key, value, true, "Dictionary.add")?;
        self.header.notify(Event::Add, 0, 1);
        Ok(added)
    }

    /// Adds only; an existing key is left alone and reported as
    /// `Ok(false)`.
    pub fn insert(&mut self, key: &str, value: V) -> Result<bool, ContainerError> {
        let added = self.add_inner(key, value, false, "Dictionary.insert")?;
        if added {
            self.header.notify(Event::Insert, 0, 1);
        }
        Ok(added)
    }

    /// Overwrites an existing key; absent keys are an error.
    pub fn replace(&mut self, key: &str, value: V) -> Result<(), ContainerError> {
        self.header.guard_mut("Dictionary.replace")?;
        match self.find_entry(key) {
            Some(id) => {
                self.header.touch();
                self.header.notify(Event::Replace, 0, 1);
                self.entry_mut(id).value = value;
                Ok(())
            }
            None => Err(self
                .header
                .fail("Dictionary.replace", ContainerError::NotFound)),
        }
    }

    pub fn get(&self, key: &str) -> Option<&V> {
        self.find_entry(key).map(|id| &self.entry(id).value)
    }

    pub fn get_mut(&mut self, key: &str) -> Option<&mut V> {
        let id = self.find_entry(key)?;
        self.header.touch();
        Some(&mut self.entry_mut(id).value)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.find_entry(key).is_some()
    }

    /// Unlinks and drops the entry for `key`.
    pub fn erase(&mut self, key: &str) -> Result<(), ContainerError> {
        self.header.guard_mut("Dictionary.erase")?;
        let hash = (self.hash)(key);
        let bucket = self.bucket_of(hash);
        let mut prev: Option<EntryId> = None;
        let mut at = self.buckets[bucket];
        while let Some(id) = at {
            let entry = self.entry(id);
            if entry.hash == hash && &*entry.key == key {
                let next = entry.next;
                match prev {
                    Some(prev) => self.entry_mut(prev).next = next,
                    None => self.buckets[bucket] = next,
                }
                drop(self.free_entry(id));
                self.count -= 1;
                self.header.touch();
                self.header.notify(Event::EraseAt, bucket, 1);
                return Ok(());
            }
            prev = Some(id);
            at = entry.next;
        }
        Err(self.header.fail("Dictionary.erase", ContainerError::NotFound))
    }

    /// Visits every `(key, value)` pair in bucket order.
    pub fn apply(&self, mut f: impl FnMut(&str, &V)) -> usize {
        let mut visited = 0;
        for head in &self.buckets {
            let mut at = *head;
            while let Some(id) = at {
                let entry = self.entry(id);
                f(&entry.key, &entry.value);
                visited += 1;
                at = entry.next;
            }
        }
        visited
    }

    /// Iterates `(key, value)` pairs in bucket order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &V)> + '_ {
        self.buckets.iter().flat_map(move |head| {
            let mut at = *head;
            core::iter::from_fn(move || {
                let id = at?;
                let entry = self.entry(id);
                at = entry.next;
                Some((&*entry.key, &entry.value))
            })
        })
    }

    /// Snapshot of all current keys.
    pub fn get_keys(&self) -> Vector<String> {
        let mut keys = Vector::new();
        for (key, _) in self.iter() {
            let _ = crate::Sequential::add(&mut keys, key.to_string());
        }
        keys
    }

    /// Structural and content equality: same size, flags, hash function,
    /// and every key resolving to an equal value.
    pub fn equal<B: Allocator>(&self, other: &Dictionary<V, B>) -> bool
    where
        V: PartialEq,
    {
        if self.count != other.count
            || self.header.flags() != other.header.flags()
            || self.hash != other.hash
        {
            return false;
        }
        self.iter()
            .all(|(key, value)| other.get(key) == Some(value))
    }

    pub fn cursor(&self) -> DictionaryCursor<V, A> {
        DictionaryCursor {
            at: None,
            bucket: 0,
            timestamp: self.header.timestamp(),
            scratch: None,
            _slab: core::marker::PhantomData,
        }
    }

    pub(crate) fn header(&self) -> &Header {
        &self.header
    }

    pub(crate) fn header_mut(&mut self) -> &mut Header {
        &mut self.header
    }

    /// Writes the envelope, then each entry as a length-prefixed key
    /// followed by the value payload.
    pub fn save(
        &self,
        writer: &mut dyn Write,
        save_fn: SaveElement<'_, V>,
    ) -> Result<(), ContainerError> {
        storage::write_envelope(
            writer,
            &storage::DICTIONARY_GUID,
            self.count as u64,
            self.header.flags().bits(),
            0,
        )?;
        for (key, value) in self.iter() {
            storage::write_str(writer, key)
                .map_err(|_| self.header.fail("Dictionary.save", ContainerError::FileWrite))?;
            save_fn(value, writer)
                .map_err(|_| self.header.fail("Dictionary.save", ContainerError::FileWrite))?;
        }
        Ok(())
    }

    pub fn load(
        reader: &mut dyn Read,
        load_fn: LoadElement<'_, V>,
    ) -> Result<Dictionary<V>, ContainerError> {
        let envelope = storage::read_envelope(reader, &storage::DICTIONARY_GUID)?;
        let count = usize::try_from(envelope.count).map_err(|_| ContainerError::FileRead)?;
        let mut dictionary = Dictionary::with_hint(count);
        for _ in 0..count {
            let key = storage::read_string(reader).map_err(|_| ContainerError::FileRead)?;
            let value = load_fn(reader).map_err(|_| ContainerError::FileRead)?;
            dictionary.add(&key, value)?;
        }
        dictionary
            .header
            .set_flags(Flags::from_bits(envelope.flags));
        Ok(dictionary)
    }
}

impl<V: Clone, A: Allocator> Dictionary<V, A> {
    pub fn copy_value(&self, key: &str) -> Option<V> {
        self.get(key).cloned()
    }

    /// Deep copy into fresh storage; no observers carried over.
    pub fn copy(&self) -> Dictionary<V> {
        let mut duplicate = Dictionary::with_hint(self.count);
        duplicate.hash = self.hash;
        for (key, value) in self.iter() {
            // A fresh table cannot be read-only; add cannot fail.
            let _ = duplicate.add(key, value.clone());
        }
        *duplicate.header_mut() = self.header.for_copy();
        duplicate
    }

    /// Copies every entry of `source` into this table, overwriting
    /// duplicate keys. The source is left untouched.
    pub fn absorb<B: Allocator>(
        &mut self,
        source: &Dictionary<V, B>,
    ) -> Result<(), ContainerError> {
        self.header.guard_mut("Dictionary.absorb")?;
        for (key, value) in source.iter() {
            self.add_inner(key, value.clone(), true, "Dictionary.absorb")?;
        }
        self.header.notify(Event::InsertIn, 0, source.count);
        Ok(())
    }

    /// New table holding every `base` entry, then every `overlay` entry:
    /// on a key collision the merger decides, and in its absence the
    /// overlay wins.
    pub fn merge<B: Allocator, C: Allocator>(
        overlay: &Dictionary<V, B>,
        base: &Dictionary<V, C>,
        merger: Option<&dyn Fn(&str, &V, &V) -> V>,
    ) -> Result<Dictionary<V>, ContainerError> {
        if overlay.hash != base.hash {
            return Err(overlay
                .header
                .fail("Dictionary.merge", ContainerError::Incompatible));
        }
        let mut merged = Dictionary::with_hint(base.count + overlay.count);
        merged.hash = base.hash;
        for (key, value) in base.iter() {
            merged.add(key, value.clone())?;
        }
        for (key, value) in overlay.iter() {
            let resolved = match (merged.get(key), merger) {
                (Some(existing), Some(merger)) => merger(key, existing, value),
                _ => value.clone(),
            };
            merged.add(key, resolved)?;
        }
        Ok(merged)
    }
}

impl<V: Ord + Clone, A: Allocator> Dictionary<V, A> {
    /// Snapshots all current values into a vector, in bucket order.
    pub fn cast_to_array(&self) -> Vector<V> {
        let mut values = Vector::new();
        for (_, value) in self.iter() {
            let _ = crate::Sequential::add(&mut values, value.clone());
        }
        values
    }
}

impl<V, A: Allocator> Collection for Dictionary<V, A> {
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
        self.header.guard_mut("Dictionary.clear")?;
        self.header.notify(Event::Clear, 0, self.count);
        self.slots.clear();
        self.free_head = None;
        self.buckets.fill(None);
        self.count = 0;
        self.header.touch();
        Ok(())
    }

    fn set_error_hook(&mut self, hook: Option<ErrorHook>) {
        self.header.set_hook(hook);
    }
}

impl<V, A: Allocator> Associative<V> for Dictionary<V, A> {
    fn put(&mut self, key: &str, value: V) -> Result<bool, ContainerError> {
        self.add(key, value)
    }

    fn get_value(&self, key: &str) -> Option<&V> {
        self.get(key)
    }

    fn replace_value(&mut self, key: &str, value: V) -> Result<(), ContainerError> {
        self.replace(key, value)
    }

    fn erase_key(&mut self, key: &str) -> Result<(), ContainerError> {
        self.erase(key)
    }
}

impl<V, A: Allocator> Drop for Dictionary<V, A> {
    fn drop(&mut self) {
        self.header.notify(Event::Finalize, 0, self.count);
    }
}

impl<V: core::fmt::Debug, A: Allocator> core::fmt::Debug for Dictionary<V, A> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_map().entries(self.iter()).finish()
    }
}

/// Walks entries in bucket order; yields values. Forward-only, like the
/// bucket chains themselves.
pub struct DictionaryCursor<V, A: Allocator = Global> {
    at: Option<EntryId>,
    bucket: usize,
    timestamp: u64,
    scratch: Option<V>,
    _slab: core::marker::PhantomData<fn(&A)>,
}

impl<V: Clone, A: Allocator> DictionaryCursor<V, A> {
    fn check(
        &self,
        dictionary: &Dictionary<V, A>,
        operation: &'static str,
    ) -> Result<(), ContainerError> {
        if self.timestamp != dictionary.header.timestamp() {
            Err(dictionary
                .header
                .fail(operation, ContainerError::ObjectChanged))
        } else {
            Ok(())
        }
    }

    fn yield_id<'a>(&'a mut self, dictionary: &'a Dictionary<V, A>, id: EntryId) -> Option<&'a V> {
        let value = &dictionary.entry(id).value;
        if dictionary.header.flags().contains(Flags::READONLY) {
            self.scratch = Some(value.clone());
            self.scratch.as_ref()
        } else {
            Some(value)
        }
    }

    /// The key under the cursor.
    pub fn current_key<'a>(&self, dictionary: &'a Dictionary<V, A>) -> Option<&'a str> {
        self.at.map(|id| &*dictionary.entry(id).key)
    }

    /// Overwrites the value under the cursor, or erases the whole entry
    /// when `value` is none (stepping past it first), then
    /// resynchronizes with the table.
    pub fn replace(
        &mut self,
        dictionary: &mut Dictionary<V, A>,
        value: Option<V>,
    ) -> Result<(), ContainerError> {
        self.check(dictionary, "DictionaryCursor.replace")?;
        dictionary.header.guard_mut("DictionaryCursor.replace")?;
        let Some(id) = self.at else {
            return Err(dictionary
                .header
                .fail("DictionaryCursor.replace", ContainerError::BadArg));
        };
        match value {
            Some(value) => {
                dictionary.header.touch();
                dictionary.header.notify(Event::Replace, 0, 1);
                dictionary.entry_mut(id).value = value;
            }
            None => {
                let key = dictionary.entry(id).key.to_string();
                // Step off the entry before it goes away; unlinking it
                // does not disturb the rest of the chain.
                self.advance(dictionary);
                dictionary.erase(&key)?;
            }
        }
        self.timestamp = dictionary.header.timestamp();
        Ok(())
    }

    fn advance(&mut self, dictionary: &Dictionary<V, A>) -> Option<EntryId> {
        if let Some(id) = self.at {
            if let Some(next) = dictionary.entry(id).next {
                self.at = Some(next);
                return Some(next);
            }
            self.bucket += 1;
        }
        while self.bucket < dictionary.buckets.len() {
            if let Some(id) = dictionary.buckets[self.bucket] {
                self.at = Some(id);
                return Some(id);
            }
            self.bucket += 1;
        }
        self.at = None;
        None
    }
}

impl<V: Clone, A: Allocator> Cursor for DictionaryCursor<V, A> {
    type Container = Dictionary<V, A>;
    type Item = V;

    fn first<'a>(
        &'a mut self,
        dictionary: &'a Dictionary<V, A>,
    ) -> Result<Option<&'a V>, ContainerError> {
        self.check(dictionary, "DictionaryCursor.first")?;
        self.at = None;
        self.bucket = 0;
        match self.advance(dictionary) {
            Some(id) => Ok(self.yield_id(dictionary, id)),
            None => Ok(None),
        }
    }

    fn last<'a>(
        &'a mut self,
        dictionary: &'a Dictionary<V, A>,
    ) -> Result<Option<&'a V>, ContainerError> {
        Err(dictionary
            .header
            .fail("DictionaryCursor.last", ContainerError::NotImplemented))
    }

    fn next<'a>(
        &'a mut self,
        dictionary: &'a Dictionary<V, A>,
    ) -> Result<Option<&'a V>, ContainerError> {
        self.check(dictionary, "DictionaryCursor.next")?;
        match self.advance(dictionary) {
            Some(id) => Ok(self.yield_id(dictionary, id)),
            None => Ok(None),
        }
    }

    fn previous<'a>(
        &'a mut self,
        dictionary: &'a Dictionary<V, A>,
    ) -> Result<Option<&'a V>, ContainerError> {
        Err(dictionary
            .header
            .fail("DictionaryCursor.previous", ContainerError::NotImplemented))
    }

    fn current<'a>(
        &'a mut self,
        dictionary: &'a Dictionary<V, A>,
    ) -> Result<Option<&'a V>, ContainerError> {
        self.check(dictionary, "DictionaryCursor.current")?;
        match self.at {
            Some(id) => Ok(self.yield_id(dictionary, id)),
            None => Ok(None),
        }
    }

    fn seek<'a>(
        &'a mut self,
        dictionary: &'a Dictionary<V, A>,
        _index: usize,
    ) -> Result<Option<&'a V>, ContainerError> {
        Err(dictionary
            .header
            .fail("DictionaryCursor.seek", ContainerError::NotImplemented))
    }
}
