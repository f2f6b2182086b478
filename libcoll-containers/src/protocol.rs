// Copyright 2024-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! The container protocol: the header every engine embeds, and the traits
//! that let upstream code drive any container without knowing its concrete
//! shape. Runtime polymorphism is trait objects; "subclassing" a container
//! is wrapping it in a type that re-implements the trait.

use crate::error::{report, ContainerError, ErrorHook};
use crate::observer::{Event, EventSet, Notification, ObserverBus, ObserverCallback, ObserverId};
use crate::Flags;

/// State shared by every container: flags, the mutation timestamp cursors
/// snapshot, the error hook, and the observer bus.
pub(crate) struct Header {
    flags: Flags,
    timestamp: u64,
    hook: Option<ErrorHook>,
    observers: ObserverBus,
}

impl Header {
    pub(crate) fn new() -> Self {
        Self {
            flags: Flags::empty(),
            timestamp: 0,
            hook: None,
            observers: ObserverBus::default(),
        }
    }

    #[inline]
    pub(crate) fn flags(&self) -> Flags {
        self.flags
    }

    /// Swaps the flags, returning the old set. The swap itself counts as a
    /// mutation unless the container was and stays read-only.
    pub(crate) fn set_flags(&mut self, flags: Flags) -> Flags {
        let old = self.flags;
        self.flags = flags;
        if !(old.contains(Flags::READONLY) && flags.contains(Flags::READONLY)) {
            self.timestamp += 1;
        }
        old
    }

    #[inline]
    pub(crate) fn timestamp(&self) -> u64 {
        self.timestamp
    }

    /// Records a structural or content mutation, invalidating cursors.
    #[inline]
    pub(crate) fn touch(&mut self) {
        self.timestamp += 1;
    }

    /// Reports and returns a failure.
    #[inline]
    pub(crate) fn fail(&self, operation: &'static str, error: ContainerError) -> ContainerError {
        report(self.hook, operation, error)
    }

    /// The gate every mutating operation passes first. Leaves the
    /// timestamp untouched on failure, so a read-only container stays
    /// frozen.
    #[inline]
    pub(crate) fn guard_mut(&self, operation: &'static str) -> Result<(), ContainerError> {
        if self.flags.contains(Flags::READONLY) {
            Err(self.fail(operation, ContainerError::ReadOnly))
        } else {
            Ok(())
        }
    }

    pub(crate) fn set_hook(&mut self, hook: Option<ErrorHook>) {
        self.hook = hook;
    }

    #[inline]
    pub(crate) fn hook(&self) -> Option<ErrorHook> {
        self.hook
    }

    pub(crate) fn subscribe(&mut self, events: EventSet, callback: ObserverCallback) -> ObserverId {
        self.flags = self.flags.with(Flags::HAS_OBSERVER);
        self.observers.subscribe(events, callback)
    }

    pub(crate) fn unsubscribe(&mut self, id: ObserverId) -> bool {
        let removed = self.observers.unsubscribe(id);
        if self.observers.is_empty() {
            self.flags = self.flags.without(Flags::HAS_OBSERVER);
        }
        removed
    }

    #[inline]
    pub(crate) fn notify(&mut self, event: Event, index: usize, len: usize) {
        if self.flags.contains(Flags::HAS_OBSERVER) {
            self.observers.notify(&Notification { event, index, len });
        }
    }

    /// A fresh header for copies: same flags except the observer bit (the
    /// copy has no subscribers), same hook, timestamp restarted.
    pub(crate) fn for_copy(&self) -> Self {
        Self {
            flags: self.flags.without(Flags::HAS_OBSERVER),
            timestamp: 0,
            hook: self.hook,
            observers: ObserverBus::default(),
        }
    }
}

impl Default for Header {
    fn default() -> Self {
        Self::new()
    }
}

/// Operations every container exposes.
pub trait Collection {
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn flags(&self) -> Flags;

    /// Swaps the flag set, returning the previous one.
    fn set_flags(&mut self, flags: Flags) -> Flags;

    fn timestamp(&self) -> u64;

    fn clear(&mut self) -> Result<(), ContainerError>;

    fn set_error_hook(&mut self, hook: Option<ErrorHook>);
}

/// Operations of position-addressed containers.
pub trait Sequential<T>: Collection {
    /// Appends at the logical end.
    fn add(&mut self, value: T) -> Result<(), ContainerError>;

    fn get(&self, index: usize) -> Option<&T>;

    fn push_front(&mut self, value: T) -> Result<(), ContainerError>;

    fn push_back(&mut self, value: T) -> Result<(), ContainerError>;

    /// `Ok(None)` when empty.
    fn pop_front(&mut self) -> Result<Option<T>, ContainerError>;

    fn pop_back(&mut self) -> Result<Option<T>, ContainerError>;

    fn insert_at(&mut self, index: usize, value: T) -> Result<(), ContainerError>;

    fn erase_at(&mut self, index: usize) -> Result<T, ContainerError>;

    fn replace_at(&mut self, index: usize, value: T) -> Result<(), ContainerError>;

    /// First position holding a value equal to `value` under the
    /// container's compare function.
    fn index_of(&self, value: &T) -> Option<usize>;

    fn contains_value(&self, value: &T) -> bool {
        self.index_of(value).is_some()
    }

    /// Erases the first match; [NotFound](ContainerError::NotFound) when
    /// absent.
    fn erase_value(&mut self, value: &T) -> Result<(), ContainerError>;

    /// Erases every match, returning how many were removed.
    fn erase_all(&mut self, value: &T) -> Result<usize, ContainerError>;

    /// Moves every element out of `other` and adds it here, leaving
    /// `other` empty. Works across container kinds.
    fn append(&mut self, other: &mut dyn Sequential<T>) -> Result<(), ContainerError> {
        while let Some(value) = other.pop_front()? {
            self.add(value)?;
        }
        Ok(())
    }
}

/// Operations of string-keyed containers.
pub trait Associative<V>: Collection {
    /// Adds or overwrites. Returns whether the key was new.
    fn put(&mut self, key: &str, value: V) -> Result<bool, ContainerError>;

    fn get_value(&self, key: &str) -> Option<&V>;

    /// Overwrites an existing key; [NotFound](ContainerError::NotFound)
    /// when absent.
    fn replace_value(&mut self, key: &str, value: V) -> Result<(), ContainerError>;

    fn erase_key(&mut self, key: &str) -> Result<(), ContainerError>;

    fn has_key(&self, key: &str) -> bool {
        self.get_value(key).is_some()
    }
}

/// Where replace-through-cursor leaves the cursor afterwards.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Direction {
    Forward,
    Backward,
}

/// The common cursor shape. A cursor holds `{position, saved timestamp}`
/// and borrows the container per call; any mutation between calls makes the
/// next call fail with [ObjectChanged](ContainerError::ObjectChanged).
/// Cursors over a read-only container yield from a private scratch copy
/// rather than exposing container storage.
pub trait Cursor {
    type Container: ?Sized;
    type Item;

    fn first<'a>(
        &'a mut self,
        container: &'a Self::Container,
    ) -> Result<Option<&'a Self::Item>, ContainerError>;

    fn last<'a>(
        &'a mut self,
        container: &'a Self::Container,
    ) -> Result<Option<&'a Self::Item>, ContainerError>;

    fn next<'a>(
        &'a mut self,
        container: &'a Self::Container,
    ) -> Result<Option<&'a Self::Item>, ContainerError>;

    fn previous<'a>(
        &'a mut self,
        container: &'a Self::Container,
    ) -> Result<Option<&'a Self::Item>, ContainerError>;

    fn current<'a>(
        &'a mut self,
        container: &'a Self::Container,
    ) -> Result<Option<&'a Self::Item>, ContainerError>;

    fn seek<'a>(
        &'a mut self,
        container: &'a Self::Container,
        index: usize,
    ) -> Result<Option<&'a Self::Item>, ContainerError>;
}
