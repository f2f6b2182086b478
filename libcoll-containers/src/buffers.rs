// Copyright 2024-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Byte and element buffers: a linear growable stream with a cursor, and a
//! fixed-capacity ring with monotonic head/tail counters.

use crate::error::ContainerError;
use crate::observer::Event;
use crate::protocol::{Collection, Header};
use crate::{ErrorHook, Flags};
use std::io::{self, Read, Write};

/// A growable byte buffer with one read/write cursor. Writing appends (or
/// overwrites, after a seek) and advances; reading copies out and
/// advances. Growth asks for `max(requested, capacity/2)` more bytes.
pub struct StreamBuffer {
    header: Header,
    data: Vec<u8>,
    position: usize,
}

impl StreamBuffer {
    pub fn new() -> Self {
        Self::with_capacity(0)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            header: Header::new(),
            data: Vec::with_capacity(capacity),
            position: 0,
        }
    }

    /// Bytes written so far (the high-water mark, not the capacity).
    pub fn size(&self) -> usize {
        self.data.len()
    }

    pub fn capacity(&self) -> usize {
        self.data.capacity()
    }

    pub fn position(&self) -> usize {
        self.position
    }

    /// Moves the cursor; clamped to the written size.
    pub fn set_position(&mut self, position: usize) {
        self.position = position.min(self.data.len());
    }

    fn grow_for(&mut self, additional: usize) {
        let needed = self.position + additional;
        if needed > self.data.capacity() {
            let grow = (needed - self.data.len()).max(self.data.capacity() / 2);
            self.data.reserve_exact(grow);
        }
    }

    /// Copies `bytes` in at the cursor and advances, growing as needed.
    pub fn write_bytes(&mut self, bytes: &[u8]) -> Result<usize, ContainerError> {
        self.header.guard_mut("StreamBuffer.write")?;
        self.grow_for(bytes.len());
        let overlap = self.data.len().saturating_sub(self.position).min(bytes.len());
        self.data[self.position..self.position + overlap].copy_from_slice(&bytes[..overlap]);
        self.data.extend_from_slice(&bytes[overlap..]);
        self.position += bytes.len();
        self.header.touch();
        Ok(bytes.len())
    }

    /// Copies out up to `out.len()` bytes from the cursor and advances.
    /// Returns how many were read; zero at the end.
    pub fn read_bytes(&mut self, out: &mut [u8]) -> usize {
        let available = self.data.len().saturating_sub(self.position);
        let len = available.min(out.len());
        out[..len].copy_from_slice(&self.data[self.position..self.position + len]);
        self.position += len;
        len
    }

    /// The written bytes.
    pub fn data(&self) -> &[u8] {
        &self.data
    }
}

impl Default for StreamBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl Collection for StreamBuffer {
    fn len(&self) -> usize {
        self.data.len()
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
        self.header.guard_mut("StreamBuffer.clear")?;
        self.header.notify(Event::Clear, 0, self.data.len());
        self.data.clear();
        self.position = 0;
        self.header.touch();
        Ok(())
    }

    fn set_error_hook(&mut self, hook: Option<ErrorHook>) {
        self.header.set_hook(hook);
    }
}

impl Write for StreamBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.write_bytes(buf)
            .map_err(|e| io::Error::new(io::ErrorKind::PermissionDenied, e))
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Read for StreamBuffer {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        Ok(self.read_bytes(buf))
    }
}

/// Fixed-capacity ring of `T` with monotonic head and tail counters.
/// Writing into a full ring still succeeds, overwriting the oldest slot,
/// but reports the wrap to the caller.
pub struct CircularBuffer<T> {
    header: Header,
    slots: Vec<Option<T>>,
    head: usize,
    tail: usize,
}

impl<T: core::fmt::Debug> core::fmt::Debug for CircularBuffer<T> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("CircularBuffer")
            .field("slots", &self.slots)
            .field("head", &self.head)
            .field("tail", &self.tail)
            .finish()
    }
}

/// Outcome of [CircularBuffer::add].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum RingWrite {
    /// Stored in a free slot.
    Stored,
    /// The ring was full; the head restarted and the write overwrote.
    Wrapped,
}

impl<T> CircularBuffer<T> {
    /// A ring of exactly `capacity` slots; zero capacity is rejected.
    pub fn new(capacity: usize) -> Result<Self, ContainerError> {
        if capacity == 0 {
            return Err(ContainerError::BadArg);
        }
        let mut slots = Vec::with_capacity(capacity);
        slots.resize_with(capacity, || None);
        Ok(Self {
            header: Header::new(),
            slots,
            head: 0,
            tail: 0,
        })
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn is_full(&self) -> bool {
        self.head.saturating_sub(self.tail) == self.slots.len()
    }

    /// Places `value` at `head % capacity` and advances the head. A full
    /// ring resets the head to zero first and reports the wrap.
    pub fn add(&mut self, value: T) -> Result<RingWrite, ContainerError> {
        self.header.guard_mut("CircularBuffer.add")?;
        let wrapped = if self.is_full() {
            self.head = 0;
            RingWrite::Wrapped
        } else {
            RingWrite::Stored
        };
        let capacity = self.slots.len();
        self.slots[self.head % capacity] = Some(value);
        self.head += 1;
        self.header.touch();
        self.header.notify(Event::Add, self.head - 1, 1);
        Ok(wrapped)
    }

    /// Removes the element at the tail.
    pub fn pop_front(&mut self) -> Result<Option<T>, ContainerError> {
        self.header.guard_mut("CircularBuffer.pop_front")?;
        if self.head == self.tail {
            return Ok(None);
        }
        let capacity = self.slots.len();
        let value = self.slots[self.tail % capacity].take();
        self.tail += 1;
        if value.is_some() {
            self.header.touch();
            self.header.notify(Event::Pop, self.tail - 1, 1);
        }
        Ok(value)
    }

    /// Reads the tail element without advancing.
    pub fn peek_front(&self) -> Option<&T> {
        if self.head == self.tail {
            return None;
        }
        self.slots[self.tail % self.slots.len()].as_ref()
    }
}

impl<T> Collection for CircularBuffer<T> {
    fn len(&self) -> usize {
        self.head.saturating_sub(self.tail)
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
        self.header.guard_mut("CircularBuffer.clear")?;
        self.header.notify(Event::Clear, 0, self.len());
        for slot in self.slots.iter_mut() {
            *slot = None;
        }
        self.head = 0;
        self.tail = 0;
        self.header.touch();
        Ok(())
    }

    fn set_error_hook(&mut self, hook: Option<ErrorHook>) {
        self.header.set_hook(hook);
    }
}
