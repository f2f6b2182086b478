// Copyright 2024-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Per-container mutation events. Each container header owns its own bus;
//! there is no process-wide registry. Notifications only fire while the
//! container carries [Flags::HAS_OBSERVER](crate::Flags::HAS_OBSERVER),
//! which subscribing sets and the last unsubscribe clears.

/// The mutation kinds a subscriber can watch.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
#[non_exhaustive]
#[repr(u32)]
pub enum Event {
    Add,
    AddRange,
    Insert,
    InsertAt,
    InsertIn,
    EraseAt,
    Clear,
    Replace,
    ReplaceAt,
    Push,
    Pop,
    Copy,
    Append,
    Finalize,
}

impl Event {
    const fn bit(self) -> u32 {
        1 << self as u32
    }
}

/// A set of [Event]s, used as the subscription mask.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct EventSet(u32);

impl EventSet {
    pub const ALL: EventSet = EventSet(u32::MAX);

    pub const fn empty() -> Self {
        EventSet(0)
    }

    pub fn of(events: &[Event]) -> Self {
        let mut bits = 0;
        for event in events {
            bits |= event.bit();
        }
        EventSet(bits)
    }

    pub const fn contains(self, event: Event) -> bool {
        self.0 & event.bit() != 0
    }
}

/// What happened. `index` and `len` carry the per-event details: the index
/// for positional events (InsertAt, EraseAt, ReplaceAt, …), the element
/// count for bulk events (AddRange, InsertIn, Append), zero otherwise.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Notification {
    pub event: Event,
    pub index: usize,
    pub len: usize,
}

/// Subscription handle, returned by subscribe and redeemed by unsubscribe.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub struct ObserverId(u64);

pub(crate) type ObserverCallback = Box<dyn FnMut(&Notification)>;

/// The per-container subscriber list.
#[derive(Default)]
pub(crate) struct ObserverBus {
    next_id: u64,
    entries: Vec<Entry>,
}

struct Entry {
    id: ObserverId,
    events: EventSet,
    callback: ObserverCallback,
}

impl ObserverBus {
    pub(crate) fn subscribe(&mut self, events: EventSet, callback: ObserverCallback) -> ObserverId {
        let id = ObserverId(self.next_id);
        self.next_id += 1;
        self.entries.push(Entry {
            id,
            events,
            callback,
        });
        id
    }

    /// Returns whether the id was subscribed.
    pub(crate) fn unsubscribe(&mut self, id: ObserverId) -> bool {
        let before = self.entries.len();
        self.entries.retain(|entry| entry.id != id);
        self.entries.len() != before
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub(crate) fn notify(&mut self, notification: &Notification) {
        for entry in self.entries.iter_mut() {
            if entry.events.contains(notification.event) {
                (entry.callback)(notification);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use std::rc::Rc;

    #[test]
    fn test_event_set() {
        let set = EventSet::of(&[Event::Add, Event::Clear]);
        assert!(set.contains(Event::Add));
        assert!(set.contains(Event::Clear));
        assert!(!set.contains(Event::Pop));
        assert!(EventSet::ALL.contains(Event::Finalize));
    }

    #[test]
    fn test_bus_masks_and_unsubscribe() {
        let mut bus = ObserverBus::default();
        let seen = Rc::new(Cell::new(0usize));

        let sink = Rc::clone(&seen);
        let id = bus.subscribe(
            EventSet::of(&[Event::Add]),
            Box::new(move |_| sink.set(sink.get() + 1)),
        );

        let add = Notification {
            event: Event::Add,
            index: 0,
            len: 1,
        };
        let pop = Notification {
            event: Event::Pop,
            index: 0,
            len: 1,
        };
        bus.notify(&add);
        bus.notify(&pop);
        assert_eq!(1, seen.get());

        assert!(bus.unsubscribe(id));
        assert!(!bus.unsubscribe(id));
        bus.notify(&add);
        assert_eq!(1, seen.get());
        assert!(bus.is_empty());
    }
}
