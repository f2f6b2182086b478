// Copyright 2024-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

//! A uniform toolkit of in-memory collections behind one protocol:
//!
//! - [Vector]: dense growable sequence, with [Slice] views, [Mask]-driven
//!   selection and (for numeric elements) element-wise arithmetic.
//! - [List] / [SList]: doubly and singly linked sequences over index
//!   arenas, with splice, rotate and mask selection. Node slabs can live
//!   in a [PoolAllocator](libcoll_alloc::PoolAllocator).
//! - [Dictionary]: string key -> value, chained hash over a prime bucket
//!   table, copying both sides.
//! - [SearchTree]: AVL-balanced ordered set with hidden nodes and
//!   in-order apply.
//! - [BitString]: bit-indexed dense vector with shifts, set algebra and
//!   pattern search.
//! - [StreamBuffer] / [CircularBuffer]: linear byte stream and fixed ring.
//! - [BloomFilter]: probabilistic membership.
//!
//! Every container embeds the same header: flags ([Flags::READONLY]
//! freezes it, [Flags::HAS_OBSERVER] routes mutations through the
//! observer bus), a monotonically increasing timestamp that invalidates
//! [Cursor]s, and an optional [ErrorHook]. Elements are copied in; the
//! container owns its copy and drops it on erase. The [Collection],
//! [Sequential] and [Associative] traits are the generic facade: code
//! holding a `&mut dyn Sequential<T>` drives any sequence engine.
//!
//! Persistence uses a common envelope, a 16-byte per-kind GUID followed
//! by a ULE128-encoded header and the element payloads; a stream loaded
//! as the wrong container kind fails with
//! [WrongFile](ContainerError::WrongFile).

mod bitstring;
mod bloom;
mod buffers;
mod dictionary;
mod error;
pub mod facade;
mod flags;
mod list;
mod mask;
mod observer;
mod protocol;
mod searchtree;
mod slist;
pub mod storage;
mod valarray;
mod vector;

pub use bitstring::{BitCursor, BitString};
pub use bloom::BloomFilter;
pub use buffers::{CircularBuffer, RingWrite, StreamBuffer};
pub use dictionary::{times33_hash, Dictionary, DictionaryCursor, HashFn};
pub use error::{ContainerError, ErrorHook};
pub use flags::Flags;
pub use list::{List, ListCursor, ListIter};
pub use mask::Mask;
pub use observer::{Event, EventSet, Notification, ObserverId};
pub use protocol::{Associative, Collection, Cursor, Direction, Sequential};
pub use searchtree::{Added, SearchTree};
pub use slist::{SList, SListCursor};
pub use valarray::{Float, Numeric};
pub use vector::{CompareFn, Slice, Vector, VectorCursor};
