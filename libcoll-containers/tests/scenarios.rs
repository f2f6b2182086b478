// Copyright 2024-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Cross-engine properties: the freeze/thaw contract, cursor
//! invalidation, mask laws and the observer bus, exercised over several
//! container kinds at once.

use libcoll_containers::{
    BitString, Collection, ContainerError, Cursor, Dictionary, Event, EventSet, Flags, List, Mask,
    SList, SearchTree, Sequential, Vector,
};
use std::cell::RefCell;
use std::rc::Rc;

/// Setting READONLY freezes the timestamp and fails every mutation with
/// the same code, whatever the engine.
#[test]
fn readonly_contract_over_every_sequence() {
    fn check(seq: &mut dyn Sequential<i32>) {
        seq.add(1).unwrap();
        let frozen = seq.flags().with(Flags::READONLY);
        seq.set_flags(frozen);
        let stamp = seq.timestamp();
        assert_eq!(ContainerError::ReadOnly, seq.add(2).unwrap_err());
        assert_eq!(ContainerError::ReadOnly, seq.insert_at(0, 2).unwrap_err());
        assert_eq!(ContainerError::ReadOnly, seq.pop_front().unwrap_err());
        assert_eq!(ContainerError::ReadOnly, seq.clear().unwrap_err());
        assert_eq!(stamp, seq.timestamp());
        assert_eq!(1, seq.len());
    }
    check(&mut Vector::<i32>::new());
    check(&mut List::<i32>::new());
    check(&mut SList::<i32>::new());
}

/// Any mutation between a cursor's creation and its next call fails that
/// call with ObjectChanged.
#[test]
fn cursor_invalidation_over_every_engine() {
    let mut vector: Vector<i32> = (0..4).collect();
    let mut cursor = vector.cursor();
    cursor.first(&vector).unwrap();
    vector.replace_at(0, 9).unwrap();
    assert_eq!(
        ContainerError::ObjectChanged,
        cursor.next(&vector).unwrap_err()
    );

    let mut list: List<i32> = (0..4).collect();
    let mut cursor = list.cursor();
    cursor.first(&list).unwrap();
    list.erase_at(0).unwrap();
    assert_eq!(ContainerError::ObjectChanged, cursor.next(&list).unwrap_err());

    let mut dictionary: Dictionary<i32> = Dictionary::new();
    dictionary.add("a", 1).unwrap();
    let mut cursor = dictionary.cursor();
    cursor.first(&dictionary).unwrap();
    dictionary.erase("a").unwrap();
    assert_eq!(
        ContainerError::ObjectChanged,
        cursor.next(&dictionary).unwrap_err()
    );

    let mut bits = BitString::from_bools(&[true, false]);
    let mut cursor = bits.cursor();
    cursor.first(&bits).unwrap();
    bits.add(true).unwrap();
    assert_eq!(ContainerError::ObjectChanged, cursor.next(&bits).unwrap_err());
}

/// select_copy(all-ones) is identity, select(all-zeros) empties, and the
/// selected count is the mask's popcount, for both engines with masks.
#[test]
fn mask_laws() {
    let vector: Vector<i32> = (0..10).collect();
    let list: List<i32> = (0..10).collect();

    let ones = Mask::ones(10);
    assert!(vector.select_copy(&ones).unwrap().equal(&vector));
    assert!(list.select_copy(&ones).unwrap().equal(&list));

    let zeros = Mask::zeros(10);
    assert!(vector.select_copy(&zeros).unwrap().is_empty());
    let mut emptied = list.copy();
    emptied.select(&zeros).unwrap();
    assert!(emptied.is_empty());

    let pattern = Mask::from_bools(&[
        true, false, false, true, true, false, true, false, false, true,
    ]);
    assert_eq!(
        pattern.popcount(),
        vector.select_copy(&pattern).unwrap().len()
    );
    assert_eq!(pattern.popcount(), list.select_copy(&pattern).unwrap().len());
}

/// The dictionary's snapshots agree with each other and with the table.
#[test]
fn dictionary_snapshots_agree() {
    let mut dictionary: Dictionary<i64> = Dictionary::new();
    for i in 0..50i64 {
        dictionary.add(&format!("entry-{i:02}"), i).unwrap();
    }

    let keys = dictionary.get_keys();
    let values = dictionary.cast_to_array();
    assert_eq!(dictionary.len(), keys.len());
    assert_eq!(dictionary.len(), values.len());

    let mut total = 0;
    for key in keys.iter() {
        total += dictionary.get(key).copied().unwrap();
    }
    let mut from_values = 0;
    values.apply(|v| from_values += *v);
    assert_eq!(total, from_values);
    assert_eq!((0..50).sum::<i64>(), total);
}

/// A tree built from a vector's elements sees them all, in order.
#[test]
fn vector_to_tree_pipeline() {
    let mut vector: Vector<i64> = Vector::new();
    for value in [9, 3, 7, 1, 5, 3, 9] {
        vector.add(value).unwrap();
    }

    let mut tree: SearchTree<i64> = SearchTree::new();
    vector.apply(|v| {
        let _ = tree.add(*v);
    });

    // Duplicates collapse; order is sorted.
    assert_eq!(5, tree.len());
    let mut seen = Vec::new();
    tree.apply(|v| seen.push(*v));
    assert_eq!(vec![1, 3, 5, 7, 9], seen);
    assert!(tree.is_balanced());
}

/// Observer notifications fire only while HAS_OBSERVER is set and only
/// for subscribed events.
#[test]
fn observer_bus_lifecycle() {
    let mut vector: Vector<i32> = Vector::new();
    let log: Rc<RefCell<Vec<Event>>> = Rc::new(RefCell::new(Vec::new()));

    let sink = Rc::clone(&log);
    let id = vector.subscribe(EventSet::of(&[Event::Add, Event::EraseAt]), move |n| {
        sink.borrow_mut().push(n.event);
    });
    assert!(vector.flags().contains(Flags::HAS_OBSERVER));

    vector.add(1).unwrap();
    vector.add(2).unwrap();
    vector.erase_at(0).unwrap();
    vector.push_back(3).unwrap();
    assert_eq!(
        vec![Event::Add, Event::Add, Event::EraseAt],
        log.borrow().clone()
    );

    assert!(vector.unsubscribe(id));
    assert!(!vector.flags().contains(Flags::HAS_OBSERVER));
    vector.add(4).unwrap();
    assert_eq!(3, log.borrow().len());
}

/// Node storage can be routed through the checking allocator; a clean
/// run leaves no live allocations and no violations.
#[test]
fn debug_allocator_backs_node_storage() {
    use allocator_api2::alloc::Global;
    use libcoll_alloc::DebugAllocator;

    let checked = DebugAllocator::new_in(Global);
    {
        let mut list: List<u32, &DebugAllocator<Global>> = List::new_in(&checked);
        for i in 0..200 {
            list.add(i).unwrap();
        }
        assert_eq!(200, list.len());
        assert!(checked.live_allocations() > 0);
    }
    assert_eq!(0, checked.live_allocations());
    assert_eq!(0, checked.bad_free_count());
    assert_eq!(0, checked.overflow_count());
}

/// Equality is symmetric across deep copies and survives the facade.
#[test]
fn copy_equality_across_engines() {
    let vector: Vector<i32> = (0..20).collect();
    assert!(vector.copy().equal(&vector));

    let list: List<i32> = (0..20).collect();
    assert!(list.copy().equal(&list));

    let tree: SearchTree<i32> = (0..20).collect();
    assert!(tree.copy().equal(&tree));

    let bits = BitString::from_bools(&[true; 20]);
    assert!(bits.copy().equal(&bits));
}
