// Copyright 2024-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Helpers that drive containers through the protocol traits alone, the
//! way upstream code that holds only a `&mut dyn Sequential<T>` does.

use crate::error::ContainerError;
use crate::{Collection, Flags, Sequential};

/// Moves everything out of each source into `dst`, in order.
pub fn gather<T>(
    dst: &mut dyn Sequential<T>,
    sources: &mut [&mut dyn Sequential<T>],
) -> Result<(), ContainerError> {
    for source in sources.iter_mut() {
        dst.append(&mut **source)?;
    }
    Ok(())
}

/// Total element count over any mix of containers.
pub fn total_len(collections: &[&dyn Collection]) -> usize {
    collections.iter().map(|c| c.len()).sum()
}

/// Marks a container read-only, returning the previous flags.
pub fn freeze(collection: &mut dyn Collection) -> Flags {
    let flags = collection.flags().with(Flags::READONLY);
    collection.set_flags(flags)
}

/// Lifts the read-only bit, returning the previous flags.
pub fn thaw(collection: &mut dyn Collection) -> Flags {
    let flags = collection.flags().without(Flags::READONLY);
    collection.set_flags(flags)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{List, SList, Vector};

    /// The point of the protocol: one routine, any engine.
    fn exercise(seq: &mut dyn Sequential<i32>) {
        seq.add(1).unwrap();
        seq.add(2).unwrap();
        seq.push_front(0).unwrap();
        seq.insert_at(2, 9).unwrap();
        assert_eq!(4, seq.len());
        assert_eq!(Some(&9), seq.get(2));
        assert_eq!(Some(2), seq.index_of(&9));
        seq.erase_value(&9).unwrap();
        seq.replace_at(0, 7).unwrap();
        assert_eq!(Some(7), seq.pop_front().unwrap());
        assert_eq!(Some(2), seq.pop_back().unwrap());
        assert_eq!(1, seq.len());
    }

    #[test]
    fn test_every_engine_through_the_protocol() {
        exercise(&mut Vector::<i32>::new());
        exercise(&mut List::<i32>::new());
        exercise(&mut SList::<i32>::new());
    }

    #[test]
    fn test_gather_across_kinds() {
        let mut vector: Vector<i32> = (0..3).collect();
        let mut list: List<i32> = (3..6).collect();
        let mut slist: SList<i32> = (6..9).collect();

        let mut all: Vector<i32> = Vector::new();
        gather(
            &mut all,
            &mut [&mut vector, &mut list, &mut slist],
        )
        .unwrap();
        assert_eq!((0..9).collect::<Vec<_>>(), all.iter().copied().collect::<Vec<_>>());
        assert!(vector.is_empty());
        assert!(list.is_empty());
        assert!(slist.is_empty());
    }

    #[test]
    fn test_total_len_and_freeze() {
        let mut vector: Vector<i32> = (0..4).collect();
        let list: List<i32> = (0..2).collect();
        assert_eq!(6, total_len(&[&vector, &list]));

        freeze(&mut vector);
        assert_eq!(
            ContainerError::ReadOnly,
            vector.add(1).unwrap_err()
        );
        thaw(&mut vector);
        vector.add(1).unwrap();
        assert_eq!(5, vector.len());
    }
}
