// Copyright 2024-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use crate::ContainerError;

/// A fixed-length selector: one byte per slot, zero meaning mask-out and
/// one meaning mask-in. Masks drive the `select`/`select_copy` operations
/// on sequential containers and are what element-wise comparisons produce.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Mask {
    data: Box<[u8]>,
}

impl Mask {
    /// All-zeros mask of the given length.
    pub fn zeros(len: usize) -> Self {
        Self {
            data: vec![0; len].into_boxed_slice(),
        }
    }

    /// All-ones mask of the given length.
    pub fn ones(len: usize) -> Self {
        Self {
            data: vec![1; len].into_boxed_slice(),
        }
    }

    pub fn from_bools(bits: &[bool]) -> Self {
        Self {
            data: bits.iter().map(|&b| u8::from(b)).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Whether slot `index` is selected. Out-of-range slots are not.
    pub fn get(&self, index: usize) -> bool {
        self.data.get(index).is_some_and(|&b| b != 0)
    }

    pub fn set(&mut self, index: usize, selected: bool) -> Result<(), ContainerError> {
        match self.data.get_mut(index) {
            Some(slot) => {
                *slot = u8::from(selected);
                Ok(())
            }
            None => Err(ContainerError::Index),
        }
    }

    pub fn clear(&mut self) {
        self.data.fill(0);
    }

    /// Number of selected slots.
    pub fn popcount(&self) -> usize {
        self.data.iter().filter(|&&b| b != 0).count()
    }

    fn check_compatible(&self, other: &Mask) -> Result<(), ContainerError> {
        if self.len() == other.len() {
            Ok(())
        } else {
            Err(ContainerError::Incompatible)
        }
    }

    pub fn and(&self, other: &Mask) -> Result<Mask, ContainerError> {
        self.check_compatible(other)?;
        let data = self
            .data
            .iter()
            .zip(other.data.iter())
            .map(|(&a, &b)| u8::from(a != 0 && b != 0))
            .collect();
        Ok(Mask { data })
    }

    pub fn or(&self, other: &Mask) -> Result<Mask, ContainerError> {
        self.check_compatible(other)?;
        let data = self
            .data
            .iter()
            .zip(other.data.iter())
            .map(|(&a, &b)| u8::from(a != 0 || b != 0))
            .collect();
        Ok(Mask { data })
    }

    #[must_use]
    pub fn not(&self) -> Mask {
        let data = self.data.iter().map(|&a| u8::from(a == 0)).collect();
        Mask { data }
    }

    pub(crate) fn slots(&self) -> impl Iterator<Item = bool> + '_ {
        self.data.iter().map(|&b| b != 0)
    }
}
