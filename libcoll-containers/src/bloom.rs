// Copyright 2024-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use crate::error::ContainerError;

/// Probabilistic membership filter. Sized from the intended element count
/// and the target false-positive probability:
///
/// ```reference
/// m = -n * ln(p) / (ln 2)^2        bits
/// k = (m / n) * ln 2               hash functions
/// ```
///
/// Lookups can report a false positive with probability about `p`; they
/// never report a false negative.
pub struct BloomFilter {
    bits: Vec<u8>,
    /// Number of bits, the modulus for every probe.
    m: u64,
    /// Number of probes per element.
    k: u32,
    inserted: usize,
}

impl BloomFilter {
    /// A filter intended for `capacity` elements at false-positive
    /// probability `probability`.
    pub fn new(capacity: usize, probability: f64) -> Result<Self, ContainerError> {
        if capacity == 0 || !(probability > 0.0 && probability < 1.0) {
            return Err(ContainerError::BadArg);
        }
        let ln2 = core::f64::consts::LN_2;
        let m = (-(capacity as f64) * probability.ln() / (ln2 * ln2)).ceil();
        let k = ((m / capacity as f64) * ln2).round().max(1.0);
        let m = m as u64;
        Ok(Self {
            bits: vec![0; (m as usize).div_ceil(8)],
            m,
            k: k as u32,
            inserted: 0,
        })
    }

    pub fn bit_size(&self) -> u64 {
        self.m
    }

    pub fn hash_count(&self) -> u32 {
        self.k
    }

    pub fn inserted(&self) -> usize {
        self.inserted
    }

    /// The two independent hashes double-hashing combines into k probes.
    fn hash_pair(key: &[u8]) -> (u64, u64) {
        let h1 = key
            .iter()
            .fold(5381u64, |h, &b| h.wrapping_mul(33).wrapping_add(u64::from(b)));
        let h2 = key
            .iter()
            .fold(0u64, |h, &b| {
                h.wrapping_mul(65599).wrapping_add(u64::from(b))
            });
        // An even h2 would cycle through half the probes; force it odd.
        (h1, h2 | 1)
    }

    fn probes(&self, key: &[u8]) -> impl Iterator<Item = u64> + '_ {
        let (h1, h2) = Self::hash_pair(key);
        (0..u64::from(self.k)).map(move |i| h1.wrapping_add(i.wrapping_mul(h2)) % self.m)
    }

    /// Sets the k probe bits for `key`.
    pub fn add(&mut self, key: &[u8]) {
        let m = self.m;
        let (h1, h2) = Self::hash_pair(key);
        for i in 0..u64::from(self.k) {
            let bit = h1.wrapping_add(i.wrapping_mul(h2)) % m;
            self.bits[(bit / 8) as usize] |= 1 << (bit % 8);
        }
        self.inserted += 1;
    }

    /// True iff all k probe bits are set. Added keys always report true.
    pub fn find(&self, key: &[u8]) -> bool {
        self.probes(key)
            .all(|bit| self.bits[(bit / 8) as usize] & (1 << (bit % 8)) != 0)
    }

    pub fn clear(&mut self) {
        self.bits.fill(0);
        self.inserted = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sizing_formulas() {
        let filter = BloomFilter::new(10, 1e-5).unwrap();
        // m = -10 ln(1e-5) / ln(2)^2 ~ 239.6, k = (m/10) ln 2 ~ 17.
        assert_eq!(240, filter.bit_size());
        assert_eq!(17, filter.hash_count());
    }

    #[test]
    fn test_no_false_negatives() {
        let mut filter = BloomFilter::new(10, 1e-5).unwrap();
        let keys: [u32; 5] = [4734, 9457, 458223, 40774, 9334422];
        for key in keys {
            filter.add(&key.to_le_bytes());
        }
        assert_eq!(5, filter.inserted());
        for key in keys {
            assert!(filter.find(&key.to_le_bytes()));
        }
        // Not inserted; with these parameters a hit is overwhelmingly
        // unlikely.
        assert!(!filter.find(&9u32.to_le_bytes()));
    }

    #[test]
    fn test_dense_fill_keeps_promise() {
        let mut filter = BloomFilter::new(1000, 0.01).unwrap();
        for i in 0..1000u32 {
            filter.add(&i.to_le_bytes());
        }
        for i in 0..1000u32 {
            assert!(filter.find(&i.to_le_bytes()));
        }
        // A loose false-positive budget check over a disjoint key set.
        let mut false_positives = 0;
        for i in 1_000_000..1_010_000u32 {
            if filter.find(&i.to_le_bytes()) {
                false_positives += 1;
            }
        }
        assert!(false_positives < 500, "saw {false_positives}");
    }

    #[test]
    fn test_bad_parameters() {
        assert!(BloomFilter::new(0, 0.01).is_err());
        assert!(BloomFilter::new(10, 0.0).is_err());
        assert!(BloomFilter::new(10, 1.0).is_err());
    }

    #[test]
    fn test_clear() {
        let mut filter = BloomFilter::new(10, 0.01).unwrap();
        filter.add(b"key");
        assert!(filter.find(b"key"));
        filter.clear();
        assert!(!filter.find(b"key"));
        assert_eq!(0, filter.inserted());
    }
}
