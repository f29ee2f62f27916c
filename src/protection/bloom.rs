//! Existence filter
//!
//! Fixed-size bloom filter over `AtomicU64` words. Insertions and lookups
//! never lock; a set bit is never cleared, so there are no false negatives.

use std::sync::atomic::{AtomicU64, Ordering};

/// Lock-free bloom filter keyed by string
pub struct BloomFilter {
    words: Vec<AtomicU64>,
    size: usize,
    hash_functions: u32,
}

impl BloomFilter {
    /// Create a filter of `size` bits using `hash_functions` seeds
    pub fn new(size: usize, hash_functions: u32) -> Self {
        let size = size.max(1);
        let words = (0..size.div_ceil(64)).map(|_| AtomicU64::new(0)).collect();
        Self {
            words,
            size,
            hash_functions: hash_functions.max(1),
        }
    }

    /// Number of bits
    pub fn size(&self) -> usize {
        self.size
    }

    /// Record a key
    pub fn insert(&self, key: &str) {
        for seed in 0..self.hash_functions {
            let bit = self.bit_index(key, seed);
            self.words[bit / 64].fetch_or(1u64 << (bit % 64), Ordering::Relaxed);
        }
    }

    /// False means the key was definitely never inserted
    pub fn might_contain(&self, key: &str) -> bool {
        (0..self.hash_functions).all(|seed| {
            let bit = self.bit_index(key, seed);
            self.words[bit / 64].load(Ordering::Relaxed) & (1u64 << (bit % 64)) != 0
        })
    }

    /// Number of set bits
    pub fn bits_set(&self) -> u64 {
        self.words
            .iter()
            .map(|w| w.load(Ordering::Relaxed).count_ones() as u64)
            .sum()
    }

    /// Polynomial string hash over UTF-16 units, seeded per function
    fn bit_index(&self, key: &str, seed: u32) -> usize {
        let mut hash = seed as i32;
        for unit in key.encode_utf16() {
            hash = hash.wrapping_mul(31).wrapping_add(unit as i32);
        }
        (hash & 0x7FFF_FFFF) as usize % self.size
    }
}

// =============================================================================
// Tests
// =============================================================================
