// IPFS Kit Core - Bloom Filter
// Copyright 2026 Joseph Stone - All Rights Reserved
//
// Fixed-size membership filter. Sized from capacity n and target false
// positive rate p:
//   m = ceil(-n * ln(p) / ln(2)^2)     bits
//   k = round((m / n) * ln(2))         hash functions
// Indexes come from double hashing: (h1 + i*h2) mod m.

use crate::error::SketchError;
use crate::hashing::hash_pair;
use serde::{Deserialize, Serialize};
use std::f64::consts::LN_2;

/// Bloom filter over arbitrary byte items
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BloomFilter {
    capacity: usize,
    error_rate: f64,
    num_bits: usize,
    num_hashes: u32,
    bits: Vec<u64>,
    /// Number of add() calls, not distinct items
    inserted: u64,
}

impl BloomFilter {
    pub fn new(capacity: usize, error_rate: f64) -> Result<Self, SketchError> {
        if capacity == 0 {
            return Err(SketchError::InvalidParameter("capacity must be > 0".to_string()));
        }
        if !(error_rate > 0.0 && error_rate < 1.0) {
            return Err(SketchError::InvalidParameter(format!(
                "error_rate must be in (0, 1), got {}",
                error_rate
            )));
        }

        let n = capacity as f64;
        let num_bits = ((-n * error_rate.ln()) / (LN_2 * LN_2)).ceil().max(1.0) as usize;
        let num_hashes = ((num_bits as f64 / n) * LN_2).round().max(1.0) as u32;

        Ok(Self {
            capacity,
            error_rate,
            num_bits,
            num_hashes,
            bits: vec![0; num_bits.div_ceil(64)],
            inserted: 0,
        })
    }

    fn indexes(&self, item: &[u8]) -> impl Iterator<Item = usize> + '_ {
        let (h1, h2) = hash_pair(item);
        let m = self.num_bits as u64;
        (0..self.num_hashes as u64).map(move |i| (h1.wrapping_add(i.wrapping_mul(h2)) % m) as usize)
    }

    /// Add an item. Returns true if at least one bit flipped (item was
    /// definitely not present before).
    pub fn add(&mut self, item: impl AsRef<[u8]>) -> bool {
        let idx: Vec<usize> = self.indexes(item.as_ref()).collect();
        let mut flipped = false;
        for i in idx {
            let (word, mask) = (i / 64, 1u64 << (i % 64));
            if self.bits[word] & mask == 0 {
                self.bits[word] |= mask;
                flipped = true;
            }
        }
        self.inserted += 1;
        flipped
    }

    /// Membership test. False means definitely absent.
    pub fn contains(&self, item: impl AsRef<[u8]>) -> bool {
        self.indexes(item.as_ref())
            .all(|i| self.bits[i / 64] & (1u64 << (i % 64)) != 0)
    }

    /// Bitwise OR of another filter with identical dimensions
    pub fn union(&mut self, other: &BloomFilter) -> Result<(), SketchError> {
        if self.num_bits != other.num_bits || self.num_hashes != other.num_hashes {
            return Err(SketchError::DimensionMismatch(format!(
                "bloom {}x{} vs {}x{}",
                self.num_bits, self.num_hashes, other.num_bits, other.num_hashes
            )));
        }
        for (a, b) in self.bits.iter_mut().zip(&other.bits) {
            *a |= *b;
        }
        self.inserted += other.inserted;
        Ok(())
    }

    pub fn num_bits(&self) -> usize {
        self.num_bits
    }

    pub fn num_hashes(&self) -> u32 {
        self.num_hashes
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> u64 {
        self.inserted
    }

    pub fn is_empty(&self) -> bool {
        self.inserted == 0
    }

    fn set_bits(&self) -> u64 {
        self.bits.iter().map(|w| w.count_ones() as u64).sum()
    }

    /// Fraction of bits set
    pub fn fill_ratio(&self) -> f64 {
        self.set_bits() as f64 / self.num_bits as f64
    }

    /// Current false positive probability given the fill ratio
    pub fn estimated_false_positive_rate(&self) -> f64 {
        self.fill_ratio().powi(self.num_hashes as i32)
    }

    /// Distinct item estimate from the set-bit count (Swamidass & Baldi)
    pub fn estimated_count(&self) -> f64 {
        let m = self.num_bits as f64;
        let x = self.set_bits() as f64;
        if x >= m {
            return self.capacity as f64;
        }
        -(m / self.num_hashes as f64) * (1.0 - x / m).ln()
    }

    pub fn clear(&mut self) {
        self.bits.fill(0);
        self.inserted = 0;
    }
}

// ============================================================================
// TESTS
// ============================================================================
