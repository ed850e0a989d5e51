// IPFS Kit Core - Count-Min Sketch
// Copyright 2026 Joseph Stone - All Rights Reserved
//
// Frequency estimation with bounded overcount. Never undercounts.
// Width w = ceil(e / epsilon), depth d = ceil(ln(1 / delta)).
// Error: estimate(x) <= count(x) + epsilon * N with probability 1 - delta.

use crate::error::SketchError;
use crate::hashing::seeded_hash;
use serde::{Deserialize, Serialize};
use std::f64::consts::E;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CountMinSketch {
    width: usize,
    depth: usize,
    /// One independent seed per row
    seeds: Vec<u64>,
    /// Row-major: counters[row * width + col]
    counters: Vec<u64>,
    total: u64,
}

impl CountMinSketch {
    pub fn new(width: usize, depth: usize, seed: u64) -> Result<Self, SketchError> {
        if width == 0 || depth == 0 {
            return Err(SketchError::InvalidParameter(format!(
                "width and depth must be > 0, got {}x{}",
                width, depth
            )));
        }
        let seeds = (0..depth as u64)
            .map(|row| seeded_hash(&row.to_le_bytes(), seed))
            .collect();
        Ok(Self {
            width,
            depth,
            seeds,
            counters: vec![0; width * depth],
            total: 0,
        })
    }

    /// Size from an error bound and failure probability
    pub fn with_error(epsilon: f64, delta: f64, seed: u64) -> Result<Self, SketchError> {
        if !(epsilon > 0.0 && epsilon < 1.0) || !(delta > 0.0 && delta < 1.0) {
            return Err(SketchError::InvalidParameter(format!(
                "epsilon and delta must be in (0, 1), got {} and {}",
                epsilon, delta
            )));
        }
        let width = (E / epsilon).ceil() as usize;
        let depth = (1.0 / delta).ln().ceil().max(1.0) as usize;
        Self::new(width, depth, seed)
    }

    fn column(&self, row: usize, item: &[u8]) -> usize {
        (seeded_hash(item, self.seeds[row]) % self.width as u64) as usize
    }

    pub fn add(&mut self, item: impl AsRef<[u8]>, count: u64) {
        let item = item.as_ref();
        for row in 0..self.depth {
            let idx = row * self.width + self.column(row, item);
            self.counters[idx] = self.counters[idx].saturating_add(count);
        }
        self.total = self.total.saturating_add(count);
    }

    pub fn increment(&mut self, item: impl AsRef<[u8]>) {
        self.add(item, 1);
    }

    /// Minimum counter across rows: an upper bound on the true count
    pub fn estimate(&self, item: impl AsRef<[u8]>) -> u64 {
        let item = item.as_ref();
        (0..self.depth)
            .map(|row| self.counters[row * self.width + self.column(row, item)])
            .min()
            .unwrap_or(0)
    }

    /// Counter-wise sum with a sketch of identical shape and seeds
    pub fn merge(&mut self, other: &CountMinSketch) -> Result<(), SketchError> {
        if self.width != other.width || self.depth != other.depth {
            return Err(SketchError::DimensionMismatch(format!(
                "count-min {}x{} vs {}x{}",
                self.width, self.depth, other.width, other.depth
            )));
        }
        if self.seeds != other.seeds {
            return Err(SketchError::DimensionMismatch(
                "count-min sketches use different hash seeds".to_string(),
            ));
        }
        for (a, b) in self.counters.iter_mut().zip(&other.counters) {
            *a = a.saturating_add(*b);
        }
        self.total = self.total.saturating_add(other.total);
        Ok(())
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn depth(&self) -> usize {
        self.depth
    }

    /// Sum of all increments
    pub fn total(&self) -> u64 {
        self.total
    }

    pub fn clear(&mut self) {
        self.counters.fill(0);
        self.total = 0;
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn sizing_from_error_bounds() {
        let cms = CountMinSketch::with_error(0.001, 0.01, 0).unwrap();
        assert_eq!(cms.width(), 2719);
        assert_eq!(cms.depth(), 5);
        assert!(CountMinSketch::with_error(0.0, 0.01, 0).is_err());
        assert!(CountMinSketch::new(0, 4, 0).is_err());
    }

    #[test]
    fn never_underestimates() {
        let mut cms = CountMinSketch::new(64, 4, 42).unwrap();
        let mut truth: HashMap<String, u64> = HashMap::new();
        for i in 0..2000u64 {
            let key = format!("cid-{}", i % 300);
            let n = i % 5 + 1;
            cms.add(&key, n);
            *truth.entry(key).or_default() += n;
        }
        for (key, actual) in &truth {
            assert!(cms.estimate(key) >= *actual, "{} underestimated", key);
        }
        assert_eq!(cms.total(), truth.values().sum::<u64>());
    }

    #[test]
    fn exact_when_sparse() {
        let mut cms = CountMinSketch::with_error(0.001, 0.001, 7).unwrap();
        cms.add("hot", 10);
        cms.increment("warm");
        assert_eq!(cms.estimate("hot"), 10);
        assert_eq!(cms.estimate("warm"), 1);
        assert_eq!(cms.estimate("cold"), 0);
    }

    #[test]
    fn merge_sums_counters_exactly() {
        let mut a = CountMinSketch::new(128, 3, 9).unwrap();
        let mut b = CountMinSketch::new(128, 3, 9).unwrap();
        for i in 0..500 {
            a.add(format!("a{}", i % 40), 2);
            b.add(format!("b{}", i % 25), 3);
        }
        let expected: Vec<u64> = a.counters.iter().zip(&b.counters).map(|(x, y)| x + y).collect();
        let total = a.total() + b.total();

        a.merge(&b).unwrap();
        assert_eq!(a.counters, expected);
        assert_eq!(a.total(), total);
    }

    #[test]
    fn merge_rejects_mismatch() {
        let mut a = CountMinSketch::new(128, 3, 1).unwrap();
        let b = CountMinSketch::new(64, 3, 1).unwrap();
        let c = CountMinSketch::new(128, 3, 2).unwrap();
        assert!(matches!(a.merge(&b), Err(SketchError::DimensionMismatch(_))));
        assert!(matches!(a.merge(&c), Err(SketchError::DimensionMismatch(_))));
    }
}
