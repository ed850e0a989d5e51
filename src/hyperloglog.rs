// IPFS Kit Core - HyperLogLog
// Copyright 2026 Joseph Stone - All Rights Reserved
//
// Distinct-count estimator with 2^p one-byte registers.
// Small-range estimates (E <= 2.5m with empty registers) use linear counting.

use crate::error::SketchError;
use crate::hashing::hash_pair;
use serde::{Deserialize, Serialize};

pub const MIN_PRECISION: u8 = 4;
pub const MAX_PRECISION: u8 = 16;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HyperLogLog {
    precision: u8,
    registers: Vec<u8>,
}

impl HyperLogLog {
    pub fn new(precision: u8) -> Result<Self, SketchError> {
        if !(MIN_PRECISION..=MAX_PRECISION).contains(&precision) {
            return Err(SketchError::InvalidParameter(format!(
                "precision must be in {}..={}, got {}",
                MIN_PRECISION, MAX_PRECISION, precision
            )));
        }
        Ok(Self {
            precision,
            registers: vec![0; 1 << precision],
        })
    }

    /// Pick the smallest precision whose standard error 1.04/sqrt(m) is
    /// at or below `error_rate`, clamped to the supported range.
    pub fn with_error_rate(error_rate: f64) -> Result<Self, SketchError> {
        if !(error_rate > 0.0 && error_rate < 1.0) {
            return Err(SketchError::InvalidParameter(format!(
                "error_rate must be in (0, 1), got {}",
                error_rate
            )));
        }
        let p = (1.04 / error_rate).powi(2).log2().ceil();
        let p = p.clamp(MIN_PRECISION as f64, MAX_PRECISION as f64) as u8;
        Self::new(p)
    }

    pub fn precision(&self) -> u8 {
        self.precision
    }

    pub fn register_count(&self) -> usize {
        self.registers.len()
    }

    pub fn add(&mut self, item: impl AsRef<[u8]>) {
        let (hash, _) = hash_pair(item.as_ref());
        let p = self.precision as u32;
        let index = (hash >> (64 - p)) as usize;
        let rest = hash << p;
        let max_rank = (64 - p + 1) as u8;
        let rank = if rest == 0 {
            max_rank
        } else {
            (rest.leading_zeros() + 1).min(max_rank as u32) as u8
        };
        if rank > self.registers[index] {
            self.registers[index] = rank;
        }
    }

    fn alpha(m: f64) -> f64 {
        match m as usize {
            16 => 0.673,
            32 => 0.697,
            64 => 0.709,
            _ => 0.7213 / (1.0 + 1.079 / m),
        }
    }

    /// Cardinality estimate
    pub fn count(&self) -> u64 {
        let m = self.registers.len() as f64;
        let sum: f64 = self.registers.iter().map(|&r| 2f64.powi(-(r as i32))).sum();
        let raw = Self::alpha(m) * m * m / sum;

        if raw <= 2.5 * m {
            let zeros = self.registers.iter().filter(|&&r| r == 0).count();
            if zeros > 0 {
                return (m * (m / zeros as f64).ln()).round() as u64;
            }
        }
        raw.round() as u64
    }

    /// Register-wise max with a sketch of the same precision
    pub fn merge(&mut self, other: &HyperLogLog) -> Result<(), SketchError> {
        if self.precision != other.precision {
            return Err(SketchError::DimensionMismatch(format!(
                "hyperloglog precision {} vs {}",
                self.precision, other.precision
            )));
        }
        for (a, b) in self.registers.iter_mut().zip(&other.registers) {
            *a = (*a).max(*b);
        }
        Ok(())
    }

    pub fn is_empty(&self) -> bool {
        self.registers.iter().all(|&r| r == 0)
    }

    pub fn clear(&mut self) {
        self.registers.fill(0);
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn relative_error(estimate: u64, actual: u64) -> f64 {
        (estimate as f64 - actual as f64).abs() / actual as f64
    }

    #[test]
    fn precision_bounds() {
        assert!(HyperLogLog::new(3).is_err());
        assert!(HyperLogLog::new(17).is_err());
        assert_eq!(HyperLogLog::new(4).unwrap().register_count(), 16);
        assert_eq!(HyperLogLog::new(14).unwrap().register_count(), 16384);
    }

    #[test]
    fn error_rate_selects_precision() {
        assert_eq!(HyperLogLog::with_error_rate(0.01).unwrap().precision(), 14);
        assert_eq!(HyperLogLog::with_error_rate(0.5).unwrap().precision(), MIN_PRECISION);
        assert_eq!(HyperLogLog::with_error_rate(0.0001).unwrap().precision(), MAX_PRECISION);
        assert!(HyperLogLog::with_error_rate(0.0).is_err());
    }

    #[test]
    fn empty_counts_zero() {
        let hll = HyperLogLog::new(10).unwrap();
        assert!(hll.is_empty());
        assert_eq!(hll.count(), 0);
    }

    #[test]
    fn duplicates_do_not_inflate() {
        let mut hll = HyperLogLog::new(12).unwrap();
        for _ in 0..1000 {
            hll.add("same-cid");
        }
        assert_eq!(hll.count(), 1);
    }

    #[test]
    fn small_range_is_accurate() {
        let mut hll = HyperLogLog::new(14).unwrap();
        for i in 0..10_000 {
            hll.add(format!("cid-{}", i));
        }
        let est = hll.count();
        assert!(relative_error(est, 10_000) < 0.03, "estimate {}", est);
    }

    #[test]
    fn large_range_within_few_percent() {
        let mut hll = HyperLogLog::new(12).unwrap();
        for i in 0..100_000 {
            hll.add(format!("block-{}", i));
        }
        let est = hll.count();
        assert!(relative_error(est, 100_000) < 0.06, "estimate {}", est);
    }

    #[test]
    fn merge_estimates_union() {
        let mut a = HyperLogLog::new(12).unwrap();
        let mut b = HyperLogLog::new(12).unwrap();
        for i in 0..3000 {
            a.add(format!("k{}", i));
        }
        for i in 2000..5000 {
            b.add(format!("k{}", i));
        }
        a.merge(&b).unwrap();
        assert!(relative_error(a.count(), 5000) < 0.06, "estimate {}", a.count());

        let c = HyperLogLog::new(10).unwrap();
        assert!(a.merge(&c).is_err());
    }
}
