// IPFS Kit Core - CID Index
// Copyright 2026 Joseph Stone - All Rights Reserved
//
// Cache-layer view over the three sketches: membership (Bloom),
// distinct CIDs (HyperLogLog) and access frequency (Count-Min).
// Persisted as one JSON blob in the storage LMDB.

use crate::bloom::BloomFilter;
use crate::config::SketchSettings;
use crate::count_min::CountMinSketch;
use crate::error::SketchError;
use crate::hyperloglog::HyperLogLog;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CidIndex {
    membership: BloomFilter,
    distinct: HyperLogLog,
    frequency: CountMinSketch,
}

/// Snapshot returned by the cid_stats tool and the status command
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CidIndexSummary {
    pub records: u64,
    pub distinct_estimate: u64,
    pub bloom_bits: usize,
    pub bloom_hashes: u32,
    pub bloom_fill_ratio: f64,
    pub bloom_false_positive_rate: f64,
    pub hll_precision: u8,
    pub cms_width: usize,
    pub cms_depth: usize,
}

impl CidIndex {
    pub fn new(settings: &SketchSettings) -> Result<Self, SketchError> {
        Ok(Self {
            membership: BloomFilter::new(settings.bloom_capacity, settings.bloom_error_rate)?,
            distinct: HyperLogLog::new(settings.hll_precision)?,
            frequency: CountMinSketch::new(settings.cms_width, settings.cms_depth, settings.cms_seed)?,
        })
    }

    /// Record one access of `cid`
    pub fn record(&mut self, cid: &str) {
        self.membership.add(cid);
        self.distinct.add(cid);
        self.frequency.increment(cid);
    }

    /// False means the CID has never been recorded
    pub fn maybe_seen(&self, cid: &str) -> bool {
        self.membership.contains(cid)
    }

    pub fn frequency(&self, cid: &str) -> u64 {
        self.frequency.estimate(cid)
    }

    pub fn distinct_estimate(&self) -> u64 {
        self.distinct.count()
    }

    pub fn summary(&self) -> CidIndexSummary {
        CidIndexSummary {
            records: self.frequency.total(),
            distinct_estimate: self.distinct.count(),
            bloom_bits: self.membership.num_bits(),
            bloom_hashes: self.membership.num_hashes(),
            bloom_fill_ratio: self.membership.fill_ratio(),
            bloom_false_positive_rate: self.membership.estimated_false_positive_rate(),
            hll_precision: self.distinct.precision(),
            cms_width: self.frequency.width(),
            cms_depth: self.frequency.depth(),
        }
    }

    /// Fold another index with identical dimensions into this one
    pub fn merge(&mut self, other: &CidIndex) -> Result<(), SketchError> {
        self.membership.union(&other.membership)?;
        self.distinct.merge(&other.distinct)?;
        self.frequency.merge(&other.frequency)
    }
}
