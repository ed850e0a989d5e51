// IPFS Kit Core - Library Root
// Copyright 2026 Joseph Stone - All Rights Reserved
//
// All modules exported here for use by the binary and tests.

pub mod paths;
pub mod config;
pub mod error;
pub mod session;
pub mod storage;
pub mod mcp;
pub mod service;

// ============================================================================
// STORAGE OPERATIONS - WAL, pooled connections, IPFS RPC
// ============================================================================

/// Write-ahead log: PENDING -> COMPLETED | FAILED
pub mod wal;

/// Bounded, TTL-evicting connection pool
pub mod pool;

/// IPFS /api/v0 HTTP client
pub mod ipfs;

/// WAL handlers for the ipfs backend
pub mod handlers;

// ============================================================================
// PROBABILISTIC SKETCHES
// ============================================================================

mod hashing;
pub use hashing::sha256_hex;

pub mod bloom;
pub mod hyperloglog;
pub mod count_min;

/// Bloom + HLL + CMS over CIDs seen by handlers
pub mod cid_index;
