// IPFS Kit Core - LMDB Storage
// Copyright 2026 Joseph Stone - All Rights Reserved
//
// Persists kit state to LMDB at <kit home>/state/KIT.DB.
// Databases: operations (WAL records), sketches (CID index), meta (session).
// Values are JSON strings.

use crate::cid_index::CidIndex;
use crate::session::Session;
use crate::wal::WalOperation;
use anyhow::Result;
use heed::types::*;
use heed::{Database, Env, EnvOpenOptions};
use std::path::Path;

const SESSION_KEY: &str = "current_session";
const CID_INDEX_KEY: &str = "cid_index";
const MAX_DB_SIZE: usize = 256 * 1024 * 1024; // 256MB

/// Result of an atomic read-modify-write on one operation record
#[derive(Debug)]
pub enum UpdateOutcome {
    /// No record with that id
    Missing,
    /// Closure declined the change; record as currently stored
    Unchanged(WalOperation),
    /// Record written
    Updated(WalOperation),
}

/// LMDB storage for WAL records, sketches and session state
pub struct KitStorage {
    env: Env,
    /// operation_id → WalOperation JSON
    operations: Database<Str, Str>,
    /// sketch name → JSON
    sketches: Database<Str, Str>,
    /// misc key → JSON
    meta: Database<Str, Str>,
}

impl KitStorage {
    /// Open or create LMDB at the given path
    pub fn open(path: &Path) -> Result<Self> {
        std::fs::create_dir_all(path)?;

        let env = unsafe {
            EnvOpenOptions::new()
                .map_size(MAX_DB_SIZE)
                .max_dbs(4)
                .open(path)?
        };

        let mut wtxn = env.write_txn()?;
        let operations = env.create_database(&mut wtxn, Some("operations"))?;
        let sketches = env.create_database(&mut wtxn, Some("sketches"))?;
        let meta = env.create_database(&mut wtxn, Some("meta"))?;
        wtxn.commit()?;

        log::info!("KIT LMDB opened at {:?}", path);
        Ok(Self { env, operations, sketches, meta })
    }

    // ========================================================================
    // WAL OPERATIONS
    // ========================================================================

    /// Insert or overwrite an operation record
    pub fn put_operation(&self, op: &WalOperation) -> Result<()> {
        let json = serde_json::to_string(op)?;
        let mut wtxn = self.env.write_txn()?;
        self.operations.put(&mut wtxn, &op.operation_id, &json)?;
        wtxn.commit()?;
        Ok(())
    }

    pub fn get_operation(&self, id: &str) -> Result<Option<WalOperation>> {
        let rtxn = self.env.read_txn()?;
        match self.operations.get(&rtxn, id)? {
            Some(json) => Ok(Some(serde_json::from_str(json)?)),
            None => Ok(None),
        }
    }

    /// Read-modify-write inside one write transaction.
    /// `apply` returns false to leave the record untouched.
    pub fn update_operation<F>(&self, id: &str, apply: F) -> Result<UpdateOutcome>
    where
        F: FnOnce(&mut WalOperation) -> bool,
    {
        let mut wtxn = self.env.write_txn()?;
        let existing = self.operations.get(&wtxn, id)?.map(|s| s.to_string());
        let mut op: WalOperation = match existing {
            Some(json) => serde_json::from_str(&json)?,
            None => return Ok(UpdateOutcome::Missing),
        };

        if !apply(&mut op) {
            wtxn.abort();
            return Ok(UpdateOutcome::Unchanged(op));
        }

        let json = serde_json::to_string(&op)?;
        self.operations.put(&mut wtxn, id, &json)?;
        wtxn.commit()?;
        Ok(UpdateOutcome::Updated(op))
    }

    /// All operation records, oldest first
    pub fn list_operations(&self) -> Result<Vec<WalOperation>> {
        let rtxn = self.env.read_txn()?;
        let mut ops = Vec::new();
        for result in self.operations.iter(&rtxn)? {
            let (_, json) = result?;
            ops.push(serde_json::from_str::<WalOperation>(json)?);
        }
        ops.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(ops)
    }

    pub fn delete_operation(&self, id: &str) -> Result<bool> {
        let mut wtxn = self.env.write_txn()?;
        let deleted = self.operations.delete(&mut wtxn, id)?;
        wtxn.commit()?;
        Ok(deleted)
    }

    pub fn operation_count(&self) -> Result<u64> {
        let rtxn = self.env.read_txn()?;
        Ok(self.operations.stat(&rtxn)?.entries as u64)
    }

    // ========================================================================
    // SKETCHES
    // ========================================================================

    pub fn save_cid_index(&self, index: &CidIndex) -> Result<()> {
        let json = serde_json::to_string(index)?;
        let mut wtxn = self.env.write_txn()?;
        self.sketches.put(&mut wtxn, CID_INDEX_KEY, &json)?;
        wtxn.commit()?;
        Ok(())
    }

    pub fn load_cid_index(&self) -> Result<Option<CidIndex>> {
        let rtxn = self.env.read_txn()?;
        match self.sketches.get(&rtxn, CID_INDEX_KEY)? {
            Some(json) => Ok(Some(serde_json::from_str(json)?)),
            None => Ok(None),
        }
    }

    // ========================================================================
    // SESSION
    // ========================================================================

    pub fn save_session(&self, session: &Session) -> Result<()> {
        let json = serde_json::to_string(session)?;
        let mut wtxn = self.env.write_txn()?;
        self.meta.put(&mut wtxn, SESSION_KEY, &json)?;
        wtxn.commit()?;
        Ok(())
    }

    pub fn load_session(&self) -> Result<Option<Session>> {
        let rtxn = self.env.read_txn()?;
        match self.meta.get(&rtxn, SESSION_KEY)? {
            Some(json) => Ok(Some(serde_json::from_str(json)?)),
            None => Ok(None),
        }
    }

    /// Entry counts: (operations, sketches, meta)
    pub fn stats(&self) -> Result<(u64, u64, u64)> {
        let rtxn = self.env.read_txn()?;
        Ok((
            self.operations.stat(&rtxn)?.entries as u64,
            self.sketches.stat(&rtxn)?.entries as u64,
            self.meta.stat(&rtxn)?.entries as u64,
        ))
    }
}

// ============================================================================
// TESTS
// ============================================================================
