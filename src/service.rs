// IPFS Kit Core - Service Assembly
// Copyright 2026 Joseph Stone - All Rights Reserved
//
// Wires storage, pool, CID index and WAL together. Shared by the MCP
// server and the one-shot CLI commands.

use crate::cid_index::{CidIndex, CidIndexSummary};
use crate::config::KitConfig;
use crate::error::WalError;
use crate::handlers::{register_ipfs_handlers, IpfsPool, SharedIndex};
use crate::ipfs::IpfsConnector;
use crate::pool::{ConnectionPool, PoolStatus};
use crate::storage::KitStorage;
use crate::wal::{Backend, OperationType, Wal, WalOperation, WalStats};
use anyhow::{Context, Result};
use serde::Serialize;
use serde_json::{Map, Value};
use std::path::Path;
use std::sync::{Arc, Mutex};

pub struct KitService {
    pub config: KitConfig,
    pub storage: Arc<KitStorage>,
    pub wal: Wal,
    pub pool: Arc<IpfsPool>,
    pub index: SharedIndex,
}

#[derive(Debug, Clone, Serialize)]
pub struct KitStatus {
    pub version: String,
    pub api_url: String,
    pub pool: PoolStatus,
    pub wal: WalStats,
    pub cid_index: CidIndexSummary,
}

impl KitService {
    /// Open LMDB at `storage_path` and assemble the service
    pub fn open(config: KitConfig, storage_path: &Path) -> Result<Self> {
        let storage = KitStorage::open(storage_path)
            .with_context(|| format!("Failed to open storage at {:?}", storage_path))?;
        Self::from_storage(config, Arc::new(storage))
    }

    pub fn from_storage(config: KitConfig, storage: Arc<KitStorage>) -> Result<Self> {
        let pool = Arc::new(
            ConnectionPool::new(IpfsConnector, config.ipfs.clone(), config.pool.clone())
                .context("Invalid pool settings")?,
        );

        let index = match storage.load_cid_index()? {
            Some(index) => index,
            None => CidIndex::new(&config.sketches).context("Invalid sketch settings")?,
        };
        let index: SharedIndex = Arc::new(Mutex::new(index));

        let mut wal = Wal::new(storage.clone());
        register_ipfs_handlers(&mut wal, pool.clone(), index.clone());

        Ok(Self { config, storage, wal, pool, index })
    }

    /// Queue an operation and, when `execute` is set, run it immediately.
    /// Returns the record in its current state.
    pub fn submit(
        &self,
        operation_type: OperationType,
        backend: Backend,
        parameters: Map<String, Value>,
        execute: bool,
    ) -> Result<WalOperation, WalError> {
        let id = self.wal.add_operation(operation_type, backend, parameters)?;
        if !execute {
            return self.wal.get_operation(&id);
        }
        match self.wal.execute_operation(&id) {
            Ok(op) => Ok(op),
            Err(WalError::NoHandler { .. }) => self.wal.get_operation(&id),
            Err(e) => Err(e),
        }
    }

    /// Replay pending operations left over from a previous run
    pub fn replay(&self) -> Result<crate::wal::ProcessSummary, WalError> {
        self.wal.process_pending()
    }

    pub fn save_index(&self) -> Result<()> {
        let index = self.index.lock().unwrap_or_else(|p| p.into_inner());
        self.storage.save_cid_index(&index)
    }

    pub fn cid_summary(&self) -> CidIndexSummary {
        self.index.lock().unwrap_or_else(|p| p.into_inner()).summary()
    }

    pub fn status(&self) -> Result<KitStatus> {
        Ok(KitStatus {
            version: env!("CARGO_PKG_VERSION").to_string(),
            api_url: self.config.ipfs.api_url.clone(),
            pool: self.pool.status(),
            wal: self.wal.stats()?,
            cid_index: self.cid_summary(),
        })
    }
}
