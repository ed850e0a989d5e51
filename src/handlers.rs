// IPFS Kit Core - IPFS Operation Handlers
// Copyright 2026 Joseph Stone - All Rights Reserved
//
// WAL handlers for the ipfs backend. Each one leases a pooled client,
// performs one RPC, and records the CIDs it touched in the shared index.
//
// Parameters:
//   add:   content | path, optional filename, optional pin (default true)
//   get:   cid, optional output_path
//   pin:   cid
//   unpin: cid

use crate::cid_index::CidIndex;
use crate::error::HandlerError;
use crate::hashing::sha256_hex;
use crate::ipfs::{looks_like_cid, IpfsClient, IpfsConnector};
use crate::pool::{ConnectionPool, PooledConnection};
use crate::wal::{Backend, OperationHandler, OperationType, Wal};
use serde_json::{json, Map, Value};
use std::fs::File;
use std::path::Path;
use std::sync::{Arc, Mutex};

pub type IpfsPool = ConnectionPool<IpfsConnector>;
pub type SharedIndex = Arc<Mutex<CidIndex>>;

/// `get` without output_path reads at most this many bytes
const MAX_INLINE_BYTES: usize = 1024 * 1024;

fn live_client(conn: &PooledConnection<IpfsClient>) -> Result<&IpfsClient, HandlerError> {
    conn.client().ok_or_else(|| {
        HandlerError::BackendUnavailable("ipfs connection is degraded (client failed to initialize)".to_string())
    })
}

fn str_param<'a>(params: &'a Map<String, Value>, key: &str) -> Option<&'a str> {
    params.get(key).and_then(|v| v.as_str()).filter(|s| !s.is_empty())
}

fn cid_param(params: &Map<String, Value>) -> Result<String, HandlerError> {
    let cid = str_param(params, "cid").ok_or_else(|| HandlerError::InvalidParameters("missing 'cid'".to_string()))?;
    if !looks_like_cid(cid) {
        return Err(HandlerError::InvalidParameters(format!("not a CID: {}", cid)));
    }
    Ok(cid.to_string())
}

fn record(index: &SharedIndex, cid: &str) {
    let mut idx = index.lock().unwrap_or_else(|p| p.into_inner());
    idx.record(cid);
}

/// Resolve add payload: inline content wins over a file path
fn add_payload(params: &Map<String, Value>) -> Result<(String, Vec<u8>), HandlerError> {
    if let Some(content) = params.get("content").and_then(|v| v.as_str()) {
        let name = str_param(params, "filename").unwrap_or("content.txt");
        return Ok((name.to_string(), content.as_bytes().to_vec()));
    }
    let path = str_param(params, "path")
        .ok_or_else(|| HandlerError::InvalidParameters("add needs 'content' or 'path'".to_string()))?;
    let data = std::fs::read(path)?;
    let name = str_param(params, "filename")
        .map(|s| s.to_string())
        .or_else(|| Path::new(path).file_name().map(|n| n.to_string_lossy().to_string()))
        .unwrap_or_else(|| "file".to_string());
    Ok((name, data))
}

pub struct AddHandler {
    pool: Arc<IpfsPool>,
    index: SharedIndex,
}

impl OperationHandler for AddHandler {
    fn handle(&self, params: &Map<String, Value>) -> Result<Value, HandlerError> {
        let (name, data) = add_payload(params)?;
        let pin = params.get("pin").and_then(|v| v.as_bool()).unwrap_or(true);
        let digest = sha256_hex(&data);
        let added = self
            .pool
            .with_connection(|conn| -> Result<_, HandlerError> { Ok(live_client(conn)?.add(&name, data, pin)?) })?;
        record(&self.index, &added.cid);
        Ok(json!({
            "cid": added.cid,
            "name": added.name,
            "size": added.size,
            "pinned": pin,
            "sha256": digest,
        }))
    }
}

pub struct GetHandler {
    pool: Arc<IpfsPool>,
    index: SharedIndex,
}

impl OperationHandler for GetHandler {
    fn handle(&self, params: &Map<String, Value>) -> Result<Value, HandlerError> {
        let cid = cid_param(params)?;

        if let Some(output) = str_param(params, "output_path") {
            if let Some(parent) = Path::new(output).parent() {
                std::fs::create_dir_all(parent)?;
            }
            let mut file = File::create(output)?;
            let written = self
                .pool
                .with_connection(|conn| -> Result<_, HandlerError> { Ok(live_client(conn)?.cat_into(&cid, &mut file)?) })?;
            record(&self.index, &cid);
            return Ok(json!({"cid": cid, "size": written, "output_path": output}));
        }

        let (data, truncated) = self.pool.with_connection(|conn| -> Result<_, HandlerError> {
            Ok(live_client(conn)?.cat_prefix(&cid, MAX_INLINE_BYTES)?)
        })?;
        record(&self.index, &cid);
        Ok(json!({
            "cid": cid,
            "size": data.len(),
            "content": String::from_utf8_lossy(&data),
            "truncated": truncated,
        }))
    }
}

pub struct PinHandler {
    pool: Arc<IpfsPool>,
    index: SharedIndex,
}

impl OperationHandler for PinHandler {
    fn handle(&self, params: &Map<String, Value>) -> Result<Value, HandlerError> {
        let cid = cid_param(params)?;
        let pins = self
            .pool
            .with_connection(|conn| -> Result<_, HandlerError> { Ok(live_client(conn)?.pin_add(&cid)?) })?;
        record(&self.index, &cid);
        Ok(json!({"cid": cid, "pins": pins}))
    }
}

pub struct UnpinHandler {
    pool: Arc<IpfsPool>,
}

impl OperationHandler for UnpinHandler {
    fn handle(&self, params: &Map<String, Value>) -> Result<Value, HandlerError> {
        let cid = cid_param(params)?;
        let pins = self
            .pool
            .with_connection(|conn| -> Result<_, HandlerError> { Ok(live_client(conn)?.pin_rm(&cid)?) })?;
        Ok(json!({"cid": cid, "unpinned": pins}))
    }
}

/// Register add/get/pin/unpin for the ipfs backend
pub fn register_ipfs_handlers(wal: &mut Wal, pool: Arc<IpfsPool>, index: SharedIndex) {
    wal.register_handler(Backend::Ipfs, OperationType::Add, AddHandler { pool: pool.clone(), index: index.clone() });
    wal.register_handler(Backend::Ipfs, OperationType::Get, GetHandler { pool: pool.clone(), index: index.clone() });
    wal.register_handler(Backend::Ipfs, OperationType::Pin, PinHandler { pool: pool.clone(), index });
    wal.register_handler(Backend::Ipfs, OperationType::Unpin, UnpinHandler { pool });
    log::info!("WAL: ipfs handlers registered (add, get, pin, unpin)");
}

// ============================================================================
// TESTS
// ============================================================================
