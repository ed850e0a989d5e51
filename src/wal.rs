// IPFS Kit Core - Write-Ahead Log
// Copyright 2026 Joseph Stone - All Rights Reserved
//
// Queue of named storage operations with status tracking.
// State machine: PENDING -> COMPLETED | FAILED. Terminal states are final.
// Records live in LMDB (storage.rs); handlers are registered per
// (Backend, OperationType) and invoked with the stored parameters.

use crate::error::{HandlerError, WalError};
use crate::storage::{KitStorage, UpdateOutcome};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, Mutex};

/// Kind of storage operation
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum OperationType {
    Add,
    Get,
    Pin,
    Unpin,
}

/// Storage backend an operation targets
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    #[default]
    Ipfs,
    S3,
    Storacha,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum OperationStatus {
    Pending,
    Completed,
    Failed,
}

impl OperationStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, OperationStatus::Pending)
    }
}

impl fmt::Display for OperationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(match self {
            OperationType::Add => "add",
            OperationType::Get => "get",
            OperationType::Pin => "pin",
            OperationType::Unpin => "unpin",
        })
    }
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(match self {
            Backend::Ipfs => "ipfs",
            Backend::S3 => "s3",
            Backend::Storacha => "storacha",
        })
    }
}

impl fmt::Display for OperationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(match self {
            OperationStatus::Pending => "pending",
            OperationStatus::Completed => "completed",
            OperationStatus::Failed => "failed",
        })
    }
}

impl FromStr for OperationType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "add" => Ok(OperationType::Add),
            "get" | "cat" => Ok(OperationType::Get),
            "pin" => Ok(OperationType::Pin),
            "unpin" | "pin_rm" => Ok(OperationType::Unpin),
            other => Err(format!("unknown operation type: {}", other)),
        }
    }
}

impl FromStr for Backend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "ipfs" => Ok(Backend::Ipfs),
            "s3" => Ok(Backend::S3),
            "storacha" => Ok(Backend::Storacha),
            other => Err(format!("unknown backend: {}", other)),
        }
    }
}

impl FromStr for OperationStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "pending" => Ok(OperationStatus::Pending),
            "completed" => Ok(OperationStatus::Completed),
            "failed" => Ok(OperationStatus::Failed),
            other => Err(format!("unknown status: {}", other)),
        }
    }
}

/// One WAL record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WalOperation {
    pub operation_id: String,
    pub operation_type: OperationType,
    pub backend: Backend,
    pub parameters: Map<String, Value>,
    pub status: OperationStatus,
    pub result: Option<Value>,
    pub error: Option<String>,
    pub error_type: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl WalOperation {
    pub fn new(operation_type: OperationType, backend: Backend, parameters: Map<String, Value>) -> Self {
        let now = Utc::now();
        Self {
            operation_id: uuid::Uuid::new_v4().to_string(),
            operation_type,
            backend,
            parameters,
            status: OperationStatus::Pending,
            result: None,
            error: None,
            error_type: None,
            created_at: now,
            updated_at: now,
            completed_at: None,
        }
    }
}

/// Executes one kind of operation.
///
/// Handlers may be invoked again for the same parameters after a crash
/// between execution and the status write, so they should be idempotent.
pub trait OperationHandler: Send + Sync {
    fn handle(&self, parameters: &Map<String, Value>) -> Result<Value, HandlerError>;
}

impl<F> OperationHandler for F
where
    F: Fn(&Map<String, Value>) -> Result<Value, HandlerError> + Send + Sync,
{
    fn handle(&self, parameters: &Map<String, Value>) -> Result<Value, HandlerError> {
        self(parameters)
    }
}

/// Pin a closure to the handler signature so its argument and return
/// types are inferred at the call site.
pub fn handler_fn<F>(f: F) -> F
where
    F: Fn(&Map<String, Value>) -> Result<Value, HandlerError> + Send + Sync,
{
    f
}

/// Outcome of process_pending()
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ProcessSummary {
    pub completed: usize,
    pub failed: usize,
    /// Pending operations left alone because no handler is registered
    pub skipped: usize,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WalStats {
    pub total: u64,
    pub pending: u64,
    pub completed: u64,
    pub failed: u64,
    pub by_type: BTreeMap<String, u64>,
    pub handlers: Vec<String>,
}

/// Write-ahead log over LMDB storage
pub struct Wal {
    storage: Arc<KitStorage>,
    handlers: HashMap<(Backend, OperationType), Arc<dyn OperationHandler>>,
    in_flight: Mutex<HashSet<String>>,
}

impl Wal {
    pub fn new(storage: Arc<KitStorage>) -> Self {
        Self {
            storage,
            handlers: HashMap::new(),
            in_flight: Mutex::new(HashSet::new()),
        }
    }

    /// Handlers only run records whose backend and type both match
    pub fn register_handler<H>(&mut self, backend: Backend, operation_type: OperationType, handler: H)
    where
        H: OperationHandler + 'static,
    {
        if self.handlers.insert((backend, operation_type), Arc::new(handler)).is_some() {
            log::warn!("WAL handler for {}/{} replaced", backend, operation_type);
        }
    }

    pub fn has_handler(&self, backend: Backend, operation_type: OperationType) -> bool {
        self.handlers.contains_key(&(backend, operation_type))
    }

    /// Persist a PENDING record and return its id
    pub fn add_operation(
        &self,
        operation_type: OperationType,
        backend: Backend,
        parameters: Map<String, Value>,
    ) -> Result<String, WalError> {
        let op = WalOperation::new(operation_type, backend, parameters);
        self.storage.put_operation(&op)?;
        log::debug!("WAL add {} {} {}", op.operation_id, operation_type, backend);
        Ok(op.operation_id)
    }

    pub fn get_operation(&self, operation_id: &str) -> Result<WalOperation, WalError> {
        self.storage
            .get_operation(operation_id)?
            .ok_or_else(|| WalError::NotFound(operation_id.to_string()))
    }

    /// Run the registered handler and move the record to a terminal status.
    ///
    /// With no handler registered the record stays PENDING and
    /// `WalError::NoHandler` is returned.
    pub fn execute_operation(&self, operation_id: &str) -> Result<WalOperation, WalError> {
        let op = self.get_operation(operation_id)?;
        if op.status.is_terminal() {
            return Err(WalError::AlreadyTerminal { id: op.operation_id, status: op.status });
        }
        let handler = self
            .handlers
            .get(&(op.backend, op.operation_type))
            .cloned()
            .ok_or(WalError::NoHandler { backend: op.backend, operation_type: op.operation_type })?;

        let _guard = self.claim(operation_id)?;
        let outcome = handler.handle(&op.parameters);

        let update = self.storage.update_operation(operation_id, |record| {
            if record.status.is_terminal() {
                return false;
            }
            let now = Utc::now();
            match &outcome {
                Ok(value) => {
                    record.status = OperationStatus::Completed;
                    record.result = Some(value.clone());
                }
                Err(e) => {
                    record.status = OperationStatus::Failed;
                    record.error = Some(e.to_string());
                    record.error_type = Some(e.kind().to_string());
                }
            }
            record.updated_at = now;
            record.completed_at = Some(now);
            true
        })?;

        match update {
            UpdateOutcome::Updated(record) => {
                match record.status {
                    OperationStatus::Completed => log::info!("WAL {} {} completed", record.operation_type, record.operation_id),
                    _ => log::warn!(
                        "WAL {} {} failed: {}",
                        record.operation_type,
                        record.operation_id,
                        record.error.as_deref().unwrap_or("")
                    ),
                }
                Ok(record)
            }
            UpdateOutcome::Unchanged(record) => {
                Err(WalError::AlreadyTerminal { id: record.operation_id, status: record.status })
            }
            UpdateOutcome::Missing => Err(WalError::NotFound(operation_id.to_string())),
        }
    }

    fn claim(&self, operation_id: &str) -> Result<InFlightGuard<'_>, WalError> {
        let mut set = self.in_flight.lock().unwrap_or_else(|p| p.into_inner());
        if !set.insert(operation_id.to_string()) {
            return Err(WalError::InFlight(operation_id.to_string()));
        }
        Ok(InFlightGuard { wal: self, id: operation_id.to_string() })
    }

    /// Records matching `status` (all when None), oldest first
    pub fn list_operations(&self, status: Option<OperationStatus>) -> Result<Vec<WalOperation>, WalError> {
        let ops = self.storage.list_operations()?;
        Ok(match status {
            Some(s) => ops.into_iter().filter(|op| op.status == s).collect(),
            None => ops,
        })
    }

    pub fn pending_operations(&self) -> Result<Vec<WalOperation>, WalError> {
        self.list_operations(Some(OperationStatus::Pending))
    }

    /// Execute every pending operation that has a handler, oldest first
    pub fn process_pending(&self) -> Result<ProcessSummary, WalError> {
        let mut summary = ProcessSummary::default();
        for op in self.pending_operations()? {
            if !self.has_handler(op.backend, op.operation_type) {
                summary.skipped += 1;
                continue;
            }
            match self.execute_operation(&op.operation_id) {
                Ok(done) if done.status == OperationStatus::Completed => summary.completed += 1,
                Ok(_) => summary.failed += 1,
                Err(WalError::AlreadyTerminal { .. }) | Err(WalError::InFlight(_)) => {}
                Err(e) => return Err(e),
            }
        }
        if summary.completed + summary.failed > 0 {
            log::info!(
                "WAL replay: {} completed, {} failed, {} skipped",
                summary.completed, summary.failed, summary.skipped
            );
        }
        Ok(summary)
    }

    /// Delete terminal records that finished before now - older_than.
    /// Pending records are never pruned.
    pub fn prune(&self, older_than: Duration) -> Result<usize, WalError> {
        let cutoff = Utc::now()
            .checked_sub_signed(older_than)
            .ok_or_else(|| WalError::InvalidArgument(format!("prune age out of range: {}", older_than)))?;
        let mut removed = 0;
        for op in self.storage.list_operations()? {
            let finished = op.completed_at.unwrap_or(op.updated_at);
            if op.status.is_terminal() && finished < cutoff && self.storage.delete_operation(&op.operation_id)? {
                removed += 1;
            }
        }
        if removed > 0 {
            log::info!("WAL pruned {} terminal records", removed);
        }
        Ok(removed)
    }

    pub fn stats(&self) -> Result<WalStats, WalError> {
        let mut stats = WalStats::default();
        for op in self.storage.list_operations()? {
            stats.total += 1;
            match op.status {
                OperationStatus::Pending => stats.pending += 1,
                OperationStatus::Completed => stats.completed += 1,
                OperationStatus::Failed => stats.failed += 1,
            }
            *stats.by_type.entry(op.operation_type.to_string()).or_default() += 1;
        }
        let mut handlers: Vec<(Backend, OperationType)> = self.handlers.keys().copied().collect();
        handlers.sort();
        stats.handlers = handlers.into_iter().map(|(b, t)| format!("{}/{}", b, t)).collect();
        Ok(stats)
    }
}

struct InFlightGuard<'a> {
    wal: &'a Wal,
    id: String,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        let mut set = self.wal.in_flight.lock().unwrap_or_else(|p| p.into_inner());
        set.remove(&self.id);
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::{tempdir, TempDir};

    fn open_wal() -> (TempDir, Wal) {
        let dir = tempdir().unwrap();
        let storage = Arc::new(KitStorage::open(dir.path()).unwrap());
        (dir, Wal::new(storage))
    }

    fn params(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap_or_default()
    }

    #[test]
    fn add_creates_pending_record() {
        let (_dir, wal) = open_wal();
        let id = wal
            .add_operation(OperationType::Add, Backend::Ipfs, params(json!({"content": "hello"})))
            .unwrap();
        let op = wal.get_operation(&id).unwrap();
        assert_eq!(op.status, OperationStatus::Pending);
        assert_eq!(op.parameters["content"], "hello");
        assert!(op.result.is_none());
    }

    #[test]
    fn ids_are_unique() {
        let (_dir, wal) = open_wal();
        let a = wal.add_operation(OperationType::Pin, Backend::Ipfs, Map::new()).unwrap();
        let b = wal.add_operation(OperationType::Pin, Backend::Ipfs, Map::new()).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn successful_handler_completes() {
        let (_dir, mut wal) = open_wal();
        wal.register_handler(
            Backend::Ipfs,
            OperationType::Pin,
            handler_fn(|p| Ok(json!({"pinned": p["cid"].clone()}))),
        );
        let id = wal
            .add_operation(OperationType::Pin, Backend::Ipfs, params(json!({"cid": "bafyabc"})))
            .unwrap();

        let done = wal.execute_operation(&id).unwrap();
        assert_eq!(done.status, OperationStatus::Completed);
        assert_eq!(done.result, Some(json!({"pinned": "bafyabc"})));
        assert!(done.completed_at.is_some());

        let stored = wal.get_operation(&id).unwrap();
        assert_eq!(stored.status, OperationStatus::Completed);
    }

    #[test]
    fn handler_error_marks_failed_with_message() {
        let (_dir, mut wal) = open_wal();
        wal.register_handler(
            Backend::Ipfs,
            OperationType::Add,
            handler_fn(|_| Err(HandlerError::BackendUnavailable("daemon offline".to_string()))),
        );
        let id = wal.add_operation(OperationType::Add, Backend::Ipfs, Map::new()).unwrap();

        let failed = wal.execute_operation(&id).unwrap();
        assert_eq!(failed.status, OperationStatus::Failed);
        assert_eq!(failed.error.as_deref(), Some("backend unavailable: daemon offline"));
        assert_eq!(failed.error_type.as_deref(), Some("BackendUnavailable"));
        assert_eq!(wal.get_operation(&id).unwrap().status, OperationStatus::Failed);
    }

    #[test]
    fn terminal_records_do_not_transition() {
        let (_dir, mut wal) = open_wal();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        wal.register_handler(
            Backend::Ipfs,
            OperationType::Unpin,
            handler_fn(move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(Value::Null)
            }),
        );
        let id = wal.add_operation(OperationType::Unpin, Backend::Ipfs, Map::new()).unwrap();
        wal.execute_operation(&id).unwrap();

        let again = wal.execute_operation(&id);
        assert!(matches!(again, Err(WalError::AlreadyTerminal { status: OperationStatus::Completed, .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn missing_handler_leaves_pending() {
        let (_dir, wal) = open_wal();
        let id = wal.add_operation(OperationType::Get, Backend::S3, Map::new()).unwrap();
        assert!(matches!(wal.execute_operation(&id), Err(WalError::NoHandler { backend: Backend::S3, operation_type: OperationType::Get })));
        assert_eq!(wal.get_operation(&id).unwrap().status, OperationStatus::Pending);
    }

    #[test]
    fn backend_must_match_registered_handler() {
        let (_dir, mut wal) = open_wal();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        wal.register_handler(
            Backend::Ipfs,
            OperationType::Pin,
            handler_fn(move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(Value::Null)
            }),
        );
        let s3 = wal.add_operation(OperationType::Pin, Backend::S3, Map::new()).unwrap();
        let storacha = wal.add_operation(OperationType::Pin, Backend::Storacha, Map::new()).unwrap();

        assert!(matches!(
            wal.execute_operation(&s3),
            Err(WalError::NoHandler { backend: Backend::S3, operation_type: OperationType::Pin })
        ));
        let summary = wal.process_pending().unwrap();
        assert_eq!(summary, ProcessSummary { completed: 0, failed: 0, skipped: 2 });
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(wal.get_operation(&s3).unwrap().status, OperationStatus::Pending);
        assert_eq!(wal.get_operation(&storacha).unwrap().status, OperationStatus::Pending);
    }

    #[test]
    fn unknown_id_not_found() {
        let (_dir, wal) = open_wal();
        assert!(matches!(wal.get_operation("missing"), Err(WalError::NotFound(_))));
        assert!(matches!(wal.execute_operation("missing"), Err(WalError::NotFound(_))));
    }

    #[test]
    fn process_pending_runs_registered_types_only() {
        let (_dir, mut wal) = open_wal();
        wal.register_handler(Backend::Ipfs, OperationType::Pin, handler_fn(|_| Ok(json!(true))));
        wal.register_handler(
            Backend::Ipfs,
            OperationType::Add,
            handler_fn(|_| Err(HandlerError::InvalidParameters("missing content".to_string()))),
        );
        wal.add_operation(OperationType::Pin, Backend::Ipfs, Map::new()).unwrap();
        wal.add_operation(OperationType::Pin, Backend::Ipfs, Map::new()).unwrap();
        wal.add_operation(OperationType::Add, Backend::Ipfs, Map::new()).unwrap();
        wal.add_operation(OperationType::Get, Backend::Ipfs, Map::new()).unwrap();

        let summary = wal.process_pending().unwrap();
        assert_eq!(summary, ProcessSummary { completed: 2, failed: 1, skipped: 1 });
        assert_eq!(wal.pending_operations().unwrap().len(), 1);

        let stats = wal.stats().unwrap();
        assert_eq!(stats.total, 4);
        assert_eq!(stats.completed, 2);
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.pending, 1);
        assert_eq!(stats.by_type["pin"], 2);
        assert_eq!(stats.handlers, vec!["ipfs/add".to_string(), "ipfs/pin".to_string()]);
    }

    #[test]
    fn prune_keeps_pending_records() {
        let (_dir, mut wal) = open_wal();
        wal.register_handler(Backend::Ipfs, OperationType::Pin, handler_fn(|_| Ok(Value::Null)));
        let done = wal.add_operation(OperationType::Pin, Backend::Ipfs, Map::new()).unwrap();
        let pending = wal.add_operation(OperationType::Add, Backend::Ipfs, Map::new()).unwrap();
        wal.execute_operation(&done).unwrap();

        // Negative age puts the cutoff in the future
        let removed = wal.prune(Duration::seconds(-60)).unwrap();
        assert_eq!(removed, 1);
        assert!(matches!(wal.get_operation(&done), Err(WalError::NotFound(_))));
        assert!(wal.get_operation(&pending).is_ok());

        assert_eq!(wal.prune(Duration::days(30)).unwrap(), 0);
    }

    #[test]
    fn prune_rejects_out_of_range_age() {
        let (_dir, wal) = open_wal();
        wal.add_operation(OperationType::Pin, Backend::Ipfs, Map::new()).unwrap();
        let err = wal.prune(Duration::days(1_000_000_000)).unwrap_err();
        assert!(matches!(err, WalError::InvalidArgument(_)));
        assert_eq!(wal.stats().unwrap().total, 1);
    }

    #[test]
    fn parses_names() {
        assert_eq!("PIN".parse::<OperationType>().unwrap(), OperationType::Pin);
        assert_eq!("cat".parse::<OperationType>().unwrap(), OperationType::Get);
        assert_eq!("ipfs".parse::<Backend>().unwrap(), Backend::Ipfs);
        assert_eq!("failed".parse::<OperationStatus>().unwrap(), OperationStatus::Failed);
        assert!("frobnicate".parse::<OperationType>().is_err());
    }
}
