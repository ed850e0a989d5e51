// IPFS Kit Core - Error Types
// Copyright 2026 Joseph Stone - All Rights Reserved
//
// Typed errors for the library modules. Storage and CLI layers use
// anyhow and wrap these where needed.

use crate::pool::ConnectionFault;
use crate::wal::{Backend, OperationStatus, OperationType};
use thiserror::Error;

/// Write-ahead log failures
#[derive(Debug, Error)]
pub enum WalError {
    #[error("operation not found: {0}")]
    NotFound(String),

    #[error("no handler registered for {backend}/{operation_type}")]
    NoHandler { backend: Backend, operation_type: OperationType },

    #[error("operation {id} is already {status}")]
    AlreadyTerminal { id: String, status: OperationStatus },

    #[error("operation {0} is already executing")]
    InFlight(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("storage error: {0}")]
    Storage(#[from] anyhow::Error),
}

/// Connection pool failures
#[derive(Debug, Error)]
pub enum PoolError {
    #[error("invalid pool configuration: {0}")]
    InvalidConfig(String),

    #[error("failed to initialize connection: {0}")]
    Connect(String),
}

/// Sketch construction and combination failures
#[derive(Debug, Error, PartialEq)]
pub enum SketchError {
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("dimension mismatch: {0}")]
    DimensionMismatch(String),
}

/// Error returned by a WAL operation handler.
///
/// `kind()` is stored alongside the message on FAILED records.
#[derive(Debug, Error)]
pub enum HandlerError {
    #[error("invalid parameters: {0}")]
    InvalidParameters(String),

    #[error("backend unavailable: {0}")]
    BackendUnavailable(String),

    #[error(transparent)]
    Ipfs(#[from] IpfsError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

impl HandlerError {
    pub fn kind(&self) -> &'static str {
        match self {
            HandlerError::InvalidParameters(_) => "InvalidParameters",
            HandlerError::BackendUnavailable(_) => "BackendUnavailable",
            HandlerError::Ipfs(_) => "IpfsError",
            HandlerError::Io(_) => "IoError",
            HandlerError::Other(_) => "HandlerError",
        }
    }
}

impl From<PoolError> for HandlerError {
    fn from(e: PoolError) -> Self {
        HandlerError::BackendUnavailable(e.to_string())
    }
}

impl ConnectionFault for HandlerError {
    fn is_connection_fault(&self) -> bool {
        match self {
            HandlerError::Ipfs(e) => e.is_connection_fault(),
            HandlerError::BackendUnavailable(_) => true,
            _ => false,
        }
    }
}

/// IPFS HTTP RPC failures
#[derive(Debug, Error)]
pub enum IpfsError {
    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("ipfs api error (HTTP {status}): {message}")]
    Api { status: u16, message: String },

    #[error("unexpected response: {0}")]
    Decode(String),

    #[error("reading response body: {0}")]
    Io(#[from] std::io::Error),
}

impl ConnectionFault for IpfsError {
    /// Transport failures only. API errors and undecodable bodies mean the
    /// daemon answered.
    fn is_connection_fault(&self) -> bool {
        match self {
            IpfsError::Http(e) => !e.is_decode(),
            IpfsError::Io(_) => true,
            IpfsError::Api { .. } | IpfsError::Decode(_) => false,
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================
