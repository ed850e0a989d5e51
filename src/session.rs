// IPFS Kit Core - Server Session State
// Copyright 2026 Joseph Stone - All Rights Reserved
//
// In-memory record of MCP tool activity. Persisted to LMDB after each call.
// Tracks: call_count, per-tool counts, last tool, recent failures.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

const MAX_FAILURES: usize = 50;

/// Active session state
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub call_count: u64,
    pub failure_count: u64,
    pub tool_counts: BTreeMap<String, u64>,
    pub last_tool: Option<String>,
    pub started: DateTime<Utc>,
    pub last_call: Option<DateTime<Utc>>,
    pub failures: Vec<FailureEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailureEntry {
    pub timestamp: DateTime<Utc>,
    pub tool: String,
    pub error: String,
}

impl Session {
    pub fn new() -> Self {
        Self {
            call_count: 0,
            failure_count: 0,
            tool_counts: BTreeMap::new(),
            last_tool: None,
            started: Utc::now(),
            last_call: None,
            failures: Vec::new(),
        }
    }

    /// Record one tool call (called after every tools/call)
    pub fn record_call(&mut self, tool: &str, success: bool, error: Option<&str>) {
        self.call_count += 1;
        *self.tool_counts.entry(tool.to_string()).or_default() += 1;
        self.last_tool = Some(tool.to_string());
        let now = Utc::now();
        self.last_call = Some(now);

        if !success {
            self.failure_count += 1;
            self.failures.push(FailureEntry {
                timestamp: now,
                tool: tool.to_string(),
                error: error.unwrap_or("unknown error").to_string(),
            });
            if self.failures.len() > MAX_FAILURES {
                self.failures.remove(0);
            }
        }
    }

    /// Status summary string
    pub fn status_summary(&self) -> String {
        format!(
            "Calls: {} | Failures: {} | Last: {} | Since: {}",
            self.call_count,
            self.failure_count,
            self.last_tool.as_deref().unwrap_or("none"),
            self.started.format("%Y-%m-%d %H:%M:%S UTC"),
        )
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}
