// IPFS Kit Core - MCP Server (JSON-RPC 2.0 over stdio)
// Copyright 2026 Joseph Stone - All Rights Reserved
//
// Every storage operation goes through the WAL before it reaches the daemon.
// Exposes: ipfs_add, ipfs_get, ipfs_pin, ipfs_unpin,
//          wal_add, wal_execute, wal_get, wal_list, wal_process_pending, wal_stats,
//          pool_status, pool_health_check, cid_check, cid_stats, kit_status

use crate::service::KitService;
use crate::session::Session;
use crate::wal::{Backend, OperationStatus, OperationType, WalOperation};
use chrono::Local;
use serde_json::{json, Map, Value};
use std::fs::OpenOptions;
use std::io::{self, BufRead, Write};
use std::path::PathBuf;

const PROTOCOL_VERSION: &str = "2024-11-05";
const SERVER_NAME: &str = "ipfs-kit";
const SERVER_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default and ceiling for wal_list
const DEFAULT_LIST_LIMIT: usize = 50;
const MAX_LIST_LIMIT: usize = 1000;

fn text(body: impl Into<String>) -> Value {
    json!({"type": "text", "text": body.into()})
}

fn error_text(body: impl std::fmt::Display) -> Value {
    text(format!("ERROR: {}", body))
}

fn pretty(value: &impl serde::Serialize) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|e| format!("<unserializable: {}>", e))
}

/// Render a WAL record as a tool result. FAILED records are reported as errors.
fn operation_result(op: &WalOperation) -> Value {
    match op.status {
        OperationStatus::Failed => text(format!(
            "ERROR: {} {} failed ({}): {}\n{}",
            op.operation_type,
            op.operation_id,
            op.error_type.as_deref().unwrap_or("HandlerError"),
            op.error.as_deref().unwrap_or("unknown error"),
            pretty(op),
        )),
        _ => text(pretty(op)),
    }
}

/// Summarize tool params for logging (truncate large values)
fn param_summary(name: &str, args: &Value) -> String {
    let field = |key: &str| args.get(key).and_then(|v| v.as_str());
    match name {
        "ipfs_add" => match (field("content"), field("path")) {
            (Some(c), _) => format!("content_len={}", c.len()),
            (None, Some(p)) => format!("path={}", p),
            _ => "no payload".to_string(),
        },
        n if n.starts_with("ipfs_") || n == "cid_check" => format!("cid={}", field("cid").unwrap_or("?")),
        "wal_execute" | "wal_get" => format!("id={}", field("operation_id").unwrap_or("?")),
        _ => {
            let s = args.to_string();
            if s.len() > 300 {
                let cut: String = s.chars().take(300).collect();
                format!("{}…", cut)
            } else {
                s
            }
        }
    }
}

/// MCP tool definition helper
fn tool_def(name: &str, description: &str, properties: Value, required: Vec<&str>) -> Value {
    json!({
        "name": name,
        "description": description,
        "inputSchema": {
            "type": "object",
            "properties": properties,
            "required": required,
        }
    })
}

/// Return all tool definitions
fn tool_definitions() -> Vec<Value> {
    vec![
        // ====== IPFS ======
        tool_def(
            "ipfs_add",
            "Add content to IPFS through the WAL. Pass inline 'content' or a local 'path'. Returns the operation record with the CID.",
            json!({
                "content": {"type": "string", "description": "Inline content to add"},
                "path": {"type": "string", "description": "Local file to add"},
                "filename": {"type": "string", "description": "Name recorded for the file"},
                "pin": {"type": "boolean", "description": "Pin after adding (default true)"}
            }),
            vec![],
        ),
        tool_def(
            "ipfs_get",
            "Fetch content by CID. Writes to 'output_path' when given, otherwise returns the content inline.",
            json!({
                "cid": {"type": "string", "description": "Content identifier"},
                "output_path": {"type": "string", "description": "Local destination file"}
            }),
            vec!["cid"],
        ),
        tool_def(
            "ipfs_pin",
            "Pin a CID on the local node.",
            json!({"cid": {"type": "string", "description": "Content identifier"}}),
            vec!["cid"],
        ),
        tool_def(
            "ipfs_unpin",
            "Remove a pin from the local node.",
            json!({"cid": {"type": "string", "description": "Content identifier"}}),
            vec!["cid"],
        ),

        // ====== WAL ======
        tool_def(
            "wal_add",
            "Record an operation in the write-ahead log. Executes immediately unless 'execute' is false or disabled in config.",
            json!({
                "operation_type": {"type": "string", "description": "add | get | pin | unpin"},
                "backend": {"type": "string", "description": "ipfs | s3 | storacha (default ipfs)"},
                "parameters": {"type": "object", "description": "Handler parameters"},
                "execute": {"type": "boolean", "description": "Execute right away"}
            }),
            vec!["operation_type"],
        ),
        tool_def(
            "wal_execute",
            "Execute a PENDING operation by id.",
            json!({"operation_id": {"type": "string", "description": "Operation id"}}),
            vec!["operation_id"],
        ),
        tool_def(
            "wal_get",
            "Get one operation record by id.",
            json!({"operation_id": {"type": "string", "description": "Operation id"}}),
            vec!["operation_id"],
        ),
        tool_def(
            "wal_list",
            "List operations, oldest first, optionally filtered by status.",
            json!({
                "status": {"type": "string", "description": "pending | completed | failed"},
                "limit": {"type": "integer", "description": "Max records (default 50)"}
            }),
            vec![],
        ),
        tool_def(
            "wal_process_pending",
            "Execute every PENDING operation that has a handler.",
            json!({}),
            vec![],
        ),
        tool_def(
            "wal_stats",
            "WAL counts by status and operation type.",
            json!({}),
            vec![],
        ),

        // ====== POOL ======
        tool_def(
            "pool_status",
            "Connection pool occupancy, error counts and counters.",
            json!({}),
            vec![],
        ),
        tool_def(
            "pool_health_check",
            "Probe idle connections now. Evicts unhealthy or expired entries.",
            json!({}),
            vec![],
        ),

        // ====== CID INDEX ======
        tool_def(
            "cid_check",
            "Probabilistic lookup: has this CID been seen, and roughly how often.",
            json!({"cid": {"type": "string", "description": "Content identifier"}}),
            vec!["cid"],
        ),
        tool_def(
            "cid_stats",
            "CID index summary: records, distinct estimate, sketch dimensions.",
            json!({}),
            vec![],
        ),

        // ====== STATUS ======
        tool_def(
            "kit_status",
            "Overall status: endpoint, pool, WAL, CID index and session counters.",
            json!({}),
            vec![],
        ),
    ]
}

/// MCP server state. `handle_message` is pure with respect to stdio.
pub struct KitServer {
    service: KitService,
    session: Session,
    command_log: Option<PathBuf>,
}

impl KitServer {
    pub fn new(service: KitService) -> Self {
        let session = match service.storage.load_session() {
            Ok(Some(s)) => s,
            Ok(None) => Session::new(),
            Err(e) => {
                log::warn!("Failed to load session, starting fresh: {:#}", e);
                Session::new()
            }
        };
        Self { service, session, command_log: None }
    }

    /// Append tool calls to this file
    pub fn with_command_log(mut self, path: PathBuf) -> Self {
        self.command_log = Some(path);
        self
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    fn cmd_log(&self, msg: &str) {
        let Some(path) = &self.command_log else { return };
        if let Some(parent) = path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        if let Ok(mut f) = OpenOptions::new().create(true).append(true).open(path) {
            let ts = Local::now().format("%Y-%m-%d %H:%M:%S");
            let _ = writeln!(f, "[{}] {}", ts, msg);
        }
    }

    /// Handle one JSON-RPC message. Returns None for notifications.
    pub fn handle_message(&mut self, msg: &Value) -> Option<Value> {
        let method = msg["method"].as_str().unwrap_or("");
        let id = msg.get("id").cloned().unwrap_or(Value::Null);
        let params = &msg["params"];

        log::debug!("Received: {}", method);

        let result = match method {
            "initialize" => json!({
                "protocolVersion": PROTOCOL_VERSION,
                "capabilities": { "tools": {} },
                "serverInfo": {
                    "name": SERVER_NAME,
                    "version": SERVER_VERSION,
                }
            }),
            "notifications/initialized" => return None,
            "tools/list" => json!({ "tools": tool_definitions() }),
            "tools/call" => {
                let name = params["name"].as_str().unwrap_or("");
                let args = params.get("arguments").cloned().unwrap_or_else(|| json!({}));
                json!({ "content": [self.call_tool(name, &args)] })
            }
            "ping" => json!({}),
            _ => {
                if id.is_null() {
                    return None;
                }
                return Some(rpc_error(&id, -32601, &format!("Unknown method: {}", method)));
            }
        };

        Some(json!({
            "jsonrpc": "2.0",
            "id": id,
            "result": result,
        }))
    }

    /// Run one tool, log it, update the session and persist state
    fn call_tool(&mut self, name: &str, args: &Value) -> Value {
        self.cmd_log(&format!("CALL {} | {}", name, param_summary(name, args)));

        let result = self.dispatch(name, args);

        let body = result.get("text").and_then(|v| v.as_str()).unwrap_or("");
        let failed = body.starts_with("ERROR");
        if failed {
            let snippet: String = body.chars().take(200).collect();
            self.cmd_log(&format!("FAIL {} | {}", name, snippet));
            self.session.record_call(name, false, Some(&snippet));
        } else {
            self.session.record_call(name, true, None);
        }

        if let Err(e) = self.service.storage.save_session(&self.session) {
            log::warn!("Failed to persist session: {:#}", e);
        }
        if let Err(e) = self.service.save_index() {
            log::warn!("Failed to persist CID index: {:#}", e);
        }
        result
    }

    fn dispatch(&self, name: &str, args: &Value) -> Value {
        match name {
            "ipfs_add" => self.submit_direct(OperationType::Add, args),
            "ipfs_get" => self.submit_direct(OperationType::Get, args),
            "ipfs_pin" => self.submit_direct(OperationType::Pin, args),
            "ipfs_unpin" => self.submit_direct(OperationType::Unpin, args),

            "wal_add" => self.wal_add(args),
            "wal_execute" => match args["operation_id"].as_str() {
                Some(id) => match self.service.wal.execute_operation(id) {
                    Ok(op) => operation_result(&op),
                    Err(e) => error_text(e),
                },
                None => error_text("operation_id is required"),
            },
            "wal_get" => match args["operation_id"].as_str() {
                Some(id) => match self.service.wal.get_operation(id) {
                    Ok(op) => text(pretty(&op)),
                    Err(e) => error_text(e),
                },
                None => error_text("operation_id is required"),
            },
            "wal_list" => self.wal_list(args),
            "wal_process_pending" => match self.service.wal.process_pending() {
                Ok(summary) => text(pretty(&summary)),
                Err(e) => error_text(e),
            },
            "wal_stats" => match self.service.wal.stats() {
                Ok(stats) => text(pretty(&stats)),
                Err(e) => error_text(e),
            },

            "pool_status" => text(pretty(&self.service.pool.status())),
            "pool_health_check" => text(pretty(&self.service.pool.run_health_check())),

            "cid_check" => match args["cid"].as_str() {
                Some(cid) => {
                    let index = self.service.index.lock().unwrap_or_else(|p| p.into_inner());
                    let seen = index.maybe_seen(cid);
                    text(pretty(&json!({
                        "cid": cid,
                        "maybe_seen": seen,
                        "estimated_count": if seen { index.frequency(cid) } else { 0 },
                    })))
                }
                None => error_text("cid is required"),
            },
            "cid_stats" => text(pretty(&self.service.cid_summary())),

            "kit_status" => match self.service.status() {
                Ok(status) => text(format!("{}\n\nSession: {}", pretty(&status), self.session.status_summary())),
                Err(e) => error_text(format!("{:#}", e)),
            },

            _ => error_text(format!("Unknown tool: {}", name)),
        }
    }

    /// ipfs_* tools always execute immediately
    fn submit_direct(&self, operation_type: OperationType, args: &Value) -> Value {
        let params = args.as_object().cloned().unwrap_or_default();
        match self.service.submit(operation_type, Backend::Ipfs, params, true) {
            Ok(op) => operation_result(&op),
            Err(e) => error_text(e),
        }
    }

    fn wal_add(&self, args: &Value) -> Value {
        let operation_type: OperationType = match args["operation_type"].as_str().map(str::parse::<OperationType>) {
            Some(Ok(t)) => t,
            Some(Err(e)) => return error_text(e),
            None => return error_text("operation_type is required"),
        };
        let backend: Backend = match args["backend"].as_str().map(str::parse::<Backend>) {
            Some(Ok(b)) => b,
            Some(Err(e)) => return error_text(e),
            None => Backend::default(),
        };
        let params: Map<String, Value> = match args.get("parameters") {
            None | Some(Value::Null) => Map::new(),
            Some(Value::Object(m)) => m.clone(),
            Some(_) => return error_text("parameters must be an object"),
        };
        let execute = args["execute"].as_bool().unwrap_or(self.service.config.wal.execute_on_add);

        match self.service.submit(operation_type, backend, params, execute) {
            Ok(op) => operation_result(&op),
            Err(e) => error_text(e),
        }
    }

    fn wal_list(&self, args: &Value) -> Value {
        let status = match args["status"].as_str().map(str::parse::<OperationStatus>) {
            Some(Ok(s)) => Some(s),
            Some(Err(e)) => return error_text(e),
            None => None,
        };
        let limit = args["limit"]
            .as_u64()
            .map(|n| (n as usize).min(MAX_LIST_LIMIT))
            .unwrap_or(DEFAULT_LIST_LIMIT);

        match self.service.wal.list_operations(status) {
            Ok(ops) => {
                let total = ops.len();
                let shown: Vec<&WalOperation> = ops.iter().take(limit).collect();
                text(pretty(&json!({"total": total, "operations": shown})))
            }
            Err(e) => error_text(e),
        }
    }
}

fn rpc_error(id: &Value, code: i64, message: &str) -> Value {
    json!({
        "jsonrpc": "2.0",
        "id": id,
        "error": { "code": code, "message": message },
    })
}

/// Send one JSON-RPC message on stdout
fn send(msg: &Value) {
    let Ok(line) = serde_json::to_string(msg) else { return };
    let stdout = io::stdout();
    let mut out = stdout.lock();
    let _ = out.write_all(line.as_bytes());
    let _ = out.write_all(b"\n");
    let _ = out.flush();
}

/// Serve JSON-RPC on stdin/stdout until EOF
pub fn run(mut server: KitServer) {
    log::info!("Starting {} v{}", SERVER_NAME, SERVER_VERSION);
    log::info!("IPFS API: {}", server.service.config.ipfs.api_url);

    if server.service.config.wal.replay_on_start {
        if let Err(e) = server.service.replay() {
            log::warn!("WAL replay failed: {}", e);
        }
    }

    let stdin = io::stdin();
    for line in stdin.lock().lines() {
        let line = match line {
            Ok(l) => l,
            Err(e) => {
                log::error!("stdin read error: {}", e);
                continue;
            }
        };

        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let msg: Value = match serde_json::from_str(line) {
            Ok(v) => v,
            Err(e) => {
                log::warn!("JSON parse error: {}", e);
                send(&rpc_error(&Value::Null, -32700, &format!("Parse error: {}", e)));
                continue;
            }
        };

        if let Some(response) = server.handle_message(&msg) {
            send(&response);
        }
    }

    server.service.pool.close();
    log::info!("stdin closed, {} shutting down", SERVER_NAME);
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::KitConfig;
    use tempfile::{tempdir, TempDir};

    fn server() -> (TempDir, KitServer) {
        let dir = tempdir().unwrap();
        let mut config = KitConfig::default();
        config.ipfs.api_url = "http://127.0.0.1:9".to_string();
        config.ipfs.timeout_secs = 1;
        config.sketches.bloom_capacity = 1000;
        let service = KitService::open(config, &dir.path().join("KIT.DB")).unwrap();
        let server = KitServer::new(service).with_command_log(dir.path().join("cmd.log"));
        (dir, server)
    }

    fn call(server: &mut KitServer, name: &str, args: Value) -> String {
        let resp = server
            .handle_message(&json!({
                "jsonrpc": "2.0", "id": 7, "method": "tools/call",
                "params": {"name": name, "arguments": args}
            }))
            .unwrap();
        resp["result"]["content"][0]["text"].as_str().unwrap().to_string()
    }

    #[test]
    fn initialize_reports_server_info() {
        let (_dir, mut server) = server();
        let resp = server
            .handle_message(&json!({"jsonrpc": "2.0", "id": 1, "method": "initialize", "params": {}}))
            .unwrap();
        assert_eq!(resp["id"], 1);
        assert_eq!(resp["result"]["protocolVersion"], PROTOCOL_VERSION);
        assert_eq!(resp["result"]["serverInfo"]["name"], SERVER_NAME);
    }

    #[test]
    fn notifications_get_no_response() {
        let (_dir, mut server) = server();
        assert!(server
            .handle_message(&json!({"jsonrpc": "2.0", "method": "notifications/initialized"}))
            .is_none());
        assert!(server.handle_message(&json!({"jsonrpc": "2.0", "method": "bogus"})).is_none());
    }

    #[test]
    fn lists_every_tool() {
        let (_dir, mut server) = server();
        let resp = server
            .handle_message(&json!({"jsonrpc": "2.0", "id": 2, "method": "tools/list"}))
            .unwrap();
        let names: Vec<&str> = resp["result"]["tools"]
            .as_array()
            .unwrap()
            .iter()
            .filter_map(|t| t["name"].as_str())
            .collect();
        assert_eq!(names.len(), 15);
        for expected in ["ipfs_add", "wal_process_pending", "pool_health_check", "cid_check", "kit_status"] {
            assert!(names.contains(&expected), "missing {}", expected);
        }
    }

    #[test]
    fn unknown_method_is_rpc_error() {
        let (_dir, mut server) = server();
        let resp = server
            .handle_message(&json!({"jsonrpc": "2.0", "id": 3, "method": "resources/list"}))
            .unwrap();
        assert_eq!(resp["error"]["code"], -32601);
        let ping = server.handle_message(&json!({"jsonrpc": "2.0", "id": 4, "method": "ping"})).unwrap();
        assert_eq!(ping["result"], json!({}));
    }

    #[test]
    fn wal_add_without_execute_then_get() {
        let (_dir, mut server) = server();
        let out = call(
            &mut server,
            "wal_add",
            json!({"operation_type": "pin", "parameters": {"cid": "bafyx"}, "execute": false}),
        );
        let op: WalOperation = serde_json::from_str(&out).unwrap();
        assert_eq!(op.status, OperationStatus::Pending);

        let fetched = call(&mut server, "wal_get", json!({"operation_id": op.operation_id}));
        assert!(fetched.contains("\"pending\""));

        let missing = call(&mut server, "wal_get", json!({"operation_id": "nope"}));
        assert!(missing.starts_with("ERROR"));
        assert_eq!(server.session().failure_count, 1);
        assert_eq!(server.session().call_count, 3);
    }

    #[test]
    fn wal_add_rejects_unknown_type() {
        let (_dir, mut server) = server();
        let out = call(&mut server, "wal_add", json!({"operation_type": "mkdir"}));
        assert!(out.starts_with("ERROR"));
    }

    #[test]
    fn failed_operation_surfaces_error_type() {
        let (_dir, mut server) = server();
        let out = call(&mut server, "ipfs_pin", json!({"cid": "not-a-cid"}));
        assert!(out.starts_with("ERROR: pin"));
        assert!(out.contains("InvalidParameters"));

        let list = call(&mut server, "wal_list", json!({"status": "failed"}));
        let parsed: Value = serde_json::from_str(&list).unwrap();
        assert_eq!(parsed["total"], 1);
    }

    #[test]
    fn cid_check_reports_recorded_cids() {
        let (_dir, mut server) = server();
        server.service.index.lock().unwrap().record("bafyseen");
        let out = call(&mut server, "cid_check", json!({"cid": "bafyseen"}));
        let parsed: Value = serde_json::from_str(&out).unwrap();
        assert_eq!(parsed["maybe_seen"], true);
        assert_eq!(parsed["estimated_count"], 1);
    }

    #[test]
    fn tool_calls_are_logged() {
        let (dir, mut server) = server();
        call(&mut server, "wal_stats", json!({}));
        call(&mut server, "no_such_tool", json!({}));
        let log = std::fs::read_to_string(dir.path().join("cmd.log")).unwrap();
        assert!(log.contains("CALL wal_stats"));
        assert!(log.contains("FAIL no_such_tool"));
    }
}
