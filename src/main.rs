// IPFS Kit Core - Main Entry Point
// Copyright 2026 Joseph Stone - All Rights Reserved
//
// CLI and MCP stdio server. Storage operations are journaled in the WAL.
// Usage:
//   ipfs-kit serve                              # Run MCP server (stdio)
//   ipfs-kit status                             # Pool, WAL and CID index status
//   ipfs-kit add <path> | --content <text>      # Add content
//   ipfs-kit get <cid> [--output <file>]        # Fetch content
//   ipfs-kit pin <cid> / unpin <cid>            # Manage pins
//   ipfs-kit wal-list [--status pending]        # Inspect the WAL
//   ipfs-kit wal-replay                         # Execute pending operations
//   ipfs-kit config-init                        # Write default config.json

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use ipfs_kit_core::{
    config::KitConfig,
    mcp::{self, KitServer},
    paths,
    service::KitService,
    wal::{Backend, OperationStatus, OperationType, WalOperation},
};
use serde_json::{json, Map, Value};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "ipfs-kit")]
#[command(author = "Joseph Stone")]
#[command(version)]
#[command(about = "IPFS Kit - WAL-journaled IPFS storage with pooled connections and CID sketches")]
struct Cli {
    /// LMDB storage directory (state/KIT.DB)
    #[arg(short, long, default_value_os_t = paths::storage_dir())]
    storage: PathBuf,

    /// Config file (config.json)
    #[arg(short, long, default_value_os_t = paths::config_file())]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run MCP server (stdio JSON-RPC)
    Serve,

    /// Show pool, WAL and CID index status
    Status,

    /// Add a file or inline content
    Add {
        /// Local file to add
        #[arg(required_unless_present = "content", conflicts_with = "content")]
        path: Option<PathBuf>,

        /// Inline content instead of a file
        #[arg(long)]
        content: Option<String>,

        /// Name recorded for the file
        #[arg(long)]
        filename: Option<String>,

        /// Do not pin after adding
        #[arg(long)]
        no_pin: bool,
    },

    /// Fetch content by CID
    Get {
        cid: String,

        /// Write to this file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Pin a CID
    Pin { cid: String },

    /// Remove a pin
    Unpin { cid: String },

    /// List WAL operations, oldest first
    WalList {
        /// pending | completed | failed
        #[arg(long)]
        status: Option<OperationStatus>,

        #[arg(long, default_value_t = 50)]
        limit: usize,
    },

    /// Show one WAL operation
    WalGet { operation_id: String },

    /// Execute one PENDING operation
    WalExecute { operation_id: String },

    /// Execute every PENDING operation
    WalReplay,

    /// WAL counts by status and type
    WalStats,

    /// Delete terminal operations older than N days
    WalPrune {
        /// Defaults to wal.retention_days
        #[arg(long)]
        days: Option<i64>,
    },

    /// Run a pool health check now
    PoolCheck,

    /// Write a default config.json
    ConfigInit {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },

    /// Print the effective config
    ConfigShow,
}

fn one_line(op: &WalOperation) -> String {
    let outcome = match op.status {
        OperationStatus::Failed => op.error.clone().unwrap_or_default(),
        _ => op.result.as_ref().map(|r| r.to_string()).unwrap_or_default(),
    };
    let outcome: String = outcome.chars().take(80).collect();
    format!(
        "{}  {:<9} {:<6} {:<8} {}  {}",
        op.operation_id,
        op.status,
        op.operation_type,
        op.backend,
        op.created_at.format("%Y-%m-%d %H:%M:%S"),
        outcome
    )
}

/// Submit, execute and print one operation. Failed operations exit 1.
fn run_operation(service: &KitService, operation_type: OperationType, params: Map<String, Value>) -> Result<()> {
    let op = service.submit(operation_type, Backend::Ipfs, params, true)?;
    service.save_index()?;

    if op.status == OperationStatus::Failed {
        eprintln!(
            "{} failed ({}): {}",
            op.operation_type,
            op.error_type.as_deref().unwrap_or("HandlerError"),
            op.error.as_deref().unwrap_or("unknown error")
        );
        eprintln!("Operation: {}", op.operation_id);
        std::process::exit(1);
    }

    let result = op.result.unwrap_or(Value::Null);
    if operation_type == OperationType::Get && result.get("output_path").is_none() {
        if let Some(content) = result.get("content").and_then(|v| v.as_str()) {
            print!("{}", content);
            if result["truncated"].as_bool().unwrap_or(false) {
                eprintln!("\n[truncated at {} bytes, use --output]", result["size"]);
            }
            return Ok(());
        }
    }
    println!("{}", serde_json::to_string_pretty(&result)?);
    println!("Operation: {}", op.operation_id);
    Ok(())
}

fn params(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}

fn main() -> Result<()> {
    // Initialize logging (safe if already init)
    let _ = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).try_init();

    let cli = Cli::parse();

    // Config commands run before anything opens LMDB
    match &cli.command {
        Commands::ConfigInit { force } => {
            if cli.config.exists() && !force {
                anyhow::bail!("{:?} already exists (use --force to overwrite)", cli.config);
            }
            KitConfig::default()
                .save(&cli.config)
                .with_context(|| format!("Failed to write config {:?}", cli.config))?;
            println!("Wrote default config to {:?}", cli.config);
            return Ok(());
        }
        Commands::ConfigShow => {
            let config = KitConfig::load(&cli.config)
                .with_context(|| format!("Failed to load config {:?}", cli.config))?;
            println!("# {:?}", cli.config);
            println!("{}", serde_json::to_string_pretty(&config)?);
            return Ok(());
        }
        _ => {}
    }

    let config = KitConfig::load(&cli.config)
        .with_context(|| format!("Failed to load config {:?}", cli.config))?;
    let service = KitService::open(config, &cli.storage)?;

    match cli.command {
        Commands::Serve => {
            let server = KitServer::new(service).with_command_log(paths::command_log());
            // Blocks until stdin closes
            mcp::run(server);
        }

        Commands::Status => {
            let status = service.status()?;
            println!("IPFS Kit v{}", status.version);
            println!("API:     {}", status.api_url);
            println!("Storage: {:?}", cli.storage);
            println!();
            println!(
                "Pool:    {}/{} connections ({} in use, {} idle, {} degraded)",
                status.pool.total, status.pool.max_connections, status.pool.in_use, status.pool.idle, status.pool.degraded
            );
            println!(
                "WAL:     {} total | {} pending | {} completed | {} failed",
                status.wal.total, status.wal.pending, status.wal.completed, status.wal.failed
            );
            println!(
                "CIDs:    {} recorded | ~{} distinct | bloom fill {:.2}%",
                status.cid_index.records,
                status.cid_index.distinct_estimate,
                status.cid_index.bloom_fill_ratio * 100.0
            );
            match service.storage.load_session()? {
                Some(session) => println!("Session: {}", session.status_summary()),
                None => println!("Session: none"),
            }
        }

        Commands::Add { path, content, filename, no_pin } => {
            let mut p = json!({"pin": !no_pin});
            if let Some(content) = content {
                p["content"] = json!(content);
            } else if let Some(path) = path {
                let abs = std::fs::canonicalize(&path).with_context(|| format!("No such file {:?}", path))?;
                p["path"] = json!(abs.to_string_lossy());
            }
            if let Some(name) = filename {
                p["filename"] = json!(name);
            }
            run_operation(&service, OperationType::Add, params(p))?;
        }

        Commands::Get { cid, output } => {
            let mut p = json!({"cid": cid});
            if let Some(out) = output {
                p["output_path"] = json!(out.to_string_lossy());
            }
            run_operation(&service, OperationType::Get, params(p))?;
        }

        Commands::Pin { cid } => {
            run_operation(&service, OperationType::Pin, params(json!({"cid": cid})))?;
        }

        Commands::Unpin { cid } => {
            run_operation(&service, OperationType::Unpin, params(json!({"cid": cid})))?;
        }

        Commands::WalList { status, limit } => {
            let ops = service.wal.list_operations(status)?;
            if ops.is_empty() {
                println!("No operations.");
            }
            for op in ops.iter().take(limit) {
                println!("{}", one_line(op));
            }
            if ops.len() > limit {
                println!("... {} more", ops.len() - limit);
            }
        }

        Commands::WalGet { operation_id } => {
            let op = service.wal.get_operation(&operation_id)?;
            println!("{}", serde_json::to_string_pretty(&op)?);
        }

        Commands::WalExecute { operation_id } => {
            let op = service.wal.execute_operation(&operation_id)?;
            service.save_index()?;
            println!("{}", serde_json::to_string_pretty(&op)?);
            if op.status == OperationStatus::Failed {
                std::process::exit(1);
            }
        }

        Commands::WalReplay => {
            let summary = service.replay()?;
            service.save_index()?;
            println!(
                "Replay: {} completed, {} failed, {} skipped (no handler)",
                summary.completed, summary.failed, summary.skipped
            );
        }

        Commands::WalStats => {
            println!("{}", serde_json::to_string_pretty(&service.wal.stats()?)?);
        }

        Commands::WalPrune { days } => {
            let days = days.unwrap_or(service.config.wal.retention_days);
            if days < 0 {
                anyhow::bail!("--days must be >= 0");
            }
            let age = chrono::Duration::try_days(days)
                .with_context(|| format!("--days {} is out of range", days))?;
            let removed = service.wal.prune(age)?;
            println!("Pruned {} terminal operation(s) older than {} day(s).", removed, days);
        }

        Commands::PoolCheck => {
            let report = service.pool.run_health_check();
            println!("{}", serde_json::to_string_pretty(&report)?);
            println!("{}", serde_json::to_string_pretty(&service.pool.status())?);
        }

        Commands::ConfigInit { .. } | Commands::ConfigShow => {}
    }

    Ok(())
}
