// IPFS Kit Core - Path Resolution
// Copyright 2026 Joseph Stone - All Rights Reserved
//
// Single source of truth for kit home resolution. Everything the service
// persists (config.json, the LMDB store, the command log) lives under it.
// Cached via OnceLock.

use std::path::{Path, PathBuf};
use std::sync::OnceLock;

static KIT_HOME_CACHE: OnceLock<PathBuf> = OnceLock::new();

/// Directory name used under $HOME
pub const KIT_DIR_NAME: &str = ".ipfs_kit";

/// Resolve the kit home directory.
///
/// Resolution order:
///   1. IPFS_KIT_HOME environment variable
///   2. HOME env + /.ipfs_kit
///   3. Current directory + /.ipfs_kit
pub fn kit_home() -> &'static Path {
    KIT_HOME_CACHE.get_or_init(|| {
        if let Ok(home) = std::env::var("IPFS_KIT_HOME") {
            if !home.is_empty() {
                return PathBuf::from(home);
            }
        }

        if let Ok(home) = std::env::var("HOME") {
            return PathBuf::from(home).join(KIT_DIR_NAME);
        }

        log::warn!("HOME not set, using ./{} as kit home", KIT_DIR_NAME);
        PathBuf::from(".").join(KIT_DIR_NAME)
    })
}

pub fn config_file() -> PathBuf {
    kit_home().join("config.json")
}

/// LMDB environment for WAL operations, sketches and server session
pub fn storage_dir() -> PathBuf {
    kit_home().join("state/KIT.DB")
}

pub fn command_log() -> PathBuf {
    kit_home().join("logs/cmd.log")
}
