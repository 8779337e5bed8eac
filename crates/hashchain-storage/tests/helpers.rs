#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};

use hashchain_core::{Chain, ChainConfig};
use hashchain_storage::{open_chain, SledStore};
use tempfile::{tempdir, TempDir};

/// Low enough that every append mines in a few hundred attempts.
pub const TEST_TARGET_BITS: u32 = 8;

pub fn create_temp_dir() -> (TempDir, PathBuf) {
    // Create a temporary directory for the sled database
    let temp_dir = tempdir().expect("Failed to create temp dir");
    let db_path = temp_dir.path().join("blockchain.db");
    (temp_dir, db_path)
}

pub fn test_config(db_path: &Path) -> ChainConfig {
    ChainConfig::new(db_path).with_target_bits(TEST_TARGET_BITS)
}

pub fn create_temp_chain() -> (TempDir, PathBuf, Chain<SledStore>) {
    let (temp_dir, db_path) = create_temp_dir();
    let chain = open_chain(&test_config(&db_path)).expect("Failed to open chain");
    (temp_dir, db_path, chain)
}

/// Payloads from tip to genesis, as strings.
pub fn payloads(chain: &Chain<SledStore>) -> anyhow::Result<Vec<String>> {
    chain
        .iter()
        .map(|block| -> anyhow::Result<String> {
            Ok(String::from_utf8(block?.payload().to_vec())?)
        })
        .collect()
}

pub fn remove_temp_dir(temp_dir: TempDir) {
    let dir = temp_dir.path().to_path_buf();
    temp_dir.close().expect("Failed to delete temp dir");
    let _ = fs::remove_dir_all(&dir);
    // Verify the directory is removed
    assert!(!dir.exists(), "Database directory should be removed");
}
