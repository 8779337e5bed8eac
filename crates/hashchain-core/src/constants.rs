pub const HASH_SIZE: usize = 32;
pub const TARGET_BITS: u32 = 15;
pub const MAX_NONCE: i64 = i64::MAX;
pub const NONCE_CHUNK: i64 = 1 << 16;
pub const GENESIS_PAYLOAD: &str = "Genesis Block";
pub const DEFAULT_DB_PATH: &str = "blockchain.db";
pub const BLOCKS_TREE: &str = "block";
pub const TIP_KEY: &[u8] = b"l";
