pub mod chain;
pub mod constants;
pub mod error;
pub mod pow;

use bincode::Options;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

pub use chain::{Chain, ChainIterator, ChainStore};
pub use error::{ChainError, Result};
pub use pow::ProofOfWork;

pub type Hash = [u8; constants::HASH_SIZE];

/// Big-endian two's-complement bytes of `n`.
pub fn be_bytes(n: i64) -> [u8; 8] {
    n.to_be_bytes()
}

/// Settings a chain is opened with.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChainConfig {
    pub target_bits: u32,
    pub storage_path: PathBuf,
}

impl Default for ChainConfig {
    fn default() -> Self {
        Self {
            target_bits: constants::TARGET_BITS,
            storage_path: PathBuf::from(constants::DEFAULT_DB_PATH),
        }
    }
}

impl ChainConfig {
    pub fn new(storage_path: impl Into<PathBuf>) -> Self {
        Self {
            storage_path: storage_path.into(),
            ..Self::default()
        }
    }

    pub fn with_target_bits(mut self, target_bits: u32) -> Self {
        self.target_bits = target_bits;
        self
    }
}

/// An immutable, mined block. Fields are fixed at construction; the only way
/// to get one is to mine it or to decode a stored one.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    timestamp: i64,
    payload: Vec<u8>,
    prev_hash: Option<Hash>,
    hash: Hash,
    nonce: i64,
}

fn codec() -> impl Options {
    bincode::DefaultOptions::new()
        .with_fixint_encoding()
        .reject_trailing_bytes()
}

fn now_unix() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| i64::try_from(d.as_secs()).unwrap_or(i64::MAX))
        .unwrap_or_default()
}

impl Block {
    /// Stamps the current time and mines the block on top of `prev_hash`.
    /// Blocks the calling thread until a nonce is found.
    pub fn new(
        payload: impl Into<Vec<u8>>,
        prev_hash: Option<Hash>,
        pow: &ProofOfWork,
    ) -> Result<Self> {
        Self::mine_at(payload.into(), prev_hash, now_unix(), pow)
    }

    /// The first block of every chain: fixed payload, no predecessor.
    pub fn genesis(pow: &ProofOfWork) -> Result<Self> {
        Self::new(constants::GENESIS_PAYLOAD, None, pow)
    }

    pub(crate) fn mine_at(
        payload: Vec<u8>,
        prev_hash: Option<Hash>,
        timestamp: i64,
        pow: &ProofOfWork,
    ) -> Result<Self> {
        let (nonce, hash) = pow.mine(prev_hash.as_ref(), &payload, timestamp)?;
        Ok(Self {
            timestamp,
            payload,
            prev_hash,
            hash,
            nonce,
        })
    }

    pub fn timestamp(&self) -> i64 {
        self.timestamp
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    pub fn prev_hash(&self) -> Option<&Hash> {
        self.prev_hash.as_ref()
    }

    pub fn hash(&self) -> &Hash {
        &self.hash
    }

    pub fn nonce(&self) -> i64 {
        self.nonce
    }

    pub fn is_genesis(&self) -> bool {
        self.prev_hash.is_none()
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        codec().serialize(self).map_err(ChainError::Encoding)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        codec().deserialize(bytes).map_err(ChainError::Decoding)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pow() -> ProofOfWork {
        ProofOfWork::new(8).unwrap()
    }

    #[test]
    fn be_bytes_examples() {
        assert_eq!(be_bytes(0), [0u8; 8]);
        assert_eq!(be_bytes(1), [0, 0, 0, 0, 0, 0, 0, 1]);
        assert_eq!(be_bytes(15), [0, 0, 0, 0, 0, 0, 0, 0x0f]);
        assert_eq!(be_bytes(0x0102_0304_0506_0708), [1, 2, 3, 4, 5, 6, 7, 8]);
        assert_eq!(be_bytes(-1), [0xff; 8]);
        assert_eq!(be_bytes(i64::MIN), [0x80, 0, 0, 0, 0, 0, 0, 0]);
    }

    #[test]
    fn genesis_block_example() {
        let genesis = Block::genesis(&pow()).unwrap();
        assert_eq!(genesis.payload(), b"Genesis Block");
        assert!(genesis.prev_hash().is_none());
        assert!(genesis.is_genesis());
        assert!(genesis.timestamp() > 0);
        assert!(pow().validate(&genesis));
    }

    #[test]
    fn new_block_links_to_predecessor() {
        let pow = pow();
        let genesis = Block::genesis(&pow).unwrap();
        let block = Block::new("a", Some(*genesis.hash()), &pow).unwrap();
        assert_eq!(block.prev_hash(), Some(genesis.hash()));
        assert!(!block.is_genesis());
        assert_ne!(block.hash(), genesis.hash());
    }

    #[test]
    fn block_hash_is_sha256_of_fields() {
        use sha2::{Digest, Sha256};

        let pow = pow();
        let prev = [7u8; 32];
        let block = Block::mine_at(b"payload".to_vec(), Some(prev), 1_600_000_000, &pow).unwrap();

        let mut hasher = Sha256::new();
        hasher.update(prev);
        hasher.update(b"payload");
        hasher.update(1_600_000_000i64.to_be_bytes());
        hasher.update(8i64.to_be_bytes());
        hasher.update(block.nonce().to_be_bytes());
        let expected: Hash = hasher.finalize().into();
        assert_eq!(block.hash(), &expected);
    }

    #[test]
    fn serialization_round_trip() {
        let pow = pow();
        let genesis = Block::genesis(&pow).unwrap();
        let block = Block::new(vec![0u8, 255, 1, 254], Some(*genesis.hash()), &pow).unwrap();

        for b in [genesis, block] {
            let bytes = b.to_bytes().unwrap();
            let decoded = Block::from_bytes(&bytes).unwrap();
            assert_eq!(decoded.timestamp(), b.timestamp());
            assert_eq!(decoded.payload(), b.payload());
            assert_eq!(decoded.prev_hash(), b.prev_hash());
            assert_eq!(decoded.hash(), b.hash());
            assert_eq!(decoded.nonce(), b.nonce());
            assert_eq!(decoded, b);
        }
    }

    #[test]
    fn empty_payload_round_trip() {
        let pow = pow();
        let block = Block::new(Vec::new(), Some([1u8; 32]), &pow).unwrap();
        let decoded = Block::from_bytes(&block.to_bytes().unwrap()).unwrap();
        assert!(decoded.payload().is_empty());
        assert_eq!(decoded, block);
    }

    #[test]
    fn truncated_bytes_fail_to_decode() {
        let block = Block::new("truncate me", Some([3u8; 32]), &pow()).unwrap();
        let bytes = block.to_bytes().unwrap();
        for len in [0, 1, 8, bytes.len() / 2, bytes.len() - 1] {
            let err = Block::from_bytes(&bytes[..len]).unwrap_err();
            assert!(matches!(err, ChainError::Decoding(_)), "len {len}: {err:?}");
        }
    }

    #[test]
    fn trailing_bytes_fail_to_decode() {
        let block = Block::genesis(&pow()).unwrap();
        let mut bytes = block.to_bytes().unwrap();
        bytes.push(0);
        assert!(matches!(
            Block::from_bytes(&bytes),
            Err(ChainError::Decoding(_))
        ));
    }

    #[test]
    fn foreign_bytes_fail_to_decode() {
        assert!(matches!(
            Block::from_bytes(b"definitely not a block"),
            Err(ChainError::Decoding(_))
        ));
    }

    #[test]
    fn default_config() {
        let config = ChainConfig::default();
        assert_eq!(config.target_bits, 15);
        assert_eq!(config.storage_path, PathBuf::from("blockchain.db"));

        let config = ChainConfig::new("/tmp/chain").with_target_bits(4);
        assert_eq!(config.target_bits, 4);
        assert_eq!(config.storage_path, PathBuf::from("/tmp/chain"));
    }
}
