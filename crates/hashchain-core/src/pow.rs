use crate::constants::{MAX_NONCE, NONCE_CHUNK};
use crate::{be_bytes, Block, ChainError, Hash, Result};
use rayon::prelude::*;
use sha2::{Digest, Sha256};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info};

/// Hashcash-style puzzle: a block is admitted when
/// `sha256(prev_hash ‖ payload ‖ timestamp ‖ target_bits ‖ nonce)`, read as a
/// big-endian 256-bit integer, is strictly below `2^(256 - target_bits)`.
///
/// Cloning shares the cancel flag, so a clone handed to another thread can
/// stop a mine in progress.
#[derive(Clone, Debug)]
pub struct ProofOfWork {
    target_bits: u32,
    target: Hash,
    max_nonce: i64,
    cancel: Arc<AtomicBool>,
}

enum Outcome {
    Found(i64, Hash),
    Cancelled,
}

impl ProofOfWork {
    pub fn new(target_bits: u32) -> Result<Self> {
        if !(1..=255).contains(&target_bits) {
            return Err(ChainError::InvalidTargetBits(target_bits));
        }
        Ok(Self {
            target_bits,
            target: target_for(target_bits),
            max_nonce: MAX_NONCE,
            cancel: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Bound the search to nonces below `max_nonce` (default `i64::MAX`).
    pub fn with_max_nonce(mut self, max_nonce: i64) -> Self {
        self.max_nonce = max_nonce.max(0);
        self
    }

    pub fn max_nonce(&self) -> i64 {
        self.max_nonce
    }

    pub fn target_bits(&self) -> u32 {
        self.target_bits
    }

    /// `2^(256 - target_bits)` as 32 big-endian bytes.
    pub fn target(&self) -> &Hash {
        &self.target
    }

    /// Flag checked on every nonce attempt. Once raised it stays raised and
    /// every later `mine` fails with [`ChainError::MiningCancelled`].
    pub fn cancel_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel)
    }

    pub fn cancel(&self) {
        self.cancel.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.load(Ordering::Relaxed)
    }

    /// Threshold check only. Big-endian byte arrays order the same way as the
    /// integers they encode.
    pub fn meets_target(&self, hash: &Hash) -> bool {
        hash < &self.target
    }

    fn prefix(&self, prev_hash: Option<&Hash>, payload: &[u8], timestamp: i64) -> Sha256 {
        let mut hasher = Sha256::new();
        if let Some(prev) = prev_hash {
            hasher.update(prev);
        }
        hasher.update(payload);
        hasher.update(be_bytes(timestamp));
        hasher.update(be_bytes(i64::from(self.target_bits)));
        hasher
    }

    pub fn hash_with_nonce(
        &self,
        prev_hash: Option<&Hash>,
        payload: &[u8],
        timestamp: i64,
        nonce: i64,
    ) -> Hash {
        self.prefix(prev_hash, payload, timestamp)
            .chain_update(be_bytes(nonce))
            .finalize()
            .into()
    }

    /// Search nonces from 0 upward and return the smallest one whose hash
    /// meets the target, along with that hash.
    ///
    /// The range is cut into chunks of `NONCE_CHUNK` nonces spread across the
    /// rayon pool; each chunk is scanned in order and `find_map_first` keeps
    /// the result identical to a sequential scan. Cancellation wins: once the
    /// flag is seen, a lower chunk that stops early reports `MiningCancelled`
    /// even if a higher chunk already holds a solution.
    pub fn mine(
        &self,
        prev_hash: Option<&Hash>,
        payload: &[u8],
        timestamp: i64,
    ) -> Result<(i64, Hash)> {
        let base = self.prefix(prev_hash, payload, timestamp);
        let attempts = AtomicU64::new(0);
        let chunks = self.max_nonce / NONCE_CHUNK + i64::from(self.max_nonce % NONCE_CHUNK != 0);

        debug!(
            target_bits = self.target_bits,
            payload_len = payload.len(),
            "mining block"
        );

        let outcome = (0..chunks).into_par_iter().find_map_first(|chunk| {
            let start = chunk * NONCE_CHUNK;
            let end = start.saturating_add(NONCE_CHUNK).min(self.max_nonce);
            let mut tried = 0u64;
            let mut outcome = None;
            for nonce in start..end {
                if self.is_cancelled() {
                    outcome = Some(Outcome::Cancelled);
                    break;
                }
                tried += 1;
                let hash: Hash = base.clone().chain_update(be_bytes(nonce)).finalize().into();
                if self.meets_target(&hash) {
                    outcome = Some(Outcome::Found(nonce, hash));
                    break;
                }
            }
            let done = attempts.fetch_add(tried, Ordering::Relaxed) + tried;
            if outcome.is_none() {
                debug!(attempts = done, "mining in progress");
            }
            outcome
        });

        match outcome {
            Some(Outcome::Found(nonce, hash)) => {
                info!(
                    nonce,
                    hash = %hex::encode(hash),
                    leading_zeros = count_leading_zero_bits(&hash),
                    attempts = attempts.load(Ordering::Relaxed),
                    "mined block"
                );
                Ok((nonce, hash))
            }
            Some(Outcome::Cancelled) => Err(ChainError::MiningCancelled),
            None => Err(ChainError::MiningExhausted {
                target_bits: self.target_bits,
            }),
        }
    }

    /// Recompute the block's hash from its stored fields and nonce. The block
    /// is valid when that hash meets the target and equals the stored hash.
    pub fn validate(&self, block: &Block) -> bool {
        let hash = self.hash_with_nonce(
            block.prev_hash(),
            block.payload(),
            block.timestamp(),
            block.nonce(),
        );
        self.meets_target(&hash) && &hash == block.hash()
    }
}

/// `2^(256 - bits)` big-endian; `bits` must be in `1..=255`.
fn target_for(bits: u32) -> Hash {
    let mut target = [0u8; 32];
    let bit = (256 - bits) as usize;
    target[31 - bit / 8] = 1 << (bit % 8);
    target
}

pub fn count_leading_zero_bits(hash: &Hash) -> u32 {
    let mut total = 0u32;
    for b in hash {
        if *b == 0 {
            total += 8;
        } else {
            total += b.leading_zeros();
            break;
        }
    }
    total
}
