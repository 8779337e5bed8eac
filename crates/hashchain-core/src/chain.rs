use crate::{Block, ChainError, Hash, ProofOfWork, Result};
use std::iter::FusedIterator;
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use tracing::{debug, info, warn};

/// Trait the storage backends implement for the chain to operate.
/// This lives in `hashchain-core` to avoid a circular dependency.
pub trait ChainStore: Send + Sync {
    /// Serialized block stored under `hash`, if any.
    fn get_block(&self, hash: &Hash) -> Result<Option<Vec<u8>>>;

    /// The persisted tip pointer.
    fn tip(&self) -> Result<Option<Hash>>;

    fn is_empty(&self) -> Result<bool>;

    /// Store `block` under `hash` and move the tip pointer to `hash` in a
    /// single atomic write. Either both become visible or neither does.
    fn commit(&self, hash: &Hash, block: &[u8]) -> Result<()>;

    /// Make committed writes durable.
    fn flush(&self) -> Result<()>;

    fn close(&self) -> Result<()>;
}

/// Append-only chain façade over a `ChainStore`.
///
/// The tip is cached in memory and only ever advanced after the store has
/// committed the block it points at.
pub struct Chain<S: ChainStore> {
    store: Arc<S>,
    pow: ProofOfWork,
    tip: RwLock<Hash>,
    append_lock: Mutex<()>,
}

impl<S: ChainStore> Chain<S> {
    /// Resume the chain held by `store`, or mine and commit a genesis block
    /// if the store is empty.
    pub fn open(store: S, pow: ProofOfWork) -> Result<Self> {
        let tip = match store.tip()? {
            Some(tip) => {
                info!(tip = %hex::encode(tip), "resuming chain");
                tip
            }
            None if store.is_empty()? => {
                let genesis = Block::genesis(&pow)?;
                store.commit(genesis.hash(), &genesis.to_bytes()?)?;
                store.flush().map_err(|err| flush_err(genesis.hash(), err))?;
                info!(hash = %hex::encode(genesis.hash()), "created genesis block");
                *genesis.hash()
            }
            None => {
                return Err(ChainError::StorageRead(
                    "blocks are stored but the tip pointer is missing".into(),
                ))
            }
        };

        Ok(Self {
            store: Arc::new(store),
            pow,
            tip: RwLock::new(tip),
            append_lock: Mutex::new(()),
        })
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn pow(&self) -> &ProofOfWork {
        &self.pow
    }

    /// Raising this flag aborts an append that is mining.
    pub fn cancel_handle(&self) -> Arc<AtomicBool> {
        self.pow.cancel_handle()
    }

    /// Hash of the most recently committed block. Never touches the store.
    pub fn tip(&self) -> Hash {
        *self.tip.read().unwrap_or_else(PoisonError::into_inner)
    }

    /// Mine `payload` on top of the current tip and commit it.
    ///
    /// Appends are serialized: a second caller waits until the first one has
    /// committed or failed. If the commit fails the mined block is dropped and
    /// the tip stays where it was. If only the flush after a successful commit
    /// fails, the block is already the tip and `StorageFlush` is returned.
    pub fn append(&self, payload: impl Into<Vec<u8>>) -> Result<Hash> {
        let _guard = self
            .append_lock
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        let block = Block::new(payload, Some(self.tip()), &self.pow)?;
        let bytes = block.to_bytes()?;
        if let Err(err) = self.store.commit(block.hash(), &bytes) {
            warn!(hash = %hex::encode(block.hash()), error = %err, "commit failed");
            return Err(err);
        }

        let hash = *block.hash();
        *self.tip.write().unwrap_or_else(PoisonError::into_inner) = hash;
        if let Err(err) = self.store.flush() {
            warn!(hash = %hex::encode(hash), error = %err, "flush after commit failed");
            return Err(flush_err(&hash, err));
        }
        info!(
            hash = %hex::encode(hash),
            nonce = block.nonce(),
            payload_len = block.payload().len(),
            "appended block"
        );
        Ok(hash)
    }

    /// Walk from the current tip back to genesis.
    pub fn iter(&self) -> ChainIterator<S> {
        ChainIterator {
            store: Arc::clone(&self.store),
            current: Some(self.tip()),
        }
    }

    /// Check every block from the tip down to genesis against the
    /// proof-of-work rule. Returns the number of blocks.
    pub fn verify(&self) -> Result<usize> {
        let mut count = 0;
        for block in self.iter() {
            let block = block?;
            if !self.pow.validate(&block) {
                return Err(ChainError::InvalidBlock(hex::encode(block.hash())));
            }
            count += 1;
        }
        Ok(count)
    }

    /// Flush and release the backing store.
    ///
    /// Iterators hold their own handle on the store, so the underlying
    /// database stays open until the last of them is dropped as well.
    pub fn close(self) -> Result<()> {
        let handles = Arc::strong_count(&self.store);
        if handles > 1 {
            warn!(handles, "closing chain while iterators still hold the store");
        }
        info!(tip = %hex::encode(self.tip()), "closing chain");
        self.store.close()
    }
}

fn flush_err(hash: &Hash, err: ChainError) -> ChainError {
    let source = match err {
        ChainError::StorageWrite(source) => source,
        other => Box::new(other),
    };
    ChainError::StorageFlush {
        hash: hex::encode(hash),
        source,
    }
}

/// Cursor over the chain from a fixed starting block back to genesis.
///
/// Yields `None` once genesis has been returned. A missing or undecodable
/// block is reported as an error, after which the iterator is exhausted.
pub struct ChainIterator<S: ChainStore> {
    store: Arc<S>,
    current: Option<Hash>,
}

impl<S: ChainStore> ChainIterator<S> {
    fn load(&self, hash: &Hash) -> Result<Block> {
        let bytes = self
            .store
            .get_block(hash)?
            .ok_or_else(|| ChainError::MissingBlock(hex::encode(hash)))?;
        let block = Block::from_bytes(&bytes)?;
        if block.hash() != hash {
            return Err(ChainError::StorageRead(
                format!(
                    "block stored under {} has hash {}",
                    hex::encode(hash),
                    hex::encode(block.hash())
                )
                .into(),
            ));
        }
        Ok(block)
    }
}

impl<S: ChainStore> Iterator for ChainIterator<S> {
    type Item = Result<Block>;

    fn next(&mut self) -> Option<Self::Item> {
        let hash = self.current.take()?;
        debug!(hash = %hex::encode(hash), "loading block");
        let result = self.load(&hash);
        if let Ok(block) = &result {
            self.current = block.prev_hash().copied();
        }
        Some(result)
    }
}

impl<S: ChainStore> FusedIterator for ChainIterator<S> {}
