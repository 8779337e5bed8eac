use hashchain_core::constants::{BLOCKS_TREE, HASH_SIZE, TIP_KEY};
use hashchain_core::{ChainError, ChainStore, Hash, Result};
use sled::transaction::{ConflictableTransactionError, TransactionError};
use sled::{Db, Tree};
use std::convert::Infallible;
use std::io;
use std::path::Path;
use std::thread;
use std::time::Duration;
use tracing::{debug, info, warn};

/// sled releases its file lock from background threads shortly after the last
/// handle is dropped, so an open right after a close can briefly see the lock
/// still held.
const LOCK_RETRY_START: Duration = Duration::from_millis(5);
const LOCK_RETRY_MAX: Duration = Duration::from_millis(200);
const LOCK_RETRY_ATTEMPTS: u32 = 20;

/// Layout: one tree, `BLOCKS_TREE`, holding `hash -> serialized block` plus
/// `TIP_KEY -> hash of the newest block`.
#[derive(Clone)]
pub struct SledStore {
  db: Db,
  blocks: Tree,
}

fn read_err(e: sled::Error) -> ChainError {
  ChainError::StorageRead(Box::new(e))
}

fn write_err(e: sled::Error) -> ChainError {
  ChainError::StorageWrite(Box::new(e))
}

fn is_lock_conflict(e: &sled::Error) -> bool {
  match e {
    sled::Error::Io(io) => {
      io.kind() == io::ErrorKind::WouldBlock || io.to_string().contains("could not acquire lock")
    }
    _ => false,
  }
}

fn open_db(path: &Path) -> sled::Result<Db> {
  let mut delay = LOCK_RETRY_START;
  let mut attempt = 1;
  loop {
    match sled::open(path) {
      Err(e) if attempt < LOCK_RETRY_ATTEMPTS && is_lock_conflict(&e) => {
        debug!(path = %path.display(), attempt, "database lock held, retrying");
        thread::sleep(delay);
        delay = (delay * 2).min(LOCK_RETRY_MAX);
        attempt += 1;
      }
      Err(e) => {
        if is_lock_conflict(&e) {
          warn!(path = %path.display(), attempt, "database lock still held, giving up");
        }
        return Err(e);
      }
      Ok(db) => return Ok(db),
    }
  }
}

impl SledStore {
  /// Open or create the database at `path`. A lock held by a handle that is
  /// still shutting down is waited out for a few seconds at most.
  pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
    let path = path.as_ref();
    let open_err = |e: sled::Error| ChainError::StorageOpen {
      path: path.to_path_buf(),
      source: Box::new(e),
    };
    let db = open_db(path).map_err(open_err)?;
    let blocks = db.open_tree(BLOCKS_TREE).map_err(open_err)?;
    info!(path = %path.display(), "sled store opened");
    Ok(Self { db, blocks })
  }

  /// The raw blocks tree, for tooling that inspects the persisted layout.
  pub fn blocks(&self) -> &Tree {
    &self.blocks
  }
}

impl ChainStore for SledStore {
  fn get_block(&self, hash: &Hash) -> Result<Option<Vec<u8>>> {
    Ok(self.blocks.get(hash).map_err(read_err)?.map(|v| v.to_vec()))
  }

  fn tip(&self) -> Result<Option<Hash>> {
    match self.blocks.get(TIP_KEY).map_err(read_err)? {
      None => Ok(None),
      Some(v) => Hash::try_from(&v[..]).map(Some).map_err(|_| {
        ChainError::StorageRead(
          format!("tip pointer is {} bytes, expected {HASH_SIZE}", v.len()).into(),
        )
      }),
    }
  }

  fn is_empty(&self) -> Result<bool> {
    Ok(self.blocks.is_empty())
  }

  fn commit(&self, hash: &Hash, block: &[u8]) -> Result<()> {
    let result = self.blocks.transaction(|tx| {
      tx.insert(&hash[..], block)?;
      tx.insert(TIP_KEY, &hash[..])?;
      Ok::<_, ConflictableTransactionError<Infallible>>(())
    });
    match result {
      Ok(()) => {}
      Err(TransactionError::Abort(never)) => match never {},
      Err(TransactionError::Storage(e)) => return Err(write_err(e)),
    }
    debug!(bytes = block.len(), "block committed");
    Ok(())
  }

  fn flush(&self) -> Result<()> {
    self.db.flush().map_err(write_err)?;
    Ok(())
  }

  fn close(&self) -> Result<()> {
    self.db.flush().map_err(write_err)?;
    info!("sled store closed");
    Ok(())
  }
}
