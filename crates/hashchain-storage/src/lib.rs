pub mod sled_store;

pub use sled_store::SledStore;

use hashchain_core::{Chain, ChainConfig, ChainStore, ProofOfWork, Result};
use tracing::warn;

/// Open the sled-backed chain described by `config`, mining a genesis block
/// if the database is new. The store is closed again if the chain cannot be
/// opened on top of it.
pub fn open_chain(config: &ChainConfig) -> Result<Chain<SledStore>> {
    let pow = ProofOfWork::new(config.target_bits)?;
    let store = SledStore::open(&config.storage_path)?;
    let handle = store.clone();
    Chain::open(store, pow).map_err(|err| {
        if let Err(close_err) = handle.close() {
            warn!(error = %close_err, "closing store after failed open");
        }
        err
    })
}
