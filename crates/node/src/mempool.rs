//! Reference mempool: novelty and sanity gatekeeping only.  Fee policy and
//! eviction belong to the real engine outside this repository's scope.

use std::collections::HashMap;
use std::sync::Arc;

use codec::Hash256;
use consensus::params;
use p2p::MempoolService;
use parking_lot::Mutex;
use tracing::debug;
use tx::Transaction;

pub struct Mempool {
    txs: Mutex<HashMap<Hash256, Arc<Transaction>>>,
    capacity: usize,
}

impl Mempool {
    pub fn new(capacity: usize) -> Self {
        Self {
            txs: Mutex::new(HashMap::new()),
            capacity,
        }
    }

    pub fn size(&self) -> usize {
        self.txs.lock().len()
    }

    pub fn contains(&self, hash: &Hash256) -> bool {
        self.txs.lock().contains_key(hash)
    }

    /// Drop transactions confirmed by an admitted block.
    pub fn remove_confirmed(&self, hashes: &[Hash256]) {
        let mut txs = self.txs.lock();
        for hash in hashes {
            txs.remove(hash);
        }
    }
}

impl MempoolService for Mempool {
    fn receive_tx(&self, tx: Arc<Transaction>) -> bool {
        if tx
            .outputs()
            .iter()
            .any(|output| output.value > params().max_money)
        {
            debug!(tx = %tx.finalize_hash(), "output exceeds max money");
            return false;
        }
        let hash = tx.finalize_hash();
        let mut txs = self.txs.lock();
        if txs.len() >= self.capacity {
            debug!(tx = %hash, "mempool full");
            return false;
        }
        txs.insert(hash, tx).is_none()
    }
}
