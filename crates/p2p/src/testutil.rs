//! Shared mocks for unit tests.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use codec::{Encodable as _, Hash256};
use consensus::{Block, Milestone};
use num_bigint::BigUint;
use parking_lot::Mutex;
use tx::Transaction;

use crate::services::{BlockAdmission, DagService, MempoolService};

pub(crate) struct MockDag {
    known: Mutex<HashSet<Hash256>>,
    bytes: Mutex<HashMap<Hash256, Vec<u8>>>,
    added: Mutex<Vec<Arc<Block>>>,
    head: Mutex<Milestone>,
    downloading_empty: AtomicBool,
}

impl Default for MockDag {
    fn default() -> Self {
        Self {
            known: Mutex::new(HashSet::new()),
            bytes: Mutex::new(HashMap::new()),
            added: Mutex::new(Vec::new()),
            head: Mutex::new(Milestone {
                height: 0,
                block_hash: Hash256::digest(b"mock genesis"),
                time: 0,
                chainwork: BigUint::from(1u32),
                milestone_target: BigUint::from(1u32),
                block_target: BigUint::from(1u32),
                hash_rate: 1,
            }),
            downloading_empty: AtomicBool::new(true),
        }
    }
}

impl MockDag {
    pub(crate) fn insert_known(&self, hash: Hash256) {
        self.known.lock().insert(hash);
    }

    pub(crate) fn added_count(&self) -> usize {
        self.added.lock().len()
    }
}

impl DagService for MockDag {
    fn add_new_block(&self, block: Arc<Block>) -> BlockAdmission {
        let hash = block.finalize_hash();
        if !self.known.lock().insert(hash) {
            return BlockAdmission::Duplicate;
        }
        self.bytes.lock().insert(hash, block.to_bytes());
        self.added.lock().push(block);
        BlockAdmission::Accepted
    }

    fn contains(&self, hash: &Hash256) -> bool {
        self.known.lock().contains(hash)
    }

    fn block_bytes(&self, hash: &Hash256) -> Option<Vec<u8>> {
        self.bytes.lock().get(hash).cloned()
    }

    fn bundle_after(&self, _locator: &Hash256, _limit: usize) -> Option<Vec<Arc<Block>>> {
        Some(Vec::new())
    }

    fn best_milestone_height(&self) -> u64 {
        self.head.lock().height
    }

    fn milestone_head(&self) -> Milestone {
        self.head.lock().clone()
    }

    fn is_downloading_empty(&self) -> bool {
        self.downloading_empty.load(Ordering::Acquire)
    }
}

#[derive(Default)]
pub(crate) struct MockMempool {
    received: Mutex<Vec<Hash256>>,
    reject_all: AtomicBool,
}

impl MockMempool {
    pub(crate) fn received_count(&self) -> usize {
        self.received.lock().len()
    }

    pub(crate) fn reject_everything(&self) {
        self.reject_all.store(true, Ordering::Release);
    }
}

impl MempoolService for MockMempool {
    fn receive_tx(&self, tx: Arc<Transaction>) -> bool {
        if self.reject_all.load(Ordering::Acquire) {
            return false;
        }
        let hash = tx.finalize_hash();
        let mut received = self.received.lock();
        if received.contains(&hash) {
            return false;
        }
        received.push(hash);
        true
    }
}
