//! Reference DAG consumer wired behind the networking core.
//!
//! A deliberately thin engine: full confirmation logic is outside this
//! repository's scope, but the admission path is real.  Parents are
//! checked, orphans ride the dependency container, released blocks are
//! persisted in topological order, and the milestone head watermark
//! drives initial sync.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use codec::Hash256;
use consensus::{Block, ConsensusError, Milestone, chainwork_from_compact, params};
use p2p::{BlockAdmission, DagService};
use parking_lot::{Mutex, RwLock};
use storage::{
    KvStore, MILESTONE_MISSING, OrphanBlocksContainer, PREV_MISSING, StorageError, TIP_MISSING,
};
use thiserror::Error;
use tracing::{debug, warn};

use crate::mempool::Mempool;

/// A requested parent that has not arrived within this long may be
/// requested again.
const DOWNLOAD_TIMEOUT_SECS: u64 = 60;

#[derive(Debug, Error)]
pub enum DagError {
    #[error("consensus error: {0}")]
    Consensus(#[from] ConsensusError),
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
}

pub struct Dag {
    store: KvStore,
    obc: OrphanBlocksContainer,
    mempool: Arc<Mempool>,
    /// Hashes admitted to the store.
    index: RwLock<HashSet<Hash256>>,
    /// Admission order, for serving bundles.
    order: RwLock<Vec<Hash256>>,
    milestone_head: RwLock<Milestone>,
    /// Requested-but-not-yet-arrived parents, by request time.
    downloading: Mutex<HashMap<Hash256, u64>>,
}

impl Dag {
    /// Bootstraps from the installed network's genesis; a persisted
    /// milestone head is picked up as the sync watermark.
    pub fn new(store: KvStore, mempool: Arc<Mempool>) -> Result<Self, DagError> {
        let genesis = consensus::create_genesis()?;
        store.put_block(&genesis.block)?;
        let head = match store.milestone_head()? {
            Some(head) => head,
            None => {
                store.set_milestone_head(&genesis.milestone)?;
                (*genesis.milestone).clone()
            }
        };
        let genesis_hash = genesis.block.finalize_hash();
        Ok(Self {
            store,
            obc: OrphanBlocksContainer::new(),
            mempool,
            index: RwLock::new(HashSet::from([genesis_hash])),
            order: RwLock::new(vec![genesis_hash]),
            milestone_head: RwLock::new(head),
            downloading: Mutex::new(HashMap::new()),
        })
    }

    pub fn admitted_count(&self) -> usize {
        self.index.read().len()
    }

    pub fn orphan_count(&self) -> usize {
        self.obc.size()
    }

    /// Persist a block and everything its arrival unblocks.
    fn admit_chain(&self, block: Arc<Block>) -> Result<(), StorageError> {
        let mut queue = VecDeque::from([block]);
        while let Some(block) = queue.pop_front() {
            let hash = block.finalize_hash();
            self.store.put_block(&block)?;
            self.index.write().insert(hash);
            self.order.write().push(hash);
            self.downloading.lock().remove(&hash);
            if !block.transactions.is_empty() {
                let confirmed: Vec<Hash256> = block
                    .transactions
                    .iter()
                    .map(|tx| tx.finalize_hash())
                    .collect();
                self.mempool.remove_confirmed(&confirmed);
            }
            self.maybe_advance_milestone(&block)?;
            for released in self.obc.submit_hash(&hash) {
                queue.push_back(released);
            }
        }
        Ok(())
    }

    /// Toy spine rule: a block naming the current head as its milestone
    /// parent becomes the next milestone.  Enough to move the watermark
    /// the sync driver watches.
    fn maybe_advance_milestone(&self, block: &Arc<Block>) -> Result<(), StorageError> {
        let mut head = self.milestone_head.write();
        if block.header.milestone_hash != head.block_hash {
            return Ok(());
        }
        let Ok(work) = chainwork_from_compact(block.header.diff_target) else {
            debug!(block = %block.finalize_hash(), "skipping milestone with bad difficulty bits");
            return Ok(());
        };
        let next = Milestone {
            height: head.height + 1,
            block_hash: block.finalize_hash(),
            time: block.header.time,
            chainwork: &head.chainwork + work,
            milestone_target: head.milestone_target.clone(),
            block_target: head.block_target.clone(),
            hash_rate: head.hash_rate,
        };
        self.store.set_milestone_head(&next)?;
        debug!(height = next.height, "milestone head advanced");
        *head = next;
        Ok(())
    }
}

impl DagService for Dag {
    fn add_new_block(&self, block: Arc<Block>) -> BlockAdmission {
        let hash = block.finalize_hash();
        self.downloading.lock().remove(&hash);
        if self.index.read().contains(&hash) || self.obc.contains(&hash) {
            return BlockAdmission::Duplicate;
        }
        if block.transactions.len() > params().block_capacity {
            return BlockAdmission::Invalid;
        }

        let mut mask = 0u8;
        {
            let index = self.index.read();
            for (bit, parent) in [
                (MILESTONE_MISSING, block.header.milestone_hash),
                (TIP_MISSING, block.header.tip_hash),
                (PREV_MISSING, block.header.prev_hash),
            ] {
                if !index.contains(&parent) {
                    mask |= bit;
                }
            }
        }

        if mask != 0 {
            let now = unix_time();
            let mut fetch = Vec::new();
            {
                let index = self.index.read();
                let mut downloading = self.downloading.lock();
                for parent in block.parents() {
                    if index.contains(&parent) || self.obc.contains(&parent) {
                        continue;
                    }
                    if downloading.insert(parent, now).is_none() {
                        fetch.push(parent);
                    }
                }
            }
            self.obc.add_block(block, mask);
            return BlockAdmission::Orphaned(fetch);
        }

        match self.admit_chain(block) {
            Ok(()) => BlockAdmission::Accepted,
            Err(err) => {
                warn!(block = %hash, error = %err, "failed to persist block");
                BlockAdmission::Invalid
            }
        }
    }

    fn contains(&self, hash: &Hash256) -> bool {
        self.index.read().contains(hash) || self.obc.contains(hash)
    }

    fn block_bytes(&self, hash: &Hash256) -> Option<Vec<u8>> {
        self.store.block_bytes(hash).ok().flatten()
    }

    fn bundle_after(&self, locator: &Hash256, limit: usize) -> Option<Vec<Arc<Block>>> {
        let order = self.order.read();
        let position = order.iter().position(|hash| hash == locator)?;
        let mut blocks = Vec::new();
        for hash in order.iter().skip(position + 1).take(limit) {
            match self.store.block(hash) {
                Ok(Some(block)) => blocks.push(Arc::new(block)),
                _ => break,
            }
        }
        Some(blocks)
    }

    fn best_milestone_height(&self) -> u64 {
        self.milestone_head.read().height
    }

    fn milestone_head(&self) -> Milestone {
        self.milestone_head.read().clone()
    }

    fn is_downloading_empty(&self) -> bool {
        let now = unix_time();
        let mut downloading = self.downloading.lock();
        downloading.retain(|_, requested| now.saturating_sub(*requested) < DOWNLOAD_TIMEOUT_SECS);
        downloading.is_empty()
    }
}

fn unix_time() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use consensus::{NetworkType, create_genesis, select_params};
    use tempfile::tempdir;

    use super::*;

    fn fixture() -> (tempfile::TempDir, Dag, Arc<Mempool>) {
        select_params(NetworkType::UnitTest).expect("params");
        let dir = tempdir().expect("db dir");
        let store = KvStore::open(dir.path()).expect("open store");
        let mempool = Arc::new(Mempool::new(1_000));
        let dag = Dag::new(store, mempool.clone()).expect("dag");
        (dir, dag, mempool)
    }

    fn child_of(parent: Hash256, seed: u32) -> Arc<Block> {
        Arc::new(Block::from_header(
            consensus::BlockHeader {
                version: 100,
                milestone_hash: parent,
                prev_hash: parent,
                tip_hash: parent,
                merkle_root: Hash256::digest(&seed.to_le_bytes()),
                time: seed,
                diff_target: 0x2100_ffff,
                nonce: seed,
                proof: Vec::new(),
            },
            Vec::new(),
        ))
    }

    #[test]
    fn starts_from_genesis() {
        let (_dir, dag, _mempool) = fixture();
        let genesis = create_genesis().unwrap();
        assert!(dag.contains(&genesis.block.finalize_hash()));
        assert_eq!(dag.best_milestone_height(), 0);
        assert_eq!(dag.admitted_count(), 1);
        assert!(dag.is_downloading_empty());
    }

    #[test]
    fn accepts_children_and_advances_the_milestone() {
        let (_dir, dag, _mempool) = fixture();
        let genesis_hash = create_genesis().unwrap().block.finalize_hash();
        let child = child_of(genesis_hash, 1);

        assert_eq!(dag.add_new_block(child.clone()), BlockAdmission::Accepted);
        assert!(dag.contains(&child.finalize_hash()));
        assert_eq!(dag.best_milestone_height(), 1);
        assert_eq!(dag.milestone_head().block_hash, child.finalize_hash());
        assert_eq!(
            dag.add_new_block(child.clone()),
            BlockAdmission::Duplicate
        );
    }

    #[test]
    fn orphans_wait_for_their_parents() {
        let (_dir, dag, _mempool) = fixture();
        let genesis_hash = create_genesis().unwrap().block.finalize_hash();
        let parent = child_of(genesis_hash, 2);
        let child = child_of(parent.finalize_hash(), 3);

        // Child first: buffered, parent requested.
        match dag.add_new_block(child.clone()) {
            BlockAdmission::Orphaned(missing) => {
                assert_eq!(missing, vec![parent.finalize_hash()]);
            }
            other => panic!("expected orphaned, got {other:?}"),
        }
        assert_eq!(dag.orphan_count(), 1);
        assert!(!dag.is_downloading_empty());

        // Parent arrives: both admitted, in order.
        assert_eq!(dag.add_new_block(parent.clone()), BlockAdmission::Accepted);
        assert_eq!(dag.orphan_count(), 0);
        assert!(dag.contains(&child.finalize_hash()));
        assert!(dag.is_downloading_empty());
        assert_eq!(dag.best_milestone_height(), 2);
    }

    #[test]
    fn bundles_follow_admission_order() {
        let (_dir, dag, _mempool) = fixture();
        let genesis_hash = create_genesis().unwrap().block.finalize_hash();
        let first = child_of(genesis_hash, 4);
        let second = child_of(first.finalize_hash(), 5);
        dag.add_new_block(first.clone());
        dag.add_new_block(second.clone());

        let bundle = dag.bundle_after(&genesis_hash, 10).expect("known locator");
        let hashes: Vec<_> = bundle.iter().map(|block| block.finalize_hash()).collect();
        assert_eq!(
            hashes,
            vec![first.finalize_hash(), second.finalize_hash()]
        );

        let limited = dag.bundle_after(&genesis_hash, 1).expect("known locator");
        assert_eq!(limited.len(), 1);

        assert!(dag.bundle_after(&Hash256::digest(b"unknown"), 10).is_none());
    }

    #[test]
    fn admission_evicts_confirmed_transactions() {
        use p2p::MempoolService as _;
        use tx::{Listing, Transaction, TxInput, TxOutPoint, TxOutput};

        let (_dir, dag, mempool) = fixture();
        let genesis_hash = create_genesis().unwrap().block.finalize_hash();

        let mut tx = Transaction::default();
        tx.add_input(TxInput::new(
            TxOutPoint::unconnected(Hash256::digest(b"pending")),
            Listing::default(),
        ));
        tx.add_output(TxOutput::new(7, Listing::default()));
        let txid = tx.finalize_hash();
        assert!(mempool.receive_tx(Arc::new(tx.clone())));
        assert!(mempool.contains(&txid));

        let template = child_of(genesis_hash, 7);
        let block = Block::from_header(template.header.clone(), vec![tx]);
        assert_eq!(
            dag.add_new_block(Arc::new(block)),
            BlockAdmission::Accepted
        );
        assert!(!mempool.contains(&txid));
    }

    #[test]
    fn oversized_blocks_are_invalid() {
        let (_dir, dag, _mempool) = fixture();
        let genesis_hash = create_genesis().unwrap().block.finalize_hash();
        let template = child_of(genesis_hash, 6);
        let over_capacity = params().block_capacity + 1;
        let block = Block::from_header(
            template.header.clone(),
            (0..over_capacity)
                .map(|_| tx::Transaction::default())
                .collect(),
        );
        assert_eq!(
            dag.add_new_block(Arc::new(block)),
            BlockAdmission::Invalid
        );
    }
}
