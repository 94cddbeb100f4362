//! Seams to the collaborators outside the networking core.

use std::sync::Arc;

use codec::Hash256;
use consensus::{Block, Milestone};
use tx::Transaction;

/// Outcome of handing a freshly received block to the DAG engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BlockAdmission {
    /// Admitted (possibly releasing buffered descendants); worth relaying.
    Accepted,
    /// Buffered until the listed parent hashes arrive.
    Orphaned(Vec<Hash256>),
    /// Already known.
    Duplicate,
    /// Rejected; do not relay and do not fetch parents.
    Invalid,
}

/// The DAG engine as the networking core sees it.
pub trait DagService: Send + Sync {
    fn add_new_block(&self, block: Arc<Block>) -> BlockAdmission;

    fn contains(&self, hash: &Hash256) -> bool;

    /// Canonical bytes of an admitted block, for serving `GetData`.
    fn block_bytes(&self, hash: &Hash256) -> Option<Vec<u8>>;

    /// Up to `limit` admitted blocks following the locator, or `None` when
    /// the locator is unknown.
    fn bundle_after(&self, locator: &Hash256, limit: usize) -> Option<Vec<Arc<Block>>>;

    fn best_milestone_height(&self) -> u64;

    fn milestone_head(&self) -> Milestone;

    /// Whether every requested block has arrived.
    fn is_downloading_empty(&self) -> bool;
}

/// The mempool as the networking core sees it.
pub trait MempoolService: Send + Sync {
    /// True iff the transaction is novel and accepted; only then is it
    /// relayed onward.
    fn receive_tx(&self, tx: Arc<Transaction>) -> bool;
}
