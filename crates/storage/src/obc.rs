//! Orphan blocks container: a concurrent dependency graph buffering blocks
//! whose parents have not yet been admitted.
//!
//! A block enters with a mask naming which of its three parents are
//! unknown, and leaves once every distinct missing parent has been
//! submitted.  Release order is topological: a descendant never comes out
//! before its buffered ancestors.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};

use codec::Hash256;
use consensus::Block;
use parking_lot::{Mutex, RwLock};

/// The `prev` parent is unknown.
pub const PREV_MISSING: u8 = 0b001;
/// The `tip` parent is unknown.
pub const TIP_MISSING: u8 = 0b010;
/// The `milestone` parent is unknown.
pub const MILESTONE_MISSING: u8 = 0b100;

struct DepNode {
    block: Arc<Block>,
    /// Distinct parent hashes still unresolved, 0..=3.
    ndeps: AtomicU8,
    /// Buffered blocks naming this block as a parent.
    dependents: Mutex<Vec<Arc<DepNode>>>,
}

#[derive(Default)]
struct ObcInner {
    /// Orphans by their own hash.
    block_dep_map: HashMap<Hash256, Arc<DepNode>>,
    /// Orphans by a missing parent hash; each node appears once per
    /// distinct parent it is missing.
    lose_ends: HashMap<Hash256, Vec<Arc<DepNode>>>,
}

#[derive(Default)]
pub struct OrphanBlocksContainer {
    inner: RwLock<ObcInner>,
}

impl OrphanBlocksContainer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Buffer a block whose parents named by `missing_mask` are unknown.
    ///
    /// Ownership of the block transfers to the container until release.
    /// The same parent hash under several mask roles counts once.  Adding a
    /// hash that is already buffered replaces the previous entry; the
    /// admitter must not do that.
    pub fn add_block(&self, block: Arc<Block>, missing_mask: u8) {
        if missing_mask == 0 {
            return;
        }

        let hash = block.finalize_hash();
        let node = Arc::new(DepNode {
            block,
            ndeps: AtomicU8::new(0),
            dependents: Mutex::new(Vec::new()),
        });

        let mut inner = self.inner.write();
        inner.block_dep_map.insert(hash, node.clone());

        // Blocks already waiting on this hash stop being lose ends; they
        // ride on this node's release instead.
        if let Some(waiting) = inner.lose_ends.remove(&hash) {
            node.dependents.lock().extend(waiting);
        }

        let mut distinct: HashSet<Hash256> = HashSet::with_capacity(3);
        for (bit, parent) in [
            (MILESTONE_MISSING, node.block.header.milestone_hash),
            (TIP_MISSING, node.block.header.tip_hash),
            (PREV_MISSING, node.block.header.prev_hash),
        ] {
            if missing_mask & bit == 0 || !distinct.insert(parent) {
                continue;
            }
            match inner.block_dep_map.get(&parent) {
                // The missing parent is itself buffered here: link directly.
                Some(parent_node) => parent_node.dependents.lock().push(node.clone()),
                // Unknown anywhere: a lose end, tied when the hash arrives.
                None => inner.lose_ends.entry(parent).or_default().push(node.clone()),
            }
        }
        node.ndeps.store(distinct.len() as u8, Ordering::Release);
    }

    /// Signal that `hash` is now available, releasing every buffered block
    /// whose last missing parent this was, in topological order.
    pub fn submit_hash(&self, hash: &Hash256) -> Vec<Arc<Block>> {
        let mut inner = self.inner.write();
        let Some(bucket) = inner.lose_ends.remove(hash) else {
            return Vec::new();
        };
        // The walk runs without the container lock; it is re-taken briefly
        // for each map erase so submitters see bounded lock holds.
        drop(inner);

        let mut stack = bucket;
        let mut released = Vec::new();
        while let Some(node) = stack.pop() {
            let before = node.ndeps.fetch_sub(1, Ordering::AcqRel);
            debug_assert!(before > 0, "dependency count underflow");
            if before > 1 {
                continue;
            }
            released.push(node.block.clone());
            self.inner
                .write()
                .block_dep_map
                .remove(&node.block.finalize_hash());
            stack.append(&mut node.dependents.lock());
        }
        released
    }

    pub fn contains(&self, hash: &Hash256) -> bool {
        self.inner.read().block_dep_map.contains_key(hash)
    }

    /// Number of buffered blocks.
    pub fn size(&self) -> usize {
        self.inner.read().block_dep_map.len()
    }

    /// Number of distinct missing parent hashes.
    pub fn dependency_size(&self) -> usize {
        self.inner.read().lose_ends.len()
    }

    pub fn is_empty(&self) -> bool {
        self.size() == 0
    }

    #[cfg(test)]
    fn accounting(&self) -> (usize, usize) {
        let inner = self.inner.read();
        let lose_end_refs = inner.lose_ends.values().map(Vec::len).sum();
        let ndeps_total = inner
            .block_dep_map
            .values()
            .map(|node| node.ndeps.load(Ordering::Acquire) as usize)
            .sum();
        (lose_end_refs, ndeps_total)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn block_with_parents(
        seed: u32,
        milestone: Hash256,
        tip: Hash256,
        prev: Hash256,
    ) -> Arc<Block> {
        Arc::new(Block::from_header(
            consensus::BlockHeader {
                version: 1,
                milestone_hash: milestone,
                prev_hash: prev,
                tip_hash: tip,
                merkle_root: Hash256::digest(&seed.to_le_bytes()),
                time: seed,
                diff_target: 0x2100_ffff,
                nonce: seed,
                proof: Vec::new(),
            },
            Vec::new(),
        ))
    }

    fn check_accounting(obc: &OrphanBlocksContainer) {
        // Every reference held by a lose-end bucket or an in-container
        // parent link is counted by some node's ndeps.  Lose-end refs alone
        // never exceed the ndeps total.
        let (lose_end_refs, ndeps_total) = obc.accounting();
        assert!(lose_end_refs <= ndeps_total);
    }

    #[test]
    fn three_parent_release() {
        let obc = OrphanBlocksContainer::new();
        let ma = Hash256::digest(b"MA");
        let ta = Hash256::digest(b"TA");
        let pa = Hash256::digest(b"PA");
        let x = block_with_parents(1, ma, ta, pa);

        obc.add_block(x.clone(), MILESTONE_MISSING | TIP_MISSING | PREV_MISSING);
        assert_eq!(obc.size(), 1);
        assert_eq!(obc.dependency_size(), 3);
        assert!(obc.contains(&x.finalize_hash()));
        check_accounting(&obc);

        assert!(obc.submit_hash(&ma).is_empty());
        check_accounting(&obc);
        assert!(obc.submit_hash(&ta).is_empty());
        check_accounting(&obc);

        let released = obc.submit_hash(&pa);
        assert_eq!(released.len(), 1);
        assert_eq!(released[0].finalize_hash(), x.finalize_hash());
        assert_eq!(obc.size(), 0);
        assert_eq!(obc.dependency_size(), 0);
        assert!(obc.is_empty());
    }

    #[test]
    fn shared_parent_cascade() {
        let obc = OrphanBlocksContainer::new();
        let h1 = Hash256::digest(b"H1");
        let known = Hash256::digest(b"known");
        let y = block_with_parents(2, known, known, h1);
        let z = block_with_parents(3, known, known, y.finalize_hash());

        obc.add_block(y.clone(), PREV_MISSING);
        obc.add_block(z.clone(), PREV_MISSING);
        assert_eq!(obc.size(), 2);
        // Z's missing parent is Y itself, so only H1 is a lose end.
        assert_eq!(obc.dependency_size(), 1);
        check_accounting(&obc);

        let released = obc.submit_hash(&h1);
        let hashes: Vec<_> = released.iter().map(|b| b.finalize_hash()).collect();
        assert_eq!(hashes, vec![y.finalize_hash(), z.finalize_hash()]);
        assert!(obc.is_empty());
        assert_eq!(obc.dependency_size(), 0);
    }

    #[test]
    fn duplicate_parent_collapses_to_one_dependency() {
        let obc = OrphanBlocksContainer::new();
        let h2 = Hash256::digest(b"H2");
        let w = block_with_parents(4, h2, h2, h2);

        obc.add_block(w.clone(), MILESTONE_MISSING | TIP_MISSING | PREV_MISSING);
        assert_eq!(obc.size(), 1);
        assert_eq!(obc.dependency_size(), 1);
        check_accounting(&obc);

        let released = obc.submit_hash(&h2);
        assert_eq!(released.len(), 1);
        assert_eq!(released[0].finalize_hash(), w.finalize_hash());
        assert!(obc.is_empty());
    }

    #[test]
    fn readding_a_hash_does_not_grow_the_container() {
        let obc = OrphanBlocksContainer::new();
        let parent = Hash256::digest(b"parent");
        let block = block_with_parents(5, parent, parent, parent);

        obc.add_block(block.clone(), MILESTONE_MISSING);
        obc.add_block(block.clone(), MILESTONE_MISSING);
        assert_eq!(obc.size(), 1);

        let released = obc.submit_hash(&parent);
        assert_eq!(released.len(), 1);
        assert!(obc.is_empty());
    }

    #[test]
    fn submitting_an_unknown_hash_is_a_no_op() {
        let obc = OrphanBlocksContainer::new();
        assert!(obc.submit_hash(&Hash256::digest(b"nothing")).is_empty());

        let h = Hash256::digest(b"H");
        obc.add_block(block_with_parents(6, h, h, h), PREV_MISSING);
        assert!(obc.submit_hash(&Hash256::digest(b"still nothing")).is_empty());
        assert_eq!(obc.size(), 1);
    }

    #[test]
    fn zero_mask_is_ignored() {
        let obc = OrphanBlocksContainer::new();
        let h = Hash256::digest(b"H");
        obc.add_block(block_with_parents(7, h, h, h), 0);
        assert!(obc.is_empty());
        assert_eq!(obc.dependency_size(), 0);
    }

    #[test]
    fn linear_chain_releases_in_order() {
        // C depends on B, B on A, A on an external hash; any insertion
        // order, one submit releases the whole chain in ancestor order.
        let root = Hash256::digest(b"root");
        let known = Hash256::digest(b"known");
        let a = block_with_parents(8, known, known, root);
        let b = block_with_parents(9, known, known, a.finalize_hash());
        let c = block_with_parents(10, known, known, b.finalize_hash());

        let permutations: [[&Arc<Block>; 3]; 6] = [
            [&a, &b, &c],
            [&a, &c, &b],
            [&b, &a, &c],
            [&b, &c, &a],
            [&c, &a, &b],
            [&c, &b, &a],
        ];

        for order in permutations {
            let obc = OrphanBlocksContainer::new();
            for block in order {
                obc.add_block((*block).clone(), PREV_MISSING);
            }
            check_accounting(&obc);
            let released = obc.submit_hash(&root);
            let hashes: Vec<_> = released.iter().map(|blk| blk.finalize_hash()).collect();
            assert_eq!(
                hashes,
                vec![a.finalize_hash(), b.finalize_hash(), c.finalize_hash()],
            );
            assert!(obc.is_empty());
            assert_eq!(obc.dependency_size(), 0);
        }
    }
}
