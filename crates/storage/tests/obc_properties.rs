//! Randomized admission-order tests for the orphan blocks container.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use codec::Hash256;
use consensus::Block;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng, rngs::StdRng};
use storage::{MILESTONE_MISSING, OrphanBlocksContainer, PREV_MISSING, TIP_MISSING};

fn build_block(seed: u64, milestone: Hash256, tip: Hash256, prev: Hash256) -> Arc<Block> {
    Arc::new(Block::from_header(
        consensus::BlockHeader {
            version: 1,
            milestone_hash: milestone,
            prev_hash: prev,
            tip_hash: tip,
            merkle_root: Hash256::digest(&seed.to_le_bytes()),
            time: seed as u32,
            diff_target: 0x2100_ffff,
            nonce: seed as u32,
            proof: Vec::new(),
        },
        Vec::new(),
    ))
}

/// Build a random DAG over `n` blocks rooted in `roots` external hashes,
/// admit the orphans in random order, then submit the roots and every
/// released block.  Each block must come out exactly once, and only after
/// all three of its parents.
#[test]
fn random_dags_release_every_block_exactly_once() {
    for round in 0..24u64 {
        let mut rng = StdRng::seed_from_u64(0x0bc0_0000 + round);
        let n = rng.gen_range(4..40);
        let roots: Vec<Hash256> = (0..rng.gen_range(1..4))
            .map(|i: u32| Hash256::digest(&[round as u8, i as u8, 0xaa]))
            .collect();

        // Parents of block i are drawn from roots and earlier blocks, so the
        // dependency graph is acyclic by construction.
        let mut blocks: Vec<Arc<Block>> = Vec::with_capacity(n);
        let mut parent_sets: Vec<HashSet<Hash256>> = Vec::with_capacity(n);
        for i in 0..n {
            let mut pick = |rng: &mut StdRng| -> Hash256 {
                let earlier = blocks.len();
                let total = roots.len() + earlier;
                let k = rng.gen_range(0..total);
                if k < roots.len() {
                    roots[k]
                } else {
                    blocks[k - roots.len()].finalize_hash()
                }
            };
            let (ms, tip, prev) = (pick(&mut rng), pick(&mut rng), pick(&mut rng));
            let block = build_block((round << 16) | i as u64, ms, tip, prev);
            parent_sets.push([ms, tip, prev].into_iter().collect());
            blocks.push(block);
        }

        let obc = OrphanBlocksContainer::new();
        let mut admission = blocks.clone();
        admission.shuffle(&mut rng);
        for block in &admission {
            obc.add_block(
                block.clone(),
                MILESTONE_MISSING | TIP_MISSING | PREV_MISSING,
            );
        }
        assert_eq!(obc.size(), n);

        let index: HashMap<Hash256, usize> = blocks
            .iter()
            .enumerate()
            .map(|(i, block)| (block.finalize_hash(), i))
            .collect();

        let mut available: HashSet<Hash256> = HashSet::new();
        let mut released_count = 0usize;
        let mut queue: Vec<Hash256> = roots.clone();
        while let Some(hash) = queue.pop() {
            available.insert(hash);
            for released in obc.submit_hash(&hash) {
                let released_hash = released.finalize_hash();
                let i = index[&released_hash];
                for parent in &parent_sets[i] {
                    assert!(
                        available.contains(parent),
                        "round {round}: block released before parent"
                    );
                }
                released_count += 1;
                queue.push(released_hash);
            }
        }

        assert_eq!(released_count, n, "round {round}");
        assert!(obc.is_empty(), "round {round}");
        assert_eq!(obc.dependency_size(), 0, "round {round}");
    }
}

/// Partial masks: a parent the admitter already has never blocks release.
#[test]
fn partial_masks_only_wait_on_missing_parents() {
    let mut rng = StdRng::seed_from_u64(7);
    let known = Hash256::digest(b"already admitted");
    let missing = Hash256::digest(b"not yet");

    for _ in 0..32 {
        let obc = OrphanBlocksContainer::new();
        let mask = rng.gen_range(1u8..=7);
        let pick = |bit: u8| if mask & bit != 0 { missing } else { known };
        let block = build_block(
            rng.gen::<u64>(),
            pick(MILESTONE_MISSING),
            pick(TIP_MISSING),
            pick(PREV_MISSING),
        );
        obc.add_block(block.clone(), mask);
        assert_eq!(obc.size(), 1);
        assert_eq!(obc.dependency_size(), 1);

        // Submitting the known hash changes nothing.
        assert!(obc.submit_hash(&known).is_empty());
        assert_eq!(obc.size(), 1);

        let released = obc.submit_hash(&missing);
        assert_eq!(released.len(), 1);
        assert_eq!(released[0].finalize_hash(), block.finalize_hash());
        assert!(obc.is_empty());
    }
}
