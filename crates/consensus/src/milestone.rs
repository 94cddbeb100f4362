use codec::Hash256;
use num_bigint::BigUint;

/// Snapshot of the milestone spine at a confirmed milestone block.
///
/// The head milestone anchors difficulty retargeting, reward epochs and the
/// initial-sync progress check.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Milestone {
    pub height: u64,
    pub block_hash: Hash256,
    pub time: u32,
    pub chainwork: BigUint,
    pub milestone_target: BigUint,
    pub block_target: BigUint,
    pub hash_rate: u64,
}
