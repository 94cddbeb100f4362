//! Consensus primitives: three-parent blocks, milestones, compact difficulty
//! targets and the per-network parameter presets.

mod block;
mod milestone;
mod params;
mod target;

pub use block::{Block, BlockHeader, BlockSource};
pub use milestone::Milestone;
pub use params::{
    Genesis, KeyPrefix, NetworkType, Params, create_genesis, params, select_params,
};
pub use target::{chainwork_from_compact, compact_from_target, target_from_compact};

use codec::CodecError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConsensusError {
    #[error("invalid difficulty bits")]
    InvalidBits,
    #[error("unknown network preset: {0}")]
    UnknownNetwork(String),
    #[error("network parameters already selected: {0:?}")]
    ParamsMismatch(NetworkType),
    #[error("malformed genesis payload: {0}")]
    Genesis(&'static str),
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),
}
