//! Per-network consensus parameters and genesis construction.
//!
//! One preset is installed process-wide before any block or peer is
//! constructed and never changes afterwards.

use std::str::FromStr;
use std::sync::{Arc, OnceLock};

use codec::{ByteReader, Encodable};
use num_bigint::BigUint;

use crate::ConsensusError;
use crate::block::{Block, BlockSource};
use crate::milestone::Milestone;
use crate::target::target_from_compact;

// 1 day per difficulty cycle on average.
const TARGET_TIMESPAN: u32 = 24 * 60 * 60;
// 10 seconds per milestone block.
const TIME_INTERVAL: u32 = 10;
// Transactions per second.
const TPS: u32 = 1000;
// Threshold for rejecting an old block.
const PUNCTUALITY_THRESHOLD: u32 = 100;
// Max amount of money allowed in one output.
const MAX_MONEY: u64 = 9_999_999_999;
// An easy enough difficulty target.
const EASIEST_COMP_DIFF_TARGET: u32 = 0x2100_ffff;
// Transaction sortition: coefficient for computing allowed distance.
const SORTITION_COEFFICIENT: f64 = 0.01;
// Transaction sortition: number of blocks to go back.
const SORTITION_THRESHOLD: u64 = 1000;
// Coefficient of taking additional reward for a milestone.
const REWARD_COEFFICIENT: u32 = 50;
// Capacity of transactions in a block.
const BLK_CAPACITY: usize = 128;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum NetworkType {
    MainNet,
    TestNetSpade,
    TestNetDiamond,
    UnitTest,
}

impl FromStr for NetworkType {
    type Err = ConsensusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "mainnet" => Ok(NetworkType::MainNet),
            "spade" | "testnet-spade" => Ok(NetworkType::TestNetSpade),
            "diamond" | "testnet-diamond" => Ok(NetworkType::TestNetDiamond),
            "unittest" => Ok(NetworkType::UnitTest),
            other => Err(ConsensusError::UnknownNetwork(other.to_owned())),
        }
    }
}

/// Indexes into the key prefix table.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum KeyPrefix {
    PubkeyAddress = 0,
    SecretKey = 1,
}

#[derive(Clone, Debug)]
pub struct Params {
    pub network: NetworkType,
    pub version: u16,
    pub target_timespan: u32,
    /// Seconds per milestone block; never below 3.
    pub time_interval: u32,
    /// Milestones between two difficulty adjustments.
    pub interval: u32,
    pub target_tps: u32,
    pub punctuality_threshold: u32,
    pub max_target: BigUint,
    pub max_money: u64,
    pub base_reward: u64,
    pub reward_adjust_interval: u64,
    pub ms_reward_coefficient: u32,
    pub cycle_len: u32,
    pub sortition_coefficient: f64,
    pub sortition_threshold: u64,
    pub delete_fork_threshold: u32,
    pub block_capacity: usize,
    /// 4-byte prefix on every network frame.
    pub magic: u32,
    key_prefixes: [u8; 2],
    genesis_hex: &'static str,
}

impl Params {
    /// Build the preset for a network without installing it.
    pub fn preset(network: NetworkType) -> Self {
        match network {
            NetworkType::MainNet => Self::mainnet(),
            NetworkType::TestNetSpade => Self::spade(),
            NetworkType::TestNetDiamond => Self::diamond(),
            NetworkType::UnitTest => Self::unittest(),
        }
    }

    fn mainnet() -> Self {
        Self {
            network: NetworkType::MainNet,
            version: 1,
            target_timespan: TARGET_TIMESPAN,
            time_interval: TIME_INTERVAL,
            interval: TARGET_TIMESPAN / TIME_INTERVAL,
            target_tps: TPS,
            punctuality_threshold: PUNCTUALITY_THRESHOLD,
            max_target: target_from_compact(EASIEST_COMP_DIFF_TARGET)
                .expect("preset difficulty target is well-formed"),
            max_money: MAX_MONEY,
            base_reward: 10_000,
            reward_adjust_interval: 3_000_000,
            ms_reward_coefficient: REWARD_COEFFICIENT,
            cycle_len: 42,
            sortition_coefficient: SORTITION_COEFFICIENT,
            sortition_threshold: SORTITION_THRESHOLD,
            delete_fork_threshold: PUNCTUALITY_THRESHOLD,
            block_capacity: BLK_CAPACITY,
            magic: 0x4453_5A5A,
            key_prefixes: [0, 128],
            genesis_hex: MAINNET_GENESIS_HEX,
        }
    }

    fn spade() -> Self {
        Self {
            network: NetworkType::TestNetSpade,
            version: 10,
            target_timespan: 100,
            time_interval: TIME_INTERVAL,
            interval: 100 / TIME_INTERVAL,
            target_tps: 100,
            punctuality_threshold: PUNCTUALITY_THRESHOLD,
            max_target: target_from_compact(EASIEST_COMP_DIFF_TARGET)
                .expect("preset difficulty target is well-formed"),
            max_money: MAX_MONEY,
            base_reward: 10_000_000_000,
            reward_adjust_interval: 3_000_000,
            ms_reward_coefficient: REWARD_COEFFICIENT,
            cycle_len: 4,
            sortition_coefficient: SORTITION_COEFFICIENT,
            sortition_threshold: 100,
            delete_fork_threshold: PUNCTUALITY_THRESHOLD,
            block_capacity: BLK_CAPACITY,
            magic: 0x524F_434B,
            key_prefixes: [0, 128],
            genesis_hex: SPADE_GENESIS_HEX,
        }
    }

    fn diamond() -> Self {
        Self {
            network: NetworkType::TestNetDiamond,
            version: 11,
            target_timespan: 100,
            time_interval: TIME_INTERVAL,
            interval: 100 / TIME_INTERVAL,
            target_tps: 1000,
            punctuality_threshold: PUNCTUALITY_THRESHOLD,
            max_target: target_from_compact(EASIEST_COMP_DIFF_TARGET)
                .expect("preset difficulty target is well-formed"),
            max_money: MAX_MONEY,
            base_reward: 10_000_000_000,
            reward_adjust_interval: 3_000_000,
            ms_reward_coefficient: REWARD_COEFFICIENT,
            cycle_len: 0,
            sortition_coefficient: SORTITION_COEFFICIENT,
            sortition_threshold: 100,
            delete_fork_threshold: PUNCTUALITY_THRESHOLD,
            block_capacity: BLK_CAPACITY,
            magic: 0x524F_4C4C,
            key_prefixes: [0, 128],
            genesis_hex: DIAMOND_GENESIS_HEX,
        }
    }

    fn unittest() -> Self {
        Self {
            network: NetworkType::UnitTest,
            version: 100,
            target_timespan: 99,
            time_interval: 3, // cannot be less than 3
            interval: 99 / 3,
            target_tps: 100,
            punctuality_threshold: 20,
            max_target: target_from_compact(EASIEST_COMP_DIFF_TARGET)
                .expect("preset difficulty target is well-formed"),
            max_money: MAX_MONEY,
            base_reward: 100,
            reward_adjust_interval: 5,
            ms_reward_coefficient: 1,
            cycle_len: 0,
            sortition_coefficient: 1.0,
            sortition_threshold: 2,
            delete_fork_threshold: 10,
            block_capacity: 10,
            magic: 0x5445_5354,
            key_prefixes: [0, 128],
            genesis_hex: UNITTEST_GENESIS_HEX,
        }
    }

    pub fn key_prefix(&self, prefix: KeyPrefix) -> u8 {
        self.key_prefixes[prefix as usize]
    }

    /// Block reward at the given milestone height.
    pub fn reward(&self, height: u64) -> u64 {
        if height == 0 {
            return 0;
        }
        let epoch = (height - 1) / self.reward_adjust_interval;
        (self.base_reward as f64 / (epoch + 1) as f64).round() as u64
    }
}

static PARAMS: OnceLock<Params> = OnceLock::new();
static GENESIS: OnceLock<Arc<Genesis>> = OnceLock::new();

/// Install the network parameters for this process.
///
/// Idempotent for the same network; installing a different preset after the
/// first call is a startup configuration error.
pub fn select_params(network: NetworkType) -> Result<&'static Params, ConsensusError> {
    let installed = PARAMS.get_or_init(|| Params::preset(network));
    if installed.network != network {
        return Err(ConsensusError::ParamsMismatch(installed.network));
    }
    Ok(installed)
}

/// The installed network parameters.  Calling this before
/// [`select_params`] is a programming error.
pub fn params() -> &'static Params {
    PARAMS.get().expect("network parameters not selected")
}

/// The genesis block together with the height-0 milestone built from it.
#[derive(Debug)]
pub struct Genesis {
    pub block: Arc<Block>,
    pub milestone: Arc<Milestone>,
}

/// Decode the installed preset's genesis payload and build its milestone.
///
/// Idempotent: every call within a process returns the same `Arc`.
pub fn create_genesis() -> Result<Arc<Genesis>, ConsensusError> {
    if let Some(genesis) = GENESIS.get() {
        return Ok(genesis.clone());
    }
    let built = Arc::new(build_genesis(params())?);
    Ok(GENESIS.get_or_init(|| built).clone())
}

fn build_genesis(params: &Params) -> Result<Genesis, ConsensusError> {
    let raw = hex::decode(params.genesis_hex)
        .map_err(|_| ConsensusError::Genesis("payload is not valid hex"))?;
    let mut reader = ByteReader::new(&raw);
    let mut block = Block::decode_with_cycle_len(&mut reader, params.cycle_len)?;
    reader.finish()?;
    block.source = BlockSource::Genesis;
    let hash = block.finalize_hash();
    debug_assert_eq!(block.to_bytes(), raw);

    let block_target = target_from_compact(block.header.diff_target)?;
    let ms_target = params.max_target.clone();
    let chainwork = &params.max_target / &block_target;
    let hash_rate = match params.network {
        NetworkType::UnitTest => 1,
        _ => low_u64(&(&params.max_target / (&ms_target + 1u32) / params.time_interval)),
    };

    let milestone = Milestone {
        height: 0,
        block_hash: hash,
        time: block.header.time,
        chainwork,
        milestone_target: ms_target,
        block_target: params.max_target.clone(),
        hash_rate,
    };

    Ok(Genesis {
        block: Arc::new(block),
        milestone: Arc::new(milestone),
    })
}

fn low_u64(value: &BigUint) -> u64 {
    value.iter_u64_digits().next().unwrap_or(0)
}

const MAINNET_GENESIS_HEX: &str = concat!(
    "0100e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855e3b0c44298fc1c149afbf4c8996fb92427ae41e464",
    "9b934ca495991b7852b855e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b8555b9fa07329a2149b758dbec2",
    "530cd81cbe05b33cdb32b6b03470fb6601ef3255388ff95cffff00211800000027635f00c6d49a0091a1ca007a69d500ec1246014feac3",
    "02c244b30398815f04ac8ae204dcc73f05231fca0704788f085f42a30847ba3f09a47c4d09ba957609cb5f9209cdaec10ae3a1ac0dcf39",
    "290f8460d60f5ae76910fdd42e115a4cc0112d1384124fe98e139b08b014a7f7b714cbe5d814b8c61216e07e6716ec3f7418417d8c18c2",
    "d5c218ca7956196736bb1b11a11b1c300b9f1ca171a41c94b1c81c3b3a811da693351f0101e3b0c44298fc1c149afbf4c8996fb92427ae",
    "41e4649b934ca495991b7852b855ffffffffffffffff00484704ffff001d0104454974206973206e6f772074656e20706173742074656e",
    "20696e20746865206576656e696e6720616e6420776520617265207374696c6c20776f726b696e6721014200142ac277ce311a053c91e4",
    "7fd2c4759b263e1b31b4",
);

const SPADE_GENESIS_HEX: &str = concat!(
    "0a00e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855e3b0c44298fc1c149afbf4c8996fb92427ae41e464",
    "9b934ca495991b7852b855e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b8555b9fa07329a2149b758dbec2",
    "530cd81cbe05b33cdb32b6b03470fb6601ef3255388ff95cffff0021030000003c8dcb0244c0c70c51e6ae0e4b592f0f0101e3b0c44298",
    "fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855ffffffffffffffff00484704ffff001d0104454974206973206e6f77",
    "2074656e20706173742074656e20696e20746865206576656e696e6720616e6420776520617265207374696c6c20776f726b696e672101",
    "4200142ac277ce311a053c91e47fd2c4759b263e1b31b4",
);

const DIAMOND_GENESIS_HEX: &str = concat!(
    "0b00e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855e3b0c44298fc1c149afbf4c8996fb9",
    "2427ae41e4649b934ca495991b7852b855e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855",
    "5b9fa07329a2149b758dbec2530cd81cbe05b33cdb32b6b03470fb6601ef3255388ff95cffff0021050000000101e3b0c4",
    "4298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855ffffffffffffffff00484704ffff001d01044549",
    "74206973206e6f772074656e20706173742074656e20696e20746865206576656e696e6720616e64207765206172652073",
    "74696c6c20776f726b696e6721014200142ac277ce311a053c91e47fd2c4759b263e1b31b4",
);

const UNITTEST_GENESIS_HEX: &str = concat!(
    "6400e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855e3b0c44298fc1c149afbf4c8996fb9",
    "2427ae41e4649b934ca495991b7852b855e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855",
    "5b9fa07329a2149b758dbec2530cd81cbe05b33cdb32b6b03470fb6601ef3255388ff95cffff0021000000000101e3b0c4",
    "4298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855ffffffffffffffff00484704ffff001d01044549",
    "74206973206e6f772074656e20706173742074656e20696e20746865206576656e696e6720616e64207765206172652073",
    "74696c6c20776f726b696e6721014200142ac277ce311a053c91e47fd2c4759b263e1b31b4",
);
