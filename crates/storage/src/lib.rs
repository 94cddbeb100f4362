//! Durable and in-flight block storage: the orphan dependency resolver and
//! the RocksDB wrapper behind it.

mod errors;
mod kv;
mod obc;

pub use errors::StorageError;
pub use kv::{Column, KvStore, MilestoneHeadRecord};
pub use obc::{
    MILESTONE_MISSING, OrphanBlocksContainer, PREV_MISSING, TIP_MISSING,
};
