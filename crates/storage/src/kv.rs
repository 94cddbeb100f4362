//! RocksDB wrapper exposing the node's fixed column family set.

use std::path::Path;
use std::sync::Arc;

use codec::{Decodable as _, Encodable as _, Hash256};
use consensus::{Block, Milestone};
use num_bigint::BigUint;
use num_traits::Num;
use rocksdb::{BoundColumnFamily, ColumnFamilyDescriptor, DB, Options};
use serde::{Deserialize, Serialize};

use crate::errors::StorageError;

const MS_HEAD_KEY: &[u8] = b"ms_head";

/// Named column families.  All are created on open.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Column {
    /// Blocks by hash; tuned for point lookups of ~500 B values.
    Default,
    /// Milestone records.
    Milestones,
    /// Unspent outputs.
    Utxo,
    /// Registration chains.
    Registrations,
    /// Node metadata.
    Info,
}

impl Column {
    pub const ALL: [Column; 5] = [
        Column::Default,
        Column::Milestones,
        Column::Utxo,
        Column::Registrations,
        Column::Info,
    ];

    pub const fn name(self) -> &'static str {
        match self {
            Column::Default => "default",
            Column::Milestones => "ms",
            Column::Utxo => "utxo",
            Column::Registrations => "reg",
            Column::Info => "info",
        }
    }
}

/// Embedded key/value store.  Open failure is fatal at startup.
pub struct KvStore {
    db: DB,
}

impl KvStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let path = path.as_ref();
        let mut db_opts = Options::default();
        db_opts.create_if_missing(true);
        db_opts.create_missing_column_families(true);
        db_opts.increase_parallelism(2);
        db_opts.set_db_log_dir(path.join("log"));

        let descriptors = Column::ALL.into_iter().map(|column| {
            let mut cf_opts = Options::default();
            if column == Column::Default {
                cf_opts.optimize_for_point_lookup(500);
            }
            ColumnFamilyDescriptor::new(column.name(), cf_opts)
        });

        let db = DB::open_cf_descriptors(&db_opts, path, descriptors)?;
        Ok(Self { db })
    }

    pub fn get(&self, column: Column, key: &[u8]) -> Result<Option<Vec<u8>>, StorageError> {
        let cf = self.cf(column)?;
        Ok(self.db.get_cf(&cf, key)?)
    }

    pub fn put(&self, column: Column, key: &[u8], value: &[u8]) -> Result<(), StorageError> {
        let cf = self.cf(column)?;
        self.db.put_cf(&cf, key, value)?;
        Ok(())
    }

    pub fn delete(&self, column: Column, key: &[u8]) -> Result<(), StorageError> {
        let cf = self.cf(column)?;
        self.db.delete_cf(&cf, key)?;
        Ok(())
    }

    pub fn exists(&self, column: Column, key: &[u8]) -> Result<bool, StorageError> {
        Ok(self.get(column, key)?.is_some())
    }

    /// Persist a block under its hash, in canonical encoding.
    pub fn put_block(&self, block: &Block) -> Result<(), StorageError> {
        let hash = block.finalize_hash();
        self.put(Column::Default, hash.as_bytes(), &block.to_bytes())
    }

    pub fn block_bytes(&self, hash: &Hash256) -> Result<Option<Vec<u8>>, StorageError> {
        self.get(Column::Default, hash.as_bytes())
    }

    pub fn block(&self, hash: &Hash256) -> Result<Option<Block>, StorageError> {
        match self.block_bytes(hash)? {
            Some(bytes) => Ok(Some(Block::from_bytes(&bytes)?)),
            None => Ok(None),
        }
    }

    pub fn has_block(&self, hash: &Hash256) -> Result<bool, StorageError> {
        self.exists(Column::Default, hash.as_bytes())
    }

    pub fn set_milestone_head(&self, milestone: &Milestone) -> Result<(), StorageError> {
        let record = MilestoneHeadRecord::from_milestone(milestone);
        let data = serde_json::to_vec(&record)?;
        self.put(Column::Info, MS_HEAD_KEY, &data)
    }

    pub fn milestone_head(&self) -> Result<Option<Milestone>, StorageError> {
        let data = match self.get(Column::Info, MS_HEAD_KEY)? {
            Some(bytes) => bytes,
            None => return Ok(None),
        };
        let record: MilestoneHeadRecord = serde_json::from_slice(&data)?;
        record.into_milestone().map(Some)
    }

    fn cf(&self, column: Column) -> Result<Arc<BoundColumnFamily<'_>>, StorageError> {
        self.db
            .cf_handle(column.name())
            .ok_or(StorageError::MissingColumn(column.name()))
    }
}

/// JSON row describing the persisted milestone head.
#[derive(Debug, Serialize, Deserialize)]
pub struct MilestoneHeadRecord {
    height: u64,
    hash: Hash256,
    time: u32,
    chainwork: String,
    milestone_target: String,
    block_target: String,
    hash_rate: u64,
}

impl MilestoneHeadRecord {
    fn from_milestone(milestone: &Milestone) -> Self {
        Self {
            height: milestone.height,
            hash: milestone.block_hash,
            time: milestone.time,
            chainwork: milestone.chainwork.to_str_radix(16),
            milestone_target: milestone.milestone_target.to_str_radix(16),
            block_target: milestone.block_target.to_str_radix(16),
            hash_rate: milestone.hash_rate,
        }
    }

    fn into_milestone(self) -> Result<Milestone, StorageError> {
        let parse = |field: &str, name: &'static str| {
            BigUint::from_str_radix(field, 16).map_err(|_| {
                StorageError::Corrupted(format!("invalid {name} encoding").into())
            })
        };
        Ok(Milestone {
            height: self.height,
            block_hash: self.hash,
            time: self.time,
            chainwork: parse(&self.chainwork, "chainwork")?,
            milestone_target: parse(&self.milestone_target, "milestone target")?,
            block_target: parse(&self.block_target, "block target")?,
            hash_rate: self.hash_rate,
        })
    }
}
