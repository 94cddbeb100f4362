use std::fmt;
use std::sync::OnceLock;

use codec::{ByteReader, ByteWriter, CodecError, Decodable, Encodable, Hash256};
use tx::Transaction;

use crate::params::params;

/// Where a block entered this node from.  Metadata only; never serialized
/// and never part of the hash.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum BlockSource {
    #[default]
    Network,
    Miner,
    Local,
    Genesis,
}

/// Header fields, in canonical serialization order.
///
/// A block names three parents: the milestone it confirms under, the
/// previous block of its own chain, and a tip it endorses.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BlockHeader {
    pub version: u16,
    pub milestone_hash: Hash256,
    pub prev_hash: Hash256,
    pub tip_hash: Hash256,
    pub merkle_root: Hash256,
    pub time: u32,
    pub diff_target: u32,
    pub nonce: u32,
    /// Proof-of-work cycle.  Carries exactly `cycle_len` words on the
    /// wire; the length is a network constant, not self-describing.
    pub proof: Vec<u32>,
}

impl BlockHeader {
    fn decode_with_cycle_len(
        reader: &mut ByteReader<'_>,
        cycle_len: u32,
    ) -> Result<Self, CodecError> {
        let version = reader.read_u16()?;
        let milestone_hash = reader.read_hash()?;
        let prev_hash = reader.read_hash()?;
        let tip_hash = reader.read_hash()?;
        let merkle_root = reader.read_hash()?;
        let time = reader.read_u32()?;
        let diff_target = reader.read_u32()?;
        let nonce = reader.read_u32()?;
        let mut proof = Vec::with_capacity(cycle_len as usize);
        for _ in 0..cycle_len {
            proof.push(reader.read_u32()?);
        }
        Ok(Self {
            version,
            milestone_hash,
            prev_hash,
            tip_hash,
            merkle_root,
            time,
            diff_target,
            nonce,
            proof,
        })
    }
}

impl Encodable for BlockHeader {
    fn encode(&self, writer: &mut ByteWriter) {
        writer.put_u16(self.version);
        writer.put_hash(&self.milestone_hash);
        writer.put_hash(&self.prev_hash);
        writer.put_hash(&self.tip_hash);
        writer.put_hash(&self.merkle_root);
        writer.put_u32(self.time);
        writer.put_u32(self.diff_target);
        writer.put_u32(self.nonce);
        for word in &self.proof {
            writer.put_u32(*word);
        }
    }
}

/// Full block.  Immutable once [`Block::finalize_hash`] has run; the hash
/// is a pure function of the canonical encoding and is computed exactly
/// once.
#[derive(Clone, Debug, Default)]
pub struct Block {
    pub header: BlockHeader,
    pub transactions: Vec<Transaction>,
    pub source: BlockSource,
    hash: OnceLock<Hash256>,
}

impl Block {
    pub fn from_header(header: BlockHeader, transactions: Vec<Transaction>) -> Self {
        Self {
            header,
            transactions,
            source: BlockSource::default(),
            hash: OnceLock::new(),
        }
    }

    /// The three parent references in canonical wire order:
    /// milestone, prev, tip.
    pub fn parents(&self) -> [Hash256; 3] {
        [
            self.header.milestone_hash,
            self.header.prev_hash,
            self.header.tip_hash,
        ]
    }

    /// Compute and cache the content hash.
    pub fn finalize_hash(&self) -> Hash256 {
        *self.hash.get_or_init(|| Hash256::digest(&self.to_bytes()))
    }

    pub fn hash(&self) -> Hash256 {
        self.finalize_hash()
    }

    /// Decode with an explicit proof length instead of consulting the
    /// installed network parameters.
    pub fn decode_with_cycle_len(
        reader: &mut ByteReader<'_>,
        cycle_len: u32,
    ) -> Result<Self, CodecError> {
        let header = BlockHeader::decode_with_cycle_len(reader, cycle_len)?;
        let transactions = Vec::decode(reader)?;
        Ok(Self::from_header(header, transactions))
    }
}

impl Encodable for Block {
    fn encode(&self, writer: &mut ByteWriter) {
        self.header.encode(writer);
        self.transactions.encode(writer);
    }
}

impl Decodable for Block {
    fn decode(reader: &mut ByteReader<'_>) -> Result<Self, CodecError> {
        Self::decode_with_cycle_len(reader, params().cycle_len)
    }
}

impl PartialEq for Block {
    fn eq(&self, other: &Self) -> bool {
        self.finalize_hash() == other.finalize_hash()
    }
}

impl Eq for Block {}

impl fmt::Display for Block {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "block {} (ms {}, prev {}, tip {}, {} txs)",
            self.finalize_hash(),
            self.header.milestone_hash,
            self.header.prev_hash,
            self.header.tip_hash,
            self.transactions.len()
        )
    }
}
