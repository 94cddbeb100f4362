//! Transaction data structures and canonical encoding.

use std::fmt;
use std::sync::OnceLock;

use codec::{ByteReader, ByteWriter, CodecError, Decodable, Encodable, Hash256};

/// Outpoint index marking an input that does not spend a prior output.
/// Registration (coinbase-style) inputs carry this together with the
/// distinguished parent hash of the block they register against.
pub const UNCONNECTED: u64 = u64::MAX;

/// Reference to an output of a prior block's transaction.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct TxOutPoint {
    pub block_hash: Hash256,
    pub index: u64,
}

impl TxOutPoint {
    pub fn new(block_hash: Hash256, index: u64) -> Self {
        Self { block_hash, index }
    }

    pub fn unconnected(block_hash: Hash256) -> Self {
        Self::new(block_hash, UNCONNECTED)
    }

    pub fn is_unconnected(&self) -> bool {
        self.index == UNCONNECTED
    }
}

impl Encodable for TxOutPoint {
    fn encode(&self, writer: &mut ByteWriter) {
        writer.put_hash(&self.block_hash);
        writer.put_u64(self.index);
    }
}

impl Decodable for TxOutPoint {
    fn decode(reader: &mut ByteReader<'_>) -> Result<Self, CodecError> {
        Ok(Self {
            block_hash: reader.read_hash()?,
            index: reader.read_u64()?,
        })
    }
}

/// Serialized script attached to inputs and outputs.
///
/// `program` carries executable bytes, `data` the operand stream.  Both are
/// opaque here; execution lives behind the verification oracle.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Listing {
    pub program: Vec<u8>,
    pub data: Vec<u8>,
}

impl Listing {
    pub fn new(program: Vec<u8>, data: Vec<u8>) -> Self {
        Self { program, data }
    }

    pub fn is_empty(&self) -> bool {
        self.program.is_empty() && self.data.is_empty()
    }
}

impl Encodable for Listing {
    fn encode(&self, writer: &mut ByteWriter) {
        writer.put_byte_vec(&self.program);
        writer.put_byte_vec(&self.data);
    }
}

impl Decodable for Listing {
    fn decode(reader: &mut ByteReader<'_>) -> Result<Self, CodecError> {
        Ok(Self {
            program: reader.read_byte_vec()?,
            data: reader.read_byte_vec()?,
        })
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TxInput {
    pub outpoint: TxOutPoint,
    pub listing: Listing,
}

impl TxInput {
    pub fn new(outpoint: TxOutPoint, listing: Listing) -> Self {
        Self { outpoint, listing }
    }

    /// Registration inputs do not spend an output.
    pub fn is_registration(&self) -> bool {
        self.outpoint.is_unconnected()
    }
}

impl Encodable for TxInput {
    fn encode(&self, writer: &mut ByteWriter) {
        self.outpoint.encode(writer);
        self.listing.encode(writer);
    }
}

impl Decodable for TxInput {
    fn decode(reader: &mut ByteReader<'_>) -> Result<Self, CodecError> {
        Ok(Self {
            outpoint: TxOutPoint::decode(reader)?,
            listing: Listing::decode(reader)?,
        })
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TxOutput {
    pub value: u64,
    pub listing: Listing,
}

impl TxOutput {
    pub fn new(value: u64, listing: Listing) -> Self {
        Self { value, listing }
    }
}

impl Encodable for TxOutput {
    fn encode(&self, writer: &mut ByteWriter) {
        writer.put_compact(self.value);
        self.listing.encode(writer);
    }
}

impl Decodable for TxOutput {
    fn decode(reader: &mut ByteReader<'_>) -> Result<Self, CodecError> {
        Ok(Self {
            value: reader.read_compact()?,
            listing: Listing::decode(reader)?,
        })
    }
}

/// A transaction.  Immutable once its hash has been finalized.
#[derive(Debug, Default)]
pub struct Transaction {
    inputs: Vec<TxInput>,
    outputs: Vec<TxOutput>,
    hash: OnceLock<Hash256>,
}

impl Transaction {
    pub fn new(inputs: Vec<TxInput>, outputs: Vec<TxOutput>) -> Self {
        Self {
            inputs,
            outputs,
            hash: OnceLock::new(),
        }
    }

    pub fn add_input(&mut self, input: TxInput) -> &mut Self {
        debug_assert!(self.hash.get().is_none(), "transaction already finalized");
        self.inputs.push(input);
        self
    }

    pub fn add_output(&mut self, output: TxOutput) -> &mut Self {
        debug_assert!(self.hash.get().is_none(), "transaction already finalized");
        self.outputs.push(output);
        self
    }

    pub fn inputs(&self) -> &[TxInput] {
        &self.inputs
    }

    pub fn outputs(&self) -> &[TxOutput] {
        &self.outputs
    }

    /// Compute and cache the content hash.  The hash is a pure function of
    /// the canonical encoding and is computed exactly once.
    pub fn finalize_hash(&self) -> Hash256 {
        *self.hash.get_or_init(|| Hash256::digest(&self.to_bytes()))
    }

    pub fn hash(&self) -> Hash256 {
        self.finalize_hash()
    }

    /// Verification oracle.  Structural sanity only; script execution is an
    /// external concern.
    pub fn verify(&self) -> bool {
        if self.inputs.is_empty() || self.outputs.is_empty() {
            return false;
        }
        let mut total: u64 = 0;
        for output in &self.outputs {
            match total.checked_add(output.value) {
                Some(sum) => total = sum,
                None => return false,
            }
        }
        true
    }

    pub fn total_output_value(&self) -> u64 {
        self.outputs.iter().map(|out| out.value).sum()
    }
}

impl Clone for Transaction {
    fn clone(&self) -> Self {
        Self {
            inputs: self.inputs.clone(),
            outputs: self.outputs.clone(),
            hash: self.hash.clone(),
        }
    }
}

impl PartialEq for Transaction {
    fn eq(&self, other: &Self) -> bool {
        self.inputs == other.inputs && self.outputs == other.outputs
    }
}

impl Eq for Transaction {}

impl fmt::Display for Transaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "tx {} ({} in, {} out)",
            self.finalize_hash(),
            self.inputs.len(),
            self.outputs.len()
        )
    }
}

impl Encodable for Transaction {
    fn encode(&self, writer: &mut ByteWriter) {
        self.inputs.encode(writer);
        self.outputs.encode(writer);
    }
}

impl Decodable for Transaction {
    fn decode(reader: &mut ByteReader<'_>) -> Result<Self, CodecError> {
        Ok(Self {
            inputs: Vec::decode(reader)?,
            outputs: Vec::decode(reader)?,
            hash: OnceLock::new(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_tx() -> Transaction {
        let mut tx = Transaction::default();
        tx.add_input(TxInput::new(
            TxOutPoint::unconnected(Hash256::digest(b"parent")),
            Listing::new(vec![], b"registration payload".to_vec()),
        ));
        tx.add_output(TxOutput::new(
            66,
            Listing::new(vec![], vec![0x2a; 20]),
        ));
        tx
    }

    #[test]
    fn round_trips_canonical_bytes() {
        let tx = sample_tx();
        let bytes = tx.to_bytes();
        let decoded = Transaction::from_bytes(&bytes).expect("decode");
        assert_eq!(decoded, tx);
        assert_eq!(decoded.to_bytes(), bytes);
    }

    #[test]
    fn hash_is_stable_and_cached() {
        let tx = sample_tx();
        let first = tx.finalize_hash();
        assert_eq!(tx.finalize_hash(), first);
        let reparsed = Transaction::from_bytes(&tx.to_bytes()).unwrap();
        assert_eq!(reparsed.finalize_hash(), first);
    }

    #[test]
    fn registration_input_detected() {
        let tx = sample_tx();
        assert!(tx.inputs()[0].is_registration());
        assert!(!TxInput::new(
            TxOutPoint::new(Hash256::ZERO, 0),
            Listing::default()
        )
        .is_registration());
    }

    #[test]
    fn verify_rejects_empty_and_overflowing() {
        assert!(!Transaction::default().verify());

        let mut overflow = Transaction::default();
        overflow.add_input(TxInput::new(
            TxOutPoint::unconnected(Hash256::ZERO),
            Listing::default(),
        ));
        overflow.add_output(TxOutput::new(u64::MAX, Listing::default()));
        overflow.add_output(TxOutput::new(1, Listing::default()));
        assert!(!overflow.verify());

        assert!(sample_tx().verify());
    }
}
