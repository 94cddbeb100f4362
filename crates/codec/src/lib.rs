//! Canonical serialization helpers for trident.
//!
//! Two encodings live here.  Block and transaction bodies use a byte-exact
//! binary stream format (little-endian integers, CompactSize counts) that
//! the network's hashes and the embedded genesis payloads are defined over.
//! Peer-to-peer message envelopes use CBOR, wrapped so that serialization
//! logic stays in a single place and the rest of the workspace can rely on
//! a consistent API.

mod cbor;
mod hash;
mod stream;

pub use cbor::{from_slice_cbor, read_cbor, to_vec_cbor, write_cbor};
pub use hash::Hash256;
pub use stream::{ByteReader, ByteWriter, CodecError, Decodable, Encodable};
