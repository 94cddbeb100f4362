use thiserror::Error;

use crate::hash::Hash256;

/// Upper bound on any decoded collection length.  Well-formed payloads
/// stay far below this.
const MAX_COLLECTION_LEN: u64 = 1 << 24;

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("unexpected end of input at byte {0}")]
    UnexpectedEof(usize),
    #[error("non-canonical compact size encoding")]
    NonCanonicalCount,
    #[error("collection length {0} exceeds limit")]
    OversizedCollection(u64),
    #[error("{0} trailing bytes after decode")]
    TrailingBytes(usize),
    #[error("invalid value: {0}")]
    Invalid(&'static str),
}

/// Append-only sink for the canonical binary format.
///
/// All integers are little-endian; counts use Bitcoin-style CompactSize.
#[derive(Default)]
pub struct ByteWriter {
    buf: Vec<u8>,
}

impl ByteWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: Vec::with_capacity(capacity),
        }
    }

    pub fn put_u8(&mut self, value: u8) {
        self.buf.push(value);
    }

    pub fn put_u16(&mut self, value: u16) {
        self.buf.extend_from_slice(&value.to_le_bytes());
    }

    pub fn put_u32(&mut self, value: u32) {
        self.buf.extend_from_slice(&value.to_le_bytes());
    }

    pub fn put_u64(&mut self, value: u64) {
        self.buf.extend_from_slice(&value.to_le_bytes());
    }

    pub fn put_compact(&mut self, value: u64) {
        match value {
            0..=0xfc => self.put_u8(value as u8),
            0xfd..=0xffff => {
                self.put_u8(0xfd);
                self.put_u16(value as u16);
            }
            0x1_0000..=0xffff_ffff => {
                self.put_u8(0xfe);
                self.put_u32(value as u32);
            }
            _ => {
                self.put_u8(0xff);
                self.put_u64(value);
            }
        }
    }

    pub fn put_bytes(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// CompactSize length prefix followed by the raw bytes.
    pub fn put_byte_vec(&mut self, bytes: &[u8]) {
        self.put_compact(bytes.len() as u64);
        self.put_bytes(bytes);
    }

    pub fn put_hash(&mut self, hash: &Hash256) {
        self.put_bytes(hash.as_bytes());
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn into_vec(self) -> Vec<u8> {
        self.buf
    }
}

/// Cursor over a byte slice mirroring [`ByteWriter`].
///
/// CompactSize decoding is canonical-form strict: a count that could have
/// been written shorter is rejected, so decode followed by encode is the
/// identity on every accepted payload.
pub struct ByteReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> ByteReader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], CodecError> {
        if self.remaining() < n {
            return Err(CodecError::UnexpectedEof(self.pos));
        }
        let slice = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    pub fn read_u8(&mut self) -> Result<u8, CodecError> {
        Ok(self.take(1)?[0])
    }

    pub fn read_u16(&mut self) -> Result<u16, CodecError> {
        let bytes = self.take(2)?;
        Ok(u16::from_le_bytes([bytes[0], bytes[1]]))
    }

    pub fn read_u32(&mut self) -> Result<u32, CodecError> {
        let bytes = self.take(4)?;
        Ok(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    pub fn read_u64(&mut self) -> Result<u64, CodecError> {
        let bytes = self.take(8)?;
        let mut raw = [0u8; 8];
        raw.copy_from_slice(bytes);
        Ok(u64::from_le_bytes(raw))
    }

    pub fn read_compact(&mut self) -> Result<u64, CodecError> {
        let tag = self.read_u8()?;
        let value = match tag {
            0xfd => {
                let v = u64::from(self.read_u16()?);
                if v < 0xfd {
                    return Err(CodecError::NonCanonicalCount);
                }
                v
            }
            0xfe => {
                let v = u64::from(self.read_u32()?);
                if v <= 0xffff {
                    return Err(CodecError::NonCanonicalCount);
                }
                v
            }
            0xff => {
                let v = self.read_u64()?;
                if v <= 0xffff_ffff {
                    return Err(CodecError::NonCanonicalCount);
                }
                v
            }
            byte => u64::from(byte),
        };
        Ok(value)
    }

    fn read_count(&mut self) -> Result<usize, CodecError> {
        let count = self.read_compact()?;
        if count > MAX_COLLECTION_LEN {
            return Err(CodecError::OversizedCollection(count));
        }
        Ok(count as usize)
    }

    pub fn read_bytes(&mut self, n: usize) -> Result<Vec<u8>, CodecError> {
        Ok(self.take(n)?.to_vec())
    }

    pub fn read_byte_vec(&mut self) -> Result<Vec<u8>, CodecError> {
        let len = self.read_count()?;
        self.read_bytes(len)
    }

    pub fn read_hash(&mut self) -> Result<Hash256, CodecError> {
        let bytes = self.take(32)?;
        let mut raw = [0u8; 32];
        raw.copy_from_slice(bytes);
        Ok(Hash256(raw))
    }

    /// Fails if any input is left unconsumed.
    pub fn finish(self) -> Result<(), CodecError> {
        match self.remaining() {
            0 => Ok(()),
            n => Err(CodecError::TrailingBytes(n)),
        }
    }
}

/// Types with a canonical binary form.
pub trait Encodable {
    fn encode(&self, writer: &mut ByteWriter);

    fn to_bytes(&self) -> Vec<u8> {
        let mut writer = ByteWriter::new();
        self.encode(&mut writer);
        writer.into_vec()
    }
}

pub trait Decodable: Sized {
    fn decode(reader: &mut ByteReader<'_>) -> Result<Self, CodecError>;

    /// Decode a standalone payload, rejecting trailing bytes.
    fn from_bytes(bytes: &[u8]) -> Result<Self, CodecError> {
        let mut reader = ByteReader::new(bytes);
        let value = Self::decode(&mut reader)?;
        reader.finish()?;
        Ok(value)
    }
}

impl<T: Encodable> Encodable for Vec<T> {
    fn encode(&self, writer: &mut ByteWriter) {
        writer.put_compact(self.len() as u64);
        for item in self {
            item.encode(writer);
        }
    }
}

impl<T: Decodable> Decodable for Vec<T> {
    fn decode(reader: &mut ByteReader<'_>) -> Result<Self, CodecError> {
        let count = reader.read_count()?;
        let mut items = Vec::with_capacity(count.min(1024));
        for _ in 0..count {
            items.push(T::decode(reader)?);
        }
        Ok(items)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn integers_round_trip() {
        let mut writer = ByteWriter::new();
        writer.put_u8(0xab);
        writer.put_u16(0x0102);
        writer.put_u32(0xdead_beef);
        writer.put_u64(u64::MAX - 1);
        let bytes = writer.into_vec();

        let mut reader = ByteReader::new(&bytes);
        assert_eq!(reader.read_u8().unwrap(), 0xab);
        assert_eq!(reader.read_u16().unwrap(), 0x0102);
        assert_eq!(reader.read_u32().unwrap(), 0xdead_beef);
        assert_eq!(reader.read_u64().unwrap(), u64::MAX - 1);
        reader.finish().unwrap();
    }

    #[test]
    fn compact_sizes_use_minimal_width() {
        for (value, width) in [
            (0u64, 1usize),
            (0xfc, 1),
            (0xfd, 3),
            (0xffff, 3),
            (0x1_0000, 5),
            (0xffff_ffff, 5),
            (0x1_0000_0000, 9),
        ] {
            let mut writer = ByteWriter::new();
            writer.put_compact(value);
            let bytes = writer.into_vec();
            assert_eq!(bytes.len(), width, "value {value:#x}");
            let mut reader = ByteReader::new(&bytes);
            assert_eq!(reader.read_compact().unwrap(), value);
        }
    }

    #[test]
    fn non_canonical_compact_rejected() {
        // 0xfd prefix carrying a value that fits in one byte.
        let mut reader = ByteReader::new(&[0xfd, 0x10, 0x00]);
        assert!(matches!(
            reader.read_compact(),
            Err(CodecError::NonCanonicalCount)
        ));
    }

    #[test]
    fn trailing_bytes_rejected() {
        let bytes = [0u8; 33];
        let mut reader = ByteReader::new(&bytes);
        reader.read_hash().unwrap();
        assert!(matches!(
            reader.finish(),
            Err(CodecError::TrailingBytes(1))
        ));
    }

    #[test]
    fn short_input_reports_eof() {
        let mut reader = ByteReader::new(&[1, 2]);
        assert!(matches!(
            reader.read_u32(),
            Err(CodecError::UnexpectedEof(0))
        ));
    }
}
