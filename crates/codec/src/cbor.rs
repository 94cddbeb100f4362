//! CBOR envelopes for peer-to-peer messages.

use std::io::{self, Read, Write};

use ciborium::de::from_reader;
use ciborium::ser::into_writer;
use serde::{Serialize, de::DeserializeOwned};

/// Serialize a value into CBOR.
pub fn to_vec_cbor<T: Serialize>(value: &T) -> io::Result<Vec<u8>> {
    let mut buf = Vec::new();
    write_cbor(value, &mut buf)?;
    Ok(buf)
}

/// Serialize a value into CBOR and write it into the provided sink.
pub fn write_cbor<T: Serialize, W: Write>(value: &T, mut writer: W) -> io::Result<()> {
    into_writer(value, &mut writer).map_err(|err| match err {
        ciborium::ser::Error::Io(io_err) => io_err,
        other => io::Error::new(io::ErrorKind::InvalidData, other.to_string()),
    })
}

/// Deserialize a value from CBOR bytes.
pub fn from_slice_cbor<T: DeserializeOwned>(bytes: &[u8]) -> io::Result<T> {
    read_cbor(bytes)
}

/// Deserialize a value from an arbitrary reader.
pub fn read_cbor<T: DeserializeOwned, R: Read>(reader: R) -> io::Result<T> {
    from_reader(reader).map_err(|err| match err {
        ciborium::de::Error::Io(io_err) => io_err,
        other => io::Error::new(io::ErrorKind::InvalidData, other.to_string()),
    })
}

#[cfg(test)]
mod tests {
    use serde::{Deserialize, Serialize};

    use super::*;

    #[derive(Debug, PartialEq, Eq, Serialize, Deserialize)]
    struct Envelope {
        tag: u32,
        body: Vec<u8>,
    }

    #[test]
    fn round_trips_struct() {
        let item = Envelope {
            tag: 7,
            body: vec![1, 2, 3],
        };
        let encoded = to_vec_cbor(&item).expect("encode");
        let decoded: Envelope = from_slice_cbor(&encoded).expect("decode");
        assert_eq!(decoded, item);
    }

    #[test]
    fn rejects_garbage() {
        let result: io::Result<Envelope> = from_slice_cbor(&[0xff, 0x00, 0x13]);
        assert!(result.is_err());
    }
}
