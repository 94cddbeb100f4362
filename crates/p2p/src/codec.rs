//! Frame codec: every message travels as
//! `magic (4 bytes, LE) | varint length | CBOR body`.

use tokio::io::{AsyncReadExt, AsyncWriteExt};

use crate::error::NetworkError;
use crate::message::NetMessage;

const MAX_VARINT_BYTES: usize = 5;

pub async fn read_message<R>(
    reader: &mut R,
    magic: u32,
    max_len: usize,
) -> Result<NetMessage, NetworkError>
where
    R: AsyncReadExt + Unpin,
{
    let mut magic_buf = [0u8; 4];
    reader.read_exact(&mut magic_buf).await?;
    let got = u32::from_le_bytes(magic_buf);
    if got != magic {
        return Err(NetworkError::BadMagic {
            expected: magic,
            got,
        });
    }
    let len = read_varint(reader).await? as usize;
    if len > max_len {
        return Err(NetworkError::FrameTooLarge(len));
    }
    let mut buf = vec![0u8; len];
    reader.read_exact(&mut buf).await?;
    let message: NetMessage = codec::from_slice_cbor(&buf)?;
    Ok(message)
}

pub async fn write_message<W>(
    writer: &mut W,
    magic: u32,
    max_len: usize,
    message: &NetMessage,
) -> Result<(), NetworkError>
where
    W: AsyncWriteExt + Unpin,
{
    let encoded = codec::to_vec_cbor(message)?;
    if encoded.len() > max_len {
        return Err(NetworkError::FrameTooLarge(encoded.len()));
    }
    let mut header = Vec::with_capacity(4 + MAX_VARINT_BYTES);
    header.extend_from_slice(&magic.to_le_bytes());
    write_varint(encoded.len() as u32, &mut header);
    writer.write_all(&header).await?;
    writer.write_all(&encoded).await?;
    writer.flush().await?;
    Ok(())
}

async fn read_varint<R>(reader: &mut R) -> Result<u32, NetworkError>
where
    R: AsyncReadExt + Unpin,
{
    let mut result: u32 = 0;
    let mut shift = 0;
    for _ in 0..MAX_VARINT_BYTES {
        let byte = reader.read_u8().await?;
        result |= ((byte & 0x7F) as u32) << shift;
        if byte & 0x80 == 0 {
            return Ok(result);
        }
        shift += 7;
    }
    Err(NetworkError::FrameTooLarge(result as usize))
}

fn write_varint(value: u32, buf: &mut Vec<u8>) {
    let mut val = value;
    loop {
        let mut byte = (val & 0x7F) as u8;
        val >>= 7;
        if val != 0 {
            byte |= 0x80;
        }
        buf.push(byte);
        if val == 0 {
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use tokio::io::duplex;

    use super::*;

    const MAGIC: u32 = 0x5445_5354;

    #[tokio::test]
    async fn round_trips_message() {
        let (mut client, mut server) = duplex(256);
        let msg = NetMessage::Ping(42);
        write_message(&mut client, MAGIC, 1024, &msg)
            .await
            .expect("write");
        let decoded = read_message(&mut server, MAGIC, 1024).await.expect("read");
        assert_eq!(decoded, msg);
    }

    #[tokio::test]
    async fn rejects_wrong_magic() {
        let (mut client, mut server) = duplex(256);
        write_message(&mut client, 0x524F_434B, 1024, &NetMessage::Ping(1))
            .await
            .expect("write");
        let err = read_message(&mut server, MAGIC, 1024).await.unwrap_err();
        assert!(matches!(
            err,
            NetworkError::BadMagic {
                expected: MAGIC,
                got: 0x524F_434B
            }
        ));
    }

    #[tokio::test]
    async fn rejects_oversized_frame() {
        let (mut client, mut server) = duplex(4096);
        let msg = NetMessage::Block(vec![0u8; 512]);
        write_message(&mut client, MAGIC, 1024, &msg)
            .await
            .expect("write");
        let err = read_message(&mut server, MAGIC, 64).await.unwrap_err();
        assert!(matches!(err, NetworkError::FrameTooLarge(_)));
    }
}
