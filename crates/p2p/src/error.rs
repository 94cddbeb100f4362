use std::io;

use thiserror::Error;

use crate::connection::ConnectionId;

#[derive(Debug, Error)]
pub enum NetworkError {
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("bad network magic: expected {expected:#010x}, got {got:#010x}")]
    BadMagic { expected: u32, got: u32 },
    #[error("frame of {0} bytes exceeds limit")]
    FrameTooLarge(usize),
    #[error("connection {0} is gone")]
    ConnectionGone(ConnectionId),
    #[error("outbound queue full for connection {0}")]
    QueueFull(ConnectionId),
}
