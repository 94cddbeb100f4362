//! Wire message set exchanged between peers.

use std::fmt;
use std::net::{IpAddr, SocketAddr};

use codec::Hash256;
use serde::{Deserialize, Serialize};
use serde_bytes::ByteBuf;

/// Handshake protocol version.
pub const PROTOCOL_VERSION: u32 = 1;

/// An `Addr` message may carry at most this many entries; larger messages
/// are dropped whole.
pub const MAX_ADDRESS_SIZE: usize = 1000;

/// Network endpoint advertised in version and address messages.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NetAddress {
    pub ip: IpAddr,
    pub port: u16,
}

impl NetAddress {
    pub fn new(ip: IpAddr, port: u16) -> Self {
        Self { ip, port }
    }

    pub fn to_socket_addr(self) -> SocketAddr {
        SocketAddr::new(self.ip, self.port)
    }

    /// Whether this address is worth storing and relaying.
    pub fn is_routable(&self) -> bool {
        match self.ip {
            IpAddr::V4(ip) => {
                !(ip.is_unspecified()
                    || ip.is_loopback()
                    || ip.is_broadcast()
                    || ip.is_link_local()
                    || ip.is_multicast())
            }
            IpAddr::V6(ip) => !(ip.is_unspecified() || ip.is_loopback() || ip.is_multicast()),
        }
    }
}

impl From<SocketAddr> for NetAddress {
    fn from(addr: SocketAddr) -> Self {
        Self::new(addr.ip(), addr.port())
    }
}

impl fmt::Display for NetAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_socket_addr())
    }
}

/// First message in both directions of the handshake.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionPayload {
    pub client_version: u32,
    /// Random per-process identifier; detects self-connects.
    pub local_id: u64,
    pub best_height: u64,
    pub timestamp: u64,
    pub address_you: NetAddress,
    pub address_me: NetAddress,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddressMessage {
    pub addresses: Vec<NetAddress>,
}

impl AddressMessage {
    pub fn new(addresses: Vec<NetAddress>) -> Self {
        Self { addresses }
    }
}

/// What a `GetData` request asks for.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum GetDataKind {
    /// Individual blocks by hash.
    Blocks,
    /// A batch of blocks following a milestone locator.
    Bundle,
}

/// Multi-block batch answering a bundle request during initial sync.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BundlePayload {
    pub nonce: u64,
    /// Canonically encoded blocks, in admission order.
    pub blocks: Vec<ByteBuf>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum NetMessage {
    Version(VersionPayload),
    VerAck,
    Ping(u64),
    Pong(u64),
    Addr(AddressMessage),
    GetAddr,
    /// Canonically encoded block.
    Block(#[serde(with = "serde_bytes")] Vec<u8>),
    /// Canonically encoded transaction.
    Tx(#[serde(with = "serde_bytes")] Vec<u8>),
    GetData {
        kind: GetDataKind,
        hashes: Vec<Hash256>,
        nonce: u64,
    },
    Inv {
        hashes: Vec<Hash256>,
        nonce: u64,
    },
    NotFound {
        nonce: u64,
    },
    Bundle(BundlePayload),
}

impl NetMessage {
    pub fn kind(&self) -> &'static str {
        match self {
            NetMessage::Version(_) => "version",
            NetMessage::VerAck => "verack",
            NetMessage::Ping(_) => "ping",
            NetMessage::Pong(_) => "pong",
            NetMessage::Addr(_) => "addr",
            NetMessage::GetAddr => "getaddr",
            NetMessage::Block(_) => "block",
            NetMessage::Tx(_) => "tx",
            NetMessage::GetData { .. } => "getdata",
            NetMessage::Inv { .. } => "inv",
            NetMessage::NotFound { .. } => "notfound",
            NetMessage::Bundle(_) => "bundle",
        }
    }
}
