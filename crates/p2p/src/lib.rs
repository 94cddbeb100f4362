//! Peer-to-peer networking for trident nodes.
//!
//! The transport produces framed messages into one event queue; the peer
//! manager drains it, drives per-peer handshake and sync state, and feeds
//! blocks, transactions and address gossip to the collaborators behind the
//! [`DagService`] and [`MempoolService`] seams.

mod addrman;
mod clock;
mod codec;
mod config;
mod connection;
mod error;
mod message;
mod peer;
mod peerman;
mod scheduler;
mod services;
#[cfg(test)]
mod testutil;

pub use addrman::AddressManager;
pub use config::NetworkConfig;
pub use connection::{ConnectionEvent, ConnectionHandle, ConnectionId, ConnectionManager};
pub use error::NetworkError;
pub use message::{
    AddressMessage, BundlePayload, GetDataKind, MAX_ADDRESS_SIZE, NetAddress, NetMessage,
    PROTOCOL_VERSION, VersionPayload,
};
pub use peer::Peer;
pub use peerman::PeerManager;
pub use services::{BlockAdmission, DagService, MempoolService};
