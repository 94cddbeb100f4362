//! Per-connection peer state machine: handshake, ping/pong, sync window
//! and address gossip.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};

use codec::{Decodable as _, Encodable as _};
use consensus::{Block, BlockSource};
use parking_lot::RwLock;
use serde_bytes::ByteBuf;
use tracing::{debug, info, warn};

use crate::addrman::AddressManager;
use crate::clock::unix_time;
use crate::config::NetworkConfig;
use crate::connection::ConnectionHandle;
use crate::error::NetworkError;
use crate::message::{
    AddressMessage, BundlePayload, GetDataKind, MAX_ADDRESS_SIZE, NetAddress, NetMessage,
    PROTOCOL_VERSION, VersionPayload,
};
use crate::services::{BlockAdmission, DagService};

pub struct Peer {
    pub address: NetAddress,
    connection: ConnectionHandle,
    pub is_seed: bool,
    /// Our own process id, echoed in the handshake to catch self-connects.
    my_id: u64,
    connected_at: AtomicU64,
    version: RwLock<Option<VersionPayload>>,
    own_version_sent: AtomicBool,
    fully_connected: AtomicBool,
    valid: AtomicBool,
    last_ping_sent: AtomicU64,
    last_ping_nonce: AtomicU64,
    ping_outstanding: AtomicBool,
    n_ping_failed: AtomicU32,
    /// Milestone timestamp of the last bundle received; the initial-sync
    /// watchdog reads this as a progress watermark.
    last_bundle_ms_time: AtomicU64,
    sync_available: AtomicBool,
    sync_nonce: AtomicU64,
    /// Unix time of the outstanding bundle request, 0 when none.
    sync_requested_at: AtomicU64,
    dag: Arc<dyn DagService>,
    addr_man: Arc<AddressManager>,
    config: Arc<NetworkConfig>,
}

impl Peer {
    pub(crate) fn new(
        connection: ConnectionHandle,
        address: NetAddress,
        is_seed: bool,
        addr_man: Arc<AddressManager>,
        dag: Arc<dyn DagService>,
        my_id: u64,
        config: Arc<NetworkConfig>,
    ) -> Self {
        let now = unix_time();
        Self {
            address,
            connection,
            is_seed,
            my_id,
            connected_at: AtomicU64::new(now),
            version: RwLock::new(None),
            own_version_sent: AtomicBool::new(false),
            fully_connected: AtomicBool::new(false),
            valid: AtomicBool::new(true),
            last_ping_sent: AtomicU64::new(now),
            last_ping_nonce: AtomicU64::new(0),
            ping_outstanding: AtomicBool::new(false),
            n_ping_failed: AtomicU32::new(0),
            last_bundle_ms_time: AtomicU64::new(0),
            sync_available: AtomicBool::new(false),
            sync_nonce: AtomicU64::new(0),
            sync_requested_at: AtomicU64::new(0),
            dag,
            addr_man,
            config,
        }
    }

    pub fn connection(&self) -> &ConnectionHandle {
        &self.connection
    }

    pub fn is_inbound(&self) -> bool {
        self.connection.is_inbound()
    }

    pub fn is_valid(&self) -> bool {
        self.valid.load(Ordering::Acquire) && self.connection.is_valid()
    }

    pub fn is_fully_connected(&self) -> bool {
        self.fully_connected.load(Ordering::Acquire)
    }

    pub fn is_sync_available(&self) -> bool {
        self.sync_available.load(Ordering::Acquire)
    }

    pub fn connected_at(&self) -> u64 {
        self.connected_at.load(Ordering::Acquire)
    }

    pub fn last_ping_sent(&self) -> u64 {
        self.last_ping_sent.load(Ordering::Acquire)
    }

    pub fn ping_failures(&self) -> u32 {
        self.n_ping_failed.load(Ordering::Acquire)
    }

    pub fn last_bundle_ms_time(&self) -> u64 {
        self.last_bundle_ms_time.load(Ordering::Acquire)
    }

    /// Remote process id, known after its version arrived.
    pub fn peer_id(&self) -> Option<u64> {
        self.version.read().as_ref().map(|v| v.local_id)
    }

    /// Address the remote advertised for itself in the handshake.
    pub fn advertised_address(&self) -> Option<NetAddress> {
        self.version.read().as_ref().map(|v| v.address_me)
    }

    /// Mark the peer for teardown.  Idempotent.
    pub fn disconnect(&self) {
        if self.valid.swap(false, Ordering::AcqRel) {
            info!(peer = %self.address, "disconnecting peer");
            self.connection.close();
        }
    }

    pub fn send_message(&self, message: NetMessage) {
        match self.connection.send_message(message) {
            Ok(()) => {}
            Err(NetworkError::QueueFull(id)) => {
                warn!(peer = %self.address, conn = %id, "outbound queue full, dropping peer");
                self.disconnect();
            }
            Err(_) => {
                // Connection already torn down; the timeout sweep reaps us.
            }
        }
    }

    pub fn send_version(&self, best_height: u64) {
        let payload = VersionPayload {
            client_version: PROTOCOL_VERSION,
            local_id: self.my_id,
            best_height,
            timestamp: unix_time(),
            address_you: self.address,
            address_me: self
                .addr_man
                .local_address()
                .unwrap_or_else(|| NetAddress::from(self.connection.remote())),
        };
        self.own_version_sent.store(true, Ordering::Release);
        self.send_message(NetMessage::Version(payload));
    }

    /// Periodic ping.  An unanswered previous ping counts as a failure.
    pub fn send_ping(&self) {
        if !self.is_fully_connected() || !self.is_valid() {
            return;
        }
        if self.ping_outstanding.load(Ordering::Acquire) {
            self.n_ping_failed.fetch_add(1, Ordering::AcqRel);
        }
        let nonce: u64 = rand::random();
        self.last_ping_nonce.store(nonce, Ordering::Release);
        self.last_ping_sent.store(unix_time(), Ordering::Release);
        self.ping_outstanding.store(true, Ordering::Release);
        self.send_message(NetMessage::Ping(nonce));
    }

    /// Periodic address gossip.
    pub fn send_addresses(&self) {
        if !self.is_fully_connected() {
            return;
        }
        let batch = self.addr_man.addresses_batch(MAX_ADDRESS_SIZE);
        if !batch.is_empty() {
            self.send_message(NetMessage::Addr(AddressMessage::new(batch)));
        }
    }

    /// Periodic broadcast of our own address.
    pub fn send_local_address(&self) {
        if let Some(local) = self.addr_man.local_address() {
            self.send_message(NetMessage::Addr(AddressMessage::new(vec![local])));
        }
    }

    pub fn relay_addr_msg(&self, addresses: Vec<NetAddress>) {
        self.send_message(NetMessage::Addr(AddressMessage::new(addresses)));
    }

    /// Ask this peer for the next bundle past our milestone head.  A no-op
    /// while a request is already in flight.
    pub fn start_sync(&self) {
        if !self.is_fully_connected() || !self.is_sync_available() {
            return;
        }
        if self.sync_requested_at.load(Ordering::Acquire) != 0 {
            return;
        }
        let nonce: u64 = rand::random();
        self.sync_nonce.store(nonce, Ordering::Release);
        self.sync_requested_at.store(unix_time(), Ordering::Release);
        let locator = self.dag.milestone_head().block_hash;
        debug!(peer = %self.address, %locator, "requesting bundle");
        self.send_message(NetMessage::GetData {
            kind: GetDataKind::Bundle,
            hashes: vec![locator],
            nonce,
        });
    }

    /// Whether an outstanding bundle request has gone unanswered too long.
    pub fn is_sync_timeout(&self, now: u64) -> bool {
        let requested_at = self.sync_requested_at.load(Ordering::Acquire);
        requested_at != 0 && now.saturating_sub(requested_at) > self.config.sync_request_timeout
    }

    /// Handle a message the peer manager did not route elsewhere.
    pub fn process_message(&self, message: NetMessage) {
        match message {
            NetMessage::Version(payload) => self.process_version(payload),
            NetMessage::VerAck => self.process_verack(),
            NetMessage::Ping(nonce) => self.send_message(NetMessage::Pong(nonce)),
            NetMessage::Pong(nonce) => self.process_pong(nonce),
            NetMessage::GetAddr => {
                let batch = self.addr_man.addresses_batch(MAX_ADDRESS_SIZE);
                self.send_message(NetMessage::Addr(AddressMessage::new(batch)));
            }
            NetMessage::GetData {
                kind,
                hashes,
                nonce,
            } => self.process_get_data(kind, hashes, nonce),
            NetMessage::Inv { hashes, .. } => self.process_inv(hashes),
            NetMessage::NotFound { nonce } => self.process_not_found(nonce),
            NetMessage::Bundle(bundle) => self.process_bundle(bundle),
            other => {
                debug!(peer = %self.address, kind = other.kind(), "unroutable message");
            }
        }
    }

    fn process_version(&self, payload: VersionPayload) {
        if payload.local_id == self.my_id {
            warn!(peer = %self.address, "connected to self, dropping");
            self.disconnect();
            return;
        }
        {
            let mut version = self.version.write();
            if version.is_some() {
                warn!(peer = %self.address, "duplicate version message");
                self.disconnect();
                return;
            }
            *version = Some(payload.clone());
        }
        self.addr_man.add_new_address(payload.address_me);

        // Inbound connections answer with their own version first.
        if self.is_inbound() {
            self.send_version(self.dag.best_milestone_height());
        }
        self.send_message(NetMessage::VerAck);
    }

    fn process_verack(&self) {
        if self.version.read().is_none() || !self.own_version_sent.load(Ordering::Acquire) {
            warn!(peer = %self.address, "verack before version exchange");
            self.disconnect();
            return;
        }
        if !self.fully_connected.swap(true, Ordering::AcqRel) {
            self.sync_available.store(true, Ordering::Release);
            info!(peer = %self.address, inbound = self.is_inbound(), "version handshake complete");
        }
    }

    fn process_pong(&self, nonce: u64) {
        if nonce == self.last_ping_nonce.load(Ordering::Acquire) {
            self.ping_outstanding.store(false, Ordering::Release);
            self.n_ping_failed.store(0, Ordering::Release);
        } else {
            debug!(peer = %self.address, "pong nonce mismatch");
        }
    }

    fn process_get_data(&self, kind: GetDataKind, hashes: Vec<codec::Hash256>, nonce: u64) {
        match kind {
            GetDataKind::Blocks => {
                let mut any_missing = false;
                for hash in &hashes {
                    match self.dag.block_bytes(hash) {
                        Some(bytes) => self.send_message(NetMessage::Block(bytes)),
                        None => any_missing = true,
                    }
                }
                if any_missing {
                    self.send_message(NetMessage::NotFound { nonce });
                }
            }
            GetDataKind::Bundle => {
                let Some(locator) = hashes.first() else {
                    self.send_message(NetMessage::NotFound { nonce });
                    return;
                };
                match self.dag.bundle_after(locator, self.config.bundle_limit) {
                    Some(blocks) => {
                        let blocks = blocks
                            .iter()
                            .map(|block| ByteBuf::from(block.to_bytes()))
                            .collect();
                        self.send_message(NetMessage::Bundle(BundlePayload { nonce, blocks }));
                    }
                    None => self.send_message(NetMessage::NotFound { nonce }),
                }
            }
        }
    }

    fn process_inv(&self, hashes: Vec<codec::Hash256>) {
        let unknown: Vec<_> = hashes
            .into_iter()
            .filter(|hash| !self.dag.contains(hash))
            .collect();
        if unknown.is_empty() {
            return;
        }
        debug!(peer = %self.address, count = unknown.len(), "requesting announced blocks");
        self.send_message(NetMessage::GetData {
            kind: GetDataKind::Blocks,
            hashes: unknown,
            nonce: rand::random(),
        });
    }

    fn process_not_found(&self, nonce: u64) {
        if nonce == self.sync_nonce.load(Ordering::Acquire) {
            debug!(peer = %self.address, "peer cannot serve our locator");
            self.sync_requested_at.store(0, Ordering::Release);
            self.sync_available.store(false, Ordering::Release);
        }
    }

    fn process_bundle(&self, bundle: BundlePayload) {
        self.sync_requested_at.store(0, Ordering::Release);
        let mut last_time = None;
        for bytes in &bundle.blocks {
            let mut block = match Block::from_bytes(bytes) {
                Ok(block) => block,
                Err(err) => {
                    warn!(peer = %self.address, error = %err, "undecodable block in bundle");
                    return;
                }
            };
            block.source = BlockSource::Network;
            last_time = Some(u64::from(block.header.time));
            if let BlockAdmission::Orphaned(missing) = self.dag.add_new_block(Arc::new(block)) {
                self.send_message(NetMessage::GetData {
                    kind: GetDataKind::Blocks,
                    hashes: missing,
                    nonce: rand::random(),
                });
            }
        }
        // The batch's milestone is its last block.
        if let Some(time) = last_time {
            self.last_bundle_ms_time.store(time, Ordering::Release);
        }
        debug!(peer = %self.address, blocks = bundle.blocks.len(), "bundle processed");
    }

    #[cfg(test)]
    pub(crate) fn set_connected_at_for_tests(&self, when: u64) {
        self.connected_at.store(when, Ordering::Release);
    }

    #[cfg(test)]
    pub(crate) fn set_last_ping_sent_for_tests(&self, when: u64) {
        self.last_ping_sent.store(when, Ordering::Release);
    }

    #[cfg(test)]
    pub(crate) fn force_fully_connected_for_tests(&self) {
        self.fully_connected.store(true, Ordering::Release);
        self.sync_available.store(true, Ordering::Release);
    }
}
