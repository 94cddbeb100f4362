//! Peer lifecycle and message dispatch: connection acceptance, handshake
//! supervision, demultiplexing, broadcast policy, outbound dialing, the
//! initial-sync driver and the periodic scheduler.

use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use codec::Decodable as _;
use consensus::{Block, BlockSource, params};
use parking_lot::{Mutex, RwLock};
use rand::{Rng, RngCore, rngs::OsRng};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use tx::Transaction;

use crate::addrman::AddressManager;
use crate::clock::unix_time;
use crate::config::NetworkConfig;
use crate::connection::{ConnectionEvent, ConnectionHandle, ConnectionId, ConnectionManager};
use crate::error::NetworkError;
use crate::message::{AddressMessage, GetDataKind, MAX_ADDRESS_SIZE, NetAddress, NetMessage};
use crate::peer::Peer;
use crate::scheduler::{PeriodicJob, Scheduler};
use crate::services::{BlockAdmission, DagService, MempoolService};

/// Address-pool draws per dial round.
const ADDRESS_DIAL_ATTEMPTS: usize = 100;

pub struct PeerManager {
    inner: Arc<PeerManagerInner>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    event_rx: Mutex<Option<mpsc::Receiver<ConnectionEvent>>>,
}

struct PeerManagerInner {
    my_id: u64,
    config: Arc<NetworkConfig>,
    conn_man: ConnectionManager,
    addr_man: Arc<AddressManager>,
    dag: Arc<dyn DagService>,
    mempool: Arc<dyn MempoolService>,
    peer_map: RwLock<HashMap<ConnectionId, Arc<Peer>>>,
    /// Dial targets between connect() and the Opened event.
    pending_peers: Mutex<HashMap<NetAddress, u64>>,
    initial_sync: AtomicBool,
    sync_peer: Mutex<Option<Arc<Peer>>>,
    sync_watch: Mutex<SyncWatch>,
    scheduler: Mutex<Scheduler>,
    interrupt: AtomicBool,
}

#[derive(Default)]
struct SyncWatch {
    next_check: u64,
    last_bundle_time: u64,
}

impl PeerManager {
    /// Requires the network parameters to be installed already: the frame
    /// codec takes its magic from them.
    pub fn new(
        config: NetworkConfig,
        addr_man: Arc<AddressManager>,
        dag: Arc<dyn DagService>,
        mempool: Arc<dyn MempoolService>,
    ) -> Self {
        let config = Arc::new(config);
        let (conn_man, event_rx) =
            ConnectionManager::new(params().magic, config.max_frame_bytes, config.outbound_queue);
        let mut rng = OsRng;
        let inner = Arc::new(PeerManagerInner {
            my_id: rng.next_u64(),
            config,
            conn_man,
            addr_man,
            dag,
            mempool,
            peer_map: RwLock::new(HashMap::new()),
            pending_peers: Mutex::new(HashMap::new()),
            initial_sync: AtomicBool::new(true),
            sync_peer: Mutex::new(None),
            sync_watch: Mutex::new(SyncWatch::default()),
            scheduler: Mutex::new(Scheduler::default()),
            interrupt: AtomicBool::new(false),
        });
        Self {
            inner,
            tasks: Mutex::new(Vec::new()),
            event_rx: Mutex::new(Some(event_rx)),
        }
    }

    /// Bind, start accepting, and launch the long-running tasks.  Returns
    /// the bound address.  Bind or listen failure is fatal.
    pub async fn start(&self) -> Result<SocketAddr, NetworkError> {
        let inner = self.inner.clone();
        info!("starting the peer manager");
        inner.addr_man.init();
        {
            let mut scheduler = inner.scheduler.lock();
            scheduler.add(PeriodicJob::CheckTimeout, inner.config.check_timeout_interval);
            scheduler.add(
                PeriodicJob::BroadcastLocalAddress,
                inner.config.broad_local_address_interval,
            );
            scheduler.add(PeriodicJob::SendAddresses, inner.config.send_address_interval);
            scheduler.add(PeriodicJob::SendPing, inner.config.ping_send_interval);
        }

        let local = inner.conn_man.listen(inner.config.bind).await?;
        inner.addr_man.set_local_address(NetAddress::from(local));

        let event_rx = self
            .event_rx
            .lock()
            .take()
            .expect("peer manager started twice");

        let mut tasks = self.tasks.lock();
        tasks.push(tokio::spawn(PeerManagerInner::handle_message_loop(
            inner.clone(),
            event_rx,
        )));
        if inner.config.connect.is_empty() {
            tasks.push(tokio::spawn(PeerManagerInner::open_connection_loop(
                inner.clone(),
            )));
        } else {
            for addr in inner.config.connect.clone() {
                let inner = inner.clone();
                tokio::spawn(async move {
                    inner.dial(NetAddress::from(addr)).await;
                });
            }
        }
        tasks.push(tokio::spawn(PeerManagerInner::schedule_loop(inner.clone())));
        tasks.push(tokio::spawn(PeerManagerInner::initial_sync_loop(
            inner.clone(),
        )));
        Ok(local)
    }

    /// Set the interrupt, unblock the receiver, join the tasks in spawn
    /// order, then drop every peer and the transport.
    pub async fn stop(&self) {
        info!("stopping the peer manager");
        self.inner.interrupt.store(true, Ordering::Release);
        self.inner.conn_man.quit_queue().await;
        let tasks: Vec<_> = self.tasks.lock().drain(..).collect();
        for task in tasks {
            let _ = task.await;
        }
        let peers: Vec<_> = self.inner.peer_map.read().values().cloned().collect();
        for peer in peers {
            peer.disconnect();
        }
        self.inner.peer_map.write().clear();
        self.inner.conn_man.stop();
    }

    pub async fn connect_to(&self, addr: SocketAddr) {
        self.inner.dial(NetAddress::from(addr)).await;
    }

    pub fn my_id(&self) -> u64 {
        self.inner.my_id
    }

    pub fn is_initial_sync(&self) -> bool {
        self.inner.initial_sync.load(Ordering::Acquire)
    }

    pub fn connected_peer_size(&self) -> usize {
        self.inner.peer_map.read().len()
    }

    pub fn fully_connected_peer_size(&self) -> usize {
        self.inner
            .peer_map
            .read()
            .values()
            .filter(|peer| peer.is_fully_connected())
            .count()
    }

    /// Broadcast a locally produced or admitted block.
    pub fn relay_block(&self, bytes: &[u8], origin: Option<ConnectionId>) {
        self.inner.relay_block(bytes, origin);
    }

    pub fn relay_transaction(&self, bytes: &[u8], origin: Option<ConnectionId>) {
        self.inner.relay_transaction(bytes, origin);
    }

    pub fn relay_address_msg(&self, message: AddressMessage, origin: Option<ConnectionId>) {
        self.inner.relay_address_msg(message, origin);
    }
}

impl PeerManagerInner {
    async fn handle_message_loop(
        inner: Arc<PeerManagerInner>,
        mut events: mpsc::Receiver<ConnectionEvent>,
    ) {
        while !inner.interrupt.load(Ordering::Acquire) {
            match events.recv().await {
                Some(ConnectionEvent::Opened(handle)) => inner.on_connection_created(handle),
                Some(ConnectionEvent::Message(id, message)) => {
                    inner.handle_net_message(id, message);
                }
                Some(ConnectionEvent::Closed(id)) => inner.on_connection_closed(id),
                Some(ConnectionEvent::Shutdown) | None => break,
            }
        }
    }

    fn on_connection_created(&self, handle: ConnectionHandle) {
        let address = NetAddress::from(handle.remote());
        self.pending_peers.lock().remove(&address);
        let peer = Arc::new(Peer::new(
            handle.clone(),
            address,
            self.addr_man.is_seed_address(&address),
            self.addr_man.clone(),
            self.dag.clone(),
            self.my_id,
            self.config.clone(),
        ));
        self.peer_map.write().insert(handle.id(), peer.clone());
        info!(
            remote = %address,
            inbound = handle.is_inbound(),
            connected = self.peer_map.read().len(),
            "connection established"
        );
        // Outbound side opens the version exchange.
        if !peer.is_inbound() {
            peer.send_version(self.dag.best_milestone_height());
        }
    }

    fn on_connection_closed(&self, id: ConnectionId) {
        if let Some(peer) = self.peer_map.write().remove(&id) {
            peer.disconnect();
            debug!(remote = %peer.address, "peer removed");
        }
    }

    fn handle_net_message(&self, id: ConnectionId, message: NetMessage) {
        // Block ingestion resumes only after initial sync completes;
        // anything arriving earlier would flood the DAG.
        if self.initial_sync.load(Ordering::Acquire) && matches!(message, NetMessage::Block(_)) {
            return;
        }
        let Some(peer) = self.peer_map.read().get(&id).cloned() else {
            return;
        };
        if !peer.is_valid() {
            return;
        }
        match message {
            NetMessage::Block(bytes) => self.process_block(&bytes, &peer),
            NetMessage::Tx(bytes) => self.process_transaction(&bytes, &peer),
            NetMessage::Addr(message) => self.process_address_message(message, &peer),
            other => peer.process_message(other),
        }
    }

    fn process_block(&self, bytes: &[u8], peer: &Arc<Peer>) {
        let mut block = match Block::from_bytes(bytes) {
            Ok(block) => block,
            Err(err) => {
                warn!(peer = %peer.address, error = %err, "undecodable block");
                return;
            }
        };
        block.source = BlockSource::Network;
        match self.dag.add_new_block(Arc::new(block)) {
            BlockAdmission::Accepted => {
                self.relay_block(bytes, Some(peer.connection().id()));
            }
            BlockAdmission::Orphaned(missing) => {
                debug!(peer = %peer.address, missing = missing.len(), "fetching orphan parents");
                peer.send_message(NetMessage::GetData {
                    kind: GetDataKind::Blocks,
                    hashes: missing,
                    nonce: rand::random(),
                });
            }
            BlockAdmission::Duplicate => {}
            BlockAdmission::Invalid => {
                debug!(peer = %peer.address, "invalid block dropped");
            }
        }
    }

    fn process_transaction(&self, bytes: &[u8], peer: &Arc<Peer>) {
        let tx = match Transaction::from_bytes(bytes) {
            Ok(tx) => tx,
            Err(err) => {
                warn!(peer = %peer.address, error = %err, "undecodable transaction");
                return;
            }
        };
        if !tx.verify() {
            return;
        }
        if self.mempool.receive_tx(Arc::new(tx)) {
            self.relay_transaction(bytes, Some(peer.connection().id()));
        }
    }

    fn process_address_message(&self, message: AddressMessage, peer: &Arc<Peer>) {
        if message.addresses.len() > MAX_ADDRESS_SIZE {
            warn!(
                peer = %peer.address,
                size = message.addresses.len(),
                "received too many addresses, dropping them"
            );
        } else {
            info!(peer = %peer.address, size = message.addresses.len(), "received addresses");
            let mut relay = Vec::new();
            for address in message.addresses {
                if address.is_routable() {
                    self.addr_man.add_new_address(address);
                    relay.push(address);
                } else {
                    debug!(%address, "ignoring local or invalid address");
                }
            }
            if !relay.is_empty() {
                self.relay_address_msg(
                    AddressMessage::new(relay),
                    Some(peer.connection().id()),
                );
            }
        }

        // Seeds are only good for addresses; drop them once delivered.
        if peer.is_seed {
            warn!(peer = %peer.address, "disconnecting seed after address exchange");
            peer.disconnect();
        }
    }

    fn relay_block(&self, bytes: &[u8], origin: Option<ConnectionId>) {
        let peers: Vec<_> = self.peer_map.read().values().cloned().collect();
        for peer in peers {
            if Some(peer.connection().id()) == origin {
                continue;
            }
            // Every recipient gets an independent copy of the wire bytes.
            peer.send_message(NetMessage::Block(bytes.to_vec()));
        }
    }

    fn relay_transaction(&self, bytes: &[u8], origin: Option<ConnectionId>) {
        let peers: Vec<_> = self.peer_map.read().values().cloned().collect();
        for peer in peers {
            if Some(peer.connection().id()) == origin {
                continue;
            }
            peer.send_message(NetMessage::Tx(bytes.to_vec()));
        }
    }

    /// Forward an address batch to a random sample of peers.  Duplicate
    /// draws within one round are skipped, not redrawn, so up to
    /// `max_peers_to_relay_addr` recipients are reached.
    fn relay_address_msg(&self, message: AddressMessage, origin: Option<ConnectionId>) {
        let peers: Vec<_> = self.peer_map.read().values().cloned().collect();
        if peers.is_empty() {
            return;
        }
        let mut rng = rand::thread_rng();
        let mut selected = HashSet::new();
        for _ in 0..self.config.max_peers_to_relay_addr {
            let offset = rng.gen_range(0..peers.len());
            if !selected.insert(offset) {
                continue;
            }
            let peer = &peers[offset];
            if Some(peer.connection().id()) != origin {
                peer.relay_addr_msg(message.addresses.clone());
            }
        }
    }

    /// Disconnect peers that broke a deadline and reap invalid entries.
    fn check_timeout(&self) {
        let now = unix_time();
        let mut peer_map = self.peer_map.write();
        peer_map.retain(|_, peer| {
            if !peer.is_valid() {
                return false;
            }
            if peer.is_fully_connected() {
                if peer.last_ping_sent() + self.config.ping_wait_timeout < now
                    || peer.ping_failures() > self.config.max_ping_failures
                {
                    info!(peer = %peer.address, "disconnecting fully connected peer: ping timeout");
                    peer.disconnect();
                    return false;
                }
                if peer.is_sync_timeout(now) {
                    info!(peer = %peer.address, "disconnecting fully connected peer: sync timeout");
                    peer.disconnect();
                    return false;
                }
                true
            } else if peer.connected_at() + self.config.setup_timeout < now {
                info!(peer = %peer.address, "disconnecting peer: version handshake timeout");
                peer.disconnect();
                false
            } else {
                true
            }
        });
        drop(peer_map);

        let deadline = now.saturating_sub(self.config.setup_timeout);
        self.pending_peers.lock().retain(|_, started| *started > deadline);
    }

    fn has_connected_to(&self, address: &NetAddress) -> bool {
        if self.pending_peers.lock().contains_key(address) {
            return true;
        }
        self.peer_map.read().values().any(|peer| {
            peer.address == *address || peer.advertised_address() == Some(*address)
        })
    }

    async fn dial(&self, address: NetAddress) {
        self.pending_peers.lock().insert(address, unix_time());
        if let Err(err) = self.conn_man.connect(address.to_socket_addr()).await {
            warn!(%address, error = %err, "outbound connect failed");
            self.pending_peers.lock().remove(&address);
        }
    }

    async fn open_connection_loop(inner: Arc<PeerManagerInner>) {
        while !inner.interrupt.load(Ordering::Acquire) {
            tokio::time::sleep(Duration::from_secs(1)).await;
            if inner.interrupt.load(Ordering::Acquire) {
                break;
            }
            if inner.conn_man.outbound_count() > inner.config.max_outbound {
                continue;
            }

            if let Some(seed) = inner.addr_man.get_one_seed() {
                if !inner.has_connected_to(&seed) {
                    inner.dial(seed).await;
                }
            }

            let mut tries = 0;
            while tries < ADDRESS_DIAL_ATTEMPTS {
                tries += 1;
                // No more candidates in the pool this round.
                let Some(candidate) = inner.addr_man.get_one_address(false) else {
                    break;
                };
                if inner.has_connected_to(&candidate) {
                    continue;
                }
                let now = unix_time();
                if now.saturating_sub(inner.addr_man.get_last_try(&candidate))
                    < inner.config.dial_cooldown
                {
                    continue;
                }
                info!(address = %candidate, "trying outbound connection");
                inner.addr_man.set_last_try(&candidate, now);
                inner.dial(candidate).await;
                break;
            }
        }
    }

    async fn schedule_loop(inner: Arc<PeerManagerInner>) {
        while !inner.interrupt.load(Ordering::Acquire) {
            tokio::time::sleep(Duration::from_secs(1)).await;
            let due = inner.scheduler.lock().due(Instant::now());
            for job in due {
                match job {
                    PeriodicJob::CheckTimeout => inner.check_timeout(),
                    PeriodicJob::BroadcastLocalAddress => {
                        inner.for_each_peer(|peer| peer.send_local_address());
                    }
                    PeriodicJob::SendAddresses => {
                        inner.for_each_peer(|peer| peer.send_addresses());
                    }
                    PeriodicJob::SendPing => inner.for_each_peer(|peer| peer.send_ping()),
                }
            }
        }
    }

    fn for_each_peer(&self, action: impl Fn(&Arc<Peer>)) {
        let peers: Vec<_> = self.peer_map.read().values().cloned().collect();
        for peer in &peers {
            action(peer);
        }
    }

    /// Drive catch-up until the milestone head is close enough to now.
    async fn initial_sync_loop(inner: Arc<PeerManagerInner>) {
        while !inner.interrupt.load(Ordering::Acquire) {
            tokio::time::sleep(Duration::from_millis(100)).await;
            let now = unix_time();
            let head = inner.dag.milestone_head();
            if sync_complete(u64::from(head.time), now, inner.config.sync_time_threshold) {
                inner.initial_sync.store(false, Ordering::Release);
                *inner.sync_peer.lock() = None;
                info!("initial sync finished");
                break;
            }

            let sync_peer = {
                let mut slot = inner.sync_peer.lock();
                let stale = slot
                    .as_ref()
                    .map_or(true, |peer| !peer.is_valid() || !peer.is_sync_available());
                if stale {
                    *slot = inner
                        .peer_map
                        .read()
                        .values()
                        .find(|peer| {
                            peer.is_valid()
                                && peer.is_fully_connected()
                                && peer.is_sync_available()
                        })
                        .cloned();
                }
                slot.clone()
            };
            let Some(peer) = sync_peer else { continue };

            // Progress watchdog: the watermark must advance between checks.
            {
                let mut watch = inner.sync_watch.lock();
                if watch.next_check == 0 {
                    watch.next_check = now + inner.config.check_sync_interval;
                } else if now >= watch.next_check {
                    watch.next_check = now + inner.config.check_sync_interval;
                    if peer.last_bundle_ms_time() == watch.last_bundle_time {
                        info!(peer = %peer.address, "sync peer made no progress, disconnecting");
                        peer.disconnect();
                        continue;
                    }
                    watch.last_bundle_time = peer.last_bundle_ms_time();
                }
            }

            if inner.dag.is_downloading_empty() {
                peer.start_sync();
            }
        }
    }
}

/// Initial sync is over once the milestone head's block time is within the
/// threshold of the current time.
fn sync_complete(head_time: u64, now: u64, threshold: u64) -> bool {
    head_time >= now.saturating_sub(threshold)
}
