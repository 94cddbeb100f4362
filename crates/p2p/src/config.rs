use std::net::SocketAddr;

use crate::message::NetAddress;

/// Runtime configuration for the networking stack.
///
/// The timer roles are fixed by the protocol; the values are deployment
/// inputs.  All intervals and timeouts are in seconds.
#[derive(Clone, Debug)]
pub struct NetworkConfig {
    /// Address on which to accept inbound peers.
    pub bind: SocketAddr,
    /// Peers to dial directly at startup.  When non-empty, the address-pool
    /// dialer stays off.
    pub connect: Vec<SocketAddr>,
    /// Seed addresses feeding the address pool.
    pub seeds: Vec<NetAddress>,
    /// Maximum number of outbound connections the dialer maintains.
    pub max_outbound: usize,
    /// Messages queued per connection before the peer counts as stalled.
    pub outbound_queue: usize,
    /// Maximum bytes per message frame.
    pub max_frame_bytes: usize,
    /// Version handshake must finish within this long.
    pub setup_timeout: u64,
    /// A sent ping must be answered within this long.
    pub ping_wait_timeout: u64,
    /// Unanswered pings tolerated before disconnecting.
    pub max_ping_failures: u32,
    pub broad_local_address_interval: u64,
    pub send_address_interval: u64,
    pub ping_send_interval: u64,
    pub check_timeout_interval: u64,
    /// Initial-sync progress watchdog period.
    pub check_sync_interval: u64,
    /// Initial sync ends once the milestone head is this close to now.
    pub sync_time_threshold: u64,
    /// A requested bundle must arrive within this long.
    pub sync_request_timeout: u64,
    /// Recipients sampled per address relay round.
    pub max_peers_to_relay_addr: usize,
    /// Blocks served per bundle.
    pub bundle_limit: usize,
    /// An address is not dialed twice within this long.
    pub dial_cooldown: u64,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:7877".parse().expect("well-formed bind address"),
            connect: Vec::new(),
            seeds: Vec::new(),
            max_outbound: 8,
            outbound_queue: 1024,
            max_frame_bytes: 2 * 1024 * 1024,
            setup_timeout: 3 * 60,
            ping_wait_timeout: 3 * 60,
            max_ping_failures: 3,
            broad_local_address_interval: 24 * 60 * 60,
            send_address_interval: 300,
            ping_send_interval: 10,
            check_timeout_interval: 1,
            check_sync_interval: 10,
            sync_time_threshold: 300,
            sync_request_timeout: 30,
            max_peers_to_relay_addr: 4,
            bundle_limit: 100,
            dial_cooldown: 120,
        }
    }
}
