//! Known peer address pool with recency tracking.

use std::collections::HashMap;

use parking_lot::RwLock;
use rand::seq::IteratorRandom;
use tracing::info;

use crate::message::NetAddress;

#[derive(Clone, Copy, Debug, Default)]
struct AddressInfo {
    last_try: u64,
    last_seen: u64,
    /// Never successfully connected to yet.
    is_new: bool,
}

#[derive(Default)]
struct AddrInner {
    addresses: HashMap<NetAddress, AddressInfo>,
    local: Option<NetAddress>,
    next_seed: usize,
}

pub struct AddressManager {
    seeds: Vec<NetAddress>,
    inner: RwLock<AddrInner>,
}

impl AddressManager {
    pub fn new(seeds: Vec<NetAddress>) -> Self {
        Self {
            seeds,
            inner: RwLock::new(AddrInner::default()),
        }
    }

    /// Seed the pool.  Seeds count as new addresses until tried.
    pub fn init(&self) {
        let mut inner = self.inner.write();
        for seed in &self.seeds {
            inner.addresses.entry(*seed).or_insert(AddressInfo {
                is_new: true,
                ..AddressInfo::default()
            });
        }
        info!(seeds = self.seeds.len(), "address manager initialized");
    }

    /// Round-robin over the configured seeds.
    pub fn get_one_seed(&self) -> Option<NetAddress> {
        if self.seeds.is_empty() {
            return None;
        }
        let mut inner = self.inner.write();
        let seed = self.seeds[inner.next_seed % self.seeds.len()];
        inner.next_seed = inner.next_seed.wrapping_add(1);
        Some(seed)
    }

    /// Random draw from the pool.
    pub fn get_one_address(&self, only_new: bool) -> Option<NetAddress> {
        let inner = self.inner.read();
        let mut rng = rand::thread_rng();
        inner
            .addresses
            .iter()
            .filter(|(_, info)| !only_new || info.is_new)
            .map(|(addr, _)| *addr)
            .choose(&mut rng)
    }

    /// Store a routable address; non-routable input is dropped.
    pub fn add_new_address(&self, address: NetAddress) {
        if !address.is_routable() {
            return;
        }
        let mut inner = self.inner.write();
        if Some(address) == inner.local {
            return;
        }
        let now = crate::clock::unix_time();
        inner
            .addresses
            .entry(address)
            .and_modify(|info| info.last_seen = now)
            .or_insert(AddressInfo {
                last_seen: now,
                is_new: true,
                ..AddressInfo::default()
            });
    }

    pub fn get_last_try(&self, address: &NetAddress) -> u64 {
        self.inner
            .read()
            .addresses
            .get(address)
            .map(|info| info.last_try)
            .unwrap_or(0)
    }

    pub fn set_last_try(&self, address: &NetAddress, now: u64) {
        let mut inner = self.inner.write();
        if let Some(info) = inner.addresses.get_mut(address) {
            info.last_try = now;
            info.is_new = false;
        }
    }

    pub fn is_seed_address(&self, address: &NetAddress) -> bool {
        self.seeds.iter().any(|seed| seed == address)
    }

    pub fn set_local_address(&self, address: NetAddress) {
        let mut inner = self.inner.write();
        inner.local = Some(address);
        inner.addresses.remove(&address);
    }

    pub fn local_address(&self) -> Option<NetAddress> {
        self.inner.read().local
    }

    /// Random sample of up to `max` known addresses for gossip.
    pub fn addresses_batch(&self, max: usize) -> Vec<NetAddress> {
        let inner = self.inner.read();
        let mut rng = rand::thread_rng();
        inner
            .addresses
            .keys()
            .copied()
            .choose_multiple(&mut rng, max)
    }

    pub fn size(&self) -> usize {
        self.inner.read().addresses.len()
    }
}

#[cfg(test)]
mod tests {
    use std::net::{IpAddr, Ipv4Addr};

    use super::*;

    fn addr(last: u8) -> NetAddress {
        NetAddress::new(IpAddr::V4(Ipv4Addr::new(8, 8, 8, last)), 7877)
    }

    #[test]
    fn stores_routable_drops_the_rest() {
        let manager = AddressManager::new(Vec::new());
        manager.add_new_address(addr(1));
        manager.add_new_address(NetAddress::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 7877));
        assert_eq!(manager.size(), 1);
        assert_eq!(manager.get_one_address(false), Some(addr(1)));
    }

    #[test]
    fn tracks_last_try_recency() {
        let manager = AddressManager::new(Vec::new());
        manager.add_new_address(addr(2));
        assert_eq!(manager.get_last_try(&addr(2)), 0);
        manager.set_last_try(&addr(2), 1234);
        assert_eq!(manager.get_last_try(&addr(2)), 1234);
        // Tried addresses are no longer "new".
        assert_eq!(manager.get_one_address(true), None);
    }

    #[test]
    fn seeds_round_robin_and_are_flagged() {
        let manager = AddressManager::new(vec![addr(10), addr(11)]);
        manager.init();
        assert!(manager.is_seed_address(&addr(10)));
        assert!(!manager.is_seed_address(&addr(12)));
        let first = manager.get_one_seed().unwrap();
        let second = manager.get_one_seed().unwrap();
        assert_ne!(first, second);
        assert_eq!(manager.get_one_seed().unwrap(), first);
    }

    #[test]
    fn local_address_is_excluded_from_the_pool() {
        let manager = AddressManager::new(Vec::new());
        manager.set_local_address(addr(3));
        manager.add_new_address(addr(3));
        assert_eq!(manager.size(), 0);
        assert_eq!(manager.local_address(), Some(addr(3)));
    }

    #[test]
    fn batch_is_bounded() {
        let manager = AddressManager::new(Vec::new());
        for last in 1..=50 {
            manager.add_new_address(addr(last));
        }
        assert_eq!(manager.addresses_batch(10).len(), 10);
        assert_eq!(manager.addresses_batch(100).len(), 50);
    }
}
