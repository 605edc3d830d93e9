//! Bounded, LRU-evicted page cache. A page is in at most one of
//! {EXCLUSIVE, SHARED(>=1 holders), INVALID (absent)}.

use std::collections::HashMap;

use crate::clock::VectorClock;
use crate::dsm::address::{DsmAddress, PAGE_SIZE};
use crate::ids::NodeId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheLineState {
    Invalid,
    Shared,
    Exclusive,
    Modified,
}

#[derive(Debug, Clone)]
pub struct PageCacheEntry {
    pub dsm_addr: DsmAddress,
    pub owner_node: NodeId,
    pub generation: u64,
    pub state: CacheLineState,
    pub dirty: bool,
    pub vclock: VectorClock,
    pub page_bytes: Vec<u8>,
}

impl PageCacheEntry {
    #[must_use]
    fn new(dsm_addr: DsmAddress, owner_node: NodeId, generation: u64) -> Self {
        Self {
            dsm_addr,
            owner_node,
            generation,
            state: CacheLineState::Shared,
            dirty: false,
            vclock: VectorClock::new(),
            page_bytes: vec![0u8; PAGE_SIZE],
        }
    }
}

/// Intrusive LRU list realized over a `Vec`-backed order list for
/// simplicity; the entry map and the order list are always mutated
/// together under the same lock, per the coarse-cache-lock invariant.
pub struct PageCache {
    capacity: usize,
    entries: HashMap<DsmAddress, PageCacheEntry>,
    lru_order: Vec<DsmAddress>,
}

impl PageCache {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self { capacity, entries: HashMap::new(), lru_order: Vec::new() }
    }

    #[must_use]
    pub fn get(&mut self, addr: DsmAddress) -> Option<&PageCacheEntry> {
        if self.entries.contains_key(&addr) {
            self.touch(addr);
        }
        self.entries.get(&addr)
    }

    #[must_use]
    pub fn contains(&self, addr: DsmAddress) -> bool {
        self.entries.contains_key(&addr)
    }

    fn touch(&mut self, addr: DsmAddress) {
        if let Some(pos) = self.lru_order.iter().position(|&a| a == addr) {
            self.lru_order.remove(pos);
        }
        self.lru_order.push(addr);
    }

    /// Install a freshly-fetched page, evicting the LRU entry if at
    /// capacity. Returns the evicted address, if any.
    pub fn install(
        &mut self,
        addr: DsmAddress,
        owner_node: NodeId,
        generation: u64,
        bytes: &[u8],
        vclock: VectorClock,
        state: CacheLineState,
    ) -> Option<DsmAddress> {
        let mut evicted = None;
        if !self.entries.contains_key(&addr) && self.entries.len() >= self.capacity {
            if let Some(victim) = self.lru_order.first().copied() {
                self.entries.remove(&victim);
                self.lru_order.remove(0);
                evicted = Some(victim);
            }
        }
        let mut entry = PageCacheEntry::new(addr, owner_node, generation);
        entry.page_bytes[..bytes.len().min(PAGE_SIZE)].copy_from_slice(&bytes[..bytes.len().min(PAGE_SIZE)]);
        entry.vclock = vclock;
        entry.state = state;
        self.entries.insert(addr, entry);
        self.touch(addr);
        evicted
    }

    pub fn invalidate(&mut self, addr: DsmAddress) -> bool {
        if self.entries.remove(&addr).is_some() {
            if let Some(pos) = self.lru_order.iter().position(|&a| a == addr) {
                self.lru_order.remove(pos);
            }
            true
        } else {
            false
        }
    }

    pub fn update_after_write(&mut self, addr: DsmAddress, generation: u64, bytes: &[u8]) {
        self.touch(addr);
        if let Some(entry) = self.entries.get_mut(&addr) {
            entry.generation = generation;
            entry.state = CacheLineState::Exclusive;
            entry.dirty = true;
            entry.vclock.increment(entry.owner_node);
            entry.page_bytes[..bytes.len().min(PAGE_SIZE)].copy_from_slice(&bytes[..bytes.len().min(PAGE_SIZE)]);
        }
    }

    #[must_use]
    pub fn exclusive_count(&self) -> usize {
        self.entries.values().filter(|e| e.state == CacheLineState::Exclusive).count()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dsm::address::Region;

    fn addr(offset: u32) -> DsmAddress {
        DsmAddress::new(Region::Dsm, NodeId(1), false, offset)
    }

    #[test]
    fn eviction_is_lru() {
        let mut cache = PageCache::new(2);
        cache.install(addr(0), NodeId(1), 0, &[1], VectorClock::new(), CacheLineState::Shared);
        cache.install(addr(4096), NodeId(1), 0, &[2], VectorClock::new(), CacheLineState::Shared);
        cache.get(addr(0));
        let evicted = cache.install(addr(8192), NodeId(1), 0, &[3], VectorClock::new(), CacheLineState::Shared);
        assert_eq!(evicted, Some(addr(4096)));
        assert!(cache.contains(addr(0)));
        assert!(cache.contains(addr(8192)));
    }
}
