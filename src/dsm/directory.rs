//! Per-owner-node directory: the source of truth for a local page's
//! sharer/exclusive-owner state. Mutated only by the owning node's DSM
//! thread; remote nodes see it only through request/response, which
//! sidesteps distributed locking entirely.

use std::collections::HashMap;

use crate::dsm::address::DsmAddress;
use crate::ids::NodeId;

/// Overflow policy for the bounded sharer set: the spec leaves the exact
/// capacity (`SERAPH_AETHER_MAX_SHARERS`) unspecified; this picks a bounded
/// N and force-invalidates the oldest sharers on overflow (see DESIGN.md).
pub const MAX_SHARERS: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DirState {
    Invalid,
    Shared,
    Exclusive,
}

#[derive(Debug, Clone)]
pub struct DirectoryEntry {
    pub offset: u32,
    pub state: DirState,
    pub exclusive_owner: Option<NodeId>,
    pub sharers: Vec<NodeId>,
    pub generation: u64,
}

impl DirectoryEntry {
    #[must_use]
    fn new(offset: u32) -> Self {
        Self { offset, state: DirState::Invalid, exclusive_owner: None, sharers: Vec::new(), generation: 0 }
    }

    /// Add a sharer, force-invalidating the oldest if at `MAX_SHARERS`.
    /// Returns any sharer forced out.
    fn add_sharer(&mut self, node: NodeId) -> Option<NodeId> {
        if self.sharers.contains(&node) {
            return None;
        }
        let mut evicted = None;
        if self.sharers.len() >= MAX_SHARERS {
            evicted = Some(self.sharers.remove(0));
        }
        self.sharers.push(node);
        evicted
    }
}

/// Directory for every page this node owns.
#[derive(Debug, Default)]
pub struct Directory {
    entries: HashMap<u32, DirectoryEntry>,
}

impl Directory {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entry(&mut self, offset: u32) -> &mut DirectoryEntry {
        self.entries.entry(offset).or_insert_with(|| DirectoryEntry::new(offset))
    }

    #[must_use]
    pub fn get(&self, offset: u32) -> Option<&DirectoryEntry> {
        self.entries.get(&offset)
    }

    /// Grant the requester SHARED access, adding it to the sharer set.
    /// Returns any sharer force-invalidated by an overflowing set.
    pub fn grant_shared(&mut self, offset: u32, requester: NodeId) -> Option<NodeId> {
        let entry = self.entry(offset);
        entry.state = DirState::Shared;
        entry.exclusive_owner = None;
        entry.add_sharer(requester)
    }

    /// Grant the requester EXCLUSIVE access: every current sharer (other
    /// than the requester) is invalidated, and generation is bumped.
    /// Returns the set of nodes to send INVALIDATE to.
    pub fn grant_exclusive(&mut self, offset: u32, requester: NodeId) -> Vec<NodeId> {
        let entry = self.entry(offset);
        let to_invalidate: Vec<NodeId> =
            entry.sharers.iter().copied().filter(|&n| n != requester).collect();
        if let Some(owner) = entry.exclusive_owner {
            if owner != requester && !to_invalidate.contains(&owner) {
                let mut all = to_invalidate.clone();
                all.push(owner);
                entry.sharers.clear();
                entry.state = DirState::Exclusive;
                entry.exclusive_owner = Some(requester);
                entry.generation += 1;
                return all;
            }
        }
        entry.sharers.clear();
        entry.state = DirState::Exclusive;
        entry.exclusive_owner = Some(requester);
        entry.generation += 1;
        to_invalidate
    }

    #[must_use]
    pub fn generation(&self, offset: u32) -> u64 {
        self.entries.get(&offset).map_or(0, |e| e.generation)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exclusive_grant_invalidates_all_other_sharers() {
        let mut dir = Directory::new();
        dir.grant_shared(0, NodeId(1));
        dir.grant_shared(0, NodeId(2));
        dir.grant_shared(0, NodeId(3));
        let invalidated = dir.grant_exclusive(0, NodeId(2));
        assert_eq!(invalidated.len(), 2);
        assert!(invalidated.contains(&NodeId(1)));
        assert!(invalidated.contains(&NodeId(3)));
        assert_eq!(dir.get(0).unwrap().exclusive_owner, Some(NodeId(2)));
    }

    #[test]
    fn sharer_overflow_force_invalidates_oldest() {
        let mut dir = Directory::new();
        for i in 0..MAX_SHARERS as u32 {
            dir.grant_shared(0, NodeId(i));
        }
        let evicted = dir.grant_shared(0, NodeId(9999));
        assert_eq!(evicted, Some(NodeId(0)));
        assert_eq!(dir.get(0).unwrap().sharers.len(), MAX_SHARERS);
    }
}
