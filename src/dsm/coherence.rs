//! Directory-based coherence protocol tying the page cache, the
//! per-owner directory and vector clocks together, plus a small in-process
//! multi-node simulator used to exercise the protocol without real NICs.

use std::collections::HashMap;
use std::sync::Mutex;

use crate::clock::VectorClock;
use crate::dsm::address::{DsmAddress, Region, PAGE_SIZE};
use crate::dsm::cache::{CacheLineState, PageCache};
use crate::dsm::directory::Directory;
use crate::ids::{Chronon, NodeId, StrandId};
use crate::sched::Scheduler;
use crate::void::{VoidId, VoidReason, VoidRegistry};
use crate::void_loc;

/// Coherence wire messages. Framing (magic/version/length/request_id) lives
/// at the transport boundary; this is the payload the protocol reasons
/// about.
#[derive(Debug, Clone)]
pub enum CoherenceMessage {
    ReadRequest { addr: DsmAddress, requester: NodeId },
    WriteRequest { addr: DsmAddress, requester: NodeId },
    Invalidate { addr: DsmAddress },
    ReadResponse { addr: DsmAddress, generation: u64, bytes: Vec<u8>, vclock: VectorClock },
    WriteComplete { addr: DsmAddress, generation: u64 },
    PersistSync { addr: DsmAddress, generation: u64 },
}

/// Abstract NIC: the only thing the coherence protocol needs from the
/// network layer is the ability to hand a message to a node and get a
/// response back, or learn that the attempt failed.
pub trait CoherenceTransport: Send + Sync {
    fn exchange(
        &self,
        to: NodeId,
        msg: CoherenceMessage,
    ) -> Result<CoherenceMessage, VoidReason>;
}

/// Per-node coherence state: the directory for pages this node owns, plus
/// the cache of pages (owned or borrowed) this node has mapped locally.
pub struct DsmNode {
    pub node: NodeId,
    pub directory: Mutex<Directory>,
    pub cache: Mutex<PageCache>,
    pub vclock: Mutex<VectorClock>,
    /// Backing store for pages this node owns, keyed by page-aligned offset.
    storage: Mutex<HashMap<u32, Vec<u8>>>,
}

impl DsmNode {
    #[must_use]
    pub fn new(node: NodeId, cache_capacity: usize) -> Self {
        Self {
            node,
            directory: Mutex::new(Directory::new()),
            cache: Mutex::new(PageCache::new(cache_capacity)),
            vclock: Mutex::new(VectorClock::new()),
            storage: Mutex::new(HashMap::new()),
        }
    }

    fn local_read(&self, offset: u32) -> Vec<u8> {
        self.storage.lock().unwrap().get(&offset).cloned().unwrap_or_else(|| vec![0u8; PAGE_SIZE])
    }

    /// Seed a page's backing bytes directly; used by the owning node itself
    /// and by tests wiring up a fixture without going through a write path.
    pub fn local_write(&self, offset: u32, bytes: &[u8]) {
        let mut storage = self.storage.lock().unwrap();
        let page = storage.entry(offset).or_insert_with(|| vec![0u8; PAGE_SIZE]);
        page[..bytes.len().min(PAGE_SIZE)].copy_from_slice(&bytes[..bytes.len().min(PAGE_SIZE)]);
    }
}

/// In-process transport: dispatches directly to the target node's handler.
/// `set_node_online`/`inject_failure` let tests simulate network partitions
/// and crashed peers without any real sockets.
pub struct DirectTransport<'a> {
    cluster: &'a DsmCluster,
}

impl<'a> CoherenceTransport for DirectTransport<'a> {
    fn exchange(&self, to: NodeId, msg: CoherenceMessage) -> Result<CoherenceMessage, VoidReason> {
        self.cluster.dispatch(to, msg)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum NodeFault {
    None,
    Offline,
    Crashed,
    DropMessages,
}

/// A small cluster of DSM nodes communicating in-process. Real deployments
/// swap `DirectTransport` for an RDMA/NIC-backed transport; the protocol
/// logic in `read_page`/`write_page` is unchanged either way.
pub struct DsmCluster {
    nodes: HashMap<NodeId, DsmNode>,
    faults: Mutex<HashMap<NodeId, NodeFault>>,
}

impl DsmCluster {
    #[must_use]
    pub fn new(node_ids: &[NodeId], cache_capacity: usize) -> Self {
        let nodes = node_ids.iter().map(|&n| (n, DsmNode::new(n, cache_capacity))).collect();
        let faults = node_ids.iter().map(|&n| (n, NodeFault::None)).collect();
        Self { nodes, faults: Mutex::new(faults) }
    }

    #[must_use]
    pub fn node(&self, id: NodeId) -> Option<&DsmNode> {
        self.nodes.get(&id)
    }

    pub fn transport(&self) -> DirectTransport<'_> {
        DirectTransport { cluster: self }
    }

    /// Mark a node online/offline. An offline node refuses every exchange
    /// with `VoidReason::Unreachable`.
    pub fn set_node_online(&self, node: NodeId, online: bool) {
        let mut faults = self.faults.lock().unwrap();
        faults.insert(node, if online { NodeFault::None } else { NodeFault::Offline });
    }

    /// Inject a specific failure mode on a node, independent of its online
    /// state: `Crashed` answers `NodeCrashed`, `DropMessages` silently
    /// discards requests as `Network` void (the requester times out).
    pub fn inject_failure(&self, node: NodeId, crashed: bool) {
        let mut faults = self.faults.lock().unwrap();
        faults.insert(node, if crashed { NodeFault::Crashed } else { NodeFault::DropMessages });
    }

    pub fn clear_failure(&self, node: NodeId) {
        self.faults.lock().unwrap().insert(node, NodeFault::None);
    }

    fn fault_of(&self, node: NodeId) -> NodeFault {
        self.faults.lock().unwrap().get(&node).copied().unwrap_or(NodeFault::None)
    }

    fn dispatch(&self, to: NodeId, msg: CoherenceMessage) -> Result<CoherenceMessage, VoidReason> {
        match self.fault_of(to) {
            NodeFault::Offline => return Err(VoidReason::Unreachable),
            NodeFault::Crashed => return Err(VoidReason::NodeCrashed),
            NodeFault::DropMessages => return Err(VoidReason::Network),
            NodeFault::None => {}
        }
        let Some(owner) = self.nodes.get(&to) else {
            return Err(VoidReason::NotFound);
        };
        match msg {
            CoherenceMessage::ReadRequest { addr, requester } => {
                let mut dir = owner.directory.lock().unwrap();
                let evicted = dir.grant_shared(addr.offset(), requester);
                let generation = dir.generation(addr.offset());
                drop(dir);
                if let Some(forced_out) = evicted {
                    if let Some(peer_node) = self.nodes.get(&forced_out) {
                        peer_node.cache.lock().unwrap().invalidate(addr);
                    }
                }
                let bytes = owner.local_read(addr.offset());
                let vclock = owner.vclock.lock().unwrap().clone();
                Ok(CoherenceMessage::ReadResponse { addr, generation, bytes, vclock })
            }
            CoherenceMessage::WriteRequest { addr, requester } => {
                let mut dir = owner.directory.lock().unwrap();
                let to_invalidate = dir.grant_exclusive(addr.offset(), requester);
                let generation = dir.generation(addr.offset());
                drop(dir);
                for peer in to_invalidate {
                    if peer == requester {
                        continue;
                    }
                    if let Some(peer_node) = self.nodes.get(&peer) {
                        peer_node.cache.lock().unwrap().invalidate(addr);
                    }
                }
                let mut vclock = owner.vclock.lock().unwrap();
                vclock.increment(owner.node);
                Ok(CoherenceMessage::WriteComplete { addr, generation })
            }
            CoherenceMessage::Invalidate { addr } => {
                owner.cache.lock().unwrap().invalidate(addr);
                Ok(CoherenceMessage::WriteComplete { addr, generation: owner.directory.lock().unwrap().generation(addr.offset()) })
            }
            CoherenceMessage::PersistSync { addr, generation } => Ok(CoherenceMessage::WriteComplete { addr, generation }),
            other @ (CoherenceMessage::ReadResponse { .. } | CoherenceMessage::WriteComplete { .. }) => Ok(other),
        }
    }

    /// Blocking read path: cache hit returns immediately; a miss blocks the
    /// calling strand, fetches from the owning node and installs the page
    /// before waking it. Failures (offline/crashed/dropped owner) surface as
    /// a VOID whose reason mirrors the fault, chained under `Timeout` if the
    /// blocking deadline is the caller's stated bound.
    #[allow(clippy::too_many_arguments)]
    pub fn read_page(
        &self,
        requester: NodeId,
        addr: DsmAddress,
        strand: StrandId,
        scheduler: &Scheduler,
        registry: &VoidRegistry,
        deadline: Chronon,
    ) -> Result<Vec<u8>, VoidId> {
        let addr = addr.page_align();
        let Some(local) = self.nodes.get(&requester) else {
            return Err(registry.record(
                VoidReason::NotFound,
                VoidId::INVALID,
                addr.0,
                0,
                void_loc!(),
                0,
                "read_page on an unregistered node",
            ));
        };
        {
            let mut cache = local.cache.lock().unwrap();
            if let Some(entry) = cache.get(addr) {
                return Ok(entry.page_bytes.clone());
            }
        }
        let owner = addr.owning_node();
        if owner == requester {
            return Ok(local.local_read(addr.offset()));
        }

        scheduler.block_until(strand, deadline);
        let now = scheduler.now();
        let result = self.transport().exchange(
            owner,
            CoherenceMessage::ReadRequest { addr, requester },
        );
        scheduler.wake(strand);

        match result {
            Ok(CoherenceMessage::ReadResponse { generation, bytes, vclock, .. }) => {
                local.cache.lock().unwrap().install(
                    addr,
                    owner,
                    generation,
                    &bytes,
                    vclock.clone(),
                    CacheLineState::Shared,
                );
                local.vclock.lock().unwrap().merge(&vclock);
                Ok(bytes)
            }
            Ok(_) => Err(registry.record(
                VoidReason::Unknown,
                VoidId::INVALID,
                addr.0,
                0,
                void_loc!(),
                now.0,
                "owning node answered a read request with an unexpected message",
            )),
            Err(reason) => Err(registry.record(
                Self::deadline_reason(reason),
                VoidId::INVALID,
                addr.0,
                owner.0 as u64,
                void_loc!(),
                now.0,
                "remote read request failed",
            )),
        }
    }

    /// Blocking write path: requests EXCLUSIVE from the owner (invalidating
    /// every other sharer), applies the write locally, and bumps this
    /// node's vector-clock entry so later readers can detect concurrency.
    #[allow(clippy::too_many_arguments)]
    pub fn write_page(
        &self,
        requester: NodeId,
        addr: DsmAddress,
        bytes: &[u8],
        strand: StrandId,
        scheduler: &Scheduler,
        registry: &VoidRegistry,
        deadline: Chronon,
    ) -> Result<u64, VoidId> {
        let addr = addr.page_align();
        let Some(local) = self.nodes.get(&requester) else {
            return Err(registry.record(
                VoidReason::NotFound,
                VoidId::INVALID,
                addr.0,
                0,
                void_loc!(),
                0,
                "write_page on an unregistered node",
            ));
        };
        let owner = addr.owning_node();

        if owner == requester {
            let mut dir = local.directory.lock().unwrap();
            let to_invalidate = dir.grant_exclusive(addr.offset(), requester);
            let generation = dir.generation(addr.offset());
            drop(dir);
            for peer in to_invalidate {
                if let Some(peer_node) = self.nodes.get(&peer) {
                    peer_node.cache.lock().unwrap().invalidate(addr);
                }
            }
            local.local_write(addr.offset(), bytes);
            local.cache.lock().unwrap().update_after_write(addr, generation, bytes);
            local.vclock.lock().unwrap().increment(requester);
            return Ok(generation);
        }

        scheduler.block_until(strand, deadline);
        let now = scheduler.now();
        let result = self.transport().exchange(
            owner,
            CoherenceMessage::WriteRequest { addr, requester },
        );
        scheduler.wake(strand);

        match result {
            Ok(CoherenceMessage::WriteComplete { generation, .. }) => {
                local.cache.lock().unwrap().update_after_write(addr, generation, bytes);
                local.vclock.lock().unwrap().increment(requester);
                Ok(generation)
            }
            Ok(_) => Err(registry.record(
                VoidReason::Unknown,
                VoidId::INVALID,
                addr.0,
                0,
                void_loc!(),
                now.0,
                "owning node answered a write request with an unexpected message",
            )),
            Err(reason) => Err(registry.record(
                Self::deadline_reason(reason),
                VoidId::INVALID,
                addr.0,
                owner.0 as u64,
                void_loc!(),
                now.0,
                "remote write request failed",
            )),
        }
    }

    /// A blocked operation's deadline is the only thing the caller actually
    /// observes: an unreachable, crashed or message-dropping peer all show
    /// up identically as "no response arrived before `deadline`", so they
    /// surface as `TIMEOUT` rather than leaking the underlying transport
    /// fault. `NOT_FOUND` (unknown node) is a caller bug, not a network
    /// condition, and passes through unchanged.
    fn deadline_reason(transport_reason: VoidReason) -> VoidReason {
        match transport_reason {
            VoidReason::Unreachable | VoidReason::NodeCrashed | VoidReason::Network => {
                VoidReason::Timeout
            }
            other => other,
        }
    }

    /// Whether `a`'s last observed vector clock happened strictly before
    /// `b`'s, per this node's cached causal history.
    #[must_use]
    pub fn happened_before(&self, a: NodeId, b: NodeId) -> bool {
        let (Some(na), Some(nb)) = (self.nodes.get(&a), self.nodes.get(&b)) else { return false };
        na.vclock.lock().unwrap().happened_before(&nb.vclock.lock().unwrap())
    }

    #[must_use]
    pub fn is_concurrent(&self, a: NodeId, b: NodeId) -> bool {
        let (Some(na), Some(nb)) = (self.nodes.get(&a), self.nodes.get(&b)) else { return false };
        na.vclock.lock().unwrap().is_concurrent(&nb.vclock.lock().unwrap())
    }
}
