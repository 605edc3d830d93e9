//! `KernelContext`: the one place every subsystem singleton lives.
//!
//! Per the cyclic-object-graph and process-wide-singleton design notes, the
//! kernel never reaches for a global/lazy-static to find its registry,
//! scheduler or fabric. A `KernelContext` is built once, explicitly, from a
//! `KernelConfig`, and passed by reference to whatever needs it.

use crate::config::KernelConfig;
use crate::dsm::DsmCluster;
use crate::error::InitError;
use crate::ids::NodeId;
use crate::ipc::IpcFabric;
use crate::sched::Scheduler;
use crate::void::VoidRegistry;

/// Owns every subsystem singleton for one kernel instance: the VOID
/// registry, the scheduler, the IPC fabric, and this node's view of the DSM
/// cluster. Dropping it tears down everything it owns; there is no process
/// state this doesn't capture.
pub struct KernelContext {
    pub config: KernelConfig,
    pub void_registry: VoidRegistry,
    pub scheduler: Scheduler,
    pub ipc: IpcFabric,
    pub dsm: DsmCluster,
}

impl KernelContext {
    /// Build a fresh context for a cluster containing `nodes`. Fails fast on
    /// an unusable config rather than constructing a context that would
    /// panic on first use.
    pub fn new(config: KernelConfig, nodes: &[NodeId]) -> Result<Self, InitError> {
        if config.num_cpus == 0 {
            return Err(InitError::ZeroCpus);
        }
        if config.dsm_cache_capacity == 0 {
            return Err(InitError::ZeroCacheCapacity);
        }
        if config.void_ring_capacity == 0 {
            return Err(InitError::ZeroVoidRingCapacity);
        }
        if nodes.is_empty() {
            return Err(InitError::EmptyCluster);
        }
        Ok(Self {
            void_registry: VoidRegistry::new(config.void_ring_capacity),
            scheduler: Scheduler::new(config.num_cpus),
            ipc: IpcFabric::new(config.ipc_ring_capacity),
            dsm: DsmCluster::new(nodes, config.dsm_cache_capacity),
            config,
        })
    }

    /// Convenience constructor for the common single-node, single-CPU case
    /// used throughout the test suite and small embeddings.
    pub fn single_node(node: NodeId) -> Result<Self, InitError> {
        Self::new(KernelConfig::new(), &[node])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_cpus_is_rejected_at_construction() {
        let cfg = KernelConfig::new().with_num_cpus(0);
        let result = KernelContext::new(cfg, &[NodeId(1)]);
        assert_eq!(result.unwrap_err(), InitError::ZeroCpus);
    }

    #[test]
    fn single_node_wires_every_subsystem() {
        let ctx = KernelContext::single_node(NodeId(1)).unwrap();
        assert!(ctx.void_registry.is_empty());
        assert!(ctx.dsm.node(NodeId(1)).is_some());
    }
}
