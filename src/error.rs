//! Ambient, non-VOID errors: failures that happen before there is a
//! `VoidRegistry` to record into, or that belong to the host process rather
//! than to kernel causality (construction-time misconfiguration, for
//! instance). Everything that happens *after* a `KernelContext` exists
//! flows through the VOID taxonomy in [`crate::void`] instead.

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum InitError {
    #[error("num_cpus must be at least 1")]
    ZeroCpus,
    #[error("dsm_cache_capacity must be at least 1 page")]
    ZeroCacheCapacity,
    #[error("void_ring_capacity must be at least 1")]
    ZeroVoidRingCapacity,
    #[error("cluster must name at least one node")]
    EmptyCluster,
}
