//! Ambient tunable bounds. These govern capacity, not policy: every cap
//! here trades memory for how far a bounded structure can grow before it
//! starts forcing evictions or returning `ALLOC_FAIL`. None of them is a
//! feature toggle — callers pick a `KernelConfig`, they don't turn modules
//! on or off.

/// Construction-time bounds for a `KernelContext`. Every field has a
/// documented default; callers with tighter memory budgets (or property
/// tests that want to force eviction/overflow paths quickly) override the
/// ones they care about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KernelConfig {
    /// Capacity of the append-only VOID ring (`VoidRegistry::new`).
    pub void_ring_capacity: usize,
    /// Number of logical CPUs the scheduler manages.
    pub num_cpus: u32,
    /// Per-endpoint send/receive ring capacity (`IpcFabric::new`).
    pub ipc_ring_capacity: usize,
    /// Per-node bounded page-cache capacity, in pages.
    pub dsm_cache_capacity: usize,
}

impl KernelConfig {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            void_ring_capacity: 4096,
            num_cpus: 1,
            ipc_ring_capacity: crate::ipc::DEFAULT_RING_CAPACITY,
            dsm_cache_capacity: 256,
        }
    }

    #[must_use]
    pub const fn with_num_cpus(mut self, num_cpus: u32) -> Self {
        self.num_cpus = num_cpus;
        self
    }

    #[must_use]
    pub const fn with_void_ring_capacity(mut self, capacity: usize) -> Self {
        self.void_ring_capacity = capacity;
        self
    }

    #[must_use]
    pub const fn with_ipc_ring_capacity(mut self, capacity: usize) -> Self {
        self.ipc_ring_capacity = capacity;
        self
    }

    #[must_use]
    pub const fn with_dsm_cache_capacity(mut self, capacity: usize) -> Self {
        self.dsm_cache_capacity = capacity;
        self
    }
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self::new()
    }
}
