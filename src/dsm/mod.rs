//! Capability-addressed distributed shared memory: address space, bounded
//! page cache, per-owner directory, the coherence protocol and the
//! persistence bridge to block storage.

pub mod address;
pub mod cache;
pub mod coherence;
pub mod directory;
pub mod persistence;

pub use address::{DsmAddress, Region, PAGE_SIZE};
pub use cache::{CacheLineState, PageCache, PageCacheEntry};
pub use coherence::{CoherenceMessage, CoherenceTransport, DsmCluster, DsmNode};
pub use directory::{DirState, Directory, DirectoryEntry, MAX_SHARERS};
pub use persistence::{
    BlockDevice, BlockIoError, InMemoryBlockDevice, PersistenceBridge, PersistentMapping,
    RdmaOpType, RdmaOperation, RdmaStatus,
};
