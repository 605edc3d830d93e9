//! Opaque identifier spaces.
//!
//! Strand, endpoint, channel, message and op ids are process-unique 64-bit
//! handles. They are never reused across a reboot: each arena hands them out
//! from a monotonic counter rather than recycling freed slots.

use core::sync::atomic::{AtomicU64, Ordering};

macro_rules! opaque_id {
    ($name:ident) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
        pub struct $name(pub u64);

        impl $name {
            pub const INVALID: $name = $name(0);

            #[must_use]
            pub const fn is_valid(self) -> bool {
                self.0 != 0
            }
        }

        impl core::fmt::Display for $name {
            fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                write!(f, "{}#{}", stringify!($name), self.0)
            }
        }
    };
}

opaque_id!(StrandId);
opaque_id!(EndpointId);
opaque_id!(ChannelId);
opaque_id!(MessageId);
opaque_id!(OpId);
opaque_id!(VoidId);
opaque_id!(SovereignId);

/// Monotonic, process-unique id allocator. Starts at 1 so that 0 stays free
/// as the universal "no id" / "no predecessor" sentinel.
#[derive(Debug)]
pub struct IdAllocator(AtomicU64);

impl IdAllocator {
    #[must_use]
    pub const fn new() -> Self {
        Self(AtomicU64::new(1))
    }

    pub fn next(&self) -> u64 {
        self.0.fetch_add(1, Ordering::Relaxed)
    }
}

impl Default for IdAllocator {
    fn default() -> Self {
        Self::new()
    }
}

/// Node identifier within the DSM/coherence fabric.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeId(pub u32);

/// `(node_id, local_gen)` packed into 64 bits: high 32 bits are the node,
/// low 32 bits are the node-local generation counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct GlobalGeneration(pub u64);

impl GlobalGeneration {
    #[must_use]
    pub const fn new(node: NodeId, local_gen: u32) -> Self {
        Self(((node.0 as u64) << 32) | local_gen as u64)
    }

    #[must_use]
    pub const fn node(self) -> NodeId {
        NodeId((self.0 >> 32) as u32)
    }

    #[must_use]
    pub const fn local_gen(self) -> u32 {
        self.0 as u32
    }
}

/// A scheduler-issued monotonic timestamp. Only `Scheduler::tick` advances
/// the clock; every other subsystem only ever reads it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Chronon(pub u64);

impl Chronon {
    #[must_use]
    pub const fn zero() -> Self {
        Self(0)
    }

    #[must_use]
    pub fn saturating_add(self, ticks: u64) -> Self {
        Self(self.0.saturating_add(ticks))
    }
}
