//! Strand: a schedulable execution context (the scheduler's unit of work).

use crate::ids::{Chronon, SovereignId, StrandId};

/// Eight priority levels; 0 is reserved for the idle strand.
pub const PRIORITY_LEVELS: usize = 8;
pub const IDLE_PRIORITY: u8 = 0;
pub const NORMAL_PRIORITY: u8 = 4;
pub const REALTIME_PRIORITY: u8 = 7;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StrandState {
    Ready,
    Running,
    Blocked,
    Exiting,
    Terminated,
}

/// Quantum, in ticks, as a function of (effective) priority. Idle gets a
/// single tick, critical work gets the whole 64-tick slab; everything else
/// falls in between.
#[must_use]
pub fn quantum_for_priority(priority: u8) -> u32 {
    match priority {
        IDLE_PRIORITY => 1,
        p if p >= REALTIME_PRIORITY => 64,
        p if p >= NORMAL_PRIORITY => 8,
        _ => 4,
    }
}

/// Bitmap of CPUs this strand may run on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AffinityMask(pub u64);

impl AffinityMask {
    #[must_use]
    pub const fn all(cpus: u32) -> Self {
        if cpus >= 64 {
            Self(u64::MAX)
        } else {
            Self((1u64 << cpus) - 1)
        }
    }

    #[must_use]
    pub const fn single(cpu: u32) -> Self {
        Self(1u64 << cpu)
    }

    #[must_use]
    pub const fn allows(self, cpu: u32) -> bool {
        (self.0 & (1u64 << cpu)) != 0
    }
}

/// Opaque, arch-specific saved register context. The core never interprets
/// its contents; it only moves it around on context switch.
#[derive(Debug, Clone, Default)]
pub struct SavedContext(pub Vec<u64>);

/// Optional predictive-scheduling telemetry. When the hook is absent the
/// scheduler must behave exactly as if it were never consulted.
#[derive(Debug, Clone, Default)]
pub struct GalacticStats {
    pub predicted_burst_ticks: Option<u32>,
    pub boosts_granted: u32,
}

#[derive(Debug, Clone)]
pub struct Strand {
    pub id: StrandId,
    pub owner_sovereign_id: SovereignId,
    pub base_priority: u8,
    pub effective_priority: u8,
    pub state: StrandState,
    pub affinity_mask: AffinityMask,
    pub time_slice_remaining: u32,
    pub saved_context: SavedContext,
    pub galactic_stats: Option<GalacticStats>,
    /// Set by `block_until`; consulted by the scheduler's deadline heap.
    pub wake_deadline: Option<Chronon>,
    /// Current CPU, once dispatched at least once.
    pub cpu: Option<u32>,
}

impl Strand {
    #[must_use]
    pub fn new(id: StrandId, owner: SovereignId, base_priority: u8, affinity: AffinityMask) -> Self {
        let base_priority = base_priority.min((PRIORITY_LEVELS - 1) as u8);
        Self {
            id,
            owner_sovereign_id: owner,
            base_priority,
            effective_priority: base_priority,
            state: StrandState::Ready,
            affinity_mask: affinity,
            time_slice_remaining: quantum_for_priority(base_priority),
            saved_context: SavedContext::default(),
            galactic_stats: None,
            wake_deadline: None,
            cpu: None,
        }
    }

    /// Raise effective priority for the duration of an IPC lend; never
    /// lowers it (that would defeat priority inheritance).
    pub fn inherit_priority_at_least(&mut self, floor: u8) {
        if floor > self.effective_priority {
            self.effective_priority = floor;
        }
    }

    /// Restore effective priority to the strand's own base on lend return.
    pub fn restore_base_priority(&mut self) {
        self.effective_priority = self.base_priority;
    }
}
