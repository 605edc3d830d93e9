//! Preemptive priority scheduler: strand state machine, per-CPU run queues,
//! priority inheritance and deadline-driven wakeups.

pub mod scheduler;
pub mod strand;

pub use scheduler::{SchedOutcome, Scheduler};
pub use strand::{
    AffinityMask, GalacticStats, SavedContext, Strand, StrandState, IDLE_PRIORITY,
    NORMAL_PRIORITY, PRIORITY_LEVELS, REALTIME_PRIORITY,
};
