//! SERAPH core: VOID-carrying values, capability security, capability IPC,
//! distributed shared memory, and the preemptive scheduler that ties them
//! together.
//!
//! Every fallible operation in this crate returns either a normal `Result`
//! (for ambient, pre-kernel errors — see [`error`]) or a VOID id drawn from
//! a [`void::VoidRegistry`] (for everything that happens once a
//! [`context::KernelContext`] exists). There is no third error channel.

pub mod cap;
pub mod clock;
pub mod config;
pub mod context;
pub mod dsm;
pub mod error;
pub mod ids;
pub mod ipc;
pub mod sched;
pub mod void;

pub use cap::{Capability, CheckOutcome, GenerationSource, GenerationTable, Permissions};
pub use clock::{Ordering, VectorClock};
pub use config::KernelConfig;
pub use context::KernelContext;
pub use error::InitError;
pub use ids::VoidId;
pub use void::{VoidReason, VoidRecord, VoidRegistry};
