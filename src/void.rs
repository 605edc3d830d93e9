//! VOID registry and causality chain.
//!
//! A VOID is "absence with cause": a value carrying not just the fact of
//! failure but a pointer into an append-only log explaining why. The
//! registry never mutates a written record and never allocates on the
//! record path, so it stays callable from allocation-failure handlers.

use core::sync::atomic::{AtomicU64, Ordering};
use std::cell::Cell;
use std::collections::VecDeque;
use std::sync::Mutex;

use crate::ids::VoidId;

/// Closed taxonomy of VOID causes. This enum doubles as the kernel's entire
/// error taxonomy: there are no exceptions and no error type that escapes it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VoidReason {
    NullPtr,
    InvalidArg,
    NotFound,
    AllocFail,
    Permission,
    Generation,
    Timeout,
    Network,
    ChannelClosed,
    ChannelFull,
    ChannelEmpty,
    EndpointDead,
    NodeCrashed,
    Unreachable,
    HwNvme,
    Io,
    Unknown,
}

impl VoidReason {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::NullPtr => "null_ptr",
            Self::InvalidArg => "invalid_arg",
            Self::NotFound => "not_found",
            Self::AllocFail => "alloc_fail",
            Self::Permission => "permission",
            Self::Generation => "generation",
            Self::Timeout => "timeout",
            Self::Network => "network",
            Self::ChannelClosed => "channel_closed",
            Self::ChannelFull => "channel_full",
            Self::ChannelEmpty => "channel_empty",
            Self::EndpointDead => "endpoint_dead",
            Self::NodeCrashed => "node_crashed",
            Self::Unreachable => "unreachable",
            Self::HwNvme => "hw_nvme",
            Self::Io => "io",
            Self::Unknown => "unknown",
        }
    }
}

/// Where in the source a VOID arose. Callers pass `void_loc!()` rather than
/// filling this in by hand.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SourceLoc {
    pub file: &'static str,
    pub function: &'static str,
    pub line: u32,
}

#[macro_export]
macro_rules! void_loc {
    () => {
        $crate::void::SourceLoc {
            file: file!(),
            function: {
                fn f() {}
                fn type_name_of<T>(_: T) -> &'static str {
                    core::any::type_name::<T>()
                }
                type_name_of(f)
            },
            line: line!(),
        }
    };
}

/// An append-only VOID record. Once written, a record is never mutated.
#[derive(Debug, Clone)]
pub struct VoidRecord {
    pub id: VoidId,
    pub reason: VoidReason,
    pub predecessor_id: VoidId,
    pub context_entity: u64,
    pub context_key: u64,
    pub loc: SourceLoc,
    pub timestamp: u64,
    pub message: String,
}

struct Ring {
    records: VecDeque<VoidRecord>,
    capacity: usize,
    /// The id of the oldest record still known to have existed, one past the
    /// last id ever overwritten. Lookups below this return `NotFound`.
    floor: u64,
}

/// Append-only, ring-buffer-bounded record of every VOID that has arisen in
/// this process. Ids are strictly monotonic even across eviction: a dropped
/// id is reported as not found rather than being reused.
pub struct VoidRegistry {
    next_id: AtomicU64,
    ring: Mutex<Ring>,
}

thread_local! {
    static LAST_VOID: Cell<VoidId> = const { Cell::new(VoidId::INVALID) };
}

impl VoidRegistry {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            next_id: AtomicU64::new(1),
            ring: Mutex::new(Ring {
                records: VecDeque::with_capacity(capacity),
                capacity,
                floor: 1,
            }),
        }
    }

    /// Record a VOID and return its id. Never allocates heap memory beyond
    /// the bounded ring already reserved at construction time (the message
    /// string is the one exception and callers on truly allocation-starved
    /// paths should pass `String::new()`).
    pub fn record(
        &self,
        reason: VoidReason,
        predecessor: VoidId,
        context_entity: u64,
        context_key: u64,
        loc: SourceLoc,
        timestamp: u64,
        message: impl Into<String>,
    ) -> VoidId {
        let id = VoidId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let record = VoidRecord {
            id,
            reason,
            predecessor_id: predecessor,
            context_entity,
            context_key,
            loc,
            timestamp,
            message: message.into(),
        };
        log::trace!(
            "void: id={} reason={:?} pred={} at {}:{}",
            id.0,
            reason,
            predecessor.0,
            loc.file,
            loc.line
        );
        let mut ring = self.ring.lock().unwrap();
        if ring.records.len() == ring.capacity {
            ring.records.pop_front();
            ring.floor += 1;
        }
        ring.records.push_back(record);
        drop(ring);
        LAST_VOID.with(|slot| slot.set(id));
        id
    }

    /// Look up a single record by id.
    #[must_use]
    pub fn get(&self, id: VoidId) -> Option<VoidRecord> {
        let ring = self.ring.lock().unwrap();
        ring.records.iter().find(|r| r.id == id).cloned()
    }

    /// Walk the predecessor chain starting at `id`, oldest cause last. The
    /// walk is always finite: every chain terminates at id 0 or at an id
    /// that has fallen below the ring's floor.
    #[must_use]
    pub fn chain(&self, id: VoidId) -> Vec<VoidRecord> {
        let mut out = Vec::new();
        let mut cur = id;
        loop {
            if !cur.is_valid() {
                break;
            }
            let Some(rec) = self.get(cur) else { break };
            let pred = rec.predecessor_id;
            out.push(rec);
            if pred == cur {
                break;
            }
            cur = pred;
        }
        out
    }

    /// The most recent VOID observed by the calling thread, for APIs that
    /// must return a poisoned scalar rather than a richer result type.
    #[must_use]
    pub fn last_for_thread() -> VoidId {
        LAST_VOID.with(std::cell::Cell::get)
    }

    pub fn clear_last_for_thread() {
        LAST_VOID.with(|slot| slot.set(VoidId::INVALID));
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.ring.lock().unwrap().records.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for VoidRegistry {
    fn default() -> Self {
        Self::new(4096)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_strictly_increasing() {
        let reg = VoidRegistry::new(16);
        let a = reg.record(VoidReason::NotFound, VoidId::INVALID, 0, 0, void_loc!(), 0, "a");
        let b = reg.record(VoidReason::Timeout, a, 0, 0, void_loc!(), 1, "b");
        assert!(b.0 > a.0);
    }

    #[test]
    fn chain_walks_predecessors_and_terminates() {
        let reg = VoidRegistry::new(16);
        let a = reg.record(VoidReason::NotFound, VoidId::INVALID, 0, 0, void_loc!(), 0, "root");
        let b = reg.record(VoidReason::Timeout, a, 0, 0, void_loc!(), 1, "mid");
        let c = reg.record(VoidReason::Generation, b, 0, 0, void_loc!(), 2, "leaf");
        let chain = reg.chain(c);
        assert_eq!(chain.len(), 3);
        assert_eq!(chain[0].id, c);
        assert_eq!(chain[2].id, a);
    }

    #[test]
    fn eviction_makes_dropped_ids_not_found_but_numbering_keeps_climbing() {
        let reg = VoidRegistry::new(2);
        let a = reg.record(VoidReason::NotFound, VoidId::INVALID, 0, 0, void_loc!(), 0, "a");
        let _b = reg.record(VoidReason::NotFound, VoidId::INVALID, 0, 0, void_loc!(), 1, "b");
        let c = reg.record(VoidReason::NotFound, VoidId::INVALID, 0, 0, void_loc!(), 2, "c");
        assert!(reg.get(a).is_none());
        assert!(reg.get(c).is_some());
        assert!(c.0 > a.0);
    }

    #[test]
    fn thread_local_last_void_tracks_most_recent_record() {
        VoidRegistry::clear_last_for_thread();
        let reg = VoidRegistry::new(16);
        assert_eq!(VoidRegistry::last_for_thread(), VoidId::INVALID);
        let a = reg.record(VoidReason::Permission, VoidId::INVALID, 0, 0, void_loc!(), 0, "x");
        assert_eq!(VoidRegistry::last_for_thread(), a);
    }
}
