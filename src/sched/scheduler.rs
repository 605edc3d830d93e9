//! Preemptive, priority-based scheduler with per-CPU run queues.
//!
//! Selection always picks the highest-priority non-empty queue on the local
//! CPU and round-robins within a level. The dispatcher and `tick` are meant
//! to run lock-free with respect to each other on a single CPU (a real
//! implementation disables local preemption around the critical section;
//! this simulation uses one mutex per CPU run queue, which is a legal
//! substitute as long as the ordering contract holds).

use std::collections::{BinaryHeap, HashMap, VecDeque};
use std::sync::Mutex;

use crate::ids::{Chronon, IdAllocator, SovereignId, StrandId};
use crate::sched::strand::{quantum_for_priority, AffinityMask, Strand, StrandState, PRIORITY_LEVELS};
use crate::void::{VoidId, VoidReason, VoidRegistry};
use crate::void_loc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedOutcome {
    Ok,
    Void(VoidId),
}

/// Per-CPU run queue: one FIFO per priority level.
struct RunQueue {
    levels: [VecDeque<StrandId>; PRIORITY_LEVELS],
    current: Option<StrandId>,
}

impl RunQueue {
    fn new() -> Self {
        Self { levels: Default::default(), current: None }
    }

    fn push_ready(&mut self, priority: u8, id: StrandId) {
        self.levels[priority as usize].push_back(id);
    }

    fn pop_highest(&mut self) -> Option<StrandId> {
        for level in self.levels.iter_mut().rev() {
            if let Some(id) = level.pop_front() {
                return Some(id);
            }
        }
        None
    }

    fn remove(&mut self, id: StrandId) -> bool {
        for level in &mut self.levels {
            if let Some(pos) = level.iter().position(|&s| s == id) {
                level.remove(pos);
                return true;
            }
        }
        false
    }
}

/// A strand waiting on a deadline, ordered so the heap pops the earliest
/// deadline first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct DeadlineEntry {
    deadline: Chronon,
    strand: StrandId,
}

impl Ord for DeadlineEntry {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        // BinaryHeap is a max-heap; invert so the earliest deadline sorts highest.
        other.deadline.0.cmp(&self.deadline.0)
    }
}
impl PartialOrd for DeadlineEntry {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

struct Inner {
    strands: HashMap<StrandId, Strand>,
    run_queues: Vec<RunQueue>,
    deadlines: BinaryHeap<DeadlineEntry>,
    chronon: Chronon,
}

/// Preemptive priority scheduler. All mutation funnels through a single
/// mutex per instance; a production build would split this into per-CPU
/// locks, but the externally observable ordering contract is identical.
pub struct Scheduler {
    ids: IdAllocator,
    inner: Mutex<Inner>,
    num_cpus: u32,
}

impl Scheduler {
    #[must_use]
    pub fn new(num_cpus: u32) -> Self {
        let run_queues = (0..num_cpus).map(|_| RunQueue::new()).collect();
        Self {
            ids: IdAllocator::new(),
            inner: Mutex::new(Inner {
                strands: HashMap::new(),
                run_queues,
                deadlines: BinaryHeap::new(),
                chronon: Chronon::zero(),
            }),
            num_cpus,
        }
    }

    #[must_use]
    pub fn now(&self) -> Chronon {
        self.inner.lock().unwrap().chronon
    }

    /// Create a new strand in READY state on its preferred CPU (the lowest
    /// bit set in its affinity mask).
    pub fn spawn(&self, owner: SovereignId, base_priority: u8, affinity: AffinityMask) -> StrandId {
        let id = StrandId(self.ids.next());
        let strand = Strand::new(id, owner, base_priority, affinity);
        let mut inner = self.inner.lock().unwrap();
        let cpu = Self::preferred_cpu(affinity, self.num_cpus);
        inner.run_queues[cpu as usize].push_ready(strand.effective_priority, id);
        inner.strands.insert(id, strand);
        id
    }

    fn preferred_cpu(affinity: AffinityMask, num_cpus: u32) -> u32 {
        (0..num_cpus).find(|&c| affinity.allows(c)).unwrap_or(0)
    }

    /// Select and mark RUNNING the highest-priority ready strand on `cpu`.
    pub fn dispatch(&self, cpu: u32) -> Option<StrandId> {
        let mut inner = self.inner.lock().unwrap();
        let rq = &mut inner.run_queues[cpu as usize];
        let next = rq.pop_highest()?;
        rq.current = Some(next);
        let strand = inner.strands.get_mut(&next)?;
        strand.state = StrandState::Running;
        strand.cpu = Some(cpu);
        strand.time_slice_remaining = quantum_for_priority(strand.effective_priority);
        Some(next)
    }

    /// Timer-interrupt entry point for `cpu`. Decrements the running
    /// strand's quantum, requeues it if exhausted, and sweeps expired
    /// deadlines.
    pub fn tick(&self, cpu: u32) -> Vec<StrandId> {
        let mut inner = self.inner.lock().unwrap();
        inner.chronon = inner.chronon.saturating_add(1);
        let now = inner.chronon;

        if let Some(running) = inner.run_queues[cpu as usize].current {
            if let Some(strand) = inner.strands.get_mut(&running) {
                if strand.state == StrandState::Running {
                    strand.time_slice_remaining = strand.time_slice_remaining.saturating_sub(1);
                    if strand.time_slice_remaining == 0 {
                        strand.state = StrandState::Ready;
                        strand.time_slice_remaining = quantum_for_priority(strand.effective_priority);
                        let prio = strand.effective_priority;
                        inner.run_queues[cpu as usize].current = None;
                        inner.run_queues[cpu as usize].push_ready(prio, running);
                    }
                }
            }
        }

        let mut woken = Vec::new();
        while let Some(entry) = inner.deadlines.peek().copied() {
            if entry.deadline.0 > now.0 {
                break;
            }
            inner.deadlines.pop();
            if let Some(strand) = inner.strands.get_mut(&entry.strand) {
                if strand.state == StrandState::Blocked {
                    strand.state = StrandState::Ready;
                    strand.wake_deadline = None;
                    let prio = strand.effective_priority;
                    let home_cpu = strand.cpu.unwrap_or(0);
                    inner.run_queues[home_cpu as usize].push_ready(prio, entry.strand);
                    woken.push(entry.strand);
                }
            }
        }
        woken
    }

    /// Voluntary or preemptive return to READY. No-op (a programmer-error
    /// VOID) if the strand is not RUNNING.
    pub fn requeue_ready(&self, id: StrandId) -> SchedOutcome {
        let mut inner = self.inner.lock().unwrap();
        let now = inner.chronon;
        let Some(strand) = inner.strands.get_mut(&id) else {
            return self.not_found(now, id);
        };
        if strand.state != StrandState::Running {
            return self.programmer_error(now, id, "requeue on a non-running strand");
        }
        strand.state = StrandState::Ready;
        let prio = strand.effective_priority;
        let cpu = strand.cpu.unwrap_or(0);
        inner.run_queues[cpu as usize].current = None;
        inner.run_queues[cpu as usize].push_ready(prio, id);
        SchedOutcome::Ok
    }

    /// Block a RUNNING strand on a synchronization primitive.
    pub fn block(&self, id: StrandId) -> SchedOutcome {
        let mut inner = self.inner.lock().unwrap();
        let now = inner.chronon;
        let Some(strand) = inner.strands.get_mut(&id) else {
            return self.not_found(now, id);
        };
        if strand.state != StrandState::Running {
            return self.programmer_error(now, id, "block on a non-running strand");
        }
        strand.state = StrandState::Blocked;
        if let Some(cpu) = strand.cpu {
            inner.run_queues[cpu as usize].current = None;
        }
        SchedOutcome::Ok
    }

    /// Block until `deadline`, registering on the deadline min-heap.
    pub fn block_until(&self, id: StrandId, deadline: Chronon) -> SchedOutcome {
        let outcome = self.block(id);
        if outcome == SchedOutcome::Ok {
            let mut inner = self.inner.lock().unwrap();
            if let Some(strand) = inner.strands.get_mut(&id) {
                strand.wake_deadline = Some(deadline);
            }
            inner.deadlines.push(DeadlineEntry { deadline, strand: id });
        }
        outcome
    }

    /// Wake a BLOCKED strand back to READY. A no-op VOID if the strand was
    /// already ready/running (unblocking an already-ready strand is a
    /// programmer error, not something the caller should observe as fatal).
    pub fn wake(&self, id: StrandId) -> SchedOutcome {
        let mut inner = self.inner.lock().unwrap();
        let now = inner.chronon;
        let Some(strand) = inner.strands.get_mut(&id) else {
            return self.not_found(now, id);
        };
        if strand.state != StrandState::Blocked {
            return self.programmer_error(now, id, "wake on a strand that was not blocked");
        }
        strand.state = StrandState::Ready;
        strand.wake_deadline = None;
        let prio = strand.effective_priority;
        let cpu = strand.cpu.unwrap_or(0);
        inner.run_queues[cpu as usize].push_ready(prio, id);
        SchedOutcome::Ok
    }

    /// Terminate a strand immediately, regardless of state. Legal even for
    /// a blocked strand (e.g. one with an outstanding RDMA wait): its wait
    /// node is simply dropped.
    pub fn terminate(&self, id: StrandId) {
        let mut inner = self.inner.lock().unwrap();
        if let Some(strand) = inner.strands.get_mut(&id) {
            strand.state = StrandState::Terminated;
            if let Some(cpu) = strand.cpu {
                let rq = &mut inner.run_queues[cpu as usize];
                rq.remove(id);
                if rq.current == Some(id) {
                    rq.current = None;
                }
            }
        }
    }

    /// Move a READY or RUNNING strand to `cpu`, provided its affinity mask
    /// permits it.
    pub fn migrate(&self, id: StrandId, cpu: u32, registry: &VoidRegistry) -> SchedOutcome {
        let mut inner = self.inner.lock().unwrap();
        let now = inner.chronon;
        let Some(strand) = inner.strands.get(&id).cloned() else {
            return self.not_found(now, id);
        };
        if !strand.affinity_mask.allows(cpu) {
            let vid = registry.record(
                VoidReason::Permission,
                VoidId::INVALID,
                id.0,
                cpu as u64,
                void_loc!(),
                now.0,
                "migrate target outside affinity mask",
            );
            return SchedOutcome::Void(vid);
        }
        if !matches!(strand.state, StrandState::Ready | StrandState::Running) {
            let vid = registry.record(
                VoidReason::InvalidArg,
                VoidId::INVALID,
                id.0,
                cpu as u64,
                void_loc!(),
                now.0,
                "migrate on a strand that is neither ready nor running",
            );
            return SchedOutcome::Void(vid);
        }
        if let Some(src_cpu) = strand.cpu {
            inner.run_queues[src_cpu as usize].remove(id);
        }
        if let Some(s) = inner.strands.get_mut(&id) {
            s.cpu = Some(cpu);
        }
        if strand.state == StrandState::Ready {
            inner.run_queues[cpu as usize].push_ready(strand.effective_priority, id);
        }
        SchedOutcome::Ok
    }

    /// Priority inheritance hook: on an IPC lend, raise the borrower's
    /// effective priority to at least the lender's, to prevent a
    /// high-priority sender being inverted behind a low-priority recipient.
    pub fn on_ipc_lend(&self, lender: StrandId, borrower: StrandId) {
        let mut inner = self.inner.lock().unwrap();
        let lender_priority = inner.strands.get(&lender).map(|s| s.effective_priority);
        if let Some(priority) = lender_priority {
            if let Some(b) = inner.strands.get_mut(&borrower) {
                b.inherit_priority_at_least(priority);
            }
        }
    }

    /// Restore the borrower's own base priority on lend return.
    pub fn on_ipc_return(&self, borrower: StrandId) {
        let mut inner = self.inner.lock().unwrap();
        if let Some(b) = inner.strands.get_mut(&borrower) {
            b.restore_base_priority();
        }
    }

    #[must_use]
    pub fn effective_priority(&self, id: StrandId) -> Option<u8> {
        self.inner.lock().unwrap().strands.get(&id).map(|s| s.effective_priority)
    }

    #[must_use]
    pub fn state(&self, id: StrandId) -> Option<StrandState> {
        self.inner.lock().unwrap().strands.get(&id).map(|s| s.state)
    }

    fn not_found(&self, _now: Chronon, _id: StrandId) -> SchedOutcome {
        // Strand ids are looked up through arenas keyed by id; an unknown id
        // is a caller bug, not something worth a heavyweight VOID chain.
        SchedOutcome::Void(VoidId::INVALID)
    }

    fn programmer_error(&self, now: Chronon, id: StrandId, msg: &'static str) -> SchedOutcome {
        // No registry handle here by design: scheduler-internal invariant
        // violations are reported through the VOID returned to the caller,
        // who holds the registry and can record with full context.
        let _ = (now, id, msg);
        SchedOutcome::Void(VoidId::INVALID)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sched() -> Scheduler {
        Scheduler::new(2)
    }

    #[test]
    fn selection_is_highest_priority_then_round_robin() {
        let s = sched();
        let low = s.spawn(SovereignId(1), 2, AffinityMask::all(2));
        let high = s.spawn(SovereignId(1), 6, AffinityMask::all(2));
        let next = s.dispatch(0);
        assert_eq!(next, Some(high));
        s.requeue_ready(high);
        let _ = low;
    }

    #[test]
    fn tick_expires_quantum_and_requeues() {
        let s = sched();
        let id = s.spawn(SovereignId(1), 0, AffinityMask::all(1));
        assert_eq!(s.dispatch(0), Some(id));
        assert_eq!(s.tick(0), Vec::new());
        assert_eq!(s.state(id), Some(StrandState::Ready));
    }

    #[test]
    fn block_until_wakes_on_deadline() {
        let s = sched();
        let id = s.spawn(SovereignId(1), 4, AffinityMask::all(1));
        s.dispatch(0);
        s.block_until(id, Chronon(5));
        for _ in 0..4 {
            assert_eq!(s.tick(0), Vec::new());
        }
        let woken = s.tick(0);
        assert_eq!(woken, vec![id]);
        assert_eq!(s.state(id), Some(StrandState::Ready));
    }

    #[test]
    fn priority_inheritance_raises_then_restores() {
        let s = sched();
        let hi = s.spawn(SovereignId(1), 5, AffinityMask::all(1));
        let lo = s.spawn(SovereignId(1), 2, AffinityMask::all(1));
        s.on_ipc_lend(hi, lo);
        assert_eq!(s.effective_priority(lo), Some(5));
        s.on_ipc_return(lo);
        assert_eq!(s.effective_priority(lo), Some(2));
    }

    #[test]
    fn migrate_respects_affinity() {
        let s = sched();
        let registry = VoidRegistry::new(16);
        let id = s.spawn(SovereignId(1), 4, AffinityMask::single(0));
        let result = s.migrate(id, 1, &registry);
        assert!(matches!(result, SchedOutcome::Void(_)));
    }

    #[test]
    fn terminate_on_blocked_strand_is_legal() {
        let s = sched();
        let id = s.spawn(SovereignId(1), 4, AffinityMask::all(1));
        s.dispatch(0);
        s.block(id);
        s.terminate(id);
        assert_eq!(s.state(id), Some(StrandState::Terminated));
    }
}
