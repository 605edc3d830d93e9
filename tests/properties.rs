//! Property-based tests for the invariants called out explicitly in the
//! testable-properties section: VOID causality ordering and vector-clock
//! comparison laws. Modeled on the corpus's use of `proptest::proptest!`
//! over small generated sequences rather than hand-picked examples.

use proptest::prelude::*;
use seraph_core::clock::{Ordering, VectorClock};
use seraph_core::ids::NodeId;
use seraph_core::void::{VoidId, VoidReason, VoidRegistry};

fn node_ids() -> impl Strategy<Value = Vec<u32>> {
    prop::collection::vec(0u32..8, 0..12)
}

proptest::proptest! {
    /// Every VOID record's id is strictly greater than its predecessor's,
    /// for any chain of records built by repeatedly recording against the
    /// previously returned id.
    #[test]
    fn void_chain_ids_are_strictly_increasing(depth in 1usize..50) {
        let registry = VoidRegistry::new(256);
        let mut predecessor = VoidId::INVALID;
        for i in 0..depth {
            let id = registry.record(
                VoidReason::Unknown,
                predecessor,
                0,
                0,
                seraph_core::void::SourceLoc { file: "test", function: "f", line: i as u32 },
                i as u64,
                "",
            );
            prop_assert!(id.0 > predecessor.0);
            predecessor = id;
        }
    }

    /// `compare` is anti-symmetric: if `a` is BEFORE `b` then `b` is AFTER
    /// `a`, for any sequence of per-node increments applied to `a` then
    /// replayed (plus more) into `b`.
    #[test]
    fn compare_is_antisymmetric(a_ops in node_ids(), extra_ops in node_ids()) {
        let mut a = VectorClock::new();
        for n in &a_ops {
            a.increment(NodeId(*n));
        }
        let mut b = a.clone();
        for n in &extra_ops {
            b.increment(NodeId(*n));
        }
        match a.compare(&b) {
            Ordering::Before => prop_assert_eq!(b.compare(&a), Ordering::After),
            Ordering::After => prop_assert_eq!(b.compare(&a), Ordering::Before),
            Ordering::Equal => prop_assert_eq!(b.compare(&a), Ordering::Equal),
            Ordering::Concurrent => prop_assert_eq!(b.compare(&a), Ordering::Concurrent),
        }
    }

    /// Merging `other` into `self` always yields a clock that is AFTER (or
    /// EQUAL to) both of its inputs — the defining property of pointwise
    /// max.
    #[test]
    fn merge_dominates_both_inputs(a_ops in node_ids(), b_ops in node_ids()) {
        let mut a = VectorClock::new();
        for n in &a_ops {
            a.increment(NodeId(*n));
        }
        let mut b = VectorClock::new();
        for n in &b_ops {
            b.increment(NodeId(*n));
        }
        let mut merged = a.clone();
        merged.merge(&b);
        prop_assert!(matches!(merged.compare(&a), Ordering::After | Ordering::Equal));
        prop_assert!(matches!(merged.compare(&b), Ordering::After | Ordering::Equal));
    }
}
