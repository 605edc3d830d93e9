//! Sparse vector clocks used for causal ordering between DSM nodes.

use std::collections::BTreeMap;

use crate::ids::NodeId;

/// Pointwise comparison result between two vector clocks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ordering {
    Before,
    After,
    Equal,
    Concurrent,
}

/// Sparse mapping from node id to counter; absent keys are implicit zero.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VectorClock {
    counters: BTreeMap<NodeId, u64>,
}

impl VectorClock {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn get(&self, node: NodeId) -> u64 {
        self.counters.get(&node).copied().unwrap_or(0)
    }

    /// Bump `node`'s own entry and return the new local timestamp.
    pub fn increment(&mut self, node: NodeId) -> u64 {
        let entry = self.counters.entry(node).or_insert(0);
        *entry += 1;
        *entry
    }

    /// Pointwise max with `other`.
    pub fn merge(&mut self, other: &VectorClock) {
        for (node, &count) in &other.counters {
            let entry = self.counters.entry(*node).or_insert(0);
            if count > *entry {
                *entry = count;
            }
        }
    }

    /// Pointwise comparison. `BEFORE` iff all entries of `self` are `<=`
    /// those of `other` with at least one strict `<`; `AFTER` is the
    /// symmetric case; `EQUAL` when every entry matches; otherwise
    /// `CONCURRENT`.
    #[must_use]
    pub fn compare(&self, other: &VectorClock) -> Ordering {
        let mut nodes: std::collections::BTreeSet<NodeId> =
            self.counters.keys().copied().collect();
        nodes.extend(other.counters.keys().copied());

        let mut self_less = false;
        let mut other_less = false;
        for node in nodes {
            let a = self.get(node);
            let b = other.get(node);
            match a.cmp(&b) {
                std::cmp::Ordering::Less => self_less = true,
                std::cmp::Ordering::Greater => other_less = true,
                std::cmp::Ordering::Equal => {}
            }
        }
        match (self_less, other_less) {
            (false, false) => Ordering::Equal,
            (true, false) => Ordering::Before,
            (false, true) => Ordering::After,
            (true, true) => Ordering::Concurrent,
        }
    }

    #[must_use]
    pub fn is_concurrent(&self, other: &VectorClock) -> bool {
        self.compare(other) == Ordering::Concurrent
    }

    #[must_use]
    pub fn happened_before(&self, other: &VectorClock) -> bool {
        self.compare(other) == Ordering::Before
    }
}
