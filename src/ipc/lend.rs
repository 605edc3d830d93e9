//! Per-endpoint lend registry: tracks currently-lent capabilities so an
//! expired or explicitly revoked lend restores the lender's access.

use crate::cap::Capability;
use crate::ids::{Chronon, EndpointId, MessageId};

pub const MAX_LEND_ENTRIES: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LendStatus {
    Empty,
    Active,
    Returned,
    Expired,
    Revoked,
}

#[derive(Debug, Clone, Copy)]
pub struct LendEntry {
    pub original_cap: Capability,
    pub borrowed_cap: Capability,
    pub message_id: MessageId,
    pub start_chronon: Chronon,
    pub expiry_chronon: Chronon,
    pub borrower_endpoint_id: EndpointId,
    pub status: LendStatus,
}

/// Fixed-capacity lend registry, owned by its endpoint. Only the endpoint's
/// strand mutates it; `process_lends` sweeps run from the scheduler's tick
/// on the owning core.
#[derive(Debug, Default)]
pub struct LendRegistry {
    entries: Vec<LendEntry>,
}

impl LendRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self { entries: Vec::new() }
    }

    /// Create an ACTIVE entry at LEND send time. Returns `None` if the
    /// registry is already at `MAX_LEND_ENTRIES` and has no reclaimable
    /// (non-ACTIVE) slot.
    pub fn create(
        &mut self,
        original_cap: Capability,
        borrowed_cap: Capability,
        message_id: MessageId,
        start_chronon: Chronon,
        expiry_chronon: Chronon,
        borrower_endpoint_id: EndpointId,
    ) -> bool {
        let entry = LendEntry {
            original_cap,
            borrowed_cap,
            message_id,
            start_chronon,
            expiry_chronon,
            borrower_endpoint_id,
            status: LendStatus::Active,
        };
        if let Some(slot) = self.entries.iter_mut().find(|e| e.status != LendStatus::Active) {
            *slot = entry;
            return true;
        }
        if self.entries.len() >= MAX_LEND_ENTRIES {
            return false;
        }
        self.entries.push(entry);
        true
    }

    /// RETURN: match by `message_id`, transition ACTIVE -> RETURNED.
    /// Returns `false` (unmatched RETURN) if no active entry matches.
    pub fn process_return(&mut self, message_id: MessageId) -> Option<&LendEntry> {
        let idx = self
            .entries
            .iter()
            .position(|e| e.status == LendStatus::Active && e.message_id == message_id)?;
        self.entries[idx].status = LendStatus::Returned;
        Some(&self.entries[idx])
    }

    /// Sweep for entries whose expiry has passed, transitioning them
    /// ACTIVE -> EXPIRED exactly once. Returns the entries just expired.
    pub fn process_lends(&mut self, now: Chronon) -> Vec<LendEntry> {
        let mut expired = Vec::new();
        for entry in &mut self.entries {
            if entry.status == LendStatus::Active && entry.expiry_chronon.0 <= now.0 {
                entry.status = LendStatus::Expired;
                expired.push(*entry);
            }
        }
        expired
    }

    /// Force ACTIVE->REVOKED immediately. A no-op returning `false` if the
    /// entry is not currently ACTIVE (in particular, calling this once the
    /// lend has already expired via `process_lends`, or calling it again
    /// after a prior revoke, both fail).
    pub fn revoke_lend(&mut self, message_id: MessageId) -> bool {
        if let Some(entry) = self.entries.iter_mut().find(|e| e.message_id == message_id) {
            if entry.status == LendStatus::Active {
                entry.status = LendStatus::Revoked;
                return true;
            }
        }
        false
    }

    #[must_use]
    pub fn find(&self, message_id: MessageId) -> Option<&LendEntry> {
        self.entries.iter().find(|e| e.message_id == message_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cap::Permissions;

    fn cap() -> Capability {
        Capability::new(0, 16, 0, Permissions::READ)
    }

    #[test]
    fn expiry_transitions_exactly_once_and_revoke_after_is_noop() {
        let mut reg = LendRegistry::new();
        reg.create(cap(), cap(), MessageId(1), Chronon(0), Chronon(50), EndpointId(2));
        assert!(reg.process_lends(Chronon(49)).is_empty());
        let expired = reg.process_lends(Chronon(51));
        assert_eq!(expired.len(), 1);
        assert!(reg.process_lends(Chronon(52)).is_empty());
        assert!(!reg.revoke_lend(MessageId(1)));
    }

    #[test]
    fn revoke_forces_an_active_lend_to_revoked_immediately() {
        let mut reg = LendRegistry::new();
        reg.create(cap(), cap(), MessageId(1), Chronon(0), Chronon(50), EndpointId(2));
        assert!(reg.revoke_lend(MessageId(1)));
        assert_eq!(reg.find(MessageId(1)).unwrap().status, LendStatus::Revoked);
        assert!(!reg.revoke_lend(MessageId(1)));
    }

    #[test]
    fn unmatched_return_is_none() {
        let mut reg = LendRegistry::new();
        assert!(reg.process_return(MessageId(99)).is_none());
    }
}
