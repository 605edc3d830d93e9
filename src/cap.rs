//! Capabilities: unforgeable, generation-tagged, permissioned access tuples.
//!
//! A capability is a value, never a reference with identity: narrowing it
//! yields a new, independent capability. Validity is checked lazily against
//! the live generation of the object it names — there is no broadcast
//! revocation, only a bumped counter that makes stale copies fail their next
//! check.

use crate::void::{SourceLoc, VoidId, VoidReason, VoidRegistry};
use crate::void_loc;

/// Sentinel generation that marks a capability as already-VOID.
pub const VOID_SENTINEL: u64 = u64::MAX;

bitflags::bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Permissions: u8 {
        const READ   = 0b0000_0001;
        const WRITE  = 0b0000_0010;
        const EXECUTE = 0b0000_0100;
        const DERIVE = 0b0000_1000;
        const REVOKE = 0b0001_0000;
    }
}

/// Immutable capability tuple. `base`/`length` key into whatever object
/// space the owner assigned (a physical address, a DSM address, or an
/// opaque handle); `generation` is the value that made this capability
/// valid at derivation time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capability {
    pub base: u64,
    pub length: u64,
    pub generation: u64,
    pub permissions: Permissions,
}

impl Capability {
    #[must_use]
    pub const fn new(base: u64, length: u64, generation: u64, permissions: Permissions) -> Self {
        Self { base, length, generation, permissions }
    }

    #[must_use]
    pub const fn void() -> Self {
        Self { base: 0, length: 0, generation: VOID_SENTINEL, permissions: Permissions::empty() }
    }

    #[must_use]
    pub const fn is_void(&self) -> bool {
        self.generation == VOID_SENTINEL
    }

    #[must_use]
    pub const fn end(&self) -> u64 {
        self.base.saturating_add(self.length)
    }
}

/// Result of `check`/`access`: either ok, or a VOID whose reason names the
/// first violated conjunct.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckOutcome {
    Ok,
    Void { reason: VoidReason, void_id: VoidId },
}

impl CheckOutcome {
    #[must_use]
    pub const fn is_ok(&self) -> bool {
        matches!(self, Self::Ok)
    }
}

/// Source of truth for an object's current generation. Objects are keyed by
/// `base` (the caller decides what namespace that is: a physical frame, a
/// DSM page, or any other owner-assigned key).
pub trait GenerationSource {
    /// Current generation of the object named by `base`, or `None` if the
    /// object is unknown (treated as `NOT_FOUND`, not `GENERATION`).
    fn current_generation(&self, base: u64) -> Option<u64>;
}

/// Access check per the data-model invariant:
/// `gen_now == cap.generation && offset < cap.length && required_perm ⊆ cap.permissions`.
/// On failure, records a VOID whose reason is exactly the first violated
/// conjunct and returns it via `CheckOutcome::Void`.
pub fn access(
    registry: &VoidRegistry,
    objects: &dyn GenerationSource,
    cap: &Capability,
    offset: u64,
    required: Permissions,
    timestamp: u64,
) -> CheckOutcome {
    if cap.is_void() {
        let id = registry.record(
            VoidReason::Generation,
            VoidId::INVALID,
            cap.base,
            offset,
            void_loc!(),
            timestamp,
            "access on an already-void capability",
        );
        return CheckOutcome::Void { reason: VoidReason::Generation, void_id: id };
    }
    let Some(gen_now) = objects.current_generation(cap.base) else {
        let id = registry.record(
            VoidReason::NotFound,
            VoidId::INVALID,
            cap.base,
            offset,
            void_loc!(),
            timestamp,
            "object unknown to generation source",
        );
        return CheckOutcome::Void { reason: VoidReason::NotFound, void_id: id };
    };
    if gen_now != cap.generation {
        let id = registry.record(
            VoidReason::Generation,
            VoidId::INVALID,
            cap.base,
            offset,
            void_loc!(),
            timestamp,
            "capability generation is stale",
        );
        return CheckOutcome::Void { reason: VoidReason::Generation, void_id: id };
    }
    if offset >= cap.length {
        let id = registry.record(
            VoidReason::InvalidArg,
            VoidId::INVALID,
            cap.base,
            offset,
            void_loc!(),
            timestamp,
            "offset out of bounds",
        );
        return CheckOutcome::Void { reason: VoidReason::InvalidArg, void_id: id };
    }
    if !cap.permissions.contains(required) {
        let id = registry.record(
            VoidReason::Permission,
            VoidId::INVALID,
            cap.base,
            offset,
            void_loc!(),
            timestamp,
            "required permission not held",
        );
        return CheckOutcome::Void { reason: VoidReason::Permission, void_id: id };
    }
    CheckOutcome::Ok
}

/// `check`: the generation-only half of `access`, for callers who perform
/// their own bounds/permission checks but still want the VOID taxonomy.
pub fn check(
    registry: &VoidRegistry,
    objects: &dyn GenerationSource,
    cap: &Capability,
    timestamp: u64,
) -> CheckOutcome {
    access(registry, objects, cap, 0, Permissions::empty(), timestamp)
}

/// Narrow `parent` into a sub-capability. Fails with `PERMISSION` unless
/// `narrowed_perms ⊆ parent.permissions`, the sub-range is contained in the
/// parent's range, and `DERIVE` is held.
pub fn derive(
    registry: &VoidRegistry,
    parent: &Capability,
    narrowed_perms: Permissions,
    sub_base: u64,
    sub_length: u64,
    timestamp: u64,
) -> Result<Capability, VoidId> {
    let ok = !parent.is_void()
        && parent.permissions.contains(Permissions::DERIVE)
        && parent.permissions.contains(narrowed_perms)
        && sub_base >= parent.base
        && sub_base.saturating_add(sub_length) <= parent.base.saturating_add(parent.length);
    if !ok {
        let id = registry.record(
            VoidReason::Permission,
            VoidId::INVALID,
            parent.base,
            sub_base,
            void_loc!(),
            timestamp,
            "derive violates narrowing or DERIVE-permission invariant",
        );
        return Err(id);
    }
    Ok(Capability::new(sub_base, sub_length, parent.generation, narrowed_perms))
}

/// Per-object generation counters, bumped on revocation. Suitable as a
/// `GenerationSource` impl for simple in-process object spaces (DSM pages
/// and persistent mappings keep their own, richer bookkeeping instead).
#[derive(Debug, Default)]
pub struct GenerationTable {
    generations: std::sync::Mutex<std::collections::HashMap<u64, u64>>,
}

impl GenerationTable {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a fresh object at generation 0, returning that generation.
    pub fn register(&self, base: u64) -> u64 {
        let mut g = self.generations.lock().unwrap();
        *g.entry(base).or_insert(0)
    }

    /// Bump the object's generation, invalidating every previously-issued
    /// capability (lazily: they simply fail their next check).
    pub fn revoke(&self, base: u64) -> u64 {
        let mut g = self.generations.lock().unwrap();
        let entry = g.entry(base).or_insert(0);
        *entry += 1;
        *entry
    }
}

impl GenerationSource for GenerationTable {
    fn current_generation(&self, base: u64) -> Option<u64> {
        self.generations.lock().unwrap().get(&base).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> VoidRegistry {
        VoidRegistry::new(256)
    }

    #[test]
    fn access_succeeds_iff_generation_bounds_and_permission_hold() {
        let reg = registry();
        let objs = GenerationTable::new();
        objs.register(10);
        let cap = Capability::new(10, 16, 0, Permissions::READ | Permissions::WRITE);
        assert!(access(&reg, &objs, &cap, 4, Permissions::READ, 0).is_ok());
        assert!(!access(&reg, &objs, &cap, 16, Permissions::READ, 0).is_ok());
        assert!(!access(&reg, &objs, &cap, 4, Permissions::EXECUTE, 0).is_ok());
    }

    #[test]
    fn stale_generation_yields_generation_void() {
        let reg = registry();
        let objs = GenerationTable::new();
        objs.register(10);
        let cap = Capability::new(10, 16, 0, Permissions::READ);
        objs.revoke(10);
        let outcome = access(&reg, &objs, &cap, 0, Permissions::READ, 0);
        assert!(matches!(outcome, CheckOutcome::Void { reason: VoidReason::Generation, .. }));
    }

    #[test]
    fn derive_requires_subset_perms_and_derive_bit() {
        let reg = registry();
        let parent = Capability::new(0, 100, 0, Permissions::READ | Permissions::DERIVE);
        let child = derive(&reg, &parent, Permissions::READ, 10, 20, 0);
        assert!(child.is_ok());
        let no_derive = Capability::new(0, 100, 0, Permissions::READ);
        assert!(derive(&reg, &no_derive, Permissions::READ, 10, 20, 0).is_err());
        let widen = derive(&reg, &parent, Permissions::WRITE, 10, 20, 0);
        assert!(widen.is_err());
        let oob = derive(&reg, &parent, Permissions::READ, 90, 30, 0);
        assert!(oob.is_err());
    }
}
