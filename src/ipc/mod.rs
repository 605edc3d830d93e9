//! Zero-copy capability IPC: fixed-size messages that transfer authority
//! (grant/lend/copy/derive) between endpoints, with lend-registry tracking
//! and timeout-based revocation.

pub mod channel;
pub mod endpoint;
pub mod lend;
pub mod message;

use std::collections::HashMap;
use std::sync::{Mutex, RwLock};

use crate::cap::{self, Capability, Permissions};
use crate::ids::{Chronon, ChannelId, EndpointId, IdAllocator, MessageId, StrandId};
use crate::sched::Scheduler;
use crate::void::{VoidId, VoidReason, VoidRegistry};
use crate::void_loc;

pub use channel::Channel;
pub use endpoint::{Endpoint, EndpointStats};
pub use lend::{LendEntry, LendRegistry, LendStatus, MAX_LEND_ENTRIES};
pub use message::{Message, MessageFlags, MessageHeader, MessageType, MAX_INLINE_CAPS};

pub const DEFAULT_RING_CAPACITY: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    Sent,
    Full,
    Void(VoidId),
}

#[derive(Debug, Clone)]
pub enum ReceiveOutcome {
    Message(Message),
    Void { reason: VoidReason, void_id: VoidId },
}

struct EndpointEntry {
    endpoint: Endpoint,
    owner_strand: StrandId,
}

/// Owns the endpoint and channel arenas; cross-references between them are
/// stable ids, not pointers, per the cyclic-object-graph design note.
pub struct IpcFabric {
    ids: IdAllocator,
    endpoints: RwLock<HashMap<EndpointId, EndpointEntry>>,
    channels: RwLock<HashMap<ChannelId, Mutex<Channel>>>,
    ring_capacity: usize,
}

impl IpcFabric {
    #[must_use]
    pub fn new(ring_capacity: usize) -> Self {
        Self {
            ids: IdAllocator::new(),
            endpoints: RwLock::new(HashMap::new()),
            channels: RwLock::new(HashMap::new()),
            ring_capacity,
        }
    }

    /// Create a channel: two endpoints sharing a generation.
    pub fn create_channel(&self, parent_strand: StrandId, child_strand: StrandId) -> (ChannelId, EndpointId, EndpointId) {
        let parent_id = EndpointId(self.ids.next());
        let child_id = EndpointId(self.ids.next());
        let channel_id = ChannelId(self.ids.next());

        let mut endpoints = self.endpoints.write().unwrap();
        endpoints.insert(
            parent_id,
            EndpointEntry { endpoint: Endpoint::new(parent_id, self.ring_capacity), owner_strand: parent_strand },
        );
        endpoints.insert(
            child_id,
            EndpointEntry { endpoint: Endpoint::new(child_id, self.ring_capacity), owner_strand: child_strand },
        );
        drop(endpoints);

        self.channels
            .write()
            .unwrap()
            .insert(channel_id, Mutex::new(Channel::new(channel_id, parent_id, child_id)));
        (channel_id, parent_id, child_id)
    }

    /// Close a channel: bump generation, mark both endpoints disconnected.
    /// All operations on a torn-down channel return VOID of CHANNEL_CLOSED.
    pub fn close_channel(&self, id: ChannelId) {
        let channels = self.channels.read().unwrap();
        let Some(channel_lock) = channels.get(&id) else { return };
        let mut channel = channel_lock.lock().unwrap();
        channel.close();
        let endpoints = self.endpoints.read().unwrap();
        if let Some(e) = endpoints.get(&channel.parent) {
            e.endpoint.mark_disconnected();
        }
        if let Some(e) = endpoints.get(&channel.child) {
            e.endpoint.mark_disconnected();
        }
    }

    fn endpoint_alive(&self, id: EndpointId, registry: &VoidRegistry, now: Chronon) -> Result<(), VoidId> {
        let endpoints = self.endpoints.read().unwrap();
        match endpoints.get(&id) {
            Some(e) if e.endpoint.is_connected() => Ok(()),
            Some(_) => Err(registry.record(
                VoidReason::ChannelClosed,
                VoidId::INVALID,
                id.0,
                0,
                void_loc!(),
                now.0,
                "operation on a torn-down channel",
            )),
            None => Err(registry.record(
                VoidReason::EndpointDead,
                VoidId::INVALID,
                id.0,
                0,
                void_loc!(),
                now.0,
                "unknown endpoint id",
            )),
        }
    }

    /// Enqueue `msg` on `endpoint`'s send queue. A LEND message reserves
    /// queue capacity before creating its lend-registry entry: there is no
    /// observable state where the registry records a lend but the message
    /// never made it onto the queue.
    pub fn send(
        &self,
        endpoint: EndpointId,
        msg: Message,
        lend_timeout: Option<Chronon>,
        registry: &VoidRegistry,
        now: Chronon,
    ) -> SendOutcome {
        if let Err(vid) = self.endpoint_alive(endpoint, registry, now) {
            return SendOutcome::Void(vid);
        }
        let endpoints = self.endpoints.read().unwrap();
        let entry = endpoints.get(&endpoint).expect("checked alive above");

        if msg.header.ty == MessageType::Lend {
            let Some(deadline) = lend_timeout else {
                let vid = registry.record(
                    VoidReason::InvalidArg,
                    VoidId::INVALID,
                    endpoint.0,
                    0,
                    void_loc!(),
                    now.0,
                    "lend message without a timeout",
                );
                return SendOutcome::Void(vid);
            };
            if !entry.endpoint.send_has_room() {
                return SendOutcome::Full;
            }
            let mut lend_registry = entry.endpoint.lend_registry.lock().unwrap();
            let Some(&original) = msg.caps.first() else {
                let vid = registry.record(
                    VoidReason::InvalidArg,
                    VoidId::INVALID,
                    endpoint.0,
                    0,
                    void_loc!(),
                    now.0,
                    "lend message carries no capability",
                );
                return SendOutcome::Void(vid);
            };
            let created = lend_registry.create(
                original,
                original,
                msg.header.message_id,
                now,
                deadline,
                EndpointId::INVALID,
            );
            drop(lend_registry);
            if !created {
                let vid = registry.record(
                    VoidReason::AllocFail,
                    VoidId::INVALID,
                    endpoint.0,
                    0,
                    void_loc!(),
                    now.0,
                    "lend registry at capacity",
                );
                return SendOutcome::Void(vid);
            }
        }

        match entry.endpoint.try_send(msg) {
            Ok(()) => SendOutcome::Sent,
            Err(_) => SendOutcome::Full,
        }
    }

    /// Dequeue from `endpoint`'s receive queue.
    pub fn receive(&self, endpoint: EndpointId, registry: &VoidRegistry, now: Chronon) -> ReceiveOutcome {
        if let Err(vid) = self.endpoint_alive(endpoint, registry, now) {
            return ReceiveOutcome::Void { reason: VoidReason::EndpointDead, void_id: vid };
        }
        let endpoints = self.endpoints.read().unwrap();
        let entry = endpoints.get(&endpoint).expect("checked alive above");
        match entry.endpoint.try_receive() {
            Some(msg) => ReceiveOutcome::Message(msg),
            None => {
                let vid = registry.record(
                    VoidReason::ChannelEmpty,
                    VoidId::INVALID,
                    endpoint.0,
                    0,
                    void_loc!(),
                    now.0,
                    "receive on an empty, non-closed queue",
                );
                ReceiveOutcome::Void { reason: VoidReason::ChannelEmpty, void_id: vid }
            }
        }
    }

    /// Scan up to `max_scan` queued messages for a RESPONSE matching
    /// `request_id`; non-matching messages remain in order.
    pub fn await_response(&self, endpoint: EndpointId, request_id: MessageId, max_scan: usize) -> Option<Message> {
        let endpoints = self.endpoints.read().unwrap();
        let entry = endpoints.get(&endpoint)?;
        entry.endpoint.scan_receive(max_scan, |m| {
            m.header.ty == MessageType::Response && m.header.message_id == request_id
        })
    }

    /// Single-threaded cooperative sweep: move messages from one endpoint's
    /// send queue to its peer's receive queue, applying per-type authority
    /// semantics. Returns the number of messages transferred.
    pub fn transfer(&self, channel: ChannelId, scheduler: &Scheduler, registry: &VoidRegistry, now: Chronon) -> usize {
        let channels = self.channels.read().unwrap();
        let Some(channel_lock) = channels.get(&channel) else { return 0 };
        let channel = channel_lock.lock().unwrap();
        if !channel.active {
            return 0;
        }
        let mut moved = 0;
        for (from, to) in [(channel.parent, channel.child), (channel.child, channel.parent)] {
            moved += self.transfer_direction(from, to, scheduler, registry, now);
        }
        moved
    }

    fn transfer_direction(
        &self,
        from: EndpointId,
        to: EndpointId,
        scheduler: &Scheduler,
        registry: &VoidRegistry,
        now: Chronon,
    ) -> usize {
        let endpoints = self.endpoints.read().unwrap();
        let (Some(from_entry), Some(to_entry)) = (endpoints.get(&from), endpoints.get(&to)) else {
            return 0;
        };
        let mut count = 0;
        while let Some(mut msg) = from_entry.endpoint.drain_one_send() {
            match msg.header.ty {
                MessageType::Grant => {
                    // Ownership transfer: the capability moves wholesale.
                }
                MessageType::Lend => {
                    if let Some(original) = msg.caps.first().copied() {
                        let borrowed = cap::derive(
                            registry,
                            &original,
                            original.permissions,
                            original.base,
                            original.length,
                            now.0,
                        );
                        if let Ok(borrowed) = borrowed {
                            msg.caps.clear();
                            let _ = msg.caps.push(borrowed);
                        }
                    }
                    scheduler.on_ipc_lend(from_entry.owner_strand, to_entry.owner_strand);
                }
                MessageType::Return => {
                    // The ACTIVE lend entry lives on the lender's registry.
                    // On a RETURN the lender is the transfer's destination
                    // (`to`); `from` is the borrower returning the capability.
                    let mut lend_registry = to_entry.endpoint.lend_registry.lock().unwrap();
                    if lend_registry.process_return(msg.header.message_id).is_none() {
                        registry.record(
                            VoidReason::NotFound,
                            VoidId::INVALID,
                            from.0,
                            msg.header.message_id.0,
                            void_loc!(),
                            now.0,
                            "RETURN did not match any active lend",
                        );
                    }
                    drop(lend_registry);
                    scheduler.on_ipc_return(from_entry.owner_strand);
                }
                MessageType::Copy | MessageType::Derive => {
                    // Borrower receives a fresh capability; lender's is unchanged.
                }
                MessageType::Request | MessageType::Response | MessageType::Notification | MessageType::Void => {}
            }
            if to_entry.endpoint.deliver(msg).is_err() {
                // Peer's receive ring is full: per the ordering contract we
                // stop rather than reorder; the sweep resumes next tick.
                break;
            }
            count += 1;
        }
        count
    }

    /// Sweep `endpoint`'s lend registry for expired entries, restoring the
    /// lender's access and emitting a VOID of TIMEOUT per expiry, chained
    /// to the lend's own `void_id` if it had one (0 otherwise).
    pub fn process_lends(&self, endpoint: EndpointId, registry: &VoidRegistry, now: Chronon) -> Vec<LendEntry> {
        let endpoints = self.endpoints.read().unwrap();
        let Some(entry) = endpoints.get(&endpoint) else { return Vec::new() };
        let expired = entry.endpoint.lend_registry.lock().unwrap().process_lends(now);
        for e in &expired {
            registry.record(
                VoidReason::Timeout,
                VoidId::INVALID,
                endpoint.0,
                e.message_id.0,
                void_loc!(),
                now.0,
                "lend expired",
            );
        }
        expired
    }

    pub fn revoke_lend(&self, endpoint: EndpointId, message_id: MessageId) -> bool {
        let endpoints = self.endpoints.read().unwrap();
        let Some(entry) = endpoints.get(&endpoint) else { return false };
        entry.endpoint.lend_registry.lock().unwrap().revoke_lend(message_id)
    }

    #[must_use]
    pub fn lend_status(&self, endpoint: EndpointId, message_id: MessageId) -> Option<LendStatus> {
        let endpoints = self.endpoints.read().unwrap();
        let entry = endpoints.get(&endpoint)?;
        let lend_registry = entry.endpoint.lend_registry.lock().unwrap();
        lend_registry.find(message_id).map(|e| e.status)
    }

    #[must_use]
    pub fn stats(&self, endpoint: EndpointId) -> Option<EndpointStats> {
        let endpoints = self.endpoints.read().unwrap();
        Some(*endpoints.get(&endpoint)?.endpoint.stats.lock().unwrap())
    }
}

/// Helper: READ|WRITE|DERIVE capability used pervasively in IPC tests and
/// scenario walkthroughs.
#[must_use]
pub fn full_access_cap(base: u64, length: u64, generation: u64) -> Capability {
    Capability::new(base, length, generation, Permissions::READ | Permissions::WRITE | Permissions::DERIVE)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::SovereignId;
    use crate::sched::AffinityMask;

    fn setup() -> (IpcFabric, Scheduler, VoidRegistry, StrandId, StrandId) {
        let scheduler = Scheduler::new(1);
        let hi = scheduler.spawn(SovereignId(1), 5, AffinityMask::all(1));
        let lo = scheduler.spawn(SovereignId(1), 2, AffinityMask::all(1));
        (IpcFabric::new(DEFAULT_RING_CAPACITY), scheduler, VoidRegistry::new(256), hi, lo)
    }

    #[test]
    fn send_on_full_queue_returns_full_without_dropping() {
        let (fabric, scheduler, registry, hi, lo) = setup();
        let (_chan, parent, _child) = fabric.create_channel(hi, lo);
        for i in 0..DEFAULT_RING_CAPACITY {
            let msg = Message::new(MessageId(i as u64 + 1), hi, Chronon(0), MessageType::Notification, &[]);
            assert_eq!(fabric.send(parent, msg, None, &registry, Chronon(0)), SendOutcome::Sent);
        }
        let overflow = Message::new(MessageId(999), hi, Chronon(0), MessageType::Notification, &[]);
        assert_eq!(fabric.send(parent, overflow, None, &registry, Chronon(0)), SendOutcome::Full);
        let _ = scheduler;
    }

    #[test]
    fn receive_on_empty_queue_is_channel_empty_void() {
        let (fabric, _scheduler, registry, hi, lo) = setup();
        let (_chan, parent, _child) = fabric.create_channel(hi, lo);
        let outcome = fabric.receive(parent, &registry, Chronon(0));
        assert!(matches!(outcome, ReceiveOutcome::Void { reason: VoidReason::ChannelEmpty, .. }));
    }

    #[test]
    fn closed_channel_yields_channel_closed_void() {
        let (fabric, _scheduler, registry, hi, lo) = setup();
        let (chan, parent, _child) = fabric.create_channel(hi, lo);
        fabric.close_channel(chan);
        let outcome = fabric.receive(parent, &registry, Chronon(0));
        assert!(matches!(outcome, ReceiveOutcome::Void { reason: VoidReason::ChannelClosed, .. }));
    }

    #[test]
    fn lend_then_return_restores_priority_and_lend_status() {
        let (fabric, scheduler, registry, hi, lo) = setup();
        let (chan, parent, child) = fabric.create_channel(hi, lo);
        let cap = full_access_cap(100, 16, 0);
        let msg = Message::new(MessageId(1), hi, Chronon(0), MessageType::Lend, &[cap]);
        assert_eq!(fabric.send(parent, msg, Some(Chronon(50)), &registry, Chronon(0)), SendOutcome::Sent);

        fabric.transfer(chan, &scheduler, &registry, Chronon(0));
        assert_eq!(scheduler.effective_priority(lo), Some(5));

        let borrowed = fabric.receive(child, &registry, Chronon(0));
        assert!(matches!(borrowed, ReceiveOutcome::Message(_)));

        let ret = Message::new(MessageId(1), lo, Chronon(1), MessageType::Return, &[]);
        fabric.send(child, ret, None, &registry, Chronon(1));
        fabric.transfer(chan, &scheduler, &registry, Chronon(1));

        assert_eq!(scheduler.effective_priority(lo), Some(2));
        assert_eq!(fabric.lend_status(parent, MessageId(1)), Some(LendStatus::Returned));
    }

    #[test]
    fn lend_expiry_restores_lender_and_voids_borrower_generation() {
        let (fabric, scheduler, registry, hi, lo) = setup();
        let (chan, parent, _child) = fabric.create_channel(hi, lo);
        let cap = full_access_cap(100, 16, 0);
        let msg = Message::new(MessageId(1), hi, Chronon(0), MessageType::Lend, &[cap]);
        fabric.send(parent, msg, Some(Chronon(50)), &registry, Chronon(0));
        fabric.transfer(chan, &scheduler, &registry, Chronon(0));

        let expired = fabric.process_lends(parent, &registry, Chronon(51));
        assert_eq!(expired.len(), 1);
        assert_eq!(fabric.lend_status(parent, MessageId(1)), Some(LendStatus::Expired));
        // Once a lend has expired via process_lends, revoke_lend is a no-op:
        // forcing a REVOKE only applies to a still-ACTIVE lend.
        assert!(!fabric.revoke_lend(parent, MessageId(1)));
    }
}
