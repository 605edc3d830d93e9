//! Endpoint: a pair of bounded message rings plus a lend registry.
//!
//! The send/receive rings are single-producer single-consumer per
//! direction. The teacher's `no_std` sibling of this type uses an unsafe
//! atomic-indexed ring; here, a `Mutex`-guarded bounded `VecDeque` is used
//! instead — a legal substitute per the scheduler design notes, since the
//! only externally observable contract is in-order, bounded delivery.

use std::collections::VecDeque;
use std::sync::Mutex;

use crate::ids::EndpointId;
use crate::ipc::lend::LendRegistry;
use crate::ipc::message::Message;

#[derive(Debug, Default, Clone, Copy)]
pub struct EndpointStats {
    pub sent: u64,
    pub received: u64,
    pub send_full_rejections: u64,
    pub invalidations_received: u64,
}

struct Ring {
    queue: VecDeque<Message>,
    capacity: usize,
}

impl Ring {
    fn new(capacity: usize) -> Self {
        Self { queue: VecDeque::with_capacity(capacity), capacity }
    }

    fn try_push(&mut self, msg: Message) -> Result<(), Message> {
        if self.queue.len() >= self.capacity {
            return Err(msg);
        }
        self.queue.push_back(msg);
        Ok(())
    }

    fn try_pop(&mut self) -> Option<Message> {
        self.queue.pop_front()
    }
}

pub struct Endpoint {
    pub id: EndpointId,
    send: Mutex<Ring>,
    recv: Mutex<Ring>,
    pub lend_registry: Mutex<LendRegistry>,
    pub stats: Mutex<EndpointStats>,
    connected: std::sync::atomic::AtomicBool,
}

impl Endpoint {
    #[must_use]
    pub fn new(id: EndpointId, ring_capacity: usize) -> Self {
        Self {
            id,
            send: Mutex::new(Ring::new(ring_capacity)),
            recv: Mutex::new(Ring::new(ring_capacity)),
            lend_registry: Mutex::new(LendRegistry::new()),
            stats: Mutex::new(EndpointStats::default()),
            connected: std::sync::atomic::AtomicBool::new(true),
        }
    }

    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.connected.load(std::sync::atomic::Ordering::Acquire)
    }

    pub fn mark_disconnected(&self) {
        self.connected.store(false, std::sync::atomic::Ordering::Release);
    }

    /// Whether the send queue has room for at least one more message.
    /// Callers that must reserve state alongside the enqueue (lend registry
    /// entries) check this first so the reservation and the enqueue can't
    /// diverge.
    #[must_use]
    pub fn send_has_room(&self) -> bool {
        let send = self.send.lock().unwrap();
        send.queue.len() < send.capacity
    }

    /// Enqueue onto this endpoint's send queue. Returns `Err(message)` with
    /// no mutation on a full queue — the message is never dropped.
    pub fn try_send(&self, msg: Message) -> Result<(), Message> {
        let mut send = self.send.lock().unwrap();
        match send.try_push(msg) {
            Ok(()) => {
                self.stats.lock().unwrap().sent += 1;
                Ok(())
            }
            Err(msg) => {
                self.stats.lock().unwrap().send_full_rejections += 1;
                Err(msg)
            }
        }
    }

    /// Dequeue from this endpoint's receive queue.
    pub fn try_receive(&self) -> Option<Message> {
        let msg = self.recv.lock().unwrap().try_pop();
        if msg.is_some() {
            self.stats.lock().unwrap().received += 1;
        }
        msg
    }

    /// Scan up to `max_scan` queued messages for one matching `predicate`,
    /// leaving non-matching messages in order at the front of the queue.
    pub fn scan_receive(&self, max_scan: usize, predicate: impl Fn(&Message) -> bool) -> Option<Message> {
        let mut recv = self.recv.lock().unwrap();
        let scan_len = recv.queue.len().min(max_scan);
        let mut deferred = VecDeque::with_capacity(scan_len);
        let mut found = None;
        for _ in 0..scan_len {
            let Some(msg) = recv.queue.pop_front() else { break };
            if found.is_none() && predicate(&msg) {
                found = Some(msg);
            } else {
                deferred.push_back(msg);
            }
        }
        while let Some(m) = deferred.pop_back() {
            recv.queue.push_front(m);
        }
        if found.is_some() {
            drop(recv);
            self.stats.lock().unwrap().received += 1;
        }
        found
    }

    /// Internal: move from the tail of our own send queue; used by
    /// `Channel::transfer`.
    fn pop_send(&self) -> Option<Message> {
        self.send.lock().unwrap().try_pop()
    }

    fn push_recv(&self, msg: Message) -> Result<(), Message> {
        self.recv.lock().unwrap().try_push(msg)
    }

    pub fn record_invalidation(&self) {
        self.stats.lock().unwrap().invalidations_received += 1;
    }

    /// Drain our send queue for the transfer sweep, one message at a time.
    pub(crate) fn drain_one_send(&self) -> Option<Message> {
        self.pop_send()
    }

    pub(crate) fn deliver(&self, msg: Message) -> Result<(), Message> {
        self.push_recv(msg)
    }
}
