//! Fixed-layout IPC message: one cache-line-multiple, up to 7 inline
//! capabilities, authority-transferring rather than byte-transferring.

use crate::cap::Capability;
use crate::ids::{Chronon, MessageId, StrandId, VoidId};

pub const MAX_INLINE_CAPS: usize = 7;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageType {
    Request,
    Response,
    Notification,
    Grant,
    Lend,
    Return,
    Derive,
    Copy,
    Void,
}

bitflags::bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct MessageFlags: u8 {
        const URGENT = 0b0000_0001;
        const NO_REPLY = 0b0000_0010;
    }
}

/// Fixed message header.
#[derive(Debug, Clone, Copy)]
pub struct MessageHeader {
    pub message_id: MessageId,
    pub sender_id: StrandId,
    pub send_chronon: Chronon,
    pub ty: MessageType,
    pub cap_count: u8,
    pub flags: MessageFlags,
    pub lend_timeout: u32,
    pub void_id: VoidId,
    pub void_cap_mask: u8,
}

/// A message: fixed header plus up to 7 inline capabilities. Larger
/// payloads are out of scope — this is authority transfer, not bytes.
#[derive(Debug, Clone)]
pub struct Message {
    pub header: MessageHeader,
    pub caps: heapless::Vec<Capability, MAX_INLINE_CAPS>,
}

impl Message {
    #[must_use]
    pub fn new(
        message_id: MessageId,
        sender_id: StrandId,
        send_chronon: Chronon,
        ty: MessageType,
        caps: &[Capability],
    ) -> Self {
        let mut vec = heapless::Vec::new();
        for &c in caps.iter().take(MAX_INLINE_CAPS) {
            let _ = vec.push(c);
        }
        let mut void_cap_mask = 0u8;
        for (i, c) in vec.iter().enumerate() {
            if c.is_void() {
                void_cap_mask |= 1 << i;
            }
        }
        Self {
            header: MessageHeader {
                message_id,
                sender_id,
                send_chronon,
                ty,
                cap_count: vec.len() as u8,
                flags: MessageFlags::empty(),
                lend_timeout: 0,
                void_id: VoidId::INVALID,
                void_cap_mask,
            },
            caps: vec,
        }
    }

    /// A VOID message: `void_id` records the causality node, `void_cap_mask`
    /// marks which inline capabilities (if any) were themselves void.
    #[must_use]
    pub fn void(
        message_id: MessageId,
        sender_id: StrandId,
        send_chronon: Chronon,
        void_id: VoidId,
    ) -> Self {
        Self {
            header: MessageHeader {
                message_id,
                sender_id,
                send_chronon,
                ty: MessageType::Void,
                cap_count: 0,
                flags: MessageFlags::empty(),
                lend_timeout: 0,
                void_id,
                void_cap_mask: 0,
            },
            caps: heapless::Vec::new(),
        }
    }

    #[must_use]
    pub const fn is_void_propagation(&self) -> bool {
        self.header.void_id.is_valid()
    }
}
