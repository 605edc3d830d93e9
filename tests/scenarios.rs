//! End-to-end scenario walkthroughs, one per numbered case in the testable
//! properties: lend with priority inheritance, revocation invalidating
//! outstanding capabilities, remote fetch timeout, snapshot/restore,
//! concurrent-write detection via vector clocks, and lend-expiry waking the
//! lender's rights back up.

use seraph_core::cap::{self, Capability, GenerationTable, Permissions};
use seraph_core::config::KernelConfig;
use seraph_core::context::KernelContext;
use seraph_core::dsm::{InMemoryBlockDevice, PersistenceBridge, PAGE_SIZE};
use seraph_core::ids::{Chronon, MessageId, NodeId, SovereignId};
use seraph_core::ipc::{full_access_cap, LendStatus, Message, MessageType, SendOutcome};
use seraph_core::sched::AffinityMask;
use seraph_core::void::VoidReason;

#[test]
fn scenario_1_lend_with_priority_inheritance() {
    let ctx = KernelContext::single_node(NodeId(1)).unwrap();
    let hi = ctx.scheduler.spawn(SovereignId(1), 5, AffinityMask::all(1));
    let lo = ctx.scheduler.spawn(SovereignId(1), 2, AffinityMask::all(1));
    let (chan, parent, child) = ctx.ipc.create_channel(hi, lo);

    let cap = full_access_cap(100, 16, 0);
    let msg = Message::new(MessageId(1), hi, Chronon(0), MessageType::Lend, &[cap]);
    ctx.ipc.send(parent, msg, Some(Chronon(50)), &ctx.void_registry, Chronon(0));
    ctx.ipc.transfer(chan, &ctx.scheduler, &ctx.void_registry, Chronon(0));

    assert_eq!(ctx.scheduler.effective_priority(lo), Some(5));

    let ret = Message::new(MessageId(1), lo, Chronon(1), MessageType::Return, &[]);
    ctx.ipc.send(child, ret, None, &ctx.void_registry, Chronon(1));
    ctx.ipc.transfer(chan, &ctx.scheduler, &ctx.void_registry, Chronon(1));

    assert_eq!(ctx.scheduler.effective_priority(lo), Some(2));
}

#[test]
fn scenario_2_revocation_invalidates_outstanding_caps() {
    let ctx = KernelContext::single_node(NodeId(1)).unwrap();
    let objects = GenerationTable::new();
    let x = 42u64;
    objects.register(x);

    let c1 = Capability::new(x, 16, 0, Permissions::READ);
    objects.revoke(x);

    let outcome = cap::access(&ctx.void_registry, &objects, &c1, 0, Permissions::READ, 0);
    let (reason, void_id) = match outcome {
        cap::CheckOutcome::Void { reason, void_id } => (reason, void_id),
        cap::CheckOutcome::Ok => panic!("access on a revoked object must fail"),
    };
    assert_eq!(reason, VoidReason::Generation);
    let record = ctx.void_registry.get(void_id).unwrap();
    assert_eq!(record.context_entity, x);
}

#[test]
fn scenario_3_remote_fetch_timeout() {
    let ctx = KernelContext::new(KernelConfig::new(), &[NodeId(1), NodeId(2)]).unwrap();
    let strand = ctx.scheduler.spawn(SovereignId(1), 4, AffinityMask::all(1));
    ctx.scheduler.dispatch(0);

    ctx.dsm.set_node_online(NodeId(2), false);
    let addr = seraph_core::dsm::DsmAddress::new(seraph_core::dsm::Region::Dsm, NodeId(2), false, 0);

    let result = ctx.dsm.read_page(NodeId(1), addr, strand, &ctx.scheduler, &ctx.void_registry, Chronon(100));
    let void_id = result.expect_err("offline owner must not answer");
    let record = ctx.void_registry.get(void_id).unwrap();
    assert_eq!(record.reason, VoidReason::Timeout);
    assert!(!record.predecessor_id.is_valid());
}

#[test]
fn scenario_4_persistent_snapshot_restore() {
    let bridge = PersistenceBridge::new(NodeId(1), Box::new(InMemoryBlockDevice::new(16)));
    let registry = seraph_core::void::VoidRegistry::new(64);

    let page_a = bridge.alloc(1, &registry, Chronon(0)).unwrap();
    let page_b = bridge.alloc(1, &registry, Chronon(0)).unwrap();

    let a_bytes = vec![b'A'; PAGE_SIZE];
    let b_bytes = vec![b'B'; PAGE_SIZE];
    bridge.write_back(page_a, &a_bytes, &registry, Chronon(0)).unwrap();
    bridge.write_back(page_b, &b_bytes, &registry, Chronon(0)).unwrap();

    let snapshot = bridge.create_snapshot(0, u32::MAX);

    // Post-snapshot writes copy-on-write to fresh LBAs, leaving the frozen
    // run's bytes untouched for restore() to hand back.
    let c_bytes = vec![b'C'; PAGE_SIZE];
    bridge.write_back(page_a, &c_bytes, &registry, Chronon(0)).unwrap();
    bridge.write_back(page_b, &c_bytes, &registry, Chronon(0)).unwrap();

    bridge.restore(snapshot, &registry, Chronon(0)).unwrap();

    let mut read_a = vec![0u8; PAGE_SIZE];
    let mut read_b = vec![0u8; PAGE_SIZE];
    bridge.read_local(page_a, &mut read_a, &registry, Chronon(0)).unwrap();
    bridge.read_local(page_b, &mut read_b, &registry, Chronon(0)).unwrap();
    assert_eq!(read_a, a_bytes);
    assert_eq!(read_b, b_bytes);
}

#[test]
fn scenario_5_concurrent_writes_detected() {
    let ctx = KernelContext::new(KernelConfig::new(), &[NodeId(1), NodeId(2), NodeId(3)]).unwrap();
    let strand = ctx.scheduler.spawn(SovereignId(1), 4, AffinityMask::all(1));
    ctx.scheduler.dispatch(0);

    let page_a = seraph_core::dsm::DsmAddress::new(seraph_core::dsm::Region::Dsm, NodeId(1), false, 0);
    let page_b = seraph_core::dsm::DsmAddress::new(seraph_core::dsm::Region::Dsm, NodeId(2), false, 0);

    ctx.dsm
        .write_page(NodeId(1), page_a, &[1u8; 8], strand, &ctx.scheduler, &ctx.void_registry, Chronon(100))
        .unwrap();
    ctx.dsm
        .write_page(NodeId(2), page_b, &[2u8; 8], strand, &ctx.scheduler, &ctx.void_registry, Chronon(100))
        .unwrap();

    assert!(ctx.dsm.is_concurrent(NodeId(1), NodeId(2)));
    assert!(!ctx.dsm.happened_before(NodeId(1), NodeId(2)));
}

#[test]
fn scenario_6_lend_expiry_wakes_lenders_rights() {
    let ctx = KernelContext::single_node(NodeId(1)).unwrap();
    let e1 = ctx.scheduler.spawn(SovereignId(1), 4, AffinityMask::all(1));
    let e2 = ctx.scheduler.spawn(SovereignId(1), 2, AffinityMask::all(1));
    let (chan, parent, _child) = ctx.ipc.create_channel(e1, e2);

    let cap = full_access_cap(200, 16, 0);
    let msg = Message::new(MessageId(7), e1, Chronon(0), MessageType::Lend, &[cap]);
    let outcome = ctx.ipc.send(parent, msg, Some(Chronon(50)), &ctx.void_registry, Chronon(0));
    assert_eq!(outcome, SendOutcome::Sent);
    ctx.ipc.transfer(chan, &ctx.scheduler, &ctx.void_registry, Chronon(0));

    let expired = ctx.ipc.process_lends(parent, &ctx.void_registry, Chronon(51));
    assert_eq!(expired.len(), 1);
    assert_eq!(ctx.ipc.lend_status(parent, MessageId(7)), Some(LendStatus::Expired));
}
