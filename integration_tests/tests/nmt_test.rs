use assertables::assert_contains;
use costack_common::constants::{emcy_codes, error_register};
use costack_common::messages::{EmcyMessage, NmtCommandCmd};
use costack_node::State;

mod utils;
use utils::Harness;

const MASTER: usize = 0;

#[test]
fn test_bootup_discovery() {
    let mut harness = Harness::new(&[1, 5, 9]);
    harness.start();

    for id in [1u32, 5, 9] {
        let bootups = harness.frames_with_id(0x700 + id);
        assert_eq!(1, bootups.len());
        assert_eq!(&[0], bootups[0].data());
    }

    // The master booted first, so it saw everyone else
    let master = &harness.nodes[MASTER];
    assert_eq!(Some(5), master.node_next(0));
    assert_eq!(Some(9), master.node_next(6));
    assert_eq!(None, master.node_next(10));
    assert_eq!(State::PreOp, master.nmt_state());
}

#[test]
fn test_remote_commands() {
    let mut harness = Harness::new(&[1, 5, 9]);
    harness.start();

    harness.nodes[MASTER].nmt(NmtCommandCmd::Start, 5);
    harness.settle();
    assert_eq!(State::PreOp, harness.nodes[0].nmt_state());
    assert_eq!(State::Op, harness.nodes[1].nmt_state());
    assert_eq!(State::PreOp, harness.nodes[2].nmt_state());

    // Node 0 addresses everyone, including the sender
    harness.nodes[MASTER].nmt(NmtCommandCmd::Stop, 0);
    harness.settle();
    for node in &harness.nodes {
        assert_eq!(State::Stop, node.nmt_state());
    }

    harness.nodes[MASTER].nmt(NmtCommandCmd::EnterPreOp, 9);
    harness.settle();
    assert_eq!(State::PreOp, harness.nodes[2].nmt_state());
}

#[test]
fn test_reset_communication_reboots() {
    let mut harness = Harness::new(&[1, 5]);
    harness.start();
    harness.bus.clear_history();

    harness.nodes[1].write(0x1017, 0, 100).unwrap();
    harness.nodes[MASTER].nmt(NmtCommandCmd::ResetComm, 5);
    harness.settle();

    assert_eq!(1, harness.frames_with_id(0x705).len());
    assert_eq!(State::PreOp, harness.nodes[1].nmt_state());
    // Communication objects are back at their defaults
    assert_eq!(0, harness.nodes[1].read(0x1017, 0).unwrap());
}

#[test]
fn test_heartbeat_consumer_expiry() {
    let mut harness = Harness::new(&[1, 5]);
    harness.start();

    harness.nodes[1].write(0x1017, 0, 10).unwrap();
    harness.nodes[MASTER]
        .write(0x1016, 1, (5 << 16) | 50)
        .unwrap();

    harness.advance(40_000);
    let heartbeats = harness.frames_with_id(0x705);
    // Boot-up plus one every 10 ms
    assert!(heartbeats.len() >= 4);
    assert_eq!(&[0x7F], heartbeats.last().unwrap().data());
    assert_eq!(0, harness.nodes[MASTER].error_get());

    // Node 5 falls silent
    harness.nodes[1].write(0x1017, 0, 0).unwrap();
    harness.bus.clear_history();
    harness.advance(100_000);

    let master = &harness.nodes[MASTER];
    assert_eq!(None, master.node_next(5));
    assert_eq!(
        error_register::GENERIC | error_register::COMMUNICATION,
        master.error_get()
    );
    let codes: Vec<u16> = harness
        .frames_with_id(0x81)
        .iter()
        .filter_map(|msg| EmcyMessage::try_from(msg.data()).ok())
        .map(|emcy| emcy.code)
        .collect();
    assert_contains!(codes, &emcy_codes::HEARTBEAT);
}
