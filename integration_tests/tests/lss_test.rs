use costack_common::lss::{LssMatch, LssRequest, LssResponse};
use costack_common::messages::{CanMessage, LSS_REQ_ID, LSS_RESP_ID};
use costack_node::storage::{MemoryStorage, Store};
use costack_node::State;
use integration_tests::object_dict1::{PRODUCT_CODE, REVISION, VENDOR_ID};

mod utils;
use utils::Harness;

const MASTER: usize = 0;
const BITRATE: u32 = 1_000_000;

fn leak_storage() -> &'static MemoryStorage {
    Box::leak(Box::new(MemoryStorage::new()))
}

/// Send an LSS request from the master and collect the responses
fn request(harness: &mut Harness, req: LssRequest) -> Vec<LssResponse> {
    harness.bus.clear_history();
    harness.inject(CanMessage::new(LSS_REQ_ID, &req.to_bytes()));
    harness
        .bus
        .history()
        .iter()
        .filter(|msg| msg.id() == LSS_RESP_ID)
        .map(|msg| LssResponse::try_from(msg.data()).unwrap())
        .collect()
}

fn select(harness: &mut Harness, serial: u32) -> Vec<LssResponse> {
    let steps = [
        (LssMatch::VendorId, VENDOR_ID),
        (LssMatch::ProductCode, PRODUCT_CODE),
        (LssMatch::RevisionLow, REVISION),
        (LssMatch::SerialLow, serial),
    ];
    let mut responses = Vec::new();
    for (field, value) in steps {
        responses = request(harness, LssRequest::SwitchSelective { field, value });
    }
    responses
}

#[test]
fn test_assign_node_id() {
    let mut harness = Harness::new(&[1]);
    let storage = leak_storage();
    let first = harness.add_node(0xFF, 2000, storage);
    let second = harness.add_node(0xFF, 2001, leak_storage());
    harness.start();

    // Unconfigured nodes wait without sending a boot-up
    assert_eq!(State::InitComm, harness.nodes[first].nmt_state());
    assert_eq!(1, harness.frames_with_id(0x700 + 1).len());
    assert_eq!(
        vec![LssResponse::IdentifyNonConfiguredSlave; 2],
        request(&mut harness, LssRequest::IdentifyNonConfigured)
    );

    assert_eq!(vec![LssResponse::SwitchStateResponse], select(&mut harness, 2000));
    assert_eq!(
        vec![LssResponse::ConfigureNodeId { error: 0 }],
        request(&mut harness, LssRequest::ConfigureNodeId { node_id: 20 })
    );
    assert_eq!(
        vec![LssResponse::StoreConfiguration { error: 0 }],
        request(&mut harness, LssRequest::StoreConfiguration)
    );
    let mut stored = vec![20];
    stored.extend_from_slice(&BITRATE.to_le_bytes());
    assert_eq!(Some(stored), storage.get(Store::Lss));

    // Leaving configuration state brings the node up with its new ID
    request(&mut harness, LssRequest::SwitchModeGlobal { mode: 0 });
    assert_eq!(20, harness.nodes[first].node_id());
    assert_eq!(State::PreOp, harness.nodes[first].nmt_state());
    assert_eq!(1, harness.frames_with_id(0x700 + 20).len());

    assert_eq!(0xFF, harness.nodes[second].node_id());
    assert_eq!(State::InitComm, harness.nodes[second].nmt_state());

    let serial = harness.sdo_read(MASTER, 20, 0x1018, 4).unwrap();
    assert_eq!(&2000u32.to_le_bytes(), serial.as_slice());
}

#[test]
fn test_stored_node_id_used_at_boot() {
    let mut harness = Harness::new(&[1]);
    let storage = leak_storage();
    let mut stored = vec![33];
    stored.extend_from_slice(&BITRATE.to_le_bytes());
    storage.set(Store::Lss, stored);
    let node = harness.add_node(0xFF, 3000, storage);
    harness.start();

    assert_eq!(33, harness.nodes[node].node_id());
    assert_eq!(State::PreOp, harness.nodes[node].nmt_state());
    assert_eq!(Some(33), harness.nodes[MASTER].node_next(2));
}

#[test]
fn test_inquire_and_store_without_backend() {
    let mut harness = Harness::new(&[1, 7]);
    harness.start();

    // Only a selected node answers configuration requests
    assert!(request(&mut harness, LssRequest::Inquire { field: 4 }).is_empty());
    request(&mut harness, LssRequest::SwitchModeGlobal { mode: 1 });
    assert_eq!(
        vec![
            LssResponse::Inquire {
                field: 4,
                value: 1
            },
            LssResponse::Inquire {
                field: 4,
                value: 7
            },
        ],
        request(&mut harness, LssRequest::Inquire { field: 4 })
    );
    assert_eq!(
        vec![LssResponse::StoreConfiguration { error: 1 }; 2],
        request(&mut harness, LssRequest::StoreConfiguration)
    );
}
