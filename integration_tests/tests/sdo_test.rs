use assertables::assert_starts_with;
use costack_common::sdo::AbortCode;
use costack_node::SdoClientError;
use integration_tests::object_dict1::{DEVICE_TYPE, DOMAIN_LEN, NAME_LEN, PRODUCT_CODE};

mod utils;
use utils::Harness;

const CLIENT: usize = 0;
const SERVER_ID: u8 = 5;

fn setup() -> Harness {
    let mut harness = Harness::new(&[1, SERVER_ID]);
    harness.start();
    harness
}

#[test]
fn test_expedited_read() {
    let mut harness = setup();

    let data = harness.sdo_read(CLIENT, SERVER_ID, 0x1000, 0).unwrap();
    assert_eq!(&(DEVICE_TYPE as u32).to_le_bytes(), data.as_slice());

    let data = harness.sdo_read(CLIENT, SERVER_ID, 0x1018, 2).unwrap();
    assert_eq!(&PRODUCT_CODE.to_le_bytes(), data.as_slice());
}

#[test]
fn test_expedited_write() {
    let mut harness = setup();

    harness
        .sdo_write(CLIENT, SERVER_ID, 0x2000, 0, &0x1234_5678u32.to_le_bytes())
        .unwrap();
    assert_eq!(0x1234_5678, harness.nodes[1].read(0x2000, 0).unwrap());

    // Scalars must be written with their exact size
    let result = harness.sdo_write(CLIENT, SERVER_ID, 0x2001, 0, &[1, 2, 3, 4]);
    assert_eq!(
        Err(SdoClientError::ServerAbort {
            code: AbortCode::Length.raw()
        }),
        result
    );
}

#[test]
fn test_segmented_domain_roundtrip() {
    let mut harness = setup();

    let payload: Vec<u8> = (0..DOMAIN_LEN).map(|i| (i * 7) as u8).collect();
    harness
        .sdo_write(CLIENT, SERVER_ID, 0x2200, 0, &payload)
        .unwrap();

    let data = harness.sdo_read(CLIENT, SERVER_ID, 0x2200, 0).unwrap();
    assert_eq!(payload.as_slice(), data.as_slice());
}

#[test]
fn test_short_string_is_terminated() {
    let mut harness = setup();

    harness
        .sdo_write(CLIENT, SERVER_ID, 0x2100, 0, &[b'x'; NAME_LEN])
        .unwrap();
    harness
        .sdo_write(CLIENT, SERVER_ID, 0x2100, 0, b"costack node")
        .unwrap();

    let data = harness.sdo_read(CLIENT, SERVER_ID, 0x2100, 0).unwrap();
    assert_starts_with!(data.as_slice(), b"costack node\0".as_slice());
}

#[test]
fn test_server_aborts() {
    let mut harness = setup();

    assert_eq!(
        Err(SdoClientError::ServerAbort {
            code: AbortCode::BadIndex.raw()
        }),
        harness.sdo_read(CLIENT, SERVER_ID, 0x3000, 0)
    );
    assert_eq!(
        Err(SdoClientError::ServerAbort {
            code: AbortCode::AccessRo.raw()
        }),
        harness.sdo_write(CLIENT, SERVER_ID, 0x1000, 0, &[0, 0, 0, 0])
    );

    // The client is free for a new transfer after an abort
    assert!(harness.sdo_read(CLIENT, SERVER_ID, 0x1000, 0).is_ok());
}

#[test]
fn test_missing_server_times_out() {
    let mut harness = setup();

    let start = harness.now;
    assert_eq!(
        Err(SdoClientError::Timeout),
        harness.sdo_read(CLIENT, 42, 0x1000, 0)
    );
    assert!(harness.now - start >= 100_000);
}

#[test]
fn test_second_transfer_is_busy() {
    let mut harness = setup();

    harness.nodes[CLIENT].sdo_read(SERVER_ID, 0x1000, 0).unwrap();
    assert_eq!(
        Err(SdoClientError::Busy),
        harness.nodes[CLIENT].sdo_read(SERVER_ID, 0x1018, 1)
    );
    assert!(harness.sdo_result(CLIENT).is_ok());
}
