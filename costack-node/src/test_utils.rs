//! Fixtures shared by the unit tests
//!
//! Every call builds a fresh dictionary with its own leaked storage, so tests running in parallel
//! never share values.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU16, AtomicU32, AtomicU8};

use costack_common::messages::CanMessage;
use costack_common::objects::{DataType, EntryFlags};
use costack_common::traits::{CanChannel, CanSendError, CanState, CanStateError};
use costack_common::AtomicCell;

use crate::config::NetworkConfig;
use crate::object_dict::{DefaultValue, Entry, Object, Storage};
use crate::objects;
use crate::storage::MemoryStorage;
use crate::Network;

pub const TEST_NODE: u8 = 10;
pub const NAME_LEN: usize = 12;
pub const DOMAIN_LEN: usize = 100;
pub const IDENTITY: [u32; 4] = [0xCAFE, 0x1032, 0x0002_0001, 0x0000_0077];

/// A channel which records everything sent and serves queued frames
#[derive(Debug, Default)]
pub struct TestChannel {
    pub sent: Vec<CanMessage>,
    pub rx: VecDeque<CanMessage>,
    pub state: CanState,
    pub bus_on: bool,
    pub bitrate: u32,
}

impl CanChannel for TestChannel {
    fn send(&mut self, msg: CanMessage) -> Result<(), CanSendError> {
        self.sent.push(msg);
        Ok(())
    }

    fn receive(&mut self) -> Option<CanMessage> {
        self.rx.pop_front()
    }

    fn set_bitrate(&mut self, bitrate: u32) {
        self.bitrate = bitrate;
    }

    fn set_filter(&mut self, _ids: &[u16]) {}

    fn bus_on(&mut self) {
        self.bus_on = true;
    }

    fn bus_off(&mut self) {
        self.bus_on = false;
    }

    fn get_state(&mut self) -> Result<CanState, CanStateError> {
        Ok(self.state)
    }
}

fn leak<T>(value: T) -> &'static T {
    Box::leak(Box::new(value))
}

const PDO_RW: EntryFlags = EntryFlags::RW
    .union(EntryFlags::TPDO)
    .union(EntryFlags::RPDO);

/// Build the dictionary used by the unit tests
///
/// | Index  | Contents                                      |
/// |--------|-----------------------------------------------|
/// | 0x2000 | u16, PDO mappable                             |
/// | 0x2001 | ARRAY of 4 u32, PDO mappable                  |
/// | 0x2002 | u64, PDO mappable                             |
/// | 0x2003 | 12 byte string                                |
/// | 0x2004 | 100 byte domain                               |
/// | 0x2005 | constant u8                                   |
/// | 0x2006 | u8, PDO mappable, notifies                    |
/// | 0x2007 | write-only u32                                |
pub fn test_od() -> &'static [Object] {
    let u8s: &'static [AtomicU8; 1] = leak([AtomicU8::new(0)]);
    let u16s: &'static [AtomicU16; 1] = leak([AtomicU16::new(0)]);
    let u32s: &'static [AtomicU32; 4] = leak([const { AtomicU32::new(0) }; 4]);
    let u64s: &'static [AtomicCell<u64>; 1] = leak([AtomicCell::new(0)]);
    let wo: &'static [AtomicU32; 1] = leak([AtomicU32::new(0)]);
    let name: &'static [AtomicU8; NAME_LEN] = leak([const { AtomicU8::new(0) }; NAME_LEN]);
    let domain: &'static [AtomicU8; DOMAIN_LEN] =
        leak([const { AtomicU8::new(0) }; DOMAIN_LEN]);
    let identity: &'static [AtomicU32; 4] = leak(IDENTITY.map(AtomicU32::new));

    let od = vec![
        Object::var(
            0x1000,
            leak([Entry::constant(0, DataType::UInt32, 32, 0x0042_0192)]),
        ),
        objects::ERROR_REGISTER,
        objects::ERROR_HISTORY,
        objects::SYNC_COB_ID,
        objects::SYNC_PERIOD,
        objects::SYNC_WINDOW,
        objects::GUARD_TIME,
        objects::LIFE_TIME_FACTOR,
        objects::STORE_PARAMETERS,
        objects::RESTORE_DEFAULTS,
        objects::EMCY_COB_ID,
        objects::EMCY_INHIBIT,
        objects::HEARTBEAT_CONSUMER,
        objects::HEARTBEAT_PRODUCER,
        Object::record(
            0x1018,
            4,
            leak([
                Entry::constant(0, DataType::UInt8, 8, 4),
                Entry::new(
                    1,
                    EntryFlags::RO.union(EntryFlags::ARRAY),
                    DataType::UInt32,
                    32,
                    Storage::U32(identity),
                ),
            ]),
        ),
        objects::SYNC_OVERFLOW,
        objects::VERIFY_CONFIGURATION,
        objects::EMCY_CONSUMER,
        objects::ERROR_BEHAVIOR,
        objects::rpdo_communication(0),
        objects::rpdo_communication(1),
        objects::rpdo_mapping(0),
        objects::rpdo_mapping(1),
        objects::tpdo_communication(0),
        objects::tpdo_communication(1),
        objects::tpdo_mapping(0),
        objects::tpdo_mapping(1),
        Object::var(
            0x2000,
            leak([Entry::new(0, PDO_RW, DataType::UInt16, 16, Storage::U16(u16s))]),
        ),
        Object::array(
            0x2001,
            4,
            leak([
                Entry::constant(0, DataType::UInt8, 8, 4),
                Entry::new(
                    1,
                    PDO_RW.union(EntryFlags::ARRAY),
                    DataType::UInt32,
                    32,
                    Storage::U32(u32s),
                ),
            ]),
        ),
        Object::var(
            0x2002,
            leak([Entry::new(0, PDO_RW, DataType::UInt64, 64, Storage::U64(u64s))]),
        ),
        Object::var(
            0x2003,
            leak([Entry::new(
                0,
                EntryFlags::RW,
                DataType::VisibleString,
                (NAME_LEN * 8) as u16,
                Storage::Bytes(name),
            )]),
        ),
        Object::var(
            0x2004,
            leak([Entry::new(
                0,
                EntryFlags::RW,
                DataType::Domain,
                (DOMAIN_LEN * 8) as u16,
                Storage::Bytes(domain),
            )]),
        ),
        Object::var(0x2005, leak([Entry::constant(0, DataType::UInt8, 8, 7)])),
        Object::var(
            0x2006,
            leak([Entry::new(
                0,
                PDO_RW.union(EntryFlags::NOTIFY),
                DataType::UInt8,
                8,
                Storage::U8(u8s),
            )]),
        ),
        Object::var(
            0x2007,
            leak([Entry::new(0, EntryFlags::WO, DataType::UInt32, 32, Storage::U32(wo))]),
        ),
    ];
    od.leak()
}

pub const TEST_DEFAULTS: &[DefaultValue] = &[
    DefaultValue {
        index: 0x1800,
        sub: 2,
        value: 0xFE,
    },
    DefaultValue {
        index: 0x2000,
        sub: 0,
        value: 0x1111,
    },
];

pub fn test_config() -> NetworkConfig {
    NetworkConfig {
        defaults: TEST_DEFAULTS,
        ..NetworkConfig::new(TEST_NODE, test_od())
    }
}

pub fn test_network() -> Network<TestChannel> {
    Network::new(TestChannel::default(), test_config()).unwrap()
}

pub fn network_with_storage() -> (Network<TestChannel>, &'static MemoryStorage) {
    let storage: &'static MemoryStorage = leak(MemoryStorage::new());
    let config = NetworkConfig {
        storage: Some(storage),
        ..test_config()
    };
    (Network::new(TestChannel::default(), config).unwrap(), storage)
}
