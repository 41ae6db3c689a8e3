//! Dictionary of the example device used by the integration tests
//!
//! | Index  | Contents                            |
//! |--------|-------------------------------------|
//! | 0x2000 | u32, PDO mappable                   |
//! | 0x2001 | u16, PDO mappable                   |
//! | 0x2100 | 32 byte visible string              |
//! | 0x2200 | 256 byte domain                     |
//!
//! Each call builds a fresh dictionary, so several simulated nodes never share values.
use std::sync::atomic::{AtomicU16, AtomicU32, AtomicU8};

use costack_common::objects::{DataType, EntryFlags};
use costack_node::object_dict::{Entry, Object, Storage};
use costack_node::objects;

pub const VENDOR_ID: u32 = 1234;
pub const PRODUCT_CODE: u32 = 12000;
pub const REVISION: u32 = 1;
pub const DEVICE_TYPE: u64 = 0x0001_0191;
pub const NAME_LEN: usize = 32;
pub const DOMAIN_LEN: usize = 256;

fn leak<T>(value: T) -> &'static T {
    Box::leak(Box::new(value))
}

const PDO_RW: EntryFlags = EntryFlags::RW
    .union(EntryFlags::TPDO)
    .union(EntryFlags::RPDO);

pub fn object_dict1(serial: u32) -> &'static [Object] {
    let identity: &'static [AtomicU32; 4] =
        leak([VENDOR_ID, PRODUCT_CODE, REVISION, serial].map(AtomicU32::new));
    let value32: &'static [AtomicU32; 1] = leak([AtomicU32::new(0)]);
    let value16: &'static [AtomicU16; 1] = leak([AtomicU16::new(0)]);
    let name: &'static [AtomicU8; NAME_LEN] = leak([const { AtomicU8::new(0) }; NAME_LEN]);
    let domain: &'static [AtomicU8; DOMAIN_LEN] = leak([const { AtomicU8::new(0) }; DOMAIN_LEN]);

    let od = vec![
        Object::var(
            0x1000,
            leak([Entry::constant(0, DataType::UInt32, 32, DEVICE_TYPE)]),
        ),
        objects::ERROR_REGISTER,
        objects::ERROR_HISTORY,
        objects::SYNC_COB_ID,
        objects::SYNC_PERIOD,
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
        objects::rpdo_mapping(0),
        objects::tpdo_communication(0),
        objects::tpdo_mapping(0),
        Object::var(
            0x2000,
            leak([Entry::new(0, PDO_RW, DataType::UInt32, 32, Storage::U32(value32))]),
        ),
        Object::var(
            0x2001,
            leak([Entry::new(0, PDO_RW, DataType::UInt16, 16, Storage::U16(value16))]),
        ),
        Object::var(
            0x2100,
            leak([Entry::new(
                0,
                EntryFlags::RW,
                DataType::VisibleString,
                (NAME_LEN * 8) as u16,
                Storage::Bytes(name),
            )]),
        ),
        Object::var(
            0x2200,
            leak([Entry::new(
                0,
                EntryFlags::RW,
                DataType::Domain,
                (DOMAIN_LEN * 8) as u16,
                Storage::Bytes(domain),
            )]),
        ),
    ];
    od.leak()
}
