//! Ready-made communication objects
//!
//! Each constant is a complete [`Object`] bound to the stack's built-in handler, so an application
//! dictionary only declares its own objects next to these:
//!
//! ```rust
//! use costack_node::common::objects::DataType;
//! use costack_node::object_dict::{Entry, Object};
//! use costack_node::objects;
//!
//! static OD: [Object; 5] = [
//!     Object::var(0x1000, &[Entry::constant(0, DataType::UInt32, 32, 0x0042_0192)]),
//!     objects::ERROR_REGISTER,
//!     objects::HEARTBEAT_PRODUCER,
//!     objects::tpdo_communication(0),
//!     objects::tpdo_mapping(0),
//! ];
//! ```
//!
//! The device type (0x1000) and identity (0x1018) objects hold application values and are
//! declared by the application.

use costack_common::constants::object_ids;
use costack_common::objects::{DataType, EntryFlags};

use crate::config::{MAX_EMCY_COBIDS, MAX_ERRORS, MAX_HEARTBEATS, MAX_PDO_ENTRIES};
use crate::object_dict::{Access, Entry, Object, Storage};

const RW: EntryFlags = EntryFlags::RW;
const RW_ARRAY: EntryFlags = EntryFlags::RW.union(EntryFlags::ARRAY);
const RO_ARRAY: EntryFlags = EntryFlags::RO.union(EntryFlags::ARRAY);
// Command objects are never persisted
const COMMAND_ARRAY: EntryFlags = RW_ARRAY.union(EntryFlags::TRANSIENT);

const fn u8_entry(sub: u8, flags: EntryFlags) -> Entry {
    Entry::new(sub, flags, DataType::UInt8, 8, Storage::None)
}

const fn u16_entry(sub: u8, flags: EntryFlags) -> Entry {
    Entry::new(sub, flags, DataType::UInt16, 16, Storage::None)
}

const fn u32_entry(sub: u8, flags: EntryFlags) -> Entry {
    Entry::new(sub, flags, DataType::UInt32, 32, Storage::None)
}

const fn count(value: usize) -> Entry {
    Entry::constant(0, DataType::UInt8, 8, value as u64)
}

/// 0x1001 error register
pub const ERROR_REGISTER: Object = Object::var(
    object_ids::ERROR_REGISTER,
    &[u8_entry(0, EntryFlags::RO)],
)
.with_access(Access::ErrorRegister);

/// 0x1003 pre-defined error field
pub const ERROR_HISTORY: Object = Object::array(
    object_ids::ERROR_HISTORY,
    MAX_ERRORS as u8,
    &[
        u8_entry(0, RW.union(EntryFlags::TRANSIENT)),
        u32_entry(1, RO_ARRAY),
    ],
)
.with_access(Access::ErrorHistory);

/// 0x1005 COB-ID SYNC
pub const SYNC_COB_ID: Object =
    Object::var(object_ids::SYNC_COB_ID, &[u32_entry(0, RW)]).with_access(Access::SyncCobId);

/// 0x1006 communication cycle period
pub const SYNC_PERIOD: Object =
    Object::var(object_ids::SYNC_PERIOD, &[u32_entry(0, RW)]).with_access(Access::SyncPeriod);

/// 0x1007 synchronous window length
pub const SYNC_WINDOW: Object =
    Object::var(object_ids::SYNC_WINDOW, &[u32_entry(0, RW)]).with_access(Access::SyncWindow);

/// 0x100C guard time
pub const GUARD_TIME: Object =
    Object::var(object_ids::GUARD_TIME, &[u16_entry(0, RW)]).with_access(Access::GuardTime);

/// 0x100D life time factor
pub const LIFE_TIME_FACTOR: Object = Object::var(
    object_ids::LIFE_TIME_FACTOR,
    &[u8_entry(0, RW)],
)
.with_access(Access::LifeTimeFactor);

/// 0x1010 store parameters
pub const STORE_PARAMETERS: Object = Object::array(
    object_ids::SAVE_OBJECTS,
    4,
    &[count(4), u32_entry(1, COMMAND_ARRAY)],
)
.with_access(Access::StoreParameters);

/// 0x1011 restore default parameters
pub const RESTORE_DEFAULTS: Object = Object::array(
    object_ids::RESTORE_DEFAULTS,
    4,
    &[count(4), u32_entry(1, COMMAND_ARRAY)],
)
.with_access(Access::RestoreDefaults);

/// 0x1014 COB-ID EMCY
pub const EMCY_COB_ID: Object =
    Object::var(object_ids::EMCY_COB_ID, &[u32_entry(0, RW)]).with_access(Access::EmcyCobId);

/// 0x1015 inhibit time EMCY, in multiples of 100 µs
pub const EMCY_INHIBIT: Object =
    Object::var(object_ids::EMCY_INHIBIT, &[u16_entry(0, RW)]).with_access(Access::EmcyInhibit);

/// 0x1016 consumer heartbeat time
pub const HEARTBEAT_CONSUMER: Object = Object::array(
    object_ids::HEARTBEAT_CONSUMER_TIME,
    MAX_HEARTBEATS as u8,
    &[count(MAX_HEARTBEATS), u32_entry(1, RW_ARRAY)],
)
.with_access(Access::HeartbeatConsumer);

/// 0x1017 producer heartbeat time
pub const HEARTBEAT_PRODUCER: Object = Object::var(
    object_ids::HEARTBEAT_PRODUCER_TIME,
    &[u16_entry(0, RW)],
)
.with_access(Access::HeartbeatProducer);

/// 0x1019 synchronous counter overflow value
pub const SYNC_OVERFLOW: Object =
    Object::var(object_ids::SYNC_OVERFLOW, &[u8_entry(0, RW)]).with_access(Access::SyncOverflow);

/// 0x1020 verify configuration
pub const VERIFY_CONFIGURATION: Object = Object::array(
    object_ids::VERIFY_CONFIGURATION,
    2,
    &[count(2), u32_entry(1, RW_ARRAY)],
)
.with_access(Access::VerifyConfiguration);

/// 0x1028 emergency consumer object
pub const EMCY_CONSUMER: Object = Object::array(
    object_ids::EMCY_CONSUMER,
    MAX_EMCY_COBIDS as u8,
    &[count(MAX_EMCY_COBIDS), u32_entry(1, RW_ARRAY)],
)
.with_access(Access::EmcyConsumer);

/// 0x1029 error behaviour
pub const ERROR_BEHAVIOR: Object = Object::array(
    object_ids::ERROR_BEHAVIOR,
    1,
    &[count(1), u8_entry(1, RW_ARRAY)],
)
.with_access(Access::ErrorBehavior);

const RPDO_COMMUNICATION_ENTRIES: &[Entry] = &[
    count(5),
    u32_entry(1, RW),
    u8_entry(2, RW),
    u16_entry(3, RW),
    u16_entry(5, RW),
];

const TPDO_COMMUNICATION_ENTRIES: &[Entry] = &[
    count(6),
    u32_entry(1, RW),
    u8_entry(2, RW),
    u16_entry(3, RW),
    u16_entry(5, RW),
    u8_entry(6, RW),
];

const PDO_MAPPING_ENTRIES: &[Entry] = &[u8_entry(0, RW), u32_entry(1, RW_ARRAY)];

/// Communication parameters of RPDO `n`, counting from 0
pub const fn rpdo_communication(n: u16) -> Object {
    Object::record(object_ids::RPDO_COMM_BASE + n, 5, RPDO_COMMUNICATION_ENTRIES)
        .with_access(Access::PdoCommunication)
}

/// Mapping parameters of RPDO `n`
pub const fn rpdo_mapping(n: u16) -> Object {
    Object::record(
        object_ids::RPDO_MAP_BASE + n,
        MAX_PDO_ENTRIES as u8,
        PDO_MAPPING_ENTRIES,
    )
    .with_access(Access::PdoMapping)
}

/// Communication parameters of TPDO `n`, counting from 0
pub const fn tpdo_communication(n: u16) -> Object {
    Object::record(object_ids::TPDO_COMM_BASE + n, 6, TPDO_COMMUNICATION_ENTRIES)
        .with_access(Access::PdoCommunication)
}

/// Mapping parameters of TPDO `n`
pub const fn tpdo_mapping(n: u16) -> Object {
    Object::record(
        object_ids::TPDO_MAP_BASE + n,
        MAX_PDO_ENTRIES as u8,
        PDO_MAPPING_ENTRIES,
    )
    .with_access(Access::PdoMapping)
}
