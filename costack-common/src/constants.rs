//! Constants defining standard object indices, CAN function codes and special values
//!
//!

/// Object indices for standard objects
pub mod object_ids {
    /// The device type object index
    pub const DEVICE_TYPE: u16 = 0x1000;
    /// The error register object index
    pub const ERROR_REGISTER: u16 = 0x1001;
    /// The pre-defined error field (error history) object index
    pub const ERROR_HISTORY: u16 = 0x1003;
    /// The COB-ID SYNC message object index
    pub const SYNC_COB_ID: u16 = 0x1005;
    /// The communication cycle period object index
    pub const SYNC_PERIOD: u16 = 0x1006;
    /// The synchronous window length object index
    pub const SYNC_WINDOW: u16 = 0x1007;
    /// The Device Name object index
    pub const DEVICE_NAME: u16 = 0x1008;
    /// The hardware version object index
    pub const HARDWARE_VERSION: u16 = 0x1009;
    /// The software version object index
    pub const SOFTWARE_VERSION: u16 = 0x100A;
    /// The guard time object index
    pub const GUARD_TIME: u16 = 0x100C;
    /// The life time factor object index
    pub const LIFE_TIME_FACTOR: u16 = 0x100D;
    /// Save objects command object index
    pub const SAVE_OBJECTS: u16 = 0x1010;
    /// Restore default parameters object index
    pub const RESTORE_DEFAULTS: u16 = 0x1011;
    /// The COB-ID EMCY object index
    pub const EMCY_COB_ID: u16 = 0x1014;
    /// The inhibit time EMCY object index
    pub const EMCY_INHIBIT: u16 = 0x1015;
    /// The consumer heartbeat time object index
    pub const HEARTBEAT_CONSUMER_TIME: u16 = 0x1016;
    /// The heartbeat producer time object index
    pub const HEARTBEAT_PRODUCER_TIME: u16 = 0x1017;
    /// The identity object index
    pub const IDENTITY: u16 = 0x1018;
    /// The synchronous counter overflow value object index
    pub const SYNC_OVERFLOW: u16 = 0x1019;
    /// The verify configuration object index
    pub const VERIFY_CONFIGURATION: u16 = 0x1020;
    /// The emergency consumer object index
    pub const EMCY_CONSUMER: u16 = 0x1028;
    /// The error behavior object index
    pub const ERROR_BEHAVIOR: u16 = 0x1029;
    /// The first RPDO communication parameter object
    pub const RPDO_COMM_BASE: u16 = 0x1400;
    /// The first RPDO mapping parameter object
    pub const RPDO_MAP_BASE: u16 = 0x1600;
    /// The first TPDO communication parameter object
    pub const TPDO_COMM_BASE: u16 = 0x1800;
    /// The first TPDO mapping parameter object
    pub const TPDO_MAP_BASE: u16 = 0x1A00;
}

/// Special values used to access standard objects
pub mod values {
    /// Magic value used to trigger object storage by writing to object 0x1010
    ///
    /// This is the string "save" in little endian byte order
    pub const SAVE_CMD: u32 = 0x65766173;
    /// Magic value used to trigger a restore of default values by writing to object 0x1011
    ///
    /// This is the string "load" in little endian byte order
    pub const LOAD_CMD: u32 = 0x64616F6C;
}

/// CAN function codes, as found in bits 7..10 of a standard CAN ID
pub mod function {
    /// Mask selecting the function code from a CAN ID
    pub const MASK: u16 = 0x780;
    /// NMT command
    pub const NMT: u16 = 0x000;
    /// SYNC (node 0) or EMCY (node 1..=127)
    pub const SYNC: u16 = 0x080;
    /// EMCY, shares its function code with SYNC
    pub const EMCY: u16 = 0x080;
    /// TPDO1, the lowest PDO function code
    pub const PDO1_TX: u16 = 0x180;
    /// RPDO4, the highest PDO function code
    pub const PDO4_RX: u16 = 0x500;
    /// SDO server to client
    pub const SDO_TX: u16 = 0x580;
    /// SDO client to server
    pub const SDO_RX: u16 = 0x600;
    /// Heartbeat, boot-up and node guarding
    pub const NMT_ERR: u16 = 0x700;
    /// LSS requests and responses
    pub const LSS: u16 = 0x780;

    /// Returns true if the function code belongs to one of the default PDOs
    pub const fn is_pdo(function: u16) -> bool {
        function >= PDO1_TX && function <= PDO4_RX
    }
}

/// Bits in the error register, object 0x1001
pub mod error_register {
    /// Generic error; set whenever any other bit is set
    pub const GENERIC: u8 = 1 << 0;
    /// Current
    pub const CURRENT: u8 = 1 << 1;
    /// Voltage
    pub const VOLTAGE: u8 = 1 << 2;
    /// Temperature
    pub const TEMPERATURE: u8 = 1 << 3;
    /// Communication error (overrun, error state, heartbeat, node guarding)
    pub const COMMUNICATION: u8 = 1 << 4;
    /// Device profile specific
    pub const DEVICE: u8 = 1 << 5;
    /// Manufacturer specific
    pub const MANUFACTURER: u8 = 1 << 6;
}

/// Standard emergency error codes generated by the stack
pub mod emcy_codes {
    /// Error reset or no error
    pub const NO_ERROR: u16 = 0x0000;
    /// CAN overrun (objects lost)
    pub const CAN_OVERRUN: u16 = 0x8110;
    /// CAN in error passive mode
    pub const CAN_ERROR_PASSIVE: u16 = 0x8120;
    /// Life guard error or heartbeat error
    pub const HEARTBEAT: u16 = 0x8130;
    /// Recovered from bus off
    pub const BUS_OFF_RECOVERED: u16 = 0x8140;
    /// PDO not processed due to length error
    pub const PDO_LENGTH: u16 = 0x8210;
}
