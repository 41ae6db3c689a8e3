//! LSS (layer setting services) protocol messages
use crate::messages::{MessageError, MessageLengthSnafu, UnexpectedLssCommandSnafu};

/// LSS command specifiers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
#[allow(missing_docs)]
pub enum LssCommandSpecifier {
    SwitchModeGlobal = 0x04,
    ConfigureNodeId = 0x11,
    ConfigureBitTiming = 0x13,
    ActivateBitTiming = 0x15,
    StoreConfiguration = 0x17,
    SwitchStateVendor = 0x40,
    SwitchStateProduct = 0x41,
    SwitchStateRevision = 0x42,
    SwitchStateSerial = 0x43,
    SwitchStateResponse = 0x44,
    IdentifyVendor = 0x46,
    IdentifyProduct = 0x47,
    IdentifyRevLow = 0x48,
    IdentifyRevHigh = 0x49,
    IdentifySerialLow = 0x4A,
    IdentifySerialHigh = 0x4B,
    IdentifyNonConfigured = 0x4C,
    IdentifySlave = 0x4F,
    IdentifyNonConfiguredSlave = 0x50,
    InquireVendor = 0x5A,
    InquireProduct = 0x5B,
    InquireRev = 0x5C,
    InquireSerial = 0x5D,
    InquireNodeId = 0x5E,
}

impl LssCommandSpecifier {
    /// Decode a command specifier byte
    pub fn from_byte(b: u8) -> Result<Self, MessageError> {
        use LssCommandSpecifier::*;
        Ok(match b {
            0x04 => SwitchModeGlobal,
            0x11 => ConfigureNodeId,
            0x13 => ConfigureBitTiming,
            0x15 => ActivateBitTiming,
            0x17 => StoreConfiguration,
            0x40 => SwitchStateVendor,
            0x41 => SwitchStateProduct,
            0x42 => SwitchStateRevision,
            0x43 => SwitchStateSerial,
            0x44 => SwitchStateResponse,
            0x46 => IdentifyVendor,
            0x47 => IdentifyProduct,
            0x48 => IdentifyRevLow,
            0x49 => IdentifyRevHigh,
            0x4A => IdentifySerialLow,
            0x4B => IdentifySerialHigh,
            0x4C => IdentifyNonConfigured,
            0x4F => IdentifySlave,
            0x50 => IdentifyNonConfiguredSlave,
            0x5A => InquireVendor,
            0x5B => InquireProduct,
            0x5C => InquireRev,
            0x5D => InquireSerial,
            0x5E => InquireNodeId,
            _ => return UnexpectedLssCommandSnafu { value: b }.fail(),
        })
    }
}

/// The standard bit timing table (table 0), indexed by the LSS bit timing index
///
/// Index 5 is reserved and marked with -1; index 9 is automatic bit rate detection.
pub const BITRATE_TABLE: [i32; 10] = [
    1_000_000, 800_000, 500_000, 250_000, 125_000, -1, 50_000, 20_000, 10_000, 0,
];

/// Look up a bit rate in the standard table
///
/// Returns None for the reserved entry, automatic detection, and out of range indices.
pub fn bitrate_from_index(table: u8, index: u8) -> Option<u32> {
    if table != 0 || index > 8 || index == 5 {
        return None;
    }
    Some(BITRATE_TABLE[index as usize] as u32)
}

/// Which identity field a selective switch or remote identify request carries
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
#[allow(missing_docs)]
pub enum LssMatch {
    VendorId = 0,
    ProductCode = 1,
    RevisionLow = 2,
    RevisionHigh = 3,
    SerialLow = 4,
    SerialHigh = 5,
}

/// A request sent by the LSS master
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[allow(missing_docs)]
pub enum LssRequest {
    /// Switch all slaves to waiting (0) or configuration (1) state
    SwitchModeGlobal {
        mode: u8,
    },
    ConfigureNodeId {
        /// The new node ID to set
        node_id: u8,
    },
    ConfigureBitTiming {
        /// Defines what baudrate table is used to lookup the bit timing
        /// 0 means use the default table
        /// 1..127 are reserved
        /// 128..255 are user definable
        table: u8,
        /// The index into the baudrate table for the baudrate to select
        index: u8,
    },
    ActivateBitTiming {
        /// Duration in ms to delay before activating the new baudrate
        delay: u16,
    },
    StoreConfiguration,
    /// One step of a selective switch; the slave enters configuration state after all four
    /// steps match
    SwitchSelective {
        field: LssMatch,
        value: u32,
    },
    /// One step of a remote identification
    IdentifyRemote {
        field: LssMatch,
        value: u32,
    },
    IdentifyNonConfigured,
    /// Request a single identity value; `field` is 0..=3 for vendor, product, revision and serial,
    /// 4 for the active node ID
    Inquire {
        field: u8,
    },
}

impl TryFrom<&[u8]> for LssRequest {
    type Error = MessageError;

    fn try_from(value: &[u8]) -> Result<Self, Self::Error> {
        if value.len() != 8 {
            return MessageLengthSnafu {
                expected: 8usize,
                actual: value.len(),
            }
            .fail();
        }
        let u32_arg = u32::from_le_bytes([value[1], value[2], value[3], value[4]]);
        let cs = LssCommandSpecifier::from_byte(value[0])?;
        use LssCommandSpecifier as Cs;
        Ok(match cs {
            Cs::SwitchModeGlobal => Self::SwitchModeGlobal { mode: value[1] },
            Cs::ConfigureNodeId => Self::ConfigureNodeId { node_id: value[1] },
            Cs::ConfigureBitTiming => Self::ConfigureBitTiming {
                table: value[1],
                index: value[2],
            },
            Cs::ActivateBitTiming => Self::ActivateBitTiming {
                delay: u16::from_le_bytes([value[1], value[2]]),
            },
            Cs::StoreConfiguration => Self::StoreConfiguration,
            Cs::SwitchStateVendor => Self::SwitchSelective {
                field: LssMatch::VendorId,
                value: u32_arg,
            },
            Cs::SwitchStateProduct => Self::SwitchSelective {
                field: LssMatch::ProductCode,
                value: u32_arg,
            },
            Cs::SwitchStateRevision => Self::SwitchSelective {
                field: LssMatch::RevisionLow,
                value: u32_arg,
            },
            Cs::SwitchStateSerial => Self::SwitchSelective {
                field: LssMatch::SerialLow,
                value: u32_arg,
            },
            Cs::IdentifyVendor => Self::IdentifyRemote {
                field: LssMatch::VendorId,
                value: u32_arg,
            },
            Cs::IdentifyProduct => Self::IdentifyRemote {
                field: LssMatch::ProductCode,
                value: u32_arg,
            },
            Cs::IdentifyRevLow => Self::IdentifyRemote {
                field: LssMatch::RevisionLow,
                value: u32_arg,
            },
            Cs::IdentifyRevHigh => Self::IdentifyRemote {
                field: LssMatch::RevisionHigh,
                value: u32_arg,
            },
            Cs::IdentifySerialLow => Self::IdentifyRemote {
                field: LssMatch::SerialLow,
                value: u32_arg,
            },
            Cs::IdentifySerialHigh => Self::IdentifyRemote {
                field: LssMatch::SerialHigh,
                value: u32_arg,
            },
            Cs::IdentifyNonConfigured => Self::IdentifyNonConfigured,
            Cs::InquireVendor
            | Cs::InquireProduct
            | Cs::InquireRev
            | Cs::InquireSerial
            | Cs::InquireNodeId => Self::Inquire {
                field: value[0] - Cs::InquireVendor as u8,
            },
            // Responses are never valid requests
            Cs::SwitchStateResponse | Cs::IdentifySlave | Cs::IdentifyNonConfiguredSlave => {
                return UnexpectedLssCommandSnafu { value: value[0] }.fail()
            }
        })
    }
}

impl LssRequest {
    /// Encode the 8 byte frame payload
    pub fn to_bytes(self) -> [u8; 8] {
        use LssCommandSpecifier as Cs;
        let mut buf = [0; 8];
        let mut put_u32 = |cs: Cs, value: u32| {
            buf[0] = cs as u8;
            buf[1..5].copy_from_slice(&value.to_le_bytes());
        };
        match self {
            Self::SwitchModeGlobal { mode } => put_u32(Cs::SwitchModeGlobal, mode as u32),
            Self::ConfigureNodeId { node_id } => put_u32(Cs::ConfigureNodeId, node_id as u32),
            Self::ConfigureBitTiming { table, index } => put_u32(
                Cs::ConfigureBitTiming,
                table as u32 | (index as u32) << 8,
            ),
            Self::ActivateBitTiming { delay } => put_u32(Cs::ActivateBitTiming, delay as u32),
            Self::StoreConfiguration => put_u32(Cs::StoreConfiguration, 0),
            Self::SwitchSelective { field, value } => {
                let cs = match field {
                    LssMatch::VendorId => Cs::SwitchStateVendor,
                    LssMatch::ProductCode => Cs::SwitchStateProduct,
                    LssMatch::RevisionLow | LssMatch::RevisionHigh => Cs::SwitchStateRevision,
                    LssMatch::SerialLow | LssMatch::SerialHigh => Cs::SwitchStateSerial,
                };
                put_u32(cs, value)
            }
            Self::IdentifyRemote { field, value } => {
                put_u32(Cs::IdentifyVendor, value);
                buf[0] += field as u8;
            }
            Self::IdentifyNonConfigured => put_u32(Cs::IdentifyNonConfigured, 0),
            Self::Inquire { field } => {
                put_u32(Cs::InquireVendor, 0);
                buf[0] += field;
            }
        }
        buf
    }
}

/// A response sent by an LSS slave
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[allow(missing_docs)]
pub enum LssResponse {
    /// Result of configure node id; error 0 is success, 1 is out of range
    ConfigureNodeId { error: u8 },
    /// Result of configure bit timing; error 0 is success, 1 is not supported
    ConfigureBitTiming { error: u8 },
    /// Result of store configuration; error 0 is success, 1 is not supported, 2 is a storage
    /// error
    StoreConfiguration { error: u8 },
    /// The slave matched a selective switch and entered configuration state
    SwitchStateResponse,
    /// The slave matched a remote identify
    IdentifySlave,
    /// The slave has no node ID
    IdentifyNonConfiguredSlave,
    /// Response to an inquire request
    Inquire { field: u8, value: u32 },
}

impl LssResponse {
    /// Encode the 8 byte frame payload
    pub fn to_bytes(self) -> [u8; 8] {
        use LssCommandSpecifier as Cs;
        let mut buf = [0; 8];
        match self {
            Self::ConfigureNodeId { error } => {
                buf[0] = Cs::ConfigureNodeId as u8;
                buf[1] = error;
            }
            Self::ConfigureBitTiming { error } => {
                buf[0] = Cs::ConfigureBitTiming as u8;
                buf[1] = error;
            }
            Self::StoreConfiguration { error } => {
                buf[0] = Cs::StoreConfiguration as u8;
                buf[1] = error;
            }
            Self::SwitchStateResponse => buf[0] = Cs::SwitchStateResponse as u8,
            Self::IdentifySlave => buf[0] = Cs::IdentifySlave as u8,
            Self::IdentifyNonConfiguredSlave => buf[0] = Cs::IdentifyNonConfiguredSlave as u8,
            Self::Inquire { field, value } => {
                buf[0] = Cs::InquireVendor as u8 + field;
                buf[1..5].copy_from_slice(&value.to_le_bytes());
            }
        }
        buf
    }
}

impl TryFrom<&[u8]> for LssResponse {
    type Error = MessageError;

    fn try_from(value: &[u8]) -> Result<Self, Self::Error> {
        if value.len() != 8 {
            return MessageLengthSnafu {
                expected: 8usize,
                actual: value.len(),
            }
            .fail();
        }
        use LssCommandSpecifier as Cs;
        let cs = Cs::from_byte(value[0])?;
        Ok(match cs {
            Cs::ConfigureNodeId => Self::ConfigureNodeId { error: value[1] },
            Cs::ConfigureBitTiming => Self::ConfigureBitTiming { error: value[1] },
            Cs::StoreConfiguration => Self::StoreConfiguration { error: value[1] },
            Cs::SwitchStateResponse => Self::SwitchStateResponse,
            Cs::IdentifySlave => Self::IdentifySlave,
            Cs::IdentifyNonConfiguredSlave => Self::IdentifyNonConfiguredSlave,
            Cs::InquireVendor
            | Cs::InquireProduct
            | Cs::InquireRev
            | Cs::InquireSerial
            | Cs::InquireNodeId => Self::Inquire {
                field: value[0] - Cs::InquireVendor as u8,
                value: u32::from_le_bytes([value[1], value[2], value[3], value[4]]),
            },
            _ => return UnexpectedLssCommandSnafu { value: value[0] }.fail(),
        })
    }
}

/// LSS slave state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum LssState {
    /// Normal operation; only selective switch and global switch are processed
    #[default]
    Waiting = 0,
    /// Configuration commands are accepted
    Configuring = 1,
}

impl LssState {
    /// Decode a mode byte
    pub fn from_byte(b: u8) -> Result<Self, MessageError> {
        match b {
            0x00 => Ok(Self::Waiting),
            0x01 => Ok(Self::Configuring),
            _ => crate::messages::InvalidFieldSnafu { value: b }.fail(),
        }
    }
}
