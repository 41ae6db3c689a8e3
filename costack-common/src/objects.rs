//! Object Definitions
//!
//! Types describing the shape of object dictionary entries. The dictionary itself lives in
//! `costack-node`.

/// A container for the address of a subobject
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ObjectId {
    /// Object index
    pub index: u16,
    /// Sub index
    pub sub: u8,
}

/// Object Code value
///
/// Defines the type of an object
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum ObjectCode {
    /// An empty object
    Null = 0,
    /// A large chunk of data
    Domain = 2,
    /// A type definition
    DefType = 5,
    /// A structure definition
    DefStruct = 6,
    /// An object which has a single sub object
    #[default]
    Var = 7,
    /// An array of sub-objects all with the same data type
    Array = 8,
    /// A collection of sub-objects with varying types
    Record = 9,
}

impl TryFrom<u8> for ObjectCode {
    type Error = ();

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(ObjectCode::Null),
            2 => Ok(ObjectCode::Domain),
            5 => Ok(ObjectCode::DefType),
            6 => Ok(ObjectCode::DefStruct),
            7 => Ok(ObjectCode::Var),
            8 => Ok(ObjectCode::Array),
            9 => Ok(ObjectCode::Record),
            _ => Err(()),
        }
    }
}

/// Indicate the type of data stored in an object
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u16)]
#[allow(missing_docs)]
pub enum DataType {
    Boolean = 1,
    Int8 = 2,
    Int16 = 3,
    Int32 = 4,
    #[default]
    UInt8 = 5,
    UInt16 = 6,
    UInt32 = 7,
    Real32 = 8,
    VisibleString = 9,
    OctetString = 0xa,
    UnicodeString = 0xb,
    TimeOfDay = 0xc,
    TimeDifference = 0xd,
    Domain = 0xf,
    Int24 = 0x10,
    Real64 = 0x11,
    Int40 = 0x12,
    Int48 = 0x13,
    Int56 = 0x14,
    Int64 = 0x15,
    UInt24 = 0x16,
    UInt40 = 0x18,
    UInt48 = 0x19,
    UInt56 = 0x1a,
    UInt64 = 0x1b,
    /// PDO communication parameter record
    PdoCommParam = 0x20,
    /// PDO mapping parameter record
    PdoMapping = 0x21,
    /// SDO parameter record
    SdoParam = 0x22,
    /// Identity record
    Identity = 0x23,
}

impl DataType {
    /// Returns true if data type is one of the string types
    pub fn is_str(&self) -> bool {
        matches!(
            self,
            Self::VisibleString | Self::OctetString | Self::UnicodeString
        )
    }

    /// The storage width in bits used when a value of this type is accessed as an integer
    ///
    /// Returns `None` for types which have no scalar storage representation.
    pub fn storage_bits(&self) -> Option<u32> {
        use DataType::*;
        match self {
            Boolean | Int8 | UInt8 => Some(8),
            Int16 | UInt16 => Some(16),
            Int32 | UInt32 | Real32 => Some(32),
            Int64 | UInt64 | Real64 => Some(64),
            _ => None,
        }
    }
}

/// Access and behavior flags for a dictionary entry
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct EntryFlags(u8);

impl EntryFlags {
    /// No flags
    pub const NONE: EntryFlags = EntryFlags(0);
    /// Entry is readable
    pub const READ: EntryFlags = EntryFlags(1 << 0);
    /// Entry is writeable
    pub const WRITE: EntryFlags = EntryFlags(1 << 1);
    /// Entry is not persisted
    pub const TRANSIENT: EntryFlags = EntryFlags(1 << 2);
    /// Entry may be mapped into a TPDO
    pub const TPDO: EntryFlags = EntryFlags(1 << 3);
    /// Entry may be mapped into an RPDO
    pub const RPDO: EntryFlags = EntryFlags(1 << 4);
    /// Entry describes a run of sub indices
    pub const ARRAY: EntryFlags = EntryFlags(1 << 5);
    /// Entry notifies the application when it is written
    pub const NOTIFY: EntryFlags = EntryFlags(1 << 6);
    /// Read-only
    pub const RO: EntryFlags = Self::READ;
    /// Write-only
    pub const WO: EntryFlags = Self::WRITE;
    /// Read-write
    pub const RW: EntryFlags = Self::READ.union(Self::WRITE);

    /// Combine two sets of flags
    pub const fn union(self, other: EntryFlags) -> EntryFlags {
        EntryFlags(self.0 | other.0)
    }

    /// Returns true if all flags in `other` are set
    pub const fn contains(&self, other: EntryFlags) -> bool {
        self.0 & other.0 == other.0
    }

    /// Get the raw bits
    pub const fn bits(&self) -> u8 {
        self.0
    }

    /// Build flags from raw bits
    pub const fn from_bits(bits: u8) -> EntryFlags {
        EntryFlags(bits & 0x7F)
    }
}

impl core::ops::BitOr for EntryFlags {
    type Output = EntryFlags;

    fn bitor(self, rhs: Self) -> Self::Output {
        self.union(rhs)
    }
}
