//! Object Dictionary
//!
//! # Objects Overview
//!
//! The object dictionary is the main mechanism of configuration and communication for a node.
//! Every protocol engine in the stack reads and writes through it: SDO transfers, PDO mapping,
//! the communication parameter objects and the application itself. Objects are identified by a
//! 16-bit index and hold one or more sub-objects, each addressed by an 8-bit sub index. Objects
//! come in three varieties:
//!
//! - VAR: A single variable of any type (accessed at sub index 0)
//! - ARRAY: An array of sub-objects, all with the same type. Sub-index 0 is a u8 containing the
//!   size of the array. Sub indices 1-N contain the array values.
//! - RECORD: A collection of sub-objects of heterogenous types. Sub-index 0 contains the highest
//!   implemented sub index.
//!
//! The dictionary is a `&'static [Object]` built by the application, usually as a `static`. The
//! standard communication objects are available ready-made in [`crate::objects`].
//!
//! # Entries
//!
//! Each object carries a list of [`Entry`] descriptors. An entry describes one sub index, or, when
//! flagged [`EntryFlags::ARRAY`], the whole run of sub indices `1..=max_subindex` with a single
//! descriptor. The value of an entry lives either in the entry itself (a constant), or in a
//! `'static` slice of atomics described by [`Storage`].
//!
//! # Access
//!
//! An object may replace its storage with an [`Access`] handler. The built-in handlers implement
//! the communication objects, and [`Access::Application`] lets the application implement its own
//! objects through the [`ObjectAccess`] trait.
//!
//! A handler may decline a read of sub index 0 by returning [`AbortCode::BadSubindex`]; the read
//! then falls through to the storage of entry 0. This lets a handler implement only the
//! interesting sub indices and leave the count in sub index 0 to a constant entry.
//!
//! # Example
//!
//! ```rust
//! use core::sync::atomic::AtomicU32;
//! use costack_node::object_dict::{Entry, Object, Storage};
//! use costack_node::common::objects::{DataType, EntryFlags};
//!
//! static COUNTER: [AtomicU32; 1] = [AtomicU32::new(0)];
//!
//! static OD: [Object; 1] = [Object::var(
//!     0x2000,
//!     &[Entry::new(0, EntryFlags::RW.union(EntryFlags::TPDO), DataType::UInt32, 32, Storage::U32(&COUNTER))],
//! )];
//! ```

mod fields;

pub use fields::Storage;

use costack_common::objects::{DataType, EntryFlags, ObjectCode};
use costack_common::sdo::AbortCode;

/// Descriptor for one sub index, or a run of sub indices sharing one descriptor
#[derive(Clone, Copy)]
#[allow(missing_debug_implementations)]
pub struct Entry {
    /// The sub index described
    pub subindex: u8,
    /// Access and behaviour flags
    pub flags: EntryFlags,
    /// The CANopen data type
    pub datatype: DataType,
    /// Size of the value in bits
    pub bitlength: u16,
    /// Constant value returned when the entry has no storage
    pub value: u64,
    /// Backing storage
    pub storage: Storage,
}

impl Entry {
    /// Create an entry backed by `storage`
    pub const fn new(
        subindex: u8,
        flags: EntryFlags,
        datatype: DataType,
        bitlength: u16,
        storage: Storage,
    ) -> Self {
        Self {
            subindex,
            flags,
            datatype,
            bitlength,
            value: 0,
            storage,
        }
    }

    /// Create a read-only entry holding a constant value
    pub const fn constant(subindex: u8, datatype: DataType, bitlength: u16, value: u64) -> Self {
        Self {
            subindex,
            flags: EntryFlags::RO,
            datatype,
            bitlength,
            value,
            storage: Storage::None,
        }
    }

    /// Size of the value in bytes
    pub const fn bytelength(&self) -> usize {
        costack_common::util::byte_length(self.bitlength as usize)
    }

    /// Returns true if the entry describes a run of sub indices
    pub const fn is_array(&self) -> bool {
        self.flags.contains(EntryFlags::ARRAY)
    }

    /// The storage element holding sub index `sub`
    pub(crate) fn element(&self, sub: u8) -> usize {
        if self.is_array() {
            (sub as usize).saturating_sub(1)
        } else {
            0
        }
    }
}

/// Implemented by application objects which compute or validate their values
///
/// All values are passed as u32, which covers every type an access handler can carry in an
/// expedited SDO transfer or a PDO mapping.
pub trait ObjectAccess: Sync {
    /// Read sub index `sub`
    ///
    /// Returning [`AbortCode::BadSubindex`] for sub index 0 falls back to the entry storage.
    fn read(&self, obj: &Object, sub: u8) -> Result<u32, AbortCode>;

    /// Write sub index `sub`
    fn write(&self, obj: &Object, sub: u8, value: u32) -> Result<(), AbortCode>;

    /// Reset the object to its power-on state
    fn restore(&self, _obj: &Object) {}
}

/// Selects the handler for an object
#[derive(Clone, Copy, Default)]
#[allow(missing_debug_implementations)]
pub enum Access {
    /// Values are read from and written to entry storage
    #[default]
    None,
    /// 0x1001 error register
    ErrorRegister,
    /// 0x1003 pre-defined error field
    ErrorHistory,
    /// 0x1005 COB-ID SYNC
    SyncCobId,
    /// 0x1006 communication cycle period
    SyncPeriod,
    /// 0x1007 synchronous window length
    SyncWindow,
    /// 0x100C guard time
    GuardTime,
    /// 0x100D life time factor
    LifeTimeFactor,
    /// 0x1010 store parameters
    StoreParameters,
    /// 0x1011 restore default parameters
    RestoreDefaults,
    /// 0x1014 COB-ID EMCY
    EmcyCobId,
    /// 0x1015 inhibit time EMCY
    EmcyInhibit,
    /// 0x1016 consumer heartbeat time
    HeartbeatConsumer,
    /// 0x1017 producer heartbeat time
    HeartbeatProducer,
    /// 0x1019 synchronous counter overflow value
    SyncOverflow,
    /// 0x1020 verify configuration
    VerifyConfiguration,
    /// 0x1028 emergency consumer
    EmcyConsumer,
    /// 0x1029 error behaviour
    ErrorBehavior,
    /// 0x1400.. and 0x1800.. PDO communication parameters
    PdoCommunication,
    /// 0x1600.. and 0x1A00.. PDO mapping parameters
    PdoMapping,
    /// An application handler
    Application(&'static dyn ObjectAccess),
}

impl Access {
    /// Returns true if the object has a handler instead of plain storage
    pub fn is_handler(&self) -> bool {
        !matches!(self, Access::None)
    }
}

/// An object in the dictionary
#[derive(Clone, Copy)]
#[allow(missing_debug_implementations)]
pub struct Object {
    /// Object index
    pub index: u16,
    /// Object code
    pub code: ObjectCode,
    /// Highest sub index
    pub max_subindex: u8,
    /// Entry descriptors, starting with sub index 0
    pub entries: &'static [Entry],
    /// Handler for the object, if any
    pub access: Access,
}

impl Object {
    /// Create an object
    pub const fn new(
        index: u16,
        code: ObjectCode,
        max_subindex: u8,
        entries: &'static [Entry],
        access: Access,
    ) -> Self {
        Self {
            index,
            code,
            max_subindex,
            entries,
            access,
        }
    }

    /// Create a VAR object with a single entry
    pub const fn var(index: u16, entries: &'static [Entry]) -> Self {
        Self::new(index, ObjectCode::Var, 0, entries, Access::None)
    }

    /// Create an ARRAY object of `len` elements
    ///
    /// `entries` should hold the count in sub index 0 and one ARRAY flagged entry.
    pub const fn array(index: u16, len: u8, entries: &'static [Entry]) -> Self {
        Self::new(index, ObjectCode::Array, len, entries, Access::None)
    }

    /// Create a RECORD object
    pub const fn record(index: u16, max_subindex: u8, entries: &'static [Entry]) -> Self {
        Self::new(index, ObjectCode::Record, max_subindex, entries, Access::None)
    }

    /// Replace the handler for the object
    pub const fn with_access(mut self, access: Access) -> Self {
        self.access = access;
        self
    }

    /// Find the entry describing sub index `sub`
    pub fn find_entry(&self, sub: u8) -> Option<&'static Entry> {
        let entries: &'static [Entry] = self.entries;

        // Sub index 0 always exists
        if sub == 0 {
            return entries.first();
        }

        match self.code {
            ObjectCode::Var => return None,
            ObjectCode::Array | ObjectCode::Record => {
                if let Some(entry) = entries.get(1).filter(|e| e.is_array()) {
                    return (sub <= self.max_subindex).then_some(entry);
                }
            }
            _ => (),
        }

        if sub > self.max_subindex {
            return None;
        }
        entries.iter().find(|e| e.subindex == sub)
    }
}

/// Find an object by index
pub fn find_object(od: &'static [Object], index: u16) -> Option<&'static Object> {
    od.iter()
        .take_while(|obj| obj.index != 0)
        .find(|obj| obj.index == index)
}

/// A value applied to one sub-object on every reset
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct DefaultValue {
    /// Object index
    pub index: u16,
    /// Sub index
    pub sub: u8,
    /// Value
    pub value: u64,
}

#[cfg(feature = "std")]
impl From<&costack_common::device_config::DefaultDefinition> for DefaultValue {
    fn from(value: &costack_common::device_config::DefaultDefinition) -> Self {
        Self {
            index: value.index,
            sub: value.sub,
            value: value.value,
        }
    }
}
