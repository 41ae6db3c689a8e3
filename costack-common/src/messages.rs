//! CAN frame types and the simple single-frame CANopen messages
use snafu::Snafu;

/// Flag in a COB-ID word marking a frame as a remote transmission request
pub const RTR_FLAG: u32 = 1 << 30;
/// Flag in a COB-ID word marking an extended (29-bit) identifier
pub const EXT_FLAG: u32 = 1 << 29;
/// Mask for the identifier bits of a COB-ID word
pub const ID_MASK: u32 = 0x1FFF_FFFF;
/// Mask for the identifier plus the extended flag
pub const EXTID_MASK: u32 = EXT_FLAG | ID_MASK;
/// Flag in a COB-ID word marking the communication object as disabled
pub const COBID_INVALID: u32 = 1 << 31;

/// A CAN identifier, either an 11-bit standard or 29-bit extended ID
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum CanId {
    /// A 29-bit extended ID
    Extended(u32),
    /// An 11-bit standard ID
    Std(u16),
}

impl CanId {
    /// Create an extended ID
    pub const fn extended(id: u32) -> CanId {
        CanId::Extended(id)
    }

    /// Create a standard ID
    pub const fn std(id: u16) -> CanId {
        CanId::Std(id)
    }

    /// Build an ID from a CANopen COB-ID word
    ///
    /// Bit 29 selects an extended ID; the validity and RTR bits are ignored.
    pub const fn from_cob_word(word: u32) -> CanId {
        if word & EXT_FLAG != 0 {
            CanId::Extended(word & ID_MASK)
        } else {
            CanId::Std((word & 0x7FF) as u16)
        }
    }

    /// Get the numeric identifier
    pub const fn raw(&self) -> u32 {
        match self {
            CanId::Extended(id) => *id,
            CanId::Std(id) => *id as u32,
        }
    }

    /// Returns true for a 29-bit ID
    pub const fn is_extended(&self) -> bool {
        match self {
            CanId::Extended(_) => true,
            CanId::Std(_) => false,
        }
    }

    /// The COB-ID word for this ID: the identifier plus the extended flag
    pub const fn cob_word(&self) -> u32 {
        match self {
            CanId::Extended(id) => (*id & ID_MASK) | EXT_FLAG,
            CanId::Std(id) => *id as u32,
        }
    }
}

const MAX_DATA_LENGTH: usize = 8;

/// A classic CAN frame
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct CanMessage {
    /// Payload bytes; only the first `dlc` are meaningful
    pub data: [u8; MAX_DATA_LENGTH],
    /// Data length code
    pub dlc: u8,
    /// Identifier
    pub id: CanId,
    /// Remote transmission request
    pub rtr: bool,
}

impl Default for CanMessage {
    fn default() -> Self {
        Self {
            data: [0; MAX_DATA_LENGTH],
            dlc: 0,
            id: CanId::Std(0),
            rtr: false,
        }
    }
}

impl CanMessage {
    /// Create a data frame
    ///
    /// Data longer than 8 bytes is truncated.
    pub fn new(id: CanId, data: &[u8]) -> Self {
        let dlc = data.len().min(MAX_DATA_LENGTH);
        let mut buf = [0u8; MAX_DATA_LENGTH];
        buf[0..dlc].copy_from_slice(&data[0..dlc]);

        Self {
            id,
            dlc: dlc as u8,
            data: buf,
            rtr: false,
        }
    }

    /// Create a remote transmission request with the given DLC
    pub fn new_rtr(id: CanId, dlc: u8) -> Self {
        Self {
            id,
            dlc: dlc.min(MAX_DATA_LENGTH as u8),
            data: [0; MAX_DATA_LENGTH],
            rtr: true,
        }
    }

    /// Get the message ID
    pub fn id(&self) -> CanId {
        self.id
    }

    /// Get the valid payload bytes
    pub fn data(&self) -> &[u8] {
        &self.data[0..self.dlc as usize]
    }

    /// The COB-ID word of the frame: identifier, extended flag and RTR flag
    pub fn cob_word(&self) -> u32 {
        let mut word = self.id.cob_word();
        if self.rtr {
            word |= RTR_FLAG;
        }
        word
    }
}

/// NMT command specifier
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum NmtCommandCmd {
    /// Enter operational
    Start = 1,
    /// Enter stopped
    Stop = 2,
    /// Enter pre-operational
    EnterPreOp = 0x80,
    /// Reset the application
    ResetApp = 0x81,
    /// Reset communication
    ResetComm = 0x82,
}

impl NmtCommandCmd {
    /// Decode a command specifier byte
    pub fn from_byte(b: u8) -> Result<Self, MessageError> {
        match b {
            1 => Ok(Self::Start),
            2 => Ok(Self::Stop),
            0x80 => Ok(Self::EnterPreOp),
            0x81 => Ok(Self::ResetApp),
            0x82 => Ok(Self::ResetComm),
            _ => InvalidFieldSnafu { value: b }.fail(),
        }
    }
}

/// The NMT command ID
pub const NMT_CMD_ID: CanId = CanId::Std(0);
/// The default SYNC ID
pub const SYNC_ID: CanId = CanId::Std(0x80);
/// The LSS response ID, sent by slaves
pub const LSS_RESP_ID: CanId = CanId::Std(0x7E4);
/// The LSS request ID, sent by the master
pub const LSS_REQ_ID: CanId = CanId::Std(0x7E5);
/// Base ID for heartbeat, boot-up and node guarding messages
pub const HEARTBEAT_ID: u16 = 0x700;
/// Base ID for emergency messages
pub const EMCY_ID: u16 = 0x80;
/// The default base ID for sending SDO requests (server node ID is added)
pub const SDO_REQ_BASE: u16 = 0x600;
/// The default base ID for sending SDO responses (server node ID is added)
pub const SDO_RESP_BASE: u16 = 0x580;

/// An NMT command message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct NmtCommand {
    /// The command
    pub cmd: NmtCommandCmd,
    /// The addressed node, or 0 for all nodes
    pub node: u8,
}

impl TryFrom<&CanMessage> for NmtCommand {
    type Error = MessageError;

    fn try_from(msg: &CanMessage) -> Result<Self, Self::Error> {
        let payload = msg.data();
        if msg.id() != NMT_CMD_ID {
            UnexpectedIdSnafu {
                cob_id: msg.id(),
                expected: NMT_CMD_ID,
            }
            .fail()
        } else if payload.len() != 2 {
            MessageLengthSnafu {
                expected: 2usize,
                actual: payload.len(),
            }
            .fail()
        } else {
            let cmd = NmtCommandCmd::from_byte(payload[0])?;
            let node = payload[1];
            Ok(NmtCommand { cmd, node })
        }
    }
}

impl From<NmtCommand> for CanMessage {
    fn from(cmd: NmtCommand) -> Self {
        CanMessage::new(NMT_CMD_ID, &[cmd.cmd as u8, cmd.node])
    }
}

/// NMT state as reported in heartbeat and node guarding messages
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum NmtState {
    /// Boot-up, or any initialisation state
    Bootup = 0,
    /// Stopped
    Stopped = 4,
    /// Operational
    Operational = 5,
    /// Pre-operational
    PreOperational = 127,
}

impl TryFrom<u8> for NmtState {
    type Error = MessageError;

    /// Attempt to convert a u8 to an NmtState enum
    ///
    /// Fails with InvalidNmtState if value is not a valid state
    fn try_from(value: u8) -> Result<Self, Self::Error> {
        use NmtState::*;
        match value {
            x if x == Bootup as u8 => Ok(Bootup),
            x if x == Stopped as u8 => Ok(Stopped),
            x if x == Operational as u8 => Ok(Operational),
            x if x == PreOperational as u8 => Ok(PreOperational),
            _ => InvalidNmtStateSnafu { value }.fail(),
        }
    }
}

/// A heartbeat (or boot-up) message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Heartbeat {
    /// The producing node
    pub node: u8,
    /// Toggle bit, only used in node guarding responses
    pub toggle: bool,
    /// The reported state
    pub state: NmtState,
}

impl From<Heartbeat> for CanMessage {
    fn from(value: Heartbeat) -> Self {
        let mut byte = value.state as u8;
        if value.toggle {
            byte |= 1 << 7;
        }
        CanMessage::new(CanId::Std(HEARTBEAT_ID | value.node as u16), &[byte])
    }
}

impl TryFrom<&CanMessage> for Heartbeat {
    type Error = MessageError;

    fn try_from(msg: &CanMessage) -> Result<Self, Self::Error> {
        let id = msg.id().raw();
        if msg.id().is_extended() || id & !0x7F != HEARTBEAT_ID as u32 {
            return UnexpectedIdSnafu {
                cob_id: msg.id(),
                expected: CanId::Std(HEARTBEAT_ID),
            }
            .fail();
        }
        if msg.dlc < 1 {
            return MessageTooShortSnafu.fail();
        }
        Ok(Heartbeat {
            node: (id & 0x7F) as u8,
            toggle: msg.data[0] & (1 << 7) != 0,
            state: (msg.data[0] & 0x7F).try_into()?,
        })
    }
}

/// Represents a SYNC object/message
///
/// A single CAN node can serve as the SYNC provider, sending a periodic sync object to all other
/// nodes. When a counter overflow value is configured, the one byte count value starts at 1, and
/// increments. On overflow, it is reset to 1. Without an overflow value the message has no
/// payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct SyncObject {
    /// The counter value, if present
    pub count: Option<u8>,
}

impl SyncObject {
    /// Create a SYNC object with a counter
    pub fn new(count: u8) -> Self {
        Self { count: Some(count) }
    }

    /// Build the SYNC frame for the given ID
    pub fn to_can_message(self, id: CanId) -> CanMessage {
        match self.count {
            Some(count) => CanMessage::new(id, &[count]),
            None => CanMessage::new(id, &[]),
        }
    }
}

impl From<&CanMessage> for SyncObject {
    fn from(msg: &CanMessage) -> Self {
        Self {
            count: msg.data().first().copied(),
        }
    }
}

/// An emergency message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct EmcyMessage {
    /// Emergency error code
    pub code: u16,
    /// Error register at the time of the emergency
    pub register: u8,
    /// Manufacturer specific error field
    pub msef: [u8; 5],
}

impl EmcyMessage {
    /// Encode the 8 byte payload
    pub fn to_bytes(&self) -> [u8; 8] {
        let mut buf = [0; 8];
        buf[0..2].copy_from_slice(&self.code.to_le_bytes());
        buf[2] = self.register;
        buf[3..8].copy_from_slice(&self.msef);
        buf
    }
}

impl TryFrom<&[u8]> for EmcyMessage {
    type Error = MessageError;

    fn try_from(value: &[u8]) -> Result<Self, Self::Error> {
        if value.len() < 8 {
            return MessageTooShortSnafu.fail();
        }
        let mut msef = [0; 5];
        msef.copy_from_slice(&value[3..8]);
        Ok(Self {
            code: u16::from_le_bytes([value[0], value[1]]),
            register: value[2],
            msef,
        })
    }
}

/// Errors which can occur while decoding a CAN frame into a message
#[derive(Debug, Clone, Copy, PartialEq, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum MessageError {
    /// The payload was shorter than the message requires
    MessageTooShort,
    /// The payload length was not the required value
    #[snafu(display("Unexpected message length {actual}, expected {expected}"))]
    MessageLength {
        /// Expected length
        expected: usize,
        /// Actual length
        actual: usize,
    },
    /// The message ID was not the expected value
    #[snafu(display("Unexpected message ID found: {cob_id:?}, expected: {expected:?}"))]
    UnexpectedId {
        /// The received ID
        cob_id: CanId,
        /// The ID the decoder expected
        expected: CanId,
    },
    /// A field contained a value not allowed by the protocol
    #[snafu(display("Invalid field value {value}"))]
    InvalidField {
        /// The offending value
        value: u8,
    },
    /// The NMT state integer in the message is not a valid NMT state
    #[snafu(display("Invalid NMT state {value}"))]
    InvalidNmtState {
        /// The offending value
        value: u8,
    },
    /// An invalid SDO command specifier was found in the message
    #[snafu(display("Unexpected SDO command specifier: {value}"))]
    UnexpectedSdoCommand {
        /// The command byte
        value: u8,
    },
    /// An invalid LSS command specifier was found in the message
    #[snafu(display("Unexpected LSS command: {value}"))]
    UnexpectedLssCommand {
        /// The command byte
        value: u8,
    },
}
