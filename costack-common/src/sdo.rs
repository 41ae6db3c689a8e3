//! SDO wire protocol: abort codes and frame codecs for expedited and segmented transfers
use int_enum::IntEnum;

use crate::messages::{MessageError, MessageTooShortSnafu, UnexpectedSdoCommandSnafu};

/// Expedited flag in an initiate command byte
pub const SDO_E: u8 = 1 << 1;
/// Size indicated flag in an initiate command byte
pub const SDO_S: u8 = 1 << 0;
/// Toggle flag in a segment command byte
pub const SDO_TOGGLE: u8 = 1 << 4;
/// Complete flag in a segment command byte
pub const SDO_C: u8 = 1 << 0;

/// SDO abort codes, as defined in CiA 301 section 7.2.4.3.17
#[derive(Clone, Copy, Debug, PartialEq, Eq, IntEnum)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u32)]
pub enum AbortCode {
    /// Toggle bit not alternated
    Toggle = 0x0503_0000,
    /// SDO protocol timed out
    Timeout = 0x0504_0000,
    /// Client/server command specifier not valid or unknown
    Unknown = 0x0504_0001,
    /// Invalid block size (block mode only)
    InvalidBlockSize = 0x0504_0002,
    /// Invalid sequence number (block mode only)
    InvalidSeqNo = 0x0504_0003,
    /// CRC error (block mode only)
    CrcError = 0x0504_0004,
    /// Out of memory
    OutOfMemory = 0x0504_0005,
    /// Unsupported access to an object
    Access = 0x0601_0000,
    /// Attempt to read a write only object
    AccessWo = 0x0601_0001,
    /// Attempt to write a read only object
    AccessRo = 0x0601_0002,
    /// Object does not exist in the object dictionary
    BadIndex = 0x0602_0000,
    /// Object cannot be mapped to the PDO
    Unmappable = 0x0604_0041,
    /// The number and length of the objects to be mapped would exceed PDO length
    PdoLength = 0x0604_0042,
    /// General parameter incompatibility reason
    ParamIncompatible = 0x0604_0043,
    /// General internal incompatibility in the device
    InternalIncompatible = 0x0604_0047,
    /// Access failed due to a hardware error
    HwError = 0x0606_0000,
    /// Data type does not match, length of service parameter does not match
    Length = 0x0607_0010,
    /// Data type does not match, length of service parameter too high
    LengthTooHigh = 0x0607_0012,
    /// Data type does not match, length of service parameter too low
    LengthTooLow = 0x0607_0013,
    /// Sub-index does not exist
    BadSubindex = 0x0609_0011,
    /// Invalid value for parameter (download only)
    Value = 0x0609_0030,
    /// Value of parameter written too high (download only)
    ValueTooHigh = 0x0609_0031,
    /// Value of parameter written too low (download only)
    ValueTooLow = 0x0609_0032,
    /// Maximum value is less than minimum value
    MaxLtMin = 0x0609_0036,
    /// Resource not available: SDO connection
    OutOfResource = 0x060A_0023,
    /// General error
    General = 0x0800_0000,
    /// Data cannot be transferred or stored to the application
    Write = 0x0800_0020,
    /// Data cannot be transferred or stored to the application because of local control
    WriteLocalDenied = 0x0800_0021,
    /// Data cannot be transferred or stored to the application because of the present device
    /// state
    WriteStateDenied = 0x0800_0022,
    /// Object dictionary dynamic generation fails or no object dictionary is present
    BadOd = 0x0800_0023,
    /// No data available
    NoData = 0x0800_0024,
}

impl AbortCode {
    /// Get the numeric abort code
    pub fn raw(self) -> u32 {
        self.into()
    }
}

/// Client command specifiers (top three bits of a request command byte)
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum ClientCommand {
    /// Download segment
    DownloadSegment = 0,
    /// Initiate download
    InitiateDownload = 1,
    /// Initiate upload
    InitiateUpload = 2,
    /// Upload segment request
    ReqUploadSegment = 3,
    /// Abort transfer
    Abort = 4,
}

impl TryFrom<u8> for ClientCommand {
    type Error = MessageError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        use ClientCommand::*;
        match value {
            0 => Ok(DownloadSegment),
            1 => Ok(InitiateDownload),
            2 => Ok(InitiateUpload),
            3 => Ok(ReqUploadSegment),
            4 => Ok(Abort),
            _ => UnexpectedSdoCommandSnafu { value }.fail(),
        }
    }
}

/// Server command specifiers (top three bits of a response command byte)
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum ServerCommand {
    /// Upload segment response
    SegmentUpload = 0,
    /// Download segment confirmation
    SegmentDownload = 1,
    /// Initiate upload response
    Upload = 2,
    /// Acknowledge a download command
    Download = 3,
    /// Abort transfer
    Abort = 4,
}

impl TryFrom<u8> for ServerCommand {
    type Error = MessageError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        use ServerCommand::*;
        match value {
            0 => Ok(SegmentUpload),
            1 => Ok(SegmentDownload),
            2 => Ok(Upload),
            3 => Ok(Download),
            4 => Ok(Abort),
            _ => UnexpectedSdoCommandSnafu { value }.fail(),
        }
    }
}

fn put_mux(buf: &mut [u8; 8], index: u16, sub: u8) {
    buf[1..3].copy_from_slice(&index.to_le_bytes());
    buf[3] = sub;
}

fn get_mux(buf: &[u8]) -> (u16, u8) {
    (u16::from_le_bytes([buf[1], buf[2]]), buf[3])
}

fn tail4(buf: &[u8]) -> [u8; 4] {
    [buf[4], buf[5], buf[6], buf[7]]
}

fn tail7(buf: &[u8]) -> [u8; 7] {
    [buf[1], buf[2], buf[3], buf[4], buf[5], buf[6], buf[7]]
}

/// A request sent from an SDO client to a server
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SdoRequest {
    /// Start a download
    InitiateDownload {
        /// Number of unused bytes in data (valid when e and s are set)
        n: u8,
        /// Expedited
        e: bool,
        /// Size indicated
        s: bool,
        /// Object index
        index: u16,
        /// Object sub-index
        sub: u8,
        /// Value on expedited, size when e=0 and s=1
        data: [u8; 4],
    },
    /// One segment of a segmented download
    DownloadSegment {
        /// Toggle flag
        t: bool,
        /// Number of unused bytes in data
        n: u8,
        /// When set, indicates there are no more segments to be sent
        c: bool,
        /// Segment data
        data: [u8; 7],
    },
    /// Start an upload
    InitiateUpload {
        /// Object index
        index: u16,
        /// Object sub-index
        sub: u8,
    },
    /// Request the next upload segment
    ReqUploadSegment {
        /// Toggle flag
        t: bool,
    },
    /// Abort the transfer
    Abort {
        /// Object index
        index: u16,
        /// Object sub-index
        sub: u8,
        /// Abort code
        abort_code: u32,
    },
}

impl SdoRequest {
    /// Create an abort message
    pub fn abort(index: u16, sub: u8, abort_code: AbortCode) -> Self {
        SdoRequest::Abort {
            index,
            sub,
            abort_code: abort_code.raw(),
        }
    }

    /// Create an initiate download message for a segmented transfer
    pub fn initiate_download(index: u16, sub: u8, size: Option<u32>) -> Self {
        SdoRequest::InitiateDownload {
            n: 0,
            e: false,
            s: size.is_some(),
            index,
            sub,
            data: size.unwrap_or(0).to_le_bytes(),
        }
    }

    /// Create a download segment message
    ///
    /// At most 7 bytes of `segment_data` are used.
    pub fn download_segment(toggle: bool, last_segment: bool, segment_data: &[u8]) -> Self {
        let len = segment_data.len().min(7);
        let mut data = [0; 7];
        data[0..len].copy_from_slice(&segment_data[0..len]);
        SdoRequest::DownloadSegment {
            t: toggle,
            n: 7 - len as u8,
            c: last_segment,
            data,
        }
    }

    /// Create an expedited download message
    ///
    /// At most 4 bytes of `data` are used.
    pub fn expedited_download(index: u16, sub: u8, data: &[u8]) -> Self {
        let len = data.len().min(4);
        let mut msg_data = [0; 4];
        msg_data[0..len].copy_from_slice(&data[0..len]);

        SdoRequest::InitiateDownload {
            n: (4 - len) as u8,
            e: true,
            s: true,
            index,
            sub,
            data: msg_data,
        }
    }

    /// Create an initiate upload message
    pub fn initiate_upload(index: u16, sub: u8) -> Self {
        SdoRequest::InitiateUpload { index, sub }
    }

    /// Create an upload segment request
    pub fn upload_segment_request(toggle: bool) -> Self {
        SdoRequest::ReqUploadSegment { t: toggle }
    }

    /// Encode the 8 byte frame payload
    pub fn to_bytes(self) -> [u8; 8] {
        let mut payload = [0; 8];

        match self {
            SdoRequest::InitiateDownload {
                n,
                e,
                s,
                index,
                sub,
                data,
            } => {
                payload[0] = (ClientCommand::InitiateDownload as u8) << 5
                    | ((n & 0x3) << 2)
                    | ((e as u8) << 1)
                    | s as u8;
                put_mux(&mut payload, index, sub);
                payload[4..8].copy_from_slice(&data);
            }
            SdoRequest::DownloadSegment { t, n, c, data } => {
                payload[0] = (ClientCommand::DownloadSegment as u8) << 5
                    | (t as u8) << 4
                    | (n & 7) << 1
                    | (c as u8);
                payload[1..8].copy_from_slice(&data);
            }
            SdoRequest::InitiateUpload { index, sub } => {
                payload[0] = (ClientCommand::InitiateUpload as u8) << 5;
                put_mux(&mut payload, index, sub);
            }
            SdoRequest::ReqUploadSegment { t } => {
                payload[0] = (ClientCommand::ReqUploadSegment as u8) << 5 | (t as u8) << 4;
            }
            SdoRequest::Abort {
                index,
                sub,
                abort_code,
            } => {
                payload[0] = (ClientCommand::Abort as u8) << 5;
                put_mux(&mut payload, index, sub);
                payload[4..8].copy_from_slice(&abort_code.to_le_bytes());
            }
        }
        payload
    }
}

impl TryFrom<&[u8]> for SdoRequest {
    type Error = MessageError;

    fn try_from(value: &[u8]) -> Result<Self, Self::Error> {
        if value.len() < 8 {
            return MessageTooShortSnafu.fail();
        }
        let ccs: ClientCommand = (value[0] >> 5).try_into()?;
        let (index, sub) = get_mux(value);

        match ccs {
            ClientCommand::DownloadSegment => Ok(SdoRequest::DownloadSegment {
                t: value[0] & SDO_TOGGLE != 0,
                n: (value[0] >> 1) & 0x7,
                c: value[0] & SDO_C != 0,
                data: tail7(value),
            }),
            ClientCommand::InitiateDownload => Ok(SdoRequest::InitiateDownload {
                n: (value[0] >> 2) & 0x3,
                e: value[0] & SDO_E != 0,
                s: value[0] & SDO_S != 0,
                index,
                sub,
                data: tail4(value),
            }),
            ClientCommand::InitiateUpload => Ok(SdoRequest::InitiateUpload { index, sub }),
            ClientCommand::ReqUploadSegment => Ok(SdoRequest::ReqUploadSegment {
                t: value[0] & SDO_TOGGLE != 0,
            }),
            ClientCommand::Abort => Ok(SdoRequest::Abort {
                index,
                sub,
                abort_code: u32::from_le_bytes(tail4(value)),
            }),
        }
    }
}

/// A response sent from an SDO server to a client
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SdoResponse {
    /// Response to an initiate upload
    ConfirmUpload {
        /// Number of unused bytes in data
        n: u8,
        /// Expedited flag
        e: bool,
        /// Size flag
        s: bool,
        /// Object index
        index: u16,
        /// Object sub-index
        sub: u8,
        /// Value if e=1, or size if s=1
        data: [u8; 4],
    },
    /// One segment of a segmented upload
    UploadSegment {
        /// Toggle flag
        t: bool,
        /// Number of unused bytes in data
        n: u8,
        /// Set on the last segment
        c: bool,
        /// Segment data
        data: [u8; 7],
    },
    /// Response to an initiate download
    ConfirmDownload {
        /// Object index
        index: u16,
        /// Object sub-index
        sub: u8,
    },
    /// Response to a download segment
    ConfirmDownloadSegment {
        /// Toggle flag
        t: bool,
    },
    /// Abort the transfer
    Abort {
        /// Object index
        index: u16,
        /// Object sub-index
        sub: u8,
        /// Abort code
        abort_code: u32,
    },
}

impl TryFrom<&[u8]> for SdoResponse {
    type Error = MessageError;

    fn try_from(value: &[u8]) -> Result<Self, Self::Error> {
        if value.len() < 8 {
            return MessageTooShortSnafu.fail();
        }
        let command: ServerCommand = (value[0] >> 5).try_into()?;
        let (index, sub) = get_mux(value);
        match command {
            ServerCommand::SegmentUpload => Ok(SdoResponse::UploadSegment {
                t: value[0] & SDO_TOGGLE != 0,
                n: (value[0] >> 1) & 7,
                c: value[0] & SDO_C != 0,
                data: tail7(value),
            }),
            ServerCommand::SegmentDownload => Ok(SdoResponse::ConfirmDownloadSegment {
                t: value[0] & SDO_TOGGLE != 0,
            }),
            ServerCommand::Upload => Ok(SdoResponse::ConfirmUpload {
                n: (value[0] >> 2) & 0x3,
                e: value[0] & SDO_E != 0,
                s: value[0] & SDO_S != 0,
                index,
                sub,
                data: tail4(value),
            }),
            ServerCommand::Download => Ok(SdoResponse::ConfirmDownload { index, sub }),
            ServerCommand::Abort => Ok(SdoResponse::Abort {
                index,
                sub,
                abort_code: u32::from_le_bytes(tail4(value)),
            }),
        }
    }
}

impl SdoResponse {
    /// Create an expedited upload response
    ///
    /// At most 4 bytes of `data` are used.
    pub fn expedited_upload(index: u16, sub: u8, data: &[u8]) -> SdoResponse {
        let len = data.len().min(4);
        let mut msg_data = [0; 4];
        msg_data[0..len].copy_from_slice(&data[0..len]);

        SdoResponse::ConfirmUpload {
            index,
            sub,
            e: true,
            s: true,
            n: 4 - len as u8,
            data: msg_data,
        }
    }

    /// Create a segmented upload response announcing the size
    pub fn upload_acknowledge(index: u16, sub: u8, size: u32) -> SdoResponse {
        SdoResponse::ConfirmUpload {
            n: 0,
            e: false,
            s: true,
            index,
            sub,
            data: size.to_le_bytes(),
        }
    }

    /// Create an upload segment
    ///
    /// At most 7 bytes of `data` are used.
    pub fn upload_segment(t: bool, c: bool, data: &[u8]) -> SdoResponse {
        let len = data.len().min(7);
        let mut buf = [0; 7];
        buf[0..len].copy_from_slice(&data[0..len]);
        SdoResponse::UploadSegment {
            t,
            n: (7 - len) as u8,
            c,
            data: buf,
        }
    }

    /// Create a download acknowledge
    pub fn download_acknowledge(index: u16, sub: u8) -> SdoResponse {
        SdoResponse::ConfirmDownload { index, sub }
    }

    /// Create a download segment acknowledge
    pub fn download_segment_acknowledge(t: bool) -> SdoResponse {
        SdoResponse::ConfirmDownloadSegment { t }
    }

    /// Create an abort
    pub fn abort(index: u16, sub: u8, abort_code: AbortCode) -> SdoResponse {
        SdoResponse::Abort {
            index,
            sub,
            abort_code: abort_code.raw(),
        }
    }

    /// Encode the 8 byte frame payload
    pub fn to_bytes(self) -> [u8; 8] {
        let mut payload = [0; 8];

        match self {
            SdoResponse::ConfirmUpload {
                n,
                e,
                s,
                index,
                sub,
                data,
            } => {
                payload[0] = (ServerCommand::Upload as u8) << 5
                    | ((n & 0x3) << 2)
                    | ((e as u8) << 1)
                    | (s as u8);
                put_mux(&mut payload, index, sub);
                payload[4..8].copy_from_slice(&data);
            }
            SdoResponse::ConfirmDownload { index, sub } => {
                payload[0] = (ServerCommand::Download as u8) << 5;
                put_mux(&mut payload, index, sub);
            }
            SdoResponse::UploadSegment { t, n, c, data } => {
                payload[0] =
                    (ServerCommand::SegmentUpload as u8) << 5 | (t as u8) << 4 | (n & 7) << 1 | c as u8;
                payload[1..8].copy_from_slice(&data);
            }
            SdoResponse::Abort {
                index,
                sub,
                abort_code,
            } => {
                payload[0] = (ServerCommand::Abort as u8) << 5;
                put_mux(&mut payload, index, sub);
                payload[4..8].copy_from_slice(&abort_code.to_le_bytes());
            }
            SdoResponse::ConfirmDownloadSegment { t } => {
                payload[0] = (ServerCommand::SegmentDownload as u8) << 5 | (t as u8) << 4;
            }
        }
        payload
    }
}
