//! SDO client
//!
//! One transfer may be in flight at a time. A transfer is started with [`Network::sdo_read`] or
//! [`Network::sdo_write`], progresses as server responses are processed, and leaves its outcome
//! to be collected with [`Network::take_sdo_client_result`].

use costack_common::messages::{CanId, CanMessage, SDO_REQ_BASE};
use costack_common::sdo::{AbortCode, SdoRequest, SdoResponse};
use costack_common::traits::CanChannel;
use costack_common::util::is_expired;
use defmt_or_log::warn;
use heapless::Vec;
use snafu::Snafu;

use crate::config::SDO_BUFFER_SIZE;
use crate::Network;

/// Data read by an SDO upload
pub type SdoData = Vec<u8, SDO_BUFFER_SIZE>;

/// The outcome of a client transfer
///
/// A successful write completes with an empty buffer.
pub type SdoClientResult = Result<SdoData, SdoClientError>;

/// Reasons a client transfer can fail
#[derive(Debug, Clone, Copy, PartialEq, Eq, Snafu)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SdoClientError {
    /// Malformed response, or data which does not fit the transfer buffer
    #[snafu(display("SDO protocol error"))]
    Error,
    /// The server repeated a toggle bit
    #[snafu(display("SDO toggle error"))]
    Toggle,
    /// The server did not respond in time
    #[snafu(display("SDO timeout"))]
    Timeout,
    /// The server sent an unexpected command
    #[snafu(display("Unexpected SDO response"))]
    Unknown,
    /// The server aborted the transfer
    #[snafu(display("SDO server aborted with {code:#010x}"))]
    ServerAbort {
        /// Abort code sent by the server
        code: u32,
    },
    /// Another client transfer is already in progress
    #[snafu(display("SDO client busy"))]
    Busy,
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
enum Phase {
    #[default]
    Idle,
    Upload,
    Download,
}

#[derive(Default)]
#[allow(missing_debug_implementations)]
pub(crate) struct SdoClient {
    phase: Phase,
    node: u8,
    index: u16,
    sub: u8,
    toggle: bool,
    timestamp: u32,
    /// Download send position
    offset: usize,
    buffer: SdoData,
    result: Option<SdoClientResult>,
}

impl<C: CanChannel> Network<C> {
    fn sdo_client_begin(&mut self, node: u8, index: u16, sub: u8) -> Result<(), SdoClientError> {
        let client = &mut self.sdo_client;
        if client.phase != Phase::Idle {
            return Err(SdoClientError::Busy);
        }
        client.node = node;
        client.index = index;
        client.sub = sub;
        client.toggle = false;
        client.offset = 0;
        client.timestamp = self.now;
        client.buffer.clear();
        client.result = None;
        Ok(())
    }

    /// Start reading `index:sub` from `node`
    pub fn sdo_read(&mut self, node: u8, index: u16, sub: u8) -> Result<(), SdoClientError> {
        self.sdo_client_begin(node, index, sub)?;
        self.sdo_client.phase = Phase::Upload;
        self.sdo_client_send(SdoRequest::initiate_upload(index, sub));
        Ok(())
    }

    /// Start writing `data` to `index:sub` on `node`
    ///
    /// Up to 4 bytes are sent expedited.
    pub fn sdo_write(
        &mut self,
        node: u8,
        index: u16,
        sub: u8,
        data: &[u8],
    ) -> Result<(), SdoClientError> {
        if data.len() > SDO_BUFFER_SIZE {
            return Err(SdoClientError::Error);
        }
        self.sdo_client_begin(node, index, sub)?;
        let client = &mut self.sdo_client;
        client.phase = Phase::Download;
        // Cannot fail, the length was checked above
        let _ = client.buffer.extend_from_slice(data);

        let req = if data.len() <= 4 {
            client.offset = data.len();
            SdoRequest::expedited_download(index, sub, data)
        } else {
            SdoRequest::initiate_download(index, sub, Some(data.len() as u32))
        };
        self.sdo_client_send(req);
        Ok(())
    }

    /// Returns true while a client transfer is in progress
    pub fn sdo_client_busy(&self) -> bool {
        self.sdo_client.phase != Phase::Idle
    }

    /// Collect the outcome of the last completed client transfer
    pub fn take_sdo_client_result(&mut self) -> Option<SdoClientResult> {
        self.sdo_client.result.take()
    }

    fn sdo_client_send(&mut self, req: SdoRequest) {
        self.sdo_client.timestamp = self.now;
        let id = CanId::std(SDO_REQ_BASE + self.sdo_client.node as u16);
        self.send(CanMessage::new(id, &req.to_bytes()));
    }

    fn sdo_client_finish(&mut self, result: SdoClientResult) {
        self.sdo_client.phase = Phase::Idle;
        self.sdo_client.result = Some(result);
    }

    /// Abort the transfer towards the server and fail it with `error`
    fn sdo_client_fail(&mut self, code: AbortCode, error: SdoClientError) {
        let (index, sub) = (self.sdo_client.index, self.sdo_client.sub);
        warn!("SDO client abort {:x}:{:x}: {:x}", index, sub, code.raw());
        self.sdo_client_send(SdoRequest::abort(index, sub, code));
        self.sdo_client_finish(Err(error));
    }

    /// Send the next download segment
    fn sdo_client_segment(&mut self) {
        let client = &mut self.sdo_client;
        let start = client.offset;
        let end = (start + 7).min(client.buffer.len());
        let req = SdoRequest::download_segment(
            client.toggle,
            end == client.buffer.len(),
            &client.buffer[start..end],
        );
        client.offset = end;
        self.sdo_client_send(req);
    }

    /// Handle a frame from an SDO server
    pub(crate) fn sdo_client_rx(&mut self, node: u8, msg: &CanMessage) {
        if self.sdo_client.phase == Phase::Idle || node != self.sdo_client.node {
            return;
        }
        if msg.dlc != 8 {
            self.sdo_client_fail(AbortCode::General, SdoClientError::Error);
            return;
        }
        let resp = match SdoResponse::try_from(msg.data()) {
            Ok(resp) => resp,
            Err(_) => {
                self.sdo_client_fail(AbortCode::Unknown, SdoClientError::Unknown);
                return;
            }
        };
        self.sdo_client.timestamp = self.now;

        match (self.sdo_client.phase, resp) {
            (_, SdoResponse::Abort { abort_code, .. }) => {
                warn!("SDO server abort {:x}", abort_code);
                self.sdo_client_finish(Err(SdoClientError::ServerAbort { code: abort_code }));
            }
            (
                Phase::Upload,
                SdoResponse::ConfirmUpload {
                    n,
                    e: true,
                    s,
                    data,
                    ..
                },
            ) => {
                let len = if s { 4 - n as usize } else { 4 };
                let mut buffer = SdoData::new();
                let _ = buffer.extend_from_slice(&data[..len]);
                self.sdo_client_finish(Ok(buffer));
            }
            (Phase::Upload, SdoResponse::ConfirmUpload { e: false, s, data, .. }) => {
                if s && u32::from_le_bytes(data) as usize > SDO_BUFFER_SIZE {
                    self.sdo_client_fail(AbortCode::OutOfMemory, SdoClientError::Error);
                    return;
                }
                self.sdo_client_send(SdoRequest::upload_segment_request(false));
            }
            (Phase::Upload, SdoResponse::UploadSegment { t, n, c, data }) => {
                if t != self.sdo_client.toggle {
                    self.sdo_client_fail(AbortCode::Toggle, SdoClientError::Toggle);
                    return;
                }
                let len = 7 - (n as usize).min(7);
                if self.sdo_client.buffer.extend_from_slice(&data[..len]).is_err() {
                    self.sdo_client_fail(AbortCode::OutOfMemory, SdoClientError::Error);
                    return;
                }
                self.sdo_client.toggle = !t;
                if c {
                    let buffer = core::mem::take(&mut self.sdo_client.buffer);
                    self.sdo_client_finish(Ok(buffer));
                } else {
                    self.sdo_client_send(SdoRequest::upload_segment_request(!t));
                }
            }
            (Phase::Download, SdoResponse::ConfirmDownload { .. }) => {
                if self.sdo_client.offset == self.sdo_client.buffer.len() {
                    self.sdo_client_finish(Ok(SdoData::new()));
                } else {
                    self.sdo_client_segment();
                }
            }
            (Phase::Download, SdoResponse::ConfirmDownloadSegment { t }) => {
                if t != self.sdo_client.toggle {
                    self.sdo_client_fail(AbortCode::Toggle, SdoClientError::Toggle);
                    return;
                }
                self.sdo_client.toggle = !t;
                if self.sdo_client.offset == self.sdo_client.buffer.len() {
                    self.sdo_client_finish(Ok(SdoData::new()));
                } else {
                    self.sdo_client_segment();
                }
            }
            _ => self.sdo_client_fail(AbortCode::Unknown, SdoClientError::Unknown),
        }
    }

    pub(crate) fn sdo_client_timer(&mut self) {
        let client = &self.sdo_client;
        let timeout_us = self.sdo_timeout_ms.saturating_mul(1000);
        if client.phase != Phase::Idle && is_expired(client.timestamp, timeout_us, self.now)
        {
            self.sdo_client_fail(AbortCode::Timeout, SdoClientError::Timeout);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{test_network, TestChannel};

    const SERVER: u8 = 3;

    fn respond(net: &mut Network<TestChannel>, resp: SdoResponse) -> Option<SdoRequest> {
        net.channel.sent.clear();
        let msg = CanMessage::new(CanId::Std(0x580 + SERVER as u16), &resp.to_bytes());
        net.process_frame(net.now, &msg);
        let req = net.channel.sent.first()?;
        assert_eq!(CanId::Std(0x600 + SERVER as u16), req.id());
        Some(SdoRequest::try_from(req.data()).unwrap())
    }

    fn last_request(net: &Network<TestChannel>) -> SdoRequest {
        let req = net.channel.sent.last().unwrap();
        assert_eq!(CanId::Std(0x600 + SERVER as u16), req.id());
        SdoRequest::try_from(req.data()).unwrap()
    }

    fn started() -> Network<TestChannel> {
        let mut net = test_network();
        net.start(0);
        net
    }

    #[test]
    fn test_expedited_read() {
        let mut net = started();
        net.sdo_read(SERVER, 0x1000, 0).unwrap();
        assert_eq!(SdoRequest::initiate_upload(0x1000, 0), last_request(&net));
        assert_eq!(Err(SdoClientError::Busy), net.sdo_read(SERVER, 0x1000, 0));

        respond(
            &mut net,
            SdoResponse::expedited_upload(0x1000, 0, &[0x92, 0x01, 0x42, 0x00]),
        );
        let data = net.take_sdo_client_result().unwrap().unwrap();
        assert_eq!(&[0x92, 0x01, 0x42, 0x00], data.as_slice());
        assert!(!net.sdo_client_busy());
        assert!(net.take_sdo_client_result().is_none());
    }

    #[test]
    fn test_segmented_read() {
        let mut net = started();
        net.sdo_read(SERVER, 0x1008, 0).unwrap();
        assert_eq!(
            Some(SdoRequest::upload_segment_request(false)),
            respond(&mut net, SdoResponse::upload_acknowledge(0x1008, 0, 10))
        );
        assert_eq!(
            Some(SdoRequest::upload_segment_request(true)),
            respond(&mut net, SdoResponse::upload_segment(false, false, b"costack"))
        );
        assert_eq!(
            None,
            respond(&mut net, SdoResponse::upload_segment(true, true, b"-rs"))
        );
        let data = net.take_sdo_client_result().unwrap().unwrap();
        assert_eq!(b"costack-rs", data.as_slice());
    }

    #[test]
    fn test_read_toggle_error() {
        let mut net = started();
        net.sdo_read(SERVER, 0x1008, 0).unwrap();
        respond(&mut net, SdoResponse::upload_acknowledge(0x1008, 0, 10));
        assert_eq!(
            Some(SdoRequest::abort(0x1008, 0, AbortCode::Toggle)),
            respond(&mut net, SdoResponse::upload_segment(true, false, b"costack"))
        );
        assert_eq!(
            Some(Err(SdoClientError::Toggle)),
            net.take_sdo_client_result()
        );
    }

    #[test]
    fn test_expedited_write() {
        let mut net = started();
        net.sdo_write(SERVER, 0x2000, 0, &[0x34, 0x12]).unwrap();
        assert_eq!(
            SdoRequest::expedited_download(0x2000, 0, &[0x34, 0x12]),
            last_request(&net)
        );
        respond(&mut net, SdoResponse::download_acknowledge(0x2000, 0));
        assert_eq!(Some(Ok(SdoData::new())), net.take_sdo_client_result());
    }

    #[test]
    fn test_segmented_write() {
        // An exact multiple of 7 bytes ends with a full segment carrying the C bit
        let data: std::vec::Vec<u8> = (0..14).collect();
        let mut net = started();
        net.sdo_write(SERVER, 0x2004, 0, &data).unwrap();
        assert_eq!(
            SdoRequest::initiate_download(0x2004, 0, Some(14)),
            last_request(&net)
        );
        assert_eq!(
            Some(SdoRequest::download_segment(false, false, &data[..7])),
            respond(&mut net, SdoResponse::download_acknowledge(0x2004, 0))
        );
        assert_eq!(
            Some(SdoRequest::download_segment(true, true, &data[7..])),
            respond(&mut net, SdoResponse::download_segment_acknowledge(false))
        );
        assert_eq!(
            None,
            respond(&mut net, SdoResponse::download_segment_acknowledge(true))
        );
        assert_eq!(Some(Ok(SdoData::new())), net.take_sdo_client_result());
    }

    #[test]
    fn test_server_abort() {
        let mut net = started();
        net.sdo_write(SERVER, 0x2000, 0, &[1, 2, 3]).unwrap();
        assert_eq!(
            None,
            respond(&mut net, SdoResponse::abort(0x2000, 0, AbortCode::Length))
        );
        assert_eq!(
            Some(Err(SdoClientError::ServerAbort {
                code: AbortCode::Length.raw()
            })),
            net.take_sdo_client_result()
        );
    }

    #[test]
    fn test_timeout() {
        let mut net = started();
        net.sdo_read(SERVER, 0x1000, 0).unwrap();
        net.channel.sent.clear();
        net.handle_periodic(99_999);
        assert!(net.sdo_client_busy());
        net.handle_periodic(100_000);
        // The abort goes to the server, not to this node
        assert_eq!(
            SdoRequest::abort(0x1000, 0, AbortCode::Timeout),
            last_request(&net)
        );
        assert_eq!(
            Some(Err(SdoClientError::Timeout)),
            net.take_sdo_client_result()
        );
    }

    #[test]
    fn test_ignores_other_servers() {
        let mut net = started();
        net.sdo_read(SERVER, 0x1000, 0).unwrap();
        let msg = CanMessage::new(
            CanId::Std(0x580 + SERVER as u16 + 1),
            &SdoResponse::expedited_upload(0x1000, 0, &[1]).to_bytes(),
        );
        net.process_frame(0, &msg);
        assert!(net.sdo_client_busy());
    }
}
