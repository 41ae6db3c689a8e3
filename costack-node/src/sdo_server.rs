//! SDO server
//!
//! Serves one transfer at a time, for whichever client is currently talking to the node.
//!
//! Values up to 8 bytes are read with a single [`Network::get_value`] call when an upload starts,
//! and written with a single [`Network::set_value`] call when a download completes, so a transfer
//! never observes or produces a torn value. Larger byte string entries are streamed through the
//! transfer buffer, which limits them to [`SDO_BUFFER_SIZE`] bytes.

use costack_common::constants::object_ids;
use costack_common::messages::{CanId, CanMessage, SDO_RESP_BASE};
use costack_common::objects::EntryFlags;
use costack_common::sdo::{AbortCode, SdoRequest, SdoResponse};
use costack_common::traits::CanChannel;
use costack_common::util::is_expired;
use defmt_or_log::warn;
use heapless::Vec;

use crate::config::SDO_BUFFER_SIZE;
use crate::nmt::State;
use crate::object_dict::{Entry, Object, Storage};
use crate::Network;

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
enum Phase {
    #[default]
    Idle,
    Upload,
    Download,
}

#[derive(Default)]
#[allow(missing_debug_implementations)]
pub(crate) struct SdoServer {
    phase: Phase,
    toggle: bool,
    index: u16,
    sub: u8,
    timestamp: u32,
    /// Upload read position
    offset: usize,
    buffer: Vec<u8, SDO_BUFFER_SIZE>,
}

impl SdoServer {
    fn begin(&mut self, index: u16, sub: u8) {
        self.reset();
        self.index = index;
        self.sub = sub;
    }

    fn reset(&mut self) {
        self.phase = Phase::Idle;
        self.toggle = false;
        self.offset = 0;
        self.buffer.clear();
    }
}

/// Reply to a sub index 0xFF request with the data type and object code of an object
fn structure_response(obj: &Object) -> SdoResponse {
    use costack_common::objects::ObjectCode;
    let datatype = match obj.code {
        ObjectCode::Var => obj.entries.first(),
        ObjectCode::Array => obj.entries.get(1),
        _ => None,
    }
    .map(|entry| entry.datatype as u32)
    .unwrap_or(0);
    let value = (datatype << 8) | obj.code as u32;
    SdoResponse::expedited_upload(obj.index, 0xFF, &value.to_le_bytes())
}

fn is_byte_string(obj: &Object, entry: &Entry) -> bool {
    matches!(entry.storage, Storage::Bytes(_)) && !obj.access.is_handler()
}

impl<C: CanChannel> Network<C> {
    pub(crate) fn sdo_server_rx(&mut self, msg: &CanMessage) {
        if !matches!(self.state, State::PreOp | State::Op) {
            return;
        }
        self.sdo_server.timestamp = self.now;

        let result = if msg.dlc != 8 {
            Err(AbortCode::General)
        } else {
            match SdoRequest::try_from(msg.data()) {
                Ok(req) => self.sdo_server_handle(req),
                Err(_) => Err(AbortCode::Unknown),
            }
        };

        match result {
            Ok(Some(resp)) => self.sdo_server_send(resp),
            Ok(None) => (),
            Err(code) => self.sdo_server_abort(code),
        }
    }

    fn sdo_server_handle(&mut self, req: SdoRequest) -> Result<Option<SdoResponse>, AbortCode> {
        let resp = match req {
            SdoRequest::InitiateUpload { index, sub } => self.sdo_upload_init(index, sub)?,
            SdoRequest::ReqUploadSegment { t } => self.sdo_upload_segment(t)?,
            SdoRequest::InitiateDownload {
                n,
                e,
                s,
                index,
                sub,
                data,
            } => self.sdo_download_init(index, sub, e, s, n, data)?,
            SdoRequest::DownloadSegment { t, n, c, data } => {
                self.sdo_download_segment(t, n, c, &data)?
            }
            SdoRequest::Abort {
                index,
                sub,
                abort_code,
            } => {
                warn!(
                    "SDO client aborted {:x}:{:x}: {:x}",
                    index, sub, abort_code
                );
                self.sdo_server.reset();
                return Ok(None);
            }
        };
        Ok(Some(resp))
    }

    fn sdo_upload_init(&mut self, index: u16, sub: u8) -> Result<SdoResponse, AbortCode> {
        self.sdo_server.begin(index, sub);
        let obj = self.find_object(index).ok_or(AbortCode::BadIndex)?;
        if sub == 0xFF {
            return Ok(structure_response(obj));
        }
        let entry = obj.find_entry(sub).ok_or(AbortCode::BadSubindex)?;
        if !entry.flags.contains(EntryFlags::READ) {
            return Err(AbortCode::AccessWo);
        }

        let size = entry.bytelength();
        if size <= 8 {
            let value = self.get_value(obj, entry, sub)?.to_le_bytes();
            if size <= 4 {
                return Ok(SdoResponse::expedited_upload(index, sub, &value[..size]));
            }
            self.sdo_server
                .buffer
                .extend_from_slice(&value[..size])
                .map_err(|_| AbortCode::OutOfMemory)?;
        } else {
            let mut buffer = core::mem::take(&mut self.sdo_server.buffer);
            let result = buffer
                .resize(size, 0)
                .map_err(|_| AbortCode::OutOfMemory)
                .and_then(|_| self.read_bytes(obj, entry, 0, &mut buffer));
            self.sdo_server.buffer = buffer;
            result?;
        }

        self.sdo_server.phase = Phase::Upload;
        Ok(SdoResponse::upload_acknowledge(index, sub, size as u32))
    }

    fn sdo_upload_segment(&mut self, toggle: bool) -> Result<SdoResponse, AbortCode> {
        let server = &mut self.sdo_server;
        if server.phase != Phase::Upload {
            return Err(AbortCode::Unknown);
        }
        if toggle != server.toggle {
            return Err(AbortCode::Toggle);
        }

        let remain = server.buffer.len() - server.offset;
        let len = remain.min(7);
        let complete = remain <= 7;
        let resp = SdoResponse::upload_segment(
            toggle,
            complete,
            &server.buffer[server.offset..server.offset + len],
        );
        server.offset += len;
        server.toggle = !toggle;
        if complete {
            server.reset();
        }
        Ok(resp)
    }

    fn sdo_download_init(
        &mut self,
        index: u16,
        sub: u8,
        expedited: bool,
        size_given: bool,
        n: u8,
        data: [u8; 4],
    ) -> Result<SdoResponse, AbortCode> {
        self.sdo_server.begin(index, sub);
        let (obj, entry) = self.sdo_writable_entry(index, sub)?;

        if expedited {
            let len = if size_given { 4 - n as usize } else { 4 };
            self.sdo_commit(obj, entry, sub, &data[..len])?;
            return Ok(SdoResponse::download_acknowledge(index, sub));
        }

        if size_given {
            let announced = u32::from_le_bytes(data) as usize;
            let size = entry.bytelength();
            if is_byte_string(obj, entry) {
                if announced > size {
                    return Err(AbortCode::LengthTooHigh);
                }
            } else if announced != size {
                return Err(AbortCode::Length);
            }
            if announced > SDO_BUFFER_SIZE {
                return Err(AbortCode::OutOfMemory);
            }
        }

        self.sdo_server.phase = Phase::Download;
        Ok(SdoResponse::download_acknowledge(index, sub))
    }

    fn sdo_download_segment(
        &mut self,
        toggle: bool,
        n: u8,
        complete: bool,
        data: &[u8; 7],
    ) -> Result<SdoResponse, AbortCode> {
        let server = &mut self.sdo_server;
        if server.phase != Phase::Download {
            return Err(AbortCode::Unknown);
        }
        if toggle != server.toggle {
            return Err(AbortCode::Toggle);
        }
        let len = 7 - (n as usize).min(7);
        server
            .buffer
            .extend_from_slice(&data[..len])
            .map_err(|_| AbortCode::OutOfMemory)?;
        server.toggle = !toggle;

        if complete {
            let (index, sub) = (server.index, server.sub);
            let buffer = core::mem::take(&mut server.buffer);
            server.reset();
            let (obj, entry) = self.sdo_writable_entry(index, sub)?;
            self.sdo_commit(obj, entry, sub, &buffer)?;
        }
        Ok(SdoResponse::download_segment_acknowledge(toggle))
    }

    fn sdo_writable_entry(
        &self,
        index: u16,
        sub: u8,
    ) -> Result<(&'static Object, &'static Entry), AbortCode> {
        let obj = self.find_object(index).ok_or(AbortCode::BadIndex)?;
        let entry = obj.find_entry(sub).ok_or(AbortCode::BadSubindex)?;
        if !entry.flags.contains(EntryFlags::WRITE) {
            return Err(AbortCode::AccessRo);
        }
        Ok((obj, entry))
    }

    /// Write a completed download to the dictionary
    fn sdo_commit(
        &mut self,
        obj: &'static Object,
        entry: &'static Entry,
        sub: u8,
        data: &[u8],
    ) -> Result<(), AbortCode> {
        let size = entry.bytelength();
        if is_byte_string(obj, entry) {
            if data.len() > size {
                return Err(AbortCode::LengthTooHigh);
            }
            self.write_bytes(obj, entry, 0, data)?;
            // Shorter strings are terminated
            if data.len() < size && entry.datatype.is_str() {
                self.write_bytes(obj, entry, data.len(), &[0])?;
            }
        } else {
            if data.len() != size || size > 8 {
                return Err(AbortCode::Length);
            }
            let mut value = [0u8; 8];
            value[..size].copy_from_slice(data);
            self.set_value(obj, entry, sub, u64::from_le_bytes(value))?;
        }

        if obj.index != object_ids::VERIFY_CONFIGURATION {
            self.verify.dirty = true;
        }
        Ok(())
    }

    fn sdo_server_send(&mut self, resp: SdoResponse) {
        let id = CanId::std(SDO_RESP_BASE + self.node as u16);
        self.send(CanMessage::new(id, &resp.to_bytes()));
    }

    fn sdo_server_abort(&mut self, code: AbortCode) {
        let (index, sub) = (self.sdo_server.index, self.sdo_server.sub);
        warn!("SDO abort {:x}:{:x}: {:x}", index, sub, code.raw());
        self.sdo_server.reset();
        self.sdo_server_send(SdoResponse::abort(index, sub, code));
    }

    pub(crate) fn sdo_server_timer(&mut self) {
        let server = &self.sdo_server;
        let timeout_us = self.sdo_timeout_ms.saturating_mul(1000);
        if server.phase != Phase::Idle && is_expired(server.timestamp, timeout_us, self.now)
        {
            self.sdo_server_abort(AbortCode::Timeout);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{test_network, TestChannel, DOMAIN_LEN, NAME_LEN, TEST_NODE};

    fn request(net: &mut Network<TestChannel>, req: SdoRequest) -> SdoResponse {
        request_at(net, 0, req)
    }

    fn request_at(net: &mut Network<TestChannel>, now: u32, req: SdoRequest) -> SdoResponse {
        net.channel.sent.clear();
        let msg = CanMessage::new(CanId::Std(0x600 + TEST_NODE as u16), &req.to_bytes());
        net.process_frame(now, &msg);
        assert_eq!(1, net.channel.sent.len());
        let resp = net.channel.sent[0];
        assert_eq!(CanId::Std(0x580 + TEST_NODE as u16), resp.id());
        SdoResponse::try_from(resp.data()).unwrap()
    }

    fn started() -> Network<TestChannel> {
        let mut net = test_network();
        net.start(0);
        net
    }

    fn upload(net: &mut Network<TestChannel>, index: u16, sub: u8) -> std::vec::Vec<u8> {
        let size = match request(net, SdoRequest::initiate_upload(index, sub)) {
            SdoResponse::ConfirmUpload {
                e: false, data, ..
            } => u32::from_le_bytes(data) as usize,
            other => panic!("unexpected {other:?}"),
        };
        let mut out = vec![];
        let mut toggle = false;
        loop {
            match request(net, SdoRequest::upload_segment_request(toggle)) {
                SdoResponse::UploadSegment { t, n, c, data } => {
                    assert_eq!(toggle, t);
                    out.extend_from_slice(&data[..7 - n as usize]);
                    if c {
                        break;
                    }
                }
                other => panic!("unexpected {other:?}"),
            }
            toggle = !toggle;
        }
        assert_eq!(size, out.len());
        out
    }

    fn download(net: &mut Network<TestChannel>, index: u16, sub: u8, data: &[u8]) {
        assert_eq!(
            SdoResponse::download_acknowledge(index, sub),
            request(
                net,
                SdoRequest::initiate_download(index, sub, Some(data.len() as u32))
            )
        );
        let mut toggle = false;
        let chunks: std::vec::Vec<&[u8]> = data.chunks(7).collect();
        for (i, chunk) in chunks.iter().enumerate() {
            let last = i == chunks.len() - 1;
            assert_eq!(
                SdoResponse::download_segment_acknowledge(toggle),
                request(net, SdoRequest::download_segment(toggle, last, chunk))
            );
            toggle = !toggle;
        }
    }

    #[test]
    fn test_expedited_upload() {
        let mut net = started();
        net.channel.sent.clear();
        let msg = CanMessage::new(
            CanId::Std(0x600 + TEST_NODE as u16),
            &[0x40, 0x00, 0x10, 0, 0, 0, 0, 0],
        );
        net.process_frame(0, &msg);
        assert_eq!(
            &[0x43, 0x00, 0x10, 0x00, 0x92, 0x01, 0x42, 0x00],
            net.channel.sent[0].data()
        );
    }

    #[test]
    fn test_upload_errors() {
        let mut net = started();
        assert_eq!(
            SdoResponse::abort(0x3000, 0, AbortCode::BadIndex),
            request(&mut net, SdoRequest::initiate_upload(0x3000, 0))
        );
        assert_eq!(
            SdoResponse::abort(0x2000, 1, AbortCode::BadSubindex),
            request(&mut net, SdoRequest::initiate_upload(0x2000, 1))
        );
        assert_eq!(
            SdoResponse::abort(0x2007, 0, AbortCode::AccessWo),
            request(&mut net, SdoRequest::initiate_upload(0x2007, 0))
        );
    }

    #[test]
    fn test_structure_query() {
        let mut net = started();
        // UInt32 array
        assert_eq!(
            SdoResponse::expedited_upload(0x2001, 0xFF, &[0x08, 0x07, 0, 0]),
            request(&mut net, SdoRequest::initiate_upload(0x2001, 0xFF))
        );
    }

    #[test]
    fn test_segmented_round_trip() {
        let mut net = started();
        let data: std::vec::Vec<u8> = (0..DOMAIN_LEN as u8).collect();
        download(&mut net, 0x2004, 0, &data);
        assert_eq!(data, upload(&mut net, 0x2004, 0));

        // A u64 goes through the segmented protocol as well
        download(&mut net, 0x2002, 0, &0x1122_3344_5566_7788u64.to_le_bytes());
        assert_eq!(0x1122_3344_5566_7788, net.read(0x2002, 0).unwrap());
        assert_eq!(
            0x1122_3344_5566_7788u64.to_le_bytes().to_vec(),
            upload(&mut net, 0x2002, 0)
        );
    }

    #[test]
    fn test_short_string_is_terminated() {
        let mut net = started();
        download(&mut net, 0x2003, 0, b"0123456789AB");
        download(&mut net, 0x2003, 0, b"costack");
        let name = upload(&mut net, 0x2003, 0);
        assert_eq!(NAME_LEN, name.len());
        assert_eq!(b"costack\0", &name[..8]);
    }

    #[test]
    fn test_toggle_error_leaves_entry_unmodified() {
        let mut net = started();
        download(&mut net, 0x2002, 0, &[1; 8]);

        request(&mut net, SdoRequest::initiate_download(0x2002, 0, Some(8)));
        request(&mut net, SdoRequest::download_segment(false, false, &[2; 7]));
        assert_eq!(
            SdoResponse::abort(0x2002, 0, AbortCode::Toggle),
            request(&mut net, SdoRequest::download_segment(false, true, &[2; 1]))
        );
        assert_eq!(u64::from_le_bytes([1; 8]), net.read(0x2002, 0).unwrap());

        // The transfer is gone
        assert_eq!(
            SdoResponse::abort(0x2002, 0, AbortCode::Unknown),
            request(&mut net, SdoRequest::download_segment(true, true, &[2; 1]))
        );
    }

    #[test]
    fn test_expedited_download() {
        let mut net = started();
        assert_eq!(
            SdoResponse::download_acknowledge(0x2000, 0),
            request(&mut net, SdoRequest::expedited_download(0x2000, 0, &[0x34, 0x12]))
        );
        assert_eq!(0x1234, net.read(0x2000, 0).unwrap());
        assert!(net.verify.dirty);

        assert_eq!(
            SdoResponse::abort(0x2000, 0, AbortCode::Length),
            request(&mut net, SdoRequest::expedited_download(0x2000, 0, &[1, 2, 3]))
        );
        assert_eq!(
            SdoResponse::abort(0x2005, 0, AbortCode::AccessRo),
            request(&mut net, SdoRequest::expedited_download(0x2005, 0, &[1]))
        );
        // Handler errors are passed on
        assert_eq!(
            SdoResponse::abort(0x1003, 0, AbortCode::Value),
            request(&mut net, SdoRequest::expedited_download(0x1003, 0, &[1]))
        );

        // Writing the verify configuration clears the dirty flag
        request(
            &mut net,
            SdoRequest::expedited_download(0x1020, 1, &[1, 0, 0, 0]),
        );
        assert!(!net.verify.dirty);
    }

    #[test]
    fn test_state_and_framing() {
        let mut net = test_network();
        let msg = CanMessage::new(
            CanId::Std(0x600 + TEST_NODE as u16),
            &SdoRequest::initiate_upload(0x1000, 0).to_bytes(),
        );
        // Not started
        net.process_frame(0, &msg);
        assert!(net.channel.sent.is_empty());

        net.start(0);
        net.channel.sent.clear();
        net.process_frame(0, &CanMessage::new(msg.id(), &msg.data()[..7]));
        assert_eq!(
            SdoResponse::abort(0, 0, AbortCode::General),
            SdoResponse::try_from(net.channel.sent[0].data()).unwrap()
        );

        // Command specifier 7 does not exist
        net.channel.sent.clear();
        net.process_frame(0, &CanMessage::new(msg.id(), &[0xE0, 0, 0, 0, 0, 0, 0, 0]));
        assert_eq!(
            SdoResponse::abort(0, 0, AbortCode::Unknown),
            SdoResponse::try_from(net.channel.sent[0].data()).unwrap()
        );

        // Segments without a transfer
        assert_eq!(
            SdoResponse::abort(0, 0, AbortCode::Unknown),
            request(&mut net, SdoRequest::upload_segment_request(false))
        );
    }

    #[test]
    fn test_timeout() {
        let mut net = started();
        request(&mut net, SdoRequest::initiate_upload(0x2004, 0));
        net.channel.sent.clear();
        net.handle_periodic(99_000);
        assert!(net.channel.sent.is_empty());
        net.handle_periodic(100_000);
        assert_eq!(
            SdoResponse::abort(0x2004, 0, AbortCode::Timeout),
            SdoResponse::try_from(net.channel.sent[0].data()).unwrap()
        );
    }

    #[test]
    fn test_long_timeout_saturates() {
        let mut net = started();
        net.sdo_timeout_ms = u32::MAX;
        request(&mut net, SdoRequest::initiate_upload(0x2004, 0));
        net.channel.sent.clear();
        net.handle_periodic(u32::MAX - 1);
        assert!(net.channel.sent.is_empty());
        net.handle_periodic(u32::MAX);
        assert_eq!(
            SdoResponse::abort(0x2004, 0, AbortCode::Timeout),
            SdoResponse::try_from(net.channel.sent[0].data()).unwrap()
        );
    }
}
