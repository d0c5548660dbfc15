//! Synthetic capture construction.
//!
//! Encodes records the way the capture tool lays them out, plus helpers
//! that emit whole AW USB exchanges, FEL operations and fastboot commands.
//! Used by the test suites and handy for reproducing a decoder problem
//! without a real capture.

use byteorder::{ByteOrder, LittleEndian};

use crate::protocol::constants::*;
use crate::protocol::header::{FelRequest, FelVersionReply, SubmitHeader};

/// Status block the device returns after every AW USB exchange.
const USB_STATUS: &[u8; 13] = b"AWUS\0\0\0\0\0\0\0\0\0";
/// Status block returned after every FEL request.
const FEL_STATUS: &[u8; 8] = &[0xFF, 0xFF, 0, 0, 0, 0, 0, 0];

/// Builder for capture buffers.
#[derive(Debug, Clone)]
pub struct CaptureBuilder {
    buf: Vec<u8>,
    version: u8,
}

impl Default for CaptureBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl CaptureBuilder {
    pub fn new() -> Self {
        Self {
            buf: Vec::new(),
            version: MAX_FORMAT_VERSION,
        }
    }

    /// Format version stamped on subsequent records.
    pub fn version(&mut self, version: u8) -> &mut Self {
        self.version = version;
        self
    }

    /// Append a record with explicit header fields. `l2` is the payload length.
    pub fn raw_record(
        &mut self,
        command: u8,
        compressed: u8,
        version: u8,
        l1: u32,
        payload: &[u8],
    ) -> &mut Self {
        self.header(l1, command, compressed, version, payload.len() as u32);
        self.buf.extend_from_slice(payload);
        self
    }

    fn header(&mut self, l1: u32, command: u8, compressed: u8, version: u8, l2: u32) {
        let mut header = [0u8; RECORD_HEADER_SIZE];
        LittleEndian::write_u32(&mut header[0..4], l1);
        header[4..8].copy_from_slice(&[command, compressed, version, 0]);
        LittleEndian::write_u32(&mut header[8..12], l2);
        self.buf.extend_from_slice(&header);
    }

    pub fn marker(&mut self, stream_id: u32, stream_len: u32) -> &mut Self {
        let version = self.version;
        self.header(stream_id, CMD_SESSION_MARKER, 0, version, stream_len);
        self
    }

    pub fn comment(&mut self, text: &str) -> &mut Self {
        let version = self.version;
        self.raw_record(CMD_COMMENT, 0, version, 0, text.as_bytes())
    }

    /// Session marker followed by its descriptive comment.
    pub fn session(&mut self, comment: &str) -> &mut Self {
        self.marker(0, 0).comment(comment)
    }

    pub fn expect_read(&mut self, data: &[u8]) -> &mut Self {
        let version = self.version;
        self.raw_record(CMD_EXPECT_READ, 0, version, 0, data)
    }

    pub fn expect_write(&mut self, data: &[u8]) -> &mut Self {
        let version = self.version;
        self.raw_record(CMD_EXPECT_WRITE, 0, version, 0, data)
    }

    pub fn delay(&mut self, microseconds: u32) -> &mut Self {
        let version = self.version;
        self.header(microseconds, CMD_DELAY, 0, version, 0);
        self
    }

    pub fn manifest(&mut self, text: &str) -> &mut Self {
        let version = self.version;
        self.raw_record(CMD_MANIFEST, 0, version, 0, text.as_bytes())
    }

    // ------------------------------------------------------------------
    // AW USB transport
    // ------------------------------------------------------------------

    /// Bulk write exchange: submit, one ExpectWrite per chunk, status.
    pub fn usb_write(&mut self, chunks: &[&[u8]]) -> &mut Self {
        let total: usize = chunks.iter().map(|c| c.len()).sum();
        let submit = SubmitHeader::new(total as u32, USB_REQUEST_WRITE).to_bytes();
        self.expect_write(&submit);
        for chunk in chunks {
            self.expect_write(chunk);
        }
        self.expect_read(USB_STATUS)
    }

    /// Bulk read exchange: submit, one ExpectRead per chunk, status.
    pub fn usb_read(&mut self, chunks: &[&[u8]]) -> &mut Self {
        let total: usize = chunks.iter().map(|c| c.len()).sum();
        let submit = SubmitHeader::new(total as u32, USB_REQUEST_READ).to_bytes();
        self.expect_write(&submit);
        for chunk in chunks {
            self.expect_read(chunk);
        }
        self.expect_read(USB_STATUS)
    }

    // ------------------------------------------------------------------
    // FEL
    // ------------------------------------------------------------------

    pub fn fel_request(&mut self, request: u32, address: u32, length: u32) -> &mut Self {
        let bytes = FelRequest::new(request, address, length).to_bytes();
        self.usb_write(&[&bytes[..]])
    }

    pub fn fel_status(&mut self) -> &mut Self {
        self.usb_read(&[&FEL_STATUS[..]])
    }

    pub fn fel_version(
        &mut self,
        soc_id: u32,
        protocol_version: u16,
        scratchpad: u32,
    ) -> &mut Self {
        let reply = FelVersionReply {
            soc_id,
            protocol_version,
            scratchpad_address: scratchpad,
        }
        .to_bytes();
        self.fel_request(FEL_REQUEST_VERSION, 0, 0)
            .usb_read(&[&reply[..]])
            .fel_status()
    }

    pub fn fel_write(&mut self, address: u32, chunks: &[&[u8]]) -> &mut Self {
        let total: usize = chunks.iter().map(|c| c.len()).sum();
        self.fel_request(FEL_REQUEST_WRITE, address, total as u32)
            .usb_write(chunks)
            .fel_status()
    }

    pub fn fel_execute(&mut self, address: u32) -> &mut Self {
        self.fel_request(FEL_REQUEST_EXECUTE, address, 0)
            .fel_status()
    }

    pub fn fel_read(&mut self, address: u32, chunks: &[&[u8]]) -> &mut Self {
        let total: usize = chunks.iter().map(|c| c.len()).sum();
        self.fel_request(FEL_REQUEST_READ, address, total as u32)
            .usb_read(chunks)
            .fel_status()
    }

    // ------------------------------------------------------------------
    // Fastboot
    // ------------------------------------------------------------------

    /// Plain command followed by the device's OKAY.
    pub fn fastboot_command(&mut self, text: &str) -> &mut Self {
        self.expect_write(text.as_bytes()).expect_read(b"OKAY")
    }

    /// `download:` handshake, data writes and the final OKAY.
    pub fn fastboot_download(&mut self, chunks: &[&[u8]]) -> &mut Self {
        let total: usize = chunks.iter().map(|c| c.len()).sum();
        self.expect_write(format!("download:{total:08x}").as_bytes())
            .expect_read(format!("DATA{total:08x}").as_bytes());
        for chunk in chunks {
            self.expect_write(chunk);
        }
        self.expect_read(b"OKAY")
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn build(&self) -> Vec<u8> {
        self.buf.clone()
    }
}
