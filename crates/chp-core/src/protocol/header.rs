//! Fixed-offset structures carried inside capture payloads.

use byteorder::{ByteOrder, LittleEndian, ReadBytesExt};
use std::io::Cursor;
use thiserror::Error;

use super::constants::*;

#[derive(Error, Debug)]
pub enum HeaderError {
    #[error("Buffer too small: expected {expected}, got {actual}")]
    BufferTooSmall { expected: usize, actual: usize },
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

fn ensure_len(data: &[u8], expected: usize) -> Result<(), HeaderError> {
    if data.len() < expected {
        return Err(HeaderError::BufferTooSmall {
            expected,
            actual: data.len(),
        });
    }
    Ok(())
}

/// AW USB submit request (host -> device, 32 bytes on the wire).
///
/// Only the declared length and request code are meaningful to the decoder;
/// the signature and tag fields are ignored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubmitHeader {
    pub declared_length: u32,
    pub request: u16,
}

impl SubmitHeader {
    /// Bytes needed to reach the last decoded field.
    pub const MIN_SIZE: usize = 18;
    /// Size of the request as the flashing tool sends it.
    pub const WIRE_SIZE: usize = 32;

    pub fn new(declared_length: u32, request: u16) -> Self {
        Self {
            declared_length,
            request,
        }
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self, HeaderError> {
        ensure_len(data, Self::MIN_SIZE)?;
        let mut cursor = Cursor::new(data);
        cursor.set_position(SUBMIT_LENGTH_OFFSET);
        let declared_length = cursor.read_u32::<LittleEndian>()?;
        cursor.set_position(SUBMIT_REQUEST_OFFSET);
        let request = cursor.read_u16::<LittleEndian>()?;
        Ok(Self {
            declared_length,
            request,
        })
    }

    pub fn to_bytes(&self) -> [u8; Self::WIRE_SIZE] {
        let mut buf = [0u8; Self::WIRE_SIZE];
        buf[..4].copy_from_slice(b"AWUC");
        LittleEndian::write_u32(&mut buf[8..12], self.declared_length);
        LittleEndian::write_u16(&mut buf[16..18], self.request);
        buf
    }
}

/// FEL request (16 bytes: request, address, length, pad).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FelRequest {
    pub request: u32,
    pub address: u32,
    pub length: u32,
}

impl FelRequest {
    pub const MIN_SIZE: usize = 12;
    pub const WIRE_SIZE: usize = 16;

    pub fn new(request: u32, address: u32, length: u32) -> Self {
        Self {
            request,
            address,
            length,
        }
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self, HeaderError> {
        ensure_len(data, Self::MIN_SIZE)?;
        let mut cursor = Cursor::new(data);
        Ok(Self {
            request: cursor.read_u32::<LittleEndian>()?,
            address: cursor.read_u32::<LittleEndian>()?,
            length: cursor.read_u32::<LittleEndian>()?,
        })
    }

    pub fn to_bytes(&self) -> [u8; Self::WIRE_SIZE] {
        let mut buf = [0u8; Self::WIRE_SIZE];
        LittleEndian::write_u32(&mut buf[0..4], self.request);
        LittleEndian::write_u32(&mut buf[4..8], self.address);
        LittleEndian::write_u32(&mut buf[8..12], self.length);
        buf
    }
}

/// Reply to a FEL version query (32 bytes on the wire).
///
/// Layout: signature[8], soc_id @8, reserved @12, protocol @16,
/// two reserved bytes, scratchpad @20, padding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FelVersionReply {
    pub soc_id: u32,
    pub protocol_version: u16,
    pub scratchpad_address: u32,
}

impl FelVersionReply {
    pub const MIN_SIZE: usize = 24;
    pub const WIRE_SIZE: usize = 32;

    pub fn from_bytes(data: &[u8]) -> Result<Self, HeaderError> {
        ensure_len(data, Self::MIN_SIZE)?;
        let mut cursor = Cursor::new(data);
        cursor.set_position(FEL_VERSION_SOC_ID_OFFSET);
        let soc_id = cursor.read_u32::<LittleEndian>()?;
        cursor.set_position(FEL_VERSION_PROTOCOL_OFFSET);
        let protocol_version = cursor.read_u16::<LittleEndian>()?;
        cursor.set_position(FEL_VERSION_SCRATCHPAD_OFFSET);
        let scratchpad_address = cursor.read_u32::<LittleEndian>()?;
        Ok(Self {
            soc_id,
            protocol_version,
            scratchpad_address,
        })
    }

    pub fn to_bytes(&self) -> [u8; Self::WIRE_SIZE] {
        let mut buf = [0u8; Self::WIRE_SIZE];
        buf[..8].copy_from_slice(b"AWUSBFEX");
        LittleEndian::write_u32(&mut buf[8..12], self.soc_id);
        LittleEndian::write_u16(&mut buf[16..18], self.protocol_version);
        LittleEndian::write_u32(&mut buf[20..24], self.scratchpad_address);
        buf
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_submit_header_offsets() {
        let mut raw = [0xFFu8; 32];
        raw[8..12].copy_from_slice(&0x0000_1234u32.to_le_bytes());
        raw[16..18].copy_from_slice(&USB_REQUEST_WRITE.to_le_bytes());
        let header = SubmitHeader::from_bytes(&raw).unwrap();
        assert_eq!(header.declared_length, 0x1234);
        assert_eq!(header.request, USB_REQUEST_WRITE);
    }

    #[test]
    fn test_submit_header_too_short() {
        let err = SubmitHeader::from_bytes(&[0u8; 17]).unwrap_err();
        assert!(matches!(
            err,
            HeaderError::BufferTooSmall {
                expected: 18,
                actual: 17
            }
        ));
    }

    #[test]
    fn test_fel_request_layout() {
        let bytes = FelRequest::new(FEL_REQUEST_WRITE, 0x2000, 0x3C00).to_bytes();
        assert_eq!(&bytes[0..4], &[0x01, 0x01, 0x00, 0x00]);
        assert_eq!(&bytes[4..8], &[0x00, 0x20, 0x00, 0x00]);
        let parsed = FelRequest::from_bytes(&bytes).unwrap();
        assert_eq!(parsed.length, 0x3C00);
    }

    #[test]
    fn test_version_reply_offsets() {
        let mut raw = [0u8; 32];
        raw[8..12].copy_from_slice(&DEFAULT_SPL_SOC_ID.to_le_bytes());
        raw[16..18].copy_from_slice(&1u16.to_le_bytes());
        raw[20..24].copy_from_slice(&0x7e00u32.to_le_bytes());
        let reply = FelVersionReply::from_bytes(&raw).unwrap();
        assert_eq!(reply.soc_id, DEFAULT_SPL_SOC_ID);
        assert_eq!(reply.protocol_version, 1);
        assert_eq!(reply.scratchpad_address, 0x7e00);
    }
}
