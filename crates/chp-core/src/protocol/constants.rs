//! Wire constants for the capture format and the protocols it carries.

// ============================================================================
// Capture records
// ============================================================================

/// Fixed record header: l1, command, compressed, version, pad, l2.
pub const RECORD_HEADER_SIZE: usize = 12;

/// Highest capture format version understood.
pub const MAX_FORMAT_VERSION: u8 = 2;

pub const CMD_SESSION_MARKER: u8 = 0;
pub const CMD_COMMENT: u8 = 1;
pub const CMD_EXPECT_READ: u8 = 2;
pub const CMD_EXPECT_WRITE: u8 = 3;
pub const CMD_DELAY: u8 = 4;
pub const CMD_MANIFEST: u8 = 5;

// ============================================================================
// AW USB bulk transport
// ============================================================================

/// Offset of the declared payload length in a submit request.
pub const SUBMIT_LENGTH_OFFSET: u64 = 8;
/// Offset of the request code in a submit request.
pub const SUBMIT_REQUEST_OFFSET: u64 = 16;

/// Bulk read (device -> host).
pub const USB_REQUEST_READ: u16 = 0x11;
/// Bulk write (host -> device).
pub const USB_REQUEST_WRITE: u16 = 0x12;

// ============================================================================
// FEL
// ============================================================================

pub const FEL_REQUEST_VERSION: u32 = 0x001;
pub const FEL_REQUEST_WRITE: u32 = 0x101;
pub const FEL_REQUEST_EXECUTE: u32 = 0x102;
pub const FEL_REQUEST_READ: u32 = 0x103;

pub const FEL_VERSION_SOC_ID_OFFSET: u64 = 8;
pub const FEL_VERSION_PROTOCOL_OFFSET: u64 = 16;
pub const FEL_VERSION_SCRATCHPAD_OFFSET: u64 = 20;

// ============================================================================
// Fastboot
// ============================================================================

pub const FASTBOOT_DOWNLOAD_PREFIX: &[u8] = b"download:";
pub const FASTBOOT_DOWNLOAD_DIGITS: usize = 8;

// ============================================================================
// SPL defaults (sun5i boot ROM, see `profile`)
// ============================================================================

pub const DEFAULT_SPL_SOC_ID: u32 = 0x0016_2500;
pub const DEFAULT_SPL_THUNK_ADDR: u32 = 0xA200;
pub const DEFAULT_SPL_CHUNKS: &[(u32, u32)] = &[
    (0x0000, 0x1C00),
    (0xA400, 0x0400),
    (0x2000, 0x3C00),
    (0xA800, 0x1400),
    (0x7000, 0x0C00),
    (0xBC00, 0x0400),
];
