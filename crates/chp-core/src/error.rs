//! Decoder error taxonomy.
//!
//! Every error carries the byte offset into the capture at which it was
//! detected. Format errors describe a structurally broken capture and are
//! always fatal; protocol and identity errors are local to one session.

use thiserror::Error;

/// Structural problems with the capture record stream.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FormatErrorKind {
    #[error("truncated record header: need {needed} bytes, {available} available")]
    TruncatedHeader { needed: usize, available: usize },
    #[error("truncated record payload: need {needed} bytes, {available} available")]
    TruncatedPayload { needed: usize, available: usize },
    #[error("unsupported format version {0}")]
    UnsupportedVersion(u8),
    #[error("compressed records are not supported (flag {0})")]
    Compressed(u8),
    #[error("unsupported command {0}")]
    UnsupportedCommand(u8),
    #[error("capture does not start with a session marker (found {found})")]
    MissingSessionMarker { found: &'static str },
}

/// A layer received something it cannot interpret.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolErrorKind {
    #[error("expected {expected} record, found {found}")]
    UnexpectedRecord {
        expected: &'static str,
        found: &'static str,
    },
    #[error("session ended while waiting for {expected}")]
    UnexpectedEnd { expected: &'static str },
    #[error("unsupported USB request 0x{0:04X}")]
    UnsupportedUsbRequest(u16),
    #[error("unsupported FEL request 0x{0:X}")]
    UnsupportedFelRequest(u32),
    #[error("expected bulk {expected} exchange, found bulk {found}")]
    UnexpectedExchange {
        expected: &'static str,
        found: &'static str,
    },
    #[error("expected FEL {expected} operation, found {found}")]
    UnexpectedOperation {
        expected: &'static str,
        found: &'static str,
    },
    #[error("payload overrun: declared {declared} bytes, records carry {received}")]
    PayloadOverrun { declared: usize, received: usize },
    #[error("{what} too short: need {needed} bytes, got {actual}")]
    StructTooShort {
        what: &'static str,
        needed: usize,
        actual: usize,
    },
    #[error("{what} split across several records")]
    FragmentedStruct { what: &'static str },
    #[error("previous payload was not drained before the next exchange")]
    PayloadNotDrained,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("format error at offset 0x{offset:X}: {kind}")]
    Format {
        offset: usize,
        kind: FormatErrorKind,
    },
    #[error("protocol error at offset 0x{offset:X}: {kind}")]
    Protocol {
        offset: usize,
        kind: ProtocolErrorKind,
    },
    #[error(
        "identity mismatch at offset 0x{offset:X}: expected SoC 0x{expected:08X}, got 0x{actual:08X}"
    )]
    IdentityMismatch {
        offset: usize,
        expected: u32,
        actual: u32,
    },
}

impl DecodeError {
    pub fn format(offset: usize, kind: FormatErrorKind) -> Self {
        Self::Format { offset, kind }
    }

    pub fn protocol(offset: usize, kind: ProtocolErrorKind) -> Self {
        Self::Protocol { offset, kind }
    }

    /// Byte offset at which the error was detected.
    pub fn offset(&self) -> usize {
        match self {
            DecodeError::Format { offset, .. }
            | DecodeError::Protocol { offset, .. }
            | DecodeError::IdentityMismatch { offset, .. } => *offset,
        }
    }

    /// True when the error only invalidates the current session.
    pub fn is_session_local(&self) -> bool {
        !matches!(self, DecodeError::Format { .. })
    }
}
