//! Capture record stream.
//!
//! A capture is a flat sequence of records, each a 12-byte little-endian
//! header optionally followed by a payload. Payloads are never copied: a
//! record only remembers the byte range it occupies in the capture buffer.

use byteorder::{LittleEndian, ReadBytesExt};
use std::io::Cursor;
use tracing::trace;

use crate::error::{DecodeError, FormatErrorKind, ProtocolErrorKind};
use crate::protocol::constants::*;

/// Half-open byte interval `[start, end)` into the capture buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ByteRange {
    pub start: usize,
    pub end: usize,
}

impl ByteRange {
    pub fn new(start: usize, end: usize) -> Self {
        debug_assert!(start <= end);
        Self { start, end }
    }

    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    /// Borrow the bytes this range covers.
    pub fn slice<'a>(&self, buf: &'a [u8]) -> &'a [u8] {
        &buf[self.start..self.end]
    }
}

/// One typed capture record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordKind {
    SessionMarker {
        stream_id: u32,
        stream_len: u32,
        format_version: u8,
    },
    Comment(ByteRange),
    ExpectRead(ByteRange),
    ExpectWrite(ByteRange),
    Delay {
        microseconds: u32,
    },
    Manifest(ByteRange),
}

impl RecordKind {
    pub fn name(&self) -> &'static str {
        match self {
            RecordKind::SessionMarker { .. } => "SessionMarker",
            RecordKind::Comment(_) => "Comment",
            RecordKind::ExpectRead(_) => "ExpectRead",
            RecordKind::ExpectWrite(_) => "ExpectWrite",
            RecordKind::Delay { .. } => "Delay",
            RecordKind::Manifest(_) => "Manifest",
        }
    }
}

/// A record together with the offset of its header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Record {
    pub offset: usize,
    pub kind: RecordKind,
}

/// Anything that hands out capture records from the shared cursor.
///
/// Every layer of the decoder pulls through this trait; none of them keeps
/// its own copy of the read position.
pub trait RecordSource<'a> {
    fn next_record(&mut self) -> Result<Option<Record>, DecodeError>;

    /// Current cursor position (the offset of the next header).
    fn offset(&self) -> usize;

    /// The capture buffer all ranges point into.
    fn buffer(&self) -> &'a [u8];

    /// Pull the next record, skipping delays.
    fn next_significant(&mut self) -> Result<Option<Record>, DecodeError> {
        loop {
            match self.next_record()? {
                Some(Record {
                    kind: RecordKind::Delay { microseconds },
                    offset,
                }) => trace!(offset, microseconds, "Skipping delay"),
                other => return Ok(other),
            }
        }
    }

    /// Pull the next record and require it to be an ExpectRead.
    fn expect_read(&mut self) -> Result<ByteRange, DecodeError> {
        match self.next_record()? {
            Some(Record {
                kind: RecordKind::ExpectRead(range),
                ..
            }) => Ok(range),
            Some(record) => Err(unexpected_record(&record, "ExpectRead")),
            None => Err(DecodeError::protocol(
                self.offset(),
                ProtocolErrorKind::UnexpectedEnd {
                    expected: "ExpectRead",
                },
            )),
        }
    }
}

impl<'a, S: RecordSource<'a> + ?Sized> RecordSource<'a> for &mut S {
    fn next_record(&mut self) -> Result<Option<Record>, DecodeError> {
        (**self).next_record()
    }

    fn offset(&self) -> usize {
        (**self).offset()
    }

    fn buffer(&self) -> &'a [u8] {
        (**self).buffer()
    }
}

pub(crate) fn unexpected_record(record: &Record, expected: &'static str) -> DecodeError {
    DecodeError::protocol(
        record.offset,
        ProtocolErrorKind::UnexpectedRecord {
            expected,
            found: record.kind.name(),
        },
    )
}

/// Forward-only reader over a capture buffer.
#[derive(Debug, Clone)]
pub struct RecordReader<'a> {
    buf: &'a [u8],
    pos: usize,
    failed: bool,
}

impl<'a> RecordReader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self {
            buf,
            pos: 0,
            failed: false,
        }
    }

    pub fn is_at_end(&self) -> bool {
        self.pos >= self.buf.len()
    }

    /// Decode the record at the cursor without consuming it.
    pub fn peek(&self) -> Result<Option<Record>, DecodeError> {
        if self.is_at_end() {
            return Ok(None);
        }
        self.parse_at(self.pos).map(|(record, _)| Some(record))
    }

    fn parse_at(&self, pos: usize) -> Result<(Record, usize), DecodeError> {
        let available = self.buf.len() - pos;
        if available < RECORD_HEADER_SIZE {
            return Err(DecodeError::format(
                pos,
                FormatErrorKind::TruncatedHeader {
                    needed: RECORD_HEADER_SIZE,
                    available,
                },
            ));
        }

        let mut cursor = Cursor::new(&self.buf[pos..pos + RECORD_HEADER_SIZE]);
        let fmt_err = |kind| DecodeError::format(pos, kind);
        let io_err = |_| {
            fmt_err(FormatErrorKind::TruncatedHeader {
                needed: RECORD_HEADER_SIZE,
                available,
            })
        };
        let l1 = cursor.read_u32::<LittleEndian>().map_err(io_err)?;
        let command = cursor.read_u8().map_err(io_err)?;
        let compressed = cursor.read_u8().map_err(io_err)?;
        let version = cursor.read_u8().map_err(io_err)?;
        let _pad = cursor.read_u8().map_err(io_err)?;
        let l2 = cursor.read_u32::<LittleEndian>().map_err(io_err)?;

        if version > MAX_FORMAT_VERSION {
            return Err(fmt_err(FormatErrorKind::UnsupportedVersion(version)));
        }
        if compressed != 0 {
            return Err(fmt_err(FormatErrorKind::Compressed(compressed)));
        }

        let body = pos + RECORD_HEADER_SIZE;
        let payload = || -> Result<ByteRange, DecodeError> {
            let needed = l2 as usize;
            let available = self.buf.len() - body;
            if needed > available {
                let kind = FormatErrorKind::TruncatedPayload { needed, available };
                return Err(fmt_err(kind));
            }
            Ok(ByteRange::new(body, body + needed))
        };

        let kind = match command {
            CMD_SESSION_MARKER => RecordKind::SessionMarker {
                stream_id: l1,
                stream_len: l2,
                format_version: version,
            },
            CMD_COMMENT => RecordKind::Comment(payload()?),
            CMD_EXPECT_READ => RecordKind::ExpectRead(payload()?),
            CMD_EXPECT_WRITE => RecordKind::ExpectWrite(payload()?),
            CMD_DELAY => RecordKind::Delay { microseconds: l1 },
            CMD_MANIFEST => RecordKind::Manifest(payload()?),
            other => return Err(fmt_err(FormatErrorKind::UnsupportedCommand(other))),
        };

        let next = match kind {
            RecordKind::Comment(r)
            | RecordKind::ExpectRead(r)
            | RecordKind::ExpectWrite(r)
            | RecordKind::Manifest(r) => r.end,
            RecordKind::SessionMarker { .. } | RecordKind::Delay { .. } => body,
        };
        Ok((Record { offset: pos, kind }, next))
    }
}

impl<'a> RecordSource<'a> for RecordReader<'a> {
    fn next_record(&mut self) -> Result<Option<Record>, DecodeError> {
        if self.failed || self.is_at_end() {
            return Ok(None);
        }
        match self.parse_at(self.pos) {
            Ok((record, next)) => {
                trace!(offset = record.offset, kind = record.kind.name(), "Record");
                self.pos = next;
                Ok(Some(record))
            }
            Err(e) => {
                self.failed = true;
                Err(e)
            }
        }
    }

    fn offset(&self) -> usize {
        self.pos
    }

    fn buffer(&self) -> &'a [u8] {
        self.buf
    }
}

impl<'a> Iterator for RecordReader<'a> {
    type Item = Result<Record, DecodeError>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_record().transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::mock::CaptureBuilder;

    #[test]
    fn test_reads_every_record_kind() {
        let buf = CaptureBuilder::new()
            .marker(0x11, 0x22)
            .comment("fel, spl, u-boot.bin")
            .expect_write(b"abc")
            .expect_read(b"")
            .delay(1500)
            .manifest("manifest")
            .build();

        let records: Vec<_> = RecordReader::new(&buf).collect::<Result<_, _>>().unwrap();
        assert_eq!(records.len(), 6);
        assert_eq!(
            records[0].kind,
            RecordKind::SessionMarker {
                stream_id: 0x11,
                stream_len: 0x22,
                format_version: 2
            }
        );
        match records[1].kind {
            RecordKind::Comment(r) => assert_eq!(r.slice(&buf), b"fel, spl, u-boot.bin"),
            other => panic!("unexpected {other:?}"),
        }
        match records[2].kind {
            RecordKind::ExpectWrite(r) => assert_eq!(r.slice(&buf), b"abc"),
            other => panic!("unexpected {other:?}"),
        }
        let kind = records[3].kind;
        assert!(matches!(kind, RecordKind::ExpectRead(r) if r.is_empty()));
        assert_eq!(records[4].kind, RecordKind::Delay { microseconds: 1500 });
        assert!(matches!(records[5].kind, RecordKind::Manifest(_)));
    }

    #[test]
    fn test_consumes_buffer_exactly() {
        let buf = CaptureBuilder::new()
            .marker(0, 0)
            .expect_write(&[1; 40])
            .expect_read(&[2; 7])
            .delay(3)
            .build();

        let mut reader = RecordReader::new(&buf);
        let mut count = 0;
        while reader.next_record().unwrap().is_some() {
            count += 1;
        }
        assert_eq!(count, 4);
        assert_eq!(reader.offset(), buf.len());
        assert_eq!(buf.len(), 4 * RECORD_HEADER_SIZE + 40 + 7);
    }

    #[test]
    fn test_offsets_point_at_headers() {
        let buf = CaptureBuilder::new()
            .marker(0, 0)
            .expect_write(&[0; 5])
            .expect_read(&[0; 1])
            .build();
        let offsets: Vec<_> = RecordReader::new(&buf).map(|r| r.unwrap().offset).collect();
        assert_eq!(offsets, vec![0, 12, 29]);
    }

    #[test]
    fn test_truncated_header() {
        let mut buf = CaptureBuilder::new().marker(0, 0).expect_read(b"xy").build();
        buf.extend_from_slice(&[0u8; 5]);
        let mut reader = RecordReader::new(&buf);
        assert!(reader.next_record().unwrap().is_some());
        assert!(reader.next_record().unwrap().is_some());
        let err = reader.next_record().unwrap_err();
        assert_eq!(
            err,
            DecodeError::format(
                26,
                FormatErrorKind::TruncatedHeader {
                    needed: 12,
                    available: 5
                }
            )
        );
        // The stream stays ended after a failure.
        assert!(reader.next_record().unwrap().is_none());
    }

    #[test]
    fn test_truncated_payload() {
        let mut buf = CaptureBuilder::new().expect_write(&[9; 16]).build();
        buf.truncate(buf.len() - 1);
        let err = RecordReader::new(&buf).next_record().unwrap_err();
        assert!(matches!(
            err,
            DecodeError::Format {
                offset: 0,
                kind: FormatErrorKind::TruncatedPayload {
                    needed: 16,
                    available: 15
                }
            }
        ));
    }

    #[test]
    fn test_rejects_future_version() {
        let buf = CaptureBuilder::new().raw_record(0, 0, 3, 0, &[]).build();
        let err = RecordReader::new(&buf).next_record().unwrap_err();
        assert!(matches!(
            err,
            DecodeError::Format {
                kind: FormatErrorKind::UnsupportedVersion(3),
                ..
            }
        ));
    }

    #[test]
    fn test_rejects_compressed() {
        let buf = CaptureBuilder::new().raw_record(2, 1, 2, 0, b"zz").build();
        let err = RecordReader::new(&buf).next_record().unwrap_err();
        assert!(matches!(
            err,
            DecodeError::Format {
                kind: FormatErrorKind::Compressed(1),
                ..
            }
        ));
    }

    #[test]
    fn test_rejects_unknown_command() {
        let buf = CaptureBuilder::new()
            .marker(0, 0)
            .raw_record(9, 0, 0, 0, &[])
            .build();
        let mut reader = RecordReader::new(&buf);
        reader.next_record().unwrap();
        let err = reader.next_record().unwrap_err();
        assert_eq!(
            err,
            DecodeError::format(12, FormatErrorKind::UnsupportedCommand(9))
        );
    }

    #[test]
    fn test_peek_does_not_advance() {
        let buf = CaptureBuilder::new().comment("x").build();
        let reader = RecordReader::new(&buf);
        let peeked = reader.peek().unwrap().unwrap();
        assert_eq!(reader.offset(), 0);
        assert!(matches!(peeked.kind, RecordKind::Comment(_)));
    }

    #[test]
    fn test_expect_read_reports_mismatch() {
        let buf = CaptureBuilder::new().expect_write(b"w").build();
        let err = RecordReader::new(&buf).expect_read().unwrap_err();
        assert_eq!(
            err,
            DecodeError::protocol(
                0,
                ProtocolErrorKind::UnexpectedRecord {
                    expected: "ExpectRead",
                    found: "ExpectWrite"
                }
            )
        );
    }

    #[test]
    fn test_next_significant_skips_delays() {
        let buf = CaptureBuilder::new()
            .delay(1)
            .delay(2)
            .expect_read(b"r")
            .build();
        let mut reader = RecordReader::new(&buf);
        let record = reader.next_significant().unwrap().unwrap();
        assert!(matches!(record.kind, RecordKind::ExpectRead(_)));
        assert!(reader.next_significant().unwrap().is_none());
    }

    #[test]
    fn test_accepts_older_versions() {
        let buf = CaptureBuilder::new()
            .version(0)
            .marker(0, 0)
            .comment("fastboot, flash, boot, boot.img")
            .version(1)
            .expect_write(b"ab")
            .build();
        let records: Vec<_> = RecordReader::new(&buf).collect::<Result<_, _>>().unwrap();
        assert_eq!(records.len(), 3);
        assert_eq!(
            records[0].kind,
            RecordKind::SessionMarker {
                stream_id: 0,
                stream_len: 0,
                format_version: 0,
            }
        );
        match records[2].kind {
            RecordKind::ExpectWrite(r) => assert_eq!(r.slice(&buf), b"ab"),
            other => panic!("unexpected {other:?}"),
        }
    }
}
