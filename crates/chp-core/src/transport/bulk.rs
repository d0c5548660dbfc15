//! Bulk data runs: a declared byte count carried by consecutive records.

use tracing::trace;

use crate::capture::record::{ByteRange, RecordKind, RecordSource, unexpected_record};
use crate::error::{DecodeError, ProtocolErrorKind};

/// Direction of a bulk transfer, seen from the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Device -> host, carried by ExpectRead records.
    Read,
    /// Host -> device, carried by ExpectWrite records.
    Write,
}

impl Direction {
    pub fn name(&self) -> &'static str {
        match self {
            Direction::Read => "read",
            Direction::Write => "write",
        }
    }

    /// Record kind that carries data in this direction.
    pub fn record_name(&self) -> &'static str {
        match self {
            Direction::Read => "ExpectRead",
            Direction::Write => "ExpectWrite",
        }
    }
}

/// Progress through one declared-length bulk transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BulkRun {
    pub direction: Direction,
    pub declared: usize,
    pub remaining: usize,
    /// Offset of the record that announced the transfer.
    pub offset: usize,
}

impl BulkRun {
    pub fn new(direction: Direction, declared: usize, offset: usize) -> Self {
        Self {
            direction,
            declared,
            remaining: declared,
            offset,
        }
    }

    pub fn is_complete(&self) -> bool {
        self.remaining == 0
    }

    /// Pull the next data record of the run, or `None` once the declared
    /// length has been reached. Never reads past the run.
    pub fn pull<'a, S: RecordSource<'a>>(
        &mut self,
        source: &mut S,
    ) -> Result<Option<ByteRange>, DecodeError> {
        if self.is_complete() {
            return Ok(None);
        }
        let record = source.next_record()?.ok_or_else(|| {
            DecodeError::protocol(
                source.offset(),
                ProtocolErrorKind::UnexpectedEnd {
                    expected: self.direction.record_name(),
                },
            )
        })?;
        let range = match (self.direction, record.kind) {
            (Direction::Read, RecordKind::ExpectRead(range))
            | (Direction::Write, RecordKind::ExpectWrite(range)) => range,
            _ => return Err(unexpected_record(&record, self.direction.record_name())),
        };
        if range.len() > self.remaining {
            return Err(DecodeError::protocol(
                record.offset,
                ProtocolErrorKind::PayloadOverrun {
                    declared: self.declared,
                    received: self.declared - self.remaining + range.len(),
                },
            ));
        }
        self.remaining -= range.len();
        trace!(
            offset = record.offset,
            len = range.len(),
            remaining = self.remaining,
            "Bulk data"
        );
        Ok(Some(range))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::mock::CaptureBuilder;
    use crate::capture::record::RecordReader;

    #[test]
    fn test_pulls_until_declared_length() {
        let buf = CaptureBuilder::new()
            .expect_write(&[1; 10])
            .expect_write(&[2; 6])
            .expect_read(b"status")
            .build();
        let mut reader = RecordReader::new(&buf);
        let mut run = BulkRun::new(Direction::Write, 16, 0);

        assert_eq!(run.pull(&mut reader).unwrap().unwrap().len(), 10);
        assert_eq!(run.pull(&mut reader).unwrap().unwrap().len(), 6);
        assert!(run.is_complete());
        assert!(run.pull(&mut reader).unwrap().is_none());
        // The status record is left for the caller.
        assert!(matches!(
            reader.next_record().unwrap().unwrap().kind,
            RecordKind::ExpectRead(_)
        ));
    }

    #[test]
    fn test_overrun_is_rejected() {
        let buf = CaptureBuilder::new().expect_read(&[0; 9]).build();
        let mut reader = RecordReader::new(&buf);
        let mut run = BulkRun::new(Direction::Read, 8, 0);
        let err = run.pull(&mut reader).unwrap_err();
        assert_eq!(
            err,
            DecodeError::protocol(
                0,
                ProtocolErrorKind::PayloadOverrun {
                    declared: 8,
                    received: 9
                }
            )
        );
    }

    #[test]
    fn test_wrong_direction_is_rejected() {
        let buf = CaptureBuilder::new().expect_write(&[0; 4]).build();
        let mut reader = RecordReader::new(&buf);
        let mut run = BulkRun::new(Direction::Read, 4, 0);
        assert!(matches!(
            run.pull(&mut reader),
            Err(DecodeError::Protocol {
                kind: ProtocolErrorKind::UnexpectedRecord {
                    expected: "ExpectRead",
                    found: "ExpectWrite"
                },
                ..
            })
        ));
    }

    #[test]
    fn test_zero_length_run_reads_nothing() {
        let buf = CaptureBuilder::new().expect_read(b"x").build();
        let mut reader = RecordReader::new(&buf);
        let mut run = BulkRun::new(Direction::Read, 0, 0);
        assert!(run.pull(&mut reader).unwrap().is_none());
        assert_eq!(reader.offset(), 0);
    }
}
