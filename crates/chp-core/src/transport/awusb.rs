//! AW USB bulk transport.
//!
//! Every exchange starts with a 32-byte submit request (an ExpectWrite
//! record) naming the direction and the byte count, continues with the data
//! records and ends with a 13-byte status block the device sends back (an
//! ExpectRead record). The status block is consumed here and never exposed.

use tracing::{debug, trace};

use super::bulk::{BulkRun, Direction};
use crate::capture::record::{ByteRange, RecordKind, RecordSource, unexpected_record};
use crate::error::{DecodeError, ProtocolErrorKind};
use crate::protocol::constants::{USB_REQUEST_READ, USB_REQUEST_WRITE};
use crate::protocol::header::SubmitHeader;

/// Reconstructs bulk exchanges from capture records.
///
/// At most one exchange payload is in flight; asking for the next exchange
/// while a payload still has data left is reported as
/// [`ProtocolErrorKind::PayloadNotDrained`].
#[derive(Debug)]
pub struct BulkTransport<'a, S> {
    source: S,
    buf: &'a [u8],
    in_flight: Option<BulkRun>,
}

/// One bulk exchange. The payload borrows the transport until it is done.
pub enum Exchange<'t, 'a, S> {
    Read(Payload<'t, 'a, S>),
    Write(Payload<'t, 'a, S>),
}

impl<'t, 'a, S: RecordSource<'a>> Exchange<'t, 'a, S> {
    pub fn direction(&self) -> Direction {
        match self {
            Exchange::Read(_) => Direction::Read,
            Exchange::Write(_) => Direction::Write,
        }
    }

    pub fn declared_length(&self) -> usize {
        self.payload().declared_length()
    }

    pub fn payload(&self) -> &Payload<'t, 'a, S> {
        match self {
            Exchange::Read(p) | Exchange::Write(p) => p,
        }
    }

    pub fn into_payload(self) -> Payload<'t, 'a, S> {
        match self {
            Exchange::Read(p) | Exchange::Write(p) => p,
        }
    }

    /// Require a bulk read.
    pub fn into_read(self) -> Result<Payload<'t, 'a, S>, DecodeError> {
        match self {
            Exchange::Read(p) => Ok(p),
            Exchange::Write(p) => Err(p.wrong_direction(Direction::Read)),
        }
    }

    /// Require a bulk write.
    pub fn into_write(self) -> Result<Payload<'t, 'a, S>, DecodeError> {
        match self {
            Exchange::Write(p) => Ok(p),
            Exchange::Read(p) => Err(p.wrong_direction(Direction::Write)),
        }
    }
}

/// Lazy view of an exchange's data records.
///
/// Pulling past the last data record consumes the status block. Dropping
/// the view early leaves the exchange in flight; it can be resumed with
/// [`BulkTransport::active_payload`].
pub struct Payload<'t, 'a, S> {
    transport: &'t mut BulkTransport<'a, S>,
    direction: Direction,
    declared_length: usize,
    offset: usize,
}

impl<'t, 'a, S: RecordSource<'a>> Payload<'t, 'a, S> {
    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn declared_length(&self) -> usize {
        self.declared_length
    }

    /// Offset of the submit record that opened the exchange.
    pub fn offset(&self) -> usize {
        self.offset
    }

    pub fn buffer(&self) -> &'a [u8] {
        self.transport.buf
    }

    pub fn next_range(&mut self) -> Result<Option<ByteRange>, DecodeError> {
        let transport = &mut *self.transport;
        let Some(run) = transport.in_flight.as_mut() else {
            return Ok(None);
        };
        if let Some(range) = run.pull(&mut transport.source)? {
            return Ok(Some(range));
        }
        transport.in_flight = None;
        let status = transport.source.expect_read()?;
        trace!(status_len = status.len(), "Exchange status");
        Ok(None)
    }

    /// Drain the payload without looking at it. Returns the bytes skipped.
    pub fn discard(mut self) -> Result<usize, DecodeError> {
        let mut skipped = 0;
        while let Some(range) = self.next_range()? {
            skipped += range.len();
        }
        Ok(skipped)
    }

    /// Require the payload to be exactly one record and return it.
    pub fn single_range(mut self, what: &'static str) -> Result<ByteRange, DecodeError> {
        let offset = self.offset;
        let first = self.next_range()?.ok_or_else(|| {
            DecodeError::protocol(
                offset,
                ProtocolErrorKind::StructTooShort {
                    what,
                    needed: 1,
                    actual: 0,
                },
            )
        })?;
        if self.next_range()?.is_some() {
            return Err(DecodeError::protocol(
                offset,
                ProtocolErrorKind::FragmentedStruct { what },
            ));
        }
        Ok(first)
    }

    fn wrong_direction(&self, expected: Direction) -> DecodeError {
        DecodeError::protocol(
            self.offset,
            ProtocolErrorKind::UnexpectedExchange {
                expected: expected.name(),
                found: self.direction.name(),
            },
        )
    }
}

impl<'a, S: RecordSource<'a>> Iterator for Payload<'_, 'a, S> {
    type Item = Result<ByteRange, DecodeError>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_range().transpose()
    }
}

impl<'a, S: RecordSource<'a>> BulkTransport<'a, S> {
    pub fn new(source: S) -> Self {
        let buf = source.buffer();
        Self {
            source,
            buf,
            in_flight: None,
        }
    }

    pub fn buffer(&self) -> &'a [u8] {
        self.buf
    }

    pub fn offset(&self) -> usize {
        self.source.offset()
    }

    pub fn into_inner(self) -> S {
        self.source
    }

    /// Read the next submit request and open its exchange.
    ///
    /// Returns `None` when the underlying source is exhausted between
    /// exchanges.
    pub fn next_exchange(&mut self) -> Result<Option<Exchange<'_, 'a, S>>, DecodeError> {
        if self.in_flight.is_some() {
            return Err(DecodeError::protocol(
                self.source.offset(),
                ProtocolErrorKind::PayloadNotDrained,
            ));
        }

        let Some(record) = self.source.next_significant()? else {
            return Ok(None);
        };
        let range = match record.kind {
            RecordKind::ExpectWrite(range) => range,
            _ => return Err(unexpected_record(&record, "ExpectWrite")),
        };
        let header = SubmitHeader::from_bytes(range.slice(self.buf)).map_err(|_| {
            DecodeError::protocol(
                record.offset,
                ProtocolErrorKind::StructTooShort {
                    what: "USB submit request",
                    needed: SubmitHeader::MIN_SIZE,
                    actual: range.len(),
                },
            )
        })?;
        let direction = match header.request {
            USB_REQUEST_READ => Direction::Read,
            USB_REQUEST_WRITE => Direction::Write,
            other => {
                return Err(DecodeError::protocol(
                    record.offset,
                    ProtocolErrorKind::UnsupportedUsbRequest(other),
                ));
            }
        };
        let declared = header.declared_length as usize;
        debug!(
            offset = record.offset,
            direction = direction.name(),
            declared,
            "USB exchange"
        );
        self.in_flight = Some(BulkRun::new(direction, declared, record.offset));

        let payload = Payload {
            transport: self,
            direction,
            declared_length: declared,
            offset: record.offset,
        };
        Ok(Some(match direction {
            Direction::Read => Exchange::Read(payload),
            Direction::Write => Exchange::Write(payload),
        }))
    }

    /// Resume the payload of the exchange still in flight, if any.
    pub fn active_payload(&mut self) -> Option<Payload<'_, 'a, S>> {
        let run = self.in_flight?;
        Some(Payload {
            transport: self,
            direction: run.direction,
            declared_length: run.declared,
            offset: run.offset,
        })
    }
}
