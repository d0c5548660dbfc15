//! FEL protocol layer.
//!
//! Each FEL operation is a bulk write carrying a 16-byte request, an
//! optional data exchange, and a bulk read carrying an 8-byte status.
//! Operations are decoded lazily: write and read data stay in the capture
//! and are handed out as ranges by the transport beneath.

use tracing::{debug, instrument};

use crate::capture::record::RecordSource;
use crate::error::{DecodeError, ProtocolErrorKind};
use crate::protocol::constants::*;
use crate::protocol::header::{FelRequest, FelVersionReply, HeaderError};
use crate::transport::{BulkTransport, Exchange, Payload};

/// One decoded FEL operation.
pub enum FelOperation<'f, 'a, S> {
    Version {
        /// Offset of the version request.
        offset: usize,
        soc_id: u32,
        protocol_version: u16,
        scratchpad_address: u32,
    },
    Write {
        address: u32,
        length: u32,
        payload: Payload<'f, 'a, S>,
    },
    Execute {
        address: u32,
    },
    Read {
        address: u32,
        length: u32,
        payload: Payload<'f, 'a, S>,
    },
}

impl<S> FelOperation<'_, '_, S> {
    pub fn name(&self) -> &'static str {
        match self {
            FelOperation::Version { .. } => "version",
            FelOperation::Write { .. } => "write",
            FelOperation::Execute { .. } => "execute",
            FelOperation::Read { .. } => "read",
        }
    }
}

/// Decodes FEL operations from bulk exchanges.
#[derive(Debug)]
pub struct FelReader<'a, S> {
    transport: BulkTransport<'a, S>,
    buf: &'a [u8],
    status_pending: bool,
}

fn struct_error(offset: usize, what: &'static str, err: HeaderError) -> DecodeError {
    let (needed, actual) = match err {
        HeaderError::BufferTooSmall { expected, actual } => (expected, actual),
        HeaderError::Io(_) => (0, 0),
    };
    DecodeError::protocol(
        offset,
        ProtocolErrorKind::StructTooShort {
            what,
            needed,
            actual,
        },
    )
}

impl<'a, S: RecordSource<'a>> FelReader<'a, S> {
    pub fn new(source: S) -> Self {
        let transport = BulkTransport::new(source);
        let buf = transport.buffer();
        Self {
            transport,
            buf,
            status_pending: false,
        }
    }

    pub fn buffer(&self) -> &'a [u8] {
        self.buf
    }

    pub fn offset(&self) -> usize {
        self.transport.offset()
    }

    /// Resume the data payload of the last write/read operation.
    pub fn active_payload(&mut self) -> Option<Payload<'_, 'a, S>> {
        self.transport.active_payload()
    }

    fn required_exchange(
        &mut self,
        expected: &'static str,
    ) -> Result<Exchange<'_, 'a, S>, DecodeError> {
        let offset = self.transport.offset();
        self.transport.next_exchange()?.ok_or_else(|| {
            DecodeError::protocol(offset, ProtocolErrorKind::UnexpectedEnd { expected })
        })
    }

    /// Consume the status read that closes the previous operation.
    fn finish_status(&mut self) -> Result<(), DecodeError> {
        if self.status_pending {
            self.required_exchange("FEL status")?
                .into_read()?
                .discard()?;
            self.status_pending = false;
        }
        Ok(())
    }

    /// Decode the next operation, or `None` at the end of the source.
    ///
    /// A write or read operation's payload must be drained (or discarded)
    /// before the next call.
    #[instrument(level = "trace", skip(self))]
    pub fn next_operation(&mut self) -> Result<Option<FelOperation<'_, 'a, S>>, DecodeError> {
        self.finish_status()?;

        let (offset, request) = {
            let Some(exchange) = self.transport.next_exchange()? else {
                return Ok(None);
            };
            let payload = exchange.into_write()?;
            let offset = payload.offset();
            let range = payload.single_range("FEL request")?;
            let request = FelRequest::from_bytes(range.slice(self.buf))
                .map_err(|e| struct_error(offset, "FEL request", e))?;
            (offset, request)
        };
        debug!(
            offset,
            request = %format!("0x{:03X}", request.request),
            address = %format!("0x{:08X}", request.address),
            length = request.length,
            "FEL request"
        );

        let operation = match request.request {
            FEL_REQUEST_VERSION => {
                let reply = {
                    let payload = self.required_exchange("FEL version reply")?.into_read()?;
                    let reply_offset = payload.offset();
                    let range = payload.single_range("FEL version reply")?;
                    FelVersionReply::from_bytes(range.slice(self.buf))
                        .map_err(|e| struct_error(reply_offset, "FEL version reply", e))?
                };
                self.status_pending = true;
                FelOperation::Version {
                    offset,
                    soc_id: reply.soc_id,
                    protocol_version: reply.protocol_version,
                    scratchpad_address: reply.scratchpad_address,
                }
            }
            FEL_REQUEST_WRITE => {
                self.status_pending = true;
                let payload = self.required_exchange("FEL write data")?.into_write()?;
                FelOperation::Write {
                    address: request.address,
                    length: request.length,
                    payload,
                }
            }
            FEL_REQUEST_EXECUTE => {
                self.status_pending = true;
                FelOperation::Execute {
                    address: request.address,
                }
            }
            FEL_REQUEST_READ => {
                self.status_pending = true;
                let payload = self.required_exchange("FEL read data")?.into_read()?;
                FelOperation::Read {
                    address: request.address,
                    length: request.length,
                    payload,
                }
            }
            other => {
                return Err(DecodeError::protocol(
                    offset,
                    ProtocolErrorKind::UnsupportedFelRequest(other),
                ));
            }
        };
        Ok(Some(operation))
    }
}
