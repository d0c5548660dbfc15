//! Fastboot layer.
//!
//! Fastboot talks plain bulk transfers: the host writes a text command and
//! the device answers with one read (`OKAY`, `FAIL...`, `DATA<len>`). A
//! `download:<8 hex digits>` command is answered with `DATA`, followed by
//! the announced number of bytes in bulk writes and a final response.

use tracing::debug;

use crate::capture::record::{ByteRange, RecordKind, RecordSource, unexpected_record};
use crate::error::{DecodeError, ProtocolErrorKind};
use crate::protocol::constants::{FASTBOOT_DOWNLOAD_DIGITS, FASTBOOT_DOWNLOAD_PREFIX};
use crate::transport::{BulkRun, Direction};

/// Parse `download:XXXXXXXX`, returning the announced byte count.
pub fn parse_download(command: &[u8]) -> Option<u32> {
    let digits = command.strip_prefix(FASTBOOT_DOWNLOAD_PREFIX)?;
    if digits.len() != FASTBOOT_DOWNLOAD_DIGITS || !digits.iter().all(u8::is_ascii_hexdigit) {
        return None;
    }
    u32::from_str_radix(std::str::from_utf8(digits).ok()?, 16).ok()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Idle,
    /// A command was read; its response record is still ahead.
    AwaitingResponse,
    Downloading(BulkRun),
}

/// Decodes fastboot commands from raw capture records.
#[derive(Debug)]
pub struct FastbootReader<'a, S> {
    source: S,
    buf: &'a [u8],
    state: State,
}

/// One fastboot command as written by the host.
pub enum FastbootCommand<'f, 'a, S> {
    Download(Download<'f, 'a, S>),
    Other { offset: usize, text: ByteRange },
}

/// Data phase of a download command.
pub struct Download<'f, 'a, S> {
    reader: &'f mut FastbootReader<'a, S>,
    length: usize,
}

impl<'a, S: RecordSource<'a>> Download<'_, 'a, S> {
    pub fn length(&self) -> usize {
        self.length
    }

    pub fn next_range(&mut self) -> Result<Option<ByteRange>, DecodeError> {
        let reader = &mut *self.reader;
        match &mut reader.state {
            State::Downloading(run) => run.pull(&mut reader.source),
            State::Idle | State::AwaitingResponse => Ok(None),
        }
    }

    pub fn discard(mut self) -> Result<usize, DecodeError> {
        let mut skipped = 0;
        while let Some(range) = self.next_range()? {
            skipped += range.len();
        }
        Ok(skipped)
    }
}

impl<'a, S: RecordSource<'a>> Iterator for Download<'_, 'a, S> {
    type Item = Result<ByteRange, DecodeError>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_range().transpose()
    }
}

impl<'a, S: RecordSource<'a>> FastbootReader<'a, S> {
    pub fn new(source: S) -> Self {
        let buf = source.buffer();
        Self {
            source,
            buf,
            state: State::Idle,
        }
    }

    pub fn buffer(&self) -> &'a [u8] {
        self.buf
    }

    pub fn offset(&self) -> usize {
        self.source.offset()
    }

    /// Consume the response owed by the previous command.
    fn settle(&mut self) -> Result<(), DecodeError> {
        match self.state {
            State::Idle => {}
            State::Downloading(run) if !run.is_complete() => {
                return Err(DecodeError::protocol(
                    self.source.offset(),
                    ProtocolErrorKind::PayloadNotDrained,
                ));
            }
            State::AwaitingResponse | State::Downloading(_) => {
                let response = self.source.expect_read()?;
                debug!(
                    response = %String::from_utf8_lossy(response.slice(self.buf)),
                    "Fastboot response"
                );
            }
        }
        self.state = State::Idle;
        Ok(())
    }

    /// Read the next host command, or `None` at the end of the source.
    pub fn next_command(&mut self) -> Result<Option<FastbootCommand<'_, 'a, S>>, DecodeError> {
        self.settle()?;

        let Some(record) = self.source.next_significant()? else {
            return Ok(None);
        };
        let text = match record.kind {
            RecordKind::ExpectWrite(range) => range,
            _ => return Err(unexpected_record(&record, "ExpectWrite")),
        };

        match parse_download(text.slice(self.buf)) {
            Some(length) => {
                let data_reply = self.source.expect_read()?;
                debug!(
                    offset = record.offset,
                    length,
                    reply = %String::from_utf8_lossy(data_reply.slice(self.buf)),
                    "Fastboot download"
                );
                let length = length as usize;
                let run = BulkRun::new(Direction::Write, length, record.offset);
                self.state = State::Downloading(run);
                Ok(Some(FastbootCommand::Download(Download {
                    reader: self,
                    length,
                })))
            }
            None => {
                debug!(
                    offset = record.offset,
                    command = %String::from_utf8_lossy(text.slice(self.buf)),
                    "Fastboot command"
                );
                self.state = State::AwaitingResponse;
                Ok(Some(FastbootCommand::Other {
                    offset: record.offset,
                    text,
                }))
            }
        }
    }

    /// Resume an unfinished download, if one is in progress.
    pub fn active_download(&mut self) -> Option<Download<'_, 'a, S>> {
        match self.state {
            State::Downloading(run) if !run.is_complete() => Some(Download {
                reader: self,
                length: run.declared,
            }),
            _ => None,
        }
    }
}
