//! Plain FEL write capture.

use tracing::info;

use super::ExtractionPolicy;
use crate::capture::record::RecordSource;
use crate::error::{DecodeError, ProtocolErrorKind};
use crate::fel::{FelOperation, FelReader};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    Start,
    Streaming,
    Done,
}

/// Yields the payload of the session's first FEL operation, which must be
/// a write. Later operations are left unread.
pub struct WriteCapture<'a, S> {
    fel: FelReader<'a, S>,
    stage: Stage,
}

impl<'a, S: RecordSource<'a>> WriteCapture<'a, S> {
    pub fn new(source: S) -> Self {
        Self {
            fel: FelReader::new(source),
            stage: Stage::Start,
        }
    }
}

impl<'a, S: RecordSource<'a>> ExtractionPolicy<'a> for WriteCapture<'a, S> {
    fn next_chunk(&mut self) -> Result<Option<&'a [u8]>, DecodeError> {
        let buf = self.fel.buffer();
        match self.stage {
            Stage::Done => return Ok(None),
            Stage::Start => {
                let offset = self.fel.offset();
                match self.fel.next_operation()? {
                    Some(FelOperation::Write {
                        address, length, ..
                    }) => {
                        info!(address = %format!("0x{address:08X}"), length, "FEL write");
                    }
                    Some(other) => {
                        return Err(DecodeError::protocol(
                            offset,
                            ProtocolErrorKind::UnexpectedOperation {
                                expected: "write",
                                found: other.name(),
                            },
                        ));
                    }
                    None => {
                        return Err(DecodeError::protocol(
                            offset,
                            ProtocolErrorKind::UnexpectedEnd {
                                expected: "FEL write",
                            },
                        ));
                    }
                }
                self.stage = Stage::Streaming;
            }
            Stage::Streaming => {}
        }

        if let Some(mut payload) = self.fel.active_payload()
            && let Some(range) = payload.next_range()?
        {
            return Ok(Some(range.slice(buf)));
        }
        self.stage = Stage::Done;
        Ok(None)
    }

    fn name(&self) -> &'static str {
        "write"
    }
}
