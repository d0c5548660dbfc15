//! Per-session record window.

use tracing::trace;

use super::record::{Record, RecordKind, RecordReader, RecordSource};
use crate::error::DecodeError;

/// Records of one session: everything up to (not including) the next
/// session marker or the end of the capture.
///
/// The window borrows the one shared reader; dropping it leaves the cursor
/// wherever the consumer stopped. Callers that need the cursor at the next
/// marker must call [`SessionWindow::skip_to_end`].
#[derive(Debug)]
pub struct SessionWindow<'r, 'a> {
    reader: &'r mut RecordReader<'a>,
    ended: bool,
}

impl<'r, 'a> SessionWindow<'r, 'a> {
    pub fn new(reader: &'r mut RecordReader<'a>) -> Self {
        Self {
            reader,
            ended: false,
        }
    }

    /// Consume every remaining record of the window.
    ///
    /// Returns the number of records skipped.
    pub fn skip_to_end(&mut self) -> Result<usize, DecodeError> {
        let mut skipped = 0;
        while self.next_record()?.is_some() {
            skipped += 1;
        }
        if skipped > 0 {
            trace!(
                skipped,
                offset = self.reader.offset(),
                "Skipped rest of session"
            );
        }
        Ok(skipped)
    }
}

impl<'a> RecordSource<'a> for SessionWindow<'_, 'a> {
    fn next_record(&mut self) -> Result<Option<Record>, DecodeError> {
        if self.ended {
            return Ok(None);
        }
        match self.reader.peek()? {
            None
            | Some(Record {
                kind: RecordKind::SessionMarker { .. },
                ..
            }) => {
                self.ended = true;
                Ok(None)
            }
            Some(_) => self.reader.next_record(),
        }
    }

    fn offset(&self) -> usize {
        self.reader.offset()
    }

    fn buffer(&self) -> &'a [u8] {
        self.reader.buffer()
    }
}
