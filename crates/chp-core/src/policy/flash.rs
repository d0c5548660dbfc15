//! Fastboot flash capture.

use tracing::info;

use super::ExtractionPolicy;
use crate::capture::record::RecordSource;
use crate::error::DecodeError;
use crate::fastboot::{FastbootCommand, FastbootReader};

/// Concatenates every fastboot download of the session.
///
/// Other commands (`getvar`, `flash`, `reboot`, ...) are consumed along
/// with their responses and produce nothing.
pub struct FlashCapture<'a, S> {
    fastboot: FastbootReader<'a, S>,
    downloads: usize,
    done: bool,
}

impl<'a, S: RecordSource<'a>> FlashCapture<'a, S> {
    pub fn new(source: S) -> Self {
        Self {
            fastboot: FastbootReader::new(source),
            downloads: 0,
            done: false,
        }
    }

    pub fn downloads(&self) -> usize {
        self.downloads
    }
}

impl<'a, S: RecordSource<'a>> ExtractionPolicy<'a> for FlashCapture<'a, S> {
    fn next_chunk(&mut self) -> Result<Option<&'a [u8]>, DecodeError> {
        let buf = self.fastboot.buffer();
        loop {
            if self.done {
                return Ok(None);
            }
            if let Some(mut download) = self.fastboot.active_download()
                && let Some(range) = download.next_range()?
            {
                return Ok(Some(range.slice(buf)));
            }
            match self.fastboot.next_command()? {
                Some(FastbootCommand::Download(download)) => {
                    self.downloads += 1;
                    info!(
                        part = self.downloads,
                        length = download.length(),
                        "Fastboot download"
                    );
                }
                Some(FastbootCommand::Other { .. }) => {}
                None => self.done = true,
            }
        }
    }

    fn name(&self) -> &'static str {
        "flash"
    }
}
