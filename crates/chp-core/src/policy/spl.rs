//! SPL assembly: pick the tracked writes of a multi-stage SPL upload.

use tracing::{debug, info, trace};

use super::ExtractionPolicy;
use crate::capture::record::RecordSource;
use crate::error::DecodeError;
use crate::fel::{FelOperation, FelReader};
use crate::profile::SplProfile;

/// Reassembles an SPL image from the FEL writes listed in a profile.
///
/// Writes are matched in table order. A write that matches the next table
/// entry is streamed out; any other write is discarded. Assembly ends after
/// the last table entry, after a write shorter than its entry's maximum,
/// or at an execute of the thunk address, whichever comes first.
pub struct SplAssembly<'a, 'p, S> {
    fel: FelReader<'a, S>,
    profile: &'p SplProfile,
    next_entry: usize,
    streaming: bool,
    finish_after_chunk: bool,
    done: bool,
}

impl<'a, 'p, S: RecordSource<'a>> SplAssembly<'a, 'p, S> {
    pub fn new(source: S, profile: &'p SplProfile) -> Self {
        Self {
            fel: FelReader::new(source),
            profile,
            next_entry: 0,
            streaming: false,
            finish_after_chunk: false,
            done: false,
        }
    }

    /// Number of table entries matched so far.
    pub fn matched_entries(&self) -> usize {
        self.next_entry
    }
}

impl<'a, S: RecordSource<'a>> ExtractionPolicy<'a> for SplAssembly<'a, '_, S> {
    fn next_chunk(&mut self) -> Result<Option<&'a [u8]>, DecodeError> {
        let buf = self.fel.buffer();
        loop {
            if self.done {
                return Ok(None);
            }

            if self.streaming {
                if let Some(mut payload) = self.fel.active_payload()
                    && let Some(range) = payload.next_range()?
                {
                    return Ok(Some(range.slice(buf)));
                }
                self.streaming = false;
                if self.finish_after_chunk {
                    debug!(entries = self.next_entry, "SPL assembly complete");
                    self.done = true;
                }
                continue;
            }

            let Some(operation) = self.fel.next_operation()? else {
                debug!(
                    entries = self.next_entry,
                    "Session ended during SPL assembly"
                );
                self.done = true;
                continue;
            };
            match operation {
                FelOperation::Version { offset, soc_id, .. } => {
                    if soc_id != self.profile.soc_id {
                        return Err(DecodeError::IdentityMismatch {
                            offset,
                            expected: self.profile.soc_id,
                            actual: soc_id,
                        });
                    }
                    trace!(soc_id = %format!("0x{soc_id:08X}"), "SoC identified");
                }
                FelOperation::Read { payload, .. } => {
                    payload.discard()?;
                }
                FelOperation::Execute { address } => {
                    if address == self.profile.thunk_address {
                        debug!(
                            entries = self.next_entry,
                            "Thunk executed, SPL assembly complete"
                        );
                        self.done = true;
                    }
                }
                FelOperation::Write {
                    address,
                    length,
                    payload,
                } => {
                    let Some(entry) = self
                        .profile
                        .chunks
                        .get(self.next_entry)
                        .filter(|entry| entry.address == address && length <= entry.max_length)
                    else {
                        trace!(address = %format!("0x{address:08X}"), length, "Untracked write");
                        payload.discard()?;
                        continue;
                    };
                    info!(
                        entry = self.next_entry,
                        address = %format!("0x{address:08X}"),
                        length,
                        "SPL chunk"
                    );
                    self.next_entry += 1;
                    self.finish_after_chunk =
                        self.next_entry == self.profile.chunks.len() || length < entry.max_length;
                    // Streamed through `active_payload` on the next turn.
                    self.streaming = true;
                }
            }
        }
    }

    fn name(&self) -> &'static str {
        "spl"
    }
}
