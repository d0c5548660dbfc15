//! Extraction policies.
//!
//! A policy turns the operations of one session into the chunks of one
//! output file. Chunks borrow the capture buffer; nothing is copied here.

pub mod flash;
pub mod spl;
pub mod write;

pub use flash::FlashCapture;
pub use spl::SplAssembly;
pub use write::WriteCapture;

use crate::error::DecodeError;

/// A lazy producer of file chunks.
///
/// Returns `None` once the file is complete. Records the policy did not
/// read are left in the session; the caller is responsible for skipping
/// them.
pub trait ExtractionPolicy<'a> {
    fn next_chunk(&mut self) -> Result<Option<&'a [u8]>, DecodeError>;

    /// Short name used in logs.
    fn name(&self) -> &'static str;
}
