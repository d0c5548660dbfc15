//! Capture layer - record stream, session windows and capture input.

pub mod dump;
pub mod file;
pub mod mock;
pub mod record;
pub mod window;

pub use dump::format_record;
pub use file::CaptureFile;
pub use mock::CaptureBuilder;
pub use record::{ByteRange, Record, RecordKind, RecordReader, RecordSource};
pub use window::SessionWindow;
