//! chp-core: offline decoder for recorded USB flashing sessions.
//!
//! A capture is a log of the bulk traffic between a flashing tool and a
//! device (Allwinner FEL, fastboot), split into sessions by marker records.
//! This crate walks such a capture once and recovers the files that were
//! uploaded to the device, without copying payload bytes until a sink
//! writes them.
//!
//! # Architecture
//!
//! The crate is organized into layers sharing one read cursor:
//!
//! - **Capture**: record stream, per-session windows, capture file mapping
//! - **Protocol**: wire constants and fixed-offset structures
//! - **Transport**: AW USB bulk exchanges rebuilt from records
//! - **FEL / Fastboot**: protocol operations on top of the transport
//! - **Policy**: per-session rules that turn operations into file chunks
//! - **Session**: demultiplexer that picks a policy from each session comment
//! - **Sink**: manifest and save sinks plus the extraction driver
//! - **Events**: observer hooks for front-ends
//! - **Sparse**: Android sparse image densifier for flashed images
//!
//! # Example
//!
//! ```no_run
//! use chp_core::{CaptureFile, ExtractOptions, ManifestSink, SessionDemuxer, SplProfile};
//!
//! let capture = CaptureFile::open("session.chp")?;
//! let mut demuxer = SessionDemuxer::new(capture.as_bytes(), SplProfile::default());
//! let mut sink = ManifestSink::new(std::io::stdout());
//! chp_core::run_extraction(&mut demuxer, &mut sink, &ExtractOptions::default())?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod capture;
pub mod error;
pub mod events;
pub mod fastboot;
pub mod fel;
pub mod policy;
pub mod profile;
pub mod protocol;
pub mod session;
pub mod sink;
pub mod sparse;
pub mod transport;

// Re-exports for convenience
pub use capture::{CaptureBuilder, CaptureFile, Record, RecordKind, RecordReader, format_record};
pub use error::{DecodeError, FormatErrorKind, ProtocolErrorKind};
pub use events::{ExtractEvent, ExtractObserver, NullObserver, SessionKind, TracingObserver};
pub use profile::{ProfileError, SplChunk, SplProfile};
pub use session::{ExtractedFile, SessionDemuxer, SessionPlan, classify};
pub use sink::{
    ExtractOptions, ExtractSummary, FileSink, ManifestSink, SaveSink, SinkError, run_extraction,
};
pub use sparse::{SparseError, densify_to_vec};
