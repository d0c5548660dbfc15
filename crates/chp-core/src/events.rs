//! Event system for front-end decoupling.
//!
//! Lets the CLI (or anything else) follow an extraction without the core
//! knowing how progress is shown.

use std::fmt;

/// What kind of file a recognized session produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionKind {
    Spl,
    FelWrite,
    Flash,
}

impl fmt::Display for SessionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionKind::Spl => write!(f, "SPL"),
            SessionKind::FelWrite => write!(f, "FEL write"),
            SessionKind::Flash => write!(f, "Fastboot flash"),
        }
    }
}

/// Events emitted while demultiplexing and extracting a capture.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExtractEvent {
    /// A session marker was passed.
    SessionStarted { index: usize, offset: usize },
    /// The session comment named no extractable file.
    SessionIgnored { index: usize, comment: String },
    /// A file is being extracted.
    FileStarted {
        index: usize,
        kind: SessionKind,
        name: String,
    },
    /// A file was written out completely.
    FileFinished { name: String, bytes: u64 },
    /// A session failed and was skipped.
    SessionFailed { index: usize, message: String },
    /// The whole capture was processed.
    Complete {
        files: usize,
        bytes: u64,
        failed: usize,
    },
}

/// Observer trait for receiving extraction events.
pub trait ExtractObserver: Send + Sync {
    fn on_event(&self, event: &ExtractEvent);
}

/// No-op observer that discards all events.
pub struct NullObserver;

impl ExtractObserver for NullObserver {
    fn on_event(&self, _event: &ExtractEvent) {}
}

/// Observer that logs events using tracing.
pub struct TracingObserver;

impl ExtractObserver for TracingObserver {
    fn on_event(&self, event: &ExtractEvent) {
        match event {
            ExtractEvent::SessionStarted { index, offset } => {
                tracing::debug!(session = index, offset = %format!("0x{offset:X}"), "Session");
            }
            ExtractEvent::SessionIgnored { index, comment } => {
                tracing::warn!(session = index, "Ignoring session '{}'", comment);
            }
            ExtractEvent::FileStarted { index, kind, name } => {
                tracing::info!(session = index, kind = %kind, "Extracting {}", name);
            }
            ExtractEvent::FileFinished { name, bytes } => {
                tracing::info!(bytes, "Finished {}", name);
            }
            ExtractEvent::SessionFailed { index, message } => {
                tracing::warn!(session = index, "Skipping session: {}", message);
            }
            ExtractEvent::Complete {
                files,
                bytes,
                failed,
            } => {
                tracing::info!(files, bytes, failed, "Extraction complete");
            }
        }
    }
}
