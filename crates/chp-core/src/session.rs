//! Session demultiplexer - splits a capture into extracted files.
//!
//! A capture is a series of sessions, each opened by a marker record and
//! usually labeled by a comment holding the recorded command line (tokens
//! joined with `", "`). The comment decides which policy, if any, turns the
//! session into a file.

use std::path::Path;
use std::sync::Arc;

use tracing::instrument;

use crate::capture::record::{Record, RecordKind, RecordReader, RecordSource};
use crate::capture::window::SessionWindow;
use crate::error::{DecodeError, FormatErrorKind};
use crate::events::{ExtractEvent, ExtractObserver, SessionKind, TracingObserver};
use crate::policy::{ExtractionPolicy, FlashCapture, SplAssembly, WriteCapture};
use crate::profile::SplProfile;

const TOKEN_SEPARATOR: &str = ", ";

/// What a session comment asks for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionPlan {
    /// `fel, spl, <name>`
    Spl { name: String },
    /// `fel, write, <address>, <name>, ...`
    FelWrite { name: String },
    /// `fastboot, [-i <id>], [-u], flash, <partition>, <name>`
    Flash { partition: String, name: String },
}

impl SessionPlan {
    pub fn name(&self) -> &str {
        match self {
            SessionPlan::Spl { name }
            | SessionPlan::FelWrite { name }
            | SessionPlan::Flash { name, .. } => name,
        }
    }

    pub fn kind(&self) -> SessionKind {
        match self {
            SessionPlan::Spl { .. } => SessionKind::Spl,
            SessionPlan::FelWrite { .. } => SessionKind::FelWrite,
            SessionPlan::Flash { .. } => SessionKind::Flash,
        }
    }
}

fn program_name(token: &str) -> &str {
    Path::new(token)
        .file_name()
        .and_then(|name| name.to_str())
        .unwrap_or(token)
}

/// Classify a session comment. `None` means the session yields no file.
pub fn classify(comment: &str) -> Option<SessionPlan> {
    let tokens: Vec<&str> = comment.split(TOKEN_SEPARATOR).collect();
    match program_name(tokens.first()?) {
        "fel" | "sunxi-fel" => match tokens.get(1).copied()? {
            "spl" => Some(SessionPlan::Spl {
                name: tokens.get(2)?.to_string(),
            }),
            "write" => Some(SessionPlan::FelWrite {
                name: tokens.get(3)?.to_string(),
            }),
            _ => None,
        },
        "fastboot" => {
            let mut positional = Vec::new();
            let mut rest = tokens[1..].iter();
            while let Some(&token) = rest.next() {
                match token {
                    "-i" => {
                        rest.next();
                    }
                    "-u" => {}
                    _ => positional.push(token),
                }
            }
            match positional.as_slice() {
                ["flash", partition, name, ..] => Some(SessionPlan::Flash {
                    partition: partition.to_string(),
                    name: name.to_string(),
                }),
                _ => None,
            }
        }
        _ => None,
    }
}

/// One file produced by a session. Chunks are pulled lazily.
///
/// The file borrows the demuxer; drop it (drained or not) before asking
/// for the next one.
pub struct ExtractedFile<'d, 'a> {
    name: String,
    kind: SessionKind,
    session: usize,
    offset: usize,
    policy: Box<dyn ExtractionPolicy<'a> + 'd>,
}

impl<'a> ExtractedFile<'_, 'a> {
    /// Logical name from the session comment (may contain directories).
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> SessionKind {
        self.kind
    }

    /// 1-based index of the session within the capture.
    pub fn session(&self) -> usize {
        self.session
    }

    /// Offset of the session marker.
    pub fn offset(&self) -> usize {
        self.offset
    }

    pub fn next_chunk(&mut self) -> Result<Option<&'a [u8]>, DecodeError> {
        self.policy.next_chunk()
    }

    /// Drain every chunk into one buffer.
    pub fn read_to_vec(&mut self) -> Result<Vec<u8>, DecodeError> {
        let mut out = Vec::new();
        while let Some(chunk) = self.next_chunk()? {
            out.extend_from_slice(chunk);
        }
        Ok(out)
    }
}

impl<'a> Iterator for ExtractedFile<'_, 'a> {
    type Item = Result<&'a [u8], DecodeError>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_chunk().transpose()
    }
}

/// Walks the sessions of a capture and hands out one file per recognized
/// session.
pub struct SessionDemuxer<'a, O: ExtractObserver = TracingObserver> {
    reader: RecordReader<'a>,
    profile: SplProfile,
    observer: Arc<O>,
    started: bool,
    session_index: usize,
}

impl<'a> SessionDemuxer<'a, TracingObserver> {
    /// Create a demuxer with the default tracing observer.
    pub fn new(buf: &'a [u8], profile: SplProfile) -> Self {
        Self::with_observer(buf, profile, Arc::new(TracingObserver))
    }
}

impl<'a, O: ExtractObserver> SessionDemuxer<'a, O> {
    /// Create a demuxer with a custom observer.
    pub fn with_observer(buf: &'a [u8], profile: SplProfile, observer: Arc<O>) -> Self {
        Self {
            reader: RecordReader::new(buf),
            profile,
            observer,
            started: false,
            session_index: 0,
        }
    }

    pub fn observer(&self) -> &Arc<O> {
        &self.observer
    }

    /// Cursor position in the capture.
    pub fn offset(&self) -> usize {
        self.reader.offset()
    }

    /// Sessions seen so far, recognized or not.
    pub fn sessions(&self) -> usize {
        self.session_index
    }

    /// Advance to the next session that yields a file.
    ///
    /// Whatever the previous file left unread is skipped first, so a file
    /// may be dropped at any point without losing track of the sessions.
    #[instrument(level = "debug", skip(self), fields(offset = self.reader.offset()))]
    pub fn next_file(&mut self) -> Result<Option<ExtractedFile<'_, 'a>>, DecodeError> {
        loop {
            if self.started {
                SessionWindow::new(&mut self.reader).skip_to_end()?;
            }

            let Some(marker) = self.reader.next_record()? else {
                return Ok(None);
            };
            if !matches!(marker.kind, RecordKind::SessionMarker { .. }) {
                return Err(DecodeError::format(
                    marker.offset,
                    FormatErrorKind::MissingSessionMarker {
                        found: marker.kind.name(),
                    },
                ));
            }
            self.started = true;
            self.session_index += 1;
            self.observer.on_event(&ExtractEvent::SessionStarted {
                index: self.session_index,
                offset: marker.offset,
            });

            let comment = match self.reader.peek()? {
                Some(Record {
                    kind: RecordKind::Comment(range),
                    ..
                }) => {
                    self.reader.next_record()?;
                    let text = String::from_utf8_lossy(range.slice(self.reader.buffer()));
                    Some(text.into_owned())
                }
                _ => None,
            };
            let Some(plan) = comment.as_deref().and_then(classify) else {
                self.observer.on_event(&ExtractEvent::SessionIgnored {
                    index: self.session_index,
                    comment: comment.unwrap_or_default(),
                });
                continue;
            };

            self.observer.on_event(&ExtractEvent::FileStarted {
                index: self.session_index,
                kind: plan.kind(),
                name: plan.name().to_string(),
            });
            let window = SessionWindow::new(&mut self.reader);
            let policy: Box<dyn ExtractionPolicy<'a> + '_> = match plan {
                SessionPlan::Spl { .. } => Box::new(SplAssembly::new(window, &self.profile)),
                SessionPlan::FelWrite { .. } => Box::new(WriteCapture::new(window)),
                SessionPlan::Flash { .. } => Box::new(FlashCapture::new(window)),
            };
            return Ok(Some(ExtractedFile {
                name: plan.name().to_string(),
                kind: plan.kind(),
                session: self.session_index,
                offset: marker.offset,
                policy,
            }));
        }
    }
}
