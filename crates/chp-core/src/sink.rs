//! Sinks - where extracted files end up - and the extraction driver.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::{debug, instrument};

use crate::error::DecodeError;
use crate::events::{ExtractEvent, ExtractObserver};
use crate::session::{ExtractedFile, SessionDemuxer};

#[derive(Error, Debug)]
pub enum SinkError {
    #[error(transparent)]
    Decode(#[from] DecodeError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Consumes extracted files one at a time.
pub trait FileSink {
    /// Drain `file` completely. Returns the number of bytes consumed.
    fn consume(&mut self, file: &mut ExtractedFile<'_, '_>) -> Result<u64, SinkError>;
}

/// Prints `<sha256>\t<size>\t<name>` per file.
pub struct ManifestSink<W: Write> {
    out: W,
}

impl<W: Write> ManifestSink<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

impl<W: Write> FileSink for ManifestSink<W> {
    fn consume(&mut self, file: &mut ExtractedFile<'_, '_>) -> Result<u64, SinkError> {
        let mut hasher = Sha256::new();
        let mut size = 0u64;
        while let Some(chunk) = file.next_chunk()? {
            hasher.update(chunk);
            size += chunk.len() as u64;
        }
        writeln!(
            self.out,
            "{}\t{:9}\t{}",
            hex::encode(hasher.finalize()),
            size,
            file.name()
        )?;
        Ok(size)
    }
}

/// Output file name: two-digit sequence number and the base name.
pub fn output_name(index: usize, name: &str) -> String {
    let base = Path::new(name)
        .file_name()
        .map(|base| base.to_string_lossy().into_owned())
        .unwrap_or_else(|| "unnamed".to_string());
    format!("{index:02}-{base}")
}

/// Writes each file to `NN-basename` in a directory.
pub struct SaveSink {
    dir: PathBuf,
    counter: usize,
    saved: Vec<PathBuf>,
}

impl SaveSink {
    pub fn new<P: Into<PathBuf>>(dir: P) -> Self {
        Self {
            dir: dir.into(),
            counter: 0,
            saved: Vec::new(),
        }
    }

    /// Files written completely so far.
    pub fn saved(&self) -> &[PathBuf] {
        &self.saved
    }

    fn write_file(path: &Path, file: &mut ExtractedFile<'_, '_>) -> Result<u64, SinkError> {
        let mut out = BufWriter::new(File::create(path)?);
        let mut size = 0u64;
        while let Some(chunk) = file.next_chunk()? {
            out.write_all(chunk)?;
            size += chunk.len() as u64;
        }
        out.flush()?;
        Ok(size)
    }
}

impl FileSink for SaveSink {
    fn consume(&mut self, file: &mut ExtractedFile<'_, '_>) -> Result<u64, SinkError> {
        self.counter += 1;
        let path = self.dir.join(output_name(self.counter, file.name()));
        debug!(path = %path.display(), "Saving");
        match Self::write_file(&path, file) {
            Ok(size) => {
                self.saved.push(path);
                Ok(size)
            }
            Err(e) => {
                // Leave no truncated output behind.
                let _ = std::fs::remove_file(&path);
                Err(e)
            }
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExtractOptions {
    /// Skip sessions that fail with a session-local error.
    pub keep_going: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExtractSummary {
    pub files: usize,
    pub bytes: u64,
    pub failed: usize,
}

/// Feed every file of the capture to `sink`.
///
/// Each file is drained completely before the next one is requested.
/// Format errors and I/O errors always abort; protocol and identity errors
/// abort unless `keep_going` is set, in which case the session is counted
/// as failed and extraction resumes at the next session.
#[instrument(skip_all)]
pub fn run_extraction<O, K>(
    demuxer: &mut SessionDemuxer<'_, O>,
    sink: &mut K,
    options: &ExtractOptions,
) -> Result<ExtractSummary, SinkError>
where
    O: ExtractObserver,
    K: FileSink + ?Sized,
{
    let mut summary = ExtractSummary::default();
    loop {
        let (name, session, result) = {
            let Some(mut file) = demuxer.next_file()? else {
                break;
            };
            let result = sink.consume(&mut file);
            (file.name().to_string(), file.session(), result)
        };

        match result {
            Ok(bytes) => {
                summary.files += 1;
                summary.bytes += bytes;
                demuxer
                    .observer()
                    .on_event(&ExtractEvent::FileFinished { name, bytes });
            }
            Err(SinkError::Decode(e)) if options.keep_going && e.is_session_local() => {
                summary.failed += 1;
                demuxer.observer().on_event(&ExtractEvent::SessionFailed {
                    index: session,
                    message: format!("{name}: {e}"),
                });
            }
            Err(e) => return Err(e),
        }
    }

    demuxer.observer().on_event(&ExtractEvent::Complete {
        files: summary.files,
        bytes: summary.bytes,
        failed: summary.failed,
    });
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::capture::mock::CaptureBuilder;
    use crate::error::{FormatErrorKind, ProtocolErrorKind};
    use crate::events::NullObserver;
    use crate::session::fixtures::{sample_capture, test_profile};

    fn demuxer(buf: &[u8]) -> SessionDemuxer<'_, NullObserver> {
        SessionDemuxer::with_observer(buf, test_profile(), Arc::new(NullObserver))
    }

    fn manifest(buf: &[u8]) -> String {
        let mut sink = ManifestSink::new(Vec::new());
        run_extraction(&mut demuxer(buf), &mut sink, &ExtractOptions::default()).unwrap();
        String::from_utf8(sink.into_inner()).unwrap()
    }

    fn broken_capture() -> Vec<u8> {
        CaptureBuilder::new()
            .session("fel, write, 0x100, broken.bin")
            .fel_execute(0x100)
            .session("fel, write, 0x100, good.bin")
            .fel_write(0x100, &[&b"ok"[..]])
            .build()
    }

    #[test]
    fn test_output_name() {
        assert_eq!(output_name(1, "u-boot.bin"), "01-u-boot.bin");
        assert_eq!(output_name(12, "out/images/boot.img"), "12-boot.img");
        assert_eq!(output_name(3, ""), "03-unnamed");
        assert_eq!(output_name(4, ".."), "04-unnamed");
    }

    #[test]
    fn test_manifest_lines() {
        let text = manifest(&sample_capture());
        let lines: Vec<_> = text.lines().collect();
        assert_eq!(lines.len(), 3);

        let digest = hex::encode(Sha256::digest(b"uboot-image"));
        assert_eq!(lines[1], format!("{digest}\t       11\tout/u-boot.bin"));
        assert!(lines[0].ends_with("\t       40\tspl.bin"));
        assert!(lines[2].ends_with("\t       14\tboot.img"));
    }

    #[test]
    fn test_manifest_is_repeatable() {
        let buf = sample_capture();
        assert_eq!(manifest(&buf), manifest(&buf));
    }

    #[test]
    fn test_save_sink_writes_numbered_files() {
        let dir = tempfile::tempdir().unwrap();
        let buf = sample_capture();
        let mut sink = SaveSink::new(dir.path());
        let summary =
            run_extraction(&mut demuxer(&buf), &mut sink, &ExtractOptions::default()).unwrap();

        assert_eq!(
            summary,
            ExtractSummary {
                files: 3,
                bytes: 40 + 11 + 14,
                failed: 0
            }
        );
        assert_eq!(sink.saved().len(), 3);
        assert_eq!(
            std::fs::read(dir.path().join("02-u-boot.bin")).unwrap(),
            b"uboot-image"
        );
        assert_eq!(
            std::fs::read(dir.path().join("03-boot.img")).unwrap(),
            b"ANDROID!kernel"
        );
        assert_eq!(
            std::fs::read(dir.path().join("01-spl.bin")).unwrap().len(),
            40
        );
    }

    #[test]
    fn test_protocol_error_aborts_by_default() {
        let dir = tempfile::tempdir().unwrap();
        let buf = broken_capture();
        let mut sink = SaveSink::new(dir.path());
        let err = run_extraction(&mut demuxer(&buf), &mut sink, &ExtractOptions::default())
            .unwrap_err();
        assert!(matches!(
            err,
            SinkError::Decode(DecodeError::Protocol {
                kind: ProtocolErrorKind::UnexpectedOperation { .. },
                ..
            })
        ));
        assert!(!dir.path().join("01-broken.bin").exists());
    }

    #[test]
    fn test_keep_going_skips_failed_session() {
        let dir = tempfile::tempdir().unwrap();
        let buf = broken_capture();
        let mut sink = SaveSink::new(dir.path());
        let summary = run_extraction(
            &mut demuxer(&buf),
            &mut sink,
            &ExtractOptions { keep_going: true },
        )
        .unwrap();

        assert_eq!(
            summary,
            ExtractSummary {
                files: 1,
                bytes: 2,
                failed: 1
            }
        );
        assert!(!dir.path().join("01-broken.bin").exists());
        let good = std::fs::read(dir.path().join("02-good.bin")).unwrap();
        assert_eq!(good, b"ok");
    }

    #[test]
    fn test_identity_mismatch_is_session_local() {
        let buf = CaptureBuilder::new()
            .session("fel, spl, other-soc.bin")
            .fel_version(0x0016_5100, 1, 0)
            .session("fel, write, 0x100, good.bin")
            .fel_write(0x100, &[&b"ok"[..]])
            .build();
        let mut sink = ManifestSink::new(Vec::new());
        let summary = run_extraction(
            &mut demuxer(&buf),
            &mut sink,
            &ExtractOptions { keep_going: true },
        )
        .unwrap();
        assert_eq!(summary.failed, 1);
        let text = String::from_utf8(sink.into_inner()).unwrap();
        assert_eq!(text.lines().count(), 1);
        assert!(text.ends_with("\tgood.bin\n"));
    }

    #[test]
    fn test_format_error_is_always_fatal() {
        let mut buf = CaptureBuilder::new()
            .session("fel, write, 0x100, a.bin")
            .fel_write(0x100, &[&[0u8; 64][..]])
            .build();
        buf.truncate(buf.len() - 10);
        let mut sink = ManifestSink::new(Vec::new());
        let err = run_extraction(
            &mut demuxer(&buf),
            &mut sink,
            &ExtractOptions { keep_going: true },
        )
        .unwrap_err();
        assert!(matches!(
            err,
            SinkError::Decode(DecodeError::Format {
                kind: FormatErrorKind::TruncatedPayload { .. },
                ..
            })
        ));
    }
}
