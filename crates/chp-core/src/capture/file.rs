//! Read-only capture input.

use memmap2::Mmap;
use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, instrument};

/// A capture mapped into memory. Every decoded range borrows from it.
#[derive(Debug)]
pub struct CaptureFile {
    path: PathBuf,
    map: Option<Mmap>,
}

impl CaptureFile {
    #[instrument(level = "debug", skip_all, fields(path = %path.as_ref().display()))]
    pub fn open<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = File::open(&path)?;
        let len = file.metadata()?.len();
        // Mapping an empty file fails on some platforms; an empty capture
        // simply has no records.
        let map = if len == 0 {
            None
        } else {
            // SAFETY: the mapping is read-only and the capture is not
            // modified while it is being decoded.
            Some(unsafe { Mmap::map(&file)? })
        };
        debug!(bytes = len, "Mapped capture");
        Ok(Self { path, map })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.map.as_deref().unwrap_or(&[])
    }

    pub fn len(&self) -> usize {
        self.as_bytes().len()
    }

    pub fn is_empty(&self) -> bool {
        self.as_bytes().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_maps_file_contents() {
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        tmp.write_all(b"\x00\x01\x02").unwrap();
        tmp.flush().unwrap();

        let capture = CaptureFile::open(tmp.path()).unwrap();
        assert_eq!(capture.as_bytes(), b"\x00\x01\x02");
        assert_eq!(capture.path(), tmp.path());
    }

    #[test]
    fn test_empty_file() {
        let tmp = tempfile::NamedTempFile::new().unwrap();
        let capture = CaptureFile::open(tmp.path()).unwrap();
        assert!(capture.is_empty());
    }

    #[test]
    fn test_missing_file() {
        assert!(CaptureFile::open("/nonexistent/capture.chp").is_err());
    }
}
