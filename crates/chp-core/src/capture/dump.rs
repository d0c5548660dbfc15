//! Human-readable record listing.

use super::record::{ByteRange, Record, RecordKind};

/// Bytes of each transfer shown in a listing line.
const SNIPPET_LEN: usize = 32;
/// Width of the hex column (three characters per snippet byte).
const HEX_COLUMN: usize = SNIPPET_LEN * 3;

/// Hex dump of up to 32 bytes followed by their printable ASCII.
pub fn format_snippet(data: &[u8]) -> String {
    let snippet = &data[..data.len().min(SNIPPET_LEN)];
    let hex_column: String = snippet.iter().map(|&b| hex::encode_upper([b]) + " ").collect();
    let ascii: String = snippet
        .iter()
        .map(|&b| {
            if (0x20..0x7f).contains(&b) {
                b as char
            } else {
                '.'
            }
        })
        .collect();
    format!("{hex_column:<width$} {ascii}", width = HEX_COLUMN)
}

fn text(buf: &[u8], range: ByteRange) -> String {
    String::from_utf8_lossy(range.slice(buf))
        .escape_default()
        .to_string()
}

/// Render one record as a single listing line.
pub fn format_record(record: &Record, buf: &[u8]) -> String {
    match record.kind {
        RecordKind::SessionMarker {
            stream_id,
            stream_len,
            format_version,
        } => format!("MAGIC 0x{stream_id:08x} 0x{stream_len:08x} {format_version}"),
        RecordKind::Comment(range) => format!("ExpectComment '{}'", text(buf, range)),
        RecordKind::ExpectRead(range) => format!(
            "ExpectRead  (0x{:8X}) << {}",
            range.len(),
            format_snippet(range.slice(buf))
        ),
        RecordKind::ExpectWrite(range) => format!(
            "ExpectWrite (0x{:8X}) >> {}",
            range.len(),
            format_snippet(range.slice(buf))
        ),
        RecordKind::Delay { microseconds } => format!("Usleep {microseconds}"),
        RecordKind::Manifest(range) => format!("ExpectManifest '{}'", text(buf, range)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::mock::CaptureBuilder;
    use crate::capture::record::RecordReader;

    fn lines(buf: &[u8]) -> Vec<String> {
        RecordReader::new(buf)
            .map(|r| format_record(&r.unwrap(), buf))
            .collect()
    }

    #[test]
    fn test_listing_lines() {
        let buf = CaptureBuilder::new()
            .marker(0x1234, 0xabcd)
            .comment("fastboot, flash, boot, boot.img")
            .delay(250)
            .build();
        assert_eq!(
            lines(&buf),
            vec![
                "MAGIC 0x00001234 0x0000abcd 2".to_string(),
                "ExpectComment 'fastboot, flash, boot, boot.img'".to_string(),
                "Usleep 250".to_string(),
            ]
        );
    }

    #[test]
    fn test_transfer_snippet() {
        let buf = CaptureBuilder::new().expect_write(b"OK\x00\xff").build();
        let line = &lines(&buf)[0];
        assert!(line.starts_with("ExpectWrite (0x       4) >> 4F 4B 00 FF "));
        assert!(line.ends_with(" OK.."));
    }

    #[test]
    fn test_snippet_is_capped() {
        let data = [b'A'; 40];
        let snippet = format_snippet(&data);
        assert_eq!(snippet.len(), HEX_COLUMN + 1 + SNIPPET_LEN);
        assert!(snippet.ends_with(&"A".repeat(SNIPPET_LEN)));
    }
}
