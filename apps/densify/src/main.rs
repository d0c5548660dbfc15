use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chp_core::CaptureFile;
use chp_core::sparse::{self, SparsePlan};
use clap::Parser;
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Convert Android sparse images into flat images",
    long_about = None
)]
struct Args {
    /// Sparse image, or several concatenated sparse images
    input: PathBuf,

    /// Flat image to write
    output: PathBuf,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

fn densify(input: &Path, output: &Path) -> Result<(SparsePlan, u64)> {
    let source = CaptureFile::open(input).with_context(|| format!("opening {}", input.display()))?;
    let plan = sparse::plan(source.as_bytes())
        .with_context(|| format!("parsing sparse image {}", input.display()))?;

    let file = File::create(output).with_context(|| format!("creating {}", output.display()))?;
    file.set_len(plan.dense_size)?;
    let mut out = BufWriter::new(file);
    let written = sparse::apply(&plan, source.as_bytes(), &mut out)
        .with_context(|| format!("writing {}", output.display()))?;
    Ok((plan, written))
}

fn main() {
    let args = Args::parse();

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::builder()
                .with_default_directive(if args.verbose {
                    tracing::Level::DEBUG.into()
                } else {
                    tracing::Level::INFO.into()
                })
                .from_env_lossy(),
        )
        .with_writer(std::io::stderr)
        .finish();

    tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");

    match densify(&args.input, &args.output) {
        Ok((plan, written)) => info!(
            images = plan.images,
            chunks = plan.chunks.len(),
            dense_size = plan.dense_size,
            written,
            "Densified {}",
            args.output.display()
        ),
        Err(e) => {
            error!("Error: {:#}", e);
            std::process::exit(1);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // One 8-byte-block image: RAW block 0, DONT_CARE block 1.
    const IMAGE: &[u8] = &[
        0x3A, 0xFF, 0x26, 0xED, 1, 0, 0, 0, 28, 0, 12, 0, 8, 0, 0, 0, 2, 0, 0, 0, 2, 0, 0, 0, 0, 0,
        0, 0, // file header
        0xC1, 0xCA, 0, 0, 1, 0, 0, 0, 20, 0, 0, 0, b'r', b'a', b'w', b'd', b'a', b't', b'a', b'!',
        0xC3, 0xCA, 0, 0, 1, 0, 0, 0, 12, 0, 0, 0,
    ];

    #[test]
    fn test_densify_file() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("system.simg");
        let output = dir.path().join("system.img");
        std::fs::write(&input, IMAGE).unwrap();

        let (plan, written) = densify(&input, &output).unwrap();
        assert_eq!(plan.dense_size, 16);
        assert_eq!(written, 8);
        let dense = std::fs::read(&output).unwrap();
        assert_eq!(dense, b"rawdata!\0\0\0\0\0\0\0\0");
    }

    #[test]
    fn test_rejects_non_sparse_input() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("plain.img");
        std::fs::write(&input, [0u8; 64]).unwrap();
        let err = densify(&input, &dir.path().join("out.img")).unwrap_err();
        assert!(format!("{err:#}").contains("bad sparse magic"));
    }
}
