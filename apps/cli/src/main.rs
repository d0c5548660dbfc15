use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chp_core::{
    CaptureFile, ExtractOptions, ExtractSummary, ManifestSink, RecordReader, SaveSink,
    SessionDemuxer, SplProfile, format_record, run_extraction,
};
use clap::{Parser, ValueEnum};
use tracing::{error, info};

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
enum Mode {
    /// Write every extracted file to the output directory
    Save,
    /// Print `<sha256> <size> <name>` for every extracted file
    List,
    /// Print every capture record
    Dump,
}

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Extract flashed files from USB flashing captures",
    long_about = None
)]
struct Args {
    /// Capture file to decode
    #[arg(required_unless_present = "dump_spl_profile")]
    capture: Option<PathBuf>,

    /// What to do with the capture
    #[arg(value_enum, default_value_t = Mode::Save)]
    mode: Mode,

    /// Same as the `list` mode
    #[arg(short, long)]
    list: bool,

    /// Directory for saved files
    #[arg(short, long, default_value = ".")]
    output_dir: PathBuf,

    /// SPL chunk table to use instead of the built-in one (TOML)
    #[arg(long)]
    spl_profile: Option<PathBuf>,

    /// Print the active SPL profile as TOML and exit
    #[arg(long)]
    dump_spl_profile: bool,

    /// Skip sessions that fail to decode instead of stopping
    #[arg(short, long)]
    keep_going: bool,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

impl Args {
    fn mode(&self) -> Mode {
        if self.list { Mode::List } else { self.mode }
    }
}

fn load_profile(path: Option<&Path>) -> Result<SplProfile> {
    match path {
        Some(path) => SplProfile::load_from_file(path)
            .with_context(|| format!("loading SPL profile {}", path.display())),
        None => Ok(SplProfile::default()),
    }
}

fn dump_records<W: Write>(buf: &[u8], out: &mut W) -> Result<usize> {
    let mut count = 0;
    for record in RecordReader::new(buf) {
        writeln!(out, "{}", format_record(&record?, buf))?;
        count += 1;
    }
    Ok(count)
}

fn extract(
    buf: &[u8],
    mode: Mode,
    profile: SplProfile,
    output_dir: &Path,
    options: &ExtractOptions,
) -> Result<ExtractSummary> {
    let mut demuxer = SessionDemuxer::new(buf, profile);
    let summary = match mode {
        Mode::List => {
            let mut sink = ManifestSink::new(BufWriter::new(io::stdout().lock()));
            let summary = run_extraction(&mut demuxer, &mut sink, options)?;
            sink.into_inner().flush()?;
            summary
        }
        _ => {
            std::fs::create_dir_all(output_dir)
                .with_context(|| format!("creating {}", output_dir.display()))?;
            let mut sink = SaveSink::new(output_dir);
            run_extraction(&mut demuxer, &mut sink, options)?
        }
    };
    Ok(summary)
}

fn run(args: &Args) -> Result<()> {
    let profile = load_profile(args.spl_profile.as_deref())?;
    if args.dump_spl_profile {
        print!("{}", profile.to_toml_string()?);
        return Ok(());
    }

    let Some(path) = args.capture.as_deref() else {
        anyhow::bail!("no capture given");
    };
    let capture =
        CaptureFile::open(path).with_context(|| format!("opening capture {}", path.display()))?;
    info!(path = %capture.path().display(), bytes = capture.len(), "Decoding capture");

    match args.mode() {
        Mode::Dump => {
            let mut out = BufWriter::new(io::stdout().lock());
            let count = dump_records(capture.as_bytes(), &mut out)?;
            out.flush()?;
            info!(records = count, "Dump complete");
        }
        mode => {
            let options = ExtractOptions {
                keep_going: args.keep_going,
            };
            let summary = extract(
                capture.as_bytes(),
                mode,
                profile,
                &args.output_dir,
                &options,
            )?;
            if summary.failed > 0 {
                anyhow::bail!("{} session(s) failed to decode", summary.failed);
            }
        }
    }
    Ok(())
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

    if let Err(e) = run(&args) {
        error!("Error: {:#}", e);
        std::process::exit(1);
    }
}
