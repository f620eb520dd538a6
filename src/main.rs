//! kcache - A compressed prelinked kernel cache tool.
//!
//! Decode a kernel cache and extract its kernel, prelink dictionary and
//! kexts, or encode a prelinked kernel into a new cache.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::{debug, info, Level};
use tracing_subscriber::FmtSubscriber;

use kcache::{
    decode, encode, run_actions, Actions, Codec, DecodedImage, Error, MachOView, Options,
};

/// A compressed prelinked kernel cache tool.
#[derive(Parser, Debug)]
#[command(name = "kcache")]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Compress a prelinked kernel into an LZVN kernel cache.
    ///
    /// Needs an LZVN codec linked into the binary; the stock build has none
    /// and reports this command as unavailable.
    Encode {
        /// Prelinked kernel to compress
        input: PathBuf,

        /// Kernel cache to write
        output: PathBuf,

        /// Verbosity level (0=quiet, 1=warnings, 2=info, 3=debug)
        #[arg(short, long, default_value = "2")]
        verbosity: u8,
    },

    /// Decompress a kernel cache and operate on the prelinked kernel
    Decode {
        /// Kernel cache to read
        input: PathBuf,

        /// Write the decompressed image here
        output: Option<PathBuf>,

        /// Save the kernel without its prelinked kexts
        #[arg(short, long)]
        kernel: bool,

        /// Save the prelink info as Dictionary.plist
        #[arg(short, long)]
        dictionary: bool,

        /// Extract every kext below <out-dir>/kexts
        #[arg(short = 'x', long)]
        kexts: bool,

        /// List the bundle path of every kext
        #[arg(short, long)]
        list: bool,

        /// Directory for extracted files
        #[arg(short, long, default_value = ".")]
        out_dir: PathBuf,

        /// Verbosity level (0=quiet, 1=warnings, 2=info, 3=debug)
        #[arg(short, long, default_value = "2")]
        verbosity: u8,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Encode {
            input,
            output,
            verbosity,
        } => {
            setup_logging(verbosity);
            cmd_encode(&input, &output)
        }
        Commands::Decode {
            input,
            output,
            kernel,
            dictionary,
            kexts,
            list,
            out_dir,
            verbosity,
        } => {
            setup_logging(verbosity);
            let actions = Actions {
                output,
                kernel,
                dictionary,
                kexts,
                list,
                out_dir,
            };
            cmd_decode(&input, &actions)
        }
    }
}

fn setup_logging(verbosity: u8) {
    let level = match verbosity {
        0 => Level::ERROR,
        1 => Level::WARN,
        2 => Level::INFO,
        _ => Level::DEBUG,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .without_time()
        .finish();

    tracing::subscriber::set_global_default(subscriber).ok();
}

/// The LZVN codec linked into this binary, if any.
fn lzvn_codec() -> Option<&'static dyn Codec> {
    None
}

fn read_input(path: &Path) -> Result<Vec<u8>> {
    let data = fs::read(path).map_err(|source| Error::FileRead {
        path: path.to_path_buf(),
        source,
    })?;
    info!("Read {} bytes from {}", data.len(), path.display());
    Ok(data)
}

fn cmd_decode(input: &Path, actions: &Actions) -> Result<()> {
    let data = read_input(input)?;

    let options = Options {
        codec: lzvn_codec(),
    };
    let mut image =
        decode(&data, &options).with_context(|| format!("Failed to decode {}", input.display()))?;
    drop(data);

    log_summary(&image);

    let report = run_actions(&mut image, actions)?;

    if let Some(listing) = &report.listing {
        for path in listing {
            println!("{}", path);
        }
    }
    if let Some(summary) = &report.extraction {
        println!(
            "{} kexts ({} signed, {} unsigned)",
            summary.total,
            summary.signed,
            summary.unsigned()
        );
    }
    for path in &report.written {
        info!("Wrote {}", path.display());
    }

    info!("Done.");
    Ok(())
}

/// Logs the container header and the kernel's segments at debug level.
fn log_summary(image: &DecodedImage) {
    if let Some(header) = image.header() {
        debug!("{}", header);
    }
    match MachOView::new(image.bytes(), 0).and_then(|view| view.summary()) {
        Ok(lines) => {
            for line in &lines {
                debug!("{}", line);
            }
        }
        Err(e) => debug!("No segment summary: {}", e),
    }
}

fn cmd_encode(input: &Path, output: &Path) -> Result<()> {
    let codec = lzvn_codec()
        .ok_or(Error::CodecUnavailable { codec: "lzvn" })
        .context("encode needs an LZVN codec, which this build does not include")?;
    let data = read_input(input)?;
    let container =
        encode(&data, codec).with_context(|| format!("Failed to encode {}", input.display()))?;

    fs::write(output, &container)
        .with_context(|| format!("Failed to write {}", output.display()))?;
    info!("{} bytes written to {}", container.len(), output.display());
    Ok(())
}
