//! kcache - A compressed prelinked kernel cache tool.
//!
//! This library decodes and encodes the kernel cache container used to ship
//! a prelinked 64-bit Mach-O kernel, and operates on the decoded image: it
//! exports the prelink info dictionary, lists and extracts the prelinked
//! kexts, and produces a standalone kernel by collapsing the prelink
//! segments.
//!
//! # Features
//!
//! - FAT wrapper detection
//! - Built-in LZSS decoding; LZVN through an injected [`Codec`]
//! - Checksum verification of every decoded payload
//! - Bounds-checked Mach-O load command navigation
//! - Kext extraction with code signature classification
//!
//! # Example
//!
//! ```no_run
//! use std::path::PathBuf;
//! use kcache::{decode, run_actions, Actions, Options};
//!
//! fn main() -> kcache::Result<()> {
//!     let input = std::fs::read("prelinkedkernel")?;
//!     let mut image = decode(&input, &Options::default())?;
//!
//!     let actions = Actions {
//!         kexts: true,
//!         out_dir: PathBuf::from("out"),
//!         ..Default::default()
//!     };
//!     run_actions(&mut image, &actions)?;
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod checksum;
pub mod codec;
pub mod container;
pub mod error;
pub mod macho;
pub mod prelink;
pub mod util;

// Re-export main types
pub use checksum::{adler32, Adler32};
pub use codec::{Codec, Lzss};
pub use container::{decode, encode, ContainerHeader, DecodedImage, Options};
pub use error::{Error, Result};
pub use macho::MachOView;
pub use prelink::{ExtractionSummary, ModuleDescriptor};

use std::fs;
use std::path::{Path, PathBuf};

use tracing::{info, warn};

/// What to do with a decoded image.
#[derive(Debug, Clone)]
pub struct Actions {
    /// Write the decompressed image here
    pub output: Option<PathBuf>,
    /// Save the standalone kernel
    pub kernel: bool,
    /// Save the prelink info dictionary
    pub dictionary: bool,
    /// Extract every kext
    pub kexts: bool,
    /// List kext bundle paths
    pub list: bool,
    /// Directory receiving `kernel`, `Dictionary.plist` and `kexts/`
    pub out_dir: PathBuf,
}

impl Default for Actions {
    fn default() -> Self {
        Self {
            output: None,
            kernel: false,
            dictionary: false,
            kexts: false,
            list: false,
            out_dir: PathBuf::from("."),
        }
    }
}

/// Results of [`run_actions`].
#[derive(Debug, Clone, Default)]
pub struct ActionReport {
    /// Kext bundle paths, when listing was requested
    pub listing: Option<Vec<String>>,
    /// Kext counts, when extraction was requested
    pub extraction: Option<ExtractionSummary>,
    /// Files written, in order
    pub written: Vec<PathBuf>,
}

/// Runs the requested actions on a decoded image.
///
/// Order: dictionary, kexts, list, decompressed output, kernel. Extraction
/// supersedes listing. The kernel runs last because it patches the image in
/// place, so the decompressed output always holds the unpatched image, with
/// `__PRELINK_TEXT` and `__PRELINK_INFO` intact, even when `kernel` is also
/// requested.
pub fn run_actions(image: &mut DecodedImage, actions: &Actions) -> Result<ActionReport> {
    let mut report = ActionReport::default();

    if actions.dictionary || actions.kexts || actions.kernel {
        fs::create_dir_all(&actions.out_dir).map_err(|source| Error::CreateDir {
            path: actions.out_dir.clone(),
            source,
        })?;
    }

    if actions.dictionary {
        info!("Extracting dictionary ...");
        let path = prelink::save_dictionary(image.bytes(), &actions.out_dir)?;
        report.written.push(path);
    }

    if actions.kexts {
        info!("Extracting kexts ...");
        report.extraction = Some(prelink::extract_kexts(image.bytes(), &actions.out_dir)?);
    } else if actions.list {
        info!("Getting list of kexts ...");
        report.listing = Some(prelink::list_kexts(image.bytes())?);
    }

    if let Some(output) = &actions.output {
        if image.is_compressed() {
            write_output(output, image.decoded())?;
            report.written.push(output.clone());
        } else {
            warn!("Input is not compressed, not writing {}", output.display());
        }
    }

    if actions.kernel {
        info!("Extracting kernel ...");
        let path = prelink::save_kernel(image.bytes_mut(), &actions.out_dir)?;
        report.written.push(path);
    }

    Ok(report)
}

fn write_output(path: &Path, data: &[u8]) -> Result<()> {
    fs::write(path, data).map_err(|source| Error::FileWrite {
        path: path.to_path_buf(),
        source,
    })?;
    info!("{} bytes written to {}", data.len(), path.display());
    Ok(())
}
