//! Standalone kernel extraction.
//!
//! The prelinked kexts live in `__PRELINK_TEXT` and `__PRELINK_INFO`, which
//! sit between `__LAST` and `__LINKEDIT`. Instead of moving any bytes, both
//! segments are shrunk to zero length at the end of `__LAST`, so that the
//! image truncated after `__LINKEDIT` is a consistent kernel on its own.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::macho::{
    read_struct, write_struct, MachOView, Section64, SegmentRef, SEG_LAST, SEG_LINKEDIT,
    SEG_PRELINK_INFO, SEG_PRELINK_TEXT, SEG_TEXT_EXEC,
};

/// Name of the extracted kernel file.
pub const KERNEL_FILE_NAME: &str = "kernel";

/// Segments the patcher touches, located in the (possibly nested) header.
struct KernelLayout {
    last: SegmentRef,
    prelink_text: SegmentRef,
    prelink_info: SegmentRef,
    linkedit: SegmentRef,
}

impl KernelLayout {
    fn locate(data: &[u8]) -> Result<Self> {
        let outer = MachOView::new(data, 0)?;
        let view = match outer.find_segment(SEG_TEXT_EXEC)? {
            Some(text_exec) => {
                let base = usize::try_from(text_exec.command.fileoff)
                    .map_err(|_| Error::buffer_too_small(usize::MAX, data.len()))?;
                debug!("Re-rooting at __TEXT_EXEC header {:#x}", base);
                MachOView::new(data, base)?
            }
            None => outer,
        };

        Ok(Self {
            last: view.require_segment(SEG_LAST)?,
            prelink_text: view.require_segment(SEG_PRELINK_TEXT)?,
            prelink_info: view.require_segment(SEG_PRELINK_INFO)?,
            linkedit: view.require_segment(SEG_LINKEDIT)?,
        })
    }
}

/// Collapses the prelink segments in place and returns the length of the
/// standalone kernel (the end of `__LINKEDIT`).
///
/// Nothing is written unless every required segment exists and `__LINKEDIT`
/// lies inside the buffer.
pub fn strip_prelink(data: &mut [u8]) -> Result<usize> {
    let layout = KernelLayout::locate(data)?;

    let linkedit = layout.linkedit.command;
    let kernel_len = linkedit
        .fileoff
        .checked_add(linkedit.filesize)
        .filter(|&end| end <= data.len() as u64)
        .ok_or_else(|| Error::SegmentOutOfBounds {
            name: SEG_LINKEDIT.to_string(),
            start: linkedit.fileoff,
            end: linkedit.file_end(),
            size: data.len(),
        })? as usize;

    let fileoff = layout.last.command.file_end();
    for segment in [layout.prelink_text, layout.prelink_info] {
        let mut command = segment.command;
        command.vmaddr = linkedit.vmaddr;
        command.vmsize = 0;
        command.fileoff = fileoff;
        command.filesize = 0;
        write_struct(data, segment.offset, &command)?;

        if let Some(section_offset) = segment.first_section_offset() {
            let mut section = read_struct::<Section64>(data, section_offset)?;
            section.addr = linkedit.vmaddr;
            section.size = 0;
            section.offset = fileoff as u32;
            write_struct(data, section_offset, &section)?;
        }
        debug!(
            "Collapsed {} to vmaddr={:#x} fileoff={:#x}",
            segment.name(),
            linkedit.vmaddr,
            fileoff
        );
    }

    Ok(kernel_len)
}

/// Strips the prelinked kexts from `data` and writes `out_dir/kernel`.
pub fn save_kernel(data: &mut [u8], out_dir: &Path) -> Result<PathBuf> {
    let len = strip_prelink(data)?;
    let path = out_dir.join(KERNEL_FILE_NAME);
    fs::write(&path, &data[..len]).map_err(|source| Error::FileWrite {
        path: path.clone(),
        source,
    })?;
    info!("{} bytes written to {}", len, path.display());
    Ok(path)
}
