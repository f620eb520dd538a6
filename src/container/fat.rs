//! FAT (multi-architecture) wrapper detection.
//!
//! Kernel caches shipped for a single architecture are often still wrapped
//! in a FAT header. Only locating the payload is supported; FAT files are
//! never constructed here beyond the fixed build template.

use tracing::debug;

use super::header::COMPRESSED_SIGNATURE;
use crate::error::{Error, Result};
use crate::macho::FAT_MAGIC;
use crate::util::{read_u32_be, read_u32_be_at};

/// Size of the FAT header (`magic`, `nfat_arch`).
pub const FAT_HEADER_SIZE: usize = 8;

/// A FAT architecture descriptor, decoded to native byte order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FatArch {
    /// CPU type
    pub cputype: u32,
    /// CPU subtype
    pub cpusubtype: u32,
    /// Offset of the slice within the file
    pub offset: u32,
    /// Size of the slice
    pub size: u32,
    /// Alignment as a power of two
    pub align: u32,
}

impl FatArch {
    /// Size of a descriptor on disk.
    pub const SIZE: usize = 20;

    /// Decodes the descriptor at `offset`.
    pub fn parse(data: &[u8], offset: usize) -> Result<Self> {
        Ok(Self {
            cputype: read_u32_be_at(data, offset)?,
            cpusubtype: read_u32_be_at(data, offset + 4)?,
            offset: read_u32_be_at(data, offset + 8)?,
            size: read_u32_be_at(data, offset + 12)?,
            align: read_u32_be_at(data, offset + 16)?,
        })
    }
}

/// Returns true if `data` starts with the FAT magic.
#[inline]
pub fn is_fat(data: &[u8]) -> bool {
    data.len() >= 4 && read_u32_be(data) == FAT_MAGIC
}

/// Returns the architecture descriptors of a FAT file.
pub fn fat_arches(data: &[u8]) -> Result<Vec<FatArch>> {
    let count = read_u32_be_at(data, 4)? as usize;
    let table_end = count
        .checked_mul(FatArch::SIZE)
        .and_then(|n| n.checked_add(FAT_HEADER_SIZE))
        .filter(|&end| end <= data.len())
        .ok_or_else(|| Error::InvalidFat {
            reason: format!("{count} architectures do not fit in {} bytes", data.len()),
        })?;
    debug!("FAT wrapper with {} architecture(s), table ends at {:#x}", count, table_end);

    (0..count)
        .map(|i| FatArch::parse(data, FAT_HEADER_SIZE + i * FatArch::SIZE))
        .collect()
}

/// Locates the container inside `data`.
///
/// Without a FAT wrapper the container starts at offset 0. With one, the
/// first slice that begins with the compressed signature wins; if no slice
/// does, the first slice is used.
pub fn resolve_payload(data: &[u8]) -> Result<usize> {
    if !is_fat(data) {
        return Ok(0);
    }

    let arches = fat_arches(data)?;
    let first = arches.first().ok_or_else(|| Error::InvalidFat {
        reason: "no architectures".into(),
    })?;

    for (i, arch) in arches.iter().enumerate() {
        let offset = arch.offset as usize;
        if offset > data.len() {
            return Err(Error::InvalidFat {
                reason: format!(
                    "architecture {i} offset {offset:#x} beyond end of file ({:#x})",
                    data.len()
                ),
            });
        }
        debug!("Scanning architecture {} at {:#x}", i, offset);
        if read_u32_be_at(data, offset).ok() == Some(COMPRESSED_SIGNATURE) {
            return Ok(offset);
        }
    }

    Ok(first.offset as usize)
}
