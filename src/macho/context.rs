//! Bounds-checked navigation over a Mach-O header and its load commands.
//!
//! A [`MachOView`] never trusts the on-disk sizes: every record is checked to
//! lie within both the buffer and the `sizeofcmds` window before it is read,
//! and records are copied out with `zerocopy` rather than reinterpreted in
//! place, so unaligned headers (a nested `__TEXT_EXEC` header, a kext inside
//! `__PRELINK_TEXT`) are handled the same as aligned ones.

use zerocopy::{FromBytes, Immutable, IntoBytes};

use super::constants::*;
use super::structs::*;
use crate::error::{Error, Result};

// =============================================================================
// Command References
// =============================================================================

/// A load command located in the buffer.
#[derive(Debug, Clone, Copy)]
pub struct LoadCommandRef {
    /// Command type
    pub cmd: u32,
    /// Declared command size
    pub cmdsize: u32,
    /// Absolute offset of the command within the buffer
    pub offset: usize,
}

/// A segment command located in the buffer.
#[derive(Debug, Clone, Copy)]
pub struct SegmentRef {
    /// Copy of the segment command
    pub command: SegmentCommand64,
    /// Absolute offset of the segment command within the buffer
    pub offset: usize,
}

impl SegmentRef {
    /// Returns the segment name.
    pub fn name(&self) -> &str {
        self.command.name()
    }

    /// Absolute offset of the first section header, if the segment has one.
    pub fn first_section_offset(&self) -> Option<usize> {
        let needed = SegmentCommand64::SIZE + Section64::SIZE;
        if self.command.nsects > 0 && self.command.cmdsize as usize >= needed {
            Some(self.offset + SegmentCommand64::SIZE)
        } else {
            None
        }
    }
}

// =============================================================================
// Mach-O View
// =============================================================================

/// Read-only view of a 64-bit Mach-O image located at `base` within `data`.
#[derive(Debug, Clone, Copy)]
pub struct MachOView<'a> {
    data: &'a [u8],
    base: usize,
    header: MachHeader64,
}

impl<'a> MachOView<'a> {
    /// Validates the header at `base` and creates a view.
    ///
    /// Fails with [`Error::InvalidMachoMagic`] before looking at any load
    /// command if the magic is wrong.
    pub fn new(data: &'a [u8], base: usize) -> Result<Self> {
        let header = read_struct::<MachHeader64>(data, base)?;
        if !header.is_valid() {
            return Err(Error::InvalidMachoMagic(header.magic));
        }

        let view = Self { data, base, header };
        let end = view.commands_end();
        if end > data.len() {
            return Err(Error::buffer_too_small(end, data.len()));
        }
        Ok(view)
    }

    /// Returns the parsed header.
    #[inline]
    pub fn header(&self) -> &MachHeader64 {
        &self.header
    }

    /// Returns the offset of the header within the buffer.
    #[inline]
    pub fn base(&self) -> usize {
        self.base
    }

    /// Returns the underlying buffer.
    #[inline]
    pub fn data(&self) -> &'a [u8] {
        self.data
    }

    /// Absolute offset one past the last load command byte.
    #[inline]
    fn commands_end(&self) -> usize {
        self.base + MachHeader64::SIZE + self.header.sizeofcmds as usize
    }

    /// Iterates over the load commands in file order.
    pub fn load_commands(&self) -> LoadCommands<'a> {
        LoadCommands {
            data: self.data,
            offset: self.base + MachHeader64::SIZE,
            end: self.commands_end(),
            failed: false,
        }
    }

    /// Returns the first load command of type `cmd`.
    pub fn find_load_command(&self, cmd: u32) -> Result<Option<LoadCommandRef>> {
        for lc in self.load_commands() {
            let lc = lc?;
            if lc.cmd == cmd {
                return Ok(Some(lc));
            }
        }
        Ok(None)
    }

    /// Returns the segment whose 16-byte name field equals `name`.
    ///
    /// The comparison is case-sensitive and covers the NUL padding, so
    /// `"__TEXT"` never matches `"__TEXT_EXEC"`.
    pub fn find_segment(&self, name: &str) -> Result<Option<SegmentRef>> {
        for lc in self.load_commands() {
            let lc = lc?;
            if lc.cmd != LC_SEGMENT_64 {
                continue;
            }
            let seg = self.segment_at(lc)?;
            if seg.command.has_name(name) {
                return Ok(Some(seg));
            }
        }
        Ok(None)
    }

    /// Like [`MachOView::find_segment`], but absence is an error.
    pub fn require_segment(&self, name: &str) -> Result<SegmentRef> {
        self.find_segment(name)?
            .ok_or_else(|| Error::segment_not_found(name))
    }

    /// Returns all segments in file order.
    pub fn segments(&self) -> Result<Vec<SegmentRef>> {
        let mut segments = Vec::new();
        for lc in self.load_commands() {
            let lc = lc?;
            if lc.cmd == LC_SEGMENT_64 {
                segments.push(self.segment_at(lc)?);
            }
        }
        Ok(segments)
    }

    /// Returns true if the image carries prelinked kexts: a non-empty
    /// `__PRELINK_INFO` segment and a `__PRELINK_TEXT` segment.
    pub fn is_prelinked(&self) -> Result<bool> {
        let info = self.find_segment(SEG_PRELINK_INFO)?;
        let text = self.find_segment(SEG_PRELINK_TEXT)?;
        Ok(matches!(info, Some(seg) if seg.command.filesize != 0) && text.is_some())
    }

    /// One line for the header followed by one line per segment.
    pub fn summary(&self) -> Result<Vec<String>> {
        let mut lines = vec![format!(
            "{} filetype={:#x} ncmds={} sizeofcmds={:#x}",
            self.header.arch_name(),
            self.header.filetype,
            self.header.ncmds,
            self.header.sizeofcmds
        )];
        for seg in self.segments()? {
            lines.push(format!(
                "{:<16} vmaddr={:#018x} vmsize={:#x} fileoff={:#x} filesize={:#x}",
                seg.name(),
                seg.command.vmaddr,
                seg.command.vmsize,
                seg.command.fileoff,
                seg.command.filesize
            ));
        }
        Ok(lines)
    }

    /// Returns the file bytes a segment maps, checked against the buffer.
    pub fn segment_data(&self, seg: &SegmentRef) -> Result<&'a [u8]> {
        let start = seg.command.fileoff;
        let end = start
            .checked_add(seg.command.filesize)
            .filter(|&end| end <= self.data.len() as u64)
            .ok_or_else(|| Error::SegmentOutOfBounds {
                name: seg.name().to_string(),
                start,
                end: start.saturating_add(seg.command.filesize),
                size: self.data.len(),
            })?;
        Ok(&self.data[start as usize..end as usize])
    }

    fn segment_at(&self, lc: LoadCommandRef) -> Result<SegmentRef> {
        if (lc.cmdsize as usize) < SegmentCommand64::SIZE {
            return Err(Error::LoadCommandOverflow { offset: lc.offset });
        }
        let command = read_struct::<SegmentCommand64>(self.data, lc.offset)?;
        Ok(SegmentRef {
            command,
            offset: lc.offset,
        })
    }
}

// =============================================================================
// Load Command Iterator
// =============================================================================

/// Iterator over the load commands of a [`MachOView`].
///
/// Yields an error and stops if a command header or a declared command size
/// would cross the end of the load command area.
#[derive(Debug, Clone)]
pub struct LoadCommands<'a> {
    data: &'a [u8],
    offset: usize,
    end: usize,
    failed: bool,
}

impl Iterator for LoadCommands<'_> {
    type Item = Result<LoadCommandRef>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed || self.offset >= self.end {
            return None;
        }

        let offset = self.offset;
        if offset + LoadCommand::SIZE > self.end {
            self.failed = true;
            return Some(Err(Error::LoadCommandOverflow { offset }));
        }

        let lc = match read_struct::<LoadCommand>(self.data, offset) {
            Ok(lc) => lc,
            Err(e) => {
                self.failed = true;
                return Some(Err(e));
            }
        };

        let size = lc.cmdsize as usize;
        if size < LoadCommand::SIZE || size > self.end - offset {
            self.failed = true;
            return Some(Err(Error::LoadCommandOverflow { offset }));
        }

        self.offset += size;
        Some(Ok(LoadCommandRef {
            cmd: lc.cmd,
            cmdsize: lc.cmdsize,
            offset,
        }))
    }
}

// =============================================================================
// Record Access
// =============================================================================

/// Copies a `T` out of `data` at `offset`, checking bounds.
pub fn read_struct<T: FromBytes>(data: &[u8], offset: usize) -> Result<T> {
    let size = std::mem::size_of::<T>();
    let bytes = data
        .get(offset..)
        .filter(|rest| rest.len() >= size)
        .ok_or_else(|| Error::buffer_too_small(offset.saturating_add(size), data.len()))?;
    T::read_from_prefix(bytes)
        .map(|(value, _)| value)
        .map_err(|_| Error::buffer_too_small(offset.saturating_add(size), data.len()))
}

/// Writes `value` into `data` at `offset`, checking bounds.
pub fn write_struct<T: IntoBytes + Immutable>(
    data: &mut [u8],
    offset: usize,
    value: &T,
) -> Result<()> {
    let bytes = value.as_bytes();
    let end = offset
        .checked_add(bytes.len())
        .filter(|&end| end <= data.len())
        .ok_or_else(|| Error::buffer_too_small(offset.saturating_add(bytes.len()), data.len()))?;
    data[offset..end].copy_from_slice(bytes);
    Ok(())
}
