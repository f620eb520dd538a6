//! Byte-order and fixed-width string helpers.
//!
//! The container header and the FAT wrapper are big-endian on the wire while
//! the Mach-O image inside is little-endian. All big-endian conversions go
//! through the functions here so that the rest of the crate deals only in
//! native integers.

use byteorder::{BigEndian, ByteOrder};

use crate::error::{Error, Result};

// =============================================================================
// Big-Endian Reads
// =============================================================================

/// Reads a big-endian u32 from an unaligned byte slice.
///
/// # Panics
///
/// Panics if `data.len() < 4`.
#[inline(always)]
pub fn read_u32_be(data: &[u8]) -> u32 {
    BigEndian::read_u32(data)
}

/// Reads a big-endian u32 at `offset`, checking bounds first.
#[inline]
pub fn read_u32_be_at(data: &[u8], offset: usize) -> Result<u32> {
    let end = offset
        .checked_add(4)
        .ok_or_else(|| Error::buffer_too_small(usize::MAX, data.len()))?;
    if end > data.len() {
        return Err(Error::buffer_too_small(end, data.len()));
    }
    Ok(BigEndian::read_u32(&data[offset..end]))
}

/// Writes a big-endian u32 into the first four bytes of `data`.
///
/// # Panics
///
/// Panics if `data.len() < 4`.
#[inline(always)]
pub fn write_u32_be(data: &mut [u8], value: u32) {
    BigEndian::write_u32(data, value)
}

/// Serializes a slice of native words as consecutive big-endian words.
pub fn words_to_be_bytes(words: &[u32]) -> Vec<u8> {
    let mut out = vec![0u8; words.len() * 4];
    BigEndian::write_u32_into(words, &mut out);
    out
}

// =============================================================================
// Four-Character Tags
// =============================================================================

/// Builds the numeric value of a four-character tag such as `b"comp"`.
#[inline(always)]
pub const fn fourcc(tag: &[u8; 4]) -> u32 {
    u32::from_be_bytes(*tag)
}

/// Renders a four-character tag for diagnostics, escaping non-printables.
pub fn fourcc_display(tag: u32) -> String {
    tag.to_be_bytes()
        .iter()
        .map(|&b| {
            if b.is_ascii_graphic() {
                (b as char).to_string()
            } else {
                format!("\\x{:02x}", b)
            }
        })
        .collect()
}

// =============================================================================
// Fixed-Width Names
// =============================================================================

/// Returns the bytes of a NUL-padded field up to (not including) the first NUL.
#[inline]
pub fn trim_nul(data: &[u8]) -> &[u8] {
    let end = memchr::memchr(0, data).unwrap_or(data.len());
    &data[..end]
}

/// Encodes `name` into a NUL-padded 16-byte Mach-O name field.
///
/// Names longer than 16 bytes are truncated, matching how the linker fills
/// `segname`/`sectname`.
pub fn name16(name: &str) -> [u8; 16] {
    let mut out = [0u8; 16];
    let bytes = name.as_bytes();
    let len = bytes.len().min(16);
    out[..len].copy_from_slice(&bytes[..len]);
    out
}

// =============================================================================
// Buffers
// =============================================================================

/// Allocates a zero-filled buffer of `size` bytes.
///
/// Sizes usually come from file headers, so a failed allocation is an
/// [`Error::Allocation`] instead of an abort.
pub fn zeroed_buffer(size: usize) -> Result<Vec<u8>> {
    let mut buffer = Vec::new();
    buffer
        .try_reserve_exact(size)
        .map_err(|_| Error::Allocation { size })?;
    buffer.resize(size, 0);
    Ok(buffer)
}
