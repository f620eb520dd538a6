//! Header template for building LZVN containers.
//!
//! Encoded containers start with a single-architecture FAT wrapper (28
//! bytes) followed by the 384-byte container header. The template holds
//! that prefix as big-endian word values; four words are patched per build.

use super::fat::FAT_HEADER_SIZE;
use super::header::ContainerHeader;
use crate::macho::{CPU_SUBTYPE_X86_64_ALL, CPU_TYPE_X86_64, FAT_MAGIC};
use crate::util::words_to_be_bytes;

/// Number of words in the template.
pub const TEMPLATE_WORDS: usize = 103;

/// Size of the template in bytes.
pub const TEMPLATE_SIZE: usize = TEMPLATE_WORDS * 4;

/// Offset of the container header within the template.
pub const CONTAINER_OFFSET: usize = FAT_HEADER_SIZE + super::fat::FatArch::SIZE;

/// Word index of the FAT slice size.
const WORD_SLICE_SIZE: usize = 5;
/// Word index of the checksum.
const WORD_CHECKSUM: usize = 9;
/// Word index of the uncompressed size.
const WORD_UNCOMPRESSED_SIZE: usize = 10;
/// Word index of the compressed size.
const WORD_COMPRESSED_SIZE: usize = 11;

/// Patched at build time.
const PATCHED: u32 = 0xFFFF_FFFF;

/// The build template: FAT header, one x86_64 slice at offset 28, then a
/// `'comp'`/`'lzvn'` header with prelink version 1.
pub const HEADER_TEMPLATE: [u32; TEMPLATE_WORDS] = {
    let mut words = [0u32; TEMPLATE_WORDS];
    words[0] = FAT_MAGIC;
    words[1] = 1;
    words[2] = CPU_TYPE_X86_64;
    words[3] = CPU_SUBTYPE_X86_64_ALL;
    words[4] = CONTAINER_OFFSET as u32;
    words[WORD_SLICE_SIZE] = PATCHED;
    words[6] = 0;
    words[7] = u32::from_be_bytes(*b"comp");
    words[8] = u32::from_be_bytes(*b"lzvn");
    words[WORD_CHECKSUM] = PATCHED;
    words[WORD_UNCOMPRESSED_SIZE] = PATCHED;
    words[WORD_COMPRESSED_SIZE] = PATCHED;
    words[12] = 1;
    words
};

/// Returns a patched copy of the template.
///
/// The slice size is written as `TEMPLATE_SIZE + compressed_size - 28`,
/// i.e. everything after the FAT wrapper.
pub fn build_header(checksum: u32, uncompressed_size: u32, compressed_size: u32) -> Vec<u8> {
    let mut words = HEADER_TEMPLATE;
    words[WORD_SLICE_SIZE] = (TEMPLATE_SIZE as u32)
        .wrapping_add(compressed_size)
        .wrapping_sub(28);
    words[WORD_CHECKSUM] = checksum;
    words[WORD_UNCOMPRESSED_SIZE] = uncompressed_size;
    words[WORD_COMPRESSED_SIZE] = compressed_size;
    words_to_be_bytes(&words)
}

const _: () = assert!(CONTAINER_OFFSET == 28);
const _: () = assert!(CONTAINER_OFFSET + ContainerHeader::SIZE == TEMPLATE_SIZE);
