//! The compressed kernel cache header.
//!
//! ```text
//! offset size field
//!      0    4 signature        'comp'
//!      4    4 compress_type    'lzss' | 'lzvn'
//!      8    4 checksum         of the uncompressed payload
//!     12    4 uncompressed_size
//!     16    4 compressed_size
//!     20    4 prelink_version  >= 1 means KASLR capable
//!     24   40 reserved
//!     64   64 platform_name
//!    128  256 root_path
//!    384      payload
//! ```
//!
//! All integers are big-endian.

use std::fmt;

use crate::error::{Error, Result};
use crate::util::{fourcc, fourcc_display, read_u32_be_at, trim_nul, write_u32_be};

/// Signature marking a compressed container.
pub const COMPRESSED_SIGNATURE: u32 = fourcc(b"comp");

/// Compression type tag for the legacy LZSS codec.
pub const COMPRESS_TYPE_LZSS: u32 = fourcc(b"lzss");

/// Compression type tag for the LZVN codec.
pub const COMPRESS_TYPE_LZVN: u32 = fourcc(b"lzvn");

/// Length of the platform name field.
pub const PLATFORM_NAME_LEN: usize = 64;

/// Length of the root path field.
pub const ROOT_PATH_LEN: usize = 256;

/// Payload codec named by the header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompressionType {
    /// Legacy ring-buffer LZSS
    Lzss,
    /// LZVN
    Lzvn,
}

impl CompressionType {
    /// Maps a header tag to a known codec.
    pub fn from_tag(tag: u32) -> Result<Self> {
        match tag {
            COMPRESS_TYPE_LZSS => Ok(CompressionType::Lzss),
            COMPRESS_TYPE_LZVN => Ok(CompressionType::Lzvn),
            _ => Err(Error::UnsupportedCompression { tag }),
        }
    }

    /// Returns the header tag.
    pub fn tag(self) -> u32 {
        match self {
            CompressionType::Lzss => COMPRESS_TYPE_LZSS,
            CompressionType::Lzvn => COMPRESS_TYPE_LZVN,
        }
    }
}

/// Decoded container header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerHeader {
    /// Signature (`'comp'` when compressed)
    pub signature: u32,
    /// Compression type tag
    pub compress_type: u32,
    /// Checksum of the uncompressed payload
    pub checksum: u32,
    /// Size of the payload after decompression
    pub uncompressed_size: u32,
    /// Size of the payload as stored
    pub compressed_size: u32,
    /// Prelink version
    pub prelink_version: u32,
    /// Reserved words
    pub reserved: [u32; 10],
    /// Platform name (unused by the kernel)
    pub platform_name: [u8; PLATFORM_NAME_LEN],
    /// Root path (unused by the kernel)
    pub root_path: [u8; ROOT_PATH_LEN],
}

impl Default for ContainerHeader {
    fn default() -> Self {
        Self {
            signature: COMPRESSED_SIGNATURE,
            compress_type: COMPRESS_TYPE_LZVN,
            checksum: 0,
            uncompressed_size: 0,
            compressed_size: 0,
            prelink_version: 1,
            reserved: [0; 10],
            platform_name: [0; PLATFORM_NAME_LEN],
            root_path: [0; ROOT_PATH_LEN],
        }
    }
}

impl ContainerHeader {
    /// Size of the header in bytes.
    pub const SIZE: usize = 384;

    /// Decodes the header at the start of `data`.
    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.len() < Self::SIZE {
            return Err(Error::buffer_too_small(Self::SIZE, data.len()));
        }

        let mut reserved = [0u32; 10];
        for (i, word) in reserved.iter_mut().enumerate() {
            *word = read_u32_be_at(data, 24 + i * 4)?;
        }

        let mut platform_name = [0u8; PLATFORM_NAME_LEN];
        platform_name.copy_from_slice(&data[64..64 + PLATFORM_NAME_LEN]);
        let mut root_path = [0u8; ROOT_PATH_LEN];
        root_path.copy_from_slice(&data[128..128 + ROOT_PATH_LEN]);

        Ok(Self {
            signature: read_u32_be_at(data, 0)?,
            compress_type: read_u32_be_at(data, 4)?,
            checksum: read_u32_be_at(data, 8)?,
            uncompressed_size: read_u32_be_at(data, 12)?,
            compressed_size: read_u32_be_at(data, 16)?,
            prelink_version: read_u32_be_at(data, 20)?,
            reserved,
            platform_name,
            root_path,
        })
    }

    /// Encodes the header.
    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut out = [0u8; Self::SIZE];
        let words = [
            self.signature,
            self.compress_type,
            self.checksum,
            self.uncompressed_size,
            self.compressed_size,
            self.prelink_version,
        ];
        for (i, word) in words.iter().chain(self.reserved.iter()).enumerate() {
            write_u32_be(&mut out[i * 4..], *word);
        }
        out[64..64 + PLATFORM_NAME_LEN].copy_from_slice(&self.platform_name);
        out[128..128 + ROOT_PATH_LEN].copy_from_slice(&self.root_path);
        out
    }

    /// Returns true if the payload is compressed.
    #[inline]
    pub fn is_compressed(&self) -> bool {
        self.signature == COMPRESSED_SIGNATURE
    }

    /// Returns the payload codec.
    pub fn compression(&self) -> Result<CompressionType> {
        CompressionType::from_tag(self.compress_type)
    }

    /// Returns true if the kernel supports address space randomization.
    #[inline]
    pub fn supports_kaslr(&self) -> bool {
        self.prelink_version >= 1
    }

    /// Returns the platform name up to the first NUL.
    pub fn platform_name(&self) -> String {
        String::from_utf8_lossy(trim_nul(&self.platform_name)).into_owned()
    }

    /// Returns the root path up to the first NUL.
    pub fn root_path(&self) -> String {
        String::from_utf8_lossy(trim_nul(&self.root_path)).into_owned()
    }
}

impl fmt::Display for ContainerHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} checksum={:#010x} uncompressed={} compressed={} version={}",
            fourcc_display(self.signature),
            fourcc_display(self.compress_type),
            self.checksum,
            self.uncompressed_size,
            self.compressed_size,
            self.prelink_version
        )
    }
}
