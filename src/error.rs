//! Error types for kernel cache processing.
//!
//! Every failure is fatal for the current run. The variants are grouped the
//! same way the pipeline is: file access, container format, Mach-O layout,
//! prelink metadata and the compression codecs.

use std::path::PathBuf;

use thiserror::Error;

/// The main error type for kernel cache operations.
#[derive(Error, Debug)]
pub enum Error {
    // ==================== I/O Errors ====================
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to read file '{path}': {source}")]
    FileRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to write output file '{path}': {source}")]
    FileWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot create directory '{path}': {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ==================== Container Format Errors ====================
    #[error("invalid FAT header: {reason}")]
    InvalidFat { reason: String },

    #[error("unsupported compression format")]
    UnsupportedCompression { tag: u32 },

    #[error("adler32 mismatch (expected {expected:#010x}, computed {computed:#010x})")]
    ChecksumMismatch { expected: u32, computed: u32 },

    #[error("unsupported format: not a prelinked kernel")]
    NotPrelinked,

    // ==================== Mach-O Errors ====================
    #[error("invalid Mach-O magic: {0:#x}")]
    InvalidMachoMagic(u32),

    #[error("segment not found: {name}")]
    SegmentNotFound { name: String },

    #[error("load command at offset {offset:#x} extends beyond header")]
    LoadCommandOverflow { offset: usize },

    #[error("segment '{name}' range {start:#x}..{end:#x} exceeds buffer (size: {size:#x})")]
    SegmentOutOfBounds {
        name: String,
        start: u64,
        end: u64,
        size: usize,
    },

    // ==================== Prelink Errors ====================
    #[error("malformed prelink info: {reason}")]
    PrelinkInfo { reason: String },

    #[error("module '{name}' at offset {offset:#x} (size {size:#x}) lies outside the image")]
    ModuleOutOfBounds { name: String, offset: u64, size: u64 },

    #[error("property list error: {0}")]
    Plist(#[from] plist::Error),

    // ==================== Codec Errors ====================
    #[error("{codec} decoding failed")]
    DecodeFailed { codec: &'static str },

    #[error("{codec} encoding failed")]
    EncodeFailed { codec: &'static str },

    #[error("no {codec} codec available in this build")]
    CodecUnavailable { codec: &'static str },

    // ==================== Resource Errors ====================
    #[error("cannot allocate {size} bytes")]
    Allocation { size: usize },

    // ==================== Parse Errors ====================
    #[error("buffer too small: need {needed} bytes, have {available}")]
    BufferTooSmall { needed: usize, available: usize },
}

/// A specialized Result type for kernel cache operations.
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Creates a buffer too small error.
    #[inline]
    pub fn buffer_too_small(needed: usize, available: usize) -> Self {
        Error::BufferTooSmall { needed, available }
    }

    /// Creates a segment not found error.
    #[inline]
    pub fn segment_not_found(name: impl Into<String>) -> Self {
        Error::SegmentNotFound { name: name.into() }
    }

    /// Creates a prelink info error with a formatted message.
    #[inline]
    pub fn prelink_info(reason: impl Into<String>) -> Self {
        Error::PrelinkInfo {
            reason: reason.into(),
        }
    }
}
