//! Mach-O constants.

// =============================================================================
// Magic Numbers
// =============================================================================

/// 64-bit Mach-O magic (little-endian)
pub const MH_MAGIC_64: u32 = 0xFEEDFACF;

/// FAT binary magic, as read big-endian from the file.
pub const FAT_MAGIC: u32 = 0xCAFEBABE;

// =============================================================================
// File Types
// =============================================================================

/// Executable
pub const MH_EXECUTE: u32 = 0x2;
/// Kernel extension bundle
pub const MH_KEXT_BUNDLE: u32 = 0xB;

// =============================================================================
// CPU Types
// =============================================================================

/// 64-bit architecture flag
pub const CPU_ARCH_ABI64: u32 = 0x0100_0000;

/// ARM CPU type
pub const CPU_TYPE_ARM: u32 = 12;
/// ARM64 CPU type
pub const CPU_TYPE_ARM64: u32 = CPU_TYPE_ARM | CPU_ARCH_ABI64;

/// x86 CPU type
pub const CPU_TYPE_X86: u32 = 7;
/// x86_64 CPU type
pub const CPU_TYPE_X86_64: u32 = CPU_TYPE_X86 | CPU_ARCH_ABI64;

/// x86_64 all subtypes
pub const CPU_SUBTYPE_X86_64_ALL: u32 = 3;

// =============================================================================
// Load Commands
// =============================================================================

/// 64-bit segment of this file
pub const LC_SEGMENT_64: u32 = 0x19;
/// UUID
pub const LC_UUID: u32 = 0x1B;
/// Code signature
pub const LC_CODE_SIGNATURE: u32 = 0x1D;

// =============================================================================
// Segment Names
// =============================================================================

/// Executable kernel text (present in split-segment kernel caches)
pub const SEG_TEXT_EXEC: &str = "__TEXT_EXEC";
/// Last kernel segment before the prelinked payload
pub const SEG_LAST: &str = "__LAST";
/// Prelinked kext executables
pub const SEG_PRELINK_TEXT: &str = "__PRELINK_TEXT";
/// Prelinked kext property lists
pub const SEG_PRELINK_INFO: &str = "__PRELINK_INFO";
/// Link-edit data
pub const SEG_LINKEDIT: &str = "__LINKEDIT";
