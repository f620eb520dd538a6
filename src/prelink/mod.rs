//! Operations on a decompressed prelinked kernel.
//!
//! - [`kernel`]: collapse the prelink segments and save the bare kernel
//! - [`info`]: parse and export the `__PRELINK_INFO` dictionary
//! - [`kexts`]: list and extract the prelinked kext bundles

pub mod info;
pub mod kernel;
pub mod kexts;

pub use info::{parse_prelink_info, save_dictionary, DICTIONARY_FILE_NAME};
pub use kernel::{save_kernel, strip_prelink, KERNEL_FILE_NAME};
pub use kexts::{extract_kexts, list_kexts, ExtractionSummary, ModuleDescriptor, PrelinkLayout};
