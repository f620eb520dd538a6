//! Prelinked kext listing and extraction.
//!
//! Each entry of `_PrelinkInfoDictionary` is a kext's `Info.plist` extended
//! with `_Prelink*` keys. The executable's bytes are found by translating
//! `_PrelinkExecutableSourceAddr` to a file offset through `__LINKEDIT`'s
//! address/offset relationship.

use std::fs;
use std::path::{Component, Path, PathBuf};

use tracing::{debug, info, warn};

use super::info::{module_entries, parse_prelink_info, write_plist};
use crate::error::{Error, Result};
use crate::macho::{
    MachOView, LC_CODE_SIGNATURE, SEG_LINKEDIT, SEG_PRELINK_INFO, SEG_PRELINK_TEXT, SEG_TEXT_EXEC,
};

/// Directory, below the output root, holding the extracted bundles.
pub const KEXTS_DIR_NAME: &str = "kexts";

/// Relative executable paths with this prefix live in `Contents/MacOS`.
pub const MACOS_EXECUTABLE_PREFIX: &str = "Contents/MacOS/";

/// Key names of a prelinked kext entry.
pub mod keys {
    /// Bundle identifier
    pub const BUNDLE_IDENTIFIER: &str = "CFBundleIdentifier";
    /// Executable file name
    pub const BUNDLE_EXECUTABLE: &str = "CFBundleExecutable";
    /// Bundle path on the original volume
    pub const BUNDLE_PATH: &str = "_PrelinkBundlePath";
    /// Executable path relative to the bundle
    pub const EXECUTABLE_RELATIVE_PATH: &str = "_PrelinkExecutableRelativePath";
    /// Virtual address of the executable in the image
    pub const EXECUTABLE_SOURCE_ADDR: &str = "_PrelinkExecutableSourceAddr";
    /// Size of the executable
    pub const EXECUTABLE_SIZE: &str = "_PrelinkExecutableSize";
}

// =============================================================================
// Module Descriptor
// =============================================================================

/// The fields of a kext entry the extractor needs. Every field is optional;
/// missing keys disable the steps that depend on them.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ModuleDescriptor {
    /// `CFBundleIdentifier`
    pub bundle_identifier: Option<String>,
    /// `_PrelinkBundlePath`
    pub bundle_path: Option<String>,
    /// `_PrelinkExecutableRelativePath`
    pub executable_relative_path: Option<String>,
    /// `CFBundleExecutable`
    pub executable_name: Option<String>,
    /// `_PrelinkExecutableSourceAddr`
    pub source_addr: Option<u64>,
    /// `_PrelinkExecutableSize`
    pub source_size: Option<u64>,
}

impl ModuleDescriptor {
    /// Reads a descriptor from a kext entry.
    pub fn from_dictionary(dict: &plist::Dictionary) -> Self {
        let string = |key: &str| dict.get(key).and_then(|v| v.as_string()).map(str::to_owned);
        let number = |key: &str| {
            dict.get(key).and_then(|v| {
                v.as_unsigned_integer()
                    .or_else(|| v.as_signed_integer().map(|n| n as u64))
            })
        };

        Self {
            bundle_identifier: string(keys::BUNDLE_IDENTIFIER),
            bundle_path: string(keys::BUNDLE_PATH),
            executable_relative_path: string(keys::EXECUTABLE_RELATIVE_PATH),
            executable_name: string(keys::BUNDLE_EXECUTABLE),
            source_addr: number(keys::EXECUTABLE_SOURCE_ADDR),
            source_size: number(keys::EXECUTABLE_SIZE),
        }
    }

    /// Returns true if the executable lives in `Contents/MacOS`.
    pub fn has_macos_executable(&self) -> bool {
        self.executable_relative_path
            .as_deref()
            .is_some_and(|p| p.starts_with(MACOS_EXECUTABLE_PREFIX))
    }
}

// =============================================================================
// Address Translation
// =============================================================================

/// Maps kext source addresses to file offsets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PrelinkLayout {
    /// `__LINKEDIT.vmaddr - __LINKEDIT.fileoff`
    pub base: u64,
    /// File offset of the nested `__TEXT_EXEC` header, or 0
    pub delta: u64,
}

impl PrelinkLayout {
    /// Derives the layout from a decompressed image.
    pub fn locate(image: &[u8]) -> Result<Self> {
        let view = MachOView::new(image, 0)?;

        let text_exec = view.find_segment(SEG_TEXT_EXEC)?;
        let linkedit = view.require_segment(SEG_LINKEDIT)?;
        view.require_segment(SEG_PRELINK_TEXT)?;
        view.require_segment(SEG_PRELINK_INFO)?;

        let base = linkedit.command.vmaddr.wrapping_sub(linkedit.command.fileoff);
        let delta = match text_exec {
            Some(seg) => {
                let delta = seg.command.fileoff;
                let nested = usize::try_from(delta)
                    .map_err(|_| Error::buffer_too_small(usize::MAX, image.len()))?;
                MachOView::new(image, nested)?;
                delta
            }
            None => 0,
        };

        debug!("Prelink layout base={:#x} delta={:#x}", base, delta);
        Ok(Self { base, delta })
    }

    /// Offset of a kext relative to the (possibly nested) kernel header.
    #[inline]
    pub fn module_offset(&self, source_addr: u64) -> u64 {
        source_addr.wrapping_sub(self.base).wrapping_sub(self.delta)
    }

    /// Returns the executable bytes of a kext, checked against the image.
    ///
    /// Returns `Ok(None)` when the descriptor has no usable address or size.
    pub fn module_bytes<'a>(
        &self,
        image: &'a [u8],
        module: &ModuleDescriptor,
    ) -> Result<Option<&'a [u8]>> {
        let offset = module.source_addr.map_or(0, |addr| self.module_offset(addr));
        let size = module.source_size.unwrap_or(0);
        if offset == 0 || size == 0 {
            return Ok(None);
        }

        let out_of_bounds = || Error::ModuleOutOfBounds {
            name: module.executable_name.clone().unwrap_or_default(),
            offset,
            size,
        };
        let start = self.delta.checked_add(offset).ok_or_else(out_of_bounds)?;
        let end = start
            .checked_add(size)
            .filter(|&end| end <= image.len() as u64)
            .ok_or_else(out_of_bounds)?;
        Ok(Some(&image[start as usize..end as usize]))
    }
}

// =============================================================================
// Listing and Extraction
// =============================================================================

/// Counts reported after an extraction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExtractionSummary {
    /// Number of kext entries
    pub total: usize,
    /// Number of extracted executables carrying a code signature
    pub signed: usize,
}

impl ExtractionSummary {
    /// Kexts without a code signature.
    pub fn unsigned(&self) -> usize {
        self.total - self.signed
    }
}

/// Returns the bundle path of every kext, in prelink order.
pub fn list_kexts(image: &[u8]) -> Result<Vec<String>> {
    PrelinkLayout::locate(image)?;
    let info = parse_prelink_info(image)?;
    let modules = module_entries(&info)?;
    info!("kextCount: {}", modules.len());

    Ok(modules
        .iter()
        .filter_map(|entry| entry.as_dictionary())
        .filter_map(|dict| ModuleDescriptor::from_dictionary(dict).bundle_path)
        .collect())
}

/// Recreates every kext bundle below `out_dir/kexts`.
///
/// For each kext the executable (when present) is written to the bundle
/// directory, or to its `Contents/MacOS` subdirectory, and the kext's entry
/// is written as `Info.plist` in the bundle directory.
pub fn extract_kexts(image: &[u8], out_dir: &Path) -> Result<ExtractionSummary> {
    let layout = PrelinkLayout::locate(image)?;
    let info = parse_prelink_info(image)?;
    let modules = module_entries(&info)?;
    info!("kextCount: {}", modules.len());

    let kexts_dir = out_dir.join(KEXTS_DIR_NAME);
    if !modules.is_empty() {
        create_dir(&kexts_dir)?;
    }

    let mut summary = ExtractionSummary {
        total: modules.len(),
        signed: 0,
    };

    for (index, entry) in modules.iter().enumerate() {
        let Some(dict) = entry.as_dictionary() else {
            warn!("kext[{}] is not a dictionary, skipping", index);
            continue;
        };
        let module = ModuleDescriptor::from_dictionary(dict);
        info!(
            "kext[{:3}] {}",
            index,
            module.bundle_identifier.as_deref().unwrap_or("<no identifier>")
        );

        let Some(bundle_dir) = module
            .bundle_path
            .as_deref()
            .and_then(|p| confined_join(&kexts_dir, p))
        else {
            warn!("kext[{}] has no usable bundle path, skipping", index);
            continue;
        };
        create_dir(&bundle_dir)?;

        if let Some(name) = module.executable_name.as_deref() {
            let executable_dir = if module.has_macos_executable() {
                let dir = bundle_dir.join("Contents").join("MacOS");
                create_dir(&dir)?;
                dir
            } else {
                bundle_dir.clone()
            };

            if let Some(bytes) = layout.module_bytes(image, &module)? {
                let kext = MachOView::new(bytes, 0)?;
                if !kext.header().is_kext() {
                    warn!(
                        "kext[{}] has file type {:#x}, not a kext bundle",
                        index,
                        kext.header().filetype
                    );
                }
                if kext.find_load_command(LC_CODE_SIGNATURE)?.is_some() {
                    debug!("kext[{}] is signed", index);
                    summary.signed += 1;
                }

                let path = confined_join(&executable_dir, name).ok_or_else(|| {
                    Error::prelink_info(format!("invalid executable name '{name}'"))
                })?;
                fs::write(&path, bytes).map_err(|source| Error::FileWrite {
                    path: path.clone(),
                    source,
                })?;
                debug!("{} bytes written to {}", bytes.len(), path.display());
            }
        }

        write_plist(&bundle_dir.join("Info.plist"), entry)?;
    }

    info!(
        "{} kexts extracted ({} signed and {} unsigned)",
        summary.total,
        summary.signed,
        summary.unsigned()
    );
    Ok(summary)
}

/// Joins an untrusted relative path onto `root`, refusing anything that
/// could escape it. Leading slashes are ignored.
fn confined_join(root: &Path, untrusted: &str) -> Option<PathBuf> {
    let mut path = root.to_path_buf();
    let mut pushed = false;
    for component in Path::new(untrusted.trim_start_matches('/')).components() {
        match component {
            Component::Normal(part) => {
                path.push(part);
                pushed = true;
            }
            Component::CurDir => {}
            _ => return None,
        }
    }
    pushed.then_some(path)
}

fn create_dir(path: &Path) -> Result<()> {
    fs::create_dir_all(path).map_err(|source| Error::CreateDir {
        path: path.to_path_buf(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::macho::testing::{MachOBuilder, SegmentSpec};
    use crate::macho::MH_KEXT_BUNDLE;

    const LINKEDIT_VMADDR: u64 = 0xffff_ff80_0090_0000;
    const LINKEDIT_FILEOFF: u64 = 0x9000;
    const BASE: u64 = LINKEDIT_VMADDR - LINKEDIT_FILEOFF;

    fn kext(signed: bool) -> Vec<u8> {
        let builder = MachOBuilder::new()
            .filetype(MH_KEXT_BUNDLE)
            .segment(SegmentSpec::new("__TEXT", 0, 0, 0x200));
        let builder = if signed { builder.code_signature() } else { builder };
        builder.build(0x200)
    }

    fn entry(id: &str, path: &str, exec: Option<(&str, &str, u64, u64)>) -> String {
        let mut xml = format!(
            "<dict><key>CFBundleIdentifier</key><string>{id}</string>\
             <key>_PrelinkBundlePath</key><string>{path}</string>"
        );
        if let Some((name, rel, addr, size)) = exec {
            xml.push_str(&format!(
                "<key>CFBundleExecutable</key><string>{name}</string>\
                 <key>_PrelinkExecutableRelativePath</key><string>{rel}</string>\
                 <key>_PrelinkExecutableSourceAddr</key><integer size=\"64\">{addr:#x}</integer>\
                 <key>_PrelinkExecutableSize</key><integer size=\"64\">{size:#x}</integer>"
            ));
        }
        xml.push_str("</dict>");
        xml
    }

    /// A prelinked image with two executables at 0x2000 and 0x3000 and one
    /// codeless kext.
    fn image(entries: &[String]) -> Vec<u8> {
        let info = format!(
            "<dict><key>_PrelinkInfoDictionary</key><array>{}</array></dict>",
            entries.concat()
        );
        let mut data = MachOBuilder::new()
            .segment(SegmentSpec::new("__TEXT", 0xffff_ff80_0020_0000, 0, 0x1000))
            .segment(SegmentSpec::new("__PRELINK_TEXT", BASE + 0x2000, 0x2000, 0x2000))
            .segment(SegmentSpec::new(
                "__PRELINK_INFO",
                BASE + 0x4000,
                0x4000,
                info.len() as u64 + 1,
            ))
            .segment(SegmentSpec::new("__LINKEDIT", LINKEDIT_VMADDR, LINKEDIT_FILEOFF, 0x100))
            .build(0x9100);
        data[0x2000..0x2200].copy_from_slice(&kext(true));
        data[0x3000..0x3200].copy_from_slice(&kext(false));
        data[0x4000..0x4000 + info.len()].copy_from_slice(info.as_bytes());
        data
    }

    fn standard_entries() -> Vec<String> {
        vec![
            entry(
                "com.example.Signed",
                "/System/Library/Extensions/Signed.kext",
                Some(("Signed", "Contents/MacOS/Signed", BASE + 0x2000, 0x200)),
            ),
            entry(
                "com.example.Flat",
                "/System/Library/Extensions/Flat.kext",
                Some(("Flat", "Flat", BASE + 0x3000, 0x200)),
            ),
            entry("com.example.Codeless", "/System/Library/Extensions/Codeless.kext", None),
        ]
    }

    #[test]
    fn test_descriptor_from_dictionary() {
        let mut dict = plist::Dictionary::new();
        dict.insert(keys::BUNDLE_PATH.into(), plist::Value::String("/A.kext".into()));
        dict.insert(
            keys::EXECUTABLE_RELATIVE_PATH.into(),
            plist::Value::String("Contents/MacOS/A".into()),
        );
        dict.insert(keys::EXECUTABLE_SIZE.into(), plist::Value::Integer(0x40u64.into()));
        let module = ModuleDescriptor::from_dictionary(&dict);
        assert_eq!(module.bundle_path.as_deref(), Some("/A.kext"));
        assert_eq!(module.source_size, Some(0x40));
        assert_eq!(module.source_addr, None);
        assert_eq!(module.executable_name, None);
        assert!(module.has_macos_executable());
    }

    #[test]
    fn test_layout_and_offsets() {
        let data = image(&standard_entries());
        let layout = PrelinkLayout::locate(&data).unwrap();
        assert_eq!(layout, PrelinkLayout { base: BASE, delta: 0 });
        assert_eq!(layout.module_offset(BASE + 0x2000), 0x2000);

        let module = ModuleDescriptor {
            source_addr: Some(BASE + 0x9000),
            source_size: Some(0x200),
            ..Default::default()
        };
        assert!(matches!(
            layout.module_bytes(&data, &module),
            Err(Error::ModuleOutOfBounds { .. })
        ));

        let module = ModuleDescriptor {
            source_addr: Some(BASE + 0x2000),
            ..Default::default()
        };
        assert!(layout.module_bytes(&data, &module).unwrap().is_none());
    }

    #[test]
    fn test_list_kexts() {
        let data = image(&standard_entries());
        assert_eq!(
            list_kexts(&data).unwrap(),
            [
                "/System/Library/Extensions/Signed.kext",
                "/System/Library/Extensions/Flat.kext",
                "/System/Library/Extensions/Codeless.kext",
            ]
        );
    }

    #[test]
    fn test_extract_kexts() {
        let dir = tempfile::tempdir().unwrap();
        let data = image(&standard_entries());
        let summary = extract_kexts(&data, dir.path()).unwrap();
        assert_eq!(summary, ExtractionSummary { total: 3, signed: 1 });
        assert_eq!(summary.unsigned(), 2);

        let root = dir.path().join("kexts/System/Library/Extensions");
        let signed = fs::read(root.join("Signed.kext/Contents/MacOS/Signed")).unwrap();
        assert_eq!(signed, kext(true));
        assert_eq!(fs::read(root.join("Flat.kext/Flat")).unwrap(), kext(false));
        assert!(!root.join("Codeless.kext/Codeless").exists());

        for bundle in ["Signed.kext", "Flat.kext", "Codeless.kext"] {
            let info = plist::Value::from_file(root.join(bundle).join("Info.plist")).unwrap();
            let dict = info.as_dictionary().unwrap();
            assert!(dict.get(keys::BUNDLE_IDENTIFIER).is_some());
        }
    }

    #[test]
    fn test_rejects_escaping_paths() {
        let dir = tempfile::tempdir().unwrap();
        let data = image(&[entry("com.example.Evil", "/../../etc", None)]);
        let summary = extract_kexts(&data, dir.path()).unwrap();
        assert_eq!(summary.total, 1);
        assert!(!dir.path().join("etc").exists());

        assert_eq!(confined_join(Path::new("/r"), "/a/./b"), Some(PathBuf::from("/r/a/b")));
        assert_eq!(confined_join(Path::new("/r"), "a/../b"), None);
        assert_eq!(confined_join(Path::new("/r"), "/"), None);
    }

    #[test]
    fn test_invalid_kext_magic() {
        let dir = tempfile::tempdir().unwrap();
        let mut data = image(&standard_entries());
        data[0x3000] = 0;
        assert!(matches!(
            extract_kexts(&data, dir.path()),
            Err(Error::InvalidMachoMagic(_))
        ));
    }

    #[test]
    fn test_missing_prelink_segment() {
        let data = MachOBuilder::new()
            .segment(SegmentSpec::new("__LINKEDIT", 0x1000, 0x1000, 0x10))
            .build(0x1010);
        let err = list_kexts(&data).unwrap_err();
        assert_eq!(err.to_string(), "segment not found: __PRELINK_TEXT");
    }
}
