//! The `__PRELINK_INFO` property list.
//!
//! The kernel stores its kext directory as IOKit-serialized XML: a bare
//! `<dict>` without a `<plist>` wrapper, values deduplicated with
//! `ID="n"`/`IDREF="n"` attributes, and integers written in hex with a
//! `size` attribute. [`normalize_iokit_xml`] rewrites that into a plain
//! XML property list which the `plist` crate then parses.

use std::collections::HashMap;
use std::fs::File;
use std::io::{BufWriter, Cursor};
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::macho::{MachOView, SEG_PRELINK_INFO};
use crate::util::trim_nul;

/// Key of the module array in the prelink info dictionary.
pub const PRELINK_INFO_DICTIONARY_KEY: &str = "_PrelinkInfoDictionary";

/// Name of the exported dictionary file.
pub const DICTIONARY_FILE_NAME: &str = "Dictionary.plist";

/// Returns the serialized prelink info of the image, cut at the first NUL.
pub fn prelink_info_bytes<'a>(view: &MachOView<'a>) -> Result<&'a [u8]> {
    let segment = view.require_segment(SEG_PRELINK_INFO)?;
    debug!(
        "__PRELINK_INFO vmaddr={:#x} fileoff={:#x} filesize={:#x}",
        segment.command.vmaddr, segment.command.fileoff, segment.command.filesize
    );
    Ok(trim_nul(view.segment_data(&segment)?))
}

/// Parses the prelink info of a decompressed kernel image.
pub fn parse_prelink_info(image: &[u8]) -> Result<plist::Value> {
    let view = MachOView::new(image, 0)?;
    let bytes = prelink_info_bytes(&view)?;
    let text = std::str::from_utf8(bytes)
        .map_err(|e| Error::prelink_info(format!("not UTF-8: {e}")))?;
    let xml = normalize_iokit_xml(text)?;
    let value = plist::Value::from_reader_xml(Cursor::new(xml.as_bytes()))?;
    info!("Unserialized prelink info");
    Ok(value)
}

/// Returns the module array stored under [`PRELINK_INFO_DICTIONARY_KEY`].
pub fn module_entries(info: &plist::Value) -> Result<&[plist::Value]> {
    info.as_dictionary()
        .ok_or_else(|| Error::prelink_info("root is not a dictionary"))?
        .get(PRELINK_INFO_DICTIONARY_KEY)
        .ok_or_else(|| Error::prelink_info(format!("missing {PRELINK_INFO_DICTIONARY_KEY}")))?
        .as_array()
        .map(Vec::as_slice)
        .ok_or_else(|| Error::prelink_info(format!("{PRELINK_INFO_DICTIONARY_KEY} is not an array")))
}

/// Writes the prelink info as an XML property list to `out_dir/Dictionary.plist`.
pub fn save_dictionary(image: &[u8], out_dir: &Path) -> Result<PathBuf> {
    let value = parse_prelink_info(image)?;
    let path = out_dir.join(DICTIONARY_FILE_NAME);
    write_plist(&path, &value)?;
    info!("Wrote {}", path.display());
    Ok(path)
}

/// Serializes `value` as XML to `path`.
pub(crate) fn write_plist(path: &Path, value: &plist::Value) -> Result<()> {
    let file = File::create(path).map_err(|source| Error::FileWrite {
        path: path.to_path_buf(),
        source,
    })?;
    plist::to_writer_xml(BufWriter::new(file), value)?;
    Ok(())
}

// =============================================================================
// IOKit XML Normalization
// =============================================================================

struct OpenElement<'a> {
    name: &'a str,
    id: Option<&'a str>,
    start: usize,
}

/// Rewrites IOKit-serialized XML into a standalone XML property list.
///
/// - `ID` attributes are dropped after recording the element they label.
/// - `<tag IDREF="n"/>` is replaced with a copy of the element labelled `n`.
/// - Hex integer text is converted to decimal.
/// - The result is wrapped in an XML declaration and a `<plist>` element.
pub fn normalize_iokit_xml(input: &str) -> Result<String> {
    let mut out = String::with_capacity(input.len() + 128);
    out.push_str("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n<plist version=\"1.0\">\n");
    let body_start = out.len();

    let mut ids: HashMap<&str, String> = HashMap::new();
    let mut stack: Vec<OpenElement<'_>> = Vec::new();
    let mut rest = input;

    while let Some(lt) = rest.find('<') {
        out.push_str(&rest[..lt]);
        let gt = rest[lt..]
            .find('>')
            .map(|i| lt + i)
            .ok_or_else(|| Error::prelink_info("unterminated tag"))?;
        let tag = &rest[lt + 1..gt];
        rest = &rest[gt + 1..];

        // Declarations, doctypes, comments and an existing plist wrapper
        // are dropped; the output carries its own.
        if tag.starts_with('?') || tag.starts_with('!') {
            continue;
        }
        if let Some(name) = tag.strip_prefix('/') {
            let name = name.trim();
            if name == "plist" {
                continue;
            }
            let open = stack
                .pop()
                .filter(|open| open.name == name)
                .ok_or_else(|| Error::prelink_info(format!("unexpected </{name}>")))?;
            if name == "integer" {
                normalize_integer(&mut out, open.start)?;
            }
            out.push_str("</");
            out.push_str(name);
            out.push('>');
            if let Some(id) = open.id {
                let element = out[open.start..].to_string();
                ids.insert(id, element);
            }
            continue;
        }

        let self_closing = tag.ends_with('/');
        let tag = tag.trim_end_matches('/');
        let (name, attrs) = tag
            .split_once(char::is_whitespace)
            .unwrap_or((tag, ""));
        if name == "plist" {
            continue;
        }

        if let Some(reference) = attribute(attrs, "IDREF") {
            let element = ids
                .get(reference)
                .ok_or_else(|| Error::prelink_info(format!("unresolved IDREF {reference}")))?;
            out.push_str(element);
            continue;
        }

        let id = attribute(attrs, "ID");
        let start = out.len();
        out.push('<');
        out.push_str(name);
        if self_closing {
            out.push_str("/>");
            if let Some(id) = id {
                ids.insert(id, out[start..].to_string());
            }
        } else {
            out.push('>');
            stack.push(OpenElement { name, id, start });
        }
    }
    out.push_str(rest);

    if let Some(open) = stack.last() {
        return Err(Error::prelink_info(format!("unclosed <{}>", open.name)));
    }
    if out[body_start..].trim().is_empty() {
        return Err(Error::prelink_info("empty prelink info"));
    }

    out.push_str("\n</plist>\n");
    Ok(out)
}

/// Replaces hex text of the `<integer>` element opened at `start` with decimal.
fn normalize_integer(out: &mut String, start: usize) -> Result<()> {
    let text_start = start + "<integer>".len();
    let text = out[text_start..].trim();
    if let Some(hex) = text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
        let value = u64::from_str_radix(hex, 16)
            .map_err(|e| Error::prelink_info(format!("bad integer {text}: {e}")))?;
        out.truncate(text_start);
        out.push_str(&value.to_string());
    }
    Ok(())
}

/// Looks up `name="value"` (or single-quoted) in an attribute list.
fn attribute<'a>(attrs: &'a str, name: &str) -> Option<&'a str> {
    attrs.split_whitespace().find_map(|pair| {
        let (key, value) = pair.split_once('=')?;
        if key != name {
            return None;
        }
        let value = value.trim_end_matches('/');
        value
            .strip_prefix('"')
            .and_then(|v| v.strip_suffix('"'))
            .or_else(|| value.strip_prefix('\'').and_then(|v| v.strip_suffix('\'')))
    })
}
