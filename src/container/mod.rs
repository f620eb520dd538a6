//! The compressed kernel cache container.
//!
//! A container is an optional FAT wrapper, a 384-byte [`ContainerHeader`],
//! and the payload. [`decode`] turns a container (or an already raw image)
//! into a verified prelinked kernel buffer; [`encode`] goes the other way.

pub mod fat;
pub mod header;
pub mod template;

pub use fat::{fat_arches, is_fat, resolve_payload, FatArch, FAT_HEADER_SIZE};
pub use header::{CompressionType, ContainerHeader, COMPRESSED_SIGNATURE};
pub use template::{build_header, HEADER_TEMPLATE, TEMPLATE_SIZE};

use tracing::{debug, info};

use crate::checksum::adler32;
use crate::codec::{Codec, Lzss};
use crate::error::{Error, Result};
use crate::macho::MachOView;
use crate::util::{read_u32_be_at, zeroed_buffer};

/// Decoding options.
#[derive(Clone, Copy, Default)]
pub struct Options<'a> {
    /// Codec for `lzvn` payloads. Without one such payloads are rejected.
    pub codec: Option<&'a dyn Codec>,
}

impl<'a> Options<'a> {
    /// Options using `codec` for `lzvn` payloads.
    pub fn with_codec(codec: &'a dyn Codec) -> Self {
        Self { codec: Some(codec) }
    }
}

/// A decoded, checksum-verified prelinked kernel image.
#[derive(Debug, Clone)]
pub struct DecodedImage {
    data: Vec<u8>,
    len: usize,
    header: Option<ContainerHeader>,
}

impl DecodedImage {
    /// The whole working buffer, sized by the header's uncompressed size.
    #[inline]
    pub fn bytes(&self) -> &[u8] {
        &self.data
    }

    /// Mutable access for in-place patching.
    #[inline]
    pub fn bytes_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    /// The bytes the codec actually produced.
    #[inline]
    pub fn decoded(&self) -> &[u8] {
        &self.data[..self.len]
    }

    /// The container header, if the input was compressed.
    #[inline]
    pub fn header(&self) -> Option<&ContainerHeader> {
        self.header.as_ref()
    }

    /// Returns true if the input was a compressed container.
    #[inline]
    pub fn is_compressed(&self) -> bool {
        self.header.is_some()
    }
}

/// Decodes a kernel cache file.
///
/// Steps, each fatal on failure: resolve the FAT wrapper, check the
/// signature, pick the codec, decompress into a buffer of the declared
/// uncompressed size, verify the checksum over that buffer, and require a
/// prelinked kernel. An input without the `'comp'` signature is taken as
/// an already raw image and skips the codec and checksum steps.
pub fn decode(input: &[u8], options: &Options<'_>) -> Result<DecodedImage> {
    let offset = resolve_payload(input)?;
    let payload = &input[offset..];

    if read_u32_be_at(payload, 0)? != COMPRESSED_SIGNATURE {
        debug!("No compressed signature at {:#x}, using payload as is", offset);
        let image = DecodedImage {
            data: payload.to_vec(),
            len: payload.len(),
            header: None,
        };
        ensure_prelinked(image.bytes())?;
        return Ok(image);
    }

    let header = ContainerHeader::parse(payload)?;
    info!("Container: {}", header);

    let lzss = Lzss;
    let codec: &dyn Codec = match header.compression()? {
        CompressionType::Lzss => &lzss,
        CompressionType::Lzvn => options
            .codec
            .ok_or(Error::CodecUnavailable { codec: "lzvn" })?,
    };

    let src_start = ContainerHeader::SIZE;
    let src_end = src_start + header.compressed_size as usize;
    let src = payload
        .get(src_start..src_end)
        .ok_or_else(|| Error::buffer_too_small(offset + src_end, input.len()))?;

    let mut data = zeroed_buffer(header.uncompressed_size as usize)?;
    let len = codec.decode(&mut data, src);
    if len == 0 {
        return Err(Error::DecodeFailed {
            codec: codec.name(),
        });
    }
    debug!("{} produced {} of {} bytes", codec.name(), len, data.len());

    let computed = adler32(&data);
    if computed != header.checksum {
        return Err(Error::ChecksumMismatch {
            expected: header.checksum,
            computed,
        });
    }
    info!("Checksum OK ({:#010x})", computed);

    ensure_prelinked(&data)?;
    Ok(DecodedImage {
        data,
        len,
        header: Some(header),
    })
}

/// Compresses a prelinked kernel into a FAT-wrapped `lzvn` container.
///
/// A FAT-wrapped input is read from its first slice. The checksum covers
/// the bytes handed to the codec.
pub fn encode(input: &[u8], codec: &dyn Codec) -> Result<Vec<u8>> {
    let offset = if is_fat(input) {
        let arches = fat_arches(input)?;
        let first = arches.first().ok_or_else(|| Error::InvalidFat {
            reason: "no architectures".into(),
        })?;
        first.offset as usize
    } else {
        0
    };
    let image = input.get(offset..).ok_or_else(|| Error::InvalidFat {
        reason: format!("slice offset {offset:#x} beyond end of file"),
    })?;
    ensure_prelinked(image)?;

    let checksum = adler32(image);
    info!("adler32: {:#010x}", checksum);

    let mut workspace = zeroed_buffer(codec.workspace_size())?;
    let mut out = zeroed_buffer(codec.workspace_size().max(image.len()))?;
    let out_size = codec.encode(&mut out, image, &mut workspace);
    if out_size == 0 {
        return Err(Error::EncodeFailed {
            codec: codec.name(),
        });
    }
    out.truncate(out_size);
    let compressed_size = out[..out_size].len();
    debug!("Compressed {} bytes to {}", image.len(), compressed_size);

    let mut container = build_header(checksum, image.len() as u32, compressed_size as u32);
    container.extend_from_slice(&out);
    Ok(container)
}

fn ensure_prelinked(image: &[u8]) -> Result<()> {
    let view = MachOView::new(image, 0).map_err(|e| match e {
        Error::InvalidMachoMagic(_) => Error::NotPrelinked,
        other => other,
    })?;
    if view.is_prelinked()? {
        Ok(())
    } else {
        Err(Error::NotPrelinked)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::testing::{FailingCodec, StoredCodec};
    use crate::container::header::{COMPRESS_TYPE_LZSS, COMPRESS_TYPE_LZVN};
    use crate::macho::testing::{MachOBuilder, SegmentSpec};
    use crate::macho::{CPU_SUBTYPE_X86_64_ALL, CPU_TYPE_X86_64, FAT_MAGIC};
    use crate::util::{fourcc, words_to_be_bytes};

    fn prelinked() -> Vec<u8> {
        let mut data = MachOBuilder::new()
            .segment(SegmentSpec::new("__TEXT", 0x1000, 0, 0x400))
            .segment(SegmentSpec::new("__PRELINK_TEXT", 0x2000, 0x400, 0x100))
            .segment(SegmentSpec::new("__PRELINK_INFO", 0x3000, 0x500, 0x100))
            .segment(SegmentSpec::new("__LINKEDIT", 0x4000, 0x600, 0x100))
            .build(0x700);
        for (i, b) in data[0x400..].iter_mut().enumerate() {
            *b = (i % 251) as u8;
        }
        data
    }

    /// Encodes `data` as LZSS literals only.
    fn lzss_literals(data: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        for chunk in data.chunks(8) {
            out.push(0xFF);
            out.extend_from_slice(chunk);
        }
        out
    }

    fn container(tag: u32, image: &[u8], payload: &[u8]) -> Vec<u8> {
        let header = ContainerHeader {
            compress_type: tag,
            checksum: adler32(image),
            uncompressed_size: image.len() as u32,
            compressed_size: payload.len() as u32,
            ..Default::default()
        };
        let mut out = header.to_bytes().to_vec();
        out.extend_from_slice(payload);
        out
    }

    #[test]
    fn test_decode_lzss() {
        let image = prelinked();
        let input = container(COMPRESS_TYPE_LZSS, &image, &lzss_literals(&image));
        let decoded = decode(&input, &Options::default()).unwrap();
        assert!(decoded.is_compressed());
        assert_eq!(decoded.decoded(), &image[..]);
        assert_eq!(decoded.bytes().len(), image.len());
        assert_eq!(decoded.header().unwrap().compression().unwrap(), CompressionType::Lzss);
    }

    #[test]
    fn test_decode_raw_image() {
        let image = prelinked();
        let decoded = decode(&image, &Options::default()).unwrap();
        assert!(!decoded.is_compressed());
        assert_eq!(decoded.bytes(), &image[..]);
    }

    #[test]
    fn test_unsupported_compression() {
        let image = prelinked();
        let input = container(fourcc(b"zlib"), &image, &image);
        let err = decode(&input, &Options::default()).unwrap_err();
        assert_eq!(err.to_string(), "unsupported compression format");
    }

    #[test]
    fn test_lzvn_requires_codec() {
        let image = prelinked();
        let mut payload = vec![0xA5];
        payload.extend_from_slice(&image);
        let input = container(COMPRESS_TYPE_LZVN, &image, &payload);

        assert!(matches!(
            decode(&input, &Options::default()),
            Err(Error::CodecUnavailable { codec: "lzvn" })
        ));
        let decoded = decode(&input, &Options::with_codec(&StoredCodec)).unwrap();
        assert_eq!(decoded.decoded(), &image[..]);
    }

    #[test]
    fn test_checksum_mismatch() {
        let image = prelinked();
        let mut input = container(COMPRESS_TYPE_LZSS, &image, &lzss_literals(&image));
        input[8] ^= 0xFF;
        assert!(matches!(
            decode(&input, &Options::default()),
            Err(Error::ChecksumMismatch { .. })
        ));
    }

    #[test]
    fn test_checksum_covers_declared_size() {
        // A short payload leaves zeros at the end of the buffer; they are
        // part of the checksum.
        let image = prelinked();
        let mut padded = image.clone();
        padded.extend_from_slice(&[0u8; 16]);
        let mut input = container(COMPRESS_TYPE_LZSS, &padded, &lzss_literals(&image));
        let decoded = decode(&input, &Options::default()).unwrap();
        assert_eq!(decoded.decoded().len(), image.len());
        assert_eq!(decoded.bytes().len(), padded.len());

        let wrong = adler32(&image);
        input[8..12].copy_from_slice(&wrong.to_be_bytes());
        assert!(decode(&input, &Options::default()).is_err());
    }

    #[test]
    fn test_decode_failure() {
        let image = prelinked();
        let input = container(COMPRESS_TYPE_LZVN, &image, &[1, 2, 3]);
        assert!(matches!(
            decode(&input, &Options::with_codec(&FailingCodec)),
            Err(Error::DecodeFailed { codec: "lzvn" })
        ));
    }

    #[test]
    fn test_truncated_payload() {
        let image = prelinked();
        let mut input = container(COMPRESS_TYPE_LZSS, &image, &lzss_literals(&image));
        input.truncate(input.len() - 1);
        assert!(matches!(
            decode(&input, &Options::default()),
            Err(Error::BufferTooSmall { .. })
        ));
    }

    #[test]
    fn test_not_prelinked() {
        let plain = MachOBuilder::new()
            .segment(SegmentSpec::new("__TEXT", 0x1000, 0, 0x100))
            .build(0x100);
        let input = container(COMPRESS_TYPE_LZSS, &plain, &lzss_literals(&plain));
        let err = decode(&input, &Options::default()).unwrap_err();
        assert!(matches!(err, Error::NotPrelinked));
        assert!(err.to_string().starts_with("unsupported format"));

        assert!(matches!(
            encode(b"not a mach-o image, just some plain text", &StoredCodec),
            Err(Error::NotPrelinked)
        ));
    }

    #[test]
    fn test_encode_round_trip() {
        let image = prelinked();
        let encoded = encode(&image, &StoredCodec).unwrap();
        assert_eq!(encoded.len(), TEMPLATE_SIZE + image.len() + 1);
        assert_eq!(&encoded[..4], &[0xCA, 0xFE, 0xBA, 0xBE]);

        let decoded = decode(&encoded, &Options::with_codec(&StoredCodec)).unwrap();
        assert_eq!(decoded.decoded(), &image[..]);
        let header = decoded.header().unwrap();
        assert_eq!(header.checksum, adler32(&image));
        assert_eq!(header.compressed_size as usize, image.len() + 1);

        // An encoded container is not itself a prelinked image.
        assert!(matches!(
            encode(&encoded, &StoredCodec),
            Err(Error::NotPrelinked)
        ));
    }

    #[test]
    fn test_encode_fat_wrapped_image() {
        let image = prelinked();
        let mut input = words_to_be_bytes(&[
            FAT_MAGIC,
            1,
            CPU_TYPE_X86_64,
            CPU_SUBTYPE_X86_64_ALL,
            28,
            image.len() as u32,
            0,
        ]);
        input.extend_from_slice(&image);

        let encoded = encode(&input, &StoredCodec).unwrap();
        let decoded = decode(&encoded, &Options::with_codec(&StoredCodec)).unwrap();
        assert_eq!(decoded.decoded(), &image[..]);
        assert_eq!(decoded.header().unwrap().checksum, adler32(&image));
    }

    /// Asks for more scratch memory than can ever be allocated.
    struct Greedy;

    impl Codec for Greedy {
        fn name(&self) -> &'static str {
            "lzvn"
        }

        fn workspace_size(&self) -> usize {
            usize::MAX
        }

        fn decode(&self, _dst: &mut [u8], _src: &[u8]) -> usize {
            0
        }

        fn encode(&self, _dst: &mut [u8], _src: &[u8], _workspace: &mut [u8]) -> usize {
            0
        }
    }

    #[test]
    fn test_encode_workspace_allocation_failure() {
        assert!(matches!(
            encode(&prelinked(), &Greedy),
            Err(Error::Allocation { size: usize::MAX })
        ));
    }

    #[test]
    fn test_encode_failure() {
        assert!(matches!(
            encode(&prelinked(), &FailingCodec),
            Err(Error::EncodeFailed { codec: "lzvn" })
        ));
        assert!(matches!(
            encode(&prelinked(), &Lzss),
            Err(Error::EncodeFailed { codec: "lzss" })
        ));
    }
}
