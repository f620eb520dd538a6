//! Payload compression codecs.
//!
//! Two codecs can appear in a kernel cache container:
//!
//! - `lzss`: the legacy ring-buffer format, decoded by [`Lzss`] in this crate.
//! - `lzvn`: the primary format. Its algorithm lives outside this crate and is
//!   supplied by the embedding program as a [`Codec`] implementation.

mod lzss;

pub use lzss::*;

/// A block compressor/decompressor.
///
/// Both operations report the number of bytes written to `dst`; a return
/// value of 0 means the operation failed.
pub trait Codec {
    /// Human-readable codec name used in diagnostics.
    fn name(&self) -> &'static str;

    /// Size of the scratch buffer [`Codec::encode`] needs.
    fn workspace_size(&self) -> usize;

    /// Decompresses `src` into `dst`.
    fn decode(&self, dst: &mut [u8], src: &[u8]) -> usize;

    /// Compresses `src` into `dst` using `workspace` as scratch memory.
    fn encode(&self, dst: &mut [u8], src: &[u8], workspace: &mut [u8]) -> usize;
}

impl<C: Codec + ?Sized> Codec for &C {
    fn name(&self) -> &'static str {
        (**self).name()
    }

    fn workspace_size(&self) -> usize {
        (**self).workspace_size()
    }

    fn decode(&self, dst: &mut [u8], src: &[u8]) -> usize {
        (**self).decode(dst, src)
    }

    fn encode(&self, dst: &mut [u8], src: &[u8], workspace: &mut [u8]) -> usize {
        (**self).encode(dst, src, workspace)
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! A stand-in for the primary codec: stores the payload behind a one-byte
    //! marker so tests can exercise the container plumbing.

    use super::Codec;

    /// Marker byte prefixed to every stored block.
    const STORED: u8 = 0xA5;

    #[derive(Debug, Default, Clone, Copy)]
    pub struct StoredCodec;

    impl Codec for StoredCodec {
        fn name(&self) -> &'static str {
            "lzvn"
        }

        fn workspace_size(&self) -> usize {
            0x1_0000
        }

        fn decode(&self, dst: &mut [u8], src: &[u8]) -> usize {
            match src.split_first() {
                Some((&STORED, body)) if body.len() <= dst.len() => {
                    dst[..body.len()].copy_from_slice(body);
                    body.len()
                }
                _ => 0,
            }
        }

        fn encode(&self, dst: &mut [u8], src: &[u8], workspace: &mut [u8]) -> usize {
            if workspace.len() < self.workspace_size() || dst.len() < src.len() + 1 {
                return 0;
            }
            dst[0] = STORED;
            dst[1..=src.len()].copy_from_slice(src);
            src.len() + 1
        }
    }

    /// A codec whose every operation fails.
    #[derive(Debug, Default, Clone, Copy)]
    pub struct FailingCodec;

    impl Codec for FailingCodec {
        fn name(&self) -> &'static str {
            "lzvn"
        }

        fn workspace_size(&self) -> usize {
            0
        }

        fn decode(&self, _dst: &mut [u8], _src: &[u8]) -> usize {
            0
        }

        fn encode(&self, _dst: &mut [u8], _src: &[u8], _workspace: &mut [u8]) -> usize {
            0
        }
    }
}
