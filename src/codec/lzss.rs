//! Legacy LZSS decompression.
//!
//! The format is Okumura's LZSS as used by the kernel cache tooling: a
//! 4096-byte ring buffer pre-filled with spaces, flag bytes selecting between
//! literals and 12-bit position / 4-bit length back-references.

use super::Codec;

/// Size of the ring buffer (must be a power of two).
pub const RING_SIZE: usize = 4096;

/// Upper limit for a match length.
pub const MAX_MATCH: usize = 18;

/// Matches of this length or shorter are stored as literals.
pub const THRESHOLD: usize = 2;

/// Decompresses `src` into `dst`, returning the number of bytes written.
///
/// Decoding stops as soon as the input runs out or `dst` is full. A
/// truncated stream is not an error; the caller decides whether the
/// output length is acceptable.
pub fn decompress_lzss(dst: &mut [u8], src: &[u8]) -> usize {
    let mut ring = [0u8; RING_SIZE + MAX_MATCH - 1];
    ring[..RING_SIZE - MAX_MATCH].fill(b' ');

    let mut r = RING_SIZE - MAX_MATCH;
    let mut flags: u32 = 0;
    let mut input = src.iter().copied();
    let mut written = 0usize;

    'decode: loop {
        flags >>= 1;
        if flags & 0x100 == 0 {
            let Some(control) = input.next() else {
                break;
            };
            // The high byte counts down the eight flag bits.
            flags = control as u32 | 0xFF00;
        }

        if flags & 1 != 0 {
            let Some(c) = input.next() else {
                break;
            };
            if written == dst.len() {
                break;
            }
            dst[written] = c;
            written += 1;
            ring[r] = c;
            r = (r + 1) & (RING_SIZE - 1);
        } else {
            let Some(lo) = input.next() else {
                break;
            };
            let Some(hi) = input.next() else {
                break;
            };
            let position = lo as usize | ((hi as usize & 0xF0) << 4);
            let length = (hi as usize & 0x0F) + THRESHOLD;

            for k in 0..=length {
                let c = ring[(position + k) & (RING_SIZE - 1)];
                if written == dst.len() {
                    break 'decode;
                }
                dst[written] = c;
                written += 1;
                ring[r] = c;
                r = (r + 1) & (RING_SIZE - 1);
            }
        }
    }

    written
}

/// The LZSS codec. Only decoding is supported.
#[derive(Debug, Default, Clone, Copy)]
pub struct Lzss;

impl Codec for Lzss {
    fn name(&self) -> &'static str {
        "lzss"
    }

    fn workspace_size(&self) -> usize {
        0
    }

    fn decode(&self, dst: &mut [u8], src: &[u8]) -> usize {
        decompress_lzss(dst, src)
    }

    fn encode(&self, _dst: &mut [u8], _src: &[u8], _workspace: &mut [u8]) -> usize {
        0
    }
}
