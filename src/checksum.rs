//! The kernel cache checksum.
//!
//! This is the Adler-32 variant used by the kernel cache tooling. It differs
//! from zlib's Adler-32 in when the accumulators are reduced: the reduction
//! happens every 5000 bytes *before* the byte at that index is added, and
//! once more at the end. Results match zlib only for short inputs, so the
//! loop is reproduced exactly rather than delegated to a library.

/// Largest prime below 2^16.
const MOD_ADLER: u32 = 65521;

/// Number of bytes between reductions.
const REDUCE_INTERVAL: u64 = 5000;

/// Incremental checksum state.
///
/// Feeding a buffer in several pieces gives the same result as feeding it
/// at once, because the byte index driving the reduction schedule is carried
/// across calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Adler32 {
    low: u32,
    high: u32,
    index: u64,
}

impl Default for Adler32 {
    fn default() -> Self {
        Self::new()
    }
}

impl Adler32 {
    /// Creates a fresh state (`low = 1`, `high = 0`).
    pub const fn new() -> Self {
        Self {
            low: 1,
            high: 0,
            index: 0,
        }
    }

    /// Adds `data` to the running checksum.
    pub fn update(&mut self, data: &[u8]) {
        let (mut low, mut high) = (self.low, self.high);
        let mut index = self.index;

        for &byte in data {
            if index % REDUCE_INTERVAL == 0 {
                low %= MOD_ADLER;
                high %= MOD_ADLER;
            }
            low += byte as u32;
            high += low;
            index += 1;
        }

        self.low = low;
        self.high = high;
        self.index = index;
    }

    /// Returns the unreduced `(low, high)` accumulators.
    pub fn accumulators(&self) -> (u32, u32) {
        (self.low, self.high)
    }

    /// Applies the final reduction and returns `(high << 16) | low`.
    pub fn finish(&self) -> u32 {
        let low = self.low % MOD_ADLER;
        let high = self.high % MOD_ADLER;
        (high << 16) | low
    }
}

/// Computes the checksum of `data` in one pass.
pub fn adler32(data: &[u8]) -> u32 {
    let mut state = Adler32::new();
    state.update(data);
    state.finish()
}
