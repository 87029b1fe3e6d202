//! # Scratch Pool
//!
//! Lazily grown typed arrays leased out by length. The pool never shrinks
//! and never zeroes: leased contents are stale, and the caller must
//! overwrite the range it uses before handing it to the GPU.

/// A pool of reusable typed scratch buffers.
///
/// One pool per layer. Lease methods return a slice of exactly the
/// requested length, growing the backing storage when needed.
///
/// # Thread Safety
///
/// This pool is NOT thread-safe. Layers are single-threaded by contract.
#[derive(Debug, Default)]
pub struct ScratchPool {
    /// Backing storage for u8 leases.
    bytes: Vec<u8>,
    /// Backing storage for u16 leases.
    shorts: Vec<u16>,
    /// Backing storage for u32 leases.
    words: Vec<u32>,
    /// Backing storage for f32 leases.
    floats: Vec<f32>,
}

impl ScratchPool {
    /// Creates an empty pool; storage grows on first lease.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Leases a u8 slice of length `len`. Contents are stale.
    pub fn u8_slice(&mut self, len: usize) -> &mut [u8] {
        if self.bytes.len() < len {
            self.bytes.resize(len, 0);
        }
        &mut self.bytes[..len]
    }

    /// Leases a u16 slice of length `len`. Contents are stale.
    pub fn u16_slice(&mut self, len: usize) -> &mut [u16] {
        if self.shorts.len() < len {
            self.shorts.resize(len, 0);
        }
        &mut self.shorts[..len]
    }

    /// Leases a u32 slice of length `len`. Contents are stale.
    pub fn u32_slice(&mut self, len: usize) -> &mut [u32] {
        if self.words.len() < len {
            self.words.resize(len, 0);
        }
        &mut self.words[..len]
    }

    /// Leases an f32 slice of length `len`. Contents are stale.
    pub fn f32_slice(&mut self, len: usize) -> &mut [f32] {
        if self.floats.len() < len {
            self.floats.resize(len, 0.0);
        }
        &mut self.floats[..len]
    }

    /// Current capacity of the u32 storage, in elements.
    ///
    /// Exposed for tests asserting the pool grows monotonically.
    #[must_use]
    pub fn u32_capacity(&self) -> usize {
        self.words.len()
    }
}
