//! # Buffer Traits
//!
//! The seam between the VBO layers and whatever drives the GPU. Layers
//! never see device or queue types; they create buffers through
//! [`GpuBackend`] at finalize time and mutate them through [`GpuBuffer`]
//! afterwards.

use crate::error::GpuError;

/// Update frequency of a buffer, decided at creation.
///
/// Positions and indices are frozen at finalize and go `Static`; colors,
/// offsets, flags and per-instance attributes mutate per toggle and go
/// `Dynamic`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BufferUsage {
    /// Uploaded once, never rewritten.
    Static,
    /// Rewritten in sub-ranges after creation.
    Dynamic,
}

/// A GPU-resident buffer accepting partial byte-range writes.
pub trait GpuBuffer: Send + Sync {
    /// Total size in bytes.
    fn len(&self) -> usize;

    /// Returns true if the buffer holds zero bytes.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Writes `bytes` at `byte_offset`, leaving the rest of the buffer
    /// untouched.
    ///
    /// # Errors
    ///
    /// [`GpuError::WriteOutOfRange`] when the range exceeds the buffer.
    fn write(&self, byte_offset: usize, bytes: &[u8]) -> Result<(), GpuError>;
}

/// Creates GPU buffers for a layer.
pub trait GpuBackend: Send + Sync {
    /// Creates a buffer initialized with `bytes`.
    fn create_buffer(&self, usage: BufferUsage, bytes: &[u8]) -> Box<dyn GpuBuffer>;

    /// Creates a zero-initialized buffer of `len` bytes.
    ///
    /// Used for the flags buffer, which starts all-NotRendered and is
    /// filled by the deferred flag flush.
    fn create_empty_buffer(&self, usage: BufferUsage, len: usize) -> Box<dyn GpuBuffer>;
}

/// Validates a sub-range write against a buffer size.
///
/// Shared by every backend so range errors are reported identically.
pub(crate) fn check_write_range(offset: usize, len: usize, size: usize) -> Result<(), GpuError> {
    if offset.saturating_add(len) > size {
        return Err(GpuError::WriteOutOfRange { offset, len, size });
    }
    Ok(())
}
