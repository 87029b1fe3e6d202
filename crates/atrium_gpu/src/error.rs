//! # GPU Error Types
//!
//! All recoverable errors the GPU abstraction can surface.

use thiserror::Error;

/// Errors from backend acquisition and buffer writes.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GpuError {
    /// No suitable adapter was found on this machine.
    #[error("no suitable GPU adapter available")]
    AdapterUnavailable,

    /// The adapter refused the requested device configuration.
    #[error("device request failed: {reason}")]
    DeviceRequest {
        /// Driver-reported failure reason.
        reason: String,
    },

    /// A partial write would land outside the buffer.
    #[error("buffer write out of range: offset {offset} + len {len} > buffer size {size}")]
    WriteOutOfRange {
        /// Byte offset of the attempted write.
        offset: usize,
        /// Byte length of the attempted write.
        len: usize,
        /// Total buffer size in bytes.
        size: usize,
    },
}
