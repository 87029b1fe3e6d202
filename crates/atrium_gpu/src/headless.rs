//! # Headless Backend
//!
//! CPU-memory buffers with full readback and a write log. Serves two
//! masters: server-side model ingestion (no GPU present) and the test
//! suites, which assert partial-update locality by inspecting exactly
//! which byte ranges were written.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::buffer::{check_write_range, BufferUsage, GpuBackend, GpuBuffer};
use crate::error::GpuError;

/// Shared innards of a headless buffer.
#[derive(Debug)]
struct HeadlessInner {
    /// Buffer contents.
    data: Vec<u8>,
    /// Every `(offset, len)` write performed since creation.
    writes: Vec<(usize, usize)>,
}

/// A CPU-memory buffer with readback.
///
/// Cloning shares the underlying storage, so a backend can keep handles to
/// every buffer it created while layers own their `Box<dyn GpuBuffer>`.
#[derive(Clone, Debug)]
pub struct HeadlessBuffer {
    /// Declared usage (headless ignores it, tests may assert on it).
    usage: BufferUsage,
    /// Shared contents + write log.
    inner: Arc<Mutex<HeadlessInner>>,
}

impl HeadlessBuffer {
    fn new(usage: BufferUsage, data: Vec<u8>) -> Self {
        Self {
            usage,
            inner: Arc::new(Mutex::new(HeadlessInner {
                data,
                writes: Vec::new(),
            })),
        }
    }

    /// The usage declared at creation.
    #[must_use]
    pub const fn usage(&self) -> BufferUsage {
        self.usage
    }

    /// A copy of the full buffer contents.
    #[must_use]
    pub fn read_back(&self) -> Vec<u8> {
        self.inner.lock().data.clone()
    }

    /// A copy of `len` bytes starting at `offset`.
    ///
    /// # Panics
    ///
    /// Panics if the range exceeds the buffer (test helper, not a
    /// production path).
    #[must_use]
    pub fn read_range(&self, offset: usize, len: usize) -> Vec<u8> {
        self.inner.lock().data[offset..offset + len].to_vec()
    }

    /// Every `(offset, len)` write performed since creation or the last
    /// [`Self::clear_write_log`].
    #[must_use]
    pub fn write_log(&self) -> Vec<(usize, usize)> {
        self.inner.lock().writes.clone()
    }

    /// Clears the write log, keeping contents.
    pub fn clear_write_log(&self) {
        self.inner.lock().writes.clear();
    }
}

impl GpuBuffer for HeadlessBuffer {
    fn len(&self) -> usize {
        self.inner.lock().data.len()
    }

    fn write(&self, byte_offset: usize, bytes: &[u8]) -> Result<(), GpuError> {
        let mut inner = self.inner.lock();
        check_write_range(byte_offset, bytes.len(), inner.data.len())?;
        inner.data[byte_offset..byte_offset + bytes.len()].copy_from_slice(bytes);
        inner.writes.push((byte_offset, bytes.len()));
        Ok(())
    }
}

/// Backend keeping every buffer in CPU memory.
///
/// Retains a handle to each created buffer, in creation order, so tests
/// can read back what a layer uploaded.
#[derive(Debug, Default)]
pub struct HeadlessBackend {
    /// Handles to every buffer created through this backend.
    created: Mutex<Vec<HeadlessBuffer>>,
}

impl HeadlessBackend {
    /// Creates an empty backend.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of buffers created so far.
    #[must_use]
    pub fn buffer_count(&self) -> usize {
        self.created.lock().len()
    }

    /// Handle to the `index`-th created buffer (creation order).
    #[must_use]
    pub fn buffer(&self, index: usize) -> Option<HeadlessBuffer> {
        self.created.lock().get(index).cloned()
    }
}

impl GpuBackend for HeadlessBackend {
    fn create_buffer(&self, usage: BufferUsage, bytes: &[u8]) -> Box<dyn GpuBuffer> {
        let buffer = HeadlessBuffer::new(usage, bytes.to_vec());
        self.created.lock().push(buffer.clone());
        Box::new(buffer)
    }

    fn create_empty_buffer(&self, usage: BufferUsage, len: usize) -> Box<dyn GpuBuffer> {
        let buffer = HeadlessBuffer::new(usage, vec![0; len]);
        self.created.lock().push(buffer.clone());
        Box::new(buffer)
    }
}
