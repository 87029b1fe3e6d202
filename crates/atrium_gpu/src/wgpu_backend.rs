//! # WGPU Backend
//!
//! Hardware buffers via `wgpu`. Static buffers are uploaded once at
//! creation; dynamic buffers mutate through `Queue::write_buffer`
//! sub-range writes, which is the whole point of the per-portion update
//! protocol.

use std::sync::Arc;

use wgpu::util::DeviceExt;

use crate::buffer::{check_write_range, BufferUsage, GpuBackend, GpuBuffer};
use crate::error::GpuError;

/// `wgpu` requires copy offsets and sizes aligned to 4 bytes.
const COPY_ALIGN: usize = wgpu::COPY_BUFFER_ALIGNMENT as usize;

/// Backend owning a `wgpu` device and queue.
#[derive(Debug)]
pub struct WgpuBackend {
    /// Shared device handle.
    device: Arc<wgpu::Device>,
    /// Shared submission queue.
    queue: Arc<wgpu::Queue>,
}

impl WgpuBackend {
    /// Wraps an existing device and queue (the viewer shell owns surface
    /// configuration and swapchain concerns).
    #[must_use]
    pub fn new(device: Arc<wgpu::Device>, queue: Arc<wgpu::Queue>) -> Self {
        Self { device, queue }
    }

    /// Acquires a high-performance adapter and device from `instance`.
    ///
    /// # Errors
    ///
    /// [`GpuError::AdapterUnavailable`] when no adapter exists,
    /// [`GpuError::DeviceRequest`] when the adapter refuses the device.
    pub fn request(instance: &wgpu::Instance) -> Result<Self, GpuError> {
        let adapter = pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions {
            power_preference: wgpu::PowerPreference::HighPerformance,
            compatible_surface: None,
            force_fallback_adapter: false,
        }))
        .ok_or(GpuError::AdapterUnavailable)?;

        tracing::info!("GPU adapter: {}", adapter.get_info().name);

        let (device, queue) = pollster::block_on(adapter.request_device(
            &wgpu::DeviceDescriptor {
                label: Some("atrium-device"),
                required_features: wgpu::Features::empty(),
                required_limits: wgpu::Limits::default(),
            },
            None,
        ))
        .map_err(|e| GpuError::DeviceRequest {
            reason: e.to_string(),
        })?;

        Ok(Self::new(Arc::new(device), Arc::new(queue)))
    }

    fn buffer_usages(usage: BufferUsage) -> wgpu::BufferUsages {
        let base = wgpu::BufferUsages::VERTEX | wgpu::BufferUsages::INDEX;
        match usage {
            BufferUsage::Static => base,
            BufferUsage::Dynamic => base | wgpu::BufferUsages::COPY_DST,
        }
    }
}

/// One hardware buffer plus the queue that writes to it.
#[derive(Debug)]
struct WgpuBufferHandle {
    /// The underlying buffer.
    buffer: wgpu::Buffer,
    /// Queue used for sub-range writes.
    queue: Arc<wgpu::Queue>,
    /// Logical size in bytes (unpadded).
    len: usize,
}

impl GpuBuffer for WgpuBufferHandle {
    fn len(&self) -> usize {
        self.len
    }

    fn write(&self, byte_offset: usize, bytes: &[u8]) -> Result<(), GpuError> {
        check_write_range(byte_offset, bytes.len(), self.len)?;
        // Layer attribute strides (4-byte colors, 4-byte flags, 12-byte
        // offsets) keep portion ranges on the copy alignment.
        debug_assert!(byte_offset % COPY_ALIGN == 0 && bytes.len() % COPY_ALIGN == 0);
        self.queue.write_buffer(&self.buffer, byte_offset as u64, bytes);
        Ok(())
    }
}

impl GpuBackend for WgpuBackend {
    fn create_buffer(&self, usage: BufferUsage, bytes: &[u8]) -> Box<dyn GpuBuffer> {
        let buffer = self
            .device
            .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("atrium-layer-buffer"),
                contents: bytes,
                usage: Self::buffer_usages(usage),
            });
        Box::new(WgpuBufferHandle {
            buffer,
            queue: Arc::clone(&self.queue),
            len: bytes.len(),
        })
    }

    fn create_empty_buffer(&self, usage: BufferUsage, len: usize) -> Box<dyn GpuBuffer> {
        let padded = len.div_ceil(COPY_ALIGN) * COPY_ALIGN;
        let buffer = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("atrium-layer-buffer"),
            size: padded as u64,
            usage: Self::buffer_usages(usage),
            mapped_at_creation: false,
        });
        Box::new(WgpuBufferHandle {
            buffer,
            queue: Arc::clone(&self.queue),
            len,
        })
    }
}
