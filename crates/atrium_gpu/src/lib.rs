//! # ATRIUM GPU
//!
//! Buffer ownership for the VBO layers, behind two small traits:
//!
//! - [`GpuBackend`] creates buffers (static upload-once, or dynamic)
//! - [`GpuBuffer`] accepts partial byte-range writes
//!
//! Two backends ship here: [`WgpuBackend`] for hardware, and
//! [`HeadlessBackend`] keeping buffers in CPU memory with full readback and
//! a write log - used by the test suites and by server-side tooling that
//! ingests models without a GPU.

#![deny(missing_docs)]
#![deny(unsafe_code)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![deny(clippy::perf)]

mod buffer;
mod error;
mod headless;
mod wgpu_backend;

pub use buffer::{BufferUsage, GpuBackend, GpuBuffer};
pub use error::GpuError;
pub use headless::{HeadlessBackend, HeadlessBuffer};
pub use wgpu_backend::WgpuBackend;
