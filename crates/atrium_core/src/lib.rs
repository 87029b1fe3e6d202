//! # ATRIUM Core
//!
//! Foundation crate for the ATRIUM VBO scene-model engine:
//! - Packed per-vertex render flags (shader ABI, bit-exact)
//! - AABB accumulation and position quantization math
//! - Reusable scratch memory for per-portion GPU updates
//! - Scene options resolved once at layer construction
//!
//! ## Architecture Rules
//!
//! 1. **Everything here is CPU-side and pure** - no GPU handles, no I/O
//! 2. **One flag encoder** - both the deferred and the immediate flag
//!    write paths consume [`flags::pack_vertex_flags`], so they can never
//!    disagree
//! 3. **No allocations in toggle paths** - callers lease slices from
//!    [`memory::ScratchPool`] instead of allocating per call

#![deny(missing_docs)]
#![deny(unsafe_code)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![deny(clippy::perf)]

pub mod flags;
pub mod math;
pub mod memory;
pub mod options;

pub use flags::{pack_vertex_flags, EntityFlags, RenderPass, SilhouetteGlow};
pub use math::{Aabb, Mat4};
pub use memory::ScratchPool;
pub use options::SceneOptions;
