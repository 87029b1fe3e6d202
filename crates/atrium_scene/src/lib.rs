//! # ATRIUM Scene
//!
//! The VBO scene-model core: many objects' geometry packed into shared GPU
//! buffers, addressable per-object through portions.
//!
//! ## Architecture
//!
//! ```text
//! loader arrays ──createPortion──▶ LayerStaging (CPU, append-only)
//!                                      │ finalize
//!                                      ▼
//!                     GPU buffers: positions/indices (static)
//!                                  colors/offsets/flags (dynamic)
//!                                      │ per frame
//!                                      ▼
//!                guard on aggregate counters ──▶ one draw call per pass
//! ```
//!
//! ## Architecture Rules
//!
//! 1. **Portions freeze at finalize** - only contents (colors, flags,
//!    offsets) mutate afterwards, each within its own byte range
//! 2. **Counters are exact** - every toggle moves the layer counter and the
//!    model mirror together; nothing rescans portions
//! 3. **Budget is enforced** - `create_portion` refuses what
//!    `can_create_portion` would reject, it never overruns the buffers

#![deny(missing_docs)]
#![deny(unsafe_code)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![deny(clippy::perf)]

pub mod batching;
mod counts;
mod error;
pub mod instancing;
mod model;
mod portion;
mod staging;

pub use batching::{BatchedGeometry, BatchingLayer, LayerConfig, Positions};
pub use counts::LayerCounts;
pub use error::ModelError;
pub use instancing::{InstanceDescriptor, InstancingLayer, SharedGeometry};
pub use model::{
    EntityId, GeometryId, MeshDescriptor, MeshId, VboModel, VboModelConfig,
};
pub use portion::{Portion, PortionId};
