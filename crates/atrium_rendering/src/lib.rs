//! # ATRIUM Rendering
//!
//! The renderer side of the layer/renderer contract:
//!
//! - [`LayerDrawState`] is everything a renderer may see of a layer
//! - [`LayerRenderer`] / [`RendererFactory`] are the seam behind which
//!   shader generation and pipeline compilation live
//! - [`RendererSet`] memoizes one renderer per pass family
//! - [`RendererRegistry`] owns one set per scene, invalidating on
//!   recompile and evicting on scene teardown
//!
//! A scene with hundreds of layers compiles each pass family's program
//! exactly once; that is the entire reason this crate exists.

#![deny(missing_docs)]
#![deny(unsafe_code)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![deny(clippy::perf)]

mod registry;
mod renderer;
mod set;

pub use registry::{RendererRegistry, SceneId};
pub use renderer::{LayerDrawState, LayerRenderer, Primitive, RendererFactory, RendererFamily};
pub use set::RendererSet;
